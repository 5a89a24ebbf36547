use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use provision::{
    AwsCloud, InMemoryCloud, ParameterPublisher, ProvisioningContext, PublicationPaths, QueueConfig,
    ResourceCreator,
};

#[tokio::main]
pub async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = Cli::parse().run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(name = "provision")]
#[command(about = "provision AWS SQS queues with dead letter queues and published SSM references", long_about = None)]
pub struct Cli {
    /// Use LocalStack with static test credentials
    #[arg(long, global = true)]
    local: bool,

    /// Endpoint URL override, e.g. http://localhost:4566
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the slug derived from a parent identifier
    Slug {
        parent_id: String,
        #[arg(long = "env", env = "PROVISION_ENVIRONMENT")]
        environment: String,
    },
    /// Print the parameter paths references are published under
    Paths {
        parent_id: String,
        #[arg(long = "env", env = "PROVISION_ENVIRONMENT")]
        environment: String,
    },
    /// Provision the key, dead letter queue and primary queue
    Queue(QueueArgs),
    /// Read back the references published for a parent identifier
    Describe(TargetArgs),
}

#[derive(Debug, Args)]
struct TargetArgs {
    parent_id: String,

    #[arg(long = "env", env = "PROVISION_ENVIRONMENT")]
    environment: String,

    #[arg(long, env = "AWS_ACCOUNT_ID", default_value = "")]
    account: String,

    #[arg(long, env = "AWS_REGION", default_value = "")]
    region: String,
}

impl TargetArgs {
    fn context(&self) -> provision::Result<ProvisioningContext> {
        ProvisioningContext::new(
            self.parent_id.as_str(),
            self.environment.as_str(),
            self.account.as_str(),
            self.region.as_str(),
        )
    }
}

#[derive(Debug, Args)]
struct QueueArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// JSON queue property object; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Create FIFO queues
    #[arg(long)]
    fifo: bool,

    /// Only create the dead letter queue
    #[arg(long)]
    dlq_only: bool,

    /// Message retention in seconds (default 4 days)
    #[arg(long)]
    retention_secs: Option<u64>,

    /// Visibility timeout of the primary queue in seconds (default 30)
    #[arg(long)]
    visibility_timeout_secs: Option<u64>,

    /// Plan against an in-memory cloud instead of AWS
    #[arg(long)]
    dry_run: bool,
}

impl QueueArgs {
    fn queue_config(&self) -> anyhow::Result<QueueConfig> {
        let mut cfg = match &self.config {
            Some(path) => QueueConfig::from_file(path)?,
            None => QueueConfig::default(),
        };

        cfg.is_fifo |= self.fifo;
        cfg.is_dlq |= self.dlq_only;
        if let Some(secs) = self.retention_secs {
            cfg.retention_period = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.visibility_timeout_secs {
            cfg.visibility_timeout = Some(Duration::from_secs(secs));
        }

        Ok(cfg)
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Slug {
                parent_id,
                environment,
            } => println!("{}", provision::derive_slug(parent_id, environment)?),
            Commands::Paths {
                parent_id,
                environment,
            } => {
                let slug = provision::derive_slug(parent_id, environment)?;
                for path in PublicationPaths::new(environment, &slug).all() {
                    println!("{path}");
                }
            }
            Commands::Queue(args) => {
                let ctx = args.target.context()?;
                let cfg = args.queue_config()?;

                let set = if args.dry_run {
                    let cloud = InMemoryCloud::new(ctx.account_id(), ctx.region());
                    run_provision(&ctx, &cfg, &cloud, &cloud).await?
                } else {
                    let cloud = AwsCloud::from_config(&self.aws_config(ctx.region()).await);
                    run_provision(&ctx, &cfg, &cloud, &cloud).await?
                };

                println!("{}", serde_json::to_string_pretty(&set)?);
            }
            Commands::Describe(target) => {
                let ctx = target.context()?;
                let cloud = AwsCloud::from_config(&self.aws_config(ctx.region()).await);
                let published = provision::describe(&ctx, &cloud).await?;
                println!("{}", serde_json::to_string_pretty(&published)?);
            }
        };

        Ok(())
    }

    /// SDK config pinned to `region`, the one the provisioning context was validated with.
    async fn aws_config(&self, region: &str) -> aws_config::SdkConfig {
        let mut loader = aws_config::from_env().region(aws_config::Region::new(region.to_owned()));

        if self.local {
            loader = loader
                .credentials_provider(aws_sdk_sqs::config::Credentials::new(
                    "test", "test", None, None, "static",
                ))
                .endpoint_url(self.endpoint.as_deref().unwrap_or("http://localhost:4566"));
        } else if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        loader.load().await
    }
}

async fn run_provision<R, P>(
    ctx: &ProvisioningContext,
    cfg: &QueueConfig,
    resources: &R,
    publisher: &P,
) -> anyhow::Result<provision::ProvisionedQueueSet>
where
    R: ResourceCreator,
    P: ParameterPublisher,
{
    log::info!(
        "provisioning {} in {} ({}/{})",
        ctx.parent_id(),
        ctx.environment(),
        ctx.account_id(),
        ctx.region()
    );
    Ok(provision::provision(ctx, cfg, resources, publisher).await?)
}
