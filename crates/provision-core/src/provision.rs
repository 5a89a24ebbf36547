//! The queue provisioning workflow.

use log::{debug, info};
use serde::Serialize;

use crate::cloud::{
    DeduplicationScope, FifoSettings, KeyRef, KeySpec, ParameterPublisher, QueueRef, QueueSpec,
    RedrivePolicy, ResourceCreator, KEY_DESCRIPTION, MAX_RECEIVE_COUNT,
};
use crate::config::{ProvisioningContext, QueueConfig};
use crate::error::{ProvisionError, Result};
use crate::naming::{self, PublicationPaths, QueueName, QueueRole};

/// A name/value pair written to the shared parameter namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedReference {
    pub path: String,
    pub value: String,
}

/// Resources created by one [`provision`] run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedQueueSet {
    pub encryption_key: KeyRef,
    pub dead_letter_queue: QueueRef,
    /// Absent when the run was configured as dead letter queue only.
    pub primary_queue: Option<QueueRef>,
    /// References in the order they were published.
    pub published: Vec<PublishedReference>,
}

/// Names and settings computed up front so nothing is created for invalid input.
#[derive(Debug, Clone)]
struct Plan {
    key: KeySpec,
    paths: PublicationPaths,
    dlq_name: QueueName,
    queue_name: Option<QueueName>,
}

fn plan(ctx: &ProvisioningContext, cfg: &QueueConfig) -> Result<Plan> {
    cfg.validate()?;

    let slug = naming::derive_slug(ctx.parent_id(), ctx.environment())?;
    let paths = PublicationPaths::new(ctx.environment(), &slug);
    let dlq_name = QueueName::for_role(ctx.parent_id(), QueueRole::DeadLetter, cfg.is_fifo)?;
    let queue_name = if cfg.is_dlq {
        None
    } else {
        Some(QueueName::for_role(
            ctx.parent_id(),
            QueueRole::Primary,
            cfg.is_fifo,
        )?)
    };

    debug!(
        "derived slug '{slug}', prefix '{}', dlq '{dlq_name}', queue {:?}",
        paths.prefix(),
        queue_name.as_ref().map(QueueName::as_ref)
    );

    Ok(Plan {
        key: KeySpec {
            alias: naming::key_alias(ctx.parent_id()),
            description: KEY_DESCRIPTION.to_string(),
        },
        paths,
        dlq_name,
        queue_name,
    })
}

/// Settings shared by both queues of a run.
fn base_spec(name: QueueName, cfg: &QueueConfig, key: &KeyRef) -> QueueSpec {
    QueueSpec {
        name,
        kms_master_key: key.arn.clone(),
        enforce_tls: true,
        retention_period: cfg.retention_period(),
        visibility_timeout: None,
        fifo: cfg.is_fifo.then_some(FifoSettings {
            content_based_deduplication: true,
            deduplication_scope: DeduplicationScope::MessageGroup,
        }),
        redrive_policy: None,
    }
}

/// Provisions the key, dead letter queue and (unless `cfg.is_dlq`) the primary
/// queue of `ctx.parent_id()`, then publishes their ARNs and URLs.
///
/// Steps run strictly in dependency order and the first failure aborts the rest.
/// Resources from earlier steps are left in place; since every name is derived
/// from `ctx` alone, calling again with the same input resumes where it stopped.
///
/// # Errors
///
/// - [`ProvisionError::Validation`] before anything is created
/// - [`ProvisionError::ResourceCreation`] naming the key or queue that failed
/// - [`ProvisionError::Publication`] naming the path that could not be written
pub async fn provision<R, P>(
    ctx: &ProvisioningContext,
    cfg: &QueueConfig,
    resources: &R,
    publisher: &P,
) -> Result<ProvisionedQueueSet>
where
    R: ResourceCreator + ?Sized,
    P: ParameterPublisher + ?Sized,
{
    let plan = plan(ctx, cfg)?;

    let key = resources
        .ensure_key(&plan.key)
        .await
        .map_err(|e| ProvisionError::creation(&plan.key.alias, e))?;
    check_owner(ctx, &key.alias, &key.arn)?;
    info!("encryption key {} ready ({})", key.alias, key.arn);

    let dlq = create_queue(ctx, resources, base_spec(plan.dlq_name.clone(), cfg, &key)).await?;

    let queue = match plan.queue_name.clone() {
        Some(name) => {
            let spec = QueueSpec {
                visibility_timeout: Some(cfg.visibility_timeout()),
                redrive_policy: Some(RedrivePolicy {
                    dead_letter_target_arn: dlq.arn.clone(),
                    max_receive_count: MAX_RECEIVE_COUNT,
                }),
                ..base_spec(name, cfg, &key)
            };
            Some(create_queue(ctx, resources, spec).await?)
        }
        None => None,
    };

    let mut published = Vec::with_capacity(4);
    if let Some(queue) = &queue {
        publish_queue(publisher, &plan.paths, QueueRole::Primary, queue, &mut published).await?;
    }
    publish_queue(publisher, &plan.paths, QueueRole::DeadLetter, &dlq, &mut published).await?;

    Ok(ProvisionedQueueSet {
        encryption_key: key,
        dead_letter_queue: dlq,
        primary_queue: queue,
        published,
    })
}

/// Fails when `arn` names a region or account other than the one in `ctx`.
fn check_owner(ctx: &ProvisioningContext, resource: &str, arn: &str) -> Result<()> {
    // arn:partition:service:region:account:resource
    let mut fields = arn.splitn(6, ':').skip(3);
    let (region, account) = (fields.next(), fields.next());

    if region != Some(ctx.region()) || account != Some(ctx.account_id()) {
        return Err(ProvisionError::ResourceCreation {
            resource: resource.to_string(),
            message: format!(
                "{arn} is not in account {} region {}",
                ctx.account_id(),
                ctx.region()
            ),
        });
    }
    Ok(())
}

async fn create_queue<R>(
    ctx: &ProvisioningContext,
    resources: &R,
    spec: QueueSpec,
) -> Result<QueueRef>
where
    R: ResourceCreator + ?Sized,
{
    let handle = resources
        .ensure_queue(&spec)
        .await
        .map_err(|e| ProvisionError::creation(spec.name.as_ref(), e))?;
    check_owner(ctx, spec.name.as_ref(), &handle.arn)?;
    info!("queue {} ready at {}", spec.name, handle.url);

    Ok(QueueRef {
        arn: handle.arn,
        url: handle.url,
        spec,
    })
}

async fn publish_queue<P>(
    publisher: &P,
    paths: &PublicationPaths,
    role: QueueRole,
    queue: &QueueRef,
    published: &mut Vec<PublishedReference>,
) -> Result<()>
where
    P: ParameterPublisher + ?Sized,
{
    for (path, value) in [(paths.arn(role), &queue.arn), (paths.url(role), &queue.url)] {
        publisher
            .publish(&path, value)
            .await
            .map_err(|e| ProvisionError::publication(&path, e))?;
        info!("published {path}");
        published.push(PublishedReference {
            path,
            value: value.clone(),
        });
    }
    Ok(())
}

/// Currently published references of one parent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedQueues {
    pub prefix: String,
    pub queue_arn: Option<String>,
    pub queue_url: Option<String>,
    pub dlq_arn: Option<String>,
    pub dlq_url: Option<String>,
}

/// Reads back what [`provision`] published for `ctx`, without touching any resource.
pub async fn describe<P>(ctx: &ProvisioningContext, publisher: &P) -> Result<PublishedQueues>
where
    P: ParameterPublisher + ?Sized,
{
    let slug = naming::derive_slug(ctx.parent_id(), ctx.environment())?;
    let paths = PublicationPaths::new(ctx.environment(), &slug);

    Ok(PublishedQueues {
        prefix: paths.prefix().to_string(),
        queue_arn: lookup(publisher, paths.arn(QueueRole::Primary)).await?,
        queue_url: lookup(publisher, paths.url(QueueRole::Primary)).await?,
        dlq_arn: lookup(publisher, paths.arn(QueueRole::DeadLetter)).await?,
        dlq_url: lookup(publisher, paths.url(QueueRole::DeadLetter)).await?,
    })
}

async fn lookup<P>(publisher: &P, path: String) -> Result<Option<String>>
where
    P: ParameterPublisher + ?Sized,
{
    let result = publisher.lookup(&path).await;
    match result {
        Ok(value) => Ok(value),
        Err(e) => Err(ProvisionError::Lookup {
            path,
            message: format!("{e:#}"),
        }),
    }
}
