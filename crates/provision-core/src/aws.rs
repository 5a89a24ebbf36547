//! KMS, SQS and SSM Parameter Store realization of the provisioning seams.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_kms as kms;
use aws_sdk_sqs as sqs;
use aws_sdk_ssm as ssm;
use log::{debug, warn};
use sqs::error::ProvideErrorMetadata;
use sqs::operation::create_queue::CreateQueueError;
use sqs::types::QueueAttributeName;

use crate::cloud::{KeyRef, KeySpec, ParameterPublisher, QueueHandle, QueueSpec, ResourceCreator};

/// Tag carrying the alias a key was created for, so a key whose alias was
/// never attached can be found again.
const ALIAS_TAG: &str = "provision:alias";

/// Client for the AWS services a provisioning run touches.
///
/// # Example
///
/// ```no_run
/// use provision::{provision, AwsCloud, ProvisioningContext, QueueConfig};
///
/// # async fn example() -> Result<(), provision::ProvisionError> {
/// let config = aws_config::from_env().load().await;
/// let cloud = AwsCloud::from_config(&config);
///
/// let ctx = ProvisioningContext::new("Data-dev-Orders", "dev", "123456789012", "eu-west-1")?;
/// let set = provision(&ctx, &QueueConfig::default(), &cloud, &cloud).await?;
/// println!("{}", set.dead_letter_queue.url);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct AwsCloud {
    pub kms: kms::Client,
    pub sqs: sqs::Client,
    pub ssm: ssm::Client,
}

impl AwsCloud {
    /// Builds all clients from one pre-built SDK config, so the caller decides on
    /// credentials and endpoints (e.g. LocalStack with `--local`).
    pub fn from_config(config: &SdkConfig) -> Self {
        Self {
            kms: kms::Client::new(config),
            sqs: sqs::Client::new(config),
            ssm: ssm::Client::new(config),
        }
    }

    async fn queue_url(&self, name: &str) -> anyhow::Result<String> {
        let output = self
            .sqs
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .with_context(|| format!("failed to resolve URL of queue {name}"))?;

        output
            .queue_url()
            .map(str::to_string)
            .context("GetQueueUrl returned no URL")
    }

    async fn queue_arn(&self, url: &str) -> anyhow::Result<String> {
        let output = self
            .sqs
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .with_context(|| format!("failed to get ARN of queue {url}"))?;

        output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
            .cloned()
            .context("queue has no ARN attribute")
    }

    async fn create_key(&self, spec: &KeySpec) -> anyhow::Result<String> {
        let tag = kms::types::Tag::builder()
            .tag_key(ALIAS_TAG)
            .tag_value(&spec.alias)
            .build()
            .context("failed to build key tag")?;

        let created = self
            .kms
            .create_key()
            .description(&spec.description)
            .tags(tag)
            .send()
            .await
            .with_context(|| format!("failed to create key for {}", spec.alias))?;

        created
            .key_metadata()
            .and_then(|m| m.arn())
            .map(str::to_string)
            .context("CreateKey returned no key ARN")
    }

    /// ARN of a key tagged with `alias`, left behind by a run that failed
    /// between creating the key and aliasing it.
    async fn tagged_key(&self, alias: &str) -> anyhow::Result<Option<String>> {
        let mut marker = None;
        loop {
            let page = self
                .kms
                .list_keys()
                .set_marker(marker)
                .send()
                .await
                .context("failed to list keys")?;

            for entry in page.keys() {
                let (Some(key_id), Some(arn)) = (entry.key_id(), entry.key_arn()) else {
                    continue;
                };
                match self.kms.list_resource_tags().key_id(key_id).send().await {
                    Ok(tags) if has_alias_tag(tags.tags(), alias) => {
                        return Ok(Some(arn.to_string()))
                    }
                    Ok(_) => {}
                    // keys of other owners may not be readable
                    Err(e) => debug!("skipping key {key_id}: {e}"),
                }
            }

            match page.next_marker() {
                Some(next) if page.truncated() => marker = Some(next.to_string()),
                _ => return Ok(None),
            }
        }
    }
}

fn has_alias_tag(tags: &[kms::types::Tag], alias: &str) -> bool {
    tags.iter()
        .any(|tag| tag.tag_key() == ALIAS_TAG && tag.tag_value() == alias)
}

/// SQS attributes for `spec`, everything except the access policy.
pub fn queue_attributes(spec: &QueueSpec) -> anyhow::Result<HashMap<QueueAttributeName, String>> {
    let mut attributes = HashMap::from([
        (
            QueueAttributeName::KmsMasterKeyId,
            spec.kms_master_key.clone(),
        ),
        (
            QueueAttributeName::MessageRetentionPeriod,
            spec.retention_period.as_secs().to_string(),
        ),
    ]);

    if let Some(timeout) = spec.visibility_timeout {
        attributes.insert(
            QueueAttributeName::VisibilityTimeout,
            timeout.as_secs().to_string(),
        );
    }

    if let Some(fifo) = spec.fifo {
        attributes.insert(QueueAttributeName::FifoQueue, "true".to_string());
        attributes.insert(
            QueueAttributeName::ContentBasedDeduplication,
            fifo.content_based_deduplication.to_string(),
        );
        attributes.insert(
            QueueAttributeName::DeduplicationScope,
            fifo.deduplication_scope.as_str().to_string(),
        );
    }

    if let Some(policy) = &spec.redrive_policy {
        attributes.insert(
            QueueAttributeName::RedrivePolicy,
            serde_json::to_string(policy).context("failed to serialize redrive policy")?,
        );
    }

    Ok(attributes)
}

/// Queue policy denying every action over a connection without TLS.
pub fn tls_only_policy(queue_arn: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "DenyInsecureTransport",
            "Effect": "Deny",
            "Principal": { "AWS": "*" },
            "Action": "sqs:*",
            "Resource": queue_arn,
            "Condition": { "Bool": { "aws:SecureTransport": "false" } }
        }]
    })
    .to_string()
}

fn queue_exists(err: &sqs::error::SdkError<CreateQueueError>) -> bool {
    err.as_service_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code.contains("QueueAlreadyExists") || code.contains("QueueNameExists"))
}

#[async_trait]
impl ResourceCreator for AwsCloud {
    async fn ensure_key(&self, spec: &KeySpec) -> anyhow::Result<KeyRef> {
        match self.kms.describe_key().key_id(&spec.alias).send().await {
            Ok(output) => {
                let arn = output
                    .key_metadata()
                    .and_then(|m| m.arn())
                    .context("DescribeKey returned no key ARN")?;
                warn!("key {} already exists, reusing it", spec.alias);
                return Ok(KeyRef {
                    alias: spec.alias.clone(),
                    arn: arn.to_string(),
                });
            }
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found_exception()) => {
                debug!("no key registered under {}", spec.alias);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to look up key {}", spec.alias));
            }
        }

        let arn = match self.tagged_key(&spec.alias).await? {
            Some(arn) => {
                warn!("found unaliased key {arn} for {}, reusing it", spec.alias);
                arn
            }
            None => self.create_key(spec).await?,
        };

        self.kms
            .create_alias()
            .alias_name(&spec.alias)
            .target_key_id(&arn)
            .send()
            .await
            .with_context(|| format!("failed to create alias {}", spec.alias))?;

        Ok(KeyRef {
            alias: spec.alias.clone(),
            arn,
        })
    }

    async fn ensure_queue(&self, spec: &QueueSpec) -> anyhow::Result<QueueHandle> {
        let name = spec.name.as_ref();
        let attributes = queue_attributes(spec)?;

        let created = self
            .sqs
            .create_queue()
            .queue_name(name)
            .set_attributes(Some(attributes.clone()))
            .send()
            .await;

        let url = match created {
            Ok(output) => output
                .queue_url()
                .map(str::to_string)
                .context("CreateQueue returned no URL")?,
            Err(e) if queue_exists(&e) => {
                warn!("queue {name} already exists, updating its attributes");
                let url = self.queue_url(name).await?;

                // the ordering mode is fixed at creation
                let mut mutable = attributes;
                mutable.remove(&QueueAttributeName::FifoQueue);
                self.sqs
                    .set_queue_attributes()
                    .queue_url(&url)
                    .set_attributes(Some(mutable))
                    .send()
                    .await
                    .with_context(|| format!("failed to update attributes of queue {name}"))?;
                url
            }
            Err(e) => return Err(e).with_context(|| format!("failed to create queue {name}")),
        };

        let arn = self.queue_arn(&url).await?;

        if spec.enforce_tls {
            self.sqs
                .set_queue_attributes()
                .queue_url(&url)
                .attributes(QueueAttributeName::Policy, tls_only_policy(&arn))
                .send()
                .await
                .with_context(|| format!("failed to set access policy of queue {name}"))?;
        }

        Ok(QueueHandle { arn, url })
    }
}

#[async_trait]
impl ParameterPublisher for AwsCloud {
    async fn publish(&self, path: &str, value: &str) -> anyhow::Result<()> {
        self.ssm
            .put_parameter()
            .name(path)
            .value(value)
            .r#type(ssm::types::ParameterType::String)
            .overwrite(true)
            .send()
            .await
            .with_context(|| format!("failed to put parameter {path}"))?;
        Ok(())
    }

    async fn lookup(&self, path: &str) -> anyhow::Result<Option<String>> {
        match self.ssm.get_parameter().name(path).send().await {
            Ok(output) => Ok(output
                .parameter()
                .and_then(|p| p.value())
                .map(str::to_string)),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_parameter_not_found()) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to get parameter {path}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cloud::{DeduplicationScope, FifoSettings, RedrivePolicy};
    use crate::naming::QueueName;
    use crate::test_utils::{local_config, localstack};
    use crate::{provision, ProvisioningContext, QueueConfig};

    fn spec() -> QueueSpec {
        QueueSpec {
            name: QueueName::new("dev-Ingest-Orders-Queue.fifo").unwrap(),
            kms_master_key: "arn:aws:kms:us-east-1:000000000000:key/abc".to_string(),
            enforce_tls: true,
            retention_period: Duration::from_secs(345_600),
            visibility_timeout: Some(Duration::from_secs(30)),
            fifo: Some(FifoSettings {
                content_based_deduplication: true,
                deduplication_scope: DeduplicationScope::MessageGroup,
            }),
            redrive_policy: Some(RedrivePolicy {
                dead_letter_target_arn: "arn:aws:sqs:us-east-1:000000000000:dev-Ingest-Orders-DLQ.fifo"
                    .to_string(),
                max_receive_count: 5,
            }),
        }
    }

    #[test]
    fn attributes_cover_encryption_fifo_and_redrive() {
        let attributes = queue_attributes(&spec()).unwrap();

        assert_eq!(
            attributes[&QueueAttributeName::KmsMasterKeyId],
            "arn:aws:kms:us-east-1:000000000000:key/abc"
        );
        assert_eq!(attributes[&QueueAttributeName::MessageRetentionPeriod], "345600");
        assert_eq!(attributes[&QueueAttributeName::VisibilityTimeout], "30");
        assert_eq!(attributes[&QueueAttributeName::FifoQueue], "true");
        assert_eq!(attributes[&QueueAttributeName::ContentBasedDeduplication], "true");
        assert_eq!(attributes[&QueueAttributeName::DeduplicationScope], "messageGroup");

        let redrive: serde_json::Value =
            serde_json::from_str(&attributes[&QueueAttributeName::RedrivePolicy]).unwrap();
        assert_eq!(
            redrive,
            serde_json::json!({
                "deadLetterTargetArn": "arn:aws:sqs:us-east-1:000000000000:dev-Ingest-Orders-DLQ.fifo",
                "maxReceiveCount": 5
            })
        );
    }

    #[test]
    fn standard_queue_omits_fifo_attributes() {
        let mut spec = spec();
        spec.fifo = None;
        spec.visibility_timeout = None;
        spec.redrive_policy = None;

        let attributes = queue_attributes(&spec).unwrap();
        assert_eq!(attributes.len(), 2);
        assert!(!attributes.contains_key(&QueueAttributeName::FifoQueue));
    }

    #[test]
    fn policy_denies_insecure_transport() {
        let policy: serde_json::Value =
            serde_json::from_str(&tls_only_policy("arn:aws:sqs:us-east-1:000000000000:q")).unwrap();
        let statement = &policy["Statement"][0];

        assert_eq!(statement["Effect"], "Deny");
        assert_eq!(statement["Resource"], "arn:aws:sqs:us-east-1:000000000000:q");
        assert_eq!(statement["Condition"]["Bool"]["aws:SecureTransport"], "false");
    }

    fn tag(key: &str, value: &str) -> kms::types::Tag {
        kms::types::Tag::builder()
            .tag_key(key)
            .tag_value(value)
            .build()
            .unwrap()
    }

    #[test]
    fn alias_tag_must_match_key_and_value() {
        let tags = [tag("team", "data"), tag(ALIAS_TAG, "alias/a-b-c-KmsKey")];

        assert!(has_alias_tag(&tags, "alias/a-b-c-KmsKey"));
        assert!(!has_alias_tag(&tags, "alias/x-y-z-KmsKey"));
        assert!(!has_alias_tag(&[tag("team", "alias/a-b-c-KmsKey")], "alias/a-b-c-KmsKey"));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn unaliased_key_is_reused() {
        let (endpoint_url, container) = localstack().await.unwrap();
        let config = local_config(&endpoint_url, None).load().await;
        let cloud = AwsCloud::from_config(&config);
        let spec = KeySpec {
            alias: "alias/Data-dev-Payments-KmsKey".to_string(),
            description: "orphan".to_string(),
        };

        // a key created before its alias could be attached
        let orphan = cloud.create_key(&spec).await.unwrap();

        let key = cloud.ensure_key(&spec).await.unwrap();
        assert_eq!(key.arn, orphan);
        assert_eq!(cloud.ensure_key(&spec).await.unwrap().arn, orphan);

        let keys = cloud.kms.list_keys().send().await.unwrap();
        assert_eq!(keys.keys().len(), 1);

        container.stop().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn provisions_against_localstack_twice() {
        let (endpoint_url, container) = localstack().await.unwrap();
        let config = local_config(&endpoint_url, None).load().await;
        let cloud = AwsCloud::from_config(&config);

        let ctx = ProvisioningContext::new("Data-dev-Orders", "dev", "000000000000", "us-east-1")
            .unwrap();
        let cfg = QueueConfig {
            is_fifo: true,
            ..Default::default()
        };

        let first = provision(&ctx, &cfg, &cloud, &cloud).await.unwrap();
        let second = provision(&ctx, &cfg, &cloud, &cloud).await.unwrap();

        assert_eq!(first.published, second.published);
        assert_eq!(first.encryption_key.arn, second.encryption_key.arn);

        let attrs = cloud
            .sqs
            .get_queue_attributes()
            .queue_url(&second.primary_queue.as_ref().unwrap().url)
            .attribute_names(QueueAttributeName::All)
            .send()
            .await
            .unwrap();
        let attrs = attrs.attributes().unwrap();
        assert!(attrs[&QueueAttributeName::RedrivePolicy].contains(&second.dead_letter_queue.arn));

        assert_eq!(
            cloud
                .lookup("/service/data/dev/published/sqs/orders-dlq-arn")
                .await
                .unwrap(),
            Some(second.dead_letter_queue.arn.clone())
        );

        container.stop().await.unwrap();
    }
}
