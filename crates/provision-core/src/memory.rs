//! An in-process stand-in for the cloud services.
//!
//! Backs `--dry-run` in the CLI and the workflow tests. Resources are keyed by
//! name like the real services, so repeated runs reuse them, while key
//! identities are random per instance.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cloud::{KeyRef, KeySpec, ParameterPublisher, QueueHandle, QueueSpec, ResourceCreator};

/// One request received by an [`InMemoryCloud`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureKey(String),
    EnsureQueue(String),
    Publish(String),
}

#[derive(Debug, Default)]
struct State {
    keys: BTreeMap<String, KeyRef>,
    queues: BTreeMap<String, QueueSpec>,
    parameters: BTreeMap<String, String>,
    calls: Vec<Call>,
    fail_on: Option<String>,
}

impl State {
    fn check(&self, target: &str) -> anyhow::Result<()> {
        match &self.fail_on {
            Some(failing) if failing == target => {
                anyhow::bail!("injected failure for {target}")
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct InMemoryCloud {
    account_id: String,
    region: String,
    state: Mutex<State>,
}

impl InMemoryCloud {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Makes every request for the key alias, queue name or parameter path `target` fail.
    pub fn fail_on(mut self, target: impl Into<String>) -> Self {
        self.state.get_mut().fail_on = Some(target.into());
        self
    }

    /// Lets requests that [`InMemoryCloud::fail_on`] rejected succeed again.
    pub async fn recover(&self) {
        self.state.lock().await.fail_on = None;
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    pub async fn key_count(&self) -> usize {
        self.state.lock().await.keys.len()
    }

    /// Names of the queues that exist, sorted.
    pub async fn queue_names(&self) -> Vec<String> {
        self.state.lock().await.queues.keys().cloned().collect()
    }

    pub async fn queue(&self, name: &str) -> Option<QueueSpec> {
        self.state.lock().await.queues.get(name).cloned()
    }

    pub async fn parameters(&self) -> BTreeMap<String, String> {
        self.state.lock().await.parameters.clone()
    }

    fn queue_handle(&self, name: &str) -> QueueHandle {
        QueueHandle {
            arn: format!("arn:aws:sqs:{}:{}:{name}", self.region, self.account_id),
            url: format!(
                "https://sqs.{}.amazonaws.com/{}/{name}",
                self.region, self.account_id
            ),
        }
    }
}

#[async_trait]
impl ResourceCreator for InMemoryCloud {
    async fn ensure_key(&self, spec: &KeySpec) -> anyhow::Result<KeyRef> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::EnsureKey(spec.alias.clone()));
        state.check(&spec.alias)?;

        let key = state
            .keys
            .entry(spec.alias.clone())
            .or_insert_with(|| KeyRef {
                alias: spec.alias.clone(),
                arn: format!(
                    "arn:aws:kms:{}:{}:key/{}",
                    self.region,
                    self.account_id,
                    uuid::Uuid::new_v4()
                ),
            });
        Ok(key.clone())
    }

    async fn ensure_queue(&self, spec: &QueueSpec) -> anyhow::Result<QueueHandle> {
        let name = spec.name.as_ref();
        let mut state = self.state.lock().await;
        state.calls.push(Call::EnsureQueue(name.to_string()));
        state.check(name)?;

        if let Some(existing) = state.queues.get(name) {
            if existing.fifo.is_some() != spec.fifo.is_some() {
                anyhow::bail!("queue {name} exists with a different ordering mode");
            }
            log::warn!("queue {name} already exists, updating its attributes");
        }
        state.queues.insert(name.to_string(), spec.clone());

        Ok(self.queue_handle(name))
    }
}

#[async_trait]
impl ParameterPublisher for InMemoryCloud {
    async fn publish(&self, path: &str, value: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::Publish(path.to_string()));
        state.check(path)?;

        state.parameters.insert(path.to_string(), value.to_string());
        Ok(())
    }

    async fn lookup(&self, path: &str) -> anyhow::Result<Option<String>> {
        let state = self.state.lock().await;
        state.check(path)?;
        Ok(state.parameters.get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::naming::QueueName;

    fn spec(name: &str) -> QueueSpec {
        QueueSpec {
            name: QueueName::new(name).unwrap(),
            kms_master_key: "arn:aws:kms:eu-west-1:123456789012:key/test".to_string(),
            enforce_tls: true,
            retention_period: Duration::from_secs(60),
            visibility_timeout: None,
            fifo: None,
            redrive_policy: None,
        }
    }

    #[tokio::test]
    async fn queue_addresses_follow_account_and_region() {
        let cloud = InMemoryCloud::new("123456789012", "eu-west-1");
        let handle = cloud.ensure_queue(&spec("orders-DLQ")).await.unwrap();

        assert_eq!(handle.arn, "arn:aws:sqs:eu-west-1:123456789012:orders-DLQ");
        assert_eq!(
            handle.url,
            "https://sqs.eu-west-1.amazonaws.com/123456789012/orders-DLQ"
        );
    }

    #[tokio::test]
    async fn keys_are_reused_by_alias_but_unique_per_instance() {
        let spec = KeySpec {
            alias: "alias/orders-KmsKey".to_string(),
            description: "test".to_string(),
        };

        let cloud = InMemoryCloud::new("123456789012", "eu-west-1");
        let first = cloud.ensure_key(&spec).await.unwrap();
        let again = cloud.ensure_key(&spec).await.unwrap();
        let other = InMemoryCloud::new("123456789012", "eu-west-1")
            .ensure_key(&spec)
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_ne!(first.arn, other.arn);
    }

    #[tokio::test]
    async fn publish_overwrites() {
        let cloud = InMemoryCloud::new("123456789012", "eu-west-1");
        cloud.publish("/a", "1").await.unwrap();
        cloud.publish("/a", "2").await.unwrap();

        assert_eq!(cloud.lookup("/a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(cloud.lookup("/b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_ordering_mode_change() {
        let cloud = InMemoryCloud::new("123456789012", "eu-west-1");
        cloud.ensure_queue(&spec("orders-Queue")).await.unwrap();

        let mut fifo = spec("orders-Queue");
        fifo.fifo = Some(crate::cloud::FifoSettings {
            content_based_deduplication: true,
            deduplication_scope: crate::cloud::DeduplicationScope::MessageGroup,
        });
        assert!(cloud.ensure_queue(&fifo).await.is_err());
    }
}
