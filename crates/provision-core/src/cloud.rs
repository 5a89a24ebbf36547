//! Seams between the provisioning workflow and the services that realize it.
//!
//! The workflow decides names, settings and ordering; a [`ResourceCreator`]
//! turns a [`KeySpec`] or [`QueueSpec`] into a live resource and a
//! [`ParameterPublisher`] makes references discoverable. Implementations own
//! retries and must treat an existing resource of the same name as success.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::naming::QueueName;

/// Receive attempts after which a message is moved to the dead letter queue.
pub const MAX_RECEIVE_COUNT: u32 = 5;

pub const KEY_DESCRIPTION: &str =
    "A custom KMS key for the SQS queue that contains data to write to DataLakehouse tables.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySpec {
    pub alias: String,
    pub description: String,
}

/// A provisioned encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRef {
    pub alias: String,
    pub arn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeduplicationScope {
    MessageGroup,
}

impl DeduplicationScope {
    /// Value of the SQS `DeduplicationScope` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            DeduplicationScope::MessageGroup => "messageGroup",
        }
    }
}

/// Ordered delivery settings of a FIFO queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FifoSettings {
    pub content_based_deduplication: bool,
    pub deduplication_scope: DeduplicationScope,
}

/// Link from a queue to the dead letter queue receiving its failed messages.
///
/// Serializes to the JSON document SQS expects in the `RedrivePolicy` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

/// Everything needed to create one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    #[serde(serialize_with = "as_str")]
    pub name: QueueName,
    pub kms_master_key: String,
    /// Deny any access over an unencrypted transport.
    pub enforce_tls: bool,
    pub retention_period: Duration,
    /// `None` keeps the service default.
    pub visibility_timeout: Option<Duration>,
    pub fifo: Option<FifoSettings>,
    pub redrive_policy: Option<RedrivePolicy>,
}

fn as_str<S: serde::Serializer>(name: &QueueName, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(name.as_ref())
}

/// Address of a created queue as returned by a [`ResourceCreator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueHandle {
    pub arn: String,
    pub url: String,
}

/// A provisioned queue together with the settings it was created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueRef {
    pub arn: String,
    pub url: String,
    pub spec: QueueSpec,
}

impl QueueRef {
    pub fn name(&self) -> &str {
        self.spec.name.as_ref()
    }

    pub fn redrive_policy(&self) -> Option<&RedrivePolicy> {
        self.spec.redrive_policy.as_ref()
    }
}

#[async_trait]
pub trait ResourceCreator: Send + Sync {
    /// Creates the key, or returns the one already registered under `spec.alias`.
    async fn ensure_key(&self, spec: &KeySpec) -> anyhow::Result<KeyRef>;

    /// Creates the queue, or converges an existing queue of the same name to `spec`.
    async fn ensure_queue(&self, spec: &QueueSpec) -> anyhow::Result<QueueHandle>;
}

#[async_trait]
pub trait ParameterPublisher: Send + Sync {
    /// Writes `value` under `path`, overwriting any previous value.
    async fn publish(&self, path: &str, value: &str) -> anyhow::Result<()>;

    /// Reads the value published under `path`, `None` when nothing is.
    async fn lookup(&self, path: &str) -> anyhow::Result<Option<String>>;
}
