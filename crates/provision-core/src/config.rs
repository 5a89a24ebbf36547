//! Inputs to a provisioning run.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Retention applied when [`QueueConfig::retention_period`] is unset.
pub const DEFAULT_RETENTION_PERIOD: Duration = Duration::from_secs(4 * 24 * 60 * 60);

/// Visibility timeout of the primary queue when [`QueueConfig::visibility_timeout`] is unset.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

const MIN_RETENTION_PERIOD: Duration = Duration::from_secs(60);
const MAX_RETENTION_PERIOD: Duration = Duration::from_secs(14 * 24 * 60 * 60);
const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Where and for whom resources are provisioned.
///
/// Only constructible through [`ProvisioningContext::new`], so an instance
/// always carries a non-empty account, region and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningContext {
    parent_id: String,
    environment: String,
    account_id: String,
    region: String,
}

impl ProvisioningContext {
    /// # Errors
    ///
    /// [`ProvisionError::Precondition`] when `account_id` or `region` is blank,
    /// [`ProvisionError::Validation`] when `environment` is.
    pub fn new(
        parent_id: impl Into<String>,
        environment: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self> {
        let environment = environment.into();
        let account_id = account_id.into();
        let region = region.into();

        if account_id.trim().is_empty() || region.trim().is_empty() {
            return Err(ProvisionError::Precondition(
                "account and/or region not set - both are required to provision resources"
                    .to_string(),
            ));
        }
        if environment.trim().is_empty() {
            return Err(ProvisionError::Validation(
                "environment must not be blank, it is part of every published path".to_string(),
            ));
        }

        Ok(Self {
            parent_id: parent_id.into(),
            environment,
            account_id,
            region,
        })
    }

    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Declarative properties of a queue pair.
///
/// Deserializes from the camelCase property object, durations in whole seconds:
///
/// ```json
/// { "isFifo": true, "retentionPeriod": 86400, "isDlq": false }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    /// Create FIFO queues.
    pub is_fifo: bool,
    /// How long messages are kept. Defaults to 4 days.
    #[serde(with = "seconds")]
    pub retention_period: Option<Duration>,
    /// Processing window of the primary queue. Defaults to 30 seconds.
    #[serde(with = "seconds")]
    pub visibility_timeout: Option<Duration>,
    /// Only create the dead letter queue.
    pub is_dlq: bool,
}

impl QueueConfig {
    /// Reads a property object from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read queue config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse queue config {}", path.display()))
    }

    pub fn retention_period(&self) -> Duration {
        self.retention_period.unwrap_or(DEFAULT_RETENTION_PERIOD)
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout.unwrap_or(DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Checks the effective durations against the SQS limits.
    pub fn validate(&self) -> Result<()> {
        let retention = self.retention_period();
        check_whole_seconds("retention period", retention)?;
        if !(MIN_RETENTION_PERIOD..=MAX_RETENTION_PERIOD).contains(&retention) {
            return Err(ProvisionError::Validation(format!(
                "retention period must be between {}s and {}s, got {}s",
                MIN_RETENTION_PERIOD.as_secs(),
                MAX_RETENTION_PERIOD.as_secs(),
                retention.as_secs()
            )));
        }

        let visibility = self.visibility_timeout();
        check_whole_seconds("visibility timeout", visibility)?;
        if visibility > MAX_VISIBILITY_TIMEOUT {
            return Err(ProvisionError::Validation(format!(
                "visibility timeout must be at most {}s, got {}s",
                MAX_VISIBILITY_TIMEOUT.as_secs(),
                visibility.as_secs()
            )));
        }

        Ok(())
    }
}

fn check_whole_seconds(what: &str, value: Duration) -> Result<()> {
    if value.subsec_nanos() != 0 {
        return Err(ProvisionError::Validation(format!(
            "{what} must be a whole number of seconds, got {value:?}"
        )));
    }
    Ok(())
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_requires_account_and_region() {
        assert!(matches!(
            ProvisioningContext::new("dev-Ingest-Orders", "dev", "", "eu-west-1"),
            Err(ProvisionError::Precondition(_))
        ));
        assert!(matches!(
            ProvisioningContext::new("dev-Ingest-Orders", "dev", "123456789012", " "),
            Err(ProvisionError::Precondition(_))
        ));

        let ctx = ProvisioningContext::new("dev-Ingest-Orders", "dev", "123456789012", "eu-west-1")
            .unwrap();
        assert_eq!(ctx.account_id(), "123456789012");
        assert_eq!(ctx.region(), "eu-west-1");
    }

    #[test]
    fn context_rejects_blank_environment() {
        for environment in ["", "  "] {
            assert!(matches!(
                ProvisioningContext::new("Stack-Orders", environment, "123456789012", "eu-west-1"),
                Err(ProvisionError::Validation(_))
            ));
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.retention_period(), Duration::from_secs(345_600));
        assert_eq!(cfg.visibility_timeout(), Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_property_object() {
        let cfg: QueueConfig = serde_json::from_str(
            r#"{"isFifo": true, "retentionPeriod": 86400, "visibilityTimeout": 120, "isDlq": true}"#,
        )
        .unwrap();

        assert_eq!(
            cfg,
            QueueConfig {
                is_fifo: true,
                retention_period: Some(Duration::from_secs(86_400)),
                visibility_timeout: Some(Duration::from_secs(120)),
                is_dlq: true,
            }
        );
    }

    #[test]
    fn missing_fields_default() {
        let cfg: QueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, QueueConfig::default());
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let cfg = QueueConfig {
            retention_period: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ProvisionError::Validation(_))));

        let cfg = QueueConfig {
            visibility_timeout: Some(Duration::from_secs(12 * 60 * 60 + 1)),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = QueueConfig {
            visibility_timeout: Some(Duration::from_millis(1500)),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
