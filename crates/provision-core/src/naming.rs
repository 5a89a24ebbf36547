//! Convention-based names derived from a parent identifier.
//!
//! Every name produced here is a pure function of the parent identifier and the
//! environment tag, which is what makes re-running a provisioning idempotent.

use crate::error::{ProvisionError, Result};

/// Separator between the segments of a parent identifier.
pub const DELIMITER: char = '-';

/// Root of the shared parameter namespace for published SQS references.
const PUBLISHED_ROOT: &str = "/service/data";

/// SQS limit on queue names, `.fifo` suffix included.
const MAX_QUEUE_NAME_LEN: usize = 80;

const FIFO_SUFFIX: &str = ".fifo";

/// Derives the short slug used in publication paths.
///
/// Takes the last two `-` separated segments of `parent_id`, drops a leading
/// `"{environment}-"` and lowercases the result. The prefix match is case
/// sensitive and happens before lowercasing.
///
/// ```
/// assert_eq!(provision::derive_slug("Data-dev-Orders", "dev").unwrap(), "orders");
/// assert_eq!(provision::derive_slug("prod-data-orders", "dev").unwrap(), "data-orders");
/// ```
///
/// # Errors
///
/// [`ProvisionError::Validation`] when `parent_id` has fewer than two segments
/// or one of the last two segments is empty.
pub fn derive_slug(parent_id: &str, environment: &str) -> Result<String> {
    let mut segments = parent_id.rsplit(DELIMITER);
    let (Some(last), Some(second_last)) = (segments.next(), segments.next()) else {
        return Err(ProvisionError::Validation(format!(
            "parent identifier '{parent_id}' needs at least two '{DELIMITER}' separated segments"
        )));
    };

    if last.is_empty() || second_last.is_empty() {
        return Err(ProvisionError::Validation(format!(
            "parent identifier '{parent_id}' has an empty segment among its last two"
        )));
    }

    let joined = format!("{second_last}{DELIMITER}{last}");
    let env_prefix = format!("{environment}{DELIMITER}");
    let stripped = match joined.strip_prefix(&env_prefix) {
        Some(rest) if !environment.is_empty() => rest,
        _ => joined.as_str(),
    };

    Ok(stripped.to_lowercase())
}

/// Which of the two queues a name or path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueRole {
    Primary,
    DeadLetter,
}

impl QueueRole {
    fn name_suffix(self) -> &'static str {
        match self {
            QueueRole::Primary => "Queue",
            QueueRole::DeadLetter => "DLQ",
        }
    }

    fn path_suffix(self) -> &'static str {
        match self {
            QueueRole::Primary => "queue",
            QueueRole::DeadLetter => "dlq",
        }
    }
}

/// A validated SQS queue name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueName(String);

impl QueueName {
    /// Builds `{parent_id}-Queue[.fifo]` or `{parent_id}-DLQ[.fifo]`.
    pub fn for_role(parent_id: &str, role: QueueRole, fifo: bool) -> Result<Self> {
        let suffix = if fifo { FIFO_SUFFIX } else { "" };
        Self::new(format!(
            "{parent_id}{DELIMITER}{}{suffix}",
            role.name_suffix()
        ))
    }

    pub fn new<S: Into<String>>(name: S) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_QUEUE_NAME_LEN {
            return Err(ProvisionError::Validation(format!(
                "queue name exceeds maximum length: {} > {MAX_QUEUE_NAME_LEN} characters",
                name.len()
            )));
        }

        let stem = name.strip_suffix(FIFO_SUFFIX).unwrap_or(&name);
        if stem.is_empty() {
            return Err(ProvisionError::Validation(
                "queue name cannot be empty".to_string(),
            ));
        }
        if let Some(c) = stem
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
        {
            return Err(ProvisionError::Validation(format!(
                "invalid character in queue name '{name}': '{c}'. Allowed: alphanumeric, '-', '_'"
            )));
        }

        Ok(Self(name))
    }

    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(FIFO_SUFFIX)
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Alias under which the shared KMS key of a parent identifier is registered.
pub fn key_alias(parent_id: &str) -> String {
    format!("alias/{parent_id}{DELIMITER}KmsKey")
}

/// Parameter paths under which queue references are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationPaths {
    prefix: String,
}

impl PublicationPaths {
    pub fn new(environment: &str, slug: &str) -> Self {
        Self {
            prefix: format!("{PUBLISHED_ROOT}/{environment}/published/sqs/{slug}"),
        }
    }

    /// `/service/data/{environment}/published/sqs/{slug}`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn arn(&self, role: QueueRole) -> String {
        format!("{}-{}-arn", self.prefix, role.path_suffix())
    }

    pub fn url(&self, role: QueueRole) -> String {
        format!("{}-{}-url", self.prefix, role.path_suffix())
    }

    /// All four paths, primary queue first.
    pub fn all(&self) -> [String; 4] {
        [
            self.arn(QueueRole::Primary),
            self.url(QueueRole::Primary),
            self.arn(QueueRole::DeadLetter),
            self.url(QueueRole::DeadLetter),
        ]
    }
}
