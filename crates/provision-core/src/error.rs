use thiserror::Error;

/// Errors surfaced by the provisioning workflow.
///
/// Nothing is retried or swallowed locally. A [`ProvisionError::ResourceCreation`]
/// leaves the resources created by earlier steps in place; re-running with the
/// same inputs picks them up again by name.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Account or region missing from the provisioning context.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Malformed parent identifier or out-of-range queue configuration.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The resource-creation collaborator rejected a key or queue.
    #[error("failed to create {resource}: {message}")]
    ResourceCreation { resource: String, message: String },

    /// The resource exists but its reference could not be published.
    #[error("failed to publish {path}: {message}")]
    Publication { path: String, message: String },

    /// A published reference could not be read back.
    #[error("failed to look up {path}: {message}")]
    Lookup { path: String, message: String },
}

impl ProvisionError {
    pub(crate) fn creation(resource: impl Into<String>, err: anyhow::Error) -> Self {
        Self::ResourceCreation {
            resource: resource.into(),
            message: format!("{err:#}"),
        }
    }

    pub(crate) fn publication(path: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Publication {
            path: path.into(),
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
