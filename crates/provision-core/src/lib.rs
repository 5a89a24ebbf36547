//! # provision-core
//!
//! Core library for provisioning AWS SQS queues with their dead letter queues.
//!
//! Given a parent identifier and a queue property object, a provisioning run
//! creates one KMS key, a dead letter queue, and (unless configured as dead
//! letter only) a primary queue redriving into it after 5 failed receives.
//! The ARN and URL of each queue are then published to SSM Parameter Store
//! under `/service/data/{environment}/published/sqs/{slug}-…`.
//!
//! ## Features
//!
//! - **Naming**: queue names, key alias and parameter paths derived from the parent identifier
//! - **Provisioning**: dependency-ordered, re-runnable creation of key, queues and references
//! - **Discovery**: read back the references published for a parent identifier
//!
//! ## Example
//!
//! ```no_run
//! use provision::{AwsCloud, ProvisioningContext, QueueConfig};
//!
//! # async fn example() -> Result<(), provision::ProvisionError> {
//! let config = aws_config::from_env().load().await;
//! let cloud = AwsCloud::from_config(&config);
//!
//! let ctx = ProvisioningContext::new("Data-dev-Orders", "dev", "123456789012", "eu-west-1")?;
//! let cfg = QueueConfig { is_fifo: true, ..Default::default() };
//!
//! let set = provision::provision(&ctx, &cfg, &cloud, &cloud).await?;
//! for reference in set.published {
//!     println!("{} = {}", reference.path, reference.value);
//! }
//! # Ok(())
//! # }
//! ```

mod aws;
mod cloud;
mod config;
mod error;
mod memory;
mod naming;
mod provision;

#[cfg(test)]
mod test_utils;

pub use aws::{queue_attributes, tls_only_policy, AwsCloud};
pub use cloud::*;
pub use config::*;
pub use error::{ProvisionError, Result};
pub use memory::{Call, InMemoryCloud};
pub use naming::*;
pub use provision::{describe, provision, ProvisionedQueueSet, PublishedQueues, PublishedReference};
