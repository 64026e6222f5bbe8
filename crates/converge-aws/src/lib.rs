//! converge-aws
//!
//! The AWS binding: SDK error classification, the S3 remote-state
//! backend, tag marshalling, and the `s3_bucket` resource type.

pub mod bucket;
pub mod classify;
pub mod s3_state;
pub mod tags;

pub use crate::bucket::s3_bucket;
pub use crate::classify::{retryable, service_error, TransientCodes, TRANSIENT_CODES};
pub use crate::s3_state::S3StateBackend;

/// Load the ambient AWS configuration for a region.
pub async fn load_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}
