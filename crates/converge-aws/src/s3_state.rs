//! S3-backed remote state.

use aws_sdk_s3::Client;
use aws_smithy_types::byte_stream::ByteStream;
use converge_core::error::format_err_chain;
use converge_state::{BoxFuture, RemoteBackend, StateError};

/// Stores the state document as a single JSON object in S3.
pub struct S3StateBackend {
    client: Client,
    bucket: String,
    key: String,
}

impl S3StateBackend {
    pub fn new(client: Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl RemoteBackend for S3StateBackend {
    fn load(&self) -> BoxFuture<'_, Result<Vec<u8>, StateError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .send()
                .await
                .map_err(|e| {
                    let err = e.into_service_error();
                    if err.is_no_such_key() {
                        StateError::NotFound {
                            key: format!("s3://{}/{}", self.bucket, self.key),
                        }
                    } else {
                        StateError::Remote(format_err_chain(&err))
                    }
                })?;

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| StateError::Remote(e.to_string()))?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn save(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), StateError>> {
        Box::pin(async move {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(ByteStream::from(bytes))
                .content_type("application/json")
                .send()
                .await
                .map_err(|e| StateError::Remote(format_err_chain(&e.into_service_error())))?;

            tracing::debug!(
                bucket = %self.bucket,
                key = %self.key,
                "state document written to S3"
            );
            Ok(())
        })
    }
}
