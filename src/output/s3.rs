//! S3 bucket sink
//!
//! Objects are written with the operator's identity (not the delegated
//! credentials of the scanned account) and a `bucket-owner-full-control` ACL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use tracing::debug;

use super::{ArtifactSink, BucketSinkFactory};

pub struct S3Sink {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Sink {
    pub fn new(operator_config: &SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(operator_config),
            bucket: bucket.into(),
        }
    }
}

/// Opens [`S3Sink`]s with the operator's identity and region
pub struct S3SinkFactory {
    operator_config: SdkConfig,
}

impl S3SinkFactory {
    pub fn new(operator_config: &SdkConfig) -> Self {
        Self {
            operator_config: operator_config.clone(),
        }
    }
}

impl BucketSinkFactory for S3SinkFactory {
    fn open(&self, bucket: &str) -> Box<dyn ArtifactSink> {
        Box::new(S3Sink::new(&self.operator_config, bucket))
    }
}

#[async_trait]
impl ArtifactSink for S3Sink {
    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn put(&self, name: &str, content_type: &str, body: &[u8]) -> Result<String> {
        debug!("Uploading {} bytes to s3://{}/{}", body.len(), self.bucket, name);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .acl(ObjectCannedAcl::BucketOwnerFullControl)
            .content_type(content_type)
            .body(ByteStream::from(body.to_vec()))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", aws_sdk_s3::error::DisplayErrorContext(e)))
            .with_context(|| format!("S3 PutObject failed for s3://{}/{}", self.bucket, name))?;

        Ok(format!("s3://{}/{}", self.bucket, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_config::{BehaviorVersion, Region};

    #[test]
    fn test_uploads_use_operator_region() {
        let operator = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-1"))
            .build();

        let sink = S3SinkFactory::new(&operator).open("reports");
        assert_eq!(sink.describe(), "s3://reports");

        let direct = S3Sink::new(&operator, "reports");
        assert_eq!(direct.client.config().region(), Some(&Region::new("eu-west-1")));
    }
}
