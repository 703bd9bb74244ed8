//! Delegated credentials via STS AssumeRole
//!
//! The operator identity (optional named profile) is exchanged for
//! short-lived credentials scoped to one target account. Credentials live
//! only for the duration of that account's processing.

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Region used for STS and IAM calls. IAM is global; STS works from here.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Temporary credentials for one target account
#[derive(Clone)]
pub struct DelegatedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for DelegatedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Exchanges the operator identity for account-scoped credentials
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn assume_role(&self, account_id: &str, role_name: &str)
        -> Result<DelegatedCredentials>;
}

/// Role ARN for a role name in a target account
pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account_id, role_name)
}

/// Load the operator's AWS configuration, optionally from a named profile.
///
/// The region comes from `region`, else the profile or environment, else
/// [`DEFAULT_REGION`]. It only matters for S3 uploads; STS and IAM clients
/// always use [`DEFAULT_REGION`].
pub async fn load_operator_config(profile: Option<&str>, region: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(profile) = profile {
        debug!("Using AWS profile: {}", profile);
        loader = loader.profile_name(profile);
    }
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    with_fallback_region(loader.load().await)
}

fn with_fallback_region(config: SdkConfig) -> SdkConfig {
    if config.region().is_some() {
        return config;
    }
    debug!("No AWS region configured, falling back to {}", DEFAULT_REGION);
    config
        .into_builder()
        .region(Region::new(DEFAULT_REGION))
        .build()
}

/// AssumeRole through AWS STS
pub struct StsCredentialBroker {
    client: aws_sdk_sts::Client,
}

impl StsCredentialBroker {
    pub fn new(operator_config: &SdkConfig) -> Self {
        let config = aws_sdk_sts::config::Builder::from(operator_config)
            .region(Region::new(DEFAULT_REGION))
            .build();
        Self {
            client: aws_sdk_sts::Client::from_conf(config),
        }
    }
}

#[async_trait]
impl CredentialBroker for StsCredentialBroker {
    async fn assume_role(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> Result<DelegatedCredentials> {
        let arn = role_arn(account_id, role_name);
        debug!("Assuming role {}", arn);

        let output = self
            .client
            .assume_role()
            .role_arn(&arn)
            .role_session_name(format!("iam-fleet-scan-{}", account_id))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", aws_sdk_sts::error::DisplayErrorContext(e)))
            .with_context(|| format!("AWS STS AssumeRole failed for {}", arn))?;

        let creds = output
            .credentials()
            .context("AWS STS returned no credentials")?;

        let expires_at = DateTime::<Utc>::from_timestamp(creds.expiration().secs(), 0);

        info!(role = %arn, "Obtained delegated credentials");

        Ok(DelegatedCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expires_at,
        })
    }
}
