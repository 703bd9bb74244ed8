//! IAM authorization details download
//!
//! Uses only the delegated credentials for the target account; the operator
//! identity never talks to IAM directly.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_iam::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_iam::primitives::DateTime as SdkDateTime;
use aws_sdk_iam::types as iam;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::{
    AttachedPolicy, AuthorizationSnapshot, GroupDetail, InlinePolicy, ManagedPolicyDetail,
    PolicyVersion, RoleDetail, UserDetail,
};
use crate::credentials::{DelegatedCredentials, DEFAULT_REGION};

/// Downloads the authorization snapshot of one account
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self, credentials: &DelegatedCredentials) -> Result<AuthorizationSnapshot>;
}

/// `GetAccountAuthorizationDetails` through the IAM API
pub struct IamSnapshotFetcher {
    region: String,
}

impl IamSnapshotFetcher {
    pub fn new() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
        }
    }

    fn client(&self, credentials: &DelegatedCredentials) -> aws_sdk_iam::Client {
        let creds = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            credentials.expires_at.map(std::time::SystemTime::from),
            "iam-fleet-scan-delegated",
        );

        let config = aws_sdk_iam::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(creds)
            .build();

        aws_sdk_iam::Client::from_conf(config)
    }
}

impl Default for IamSnapshotFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotFetcher for IamSnapshotFetcher {
    async fn fetch(&self, credentials: &DelegatedCredentials) -> Result<AuthorizationSnapshot> {
        let client = self.client(credentials);
        let mut snapshot = AuthorizationSnapshot::default();

        let mut pages = client
            .get_account_authorization_details()
            .into_paginator()
            .send();

        let mut page_count = 0;
        while let Some(page) = pages.next().await {
            let page = page
                .map_err(|e| anyhow::anyhow!("{}", aws_sdk_iam::error::DisplayErrorContext(e)))
                .context("IAM GetAccountAuthorizationDetails failed")?;
            page_count += 1;

            for user in page.user_detail_list() {
                snapshot.users.push(convert_user(user)?);
            }
            for group in page.group_detail_list() {
                snapshot.groups.push(convert_group(group)?);
            }
            for role in page.role_detail_list() {
                snapshot.roles.push(convert_role(role)?);
            }
            for policy in page.policies() {
                snapshot.policies.push(convert_policy(policy)?);
            }
        }

        snapshot.retain_default_versions();

        debug!("Fetched {} authorization detail pages", page_count);
        info!(
            users = snapshot.users.len(),
            groups = snapshot.groups.len(),
            roles = snapshot.roles.len(),
            policies = snapshot.policies.len(),
            "📥 Downloaded authorization details"
        );

        Ok(snapshot)
    }
}

/// IAM returns policy documents URL-encoded.
fn decode_document(encoded: Option<&str>) -> Result<Value> {
    let Some(encoded) = encoded else {
        return Ok(Value::Null);
    };
    let decoded = urlencoding::decode(encoded).context("Policy document is not valid UTF-8")?;
    serde_json::from_str(&decoded).context("Policy document is not valid JSON")
}

fn convert_date(date: Option<&SdkDateTime>) -> Option<DateTime<Utc>> {
    date.and_then(|d| DateTime::<Utc>::from_timestamp(d.secs(), 0))
}

fn text(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

fn convert_inline(policies: &[iam::PolicyDetail]) -> Result<Vec<InlinePolicy>> {
    policies
        .iter()
        .map(|p| {
            let policy_name = text(p.policy_name());
            let policy_document = decode_document(p.policy_document())
                .with_context(|| format!("Inline policy {}", policy_name))?;
            Ok(InlinePolicy {
                policy_name,
                policy_document,
            })
        })
        .collect()
}

fn convert_attached(policies: &[iam::AttachedPolicy]) -> Vec<AttachedPolicy> {
    policies
        .iter()
        .map(|p| AttachedPolicy {
            policy_name: text(p.policy_name()),
            policy_arn: text(p.policy_arn()),
        })
        .collect()
}

fn convert_user(user: &iam::UserDetail) -> Result<UserDetail> {
    Ok(UserDetail {
        path: text(user.path()),
        user_name: text(user.user_name()),
        user_id: text(user.user_id()),
        arn: text(user.arn()),
        create_date: convert_date(user.create_date()),
        user_policy_list: convert_inline(user.user_policy_list())?,
        group_list: user.group_list().to_vec(),
        attached_managed_policies: convert_attached(user.attached_managed_policies()),
    })
}

fn convert_group(group: &iam::GroupDetail) -> Result<GroupDetail> {
    Ok(GroupDetail {
        path: text(group.path()),
        group_name: text(group.group_name()),
        group_id: text(group.group_id()),
        arn: text(group.arn()),
        create_date: convert_date(group.create_date()),
        group_policy_list: convert_inline(group.group_policy_list())?,
        attached_managed_policies: convert_attached(group.attached_managed_policies()),
    })
}

fn convert_role(role: &iam::RoleDetail) -> Result<RoleDetail> {
    let trust = decode_document(role.assume_role_policy_document())
        .with_context(|| format!("Trust policy of role {}", text(role.role_name())))?;

    Ok(RoleDetail {
        path: text(role.path()),
        role_name: text(role.role_name()),
        role_id: text(role.role_id()),
        arn: text(role.arn()),
        create_date: convert_date(role.create_date()),
        assume_role_policy_document: (!trust.is_null()).then_some(trust),
        role_policy_list: convert_inline(role.role_policy_list())?,
        attached_managed_policies: convert_attached(role.attached_managed_policies()),
    })
}

fn convert_policy(policy: &iam::ManagedPolicyDetail) -> Result<ManagedPolicyDetail> {
    let policy_name = text(policy.policy_name());
    let versions = policy
        .policy_version_list()
        .iter()
        .filter(|v| v.is_default_version())
        .map(|v| {
            Ok(PolicyVersion {
                document: decode_document(v.document())
                    .with_context(|| format!("Managed policy {}", policy_name))?,
                version_id: text(v.version_id()),
                is_default_version: true,
                create_date: convert_date(v.create_date()),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ManagedPolicyDetail {
        policy_name: policy_name.clone(),
        policy_id: text(policy.policy_id()),
        arn: text(policy.arn()),
        path: text(policy.path()),
        default_version_id: text(policy.default_version_id()),
        attachment_count: policy.attachment_count().unwrap_or_default(),
        is_attachable: policy.is_attachable(),
        policy_version_list: versions,
    })
}
