//! Authorization Snapshot
//!
//! Point-in-time IAM state of one account, in the shape of the
//! `GetAccountAuthorizationDetails` document: users, groups, roles and
//! managed policies, with policy documents already URL-decoded.
//!
//! ## Lifecycle
//!
//! - Fetched with delegated credentials by [`IamSnapshotFetcher`]
//! - Reduced to default policy versions only
//! - Checked by [`validate_snapshot`] before it reaches the scan engine
//! - Dropped once the account has been processed

mod fetch;
mod validate;

pub use fetch::{IamSnapshotFetcher, SnapshotFetcher};
pub use validate::validate_snapshot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Managed policies owned by AWS live under this ARN prefix
const AWS_MANAGED_POLICY_PREFIX: &str = "arn:aws:iam::aws:policy";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationSnapshot {
    #[serde(rename = "UserDetailList", default)]
    pub users: Vec<UserDetail>,
    #[serde(rename = "GroupDetailList", default)]
    pub groups: Vec<GroupDetail>,
    #[serde(rename = "RoleDetailList", default)]
    pub roles: Vec<RoleDetail>,
    #[serde(rename = "Policies", default)]
    pub policies: Vec<ManagedPolicyDetail>,
}

impl AuthorizationSnapshot {
    /// Drop every non-default managed policy version.
    pub fn retain_default_versions(&mut self) {
        for policy in &mut self.policies {
            policy.policy_version_list.retain(|v| v.is_default_version);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDetail {
    #[serde(default)]
    pub path: String,
    pub user_name: String,
    #[serde(default)]
    pub user_id: String,
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_policy_list: Vec<InlinePolicy>,
    #[serde(default)]
    pub group_list: Vec<String>,
    #[serde(default)]
    pub attached_managed_policies: Vec<AttachedPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupDetail {
    #[serde(default)]
    pub path: String,
    pub group_name: String,
    #[serde(default)]
    pub group_id: String,
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub group_policy_list: Vec<InlinePolicy>,
    #[serde(default)]
    pub attached_managed_policies: Vec<AttachedPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleDetail {
    #[serde(default)]
    pub path: String,
    pub role_name: String,
    #[serde(default)]
    pub role_id: String,
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assume_role_policy_document: Option<Value>,
    #[serde(default)]
    pub role_policy_list: Vec<InlinePolicy>,
    #[serde(default)]
    pub attached_managed_policies: Vec<AttachedPolicy>,
}

/// Policy embedded directly in a user, group, or role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InlinePolicy {
    pub policy_name: String,
    pub policy_document: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachedPolicy {
    pub policy_name: String,
    pub policy_arn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedPolicyDetail {
    pub policy_name: String,
    #[serde(default)]
    pub policy_id: String,
    pub arn: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub default_version_id: String,
    #[serde(default)]
    pub attachment_count: i32,
    #[serde(default)]
    pub is_attachable: bool,
    #[serde(default)]
    pub policy_version_list: Vec<PolicyVersion>,
}

impl ManagedPolicyDetail {
    pub fn is_aws_managed(&self) -> bool {
        self.arn.starts_with(AWS_MANAGED_POLICY_PREFIX)
    }

    /// Document of the default (active) version
    pub fn default_document(&self) -> Option<&Value> {
        self.policy_version_list
            .iter()
            .find(|v| v.is_default_version)
            .map(|v| &v.document)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyVersion {
    pub document: Value,
    pub version_id: String,
    pub is_default_version: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
}
