//! Scan Engine
//!
//! Turns an [`AuthorizationSnapshot`] into a [`ScanResult`]: one findings
//! record per risky policy, keyed by policy identity.

mod catalog;
mod engine;

pub use engine::RiskScanEngine;

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::ScanParams;
use crate::exclusions::ExclusionRules;
use crate::snapshot::AuthorizationSnapshot;
use crate::types::Severity;

/// Findings keyed by policy identity. Managed policies are keyed by policy
/// ID, inline policies by `<kind>/<principal>/<policy name>`.
pub type ScanResult = BTreeMap<String, PolicyFindings>;

/// Evaluates a snapshot for risky permissions
pub trait ScanEngine: Send + Sync {
    fn scan(
        &self,
        snapshot: &AuthorizationSnapshot,
        exclusions: &ExclusionRules,
        params: &ScanParams,
    ) -> Result<ScanResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    AwsManaged,
    CustomerManaged,
    Inline,
}

/// Principals a policy is attached to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachments {
    pub users: Vec<String>,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
}

impl Attachments {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty() && self.roles.is_empty()
    }
}

/// A privilege escalation path whose required actions are all allowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeEscalation {
    #[serde(rename = "type")]
    pub method: String,
    pub actions: Vec<String>,
}

/// Risky permissions granted by one policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFindings {
    pub policy_name: String,
    pub policy_type: PolicyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    pub attached_to: Attachments,
    pub severity: Severity,
    #[serde(default)]
    pub privilege_escalation: Vec<PrivilegeEscalation>,
    #[serde(default)]
    pub resource_exposure: Vec<String>,
    #[serde(default)]
    pub credentials_exposure: Vec<String>,
    #[serde(default)]
    pub data_exfiltration: Vec<String>,
    #[serde(default)]
    pub infrastructure_modification: Vec<String>,
    #[serde(default)]
    pub service_wildcard: Vec<String>,
}

/// Per-category totals across a scan result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FindingCounts {
    pub policies: usize,
    pub privilege_escalation: usize,
    pub resource_exposure: usize,
    pub credentials_exposure: usize,
    pub data_exfiltration: usize,
    pub infrastructure_modification: usize,
    pub service_wildcard: usize,
}

impl FindingCounts {
    pub fn from_result(result: &ScanResult) -> Self {
        result.values().fold(Self::default(), |mut acc, f| {
            acc.policies += 1;
            acc.privilege_escalation += f.privilege_escalation.len();
            acc.resource_exposure += f.resource_exposure.len();
            acc.credentials_exposure += f.credentials_exposure.len();
            acc.data_exfiltration += f.data_exfiltration.len();
            acc.infrastructure_modification += f.infrastructure_modification.len();
            acc.service_wildcard += f.service_wildcard.len();
            acc
        })
    }
}
