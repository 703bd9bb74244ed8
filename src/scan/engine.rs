//! Built-in risk analysis over IAM policy documents.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::catalog::{self, all_catalogued_actions, is_write_action};
use super::{
    Attachments, PolicyFindings, PolicyType, PrivilegeEscalation, ScanEngine, ScanResult,
};
use crate::config::ScanParams;
use crate::exclusions::{wildcard_match, ExclusionRules, PrincipalKind};
use crate::snapshot::{AuthorizationSnapshot, InlinePolicy};
use crate::types::{RiskFlags, Severity};

/// Flags privilege escalation, resource exposure, credential exposure,
/// data exfiltration, infrastructure modification and service wildcards in
/// `Allow` statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScanEngine;

impl RiskScanEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ScanEngine for RiskScanEngine {
    fn scan(
        &self,
        snapshot: &AuthorizationSnapshot,
        exclusions: &ExclusionRules,
        params: &ScanParams,
    ) -> Result<ScanResult> {
        let mut result = ScanResult::new();

        for policy in &snapshot.policies {
            if exclusions.is_policy_excluded(&policy.policy_name) {
                debug!("Skipping excluded managed policy {}", policy.policy_name);
                continue;
            }

            let attached_to = managed_attachments(snapshot, &policy.arn, exclusions);
            if policy.is_aws_managed() && attached_to.is_empty() {
                continue;
            }

            let Some(document) = policy.default_document() else {
                continue;
            };

            let policy_type = if policy.is_aws_managed() {
                PolicyType::AwsManaged
            } else {
                PolicyType::CustomerManaged
            };

            if let Some(profile) = analyze_document(document, exclusions, params) {
                let key = if policy.policy_id.is_empty() {
                    policy.arn.clone()
                } else {
                    policy.policy_id.clone()
                };
                result.insert(
                    key,
                    profile.into_findings(
                        &policy.policy_name,
                        policy_type,
                        Some(policy.arn.clone()),
                        attached_to,
                    ),
                );
            }
        }

        for user in &snapshot.users {
            if exclusions.is_principal_excluded(PrincipalKind::User, &user.user_name) {
                continue;
            }
            let owner = Attachments {
                users: vec![user.user_name.clone()],
                ..Default::default()
            };
            scan_inline(
                &mut result,
                "user",
                &user.user_name,
                &user.user_policy_list,
                &owner,
                exclusions,
                params,
            );
        }

        for group in &snapshot.groups {
            if exclusions.is_principal_excluded(PrincipalKind::Group, &group.group_name) {
                continue;
            }
            let owner = Attachments {
                groups: vec![group.group_name.clone()],
                ..Default::default()
            };
            scan_inline(
                &mut result,
                "group",
                &group.group_name,
                &group.group_policy_list,
                &owner,
                exclusions,
                params,
            );
        }

        for role in &snapshot.roles {
            if exclusions.is_principal_excluded(PrincipalKind::Role, &role.role_name) {
                continue;
            }
            let owner = Attachments {
                roles: vec![role.role_name.clone()],
                ..Default::default()
            };
            scan_inline(
                &mut result,
                "role",
                &role.role_name,
                &role.role_policy_list,
                &owner,
                exclusions,
                params,
            );
        }

        debug!("Scan produced {} policy findings", result.len());
        Ok(result)
    }
}

fn scan_inline(
    result: &mut ScanResult,
    kind: &str,
    principal: &str,
    policies: &[InlinePolicy],
    owner: &Attachments,
    exclusions: &ExclusionRules,
    params: &ScanParams,
) {
    for policy in policies {
        if exclusions.is_policy_excluded(&policy.policy_name) {
            continue;
        }
        if let Some(profile) = analyze_document(&policy.policy_document, exclusions, params) {
            result.insert(
                format!("{}/{}/{}", kind, principal, policy.policy_name),
                profile.into_findings(&policy.policy_name, PolicyType::Inline, None, owner.clone()),
            );
        }
    }
}

/// Principals (not excluded) that have a managed policy attached
fn managed_attachments(
    snapshot: &AuthorizationSnapshot,
    policy_arn: &str,
    exclusions: &ExclusionRules,
) -> Attachments {
    let attached = |list: &[crate::snapshot::AttachedPolicy]| {
        list.iter().any(|a| a.policy_arn == policy_arn)
    };

    Attachments {
        users: snapshot
            .users
            .iter()
            .filter(|u| attached(&u.attached_managed_policies))
            .filter(|u| !exclusions.is_principal_excluded(PrincipalKind::User, &u.user_name))
            .map(|u| u.user_name.clone())
            .collect(),
        groups: snapshot
            .groups
            .iter()
            .filter(|g| attached(&g.attached_managed_policies))
            .filter(|g| !exclusions.is_principal_excluded(PrincipalKind::Group, &g.group_name))
            .map(|g| g.group_name.clone())
            .collect(),
        roles: snapshot
            .roles
            .iter()
            .filter(|r| attached(&r.attached_managed_policies))
            .filter(|r| !exclusions.is_principal_excluded(PrincipalKind::Role, &r.role_name))
            .map(|r| r.role_name.clone())
            .collect(),
    }
}

/// Risky categories of one policy, before attribution
#[derive(Debug, Default)]
struct RiskProfile {
    privilege_escalation: Vec<PrivilegeEscalation>,
    resource_exposure: Vec<String>,
    credentials_exposure: Vec<String>,
    data_exfiltration: Vec<String>,
    infrastructure_modification: Vec<String>,
    service_wildcard: Vec<String>,
}

impl RiskProfile {
    fn is_empty(&self) -> bool {
        self.privilege_escalation.is_empty()
            && self.resource_exposure.is_empty()
            && self.credentials_exposure.is_empty()
            && self.data_exfiltration.is_empty()
            && self.infrastructure_modification.is_empty()
            && self.service_wildcard.is_empty()
    }

    fn severity(&self) -> Severity {
        let mut severity = Severity::None;
        let mut raise = |present: bool, s: Severity| {
            if present && s > severity {
                severity = s;
            }
        };
        raise(!self.privilege_escalation.is_empty(), catalog::PRIVILEGE_ESCALATION_SEVERITY);
        raise(!self.resource_exposure.is_empty(), catalog::RESOURCE_EXPOSURE_SEVERITY);
        raise(!self.credentials_exposure.is_empty(), catalog::CREDENTIALS_EXPOSURE_SEVERITY);
        raise(!self.data_exfiltration.is_empty(), catalog::DATA_EXFILTRATION_SEVERITY);
        raise(
            !self.infrastructure_modification.is_empty(),
            catalog::INFRASTRUCTURE_MODIFICATION_SEVERITY,
        );
        for wildcard in &self.service_wildcard {
            raise(true, wildcard_severity(wildcard));
        }
        severity
    }

    fn into_findings(
        self,
        policy_name: &str,
        policy_type: PolicyType,
        arn: Option<String>,
        attached_to: Attachments,
    ) -> PolicyFindings {
        let severity = self.severity();
        PolicyFindings {
            policy_name: policy_name.to_string(),
            policy_type,
            arn,
            attached_to,
            severity,
            privilege_escalation: self.privilege_escalation,
            resource_exposure: self.resource_exposure,
            credentials_exposure: self.credentials_exposure,
            data_exfiltration: self.data_exfiltration,
            infrastructure_modification: self.infrastructure_modification,
            service_wildcard: self.service_wildcard,
        }
    }
}

fn wildcard_severity(service: &str) -> Severity {
    if service == "*" {
        catalog::FULL_WILDCARD_SEVERITY
    } else {
        catalog::SERVICE_WILDCARD_SEVERITY
    }
}

/// Analyse one policy document. `None` when nothing risky survives
/// exclusions and the severity filter.
fn analyze_document(
    document: &Value,
    exclusions: &ExclusionRules,
    params: &ScanParams,
) -> Option<RiskProfile> {
    // lowercase action -> action as written
    let mut allowed: BTreeMap<String, String> = BTreeMap::new();
    let mut wildcards: BTreeSet<String> = BTreeSet::new();

    // Wildcard actions expand against the catalogue plus literal include-actions
    let mut candidates: Vec<&str> = all_catalogued_actions().collect();
    candidates.extend(
        exclusions
            .include_actions
            .iter()
            .map(String::as_str)
            .filter(|a| !a.contains('*')),
    );

    for statement in statements(document) {
        if !is_risky_statement(statement, params.risk_flags) {
            continue;
        }

        for pattern in string_list(statement.get("Action")) {
            if exclusions.is_action_excluded(pattern) {
                continue;
            }

            if pattern == "*" {
                wildcards.insert("*".to_string());
            } else if let Some(service) = pattern.strip_suffix(":*") {
                wildcards.insert(service.to_lowercase());
            }

            if pattern.contains('*') || pattern.contains('?') {
                for &action in &candidates {
                    if wildcard_match(pattern, action) {
                        allowed
                            .entry(action.to_lowercase())
                            .or_insert_with(|| action.to_string());
                    }
                }
            } else {
                allowed
                    .entry(pattern.to_lowercase())
                    .or_insert_with(|| pattern.to_string());
            }
        }
    }

    allowed.retain(|_, action| !exclusions.is_action_excluded(action));

    let in_list = |list: &[&str]| -> Vec<String> {
        allowed
            .iter()
            .filter(|(lower, _)| list.iter().any(|a| a.eq_ignore_ascii_case(lower)))
            .map(|(_, action)| action.clone())
            .collect()
    };

    let severity = &params.severity;
    let mut profile = RiskProfile::default();

    if severity.allows(catalog::PRIVILEGE_ESCALATION_SEVERITY) {
        profile.privilege_escalation = catalog::PRIVILEGE_ESCALATION_METHODS
            .iter()
            .filter(|(_, required)| {
                required
                    .iter()
                    .all(|a| allowed.contains_key(&a.to_lowercase()))
            })
            .map(|(method, required)| PrivilegeEscalation {
                method: method.to_string(),
                actions: required.iter().map(|a| a.to_string()).collect(),
            })
            .collect();
    }

    if severity.allows(catalog::RESOURCE_EXPOSURE_SEVERITY) {
        profile.resource_exposure = in_list(catalog::RESOURCE_EXPOSURE_ACTIONS);
    }

    if severity.allows(catalog::CREDENTIALS_EXPOSURE_SEVERITY) {
        profile.credentials_exposure = in_list(catalog::CREDENTIALS_EXPOSURE_ACTIONS);
    }

    if severity.allows(catalog::DATA_EXFILTRATION_SEVERITY) {
        profile.data_exfiltration = allowed
            .iter()
            .filter(|(lower, _)| {
                catalog::DATA_EXFILTRATION_ACTIONS
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(lower))
                    || exclusions
                        .include_actions
                        .iter()
                        .any(|pattern| wildcard_match(pattern, lower))
            })
            .map(|(_, action)| action.clone())
            .collect();
    }

    if severity.allows(catalog::INFRASTRUCTURE_MODIFICATION_SEVERITY) {
        profile.infrastructure_modification = allowed
            .values()
            .filter(|action| is_write_action(action))
            .cloned()
            .collect();
    }

    profile.service_wildcard = wildcards
        .into_iter()
        .filter(|w| severity.allows(wildcard_severity(w)))
        .collect();

    (!profile.is_empty()).then_some(profile)
}

fn statements(document: &Value) -> Vec<&Value> {
    match document.get("Statement") {
        Some(Value::Array(list)) => list.iter().collect(),
        Some(statement @ Value::Object(_)) => vec![statement],
        _ => Vec::new(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// `Allow` statements count unless scoped by resource ARNs or conditions
/// that the risk flags say to respect. `NotAction` statements are skipped.
fn is_risky_statement(statement: &Value, flags: RiskFlags) -> bool {
    let allows = statement
        .get("Effect")
        .and_then(Value::as_str)
        .is_some_and(|e| e.eq_ignore_ascii_case("allow"));
    if !allows || statement.get("Action").is_none() {
        return false;
    }

    let unconstrained = statement.get("NotResource").is_some()
        || string_list(statement.get("Resource")).contains(&"*");

    let conditional = match statement.get("Condition") {
        None | Some(Value::Null) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    };

    (unconstrained || flags.flag_resource_arn_statements)
        && (!conditional || flags.flag_conditional_statements)
}
