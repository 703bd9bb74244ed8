//! Exclusions resolver
//!
//! Exclusion rules suppress named policies, principals, and actions from the
//! analysis. When no file is supplied the built-in rule set applies. A file
//! that cannot be parsed is an error; it is never silently replaced.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ScanError};

/// Principal kinds that can be excluded by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    User,
    Group,
    Role,
}

/// Policy, principal, and action exclusions for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExclusionRules {
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Extra actions always treated as data exfiltration candidates
    #[serde(default, rename = "include-actions")]
    pub include_actions: Vec<String>,
    /// Actions never reported
    #[serde(default, rename = "exclude-actions")]
    pub exclude_actions: Vec<String>,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            policies: vec![
                "AWSServiceRoleFor*".into(),
                "*ServiceRolePolicy".into(),
                "*ServiceLinkedRolePolicy".into(),
                "AdministratorAccess".into(),
                "service-role*".into(),
                "aws-service-role*".into(),
            ],
            roles: vec!["service-role*".into(), "aws-service-role*".into()],
            users: Vec::new(),
            groups: Vec::new(),
            include_actions: vec![
                "s3:GetObject".into(),
                "ssm:GetParameter".into(),
                "ssm:GetParameters".into(),
                "ssm:GetParametersByPath".into(),
                "secretsmanager:GetSecretValue".into(),
            ],
            exclude_actions: Vec::new(),
        }
    }
}

impl ExclusionRules {
    /// Parse an exclusions YAML document. An empty document means no exclusions.
    pub fn from_yaml_str(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        if value.is_null() {
            return Ok(Self::empty());
        }
        let mut rules: Self = serde_yaml::from_value(value)?;
        rules.normalize();
        Ok(rules)
    }

    /// Rules that exclude nothing
    pub fn empty() -> Self {
        Self {
            policies: Vec::new(),
            roles: Vec::new(),
            users: Vec::new(),
            groups: Vec::new(),
            include_actions: Vec::new(),
            exclude_actions: Vec::new(),
        }
    }

    /// Drop blank entries (`- ""` is how the template spells "none").
    fn normalize(&mut self) {
        for list in [
            &mut self.policies,
            &mut self.roles,
            &mut self.users,
            &mut self.groups,
            &mut self.include_actions,
            &mut self.exclude_actions,
        ] {
            list.retain(|s| !s.trim().is_empty());
        }
    }

    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn is_policy_excluded(&self, policy_name: &str) -> bool {
        matches_any(&self.policies, policy_name)
    }

    pub fn is_principal_excluded(&self, kind: PrincipalKind, name: &str) -> bool {
        let patterns = match kind {
            PrincipalKind::User => &self.users,
            PrincipalKind::Group => &self.groups,
            PrincipalKind::Role => &self.roles,
        };
        matches_any(patterns, name)
    }

    pub fn is_action_excluded(&self, action: &str) -> bool {
        matches_any(&self.exclude_actions, action)
    }
}

/// Resolve the exclusion rules for a run.
pub fn load_exclusions(path: Option<&Path>) -> Result<ExclusionRules> {
    let Some(path) = path else {
        debug!("No exclusions file supplied, using built-in defaults");
        return Ok(ExclusionRules::default());
    };

    let content = fs::read_to_string(path).map_err(|e| ScanError::MalformedExclusions {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let rules =
        ExclusionRules::from_yaml_str(&content).map_err(|e| ScanError::MalformedExclusions {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    info!(
        policies = rules.policies.len(),
        roles = rules.roles.len(),
        users = rules.users.len(),
        groups = rules.groups.len(),
        "Loaded exclusions from {}",
        path.display()
    );
    Ok(rules)
}

fn matches_any(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|p| wildcard_match(p, value))
}

/// Case-insensitive match where `*` spans any run of characters.
pub(crate) fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let value: Vec<char> = value.to_lowercase().chars().collect();

    let (mut p, mut v) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while v < value.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == value[v]) {
            p += 1;
            v += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            p += 1;
            resume = v;
        } else if let Some(s) = star {
            p = s + 1;
            resume += 1;
            v = resume;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("AWSServiceRoleFor*", "AWSServiceRoleForSupport"));
        assert!(wildcard_match("*ServiceRolePolicy", "AmazonEKSServiceRolePolicy"));
        assert!(wildcard_match("s3:get*", "s3:GetObject"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("iam:*Policy*", "iam:PutRolePolicy"));
        assert!(!wildcard_match("s3:Get*", "s3:PutObject"));
        assert!(!wildcard_match("Admin", "AdministratorAccess"));
    }

    #[test]
    fn test_default_rules_exclude_service_roles() {
        let rules = ExclusionRules::default();
        assert!(rules.is_policy_excluded("AdministratorAccess"));
        assert!(rules.is_policy_excluded("AWSServiceRoleForSupport"));
        assert!(rules.is_principal_excluded(PrincipalKind::Role, "service-role/lambda"));
        assert!(!rules.is_policy_excluded("MyCustomPolicy"));
        assert!(!rules.is_principal_excluded(PrincipalKind::User, "alice"));
    }

    #[test]
    fn test_no_path_yields_defaults() {
        assert_eq!(load_exclusions(None).unwrap(), ExclusionRules::default());
    }

    #[test]
    fn test_load_exclusions_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "policies:\n  - MyPolicy\nusers:\n  - \"\"\nexclude-actions:\n  - kms:Decrypt\n"
        )
        .unwrap();

        let rules = load_exclusions(Some(file.path())).unwrap();
        assert_eq!(rules.policies, vec!["MyPolicy"]);
        assert!(rules.users.is_empty());
        assert!(rules.roles.is_empty());
        assert!(rules.is_action_excluded("KMS:decrypt"));
    }

    #[test]
    fn test_empty_file_means_no_exclusions() {
        let file = NamedTempFile::new().unwrap();
        assert_eq!(
            load_exclusions(Some(file.path())).unwrap(),
            ExclusionRules::empty()
        );
    }

    #[test]
    fn test_malformed_file_is_typed_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "policies: [unclosed").unwrap();

        let err = load_exclusions(Some(file.path())).unwrap_err();
        assert!(matches!(err, ScanError::MalformedExclusions { .. }));
    }

    #[test]
    fn test_wrong_shape_is_typed_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "policies: 42").unwrap();

        let err = load_exclusions(Some(file.path())).unwrap_err();
        assert!(matches!(err, ScanError::MalformedExclusions { .. }));
    }

    #[test]
    fn test_unknown_key_is_typed_error() {
        assert!(ExclusionRules::from_yaml_str("polices:\n  - MyCriticalPolicy\n").is_err());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "polices:\n  - MyCriticalPolicy").unwrap();

        let err = load_exclusions(Some(file.path())).unwrap_err();
        assert!(matches!(err, ScanError::MalformedExclusions { .. }));
    }

    #[test]
    fn test_missing_file_is_typed_error() {
        let err = load_exclusions(Some(Path::new("/nonexistent/exclusions.yml"))).unwrap_err();
        assert!(matches!(err, ScanError::MalformedExclusions { .. }));
    }

    #[test]
    fn test_defaults_round_trip_through_yaml() {
        let yaml = ExclusionRules::default().to_yaml().unwrap();
        let parsed = ExclusionRules::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, ExclusionRules::default());
    }
}
