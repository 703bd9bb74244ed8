//! Shared value types: severities, risk flags, account metadata.

use std::collections::BTreeSet;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Finding severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "UPPER")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::High => write!(f, "HIGH"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::Low => write!(f, "LOW"),
            Severity::None => write!(f, "NONE"),
        }
    }
}

/// Severities an operator asked to see. Empty means no filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeverityFilter(BTreeSet<Severity>);

impl SeverityFilter {
    pub fn new(severities: impl IntoIterator<Item = Severity>) -> Self {
        Self(severities.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether findings of this severity should be reported
    pub fn allows(&self, severity: Severity) -> bool {
        self.0.is_empty() || self.0.contains(&severity)
    }
}

/// Whether scoped permissions are still treated as risky.
///
/// The engine accepts both members independently; the CLI only ever sets
/// them together through [`RiskFlags::from_flag_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskFlags {
    /// Flag statements even when they carry a `Condition` block
    pub flag_conditional_statements: bool,
    /// Flag statements even when `Resource` is constrained to specific ARNs
    pub flag_resource_arn_statements: bool,
}

impl RiskFlags {
    /// `--flag-all-risky-actions` sets both members; absent, both are false.
    pub fn from_flag_all(flag_all_risky_actions: bool) -> Self {
        Self {
            flag_conditional_statements: flag_all_risky_actions,
            flag_resource_arn_statements: flag_all_risky_actions,
        }
    }
}

/// Account metadata handed to the renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTarget {
    /// Human-readable roster label, also the artifact file stem
    pub label: String,
    /// Cloud account identifier
    pub account_id: String,
}

impl AccountTarget {
    pub fn new(label: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for AccountTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ID: {})", self.label, self.account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_all_sets_both_members() {
        let all = RiskFlags::from_flag_all(true);
        assert_eq!(
            all,
            RiskFlags {
                flag_conditional_statements: true,
                flag_resource_arn_statements: true,
            }
        );
        assert_eq!(RiskFlags::from_flag_all(false), RiskFlags::default());
    }

    #[test]
    fn test_empty_filter_allows_everything() {
        let filter = SeverityFilter::default();
        assert!(filter.is_empty());
        assert!(filter.allows(Severity::Low));
        assert!(filter.allows(Severity::Critical));
    }

    #[test]
    fn test_filter_restricts_severities() {
        let filter = SeverityFilter::new([Severity::High, Severity::Critical]);
        assert!(filter.allows(Severity::High));
        assert!(!filter.allows(Severity::Medium));
    }

    #[test]
    fn test_severity_parses_case_insensitively() {
        assert_eq!(Severity::from_str("critical", true).unwrap(), Severity::Critical);
        assert_eq!(Severity::from_str("High", true).unwrap(), Severity::High);
        assert!(Severity::from_str("urgent", true).is_err());
    }

    #[test]
    fn test_account_target_display() {
        let target = AccountTarget::new("prod", "111111111111");
        assert_eq!(target.to_string(), "prod (ID: 111111111111)");
    }
}
