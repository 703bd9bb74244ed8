//! Run configuration
//!
//! The roster file is parsed and validated in a single step; everything the
//! orchestrator needs is then checked again as a whole by
//! [`RunConfig::validate`] before any account is touched.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use crate::error::{Result, ScanError};
use crate::types::{AccountTarget, RiskFlags, SeverityFilter};

/// Template written by `init-config`
pub const MULTI_ACCOUNT_CONFIG_TEMPLATE: &str = "\
# Accounts to sweep. Keys are labels (used as report file names),
# values are AWS account IDs. Accounts are scanned in this order.
accounts:
  default-account: \"123456789012\"
  prod: \"234567890123\"
  test: \"345678901234\"
";

/// Ordered list of accounts to sweep, in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    entries: Vec<AccountTarget>,
}

impl Roster {
    /// Build a roster from label/id pairs, rejecting empty or unsafe input.
    pub fn new(entries: Vec<AccountTarget>) -> Result<Self> {
        if entries.is_empty() {
            return Err(ScanError::Configuration(
                "Please supply a list of accounts in the multi-account config file".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            validate_label(&entry.label)?;
            if entry.account_id.trim().is_empty() {
                return Err(ScanError::Configuration(format!(
                    "Account '{}' has an empty account ID",
                    entry.label
                )));
            }
            if !seen.insert(entry.label.as_str()) {
                return Err(ScanError::Configuration(format!(
                    "Duplicate account label '{}'",
                    entry.label
                )));
            }
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[AccountTarget] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Labels become artifact file names and object keys.
fn validate_label(label: &str) -> Result<()> {
    if label.trim().is_empty() {
        return Err(ScanError::Configuration(
            "Account labels must not be empty".to_string(),
        ));
    }
    if label == "." || label == ".." || label.contains('/') || label.contains('\\') {
        return Err(ScanError::Configuration(format!(
            "Account label '{}' cannot be used as a file name",
            label
        )));
    }
    Ok(())
}

/// Parsed multi-account config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiAccountConfig {
    pub roster: Roster,
}

impl MultiAccountConfig {
    /// Parse and validate a multi-account YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let document: Value = serde_yaml::from_str(content).map_err(|e| {
            ScanError::Configuration(format!("Invalid multi-account config: {}", e))
        })?;

        let accounts = match document.get("accounts") {
            None | Some(Value::Null) => {
                return Err(ScanError::Configuration(
                    "Please supply a list of accounts in the multi-account config file"
                        .to_string(),
                ))
            }
            Some(Value::Mapping(mapping)) => mapping,
            Some(_) => {
                return Err(ScanError::Configuration(
                    "'accounts' must map account labels to account IDs".to_string(),
                ))
            }
        };

        let mut entries = Vec::with_capacity(accounts.len());
        for (key, value) in accounts {
            let label = scalar_to_string(key).ok_or_else(|| {
                ScanError::Configuration(format!("Invalid account label: {:?}", key))
            })?;
            let account_id = scalar_to_string(value).ok_or_else(|| {
                ScanError::Configuration(format!("Invalid account ID for '{}'", label))
            })?;
            entries.push(AccountTarget::new(label, account_id));
        }

        Ok(Self {
            roster: Roster::new(entries)?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading multi-account config from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }
}

/// Account IDs like `111111111111` are integers to a YAML parser.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Where artifacts go
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkConfig {
    /// S3 bucket receiving `<label>.html` / `<label>.json` objects
    pub bucket: Option<String>,
    /// Existing local directory receiving the same files
    pub directory: Option<PathBuf>,
    /// Also export the raw scan result as JSON
    pub write_data_file: bool,
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        let bucket = self.bucket.as_deref().filter(|b| !b.trim().is_empty());
        if bucket.is_none() && self.directory.is_none() {
            return Err(ScanError::Configuration(
                "Please supply --output-bucket and/or --output-directory as arguments."
                    .to_string(),
            ));
        }

        if let Some(dir) = &self.directory {
            if !dir.is_dir() {
                return Err(ScanError::Configuration(format!(
                    "Output directory {} does not exist or is not a directory",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}

/// Parameters forwarded to the scan engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanParams {
    pub severity: SeverityFilter,
    pub risk_flags: RiskFlags,
}

/// Everything a sweep needs, minus the collaborators
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub roster: Roster,
    /// Role assumed in every target account
    pub role_name: String,
    /// Operator profile used for STS and S3
    pub profile: Option<String>,
    pub sinks: SinkConfig,
    pub params: ScanParams,
}

impl RunConfig {
    /// Check every precondition up front so a bad invocation fails before
    /// the first account is processed.
    pub fn validate(&self) -> Result<()> {
        if self.roster.is_empty() {
            return Err(ScanError::Configuration(
                "Please supply a list of accounts in the multi-account config file".to_string(),
            ));
        }
        if self.role_name.trim().is_empty() {
            return Err(ScanError::Configuration(
                "A role name to assume in target accounts is required".to_string(),
            ));
        }
        self.sinks.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roster_preserves_document_order() {
        let yaml = "accounts:\n  zeta: \"3\"\n  alpha: \"1\"\n  mid: \"2\"\n";
        let config = MultiAccountConfig::from_yaml_str(yaml).unwrap();
        let labels: Vec<&str> = config
            .roster
            .entries()
            .iter()
            .map(|e| e.label.as_str())
            .collect();
        assert_eq!(labels, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_numeric_account_ids_are_accepted() {
        let yaml = "accounts:\n  prod: 111111111111\n";
        let config = MultiAccountConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.roster.entries()[0].account_id, "111111111111");
    }

    #[test]
    fn test_missing_accounts_key_is_configuration_error() {
        let err = MultiAccountConfig::from_yaml_str("other: 1\n").unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn test_empty_accounts_is_configuration_error() {
        for yaml in ["accounts: {}\n", "accounts:\n", ""] {
            let err = MultiAccountConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, ScanError::Configuration(_)), "{}", yaml);
        }
    }

    #[test]
    fn test_accounts_must_be_a_mapping() {
        let err = MultiAccountConfig::from_yaml_str("accounts:\n  - \"1\"\n").unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn test_unsafe_labels_rejected() {
        let err = MultiAccountConfig::from_yaml_str("accounts:\n  \"../x\": \"1\"\n").unwrap_err();
        assert!(err.to_string().contains("file name"));
    }

    #[test]
    fn test_template_parses() {
        let config = MultiAccountConfig::from_yaml_str(MULTI_ACCOUNT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.roster.len(), 3);
    }

    #[test]
    fn test_sink_config_requires_a_destination() {
        let err = SinkConfig::default().validate().unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));

        let blank_bucket = SinkConfig {
            bucket: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(blank_bucket.validate().is_err());
    }

    #[test]
    fn test_sink_config_checks_directory_exists() {
        let dir = tempdir().unwrap();
        let ok = SinkConfig {
            directory: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let missing = SinkConfig {
            directory: Some(dir.path().join("missing")),
            ..Default::default()
        };
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_run_config_requires_role_name() {
        let roster = Roster::new(vec![AccountTarget::new("a", "1")]).unwrap();
        let run = RunConfig {
            roster,
            role_name: String::new(),
            profile: None,
            sinks: SinkConfig {
                bucket: Some("reports".to_string()),
                ..Default::default()
            },
            params: ScanParams::default(),
        };
        assert!(matches!(
            run.validate().unwrap_err(),
            ScanError::Configuration(_)
        ));
    }
}
