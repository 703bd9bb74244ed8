//! Error taxonomy for a sweep run.
//!
//! Collaborators (STS, IAM, S3, the engine, the renderer) report failures as
//! `anyhow::Error`; the orchestrator wraps them here together with the roster
//! entry that was in progress so an operator can tell how far the run got.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a sweep run
#[derive(Debug, Error)]
pub enum ScanError {
    /// Roster missing/empty, no output sink, bad CLI input
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Exclusions file could not be read or parsed
    #[error("Malformed exclusions file {path:?}: {reason}")]
    MalformedExclusions { path: PathBuf, reason: String },

    /// Delegated credential exchange failed
    #[error("Failed to assume role {role_name} in account {label} ({account_id}): {source:#}")]
    Credential {
        label: String,
        account_id: String,
        role_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Authorization snapshot download failed
    #[error("Failed to download authorization details for account {label} ({account_id}): {source:#}")]
    Snapshot {
        label: String,
        account_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Snapshot did not match the expected structure
    #[error("Authorization details for account {label} failed validation: {}", problems.join("; "))]
    Validation { label: String, problems: Vec<String> },

    /// Scan engine failure
    #[error("Scan failed for account {label}: {source:#}")]
    Engine {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    /// Report rendering failure
    #[error("Failed to render report for account {label}: {source:#}")]
    Render {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    /// Sink write failure
    #[error("Failed to write {label} artifacts to {destination}: {source:#}")]
    Write {
        label: String,
        destination: String,
        #[source]
        source: anyhow::Error,
    },

    /// Local file IO outside of a sink (config files, templates)
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Roster label of the account that was being processed, if any
    pub fn account_label(&self) -> Option<&str> {
        match self {
            ScanError::Credential { label, .. }
            | ScanError::Snapshot { label, .. }
            | ScanError::Validation { label, .. }
            | ScanError::Engine { label, .. }
            | ScanError::Render { label, .. }
            | ScanError::Write { label, .. } => Some(label),
            ScanError::Configuration(_)
            | ScanError::MalformedExclusions { .. }
            | ScanError::Io { .. } => None,
        }
    }
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_error_names_account() {
        let err = ScanError::Credential {
            label: "b".to_string(),
            account_id: "2".to_string(),
            role_name: "AuditRole".to_string(),
            source: anyhow::anyhow!("AccessDenied"),
        };

        let msg = err.to_string();
        assert!(msg.contains("account b (2)"));
        assert!(msg.contains("AuditRole"));
        assert!(msg.contains("AccessDenied"));
        assert_eq!(err.account_label(), Some("b"));
    }

    #[test]
    fn test_validation_error_lists_problems() {
        let err = ScanError::Validation {
            label: "prod".to_string(),
            problems: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().ends_with("a; b"));
    }

    #[test]
    fn test_configuration_error_has_no_account() {
        let err = ScanError::Configuration("no sink".to_string());
        assert_eq!(err.account_label(), None);
    }
}
