//! IAM Fleet Scan Library
//!
//! Sweeps a roster of AWS accounts: assumes an audit role in each, downloads
//! the account authorization details, flags risky IAM policies, and publishes
//! a self-contained HTML report (plus optional JSON findings) to S3 and/or a
//! local directory.

pub mod config;
pub mod credentials;
pub mod error;
pub mod exclusions;
pub mod orchestrator;
pub mod output;
pub mod report;
pub mod scan;
pub mod snapshot;
pub mod types;

pub use config::{MultiAccountConfig, Roster, RunConfig, ScanParams, SinkConfig};
pub use credentials::{CredentialBroker, DelegatedCredentials, StsCredentialBroker};
pub use error::ScanError;
pub use exclusions::{load_exclusions, ExclusionRules};
pub use orchestrator::{Orchestrator, RunSummary};
pub use output::{
    ArtifactSink, BucketSinkFactory, DirectorySink, OutputDispatcher, S3Sink, S3SinkFactory,
};
pub use report::{HtmlReportRenderer, ReportRenderer};
pub use scan::{RiskScanEngine, ScanEngine, ScanResult};
pub use snapshot::{AuthorizationSnapshot, IamSnapshotFetcher, SnapshotFetcher};
pub use types::{AccountTarget, RiskFlags, Severity, SeverityFilter};
