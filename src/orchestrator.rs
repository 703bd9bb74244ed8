//! Multi-Account Orchestrator
//!
//! Drives the sweep: for every roster entry, in roster order, assume the
//! audit role, download and validate the authorization snapshot, scan it,
//! render the report, and dispatch the artifacts.
//!
//! Accounts are processed strictly one after another and the first error
//! aborts the run. Nothing is shared between entries: credentials, snapshot
//! and scan result are dropped before the next account starts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::RunConfig;
use crate::credentials::CredentialBroker;
use crate::error::{Result, ScanError};
use crate::exclusions::ExclusionRules;
use crate::output::{BucketSinkFactory, OutputDispatcher};
use crate::report::ReportRenderer;
use crate::scan::{FindingCounts, ScanEngine};
use crate::snapshot::{validate_snapshot, SnapshotFetcher};
use crate::types::AccountTarget;

/// Outcome of one completed account
#[derive(Debug, Clone, Serialize)]
pub struct AccountOutcome {
    pub account: AccountTarget,
    pub counts: FindingCounts,
    pub artifacts: Vec<String>,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts: Vec<AccountOutcome>,
}

pub struct Orchestrator {
    broker: Arc<dyn CredentialBroker>,
    fetcher: Arc<dyn SnapshotFetcher>,
    engine: Arc<dyn ScanEngine>,
    renderer: Arc<dyn ReportRenderer>,
    buckets: Arc<dyn BucketSinkFactory>,
}

impl Orchestrator {
    pub fn new(
        broker: Arc<dyn CredentialBroker>,
        fetcher: Arc<dyn SnapshotFetcher>,
        engine: Arc<dyn ScanEngine>,
        renderer: Arc<dyn ReportRenderer>,
        buckets: Arc<dyn BucketSinkFactory>,
    ) -> Self {
        Self {
            broker,
            fetcher,
            engine,
            renderer,
            buckets,
        }
    }

    /// Sweep every account in the roster.
    ///
    /// Preconditions (non-empty roster, role name, at least one sink) are
    /// checked before the first account is touched. Sinks are opened from
    /// `config.sinks` once per run.
    pub async fn run(&self, config: &RunConfig, exclusions: &ExclusionRules) -> Result<RunSummary> {
        config.validate()?;
        let dispatcher = OutputDispatcher::from_sink_config(&config.sinks, self.buckets.as_ref());

        let started_at = Utc::now();
        let total = config.roster.len();
        let mut accounts = Vec::with_capacity(total);

        info!(accounts = total, role = %config.role_name, "🚀 Starting multi-account scan");

        for (index, account) in config.roster.entries().iter().enumerate() {
            println!("Scanning account: {}", account);
            info!(
                account = %account.label,
                account_id = %account.account_id,
                "🔍 Scanning account {}/{}",
                index + 1,
                total
            );

            match self.scan_account(account, config, exclusions, &dispatcher).await {
                Ok(outcome) => {
                    info!(
                        account = %account.label,
                        policies = outcome.counts.policies,
                        "✅ Account complete"
                    );
                    accounts.push(outcome);
                }
                Err(e) => {
                    error!(
                        account = %account.label,
                        completed = accounts.len(),
                        remaining = total - accounts.len(),
                        "❌ Aborting run: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }

        info!(accounts = accounts.len(), "🏁 Multi-account scan finished");

        Ok(RunSummary {
            started_at,
            finished_at: Utc::now(),
            accounts,
        })
    }

    async fn scan_account(
        &self,
        account: &AccountTarget,
        config: &RunConfig,
        exclusions: &ExclusionRules,
        dispatcher: &OutputDispatcher,
    ) -> Result<AccountOutcome> {
        let credentials = self
            .broker
            .assume_role(&account.account_id, &config.role_name)
            .await
            .map_err(|source| ScanError::Credential {
                label: account.label.clone(),
                account_id: account.account_id.clone(),
                role_name: config.role_name.clone(),
                source,
            })?;

        let snapshot = self
            .fetcher
            .fetch(&credentials)
            .await
            .map_err(|source| ScanError::Snapshot {
                label: account.label.clone(),
                account_id: account.account_id.clone(),
                source,
            })?;
        drop(credentials);

        validate_snapshot(&snapshot).map_err(|problems| ScanError::Validation {
            label: account.label.clone(),
            problems,
        })?;

        let results = self
            .engine
            .scan(&snapshot, exclusions, &config.params)
            .map_err(|source| ScanError::Engine {
                label: account.label.clone(),
                source,
            })?;
        drop(snapshot);

        let report = self
            .renderer
            .render(account, &results)
            .map_err(|source| ScanError::Render {
                label: account.label.clone(),
                source,
            })?;

        let artifacts = dispatcher.dispatch(&account.label, &report, &results).await?;

        Ok(AccountOutcome {
            account: account.clone(),
            counts: FindingCounts::from_result(&results),
            artifacts,
        })
    }
}
