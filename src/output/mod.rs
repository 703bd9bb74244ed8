//! Output Dispatcher
//!
//! Fans one account's report (and optionally its raw findings) out to every
//! configured sink. Artifact names are deterministic: `<label>.html` and
//! `<label>.json`.
//!
//! Every sink is attempted even when an earlier one failed; the first
//! failure is reported once all sinks have been tried.

mod directory;
mod s3;

pub use directory::{write_atomic, write_new, DirectorySink};
pub use s3::{S3Sink, S3SinkFactory};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::config::SinkConfig;
use crate::error::ScanError;
use crate::scan::ScanResult;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A destination for report artifacts
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Human-readable destination, used in errors
    fn describe(&self) -> String;

    /// Store `body` under `name`, returning where it landed.
    async fn put(&self, name: &str, content_type: &str, body: &[u8]) -> Result<String>;
}

/// Opens the object-storage sink for a bucket name
pub trait BucketSinkFactory: Send + Sync {
    fn open(&self, bucket: &str) -> Box<dyn ArtifactSink>;
}

/// Serialize a scan result with sorted keys and four-space indentation.
pub fn results_json(results: &ScanResult) -> Result<String> {
    // serde_json::Value keeps object keys sorted
    let value = serde_json::to_value(results).context("Failed to convert scan results")?;

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .context("Failed to serialize scan results")?;

    String::from_utf8(buf).context("Serialized scan results are not UTF-8")
}

/// Writes artifacts for each account to all sinks
pub struct OutputDispatcher {
    sinks: Vec<Box<dyn ArtifactSink>>,
    write_data_file: bool,
}

impl OutputDispatcher {
    pub fn new(sinks: Vec<Box<dyn ArtifactSink>>, write_data_file: bool) -> Self {
        Self {
            sinks,
            write_data_file,
        }
    }

    /// Build the sinks named in a [`SinkConfig`]: bucket first, then directory.
    pub fn from_sink_config(config: &SinkConfig, buckets: &dyn BucketSinkFactory) -> Self {
        let mut sinks: Vec<Box<dyn ArtifactSink>> = Vec::new();
        if let Some(bucket) = config.bucket.as_deref().filter(|b| !b.trim().is_empty()) {
            sinks.push(buckets.open(bucket));
        }
        if let Some(directory) = &config.directory {
            sinks.push(Box::new(DirectorySink::new(directory)));
        }
        Self::new(sinks, config.write_data_file)
    }

    /// Persist the artifacts of one account; returns the written locations.
    pub async fn dispatch(
        &self,
        label: &str,
        report: &str,
        results: &ScanResult,
    ) -> Result<Vec<String>, ScanError> {
        if self.sinks.is_empty() {
            return Err(ScanError::Configuration(
                "Please supply --output-bucket and/or --output-directory as arguments."
                    .to_string(),
            ));
        }

        let data = if self.write_data_file {
            let json = results_json(results).map_err(|source| ScanError::Write {
                label: label.to_string(),
                destination: format!("{}.json", label),
                source,
            })?;
            Some(json)
        } else {
            None
        };

        let html_name = format!("{}.html", label);
        let json_name = format!("{}.json", label);

        let mut written = Vec::new();
        let mut first_error: Option<ScanError> = None;

        for sink in &self.sinks {
            let outcome = async {
                let location = sink
                    .put(&html_name, HTML_CONTENT_TYPE, report.as_bytes())
                    .await?;
                println!("✅ Saved the HTML report to: {}", location);
                info!(account = %label, destination = %location, "Saved HTML report");
                written.push(location);

                if let Some(json) = &data {
                    let location = sink
                        .put(&json_name, JSON_CONTENT_TYPE, json.as_bytes())
                        .await?;
                    println!("✅ Saved the JSON data to: {}", location);
                    info!(account = %label, destination = %location, "Saved JSON data");
                    written.push(location);
                }
                Ok::<(), anyhow::Error>(())
            }
            .await;

            if let Err(source) = outcome {
                let destination = sink.describe();
                error!(account = %label, destination = %destination, "Write failed: {:#}", source);
                if first_error.is_none() {
                    first_error = Some(ScanError::Write {
                        label: label.to_string(),
                        destination,
                        source,
                    });
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }
}
