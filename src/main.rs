//! IAM Fleet Scan
//!
//! Sweeps a list of AWS accounts, flags risky IAM policies in each one and
//! publishes a per-account HTML report to S3 and/or a local directory.
//!
//! # Usage
//! ```bash
//! # Write a starter roster and exclusions file
//! iam-fleet-scan init-config -o multi-account-config.yml
//! iam-fleet-scan init-exclusions -o exclusions.yml
//!
//! # Scan every account, writing reports locally
//! iam-fleet-scan scan -c multi-account-config.yml -r AuditRole -o ./reports
//!
//! # Scan into a bucket, exporting JSON findings, HIGH and CRITICAL only
//! iam-fleet-scan scan -c multi-account-config.yml -r AuditRole \
//!     -b security-reports -w -f high -f critical
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use iam_fleet_scan::config::MULTI_ACCOUNT_CONFIG_TEMPLATE;
use iam_fleet_scan::credentials::load_operator_config;
use iam_fleet_scan::output::write_new;
use iam_fleet_scan::{
    load_exclusions, ExclusionRules, HtmlReportRenderer, IamSnapshotFetcher, MultiAccountConfig,
    Orchestrator, RiskFlags, RiskScanEngine, RunConfig, S3SinkFactory, ScanParams, Severity,
    SeverityFilter, SinkConfig, StsCredentialBroker,
};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "iam-fleet-scan")]
#[command(about = "Scan IAM policies across many AWS accounts", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every account listed in a multi-account config file
    Scan(ScanArgs),

    /// Write a template multi-account config file
    InitConfig {
        /// Where to write the template
        #[arg(short, long, default_value = "multi-account-config.yml")]
        output_file: PathBuf,
    },

    /// Write the default exclusions as an editable YAML file
    InitExclusions {
        /// Where to write the exclusions file
        #[arg(short, long, default_value = "exclusions.yml")]
        output_file: PathBuf,
    },
}

#[derive(clap::Args)]
struct ScanArgs {
    /// Multi-account config file listing the accounts to scan
    #[arg(short, long)]
    config: PathBuf,

    /// Operator profile used to assume roles and upload reports
    #[arg(short, long, env = "AWS_DEFAULT_PROFILE")]
    profile: Option<String>,

    /// Role to assume in every target account
    #[arg(short, long)]
    role_name: String,

    /// Exclusions file; the built-in exclusions are used when omitted
    #[arg(short, long)]
    exclusions_file: Option<PathBuf>,

    /// Existing local directory receiving the reports
    #[arg(short, long)]
    output_directory: Option<PathBuf>,

    /// S3 bucket receiving the reports
    #[arg(short = 'b', long)]
    output_bucket: Option<String>,

    /// Region of the output bucket (defaults to the profile's region)
    #[arg(long)]
    region: Option<String>,

    /// Also write the raw findings as <label>.json
    #[arg(short, long)]
    write_data_file: bool,

    /// Flag risky actions even when constrained by conditions or resource ARNs
    #[arg(short = 'a', long)]
    flag_all_risky_actions: bool,

    /// Only report findings of these severities (repeatable)
    #[arg(short = 'f', long = "filter-severity", value_enum, ignore_case = true)]
    severity: Vec<Severity>,
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json)?;

    match cli.command {
        Commands::Scan(args) => scan(args).await,
        Commands::InitConfig { output_file } => {
            write_new_file(&output_file, MULTI_ACCOUNT_CONFIG_TEMPLATE)?;
            println!("✅ Wrote the multi-account config template to: {}", output_file.display());
            Ok(())
        }
        Commands::InitExclusions { output_file } => {
            let yaml = ExclusionRules::default()
                .to_yaml()
                .context("Failed to serialize default exclusions")?;
            write_new_file(&output_file, &yaml)?;
            println!("✅ Wrote the exclusions file to: {}", output_file.display());
            Ok(())
        }
    }
}

fn init_logging(verbose: u8, json: bool) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn scan(args: ScanArgs) -> Result<()> {
    let config = MultiAccountConfig::from_file(&args.config)?;
    let exclusions = load_exclusions(args.exclusions_file.as_deref())?;

    let run = RunConfig {
        roster: config.roster,
        role_name: args.role_name,
        profile: args.profile,
        sinks: SinkConfig {
            bucket: args.output_bucket,
            directory: args.output_directory,
            write_data_file: args.write_data_file,
        },
        params: ScanParams {
            severity: SeverityFilter::new(args.severity),
            risk_flags: RiskFlags::from_flag_all(args.flag_all_risky_actions),
        },
    };
    // Fail on a bad invocation before touching AWS at all
    run.validate()?;

    info!("🔐 Loading operator credentials (profile: {})", run.profile.as_deref().unwrap_or("default"));
    let operator = load_operator_config(run.profile.as_deref(), args.region.as_deref()).await;

    let orchestrator = Orchestrator::new(
        Arc::new(StsCredentialBroker::new(&operator)),
        Arc::new(IamSnapshotFetcher::new()),
        Arc::new(RiskScanEngine::new()),
        Arc::new(HtmlReportRenderer::new()),
        Arc::new(S3SinkFactory::new(&operator)),
    );

    let summary = orchestrator.run(&run, &exclusions).await?;

    let elapsed = summary.finished_at - summary.started_at;
    println!(
        "\n✅ Scanned {} account(s) in {}s",
        summary.accounts.len(),
        elapsed.num_seconds()
    );
    for outcome in &summary.accounts {
        println!(
            "  {}: {} risky policies",
            outcome.account, outcome.counts.policies
        );
    }

    Ok(())
}

/// Write a starter file, refusing to clobber one the operator already edited.
fn write_new_file(path: &Path, content: &str) -> Result<()> {
    write_new(path, content.as_bytes())
        .with_context(|| format!("{} already exists or is not writable", path.display()))
}
