//! End-to-end sweeps driven through in-memory collaborators.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use tempfile::tempdir;

use iam_fleet_scan::config::Roster;
use iam_fleet_scan::snapshot::{InlinePolicy, ManagedPolicyDetail, RoleDetail};
use iam_fleet_scan::{
    AccountTarget, ArtifactSink, AuthorizationSnapshot, BucketSinkFactory, CredentialBroker,
    DelegatedCredentials, ExclusionRules, Orchestrator, ReportRenderer, RiskFlags,
    RiskScanEngine, RunConfig, ScanEngine, ScanError, ScanParams, ScanResult, SinkConfig,
    SnapshotFetcher,
};

// ============================================================
// Fakes
// ============================================================

/// Hands out credentials whose access key is the account id
#[derive(Default)]
struct FakeBroker {
    fail_for: Option<&'static str>,
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl CredentialBroker for FakeBroker {
    async fn assume_role(&self, account_id: &str, role_name: &str) -> Result<DelegatedCredentials> {
        self.calls
            .lock()
            .unwrap()
            .push((account_id.to_string(), role_name.to_string()));
        if self.fail_for == Some(account_id) {
            bail!("AccessDenied: not authorized to perform sts:AssumeRole");
        }
        Ok(DelegatedCredentials {
            access_key_id: account_id.to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expires_at: None,
        })
    }
}

/// Returns one role with a risky inline policy per account
#[derive(Default)]
struct FakeFetcher {
    /// Account whose snapshot is structurally broken
    broken_for: Option<&'static str>,
    /// Account ids seen, taken from the delegated credentials
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl SnapshotFetcher for FakeFetcher {
    async fn fetch(&self, credentials: &DelegatedCredentials) -> Result<AuthorizationSnapshot> {
        let account = credentials.access_key_id.clone();
        self.seen.lock().unwrap().push(account.clone());

        let mut snapshot = AuthorizationSnapshot {
            roles: vec![RoleDetail {
                role_name: "app".to_string(),
                arn: format!("arn:aws:iam::{}:role/app", account),
                role_policy_list: vec![
                    InlinePolicy {
                        policy_name: "open".to_string(),
                        policy_document: json!({
                            "Version": "2012-10-17",
                            "Statement": [{
                                "Effect": "Allow",
                                "Action": "s3:PutBucketPolicy",
                                "Resource": "*"
                            }]
                        }),
                    },
                    InlinePolicy {
                        policy_name: "mfa-only".to_string(),
                        policy_document: json!({
                            "Version": "2012-10-17",
                            "Statement": [{
                                "Effect": "Allow",
                                "Action": "iam:CreateAccessKey",
                                "Resource": "*",
                                "Condition": {"Bool": {"aws:MultiFactorAuthPresent": "true"}}
                            }]
                        }),
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        if self.broken_for == Some(account.as_str()) {
            snapshot.policies.push(ManagedPolicyDetail {
                policy_name: "NoVersions".to_string(),
                policy_id: "ANPA0000".to_string(),
                arn: format!("arn:aws:iam::{}:policy/NoVersions", account),
                ..Default::default()
            });
        }
        Ok(snapshot)
    }
}

/// Wraps the real engine, recording the parameters of every call
#[derive(Default)]
struct RecordingEngine {
    params: Mutex<Vec<ScanParams>>,
}

impl ScanEngine for RecordingEngine {
    fn scan(
        &self,
        snapshot: &AuthorizationSnapshot,
        exclusions: &ExclusionRules,
        params: &ScanParams,
    ) -> Result<ScanResult> {
        self.params.lock().unwrap().push(params.clone());
        RiskScanEngine::new().scan(snapshot, exclusions, params)
    }
}

#[derive(Default)]
struct FakeRenderer {
    rendered: Mutex<Vec<String>>,
}

impl ReportRenderer for FakeRenderer {
    fn render(&self, account: &AccountTarget, results: &ScanResult) -> Result<String> {
        self.rendered.lock().unwrap().push(account.label.clone());
        Ok(format!(
            "<html>{} {} findings</html>",
            account,
            results.len()
        ))
    }
}

/// In-memory bucket; `denied` makes every upload fail
#[derive(Clone, Default)]
struct MemoryBucket {
    denied: bool,
    opened: Arc<Mutex<Vec<String>>>,
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    order: Arc<Mutex<Vec<String>>>,
}

impl BucketSinkFactory for MemoryBucket {
    fn open(&self, bucket: &str) -> Box<dyn ArtifactSink> {
        self.opened.lock().unwrap().push(bucket.to_string());
        Box::new(self.clone())
    }
}

#[async_trait]
impl ArtifactSink for MemoryBucket {
    fn describe(&self) -> String {
        "s3://reports".to_string()
    }

    async fn put(&self, name: &str, _content_type: &str, body: &[u8]) -> Result<String> {
        if self.denied {
            bail!("AccessDenied: s3:PutObject on {}", name);
        }
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), body.to_vec());
        self.order.lock().unwrap().push(name.to_string());
        Ok(format!("s3://reports/{}", name))
    }
}

struct Harness {
    broker: Arc<FakeBroker>,
    fetcher: Arc<FakeFetcher>,
    engine: Arc<RecordingEngine>,
    renderer: Arc<FakeRenderer>,
}

impl Harness {
    fn new(broker: FakeBroker, fetcher: FakeFetcher) -> Self {
        Self {
            broker: Arc::new(broker),
            fetcher: Arc::new(fetcher),
            engine: Arc::new(RecordingEngine::default()),
            renderer: Arc::new(FakeRenderer::default()),
        }
    }

    fn orchestrator(&self, bucket: &MemoryBucket) -> Orchestrator {
        Orchestrator::new(
            self.broker.clone(),
            self.fetcher.clone(),
            self.engine.clone(),
            self.renderer.clone(),
            Arc::new(bucket.clone()),
        )
    }

    fn broker_calls(&self) -> usize {
        self.broker.calls.lock().unwrap().len()
    }
}

fn roster(entries: &[(&str, &str)]) -> Roster {
    Roster::new(
        entries
            .iter()
            .map(|(label, id)| AccountTarget::new(*label, *id))
            .collect(),
    )
    .unwrap()
}

fn bucket_config(roster: Roster, write_data_file: bool) -> RunConfig {
    RunConfig {
        roster,
        role_name: "AuditRole".to_string(),
        profile: None,
        sinks: SinkConfig {
            bucket: Some("reports".to_string()),
            directory: None,
            write_data_file,
        },
        params: ScanParams::default(),
    }
}

// ============================================================
// Tests
// ============================================================

#[tokio::test]
async fn test_each_account_processed_once_in_roster_order() {
    let harness = Harness::new(FakeBroker::default(), FakeFetcher::default());
    let bucket = MemoryBucket::default();
    let orchestrator = harness.orchestrator(&bucket);

    let config = bucket_config(roster(&[("zeta", "3"), ("alpha", "1"), ("mid", "2")]), false);
    let summary = orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap();

    let calls = harness.broker.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("3".to_string(), "AuditRole".to_string()),
            ("1".to_string(), "AuditRole".to_string()),
            ("2".to_string(), "AuditRole".to_string()),
        ]
    );
    assert_eq!(*harness.fetcher.seen.lock().unwrap(), vec!["3", "1", "2"]);
    assert_eq!(harness.engine.params.lock().unwrap().len(), 3);
    assert_eq!(*harness.renderer.rendered.lock().unwrap(), vec!["zeta", "alpha", "mid"]);
    assert_eq!(
        *bucket.order.lock().unwrap(),
        vec!["zeta.html", "alpha.html", "mid.html"]
    );

    let labels: Vec<&str> = summary
        .accounts
        .iter()
        .map(|a| a.account.label.as_str())
        .collect();
    assert_eq!(labels, vec!["zeta", "alpha", "mid"]);
    assert!(summary.finished_at >= summary.started_at);
}

#[tokio::test]
async fn test_directory_only_writes_html_report() {
    let dir = tempdir().unwrap();
    let harness = Harness::new(FakeBroker::default(), FakeFetcher::default());
    let bucket = MemoryBucket::default();
    let orchestrator = harness.orchestrator(&bucket);

    let config = RunConfig {
        roster: roster(&[("prod", "111111111111")]),
        role_name: "AuditRole".to_string(),
        profile: None,
        sinks: SinkConfig {
            bucket: None,
            directory: Some(dir.path().to_path_buf()),
            write_data_file: false,
        },
        params: ScanParams::default(),
    };

    let summary = orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap();

    let files: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["prod.html"]);
    assert!(bucket.opened.lock().unwrap().is_empty());

    let html = std::fs::read_to_string(dir.path().join("prod.html")).unwrap();
    assert!(html.contains("prod (ID: 111111111111)"));
    assert_eq!(summary.accounts[0].artifacts.len(), 1);
}

#[tokio::test]
async fn test_bucket_with_data_file_writes_four_objects() {
    let harness = Harness::new(FakeBroker::default(), FakeFetcher::default());
    let bucket = MemoryBucket::default();
    let orchestrator = harness.orchestrator(&bucket);

    let config = bucket_config(roster(&[("a", "1"), ("b", "2")]), true);
    orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap();

    assert_eq!(
        *bucket.order.lock().unwrap(),
        vec!["a.html", "a.json", "b.html", "b.json"]
    );
    // sinks come from the run config and are opened once per run
    assert_eq!(*bucket.opened.lock().unwrap(), vec!["reports"]);

    let objects = bucket.objects.lock().unwrap();
    let json = String::from_utf8(objects["a.json"].clone()).unwrap();
    let parsed: ScanResult = serde_json::from_str(&json).unwrap();
    assert!(parsed.contains_key("role/app/open"));
    // without the flag the conditional statement is not risky
    assert!(!parsed.contains_key("role/app/mfa-only"));
    assert!(json.contains("\n    \"role/app/open\": {"));
}

#[tokio::test]
async fn test_both_sinks_receive_artifacts() {
    let dir = tempdir().unwrap();
    let harness = Harness::new(FakeBroker::default(), FakeFetcher::default());
    let bucket = MemoryBucket::default();
    let orchestrator = harness.orchestrator(&bucket);

    let mut config = bucket_config(roster(&[("shared", "5")]), true);
    config.sinks.directory = Some(dir.path().to_path_buf());

    let summary = orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap();

    assert_eq!(*bucket.order.lock().unwrap(), vec!["shared.html", "shared.json"]);
    assert!(dir.path().join("shared.html").is_file());
    assert!(dir.path().join("shared.json").is_file());
    assert_eq!(summary.accounts[0].artifacts.len(), 4);

    let local = std::fs::read(dir.path().join("shared.json")).unwrap();
    assert_eq!(bucket.objects.lock().unwrap()["shared.json"], local);
}

#[tokio::test]
async fn test_flag_all_sets_both_risk_flags() {
    let harness = Harness::new(FakeBroker::default(), FakeFetcher::default());
    let bucket = MemoryBucket::default();
    let orchestrator = harness.orchestrator(&bucket);

    let mut config = bucket_config(roster(&[("a", "1")]), true);
    config.params.risk_flags = RiskFlags::from_flag_all(true);
    orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap();

    let params = harness.engine.params.lock().unwrap();
    assert_eq!(
        params[0].risk_flags,
        RiskFlags {
            flag_conditional_statements: true,
            flag_resource_arn_statements: true,
        }
    );

    let objects = bucket.objects.lock().unwrap();
    let parsed: ScanResult = serde_json::from_slice(&objects["a.json"]).unwrap();
    assert_eq!(
        parsed["role/app/mfa-only"].credentials_exposure,
        vec!["iam:CreateAccessKey"]
    );
}

#[tokio::test]
async fn test_missing_sink_fails_before_any_account() {
    let harness = Harness::new(FakeBroker::default(), FakeFetcher::default());
    let orchestrator = harness.orchestrator(&MemoryBucket::default());

    let mut config = bucket_config(roster(&[("a", "1")]), false);
    config.sinks.bucket = None;

    let err = orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Configuration(_)));
    assert_eq!(harness.broker_calls(), 0);
    assert!(harness.renderer.rendered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_output_directory_fails_before_any_account() {
    let dir = tempdir().unwrap();
    let harness = Harness::new(FakeBroker::default(), FakeFetcher::default());
    let missing = dir.path().join("missing");
    let orchestrator = harness.orchestrator(&MemoryBucket::default());

    let mut config = bucket_config(roster(&[("a", "1")]), false);
    config.sinks.bucket = None;
    config.sinks.directory = Some(missing);

    let err = orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Configuration(_)));
    assert_eq!(harness.broker_calls(), 0);
}

#[test]
fn test_empty_roster_is_configuration_error() {
    let err = Roster::new(Vec::new()).unwrap_err();
    assert!(matches!(err, ScanError::Configuration(_)));
}

#[tokio::test]
async fn test_credential_failure_aborts_after_earlier_accounts() {
    let dir = tempdir().unwrap();
    let broker = FakeBroker {
        fail_for: Some("2"),
        ..Default::default()
    };
    let harness = Harness::new(broker, FakeFetcher::default());
    let orchestrator = harness.orchestrator(&MemoryBucket::default());

    let mut config = bucket_config(roster(&[("a", "1"), ("b", "2"), ("c", "3")]), false);
    config.sinks.bucket = None;
    config.sinks.directory = Some(dir.path().to_path_buf());

    let err = orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap_err();

    match &err {
        ScanError::Credential {
            label,
            account_id,
            role_name,
            ..
        } => {
            assert_eq!(label, "b");
            assert_eq!(account_id, "2");
            assert_eq!(role_name, "AuditRole");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.account_label(), Some("b"));

    assert!(dir.path().join("a.html").is_file());
    assert!(!dir.path().join("b.html").exists());
    assert!(!dir.path().join("c.html").exists());
    // c is never attempted
    assert_eq!(harness.broker_calls(), 2);
    assert_eq!(*harness.fetcher.seen.lock().unwrap(), vec!["1"]);
}

#[tokio::test]
async fn test_write_failure_aborts_remaining_accounts() {
    let harness = Harness::new(FakeBroker::default(), FakeFetcher::default());
    let bucket = MemoryBucket {
        denied: true,
        ..Default::default()
    };
    let orchestrator = harness.orchestrator(&bucket);

    let config = bucket_config(roster(&[("a", "1"), ("b", "2")]), false);
    let err = orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap_err();

    match &err {
        ScanError::Write {
            label, destination, ..
        } => {
            assert_eq!(label, "a");
            assert_eq!(destination, "s3://reports");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.broker_calls(), 1);
    assert_eq!(*harness.renderer.rendered.lock().unwrap(), vec!["a"]);
    assert!(bucket.objects.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_snapshot_aborts_before_scan() {
    let fetcher = FakeFetcher {
        broken_for: Some("1"),
        ..Default::default()
    };
    let harness = Harness::new(FakeBroker::default(), fetcher);
    let bucket = MemoryBucket::default();
    let orchestrator = harness.orchestrator(&bucket);

    let config = bucket_config(roster(&[("a", "1"), ("b", "2")]), false);
    let err = orchestrator
        .run(&config, &ExclusionRules::empty())
        .await
        .unwrap_err();

    match err {
        ScanError::Validation { label, problems } => {
            assert_eq!(label, "a");
            assert!(!problems.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(harness.engine.params.lock().unwrap().is_empty());
    assert!(bucket.order.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_exclusions_reach_the_engine() {
    let harness = Harness::new(FakeBroker::default(), FakeFetcher::default());
    let bucket = MemoryBucket::default();
    let orchestrator = harness.orchestrator(&bucket);

    let exclusions = ExclusionRules::from_yaml_str("roles:\n  - app\n").unwrap();
    let config = bucket_config(roster(&[("a", "1")]), true);
    let summary = orchestrator.run(&config, &exclusions).await.unwrap();

    let objects = bucket.objects.lock().unwrap();
    let parsed: ScanResult = serde_json::from_slice(&objects["a.json"]).unwrap();
    assert!(parsed.is_empty());
    assert_eq!(summary.accounts[0].counts.policies, 0);
}
