use std::fs;
use std::path::Path;

use chrono::Utc;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::{tempdir, TempDir};
use wolf_config::{OperationMode, RemoteBackendKind, ServiceConfig};
use wolf_ingest::{PassOutcome, INTERRUPTED_REASON};
use wolf_keys::{KeyName, KeyRegistry};
use wolf_startup::{build_service_context, ServiceContext};
use wolf_store::{ProcessedFileRecord, Report, ReportQuery, ReportStatus};

const GENERATE_CONTENT_PATH: &str = "/models/gemini-1.5-flash:generateContent";

fn durable_filesystem_config(root: &Path, analysis_api_base: String) -> ServiceConfig {
    fs::create_dir_all(root.join("inbox")).expect("create inbox");
    fs::create_dir_all(root.join("archive")).expect("create archive");
    ServiceConfig {
        mode: OperationMode::Durable,
        remote_backend: RemoteBackendKind::Filesystem,
        inbox_folder: Some(root.join("inbox").display().to_string()),
        archive_folder: Some(root.join("archive").display().to_string()),
        data_dir: root.join("data"),
        analysis_api_base,
        ..ServiceConfig::default()
    }
}

fn durable_context(temp: &TempDir, server: &MockServer) -> ServiceContext {
    let config = durable_filesystem_config(temp.path(), server.base_url());
    let keys = KeyRegistry::from_environment([(KeyName::GoogleApiKey, "integration-key")]);
    build_service_context(&config, keys).expect("durable context")
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().is_file())
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn integration_durable_pass_archives_successes_and_quarantines_failures_once() {
    let temp = tempdir().expect("tempdir");
    let server = MockServer::start();
    let success = server.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_CONTENT_PATH)
            .query_param("key", "integration-key")
            .body_includes("rates steady");
        then.status(200).json_body(json!({
            "candidates": [{
                "content": {"parts": [{"text": "```json\n{\"summary\":\"rates steady\"}\n```"}]}
            }]
        }));
    });
    let rejected = server.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_CONTENT_PATH)
            .body_includes("REJECT-ME");
        then.status(400).body("bad request");
    });

    let context = durable_context(&temp, &server);
    let inbox = temp.path().join("inbox");
    fs::write(inbox.join("weekly.md"), "# Weekly\nrates steady\n").expect("write weekly");
    fs::write(inbox.join("broken.txt"), "REJECT-ME").expect("write broken");
    fs::write(inbox.join("scan.pdf"), b"%PDF-1.7").expect("write pdf");

    let (first, second) = tokio::join!(
        context.scheduler.trigger_pass(),
        context.scheduler.trigger_pass()
    );
    assert_eq!(first.processed + second.processed, 1);
    assert_eq!(first.failed + second.failed, 2);
    assert!(
        first.outcome == PassOutcome::Skipped || second.outcome == PassOutcome::Skipped
            || first.listed + second.listed == 3
    );

    let follow_up = context.scheduler.trigger_pass().await;
    assert_eq!(follow_up.outcome, PassOutcome::Completed);
    assert_eq!(follow_up.listed, 0);

    success.assert_calls(1);
    rejected.assert_calls(1);
    assert!(file_names(&inbox).is_empty());
    assert!(file_names(&inbox.join(".processing")).is_empty());
    assert_eq!(file_names(&temp.path().join("archive")), vec!["weekly.md"]);
    assert_eq!(
        file_names(&temp.path().join("archive/_error")),
        vec!["broken.txt", "scan.pdf"]
    );

    let processed = context
        .reports
        .list_by_status(ReportQuery::with_status(ReportStatus::Processed))
        .await
        .expect("list processed");
    assert_eq!(processed.len(), 1);
    let analysis = processed[0].analysis_result.as_ref().expect("analysis result");
    assert_eq!(analysis["summary"], "rates steady");
    assert_eq!(analysis["model"], "gemini-1.5-flash");

    let failed = context
        .reports
        .list_by_status(ReportQuery::with_status(ReportStatus::Failed))
        .await
        .expect("list failed");
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|report| report.failure_reason.is_some()));

    let snapshot = context.health.snapshot(true).await.expect("health snapshot");
    assert_eq!(snapshot.scheduler.state, "idle");
    let remote = snapshot.remote_storage.expect("remote health in durable mode");
    assert_eq!(remote.status.as_str(), "ok");
}

#[tokio::test]
async fn integration_requeued_report_is_ingested_again_when_file_returns() {
    let temp = tempdir().expect("tempdir");
    let server = MockServer::start();
    let analysis = server.mock(|when, then| {
        when.method(POST).path(GENERATE_CONTENT_PATH);
        then.status(200).json_body(json!({
            "candidates": [{"content": {"parts": [{"text": "plain text summary"}]}}]
        }));
    });
    let context = durable_context(&temp, &server);
    let inbox = temp.path().join("inbox");
    fs::write(inbox.join("daily.txt"), "daily numbers").expect("write daily");

    let first = context.scheduler.trigger_pass().await;
    assert_eq!(first.processed, 1);
    let report = context
        .reports
        .list_by_status(ReportQuery::default())
        .await
        .expect("list reports")
        .remove(0);
    assert_eq!(
        report.analysis_result.as_ref().expect("analysis")["summary"],
        "plain text summary"
    );

    fs::write(inbox.join("daily.txt"), "daily numbers, corrected").expect("rewrite daily");
    let guarded = context.scheduler.trigger_pass().await;
    assert_eq!(guarded.listed, 0);

    context
        .reports
        .requeue_report(&report.id)
        .await
        .expect("requeue report");
    let again = context.scheduler.trigger_pass().await;
    assert_eq!(again.processed, 1);
    analysis.assert_calls(2);
}

#[tokio::test]
async fn integration_startup_recovery_settles_files_left_in_progress() {
    let temp = tempdir().expect("tempdir");
    let server = MockServer::start();
    let context = durable_context(&temp, &server);
    let processing = temp.path().join("inbox/.processing");
    fs::create_dir_all(&processing).expect("create processing dir");
    fs::write(processing.join("interrupted.md"), "half done").expect("write interrupted");
    fs::write(processing.join("recorded.md"), "finished").expect("write recorded");

    let pending = Report::pending("interrupted.md", "filesystem:interrupted.md", Utc::now());
    let pending_id = pending.id.clone();
    context
        .reports
        .put_report(pending)
        .await
        .expect("put pending report");
    context
        .reports
        .record_processed_file(ProcessedFileRecord {
            source_filename: "recorded.md".to_string(),
            status: ReportStatus::Processed,
            location: "archive".to_string(),
            report_id: None,
            recorded_at: Utc::now(),
        })
        .await
        .expect("record processed file");

    let summary = context.recover_at_startup().await.expect("recovery summary");
    assert_eq!(summary.resumed, 1);
    assert_eq!(summary.failed, 1);
    assert!(file_names(&processing).is_empty());
    assert_eq!(file_names(&temp.path().join("archive")), vec!["recorded.md"]);
    assert_eq!(
        file_names(&temp.path().join("archive/_error")),
        vec!["interrupted.md"]
    );

    let report = context
        .reports
        .get_report(&pending_id)
        .await
        .expect("interrupted report");
    assert_eq!(report.processing_status, ReportStatus::Failed);
    assert_eq!(report.failure_reason.as_deref(), Some(INTERRUPTED_REASON));
    let guard = context
        .reports
        .processed_file("interrupted.md")
        .await
        .expect("guard lookup")
        .expect("guard present");
    assert_eq!(guard.status, ReportStatus::Failed);
}

#[tokio::test]
async fn integration_ephemeral_mode_never_ingests_and_cleans_up() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().join("ephemeral");
    let config = ServiceConfig {
        ephemeral_root: Some(root.clone()),
        ..ServiceConfig::default()
    };
    let context = build_service_context(&config, KeyRegistry::default()).expect("context");

    let summary = context.scheduler.trigger_pass().await;
    assert_eq!(summary.outcome, PassOutcome::Disabled);
    assert!(context.recover_at_startup().await.is_some());

    let first = context.health.snapshot(false).await.expect("snapshot");
    let second = context.health.snapshot(false).await.expect("snapshot");
    assert_eq!(first.overall, second.overall);
    assert!(first.remote_storage.is_none());
    assert_eq!(first.compact().scheduler_status, "disabled");
    assert_eq!(first.compact().remote_storage_status, "disabled");

    context.cleanup_ephemeral_root().expect("cleanup");
    assert!(!root.exists());
}

#[tokio::test]
async fn regression_missing_inbox_surfaces_as_remote_unavailable_and_recovers() {
    let temp = tempdir().expect("tempdir");
    let server = MockServer::start();
    let context = durable_context(&temp, &server);
    fs::remove_dir_all(temp.path().join("inbox")).expect("remove inbox");

    let failed = context.scheduler.trigger_pass().await;
    assert_eq!(failed.outcome, PassOutcome::RemoteUnavailable);
    let snapshot = context.health.snapshot(false).await.expect("snapshot");
    assert_eq!(snapshot.compact().scheduler_status, "idle, will retry");
    assert_eq!(snapshot.compact().remote_storage_status, "unreachable");
    assert_eq!(snapshot.report_store.status.as_str(), "ok");

    fs::create_dir_all(temp.path().join("inbox")).expect("restore inbox");
    let recovered = context.scheduler.trigger_pass().await;
    assert_eq!(recovered.outcome, PassOutcome::Completed);
    assert_eq!(context.scheduler.status().consecutive_remote_failures, 0);
}
