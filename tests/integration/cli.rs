//! End-to-end tests for the xhs-crawler binary

use assert_cmd::Command;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xhs_crawler::remote::NOTE_FEED_PATH;

fn crawler(progress_file: &Path) -> Command {
    let mut cmd = Command::cargo_bin("xhs-crawler").unwrap();
    cmd.env_remove("XHS_COOKIES")
        .env_remove("XHS_SIGNER")
        .env("RUST_LOG", "off")
        .arg("--progress-file")
        .arg(progress_file);
    cmd
}

fn write_items(dir: &TempDir, items: &[&str]) -> PathBuf {
    let path = dir.path().join("items.txt");
    fs::write(&path, format!("# notes\n{}\n", items.join("\n"))).unwrap();
    path
}

fn spawn_run(
    progress: PathBuf,
    input: PathBuf,
    results: PathBuf,
    uri: String,
) -> tokio::task::JoinHandle<Output> {
    tokio::task::spawn_blocking(move || {
        crawler(&progress)
            .args(["--output-format", "json", "run"])
            .arg(&input)
            .args(["--rate-limit", "50", "--base-url", uri.as_str(), "--output"])
            .arg(&results)
            .output()
            .unwrap()
    })
}

#[test]
fn test_help_lists_commands() {
    let output = Command::cargo_bin("xhs-crawler")
        .unwrap()
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run"));
    assert!(stdout.contains("progress"));
}

#[test]
fn test_progress_stats_json() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("p.json");
    fs::write(&progress, r#"["n1", "n2"]"#).unwrap();

    let output = crawler(&progress)
        .args(["--output-format", "json", "progress", "stats"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["completed"], 2);
    assert_eq!(stats["total"], 2);
}

#[test]
fn test_progress_verify_rejects_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("p.json");
    fs::write(&progress, "{ broken").unwrap();

    crawler(&progress)
        .args(["progress", "verify"])
        .assert()
        .failure()
        .code(1);
    // verify never moves the file aside
    assert!(progress.exists());
}

#[test]
fn test_progress_stats_and_list_leave_corrupt_file_in_place() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("p.json");
    fs::write(&progress, "{ broken").unwrap();

    for action in ["stats", "list"] {
        crawler(&progress)
            .args(["progress", action])
            .assert()
            .failure()
            .code(1);
    }
    assert_eq!(fs::read_to_string(&progress).unwrap(), "{ broken");
    assert!(!dir.path().join("p.json.corrupt").exists());
}

#[test]
fn test_progress_stats_without_file() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("missing.json");

    let output = crawler(&progress)
        .args(["--output-format", "json", "progress", "stats"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["total"], 0);
    assert!(!progress.exists());
}

#[test]
fn test_progress_clear() {
    let dir = TempDir::new().unwrap();
    let progress = dir.path().join("p.json");
    fs::write(&progress, r#"["n1"]"#).unwrap();

    crawler(&progress)
        .args(["progress", "clear"])
        .assert()
        .success();

    let raw: Value = serde_json::from_str(&fs::read_to_string(&progress).unwrap()).unwrap();
    assert!(raw["records"].as_object().unwrap().is_empty());
    assert!(raw["cleared_at"].is_string());
}

#[test]
fn test_run_missing_input_fails() {
    let dir = TempDir::new().unwrap();
    crawler(&dir.path().join("p.json"))
        .args(["run", "does-not-exist.txt"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_run_rejects_invalid_rate() {
    let dir = TempDir::new().unwrap();
    let input = write_items(&dir, &["n1"]);
    crawler(&dir.path().join("p.json"))
        .arg("run")
        .arg(&input)
        .args(["--rate-limit", "0"])
        .assert()
        .failure();
}

#[test]
fn test_run_rejects_unbounded_acquire_timeout() {
    let dir = TempDir::new().unwrap();
    let input = write_items(&dir, &["n1"]);
    crawler(&dir.path().join("p.json"))
        .arg("run")
        .arg(&input)
        .args(["--acquire-timeout", "18446744073709551615"])
        .assert()
        .failure()
        .code(2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_writes_results_and_resumes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(NOTE_FEED_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"items": []}
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let input = write_items(&dir, &["n1", "https://www.xiaohongshu.com/explore/n2?xsec_token=t"]);
    let progress = dir.path().join("p.json");
    let results = dir.path().join("out/results.jsonl");

    let first = spawn_run(progress.clone(), input.clone(), results.clone(), server.uri())
        .await
        .unwrap();
    assert!(first.status.success());
    let summary: Value = serde_json::from_slice(&first.stdout).unwrap();
    assert_eq!(summary["completed"], 2);

    let lines = fs::read_to_string(&results).unwrap();
    assert_eq!(lines.lines().count(), 2);
    assert!(lines.contains("\"fingerprint\":\"n2\""));

    let second = spawn_run(progress, input, results, server.uri()).await.unwrap();
    assert!(second.status.success());
    let summary: Value = serde_json::from_slice(&second.stdout).unwrap();
    assert_eq!(summary["skipped"], 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_exits_2_on_expired_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(NOTE_FEED_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let input = write_items(&dir, &["n1", "n2", "n3"]);
    let progress = dir.path().join("p.json");
    let uri = server.uri();

    let output = tokio::task::spawn_blocking(move || {
        crawler(&progress)
            .args(["--output-format", "json", "run"])
            .arg(&input)
            .args(["--rate-limit", "50", "--base-url", uri.as_str()])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["failed"], 1);
    assert_eq!(summary["not_attempted"], 2);
    assert!(summary["aborted"].is_string());
}
