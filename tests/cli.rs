use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ixh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ixh");
    path
}

/// Config pointing at an embedder nothing listens on, so any run that
/// actually needs vectors fails fast.
fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ixh.sqlite"

[indexing]
product = "cli"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768
url = "http://127.0.0.1:9"
timeout_secs = 2

[retry]
max_attempts = 1
base_delay_ms = 1
max_delay_ms = 1
"#,
        root.display()
    );

    let config_path = config_dir.join("ixh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, files_dir)
}

fn run_ixh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ixh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ixh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn snapshot_count(root: &Path) -> i64 {
    let db_path = root.join("data/ixh.sqlite");
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let url = format!("sqlite:{}", db_path.display());
        let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots")
            .fetch_one(&pool)
            .await
            .unwrap();
        pool.close().await;
        count
    })
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path, _) = setup_test_env();

    let (stdout, stderr, success) = run_ixh(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/ixh.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, _, success1) = run_ixh(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ixh(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_index_binary_only_directory_needs_no_embedder() {
    let (_tmp, config_path, files_dir) = setup_test_env();
    fs::write(files_dir.join("blob.dat"), b"\x00\x01\x02").unwrap();
    let dir = files_dir.to_str().unwrap();

    let (stdout, stderr, success) = run_ixh(&config_path, &["index", "filesystem", dir]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ignored: 1"));
    assert!(stdout.contains("indexed: 0"));
    assert!(stdout.contains("ok"));

    // Same tree, same version.
    let (stdout, stderr, success) = run_ixh(&config_path, &["index", "filesystem", dir]);
    assert!(success, "re-index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("already indexed"));
}

#[test]
fn test_index_fails_cleanly_when_embedder_unreachable() {
    let (tmp, config_path, files_dir) = setup_test_env();
    fs::write(files_dir.join("notes.md"), "# Notes\n\nSomething to embed.\n").unwrap();

    run_ixh(&config_path, &["init"]);
    let (stdout, _stderr, success) = run_ixh(
        &config_path,
        &["index", "filesystem", files_dir.to_str().unwrap()],
    );
    assert!(!success, "index should fail without an embedder: {}", stdout);
    assert!(!stdout.contains("ok"));
    assert_eq!(snapshot_count(tmp.path()), 0);
}

#[test]
fn test_index_rejects_unknown_source_type() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, stderr, success) = run_ixh(&config_path, &["index", "svn", "https://example.com/repo"]);
    assert!(!success);
    assert!(stderr.contains("svn"));
}
