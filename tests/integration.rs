use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn crawlrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("crawlrag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/crawlrag.sqlite"

[chunking]
max_tokens = 500

[retrieval]
default_match_count = 5
candidate_buffer = 20
default_max_content_length = 1000
default_max_response_tokens = 20000
min_query_length = 1

[embedding]
provider = "disabled"

[llm]
provider = "disabled"

[graph]
enabled = false

[features]
use_hybrid_search = true

[server]
bind = "127.0.0.1:8051"
"#,
        root.display()
    );

    let config_path = config_dir.join("crawlrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_crawlrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = crawlrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run crawlrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn init_creates_vector_store() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_crawlrag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("crawlrag.sqlite").exists());
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr1, success1) = run_crawlrag(&config_path, &["init"]);
    assert!(success1, "first init failed: {}", stderr1);

    let (_, stderr2, success2) = run_crawlrag(&config_path, &["init"]);
    assert!(success2, "second init failed (not idempotent): {}", stderr2);
}

#[test]
fn sources_empty_before_any_crawl() {
    let (_tmp, config_path) = setup_test_env();

    run_crawlrag(&config_path, &["init"]);
    let (stdout, _, success) = run_crawlrag(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("\"sources\""));
}

#[test]
fn rag_query_against_empty_store_succeeds_with_no_matches() {
    let (_tmp, config_path) = setup_test_env();

    run_crawlrag(&config_path, &["init"]);
    let (stdout, stderr, success) = run_crawlrag(&config_path, &["query", "rag", "what is rust"]);
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("\"success\": true"));
    assert!(stdout.contains("\"results\": []") || stdout.contains("\"count\": 0"));
}

#[test]
fn rag_query_rejects_blank_query() {
    let (_tmp, config_path) = setup_test_env();

    run_crawlrag(&config_path, &["init"]);
    let (stdout, _, success) = run_crawlrag(&config_path, &["query", "rag", "   "]);
    assert!(success, "the CLI should still exit 0 and report an in-band failure");
    assert!(stdout.contains("\"success\": false"));
}

#[test]
fn crawl_single_rejects_unsafe_url() {
    let (_tmp, config_path) = setup_test_env();

    run_crawlrag(&config_path, &["init"]);
    let (_, stderr, success) = run_crawlrag(&config_path, &["crawl", "single", "javascript:alert(1)"]);
    assert!(!success, "unsafe scheme should be rejected before any fetch is attempted");
    assert!(stderr.contains("safety validation"));
}

#[test]
fn crawl_smart_rejects_out_of_range_depth() {
    let (_tmp, config_path) = setup_test_env();

    run_crawlrag(&config_path, &["init"]);
    let (_, stderr, success) = run_crawlrag(
        &config_path,
        &["crawl", "smart", "https://example.com", "--max-depth", "99"],
    );
    assert!(!success, "max_depth outside 1..=10 should be rejected");
    assert!(stderr.contains("max_depth"));
}

#[test]
fn graph_tools_error_when_graph_store_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_crawlrag(&config_path, &["init"]);
    let (_, stderr, success) = run_crawlrag(&config_path, &["graph", "entity", "Rust"]);
    assert!(!success, "graph subcommands should fail when [graph].enabled = false");
    assert!(stderr.contains("graph store is not configured"));
}

#[test]
fn graph_extraction_crawl_errors_without_graph_store() {
    let (_tmp, config_path) = setup_test_env();

    run_crawlrag(&config_path, &["init"]);
    let (_, stderr, success) = run_crawlrag(
        &config_path,
        &["crawl", "graph-extraction", "https://example.com/docs"],
    );
    assert!(!success);
    assert!(stderr.contains("graph store is not configured"));
}
