use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cloudops_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cloudops");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("docker.md"),
        "# Docker\n\nBuild an image with docker build -t app .",
    )
    .unwrap();
    fs::write(
        docs_dir.join("kubernetes.md"),
        "# Kubernetes\n\nList running pods with kubectl get pods.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("git.md"),
        "# Git\n\nCheck the working tree with git status.",
    )
    .unwrap();
    fs::write(docs_dir.join("notes.txt"), "not indexed").unwrap();

    let config_content = format!(
        r#"[docs]
root = "{}/docs"

[index]
dir = "{}/vectorstore"

[embedding]
provider = "hashing"

[completion]
provider = "disabled"

[retrieval]
top_k = 2
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("cloudops.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cloudops(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cloudops_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cloudops binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_build_writes_index_files() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cloudops(&config_path, &["build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Indexed 3 chunks from 3 documents"));
    assert!(tmp.path().join("vectorstore/vectors.bin").is_file());
    assert!(tmp.path().join("vectorstore/chunks.json").is_file());
}

#[test]
fn test_build_is_repeatable() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_cloudops(&config_path, &["build"]);
    assert!(success1, "First build failed");

    let (stdout, stderr, success2) = run_cloudops(&config_path, &["build"]);
    assert!(success2, "Second build failed: {}", stderr);
    assert!(stdout.contains("changed: 0"));
}

#[test]
fn test_query_ranks_matching_doc_first() {
    let (_tmp, config_path) = setup_test_env();
    run_cloudops(&config_path, &["build"]);

    let (stdout, stderr, success) =
        run_cloudops(&config_path, &["query", "how do I list kubernetes pods"]);
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Sources:"));

    let first = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("1."))
        .expect("no ranked sources");
    assert!(first.contains("kubernetes.md"), "top source was: {}", first);
    assert!(!stdout.contains("  3."), "top_k = 2 was not honoured");
}

#[test]
fn test_query_top_k_flag() {
    let (_tmp, config_path) = setup_test_env();
    run_cloudops(&config_path, &["build"]);

    let (stdout, _, success) =
        run_cloudops(&config_path, &["query", "git status", "--top-k", "1"]);
    assert!(success);
    assert!(stdout.contains("1. ["));
    assert!(!stdout.contains("2. ["));
    assert!(stdout.contains("git.md"));
}

#[test]
fn test_query_before_build_reports_empty_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cloudops(&config_path, &["query", "anything"]);
    assert!(success, "query failed: {}", stderr);
    assert!(stdout.contains("No documents are indexed yet"));
    assert!(!stdout.contains("Sources:"));
}

#[test]
fn test_query_empty_question_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_cloudops(&config_path, &["build"]);

    let (_, stderr, success) = run_cloudops(&config_path, &["query", "   "]);
    assert!(!success);
    assert!(stderr.contains("empty"));
}

#[test]
fn test_build_missing_docs_dir_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("docs")).unwrap();

    let (_, _, success) = run_cloudops(&config_path, &["build"]);
    assert!(!success);
    assert!(!tmp.path().join("vectorstore/vectors.bin").exists());
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, _, success) = run_cloudops(&tmp.path().join("nope.toml"), &["build"]);
    assert!(!success);
}
