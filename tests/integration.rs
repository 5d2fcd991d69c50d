use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn xproject_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("xproject");
    path
}

fn setup_test_env(layout: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let input_dir = root.join("projects/acme/input");
    fs::create_dir_all(&input_dir).unwrap();
    fs::write(
        input_dir.join("brief.md"),
        "# Portal Brief\n\nThe client wants a self-service portal.\n\nUsers log in with SSO.",
    )
    .unwrap();
    fs::write(
        input_dir.join("notes.txt"),
        "Kickoff notes.\n\nBudget is fixed; delivery in Q3.",
    )
    .unwrap();
    fs::write(
        input_dir.join("backlog.csv"),
        "id,title\nUS-1,Login\nUS-2,Profile page\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[projects]
root = "{}/projects"

[ingest]
input_dirs = ["input", "changes"]
layout = "{}"
threshold_chars = 600000
include_globs = ["**/*"]
exclude_globs = []
"#,
        root.display(),
        layout
    );

    let config_path = config_dir.join("xproject.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_xproject(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = xproject_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run xproject binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn read_manifest(tmp: &TempDir) -> serde_json::Value {
    let path = tmp
        .path()
        .join("projects/acme/output/requirements_manifest.json");
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_init_creates_project_skeleton() {
    let (tmp, config_path) = setup_test_env("per_file");

    let (stdout, stderr, success) = run_xproject(&config_path, &["init", "fresh"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("projects/fresh/input").is_dir());
    assert!(tmp.path().join("projects/fresh/changes").is_dir());
    assert!(tmp.path().join("projects/fresh/output").is_dir());

    let (_, _, again) = run_xproject(&config_path, &["init", "fresh"]);
    assert!(again, "second init failed (not idempotent)");
}

#[test]
fn test_ingest_reports_new_files() {
    let (tmp, config_path) = setup_test_env("per_file");

    let (stdout, stderr, success) = run_xproject(&config_path, &["ingest", "acme"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingest acme"));
    assert!(stdout.contains("new: 3"));
    assert!(stdout.contains("changed: 0"));
    assert!(stdout.contains("removed: 0"));
    assert!(stdout.contains("context strategy: full"));
    assert!(stdout.contains("ok"));

    let manifest = read_manifest(&tmp);
    assert_eq!(manifest["context_strategy"], "full");
    assert_eq!(manifest["layout"], "per_file");
    assert_eq!(manifest["files"].as_object().unwrap().len(), 3);
    assert_eq!(
        manifest["files"]["input/brief.md"]["parsed_file"],
        "input__brief.md.md"
    );
    assert!(tmp
        .path()
        .join("projects/acme/output/requirements_sections/input__backlog.csv.md")
        .is_file());
}

#[test]
fn test_ingest_idempotent() {
    let (tmp, config_path) = setup_test_env("combined");

    let (_, _, first) = run_xproject(&config_path, &["ingest", "acme"]);
    assert!(first, "first ingest failed");
    let corpus = tmp
        .path()
        .join("projects/acme/output/requirements_context.md");
    let before = fs::metadata(&corpus).unwrap().modified().unwrap();

    let (stdout, _, second) = run_xproject(&config_path, &["ingest", "acme"]);
    assert!(second, "second ingest failed");
    assert!(stdout.contains("new: 0"));
    assert!(stdout.contains("changed: 0"));
    assert!(stdout.contains("removed: 0"));
    assert!(stdout.contains("unchanged: 3"));

    let after = fs::metadata(&corpus).unwrap().modified().unwrap();
    assert_eq!(before, after, "an unchanged run must not rewrite the corpus");

    let manifest = read_manifest(&tmp);
    assert!(manifest["summary"]["new_files"].as_array().unwrap().is_empty());
}

#[test]
fn test_ingest_detects_change_and_removal() {
    let (tmp, config_path) = setup_test_env("per_file");
    run_xproject(&config_path, &["ingest", "acme"]);

    let input = tmp.path().join("projects/acme/input");
    fs::write(input.join("notes.txt"), "Kickoff notes, revised after call.").unwrap();
    fs::remove_file(input.join("backlog.csv")).unwrap();

    let (stdout, stderr, success) = run_xproject(&config_path, &["ingest", "acme"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("changed: 1"));
    assert!(stdout.contains("~ input/notes.txt"));
    assert!(stdout.contains("removed: 1"));
    assert!(stdout.contains("- input/backlog.csv"));

    let manifest = read_manifest(&tmp);
    assert!(manifest["files"].get("input/backlog.csv").is_none());
    assert_eq!(manifest["summary"]["changed_files"][0], "input/notes.txt");
    assert!(!tmp
        .path()
        .join("projects/acme/output/requirements_sections/input__backlog.csv.md")
        .exists());
}

#[test]
fn test_change_requests_folder_is_ingested() {
    let (tmp, config_path) = setup_test_env("per_file");
    run_xproject(&config_path, &["ingest", "acme"]);

    let changes = tmp.path().join("projects/acme/changes");
    fs::create_dir_all(&changes).unwrap();
    fs::write(changes.join("CR-001.md"), "# CR-001\n\nAdd MFA to login.").unwrap();

    let (stdout, _, success) = run_xproject(&config_path, &["ingest", "acme"]);
    assert!(success);
    assert!(stdout.contains("+ changes/CR-001.md"));
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env("per_file");

    let (stdout, _, success) = run_xproject(&config_path, &["ingest", "acme", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("new: 3"));
    assert!(!tmp.path().join("projects/acme/output").exists());
}

#[test]
fn test_ingest_json_output() {
    let (_tmp, config_path) = setup_test_env("combined");

    let (stdout, stderr, success) = run_xproject(&config_path, &["ingest", "acme", "--json"]);
    assert!(success, "ingest failed: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["project"], "acme");
    assert_eq!(report["layout"], "combined");
    assert_eq!(report["new_files"].as_array().unwrap().len(), 3);
    assert!(report["errors"].as_array().unwrap().is_empty());
}

#[test]
fn test_ingest_exits_nonzero_on_file_error_but_completes() {
    let (tmp, config_path) = setup_test_env("per_file");
    fs::write(
        tmp.path().join("projects/acme/input/broken.pdf"),
        b"not a valid pdf",
    )
    .unwrap();

    let (stdout, _, success) = run_xproject(&config_path, &["ingest", "acme"]);
    assert!(!success, "a failed file must make ingest exit non-zero");
    assert!(stdout.contains("new: 3"));
    assert!(stdout.contains("errors: 1"));
    assert!(stdout.contains("input/broken.pdf"));

    let manifest = read_manifest(&tmp);
    assert_eq!(manifest["files"].as_object().unwrap().len(), 3);
    assert!(manifest["files"].get("input/broken.pdf").is_none());
}

#[test]
fn test_section_reads_one_input() {
    let (_tmp, config_path) = setup_test_env("combined");
    run_xproject(&config_path, &["ingest", "acme"]);

    let (stdout, stderr, success) =
        run_xproject(&config_path, &["section", "acme", "input/backlog.csv"]);
    assert!(success, "section failed: {}", stderr);
    assert_eq!(stdout, "id | title\nUS-1 | Login\nUS-2 | Profile page\n");

    let (_, stderr, success) =
        run_xproject(&config_path, &["section", "acme", "input/missing.txt"]);
    assert!(!success);
    assert!(stderr.contains("no section for 'input/missing.txt'"));
}

#[test]
fn test_status_shows_staleness() {
    let (tmp, config_path) = setup_test_env("per_file");

    let (stdout, _, success) = run_xproject(&config_path, &["status", "acme"]);
    assert!(success);
    assert!(stdout.contains("uninitialized"));
    assert!(stdout.contains("Pending:"));

    run_xproject(&config_path, &["ingest", "acme"]);
    let (stdout, _, _) = run_xproject(&config_path, &["status", "acme"]);
    assert!(stdout.contains("Up to date."));
    assert!(stdout.contains("input__brief.md.md"));

    fs::write(
        tmp.path().join("projects/acme/input/brief.md"),
        "# Portal Brief\n\nScope grew.",
    )
    .unwrap();
    let (stdout, _, _) = run_xproject(&config_path, &["status", "acme", "--json"]);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["up_to_date"], false);
    assert_eq!(status["pending"]["changed_files"][0], "input/brief.md");
}

#[test]
fn test_corrupt_manifest_is_fatal() {
    let (tmp, config_path) = setup_test_env("per_file");
    let output = tmp.path().join("projects/acme/output");
    fs::create_dir_all(&output).unwrap();
    fs::write(output.join("requirements_manifest.json"), "{ truncated").unwrap();

    let (_, stderr, success) = run_xproject(&config_path, &["ingest", "acme"]);
    assert!(!success);
    assert!(stderr.contains("is corrupt"), "stderr: {}", stderr);
    assert_eq!(
        fs::read_to_string(output.join("requirements_manifest.json")).unwrap(),
        "{ truncated"
    );
}

#[test]
fn test_event_log_records_each_run() {
    let (tmp, config_path) = setup_test_env("per_file");
    run_xproject(&config_path, &["ingest", "acme"]);
    run_xproject(&config_path, &["ingest", "acme"]);

    let raw = fs::read_to_string(tmp.path().join("projects/acme/output/events.json")).unwrap();
    let events: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "files_ingested");
    assert_eq!(events[0]["data"]["new"], 3);
    assert_eq!(events[1]["data"]["new"], 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, config_path) = setup_test_env("per_file");
    fs::write(
        &config_path,
        format!(
            "[projects]\nroot = \"{}/projects\"\n\n[ingest]\nthreshold_chars = 0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_xproject(&config_path, &["ingest", "acme"]);
    assert!(!success);
    assert!(stderr.contains("threshold_chars"));
}
