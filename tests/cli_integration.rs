use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn run_requires_a_prompt() {
    let mut cmd = Command::cargo_bin("overseer").unwrap();
    cmd.arg("run").arg("--reviewer").arg("claude");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--prompt or --prompt-file"));
}

#[test]
fn run_requires_a_reviewer_or_command() {
    let mut cmd = Command::cargo_bin("overseer").unwrap();
    cmd.arg("run").arg("--prompt").arg("hello");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--reviewer or --cmd"));
}

#[test]
fn run_rejects_unknown_presets() {
    let mut cmd = Command::cargo_bin("overseer").unwrap();
    cmd.arg("run")
        .arg("--reviewer")
        .arg("unknown-preset")
        .arg("--prompt")
        .arg("hello");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unknown preset 'unknown-preset'"));
}

#[test]
fn run_with_custom_command_round_trips_the_prompt() {
    let mut cmd = Command::cargo_bin("overseer").unwrap();
    cmd.arg("run")
        .arg("--cmd")
        .arg("cat")
        .arg("--name")
        .arg("Echo")
        .arg("--prompt")
        .arg("say hello")
        .arg("--timeout")
        .arg("30")
        .arg("--heartbeat-secs")
        .arg("0");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("say hello"));
}

#[test]
fn run_reads_prompt_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let prompt_file = dir.path().join("prompt.md");
    std::fs::write(&prompt_file, "prompt from file").unwrap();

    let mut cmd = Command::cargo_bin("overseer").unwrap();
    cmd.arg("run")
        .arg("--cmd")
        .arg("cat")
        .arg("--name")
        .arg("Echo")
        .arg("--prompt-file")
        .arg(&prompt_file)
        .arg("--heartbeat-secs")
        .arg("0");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("prompt from file"));
}

#[test]
fn review_requires_an_existing_document() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("overseer").unwrap();
    cmd.current_dir(dir.path())
        .arg("review")
        .arg("definitely-missing.md")
        .arg("--reviewer")
        .arg("claude");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("document not found"));
}

#[test]
fn review_rejects_unpaired_custom_reviewers() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("doc.md");
    std::fs::write(&doc, "# doc\n").unwrap();

    let mut cmd = Command::cargo_bin("overseer").unwrap();
    cmd.current_dir(dir.path())
        .arg("review")
        .arg("doc.md")
        .arg("--reviewer-cmd")
        .arg("my-tool review");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("same number"));
}

#[test]
fn schema_prints_the_config_schema() {
    let mut cmd = Command::cargo_bin("overseer").unwrap();
    cmd.arg("schema");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("comments_dir"))
        .stdout(predicate::str::contains("rate_limit_fallback"));
}

#[test]
fn init_writes_a_starter_config() {
    let dir = tempfile::tempdir().unwrap();

    let mut cmd = Command::cargo_bin("overseer").unwrap();
    cmd.current_dir(dir.path()).arg("init");
    cmd.assert().success();

    let raw = std::fs::read_to_string(dir.path().join(".overseer.toml")).unwrap();
    assert!(raw.contains("[review]"));
    assert!(raw.contains("# Overseer project configuration"));

    // A second init refuses to clobber without --force
    let mut again = Command::cargo_bin("overseer").unwrap();
    again.current_dir(dir.path()).arg("init");
    again
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}
