use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn isolated(home: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("slack-archive");
    cmd.current_dir(home)
        .env("HOME", home)
        .env("SLACK_ARCHIVE_HOME", home.join("state"))
        .env("SLACK_ARCHIVE_CONFIG_PATH", home.join("config.toml"))
        .env_remove("SLACK_ARCHIVE_API_TOKEN")
        .env_remove("SLACK_ARCHIVE_ENCRYPTED_TOKEN")
        .env_remove("SLACK_ARCHIVE_WORKSPACE_DIR");
    cmd
}

#[test]
fn status_without_token_is_an_issue() {
    let tmp = tempdir().expect("tempdir");

    isolated(tmp.path())
        .arg("status")
        .assert()
        .failure()
        .stdout(predicate::str::contains("no api token configured"));
}

#[test]
fn status_lists_archives_and_their_watermarks() {
    let tmp = tempdir().expect("tempdir");
    let archive = tmp.path().join("state/archives/acme");
    fs::create_dir_all(&archive).expect("mkdir");
    fs::write(archive.join("last_run.txt"), "1555718400").expect("write");

    isolated(tmp.path())
        .env("SLACK_ARCHIVE_API_TOKEN", "xoxp-test")
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("last_run=1555718400"));
}

#[test]
fn run_without_token_stops_before_any_request() {
    let tmp = tempdir().expect("tempdir");

    isolated(tmp.path())
        .arg("run")
        .assert()
        .failure()
        .stdout(predicate::str::contains("no api token"));
}

#[test]
fn invalid_config_file_is_reported() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("config.toml"), "[slack]\npage_size = 0\n").expect("write");

    isolated(tmp.path())
        .env("SLACK_ARCHIVE_API_TOKEN", "xoxp-test")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file invalid"));
}

#[test]
fn run_help_explains_the_refetched_day() {
    let tmp = tempdir().expect("tempdir");

    isolated(tmp.path())
        .arg("run")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetched again"));
}
