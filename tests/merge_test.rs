use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, body).expect("write");
}

fn records(path: &Path) -> Vec<serde_json::Value> {
    let raw = fs::read_to_string(path).expect("read");
    serde_json::from_str(&raw).expect("json array")
}

fn merge_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("slack-archive");
    cmd.current_dir(home)
        .env("HOME", home)
        .env("SLACK_ARCHIVE_HOME", home.join("state"))
        .env("SLACK_ARCHIVE_CONFIG_PATH", home.join("missing.toml"));
    cmd
}

#[test]
fn merge_absorbs_snapshot_and_persists_watermark() {
    let tmp = tempdir().expect("tempdir");
    let archive = tmp.path().join("acme");
    let snapshot = tmp.path().join("acme-21-04-19");

    write(
        &archive.join("general/2019-04-20.json"),
        r#"[{"ts": "1555786317.1", "text": "first"}]"#,
    );
    write(&archive.join("users.json"), r#"[{"id": "U1", "name": "ada"}]"#);
    write(
        &snapshot.join("general/2019-04-20.json"),
        r#"[{"ts": "1555786318.1", "text": "second"}]"#,
    );
    write(
        &snapshot.join("general/2019-04-21.json"),
        r#"[{"ts": "1555804900.1"}]"#,
    );
    write(
        &snapshot.join("random/2019-04-20.json"),
        r#"[{"ts": "1555786400.1"}]"#,
    );
    write(
        &snapshot.join("users.json"),
        r#"[{"id": "U1", "name": "ada-renamed"}]"#,
    );

    merge_cmd(tmp.path())
        .arg("merge")
        .arg("--archive")
        .arg(&archive)
        .arg("--snapshot")
        .arg(&snapshot)
        .arg("--update-watermark")
        .assert()
        .success()
        .stdout(predicate::str::contains("merge: ok"))
        .stdout(predicate::str::contains("reconcile.consumed=true"));

    assert!(!snapshot.exists());
    let merged = records(&archive.join("general/2019-04-20.json"));
    let texts: Vec<_> = merged.iter().map(|m| m["text"].as_str()).collect();
    assert_eq!(texts, vec![Some("first"), Some("second")]);
    assert!(archive.join("general/2019-04-21.json").is_file());
    assert!(archive.join("random/2019-04-20.json").is_file());

    assert_eq!(records(&archive.join("users.json"))[0]["name"], "ada-renamed");
    assert_eq!(records(&archive.join("users.archive"))[0]["name"], "ada");
    assert_eq!(
        fs::read_to_string(archive.join("last_run.txt")).expect("watermark"),
        "1555804800"
    );
    assert!(
        tmp.path()
            .join("state/logs/audit.log")
            .is_file()
    );
}

#[test]
fn unabsorbed_entries_fail_the_command_and_keep_the_snapshot() {
    let tmp = tempdir().expect("tempdir");
    let archive = tmp.path().join("acme");
    let snapshot = tmp.path().join("acme-21-04-19");
    fs::create_dir_all(archive.join("general")).expect("mkdir");
    write(&snapshot.join("general/nested/2019-04-20.json"), "[]");

    merge_cmd(tmp.path())
        .arg("merge")
        .arg("--archive")
        .arg(&archive)
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .failure()
        .stdout(predicate::str::contains("issue: snapshot entry not absorbed"))
        .stderr(predicate::str::contains("merge finished with 1 issue(s)"));

    assert!(snapshot.join("general/nested/2019-04-20.json").is_file());
    assert!(!archive.join("last_run.txt").exists());
}

#[test]
fn json_flag_renders_the_report() {
    let tmp = tempdir().expect("tempdir");
    let archive = tmp.path().join("acme");
    let snapshot = tmp.path().join("missing-snapshot");

    merge_cmd(tmp.path())
        .arg("--json")
        .arg("merge")
        .arg("--archive")
        .arg(&archive)
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"command\": \"merge\""))
        .stdout(predicate::str::contains("\"ok\": true"));
}

#[test]
fn trailing_separator_keeps_the_lock_outside_the_archive() {
    let tmp = tempdir().expect("tempdir");
    let archive = tmp.path().join("acme");
    let snapshot = tmp.path().join("acme-21-04-19");
    write(&snapshot.join("general/2019-04-20.json"), r#"[{"ts": "1555786317.1"}]"#);

    merge_cmd(tmp.path())
        .arg("merge")
        .arg("--archive")
        .arg(format!("{}/", archive.display()))
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .success();

    assert!(tmp.path().join("acme.lock").is_file());
    assert!(!archive.join(".lock").exists());
    assert!(archive.join("general/2019-04-20.json").is_file());
}
