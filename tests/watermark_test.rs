use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn watermark_reports_newest_day_file() {
    let tmp = tempdir().expect("tempdir");
    let archive = tmp.path().join("acme");
    fs::create_dir_all(archive.join("general")).expect("mkdir");
    fs::write(archive.join("general/2019-04-20.json"), "[]").expect("write");
    fs::write(archive.join("users.json"), "[]").expect("write");

    assert_cmd::cargo::cargo_bin_cmd!("slack-archive")
        .current_dir(tmp.path())
        .arg("watermark")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("latest_date=1555718400"))
        .stdout(predicate::str::contains("last_run.txt=absent"));
}

#[test]
fn watermark_of_missing_directory_is_an_issue() {
    let tmp = tempdir().expect("tempdir");

    assert_cmd::cargo::cargo_bin_cmd!("slack-archive")
        .current_dir(tmp.path())
        .arg("watermark")
        .arg(tmp.path().join("nope"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("not a directory"));
}
