use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::archive::audit::AuditLog;
use crate::archive::config::{ArchiveConfig, load_config};
use crate::archive::paths::{ArchivePaths, resolve_paths};
use crate::archive::pipeline::{RunSettings, run_cycle};
use crate::archive::store::DiskStore;
use crate::archive::token::TokenCipher;
use crate::archive::util::run_stamp;
use crate::commands::{CommandReport, report_reconcile};
use crate::slack::SlackClient;

/// Plaintext env token first, else the configured ciphertext under the key file.
fn resolve_token(cfg: &ArchiveConfig, paths: &ArchivePaths) -> Result<Option<String>> {
    if let Some(plain) = &cfg.plain_token {
        return Ok(Some(plain.clone()));
    }
    let Some(sealed) = &cfg.slack.api_token else {
        return Ok(None);
    };
    let cipher = TokenCipher::from_key_file(&paths.key_file)?;
    cipher
        .decrypt(sealed)
        .map(Some)
        .context("failed to decrypt slack.api_token")
}

pub fn workspace_dir(cfg: &ArchiveConfig, paths: &ArchivePaths) -> PathBuf {
    cfg.archive
        .workspace_dir
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.workspace_dir.clone())
}

/// Describes the fetch window; the newest archived day is always re-read.
pub fn watermark_note(watermark: f64) -> String {
    if watermark <= 0.0 {
        return "watermark.before=0 (fetching full history)".to_string();
    }
    format!(
        "watermark.before={watermark} (newest archived day fetched again; repeated messages are kept)"
    )
}

pub fn run() -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("run");

    let Some(token) = resolve_token(&cfg, &paths)? else {
        report.issue("no api token: set SLACK_ARCHIVE_API_TOKEN or slack.api_token");
        return Ok(report);
    };
    let client = SlackClient::new(
        &cfg.slack.api_base_url,
        &token,
        std::time::Duration::from_secs(cfg.slack.request_timeout_secs),
    )?;
    let settings = RunSettings {
        page_size: cfg.slack.page_size,
        delay: cfg.pacing.delay(),
        include_direct_messages: cfg.archive.include_direct_messages,
        package_zip: cfg.archive.package_zip,
    };
    let workspace = workspace_dir(&cfg, &paths);
    let audit = AuditLog::new(&paths.logs_dir);

    let outcome = run_cycle(
        &DiskStore,
        &client,
        &workspace,
        &run_stamp(),
        settings,
        &audit,
    )?;

    report.detail(format!("domain={}", outcome.domain));
    report.detail(format!("archive={}", outcome.archive_root.display()));
    report.detail(format!("snapshot={}", outcome.snapshot_root.display()));
    report.detail(watermark_note(outcome.watermark_before));
    report.detail(format!(
        "rosters users={} channels={} groups={} ims={}",
        outcome.rosters.users,
        outcome.rosters.channels,
        outcome.rosters.groups,
        outcome.rosters.ims
    ));
    for download in &outcome.downloads {
        let renamed = download
            .renamed_to
            .as_deref()
            .map(|name| format!(" renamed_to={name}"))
            .unwrap_or_default();
        report.detail(format!(
            "download {} {} messages={} files={}{renamed}",
            download.kind, download.name, download.messages, download.files_written
        ));
    }
    report_reconcile(&mut report, &outcome.merge.reconcile);
    if let Some(watermark) = outcome.merge.watermark {
        report.detail(format!("watermark.after={watermark}"));
    }
    match &outcome.package {
        Some(package) => {
            report.detail(format!("package={}", package.path.display()));
            report.detail(format!("package.entries={}", package.entries));
            report.detail(format!("package.sha256={}", package.sha256));
        }
        None => report.detail("package=skipped"),
    }
    Ok(report)
}
