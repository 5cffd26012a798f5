use anyhow::Result;
use std::fs;

use crate::archive::audit::AuditLog;
use crate::archive::config::{load_config, resolve_config_path};
use crate::archive::paths::resolve_paths;
use crate::archive::store::DiskStore;
use crate::archive::watermark::read_watermark;
use crate::commands::CommandReport;
use crate::commands::run::workspace_dir;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("key_file={}", paths.key_file.display()));
    if let Some(config_path) = resolve_config_path() {
        report.detail(format!(
            "config={} present={}",
            config_path.display(),
            config_path.exists()
        ));
    }

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            report.issue(format!("{err:#}"));
            return Ok(report);
        }
    };
    let workspace = workspace_dir(&cfg, &paths);
    report.detail(format!("workspace_dir={}", workspace.display()));
    report.detail(format!(
        "include_direct_messages={}",
        cfg.archive.include_direct_messages
    ));

    if cfg.plain_token.is_none() && cfg.slack.api_token.is_none() {
        report.issue("no api token configured");
    } else if cfg.plain_token.is_none() && !paths.key_file.is_file() {
        report.issue(format!(
            "encrypted token configured but key file {} is missing",
            paths.key_file.display()
        ));
    }

    if let Ok(entries) = fs::read_dir(&workspace) {
        let mut archives: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        archives.sort();
        for archive in archives {
            let watermark = read_watermark(&DiskStore, &archive)
                .map(|w| w.to_string())
                .unwrap_or_else(|| "absent".to_string());
            report.detail(format!(
                "archive {} last_run={watermark}",
                archive.display()
            ));
        }
    }

    for event in AuditLog::new(&paths.logs_dir).recent(5)? {
        report.detail(format!(
            "audit {} {} {:?} {}",
            event.at_epoch_secs, event.phase, event.status, event.message
        ));
    }
    Ok(report)
}
