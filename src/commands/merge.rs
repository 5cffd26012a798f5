use anyhow::Result;
use std::path::PathBuf;

use crate::archive::audit::{AuditLog, AuditStatus};
use crate::archive::lock::ArchiveLock;
use crate::archive::paths::resolve_paths;
use crate::archive::pipeline::{lock_path, merge_trees};
use crate::archive::store::DiskStore;
use crate::commands::{CommandReport, report_reconcile};

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub archive: PathBuf,
    pub snapshot: PathBuf,
    pub update_watermark: bool,
}

pub fn run(opts: &MergeOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let audit = AuditLog::new(&paths.logs_dir);
    let mut report = CommandReport::new("merge");
    report.detail(format!("archive={}", opts.archive.display()));
    report.detail(format!("snapshot={}", opts.snapshot.display()));

    let lock = ArchiveLock::acquire(&lock_path(&opts.archive)?)?;
    report.detail(format!("lock={}", lock.path().display()));
    let outcome = merge_trees(
        &DiskStore,
        &opts.archive,
        &opts.snapshot,
        opts.update_watermark,
    )?;

    report_reconcile(&mut report, &outcome.reconcile);
    if let Some(watermark) = outcome.watermark {
        report.detail(format!("watermark={watermark}"));
    }

    let status = if report.ok {
        AuditStatus::Ok
    } else {
        AuditStatus::Degraded
    };
    audit.record(
        "merge",
        status,
        &format!(
            "snapshot={} consumed={}",
            opts.snapshot.display(),
            outcome.reconcile.consumed
        ),
    )?;
    Ok(report)
}
