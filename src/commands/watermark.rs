use anyhow::Result;
use std::path::Path;

use crate::archive::store::DiskStore;
use crate::archive::watermark::{WATERMARK_FILE, latest_date, read_watermark};
use crate::commands::CommandReport;

pub fn run(dir: &Path) -> Result<CommandReport> {
    let mut report = CommandReport::new("watermark");
    report.detail(format!("dir={}", dir.display()));
    if !dir.is_dir() {
        report.issue(format!("not a directory: {}", dir.display()));
        return Ok(report);
    }

    let latest = latest_date(&DiskStore, dir);
    report.detail(format!("latest_date={latest}"));
    match read_watermark(&DiskStore, dir) {
        Some(persisted) => report.detail(format!("{WATERMARK_FILE}={persisted}")),
        None => report.detail(format!("{WATERMARK_FILE}=absent")),
    }
    Ok(report)
}
