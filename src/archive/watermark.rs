use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::archive::store::{NodeKind, TreeStore};
use crate::archive::timestamp::{date_from_name, epoch_of_date};

pub const WATERMARK_FILE: &str = "last_run.txt";

pub fn watermark_path(archive_root: &Path) -> PathBuf {
    archive_root.join(WATERMARK_FILE)
}

/// Epoch seconds of the newest `YYYY-MM-DD` file anywhere under `root`.
/// Unreadable or missing directories contribute nothing; an empty tree
/// yields 0.
pub fn latest_date(store: &dyn TreeStore, root: &Path) -> f64 {
    let Ok(names) = store.list(root) else {
        return 0.0;
    };

    let mut most_recent = 0.0_f64;
    for name in names {
        let path = root.join(&name);
        match store.kind(&path) {
            Some(NodeKind::Dir) => most_recent = most_recent.max(latest_date(store, &path)),
            Some(NodeKind::File) => {
                if let Some(day) = date_from_name(&name) {
                    most_recent = most_recent.max(epoch_of_date(day));
                }
            }
            None => {}
        }
    }
    most_recent
}

/// Watermark persisted by the previous run, if any and if parseable.
pub fn read_watermark(store: &dyn TreeStore, archive_root: &Path) -> Option<f64> {
    let raw = store.read(&watermark_path(archive_root)).ok()?;
    let text = String::from_utf8(raw).ok()?;
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Watermark to fetch from: the persisted one, else the newest day file in
/// the archive (0 for a fresh archive).
pub fn starting_watermark(store: &dyn TreeStore, archive_root: &Path) -> f64 {
    read_watermark(store, archive_root).unwrap_or_else(|| latest_date(store, archive_root))
}

pub fn write_watermark(store: &dyn TreeStore, archive_root: &Path, watermark: f64) -> Result<()> {
    let path = watermark_path(archive_root);
    store
        .write(&path, watermark.to_string().as_bytes())
        .with_context(|| format!("failed to persist watermark {}", path.display()))
}
