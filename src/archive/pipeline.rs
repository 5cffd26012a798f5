use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::audit::{AuditLog, AuditStatus};
use crate::archive::download::{
    Conversation, ConversationDownload, RosterSource, SnapshotDownloader, write_rosters,
};
use crate::archive::fetch::{HistorySource, PaginatedFetcher};
use crate::archive::lock::ArchiveLock;
use crate::archive::package::{PackageOutcome, package_tree};
use crate::archive::partition::ConversationKind;
use crate::archive::paths::TeamLayout;
use crate::archive::reconcile::{ReconcileOutcome, reconcile};
use crate::archive::store::TreeStore;
use crate::archive::watermark::{latest_date, starting_watermark, write_watermark};

#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub page_size: u32,
    pub delay: Duration,
    pub include_direct_messages: bool,
    pub package_zip: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RosterCounts {
    pub users: usize,
    pub channels: usize,
    pub groups: usize,
    pub ims: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub domain: String,
    pub archive_root: PathBuf,
    pub snapshot_root: PathBuf,
    pub watermark_before: f64,
    pub rosters: RosterCounts,
    pub downloads: Vec<ConversationDownload>,
    pub merge: MergeOutcome,
    pub package: Option<PackageOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub reconcile: ReconcileOutcome,
    /// Watermark persisted after the merge, when requested.
    pub watermark: Option<f64>,
}

/// Lock file guarding an archive root: `<root>.lock` next to it.
pub fn lock_path(archive_root: &Path) -> Result<PathBuf> {
    let Some(name) = archive_root.file_name() else {
        anyhow::bail!(
            "archive path {} has no directory name to lock",
            archive_root.display()
        );
    };
    let mut lock_name = name.to_owned();
    lock_name.push(".lock");
    Ok(archive_root.with_file_name(lock_name))
}

/// Reconciles `snapshot_root` into `archive_root` and, on success, records
/// the newest archived day as the next watermark.
pub fn merge_trees(
    store: &dyn TreeStore,
    archive_root: &Path,
    snapshot_root: &Path,
    update_watermark: bool,
) -> Result<MergeOutcome> {
    let reconcile = reconcile(store, archive_root, snapshot_root).with_context(|| {
        format!(
            "failed to reconcile {} into {}",
            snapshot_root.display(),
            archive_root.display()
        )
    })?;

    let watermark = if update_watermark && store.is_dir(archive_root) {
        let latest = latest_date(store, archive_root);
        write_watermark(store, archive_root, latest)?;
        Some(latest)
    } else {
        None
    };
    Ok(MergeOutcome {
        reconcile,
        watermark,
    })
}

fn phase<T>(audit: &AuditLog, name: &str, result: Result<T>, summary: impl Fn(&T) -> String) -> Result<T> {
    match &result {
        Ok(value) => audit.record(name, AuditStatus::Ok, &summary(value))?,
        Err(err) => audit.record(name, AuditStatus::Failed, &format!("{err:#}"))?,
    }
    result
}

/// One full archive cycle: rosters, history download into a dated snapshot,
/// reconcile into the archive, watermark, then packaging when data changed.
pub fn run_cycle<S>(
    store: &dyn TreeStore,
    source: &S,
    workspace_dir: &Path,
    stamp: &str,
    settings: RunSettings,
    audit: &AuditLog,
) -> Result<RunOutcome>
where
    S: RosterSource + HistorySource,
{
    let domain = phase(audit, "team", source.team_domain(), |d| format!("domain={d}"))?;
    let layout = TeamLayout::new(workspace_dir, &domain, stamp);
    let _lock = ArchiveLock::acquire(&layout.lock_file)?;

    let watermark_before = starting_watermark(store, &layout.archive_root);

    let rosters = phase(
        audit,
        "rosters",
        write_rosters(
            store,
            source,
            &layout.snapshot_root,
            settings.include_direct_messages,
            settings.delay,
        ),
        |r| {
            format!(
                "users={} channels={} groups={} ims={}",
                r.users,
                r.channels.len(),
                r.groups.len(),
                r.ims.len()
            )
        },
    )?;

    let mut conversations = Conversation::from_records(&rosters.channels, ConversationKind::Channel);
    conversations.extend(Conversation::from_records(&rosters.groups, ConversationKind::Group));
    conversations.extend(Conversation::from_records(&rosters.ims, ConversationKind::Im));

    let downloader = SnapshotDownloader::new(
        PaginatedFetcher::new(settings.page_size, settings.delay),
        settings.delay,
    );
    let downloads = phase(
        audit,
        "download",
        downloader.download(
            store,
            source,
            &conversations,
            &layout.snapshot_root,
            watermark_before,
        ),
        |d| {
            let messages: usize = d.iter().map(|c| c.messages).sum();
            format!("conversations={} messages={messages}", d.len())
        },
    )?;

    let merge = phase(
        audit,
        "reconcile",
        merge_trees(store, &layout.archive_root, &layout.snapshot_root, true),
        |m| {
            format!(
                "merged={} moved={} residue={} watermark={}",
                m.reconcile.files_merged,
                m.reconcile.files_moved,
                m.reconcile.residue.len(),
                m.watermark.unwrap_or_default()
            )
        },
    )?;
    if !merge.reconcile.consumed {
        audit.record(
            "reconcile",
            AuditStatus::Degraded,
            &format!("snapshot kept at {}", layout.snapshot_root.display()),
        )?;
    }

    let package = if settings.package_zip && merge.reconcile.changed() {
        let packaged = phase(
            audit,
            "package",
            package_tree(&layout.archive_root, &layout.package_file),
            |p| format!("entries={} sha256={}", p.entries, p.sha256),
        )?;
        Some(packaged)
    } else {
        None
    };

    Ok(RunOutcome {
        domain,
        archive_root: layout.archive_root,
        snapshot_root: layout.snapshot_root,
        watermark_before,
        rosters: RosterCounts {
            users: rosters.users,
            channels: rosters.channels.len(),
            groups: rosters.groups.len(),
            ims: rosters.ims.len(),
        },
        downloads,
        merge,
        package,
    })
}
