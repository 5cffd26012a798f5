use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::archive::fetch::{HistorySource, PaginatedFetcher};
use crate::archive::partition::{ConversationKind, partition};
use crate::archive::store::{TreeStore, write_records};

/// Roster listings of the workspace, in wire form.
pub trait RosterSource {
    fn team_domain(&self) -> Result<String>;
    fn list_users(&self) -> Result<Vec<Value>>;
    fn list_channels(&self) -> Result<Vec<Value>>;
    fn list_groups(&self) -> Result<Vec<Value>>;
    fn list_ims(&self) -> Result<Vec<Value>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    /// Directory name inside the snapshot.
    pub name: String,
    pub kind: ConversationKind,
}

fn record_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl Conversation {
    /// Channels and groups are stored under their name, IMs under the peer
    /// user id. Records without an id cannot be fetched and are skipped.
    pub fn from_record(record: &Value, kind: ConversationKind) -> Option<Self> {
        let id = record_str(record, "id")?;
        let name = match kind {
            ConversationKind::Im => record_str(record, "user"),
            _ => record_str(record, "name"),
        }
        .unwrap_or(id);
        Some(Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
        })
    }

    pub fn from_records(records: &[Value], kind: ConversationKind) -> Vec<Self> {
        records
            .iter()
            .filter_map(|record| Self::from_record(record, kind))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RosterSnapshot {
    pub users: usize,
    pub channels: Vec<Value>,
    pub groups: Vec<Value>,
    pub ims: Vec<Value>,
}

/// Lists every roster and writes `users.json`, `channels.json`,
/// `groups.json` (and `ims.json` when requested) into the snapshot root.
pub fn write_rosters(
    store: &dyn TreeStore,
    source: &dyn RosterSource,
    snapshot_root: &Path,
    include_ims: bool,
    delay: Duration,
) -> Result<RosterSnapshot> {
    store.create_dir_all(snapshot_root)?;

    let users = source.list_users().context("failed to list users")?;
    write_records(store, &snapshot_root.join("users.json"), &users)?;
    thread::sleep(delay);

    let channels = source.list_channels().context("failed to list channels")?;
    write_records(store, &snapshot_root.join("channels.json"), &channels)?;
    thread::sleep(delay);

    let groups = source.list_groups().context("failed to list groups")?;
    write_records(store, &snapshot_root.join("groups.json"), &groups)?;
    thread::sleep(delay);

    let ims = if include_ims {
        let ims = source.list_ims().context("failed to list direct messages")?;
        write_records(store, &snapshot_root.join("ims.json"), &ims)?;
        thread::sleep(delay);
        ims
    } else {
        Vec::new()
    };

    Ok(RosterSnapshot {
        users: users.len(),
        channels,
        groups,
        ims,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDownload {
    pub name: String,
    pub kind: String,
    pub messages: usize,
    pub files_written: usize,
    pub renamed_to: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotDownloader {
    pub fetcher: PaginatedFetcher,
    pub delay: Duration,
}

impl SnapshotDownloader {
    pub fn new(fetcher: PaginatedFetcher, delay: Duration) -> Self {
        Self { fetcher, delay }
    }

    /// Fetches and partitions each conversation in turn. A failure stops the
    /// loop; conversations already written stay on disk.
    pub fn download(
        &self,
        store: &dyn TreeStore,
        source: &dyn HistorySource,
        conversations: &[Conversation],
        snapshot_root: &Path,
        watermark: f64,
    ) -> Result<Vec<ConversationDownload>> {
        let mut out = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let destination = snapshot_root.join(&conversation.name);
            store.create_dir_all(&destination)?;

            let messages = self
                .fetcher
                .fetch(source, conversation.kind, &conversation.id, watermark)?;
            let count = messages.len();
            let summary = partition(store, messages, &destination, conversation.kind)
                .with_context(|| format!("failed to partition {}", conversation.name))?;

            let renamed_to = summary
                .final_path
                .filter(|path| *path != destination)
                .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()));
            out.push(ConversationDownload {
                name: conversation.name.clone(),
                kind: conversation.kind.to_string(),
                messages: count,
                files_written: summary.files_written,
                renamed_to,
            });
            thread::sleep(self.delay);
        }
        Ok(out)
    }
}
