use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::archive::store::{TreeStore, load_records, write_records};
use crate::archive::timestamp::{MergeKey, day_file_name, day_of, ts_str};
use crate::error::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKind {
    Channel,
    Group,
    Im,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Group => "group",
            Self::Im => "im",
        }
    }

    /// `subtype` value of the rename event, if this kind can be renamed.
    pub fn rename_subtype(self) -> Option<String> {
        match self {
            Self::Im => None,
            other => Some(format!("{}_name", other.as_str())),
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayBucket {
    pub path: PathBuf,
    pub day: NaiveDate,
    pub messages: Vec<Value>,
}

impl DayBucket {
    pub fn file_path(&self) -> PathBuf {
        self.path.join(day_file_name(self.day))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Day files this stream flushed into `from`; nothing else there moves.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionState {
    pub current_path: PathBuf,
    pub current_day: Option<NaiveDate>,
    pub pending: Vec<Value>,
    /// Day files already flushed under `current_path`.
    pub flushed: Vec<String>,
}

/// Outcome of feeding one message: the next state plus the side effects the
/// caller must apply, flush first.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: PartitionState,
    pub flush: Option<DayBucket>,
    pub rename: Option<Rename>,
}

fn rename_target(
    message: &Value,
    kind: ConversationKind,
    current: &Path,
    flushed: &[String],
) -> Option<Rename> {
    let expected = kind.rename_subtype()?;
    if message.get("subtype").and_then(Value::as_str) != Some(expected.as_str()) {
        return None;
    }
    let old_name = message.get("old_name").and_then(Value::as_str)?;
    let new_name = message
        .get("name")
        .or_else(|| message.get("new_name"))
        .and_then(Value::as_str)?;
    let base = current.parent().unwrap_or_else(|| Path::new(""));
    let from = base.join(old_name);
    let files = if from == current {
        flushed.to_vec()
    } else {
        Vec::new()
    };
    Some(Rename {
        from,
        to: base.join(new_name),
        files,
    })
}

impl PartitionState {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            current_path: destination.into(),
            current_day: None,
            pending: Vec::new(),
            flushed: Vec::new(),
        }
    }

    pub fn advance(self, message: Value, kind: ConversationKind) -> Result<Transition> {
        let ts = ts_str(&message).ok_or(ArchiveError::MissingTimestamp)?;
        let day = day_of(ts)?;
        let Self {
            mut current_path,
            current_day,
            mut pending,
            mut flushed,
        } = self;

        let mut flush = None;
        if current_day != Some(day) {
            if let Some(previous) = current_day {
                let name = day_file_name(previous);
                if !flushed.contains(&name) {
                    flushed.push(name);
                }
                flush = Some(DayBucket {
                    path: current_path.clone(),
                    day: previous,
                    messages: std::mem::take(&mut pending),
                });
            }
            pending.clear();
        }

        let rename = rename_target(&message, kind, &current_path, &flushed);
        if let Some(rename) = &rename {
            current_path = rename.to.clone();
            flushed = rename.files.clone();
        }
        pending.push(message);

        Ok(Transition {
            state: Self {
                current_path,
                current_day: Some(day),
                pending,
                flushed,
            },
            flush,
            rename,
        })
    }

    /// Final bucket, if any message was ever accumulated.
    pub fn finish(self) -> Option<DayBucket> {
        let day = self.current_day?;
        Some(DayBucket {
            path: self.current_path,
            day,
            messages: self.pending,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSummary {
    pub files_written: usize,
    pub renames: Vec<Rename>,
    pub final_path: Option<PathBuf>,
}

/// Writes `incoming` to a day file, folding in whatever the file already
/// holds. Records already present are not repeated; when every record has a
/// usable `ts` the result is ordered by it.
pub fn merge_day_records(store: &dyn TreeStore, path: &Path, incoming: Vec<Value>) -> Result<()> {
    if !store.is_file(path) {
        return write_records(store, path, &incoming);
    }
    let mut records = load_records(store, path);
    for record in incoming {
        if !records.contains(&record) {
            records.push(record);
        }
    }
    let keys: Option<Vec<MergeKey>> = records.iter().map(MergeKey::of).collect();
    if let Some(keys) = keys {
        let mut keyed: Vec<_> = keys.into_iter().zip(records).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        records = keyed.into_iter().map(|(_, record)| record).collect();
    }
    write_records(store, path, &records)
}

fn write_bucket(store: &dyn TreeStore, bucket: &DayBucket) -> Result<()> {
    store.create_dir_all(&bucket.path)?;
    merge_day_records(store, &bucket.file_path(), bucket.messages.clone())
        .with_context(|| format!("failed to write day file {}", bucket.file_path().display()))
}

/// Moves the day files this stream already flushed next to the new name.
/// Files it did not write stay where they are; a same-named file at the
/// destination is merged, never replaced.
pub fn apply_rename(store: &dyn TreeStore, rename: &Rename) -> Result<()> {
    if rename.from == rename.to || !store.is_dir(&rename.from) {
        return Ok(());
    }
    store.create_dir_all(&rename.to)?;
    for name in &rename.files {
        let source = rename.from.join(name);
        if !store.is_file(&source) {
            continue;
        }
        let target = rename.to.join(name);
        if store.is_file(&target) {
            merge_day_records(store, &target, load_records(store, &source))?;
            store.remove_file(&source)?;
        } else {
            store
                .rename(&source, &target)
                .with_context(|| format!("failed to move {}", source.display()))?;
        }
    }
    if store.list(&rename.from)?.is_empty() {
        store.remove_dir(&rename.from)?;
    }
    Ok(())
}

/// Splits a fetched message stream into `YYYY-MM-DD.json` files under
/// `destination`, following rename events to the new directory.
pub fn partition(
    store: &dyn TreeStore,
    messages: Vec<Value>,
    destination: &Path,
    kind: ConversationKind,
) -> Result<PartitionSummary> {
    let mut summary = PartitionSummary::default();
    let mut state = PartitionState::new(destination);

    for message in messages {
        let step = state.advance(message, kind)?;
        if let Some(bucket) = &step.flush {
            write_bucket(store, bucket)?;
            summary.files_written += 1;
        }
        if let Some(rename) = step.rename {
            apply_rename(store, &rename)?;
            summary.renames.push(rename);
        }
        state = step.state;
    }

    if let Some(bucket) = state.finish() {
        write_bucket(store, &bucket)?;
        summary.files_written += 1;
        summary.final_path = Some(bucket.path);
    }
    Ok(summary)
}
