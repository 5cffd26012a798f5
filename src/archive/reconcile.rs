use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::archive::store::{NodeKind, TreeStore, load_records, write_records};
use crate::archive::timestamp::MergeKey;
use crate::archive::warn::{self, WarnEvent};

/// Top-level files merged by `id` rather than by timestamp.
pub const ROSTER_FILES: [&str; 4] = ["channels.json", "groups.json", "ims.json", "users.json"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pairing<T> {
    OnlyLeft(T),
    OnlyRight(T),
    Both(T),
}

/// Sorted merge-join of two ascending name lists.
pub fn pair_names<T: Ord>(left: Vec<T>, right: Vec<T>) -> Vec<Pairing<T>> {
    let mut out = Vec::with_capacity(left.len().max(right.len()));
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let order = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l.cmp(r),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        let pairing = match order {
            Ordering::Less => left.next().map(Pairing::OnlyLeft),
            Ordering::Greater => right.next().map(Pairing::OnlyRight),
            Ordering::Equal => {
                right.next();
                left.next().map(Pairing::Both)
            }
        };
        out.extend(pairing);
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimestampMerge {
    pub merged: Vec<Value>,
    /// The pair that stopped the merge when a record had no usable `ts`.
    pub halted_at: Option<(Value, Value)>,
}

/// Two-pointer merge of day files sorted by `ts`. Equal timestamps keep both
/// records, left first. A record without a usable `ts` ends the merge early
/// and only what was merged up to that point is returned.
pub fn merge_by_timestamp(left: Vec<Value>, right: Vec<Value>) -> TimestampMerge {
    if left.is_empty() {
        return TimestampMerge {
            merged: right,
            halted_at: None,
        };
    }
    if right.is_empty() {
        return TimestampMerge {
            merged: left,
            halted_at: None,
        };
    }

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let (Some(lk), Some(rk)) = (MergeKey::of(l), MergeKey::of(r)) else {
            return TimestampMerge {
                halted_at: Some((l.clone(), r.clone())),
                merged,
            };
        };
        match lk.cmp(&rk) {
            Ordering::Equal => {
                merged.extend(left.next());
                merged.extend(right.next());
            }
            Ordering::Greater => merged.extend(right.next()),
            Ordering::Less => merged.extend(left.next()),
        }
    }
    merged.extend(left);
    merged.extend(right);

    TimestampMerge {
        merged,
        halted_at: None,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdMerge {
    pub current: Vec<Value>,
    pub archived: Vec<Value>,
}

fn id_key(record: &Value) -> Option<String> {
    record.get("id").map(Value::to_string)
}

/// Reconciles a roster by `id`, driven by the new list: a changed record
/// replaces its old version, which goes to `archived`. Old records missing
/// from a non-empty new list are retired. An empty new list keeps the old
/// one as is.
pub fn merge_by_id(old: Vec<Value>, new: Vec<Value>) -> IdMerge {
    if new.is_empty() {
        return IdMerge {
            current: old,
            archived: Vec::new(),
        };
    }

    let mut by_id: HashMap<String, &Value> = HashMap::with_capacity(old.len());
    for record in &old {
        if let Some(key) = id_key(record) {
            by_id.entry(key).or_insert(record);
        }
    }

    let mut archived = Vec::new();
    for record in &new {
        if let Some(previous) = id_key(record).and_then(|key| by_id.get(&key))
            && *previous != record
        {
            archived.push((*previous).clone());
        }
    }

    IdMerge {
        current: new,
        archived,
    }
}

pub fn sidecar_name(roster_file: &str) -> String {
    let stem = roster_file.strip_suffix(".json").unwrap_or(roster_file);
    format!("{stem}.archive")
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    /// True iff every snapshot entry was absorbed and the snapshot root removed.
    pub consumed: bool,
    pub residue: Vec<PathBuf>,
    pub rosters_merged: usize,
    pub records_archived: usize,
    pub files_merged: usize,
    pub files_moved: usize,
    pub partial_merges: usize,
    pub channels_added: usize,
}

impl ReconcileOutcome {
    /// Whether any message data reached the archive.
    pub fn changed(&self) -> bool {
        self.files_merged > 0 || self.files_moved > 0
    }
}

fn merge_roster(
    store: &dyn TreeStore,
    archive_root: &Path,
    snapshot_root: &Path,
    name: &str,
    out: &mut ReconcileOutcome,
) -> Result<()> {
    let archive_file = archive_root.join(name);
    let snapshot_file = snapshot_root.join(name);

    let merged = merge_by_id(
        load_records(store, &archive_file),
        load_records(store, &snapshot_file),
    );
    write_records(store, &archive_file, &merged.current)?;
    write_records(store, &archive_root.join(sidecar_name(name)), &merged.archived)?;
    store.remove_file(&snapshot_file)?;

    out.rosters_merged += 1;
    out.records_archived += merged.archived.len();
    Ok(())
}

fn merge_day_file(
    store: &dyn TreeStore,
    archive_file: &Path,
    snapshot_file: &Path,
    out: &mut ReconcileOutcome,
) -> Result<()> {
    let merge = merge_by_timestamp(
        load_records(store, archive_file),
        load_records(store, snapshot_file),
    );
    // A halted merge would drop everything after the offending pair, so both
    // files stay as they are and the snapshot copy is left as residue.
    if let Some((left, right)) = &merge.halted_at {
        warn::emit(WarnEvent {
            code: "MERGE_HALTED",
            stage: "reconcile",
            action: "leave-snapshot-file",
            path: &archive_file.display().to_string(),
            reason: "record-without-ts",
            err: &format!("left={left} right={right} merged_before_halt={}", merge.merged.len()),
        });
        out.partial_merges += 1;
        return Ok(());
    }
    write_records(store, archive_file, &merge.merged)?;
    store.remove_file(snapshot_file)?;
    out.files_merged += 1;
    Ok(())
}

/// Merges one conversation directory present on both sides. Files are
/// merged by timestamp or moved across; anything left behind is residue.
pub fn merge_channel_folder(
    store: &dyn TreeStore,
    archive_dir: &Path,
    snapshot_dir: &Path,
    out: &mut ReconcileOutcome,
) -> Result<()> {
    for name in store.list(snapshot_dir)? {
        let source = snapshot_dir.join(&name);
        let target = archive_dir.join(&name);
        if store.kind(&source) != Some(NodeKind::File) {
            continue;
        }
        match store.kind(&target) {
            Some(NodeKind::File) => merge_day_file(store, &target, &source, out)?,
            None => {
                store
                    .rename(&source, &target)
                    .with_context(|| format!("failed to move {}", source.display()))?;
                out.files_moved += 1;
            }
            Some(NodeKind::Dir) => {}
        }
    }

    let leftover = store.list(snapshot_dir)?;
    if leftover.is_empty() {
        store.remove_dir(snapshot_dir)?;
    } else {
        out.residue
            .extend(leftover.iter().map(|name| snapshot_dir.join(name)));
    }
    Ok(())
}

fn adopt_channel_folder(
    store: &dyn TreeStore,
    archive_dir: &Path,
    snapshot_dir: &Path,
    out: &mut ReconcileOutcome,
) -> Result<()> {
    store.create_dir_all(archive_dir)?;
    for name in store.list(snapshot_dir)? {
        store.rename(&snapshot_dir.join(&name), &archive_dir.join(&name))?;
        out.files_moved += 1;
    }
    store.remove_dir(snapshot_dir)?;
    out.channels_added += 1;
    Ok(())
}

/// Absorbs a freshly downloaded snapshot tree into the archive tree.
///
/// Rosters are merged by id (superseded versions go to `<name>.archive`),
/// conversation directories are merged day file by day file, and new
/// conversations are moved in wholesale. Entries that cannot be absorbed are
/// reported as residue and left in the snapshot, which is then kept; only a
/// fully absorbed snapshot is removed.
pub fn reconcile(
    store: &dyn TreeStore,
    archive_root: &Path,
    snapshot_root: &Path,
) -> Result<ReconcileOutcome> {
    let mut out = ReconcileOutcome::default();
    if store.kind(snapshot_root).is_none() {
        out.consumed = true;
        return Ok(out);
    }
    store.create_dir_all(archive_root)?;

    let pairings = pair_names(store.list(archive_root)?, store.list(snapshot_root)?);
    for pairing in pairings {
        let (name, in_archive) = match pairing {
            Pairing::OnlyLeft(_) => continue,
            Pairing::OnlyRight(name) => (name, false),
            Pairing::Both(name) => (name, true),
        };
        let archive_path = archive_root.join(&name);
        let snapshot_path = snapshot_root.join(&name);
        let snapshot_kind = store.kind(&snapshot_path);

        if ROSTER_FILES.contains(&name.as_str()) && snapshot_kind == Some(NodeKind::File) {
            merge_roster(store, archive_root, snapshot_root, &name, &mut out)?;
            continue;
        }

        match (snapshot_kind, in_archive, store.kind(&archive_path)) {
            (Some(NodeKind::Dir), false, _) => {
                adopt_channel_folder(store, &archive_path, &snapshot_path, &mut out)?
            }
            (Some(NodeKind::Dir), true, Some(NodeKind::Dir)) => {
                merge_channel_folder(store, &archive_path, &snapshot_path, &mut out)?
            }
            (Some(NodeKind::File), false, _) => {
                store.rename(&snapshot_path, &archive_path)?;
                out.files_moved += 1;
            }
            _ => out.residue.push(snapshot_path),
        }
    }

    if store.list(snapshot_root)?.is_empty() && out.residue.is_empty() {
        store.remove_dir_all(snapshot_root)?;
        out.consumed = true;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::store::MemoryStore;
    use serde_json::json;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pair_names_joins_sorted_lists() {
        let got = pair_names(names(&["a", "b", "c"]), names(&["b", "c", "d"]));
        assert_eq!(
            got,
            vec![
                Pairing::OnlyLeft("a".to_string()),
                Pairing::Both("b".to_string()),
                Pairing::Both("c".to_string()),
                Pairing::OnlyRight("d".to_string()),
            ]
        );
    }

    #[test]
    fn pair_names_covers_union_once() {
        let left = names(&["a", "c", "e", "g"]);
        let right = names(&["b", "c", "d", "g", "h"]);
        let got = pair_names(left.clone(), right.clone());

        assert_eq!(got.len(), 7);
        let mut lefts = Vec::new();
        let mut rights = Vec::new();
        for pairing in &got {
            match pairing {
                Pairing::OnlyLeft(n) => lefts.push(n.clone()),
                Pairing::OnlyRight(n) => rights.push(n.clone()),
                Pairing::Both(n) => {
                    lefts.push(n.clone());
                    rights.push(n.clone());
                }
            }
        }
        assert_eq!(lefts, left);
        assert_eq!(rights, right);
        assert!(pair_names(Vec::<String>::new(), Vec::new()).is_empty());
    }

    #[test]
    fn merge_by_timestamp_identity() {
        let x = vec![json!({"ts": "1.0"}), json!({"ts": "2.0"})];
        assert_eq!(merge_by_timestamp(Vec::new(), x.clone()).merged, x);
        assert_eq!(merge_by_timestamp(x.clone(), Vec::new()).merged, x);
    }

    #[test]
    fn merge_by_timestamp_interleaves_and_keeps_ties_left_first() {
        let left = vec![json!({"ts": "1", "side": "l"}), json!({"ts": "3.0"})];
        let right = vec![json!({"ts": "1", "side": "r"}), json!({"ts": "2.0"}), json!({"ts": "4.0"})];

        let got = merge_by_timestamp(left, right);
        assert!(got.halted_at.is_none());
        assert_eq!(
            got.merged,
            vec![
                json!({"ts": "1", "side": "l"}),
                json!({"ts": "1", "side": "r"}),
                json!({"ts": "2.0"}),
                json!({"ts": "3.0"}),
                json!({"ts": "4.0"}),
            ]
        );
    }

    #[test]
    fn merge_by_timestamp_halts_on_missing_ts() {
        let left = vec![json!({"ts": "1.0"}), json!({"text": "no ts"}), json!({"ts": "9.0"})];
        let right = vec![json!({"ts": "2.0"})];

        let got = merge_by_timestamp(left, right);
        assert_eq!(got.merged, vec![json!({"ts": "1.0"})]);
        assert_eq!(
            got.halted_at,
            Some((json!({"text": "no ts"}), json!({"ts": "2.0"})))
        );
    }

    #[test]
    fn merge_by_id_archives_changed_records() {
        let got = merge_by_id(vec![json!({"id": 1, "v": "a"})], vec![json!({"id": 1, "v": "b"})]);
        assert_eq!(got.current, vec![json!({"id": 1, "v": "b"})]);
        assert_eq!(got.archived, vec![json!({"id": 1, "v": "a"})]);
    }

    #[test]
    fn merge_by_id_drops_identical_old_version() {
        let got = merge_by_id(vec![json!({"id": 1, "v": "a"})], vec![json!({"id": 1, "v": "a"})]);
        assert_eq!(got.current, vec![json!({"id": 1, "v": "a"})]);
        assert!(got.archived.is_empty());
    }

    #[test]
    fn merge_by_id_keeps_new_records_and_retires_old_only_ones() {
        let got = merge_by_id(Vec::new(), vec![json!({"id": 2, "v": "c"})]);
        assert_eq!(got.current, vec![json!({"id": 2, "v": "c"})]);
        assert!(got.archived.is_empty());

        let got = merge_by_id(
            vec![json!({"id": 1, "v": "a"}), json!({"id": 3, "v": "z"})],
            vec![json!({"id": 3, "v": "z"})],
        );
        assert_eq!(got.current, vec![json!({"id": 3, "v": "z"})]);
        assert!(got.archived.is_empty());
    }

    #[test]
    fn merge_by_id_keeps_old_list_when_new_is_empty() {
        let old = vec![json!({"id": 1, "v": "a"})];
        let got = merge_by_id(old.clone(), Vec::new());
        assert_eq!(got.current, old);
        assert!(got.archived.is_empty());
    }

    #[test]
    fn sidecar_sits_next_to_roster() {
        assert_eq!(sidecar_name("channels.json"), "channels.archive");
    }

    fn seed(store: &MemoryStore, path: &str, records: Vec<Value>) {
        write_records(store, Path::new(path), &records).expect("seed");
    }

    fn read(store: &MemoryStore, path: &str) -> Vec<Value> {
        load_records(store, Path::new(path))
    }

    fn populated() -> MemoryStore {
        let store = MemoryStore::new();
        seed(&store, "/archive/users.json", vec![json!({"id": "U1", "name": "ada"})]);
        seed(&store, "/archive/channels.json", vec![json!({"id": "C1", "name": "general"})]);
        seed(&store, "/archive/general/2019-04-20.json", vec![json!({"ts": "1555786317.1"}), json!({"ts": "1555786400.1"})]);
        seed(&store, "/archive/quiet/2019-01-01.json", vec![json!({"ts": "1546300800.0"})]);
        store.write(Path::new("/archive/last_run.txt"), b"1555718400").expect("seed");

        seed(&store, "/snap/users.json", vec![json!({"id": "U1", "name": "ada lovelace"}), json!({"id": "U2", "name": "bob"})]);
        seed(&store, "/snap/channels.json", vec![json!({"id": "C1", "name": "general"})]);
        seed(&store, "/snap/general/2019-04-20.json", vec![json!({"ts": "1555786350.1"})]);
        seed(&store, "/snap/general/2019-04-21.json", vec![json!({"ts": "1555880000.1"})]);
        seed(&store, "/snap/new-chan/2019-04-21.json", vec![json!({"ts": "1555880001.1"})]);
        store
    }

    #[test]
    fn reconcile_absorbs_snapshot_into_archive() {
        let store = populated();
        let out = reconcile(&store, Path::new("/archive"), Path::new("/snap")).expect("reconcile");

        assert!(out.consumed);
        assert!(out.residue.is_empty());
        assert!(out.changed());
        assert!(store.kind(Path::new("/snap")).is_none());

        assert_eq!(
            read(&store, "/archive/users.json"),
            vec![json!({"id": "U1", "name": "ada lovelace"}), json!({"id": "U2", "name": "bob"})]
        );
        assert_eq!(read(&store, "/archive/users.archive"), vec![json!({"id": "U1", "name": "ada"})]);
        assert!(read(&store, "/archive/channels.archive").is_empty());
        assert_eq!(
            read(&store, "/archive/general/2019-04-20.json"),
            vec![json!({"ts": "1555786317.1"}), json!({"ts": "1555786350.1"}), json!({"ts": "1555786400.1"})]
        );
        assert!(store.is_file(Path::new("/archive/general/2019-04-21.json")));
        assert!(store.is_file(Path::new("/archive/new-chan/2019-04-21.json")));
        assert!(store.is_file(Path::new("/archive/quiet/2019-01-01.json")));
        assert_eq!(out.rosters_merged, 2);
        assert_eq!(out.records_archived, 1);
        assert_eq!(out.files_merged, 1);
        assert_eq!(out.channels_added, 1);
    }

    #[test]
    fn second_run_with_empty_snapshot_is_idempotent() {
        let store = populated();
        reconcile(&store, Path::new("/archive"), Path::new("/snap")).expect("first");

        let before: Vec<_> = ["users.json", "users.archive", "channels.json", "general/2019-04-20.json"]
            .iter()
            .map(|name| store.read(&Path::new("/archive").join(name)).expect("read"))
            .collect();

        store.create_dir_all(Path::new("/snap")).expect("empty snapshot");
        let out = reconcile(&store, Path::new("/archive"), Path::new("/snap")).expect("second");

        assert!(out.consumed);
        assert!(!out.changed());
        assert!(store.kind(Path::new("/snap")).is_none());
        let after: Vec<_> = ["users.json", "users.archive", "channels.json", "general/2019-04-20.json"]
            .iter()
            .map(|name| store.read(&Path::new("/archive").join(name)).expect("read"))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn missing_snapshot_counts_as_consumed() {
        let store = MemoryStore::new();
        let out = reconcile(&store, Path::new("/archive"), Path::new("/snap")).expect("reconcile");
        assert!(out.consumed);
        assert!(!out.changed());
    }

    #[test]
    fn unabsorbable_entries_are_reported_and_snapshot_kept() {
        let store = MemoryStore::new();
        seed(&store, "/archive/general/2019-04-20.json", vec![json!({"ts": "1.0"})]);
        seed(&store, "/snap/general/2019-04-21.json", vec![json!({"ts": "2.0"})]);
        seed(&store, "/snap/general/threads/x.json", vec![json!({"ts": "3.0"})]);
        store.write(Path::new("/archive/notes.txt"), b"keep").expect("seed");
        store.write(Path::new("/snap/notes.txt"), b"incoming").expect("seed");

        let out = reconcile(&store, Path::new("/archive"), Path::new("/snap")).expect("reconcile");

        assert!(!out.consumed);
        assert_eq!(
            out.residue,
            vec![PathBuf::from("/snap/general/threads"), PathBuf::from("/snap/notes.txt")]
        );
        assert!(store.is_file(Path::new("/archive/general/2019-04-21.json")));
        assert!(store.is_file(Path::new("/snap/general/threads/x.json")));
        assert_eq!(store.read(Path::new("/archive/notes.txt")).expect("read"), b"keep");
    }

    #[test]
    fn corrupt_roster_in_snapshot_keeps_archive_roster() {
        let store = MemoryStore::new();
        seed(&store, "/archive/groups.json", vec![json!({"id": "G1"})]);
        store.write(Path::new("/snap/groups.json"), b"not json").expect("seed");

        let out = reconcile(&store, Path::new("/archive"), Path::new("/snap")).expect("reconcile");

        assert!(out.consumed);
        assert_eq!(read(&store, "/archive/groups.json"), vec![json!({"id": "G1"})]);
    }

    #[test]
    fn halted_merge_is_reported_without_losing_records() {
        let store = MemoryStore::new();
        seed(&store, "/archive/general/2019-04-20.json", vec![json!({"text": "legacy"})]);
        seed(&store, "/snap/general/2019-04-20.json", vec![json!({"ts": "1.0"})]);
        seed(&store, "/snap/general/2019-04-21.json", vec![json!({"ts": "2.0"})]);

        let out = reconcile(&store, Path::new("/archive"), Path::new("/snap")).expect("reconcile");

        assert_eq!(out.partial_merges, 1);
        assert!(!out.consumed);
        assert_eq!(out.residue, vec![PathBuf::from("/snap/general/2019-04-20.json")]);
        assert_eq!(
            read(&store, "/archive/general/2019-04-20.json"),
            vec![json!({"text": "legacy"})]
        );
        assert_eq!(read(&store, "/snap/general/2019-04-20.json"), vec![json!({"ts": "1.0"})]);
        assert!(store.is_file(Path::new("/archive/general/2019-04-21.json")));
    }
}
