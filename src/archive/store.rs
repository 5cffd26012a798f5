use anyhow::{Context, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::archive::warn::{self, WarnEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

/// Directory-tree operations the archive engine needs. Paths are absolute
/// (or at least consistently rooted) for a given store.
pub trait TreeStore {
    fn kind(&self, path: &Path) -> Option<NodeKind>;
    /// Entry names directly under `dir`, sorted ascending.
    fn list(&self, dir: &Path) -> Result<Vec<String>>;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    /// Replaces the file at `path`, creating missing parents.
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    /// Moves a file or a whole subtree. An existing destination file is replaced.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    fn is_dir(&self, path: &Path) -> bool {
        self.kind(path) == Some(NodeKind::Dir)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.kind(path) == Some(NodeKind::File)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStore;

fn tolerate_missing(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl TreeStore for DiskStore {
    fn kind(&self, path: &Path) -> Option<NodeKind> {
        let meta = fs::metadata(path).ok()?;
        if meta.is_dir() {
            Some(NodeKind::Dir)
        } else {
            Some(NodeKind::File)
        }
    }

    fn list(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
            let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to stage write in {}", parent.display()))?;
        tmp.write_all(data)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tmp.persist(path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(rename_err) if rename_err.kind() == ErrorKind::CrossesDevices && from.is_file() => {
                fs::copy(from, to).with_context(|| {
                    format!("failed to copy {} to {}", from.display(), to.display())
                })?;
                fs::remove_file(from)
                    .with_context(|| format!("failed to remove {}", from.display()))?;
                Ok(())
            }
            Err(rename_err) => Err(rename_err)
                .with_context(|| format!("failed to move {} to {}", from.display(), to.display())),
        }
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        tolerate_missing(fs::remove_file(path))
            .with_context(|| format!("failed to remove {}", path.display()))
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        tolerate_missing(fs::remove_dir(path))
            .with_context(|| format!("failed to remove {}", path.display()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        tolerate_missing(fs::remove_dir_all(path))
            .with_context(|| format!("failed to remove {}", path.display()))
    }
}

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

/// In-memory tree. Single-threaded, like the rest of the engine.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: RefCell<BTreeMap<PathBuf, Node>>,
}

fn not_found(path: &Path) -> anyhow::Error {
    anyhow::Error::new(std::io::Error::new(
        ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    ))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_dirs(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) -> Result<()> {
        for ancestor in path.ancestors().collect::<Vec<_>>().into_iter().rev() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match nodes.get(ancestor) {
                Some(Node::Dir) => {}
                Some(Node::File(_)) => {
                    anyhow::bail!("{} is a file, not a directory", ancestor.display())
                }
                None => {
                    nodes.insert(ancestor.to_path_buf(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    fn subtree_keys(nodes: &BTreeMap<PathBuf, Node>, root: &Path) -> Vec<PathBuf> {
        nodes
            .keys()
            .filter(|key| key.starts_with(root))
            .cloned()
            .collect()
    }
}

impl TreeStore for MemoryStore {
    fn kind(&self, path: &Path) -> Option<NodeKind> {
        match self.nodes.borrow().get(path)? {
            Node::File(_) => Some(NodeKind::File),
            Node::Dir => Some(NodeKind::Dir),
        }
    }

    fn list(&self, dir: &Path) -> Result<Vec<String>> {
        let nodes = self.nodes.borrow();
        match nodes.get(dir) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => anyhow::bail!("{} is not a directory", dir.display()),
            None => return Err(not_found(dir)),
        }
        // BTreeMap iteration keeps the names sorted.
        Ok(nodes
            .keys()
            .filter(|key| key.parent() == Some(dir))
            .filter_map(|key| key.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        match self.nodes.borrow().get(path) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Dir) => anyhow::bail!("{} is a directory", path.display()),
            None => Err(not_found(path)),
        }
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(parent) = path.parent() {
            Self::ensure_dirs(&mut nodes, parent)?;
        }
        if matches!(nodes.get(path), Some(Node::Dir)) {
            anyhow::bail!("{} is a directory", path.display());
        }
        nodes.insert(path.to_path_buf(), Node::File(data.to_vec()));
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        Self::ensure_dirs(&mut self.nodes.borrow_mut(), path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let mut nodes = self.nodes.borrow_mut();
        if !nodes.contains_key(from) {
            return Err(not_found(from));
        }
        if to.starts_with(from) {
            anyhow::bail!("cannot move {} into itself", from.display());
        }
        if let Some(parent) = to.parent() {
            Self::ensure_dirs(&mut nodes, parent)?;
        }
        if matches!(nodes.get(to), Some(Node::Dir)) {
            anyhow::bail!("destination {} is a directory", to.display());
        }

        for key in Self::subtree_keys(&nodes, from) {
            let Some(node) = nodes.remove(&key) else {
                continue;
            };
            let Ok(rest) = key.strip_prefix(from) else {
                continue;
            };
            let target = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
            nodes.insert(target, node);
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        match nodes.get(path) {
            Some(Node::File(_)) => {
                nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir) => anyhow::bail!("{} is a directory", path.display()),
            None => Ok(()),
        }
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        match nodes.get(path) {
            Some(Node::Dir) => {
                if nodes.keys().any(|key| key.parent() == Some(path)) {
                    anyhow::bail!("directory {} is not empty", path.display());
                }
                nodes.remove(path);
                Ok(())
            }
            Some(Node::File(_)) => anyhow::bail!("{} is not a directory", path.display()),
            None => Ok(()),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        for key in Self::subtree_keys(&nodes, path) {
            nodes.remove(&key);
        }
        Ok(())
    }
}

/// Loads a JSON array. A missing file is an empty list; so is a corrupt one,
/// which is reported on stderr because the merge will proceed without it.
pub fn load_records(store: &dyn TreeStore, path: &Path) -> Vec<Value> {
    if !store.is_file(path) {
        return Vec::new();
    }

    let parsed = store.read(path).and_then(|raw| {
        serde_json::from_slice::<Value>(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))
    });
    match parsed {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warn::emit(WarnEvent {
                code: "JSON_NOT_ARRAY",
                stage: "load",
                action: "treat-as-empty",
                path: &path.display().to_string(),
                reason: "top-level-value-is-not-an-array",
                err: "",
            });
            Vec::new()
        }
        Err(err) => {
            warn::emit(WarnEvent {
                code: "JSON_UNREADABLE",
                stage: "load",
                action: "treat-as-empty",
                path: &path.display().to_string(),
                reason: "read-or-parse-failed",
                err: &format!("{err:#}"),
            });
            Vec::new()
        }
    }
}

/// Serialises records with four-space indentation, the layout existing
/// archives were written with.
pub fn render_records(records: &[Value]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    serde::Serialize::serialize(records, &mut serializer)?;
    Ok(out)
}

pub fn write_records(store: &dyn TreeStore, path: &Path, records: &[Value]) -> Result<()> {
    let data = render_records(records)?;
    store.write(path, &data)
}
