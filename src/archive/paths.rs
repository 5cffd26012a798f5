use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArchivePaths {
    pub home: PathBuf,
    pub workspace_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub key_file: PathBuf,
}

/// Locations derived from one team domain inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamLayout {
    pub archive_root: PathBuf,
    pub snapshot_root: PathBuf,
    pub lock_file: PathBuf,
    pub package_file: PathBuf,
}

impl TeamLayout {
    /// `stamp` is the run date rendered as `dd-mm-yy`.
    pub fn new(workspace_dir: &Path, domain: &str, stamp: &str) -> Self {
        Self {
            archive_root: workspace_dir.join(domain),
            snapshot_root: workspace_dir.join(format!("{domain}-{stamp}")),
            lock_file: workspace_dir.join(format!("{domain}.lock")),
            package_file: workspace_dir.join(format!("{domain}.zip")),
        }
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<ArchivePaths> {
    let user_home = required_home_dir()?;
    let home = env_or_default_path("SLACK_ARCHIVE_HOME", user_home.join(".slack_archive"));

    let workspace_dir = env_or_default_path("SLACK_ARCHIVE_WORKSPACE_DIR", home.join("archives"));
    let logs_dir = env_or_default_path("SLACK_ARCHIVE_LOGS_DIR", home.join("logs"));
    let key_file = env_or_default_path("SLACK_ARCHIVE_KEY_FILE", home.join("token.key"));

    Ok(ArchivePaths {
        home,
        workspace_dir,
        logs_dir,
        key_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_layout_places_siblings_in_the_workspace() {
        let layout = TeamLayout::new(Path::new("/w"), "acme", "16-10-26");
        assert_eq!(layout.archive_root, PathBuf::from("/w/acme"));
        assert_eq!(layout.snapshot_root, PathBuf::from("/w/acme-16-10-26"));
        assert_eq!(layout.lock_file, PathBuf::from("/w/acme.lock"));
        assert_eq!(layout.package_file, PathBuf::from("/w/acme.zip"));
    }
}
