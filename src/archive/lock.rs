use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;

/// Exclusive advisory lock held for the whole archive run. Released on drop.
#[derive(Debug)]
pub struct ArchiveLock {
    file: File,
    path: PathBuf,
}

impl ArchiveLock {
    /// Fails fast with `ArchiveError::Locked` when another run holds it.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(ArchiveError::Locked(path.to_path_buf()).into());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_holder_is_refused_until_release() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("acme.lock");

        let first = ArchiveLock::acquire(&path).expect("first lock");
        let err = ArchiveLock::acquire(&path).expect_err("held");
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::Locked(_))
        ));

        drop(first);
        let again = ArchiveLock::acquire(&path).expect("re-acquire");
        assert_eq!(again.path(), path.as_path());
    }
}
