use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use zip::DateTime;
use zip::write::SimpleFileOptions;

#[derive(Debug, Clone, Serialize)]
pub struct PackageOutcome {
    pub path: PathBuf,
    pub entries: usize,
    pub sha256: String,
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Zips the archive tree into `destination`, replacing any previous package.
/// Entries are sorted and stamped with a fixed time so unchanged trees
/// produce identical bytes.
pub fn package_tree(root: &Path, destination: &Path) -> Result<PackageOutcome> {
    let mut entries = Vec::new();
    collect_files(root, root, &mut entries)?;
    entries.sort();

    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage package in {}", parent.display()))?;

    let fixed_time = DateTime::from_date_and_time(1980, 1, 1, 0, 0, 0)
        .map_err(|err| anyhow::anyhow!("invalid zip timestamp: {err}"))?;
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(fixed_time);

    let mut zip = zip::ZipWriter::new(staged.reopen()?);
    for relative in &entries {
        zip.start_file(relative.as_str(), options)
            .with_context(|| format!("failed to add {relative} to package"))?;
        let mut source = File::open(root.join(relative))?;
        io::copy(&mut source, &mut zip)?;
    }
    let mut file = zip.finish().context("failed to finalize package")?;

    file.seek(SeekFrom::Start(0))?;
    let sha256 = sha256_reader(&mut file)?;
    staged
        .persist(destination)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", destination.display()))?;

    Ok(PackageOutcome {
        path: destination.to_path_buf(),
        entries: entries.len(),
        sha256,
    })
}
