use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const NOTHING_TO_DOWNLOAD: &str = "No images to download";

/// The single unit handed to the user for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadArtifact {
    Nothing(String),
    File(PathBuf),
    Archive(PathBuf),
}

/// Bundle `paths` into one downloadable artifact.
///
/// A single path is returned as-is. Several paths are zipped into
/// `generated_images_{stamp}.zip` under `archive_dir`; paths that no longer
/// exist are skipped without error.
pub fn package_downloads(
    paths: &[PathBuf],
    archive_dir: &Path,
    stamp: u64,
) -> Result<DownloadArtifact> {
    match paths {
        [] => Ok(DownloadArtifact::Nothing(NOTHING_TO_DOWNLOAD.to_string())),
        [single] => Ok(DownloadArtifact::File(single.clone())),
        _ => {
            let archive_path = archive_dir.join(format!("generated_images_{stamp}.zip"));
            write_archive(paths, &archive_path)?;
            Ok(DownloadArtifact::Archive(archive_path))
        }
    }
}

fn write_archive(paths: &[PathBuf], archive_path: &Path) -> Result<()> {
    if let Some(parent) = archive_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let file = File::create(archive_path)
        .with_context(|| format!("failed to create {}", archive_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries = HashSet::new();
    for path in paths {
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "skipping vanished download target");
            continue;
        }
        let Some(name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
            continue;
        };
        if !entries.insert(name.clone()) {
            tracing::warn!(entry = %name, "duplicate archive entry name, keeping the first");
            continue;
        }
        let mut source =
            File::open(path).with_context(|| format!("failed reading {}", path.display()))?;
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("failed adding {name} to archive"))?;
        io::copy(&mut source, &mut zip)
            .with_context(|| format!("failed writing {name} to archive"))?;
    }

    zip.finish().context("failed to finalize archive")?;
    Ok(())
}
