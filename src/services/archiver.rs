use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tar::Builder;
use thiserror::Error;
use tokio::sync::watch;
use walkdir::WalkDir;

/// Suffix of the file the archive is streamed into before it is renamed into place
pub const PARTIAL_SUFFIX: &str = "partial";

/// A filesystem path and the name it takes inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    pub path: Utf8PathBuf,
    pub entry_name: String,
}

impl ArchiveSource {
    pub fn new(path: impl Into<Utf8PathBuf>, entry_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry_name: entry_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Recurse into directories; otherwise only the directory entry itself is written
    pub recursive: bool,

    /// Gzip level, 0-9 (1 = fastest)
    pub compression_level: u32,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            compression_level: 1,
        }
    }
}

/// What a finished archive contains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: Utf8PathBuf,
    pub entries: usize,
    pub compressed_bytes: u64,
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to open archive for exclusive write {path}: {source}")]
    Open {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive {0} is being written by another packager")]
    Locked(Utf8PathBuf),

    #[error("Archive source does not exist: {0}")]
    SourceNotFound(Utf8PathBuf),

    #[error("Failed to write archive entry {entry}: {source}")]
    Entry {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to enumerate {path}: {source}")]
    Walk {
        path: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Path is not valid UTF-8: {0:?}")]
    NonUtf8Path(PathBuf),

    #[error("Failed to finalize archive {path}: {source}")]
    Finish {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archiving cancelled")]
    Cancelled,
}

/// Path the archive is streamed into before the final rename
pub fn partial_path(destination: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}.{}", destination, PARTIAL_SUFFIX))
}

/// Write `sources` into a gzip-compressed tar at `destination`.
///
/// The stream goes to a sibling `.partial` file held under an exclusive
/// advisory lock until it is renamed, so a second concurrent writer for the
/// same destination fails with [`ArchiveError::Locked`]. The lock dies with
/// its process: an unlocked partial left by a killed run is truncated and
/// reused. On any error the partial file is deleted and nothing is left at
/// `destination`. On success tar, gzip, and the file are closed in that
/// order and the partial file is renamed onto `destination`.
///
/// Blocking; call from `spawn_blocking` inside async code.
pub fn archive(
    destination: &Utf8Path,
    sources: &[ArchiveSource],
    options: &ArchiveOptions,
    cancel: &watch::Receiver<bool>,
) -> Result<ArchiveSummary, ArchiveError> {
    let partial = partial_path(destination);

    let file = open_partial(&partial)?;

    tracing::info!(
        "Archiving {} source(s) into {} (level {})",
        sources.len(),
        destination,
        options.compression_level
    );

    let entries = match write_archive(&file, &partial, sources, options, cancel) {
        Ok(entries) => entries,
        Err(e) => {
            discard_partial(&partial);
            return Err(e);
        }
    };

    if let Err(source) = std::fs::rename(&partial, destination) {
        discard_partial(&partial);
        return Err(ArchiveError::Finish {
            path: destination.to_path_buf(),
            source,
        });
    }

    // released only once the partial name is gone
    drop(file);

    let compressed_bytes = std::fs::metadata(destination).map(|m| m.len()).unwrap_or(0);

    tracing::info!(
        "Archive written: {} ({} entries, {} bytes)",
        destination,
        entries,
        compressed_bytes
    );

    Ok(ArchiveSummary {
        path: destination.to_path_buf(),
        entries,
        compressed_bytes,
    })
}

/// Open and lock the partial file, reclaiming one abandoned by a dead writer.
fn open_partial(partial: &Utf8Path) -> Result<File, ArchiveError> {
    let open_err = |source: std::io::Error| ArchiveError::Open {
        path: partial.to_path_buf(),
        source,
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(partial)
        .map_err(open_err)?;

    // through the trait: std's inherent File locking methods would shadow fs2's
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            tracing::warn!("Partial archive {} is locked by another writer", partial);
            return Err(ArchiveError::Locked(partial.to_path_buf()));
        }
        Err(e) => return Err(open_err(e)),
    }

    // The previous holder may have renamed this inode into place between our
    // open and our lock
    if !still_named(&file, partial).map_err(open_err)? {
        tracing::warn!("Partial archive {} was finished by another writer", partial);
        return Err(ArchiveError::Locked(partial.to_path_buf()));
    }

    let stale_len = file.metadata().map_err(open_err)?.len();
    if stale_len > 0 {
        tracing::warn!(
            "Reclaiming abandoned partial archive {} ({} bytes)",
            partial,
            stale_len
        );
        file.set_len(0).map_err(open_err)?;
    }

    Ok(file)
}

#[cfg(unix)]
fn still_named(file: &File, path: &Utf8Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(named) => Ok(held.dev() == named.dev() && held.ino() == named.ino()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_named(_file: &File, path: &Utf8Path) -> std::io::Result<bool> {
    Ok(path.exists())
}

fn write_archive(
    file: &File,
    partial: &Utf8Path,
    sources: &[ArchiveSource],
    options: &ArchiveOptions,
    cancel: &watch::Receiver<bool>,
) -> Result<usize, ArchiveError> {
    let level = Compression::new(options.compression_level.min(9));
    let encoder = GzEncoder::new(BufWriter::new(file), level);
    let mut builder = Builder::new(encoder);
    let mut entries = 0;

    for source in sources {
        ensure_not_cancelled(cancel)?;
        entries += append_source(&mut builder, source, options.recursive, cancel)?;
    }

    let finish_err = |source: std::io::Error| ArchiveError::Finish {
        path: partial.to_path_buf(),
        source,
    };

    // tar trailer, then gzip trailer, then the file itself
    let encoder = builder.into_inner().map_err(finish_err)?;
    let mut writer = encoder.finish().map_err(finish_err)?;
    writer.flush().map_err(finish_err)?;
    let file = writer
        .into_inner()
        .map_err(|e| finish_err(e.into_error()))?;
    file.sync_all().map_err(finish_err)?;

    Ok(entries)
}

fn append_source<W: Write>(
    builder: &mut Builder<W>,
    source: &ArchiveSource,
    recursive: bool,
    cancel: &watch::Receiver<bool>,
) -> Result<usize, ArchiveError> {
    let metadata = std::fs::metadata(&source.path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ArchiveError::SourceNotFound(source.path.clone())
        } else {
            ArchiveError::Entry {
                entry: source.entry_name.clone(),
                source: e,
            }
        }
    })?;

    if !metadata.is_dir() {
        append_entry(builder, &source.path, &source.entry_name, false)?;
        return Ok(1);
    }

    append_entry(builder, &source.path, &source.entry_name, true)?;
    let mut count = 1;

    if !recursive {
        return Ok(count);
    }

    for entry in WalkDir::new(&source.path).min_depth(1).sort_by_file_name() {
        ensure_not_cancelled(cancel)?;

        let entry = entry.map_err(|e| ArchiveError::Walk {
            path: source.path.clone(),
            source: e,
        })?;
        let is_dir = entry.file_type().is_dir();
        let path = Utf8PathBuf::from_path_buf(entry.into_path()).map_err(ArchiveError::NonUtf8Path)?;

        let name = entry_name_for(&source.entry_name, &source.path, &path);
        append_entry(builder, &path, &name, is_dir)?;
        count += 1;
    }

    Ok(count)
}

fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    path: &Utf8Path,
    name: &str,
    is_dir: bool,
) -> Result<(), ArchiveError> {
    let result = if is_dir {
        builder.append_dir(name, path)
    } else {
        builder.append_path_with_name(path, name)
    };

    result.map_err(|source| ArchiveError::Entry {
        entry: name.to_string(),
        source,
    })?;

    tracing::debug!("Archived {} as {}", path, name);
    Ok(())
}

/// Archive name of `path`: `prefix` followed by its components below `root`, joined with `/`.
fn entry_name_for(prefix: &str, root: &Utf8Path, path: &Utf8Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    std::iter::once(prefix)
        .chain(relative.components().map(|c| c.as_str()))
        .collect::<Vec<_>>()
        .join("/")
}

fn ensure_not_cancelled(cancel: &watch::Receiver<bool>) -> Result<(), ArchiveError> {
    if *cancel.borrow() {
        Err(ArchiveError::Cancelled)
    } else {
        Ok(())
    }
}

fn discard_partial(partial: &Utf8Path) {
    match std::fs::remove_file(partial) {
        Ok(()) => tracing::warn!("Removed partially written archive {}", partial),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::error!("Failed to remove partial archive {}: {}", partial, e),
    }
}
