//! tar.gz bundling for multi-path shares.
//!
//! Every path handed to [`build_archive`] becomes one top-level entry:
//! files keep their (relative) path, directories are stored recursively
//! under `<dirname>-<index>` so two directories with the same basename
//! never collide. The archive being written, and any extra paths the
//! caller excludes, are left out of the walk even when a shared directory
//! contains them.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::Builder;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use woof_shared::{CompressionLevel, Result, WoofError};

/// Outcome of a successful [`build_archive`] call.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    /// Where the archive was written.
    pub path: PathBuf,
    /// Number of top-level entries added.
    pub entries: usize,
    /// Inputs that were neither files nor directories.
    pub skipped: Vec<PathBuf>,
}

/// Bundle `paths` into a gzip-compressed tar archive at `dest`.
///
/// `dest` is created or truncated. Paths that are neither regular files nor
/// directories are logged and skipped. If nothing at all could be added the
/// partial archive is removed and [`WoofError::EmptyArchive`] is returned.
///
/// `dest` itself and everything under `exclude` are never read back into
/// the archive.
#[instrument(skip_all, fields(dest = %dest.display(), inputs = paths.len(), %compression))]
pub fn build_archive(
    paths: &[PathBuf],
    dest: &Path,
    compression: CompressionLevel,
    exclude: &[PathBuf],
) -> Result<ArchiveSummary> {
    let file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .create(true)
        .open(dest)
        .map_err(|e| WoofError::io(dest, e))?;

    let mut excluded = vec![canonical_or_given(dest)];
    excluded.extend(exclude.iter().map(|p| canonical_or_given(p)));

    let encoder = GzEncoder::new(file, Compression::new(compression.level()));
    let mut tar = Builder::new(encoder);

    let mut entries = 0;
    let mut skipped = Vec::new();

    for (i, current) in paths.iter().enumerate() {
        if current.is_file() {
            let name = file_entry_name(current);
            let mut f = File::open(current).map_err(|e| WoofError::io(current, e))?;
            tar.append_file(&name, &mut f)
                .map_err(|e| WoofError::io(current, e))?;
            debug!(path = %current.display(), entry = %name.display(), "added file");
            entries += 1;
        } else if current.is_dir() {
            let name = format!("{}-{i}", dir_base_name(current));
            append_tree(&mut tar, current, Path::new(&name), &excluded)?;
            debug!(path = %current.display(), entry = %name, "added directory");
            entries += 1;
        } else {
            warn!(path = %current.display(), "not a valid path, skipping");
            skipped.push(current.clone());
        }
    }

    let encoder = tar
        .into_inner()
        .map_err(|e| WoofError::Archive(format!("finishing tar stream: {e}")))?;
    encoder
        .finish()
        .map_err(|e| WoofError::Archive(format!("finishing gzip stream: {e}")))?;

    if entries == 0 {
        std::fs::remove_file(dest).map_err(|e| WoofError::io(dest, e))?;
        return Err(WoofError::EmptyArchive);
    }

    info!(entries, skipped = skipped.len(), "archive written");

    Ok(ArchiveSummary {
        path: dest.to_path_buf(),
        entries,
        skipped,
    })
}

/// Append the directory `root` recursively under `base`. Symlinks are
/// followed. Unreadable entries and link loops are logged and skipped.
fn append_tree<W: Write>(
    tar: &mut Builder<W>,
    root: &Path,
    base: &Path,
    excluded: &[PathBuf],
) -> Result<()> {
    let canonical_root = std::fs::canonicalize(root).map_err(|e| WoofError::io(root, e))?;

    let walker = WalkDir::new(&canonical_root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry.path(), excluded));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "cannot read entry, skipping");
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(&canonical_root) else {
            continue;
        };
        let name = base.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            tar.append_dir(&name, entry.path())
                .map_err(|e| WoofError::io(entry.path(), e))?;
        } else if file_type.is_file() {
            tar.append_path_with_name(entry.path(), &name)
                .map_err(|e| WoofError::io(entry.path(), e))?;
        } else {
            debug!(path = %entry.path().display(), "not a file or directory, skipping");
        }
    }

    Ok(())
}

/// True when `path` is one of `excluded` or lies below one of them.
/// Entry paths under a canonical root compare directly, and the same
/// check is repeated on the resolved path for entries reached via a link.
fn is_excluded(path: &Path, excluded: &[PathBuf]) -> bool {
    if excluded.iter().any(|ex| path.starts_with(ex)) {
        return true;
    }
    std::fs::canonicalize(path)
        .map(|resolved| excluded.iter().any(|ex| resolved.starts_with(ex)))
        .unwrap_or(false)
}

fn canonical_or_given(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Entry name for a file: its path with root, prefix, `.` and `..`
/// components dropped. tar refuses absolute or parent-relative names.
fn file_entry_name(path: &Path) -> PathBuf {
    let name: PathBuf = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    if name.as_os_str().is_empty() {
        PathBuf::from("file")
    } else {
        name
    }
}

/// Last component of a directory path, resolving `.`/`..` through the
/// filesystem when the path itself has none.
fn dir_base_name(path: &Path) -> String {
    let from_path = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    from_path
        .or_else(|| {
            std::fs::canonicalize(path)
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        })
        .unwrap_or_else(|| "root".to_string())
}
