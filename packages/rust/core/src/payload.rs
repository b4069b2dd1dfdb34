//! Turning the user's paths into the single file that gets served.

use std::fs::File;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use woof_server::FileOffer;
use woof_shared::{PayloadKind, Result, ShareConfig, WoofError};

/// The file offered to downloaders.
///
/// When the payload is a generated archive it owns the scratch directory
/// holding it; dropping the payload removes that directory.
#[derive(Debug)]
pub struct Payload {
    /// File on disk.
    pub path: PathBuf,
    /// Name offered in `Content-Disposition`.
    pub download_name: String,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the file contents.
    pub sha256: String,
    /// Plain file or generated archive.
    pub kind: PayloadKind,
    /// Inputs left out of the archive because they were not files or directories.
    pub skipped: Vec<PathBuf>,
    scratch: Option<ScratchDir>,
}

impl Payload {
    /// Whether the payload lives in a scratch directory that is removed on drop.
    pub fn is_temporary(&self) -> bool {
        self.scratch.is_some()
    }

    /// Server-facing description of this payload.
    pub fn offer(&self) -> FileOffer {
        FileOffer {
            path: self.path.clone(),
            download_name: self.download_name.clone(),
            size: self.size,
        }
    }
}

/// Directory removed (recursively) on drop.
#[derive(Debug)]
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create(parent: &Path) -> Result<Self> {
        let dir = parent.join(format!("woof-rs-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).map_err(|e| WoofError::io(&dir, e))?;
        debug!(path = %dir.display(), "created scratch directory");
        Ok(Self(dir))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "removed scratch directory"),
            Err(e) => warn!(path = %self.0.display(), error = %e, "failed to remove scratch directory"),
        }
    }
}

/// Prepare the payload for `config.paths`.
///
/// - exactly one regular file: served in place
/// - several paths, or a directory first: bundled into a tar.gz
/// - a lone path that is neither: [`WoofError::InvalidPath`]
#[instrument(skip_all, fields(paths = config.paths.len()))]
pub async fn prepare(config: &ShareConfig) -> Result<Payload> {
    let first = config.paths.first().ok_or(WoofError::NoPaths)?;

    let (path, download_name, kind, skipped, scratch) = if config.paths.len() == 1
        && first.is_file()
    {
        let name = first
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        (first.clone(), name, PayloadKind::File, Vec::new(), None)
    } else if config.paths.len() > 1 || first.is_dir() {
        let scratch = ScratchDir::create(&config.archive_dir)?;
        let dest = scratch.0.join(&config.archive_name);

        info!(dest = %dest.display(), "adding files/dirs to archive");

        let paths = config.paths.clone();
        let compression = config.compression;
        let task_dest = dest.clone();
        let exclude = vec![scratch.0.clone()];
        let summary = tokio::task::spawn_blocking(move || {
            woof_archive::build_archive(&paths, &task_dest, compression, &exclude)
        })
        .await
        .map_err(|e| WoofError::Archive(format!("archive task failed: {e}")))??;

        (
            dest,
            config.archive_name.clone(),
            PayloadKind::Archive {
                entries: summary.entries,
            },
            summary.skipped,
            Some(scratch),
        )
    } else {
        return Err(WoofError::InvalidPath {
            path: first.clone(),
        });
    };

    let digest_path = path.clone();
    let (size, sha256) = tokio::task::spawn_blocking(move || digest_file(&digest_path))
        .await
        .map_err(|e| WoofError::Archive(format!("digest task failed: {e}")))??;

    info!(
        file = %download_name,
        %kind,
        size,
        sha256 = %sha256,
        "payload ready"
    );

    Ok(Payload {
        path,
        download_name,
        size,
        sha256,
        kind,
        skipped,
        scratch,
    })
}

/// Size and hex SHA-256 of a file, streamed.
fn digest_file(path: &Path) -> Result<(u64, String)> {
    let mut file = File::open(path).map_err(|e| WoofError::io(path, e))?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher).map_err(|e| WoofError::io(path, e))?;
    Ok((size, format!("{:x}", hasher.finalize())))
}
