use std::fs;
use std::path::{Path, PathBuf};
use filetime::FileTime;
use log::{debug, info, warn};
use tempfile::TempDir;
use walkdir::WalkDir;
use crate::error::{PipelineError, PipelineResult};

/// Name prefix of every per-job staging directory
pub const STAGING_PREFIX: &str = ".captiond-staging-";

/// Private scratch directory owned by one job.
///
/// Lives next to the source by default so the final rename stays on one
/// filesystem. Removed as a whole when dropped, whatever the job outcome.
#[derive(Debug)]
pub struct Staging {
    dir: TempDir,
}

impl Staging {
    pub fn create(source: &Path, staging_root: Option<&Path>) -> PipelineResult<Self> {
        let parent = match staging_root {
            Some(root) => root,
            None => source
                .parent()
                .ok_or_else(|| PipelineError::swap(source, "source has no parent directory"))?,
        };

        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| PipelineError::swap(source, format!("cannot create staging dir in {}: {}", parent.display(), e)))?;

        debug!("Staging directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file inside the staging directory
    pub fn file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// What a successful swap did
#[derive(Debug, Clone, PartialEq)]
pub struct SwapOutcome {
    pub destination: PathBuf,
    /// The source was deleted after the move (only when destination differs)
    pub original_removed: bool,
}

/// Move a muxed file into place.
///
/// Copies permissions and access/modification times from `original` onto
/// `staged`, renames `staged` to `destination`, then deletes `original` when
/// it lives at a different path and `preserve_original` is false. Until the
/// rename succeeds the original is untouched; on any failure the staged file
/// is removed.
pub fn replace(
    original: &Path,
    staged: &Path,
    destination: &Path,
    preserve_original: bool,
) -> PipelineResult<SwapOutcome> {
    // decided before the rename: afterwards an aliased original resolves to the new file
    let in_place = same_file(original, destination);
    let result = move_into_place(original, staged, destination, in_place);
    if let Err(e) = result {
        if staged.exists() {
            if let Err(rm) = fs::remove_file(staged) {
                warn!("Failed to remove staged file {}: {}", staged.display(), rm);
            }
        }
        return Err(e);
    }

    let mut original_removed = false;
    if !in_place && !preserve_original {
        match fs::remove_file(original) {
            Ok(()) => {
                original_removed = true;
                info!("🗑️  Deleted original: {}", original.display());
            }
            Err(e) => warn!("Swap succeeded but original could not be deleted: {}: {}", original.display(), e),
        }
    }

    Ok(SwapOutcome {
        destination: destination.to_path_buf(),
        original_removed,
    })
}

fn move_into_place(original: &Path, staged: &Path, destination: &Path, in_place: bool) -> PipelineResult<()> {
    let meta = fs::metadata(original).map_err(|e| PipelineError::swap(original, format!("cannot stat original: {}", e)))?;
    let staged_meta = fs::metadata(staged).map_err(|e| PipelineError::swap(original, format!("cannot stat staged output: {}", e)))?;
    if staged_meta.len() == 0 {
        return Err(PipelineError::swap(original, "staged output is empty"));
    }

    fs::set_permissions(staged, meta.permissions())
        .map_err(|e| PipelineError::swap(original, format!("cannot copy permissions: {}", e)))?;
    filetime::set_file_times(
        staged,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
    .map_err(|e| PipelineError::swap(original, format!("cannot copy timestamps: {}", e)))?;

    if !in_place && destination.exists() {
        return Err(PipelineError::swap(
            original,
            format!("destination already exists: {}", destination.display()),
        ));
    }

    fs::rename(staged, destination).map_err(|e| {
        PipelineError::swap(original, format!("rename {} -> {} failed: {}", staged.display(), destination.display(), e))
    })
}

/// Whether two paths name the same file, e.g. `Talk.MKV` and `Talk.mkv` on a
/// case-insensitive filesystem
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (fs::metadata(a), fs::metadata(b)) {
            (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        match (fs::canonicalize(a), fs::canonicalize(b)) {
            (Ok(ca), Ok(cb)) => ca == cb,
            _ => false,
        }
    }
}

/// Whether a directory entry is a staging directory
pub fn is_staging_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(STAGING_PREFIX))
        .unwrap_or(false)
}

/// Remove staging directories left behind by a forced abort.
/// Returns the number removed.
pub fn sweep_orphaned_staging(roots: &[PathBuf]) -> usize {
    let mut removed = 0;

    for root in roots {
        if !root.is_dir() {
            continue;
        }

        let mut walker = WalkDir::new(root).follow_links(false).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Sweep: skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if entry.file_type().is_dir() && is_staging_dir(entry.path()) {
                walker.skip_current_dir();
                match fs::remove_dir_all(entry.path()) {
                    Ok(()) => {
                        removed += 1;
                        info!("🗑️  Removed orphaned staging directory: {}", entry.path().display());
                    }
                    Err(e) => warn!("Failed to remove orphaned staging directory {}: {}", entry.path().display(), e),
                }
            }
        }
    }

    removed
}
