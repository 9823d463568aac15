use std::ffi::OsString;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use std::fs;
use crate::caption::CaptionFormat;

/// Extension of the opt-out marker placed next to a media file
pub const SKIP_MARKER_EXTENSION: &str = "nocaption";

/// Check if a skip marker (`<name>.nocaption`) exists for a file
pub fn has_skip_marker(file_path: &Path) -> bool {
    skip_marker_path(file_path).exists()
}

/// Get the path to the skip marker file for a given media file
pub fn skip_marker_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_owned();
    name.push(".");
    name.push(SKIP_MARKER_EXTENSION);
    PathBuf::from(name)
}

/// Get the path of the exported caption document for a finished file
pub fn caption_sidecar_path(file_path: &Path, format: CaptionFormat) -> PathBuf {
    file_path.with_extension(format.extension())
}

/// Write the caption document next to the finished file.
///
/// Goes through a temporary name and a rename so a reader never sees a
/// half-written sidecar.
pub fn write_caption_sidecar(file_path: &Path, format: CaptionFormat, document: &str) -> Result<PathBuf> {
    let sidecar = caption_sidecar_path(file_path, format);
    let mut tmp_name: OsString = sidecar.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    fs::write(&tmp, document)
        .with_context(|| format!("Failed to write caption sidecar: {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, &sidecar) {
        fs::remove_file(&tmp).ok();
        return Err(e).with_context(|| format!("Failed to move caption sidecar into place: {}", sidecar.display()));
    }
    Ok(sidecar)
}
