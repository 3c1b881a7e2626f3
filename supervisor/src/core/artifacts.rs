//! Output file naming and post-capture filename reconciliation

use chrono::{DateTime, Local};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Suffix capture tools use for files that are still being written
pub const PART_SUFFIX: &str = "part";

/// Containers a capture tool may fall back to when merging streams
pub const ALTERNATE_CONTAINERS: &[&str] = &["mkv", "webm"];

/// `dd-MM-yyyy_HH-mm-ss`
pub fn timestamp_label(now: DateTime<Local>) -> String {
    now.format("%d-%m-%Y_%H-%M-%S").to_string()
}

/// `<dir>/<prefix>-<timestamp>.<ext>`, with a numeric suffix if that name
/// (or its partial sibling) is already taken.
pub fn unique_output_path(dir: &Path, prefix: &str, extension: &str, now: DateTime<Local>) -> PathBuf {
    let stamp = timestamp_label(now);
    let candidate = dir.join(format!("{prefix}-{stamp}.{extension}"));
    if !is_taken(&candidate) {
        return candidate;
    }

    (1u32..)
        .map(|n| dir.join(format!("{prefix}-{stamp}-{n}.{extension}")))
        .find(|path| !is_taken(path))
        .unwrap_or(candidate)
}

fn is_taken(path: &Path) -> bool {
    path.exists() || with_suffix(path, PART_SUFFIX).exists()
}

/// Append `.suffix` to the full file name (`a.mp4` -> `a.mp4.part`)
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Places an alternate-container artifact for `output` may appear at:
/// `a.mp4.mkv` and `a.mkv` for every alternate container.
pub fn alternate_candidates(output: &Path) -> Vec<PathBuf> {
    ALTERNATE_CONTAINERS
        .iter()
        .flat_map(|ext| [with_suffix(output, ext), output.with_extension(ext)])
        .filter(|candidate| candidate != output)
        .collect()
}

/// Rename `<output>.part` to `<output>` if it exists
pub async fn finalize_part(output: &Path) -> io::Result<bool> {
    let part = with_suffix(output, PART_SUFFIX);
    if !fs::try_exists(&part).await? {
        return Ok(false);
    }
    fs::rename(&part, output).await?;
    Ok(true)
}

/// Rename the first alternate-container artifact found to `<output>`
pub async fn finalize_alternate(output: &Path) -> io::Result<Option<PathBuf>> {
    for candidate in alternate_candidates(output) {
        if fs::try_exists(&candidate).await? {
            fs::rename(&candidate, output).await?;
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}
