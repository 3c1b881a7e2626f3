//! Local recordings on disk: listing with download links, and deletion

use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use shared::{Component, SourceKey, component_info};

/// One file under a recordings subdirectory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFile {
    /// Subdirectory name (a source key or the ad-hoc folder)
    pub directory: String,
    pub file: String,
    pub url: String,
    pub modified: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct RecordingsLibrary {
    root: PathBuf,
    base_url: String,
}

impl RecordingsLibrary {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.recordings_path.clone(), config.base_recording_url.clone())
    }

    /// Public download URL of `directory/file`
    pub fn url_for(&self, directory: &str, file: &str) -> String {
        if self.base_url.is_empty() || self.base_url.ends_with('/') {
            format!("{}{}/{}", self.base_url, directory, file)
        } else {
            format!("{}/{}/{}", self.base_url, directory, file)
        }
    }

    /// Every file of every subdirectory, ordered by directory then name.
    /// A missing recordings root lists nothing.
    pub async fn list(&self) -> SupervisorResult<Vec<RecordingFile>> {
        let mut recordings = Vec::new();
        for directory in read_names(&self.root, true).await? {
            let dir_path = self.root.join(&directory);
            for file in read_names(&dir_path, false).await? {
                let metadata = tokio::fs::metadata(dir_path.join(&file)).await?;
                let modified = metadata.modified().map(DateTime::<Local>::from)?;
                recordings.push(RecordingFile {
                    url: self.url_for(&directory, &file),
                    directory: directory.clone(),
                    file,
                    modified,
                });
            }
        }
        Ok(recordings)
    }

    /// Remove the local directory of `source` with everything in it
    pub async fn delete_source_dir(&self, source: &SourceKey) -> SupervisorResult<PathBuf> {
        let path = self.root.join(source.as_str());
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                component_info!(Component::Supervisor, "🗑️ Deleted {}", path.display());
                Ok(path)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SupervisorError::not_found("recording folder", source)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sorted entry names of `dir`, keeping either subdirectories or files
async fn read_names(dir: &Path, directories: bool) -> SupervisorResult<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        let wanted = if directories { file_type.is_dir() } else { file_type.is_file() };
        if let (true, Some(name)) = (wanted, entry.file_name().to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Markdown listing grouped by directory, `[file](url)` per line
pub fn render_listing(recordings: &[RecordingFile]) -> String {
    let mut out = String::new();
    let mut current: Option<&str> = None;
    for recording in recordings {
        if current != Some(recording.directory.as_str()) {
            if current.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("**{}:**\n", recording.directory));
            current = Some(recording.directory.as_str());
        }
        out.push_str(&format!("[{}]({})\n", recording.file, recording.url));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(root: &Path) {
        std::fs::create_dir_all(root.join("beta")).unwrap();
        std::fs::create_dir_all(root.join("alpha")).unwrap();
        std::fs::write(root.join("beta/b2.mp4"), b"x").unwrap();
        std::fs::write(root.join("beta/b1.mp4"), b"x").unwrap();
        std::fs::write(root.join("alpha/a.mp4"), b"x").unwrap();
        std::fs::write(root.join("stray.txt"), b"x").unwrap();
    }

    #[tokio::test]
    async fn test_list_groups_and_links() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let library = RecordingsLibrary::new(dir.path(), "https://files.example/rec/");

        let files = library.list().await.unwrap();
        let names: Vec<_> = files.iter().map(|f| format!("{}/{}", f.directory, f.file)).collect();
        assert_eq!(names, vec!["alpha/a.mp4", "beta/b1.mp4", "beta/b2.mp4"]);
        assert_eq!(files[0].url, "https://files.example/rec/alpha/a.mp4");

        let listing = render_listing(&files);
        assert_eq!(
            listing,
            "**alpha:**\n[a.mp4](https://files.example/rec/alpha/a.mp4)\n\n**beta:**\n\
             [b1.mp4](https://files.example/rec/beta/b1.mp4)\n[b2.mp4](https://files.example/rec/beta/b2.mp4)"
        );
    }

    #[test]
    fn test_url_without_trailing_slash() {
        let library = RecordingsLibrary::new("/rec", "https://files.example");
        assert_eq!(library.url_for("chan", "a.mp4"), "https://files.example/chan/a.mp4");
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let library = RecordingsLibrary::new("/nonexistent/recordings", "");
        assert!(library.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_source_dir() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let library = RecordingsLibrary::new(dir.path(), "");
        let beta = SourceKey::new("beta").unwrap();

        let removed = library.delete_source_dir(&beta).await.unwrap();
        assert!(!removed.exists());
        assert!(dir.path().join("alpha/a.mp4").exists());

        let err = library.delete_source_dir(&beta).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
