//! Library directory scanner.
//!
//! Walks the configured library root for supported source files (.pdf,
//! .epub) and exposes them by display name. Listing never fails on a
//! missing directory; it returns an empty library and logs a warning.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::models::SourceFormat;

/// A candidate source file found in the library directory.
#[derive(Debug, Clone)]
pub struct LibraryFile {
    pub path: PathBuf,
    pub file_name: String,
    /// Filename without extension; what users select by.
    pub display_name: String,
    pub format: SourceFormat,
    pub size_bytes: u64,
}

/// Scan the library root for supported files, sorted by filename.
pub fn scan_library(root: &Path) -> Vec<LibraryFile> {
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "library directory does not exist");
        return Vec::new();
    }

    let mut files: Vec<LibraryFile> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable library entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let format = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| SourceFormat::from_extension(&e))
        {
            Some(f) => f,
            None => continue,
        };
        let size_bytes = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot stat library file");
                continue;
            }
        };
        let file_name = entry.file_name().to_string_lossy().to_string();
        let display_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());
        files.push(LibraryFile {
            path: path.to_path_buf(),
            file_name,
            display_name,
            format,
            size_bytes,
        });
    }

    files.sort_by(|a, b| a.file_name.to_lowercase().cmp(&b.file_name.to_lowercase()));
    files
}

/// Find a library file by display name or full filename.
pub fn find_by_name(root: &Path, name: &str) -> Option<LibraryFile> {
    scan_library(root)
        .into_iter()
        .find(|f| f.display_name == name || f.file_name == name)
}

/// Human-readable file size, e.g. "1.5 MB".
pub fn format_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_yields_empty_library() {
        let files = scan_library(Path::new("/definitely/not/a/real/dir"));
        assert!(files.is_empty());
    }

    #[test]
    fn scans_only_supported_extensions() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("novel.pdf"), b"%PDF fake").unwrap();
        std::fs::write(dir.path().join("stories.EPUB"), b"PK fake").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"plain").unwrap();

        let files = scan_library(dir.path());
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].display_name, "novel");
        assert_eq!(files[0].format, SourceFormat::Pdf);
        assert_eq!(files[1].format, SourceFormat::Epub);
    }

    #[test]
    fn finds_by_display_name_and_filename() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("novel.pdf"), b"%PDF fake").unwrap();

        assert!(find_by_name(dir.path(), "novel").is_some());
        assert!(find_by_name(dir.path(), "novel.pdf").is_some());
        assert!(find_by_name(dir.path(), "missing").is_none());
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(2 * 1024 * 1024), "2.0 MB");
    }
}
