//! Folder source: glob discovery and concurrent loading.
//!
//! A folder source is a directory plus a glob pattern matched against paths
//! relative to that directory. Patterns treat `/` literally, so `*.txt`
//! only matches top-level files while `**/*.txt` descends.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::IndexError;
use crate::models::SourceDocument;

/// Pattern used when a folder is given without one.
pub const DEFAULT_PATTERN: &str = "**/*.*";

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Split `docs/**/*.md` style input into the folder and the pattern.
///
/// The folder is everything before the first component holding a glob
/// character; without one, the last component is the pattern. A single
/// component without a glob character names a folder. A trailing separator
/// yields an empty pattern.
pub fn split_location(location: &str) -> (PathBuf, String) {
    let normalized = location.replace('\\', "/");
    let parts: Vec<&str> = normalized.split('/').collect();
    let at = match parts.iter().position(|p| p.contains(['*', '?', '['])) {
        Some(at) => at,
        None if parts.len() == 1 => return (PathBuf::from(normalized), String::new()),
        None => parts.len() - 1,
    };

    let dir = parts[..at].join("/");
    let dir = match dir.as_str() {
        "" if normalized.starts_with('/') => "/".to_string(),
        "" => ".".to_string(),
        _ => dir,
    };
    (PathBuf::from(dir), parts[at..].join("/"))
}

/// Compile `pattern`, substituting the default for an empty one.
///
/// A pattern without `*` or `?` names a single file rather than a set of
/// files and is rejected.
pub fn compile_pattern(pattern: &str) -> Result<GlobMatcher, IndexError> {
    let pattern = if pattern.trim().is_empty() {
        DEFAULT_PATTERN
    } else {
        pattern
    };
    if !pattern.contains(['*', '?']) {
        return Err(IndexError::InvalidPattern(pattern.to_string()));
    }
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|_| IndexError::InvalidPattern(pattern.to_string()))?;
    Ok(glob.compile_matcher())
}

/// List files under `root` matching `pattern`, sorted.
///
/// Both the folder and the pattern are checked before the directory is
/// walked.
pub fn scan_folder(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, IndexError> {
    if !root.is_dir() {
        return Err(IndexError::MissingFolder(root.display().to_string()));
    }
    let matcher = compile_pattern(pattern)?;
    let excludes = build_globset(&DEFAULT_EXCLUDES)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if excludes.is_match(&rel_str) || !matcher.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Read `paths` with up to `concurrency` reads in flight.
///
/// Files that cannot be read or are not UTF-8 text are skipped with a
/// warning. The result is sorted by source.
pub async fn load_documents(paths: Vec<PathBuf>, concurrency: usize) -> Vec<SourceDocument> {
    let mut documents: Vec<SourceDocument> = stream::iter(paths)
        .map(|path| async move {
            let bytes = tokio::fs::read(&path).await;
            (path, bytes)
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(path, bytes)| async move {
            let bytes = match bytes {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    return None;
                }
            };
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(path = %path.display(), "skipping non-text file");
                    return None;
                }
            };
            Some(file_document(&path, text))
        })
        .collect()
        .await;

    documents.sort_by(|a, b| a.source.cmp(&b.source));
    documents
}

fn file_document(path: &Path, text: String) -> SourceDocument {
    let modified: Option<DateTime<Utc>> = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    let metadata = serde_json::json!({
        "kind": "file",
        "file_name": path.file_name().map(|n| n.to_string_lossy().to_string()),
        "modified": modified.map(|m| m.to_rfc3339()),
    });

    SourceDocument {
        source: path.display().to_string(),
        text,
        metadata_json: metadata.to_string(),
    }
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet, IndexError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|_| IndexError::InvalidPattern(pattern.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::InvalidPattern(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.md"), "# A").unwrap();
        fs::write(dir.path().join("b.txt"), "B").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.md"), "# C").unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config.md"), "ignored").unwrap();
        dir
    }

    #[test]
    fn test_split_location() {
        assert_eq!(
            split_location("docs/*.md"),
            (PathBuf::from("docs"), "*.md".to_string())
        );
        assert_eq!(split_location("docs/"), (PathBuf::from("docs"), String::new()));
        assert_eq!(split_location("*.md"), (PathBuf::from("."), "*.md".to_string()));
        assert_eq!(
            split_location("/srv/docs/**/*.md"),
            (PathBuf::from("/srv/docs"), "**/*.md".to_string())
        );
        assert_eq!(
            split_location("docs/alpha"),
            (PathBuf::from("docs"), "alpha".to_string())
        );
        assert_eq!(
            split_location("no_such_folder"),
            (PathBuf::from("no_such_folder"), String::new())
        );
    }

    #[test]
    fn test_single_missing_folder_reported() {
        let (folder, pattern) = split_location("no_such_folder");
        let err = scan_folder(&folder, &pattern).unwrap_err();
        assert!(matches!(err, IndexError::MissingFolder(_)));
        assert_eq!(err.to_string(), "Folder no_such_folder does not exist");
    }

    #[test]
    fn test_pattern_without_wildcard_rejected() {
        assert!(matches!(
            compile_pattern("notes.md"),
            Err(IndexError::InvalidPattern(p)) if p == "notes.md"
        ));
        assert!(compile_pattern("").is_ok());
        assert!(compile_pattern("?.md").is_ok());
    }

    #[test]
    fn test_scan_top_level_only() {
        let dir = fixture();
        let files = scan_folder(dir.path(), "*.md").unwrap();
        assert_eq!(files, vec![dir.path().join("a.md")]);
    }

    #[test]
    fn test_scan_default_pattern_recurses_and_excludes() {
        let dir = fixture();
        let files = scan_folder(dir.path(), "").unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| !f.to_string_lossy().contains(".git")));
    }

    #[test]
    fn test_missing_folder() {
        let err = scan_folder(Path::new("/definitely/not/here"), "*.md").unwrap_err();
        assert!(matches!(err, IndexError::MissingFolder(_)));
    }

    #[tokio::test]
    async fn test_load_documents_skips_binary() {
        let dir = fixture();
        fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00, 0x81]).unwrap();
        let paths = scan_folder(dir.path(), "**/*.*").unwrap();
        let docs = load_documents(paths, 2).await;
        assert_eq!(docs.len(), 3);
        assert!(docs.windows(2).all(|w| w[0].source <= w[1].source));
        assert!(docs[0].metadata_json.contains("\"kind\":\"file\""));
    }
}
