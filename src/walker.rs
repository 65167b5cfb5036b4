use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

/// A file found under an ingestion root.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the ingestion root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Identifier stored in each chunk's `file` field: the root directory's
    /// name followed by the relative path, always `/`-separated.
    pub file_id: String,
}

/// Recursively walk a directory and return every regular file in it.
///
/// Skips hidden files/directories (names starting with `.`). No filtering
/// by type happens here: unsupported files are reported and skipped by
/// ingestion so that they show up in its log. Only an unreadable root is
/// an error; unreadable entries below it are logged and skipped.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let root_name = canonical_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &root_name, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    root_name: &str,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %current.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };

        if file_type.is_dir() {
            if let Err(e) = walk_dir(root, &path, root_name, results) {
                warn!(dir = %path.display(), error = %e, "skipping unreadable directory");
            }
        } else if file_type.is_symlink() {
            let resolved = match path.canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            // Directory links are not followed (cycle prevention).
            if resolved.is_file() {
                results.push(make_discovered(root, root_name, &path, resolved));
            }
        } else if file_type.is_file() {
            match path.canonicalize() {
                Ok(abs) => {
                    results.push(make_discovered(root, root_name, &path, abs))
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                }
            }
        }
    }

    Ok(())
}

fn make_discovered(
    root: &Path,
    root_name: &str,
    original_path: &Path,
    absolute_path: PathBuf,
) -> DiscoveredFile {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    let mut parts: Vec<String> = Vec::new();
    if !root_name.is_empty() {
        parts.push(root_name.to_string());
    }
    parts.extend(
        relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string()),
    );

    DiscoveredFile {
        relative_path,
        absolute_path,
        file_id: parts.join("/"),
    }
}
