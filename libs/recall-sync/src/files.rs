//! Watched markdown files: collection, hashing and atomic rewrites.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::SyncError;

/// A markdown file found under a watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFile {
    /// Path relative to its root, with `/` separators. This is the key the
    /// authority knows the file by.
    pub path: String,
    pub absolute: PathBuf,
    pub content: String,
}

/// Compute the SHA-256 hash of content.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Read every `.md` file under the given roots, sorted by relative path.
///
/// A root may also be a single markdown file. When two roots yield the same
/// relative path, the first one wins and the other is skipped with a warning.
pub fn collect_markdown(roots: &[PathBuf]) -> Result<Vec<WatchedFile>, SyncError> {
    let mut found = Vec::new();
    for root in roots {
        if root.is_file() {
            if is_markdown(root) {
                let name = root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                found.push((name, root.clone()));
            }
            continue;
        }
        collect_md_files(root, root, &mut found)?;
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));

    let mut files: Vec<WatchedFile> = Vec::with_capacity(found.len());
    for (path, absolute) in found {
        if files.last().is_some_and(|f| f.path == path) {
            warn!(path = %path, skipped = %absolute.display(), "duplicate watched path");
            continue;
        }
        let content = fs::read_to_string(&absolute)?;
        files.push(WatchedFile {
            path,
            absolute,
            content,
        });
    }
    Ok(files)
}

fn is_markdown(path: &Path) -> bool {
    path.extension().map(|e| e == "md").unwrap_or(false)
}

fn collect_md_files(
    base: &Path,
    dir: &Path,
    found: &mut Vec<(String, PathBuf)>,
) -> Result<(), SyncError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_md_files(base, &path, found)?;
        } else if is_markdown(&path) {
            let relative = path
                .strip_prefix(base)
                .map_err(|e| SyncError::FileSystem(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            found.push((relative, path));
        }
    }
    Ok(())
}

/// Replace several files, each one atomically.
///
/// Every new content is first staged in a temporary file beside its target,
/// so a failure while staging leaves every target untouched. Only then are
/// the temporaries renamed into place one by one; if a rename fails, the
/// targets renamed before it keep their new content and the rest keep the
/// old one.
pub fn write_atomically(files: &[(PathBuf, String)]) -> Result<(), SyncError> {
    let mut staged = Vec::with_capacity(files.len());
    for (target, content) in files {
        let dir = target
            .parent()
            .ok_or_else(|| SyncError::FileSystem(format!("no parent for {}", target.display())))?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;
        staged.push((temp, target));
    }

    for (temp, target) in staged {
        temp.persist(target)
            .map_err(|e| SyncError::FileSystem(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_content("Q: a\nA: b\n");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_content("Q: a\nA: b\n"));
        assert_ne!(hash, hash_content("Q: a\nA: c\n"));
    }

    #[test]
    fn collects_nested_markdown_with_relative_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("rust/advanced")).unwrap();
        fs::write(dir.path().join("rust/basics.md"), "Q: a\nA: b\n").unwrap();
        fs::write(dir.path().join("rust/advanced/traits.md"), "Q: c\nA: d\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = collect_markdown(&[dir.path().to_path_buf()]).unwrap();
        let keys: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(keys, vec!["rust/advanced/traits.md", "rust/basics.md"]);
        assert_eq!(files[1].content, "Q: a\nA: b\n");
    }

    #[test]
    fn missing_root_is_a_file_system_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            collect_markdown(&[missing]),
            Err(SyncError::FileSystem(_))
        ));
    }

    #[test]
    fn atomic_write_replaces_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        fs::write(&a, "old a").unwrap();
        fs::write(&b, "old b").unwrap();

        write_atomically(&[(a.clone(), "new a".into()), (b.clone(), "new b".into())]).unwrap();

        assert_eq!(fs::read_to_string(a).unwrap(), "new a");
        assert_eq!(fs::read_to_string(b).unwrap(), "new b");
    }

    #[test]
    fn failed_staging_leaves_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        fs::write(&a, "old a").unwrap();
        let unreachable = dir.path().join("missing-dir").join("b.md");

        let result = write_atomically(&[(a.clone(), "new a".into()), (unreachable, "b".into())]);

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(a).unwrap(), "old a");
    }

    #[test]
    fn failed_rename_keeps_files_already_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        fs::write(&a, "old a").unwrap();
        fs::create_dir_all(b.join("nested")).unwrap();

        let result = write_atomically(&[(a.clone(), "new a".into()), (b.clone(), "new b".into())]);

        assert!(matches!(result, Err(SyncError::FileSystem(_))));
        assert_eq!(fs::read_to_string(a).unwrap(), "new a");
        assert!(b.is_dir());
        // No staged temporaries are left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
