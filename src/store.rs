//! Document stores: the vault on disk, or an in-memory map for tests and
//! embedding.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ignore::WalkBuilder;
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::filter::PathFilter;

/// Read/write access to the documents of one vault.
///
/// Identifiers are forward-slash paths relative to the vault root,
/// including the `.md` extension.
pub trait DocumentStore: Send + Sync {
    /// Snapshot of every document identifier, sorted.
    fn list_documents(&self) -> Result<Vec<String>>;

    fn content(&self, id: &str) -> Result<String>;

    fn write_content(&self, id: &str, text: &str) -> Result<()>;
}

/// Normalize a relative path to the identifier form.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut trimmed = unified.trim();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

/// Markdown files under a directory, honoring `.gitignore` and skipping
/// hidden entries.
pub struct FsStore {
    root: PathBuf,
    ignore: PathFilter,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignore: PathFilter::default(),
        }
    }

    pub fn with_ignore(mut self, ignore: PathFilter) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DocumentStore for FsStore {
    fn list_documents(&self) -> Result<Vec<String>> {
        let meta = fs::metadata(&self.root).map_err(|source| VaultError::StoreUnavailable {
            path: self.root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(VaultError::StoreUnavailable {
                path: self.root.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .require_git(false);

        let mut ids = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unwalkable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) || !is_markdown(entry.path()) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let id = normalize_path(&rel.to_string_lossy());
            if self.ignore.matches(&id) {
                continue;
            }
            ids.push(id);
        }

        ids.sort();
        debug!(root = %self.root.display(), documents = ids.len(), "listed vault");
        Ok(ids)
    }

    fn content(&self, id: &str) -> Result<String> {
        fs::read_to_string(self.root.join(id)).map_err(|source| VaultError::DocumentUnreadable {
            id: id.to_string(),
            source,
        })
    }

    fn write_content(&self, id: &str, text: &str) -> Result<()> {
        fs::write(self.root.join(id), text).map_err(|source| VaultError::DocumentUnwritable {
            id: id.to_string(),
            source,
        })
    }
}

/// An in-memory vault. Identifiers can be marked unreadable to simulate
/// per-document I/O failures.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<String, String>>,
    unreadable: BTreeSet<String>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, id: &str, text: &str) -> Self {
        if let Ok(mut docs) = self.documents.write() {
            docs.insert(normalize_path(id), text.to_string());
        }
        self
    }

    /// Listed, but every read fails.
    pub fn with_unreadable(mut self, id: &str) -> Self {
        let id = normalize_path(id);
        self.unreadable.insert(id.clone());
        if let Ok(mut docs) = self.documents.write() {
            docs.entry(id).or_default();
        }
        self
    }

    /// Every write fails.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.documents.read().ok()?.get(id).cloned()
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "store lock poisoned")
}

impl DocumentStore for MemoryStore {
    fn list_documents(&self) -> Result<Vec<String>> {
        let docs = self.documents.read().map_err(|_| VaultError::StoreUnavailable {
            path: PathBuf::from("<memory>"),
            source: poisoned(),
        })?;
        Ok(docs.keys().cloned().collect())
    }

    fn content(&self, id: &str) -> Result<String> {
        let unreadable = |source| VaultError::DocumentUnreadable {
            id: id.to_string(),
            source,
        };
        if self.unreadable.contains(id) {
            return Err(unreadable(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "marked unreadable",
            )));
        }
        let docs = self.documents.read().map_err(|_| unreadable(poisoned()))?;
        docs.get(id)
            .cloned()
            .ok_or_else(|| unreadable(io::Error::new(io::ErrorKind::NotFound, "no such document")))
    }

    fn write_content(&self, id: &str, text: &str) -> Result<()> {
        let unwritable = |source| VaultError::DocumentUnwritable {
            id: id.to_string(),
            source,
        };
        if self.read_only {
            return Err(unwritable(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "store is read-only",
            )));
        }
        let mut docs = self.documents.write().map_err(|_| unwritable(poisoned()))?;
        docs.insert(id.to_string(), text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./notes//a.md"), "notes/a.md");
        assert_eq!(normalize_path("notes\\sub\\b.md"), "notes/sub/b.md");
        assert_eq!(normalize_path("projects/"), "projects");
        assert_eq!(normalize_path("  ./././x.md "), "x.md");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_fs_store_lists_markdown_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        fs::write(dir.path().join("a.md"), "alpha").unwrap();
        fs::write(dir.path().join("sub/b.MD"), "beta").unwrap();
        fs::write(dir.path().join("sub/c.txt"), "gamma").unwrap();
        fs::write(dir.path().join(".obsidian/workspace.md"), "hidden").unwrap();

        let store = FsStore::new(dir.path());
        let ids = store.list_documents().unwrap();
        assert_eq!(ids, vec!["a.md".to_string(), "sub/b.MD".to_string()]);
        assert_eq!(store.content("a.md").unwrap(), "alpha");
    }

    #[test]
    fn test_fs_store_ignore_filter() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("templates")).unwrap();
        fs::write(dir.path().join("a.md"), "").unwrap();
        fs::write(dir.path().join("templates/daily.md"), "").unwrap();

        let store = FsStore::new(dir.path()).with_ignore(PathFilter::new(&["templates/"]).unwrap());
        assert_eq!(store.list_documents().unwrap(), vec!["a.md".to_string()]);
    }

    #[test]
    fn test_missing_root_is_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("nope"));
        let err = store.list_documents().unwrap_err();
        assert!(matches!(err, VaultError::StoreUnavailable { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_memory_store_unreadable_is_listed() {
        let store = MemoryStore::new()
            .with_document("a.md", "x")
            .with_unreadable("b.md");
        assert_eq!(store.list_documents().unwrap(), vec!["a.md", "b.md"]);
        assert!(matches!(
            store.content("b.md"),
            Err(VaultError::DocumentUnreadable { .. })
        ));
    }
}
