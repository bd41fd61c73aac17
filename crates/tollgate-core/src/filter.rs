//! Substring domain blocklist with flat-file persistence.
//!
//! A host is blocked when it contains any listed entry as a substring. The
//! comparison is case-sensitive and unanchored, so `ads` blocks both
//! `ads.example.com` and `downloads.example.org`.
//!
//! The list file holds one entry per line and is rewritten in full, while
//! the write lock is held, after every successful mutation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

/// Errors from filter list persistence.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Reading or writing the list file failed.
    #[error("filter list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for filter operations.
pub type Result<T> = std::result::Result<T, FilterError>;

/// Mutable blocklist shared by every connection handler.
#[derive(Debug, Default)]
pub struct DomainFilter {
    entries: RwLock<Vec<String>>,
    path: Option<PathBuf>,
}

impl DomainFilter {
    /// Creates an empty list that is not persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a non-persisted list from the given entries.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Vec::new();
        for entry in entries {
            let entry = entry.into();
            if !entry.is_empty() && !list.contains(&entry) {
                list.push(entry);
            }
        }
        Self {
            entries: RwLock::new(list),
            path: None,
        }
    }

    /// Loads the list from `path`. A missing file yields an empty list.
    ///
    /// Lines are trimmed; blank lines and repeated entries are skipped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(FilterError::Io { path, source }),
        };

        let mut filter = Self::from_entries(contents.lines().map(str::trim));
        debug!(
            "Loaded {} filter entries from {}",
            filter.entries.read().len(),
            path.display()
        );
        filter.path = Some(path);
        Ok(filter)
    }

    /// Path of the backing file, if persisted.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true if `host` contains any listed entry.
    pub fn blocks(&self, host: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|entry| host.contains(entry.as_str()))
    }

    /// Appends an entry and persists the list.
    ///
    /// Returns `false` without touching the file when the entry is already
    /// listed or blank.
    pub fn add(&self, host: &str) -> Result<bool> {
        let host = host.trim();
        if host.is_empty() {
            return Ok(false);
        }

        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry == host) {
            return Ok(false);
        }
        entries.push(host.to_string());
        if let Err(e) = self.persist(&entries) {
            entries.pop();
            return Err(e);
        }
        Ok(true)
    }

    /// Removes an entry and persists the list.
    ///
    /// Returns `false` without touching the file when the entry is absent.
    pub fn remove(&self, host: &str) -> Result<bool> {
        let host = host.trim();
        let mut entries = self.entries.write();
        let Some(index) = entries.iter().position(|entry| entry == host) else {
            return Ok(false);
        };
        let removed = entries.remove(index);
        if let Err(e) = self.persist(&entries) {
            entries.insert(index, removed);
            return Err(e);
        }
        Ok(true)
    }

    /// Current entries in insertion order.
    pub fn list(&self) -> Vec<String> {
        self.entries.read().clone()
    }

    fn persist(&self, entries: &[String]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut contents = String::new();
        for entry in entries {
            contents.push_str(entry);
            contents.push('\n');
        }
        fs::write(path, contents).map_err(|source| FilterError::Io {
            path: path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn blocks_by_substring() {
        let filter = DomainFilter::from_entries(["ads", "tracker.net"]);

        assert!(filter.blocks("ads.example.com"));
        assert!(filter.blocks("downloads.example.org"));
        assert!(filter.blocks("cdn.tracker.net:443"));
        assert!(!filter.blocks("example.com"));
    }

    #[test]
    fn blocking_is_case_sensitive() {
        let filter = DomainFilter::from_entries(["Example"]);
        assert!(filter.blocks("www.Example.com"));
        assert!(!filter.blocks("www.example.com"));
    }

    #[test]
    fn empty_list_blocks_nothing() {
        let filter = DomainFilter::in_memory();
        assert!(!filter.blocks("anything"));
        assert!(!filter.blocks(""));
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let filter = DomainFilter::load(dir.path().join("filtered_domains.txt")).unwrap();
        assert!(filter.list().is_empty());
    }

    #[test]
    fn load_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filtered_domains.txt");
        fs::write(&path, "a.com\n\n  b.com  \na.com\n").unwrap();

        let filter = DomainFilter::load(&path).unwrap();
        assert_eq!(filter.list(), vec!["a.com", "b.com"]);
        assert!(!filter.blocks("c.org"));
    }

    #[test]
    fn add_persists_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filtered_domains.txt");
        let filter = DomainFilter::load(&path).unwrap();

        assert!(filter.add("example.com").unwrap());
        assert!(!filter.add("example.com").unwrap());
        assert_eq!(filter.list(), vec!["example.com"]);
        assert_eq!(read_lines(&path), vec!["example.com"]);
    }

    #[test]
    fn add_then_remove_restores_prior_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filtered_domains.txt");
        fs::write(&path, "keep.org\n").unwrap();
        let filter = DomainFilter::load(&path).unwrap();
        let before = filter.list();

        filter.add("temp.net").unwrap();
        assert_eq!(read_lines(&path), vec!["keep.org", "temp.net"]);

        assert!(filter.remove("temp.net").unwrap());
        assert_eq!(filter.list(), before);
        assert_eq!(read_lines(&path), before);
    }

    #[test]
    fn remove_absent_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filtered_domains.txt");
        let filter = DomainFilter::load(&path).unwrap();

        assert!(!filter.remove("missing.com").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn blank_entries_are_ignored() {
        let filter = DomainFilter::in_memory();
        assert!(!filter.add("   ").unwrap());
        assert!(filter.list().is_empty());
    }

    #[test]
    fn reload_sees_persisted_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filtered_domains.txt");
        {
            let filter = DomainFilter::load(&path).unwrap();
            filter.add("one.com").unwrap();
            filter.add("two.com").unwrap();
            filter.remove("one.com").unwrap();
        }
        let filter = DomainFilter::load(&path).unwrap();
        assert_eq!(filter.list(), vec!["two.com"]);
    }

    #[test]
    fn failed_persist_rolls_back() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be written as a file.
        let filter = DomainFilter {
            entries: RwLock::new(Vec::new()),
            path: Some(dir.path().to_path_buf()),
        };

        assert!(filter.add("x.com").is_err());
        assert!(filter.list().is_empty());
    }
}
