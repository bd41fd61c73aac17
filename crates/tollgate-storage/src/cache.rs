//! Content-addressed response cache.
//!
//! Entries are keyed by the SHA-256 of the exact request bytes and hold the
//! origin's header block followed by the body, byte for byte as it was
//! streamed. There is no expiry and no eviction; an entry stays until the
//! file is removed from outside.
//!
//! ## Writing
//!
//! A [`CacheWriter`] streams into a private `.part` file in the cache
//! directory and renames it onto the key's path only in
//! [`CacheWriter::commit`]. Dropping a writer without committing deletes the
//! temporary file, so a lookup never sees a half-written entry. At most one
//! writer exists per key at a time; writers for different keys never wait
//! on each other.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{Result, StorageError};

/// Suffix of in-progress entries.
const PART_SUFFIX: &str = ".part";

/// Digest of a raw request, used as the entry's file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hashes the exact request bytes. No normalisation is applied.
    pub fn for_request(raw: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(raw)))
    }

    /// Lowercase hex form of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct CacheState {
    dir: PathBuf,
    /// Keys with a live writer.
    writing: Mutex<HashSet<CacheKey>>,
    next_id: AtomicU64,
}

/// Handle to the on-disk cache directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CacheStore {
    state: Arc<CacheState>,
}

impl CacheStore {
    /// Opens (and creates if needed) the cache directory.
    ///
    /// Leftover `.part` files from an earlier crash are removed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut swept = 0;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_part = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(PART_SUFFIX));
            if is_part && fs::remove_file(&path).is_ok() {
                swept += 1;
            }
        }
        if swept > 0 {
            debug!("Removed {} unfinished cache entries from {}", swept, dir.display());
        }

        Ok(Self {
            state: Arc::new(CacheState {
                dir,
                writing: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.state.dir
    }

    /// Path of the published entry for `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.state.dir.join(key.as_str())
    }

    /// Returns true if a published entry exists for `key`.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        tokio::fs::metadata(self.entry_path(key))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Streams the entry for `key` into `out`.
    ///
    /// Returns `Ok(None)` on a miss and the number of bytes written on a hit.
    pub async fn serve<W>(&self, key: &CacheKey, out: &mut W) -> Result<Option<u64>>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut file = match File::open(self.entry_path(key)).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let written = tokio::io::copy(&mut file, out).await?;
        out.flush().await?;
        Ok(Some(written))
    }

    /// Starts writing an entry for `key`.
    ///
    /// Returns `Ok(None)` when another writer already holds the key; the
    /// caller should then relay without caching.
    pub async fn begin(&self, key: &CacheKey) -> Result<Option<CacheWriter>> {
        if !self.state.writing.lock().insert(key.clone()) {
            debug!("Cache entry {} is already being written", key);
            return Ok(None);
        }

        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let temp_path = self
            .state
            .dir
            .join(format!(".{}.{}.{}{}", key, std::process::id(), id, PART_SUFFIX));

        let file = match File::create(&temp_path).await {
            Ok(file) => file,
            Err(e) => {
                self.state.writing.lock().remove(key);
                return Err(e.into());
            }
        };

        Ok(Some(CacheWriter {
            file,
            temp_path,
            final_path: self.entry_path(key),
            key: key.clone(),
            state: Arc::clone(&self.state),
            written: 0,
            published: false,
        }))
    }
}

/// An entry being written. Publishes on [`commit`](Self::commit), discards
/// on drop.
#[derive(Debug)]
pub struct CacheWriter {
    file: File,
    temp_path: PathBuf,
    final_path: PathBuf,
    key: CacheKey,
    state: Arc<CacheState>,
    written: u64,
    published: bool,
}

impl CacheWriter {
    /// Key being written.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends a chunk to the entry.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|source| StorageError::CacheWrite {
                key: self.key.to_string(),
                source,
            })?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flushes the entry to disk and makes it visible to lookups.
    pub async fn commit(mut self) -> Result<u64> {
        let key = self.key.to_string();
        let to_write_error = |source| StorageError::CacheWrite {
            key: key.clone(),
            source,
        };

        self.file.flush().await.map_err(to_write_error)?;
        self.file.sync_all().await.map_err(to_write_error)?;
        tokio::fs::rename(&self.temp_path, &self.final_path)
            .await
            .map_err(to_write_error)?;

        self.published = true;
        debug!("Published cache entry {} ({} bytes)", self.key, self.written);
        Ok(self.written)
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if !self.published {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to discard {}: {}", self.temp_path.display(), e);
                }
            }
        }
        self.state.writing.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";

    fn entry_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn key_is_stable_hex_sha256() {
        let a = CacheKey::for_request(REQUEST);
        let b = CacheKey::for_request(REQUEST);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn key_has_no_normalisation() {
        let base = CacheKey::for_request(REQUEST);
        let reordered = CacheKey::for_request(b"GET / HTTP/1.1\r\nHost:  example.com\r\n\r\n");
        let one_byte = CacheKey::for_request(b"GET / HTTP/1.1\r\nHost: example.con\r\n\r\n");
        assert_ne!(base, reordered);
        assert_ne!(base, one_byte);
    }

    #[test]
    fn key_known_vector() {
        assert_eq!(
            CacheKey::for_request(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let key = CacheKey::for_request(REQUEST);

        let mut out = Vec::new();
        assert!(store.serve(&key, &mut out).await.unwrap().is_none());
        assert!(out.is_empty());
        assert!(!store.contains(&key).await);
    }

    #[tokio::test]
    async fn committed_entry_serves_identical_bytes() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let key = CacheKey::for_request(REQUEST);

        let mut writer = store.begin(&key).await.unwrap().unwrap();
        writer.write(&RESPONSE[..20]).await.unwrap();
        writer.write(&RESPONSE[20..]).await.unwrap();
        assert_eq!(writer.commit().await.unwrap(), RESPONSE.len() as u64);

        let mut out = Vec::new();
        let served = store.serve(&key, &mut out).await.unwrap();
        assert_eq!(served, Some(RESPONSE.len() as u64));
        assert_eq!(out, RESPONSE);
        assert_eq!(entry_names(dir.path()), vec![key.to_string()]);
    }

    #[tokio::test]
    async fn dropped_writer_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let key = CacheKey::for_request(REQUEST);

        let mut writer = store.begin(&key).await.unwrap().unwrap();
        writer.write(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        drop(writer);

        assert!(!store.contains(&key).await);
        assert!(entry_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn one_writer_per_key() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let key = CacheKey::for_request(REQUEST);
        let other = CacheKey::for_request(b"HEAD / HTTP/1.1\r\n\r\n");

        let first = store.begin(&key).await.unwrap();
        assert!(first.is_some());
        assert!(store.begin(&key).await.unwrap().is_none());
        assert!(store.begin(&other).await.unwrap().is_some());

        drop(first);
        assert!(store.begin(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn open_sweeps_unfinished_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".abc.1.1.part"), b"partial").unwrap();
        fs::write(dir.path().join("abc"), b"complete").unwrap();

        let store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(entry_names(store.dir()), vec!["abc".to_string()]);
    }

    #[tokio::test]
    async fn serve_through_mock_writer() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let key = CacheKey::for_request(REQUEST);

        let mut writer = store.begin(&key).await.unwrap().unwrap();
        writer.write(RESPONSE).await.unwrap();
        writer.commit().await.unwrap();

        let mut client = tokio_test::io::Builder::new().write(RESPONSE).build();
        assert!(store.serve(&key, &mut client).await.unwrap().is_some());
    }
}
