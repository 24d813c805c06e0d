//! In-memory remote store for tests. Not wired into any server path.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{LogEngineError, Result};
use crate::model::RemoteFileDescriptor;
use crate::webdav::RemoteStore;

/// Keyed by file name; listing order is the name order, which tests lean on
/// for deterministic discovery ordinals.
#[derive(Default)]
pub struct MockRemoteStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    not_found: Mutex<HashSet<String>>,
    connection_fail: Mutex<HashSet<String>>,
    auth_fail: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let store = Self::new();
        for (name, content) in files {
            store.put(name, content);
        }
        store
    }

    pub fn put(&self, name: &str, content: &str) {
        lock(&self.files).insert(name.to_string(), content.as_bytes().to_vec());
    }

    /// Reads of `name` fail as if the file vanished after listing.
    pub fn fail_not_found(&self, name: &str) {
        lock(&self.not_found).insert(name.to_string());
    }

    pub fn fail_connection(&self, name: &str) {
        lock(&self.connection_fail).insert(name.to_string());
    }

    pub fn fail_auth(&self, name: &str) {
        lock(&self.auth_fail).insert(name.to_string());
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn descriptor(&self, name: &str) -> RemoteFileDescriptor {
        let size_bytes = lock(&self.files).get(name).map(|b| b.len() as u64).unwrap_or(0);
        RemoteFileDescriptor { name: name.to_string(), size_bytes, last_modified: fixed_mtime() }
    }

    fn check_failures(&self, name: &str) -> Result<()> {
        if lock(&self.auth_fail).contains(name) {
            return Err(LogEngineError::Auth(format!("mock auth failure for {name}")));
        }
        if lock(&self.connection_fail).contains(name) {
            return Err(LogEngineError::Connection(format!("mock connection reset for {name}")));
        }
        if lock(&self.not_found).contains(name) {
            return Err(LogEngineError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn bytes_of(&self, name: &str) -> Result<Vec<u8>> {
        self.check_failures(name)?;
        lock(&self.files)
            .get(name)
            .cloned()
            .ok_or_else(|| LogEngineError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn list_directory(&self) -> Result<Vec<RemoteFileDescriptor>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.files)
            .iter()
            .map(|(name, bytes)| RemoteFileDescriptor {
                name: name.clone(),
                size_bytes: bytes.len() as u64,
                last_modified: fixed_mtime(),
            })
            .collect())
    }

    async fn fetch_range(&self, file_name: &str, suffix_len: u64) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let bytes = self.bytes_of(file_name)?;
        let start = bytes.len().saturating_sub(suffix_len as usize);
        Ok(bytes[start..].to_vec())
    }

    async fn fetch_full(&self, file_name: &str) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.bytes_of(file_name)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fixed_mtime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now)
}
