use crate::backend::{Backend, CasWrite, Connector, VersionedValue};
use crate::config::ConnectionConfig;
use crate::error::{StoreError, StoreResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Expirations above this many seconds are absolute unix timestamps.
const RELATIVE_TTL_LIMIT: u32 = 30 * 24 * 3600;

#[derive(Clone, Debug)]
struct Entry {
    value: Vec<u8>,
    version: u64,
    expires_at: Option<u64>,
}

#[derive(Clone, Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, Entry>,
    next_version: u64,
    unavailable: bool,
    clock_offset: u64,
    operations: u64,
    connects: u64,
}

impl MemoryState {
    fn now(&self) -> u64 {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        since_epoch.as_secs() + self.clock_offset
    }

    fn allocate_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn expires_at(&self, ttl: u32) -> Option<u64> {
        match ttl {
            0 => None,
            ttl if ttl <= RELATIVE_TTL_LIMIT => Some(self.now() + u64::from(ttl)),
            absolute => Some(u64::from(absolute)),
        }
    }

    /// Drops the entry if it has expired and returns what is left.
    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        let now = self.now();
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|expires_at| expires_at <= now);
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn store(&mut self, key: &str, value: &[u8], ttl: u32) {
        let version = self.allocate_version();
        let expires_at = self.expires_at(ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                version,
                expires_at,
            },
        );
    }
}

/// In-process backend with memcached semantics: version tokens, atomic add and
/// cas, and TTL expiry (0 never expires, up to 30 days is relative, larger
/// values are absolute unix times).
///
/// Clones share state, so a clone handed out by [`Connector::connect`] sees the
/// same data as the original, like two clients of one server.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory backend mutex poisoned".to_string()))
    }

    /// Counts the call and fails it when the backend is switched off.
    fn begin(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock()?;
        state.operations += 1;
        if state.unavailable {
            return Err(StoreError::BackendUnreachable(
                "memory backend switched off".to_string(),
            ));
        }
        Ok(state)
    }

    /// Simulates the server going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.lock() {
            state.unavailable = !available;
        }
    }

    /// Moves the backend clock forward, expiring entries as time passes.
    pub fn advance_clock(&self, seconds: u64) {
        if let Ok(mut state) = self.lock() {
            state.clock_offset += seconds;
        }
    }

    /// Number of operations that reached the backend, probes included.
    pub fn operations(&self) -> u64 {
        self.lock().map(|state| state.operations).unwrap_or_default()
    }

    /// Number of times a handle was requested through [`Connector::connect`].
    pub fn connects(&self) -> u64 {
        self.lock().map(|state| state.connects).unwrap_or_default()
    }

    /// Keys currently stored, namespaced, expired ones excluded.
    pub fn keys(&self) -> Vec<String> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let now = state.now();
        state
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_none_or(|at| at > now))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut state = self.begin()?;
        Ok(state.live_entry(key).map(|entry| entry.value.clone()))
    }

    fn gets(&self, key: &str) -> StoreResult<Option<VersionedValue>> {
        let mut state = self.begin()?;
        Ok(state.live_entry(key).map(|entry| VersionedValue {
            value: entry.value.clone(),
            version: entry.version,
        }))
    }

    fn set(&self, key: &str, value: &[u8], ttl: u32) -> StoreResult<()> {
        let mut state = self.begin()?;
        state.store(key, value, ttl);
        Ok(())
    }

    fn add(&self, key: &str, value: &[u8], ttl: u32) -> StoreResult<bool> {
        let mut state = self.begin()?;
        if state.live_entry(key).is_some() {
            return Ok(false);
        }
        state.store(key, value, ttl);
        Ok(true)
    }

    fn cas(&self, key: &str, value: &[u8], ttl: u32, version: u64) -> StoreResult<CasWrite> {
        let mut state = self.begin()?;
        let current = match state.live_entry(key) {
            Some(entry) => entry.version,
            None => return Ok(CasWrite::NotFound),
        };
        if current != version {
            return Ok(CasWrite::Exists);
        }
        state.store(key, value, ttl);
        Ok(CasWrite::Stored)
    }

    fn incr(&self, key: &str, delta: u64) -> StoreResult<Option<u64>> {
        let mut state = self.begin()?;
        let version = state.allocate_version();
        let Some(entry) = state.live_entry(key) else {
            return Ok(None);
        };
        let current = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|text| text.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                StoreError::Backend(format!("cannot increment non-numeric value at {key}"))
            })?;
        let next = current.wrapping_add(delta);
        entry.value = next.to_string().into_bytes();
        entry.version = version;
        Ok(Some(next))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut state = self.begin()?;
        let existed = state.live_entry(key).is_some();
        state.entries.remove(key);
        Ok(existed)
    }

    fn flush_all(&self) -> StoreResult<()> {
        let mut state = self.begin()?;
        state.entries.clear();
        Ok(())
    }

    fn probe(&self) -> StoreResult<()> {
        self.begin().map(|_| ())
    }
}

impl Connector for MemoryBackend {
    type Backend = MemoryBackend;

    fn connect(&self, _config: &ConnectionConfig) -> StoreResult<MemoryBackend> {
        let mut state = self.lock()?;
        state.connects += 1;
        Ok(self.clone())
    }
}
