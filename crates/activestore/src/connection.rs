use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{Backend, CasWrite, Connector};
use crate::codec;
use crate::config::ConnectionConfig;
use crate::error::{StoreError, StoreResult};

/// Longest key the backend accepts, in bytes.
pub const MAX_KEY_BYTES: usize = activestore_memcache::MAX_KEY_LEN;

/// Result of a read-transform-conditional-write cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// Nothing stored under the key; the transform was not run.
    NotFound,
    /// Someone else wrote the key between the read and the write.
    Conflict,
    Success,
}

/// Rejects keys the backend would refuse, before any network traffic.
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.trim().is_empty() {
        return Err(StoreError::KeyValidation("key cannot be blank".to_string()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(StoreError::KeyValidation(format!(
            "key too long: {} bytes, max {MAX_KEY_BYTES}",
            key.len()
        )));
    }
    Ok(())
}

/// Namespaced key-value access for one [`ConnectionConfig`].
///
/// The backend handle is built on first use and verified with a probe. A
/// failed connect or probe is not remembered, so the next call tries again.
pub struct Connection<C: Connector> {
    config: ConnectionConfig,
    connector: Option<Arc<C>>,
    backend: Mutex<Option<Arc<C::Backend>>>,
}

impl<C: Connector> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Connection<C> {
    pub fn new(config: ConnectionConfig, connector: Arc<C>) -> Self {
        Self {
            config,
            connector: Some(connector),
            backend: Mutex::new(None),
        }
    }

    /// Wraps an already-built backend. No probe is run.
    pub fn with_backend(config: ConnectionConfig, backend: C::Backend) -> Self {
        Self {
            config,
            connector: None,
            backend: Mutex::new(Some(Arc::new(backend))),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn default_ttl(&self) -> u32 {
        self.config.default_ttl
    }

    /// Whether a verified backend handle is currently held.
    pub fn is_connected(&self) -> bool {
        self.backend
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.get_raw(key)?
            .map(|raw| codec::decode(&raw))
            .transpose()
    }

    pub fn get_raw(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = self.namespaced(key)?;
        self.backend()?.get(&key)
    }

    pub fn set(&self, key: &str, value: &Value, ttl: u32) -> StoreResult<()> {
        self.set_raw(key, &codec::encode(value), ttl)
    }

    pub fn set_raw(&self, key: &str, raw: &[u8], ttl: u32) -> StoreResult<()> {
        let key = self.namespaced(key)?;
        self.backend()?.set(&key, raw, ttl)
    }

    /// Stores `value` only if nothing is stored under `key`.
    pub fn add(&self, key: &str, value: &Value, ttl: u32) -> StoreResult<bool> {
        self.add_raw(key, &codec::encode(value), ttl)
    }

    pub fn add_raw(&self, key: &str, raw: &[u8], ttl: u32) -> StoreResult<bool> {
        let key = self.namespaced(key)?;
        let added = self.backend()?.add(&key, raw, ttl)?;
        if !added {
            debug!(key = %key, "add skipped, key already present");
        }
        Ok(added)
    }

    /// Reads the value and its version, runs `transform` once on it and writes
    /// the result only if the version is still current.
    pub fn cas<F>(&self, key: &str, ttl: u32, transform: F) -> StoreResult<CasOutcome>
    where
        F: FnOnce(Value) -> StoreResult<Value>,
    {
        let key = self.namespaced(key)?;
        let backend = self.backend()?;
        let Some(current) = backend.gets(&key)? else {
            return Ok(CasOutcome::NotFound);
        };
        let next = transform(codec::decode(&current.value)?)?;
        match backend.cas(&key, &codec::encode(&next), ttl, current.version)? {
            CasWrite::Stored => Ok(CasOutcome::Success),
            CasWrite::Exists | CasWrite::NotFound => {
                debug!(key = %key, version = current.version, "cas conflict");
                Ok(CasOutcome::Conflict)
            }
        }
    }

    /// Adds `delta` to a stored decimal counter. `None` when the key is absent.
    pub fn incr(&self, key: &str, delta: u64) -> StoreResult<Option<u64>> {
        let key = self.namespaced(key)?;
        self.backend()?.incr(&key, delta)
    }

    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let key = self.namespaced(key)?;
        self.backend()?.delete(&key)
    }

    /// Drops every item on the server, not only this namespace.
    pub fn flush_all(&self) -> StoreResult<()> {
        self.backend()?.flush_all()
    }

    fn namespaced(&self, key: &str) -> StoreResult<String> {
        validate_key(key)?;
        let full = format!("{}:{key}", self.config.namespace);
        if full.len() > MAX_KEY_BYTES {
            return Err(StoreError::KeyValidation(format!(
                "namespaced key too long: {} bytes, max {MAX_KEY_BYTES}",
                full.len()
            )));
        }
        Ok(full)
    }

    fn backend(&self) -> StoreResult<Arc<C::Backend>> {
        let mut slot = self
            .backend
            .lock()
            .map_err(|_| StoreError::Backend("connection mutex poisoned".to_string()))?;
        if let Some(backend) = slot.as_ref() {
            return Ok(Arc::clone(backend));
        }
        let Some(connector) = self.connector.as_ref() else {
            return Err(StoreError::BackendUnreachable(
                "no connector configured".to_string(),
            ));
        };

        debug!(
            endpoint = %self.config.endpoint,
            namespace = %self.config.namespace,
            "connecting"
        );
        let backend = connector
            .connect(&self.config)
            .and_then(|backend| backend.probe().map(|()| backend))
            .map_err(|err| {
                warn!(endpoint = %self.config.endpoint, error = %err, "backend probe failed");
                match err {
                    StoreError::BackendUnreachable(_) => err,
                    other => StoreError::BackendUnreachable(other.to_string()),
                }
            })?;
        let backend = Arc::new(backend);
        *slot = Some(Arc::clone(&backend));
        Ok(backend)
    }
}
