use std::sync::Arc;
use std::time::Duration;

use activestore_memcache::{CasStatus, Client, ClientOption, with_dial_timeout, with_socket_timeout};

use crate::config::ConnectionConfig;
use crate::error::StoreResult;

/// Raw bytes plus the version token needed for a compare-and-swap write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub version: u64,
}

/// Result of a single conditional write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasWrite {
    Stored,
    /// The item changed since the version was read.
    Exists,
    /// The item disappeared since the version was read.
    NotFound,
}

/// Byte-level key-value operations. Keys arrive validated and namespaced.
pub trait Backend: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn gets(&self, key: &str) -> StoreResult<Option<VersionedValue>>;

    fn set(&self, key: &str, value: &[u8], ttl: u32) -> StoreResult<()>;

    /// Stores only when the key is absent. `false` means nothing was written.
    fn add(&self, key: &str, value: &[u8], ttl: u32) -> StoreResult<bool>;

    fn cas(&self, key: &str, value: &[u8], ttl: u32, version: u64) -> StoreResult<CasWrite>;

    fn incr(&self, key: &str, delta: u64) -> StoreResult<Option<u64>>;

    fn delete(&self, key: &str) -> StoreResult<bool>;

    fn flush_all(&self) -> StoreResult<()>;

    /// Cheap round trip used to verify a fresh handle before it is cached.
    fn probe(&self) -> StoreResult<()>;
}

impl<T> Backend for Arc<T>
where
    T: Backend + ?Sized,
{
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn gets(&self, key: &str) -> StoreResult<Option<VersionedValue>> {
        (**self).gets(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: u32) -> StoreResult<()> {
        (**self).set(key, value, ttl)
    }

    fn add(&self, key: &str, value: &[u8], ttl: u32) -> StoreResult<bool> {
        (**self).add(key, value, ttl)
    }

    fn cas(&self, key: &str, value: &[u8], ttl: u32, version: u64) -> StoreResult<CasWrite> {
        (**self).cas(key, value, ttl, version)
    }

    fn incr(&self, key: &str, delta: u64) -> StoreResult<Option<u64>> {
        (**self).incr(key, delta)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key)
    }

    fn flush_all(&self) -> StoreResult<()> {
        (**self).flush_all()
    }

    fn probe(&self) -> StoreResult<()> {
        (**self).probe()
    }
}

/// Builds a backend handle for a connection configuration.
pub trait Connector: Send + Sync {
    type Backend: Backend;

    fn connect(&self, config: &ConnectionConfig) -> StoreResult<Self::Backend>;
}

impl Backend for Client {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(Client::get(self, key.as_bytes())?.map(|item| item.value))
    }

    fn gets(&self, key: &str) -> StoreResult<Option<VersionedValue>> {
        Ok(Client::get(self, key.as_bytes())?.map(|item| VersionedValue {
            value: item.value,
            version: item.cas,
        }))
    }

    fn set(&self, key: &str, value: &[u8], ttl: u32) -> StoreResult<()> {
        Client::set(self, key.as_bytes(), value, ttl)?;
        Ok(())
    }

    fn add(&self, key: &str, value: &[u8], ttl: u32) -> StoreResult<bool> {
        Ok(Client::add(self, key.as_bytes(), value, ttl)?)
    }

    fn cas(&self, key: &str, value: &[u8], ttl: u32, version: u64) -> StoreResult<CasWrite> {
        let status = Client::cas(self, key.as_bytes(), value, ttl, version)?;
        Ok(match status {
            CasStatus::Stored => CasWrite::Stored,
            CasStatus::Exists => CasWrite::Exists,
            CasStatus::NotFound => CasWrite::NotFound,
        })
    }

    fn incr(&self, key: &str, delta: u64) -> StoreResult<Option<u64>> {
        Ok(Client::incr(self, key.as_bytes(), delta)?)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(Client::delete(self, key.as_bytes())?)
    }

    fn flush_all(&self) -> StoreResult<()> {
        Ok(Client::flush_all(self)?)
    }

    fn probe(&self) -> StoreResult<()> {
        Client::version(self)?;
        Ok(())
    }
}

/// Dials memcached at the configured endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemcacheConnector {
    pub dial_timeout: Duration,
    pub socket_timeout: Duration,
}

impl Default for MemcacheConnector {
    fn default() -> Self {
        Self {
            dial_timeout: activestore_memcache::DEFAULT_DIAL_TIMEOUT,
            socket_timeout: activestore_memcache::DEFAULT_SOCKET_TIMEOUT,
        }
    }
}

impl MemcacheConnector {
    fn client_options(&self) -> [ClientOption; 2] {
        [
            with_dial_timeout(self.dial_timeout),
            with_socket_timeout(self.socket_timeout),
        ]
    }
}

impl Connector for MemcacheConnector {
    type Backend = Client;

    fn connect(&self, config: &ConnectionConfig) -> StoreResult<Client> {
        Ok(activestore_memcache::dial(
            &config.endpoint,
            self.client_options(),
        )?)
    }
}
