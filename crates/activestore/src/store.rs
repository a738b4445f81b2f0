use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::backend::{Connector, MemcacheConnector};
use crate::config::{ConnectionConfig, Settings};
use crate::connection::{Connection, validate_key};
use crate::error::{StoreError, StoreResult};
use crate::record::{Record, RecordSchema, Schema};
use crate::retry::RetryPolicy;

/// Persistence entry point for records of type `T`.
///
/// Holds the type's settings, the shared base settings and a memoized
/// [`Connection`]. Changing any setting drops the memoized connection; the
/// next operation builds a fresh one from the resolved configuration.
pub struct RecordStore<T: Schema, C: Connector> {
    connector: Arc<C>,
    settings: Settings,
    base: Settings,
    retry_policy: RetryPolicy,
    connection: Mutex<Option<Arc<Connection<C>>>>,
    _schema: PhantomData<fn() -> T>,
}

impl<T: Schema, C: Connector> std::fmt::Debug for RecordStore<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("schema", &T::NAME)
            .field("settings", &self.settings)
            .field("base", &self.base)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl<T: Schema> RecordStore<T, MemcacheConnector> {
    /// Store backed by memcached with default client timeouts.
    pub fn memcached() -> Self {
        Self::new(MemcacheConnector::default())
    }
}

impl<T: Schema, C: Connector> RecordStore<T, C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            settings: Settings::default(),
            base: Settings::default(),
            retry_policy: RetryPolicy::default(),
            connection: Mutex::new(None),
            _schema: PhantomData,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self.invalidate();
        self
    }

    /// Settings shared with other record types; only endpoint and TTL are
    /// inherited from them.
    pub fn with_base(mut self, base: Settings) -> Self {
        self.base = base;
        self.invalidate();
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn schema(&self) -> RecordSchema {
        RecordSchema::of::<T>()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn base(&self) -> &Settings {
        &self.base
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        self.settings.resolve(&self.base, T::NAME)
    }

    pub fn set_endpoint(&mut self, endpoint: Option<String>) {
        self.settings.endpoint = endpoint;
        self.invalidate();
    }

    pub fn set_namespace(&mut self, namespace: Option<String>) {
        self.settings.namespace = namespace;
        self.invalidate();
    }

    pub fn set_default_ttl(&mut self, default_ttl: Option<u32>) {
        self.settings.default_ttl = default_ttl;
        self.invalidate();
    }

    pub fn set_base(&mut self, base: Option<Settings>) {
        self.base = base.unwrap_or_default();
        self.invalidate();
    }

    /// Forgets the memoized connection.
    pub fn invalidate(&self) {
        if let Ok(mut slot) = self.connection.lock() {
            if slot.take().is_some() {
                debug!(schema = T::NAME, "connection invalidated");
            }
        }
    }

    /// The memoized connection, built from the current configuration on first
    /// use. Building does not touch the network.
    pub fn connection(&self) -> StoreResult<Arc<Connection<C>>> {
        let mut slot = self
            .connection
            .lock()
            .map_err(|_| StoreError::Backend("record store mutex poisoned".to_string()))?;
        if let Some(connection) = slot.as_ref() {
            return Ok(Arc::clone(connection));
        }
        let connection = Arc::new(Connection::new(
            self.connection_config(),
            Arc::clone(&self.connector),
        ));
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    pub(crate) fn ttl_or_default(connection: &Connection<C>, ttl: Option<u32>) -> u32 {
        ttl.unwrap_or_else(|| connection.default_ttl())
    }

    /// The stored record, or `None` when `id` is empty or nothing is stored.
    pub fn find(&self, id: &str) -> StoreResult<Option<Record<T>>> {
        if id.is_empty() {
            return Ok(None);
        }
        validate_key(id)?;
        let Some(stored) = self.connection()?.get(id)? else {
            return Ok(None);
        };
        let mut record = Record::from_value(stored)?;
        record.id = Some(id.to_string());
        Ok(Some(record))
    }

    /// The stored record, or an unsaved one carrying only `id`.
    pub fn find_or_initialize_by_id(&self, id: &str) -> StoreResult<Record<T>> {
        Ok(self
            .find(id)?
            .unwrap_or_else(|| Record::with_id(id)))
    }

    /// Writes the record unconditionally. Returns `false` and writes nothing
    /// when the record has no identifier.
    pub fn save(&self, record: &Record<T>, ttl: Option<u32>) -> StoreResult<bool> {
        let Some(id) = record.id() else {
            return Ok(false);
        };
        validate_key(id)?;
        let value = record.to_value()?;
        let connection = self.connection()?;
        connection.set(id, &value, Self::ttl_or_default(&connection, ttl))?;
        Ok(true)
    }

    pub fn save_or_fail(&self, record: &Record<T>, ttl: Option<u32>) -> StoreResult<()> {
        record.require_id("save")?;
        self.save(record, ttl).map(|_| ())
    }

    pub fn create(&self, record: Record<T>) -> StoreResult<Record<T>> {
        self.save_or_fail(&record, None)?;
        Ok(record)
    }

    /// Replaces the record's fields and `created_at` with the stored ones.
    /// Returns `false` and leaves the record untouched when nothing is stored.
    pub fn reload(&self, record: &mut Record<T>) -> StoreResult<bool> {
        let id = record.require_id("reload")?.to_string();
        match self.find(&id)? {
            Some(stored) => {
                *record = stored;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies `change` and saves with the default TTL.
    pub fn update<F>(&self, record: &mut Record<T>, change: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut Record<T>),
    {
        change(record);
        self.save(record, None)
    }
}
