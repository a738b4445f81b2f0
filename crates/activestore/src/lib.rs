pub mod backend;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod record;
pub mod retry;
pub mod store;
pub mod update;

pub use backend::{Backend, CasWrite, Connector, MemcacheConnector, VersionedValue};
pub use config::{ConnectionConfig, DEFAULT_ENDPOINT, DEFAULT_TTL, Settings};
pub use connection::{CasOutcome, Connection, MAX_KEY_BYTES, validate_key};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use record::{CREATED_AT_FIELD, ID_FIELD, Record, RecordSchema, Schema};
pub use retry::{RetryBackoffConfig, RetryPolicy, delay_for_attempt_ms};
pub use store::RecordStore;
pub use update::{SpinOutcome, WriteOutcome};
