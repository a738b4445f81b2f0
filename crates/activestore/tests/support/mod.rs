#![allow(dead_code)]

use activestore::{MemoryBackend, Record, RecordStore, RetryBackoffConfig, RetryPolicy, Schema};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub a1: Option<String>,
    pub a2: Option<String>,
    pub count: Option<u64>,
}

impl Schema for Item {
    const NAME: &'static str = "ItemStore";
    const FIELDS: &'static [&'static str] = &["a1", "a2", "count"];
}

pub type ItemStore = RecordStore<Item, MemoryBackend>;

pub fn memory_store() -> (ItemStore, MemoryBackend) {
    let backend = MemoryBackend::new();
    let store = RecordStore::new(backend.clone()).with_retry_policy(RetryPolicy::immediate());
    (store, backend)
}

pub fn no_backoff(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::bounded(max_attempts).with_backoff(RetryBackoffConfig::none())
}

pub fn item(id: &str, a1: &str) -> Record<Item> {
    let mut record: Record<Item> = Record::with_id(id);
    record.fields.a1 = Some(a1.to_string());
    record
}

pub fn increment(record: &mut Record<Item>) {
    record.fields.count = Some(record.fields.count.unwrap_or(0) + 1);
}
