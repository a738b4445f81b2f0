//! Stored value encoding.
//!
//! A value is serialized as the only element of a JSON array and the enclosing
//! brackets are dropped, so `{"a":1}` is stored as `{"a":1}` and the string
//! `foo` as `"foo"`. Decoding puts the brackets back. Bare scalars therefore
//! round-trip even for parsers that only accept arrays or objects at the top
//! level.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

pub fn encode(value: &Value) -> Vec<u8> {
    let wrapped = Value::Array(vec![value.clone()]);
    strip_brackets(wrapped.to_string().into_bytes())
}

pub fn encode_value<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let wrapped = serde_json::to_vec(&[value])
        .map_err(|err| StoreError::Serialization(err.to_string()))?;
    Ok(strip_brackets(wrapped))
}

pub fn decode(raw: &[u8]) -> StoreResult<Value> {
    decode_value(raw)
}

pub fn decode_value<T: DeserializeOwned>(raw: &[u8]) -> StoreResult<T> {
    let mut wrapped = Vec::with_capacity(raw.len() + 2);
    wrapped.push(b'[');
    wrapped.extend_from_slice(raw);
    wrapped.push(b']');

    let mut items: Vec<T> = serde_json::from_slice(&wrapped)
        .map_err(|err| StoreError::DataCorruption(format!("stored value decode failed: {err}")))?;
    if items.len() != 1 {
        return Err(StoreError::DataCorruption(format!(
            "stored value holds {} top-level values, expected 1",
            items.len()
        )));
    }
    Ok(items.remove(0))
}

fn strip_brackets(mut wrapped: Vec<u8>) -> Vec<u8> {
    wrapped.pop();
    wrapped.remove(0);
    wrapped
}
