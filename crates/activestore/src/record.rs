use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{StoreError, StoreResult};

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "created_at";

/// Declared fields of one record type.
///
/// ```ignore
/// #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
/// struct Item {
///     a1: Option<String>,
///     a2: Option<String>,
/// }
///
/// impl Schema for Item {
///     const NAME: &'static str = "Item";
///     const FIELDS: &'static [&'static str] = &["a1", "a2"];
/// }
/// ```
pub trait Schema:
    Serialize + DeserializeOwned + Clone + Default + PartialEq + Debug + Send + Sync + 'static
{
    /// Default namespace for records of this type.
    const NAME: &'static str;
    /// Serialized names of the declared fields, `id` and `created_at` excluded.
    const FIELDS: &'static [&'static str];
}

/// Runtime view of a [`Schema`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordSchema {
    name: &'static str,
    declared: &'static [&'static str],
}

impl RecordSchema {
    pub fn of<T: Schema>() -> Self {
        Self {
            name: T::NAME,
            declared: T::FIELDS,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn declared_fields(&self) -> &'static [&'static str] {
        self.declared
    }

    /// Declared fields followed by `id` and `created_at`.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = self.declared.to_vec();
        for implicit in [ID_FIELD, CREATED_AT_FIELD] {
            if !fields.contains(&implicit) {
                fields.push(implicit);
            }
        }
        fields
    }

    pub fn contains(&self, field: &str) -> bool {
        field == ID_FIELD || field == CREATED_AT_FIELD || self.declared.contains(&field)
    }

    /// Keys `T::default()` serializes that `T::FIELDS` does not list. Such
    /// fields are never stored.
    pub fn undeclared_fields<T: Schema>() -> StoreResult<Vec<String>> {
        let schema = Self::of::<T>();
        let value = serde_json::to_value(T::default())
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let Value::Object(map) = value else {
            return Err(StoreError::Serialization(format!(
                "{} does not serialize to an object",
                schema.name()
            )));
        };
        Ok(map
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| !schema.contains(name))
            .collect())
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// A stored entity: identifier, creation time and the schema's fields, all
/// serialized into one flat JSON object.
///
/// Equality ignores `created_at`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "T: Schema")]
pub struct Record<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: T,
    #[serde(default = "unix_now")]
    pub created_at: u64,
}

impl<T: Schema> Default for Record<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Compares `id` and the declared fields; `created_at` and anything the schema
/// does not declare are ignored.
impl<T: Schema> PartialEq for Record<T> {
    fn eq(&self, other: &Self) -> bool {
        let compared = |record: &Self| {
            record.collect_attributes(false).map(|mut attributes| {
                attributes.remove(CREATED_AT_FIELD);
                attributes
            })
        };
        match (compared(self), compared(other)) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        }
    }
}

impl<T: Schema> Record<T> {
    pub fn new(fields: T) -> Self {
        Self {
            id: None,
            fields,
            created_at: unix_now(),
        }
    }

    /// Empty record carrying only an identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// The identifier, or `MissingIdentifier` naming what could not be done.
    pub fn require_id(&self, action: &str) -> StoreResult<&str> {
        self.id()
            .ok_or_else(|| StoreError::MissingIdentifier(format!("could not {action} without id")))
    }

    /// Schema fields that hold a value, keyed by serialized name. This is the
    /// stored form of the record.
    ///
    /// Non-null values of undeclared fields are dropped with a warning.
    pub fn attributes(&self) -> StoreResult<Map<String, Value>> {
        self.collect_attributes(true)
    }

    fn collect_attributes(&self, report_dropped: bool) -> StoreResult<Map<String, Value>> {
        let schema = RecordSchema::of::<T>();
        let value =
            serde_json::to_value(self).map_err(|err| StoreError::Serialization(err.to_string()))?;
        let Value::Object(map) = value else {
            return Err(StoreError::Serialization(format!(
                "{} does not serialize to an object",
                schema.name()
            )));
        };
        let mut attributes = Map::new();
        for (name, value) in map {
            if value.is_null() {
                continue;
            }
            if schema.contains(&name) {
                attributes.insert(name, value);
            } else if report_dropped {
                warn!(schema = schema.name(), field = %name, "undeclared field not stored");
            }
        }
        Ok(attributes)
    }

    pub fn to_value(&self) -> StoreResult<Value> {
        self.attributes().map(Value::Object)
    }

    /// Rebuilds a record from its stored form. Unknown keys are ignored; a
    /// missing `created_at` is filled with the current time.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        if !value.is_object() {
            return Err(StoreError::DataCorruption(format!(
                "stored {} is not an object",
                T::NAME
            )));
        }
        serde_json::from_value(value).map_err(|err| {
            StoreError::DataCorruption(format!("stored {} does not match schema: {err}", T::NAME))
        })
    }
}
