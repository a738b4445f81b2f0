use serde::Deserialize;

pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:11211";

/// Thirty days, in seconds.
pub const DEFAULT_TTL: u32 = 30 * 24 * 3600;

/// Optional per-type or base settings. Unset values fall through to the next
/// layer when resolved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub default_ttl: Option<u32>,
}

impl Settings {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_default_ttl(mut self, default_ttl: u32) -> Self {
        self.default_ttl = Some(default_ttl);
        self
    }

    /// Values set here win; unset values are taken from `base`.
    ///
    /// The namespace is never inherited: it identifies one record type.
    pub fn merged_over(&self, base: &Settings) -> Settings {
        Settings {
            endpoint: self.endpoint.clone().or_else(|| base.endpoint.clone()),
            namespace: self.namespace.clone(),
            default_ttl: self.default_ttl.or(base.default_ttl),
        }
    }

    pub fn resolve(&self, base: &Settings, type_name: &str) -> ConnectionConfig {
        let merged = self.merged_over(base);
        ConnectionConfig {
            endpoint: merged
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            namespace: merged.namespace.unwrap_or_else(|| type_name.to_string()),
            default_ttl: merged.default_ttl.unwrap_or(DEFAULT_TTL),
        }
    }
}

/// Everything a connection is built from. Connections built from equal
/// configurations are interchangeable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub namespace: String,
    pub default_ttl: u32,
}

impl ConnectionConfig {
    pub fn new(endpoint: impl Into<String>, namespace: impl Into<String>, default_ttl: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: namespace.into(),
            default_ttl,
        }
    }
}
