//! Key-value configuration store.
//!
//! The advertisement parameters live in one hash (by default `fahrrad/config`),
//! shared by every responder instance. On startup each field is seeded with its
//! default unless already present, then read back, so concurrent first starts
//! agree on one value.

use std::collections::HashMap;
use std::time::Duration;

use redis::AsyncCommands;

use crate::config::{RouterAdvertisementConfig, StoreConfig, DEFAULT_STORE_NAMESPACE};

pub const FIELD_ASSIGNED_PREFIX_LENGTH: &str = "AssignedPrefixLength";
pub const FIELD_ON_LINK_PREFIX_LENGTH: &str = "OnLinkPrefixLength";
pub const FIELD_VALID_LIFETIME: &str = "DefaultValidLifetime";
pub const FIELD_PREFERRED_LIFETIME: &str = "DefaultPreferredLifetime";
pub const FIELD_ADVERTISEMENT_INTERVAL: &str = "TickerDelay";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("field {field} holds {value:?}, not an integer")]
    InvalidValue { field: String, value: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[allow(async_fn_in_trait)]
pub trait ConfigStore {
    /// Writes `value` unless `field` already exists. Returns whether it was written.
    async fn set_if_absent(&mut self, namespace: &str, field: &str, value: i64) -> Result<bool, StoreError>;

    async fn get(&mut self, namespace: &str, field: &str) -> Result<Option<i64>, StoreError>;
}

/// Store fields with their built-in values, in wire units (whole seconds).
pub fn default_fields() -> [(&'static str, i64); 5] {
    let defaults = RouterAdvertisementConfig::DEFAULT;
    [
        (FIELD_ASSIGNED_PREFIX_LENGTH, defaults.assigned_prefix_length as i64),
        (FIELD_ON_LINK_PREFIX_LENGTH, defaults.on_link_prefix_length as i64),
        (FIELD_VALID_LIFETIME, defaults.valid_lifetime as i64),
        (FIELD_PREFERRED_LIFETIME, defaults.preferred_lifetime as i64),
        (FIELD_ADVERTISEMENT_INTERVAL, defaults.advertisement_interval.as_secs() as i64),
    ]
}

/// Seeds missing fields with defaults, then reads the effective configuration.
///
/// Never fails: a field that cannot be read, is missing, or is out of range
/// keeps its built-in default.
pub async fn bootstrap<S: ConfigStore>(store: &mut S, namespace: &str) -> RouterAdvertisementConfig {
    for (field, value) in default_fields() {
        match store.set_if_absent(namespace, field, value).await {
            Ok(true) => log::info!("{}: initialized {} = {}", namespace, field, value),
            Ok(false) => {}
            Err(e) => log::warn!("{}: failed to initialize {}: {}", namespace, field, e),
        }
    }

    let mut values = HashMap::new();
    for (field, _) in default_fields() {
        match store.get(namespace, field).await {
            Ok(Some(value)) => {
                values.insert(field, value);
            }
            Ok(None) => log::warn!("{}: {} is not set, using default", namespace, field),
            Err(e) => log::warn!("{}: failed to read {}, using default: {}", namespace, field, e),
        }
    }

    let defaults = RouterAdvertisementConfig::DEFAULT;
    let mut config = RouterAdvertisementConfig {
        assigned_prefix_length: field_value(&values, FIELD_ASSIGNED_PREFIX_LENGTH, defaults.assigned_prefix_length, prefix_length),
        on_link_prefix_length: field_value(&values, FIELD_ON_LINK_PREFIX_LENGTH, defaults.on_link_prefix_length, prefix_length),
        valid_lifetime: field_value(&values, FIELD_VALID_LIFETIME, defaults.valid_lifetime, lifetime),
        preferred_lifetime: field_value(&values, FIELD_PREFERRED_LIFETIME, defaults.preferred_lifetime, lifetime),
        advertisement_interval: field_value(&values, FIELD_ADVERTISEMENT_INTERVAL, defaults.advertisement_interval, interval),
    };
    // hosts ignore a prefix whose preferred lifetime exceeds its valid lifetime (RFC 4862 5.5.3)
    if config.preferred_lifetime > config.valid_lifetime {
        log::warn!(
            "{}: {} = {} exceeds {} = {}, using defaults for both",
            namespace, FIELD_PREFERRED_LIFETIME, config.preferred_lifetime, FIELD_VALID_LIFETIME, config.valid_lifetime,
        );
        config.valid_lifetime = defaults.valid_lifetime;
        config.preferred_lifetime = defaults.preferred_lifetime;
    }
    log::debug!("{}: effective configuration {:?}", namespace, config);
    config
}

/// Connects to the configured store and bootstraps from it. Without a
/// `[store]` section the built-in defaults are used.
pub async fn load(store: Option<&StoreConfig>) -> Result<RouterAdvertisementConfig, StoreError> {
    match store {
        Some(store) => {
            let mut redis = RedisConfigStore::connect(&store.url).await?;
            Ok(bootstrap(&mut redis, &store.namespace).await)
        }
        None => {
            log::info!("No configuration store configured, using built-in defaults");
            let mut memory = MemoryConfigStore::new();
            Ok(bootstrap(&mut memory, DEFAULT_STORE_NAMESPACE).await)
        }
    }
}

fn field_value<T: std::fmt::Debug>(values: &HashMap<&str, i64>, field: &str, default: T, convert: fn(i64) -> Option<T>) -> T {
    let Some(&value) = values.get(field) else {
        return default;
    };
    match convert(value) {
        Some(value) => value,
        None => {
            log::warn!("{} = {} is out of range, using default {:?}", field, value, default);
            default
        }
    }
}

/// Parses a stored field value. Stores hold decimal integers.
pub fn parse_field(field: &str, value: &str) -> Result<i64, StoreError> {
    value.trim().parse().map_err(|_| StoreError::InvalidValue {
        field: field.to_owned(),
        value: value.to_owned(),
    })
}

fn prefix_length(value: i64) -> Option<u8> {
    u8::try_from(value).ok().filter(|len| *len <= 128)
}

fn lifetime(value: i64) -> Option<u32> {
    u32::try_from(value).ok()
}

fn interval(value: i64) -> Option<Duration> {
    u64::try_from(value).ok().filter(|secs| *secs > 0).map(Duration::from_secs)
}

pub struct RedisConfigStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisConfigStore {
    /// Connects to `url`. Failure here is fatal for the daemon.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        log::debug!("connected to configuration store at {}", url);
        Ok(Self { conn })
    }
}

impl ConfigStore for RedisConfigStore {
    async fn set_if_absent(&mut self, namespace: &str, field: &str, value: i64) -> Result<bool, StoreError> {
        let written: bool = self.conn.hset_nx(namespace, field, value).await?;
        Ok(written)
    }

    async fn get(&mut self, namespace: &str, field: &str) -> Result<Option<i64>, StoreError> {
        let value: Option<String> = self.conn.hget(namespace, field).await?;
        value.map(|value| parse_field(field, &value)).transpose()
    }
}

/// Process-local store, used when no external store is configured.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    hashes: HashMap<String, HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, namespace: &str, field: &str, value: impl ToString) {
        self.hashes.entry(namespace.to_owned()).or_default().insert(field.to_owned(), value.to_string());
    }

    pub fn value(&self, namespace: &str, field: &str) -> Option<&str> {
        self.hashes.get(namespace)?.get(field).map(|value| value.as_str())
    }
}

impl ConfigStore for MemoryConfigStore {
    async fn set_if_absent(&mut self, namespace: &str, field: &str, value: i64) -> Result<bool, StoreError> {
        let hash = self.hashes.entry(namespace.to_owned()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_owned(), value.to_string());
        Ok(true)
    }

    async fn get(&mut self, namespace: &str, field: &str) -> Result<Option<i64>, StoreError> {
        self.value(namespace, field).map(|value| parse_field(field, value)).transpose()
    }
}
