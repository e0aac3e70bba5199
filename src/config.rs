//! Client configuration
//!
//! One explicit value carries every setting the client needs, so two clients
//! in the same process can differ (one offline, one not) without touching
//! globals.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{resolve_cache_root, CacheManager, DEFAULT_MAX_AGE, HAPI_DATA};

/// Environment variable enabling the cache (`true`/`1`/`yes`)
pub const HAPI_CACHE: &str = "HAPI_CACHE";

/// Environment variable enabling offline mode
pub const HAPI_OFFLINE: &str = "HAPI_OFFLINE";

/// Default connect and read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a [`HapiClient`](crate::client::HapiClient)
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Root of the cache tree, `~/hapi` unless `HAPI_DATA` says otherwise
    pub cache_root: PathBuf,
    /// Read from and write to the cache. Off by default.
    pub use_cache: bool,
    /// Never contact the server; serve whatever the cache has
    pub offline: bool,
    /// Age after which cached files are revalidated
    pub max_cache_age: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Write gzip-compressed granules
    pub compress_cache: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_root: resolve_cache_root(None).unwrap_or_else(|| PathBuf::from("hapi")),
            use_cache: false,
            offline: false,
            max_cache_age: DEFAULT_MAX_AGE,
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            compress_cache: false,
        }
    }
}

fn flag(value: Option<String>) -> Option<bool> {
    let value = value?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden by `HAPI_DATA`, `HAPI_CACHE` and `HAPI_OFFLINE`
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `var`
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(root) = var(HAPI_DATA).and_then(|raw| resolve_cache_root(Some(&raw))) {
            config.cache_root = root;
        }
        if let Some(use_cache) = flag(var(HAPI_CACHE)) {
            config.use_cache = use_cache;
        }
        if let Some(offline) = flag(var(HAPI_OFFLINE)) {
            config.offline = offline;
        }
        config
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_max_cache_age(mut self, age: Duration) -> Self {
        self.max_cache_age = age;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress_cache = compress;
        self
    }

    /// The cache manager these settings describe
    pub fn cache_manager(&self) -> CacheManager {
        CacheManager::with_dir(self.cache_root.clone())
            .with_max_age(self.max_cache_age)
            .with_offline(self.offline)
    }
}
