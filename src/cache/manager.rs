//! Cache manager owning the cache root
//!
//! Provides a `CacheManager` that maps server URLs onto cache directories,
//! reads and writes cached JSON documents, and looks up data granules.

use chrono::{DateTime, Utc};
use directories::BaseDirs;
use reqwest::Url;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::granule::{lookup_granules, writing_path, Freshness, GranuleLookup};
use crate::error::{HapiError, Result};
use crate::record::DataFormat;

/// Environment variable naming the cache root
pub const HAPI_DATA: &str = "HAPI_DATA";

/// Default age beyond which cached files are revalidated
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// A document read from the cache, with metadata about its freshness
#[derive(Debug)]
pub struct CachedDocument {
    /// The document text
    pub text: String,
    /// When the file was last written
    pub modified: DateTime<Utc>,
    /// Whether the document is older than the staleness window
    pub is_expired: bool,
}

/// Resolves a `HAPI_DATA` setting against the user's home directory
///
/// `${HOME}` or `%{HOME}` are replaced by `home`, and Windows separators are
/// turned into `/`.
pub fn expand_cache_root(raw: &str, home: &str) -> PathBuf {
    let expanded = if raw.contains("${HOME}") {
        raw.replace("${HOME}", home)
    } else if raw.contains("%{HOME}") {
        raw.replace("%{HOME}", home)
    } else {
        raw.to_string()
    };
    PathBuf::from(expanded.replace('\\', "/"))
}

/// The cache root from `HAPI_DATA`, or `~/hapi`
///
/// Returns `None` when neither is available (no home directory).
pub fn default_cache_root() -> Option<PathBuf> {
    resolve_cache_root(std::env::var(HAPI_DATA).ok().as_deref())
}

/// The cache root for a given `HAPI_DATA` value, `~/hapi` when unset
pub fn resolve_cache_root(hapi_data: Option<&str>) -> Option<PathBuf> {
    let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    match hapi_data {
        Some(raw) if !raw.is_empty() => {
            let home_text = home
                .as_ref()
                .map(|h| h.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            Some(expand_cache_root(raw, &home_text))
        }
        _ => home.map(|h| h.join("hapi")),
    }
}

/// Manages the on-disk cache of documents and data granules
///
/// Everything lives under one root, in a tree mirroring the server URLs:
/// `{root}/{scheme}/{host}/{path}/...`. Clones share the lock that
/// serializes document writes; granules need no lock since each is installed
/// by a rename.
#[derive(Debug, Clone)]
pub struct CacheManager {
    /// Directory holding the whole cache tree
    root: PathBuf,
    max_age: Duration,
    offline: bool,
    write_lock: Arc<Mutex<()>>,
}

impl CacheManager {
    /// Creates a CacheManager at the default cache root
    ///
    /// Uses `HAPI_DATA` when set, otherwise `~/hapi`.
    /// Returns `None` if no root can be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        default_cache_root().map(Self::with_dir)
    }

    /// Creates a CacheManager rooted at a specific directory
    pub fn with_dir(root: PathBuf) -> Self {
        Self {
            root,
            max_age: DEFAULT_MAX_AGE,
            offline: false,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// In offline mode every cached file is usable regardless of age
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// `{root}/{scheme}/{host}/{path}` for a request URL, ignoring its query
    pub fn url_root(&self, url: &Url) -> PathBuf {
        let mut dir = self.root.join(url.scheme()).join(url.host_str().unwrap_or("localhost"));
        for segment in url.path().split('/').filter(|s| !s.is_empty()) {
            dir.push(segment);
        }
        dir
    }

    /// Directory holding the granules of dataset `id` served at `data_url`
    pub fn dataset_root(&self, data_url: &Url, id: &str) -> PathBuf {
        self.url_root(data_url).join(id)
    }

    /// Where the JSON document fetched from `url` is cached
    ///
    /// # Arguments
    /// * `url` - the endpoint, e.g. `https://host/hapi/info`
    /// * `key` - the dataset id (plus any parameter subset), or `None` for
    ///   documents such as the catalog that are not per dataset
    pub fn document_path(&self, url: &Url, key: Option<&str>) -> PathBuf {
        let base = self.url_root(url);
        match key {
            Some(key) => base.join(format!("{}.json", key)),
            None => {
                let mut name = base.into_os_string();
                name.push(".json");
                PathBuf::from(name)
            }
        }
    }

    fn is_fresh(&self, modified: SystemTime) -> bool {
        self.freshness(None).accepts(modified)
    }

    fn freshness(&self, origin_modified: Option<SystemTime>) -> Freshness {
        Freshness {
            now: SystemTime::now(),
            max_age: self.max_age,
            origin_modified,
            offline: self.offline,
        }
    }

    /// Reads a cached document
    ///
    /// Returns `None` if the file doesn't exist, can't be read or is empty.
    /// Expired documents are still returned, with `is_expired = true`, so the
    /// caller can fall back to them when the server is unreachable. Offline,
    /// nothing is ever expired.
    pub fn read_document(&self, path: &Path) -> Option<CachedDocument> {
        let meta = fs::metadata(path).ok()?;
        let modified = meta.modified().ok()?;
        let text = fs::read_to_string(path).ok()?;
        if text.trim().is_empty() {
            debug!(path = %path.display(), "ignoring empty cached document");
            return None;
        }
        Some(CachedDocument {
            text,
            modified: DateTime::<Utc>::from(modified),
            is_expired: !self.is_fresh(modified),
        })
    }

    /// Writes a document to the cache
    ///
    /// Writes are serialized within the process and installed with a rename,
    /// so concurrent readers see either the old or the new document.
    ///
    /// # Errors
    /// `HapiError::CacheIo` if a directory can't be created or the file can't
    /// be written or renamed into place.
    pub fn write_document(&self, path: &Path, text: &str) -> Result<()> {
        // a poisoned lock only means another writer panicked mid-write
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HapiError::cache_io(parent, e))?;
        }
        let temp = writing_path(path);
        if let Err(e) = fs::write(&temp, text).and_then(|()| fs::rename(&temp, path)) {
            let _ = fs::remove_file(&temp);
            return Err(HapiError::cache_io(path, e));
        }
        debug!(path = %path.display(), "wrote cached document");
        Ok(())
    }

    /// Looks up the granules covering `days` × `parameters`
    ///
    /// `origin_modified`, when known, decides staleness instead of the age
    /// window.
    pub fn lookup_granules(
        &self,
        dataset_root: &Path,
        days: &[String],
        parameters: &[String],
        format: DataFormat,
        origin_modified: Option<SystemTime>,
    ) -> Result<GranuleLookup> {
        lookup_granules(
            dataset_root,
            days,
            parameters,
            format,
            &self.freshness(origin_modified),
        )
    }
}
