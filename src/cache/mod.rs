//! Disk cache for HAPI documents and data
//!
//! Catalog and info responses are cached as JSON files. Data is cached as
//! granules, one file per calendar day and parameter, so that overlapping
//! requests reuse what earlier ones fetched. Expired documents are still
//! handed back (flagged) so the client can degrade gracefully when the
//! server is unreachable.

pub mod granule;
mod manager;

pub use granule::{granule_path, open_granule, GranuleLookup};
pub use manager::{
    default_cache_root, expand_cache_root, resolve_cache_root, CacheManager, CachedDocument,
    DEFAULT_MAX_AGE, HAPI_DATA,
};
