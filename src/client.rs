//! HAPI client: catalog, info and data requests backed by the disk cache
//!
//! Documents follow the cache-first pattern: a fresh cached copy is used as
//! is, otherwise the server is asked and the answer cached, and when the
//! server can't be reached an expired copy is better than nothing.
//!
//! Data requests decide per request between the cache, the network and a
//! conditional request that lets the server confirm the cache is current.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::{open_granule, CacheManager, GranuleLookup};
use crate::config::ClientConfig;
use crate::error::{HapiError, Result};
use crate::info::{Catalog, Info, Status};
use crate::iter::{
    BinaryRecordIterator, LineRecordIterator, Records, TrimIterator, WriteCacheIterator,
    WriteCacheOptions,
};
use crate::lines::{Concatenate, Paste, SingleSource};
use crate::record::{BinaryRecord, CsvRecord, DataFormat, SchemaLayout};
use crate::time;
use crate::transport::{
    http_date, HttpResponse, ReqwestTransport, Transport, ACCEPT_ENCODING, IF_MODIFIED_SINCE,
};

/// Body of a HAPI error response
#[derive(Debug, Deserialize)]
struct ErrorBody {
    status: Status,
}

/// Client for one or more HAPI servers
pub struct HapiClient {
    config: ClientConfig,
    cache: CacheManager,
    transport: Box<dyn Transport>,
}

impl HapiClient {
    /// Creates a client that talks HTTP through reqwest
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.connect_timeout, config.read_timeout)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Creates a client with a custom transport (for testing)
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self {
            cache: config.cache_manager(),
            config,
            transport: Box::new(transport),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Offline mode reads the cache even when caching is otherwise off
    fn reads_cache(&self) -> bool {
        self.config.use_cache || self.config.offline
    }

    /// Fetches the catalog of datasets served by `server`
    pub fn catalog(&self, server: &str) -> Result<Catalog> {
        let url = endpoint(server, "catalog")?;
        let text = self.read_document(&url, None)?;
        let catalog: Catalog = serde_json::from_str(&text)?;
        catalog.status.check()?;
        Ok(catalog)
    }

    /// Dataset ids listed in the catalog
    pub fn catalog_ids(&self, server: &str) -> Result<Vec<String>> {
        Ok(self.catalog(server)?.ids())
    }

    /// Fetches the info document describing every parameter of `id`
    pub fn info(&self, server: &str, id: &str) -> Result<Info> {
        let mut url = endpoint(server, "info")?;
        url.query_pairs_mut().append_pair("id", id);
        let text = self.read_document(&url, Some(id))?;
        Info::from_json(&text)
    }

    /// Fetches the info document for a subset of the parameters of `id`
    ///
    /// # Errors
    /// `HapiError::Protocol` if the server's parameters don't match
    /// `parameters` in order (the time column may lead).
    pub fn info_parameters(&self, server: &str, id: &str, parameters: &[String]) -> Result<Info> {
        let joined = parameters.join(",");
        let mut url = endpoint(server, "info")?;
        url.query_pairs_mut()
            .append_pair("id", id)
            .append_pair("parameters", &joined);
        let text = self.read_document(&url, Some(&format!("{}.{}", id, joined)))?;
        let info = Info::from_json(&text)?;
        info.check_parameter_order(parameters)?;
        Ok(info)
    }

    /// Names of the parameters of `id`, in column order
    pub fn parameter_names(&self, server: &str, id: &str) -> Result<Vec<String>> {
        Ok(self.info(server, id)?.parameter_names())
    }

    /// Reads a JSON document, through the document cache
    ///
    /// # Arguments
    /// * `url` - the full request URL
    /// * `key` - the cache key below the endpoint (dataset id), if any
    ///
    /// # Behavior
    /// - Offline, only the cache is consulted
    /// - A fresh cached copy is returned without contacting the server
    /// - A JSON body on an HTTP error is returned, so its HAPI status surfaces
    /// - When the server can't be reached, an expired cached copy is returned
    fn read_document(&self, url: &Url, key: Option<&str>) -> Result<String> {
        let path = self.cache.document_path(url, key);
        let cached = if self.reads_cache() {
            self.cache.read_document(&path)
        } else {
            None
        };
        if self.config.offline {
            return cached.map(|doc| doc.text).ok_or_else(|| {
                HapiError::protocol(format!("{} is not cached and the client is offline", url))
            });
        }
        if let Some(doc) = cached.as_ref().filter(|doc| !doc.is_expired) {
            debug!(url = %url, "using cached document");
            return Ok(doc.text.clone());
        }

        let response = match self.transport.get(url, &[]) {
            Ok(response) => response,
            Err(e) => {
                return match cached {
                    Some(doc) => {
                        warn!(
                            url = %url,
                            error = %e,
                            cached_at = %doc.modified,
                            "server unreachable, using cached document"
                        );
                        Ok(doc.text)
                    }
                    None => Err(e),
                }
            }
        };
        let status = response.status;
        let success = response.is_success();
        let text = response.into_text()?;
        if !success {
            if text.trim_start().starts_with('{') {
                warn!(url = %url, status, "error status with a JSON body, using the body");
                return Ok(text);
            }
            if let Some(doc) = cached {
                warn!(url = %url, status, "server error, using cached document");
                return Ok(doc.text);
            }
            return Err(HapiError::Protocol {
                code: i32::from(status),
                message: format!("HTTP {} from {}", status, url),
            });
        }
        if text.trim().is_empty() {
            return Err(HapiError::protocol(format!("empty response from {}", url)));
        }
        if self.config.use_cache {
            if let Err(e) = self.cache.write_document(&path, &text) {
                warn!(error = %e, "unable to cache document");
            }
        }
        Ok(text)
    }

    fn data_info(&self, server: &str, id: &str, parameters: Option<&[String]>) -> Result<Info> {
        match parameters {
            Some(parameters) => self.info_parameters(server, id, parameters),
            None => self.info(server, id),
        }
    }

    /// Streams the CSV records of `id` in `[start, end)`
    ///
    /// Records arrive in time order. With caching on, whole days are served
    /// from and written to the cache. A fully cached range is read from disk
    /// without asking the server when the info's `modificationDate` shows the
    /// files are current; when only their age vouches for them the server is
    /// asked with `If-Modified-Since` first.
    ///
    /// # Arguments
    /// * `server` - the server URL, e.g. `https://cdaweb.gsfc.nasa.gov/hapi`
    /// * `id` - the dataset id
    /// * `parameters` - a subset of parameters, or `None` for all
    /// * `start` - inclusive start time
    /// * `end` - exclusive end time
    pub fn data(
        &self,
        server: &str,
        id: &str,
        parameters: Option<&[String]>,
        start: &str,
        end: &str,
    ) -> Result<Records<CsvRecord>> {
        let info = self.data_info(server, id, parameters)?;
        let layout = Arc::new(SchemaLayout::from_info(&info)?);
        let url = data_url(server, id, parameters, start, end, DataFormat::Csv)?;

        if !self.reads_cache() {
            return self.fetch_csv(&url, layout, start, end, None);
        }

        let dataset_root = self.cache.dataset_root(&url, id);
        let online = !self.config.offline;
        if !dataset_root.exists() {
            debug!(dataset = id, "nothing cached for dataset");
            return if online {
                self.fetch_csv(&url, layout, start, end, Some(&dataset_root))
            } else {
                Ok(empty(layout))
            };
        }

        let days = time::count_off_days(start, end)?;
        let origin_modified = info.modification_date.as_deref().and_then(origin_time);
        let lookup = self.cache.lookup_granules(
            &dataset_root,
            &days,
            &layout.names,
            DataFormat::Csv,
            origin_modified,
        )?;

        if lookup.stale && online {
            debug!(dataset = id, "cached granules are stale");
            return self.fetch_csv(&url, layout, start, end, Some(&dataset_root));
        }
        if !lookup.is_complete() {
            return if online {
                debug!(dataset = id, "cache does not cover the request");
                self.fetch_csv(&url, layout, start, end, Some(&dataset_root))
            } else {
                debug!(dataset = id, "offline and the cache does not cover the request");
                Ok(empty(layout))
            };
        }
        if !online {
            debug!(dataset = id, "offline, reading from cache");
            return read_cached(layout, &lookup, start, end);
        }
        if origin_modified.is_some() {
            // every granule is at least as new as the origin's data
            debug!(dataset = id, "cache is current with the origin, reading from cache");
            return read_cached(layout, &lookup, start, end);
        }
        self.revalidate(&url, layout, &lookup, start, end, &dataset_root)
    }

    /// Asks the server whether the complete cached copy is still current
    fn revalidate(
        &self,
        url: &Url,
        layout: Arc<SchemaLayout>,
        lookup: &GranuleLookup,
        start: &str,
        end: &str,
        dataset_root: &Path,
    ) -> Result<Records<CsvRecord>> {
        let mut headers = vec![(ACCEPT_ENCODING, "gzip".to_string())];
        if let Some(mtime) = lookup.earliest_mtime() {
            headers.push((IF_MODIFIED_SINCE, http_date(mtime)));
        }
        match self.transport.get(url, &headers) {
            Ok(response) if response.is_not_modified() => {
                debug!(url = %url, "server reports no change, reading from cache");
                read_cached(layout, lookup, start, end)
            }
            Ok(response) if response.is_success() => {
                debug!(url = %url, "server sent fresh data");
                self.stream_csv(response, layout, start, end, Some(dataset_root))
            }
            Ok(response) => {
                warn!(
                    url = %url,
                    status = response.status,
                    "revalidation failed, reading from cache"
                );
                read_cached(layout, lookup, start, end)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "server unreachable, reading from cache");
                read_cached(layout, lookup, start, end)
            }
        }
    }

    /// Requests CSV data, writing it through to `cache_to` when given
    fn fetch_csv(
        &self,
        url: &Url,
        layout: Arc<SchemaLayout>,
        start: &str,
        end: &str,
        cache_to: Option<&Path>,
    ) -> Result<Records<CsvRecord>> {
        let response = self.transport.get(url, &[(ACCEPT_ENCODING, "gzip".to_string())])?;
        if !response.is_success() {
            return Err(error_response(url, response));
        }
        self.stream_csv(response, layout, start, end, cache_to)
    }

    fn stream_csv(
        &self,
        response: HttpResponse,
        layout: Arc<SchemaLayout>,
        start: &str,
        end: &str,
        cache_to: Option<&Path>,
    ) -> Result<Records<CsvRecord>> {
        let source = SingleSource::new(BufReader::new(response.into_decoded()));
        let records = LineRecordIterator::new(layout.clone(), Box::new(source))?;
        match cache_to {
            Some(dataset_root) => {
                let options = WriteCacheOptions {
                    format: DataFormat::Csv,
                    split: true,
                    compress: self.config.compress_cache,
                };
                let cached =
                    WriteCacheIterator::new(layout, records, start, end, dataset_root, options)?;
                Ok(Box::new(TrimIterator::new(cached, start, end)))
            }
            None => Ok(Box::new(TrimIterator::new(records, start, end))),
        }
    }

    /// Streams the binary records of `id` in `[start, end)`
    ///
    /// Binary data always comes from the server. Offline, the stream is
    /// empty.
    pub fn data_binary(
        &self,
        server: &str,
        id: &str,
        parameters: Option<&[String]>,
        start: &str,
        end: &str,
    ) -> Result<Records<BinaryRecord>> {
        let info = self.data_info(server, id, parameters)?;
        let layout = Arc::new(SchemaLayout::from_info(&info)?);
        if self.config.offline {
            return Ok(Box::new(std::iter::empty()));
        }
        let url = data_url(server, id, parameters, start, end, DataFormat::Binary)?;
        let response = self.transport.get(&url, &[(ACCEPT_ENCODING, "gzip".to_string())])?;
        if !response.is_success() {
            return Err(error_response(&url, response));
        }
        let records = BinaryRecordIterator::new(layout, BufReader::new(response.into_decoded()))?;
        Ok(Box::new(TrimIterator::new(records, start, end)))
    }
}

/// `{server}/{function}`, whether or not the server URL ends in a slash
pub fn endpoint(server: &str, function: &str) -> Result<Url> {
    let base = if server.ends_with('/') {
        format!("{}{}", server, function)
    } else {
        format!("{}/{}", server, function)
    };
    Url::parse(&base)
        .map_err(|e| HapiError::Format(format!("invalid server URL '{}': {}", server, e)))
}

fn data_url(
    server: &str,
    id: &str,
    parameters: Option<&[String]>,
    start: &str,
    end: &str,
    format: DataFormat,
) -> Result<Url> {
    let mut url = endpoint(server, "data")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("id", id);
        if let Some(parameters) = parameters {
            query.append_pair("parameters", &parameters.join(","));
        }
        query.append_pair("time.min", start).append_pair("time.max", end);
        if format == DataFormat::Binary {
            query.append_pair("format", "binary");
        }
    }
    Ok(url)
}

/// The origin's modification date as a file time, if it parses
fn origin_time(modification_date: &str) -> Option<SystemTime> {
    match time::to_milliseconds_since_1970(modification_date) {
        Ok(millis) if millis >= 0 => Some(UNIX_EPOCH + Duration::from_millis(millis as u64)),
        Ok(_) => None,
        Err(e) => {
            debug!(modification_date, error = %e, "ignoring unreadable modificationDate");
            None
        }
    }
}

/// Turns a non-success data response into an error, using the HAPI status
/// in its body when there is one
fn error_response(url: &Url, response: HttpResponse) -> HapiError {
    let status = response.status;
    let body = response.into_text().unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { status }) => HapiError::Protocol {
            code: status.code,
            message: status.message,
        },
        Err(_) => HapiError::Protocol {
            code: i32::from(status),
            message: format!("HTTP {} from {}", status, url),
        },
    }
}

fn empty(layout: Arc<SchemaLayout>) -> Records<CsvRecord> {
    Box::new(LineRecordIterator::empty(layout))
}

/// Rebuilds the stream from cached granules: the parameters of each day are
/// pasted side by side and the days concatenated
///
/// A day cached as one combined granule is read as is.
fn read_cached(
    layout: Arc<SchemaLayout>,
    lookup: &GranuleLookup,
    start: &str,
    end: &str,
) -> Result<Records<CsvRecord>> {
    let mut days = Concatenate::new();
    for (row, combined) in lookup.hits.iter().zip(&lookup.combined) {
        if *combined {
            if let Some(path) = row.iter().flatten().next() {
                days.push(Box::new(SingleSource::new(open_granule(path)?)));
            }
            continue;
        }
        let mut day = Paste::new(',');
        for path in row.iter().flatten() {
            day.push(Box::new(SingleSource::new(open_granule(path)?)));
        }
        days.push(Box::new(day));
    }
    let records = LineRecordIterator::new(layout, Box::new(days))?;
    Ok(Box::new(TrimIterator::new(records, start, end)))
}
