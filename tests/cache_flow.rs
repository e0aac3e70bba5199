//! Integration tests for the client's cache decisions
//!
//! An in-memory server stands in for HTTP and records every request, so the
//! tests can tell whether data came from the cache or the network.

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hapi_client::iter::{LineRecordIterator, WriteCacheIterator, WriteCacheOptions};
use hapi_client::lines::SingleSource;
use hapi_client::record::SchemaLayout;
use hapi_client::transport::{HttpResponse, Transport, IF_MODIFIED_SINCE};
use hapi_client::{ClientConfig, CsvRecord, HapiClient, HapiError, HapiRecord, Info};
use reqwest::Url;
use tempfile::TempDir;

const SERVER: &str = "https://example.org/hapi";

const INFO: &str = r#"{"HAPI":"3.0","status":{"code":1200,"message":"OK"},
    "startDate":"2019-01-01T00:00Z","stopDate":"2021-01-01T00:00Z",
    "parameters":[
        {"name":"Time","type":"isotime","length":17,"units":"UTC"},
        {"name":"flux","type":"double","units":"counts"}]}"#;

const INFO_WITH_MODIFICATION_DATE: &str = r#"{"HAPI":"3.0","status":{"code":1200,"message":"OK"},
    "modificationDate":"2019-06-01T00:00Z",
    "parameters":[
        {"name":"Time","type":"isotime","length":17},
        {"name":"flux","type":"double"}]}"#;

const DATA: &str = "2020-01-01T00:00Z,1.0\n\
                    2020-01-01T12:00Z,2.0\n\
                    2020-01-02T00:00Z,3.0\n\
                    2020-01-02T12:00Z,4.0\n";

#[derive(Default)]
struct FakeState {
    /// path -> (status, body)
    routes: HashMap<String, (u16, String)>,
    /// (url, header names) of every request
    requests: Vec<(String, Vec<String>)>,
    down: bool,
    not_modified: bool,
}

/// In-memory HAPI server; clones share state
#[derive(Clone, Default)]
struct FakeServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    fn new(info: &str) -> Self {
        let server = FakeServer::default();
        server.route("/hapi/info", 200, info);
        server.route("/hapi/data", 200, DATA);
        server.route(
            "/hapi/catalog",
            200,
            r#"{"HAPI":"3.0","status":{"code":1200,"message":"OK"},
                "catalog":[{"id":"ds1","title":"Test"}]}"#,
        );
        server
    }

    fn route(&self, path: &str, status: u16, body: &str) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(path.to_string(), (status, body.to_string()));
    }

    fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    fn set_not_modified(&self, not_modified: bool) {
        self.state.lock().unwrap().not_modified = not_modified;
    }

    fn requests(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().requests.clone()
    }

    fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }
}

impl Transport for FakeServer {
    fn get(&self, url: &Url, headers: &[(&str, String)]) -> hapi_client::Result<HttpResponse> {
        let mut state = self.state.lock().unwrap();
        state.requests.push((
            url.to_string(),
            headers.iter().map(|(name, _)| name.to_string()).collect(),
        ));
        if state.down {
            return Err(HapiError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "server is down",
            )));
        }
        let conditional = headers.iter().any(|(name, _)| *name == IF_MODIFIED_SINCE);
        if conditional && state.not_modified {
            return Ok(response(304, ""));
        }
        let (status, body) = state
            .routes
            .get(url.path())
            .cloned()
            .unwrap_or((404, "not found".to_string()));
        Ok(response(status, &body))
    }
}

fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        content_encoding: None,
        body: Box::new(Cursor::new(body.as_bytes().to_vec())),
    }
}

fn cached_config(root: &Path) -> ClientConfig {
    ClientConfig::new().with_cache_root(root).with_cache(true)
}

fn values(records: impl Iterator<Item = hapi_client::Result<CsvRecord>>) -> Vec<(String, f64)> {
    records
        .map(|r| {
            let r = r.unwrap();
            (r.iso_time(0).into_owned(), r.double(1).unwrap())
        })
        .collect()
}

fn all_values() -> Vec<(String, f64)> {
    vec![
        ("2020-01-01T00:00Z".to_string(), 1.0),
        ("2020-01-01T12:00Z".to_string(), 2.0),
        ("2020-01-02T00:00Z".to_string(), 3.0),
        ("2020-01-02T12:00Z".to_string(), 4.0),
    ]
}

/// Fetches two days through a caching client so the cache holds them
fn populate(root: &Path, info: &str) {
    let server = FakeServer::new(info);
    let client = HapiClient::with_transport(cached_config(root), server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-03T00:00Z")
        .unwrap();
    assert_eq!(values(records), all_values());
}

fn granule(root: &Path, name: &str) -> std::path::PathBuf {
    root.join("https/example.org/hapi/data/ds1/2020/01").join(name)
}

#[test]
fn test_first_request_writes_through_to_cache() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO);
    for name in [
        "20200101.Time.csv",
        "20200101.flux.csv",
        "20200102.Time.csv",
        "20200102.flux.csv",
    ] {
        assert!(granule(dir.path(), name).exists(), "{} should be cached", name);
    }
    assert_eq!(
        std::fs::read_to_string(granule(dir.path(), "20200102.flux.csv")).unwrap(),
        "3.0\n4.0\n"
    );
    assert!(dir.path().join("https/example.org/hapi/info/ds1.json").exists());
}

#[test]
fn test_offline_serves_cached_days_without_network() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO);

    let server = FakeServer::new(INFO);
    let config = cached_config(dir.path()).with_offline(true);
    let client = HapiClient::with_transport(config, server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-03T00:00Z")
        .unwrap();
    assert_eq!(values(records), all_values());
    assert_eq!(server.request_count(), 0);
}

#[test]
fn test_offline_trims_cached_days_to_the_request() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO);

    let server = FakeServer::new(INFO);
    let config = cached_config(dir.path()).with_offline(true);
    let client = HapiClient::with_transport(config, server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T06:00Z", "2020-01-02T06:00Z")
        .unwrap();
    let times: Vec<String> = values(records).into_iter().map(|(t, _)| t).collect();
    assert_eq!(times, vec!["2020-01-01T12:00Z", "2020-01-02T00:00Z"]);
    assert_eq!(server.request_count(), 0);
}

#[test]
fn test_current_cache_is_served_online_without_network() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO_WITH_MODIFICATION_DATE);

    let server = FakeServer::new(INFO_WITH_MODIFICATION_DATE);
    let client = HapiClient::with_transport(cached_config(dir.path()), server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-03T00:00Z")
        .unwrap();
    assert_eq!(values(records), all_values());
    assert_eq!(server.request_count(), 0, "info and data both come from the cache");
}

#[test]
fn test_age_checked_cache_is_revalidated() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO);

    let server = FakeServer::new(INFO);
    server.set_not_modified(true);
    let client = HapiClient::with_transport(cached_config(dir.path()), server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-03T00:00Z")
        .unwrap();
    assert_eq!(values(records), all_values());

    let requests = server.requests();
    assert_eq!(requests.len(), 1, "only the conditional data request");
    assert!(requests[0].0.contains("/hapi/data"));
    assert!(requests[0].1.iter().any(|h| h == IF_MODIFIED_SINCE));
    assert!(requests[0].1.iter().any(|h| h == "Accept-Encoding"));
}

#[test]
fn test_changed_data_replaces_revalidated_cache() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO);

    let server = FakeServer::new(INFO);
    server.route(
        "/hapi/data",
        200,
        "2020-01-01T00:00Z,10.0\n\
         2020-01-01T12:00Z,20.0\n\
         2020-01-02T00:00Z,30.0\n\
         2020-01-02T12:00Z,40.0\n",
    );
    let client = HapiClient::with_transport(cached_config(dir.path()), server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-03T00:00Z")
        .unwrap();
    let fluxes: Vec<f64> = values(records).into_iter().map(|(_, v)| v).collect();
    assert_eq!(fluxes, vec![10.0, 20.0, 30.0, 40.0]);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].1.iter().any(|h| h == IF_MODIFIED_SINCE));
    assert_eq!(
        std::fs::read_to_string(granule(dir.path(), "20200101.flux.csv")).unwrap(),
        "10.0\n20.0\n"
    );
    assert_eq!(
        std::fs::read_to_string(granule(dir.path(), "20200102.flux.csv")).unwrap(),
        "30.0\n40.0\n"
    );
}

#[test]
fn test_offline_reads_combined_granules() {
    let dir = TempDir::new().unwrap();
    let info_path = dir.path().join("https/example.org/hapi/info/ds1.json");
    std::fs::create_dir_all(info_path.parent().unwrap()).unwrap();
    std::fs::write(&info_path, INFO).unwrap();

    let layout = Arc::new(SchemaLayout::from_info(&Info::from_json(INFO).unwrap()).unwrap());
    let source = LineRecordIterator::new(
        layout.clone(),
        Box::new(SingleSource::new(Cursor::new(DATA.as_bytes().to_vec()))),
    )
    .unwrap();
    let options = WriteCacheOptions {
        split: false,
        ..Default::default()
    };
    let dataset_root = dir.path().join("https/example.org/hapi/data/ds1");
    let writer = WriteCacheIterator::new(
        layout,
        source,
        "2020-01-01T00:00Z",
        "2020-01-03T00:00Z",
        &dataset_root,
        options,
    )
    .unwrap();
    assert_eq!(writer.count(), 4);
    assert!(granule(dir.path(), "20200101.csv").exists());
    assert!(granule(dir.path(), "20200102.csv").exists());

    let server = FakeServer::new(INFO);
    let config = cached_config(dir.path()).with_offline(true);
    let client = HapiClient::with_transport(config, server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T06:00Z", "2020-01-03T00:00Z")
        .unwrap();
    assert_eq!(values(records), all_values()[1..].to_vec());
    assert_eq!(server.request_count(), 0);
}

#[test]
fn test_unreachable_server_falls_back_to_complete_cache() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO);

    let server = FakeServer::new(INFO);
    server.set_down(true);
    let client = HapiClient::with_transport(cached_config(dir.path()), server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-03T00:00Z")
        .unwrap();
    assert_eq!(values(records), all_values());
    assert_eq!(server.request_count(), 1);
}

#[test]
fn test_incomplete_cache_goes_to_network_online_and_is_empty_offline() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO);

    let offline = FakeServer::new(INFO);
    let config = cached_config(dir.path()).with_offline(true);
    let client = HapiClient::with_transport(config, offline.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-04T00:00Z")
        .unwrap();
    assert_eq!(records.count(), 0);
    assert_eq!(offline.request_count(), 0);

    let online = FakeServer::new(INFO);
    let client = HapiClient::with_transport(cached_config(dir.path()), online.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-04T00:00Z")
        .unwrap();
    assert_eq!(values(records), all_values());
    let requests = online.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].1.iter().any(|h| h == IF_MODIFIED_SINCE));
}

#[test]
fn test_stale_cache_is_refetched() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO);
    std::thread::sleep(Duration::from_millis(20));

    let server = FakeServer::new(INFO);
    let config = cached_config(dir.path()).with_max_cache_age(Duration::ZERO);
    let client = HapiClient::with_transport(config, server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-03T00:00Z")
        .unwrap();
    assert_eq!(values(records), all_values());
    let paths: Vec<bool> = server
        .requests()
        .iter()
        .map(|(url, headers)| {
            url.contains("/hapi/data") && !headers.iter().any(|h| h == IF_MODIFIED_SINCE)
        })
        .collect();
    assert_eq!(paths, vec![false, true], "info refetched, then an unconditional data request");
}

#[test]
fn test_without_cache_nothing_is_written() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new(INFO);
    let config = ClientConfig::new().with_cache_root(dir.path());
    let client = HapiClient::with_transport(config, server.clone());
    let records = client
        .data(SERVER, "ds1", None, "2020-01-01T00:00Z", "2020-01-03T00:00Z")
        .unwrap();
    assert_eq!(values(records), all_values());
    assert_eq!(server.request_count(), 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_expired_document_is_used_when_server_is_down() {
    let dir = TempDir::new().unwrap();
    populate(dir.path(), INFO);
    std::thread::sleep(Duration::from_millis(20));

    let server = FakeServer::new(INFO);
    server.set_down(true);
    let config = cached_config(dir.path()).with_max_cache_age(Duration::ZERO);
    let client = HapiClient::with_transport(config, server);
    let names = client.parameter_names(SERVER, "ds1").unwrap();
    assert_eq!(names, vec!["Time", "flux"]);
}

#[test]
fn test_error_status_with_json_body_surfaces_hapi_code() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new(INFO);
    server.route(
        "/hapi/info",
        404,
        r#"{"HAPI":"3.0","status":{"code":1406,"message":"Bad request - unknown dataset id"}}"#,
    );
    let client = HapiClient::with_transport(cached_config(dir.path()), server);
    match client.info(SERVER, "nope") {
        Err(HapiError::Protocol { code, message }) => {
            assert_eq!(code, 1406);
            assert!(message.contains("unknown dataset id"));
        }
        other => panic!("expected protocol error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_parameter_subset_must_be_in_server_order() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new(
        r#"{"status":{"code":1200},"parameters":[
            {"name":"Time","type":"isotime","length":17},
            {"name":"a","type":"double"},
            {"name":"b","type":"double"}]}"#,
    );
    let client = HapiClient::with_transport(cached_config(dir.path()), server);
    let requested = vec!["b".to_string(), "a".to_string()];
    let err = client.info_parameters(SERVER, "ds1", &requested).unwrap_err();
    assert!(err.to_string().contains("a,b"), "{}", err);
}

#[test]
fn test_catalog_ids() {
    let server = FakeServer::new(INFO);
    let client = HapiClient::with_transport(ClientConfig::new(), server);
    assert_eq!(client.catalog_ids(SERVER).unwrap(), vec!["ds1"]);
}
