//! HTTP transport used by the client
//!
//! The client only ever issues GET requests, so the transport is a single
//! method behind a trait. [`ReqwestTransport`] is the real implementation;
//! tests substitute an in-memory one.

use std::io::{BufReader, Read};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_ENCODING;
use reqwest::Url;
use tracing::debug;

use crate::error::Result;

pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
pub const ACCEPT_ENCODING: &str = "Accept-Encoding";

/// Status code for "use your cached copy"
pub const NOT_MODIFIED: u16 = 304;

/// A response whose body has not been read yet
pub struct HttpResponse {
    pub status: u16,
    /// The `Content-Encoding` header, if any
    pub content_encoding: Option<String>,
    pub body: Box<dyn Read>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == NOT_MODIFIED
    }

    /// The body, gunzipped when the server compressed it
    pub fn into_decoded(self) -> Box<dyn Read> {
        let gzipped = self
            .content_encoding
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("gzip"));
        if gzipped {
            Box::new(GzDecoder::new(BufReader::new(self.body)))
        } else {
            self.body
        }
    }

    /// Reads the whole (decoded) body as text
    pub fn into_text(self) -> Result<String> {
        let mut text = String::new();
        self.into_decoded().read_to_string(&mut text)?;
        Ok(text)
    }
}

/// Something that can issue an HTTP GET
pub trait Transport {
    /// Sends a GET for `url` with extra request `headers`
    ///
    /// Any status code is a successful result; only failing to get a
    /// response at all is an error.
    fn get(&self, url: &Url, headers: &[(&str, String)]) -> Result<HttpResponse>;
}

/// Blocking HTTP transport built on reqwest
pub struct ReqwestTransport {
    http_client: Client,
}

impl ReqwestTransport {
    /// Creates a transport with the given connect and read timeouts
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .user_agent(concat!("hapi-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http_client })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &Url, headers: &[(&str, String)]) -> Result<HttpResponse> {
        debug!(url = %url, "GET");
        let mut request = self.http_client.get(url.clone());
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        let response = request.send()?;
        let status = response.status().as_u16();
        debug!(url = %url, status, "response");
        let content_encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(HttpResponse {
            status,
            content_encoding,
            body: Box::new(response),
        })
    }
}

/// Formats a time as an HTTP date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
