//! HAPI time-series client library
//!
//! Fetches catalogs, info documents and data records from HAPI servers and
//! keeps a per-day, per-parameter disk cache so repeated requests, and
//! offline use, need not touch the network. The binary (`hapi`) is a thin
//! front end; integration tests drive these modules directly.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod info;
pub mod iter;
pub mod lines;
pub mod record;
pub mod time;
pub mod transport;

pub use client::HapiClient;
pub use config::ClientConfig;
pub use error::{HapiError, Result};
pub use info::{Catalog, Info};
pub use record::{BinaryRecord, CsvRecord, HapiRecord};
