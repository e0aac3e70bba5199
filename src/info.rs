//! Catalog and info documents returned by a HAPI server
//!
//! Only the members the client needs are typed; everything else in the
//! document is kept in `extra` so a cached copy round-trips unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HapiError, Result};

/// HAPI status code for a successful request
pub const STATUS_OK: i32 = 1200;

/// HAPI status code for a successful request that matched no data
pub const STATUS_OK_NO_DATA: i32 = 1201;

/// Status block present in every HAPI JSON response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

impl Status {
    /// Converts a non-OK status into a protocol error
    pub fn check(&self) -> Result<()> {
        if self.code == STATUS_OK || self.code == STATUS_OK_NO_DATA {
            Ok(())
        } else {
            Err(HapiError::Protocol {
                code: self.code,
                message: self.message.clone(),
            })
        }
    }
}

/// One dataset listed in a catalog response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Response of `{server}/catalog`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(rename = "HAPI", default, skip_serializing_if = "Option::is_none")]
    pub hapi: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

impl Catalog {
    /// Dataset identifiers in catalog order
    pub fn ids(&self) -> Vec<String> {
        self.catalog.iter().map(|e| e.id.clone()).collect()
    }
}

/// Description of one parameter (column) of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Logical type: `isotime`, `string`, `integer` or `double`
    #[serde(rename = "type")]
    pub kind: String,
    /// Characters per element, required for `isotime` and `string`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
    /// Array shape; absent for scalars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct StatusOnly {
    status: Status,
}

/// Response of `{server}/info?id=...`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    #[serde(rename = "HAPI", default, skip_serializing_if = "Option::is_none")]
    pub hapi: Option<String>,
    pub status: Status,
    pub parameters: Vec<Parameter>,
    #[serde(rename = "startDate", default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(rename = "stopDate", default, skip_serializing_if = "Option::is_none")]
    pub stop_date: Option<String>,
    /// When the origin last changed any of the dataset's data
    #[serde(rename = "modificationDate", default, skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Info {
    /// Parses an info document and checks its status
    ///
    /// The status is checked first, so an error document (which has no
    /// parameters) reports the server's status rather than a parse error.
    pub fn from_json(text: &str) -> Result<Self> {
        let head: StatusOnly = serde_json::from_str(text)?;
        head.status.check()?;
        Ok(serde_json::from_str(text)?)
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Checks that the server returned exactly the requested parameters, in
    /// the requested order, optionally preceded by the time column
    ///
    /// # Errors
    /// `HapiError::Protocol` naming the order the server expects.
    pub fn check_parameter_order(&self, requested: &[String]) -> Result<()> {
        let names = self.parameter_names();
        if requested.len() != names.len() && requested.len() + 1 != names.len() {
            return Err(HapiError::protocol(
                "number of parameters in result doesn't match the request",
            ));
        }
        let offset = names.len() - requested.len();
        if names[offset..] != requested[..] {
            return Err(HapiError::protocol(format!(
                "parameters must be requested in order, use instead {}",
                names[offset..].join(",")
            )));
        }
        Ok(())
    }
}
