//! Record model shared by the CSV and binary encodings
//!
//! A [`SchemaLayout`] is derived once per dataset from its info document and
//! shared (behind an `Arc`) by every record read from that dataset. Records
//! are read-only views addressed by column index.

mod binary;
mod csv;

pub use binary::{BinaryConverter, BinaryRecord};
pub use csv::{split_csv, CsvConverter, CsvRecord};

use std::borrow::Cow;
use std::io::{self, Write};

use crate::error::{HapiError, Result};
use crate::info::Info;

const LEN_INTEGER: usize = 4;
const LEN_DOUBLE: usize = 8;

/// Logical type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    IsoTime,
    String,
    Integer,
    Double,
}

impl ParameterType {
    /// Maps the info document's `type` member
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "isotime" => Ok(ParameterType::IsoTime),
            "string" => Ok(ParameterType::String),
            "integer" => Ok(ParameterType::Integer),
            "double" => Ok(ParameterType::Double),
            other => Err(HapiError::Schema(format!("type not supported: {}", other))),
        }
    }
}

/// Encoding of a data stream, which is also the cache file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Binary,
}

impl DataFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Binary => "binary",
        }
    }
}

/// Column layout derived from an info document
///
/// `sizes[i]` is the flattened element count of parameter `i`, `lengths[i]`
/// the bytes per element in the binary encoding and `offsets[i]` the byte
/// offset of the parameter within a binary record.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaLayout {
    pub names: Vec<String>,
    pub types: Vec<ParameterType>,
    pub sizes: Vec<usize>,
    pub lengths: Vec<usize>,
    pub offsets: Vec<usize>,
}

impl SchemaLayout {
    /// Computes the layout for the parameters of `info`
    ///
    /// # Errors
    /// `HapiError::Schema` when a type is unsupported, a `size` array is
    /// empty or has non-positive entries, a `length` is negative, or there
    /// are no parameters at all.
    pub fn from_info(info: &Info) -> Result<Self> {
        if info.parameters.is_empty() {
            return Err(HapiError::Schema("info has no parameters".to_string()));
        }
        let n = info.parameters.len();
        let mut layout = SchemaLayout {
            names: Vec::with_capacity(n),
            types: Vec::with_capacity(n),
            sizes: Vec::with_capacity(n),
            lengths: Vec::with_capacity(n),
            offsets: Vec::with_capacity(n),
        };
        let mut offset = 0;
        for p in &info.parameters {
            let kind = ParameterType::from_name(&p.kind)?;
            let length = match kind {
                ParameterType::Integer => LEN_INTEGER,
                ParameterType::Double => LEN_DOUBLE,
                ParameterType::IsoTime | ParameterType::String => match p.length {
                    Some(len) if len < 0 => {
                        return Err(HapiError::Schema(format!(
                            "parameter {} has negative length",
                            p.name
                        )))
                    }
                    Some(len) => len as usize,
                    None => 0,
                },
            };
            let size = match &p.size {
                None => 1,
                Some(dims) if dims.is_empty() || dims.iter().any(|d| *d <= 0) => {
                    return Err(HapiError::Schema(format!(
                        "parameter {} has malformed size {:?}",
                        p.name, dims
                    )))
                }
                Some(dims) => dims.iter().product::<i64>() as usize,
            };
            layout.names.push(p.name.clone());
            layout.types.push(kind);
            layout.sizes.push(size);
            layout.lengths.push(length);
            layout.offsets.push(offset);
            offset += size * length;
        }
        Ok(layout)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Total number of bytes in one binary record
    pub fn record_size(&self) -> usize {
        let last = self.len() - 1;
        self.offsets[last] + self.sizes[last] * self.lengths[last]
    }

    /// Number of raw CSV fields in one record
    pub fn field_count(&self) -> usize {
        self.sizes.iter().sum()
    }
}

/// Read-only view of one data record
///
/// Typed accessors are a caller contract: CSV records parse their text and
/// report non-numbers, binary records reinterpret bytes as asked.
pub trait HapiRecord {
    /// Number of columns (parameters)
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The time tag in column `i`, as sent by the server
    fn iso_time(&self, i: usize) -> Cow<'_, str>;

    fn string(&self, i: usize) -> Cow<'_, str>;

    fn string_array(&self, i: usize) -> Vec<String>;

    fn double(&self, i: usize) -> Result<f64>;

    /// Elements of a multi-dimensional parameter, flattened
    fn double_array(&self, i: usize) -> Result<Vec<f64>>;

    fn integer(&self, i: usize) -> Result<i32>;

    fn integer_array(&self, i: usize) -> Result<Vec<i32>>;

    /// Writes column `i` in the record's own encoding, without delimiters
    fn write_column(&self, i: usize, out: &mut dyn Write) -> io::Result<()>;
}
