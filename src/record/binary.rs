//! Fixed-width little-endian binary records
//!
//! Integers are 4 bytes, doubles 8 bytes, strings and time tags fixed-width
//! character blocks padded with NULs. Array elements follow each other at the
//! element stride.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use super::{HapiRecord, ParameterType, SchemaLayout};
use crate::error::{HapiError, Result};

/// Converts raw record buffers into records for one dataset
#[derive(Debug, Clone)]
pub struct BinaryConverter {
    layout: Arc<SchemaLayout>,
    record_size: usize,
}

impl BinaryConverter {
    /// # Errors
    /// `HapiError::Schema` if a string or time parameter has no `length`,
    /// since the binary encoding cannot be laid out without it.
    pub fn new(layout: Arc<SchemaLayout>) -> Result<Self> {
        for (i, kind) in layout.types.iter().enumerate() {
            let textual = matches!(kind, ParameterType::IsoTime | ParameterType::String);
            if textual && layout.lengths[i] == 0 {
                return Err(HapiError::Schema(format!(
                    "parameter {} needs a length for binary data",
                    layout.names[i]
                )));
            }
        }
        let record_size = layout.record_size();
        Ok(Self {
            layout,
            record_size,
        })
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Wraps one record's bytes
    pub fn convert(&self, bytes: Vec<u8>) -> Result<BinaryRecord> {
        if bytes.len() != self.record_size {
            return Err(HapiError::Format(format!(
                "binary record has {} bytes, expected {}",
                bytes.len(),
                self.record_size
            )));
        }
        Ok(BinaryRecord {
            layout: Arc::clone(&self.layout),
            bytes,
        })
    }
}

/// A record backed by one fixed-size binary buffer
#[derive(Debug, Clone)]
pub struct BinaryRecord {
    layout: Arc<SchemaLayout>,
    bytes: Vec<u8>,
}

impl BinaryRecord {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn element(&self, i: usize, j: usize) -> &[u8] {
        let len = self.layout.lengths[i];
        let start = self.layout.offsets[i] + j * len;
        &self.bytes[start..start + len]
    }

    fn text(&self, i: usize, j: usize) -> Cow<'_, str> {
        let raw = self.element(i, j);
        let end = raw.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
        String::from_utf8_lossy(&raw[..end])
    }

    fn f64_at(&self, offset: usize) -> f64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.bytes[offset..offset + 8]);
        f64::from_le_bytes(b)
    }

    fn i32_at(&self, offset: usize) -> i32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.bytes[offset..offset + 4]);
        i32::from_le_bytes(b)
    }
}

impl HapiRecord for BinaryRecord {
    fn len(&self) -> usize {
        self.layout.len()
    }

    fn iso_time(&self, i: usize) -> Cow<'_, str> {
        self.text(i, 0)
    }

    fn string(&self, i: usize) -> Cow<'_, str> {
        self.text(i, 0)
    }

    fn string_array(&self, i: usize) -> Vec<String> {
        (0..self.layout.sizes[i])
            .map(|j| self.text(i, j).into_owned())
            .collect()
    }

    fn double(&self, i: usize) -> Result<f64> {
        Ok(self.f64_at(self.layout.offsets[i]))
    }

    fn double_array(&self, i: usize) -> Result<Vec<f64>> {
        let base = self.layout.offsets[i];
        Ok((0..self.layout.sizes[i])
            .map(|j| self.f64_at(base + j * 8))
            .collect())
    }

    fn integer(&self, i: usize) -> Result<i32> {
        Ok(self.i32_at(self.layout.offsets[i]))
    }

    fn integer_array(&self, i: usize) -> Result<Vec<i32>> {
        let base = self.layout.offsets[i];
        Ok((0..self.layout.sizes[i])
            .map(|j| self.i32_at(base + j * 4))
            .collect())
    }

    fn write_column(&self, i: usize, out: &mut dyn Write) -> io::Result<()> {
        let start = self.layout.offsets[i];
        let end = start + self.layout.sizes[i] * self.layout.lengths[i];
        out.write_all(&self.bytes[start..end])
    }
}

/// Renders the record as one CSV line, the way the server would send it
impl fmt::Display for BinaryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.layout.len() {
            let len = self.layout.lengths[i];
            let base = self.layout.offsets[i];
            for j in 0..self.layout.sizes[i] {
                if i > 0 || j > 0 {
                    f.write_str(",")?;
                }
                match self.layout.types[i] {
                    ParameterType::IsoTime | ParameterType::String => {
                        write!(f, "{}", self.text(i, j))?
                    }
                    ParameterType::Double => write!(f, "{}", self.f64_at(base + j * len))?,
                    ParameterType::Integer => write!(f, "{}", self.i32_at(base + j * len))?,
                }
            }
        }
        Ok(())
    }
}
