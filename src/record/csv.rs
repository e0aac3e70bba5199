//! CSV records
//!
//! A data line is split on commas that are not inside double quotes. Array
//! parameters occupy several consecutive raw fields, which are re-joined so
//! that each parameter maps to one column of the record.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use super::{HapiRecord, SchemaLayout};
use crate::error::{HapiError, Result};

/// Splits a CSV line on unquoted commas, keeping empty trailing fields
pub fn split_csv(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&line[start..]);
    fields
}

fn unquote(field: &str) -> Cow<'_, str> {
    let trimmed = field.trim();
    match trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
    {
        Some(inner) if inner.contains("\"\"") => Cow::Owned(inner.replace("\"\"", "\"")),
        Some(inner) => Cow::Borrowed(inner),
        None => Cow::Borrowed(trimmed),
    }
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T> {
    text.trim().parse::<T>().map_err(|_| HapiError::NumberFormat {
        value: text.to_string(),
    })
}

/// Converts CSV lines into records for one dataset
#[derive(Debug, Clone)]
pub struct CsvConverter {
    layout: Arc<SchemaLayout>,
}

impl CsvConverter {
    pub fn new(layout: Arc<SchemaLayout>) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Arc<SchemaLayout> {
        &self.layout
    }

    /// Parses one line, grouping raw fields by parameter
    ///
    /// # Errors
    /// `HapiError::Format` if the line has fewer fields than the layout needs.
    pub fn convert(&self, line: &str) -> Result<CsvRecord> {
        let raw = split_csv(line.trim());
        let needed = self.layout.field_count();
        if raw.len() < needed {
            return Err(HapiError::Format(format!(
                "expected {} fields but found {}: {}",
                needed,
                raw.len(),
                line
            )));
        }
        let mut fields = Vec::with_capacity(self.layout.len());
        let mut at = 0;
        for &size in &self.layout.sizes {
            fields.push(raw[at..at + size].join(","));
            at += size;
        }
        Ok(CsvRecord { fields })
    }
}

/// A record backed by CSV text, one string per parameter
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRecord {
    fields: Vec<String>,
}

impl HapiRecord for CsvRecord {
    fn len(&self) -> usize {
        self.fields.len()
    }

    fn iso_time(&self, i: usize) -> Cow<'_, str> {
        Cow::Borrowed(self.fields[i].trim())
    }

    fn string(&self, i: usize) -> Cow<'_, str> {
        unquote(&self.fields[i])
    }

    fn string_array(&self, i: usize) -> Vec<String> {
        split_csv(&self.fields[i])
            .into_iter()
            .map(|s| unquote(s).into_owned())
            .collect()
    }

    fn double(&self, i: usize) -> Result<f64> {
        parse_number(&self.fields[i])
    }

    fn double_array(&self, i: usize) -> Result<Vec<f64>> {
        self.fields[i].split(',').map(parse_number).collect()
    }

    fn integer(&self, i: usize) -> Result<i32> {
        parse_number(&self.fields[i])
    }

    fn integer_array(&self, i: usize) -> Result<Vec<i32>> {
        self.fields[i].split(',').map(parse_number).collect()
    }

    fn write_column(&self, i: usize, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.fields[i].as_bytes())
    }
}

impl fmt::Display for CsvRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(","))
    }
}
