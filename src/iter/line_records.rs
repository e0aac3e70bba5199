use std::sync::Arc;

use crate::error::{HapiError, Result};
use crate::lines::LineSource;
use crate::record::{CsvConverter, CsvRecord, SchemaLayout};

/// Converts the lines of a [`LineSource`] into CSV records
///
/// One line of lookahead is read up front, so [`has_next`](Self::has_next)
/// never touches the source. Blank lines are skipped.
pub struct LineRecordIterator {
    converter: CsvConverter,
    source: Option<Box<dyn LineSource>>,
    lookahead: Option<String>,
    failed: Option<HapiError>,
}

impl LineRecordIterator {
    /// Wraps `source`, reading the first line immediately
    pub fn new(layout: Arc<SchemaLayout>, source: Box<dyn LineSource>) -> Result<Self> {
        let mut iter = Self {
            converter: CsvConverter::new(layout),
            source: Some(source),
            lookahead: None,
            failed: None,
        };
        iter.refill()?;
        Ok(iter)
    }

    /// An iterator that yields nothing
    pub fn empty(layout: Arc<SchemaLayout>) -> Self {
        Self {
            converter: CsvConverter::new(layout),
            source: None,
            lookahead: None,
            failed: None,
        }
    }

    fn refill(&mut self) -> Result<()> {
        self.lookahead = None;
        while let Some(source) = self.source.as_mut() {
            match source.read_line()? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    self.lookahead = Some(line);
                    return Ok(());
                }
                None => {
                    if let Some(mut finished) = self.source.take() {
                        finished.close()?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn has_next(&self) -> bool {
        self.lookahead.is_some() || self.failed.is_some()
    }

    /// Converts the lookahead line and reads the next one
    ///
    /// # Errors
    /// `HapiError::Exhausted` when there are no more records, otherwise any
    /// conversion error. A failure reading the following line is reported by
    /// the next call.
    pub fn next_record(&mut self) -> Result<CsvRecord> {
        let Some(line) = self.lookahead.take() else {
            return Err(self.failed.take().unwrap_or(HapiError::Exhausted));
        };
        if let Err(e) = self.refill() {
            self.source = None;
            self.failed = Some(e);
        }
        self.converter.convert(&line)
    }
}

impl Iterator for LineRecordIterator {
    type Item = Result<CsvRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        Some(self.next_record())
    }
}
