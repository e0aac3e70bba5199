use std::io::{ErrorKind, Read};
use std::sync::Arc;

use crate::error::{HapiError, Result};
use crate::record::{BinaryConverter, BinaryRecord, SchemaLayout};

/// Reads fixed-size binary records from a byte stream
pub struct BinaryRecordIterator {
    converter: BinaryConverter,
    reader: Option<Box<dyn Read>>,
    lookahead: Option<Vec<u8>>,
    failed: Option<HapiError>,
}

impl BinaryRecordIterator {
    pub fn new(layout: Arc<SchemaLayout>, reader: impl Read + 'static) -> Result<Self> {
        let mut iter = Self {
            converter: BinaryConverter::new(layout)?,
            reader: Some(Box::new(reader)),
            lookahead: None,
            failed: None,
        };
        iter.lookahead = iter.read_record()?;
        Ok(iter)
    }

    /// Reads one whole record, `None` at a clean end of stream
    fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let size = self.converter.record_size();
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            self.reader = None;
            return Ok(None);
        }
        if filled < size {
            self.reader = None;
            return Err(HapiError::Format(format!(
                "partial record read: {} of {} bytes",
                filled, size
            )));
        }
        Ok(Some(buf))
    }

    pub fn has_next(&self) -> bool {
        self.lookahead.is_some() || self.failed.is_some()
    }

    /// Returns the lookahead record and reads the next one
    ///
    /// A read failure is reported by the following call, so the record
    /// already in hand is not lost.
    pub fn next_record(&mut self) -> Result<BinaryRecord> {
        let Some(bytes) = self.lookahead.take() else {
            return Err(self.failed.take().unwrap_or(HapiError::Exhausted));
        };
        match self.read_record() {
            Ok(next) => self.lookahead = next,
            Err(e) => self.failed = Some(e),
        }
        self.converter.convert(bytes)
    }
}

impl Iterator for BinaryRecordIterator {
    type Item = Result<BinaryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        Some(self.next_record())
    }
}
