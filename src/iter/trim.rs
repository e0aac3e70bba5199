use std::marker::PhantomData;

use crate::error::Result;
use crate::record::HapiRecord;
use crate::time;

/// Restricts a record stream to the window `[start, end)`
///
/// The bounds are re-rendered in the shape of the first record's time tag so
/// they compare as plain strings. Records before `start` are skipped; the
/// first record at or after `end` ends the stream and releases the source.
pub struct TrimIterator<I, R> {
    source: Option<I>,
    start: String,
    end: String,
    shaped: bool,
    _record: PhantomData<R>,
}

impl<I, R> TrimIterator<I, R>
where
    I: Iterator<Item = Result<R>>,
    R: HapiRecord,
{
    pub fn new(source: I, start: &str, end: &str) -> Self {
        Self {
            source: Some(source),
            start: start.to_string(),
            end: end.to_string(),
            shaped: false,
            _record: PhantomData,
        }
    }

    fn shape_bounds(&mut self, example: &str) -> Result<()> {
        self.start = time::reformat(example, &self.start)?;
        self.end = time::reformat(example, &self.end)?;
        self.shaped = true;
        Ok(())
    }
}

impl<I, R> Iterator for TrimIterator<I, R>
where
    I: Iterator<Item = Result<R>>,
    R: HapiRecord,
{
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.source.as_mut()?.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.source = None;
                    return None;
                }
            };
            let t = record.iso_time(0).into_owned();
            if !self.shaped {
                if let Err(e) = self.shape_bounds(&t) {
                    self.source = None;
                    return Some(Err(e));
                }
            }
            if t.as_str() >= self.end.as_str() {
                self.source = None;
                return None;
            }
            if t.as_str() >= self.start.as_str() {
                return Some(Ok(record));
            }
        }
    }
}
