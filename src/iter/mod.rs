//! Record iterators
//!
//! Every iterator here yields `Result<R, HapiError>` items and signals the
//! end with `None`. Underlying files and connections are released as soon as
//! a source runs dry, and in any case when the iterator is dropped, so a
//! caller that stops early leaks nothing but what it chose to keep.

mod binary_records;
mod line_records;
mod trim;
mod write_cache;

pub use binary_records::BinaryRecordIterator;
pub use line_records::LineRecordIterator;
pub use trim::TrimIterator;
pub use write_cache::{WriteCacheIterator, WriteCacheOptions};

use crate::error::Result;

/// A boxed record stream, as returned by the client
pub type Records<R> = Box<dyn Iterator<Item = Result<R>>>;
