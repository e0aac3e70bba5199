//! Line streams that can be composed into one logical CSV stream
//!
//! Cached data lives in many small files, one per day and parameter. These
//! sources rebuild the stream the server would have sent: [`Paste`] joins the
//! per-parameter files of one day side by side, and [`Concatenate`] chains
//! the days one after another.

mod concatenate;
mod paste;

pub use concatenate::Concatenate;
pub use paste::Paste;

use std::io::{self, BufRead};

/// Something that produces lines of text
pub trait LineSource {
    /// Returns the next line without its terminator, or `None` at the end
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Releases whatever the source holds open. Reading after `close`
    /// returns `None`.
    fn close(&mut self) -> io::Result<()>;
}

impl<T: LineSource + ?Sized> LineSource for Box<T> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        (**self).read_line()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Passes the lines of one reader through unchanged
///
/// The reader is dropped, closing any file behind it, as soon as it reports
/// end of file.
pub struct SingleSource {
    reader: Option<Box<dyn BufRead>>,
}

impl SingleSource {
    pub fn new(reader: impl BufRead + 'static) -> Self {
        Self {
            reader: Some(Box::new(reader)),
        }
    }
}

impl LineSource for SingleSource {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            self.reader = None;
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader = None;
        Ok(())
    }
}
