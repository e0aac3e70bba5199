use std::collections::VecDeque;
use std::io;

use super::LineSource;

/// Chains line sources one after another
///
/// All of a source's lines are read before the next source is started, and
/// each source is closed as soon as it runs out.
#[derive(Default)]
pub struct Concatenate {
    sources: VecDeque<Box<dyn LineSource>>,
}

impl Concatenate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source to be read after the ones already added
    pub fn push(&mut self, source: Box<dyn LineSource>) {
        self.sources.push_back(source);
    }
}

impl LineSource for Concatenate {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        while let Some(current) = self.sources.front_mut() {
            if let Some(line) = current.read_line()? {
                return Ok(Some(line));
            }
            if let Some(mut finished) = self.sources.pop_front() {
                finished.close()?;
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> io::Result<()> {
        while let Some(mut source) = self.sources.pop_front() {
            source.close()?;
        }
        Ok(())
    }
}
