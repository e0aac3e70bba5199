use std::io;

use tracing::warn;

use super::LineSource;

/// Joins several line sources side by side
///
/// Each step reads one line from every source and joins them with the
/// delimiter. Sources that have run out contribute empty fields; the stream
/// ends once all of them are exhausted.
///
/// The first source carries the time tags. While the monotonic guard is on
/// (the default), a step whose first field sorts before the greatest one seen
/// so far is dropped whole and the next step is read instead.
pub struct Paste {
    sources: Vec<Box<dyn LineSource>>,
    delimiter: char,
    monotonic: bool,
    greatest: Option<String>,
}

impl Paste {
    pub fn new(delimiter: char) -> Self {
        Self {
            sources: Vec::new(),
            delimiter,
            monotonic: true,
            greatest: None,
        }
    }

    /// Adds a source as the next column group
    pub fn push(&mut self, source: Box<dyn LineSource>) {
        self.sources.push(source);
    }

    pub fn with_monotonic(mut self, monotonic: bool) -> Self {
        self.monotonic = monotonic;
        self
    }

    fn is_regression(&mut self, key: &str) -> bool {
        if !self.monotonic {
            return false;
        }
        match &self.greatest {
            Some(greatest) if greatest.as_str() > key => true,
            _ => {
                self.greatest = Some(key.to_string());
                false
            }
        }
    }
}

impl LineSource for Paste {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let mut fields = Vec::with_capacity(self.sources.len());
            for source in self.sources.iter_mut() {
                fields.push(source.read_line()?);
            }
            if fields.iter().all(Option::is_none) {
                return Ok(None);
            }
            if let Some(Some(key)) = fields.first() {
                if self.is_regression(key) {
                    warn!(time = %key, "dropping row that goes back in time");
                    continue;
                }
            }
            let mut line = String::new();
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    line.push(self.delimiter);
                }
                if let Some(text) = field {
                    line.push_str(text);
                }
            }
            return Ok(Some(line));
        }
    }

    fn close(&mut self) -> io::Result<()> {
        for source in self.sources.iter_mut() {
            source.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::tests::{drain, text};

    #[test]
    fn test_paste_joins_parallel_lines() {
        let mut paste = Paste::new(',');
        paste.push(text("t1\nt2\n"));
        paste.push(text("1.0\n2.0\n"));
        assert_eq!(drain(&mut paste), vec!["t1,1.0", "t2,2.0"]);
    }

    #[test]
    fn test_paste_drops_only_the_regressing_row() {
        let mut paste = Paste::new(',');
        paste.push(text("2020-01-01T01\n2020-01-01T00\n2020-01-01T03\n"));
        paste.push(text("a\nb\nc\n"));
        assert_eq!(
            drain(&mut paste),
            vec!["2020-01-01T01,a", "2020-01-01T03,c"]
        );
    }

    #[test]
    fn test_paste_keeps_equal_times() {
        let mut paste = Paste::new(',');
        paste.push(text("t1\nt1\nt2\n"));
        assert_eq!(drain(&mut paste), vec!["t1", "t1", "t2"]);
    }

    #[test]
    fn test_paste_without_guard_keeps_regressions() {
        let mut paste = Paste::new(',').with_monotonic(false);
        paste.push(text("t2\nt1\n"));
        assert_eq!(drain(&mut paste), vec!["t2", "t1"]);
    }

    #[test]
    fn test_shorter_sources_contribute_empty_fields() {
        let mut paste = Paste::new('\t');
        paste.push(text("t1\nt2\nt3\n"));
        paste.push(text("x\n"));
        assert_eq!(drain(&mut paste), vec!["t1\tx", "t2\t", "t3\t"]);
    }

    #[test]
    fn test_paste_of_nothing_is_empty() {
        let mut paste = Paste::new(',');
        assert_eq!(paste.read_line().unwrap(), None);
    }
}
