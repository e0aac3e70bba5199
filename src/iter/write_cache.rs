use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};

use crate::cache::granule::{day_tag, granule_path, sibling_path, writing_path};
use crate::error::{HapiError, Result};
use crate::record::{DataFormat, HapiRecord, SchemaLayout};
use crate::time;

/// How the write-through cache lays out its granules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCacheOptions {
    pub format: DataFormat,
    /// One file per parameter rather than one per day
    pub split: bool,
    /// Write `.gz` granules
    pub compress: bool,
}

impl Default for WriteCacheOptions {
    fn default() -> Self {
        Self {
            format: DataFormat::Csv,
            split: true,
            compress: false,
        }
    }
}

enum ChannelWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl ChannelWriter {
    fn finish(self) -> io::Result<()> {
        match self {
            ChannelWriter::Plain(mut w) => w.flush(),
            ChannelWriter::Gzip(w) => w.finish()?.flush(),
        }
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ChannelWriter::Plain(w) => w.write(buf),
            ChannelWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ChannelWriter::Plain(w) => w.flush(),
            ChannelWriter::Gzip(w) => w.flush(),
        }
    }
}

/// One output file being written under its temporary name
struct Channel {
    target: PathBuf,
    temp: PathBuf,
    writer: ChannelWriter,
}

impl Channel {
    fn create(target: PathBuf, compress: bool) -> Result<Self> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| HapiError::cache_io(parent, e))?;
        }
        let temp = writing_path(&target);
        let file = File::create(&temp).map_err(|e| HapiError::cache_io(&temp, e))?;
        let writer = if compress {
            ChannelWriter::Gzip(GzEncoder::new(BufWriter::new(file), Compression::default()))
        } else {
            ChannelWriter::Plain(BufWriter::new(file))
        };
        Ok(Self {
            target,
            temp,
            writer,
        })
    }

    /// Closes the temp file and renames it over the target
    fn install(self) -> Result<()> {
        let Channel {
            target,
            temp,
            writer,
        } = self;
        let renamed = writer
            .finish()
            .and_then(|()| fs::rename(&temp, &target));
        if let Err(e) = renamed {
            discard(&temp);
            return Err(HapiError::cache_io(&target, e));
        }
        // a leftover .gz (or plain) twin would otherwise shadow this one
        let twin = sibling_path(&target);
        if twin.exists() {
            if let Err(e) = fs::remove_file(&twin) {
                warn!(path = %twin.display(), error = %e, "unable to remove outdated granule");
            }
        }
        info!(path = %target.display(), "installed cache granule");
        Ok(())
    }

    fn abandon(self) {
        drop(self.writer);
        discard(&self.temp);
    }
}

fn discard(temp: &Path) {
    if let Err(e) = fs::remove_file(temp) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %temp.display(), error = %e, "temporary file left in cache");
        }
    }
}

/// The open day: its channels and the time at which it ends
struct DayBucket {
    tag: String,
    end: String,
    channels: Vec<Channel>,
}

impl DayBucket {
    fn install(self) -> Result<()> {
        debug!(day = %self.tag, "installing day");
        let mut result = Ok(());
        for channel in self.channels {
            if let Err(e) = channel.install() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn abandon(self) {
        debug!(day = %self.tag, "abandoning partially written day");
        for channel in self.channels {
            channel.abandon();
        }
    }
}

/// Passes records through unchanged while writing whole days to the cache
///
/// Only days lying entirely within `[start, end)` are written. Each day is
/// written to temporary files named `<granule>.writing.<pid>` and renamed
/// into place once the stream moves past the day's end or runs out, so
/// readers never see a partial granule. A day still open when the iterator
/// is dropped is discarded.
///
/// Cache failures never interrupt the stream: they are logged and caching
/// stops for the rest of it.
pub struct WriteCacheIterator<I, R> {
    source: Option<I>,
    layout: Arc<SchemaLayout>,
    dataset_root: PathBuf,
    options: WriteCacheOptions,
    start: String,
    end: String,
    shaped: bool,
    enabled: bool,
    bucket: Option<DayBucket>,
    _record: PhantomData<R>,
}

impl<I, R> WriteCacheIterator<I, R>
where
    I: Iterator<Item = Result<R>>,
    R: HapiRecord,
{
    /// Wraps `source`, caching the whole days of `[start, end)` under
    /// `dataset_root`
    ///
    /// # Errors
    /// `HapiError::Format` when `start` or `end` is not a time.
    pub fn new(
        layout: Arc<SchemaLayout>,
        source: I,
        start: &str,
        end: &str,
        dataset_root: impl Into<PathBuf>,
        options: WriteCacheOptions,
    ) -> Result<Self> {
        Ok(Self {
            source: Some(source),
            layout,
            dataset_root: dataset_root.into(),
            options,
            start: time::ceil(start)?,
            end: time::floor(end)?,
            shaped: false,
            enabled: true,
            bucket: None,
            _record: PhantomData,
        })
    }

    fn disable(&mut self, error: &HapiError) {
        warn!(error = %error, "cache write failed, continuing without caching");
        self.enabled = false;
        if let Some(bucket) = self.bucket.take() {
            bucket.abandon();
        }
    }

    fn open_bucket(&self, t: &str) -> Result<DayBucket> {
        let end = time::reformat(t, &time::next_day(t)?)?;
        let names: Vec<Option<&str>> = if self.options.split {
            self.layout.names.iter().map(|n| Some(n.as_str())).collect()
        } else {
            vec![None]
        };
        let mut bucket = DayBucket {
            tag: day_tag(t)?,
            end,
            channels: Vec::with_capacity(names.len()),
        };
        for name in names {
            let opened = granule_path(
                &self.dataset_root,
                t,
                name,
                self.options.format,
                self.options.compress,
            )
            .and_then(|target| Channel::create(target, self.options.compress));
            match opened {
                Ok(channel) => bucket.channels.push(channel),
                Err(e) => {
                    bucket.abandon();
                    return Err(e);
                }
            }
        }
        Ok(bucket)
    }

    fn write_record(
        bucket: &mut DayBucket,
        record: &R,
        options: &WriteCacheOptions,
    ) -> io::Result<()> {
        let text = options.format == DataFormat::Csv;
        if options.split {
            for (i, channel) in bucket.channels.iter_mut().enumerate() {
                record.write_column(i, &mut channel.writer)?;
                if text {
                    channel.writer.write_all(b"\n")?;
                }
            }
        } else if let Some(channel) = bucket.channels.first_mut() {
            for i in 0..record.len() {
                if text && i > 0 {
                    channel.writer.write_all(b",")?;
                }
                record.write_column(i, &mut channel.writer)?;
            }
            if text {
                channel.writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    fn cache(&mut self, record: &R) -> Result<()> {
        let t = record.iso_time(0).into_owned();
        if !self.shaped {
            self.start = time::reformat(&t, &self.start)?;
            self.end = time::reformat(&t, &self.end)?;
            self.shaped = true;
        }
        if self.bucket.as_ref().is_some_and(|b| t >= b.end) {
            if let Some(bucket) = self.bucket.take() {
                bucket.install()?;
            }
        }
        if self.bucket.is_none() && t >= self.start && t < self.end {
            self.bucket = Some(self.open_bucket(&t)?);
        }
        if let Some(bucket) = self.bucket.as_mut() {
            Self::write_record(bucket, record, &self.options)
                .map_err(|e| HapiError::cache_io(&self.dataset_root, e))?;
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.source = None;
        if let Some(bucket) = self.bucket.take() {
            if let Err(e) = bucket.install() {
                warn!(error = %e, "unable to install cache granule");
            }
        }
    }
}

impl<I, R> Iterator for WriteCacheIterator<I, R>
where
    I: Iterator<Item = Result<R>>,
    R: HapiRecord,
{
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.source.as_mut()?.next() {
            Some(Ok(record)) => {
                if self.enabled {
                    if let Err(e) = self.cache(&record) {
                        self.disable(&e);
                    }
                }
                Some(Ok(record))
            }
            Some(Err(e)) => {
                // a broken stream must not install a truncated day
                if let Some(bucket) = self.bucket.take() {
                    bucket.abandon();
                }
                self.enabled = false;
                Some(Err(e))
            }
            None => {
                self.finish();
                None
            }
        }
    }
}

impl<I, R> Drop for WriteCacheIterator<I, R> {
    fn drop(&mut self) {
        if let Some(bucket) = self.bucket.take() {
            bucket.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::LineRecordIterator;
    use crate::lines::tests::text;
    use crate::record::tests::layout_from;
    use crate::record::CsvRecord;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn layout() -> Arc<SchemaLayout> {
        Arc::new(
            layout_from(
                r#"{"status":{"code":1200},"parameters":[
                    {"name":"Time","type":"isotime","length":17},
                    {"name":"flux","type":"double"}]}"#,
            )
            .unwrap(),
        )
    }

    const TWO_DAYS: &str = "2020-01-01T00:00Z,1\n\
                            2020-01-01T12:00Z,2\n\
                            2020-01-02T00:00Z,3\n\
                            2020-01-02T12:00Z,4\n";

    fn writer(
        body: &str,
        start: &str,
        end: &str,
        root: &Path,
        options: WriteCacheOptions,
    ) -> WriteCacheIterator<LineRecordIterator, CsvRecord> {
        let source = LineRecordIterator::new(layout(), text(body)).unwrap();
        WriteCacheIterator::new(layout(), source, start, end, root, options).unwrap()
    }

    /// Caches `TWO_DAYS` over a window covering both days, split and plain
    fn two_days(root: &Path) -> WriteCacheIterator<LineRecordIterator, CsvRecord> {
        writer(TWO_DAYS, "2020-01-01T00:00Z", "2020-01-03T00:00Z", root, Default::default())
    }

    /// Every file under `dir`, relative and sorted
    fn files(dir: &Path) -> Vec<String> {
        fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(base, &path, out);
                } else {
                    out.push(path.strip_prefix(base).unwrap().to_string_lossy().replace('\\', "/"));
                }
            }
        }
        let mut out = Vec::new();
        if dir.exists() {
            walk(dir, dir, &mut out);
        }
        out.sort();
        out
    }

    fn read(path: PathBuf) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_day_boundary_installs_two_days() {
        let dir = TempDir::new().unwrap();
        let iter = two_days(dir.path());
        assert_eq!(iter.count(), 4);
        assert_eq!(
            files(dir.path()),
            vec![
                "2020/01/20200101.Time.csv",
                "2020/01/20200101.flux.csv",
                "2020/01/20200102.Time.csv",
                "2020/01/20200102.flux.csv",
            ]
        );
        let day1 = dir.path().join("2020/01");
        assert_eq!(read(day1.join("20200101.Time.csv")), "2020-01-01T00:00Z\n2020-01-01T12:00Z\n");
        assert_eq!(read(day1.join("20200101.flux.csv")), "1\n2\n");
        assert_eq!(read(day1.join("20200102.flux.csv")), "3\n4\n");
    }

    #[test]
    fn test_partial_days_are_not_written() {
        let dir = TempDir::new().unwrap();
        let (start, end) = ("2020-01-01T06:00Z", "2020-01-02T18:00Z");
        let iter = writer(TWO_DAYS, start, end, dir.path(), Default::default());
        assert_eq!(iter.count(), 4);
        assert!(files(dir.path()).is_empty());
    }

    #[test]
    fn test_abandoned_stream_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let mut iter = two_days(dir.path());
        iter.next().unwrap().unwrap();
        assert_eq!(files(dir.path()).len(), 2, "temp files exist while the day is open");
        drop(iter);
        assert!(files(dir.path()).is_empty());
    }

    #[test]
    fn test_abandoned_second_day_keeps_first() {
        let dir = TempDir::new().unwrap();
        let mut iter = two_days(dir.path());
        for _ in 0..3 {
            iter.next().unwrap().unwrap();
        }
        drop(iter);
        assert_eq!(
            files(dir.path()),
            vec!["2020/01/20200101.Time.csv", "2020/01/20200101.flux.csv"]
        );
    }

    #[test]
    fn test_combined_granules() {
        let dir = TempDir::new().unwrap();
        let options = WriteCacheOptions {
            split: false,
            ..Default::default()
        };
        let iter = writer(TWO_DAYS, "2020-01-01T00:00Z", "2020-01-02T00:00Z", dir.path(), options);
        assert_eq!(iter.count(), 4);
        assert_eq!(files(dir.path()), vec!["2020/01/20200101.csv"]);
        assert_eq!(
            read(dir.path().join("2020/01/20200101.csv")),
            "2020-01-01T00:00Z,1\n2020-01-01T12:00Z,2\n"
        );
    }

    #[test]
    fn test_compressed_granules_replace_plain_ones() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("2020/01/20200101.flux.csv");
        fs::create_dir_all(plain.parent().unwrap()).unwrap();
        fs::write(&plain, "old\n").unwrap();
        let options = WriteCacheOptions {
            compress: true,
            ..Default::default()
        };
        let iter = writer(TWO_DAYS, "2020-01-01T00:00Z", "2020-01-02T00:00Z", dir.path(), options);
        assert_eq!(iter.count(), 4);
        assert!(!plain.exists());
        let mut body = String::new();
        GzDecoder::new(File::open(dir.path().join("2020/01/20200101.flux.csv.gz")).unwrap())
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "1\n2\n");
    }

    #[test]
    fn test_unwritable_root_passes_records_through() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let iter = two_days(&blocker);
        let values: Vec<f64> = iter.map(|r| r.unwrap().double(1).unwrap()).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(files(dir.path()), vec!["blocker"]);
    }
}
