//! Granule paths and lookups
//!
//! A granule is one day of one parameter (or of all parameters) of one
//! dataset, stored at `{dataset}/{YYYY}/{MM}/{YYYYMMDD}[.{param}].{ext}[.gz]`.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::{HapiError, Result};
use crate::record::DataFormat;
use crate::time;

pub(crate) const GZ_SUFFIX: &str = "gz";

/// `YYYYMMDD` for the day containing `time`
pub fn day_tag(time: &str) -> Result<String> {
    let c = time::parse(time)?;
    Ok(format!("{:04}{:02}{:02}", c.year, c.month, c.day))
}

/// Path of the granule for the day containing `day`
///
/// `parameter` is `None` for a combined granule holding every column.
pub fn granule_path(
    dataset_root: &Path,
    day: &str,
    parameter: Option<&str>,
    format: DataFormat,
    compressed: bool,
) -> Result<PathBuf> {
    let tag = day_tag(day)?;
    let mut name = match parameter {
        Some(p) => format!("{}.{}.{}", tag, p, format.extension()),
        None => format!("{}.{}", tag, format.extension()),
    };
    if compressed {
        name.push('.');
        name.push_str(GZ_SUFFIX);
    }
    Ok(dataset_root.join(&tag[0..4]).join(&tag[4..6]).join(name))
}

/// The other spelling of a granule path: `x.csv` for `x.csv.gz` and back
pub(crate) fn sibling_path(path: &Path) -> PathBuf {
    let text = path.as_os_str().to_string_lossy();
    match text.strip_suffix(".gz") {
        Some(plain) => PathBuf::from(plain),
        None => PathBuf::from(format!("{}.gz", text)),
    }
}

/// The temporary name a granule is written under by this process
pub(crate) fn writing_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".writing.{}", std::process::id()));
    PathBuf::from(name)
}

/// How fresh a cached file must be to be used without asking the origin
#[derive(Debug, Clone, Copy)]
pub struct Freshness {
    /// Current wall-clock time
    pub now: SystemTime,
    /// Age beyond which a file is stale, when the origin gives no time
    pub max_age: Duration,
    /// The origin's last modification time, which overrides `max_age`
    pub origin_modified: Option<SystemTime>,
    /// Offline mode accepts any present file
    pub offline: bool,
}

impl Freshness {
    /// True when a file last modified at `mtime` may be used
    pub fn accepts(&self, mtime: SystemTime) -> bool {
        if self.offline {
            return true;
        }
        match self.origin_modified {
            Some(origin) => mtime >= origin,
            None => match self.now.duration_since(mtime) {
                Ok(age) => age <= self.max_age,
                // modified in the future, as far as this clock knows
                Err(_) => true,
            },
        }
    }
}

/// Result of looking up every (day, parameter) granule of a request
#[derive(Debug, Default)]
pub struct GranuleLookup {
    /// `hits[day][parameter]`, the usable file if there is one
    ///
    /// A day served by a combined granule has that one file in every cell.
    pub hits: Vec<Vec<Option<PathBuf>>>,
    /// `combined[day]` is set when the day's row is a combined granule
    pub combined: Vec<bool>,
    /// Set when some present file was judged stale
    pub stale: bool,
}

impl GranuleLookup {
    /// True when every cell has a usable file
    pub fn is_complete(&self) -> bool {
        self.hits.iter().all(|day| day.iter().all(Option::is_some))
    }

    /// The oldest modification time among the usable files
    pub fn earliest_mtime(&self) -> Option<SystemTime> {
        self.hits
            .iter()
            .flatten()
            .flatten()
            .filter_map(|path| fs::metadata(path).and_then(|m| m.modified()).ok())
            .min()
    }
}

enum Found {
    Usable(PathBuf),
    Stale,
    Missing,
}

/// Looks for `plain`, then its `.gz` spelling, and judges the first present
fn find_granule(plain: PathBuf, freshness: &Freshness) -> Result<Found> {
    let sibling = sibling_path(&plain);
    let found = [plain, sibling]
        .into_iter()
        .find_map(|p| fs::metadata(&p).ok().map(|m| (p, m)));
    let Some((path, meta)) = found else {
        return Ok(Found::Missing);
    };
    let mtime = meta.modified().map_err(|e| HapiError::cache_io(&path, e))?;
    if freshness.accepts(mtime) {
        Ok(Found::Usable(path))
    } else {
        debug!(path = %path.display(), "cached granule is stale");
        Ok(Found::Stale)
    }
}

/// Finds the cached granules for `days` × `parameters`
///
/// Each cell prefers the plain file and falls back to the `.gz` one. A day
/// the per-parameter files don't fully cover may still be served by a
/// combined granule holding every column.
///
/// # Arguments
/// * `dataset_root` - the dataset's cache directory
/// * `days` - day boundaries as produced by [`time::count_off_days`]
/// * `parameters` - parameter names, in column order
/// * `format` - which encoding's granules to look for
/// * `freshness` - the staleness policy
pub fn lookup_granules(
    dataset_root: &Path,
    days: &[String],
    parameters: &[String],
    format: DataFormat,
    freshness: &Freshness,
) -> Result<GranuleLookup> {
    let mut lookup = GranuleLookup::default();
    for day in days {
        let mut row = Vec::with_capacity(parameters.len());
        let mut stale = false;
        for parameter in parameters {
            let plain = granule_path(dataset_root, day, Some(parameter), format, false)?;
            row.push(match find_granule(plain, freshness)? {
                Found::Usable(path) => Some(path),
                Found::Stale => {
                    stale = true;
                    None
                }
                Found::Missing => None,
            });
        }
        let mut combined = false;
        if row.iter().any(Option::is_none) {
            let plain = granule_path(dataset_root, day, None, format, false)?;
            match find_granule(plain, freshness)? {
                Found::Usable(path) => {
                    row = vec![Some(path); parameters.len()];
                    combined = true;
                    stale = false;
                }
                Found::Stale => stale = true,
                Found::Missing => {}
            }
        }
        lookup.stale |= stale;
        lookup.hits.push(row);
        lookup.combined.push(combined);
    }
    Ok(lookup)
}

/// Opens a granule for reading, decompressing `.gz` files
pub fn open_granule(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| HapiError::cache_io(path, e))?;
    let gzipped = path.extension().is_some_and(|ext| ext == GZ_SUFFIX);
    if gzipped {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}
