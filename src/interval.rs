//! Interval backend: region queries on sorted, BGZF-compressed, tabix-indexed text files.
//!
//! The data file must be sorted by sequence and start position, compressed with BGZF, and indexed before it is opened.
//! See [`crate::tabix::compress_and_index`] for preparing such files.
//! Opening fails if the index `<file>.tbi` is missing or older than the data file; the accessor never falls back to scanning the whole file.
//!
//! Regions are 1-based and closed at both ends, as in tabix region strings.
//! A record overlaps region `chrom:start-end` if it is on `chrom` and its interval shares at least one position with `[start, end]`.

use crate::bgzf::{BgzfReader, Chunk};
use crate::error::{AccessError, Result};
use crate::slice::{Table, Value};
use crate::source::Region;
use crate::tabix::{TabixConfig, TabixIndex};
use crate::utils;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use rayon::prelude::*;


//-----------------------------------------------------------------------------

/// A record from an interval-indexed file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntervalRecord {
    /// Sequence name.
    pub chrom: String,
    /// First position covered by the record (1-based).
    pub start: u64,
    /// Last position covered by the record (1-based, inclusive).
    pub end: u64,
    /// The line without the newline.
    pub line: String,
}

impl IntervalRecord {
    fn parse(config: &TabixConfig, line: &[u8]) -> std::result::Result<Self, String> {
        let (chrom, interval) = config.parse_record(line)?;
        let line = String::from_utf8(line.to_vec()).map_err(|x| x.to_string())?;
        Ok(IntervalRecord {
            chrom: chrom.to_string(),
            start: interval.start + 1,
            end: interval.end,
            line,
        })
    }

    /// Returns the tab-separated fields of the record.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.line.split('\t')
    }

    /// Converts the fields into typed values.
    pub fn values(&self) -> Vec<Value> {
        self.fields().map(parse_value).collect()
    }
}

// Integers and decimal numbers become numeric values; everything else stays text.
fn parse_value(field: &str) -> Value {
    if let Ok(value) = field.parse::<i64>() {
        return Value::Integer(value);
    }
    let numeric = field.as_bytes().first().map(|c| c.is_ascii_digit() || *c == b'-' || *c == b'.').unwrap_or(false);
    if numeric {
        if let Ok(value) = field.parse::<f64>() {
            return Value::Real(value);
        }
    }
    Value::Text(field.to_string())
}

//-----------------------------------------------------------------------------

/// An opened interval-indexed file.
///
/// The index is loaded into memory when the source is opened.
/// Each query opens its own handle to the data file, so queries on disjoint regions can run concurrently.
///
/// # Examples
///
/// ```
/// use slice_base::IndexedSource;
/// use slice_base::tabix::{self, TabixConfig};
/// use std::fs;
///
/// let dir = tempfile::tempdir().unwrap();
/// let bed = dir.path().join("peaks.bed");
/// fs::write(&bed, "chr1\t100\t200\ta\nchr1\t500\t600\tb\nchr2\t50\t80\tc\n").unwrap();
/// let data = dir.path().join("peaks.bed.gz");
/// tabix::compress_and_index(&bed, &data, &TabixConfig::bed()).unwrap();
///
/// let source = IndexedSource::open(&data).unwrap();
/// let table = source.fetch_range("chr1", 150, 550).unwrap();
/// assert_eq!(table.len(), 2);
/// let table = source.fetch_range("chr1", 201, 500).unwrap();
/// assert!(table.is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct IndexedSource {
    path: PathBuf,
    index: Arc<TabixIndex>,
    header: Vec<String>,
    columns: Vec<String>,
}

impl IndexedSource {
    /// Opens the data file and loads its index from `<path>.tbi`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::IndexMissing`] if the index does not exist or is older than the data file.
    /// Returns [`AccessError::Connection`] if the data file does not exist, is not BGZF-compressed, or the index cannot be parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !utils::file_exists(&path) {
            return Err(AccessError::connection(&path, "No such file"));
        }
        let index_path = utils::append_extension(&path, "tbi");
        if !utils::index_is_current(&path, &index_path) {
            return Err(AccessError::IndexMissing { path, index: index_path });
        }
        let index = TabixIndex::load(&index_path).map_err(|x| {
            AccessError::connection(&path, format!("Invalid index {}: {}", index_path.display(), x))
        })?;

        // Read the header and the first record to determine the columns.
        let file = File::open(&path).map_err(|x| AccessError::connection(&path, x))?;
        let mut reader = BgzfReader::new(BufReader::new(file));
        let config = index.config();
        let mut header: Vec<String> = Vec::new();
        let mut first_record: Option<Vec<u8>> = None;
        let mut line_num = 0;
        loop {
            let mut buf: Vec<u8> = Vec::new();
            let len = reader.read_line(&mut buf).map_err(|x| AccessError::connection(&path, x))?;
            if len == 0 {
                break;
            }
            utils::trim_line_end(&mut buf);
            if config.is_header(&buf, line_num) {
                header.push(String::from_utf8_lossy(&buf).into_owned());
                line_num += 1;
                continue;
            }
            if buf.is_empty() {
                continue;
            }
            first_record = Some(buf);
            break;
        }
        let columns = Self::column_names(config, &header, first_record.as_deref());

        debug!("Opened {} with {} sequences and {} columns", path.display(), index.names().len(), columns.len());
        Ok(IndexedSource { path, index: Arc::new(index), header, columns })
    }

    // Column names come from the last header line if it has the right number of fields.
    fn column_names(config: &TabixConfig, header: &[String], first_record: Option<&[u8]>) -> Vec<String> {
        let width = first_record.map(|line| line.split(|&c| c == b'\t').count()).unwrap_or(0);
        if let Some(last) = header.last() {
            let trimmed = last.trim_start_matches(config.meta_char as char);
            let names: Vec<String> = trimmed.split('\t').map(|x| x.to_string()).collect();
            if names.len() > 1 && (width == 0 || names.len() == width) {
                return names;
            }
        }
        let width = width.max(config.col_seq).max(config.col_beg).max(config.col_end);
        (1..=width).map(|i| format!("column{}", i)).collect()
    }

    /// Returns the path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the index.
    pub fn index(&self) -> &TabixIndex {
        &self.index
    }

    /// Returns the sequence names in file order.
    pub fn sequences(&self) -> &[String] {
        self.index.names()
    }

    /// Returns the header lines.
    pub fn header_lines(&self) -> &[String] {
        &self.header
    }

    /// Returns the column names used in fetched tables.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn validate(&self, region: &Region) -> Result<()> {
        region.validate().map_err(|x| AccessError::invalid_request(&self.path, x))
    }

    /// Returns a lazy, restartable query over the records overlapping the region.
    ///
    /// No data is read until [`RangeQuery::iter`] is called.
    pub fn records(&self, region: &Region) -> Result<RangeQuery> {
        self.validate(region)?;
        let chunks = self.index.query(&region.chrom, region.zero_based()).unwrap_or_default();
        Ok(RangeQuery {
            path: self.path.clone(),
            index: self.index.clone(),
            region: region.clone(),
            chunks,
        })
    }

    /// Returns a table of the records overlapping the region.
    pub fn fetch(&self, region: &Region) -> Result<Table> {
        let query = self.records(region)?;
        let mut table = Table::new(self.columns.clone());
        for record in query.iter()? {
            table.push(record?.values());
        }
        debug!("{}: fetched {} records from {}", region, table.len(), self.path.display());
        Ok(table)
    }

    /// Returns a table of the records overlapping `chrom:start-end`.
    pub fn fetch_range(&self, chrom: &str, start: u64, end: u64) -> Result<Table> {
        self.fetch(&Region::new(chrom, start, end))
    }

    /// Fetches the regions in parallel, with a separate file handle for each region.
    ///
    /// The work runs on the rayon thread pool, so the number of threads does not grow with the number of regions.
    /// The tables are returned in the same order as the regions.
    /// Regions should be disjoint; a record overlapping several regions is returned for each of them.
    pub fn fetch_ranges_parallel(&self, regions: &[Region]) -> Result<Vec<Table>> {
        regions.par_iter().map(|region| {
            panic::catch_unwind(AssertUnwindSafe(|| self.fetch(region))).unwrap_or_else(|_| {
                Err(AccessError::io(&self.path, io::Error::other(format!("Worker panicked while fetching {}", region))))
            })
        }).collect()
    }

    /// Returns the records overlapping the region by decompressing and scanning the entire file.
    ///
    /// This ignores the index and is only useful for verifying it.
    pub fn scan(&self, region: &Region) -> Result<Vec<IntervalRecord>> {
        self.validate(region)?;
        let config = self.index.config();
        let mut reader = utils::open_file(&self.path).map_err(|x| AccessError::io(&self.path, x))?;
        let mut result = Vec::new();
        let mut line_num = 0;
        loop {
            let mut buf: Vec<u8> = Vec::new();
            let len = reader.read_until(b'\n', &mut buf).map_err(|x| AccessError::io(&self.path, x))?;
            if len == 0 {
                break;
            }
            utils::trim_line_end(&mut buf);
            if config.is_header(&buf, line_num) || buf.is_empty() {
                line_num += 1;
                continue;
            }
            line_num += 1;
            let record = IntervalRecord::parse(config, &buf).map_err(|x| {
                AccessError::connection(&self.path, format!("Line {}: {}", line_num, x))
            })?;
            if record.chrom == region.chrom && region.overlaps(record.start, record.end) {
                result.push(record);
            }
        }
        Ok(result)
    }
}

//-----------------------------------------------------------------------------

/// A query for the records overlapping a region.
///
/// The query can be iterated any number of times.
/// Each call to [`RangeQuery::iter`] opens the file again and seeks to the chunks from the index, so an iteration that failed can simply be restarted.
#[derive(Clone, Debug)]
pub struct RangeQuery {
    path: PathBuf,
    index: Arc<TabixIndex>,
    region: Region,
    chunks: Vec<Chunk>,
}

impl RangeQuery {
    /// Returns the region.
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Returns the chunks of the file that will be read.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Starts a new iteration over the overlapping records.
    pub fn iter(&self) -> Result<RangeRecords<'_>> {
        let file = File::open(&self.path).map_err(|x| AccessError::io(&self.path, x))?;
        Ok(RangeRecords {
            query: self,
            reader: BgzfReader::new(BufReader::new(file)),
            next_chunk: 0,
            current: None,
            done: self.chunks.is_empty(),
        })
    }
}

/// Iterator over the records overlapping a region.
///
/// Holds a single decompressed block in memory.
/// Iteration stops after the first error.
pub struct RangeRecords<'a> {
    query: &'a RangeQuery,
    reader: BgzfReader<BufReader<File>>,
    next_chunk: usize,
    current: Option<Chunk>,
    done: bool,
}

impl<'a> RangeRecords<'a> {
    fn fail(&mut self, error: AccessError) -> Option<Result<IntervalRecord>> {
        self.done = true;
        Some(Err(error))
    }
}

impl<'a> Iterator for RangeRecords<'a> {
    type Item = Result<IntervalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let query: &'a RangeQuery = self.query;
        let config = query.index.config();
        let region = &query.region;
        let path = &query.path;
        while !self.done {
            // Move to the next chunk if the current one is exhausted.
            let position = self.reader.virtual_position();
            let chunk = match self.current {
                Some(chunk) if position < chunk.end => chunk,
                _ => {
                    if self.next_chunk >= query.chunks.len() {
                        self.done = true;
                        return None;
                    }
                    let chunk = query.chunks[self.next_chunk];
                    self.next_chunk += 1;
                    if self.current.is_none() || position < chunk.start {
                        if let Err(err) = self.reader.seek(chunk.start) {
                            return self.fail(AccessError::io(path, err));
                        }
                    }
                    self.current = Some(chunk);
                    continue;
                },
            };

            let mut buf: Vec<u8> = Vec::new();
            match self.reader.read_line(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                },
                Ok(_) => {},
                Err(err) => return self.fail(AccessError::io(path, err)),
            }
            utils::trim_line_end(&mut buf);
            if buf.is_empty() || buf.first() == Some(&config.meta_char) {
                continue;
            }
            let record = match IntervalRecord::parse(config, &buf) {
                Ok(record) => record,
                Err(err) => return self.fail(AccessError::connection(path, format!("Invalid record in chunk {:?}: {}", chunk, err))),
            };
            if record.chrom != region.chrom {
                continue;
            }
            if record.start > region.end {
                // Records are sorted by start, so nothing later can overlap.
                self.done = true;
                return None;
            }
            if region.overlaps(record.start, record.end) {
                return Some(Ok(record));
            }
        }
        None
    }
}

//-----------------------------------------------------------------------------
