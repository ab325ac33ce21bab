//! Sources, locators, and selectors: what to open, where to look, and what to retrieve.

use std::fmt::Display;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

//-----------------------------------------------------------------------------

/// Kind of an external data source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    /// SQLite database file.
    Relational,
    /// BGZF-compressed sorted text file with a tabix index.
    Interval,
    /// Hierarchical array store.
    Hierarchical,
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SourceKind::Relational => write!(f, "relational"),
            SourceKind::Interval => write!(f, "interval"),
            SourceKind::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relational" | "sql" | "db" => Ok(SourceKind::Relational),
            "interval" | "tabix" => Ok(SourceKind::Interval),
            "hierarchical" | "store" => Ok(SourceKind::Hierarchical),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}

/// An external, read-only data container identified by path and kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Source {
    pub path: PathBuf,
    pub kind: SourceKind,
}

impl Source {
    pub fn new<P: AsRef<Path>>(path: P, kind: SourceKind) -> Self {
        Source { path: path.as_ref().to_path_buf(), kind }
    }

    pub fn relational<P: AsRef<Path>>(path: P) -> Self {
        Self::new(path, SourceKind::Relational)
    }

    pub fn interval<P: AsRef<Path>>(path: P) -> Self {
        Self::new(path, SourceKind::Interval)
    }

    pub fn hierarchical<P: AsRef<Path>>(path: P) -> Self {
        Self::new(path, SourceKind::Hierarchical)
    }
}

//-----------------------------------------------------------------------------

/// A named sub-structure within a source.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Locator {
    /// The whole source. Used with SQL queries and interval files.
    None,
    /// A table in a relational source.
    Table(String),
    /// A group path in a hierarchical source.
    Group(String),
}

impl Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Locator::None => write!(f, "(none)"),
            Locator::Table(name) => write!(f, "table {}", name),
            Locator::Group(path) => write!(f, "group {}", path),
        }
    }
}

/// A requested subset of a source.
#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    /// An arbitrary read-only SQL statement, executed as is.
    Sql(String),
    /// Projection, filter, and limit over the table named by the locator.
    Rows(RowFilter),
    /// A genomic interval.
    Region(Region),
    /// A range of one axis over selected datasets.
    Block(BlockSelector),
}

impl Selector {
    /// Returns a short description of the selector for error messages.
    pub fn describe(&self) -> String {
        match self {
            Selector::Sql(sql) => format!("SQL query {:?}", sql),
            Selector::Rows(filter) => format!("row filter {:?}", filter),
            Selector::Region(region) => format!("region {}", region),
            Selector::Block(block) => format!("block {:?} of {:?}", block.range, block.datasets),
        }
    }
}

//-----------------------------------------------------------------------------

/// Projection, filter, and limit for a single table.
///
/// The condition is an SQL expression passed to the engine verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowFilter {
    /// Columns to return; all columns if empty.
    pub columns: Vec<String>,
    /// Optional `WHERE` condition.
    pub condition: Option<String>,
    /// Optional maximum number of rows.
    pub limit: Option<usize>,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|x| x.to_string()).collect();
        self
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

//-----------------------------------------------------------------------------

/// A genomic interval `chrom:start-end`.
///
/// Coordinates are 1-based and the interval is closed at both ends, as in tabix region strings.
///
/// # Examples
///
/// ```
/// use slice_base::Region;
///
/// let region: Region = "chr22:1-20,000,000".parse().unwrap();
/// assert_eq!(region.chrom, "chr22");
/// assert_eq!(region.start, 1);
/// assert_eq!(region.end, 20_000_000);
///
/// let whole: Region = "chrX".parse().unwrap();
/// assert_eq!(whole.start, 1);
/// assert_eq!(whole.end, Region::MAX_END);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Region {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    /// Largest coordinate addressable by a tabix index.
    pub const MAX_END: u64 = 1 << 29;

    pub fn new(chrom: &str, start: u64, end: u64) -> Self {
        Region { chrom: chrom.to_string(), start, end }
    }

    /// Returns a region covering the entire sequence.
    pub fn whole(chrom: &str) -> Self {
        Self::new(chrom, 1, Self::MAX_END)
    }

    /// Returns `true` if the closed interval `[start, end]` overlaps the region.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        start <= self.end && end >= self.start
    }

    /// Returns the region as a 0-based half-open interval.
    pub fn zero_based(&self) -> Range<u64> {
        self.start.saturating_sub(1)..self.end.min(Self::MAX_END)
    }

    /// Returns an error message if the region is not valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.chrom.is_empty() {
            return Err(String::from("Empty sequence name"));
        }
        if self.start == 0 {
            return Err(format!("Region {}: coordinates are 1-based", self));
        }
        if self.start > self.end {
            return Err(format!("Region {}: start is after end", self));
        }
        Ok(())
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

fn parse_coordinate(value: &str) -> Result<u64, String> {
    let cleaned: String = value.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<u64>().map_err(|x| format!("Invalid coordinate {}: {}", value, x))
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chrom, interval) = match s.rsplit_once(':') {
            Some((chrom, interval)) => (chrom, Some(interval)),
            None => (s, None),
        };
        let region = match interval {
            None => Region::whole(chrom),
            Some(interval) => match interval.split_once('-') {
                Some((start, "")) => Region::new(chrom, parse_coordinate(start)?, Self::MAX_END),
                Some((start, end)) => Region::new(chrom, parse_coordinate(start)?, parse_coordinate(end)?),
                None => Region::new(chrom, parse_coordinate(interval)?, Self::MAX_END),
            },
        };
        region.validate()?;
        Ok(region)
    }
}

//-----------------------------------------------------------------------------

/// The axis a block range applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Axis {
    /// The last axis of each dataset. In a tally store this is the genomic position.
    #[default]
    Last,
    /// A fixed axis number.
    Index(usize),
}

impl Axis {
    /// Resolves the axis for an array of the given rank.
    pub fn resolve(&self, rank: usize) -> Option<usize> {
        match self {
            Axis::Last => rank.checked_sub(1),
            Axis::Index(axis) => if *axis < rank { Some(*axis) } else { None },
        }
    }
}

/// Datasets and a half-open index range along one axis.
///
/// # Examples
///
/// ```
/// use slice_base::{Axis, BlockSelector};
///
/// let selector = BlockSelector::new(&["Counts", "Coverages"], 29_000_000..29_001_000);
/// assert_eq!(selector.axis, Axis::Last);
/// assert_eq!(selector.range.len(), 1000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockSelector {
    pub datasets: Vec<String>,
    pub axis: Axis,
    pub range: Range<usize>,
}

impl BlockSelector {
    pub fn new(datasets: &[&str], range: Range<usize>) -> Self {
        BlockSelector {
            datasets: datasets.iter().map(|x| x.to_string()).collect(),
            axis: Axis::Last,
            range,
        }
    }

    pub fn with_axis(mut self, axis: usize) -> Self {
        self.axis = Axis::Index(axis);
        self
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
