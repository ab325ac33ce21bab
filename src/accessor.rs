//! Accessor facade: a uniform `fetch(source, locator, selector)` over all backends.
//!
//! The facade checks that the locator and the selector match the kind of the source, opens the source, and forwards the request to the backend.
//! The result is returned unchanged.
//!
//! | Source kind    | Locator            | Selector                                  | Slice                     |
//! | -------------- | ------------------ | ----------------------------------------- | ------------------------- |
//! | `Relational`   | `None`             | `Sql`                                     | `Table`                   |
//! | `Relational`   | `Table`            | `Rows`                                    | `Table`                   |
//! | `Interval`     | `None`             | `Region`                                  | `Table`                   |
//! | `Hierarchical` | `Group`            | `Block`                                   | `Block`                   |

use crate::error::{AccessError, Result};
use crate::hierarchical::HierStore;
use crate::interval::IndexedSource;
use crate::relational::RelationalSource;
use crate::slice::Slice;
use crate::source::{Locator, Selector, Source, SourceKind};

use std::num::NonZeroUsize;

use log::debug;
use lru::LruCache;


//-----------------------------------------------------------------------------

/// Fetches a slice from the source.
///
/// The source is opened for the duration of the call and closed before returning.
///
/// # Errors
///
/// Returns [`AccessError::InvalidRequest`] if the locator or the selector does not match the kind of the source.
/// Passes through any errors from the backend.
///
/// # Examples
///
/// ```
/// use slice_base::{accessor, Locator, RowFilter, Selector, Source};
/// use rusqlite::Connection;
///
/// let dir = tempfile::tempdir().unwrap();
/// let db_file = dir.path().join("samples.db");
/// let connection = Connection::open(&db_file).unwrap();
/// connection.execute_batch(
///     "CREATE TABLE samples (name TEXT, population TEXT);
///      INSERT INTO samples VALUES ('HG00096', 'GBR'), ('HG00171', 'FIN'), ('HG00268', 'FIN');"
/// ).unwrap();
/// drop(connection);
///
/// let source = Source::relational(&db_file);
/// let filter = RowFilter::new().with_columns(&["name"]).with_condition("population = 'FIN'");
/// let slice = accessor::fetch(&source, &Locator::Table(String::from("samples")), &Selector::Rows(filter)).unwrap();
/// assert_eq!(slice.as_table().unwrap().len(), 2);
///
/// // An interval selector does not make sense for a database.
/// let selector = Selector::Region("chr1:1-100".parse().unwrap());
/// assert!(accessor::fetch(&source, &Locator::None, &selector).is_err());
/// ```
pub fn fetch(source: &Source, locator: &Locator, selector: &Selector) -> Result<Slice> {
    validate(source, locator, selector)?;
    let handle = Handle::open(source)?;
    handle.fetch(locator, selector)
}

/// Checks that the locator and the selector match the kind of the source.
pub fn validate(source: &Source, locator: &Locator, selector: &Selector) -> Result<()> {
    let valid = match (source.kind, locator, selector) {
        (SourceKind::Relational, Locator::None, Selector::Sql(_)) => true,
        (SourceKind::Relational, Locator::Table(_), Selector::Rows(_)) => true,
        (SourceKind::Interval, Locator::None, Selector::Region(_)) => true,
        (SourceKind::Hierarchical, Locator::Group(_), Selector::Block(_)) => true,
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AccessError::invalid_request(
            &source.path,
            format!("{} and {} are not valid for a {} source", locator, selector.describe(), source.kind)
        ))
    }
}

//-----------------------------------------------------------------------------

/// An open source of any kind.
#[derive(Debug)]
pub enum Handle {
    Relational(RelationalSource),
    Interval(IndexedSource),
    Hierarchical(HierStore),
}

impl Handle {
    /// Opens the source with the backend for its kind.
    pub fn open(source: &Source) -> Result<Self> {
        let handle = match source.kind {
            SourceKind::Relational => Handle::Relational(RelationalSource::open(&source.path)?),
            SourceKind::Interval => Handle::Interval(IndexedSource::open(&source.path)?),
            SourceKind::Hierarchical => Handle::Hierarchical(HierStore::open(&source.path)?),
        };
        debug!("Opened {} source {}", source.kind, source.path.display());
        Ok(handle)
    }

    /// Returns the kind of the source.
    pub fn kind(&self) -> SourceKind {
        match self {
            Handle::Relational(_) => SourceKind::Relational,
            Handle::Interval(_) => SourceKind::Interval,
            Handle::Hierarchical(_) => SourceKind::Hierarchical,
        }
    }

    /// Forwards the request to the backend.
    ///
    /// Returns [`AccessError::InvalidRequest`] if the locator or the selector does not match the backend.
    pub fn fetch(&self, locator: &Locator, selector: &Selector) -> Result<Slice> {
        match (self, locator, selector) {
            (Handle::Relational(source), Locator::None, Selector::Sql(sql)) => {
                source.query(sql).map(Slice::Table)
            },
            (Handle::Relational(source), Locator::Table(table), Selector::Rows(filter)) => {
                source.select(table, filter).map(Slice::Table)
            },
            (Handle::Interval(source), Locator::None, Selector::Region(region)) => {
                source.fetch(region).map(Slice::Table)
            },
            (Handle::Hierarchical(store), Locator::Group(group), Selector::Block(block)) => {
                store.read_block(group, block).map(Slice::Block)
            },
            _ => Err(AccessError::invalid_request(
                self.path(),
                format!("{} and {} are not valid for a {} source", locator, selector.describe(), self.kind())
            )),
        }
    }

    fn path(&self) -> &std::path::Path {
        match self {
            Handle::Relational(source) => source.path(),
            Handle::Interval(source) => source.path(),
            Handle::Hierarchical(store) => store.path(),
        }
    }
}

//-----------------------------------------------------------------------------

/// The accessor facade with a bounded cache of open handles.
///
/// Handles are opened on first use and kept until they are evicted as the least recently used one, closed explicitly, or the accessor is dropped.
/// Sources are assumed not to change while their handles are open.
#[derive(Debug)]
pub struct Accessor {
    handles: LruCache<Source, Handle>,
}

impl Accessor {
    /// Default number of open handles.
    pub const DEFAULT_CAPACITY: usize = 16;

    /// Creates an accessor with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates an accessor that keeps at most `capacity` handles open.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Accessor { handles: LruCache::new(capacity) }
    }

    /// Returns the maximum number of open handles.
    pub fn capacity(&self) -> usize {
        self.handles.cap().get()
    }

    /// Returns the number of open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if the source has an open handle.
    pub fn is_open(&self, source: &Source) -> bool {
        self.handles.contains(source)
    }

    /// Fetches a slice from the source, reusing an open handle if there is one.
    ///
    /// A source that fails to open is not cached.
    pub fn fetch(&mut self, source: &Source, locator: &Locator, selector: &Selector) -> Result<Slice> {
        validate(source, locator, selector)?;
        if !self.handles.contains(source) {
            let handle = Handle::open(source)?;
            if let Some((evicted, _)) = self.handles.push(source.clone(), handle) {
                debug!("Closed {} source {}", evicted.kind, evicted.path.display());
            }
        }
        match self.handles.get(source) {
            Some(handle) => handle.fetch(locator, selector),
            None => Err(AccessError::connection(&source.path, "Handle was evicted")),
        }
    }

    /// Closes the handle for the source. Returns `true` if there was one.
    pub fn close(&mut self, source: &Source) -> bool {
        self.handles.pop(source).is_some()
    }

    /// Closes all open handles.
    pub fn close_all(&mut self) {
        self.handles.clear();
    }
}

impl Default for Accessor {
    fn default() -> Self {
        Self::new()
    }
}

//-----------------------------------------------------------------------------
