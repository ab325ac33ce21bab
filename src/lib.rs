//! # Slice-base: bounded slice access to external genomic data sources.
//!
//! This crate retrieves small slices of large external datasets without loading the datasets into memory.
//! The memory and time needed for a request depend on the size of the requested slice, not on the size of the source.
//! Sources are opened read-only and never modified by the accessor.
//!
//! There are three backends:
//!
//! * [`RelationalSource`]: SQL queries against SQLite database files.
//! * [`IndexedSource`]: region queries against sorted, BGZF-compressed, tabix-indexed text files such as BED, GFF, and VCF.
//! * [`HierStore`]: block reads from chunked multi-dimensional arrays in a hierarchical store.
//!
//! The [`accessor`] module dispatches a uniform `fetch(source, locator, selector)` request to the right backend.
//! Use [`accessor::fetch`] for one-off requests and [`Accessor`] for keeping a bounded number of sources open between requests.
//!
//! ### Coordinates
//!
//! Genomic regions ([`Region`]) are 1-based and closed at both ends, as in tabix region strings such as `chr22:1-20000000`.
//! Block ranges ([`BlockSelector`]) are 0-based and half-open, so range `a..b` returns `b - a` positions along the selected axis.
//!
//! ### Preparing sources
//!
//! The accessor never sorts or indexes files on the fly.
//! Sorted text files can be compressed and indexed with [`tabix::compress_and_index`] or the `slice-index` binary.
//! Hierarchical stores are created with [`HierWriter`].
//!
//! ### Errors
//!
//! All accessor operations return [`AccessError`], which carries the path of the source and the rejected request.
//! Nothing is retried automatically, and a fetch never returns a partial slice.

pub mod accessor;
pub mod bgzf;
pub mod error;
pub mod hierarchical;
pub mod interval;
pub mod relational;
pub mod slice;
pub mod source;
pub mod tabix;
pub mod utils;

pub use accessor::Accessor;
pub use error::{AccessError, Result};
pub use hierarchical::{HierStore, HierWriter, LayoutNode};
pub use interval::{IndexedSource, IntervalRecord, RangeQuery};
pub use relational::RelationalSource;
pub use slice::{Block, NdArray, Slice, Table, Value};
pub use source::{Axis, BlockSelector, Locator, Region, RowFilter, Selector, Source, SourceKind};
