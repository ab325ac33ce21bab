//! Block backend: a hierarchical store of chunked multi-dimensional arrays.
//!
//! The store is a single SQLite database with the following tables:
//!
//! * `Tags`: key-value pairs, including the store version.
//! * `Groups`: group paths such as `/` and `/chr22`.
//! * `Datasets`: arrays in each group with their element type, shape, chunk shape, and fill value.
//! * `Chunks`: zlib-compressed chunks of each array.
//! * `SideFields` and `SideValues`: the side table of each group, usually one row per sample.
//!
//! Arrays are stored in row-major order and chunked along every axis.
//! Each chunk is stored at full size, with the parts outside the array set to the fill value.
//! Chunks that were never written are not stored, and they read as the fill value.
//!
//! Block reads select a half-open range `[a, b)` along one axis and the full extent along every other axis.
//! Only the chunks intersecting the selection are read from the store.

use crate::error::{AccessError, Result};
use crate::slice::{ArrayData, Block, DataType, NdArray, Table, Value};
use crate::source::{Axis, BlockSelector};
use crate::utils;

use std::fmt::Display;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use log::{debug, info};

use rusqlite::{Connection, OpenFlags, OptionalExtension, Statement};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

// Key for store version.
const KEY_VERSION: &str = "version";

/// Current store version.
pub const VERSION: &str = "slice-base hierarchical v1";

/// Largest number of elements in a chunk.
pub const MAX_CHUNK_ELEMENTS: usize = 1 << 24;

/// Path of the root group.
pub const ROOT: &str = "/";

/// Normalizes a group path to the form `/a/b`.
///
/// A missing leading slash is added.
/// Returns [`None`] if the path contains empty components.
pub fn normalize_group(path: &str) -> Option<String> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Some(String::from(ROOT));
    }
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.split('/').any(|component| component.is_empty()) {
        return None;
    }
    Some(format!("/{}", trimmed))
}

// Returns the parent of a normalized group path.
fn parent_group(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(pos) => Some(&path[..pos]),
        None => None,
    }
}

fn join_path(group: &str, name: &str) -> String {
    if group == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", group, name)
    }
}

fn shape_to_string(shape: &[usize]) -> String {
    shape.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",")
}

fn parse_shape(value: &str) -> Option<Vec<usize>> {
    value.split(',').map(|x| x.parse::<usize>().ok()).collect()
}

//-----------------------------------------------------------------------------

/// Metadata for an array in the store.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetInfo {
    id: i64,
    /// Name of the array within its group.
    pub name: String,
    pub data_type: DataType,
    pub shape: Vec<usize>,
    pub chunk_shape: Vec<usize>,
    /// Value of elements that have not been written.
    pub fill: f64,
}

impl DatasetInfo {
    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the number of chunks along each axis.
    pub fn chunk_grid(&self) -> Vec<usize> {
        self.shape.iter().zip(self.chunk_shape.iter()).map(|(len, chunk)| len.div_ceil(*chunk)).collect()
    }

    /// Returns the number of elements in a chunk.
    pub fn chunk_len(&self) -> usize {
        self.chunk_shape.iter().product()
    }

    // Returns the range of chunk coordinates covering the element range along each axis.
    fn chunk_ranges(&self, selection: &[Range<usize>]) -> Vec<Range<usize>> {
        selection.iter().zip(self.chunk_shape.iter()).map(|(range, chunk)| {
            (range.start / chunk)..range.end.div_ceil(*chunk)
        }).collect()
    }

    // Returns the element range covered by the chunk at the given coordinates.
    fn chunk_extent(&self, chunk_coords: &[usize]) -> Vec<Range<usize>> {
        chunk_coords.iter().zip(self.chunk_shape.iter()).map(|(coord, chunk)| {
            (coord * chunk)..((coord + 1) * chunk)
        }).collect()
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let invalid = |column: usize, what: &str, value: &str| {
            rusqlite::Error::FromSqlConversionFailure(
                column, rusqlite::types::Type::Text, format!("Invalid {}: {}", what, value).into()
            )
        };
        let id: i64 = row.get(0)?;
        let name: String = row.get(1)?;
        let dtype: String = row.get(2)?;
        let data_type = DataType::from_name(&dtype).ok_or_else(|| invalid(2, "element type", &dtype))?;
        let shape: String = row.get(3)?;
        let shape = parse_shape(&shape).ok_or_else(|| invalid(3, "shape", &shape))?;
        let chunk_shape: String = row.get(4)?;
        let chunk_shape = parse_shape(&chunk_shape).ok_or_else(|| invalid(4, "chunk shape", &chunk_shape))?;
        if chunk_shape.len() != shape.len() || chunk_shape.contains(&0) {
            return Err(invalid(4, "chunk shape", &shape_to_string(&chunk_shape)));
        }
        let fill: f64 = row.get(5)?;
        Ok(DatasetInfo { id, name, data_type, shape, chunk_shape, fill })
    }
}

impl Display for DatasetInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f, "{} {} [{}] chunks [{}] fill {}",
            self.name, self.data_type, shape_to_string(&self.shape), shape_to_string(&self.chunk_shape), self.fill
        )
    }
}

/// A node in the layout tree of a store.
#[derive(Clone, Debug, PartialEq)]
pub enum LayoutNode {
    /// A group with its subgroups and datasets, sorted by path.
    Group { path: String, children: Vec<LayoutNode> },
    /// An array.
    Dataset { path: String, info: DatasetInfo },
}

impl LayoutNode {
    pub fn path(&self) -> &str {
        match self {
            LayoutNode::Group { path, .. } => path,
            LayoutNode::Dataset { path, .. } => path,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, LayoutNode::Group { .. })
    }

    /// Returns the shape of an array node.
    pub fn shape(&self) -> Option<&[usize]> {
        match self {
            LayoutNode::Dataset { info, .. } => Some(&info.shape),
            _ => None,
        }
    }

    /// Returns the children of a group node.
    pub fn children(&self) -> &[LayoutNode] {
        match self {
            LayoutNode::Group { children, .. } => children,
            _ => &[],
        }
    }

    /// Finds the node with the given path in the subtree.
    pub fn find(&self, path: &str) -> Option<&LayoutNode> {
        if self.path() == path {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(path))
    }

    /// Returns all nodes in the subtree in preorder.
    pub fn nodes(&self) -> Vec<&LayoutNode> {
        let mut result = vec![self];
        for child in self.children() {
            result.extend(child.nodes());
        }
        result
    }

    fn fmt_indented(&self, f: &mut std::fmt::Formatter, depth: usize) -> std::fmt::Result {
        let indent = "  ".repeat(depth);
        match self {
            LayoutNode::Group { path, children } => {
                writeln!(f, "{}{}", indent, path)?;
                for child in children {
                    child.fmt_indented(f, depth + 1)?;
                }
                Ok(())
            },
            LayoutNode::Dataset { path, info } => {
                writeln!(
                    f, "{}{} {} [{}] chunks [{}]",
                    indent, path, info.data_type, shape_to_string(&info.shape), shape_to_string(&info.chunk_shape)
                )
            },
        }
    }
}

impl Display for LayoutNode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.fmt_indented(f, 0)
    }
}

//-----------------------------------------------------------------------------

// Shared helpers for the reader and the writer.

fn find_group(connection: &Connection, path: &str) -> rusqlite::Result<Option<i64>> {
    connection.query_row(
        "SELECT id FROM Groups WHERE path = ?1", (path,), |row| row.get(0)
    ).optional()
}

fn find_dataset(connection: &Connection, group_id: i64, name: &str) -> rusqlite::Result<Option<DatasetInfo>> {
    connection.query_row(
        "SELECT id, name, dtype, shape, chunk_shape, fill FROM Datasets WHERE group_id = ?1 AND name = ?2",
        (group_id, name),
        DatasetInfo::from_row
    ).optional()
}

// Loads and decompresses a chunk, or returns `None` if it has not been written.
fn load_chunk(statement: &mut Statement, info: &DatasetInfo, chunk_id: usize) -> std::result::Result<Option<ArrayData>, String> {
    let blob: Option<Vec<u8>> = statement.query_row(
        (info.id, chunk_id as i64), |row| row.get(0)
    ).optional().map_err(|x| x.to_string())?;
    let blob = match blob {
        Some(blob) => blob,
        None => return Ok(None),
    };
    let mut bytes: Vec<u8> = Vec::with_capacity(info.chunk_len() * info.data_type.width());
    let mut decoder = ZlibDecoder::new(&blob[..]);
    decoder.read_to_end(&mut bytes).map_err(|x| format!("Chunk {} of {}: {}", chunk_id, info.name, x))?;
    let data = ArrayData::from_bytes(info.data_type, &bytes).ok_or(
        format!("Chunk {} of {}: invalid length {}", chunk_id, info.name, bytes.len())
    )?;
    if data.len() != info.chunk_len() {
        return Err(format!("Chunk {} of {}: expected {} elements, got {}", chunk_id, info.name, info.chunk_len(), data.len()));
    }
    Ok(Some(data))
}

// Advances the coordinates to the next position in row-major order. Returns `false` after the last position.
fn next_coords(coords: &mut [usize], ranges: &[Range<usize>]) -> bool {
    for i in (0..coords.len()).rev() {
        coords[i] += 1;
        if coords[i] < ranges[i].end {
            return true;
        }
        coords[i] = ranges[i].start;
    }
    false
}

// Returns the row-major offset of global coordinates in an array placed at `origin`.
fn local_offset(shape: &[usize], origin: &[usize], coords: &[usize]) -> usize {
    coords.iter().zip(origin.iter()).zip(shape.iter()).fold(0, |offset, ((coord, start), len)| {
        offset * len + (coord - start)
    })
}

// Returns the intersection of two boxes.
fn intersect(a: &[Range<usize>], b: &[Range<usize>]) -> Vec<Range<usize>> {
    a.iter().zip(b.iter()).map(|(x, y)| x.start.max(y.start)..x.end.min(y.end)).collect()
}

// Copies the elements in `region` (global coordinates) from `source` placed at `source_origin` to `dest` placed at `dest_origin`.
fn copy_box(
    source: &ArrayData, source_shape: &[usize], source_origin: &[usize],
    dest: &mut ArrayData, dest_shape: &[usize], dest_origin: &[usize],
    region: &[Range<usize>]
) {
    if region.is_empty() || region.iter().any(|range| range.is_empty()) {
        return;
    }
    let rank = region.len();
    let run = region[rank - 1].len();
    let mut coords: Vec<usize> = region.iter().map(|range| range.start).collect();
    loop {
        let from = local_offset(source_shape, source_origin, &coords);
        let to = local_offset(dest_shape, dest_origin, &coords);
        dest.copy_run(to, source, from, run);
        if !next_coords(&mut coords[..rank - 1], &region[..rank - 1]) {
            break;
        }
    }
}

fn sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Integer(value) => Sql::Integer(*value),
        Value::Real(value) => Sql::Real(*value),
        Value::Text(value) => Sql::Text(value.clone()),
        Value::Blob(value) => Sql::Blob(value.clone()),
    }
}

//-----------------------------------------------------------------------------

/// A read-only connection to a hierarchical store.
///
/// # Examples
///
/// ```
/// use slice_base::{BlockSelector, HierStore, HierWriter};
/// use slice_base::slice::{ArrayData, DataType, NdArray};
///
/// let dir = tempfile::tempdir().unwrap();
/// let filename = dir.path().join("coverage.store");
/// let mut writer = HierWriter::create(&filename).unwrap();
/// writer.create_group("/chr22").unwrap();
/// writer.create_dataset("/chr22", "depth", DataType::Int32, &[2, 1000], &[2, 128], 0.0).unwrap();
/// let slab = NdArray::new(vec![2, 10], ArrayData::Int32((0..20).collect())).unwrap();
/// writer.write_slab("/chr22", "depth", &[0, 500], &slab).unwrap();
/// writer.close().unwrap();
///
/// let store = HierStore::open(&filename).unwrap();
/// let block = store.read_block("/chr22", &BlockSelector::new(&["depth"], 495..505)).unwrap();
/// let depth = block.array("depth").unwrap();
/// assert_eq!(depth.shape(), &[2, 10]);
/// assert_eq!(depth.get_i32(&[0, 4]), Some(0));
/// assert_eq!(depth.get_i32(&[1, 5]), Some(10));
/// ```
#[derive(Debug)]
pub struct HierStore {
    connection: Connection,
    path: PathBuf,
    version: String,
}

impl HierStore {
    /// Opens a read-only connection to the store in the given file.
    ///
    /// Returns [`AccessError::Connection`] if the file is not a store of the current version.
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let path = filename.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(&path, flags).map_err(|x| AccessError::connection(&path, x))?;

        let version: String = connection.query_row(
            "SELECT value FROM Tags WHERE key = ?1", (KEY_VERSION,), |row| row.get(0)
        ).map_err(|x| AccessError::connection(&path, format!("Cannot read the store version: {}", x)))?;
        if version != VERSION {
            return Err(AccessError::connection(
                &path, format!("Unsupported store version: {} (expected {})", version, VERSION)
            ));
        }

        Ok(HierStore { connection, path, version })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the size of the store file in a human-readable format.
    pub fn file_size(&self) -> Option<String> {
        utils::file_size(&self.path)
    }

    fn engine_error<E: Display>(&self, error: E) -> AccessError {
        AccessError::connection(&self.path, error)
    }

    // Returns the normalized path and the identifier of the group.
    fn group(&self, group: &str) -> Result<(String, i64)> {
        let normalized = normalize_group(group).ok_or_else(|| AccessError::layout(&self.path, "group", group))?;
        let id = find_group(&self.connection, &normalized).map_err(|x| self.engine_error(x))?;
        let id = id.ok_or_else(|| AccessError::layout(&self.path, "group", &normalized))?;
        Ok((normalized, id))
    }

    fn dataset(&self, group: &str, group_id: i64, name: &str) -> Result<DatasetInfo> {
        let info = find_dataset(&self.connection, group_id, name).map_err(|x| self.engine_error(x))?;
        info.ok_or_else(|| AccessError::layout(&self.path, "dataset", &join_path(group, name)))
    }

    /// Returns the paths of all groups in sorted order.
    pub fn groups(&self) -> Result<Vec<String>> {
        let mut statement = self.connection.prepare("SELECT path FROM Groups ORDER BY path").map_err(|x| self.engine_error(x))?;
        let rows = statement.query_map((), |row| row.get::<_, String>(0)).map_err(|x| self.engine_error(x))?;
        let mut result = Vec::new();
        for path in rows {
            result.push(path.map_err(|x| self.engine_error(x))?);
        }
        Ok(result)
    }

    /// Returns the metadata for the named array in the group.
    pub fn dataset_info(&self, group: &str, name: &str) -> Result<DatasetInfo> {
        let (group, group_id) = self.group(group)?;
        self.dataset(&group, group_id, name)
    }

    /// Returns the layout tree of the store.
    ///
    /// Only the metadata tables are read.
    pub fn list_layout(&self) -> Result<LayoutNode> {
        let groups = self.groups()?;
        let mut datasets: Vec<(String, DatasetInfo)> = Vec::new();
        {
            let mut statement = self.connection.prepare(
                "SELECT Datasets.id, name, dtype, shape, chunk_shape, fill, Groups.path
                FROM Datasets JOIN Groups ON Datasets.group_id = Groups.id
                ORDER BY Groups.path, name"
            ).map_err(|x| self.engine_error(x))?;
            let rows = statement.query_map((), |row| {
                let info = DatasetInfo::from_row(row)?;
                let group: String = row.get(6)?;
                Ok((group, info))
            }).map_err(|x| self.engine_error(x))?;
            for row in rows {
                datasets.push(row.map_err(|x| self.engine_error(x))?);
            }
        }
        Ok(Self::layout_subtree(ROOT, &groups, &datasets))
    }

    fn layout_subtree(path: &str, groups: &[String], datasets: &[(String, DatasetInfo)]) -> LayoutNode {
        let mut children: Vec<LayoutNode> = groups.iter()
            .filter(|group| parent_group(group) == Some(path))
            .map(|group| Self::layout_subtree(group, groups, datasets))
            .collect();
        children.extend(datasets.iter().filter(|(group, _)| group == path).map(|(group, info)| {
            LayoutNode::Dataset { path: join_path(group, &info.name), info: info.clone() }
        }));
        children.sort_by(|a, b| a.path().cmp(b.path()));
        LayoutNode::Group { path: path.to_string(), children }
    }

    /// Reads a block from the selected arrays in the group, along with the side table of the group.
    ///
    /// The range is half-open along the selected axis, so the axis has length `b - a` in every returned array.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Layout`] if the group or one of the arrays does not exist.
    /// Returns [`AccessError::Range`] if the axis does not exist or the range is outside the extent of an array.
    /// Returns [`AccessError::InvalidRequest`] if no arrays were selected.
    pub fn read_block(&self, group: &str, selector: &BlockSelector) -> Result<Block> {
        let (group, group_id) = self.group(group)?;
        if selector.datasets.is_empty() {
            return Err(AccessError::invalid_request(&self.path, format!("No arrays selected from group {}", group)));
        }

        // Validate everything before reading any chunks.
        let mut selections: Vec<(DatasetInfo, Vec<Range<usize>>)> = Vec::with_capacity(selector.datasets.len());
        for name in selector.datasets.iter() {
            let info = self.dataset(&group, group_id, name)?;
            let selection = self.selection(&group, &info, selector.axis, &selector.range)?;
            selections.push((info, selection));
        }

        let mut arrays = Vec::with_capacity(selections.len());
        for (info, selection) in selections.iter() {
            let array = self.read_selection(info, selection)?;
            arrays.push((info.name.clone(), array));
        }
        let side_table = self.side_table(&group, group_id)?;

        Ok(Block {
            group,
            axis: selector.axis,
            axis_range: selector.range.clone(),
            arrays,
            side_table,
        })
    }

    // Returns the full extent along every axis except the selected one.
    fn selection(&self, group: &str, info: &DatasetInfo, axis: Axis, range: &Range<usize>) -> Result<Vec<Range<usize>>> {
        let range_error = |requested: String| AccessError::Range {
            path: self.path.clone(),
            name: join_path(group, &info.name),
            requested,
            extent: format!("[{}]", shape_to_string(&info.shape)),
        };
        let axis = axis.resolve(info.rank()).ok_or_else(|| {
            range_error(format!("axis {:?} for rank {}", axis, info.rank()))
        })?;
        if range.start > range.end || range.end > info.shape[axis] {
            return Err(range_error(format!("[{}, {}) on axis {}", range.start, range.end, axis)));
        }
        let mut selection: Vec<Range<usize>> = info.shape.iter().map(|len| 0..*len).collect();
        selection[axis] = range.clone();
        Ok(selection)
    }

    fn read_selection(&self, info: &DatasetInfo, selection: &[Range<usize>]) -> Result<NdArray> {
        let shape: Vec<usize> = selection.iter().map(|range| range.len()).collect();
        let origin: Vec<usize> = selection.iter().map(|range| range.start).collect();
        let mut result = NdArray::filled(shape.clone(), info.data_type, info.fill);
        if result.is_empty() {
            return Ok(result);
        }

        let mut statement = self.connection.prepare(
            "SELECT data FROM Chunks WHERE dataset_id = ?1 AND chunk = ?2"
        ).map_err(|x| self.engine_error(x))?;
        let grid = info.chunk_grid();
        let chunk_ranges = info.chunk_ranges(selection);
        let mut chunk_coords: Vec<usize> = chunk_ranges.iter().map(|range| range.start).collect();
        let (mut visited, mut loaded) = (0, 0);
        loop {
            let chunk_id = local_offset(&grid, &vec![0; grid.len()], &chunk_coords);
            visited += 1;
            if let Some(chunk) = load_chunk(&mut statement, info, chunk_id).map_err(|x| self.engine_error(x))? {
                let extent = info.chunk_extent(&chunk_coords);
                let chunk_origin: Vec<usize> = extent.iter().map(|range| range.start).collect();
                let region = intersect(&extent, selection);
                copy_box(&chunk, &info.chunk_shape, &chunk_origin, result.data_mut(), &shape, &origin, &region);
                loaded += 1;
            }
            if !next_coords(&mut chunk_coords, &chunk_ranges) {
                break;
            }
        }
        debug!("{}: visited {} chunks, loaded {}", info.name, visited, loaded);
        Ok(result)
    }

    /// Returns the side table of the group.
    ///
    /// Returns [`AccessError::Layout`] if the group does not exist.
    pub fn read_side_table(&self, group: &str) -> Result<Table> {
        let (group, group_id) = self.group(group)?;
        self.side_table(&group, group_id)
    }

    fn side_table(&self, group: &str, group_id: i64) -> Result<Table> {
        let mut columns: Vec<String> = Vec::new();
        {
            let mut statement = self.connection.prepare(
                "SELECT name FROM SideFields WHERE group_id = ?1 ORDER BY position"
            ).map_err(|x| self.engine_error(x))?;
            let rows = statement.query_map((group_id,), |row| row.get::<_, String>(0)).map_err(|x| self.engine_error(x))?;
            for name in rows {
                columns.push(name.map_err(|x| self.engine_error(x))?);
            }
        }

        let mut table = Table::new(columns);
        let mut statement = self.connection.prepare(
            "SELECT record, position, value FROM SideValues WHERE group_id = ?1 ORDER BY record, position"
        ).map_err(|x| self.engine_error(x))?;
        let mut rows = statement.query((group_id,)).map_err(|x| self.engine_error(x))?;
        let mut current: Option<(i64, Vec<Value>)> = None;
        while let Some(row) = rows.next().map_err(|x| self.engine_error(x))? {
            let record: i64 = row.get(0).map_err(|x| self.engine_error(x))?;
            let position: usize = row.get(1).map_err(|x| self.engine_error(x))?;
            let value: rusqlite::types::Value = row.get(2).map_err(|x| self.engine_error(x))?;
            if current.as_ref().map(|(id, _)| *id) != Some(record) {
                if let Some((_, values)) = current.take() {
                    table.push(values);
                }
                current = Some((record, vec![Value::Null; table.columns().len()]));
            }
            if let Some((_, values)) = current.as_mut() {
                if position < values.len() {
                    values[position] = Value::from(value);
                }
            }
        }
        if let Some((_, values)) = current {
            table.push(values);
        }
        debug!("{}: side table with {} rows", group, table.len());
        Ok(table)
    }
}

//-----------------------------------------------------------------------------

/// Creates and fills a hierarchical store.
///
/// Each operation is a separate transaction.
/// The store can be read with [`HierStore`] after the writer has been closed.
#[derive(Debug)]
pub struct HierWriter {
    connection: Connection,
    path: PathBuf,
}

impl HierWriter {
    /// Creates a new store with an empty root group.
    ///
    /// Returns an error if the file already exists.
    /// Passes through any database errors.
    pub fn create<P: AsRef<Path>>(filename: P) -> std::result::Result<Self, String> {
        let path = filename.as_ref().to_path_buf();
        info!("Creating hierarchical store {}", path.display());
        if utils::file_exists(&path) {
            return Err(format!("Store {} already exists", path.display()));
        }
        let mut connection = Connection::open(&path).map_err(|x| x.to_string())?;
        Self::create_tables(&mut connection).map_err(|x| x.to_string())?;
        Ok(HierWriter { connection, path })
    }

    fn create_tables(connection: &mut Connection) -> rusqlite::Result<()> {
        let transaction = connection.transaction()?;
        transaction.execute_batch(
            "CREATE TABLE Tags (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            ) STRICT;
            CREATE TABLE Groups (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE
            ) STRICT;
            CREATE TABLE Datasets (
                id INTEGER PRIMARY KEY,
                group_id INTEGER NOT NULL REFERENCES Groups(id),
                name TEXT NOT NULL,
                dtype TEXT NOT NULL,
                shape TEXT NOT NULL,
                chunk_shape TEXT NOT NULL,
                fill REAL NOT NULL,
                UNIQUE (group_id, name)
            ) STRICT;
            CREATE TABLE Chunks (
                dataset_id INTEGER NOT NULL REFERENCES Datasets(id),
                chunk INTEGER NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (dataset_id, chunk)
            ) STRICT;
            CREATE TABLE SideFields (
                group_id INTEGER NOT NULL REFERENCES Groups(id),
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (group_id, position)
            ) STRICT;
            CREATE TABLE SideValues (
                group_id INTEGER NOT NULL REFERENCES Groups(id),
                record INTEGER NOT NULL,
                position INTEGER NOT NULL,
                value ANY,
                PRIMARY KEY (group_id, record, position)
            ) STRICT;"
        )?;
        transaction.execute("INSERT INTO Tags(key, value) VALUES (?1, ?2)", (KEY_VERSION, VERSION))?;
        transaction.execute("INSERT INTO Groups(path) VALUES (?1)", (ROOT,))?;
        transaction.commit()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn group_id(&self, group: &str) -> std::result::Result<(String, i64), String> {
        let normalized = normalize_group(group).ok_or(format!("Invalid group path: {}", group))?;
        let id = find_group(&self.connection, &normalized).map_err(|x| x.to_string())?;
        let id = id.ok_or(format!("No such group: {}", normalized))?;
        Ok((normalized, id))
    }

    fn dataset(&self, group: &str, name: &str) -> std::result::Result<DatasetInfo, String> {
        let (group, group_id) = self.group_id(group)?;
        let info = find_dataset(&self.connection, group_id, name).map_err(|x| x.to_string())?;
        info.ok_or(format!("No such dataset: {}", join_path(&group, name)))
    }

    /// Creates a group and any missing ancestors.
    ///
    /// Creating an existing group is not an error.
    pub fn create_group(&mut self, group: &str) -> std::result::Result<(), String> {
        let normalized = normalize_group(group).ok_or(format!("Invalid group path: {}", group))?;
        let mut paths: Vec<&str> = Vec::new();
        let mut current = Some(normalized.as_str());
        while let Some(path) = current {
            paths.push(path);
            current = parent_group(path);
        }

        let transaction = self.connection.transaction().map_err(|x| x.to_string())?;
        {
            let mut insert = transaction.prepare(
                "INSERT OR IGNORE INTO Groups(path) VALUES (?1)"
            ).map_err(|x| x.to_string())?;
            for path in paths.iter().rev() {
                insert.execute((path,)).map_err(|x| x.to_string())?;
            }
        }
        transaction.commit().map_err(|x| x.to_string())?;
        debug!("Created group {}", normalized);
        Ok(())
    }

    /// Creates an array in an existing group.
    ///
    /// # Arguments
    ///
    /// * `group`: Path of the group.
    /// * `name`: Name of the array, which must not contain `/`.
    /// * `data_type`: Element type.
    /// * `shape`: Length of each axis.
    /// * `chunk_shape`: Chunk length along each axis.
    /// * `fill`: Value of elements that have not been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the group does not exist, the array already exists, or the shapes are invalid.
    pub fn create_dataset(
        &mut self, group: &str, name: &str,
        data_type: DataType, shape: &[usize], chunk_shape: &[usize], fill: f64
    ) -> std::result::Result<(), String> {
        let (group, group_id) = self.group_id(group)?;
        if name.is_empty() || name.contains('/') {
            return Err(format!("Invalid dataset name: {}", name));
        }
        if shape.is_empty() || shape.len() != chunk_shape.len() {
            return Err(format!(
                "Invalid shape [{}] with chunk shape [{}]", shape_to_string(shape), shape_to_string(chunk_shape)
            ));
        }
        if chunk_shape.contains(&0) {
            return Err(format!("Invalid chunk shape [{}]", shape_to_string(chunk_shape)));
        }
        let chunk_len = chunk_shape.iter().try_fold(1usize, |acc, x| acc.checked_mul(*x));
        if chunk_len.map(|len| len > MAX_CHUNK_ELEMENTS).unwrap_or(true) {
            return Err(format!("Chunk shape [{}] exceeds {} elements", shape_to_string(chunk_shape), MAX_CHUNK_ELEMENTS));
        }
        if find_dataset(&self.connection, group_id, name).map_err(|x| x.to_string())?.is_some() {
            return Err(format!("Dataset {} already exists", join_path(&group, name)));
        }

        self.connection.execute(
            "INSERT INTO Datasets(group_id, name, dtype, shape, chunk_shape, fill) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (group_id, name, data_type.name(), shape_to_string(shape), shape_to_string(chunk_shape), fill)
        ).map_err(|x| x.to_string())?;
        info!("Created dataset {} with shape [{}]", join_path(&group, name), shape_to_string(shape));
        Ok(())
    }

    /// Writes the array into the dataset with its first element at `offset`.
    ///
    /// Chunks touched by the array are read, updated, and written back.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset does not exist, the element types or ranks differ, or the array does not fit in the dataset.
    pub fn write_slab(&mut self, group: &str, name: &str, offset: &[usize], array: &NdArray) -> std::result::Result<(), String> {
        let info = self.dataset(group, name)?;
        if array.data_type() != info.data_type {
            return Err(format!("Cannot write {} elements into {} dataset {}", array.data_type(), info.data_type, name));
        }
        if offset.len() != info.rank() || array.shape().len() != info.rank() {
            return Err(format!("Rank mismatch: dataset {} has rank {}", name, info.rank()));
        }
        let selection: Vec<Range<usize>> = offset.iter().zip(array.shape().iter()).map(|(start, len)| *start..(start + len)).collect();
        for (range, len) in selection.iter().zip(info.shape.iter()) {
            if range.end > *len {
                return Err(format!(
                    "Slab at [{}] with shape [{}] does not fit in dataset {} with shape [{}]",
                    shape_to_string(offset), shape_to_string(array.shape()), name, shape_to_string(&info.shape)
                ));
            }
        }
        if array.is_empty() {
            return Ok(());
        }

        let grid = info.chunk_grid();
        let chunk_ranges = info.chunk_ranges(&selection);
        let mut chunk_coords: Vec<usize> = chunk_ranges.iter().map(|range| range.start).collect();
        let mut written = 0;
        let transaction = self.connection.transaction().map_err(|x| x.to_string())?;
        {
            let mut select = transaction.prepare(
                "SELECT data FROM Chunks WHERE dataset_id = ?1 AND chunk = ?2"
            ).map_err(|x| x.to_string())?;
            let mut insert = transaction.prepare(
                "INSERT OR REPLACE INTO Chunks(dataset_id, chunk, data) VALUES (?1, ?2, ?3)"
            ).map_err(|x| x.to_string())?;
            loop {
                let chunk_id = local_offset(&grid, &vec![0; grid.len()], &chunk_coords);
                let mut chunk = match load_chunk(&mut select, &info, chunk_id)? {
                    Some(chunk) => chunk,
                    None => ArrayData::filled(info.data_type, info.chunk_len(), info.fill),
                };
                let extent = info.chunk_extent(&chunk_coords);
                let chunk_origin: Vec<usize> = extent.iter().map(|range| range.start).collect();
                let region = intersect(&extent, &selection);
                copy_box(array.data(), array.shape(), offset, &mut chunk, &info.chunk_shape, &chunk_origin, &region);

                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&chunk.to_bytes()).map_err(|x| x.to_string())?;
                let blob = encoder.finish().map_err(|x| x.to_string())?;
                insert.execute((info.id, chunk_id as i64, blob)).map_err(|x| x.to_string())?;
                written += 1;
                if !next_coords(&mut chunk_coords, &chunk_ranges) {
                    break;
                }
            }
        }
        transaction.commit().map_err(|x| x.to_string())?;
        debug!("{}: wrote {} chunks", name, written);
        Ok(())
    }

    /// Replaces the side table of the group.
    ///
    /// Rows are stored by column, so a table with rows must also have columns.
    pub fn write_side_table(&mut self, group: &str, table: &Table) -> std::result::Result<(), String> {
        let (group, group_id) = self.group_id(group)?;
        if table.columns().is_empty() && !table.is_empty() {
            return Err(format!("Side table for group {} has rows but no columns", group));
        }
        let transaction = self.connection.transaction().map_err(|x| x.to_string())?;
        {
            transaction.execute("DELETE FROM SideFields WHERE group_id = ?1", (group_id,)).map_err(|x| x.to_string())?;
            transaction.execute("DELETE FROM SideValues WHERE group_id = ?1", (group_id,)).map_err(|x| x.to_string())?;
            let mut insert = transaction.prepare(
                "INSERT INTO SideFields(group_id, position, name) VALUES (?1, ?2, ?3)"
            ).map_err(|x| x.to_string())?;
            for (position, name) in table.columns().iter().enumerate() {
                insert.execute((group_id, position, name)).map_err(|x| x.to_string())?;
            }
            let mut insert = transaction.prepare(
                "INSERT INTO SideValues(group_id, record, position, value) VALUES (?1, ?2, ?3, ?4)"
            ).map_err(|x| x.to_string())?;
            for (record, row) in table.rows().iter().enumerate() {
                for (position, value) in row.iter().enumerate() {
                    insert.execute((group_id, record, position, sql_value(value))).map_err(|x| x.to_string())?;
                }
            }
        }
        transaction.commit().map_err(|x| x.to_string())?;
        info!("Wrote a side table with {} rows for group {}", table.len(), group);
        Ok(())
    }

    /// Closes the store.
    pub fn close(self) -> std::result::Result<(), String> {
        self.connection.close().map_err(|(_, x)| x.to_string())
    }
}

//-----------------------------------------------------------------------------
