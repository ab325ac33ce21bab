//! Slices returned by the backends: tables of typed values and blocks of sub-arrays.

use crate::source::Axis;

use std::fmt::Display;
use std::io::{self, Write};
use std::ops::Range;

//-----------------------------------------------------------------------------

/// A single value in a [`Table`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a string slice, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(value) => write!(f, "{}", value),
            Value::Real(value) => write!(f, "{}", value),
            Value::Text(value) => write!(f, "{}", value),
            Value::Blob(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value as Sql;
        match value {
            Sql::Null => Value::Null,
            Sql::Integer(value) => Value::Integer(value),
            Sql::Real(value) => Value::Real(value),
            Sql::Text(value) => Value::Text(value),
            Sql::Blob(value) => Value::Blob(value),
        }
    }
}

//-----------------------------------------------------------------------------

/// A tabular record set with named columns.
///
/// All rows have the same number of values as there are columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates an empty table with the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Table { columns, rows: Vec::new() }
    }

    /// Appends a row to the table.
    ///
    /// Missing values are padded with [`Value::Null`] and extra values are dropped.
    pub fn push(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the index of the named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Returns the rows.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the table as tab-separated values with a header line.
    pub fn write_tsv<W: Write>(&self, output: &mut W) -> io::Result<()> {
        writeln!(output, "{}", self.columns.join("\t"))?;
        for row in self.rows.iter() {
            let fields: Vec<String> = row.iter().map(|value| value.to_string()).collect();
            writeln!(output, "{}", fields.join("\t"))?;
        }
        Ok(())
    }
}

//-----------------------------------------------------------------------------

/// Element type of an array in a hierarchical store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Int32,
    Float64,
}

impl DataType {
    /// Returns the size of an element in bytes.
    pub fn width(&self) -> usize {
        match self {
            DataType::Int32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// Returns the name used in store metadata.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int32 => "int32",
            DataType::Float64 => "float64",
        }
    }

    /// Parses a name produced by [`DataType::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int32" => Some(DataType::Int32),
            "float64" => Some(DataType::Float64),
            _ => None,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Element storage of an [`NdArray`].
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayData {
    Int32(Vec<i32>),
    Float64(Vec<f64>),
}

impl ArrayData {
    /// Creates `len` copies of the fill value converted to the given type.
    pub fn filled(data_type: DataType, len: usize, fill: f64) -> Self {
        match data_type {
            DataType::Int32 => ArrayData::Int32(vec![fill as i32; len]),
            DataType::Float64 => ArrayData::Float64(vec![fill; len]),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ArrayData::Int32(_) => DataType::Int32,
            ArrayData::Float64(_) => DataType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Int32(values) => values.len(),
            ArrayData::Float64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Copies `len` elements starting from `from` in `source` to `to` in `self`. The types must match.
    pub(crate) fn copy_run(&mut self, to: usize, source: &ArrayData, from: usize, len: usize) {
        match (self, source) {
            (ArrayData::Int32(dest), ArrayData::Int32(src)) => dest[to..to + len].copy_from_slice(&src[from..from + len]),
            (ArrayData::Float64(dest), ArrayData::Float64(src)) => dest[to..to + len].copy_from_slice(&src[from..from + len]),
            _ => panic!("ArrayData::copy_run: mismatched element types"),
        }
    }

    /// Serializes the elements as little-endian bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ArrayData::Int32(values) => values.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::Float64(values) => values.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    /// Deserializes elements written by [`ArrayData::to_bytes`].
    ///
    /// Returns [`None`] if the length is not a multiple of the element width.
    pub fn from_bytes(data_type: DataType, bytes: &[u8]) -> Option<Self> {
        if bytes.len() % data_type.width() != 0 {
            return None;
        }
        let result = match data_type {
            DataType::Int32 => ArrayData::Int32(
                bytes.chunks_exact(4).map(|x| i32::from_le_bytes([x[0], x[1], x[2], x[3]])).collect()
            ),
            DataType::Float64 => ArrayData::Float64(
                bytes.chunks_exact(8).map(|x| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(x);
                    f64::from_le_bytes(buf)
                }).collect()
            ),
        };
        Some(result)
    }
}

/// A dense row-major multi-dimensional array.
#[derive(Clone, Debug, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NdArray {
    /// Creates an array from its shape and row-major elements.
    ///
    /// Returns [`None`] if the number of elements does not match the shape.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(NdArray { shape, data })
    }

    /// Creates an array where every element is `fill`.
    pub fn filled(shape: Vec<usize>, data_type: DataType, fill: f64) -> Self {
        let len = shape.iter().product();
        NdArray { shape, data: ArrayData::filled(data_type, len, fill) }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut ArrayData {
        &mut self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the row-major offset of the element at the given coordinates.
    pub fn offset(&self, coords: &[usize]) -> Option<usize> {
        row_major_offset(&self.shape, coords)
    }

    /// Returns the element at the given coordinates as an integer, if the array stores integers.
    pub fn get_i32(&self, coords: &[usize]) -> Option<i32> {
        let offset = self.offset(coords)?;
        match &self.data {
            ArrayData::Int32(values) => values.get(offset).copied(),
            _ => None,
        }
    }

    /// Returns the element at the given coordinates as a float, converting integers.
    pub fn get_f64(&self, coords: &[usize]) -> Option<f64> {
        let offset = self.offset(coords)?;
        match &self.data {
            ArrayData::Int32(values) => values.get(offset).map(|x| *x as f64),
            ArrayData::Float64(values) => values.get(offset).copied(),
        }
    }
}

/// Returns the row-major offset of `coords` in an array of the given shape.
pub(crate) fn row_major_offset(shape: &[usize], coords: &[usize]) -> Option<usize> {
    if coords.len() != shape.len() {
        return None;
    }
    let mut offset = 0;
    for (coord, len) in coords.iter().zip(shape.iter()) {
        if coord >= len {
            return None;
        }
        offset = offset * len + coord;
    }
    Some(offset)
}

//-----------------------------------------------------------------------------

/// Sub-arrays read from one group of a hierarchical store.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    /// Group the arrays were read from.
    pub group: String,
    /// Designated axis.
    pub axis: Axis,
    /// Half-open range read along the designated axis.
    pub axis_range: Range<usize>,
    /// One array per requested dataset, in request order.
    pub arrays: Vec<(String, NdArray)>,
    /// Per-sample descriptors of the group.
    pub side_table: Table,
}

impl Block {
    /// Returns the array read from the named dataset.
    pub fn array(&self, name: &str) -> Option<&NdArray> {
        self.arrays.iter().find(|(dataset, _)| dataset == name).map(|(_, array)| array)
    }
}

/// Result of a fetch, owned by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum Slice {
    /// Record set from a relational or interval-indexed source.
    Table(Table),
    /// Sub-arrays from a hierarchical source.
    Block(Block),
}

impl Slice {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Slice::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Slice::Block(block) => Some(block),
            _ => None,
        }
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
