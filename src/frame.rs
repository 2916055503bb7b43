//! In-memory tabular data: typed columns with an optional index.

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 16-bit integer
    Int16,
    /// 32-bit integer
    Int32,
    /// 64-bit integer
    Int64,
    /// Single precision float
    Float32,
    /// Double precision float
    Float64,
    /// Boolean
    Bool,
    /// Text (also holds raw UTF-8 bytes)
    Text,
    /// Timestamp without time zone
    DateTime,
    /// Geometry
    Geometry,
}

impl DType {
    /// Lowercase dtype name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::Text => "text",
            DType::DateTime => "datetime",
            DType::Geometry => "geometry",
        }
    }

    /// Whether this is one of the integer widths.
    pub fn is_integer(&self) -> bool {
        matches!(self, DType::Int16 | DType::Int32 | DType::Int64)
    }

    /// Whether this is one of the float widths.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Whether a value may be stored in a column of this dtype.
    ///
    /// Nulls fit everywhere. Geometry columns also accept text, which is
    /// decoded as WKT/EWKT/WKB-hex when encoded.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DType::Int16, Value::Int(v)) => i16::try_from(*v).is_ok(),
            (DType::Int32, Value::Int(v)) => i32::try_from(*v).is_ok(),
            (DType::Int64, Value::Int(_)) => true,
            (DType::Float32 | DType::Float64, Value::Float(_)) => true,
            (DType::Bool, Value::Bool(_)) => true,
            (DType::Text, Value::Text(_) | Value::Bytes(_)) => true,
            (DType::DateTime, Value::DateTime(_)) => true,
            (DType::Geometry, Value::Geometry(_) | Value::Text(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing value
    Null,
    /// Integer of any width
    Int(i64),
    /// Float of any width
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Text
    Text(String),
    /// Raw bytes, expected to hold UTF-8
    Bytes(Vec<u8>),
    /// Timestamp
    DateTime(NaiveDateTime),
    /// Geometry
    Geometry(Geometry),
}

impl Value {
    /// Whether this is the missing value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the geometry, if this is one.
    pub fn as_geometry(&self) -> Option<&Geometry> {
        match self {
            Value::Geometry(g) => Some(g),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::DateTime(_) => "datetime",
            Value::Geometry(_) => "geometry",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Geometry> for Value {
    fn from(v: Geometry) -> Self {
        Value::Geometry(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    name: String,
    dtype: DType,
    values: Vec<Value>,
}

impl Series {
    /// Create a series, checking every value against `dtype`.
    pub fn new(name: impl Into<String>, dtype: DType, values: Vec<Value>) -> Result<Self> {
        let name = name.into();
        if let Some((row, value)) = values.iter().enumerate().find(|(_, v)| !dtype.accepts(v)) {
            return Err(Error::validation(format!(
                "column '{}' has dtype {} but row {} holds a {} value",
                name,
                dtype,
                row,
                value.kind_name()
            )));
        }
        Ok(Self {
            name,
            dtype,
            values,
        })
    }

    /// Empty series of the given dtype.
    pub fn empty(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
            values: Vec::new(),
        }
    }

    /// 64-bit integer series.
    pub fn from_i64(name: impl Into<String>, values: impl IntoIterator<Item = Option<i64>>) -> Self {
        Self::unchecked(name, DType::Int64, values)
    }

    /// 64-bit float series.
    pub fn from_f64(name: impl Into<String>, values: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self::unchecked(name, DType::Float64, values)
    }

    /// Boolean series.
    pub fn from_bool(
        name: impl Into<String>,
        values: impl IntoIterator<Item = Option<bool>>,
    ) -> Self {
        Self::unchecked(name, DType::Bool, values)
    }

    /// Text series.
    pub fn from_text<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = Option<S>>,
    ) -> Self {
        Self::unchecked(
            name,
            DType::Text,
            values.into_iter().map(|v| v.map(Into::<String>::into)),
        )
    }

    /// Timestamp series.
    pub fn from_datetime(
        name: impl Into<String>,
        values: impl IntoIterator<Item = Option<NaiveDateTime>>,
    ) -> Self {
        Self::unchecked(name, DType::DateTime, values)
    }

    /// Geometry series.
    pub fn from_geometry(
        name: impl Into<String>,
        values: impl IntoIterator<Item = Option<Geometry>>,
    ) -> Self {
        Self::unchecked(name, DType::Geometry, values)
    }

    // Only for constructors whose item type already matches the dtype.
    fn unchecked<T: Into<Value>>(
        name: impl Into<String>,
        dtype: DType,
        values: impl IntoIterator<Item = Option<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            dtype,
            values: values.into_iter().map(Value::from).collect(),
        }
    }

    /// Column name; empty for an unnamed index.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the series.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// All values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at `row`.
    pub fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First value that is not null.
    pub fn first_non_null(&self) -> Option<&Value> {
        self.values.iter().find(|v| !v.is_null())
    }

    fn slice(&self, offset: usize, len: usize) -> Self {
        let start = offset.min(self.values.len());
        let end = start.saturating_add(len).min(self.values.len());
        Self {
            name: self.name.clone(),
            dtype: self.dtype,
            values: self.values[start..end].to_vec(),
        }
    }
}

/// A set of equal-length columns with an optional index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataFrame {
    columns: Vec<Series>,
    index: Option<Series>,
}

impl DataFrame {
    /// Create a frame. All columns must have the same length.
    pub fn new(columns: Vec<Series>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != rows) {
                return Err(Error::validation(format!(
                    "column '{}' has {} rows, expected {}",
                    bad.name(),
                    bad.len(),
                    rows
                )));
            }
        }
        Ok(Self {
            columns,
            index: None,
        })
    }

    /// Attach an index. Its length must match the row count.
    pub fn with_index(mut self, index: Series) -> Result<Self> {
        if !self.columns.is_empty() && index.len() != self.num_rows() {
            return Err(Error::validation(format!(
                "index has {} rows, expected {}",
                index.len(),
                self.num_rows()
            )));
        }
        self.index = Some(index);
        Ok(self)
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.columns
            .first()
            .map(Series::len)
            .or_else(|| self.index.as_ref().map(Series::len))
            .unwrap_or(0)
    }

    /// Number of columns, index excluded.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Whether the frame has no rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// All columns in order.
    pub fn columns(&self) -> &[Series] {
        &self.columns
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Series::name).collect()
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Option<&Series> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The index, if any.
    pub fn index(&self) -> Option<&Series> {
        self.index.as_ref()
    }

    /// Rows `offset..offset + len`, clamped to the frame.
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        Self {
            columns: self.columns.iter().map(|c| c.slice(offset, len)).collect(),
            index: self.index.as_ref().map(|i| i.slice(offset, len)),
        }
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Self {
        self.slice(0, n)
    }

    /// Split into `n` consecutive frames whose sizes differ by at most one.
    pub fn split(&self, n: usize) -> Vec<Self> {
        let n = n.max(1);
        let rows = self.num_rows();
        let base = rows / n;
        let extra = rows % n;

        let mut offset = 0;
        (0..n)
            .map(|i| {
                let len = base + usize::from(i < extra);
                let chunk = self.slice(offset, len);
                offset += len;
                chunk
            })
            .collect()
    }

    /// Decode a text column holding WKT, EWKT or WKB hex into geometries.
    pub fn set_geometry(&mut self, column: &str) -> Result<()> {
        let pos = self.position(column)?;
        let series = &mut self.columns[pos];
        if series.dtype == DType::Geometry
            && series.values.iter().all(|v| !matches!(v, Value::Text(_)))
        {
            return Ok(());
        }
        if !matches!(series.dtype, DType::Text | DType::Geometry) {
            return Err(Error::validation(format!(
                "column '{}' has dtype {} and cannot hold geometries",
                column, series.dtype
            )));
        }

        let values = series
            .values
            .iter()
            .map(|v| match v {
                Value::Text(text) => Geometry::decode(text).map(Value::Geometry),
                Value::Bytes(bytes) => Geometry::from_wkb(bytes).map(Value::Geometry),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>>>()?;

        series.values = values;
        series.dtype = DType::Geometry;
        Ok(())
    }

    fn position(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| Error::validation(format!("column '{}' not found", column)))
    }
}
