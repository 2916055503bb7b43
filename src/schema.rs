//! Column descriptions, type mapping and DDL generation.

use crate::frame::{DType, DataFrame, Series, Value};
use crate::geometry::{DEFAULT_SRID, Geometry, GeometryKind};
use crate::naming::{disambiguate, normalize_name};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

/// Canonical name of the primary geometry column.
pub const GEOMETRY_COLUMN: &str = "the_geom";

/// Platform row id column.
pub const ID_COLUMN: &str = "cartodb_id";

/// Server-side rendering projection, never transferred.
pub const WEBMERCATOR_COLUMN: &str = "the_geom_webmercator";

/// Columns the platform manages itself; excluded from schema comparison.
pub const RESERVED_COLUMNS: &[&str] = &[ID_COLUMN, GEOMETRY_COLUMN, WEBMERCATOR_COLUMN];

/// Local columns that are never uploaded.
pub const FORBIDDEN_COLUMNS: &[&str] = &[WEBMERCATOR_COLUMN];

/// Remote column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteType {
    /// smallint
    SmallInt,
    /// integer
    Integer,
    /// bigint
    BigInt,
    /// real
    Real,
    /// double precision
    DoublePrecision,
    /// boolean
    Boolean,
    /// text
    Text,
    /// timestamp
    Timestamp,
    /// geometry with SRID 4326; `None` when the kind is unknown
    Geometry(Option<GeometryKind>),
}

impl RemoteType {
    /// Remote type for a local dtype.
    pub fn from_dtype(dtype: DType, geometry_kind: Option<GeometryKind>) -> Self {
        match dtype {
            DType::Int16 => RemoteType::SmallInt,
            DType::Int32 => RemoteType::Integer,
            DType::Int64 => RemoteType::BigInt,
            DType::Float32 => RemoteType::Real,
            DType::Float64 => RemoteType::DoublePrecision,
            DType::Bool => RemoteType::Boolean,
            DType::Text => RemoteType::Text,
            DType::DateTime => RemoteType::Timestamp,
            DType::Geometry => RemoteType::Geometry(geometry_kind),
        }
    }

    /// Local dtype values of this remote type decode into.
    pub fn dtype(&self) -> DType {
        match self {
            RemoteType::SmallInt => DType::Int16,
            RemoteType::Integer => DType::Int32,
            RemoteType::BigInt => DType::Int64,
            RemoteType::Real => DType::Float32,
            RemoteType::DoublePrecision => DType::Float64,
            RemoteType::Boolean => DType::Bool,
            RemoteType::Text => DType::Text,
            RemoteType::Timestamp => DType::DateTime,
            RemoteType::Geometry(_) => DType::Geometry,
        }
    }

    /// SQL type as used in DDL.
    pub fn to_sql(&self) -> String {
        match self {
            RemoteType::SmallInt => "smallint".to_string(),
            RemoteType::Integer => "integer".to_string(),
            RemoteType::BigInt => "bigint".to_string(),
            RemoteType::Real => "real".to_string(),
            RemoteType::DoublePrecision => "double precision".to_string(),
            RemoteType::Boolean => "boolean".to_string(),
            RemoteType::Text => "text".to_string(),
            RemoteType::Timestamp => "timestamp".to_string(),
            RemoteType::Geometry(kind) => format!(
                "geometry({}, {})",
                kind.map_or("Geometry", |k| k.as_str()),
                DEFAULT_SRID
            ),
        }
    }
}

impl fmt::Display for RemoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

impl Serialize for RemoteType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_sql())
    }
}

/// Map a remote type name (as reported by the database) to a local dtype.
pub fn dtype_from_remote_name(type_name: &str) -> DType {
    let normalized = type_name.trim().to_lowercase();
    match normalized.as_str() {
        "smallint" | "int2" => DType::Int16,
        "integer" | "int4" | "int" => DType::Int32,
        "bigint" | "int8" => DType::Int64,
        "real" | "float4" => DType::Float32,
        "double precision" | "float8" | "numeric" | "decimal" => DType::Float64,
        "boolean" | "bool" => DType::Bool,
        "date" | "timestamp" | "timestamp without time zone" | "timestamptz"
        | "timestamp with time zone" => DType::DateTime,
        "geometry" => DType::Geometry,
        s if s.starts_with("numeric(") || s.starts_with("decimal(") => DType::Float64,
        s if s.starts_with("geometry(") => DType::Geometry,
        _ => DType::Text,
    }
}

/// Map a generic field kind (`number`, `string`, `geometry`, ...) to a dtype.
fn dtype_from_generic_kind(kind: &str) -> DType {
    match kind.trim().to_lowercase().as_str() {
        "geometry" => DType::Geometry,
        "number" => DType::Float64,
        "boolean" => DType::Bool,
        "date" => DType::DateTime,
        _ => DType::Text,
    }
}

/// A remote field as reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescription {
    /// Field name
    pub name: String,
    /// Concrete database type name (`bigint`, `USER-DEFINED`, ...), if known
    pub type_name: Option<String>,
    /// Generic kind (`number`, `string`, `geometry`, ...), if known
    pub kind: Option<String>,
}

impl FieldDescription {
    /// Field with a concrete type name.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
            kind: None,
        }
    }

    /// Field described by a generic kind only.
    pub fn with_kind(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            kind: Some(kind.into()),
        }
    }

    /// Attach a generic kind.
    pub fn with_generic(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Local dtype for this field.
    pub fn dtype(&self) -> DType {
        let is_geometry = |s: &Option<String>| {
            s.as_deref()
                .is_some_and(|t| dtype_from_remote_name(t) == DType::Geometry)
        };
        if is_geometry(&self.type_name) || is_geometry(&self.kind) {
            return DType::Geometry;
        }
        match (&self.type_name, &self.kind) {
            (Some(t), _) => dtype_from_remote_name(t),
            (None, Some(k)) => dtype_from_generic_kind(k),
            (None, None) => DType::Text,
        }
    }
}

/// One column of a sync operation.
///
/// Equality compares the remote side only (`remote_name`, `remote_type`,
/// `is_geometry`); the local name is irrelevant to reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    /// Name in the local frame (or the remote field name on download)
    pub local_name: String,
    /// Normalized remote identifier
    pub remote_name: String,
    /// Remote type
    pub remote_type: RemoteType,
    /// Whether this column holds geometries
    pub is_geometry: bool,
}

impl PartialEq for ColumnInfo {
    fn eq(&self, other: &Self) -> bool {
        self.remote_name == other.remote_name
            && self.remote_type == other.remote_type
            && self.is_geometry == other.is_geometry
    }
}

impl Eq for ColumnInfo {}

impl ColumnInfo {
    /// Create a column description.
    pub fn new(
        local_name: impl Into<String>,
        remote_name: impl Into<String>,
        remote_type: RemoteType,
    ) -> Self {
        Self {
            local_name: local_name.into(),
            remote_name: remote_name.into(),
            is_geometry: matches!(remote_type, RemoteType::Geometry(_)),
            remote_type,
        }
    }

    /// Local dtype of this column.
    pub fn dtype(&self) -> DType {
        self.remote_type.dtype()
    }

    /// Whether the column is one the platform manages itself.
    pub fn is_reserved(&self) -> bool {
        RESERVED_COLUMNS.contains(&self.remote_name.as_str())
    }

    /// `"name" type` fragment for DDL.
    pub fn definition(&self) -> String {
        format!("{} {}", quote_ident(&self.remote_name), self.remote_type)
    }
}

fn is_forbidden(name: &str) -> bool {
    FORBIDDEN_COLUMNS.contains(&name.to_lowercase().as_str())
}

fn geometry_kind_of(value: &Value) -> Option<GeometryKind> {
    match value {
        Value::Geometry(g) => Some(g.kind()),
        Value::Text(text) => Geometry::decode(text).ok().map(|g| g.kind()),
        Value::Bytes(bytes) => Geometry::from_wkb(bytes).ok().map(|g| g.kind()),
        _ => None,
    }
}

/// Derive the column set of a local frame.
///
/// A named index that is not also a column is included first. Geometry
/// columns without any non-null value are uploaded as text. The first
/// populated geometry column is named [`GEOMETRY_COLUMN`]; a column
/// normalizing to [`ID_COLUMN`] keeps that name only when integer-typed.
pub fn from_local(frame: &DataFrame) -> Vec<ColumnInfo> {
    let mut candidates: Vec<&Series> = Vec::with_capacity(frame.num_columns() + 1);
    if let Some(index) = frame.index() {
        if !index.name().is_empty() && frame.column(index.name()).is_none() {
            candidates.push(index);
        }
    }
    candidates.extend(frame.columns().iter());
    candidates.retain(|s| !is_forbidden(s.name()));

    let geometry_kinds: Vec<Option<Option<GeometryKind>>> = candidates
        .iter()
        .map(|s| {
            if s.dtype() != DType::Geometry {
                return None;
            }
            s.first_non_null().map(geometry_kind_of)
        })
        .collect();
    let primary_geometry = geometry_kinds.iter().position(Option::is_some);

    let mut taken: HashSet<String> = HashSet::new();
    if primary_geometry.is_some() {
        taken.insert(GEOMETRY_COLUMN.to_string());
    }

    let mut columns = Vec::with_capacity(candidates.len());
    for (i, series) in candidates.iter().enumerate() {
        let (dtype, kind) = match geometry_kinds[i] {
            Some(kind) => (DType::Geometry, kind),
            None if series.dtype() == DType::Geometry => (DType::Text, None),
            None => (series.dtype(), None),
        };

        let remote_name = if Some(i) == primary_geometry {
            GEOMETRY_COLUMN.to_string()
        } else {
            let mut name = normalize_name(series.name());
            if name == WEBMERCATOR_COLUMN {
                continue;
            }
            if name == ID_COLUMN && !dtype.is_integer() {
                name = format!("_{}", ID_COLUMN);
            }
            let name = disambiguate(&name, &taken);
            taken.insert(name.clone());
            name
        };

        columns.push(ColumnInfo::new(
            series.name(),
            remote_name,
            RemoteType::from_dtype(dtype, kind),
        ));
    }
    columns
}

/// Derive the column set of a remote query from its field descriptions.
pub fn from_remote(fields: &[FieldDescription]) -> Vec<ColumnInfo> {
    fields
        .iter()
        .map(|field| {
            ColumnInfo::new(
                field.name.clone(),
                normalize_name(&field.name),
                RemoteType::from_dtype(field.dtype(), None),
            )
        })
        .collect()
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"schema"."table"`.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// `"a","b","c"` over remote names.
pub fn column_list(columns: &[ColumnInfo]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(&c.remote_name))
        .collect::<Vec<_>>()
        .join(",")
}

/// `CREATE TABLE <table> ("a" bigint, ...)`.
pub fn create_table_statement(table: &str, columns: &[ColumnInfo]) -> String {
    let defs: Vec<String> = columns.iter().map(ColumnInfo::definition).collect();
    format!("CREATE TABLE {} ({})", table, defs.join(", "))
}
