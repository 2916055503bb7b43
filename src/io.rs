//! CSV files as frames.
//!
//! Column types are inferred on read: a column is the narrowest of integer,
//! float, boolean, timestamp or text that fits all of its non-empty cells.
//! Empty cells are nulls.

use crate::codec::{TIMESTAMP_FORMAT, parse_timestamp};
use crate::error::{Error, Result};
use crate::frame::{DType, DataFrame, Series, Value};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Read a CSV file with a header row.
pub fn read_csv(path: impl AsRef<Path>) -> Result<DataFrame> {
    let file = File::open(path.as_ref())?;
    read_csv_from(file)
}

/// Read CSV with a header row from `reader`.
pub fn read_csv_from<R: Read>(reader: R) -> Result<DataFrame> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::decode(1, e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record.map_err(|e| {
            let line = e.position().map_or(0, |p| p.line());
            Error::decode(line, e.to_string())
        })?;
        for (i, column) in cells.iter_mut().enumerate() {
            column.push(record.get(i).unwrap_or_default().to_string());
        }
    }

    let series = headers
        .into_iter()
        .zip(cells)
        .map(|(name, column)| infer_series(name, column))
        .collect::<Result<Vec<_>>>()?;
    DataFrame::new(series)
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.to_ascii_lowercase().as_str() {
        "true" | "t" => Some(true),
        "false" | "f" => Some(false),
        _ => None,
    }
}

fn infer_dtype(cells: &[String]) -> DType {
    let present: Vec<&str> = cells.iter().map(String::as_str).filter(|c| !c.is_empty()).collect();
    if present.is_empty() {
        return DType::Text;
    }
    if present.iter().all(|c| c.parse::<i64>().is_ok()) {
        DType::Int64
    } else if present.iter().all(|c| c.parse::<f64>().is_ok()) {
        DType::Float64
    } else if present.iter().all(|c| parse_bool(c).is_some()) {
        DType::Bool
    } else if present.iter().all(|c| parse_timestamp(c).is_some()) {
        DType::DateTime
    } else {
        DType::Text
    }
}

fn infer_series(name: String, cells: Vec<String>) -> Result<Series> {
    let dtype = infer_dtype(&cells);
    let values = cells
        .into_iter()
        .map(|cell| {
            if cell.is_empty() {
                return Value::Null;
            }
            match dtype {
                DType::Int64 => cell.parse().map(Value::Int).unwrap_or(Value::Null),
                DType::Float64 => cell.parse().map(Value::Float).unwrap_or(Value::Null),
                DType::Bool => parse_bool(&cell).map_or(Value::Null, Value::Bool),
                DType::DateTime => parse_timestamp(&cell).map_or(Value::Null, Value::DateTime),
                _ => Value::Text(cell),
            }
        })
        .collect();
    Series::new(name, dtype, values)
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Text(v) => v.clone(),
        Value::Bytes(v) => hex::encode(v),
        Value::DateTime(v) => v.format(TIMESTAMP_FORMAT).to_string(),
        Value::Geometry(g) => g.to_wkt(),
    }
}

/// Write `frame` as CSV with a header row. The index is not written.
pub fn write_csv(frame: &DataFrame, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_csv_to(frame, file)
}

/// Write `frame` as CSV with a header row to `writer`.
pub fn write_csv_to<W: Write>(frame: &DataFrame, writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer
        .write_record(frame.column_names())
        .map_err(|e| Error::serialization("Failed to write CSV header", e))?;

    for row in 0..frame.num_rows() {
        let record: Vec<String> = frame
            .columns()
            .iter()
            .map(|s| s.get(row).map(format_value).unwrap_or_default())
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| Error::serialization("Failed to write CSV row", e))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
id,name,score,active,seen,geom
1,Madrid,1.5,true,2020-01-01 10:00:00,POINT (1 2)
2,,2,false,2020-01-02,
3,\"Quoted, name\",,t,,POINT (3 4)
";

    #[test]
    fn test_read_infers_types() {
        let frame = read_csv_from(SAMPLE.as_bytes()).unwrap();
        assert_eq!(frame.num_rows(), 3);
        let dtypes: Vec<DType> = frame.columns().iter().map(Series::dtype).collect();
        assert_eq!(
            dtypes,
            vec![
                DType::Int64,
                DType::Text,
                DType::Float64,
                DType::Bool,
                DType::DateTime,
                DType::Text
            ]
        );
        assert_eq!(frame.column("name").unwrap().get(1), Some(&Value::Null));
        assert_eq!(
            frame.column("name").unwrap().get(2),
            Some(&Value::Text("Quoted, name".into()))
        );
    }

    #[test]
    fn test_read_then_set_geometry() {
        let mut frame = read_csv_from(SAMPLE.as_bytes()).unwrap();
        frame.set_geometry("geom").unwrap();
        assert_eq!(frame.column("geom").unwrap().dtype(), DType::Geometry);
    }

    #[test]
    fn test_write_round_trip() {
        let frame = read_csv_from(SAMPLE.as_bytes()).unwrap();
        let mut out = Vec::new();
        write_csv_to(&frame, &mut out).unwrap();
        let again = read_csv_from(out.as_slice()).unwrap();
        assert_eq!(again.column_names(), frame.column_names());
        assert_eq!(
            again.column("id").unwrap().values(),
            frame.column("id").unwrap().values()
        );
        assert_eq!(
            again.column("name").unwrap().values(),
            frame.column("name").unwrap().values()
        );
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let frame = DataFrame::new(vec![Series::from_i64("a", [Some(1), None])]).unwrap();
        write_csv(&frame, &path).unwrap();
        let read = read_csv(&path).unwrap();
        assert_eq!(read.column("a").unwrap().values(), &[Value::Int(1), Value::Null]);
    }
}
