//! Row codec for the COPY line protocol.
//!
//! Uploads use `|` delimited rows with CSV quoting and the `__null` sentinel;
//! downloads are comma delimited CSV with a header row, as produced by
//! `COPY (...) TO stdout WITH (FORMAT csv, HEADER true, NULL '__null')`.

use crate::error::{Error, Result};
use crate::frame::{DType, DataFrame, Series, Value};
use crate::geometry::{DEFAULT_SRID, Geometry};
use crate::remote::ByteStream;
use crate::schema::ColumnInfo;
use bytes::{Buf, Bytes};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::StreamExt;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Token standing for a missing value on the wire.
///
/// A text value equal to the token is quoted on upload, so the server stores
/// it as text. Decoding cannot tell quoted from bare fields, so such a value
/// reads back as [`Value::Null`].
pub const NULL_SENTINEL: &str = "__null";

/// Field delimiter of uploaded rows.
pub const DELIMITER: char = '|';

/// Format timestamps are written in.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Rows encoded by [`estimate_size`] when no sample size is configured.
pub const DEFAULT_ESTIMATE_SAMPLE: usize = 1000;

/// Layout of a row stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `|` delimited, no header: what [`encode_row`] produces.
    CopyFrom,
    /// `,` delimited with a header row: what the remote sends back.
    CopyTo,
}

impl WireFormat {
    fn delimiter(&self) -> u8 {
        match self {
            WireFormat::CopyFrom => DELIMITER as u8,
            WireFormat::CopyTo => b',',
        }
    }

    fn has_headers(&self) -> bool {
        matches!(self, WireFormat::CopyTo)
    }
}

/// Stringify one value for `column`, without quoting.
pub fn encode_value(value: &Value, column: &ColumnInfo) -> Result<String> {
    if column.is_geometry {
        return encode_geometry(value, column);
    }
    Ok(match value {
        Value::Null => NULL_SENTINEL.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => encode_float(*v),
        Value::Bool(v) => v.to_string(),
        Value::Text(v) => v.clone(),
        Value::Bytes(v) => String::from_utf8(v.clone())
            .map_err(|e| Error::encode(&column.local_name, format!("invalid UTF-8: {}", e)))?,
        Value::DateTime(v) => v.format(TIMESTAMP_FORMAT).to_string(),
        Value::Geometry(g) => g.to_ewkt(DEFAULT_SRID),
    })
}

fn encode_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        v.to_string()
    }
}

fn encode_geometry(value: &Value, column: &ColumnInfo) -> Result<String> {
    let geometry = match value {
        Value::Null => return Ok(NULL_SENTINEL.to_string()),
        Value::Geometry(g) => Cow::Borrowed(g),
        Value::Text(text) => Cow::Owned(Geometry::decode(text).map_err(|e| {
            Error::encode(&column.local_name, format!("unsupported geometry encoding: {}", e))
        })?),
        Value::Bytes(bytes) => Cow::Owned(Geometry::from_wkb(bytes).map_err(|e| {
            Error::encode(&column.local_name, format!("unsupported geometry encoding: {}", e))
        })?),
        other => {
            return Err(Error::encode(
                &column.local_name,
                format!("expected a geometry, found {:?}", other),
            ));
        }
    };
    Ok(geometry.to_ewkt(DEFAULT_SRID))
}

/// Wrap a field in double quotes when it contains a quote, the delimiter,
/// or a line break; interior quotes are doubled.
pub fn quote_field(field: &str) -> Cow<'_, str> {
    if field.contains(['"', DELIMITER, '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Where a column's values come from in the frame.
#[derive(Debug, Clone, Copy)]
enum Source {
    Column(usize),
    Index,
}

/// The n-th column sharing a local name reads the n-th series of that name,
/// so duplicated frame columns each keep their own values.
fn resolve_sources(frame: &DataFrame, columns: &[ColumnInfo]) -> Result<Vec<Source>> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    columns
        .iter()
        .map(|column| {
            let occurrence = seen.entry(column.local_name.as_str()).or_insert(0);
            let nth = *occurrence;
            *occurrence += 1;
            if let Some(pos) = frame
                .columns()
                .iter()
                .enumerate()
                .filter(|(_, s)| s.name() == column.local_name)
                .map(|(pos, _)| pos)
                .nth(nth)
            {
                Ok(Source::Column(pos))
            } else if frame
                .index()
                .is_some_and(|i| !i.name().is_empty() && i.name() == column.local_name)
            {
                Ok(Source::Index)
            } else {
                Err(Error::encode(&column.local_name, "column not found in frame"))
            }
        })
        .collect()
}

fn source_series<'a>(frame: &'a DataFrame, source: Source) -> Option<&'a Series> {
    match source {
        Source::Column(pos) => frame.columns().get(pos),
        Source::Index => frame.index(),
    }
}

fn encode_resolved(
    frame: &DataFrame,
    row: usize,
    columns: &[ColumnInfo],
    sources: &[Source],
) -> Result<Vec<u8>> {
    let mut line = String::with_capacity(columns.len() * 8);
    for (i, (column, source)) in columns.iter().zip(sources).enumerate() {
        let value = source_series(frame, *source)
            .and_then(|s| s.get(row))
            .ok_or_else(|| Error::encode(&column.local_name, format!("row {} out of range", row)))?;
        if i > 0 {
            line.push(DELIMITER);
        }
        let field = encode_value(value, column)?;
        if field == NULL_SENTINEL && !value.is_null() {
            // A quoted field never matches the NULL string on the server.
            line.push_str(&format!("\"{}\"", field));
        } else {
            line.push_str(&quote_field(&field));
        }
    }
    line.push('\n');
    Ok(line.into_bytes())
}

/// Encode row `row` of `frame` as one `|` delimited line.
pub fn encode_row(frame: &DataFrame, row: usize, columns: &[ColumnInfo]) -> Result<Vec<u8>> {
    let sources = resolve_sources(frame, columns)?;
    encode_resolved(frame, row, columns, &sources)
}

/// Lazily encoded rows of one frame, consumed once by a copy call.
///
/// Build a fresh batch for every transport attempt; a consumed batch cannot
/// be restarted.
#[derive(Debug)]
pub struct RowBatch {
    frame: Arc<DataFrame>,
    columns: Arc<[ColumnInfo]>,
    sources: Vec<Source>,
    next_row: usize,
}

impl RowBatch {
    /// Create a batch over every row of `frame`.
    pub fn new(frame: Arc<DataFrame>, columns: Arc<[ColumnInfo]>) -> Result<Self> {
        let sources = resolve_sources(&frame, &columns)?;
        Ok(Self {
            frame,
            columns,
            sources,
            next_row: 0,
        })
    }

    /// Rows not yet produced.
    pub fn remaining(&self) -> usize {
        self.frame.num_rows().saturating_sub(self.next_row)
    }

    /// Total rows of the batch.
    pub fn total_rows(&self) -> usize {
        self.frame.num_rows()
    }
}

impl Iterator for RowBatch {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_row >= self.frame.num_rows() {
            return None;
        }
        let row = self.next_row;
        self.next_row += 1;
        Some(encode_resolved(&self.frame, row, &self.columns, &self.sources).map(Bytes::from))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

/// Estimate the serialized size of `frame` by encoding up to `sample` rows
/// and scaling to the full row count.
pub fn estimate_size(frame: &DataFrame, columns: &[ColumnInfo], sample: usize) -> Result<u64> {
    let rows = frame.num_rows();
    let sample = sample.max(1).min(rows);
    if sample == 0 {
        return Ok(0);
    }

    let sources = resolve_sources(frame, columns)?;
    let mut sampled: u128 = 0;
    for row in 0..sample {
        sampled += encode_resolved(frame, row, columns, &sources)?.len() as u128;
    }

    let total = (sampled * rows as u128).div_ceil(sample as u128);
    Ok(u64::try_from(total).unwrap_or(u64::MAX))
}

/// Chunks in flight between the transport and the decoder.
const DECODE_CHANNEL_SIZE: usize = 16;

/// Blocking reader over chunks received from a bounded channel.
struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

/// Decode a remote byte stream as a `CopyTo` CSV while it arrives.
///
/// Rows are parsed on a blocking thread fed through a bounded channel, so at
/// most [`DECODE_CHANNEL_SIZE`] undecoded chunks are held at once. A
/// transport error wins over whatever the decoder made of the truncated
/// input.
pub async fn decode_stream(mut stream: ByteStream, columns: &[ColumnInfo]) -> Result<DataFrame> {
    let (tx, rx) = mpsc::channel::<Bytes>(DECODE_CHANNEL_SIZE);
    let owned = columns.to_vec();
    let decoder = tokio::task::spawn_blocking(move || {
        let reader = ChannelReader {
            rx,
            current: Bytes::new(),
        };
        decode_rows(reader, &owned, WireFormat::CopyTo)
    });

    let mut transport_error = None;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                // The decoder hung up early; its error is reported below.
                if tx.send(bytes).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                transport_error = Some(e);
                break;
            }
        }
    }
    drop(tx);

    let decoded = decoder.await.map_err(std::io::Error::from)?;
    match transport_error {
        Some(e) => Err(e),
        None => decoded,
    }
}

/// Decode CSV rows into a frame typed after `columns`.
///
/// With [`WireFormat::CopyTo`] the header must name exactly the requested
/// columns, in order. Any malformed row aborts the whole decode. Every field
/// equal to [`NULL_SENTINEL`] decodes as null, quoted or not.
pub fn decode_rows<R: Read>(
    reader: R,
    columns: &[ColumnInfo],
    format: WireFormat,
) -> Result<DataFrame> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(format.delimiter())
        .has_headers(format.has_headers())
        .from_reader(reader);

    if format.has_headers() {
        let headers = reader
            .headers()
            .map_err(|e| Error::decode(1, e.to_string()))?;
        let expected: Vec<&str> = columns.iter().map(|c| c.local_name.as_str()).collect();
        let found: Vec<&str> = headers.iter().collect();
        if found != expected {
            return Err(Error::decode(
                1,
                format!("header {:?} does not match columns {:?}", found, expected),
            ));
        }
    }

    let mut values: Vec<Vec<Value>> = vec![Vec::new(); columns.len()];
    for record in reader.records() {
        let record = record.map_err(|e| {
            let line = e.position().map_or(0, |p| p.line());
            Error::decode(line, e.to_string())
        })?;
        let line = record.position().map_or(0, |p| p.line());
        if record.len() != columns.len() {
            return Err(Error::decode(
                line,
                format!("expected {} fields, found {}", columns.len(), record.len()),
            ));
        }
        for ((field, column), out) in record.iter().zip(columns).zip(values.iter_mut()) {
            let value = decode_field(field, column.dtype()).map_err(|message| {
                Error::decode(line, format!("column '{}': {}", column.local_name, message))
            })?;
            out.push(value);
        }
    }

    let series = columns
        .iter()
        .zip(values)
        .map(|(column, values)| Series::new(column.local_name.clone(), column.dtype(), values))
        .collect::<Result<Vec<_>>>()?;
    DataFrame::new(series)
}

fn decode_field(field: &str, dtype: DType) -> std::result::Result<Value, String> {
    if field == NULL_SENTINEL {
        return Ok(Value::Null);
    }
    match dtype {
        DType::Int16 => field
            .parse::<i16>()
            .map(|v| Value::Int(v.into()))
            .map_err(|e| format!("invalid smallint '{}': {}", field, e)),
        DType::Int32 => field
            .parse::<i32>()
            .map(|v| Value::Int(v.into()))
            .map_err(|e| format!("invalid integer '{}': {}", field, e)),
        DType::Int64 => field
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| format!("invalid bigint '{}': {}", field, e)),
        DType::Float32 | DType::Float64 => field
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| format!("invalid float '{}': {}", field, e)),
        DType::Bool => match field.to_ascii_lowercase().as_str() {
            "t" | "true" => Ok(Value::Bool(true)),
            "f" | "false" => Ok(Value::Bool(false)),
            _ => Err(format!("invalid boolean '{}'", field)),
        },
        DType::DateTime => parse_timestamp(field)
            .map(Value::DateTime)
            .ok_or_else(|| format!("invalid timestamp '{}'", field)),
        DType::Geometry => Geometry::decode(field)
            .map(Value::Geometry)
            .map_err(|e| e.to_string()),
        DType::Text => Ok(Value::Text(field.to_string())),
    }
}

/// Parse a timestamp as printed by the remote database.
///
/// Accepts a bare date, or date and time with an optional fraction, `T`
/// separator and UTC offset. Offsets are normalized to UTC.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    let with_offset: Cow<'_, str> = match text.strip_suffix('Z') {
        Some(stripped) => Cow::Owned(format!("{}+00:00", stripped)),
        None => Cow::Borrowed(text),
    };
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(&with_offset, fmt) {
            return Some(dt.naive_utc());
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    None
}
