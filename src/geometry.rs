//! Geometry values and their WKT / EWKT / WKB / EWKB encodings.
//!
//! Only two-dimensional geometries are supported. Z and M coordinates are
//! rejected on read rather than silently dropped.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt::{self, Write as _};

/// Spatial reference id used for every uploaded geometry.
pub const DEFAULT_SRID: i32 = 4326;

const WKB_SRID_FLAG: u32 = 0x2000_0000;
const WKB_Z_FLAG: u32 = 0x8000_0000;
const WKB_M_FLAG: u32 = 0x4000_0000;

/// A 2D coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    /// X (longitude)
    pub x: f64,
    /// Y (latitude)
    pub y: f64,
}

impl Coord {
    /// Create a coordinate.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Coord {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// A geometry value.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Single point
    Point(Coord),
    /// Line string
    LineString(Vec<Coord>),
    /// Polygon: exterior ring followed by interior rings
    Polygon(Vec<Vec<Coord>>),
    /// Multi point
    MultiPoint(Vec<Coord>),
    /// Multi line string
    MultiLineString(Vec<Vec<Coord>>),
    /// Multi polygon
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
    /// Heterogeneous collection
    GeometryCollection(Vec<Geometry>),
}

/// Geometry kind, as used in typed geometry columns (`geometry(Point, 4326)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// Point
    Point,
    /// LineString
    LineString,
    /// Polygon
    Polygon,
    /// MultiPoint
    MultiPoint,
    /// MultiLineString
    MultiLineString,
    /// MultiPolygon
    MultiPolygon,
    /// GeometryCollection
    GeometryCollection,
}

/// Coarse geometry family reported by table descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryFamily {
    /// Points and multi points
    Point,
    /// Lines and multi lines
    Line,
    /// Polygons and multi polygons
    Polygon,
}

impl GeometryFamily {
    /// Lowercase family name.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryFamily::Point => "point",
            GeometryFamily::Line => "line",
            GeometryFamily::Polygon => "polygon",
        }
    }
}

impl fmt::Display for GeometryFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GeometryKind {
    /// Name used in PostGIS typmods.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::LineString => "LineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::MultiLineString => "MultiLineString",
            GeometryKind::MultiPolygon => "MultiPolygon",
            GeometryKind::GeometryCollection => "GeometryCollection",
        }
    }

    /// Parse a kind name; accepts PostGIS `ST_` prefixed names and any case.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name
            .strip_prefix("ST_")
            .or_else(|| name.strip_prefix("st_"))
            .unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "point" => Some(GeometryKind::Point),
            "linestring" => Some(GeometryKind::LineString),
            "polygon" => Some(GeometryKind::Polygon),
            "multipoint" => Some(GeometryKind::MultiPoint),
            "multilinestring" => Some(GeometryKind::MultiLineString),
            "multipolygon" => Some(GeometryKind::MultiPolygon),
            "geometrycollection" => Some(GeometryKind::GeometryCollection),
            _ => None,
        }
    }

    /// Family of this kind; collections have none.
    pub fn family(&self) -> Option<GeometryFamily> {
        match self {
            GeometryKind::Point | GeometryKind::MultiPoint => Some(GeometryFamily::Point),
            GeometryKind::LineString | GeometryKind::MultiLineString => {
                Some(GeometryFamily::Line)
            }
            GeometryKind::Polygon | GeometryKind::MultiPolygon => Some(GeometryFamily::Polygon),
            GeometryKind::GeometryCollection => None,
        }
    }

    fn wkt_tag(&self) -> &'static str {
        match self {
            GeometryKind::Point => "POINT",
            GeometryKind::LineString => "LINESTRING",
            GeometryKind::Polygon => "POLYGON",
            GeometryKind::MultiPoint => "MULTIPOINT",
            GeometryKind::MultiLineString => "MULTILINESTRING",
            GeometryKind::MultiPolygon => "MULTIPOLYGON",
            GeometryKind::GeometryCollection => "GEOMETRYCOLLECTION",
        }
    }

    fn wkb_code(&self) -> u32 {
        match self {
            GeometryKind::Point => 1,
            GeometryKind::LineString => 2,
            GeometryKind::Polygon => 3,
            GeometryKind::MultiPoint => 4,
            GeometryKind::MultiLineString => 5,
            GeometryKind::MultiPolygon => 6,
            GeometryKind::GeometryCollection => 7,
        }
    }

    fn from_wkb_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(GeometryKind::Point),
            2 => Some(GeometryKind::LineString),
            3 => Some(GeometryKind::Polygon),
            4 => Some(GeometryKind::MultiPoint),
            5 => Some(GeometryKind::MultiLineString),
            6 => Some(GeometryKind::MultiPolygon),
            7 => Some(GeometryKind::GeometryCollection),
            _ => None,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Geometry {
    /// Kind of this geometry.
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::LineString(_) => GeometryKind::LineString,
            Geometry::Polygon(_) => GeometryKind::Polygon,
            Geometry::MultiPoint(_) => GeometryKind::MultiPoint,
            Geometry::MultiLineString(_) => GeometryKind::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryKind::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryKind::GeometryCollection,
        }
    }

    /// Well-known text, e.g. `POINT (1 1)`.
    pub fn to_wkt(&self) -> String {
        let mut out = String::new();
        self.write_wkt(&mut out);
        out
    }

    /// Extended WKT with an SRID prefix, e.g. `SRID=4326;POINT (1 1)`.
    pub fn to_ewkt(&self, srid: i32) -> String {
        format!("SRID={};{}", srid, self.to_wkt())
    }

    /// Little-endian EWKB carrying `srid` on the top-level geometry.
    pub fn to_ewkb(&self, srid: Option<i32>) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        self.write_wkb(&mut out, srid);
        out
    }

    /// Upper-case hex form of [`Geometry::to_ewkb`], as PostGIS prints it.
    pub fn to_ewkb_hex(&self, srid: Option<i32>) -> String {
        hex::encode_upper(self.to_ewkb(srid))
    }

    /// Parse WKT or EWKT. The SRID, if any, is discarded.
    pub fn from_wkt(text: &str) -> Result<Self> {
        parse_ewkt(text).map(|(_, geom)| geom)
    }

    /// Parse WKB or EWKB. The SRID, if any, is discarded.
    pub fn from_wkb(bytes: &[u8]) -> Result<Self> {
        parse_ewkb(bytes).map(|(_, geom)| geom)
    }

    /// Parse hex-encoded WKB or EWKB.
    pub fn from_wkb_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| Error::geometry(format!("invalid WKB hex: {}", e)))?;
        Self::from_wkb(&bytes)
    }

    /// Decode a textual geometry, detecting its encoding: EWKB/WKB hex
    /// (optionally `\x` prefixed) or EWKT/WKT.
    pub fn decode(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::geometry("empty geometry"));
        }
        let hex_body = text.strip_prefix("\\x").unwrap_or(text);
        if is_hex(hex_body) {
            Self::from_wkb_hex(hex_body)
        } else {
            Self::from_wkt(text)
        }
    }

    fn write_wkt(&self, out: &mut String) {
        out.push_str(self.kind().wkt_tag());
        match self {
            Geometry::Point(c) => {
                out.push_str(" (");
                write_coord(out, c);
                out.push(')');
            }
            Geometry::LineString(coords) => write_or_empty(out, coords.is_empty(), |out| {
                write_coord_list(out, coords)
            }),
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                write_or_empty(out, rings.is_empty(), |out| write_ring_list(out, rings))
            }
            Geometry::MultiPoint(coords) => write_or_empty(out, coords.is_empty(), |out| {
                out.push('(');
                for (i, c) in coords.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push('(');
                    write_coord(out, c);
                    out.push(')');
                }
                out.push(')');
            }),
            Geometry::MultiPolygon(polygons) => {
                write_or_empty(out, polygons.is_empty(), |out| {
                    out.push('(');
                    for (i, rings) in polygons.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        write_ring_list(out, rings);
                    }
                    out.push(')');
                })
            }
            Geometry::GeometryCollection(members) => {
                write_or_empty(out, members.is_empty(), |out| {
                    out.push('(');
                    for (i, member) in members.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        member.write_wkt(out);
                    }
                    out.push(')');
                })
            }
        }
    }

    fn write_wkb(&self, out: &mut Vec<u8>, srid: Option<i32>) {
        out.push(1);
        let mut code = self.kind().wkb_code();
        if srid.is_some() {
            code |= WKB_SRID_FLAG;
        }
        out.extend_from_slice(&code.to_le_bytes());
        if let Some(srid) = srid {
            out.extend_from_slice(&(srid as u32).to_le_bytes());
        }

        match self {
            Geometry::Point(c) => write_wkb_coord(out, c),
            Geometry::LineString(coords) => write_wkb_coords(out, coords),
            Geometry::Polygon(rings) => write_wkb_rings(out, rings),
            Geometry::MultiPoint(coords) => {
                write_wkb_count(out, coords.len());
                for c in coords {
                    Geometry::Point(*c).write_wkb(out, None);
                }
            }
            Geometry::MultiLineString(lines) => {
                write_wkb_count(out, lines.len());
                for line in lines {
                    out.push(1);
                    out.extend_from_slice(&GeometryKind::LineString.wkb_code().to_le_bytes());
                    write_wkb_coords(out, line);
                }
            }
            Geometry::MultiPolygon(polygons) => {
                write_wkb_count(out, polygons.len());
                for rings in polygons {
                    out.push(1);
                    out.extend_from_slice(&GeometryKind::Polygon.wkb_code().to_le_bytes());
                    write_wkb_rings(out, rings);
                }
            }
            Geometry::GeometryCollection(members) => {
                write_wkb_count(out, members.len());
                for member in members {
                    member.write_wkb(out, None);
                }
            }
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wkt())
    }
}

fn is_hex(text: &str) -> bool {
    !text.is_empty() && text.len() % 2 == 0 && text.bytes().all(|b| b.is_ascii_hexdigit())
}

fn write_or_empty(out: &mut String, empty: bool, body: impl FnOnce(&mut String)) {
    if empty {
        out.push_str(" EMPTY");
    } else {
        out.push(' ');
        body(out);
    }
}

fn write_coord(out: &mut String, c: &Coord) {
    // Writing to a String cannot fail.
    let _ = write!(out, "{} {}", c.x, c.y);
}

fn write_coord_list(out: &mut String, coords: &[Coord]) {
    out.push('(');
    for (i, c) in coords.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coord(out, c);
    }
    out.push(')');
}

fn write_ring_list(out: &mut String, rings: &[Vec<Coord>]) {
    out.push('(');
    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coord_list(out, ring);
    }
    out.push(')');
}

fn write_wkb_count(out: &mut Vec<u8>, n: usize) {
    out.extend_from_slice(&(n as u32).to_le_bytes());
}

fn write_wkb_coord(out: &mut Vec<u8>, c: &Coord) {
    out.extend_from_slice(&c.x.to_le_bytes());
    out.extend_from_slice(&c.y.to_le_bytes());
}

fn write_wkb_coords(out: &mut Vec<u8>, coords: &[Coord]) {
    write_wkb_count(out, coords.len());
    for c in coords {
        write_wkb_coord(out, c);
    }
}

fn write_wkb_rings(out: &mut Vec<u8>, rings: &[Vec<Coord>]) {
    write_wkb_count(out, rings.len());
    for ring in rings {
        write_wkb_coords(out, ring);
    }
}

// ---------------------------------------------------------------------------
// WKT reader
// ---------------------------------------------------------------------------

/// Parse EWKT (or plain WKT), returning the SRID when present.
pub fn parse_ewkt(text: &str) -> Result<(Option<i32>, Geometry)> {
    let text = text.trim();
    let (srid, body) = match text.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("SRID=") => {
            let (srid, body) = text[5..]
                .split_once(';')
                .ok_or_else(|| Error::geometry("EWKT SRID prefix without ';'"))?;
            let srid = srid
                .trim()
                .parse::<i32>()
                .map_err(|_| Error::geometry(format!("invalid SRID '{}'", srid)))?;
            (Some(srid), body)
        }
        _ => (None, text),
    };

    let mut parser = WktParser::new(body)?;
    let geometry = parser.geometry()?;
    if parser.pos < parser.tokens.len() {
        return Err(Error::geometry("trailing characters after WKT geometry"));
    }
    Ok((srid, geometry))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
}

struct WktParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl WktParser {
    fn new(text: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Error::geometry("unexpected end of WKT"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(Error::geometry(format!(
                "expected {:?} in WKT, found {:?}",
                expected, token
            )))
        }
    }

    fn is_empty_marker(&mut self) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == "EMPTY") {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn geometry(&mut self) -> Result<Geometry> {
        let tag = match self.next()? {
            Token::Word(w) => w,
            other => return Err(Error::geometry(format!("expected geometry tag, found {:?}", other))),
        };
        if let Some(Token::Word(w)) = self.peek() {
            if matches!(w.as_str(), "Z" | "M" | "ZM") {
                return Err(Error::geometry(format!(
                    "{} {} geometries are not supported",
                    tag, w
                )));
            }
        }
        let kind = GeometryKind::from_name(&tag)
            .ok_or_else(|| Error::geometry(format!("unknown geometry type '{}'", tag)))?;

        if self.is_empty_marker() {
            return match kind {
                GeometryKind::Point => Err(Error::geometry("empty points are not supported")),
                GeometryKind::LineString => Ok(Geometry::LineString(Vec::new())),
                GeometryKind::Polygon => Ok(Geometry::Polygon(Vec::new())),
                GeometryKind::MultiPoint => Ok(Geometry::MultiPoint(Vec::new())),
                GeometryKind::MultiLineString => Ok(Geometry::MultiLineString(Vec::new())),
                GeometryKind::MultiPolygon => Ok(Geometry::MultiPolygon(Vec::new())),
                GeometryKind::GeometryCollection => Ok(Geometry::GeometryCollection(Vec::new())),
            };
        }

        match kind {
            GeometryKind::Point => {
                self.expect(Token::LParen)?;
                let c = self.coord()?;
                self.expect(Token::RParen)?;
                Ok(Geometry::Point(c))
            }
            GeometryKind::LineString => Ok(Geometry::LineString(self.coord_list()?)),
            GeometryKind::Polygon => Ok(Geometry::Polygon(self.ring_list()?)),
            GeometryKind::MultiPoint => {
                let points = self.separated(|p| {
                    if matches!(p.peek(), Some(Token::LParen)) {
                        p.expect(Token::LParen)?;
                        let c = p.coord()?;
                        p.expect(Token::RParen)?;
                        Ok(c)
                    } else {
                        p.coord()
                    }
                })?;
                Ok(Geometry::MultiPoint(points))
            }
            GeometryKind::MultiLineString => Ok(Geometry::MultiLineString(self.ring_list()?)),
            GeometryKind::MultiPolygon => {
                Ok(Geometry::MultiPolygon(self.separated(|p| p.ring_list())?))
            }
            GeometryKind::GeometryCollection => {
                Ok(Geometry::GeometryCollection(self.separated(|p| p.geometry())?))
            }
        }
    }

    /// `( item, item, ... )`
    fn separated<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        self.expect(Token::LParen)?;
        let mut items = vec![item(self)?];
        loop {
            match self.next()? {
                Token::Comma => items.push(item(self)?),
                Token::RParen => return Ok(items),
                other => {
                    return Err(Error::geometry(format!(
                        "expected ',' or ')' in WKT, found {:?}",
                        other
                    )));
                }
            }
        }
    }

    fn coord_list(&mut self) -> Result<Vec<Coord>> {
        self.separated(|p| p.coord())
    }

    fn ring_list(&mut self) -> Result<Vec<Vec<Coord>>> {
        self.separated(|p| p.coord_list())
    }

    fn coord(&mut self) -> Result<Coord> {
        let x = self.number()?;
        let y = self.number()?;
        if matches!(self.peek(), Some(Token::Number(_))) {
            return Err(Error::geometry("only 2D coordinates are supported"));
        }
        Ok(Coord { x, y })
    }

    fn number(&mut self) -> Result<f64> {
        match self.next()? {
            Token::Number(n) => Ok(n),
            other => Err(Error::geometry(format!(
                "expected number in WKT, found {:?}",
                other
            ))),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_alphabetic() => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_alphabetic() {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(text[start..end].to_ascii_uppercase()));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E') {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &text[start..end];
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| Error::geometry(format!("invalid number '{}' in WKT", literal)))?;
                tokens.push(Token::Number(n));
            }
            other => {
                return Err(Error::geometry(format!(
                    "unexpected character '{}' in WKT",
                    other
                )));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// WKB reader
// ---------------------------------------------------------------------------

/// Parse EWKB (or plain WKB), returning the top-level SRID when present.
pub fn parse_ewkb(bytes: &[u8]) -> Result<(Option<i32>, Geometry)> {
    let mut reader = WkbReader { buf: bytes, pos: 0 };
    let (srid, geometry) = reader.geometry()?;
    if reader.pos != bytes.len() {
        return Err(Error::geometry(format!(
            "{} trailing bytes after WKB geometry",
            bytes.len() - reader.pos
        )));
    }
    Ok((srid, geometry))
}

struct WkbReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl WkbReader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| Error::geometry("truncated WKB"))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u32(&mut self, le: bool) -> Result<u32> {
        let raw = self.take::<4>()?;
        Ok(if le {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn f64(&mut self, le: bool) -> Result<f64> {
        let raw = self.take::<8>()?;
        Ok(if le {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    }

    fn count(&mut self, le: bool, min_item_size: usize) -> Result<usize> {
        let n = self.u32(le)? as usize;
        // Reject counts that cannot possibly fit in the remaining buffer.
        if n.saturating_mul(min_item_size) > self.buf.len() - self.pos {
            return Err(Error::geometry("truncated WKB"));
        }
        Ok(n)
    }

    fn coord(&mut self, le: bool) -> Result<Coord> {
        Ok(Coord {
            x: self.f64(le)?,
            y: self.f64(le)?,
        })
    }

    fn coords(&mut self, le: bool) -> Result<Vec<Coord>> {
        let n = self.count(le, 16)?;
        (0..n).map(|_| self.coord(le)).collect()
    }

    fn rings(&mut self, le: bool) -> Result<Vec<Vec<Coord>>> {
        let n = self.count(le, 4)?;
        (0..n).map(|_| self.coords(le)).collect()
    }

    fn header(&mut self) -> Result<(bool, GeometryKind, Option<i32>)> {
        let le = match self.take::<1>()?[0] {
            0 => false,
            1 => true,
            other => return Err(Error::geometry(format!("invalid WKB byte order {}", other))),
        };
        let raw = self.u32(le)?;
        if raw & (WKB_Z_FLAG | WKB_M_FLAG) != 0 || (raw & 0x0FFF_FFFF) > 1000 {
            return Err(Error::geometry("Z/M WKB geometries are not supported"));
        }
        let kind = GeometryKind::from_wkb_code(raw & 0x0FFF_FFFF)
            .ok_or_else(|| Error::geometry(format!("unknown WKB geometry type {}", raw)))?;
        let srid = if raw & WKB_SRID_FLAG != 0 {
            Some(self.u32(le)? as i32)
        } else {
            None
        };
        Ok((le, kind, srid))
    }

    fn geometry(&mut self) -> Result<(Option<i32>, Geometry)> {
        let (le, kind, srid) = self.header()?;
        let geometry = match kind {
            GeometryKind::Point => Geometry::Point(self.coord(le)?),
            GeometryKind::LineString => Geometry::LineString(self.coords(le)?),
            GeometryKind::Polygon => Geometry::Polygon(self.rings(le)?),
            GeometryKind::MultiPoint => {
                Geometry::MultiPoint(self.members(le, |g| match g {
                    Geometry::Point(c) => Some(c),
                    _ => None,
                })?)
            }
            GeometryKind::MultiLineString => {
                Geometry::MultiLineString(self.members(le, |g| match g {
                    Geometry::LineString(cs) => Some(cs),
                    _ => None,
                })?)
            }
            GeometryKind::MultiPolygon => Geometry::MultiPolygon(self.members(le, |g| match g {
                Geometry::Polygon(rings) => Some(rings),
                _ => None,
            })?),
            GeometryKind::GeometryCollection => {
                Geometry::GeometryCollection(self.members(le, Some)?)
            }
        };
        Ok((srid, geometry))
    }

    fn members<T>(&mut self, le: bool, unwrap: impl Fn(Geometry) -> Option<T>) -> Result<Vec<T>> {
        let n = self.count(le, 5)?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let (_, member) = self.geometry()?;
            let kind = member.kind();
            out.push(unwrap(member).ok_or_else(|| {
                Error::geometry(format!("unexpected {} member in multi geometry", kind))
            })?);
        }
        Ok(out)
    }
}
