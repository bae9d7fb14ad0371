//! Streaming reader for PLY (Stanford polygon) files.
//!
//! Reading happens in two steps. [`PlyReader::new`] consumes the header and
//! exposes the declared elements and properties, so callers can decide what to
//! bind before any record is decoded. [`PlyReader::read_records`] then decodes
//! every element instance in file order and hands each value of a bound
//! property to the caller's handler. Unbound properties are decoded and
//! dropped.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Header grammar violations.
    #[error("malformed header: {0}")]
    Format(String),
    /// Required elements or properties are missing or empty.
    #[error("{0}")]
    Structural(String),
    /// A record could not be decoded or was rejected by its handler.
    #[error("{element}[{instance}].{property}: {reason}")]
    Data {
        element: String,
        instance: usize,
        property: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl PlyFormat {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "ascii" => Some(Self::Ascii),
            "binary_little_endian" => Some(Self::BinaryLittleEndian),
            "binary_big_endian" => Some(Self::BinaryBigEndian),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::BinaryLittleEndian => "binary_little_endian",
            Self::BinaryBigEndian => "binary_big_endian",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl ScalarType {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "char" | "int8" => Some(Self::Int8),
            "uchar" | "uint8" => Some(Self::UInt8),
            "short" | "int16" => Some(Self::Int16),
            "ushort" | "uint16" => Some(Self::UInt16),
            "int" | "int32" => Some(Self::Int32),
            "uint" | "uint32" => Some(Self::UInt32),
            "float" | "float32" => Some(Self::Float32),
            "double" | "float64" => Some(Self::Float64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_integer(self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64)
    }

    /// Inclusive value range for integer types.
    const fn integer_range(self) -> (i64, i64) {
        match self {
            Self::Int8 => (i8::MIN as i64, i8::MAX as i64),
            Self::UInt8 => (0, u8::MAX as i64),
            Self::Int16 => (i16::MIN as i64, i16::MAX as i64),
            Self::UInt16 => (0, u16::MAX as i64),
            Self::Int32 => (i32::MIN as i64, i32::MAX as i64),
            Self::UInt32 => (0, u32::MAX as i64),
            Self::Float32 | Self::Float64 => (i64::MIN, i64::MAX),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "char",
            Self::UInt8 => "uchar",
            Self::Int16 => "short",
            Self::UInt16 => "ushort",
            Self::Int32 => "int",
            Self::UInt32 => "uint",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(ty) => f.write_str(ty.name()),
            Self::List { count, item } => write!(f, "list {} {}", count.name(), item.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDecl {
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDecl {
    pub name: String,
    pub count: usize,
    pub properties: Vec<PropertyDecl>,
}

/// Position of a property within the header: element index, property index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertySlot {
    pub element: usize,
    pub property: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyHeader {
    pub format: PlyFormat,
    pub version: String,
    pub comments: Vec<String>,
    pub obj_info: Vec<String>,
    pub elements: Vec<ElementDecl>,
}

impl PlyHeader {
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&ElementDecl> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Instance count of the named element, 0 when it is not declared.
    #[must_use]
    pub fn element_count(&self, name: &str) -> usize {
        self.element(name).map_or(0, |e| e.count)
    }

    #[must_use]
    pub fn find_property(&self, element: &str, property: &str) -> Option<(PropertySlot, &PropertyDecl)> {
        let (element_idx, decl) = self
            .elements
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == element)?;
        let (property_idx, prop) = decl
            .properties
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == property)?;
        Some((
            PropertySlot {
                element: element_idx,
                property: property_idx,
            },
            prop,
        ))
    }
}

/// Handler registrations keyed by [`PropertySlot`].
#[derive(Debug, Clone)]
pub struct BindingTable<H> {
    slots: Vec<Vec<Option<H>>>,
}

impl<H> BindingTable<H> {
    /// An empty table shaped after `header`.
    #[must_use]
    pub fn new(header: &PlyHeader) -> Self {
        let slots = header
            .elements
            .iter()
            .map(|e| e.properties.iter().map(|_| None).collect())
            .collect();
        Self { slots }
    }

    /// Registers `handler` for `slot`, replacing any earlier registration.
    pub fn bind(&mut self, slot: PropertySlot, handler: H) {
        if let Some(entry) = self
            .slots
            .get_mut(slot.element)
            .and_then(|props| props.get_mut(slot.property))
        {
            *entry = Some(handler);
        }
    }

    #[must_use]
    pub fn handler(&self, slot: PropertySlot) -> Option<&H> {
        self.slots.get(slot.element)?.get(slot.property)?.as_ref()
    }

    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.slots.iter().flatten().filter(|h| h.is_some()).count()
    }
}

/// A decoded property value as seen by a handler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue<'a> {
    Scalar(f64),
    List(&'a [f64]),
}

/// Instance being decoded when a handler is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub slot: PropertySlot,
    pub instance: usize,
}

pub struct PlyReader<R> {
    reader: R,
    header: PlyHeader,
}

impl PlyReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PlyError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead> PlyReader<R> {
    /// Consumes the header of `reader`; the body is left unread.
    pub fn new(mut reader: R) -> Result<Self, PlyError> {
        let header = read_header(&mut reader)?;
        log::debug!(
            "PLY header: format={} elements=[{}]",
            header.format.name(),
            header
                .elements
                .iter()
                .map(|e| format!("{}:{}", e.name, e.count))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self { reader, header })
    }

    #[must_use]
    pub fn header(&self) -> &PlyHeader {
        &self.header
    }

    /// Decodes the body and calls `on_value` for every value of a bound
    /// property. A handler error aborts the read with [`PlyError::Data`].
    pub fn read_records<H, F>(mut self, table: &BindingTable<H>, mut on_value: F) -> Result<(), PlyError>
    where
        F: FnMut(&H, RecordPosition, PropertyValue<'_>) -> Result<(), String>,
    {
        let mut decoder = Decoder::new(self.header.format);
        let mut items = Vec::new();

        for (element_idx, element) in self.header.elements.iter().enumerate() {
            for instance in 0..element.count {
                for (property_idx, prop) in element.properties.iter().enumerate() {
                    let data_err = |reason: String| PlyError::Data {
                        element: element.name.clone(),
                        instance,
                        property: prop.name.clone(),
                        reason,
                    };
                    let lift = |err: DecodeError| match err {
                        DecodeError::Io(source) => PlyError::Io(source),
                        DecodeError::Eof => data_err("unexpected end of file".to_string()),
                        DecodeError::Malformed(reason) => data_err(reason),
                    };

                    let value = match prop.kind {
                        PropertyKind::Scalar(ty) => {
                            PropertyValue::Scalar(decoder.scalar(&mut self.reader, ty).map_err(lift)?)
                        }
                        PropertyKind::List { count, item } => {
                            let len = decoder.scalar(&mut self.reader, count).map_err(lift)?;
                            if len < 0.0 || len.fract() != 0.0 {
                                return Err(data_err(format!("invalid list length {len}")));
                            }
                            items.clear();
                            for _ in 0..len as usize {
                                items.push(decoder.scalar(&mut self.reader, item).map_err(lift)?);
                            }
                            PropertyValue::List(&items)
                        }
                    };

                    let slot = PropertySlot {
                        element: element_idx,
                        property: property_idx,
                    };
                    if let Some(handler) = table.handler(slot) {
                        on_value(handler, RecordPosition { slot, instance }, value)
                            .map_err(data_err)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<PlyHeader, PlyError> {
    let mut line = Vec::new();
    let mut next_line = |reader: &mut R| -> Result<Option<String>, PlyError> {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        let text = std::str::from_utf8(&line)
            .map_err(|_| PlyError::Format("header is not valid ASCII".to_string()))?;
        Ok(Some(text.trim_end_matches(['\r', '\n']).to_string()))
    };

    match next_line(reader)? {
        Some(magic) if magic.trim() == "ply" => {}
        _ => return Err(PlyError::Format("missing \"ply\" magic".to_string())),
    }

    let mut format = None;
    let mut version = String::new();
    let mut comments = Vec::new();
    let mut obj_info = Vec::new();
    let mut elements: Vec<ElementDecl> = Vec::new();

    loop {
        let Some(text) = next_line(reader)? else {
            return Err(PlyError::Format("unexpected end of file before end_header".to_string()));
        };
        let mut tokens = text.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };

        match keyword {
            "format" => {
                let name = tokens.next().unwrap_or_default();
                format = Some(
                    PlyFormat::parse(name)
                        .ok_or_else(|| PlyError::Format(format!("unsupported format \"{name}\"")))?,
                );
                version = tokens.next().unwrap_or("1.0").to_string();
            }
            "comment" => comments.push(rest_of_line(&text, keyword)),
            "obj_info" => obj_info.push(rest_of_line(&text, keyword)),
            "element" => {
                let (Some(name), Some(count)) = (tokens.next(), tokens.next()) else {
                    return Err(PlyError::Format(format!("incomplete element line \"{text}\"")));
                };
                let count = count
                    .parse::<usize>()
                    .map_err(|_| PlyError::Format(format!("invalid count for element \"{name}\"")))?;
                elements.push(ElementDecl {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            "property" => {
                let Some(element) = elements.last_mut() else {
                    return Err(PlyError::Format("property declared before any element".to_string()));
                };
                let decl = parse_property(tokens.collect::<Vec<_>>().as_slice())
                    .ok_or_else(|| PlyError::Format(format!("invalid property line \"{text}\"")))?;
                element.properties.push(decl);
            }
            "end_header" => break,
            other => {
                return Err(PlyError::Format(format!("unknown header keyword \"{other}\"")));
            }
        }
    }

    let format = format.ok_or_else(|| PlyError::Format("missing format line".to_string()))?;
    Ok(PlyHeader {
        format,
        version,
        comments,
        obj_info,
        elements,
    })
}

fn rest_of_line(text: &str, keyword: &str) -> String {
    text.trim_start()
        .strip_prefix(keyword)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn parse_property(tokens: &[&str]) -> Option<PropertyDecl> {
    match tokens {
        ["list", count, item, name] => {
            let count = ScalarType::parse(count)?;
            if !count.is_integer() {
                return None;
            }
            Some(PropertyDecl {
                name: (*name).to_string(),
                kind: PropertyKind::List {
                    count,
                    item: ScalarType::parse(item)?,
                },
            })
        }
        [ty, name] => Some(PropertyDecl {
            name: (*name).to_string(),
            kind: PropertyKind::Scalar(ScalarType::parse(ty)?),
        }),
        _ => None,
    }
}

enum DecodeError {
    Io(io::Error),
    Eof,
    Malformed(String),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Eof
        } else {
            Self::Io(err)
        }
    }
}

enum Decoder {
    Ascii { token: Vec<u8> },
    Little,
    Big,
}

impl Decoder {
    fn new(format: PlyFormat) -> Self {
        match format {
            PlyFormat::Ascii => Self::Ascii { token: Vec::new() },
            PlyFormat::BinaryLittleEndian => Self::Little,
            PlyFormat::BinaryBigEndian => Self::Big,
        }
    }

    fn scalar<R: BufRead>(&mut self, reader: &mut R, ty: ScalarType) -> Result<f64, DecodeError> {
        match self {
            Self::Ascii { token } => ascii_scalar(reader, token, ty),
            Self::Little => Ok(binary_scalar::<LittleEndian, R>(reader, ty)?),
            Self::Big => Ok(binary_scalar::<BigEndian, R>(reader, ty)?),
        }
    }
}

fn binary_scalar<B: ByteOrder, R: Read>(reader: &mut R, ty: ScalarType) -> io::Result<f64> {
    Ok(match ty {
        ScalarType::Int8 => f64::from(reader.read_i8()?),
        ScalarType::UInt8 => f64::from(reader.read_u8()?),
        ScalarType::Int16 => f64::from(reader.read_i16::<B>()?),
        ScalarType::UInt16 => f64::from(reader.read_u16::<B>()?),
        ScalarType::Int32 => f64::from(reader.read_i32::<B>()?),
        ScalarType::UInt32 => f64::from(reader.read_u32::<B>()?),
        ScalarType::Float32 => f64::from(reader.read_f32::<B>()?),
        ScalarType::Float64 => reader.read_f64::<B>()?,
    })
}

fn ascii_scalar<R: BufRead>(reader: &mut R, token: &mut Vec<u8>, ty: ScalarType) -> Result<f64, DecodeError> {
    next_ascii_token(reader, token)?;
    if token.is_empty() {
        return Err(DecodeError::Eof);
    }
    let text = std::str::from_utf8(token)
        .map_err(|_| DecodeError::Malformed("non-ASCII value".to_string()))?;

    if ty.is_integer() {
        let value = text
            .parse::<i64>()
            .map_err(|_| DecodeError::Malformed(format!("\"{text}\" is not a valid {}", ty.name())))?;
        let (lo, hi) = ty.integer_range();
        if value < lo || value > hi {
            return Err(DecodeError::Malformed(format!("{value} is out of range for {}", ty.name())));
        }
        Ok(value as f64)
    } else {
        text.parse::<f64>()
            .map_err(|_| DecodeError::Malformed(format!("\"{text}\" is not a valid {}", ty.name())))
    }
}

fn next_ascii_token<R: BufRead>(reader: &mut R, token: &mut Vec<u8>) -> io::Result<()> {
    token.clear();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(());
        }
        let mut used = 0;
        let mut done = false;
        for &byte in buf {
            used += 1;
            if byte.is_ascii_whitespace() {
                if token.is_empty() {
                    continue;
                }
                done = true;
                break;
            }
            token.push(byte);
        }
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    const ASCII_TRIANGLE: &str = "ply\n\
format ascii 1.0\n\
comment made by hand\n\
element vertex 3\n\
property float x\n\
property float y\n\
property float z\n\
property uchar red\n\
element face 1\n\
property list uchar int vertex_indices\n\
end_header\n\
0 0 0 255\n\
1 0 0 128\n\
0 1 0 0\n\
3 0 1 2\n";

    fn collect_all(data: &[u8]) -> Result<Vec<(String, usize, Vec<f64>)>, PlyError> {
        let reader = PlyReader::new(data)?;
        let header = reader.header().clone();
        let mut table = BindingTable::new(&header);
        for (ei, element) in header.elements.iter().enumerate() {
            for (pi, prop) in element.properties.iter().enumerate() {
                table.bind(
                    PropertySlot {
                        element: ei,
                        property: pi,
                    },
                    format!("{}.{}", element.name, prop.name),
                );
            }
        }
        let mut out = Vec::new();
        reader.read_records(&table, |name, pos, value| {
            let values = match value {
                PropertyValue::Scalar(v) => vec![v],
                PropertyValue::List(items) => items.to_vec(),
            };
            out.push((name.clone(), pos.instance, values));
            Ok(())
        })?;
        Ok(out)
    }

    #[test]
    fn parses_header_declarations() {
        let reader = PlyReader::new(ASCII_TRIANGLE.as_bytes()).unwrap();
        let header = reader.header();
        assert_eq!(header.format, PlyFormat::Ascii);
        assert_eq!(header.version, "1.0");
        assert_eq!(header.comments, vec!["made by hand".to_string()]);
        assert_eq!(header.element_count("vertex"), 3);
        assert_eq!(header.element_count("face"), 1);
        assert_eq!(header.element_count("edge"), 0);

        let (slot, decl) = header.find_property("face", "vertex_indices").unwrap();
        assert_eq!(slot, PropertySlot { element: 1, property: 0 });
        assert_eq!(
            decl.kind,
            PropertyKind::List {
                count: ScalarType::UInt8,
                item: ScalarType::Int32
            }
        );
        assert_eq!(decl.kind.to_string(), "list uchar int");
        assert!(header.find_property("vertex", "nx").is_none());
    }

    #[test]
    fn only_bound_properties_reach_the_handler() {
        let reader = PlyReader::new(ASCII_TRIANGLE.as_bytes()).unwrap();
        let mut table = BindingTable::new(reader.header());
        let (slot, _) = reader.header().find_property("vertex", "y").unwrap();
        table.bind(slot, ());
        assert_eq!(table.bound_count(), 1);

        let mut seen = Vec::new();
        reader
            .read_records(&table, |_, pos, value| {
                seen.push((pos.instance, value == PropertyValue::Scalar(1.0)));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(0, false), (1, false), (2, true)]);
    }

    #[test]
    fn decodes_ascii_lists() {
        let records = collect_all(ASCII_TRIANGLE.as_bytes()).unwrap();
        let face = records
            .iter()
            .find(|(name, _, _)| name == "face.vertex_indices")
            .unwrap();
        assert_eq!(face.2, vec![0.0, 1.0, 2.0]);
        assert_eq!(records.len(), 3 * 4 + 1);
    }

    fn binary_triangle<B: ByteOrder>(format: &str) -> Vec<u8> {
        let mut bytes = format!(
            "ply\nformat {format} 1.0\nelement vertex 3\nproperty float x\nproperty float y\n\
             property float z\nproperty uchar red\nelement face 1\n\
             property list uchar int vertex_indices\nend_header\n"
        )
        .into_bytes();
        for (p, red) in [([0.0f32, 0.0, 0.0], 255u8), ([1.0, 0.0, 0.0], 128), ([0.0, 1.0, 0.0], 0)] {
            for c in p {
                bytes.write_f32::<B>(c).unwrap();
            }
            bytes.write_u8(red).unwrap();
        }
        bytes.write_u8(3).unwrap();
        for i in [0i32, 1, 2] {
            bytes.write_i32::<B>(i).unwrap();
        }
        bytes
    }

    #[test]
    fn binary_formats_match_ascii() {
        let ascii = collect_all(ASCII_TRIANGLE.as_bytes()).unwrap();
        let little = collect_all(&binary_triangle::<LittleEndian>("binary_little_endian")).unwrap();
        let big = collect_all(&binary_triangle::<BigEndian>("binary_big_endian")).unwrap();
        assert_eq!(ascii, little);
        assert_eq!(ascii, big);
    }

    #[test]
    fn truncated_body_is_data_error() {
        let text = ASCII_TRIANGLE.trim_end_matches("3 0 1 2\n");
        let err = collect_all(text.as_bytes()).unwrap_err();
        match err {
            PlyError::Data {
                element, instance, ..
            } => {
                assert_eq!(element, "face");
                assert_eq!(instance, 0);
            }
            other => panic!("expected data error, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_integer_is_data_error() {
        let text = ASCII_TRIANGLE.replace("1 0 0 128", "1 0 0 300");
        let err = collect_all(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }

    #[test]
    fn handler_rejection_carries_context() {
        let reader = PlyReader::new(ASCII_TRIANGLE.as_bytes()).unwrap();
        let mut table = BindingTable::new(reader.header());
        let (slot, _) = reader.header().find_property("face", "vertex_indices").unwrap();
        table.bind(slot, ());
        let err = reader
            .read_records(&table, |_, _, _| Err("nope".to_string()))
            .unwrap_err();
        assert_eq!(err.to_string(), "face[0].vertex_indices: nope");
    }

    #[test]
    fn header_errors() {
        assert!(matches!(
            PlyReader::new("plx\n".as_bytes()),
            Err(PlyError::Format(_))
        ));
        assert!(matches!(
            PlyReader::new("ply\nformat ascii 1.0\nelement vertex 1\n".as_bytes()),
            Err(PlyError::Format(_))
        ));
        assert!(matches!(
            PlyReader::new("ply\nformat ascii 1.0\nproperty float x\nend_header\n".as_bytes()),
            Err(PlyError::Format(_))
        ));
        assert!(matches!(
            PlyReader::new("ply\nformat binary_middle_endian 1.0\nend_header\n".as_bytes()),
            Err(PlyError::Format(_))
        ));
        assert!(matches!(
            PlyReader::new("ply\nelement vertex 1\nproperty quad x\nend_header\n".as_bytes()),
            Err(PlyError::Format(_))
        ));
    }

    #[test]
    fn crlf_header_is_accepted() {
        let text = ASCII_TRIANGLE.replace('\n', "\r\n");
        let records = collect_all(text.as_bytes()).unwrap();
        assert_eq!(records.len(), 13);
    }
}
