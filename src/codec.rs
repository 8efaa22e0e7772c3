//! Protobuf wire-format primitives.
//!
//! Unified performance data is stored with the protobuf wire encoding. The
//! schema is small and fixed, so instead of generated code the decoder walks
//! fields directly: read a tag, dispatch on the field number, skip anything
//! unknown. [`WireReader`] works over a fully loaded buffer and never mutates
//! it, so a failed decode attempt leaves nothing behind for the next one.

use std::fmt;

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_LEN: u8 = 2;
pub const WIRE_FIXED32: u8 = 5;

/// Errors produced while decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended in the middle of a value.
    Truncated { offset: usize },
    /// A varint was longer than ten bytes.
    VarintTooLong { offset: usize },
    /// Field number zero, or a wire type this codec does not support.
    BadTag { offset: usize, tag: u64 },
    /// A known field appeared with an unexpected wire type.
    WrongWireType {
        message: &'static str,
        field: u32,
        wire_type: u8,
    },
    /// A string field is not valid UTF-8.
    InvalidUtf8 { message: &'static str, field: u32 },
    /// An enum field carries a value outside its range.
    InvalidEnum {
        message: &'static str,
        field: u32,
        value: u64,
    },
    /// A record failed validation after decoding.
    InvalidRecord(String),
    /// The buffer decoded to nothing.
    Empty,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { offset } => write!(f, "truncated input at byte {offset}"),
            DecodeError::VarintTooLong { offset } => {
                write!(f, "varint too long at byte {offset}")
            }
            DecodeError::BadTag { offset, tag } => {
                write!(f, "invalid field tag {tag:#x} at byte {offset}")
            }
            DecodeError::WrongWireType {
                message,
                field,
                wire_type,
            } => write!(
                f,
                "{message}.{field}: unexpected wire type {wire_type}"
            ),
            DecodeError::InvalidUtf8 { message, field } => {
                write!(f, "{message}.{field}: string is not valid UTF-8")
            }
            DecodeError::InvalidEnum {
                message,
                field,
                value,
            } => write!(f, "{message}.{field}: invalid enum value {value}"),
            DecodeError::InvalidRecord(msg) => write!(f, "invalid record: {msg}"),
            DecodeError::Empty => write!(f, "no records decoded"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Cursor over an in-memory protobuf message.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read a base-128 varint.
    pub fn read_varint(&mut self) -> DecodeResult<u64> {
        let start = self.pos;
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(DecodeError::Truncated { offset: self.pos })?;
            self.pos += 1;
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                return Err(DecodeError::VarintTooLong { offset: start });
            }
        }
    }

    /// Read a field tag, returning `(field_number, wire_type)`.
    pub fn read_tag(&mut self) -> DecodeResult<(u32, u8)> {
        let offset = self.pos;
        let tag = self.read_varint()?;
        let wire_type = (tag & 0x07) as u8;
        let field = tag >> 3;
        if field == 0 || field > u32::MAX as u64 {
            return Err(DecodeError::BadTag { offset, tag });
        }
        Ok((field as u32, wire_type))
    }

    fn take(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Read the payload of a length-delimited field.
    pub fn read_bytes(&mut self) -> DecodeResult<&'a [u8]> {
        let len = self.read_varint()? as usize;
        self.take(len)
    }

    pub fn read_fixed64(&mut self) -> DecodeResult<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_double(&mut self) -> DecodeResult<f64> {
        Ok(f64::from_bits(self.read_fixed64()?))
    }

    /// Skip a field based on its wire type. Groups are not supported.
    pub fn skip_field(&mut self, wire_type: u8) -> DecodeResult<()> {
        let offset = self.pos;
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                self.take(8)?;
            }
            WIRE_LEN => {
                self.read_bytes()?;
            }
            WIRE_FIXED32 => {
                self.take(4)?;
            }
            _ => {
                return Err(DecodeError::BadTag {
                    offset,
                    tag: wire_type as u64,
                })
            }
        }
        Ok(())
    }
}

/// Check that a known field arrived with the wire type the schema expects.
pub fn expect_wire(
    message: &'static str,
    field: u32,
    wire_type: u8,
    expected: u8,
) -> DecodeResult<()> {
    if wire_type == expected {
        Ok(())
    } else {
        Err(DecodeError::WrongWireType {
            message,
            field,
            wire_type,
        })
    }
}

/// Decode a UTF-8 string payload.
pub fn utf8(message: &'static str, field: u32, bytes: &[u8]) -> DecodeResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| DecodeError::InvalidUtf8 { message, field })
}

/// Append a varint to `buf`.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Builder for protobuf wire messages.
#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn tag(&mut self, field: u32, wire_type: u8) {
        write_varint(&mut self.buf, ((field as u64) << 3) | wire_type as u64);
    }

    /// Write a varint field. Zero values are omitted, as proto3 does.
    pub fn varint(&mut self, field: u32, value: u64) -> &mut Self {
        if value != 0 {
            self.tag(field, WIRE_VARINT);
            write_varint(&mut self.buf, value);
        }
        self
    }

    pub fn double(&mut self, field: u32, value: f64) -> &mut Self {
        if value.to_bits() != 0 {
            self.tag(field, WIRE_FIXED64);
            self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
        }
        self
    }

    pub fn bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        self.tag(field, WIRE_LEN);
        write_varint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    /// Write a string field. Empty strings are omitted.
    pub fn string(&mut self, field: u32, value: &str) -> &mut Self {
        if !value.is_empty() {
            self.bytes(field, value.as_bytes());
        }
        self
    }

    /// Write an embedded message field, always present even when empty.
    pub fn message(&mut self, field: u32, build: impl FnOnce(&mut WireWriter)) -> &mut Self {
        let mut inner = WireWriter::new();
        build(&mut inner);
        self.bytes(field, &inner.buf)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
