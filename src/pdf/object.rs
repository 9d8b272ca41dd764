//! PDF object types

use std::fmt;

use crate::error::{PdfError, PdfResult};
use super::{Dictionary, Stream};

/// Indirect object identifier: object number plus generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub number: u32,
    pub generation: u16,
}

impl ObjectId {
    pub const fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

impl From<(u32, u16)> for ObjectId {
    fn from((number, generation): (u32, u16)) -> Self {
        Self::new(number, generation)
    }
}

/// How a string was spelled in the source, kept for stable serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

/// PDF object
///
/// A `Reference` is never followed implicitly; see
/// [`Document::resolve`](crate::Document::resolve).
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real value
    Real(f64),
    /// String bytes with the spelling they were read with
    String(Vec<u8>, StringFormat),
    /// Name object, without the leading slash and with `#xx` escapes decoded
    Name(Vec<u8>),
    /// Array object
    Array(Vec<Object>),
    /// Dictionary object
    Dictionary(Dictionary),
    /// Stream object
    Stream(Stream),
    /// Indirect reference
    Reference(ObjectId),
}

impl Object {
    /// Name object from text
    pub fn name(name: &str) -> Self {
        Object::Name(name.as_bytes().to_vec())
    }

    /// Literal string object
    pub fn string_literal(text: impl Into<Vec<u8>>) -> Self {
        Object::String(text.into(), StringFormat::Literal)
    }

    /// Type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Boolean(_) => "boolean",
            Object::Integer(_) => "integer",
            Object::Real(_) => "real",
            Object::String(..) => "string",
            Object::Name(_) => "name",
            Object::Array(_) => "array",
            Object::Dictionary(_) => "dictionary",
            Object::Stream(_) => "stream",
            Object::Reference(_) => "reference",
        }
    }

    fn type_error(&self, expected: &'static str) -> PdfError {
        PdfError::InvalidObjectType {
            expected,
            found: self.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> PdfResult<bool> {
        match self {
            Object::Boolean(b) => Ok(*b),
            _ => Err(self.type_error("boolean")),
        }
    }

    pub fn as_i64(&self) -> PdfResult<i64> {
        match self {
            Object::Integer(n) => Ok(*n),
            _ => Err(self.type_error("integer")),
        }
    }

    /// Integer or real coerced to `f64`
    pub fn as_f64(&self) -> PdfResult<f64> {
        match self {
            Object::Integer(n) => Ok(*n as f64),
            Object::Real(n) => Ok(*n),
            _ => Err(self.type_error("number")),
        }
    }

    pub fn as_name(&self) -> PdfResult<&[u8]> {
        match self {
            Object::Name(n) => Ok(n),
            _ => Err(self.type_error("name")),
        }
    }

    /// Name as text; names that are not UTF-8 are reported as a type error
    pub fn as_name_str(&self) -> PdfResult<&str> {
        std::str::from_utf8(self.as_name()?).map_err(|_| self.type_error("UTF-8 name"))
    }

    pub fn as_str(&self) -> PdfResult<&[u8]> {
        match self {
            Object::String(s, _) => Ok(s),
            _ => Err(self.type_error("string")),
        }
    }

    pub fn as_array(&self) -> PdfResult<&Vec<Object>> {
        match self {
            Object::Array(a) => Ok(a),
            _ => Err(self.type_error("array")),
        }
    }

    pub fn as_array_mut(&mut self) -> PdfResult<&mut Vec<Object>> {
        match self {
            Object::Array(a) => Ok(a),
            _ => Err(self.type_error("array")),
        }
    }

    /// Dictionary, or the dictionary of a stream
    pub fn as_dict(&self) -> PdfResult<&Dictionary> {
        match self {
            Object::Dictionary(d) => Ok(d),
            Object::Stream(s) => Ok(&s.dict),
            _ => Err(self.type_error("dictionary")),
        }
    }

    pub fn as_dict_mut(&mut self) -> PdfResult<&mut Dictionary> {
        match self {
            Object::Dictionary(d) => Ok(d),
            Object::Stream(s) => Ok(&mut s.dict),
            _ => Err(self.type_error("dictionary")),
        }
    }

    pub fn as_stream(&self) -> PdfResult<&Stream> {
        match self {
            Object::Stream(s) => Ok(s),
            _ => Err(self.type_error("stream")),
        }
    }

    pub fn as_stream_mut(&mut self) -> PdfResult<&mut Stream> {
        match self {
            Object::Stream(s) => Ok(s),
            _ => Err(self.type_error("stream")),
        }
    }

    pub fn as_reference(&self) -> PdfResult<ObjectId> {
        match self {
            Object::Reference(id) => Ok(*id),
            _ => Err(self.type_error("reference")),
        }
    }

    /// Collect every reference held directly or through nested containers
    pub fn collect_references(&self, out: &mut Vec<ObjectId>) {
        match self {
            Object::Reference(id) => out.push(*id),
            Object::Array(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Object::Dictionary(dict) => dict.collect_references(out),
            Object::Stream(stream) => stream.dict.collect_references(out),
            _ => {}
        }
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Integer(value)
    }
}

impl From<i32> for Object {
    fn from(value: i32) -> Self {
        Object::Integer(value as i64)
    }
}

impl From<u32> for Object {
    fn from(value: u32) -> Self {
        Object::Integer(value as i64)
    }
}

impl From<usize> for Object {
    fn from(value: usize) -> Self {
        Object::Integer(value as i64)
    }
}

impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Object::Real(value)
    }
}

/// Text converts to a name, as in most dictionary values
impl From<&str> for Object {
    fn from(value: &str) -> Self {
        Object::name(value)
    }
}

impl From<ObjectId> for Object {
    fn from(value: ObjectId) -> Self {
        Object::Reference(value)
    }
}

impl From<Vec<Object>> for Object {
    fn from(value: Vec<Object>) -> Self {
        Object::Array(value)
    }
}

impl From<Dictionary> for Object {
    fn from(value: Dictionary) -> Self {
        Object::Dictionary(value)
    }
}

impl From<Stream> for Object {
    fn from(value: Stream) -> Self {
        Object::Stream(value)
    }
}
