//! Object serialization

use std::io::Write;

use crate::error::PdfResult;
use super::lexer::{is_delimiter, is_whitespace};
use super::{Dictionary, Object, ObjectId, Stream, StringFormat};

/// Format a real without exponent, in the shortest form that reads back
/// to the same value
///
/// The decimal point is always kept so the value stays a real on reload.
pub fn format_real(value: f64) -> String {
    if !value.is_finite() {
        return "0.0".to_string();
    }
    let value = if value == 0.0 { 0.0 } else { value };
    let mut text = value.to_string();
    if !text.contains('.') {
        text.push_str(".0");
    }
    text
}

fn write_name<W: Write>(out: &mut W, name: &[u8]) -> PdfResult<()> {
    out.write_all(b"/")?;
    for &byte in name {
        if byte == b'#' || is_delimiter(byte) || is_whitespace(byte) || !(0x21..=0x7e).contains(&byte) {
            write!(out, "#{:02X}", byte)?;
        } else {
            out.write_all(&[byte])?;
        }
    }
    Ok(())
}

fn write_string<W: Write>(out: &mut W, bytes: &[u8], format: StringFormat) -> PdfResult<()> {
    match format {
        StringFormat::Hexadecimal => {
            out.write_all(b"<")?;
            out.write_all(hex::encode_upper(bytes).as_bytes())?;
            out.write_all(b">")?;
        }
        StringFormat::Literal => {
            out.write_all(b"(")?;
            for &byte in bytes {
                match byte {
                    b'(' | b')' | b'\\' => out.write_all(&[b'\\', byte])?,
                    b'\r' => out.write_all(b"\\r")?,
                    _ => out.write_all(&[byte])?,
                }
            }
            out.write_all(b")")?;
        }
    }
    Ok(())
}

fn write_dictionary<W: Write>(out: &mut W, dict: &Dictionary, skip_length: bool) -> PdfResult<()> {
    out.write_all(b"<<")?;
    for (key, value) in dict {
        if skip_length && key.as_slice() == b"Length" {
            continue;
        }
        write_name(out, key)?;
        out.write_all(b" ")?;
        write_object(out, value)?;
    }
    out.write_all(b">>")?;
    Ok(())
}

/// Write a stream with `/Length` set from the bytes actually written
fn write_stream<W: Write>(out: &mut W, stream: &Stream) -> PdfResult<()> {
    out.write_all(b"<<")?;
    write!(out, "/Length {}", stream.raw().len())?;
    let mut rest = Vec::new();
    write_dictionary(&mut rest, &stream.dict, true)?;
    // Drop the "<<" ">>" of the remaining entries and splice them in
    out.write_all(&rest[2..rest.len() - 2])?;
    out.write_all(b">>\nstream\n")?;
    out.write_all(stream.raw())?;
    out.write_all(b"\nendstream")?;
    Ok(())
}

/// Serialize one object in PDF syntax
pub fn write_object<W: Write>(out: &mut W, object: &Object) -> PdfResult<()> {
    match object {
        Object::Null => out.write_all(b"null")?,
        Object::Boolean(value) => out.write_all(if *value { b"true" } else { b"false" })?,
        Object::Integer(value) => write!(out, "{}", value)?,
        Object::Real(value) => out.write_all(format_real(*value).as_bytes())?,
        Object::String(bytes, format) => write_string(out, bytes, *format)?,
        Object::Name(name) => write_name(out, name)?,
        Object::Array(items) => {
            out.write_all(b"[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.write_all(b" ")?;
                }
                write_object(out, item)?;
            }
            out.write_all(b"]")?;
        }
        Object::Dictionary(dict) => write_dictionary(out, dict, false)?,
        Object::Stream(stream) => write_stream(out, stream)?,
        Object::Reference(id) => write!(out, "{} {} R", id.number, id.generation)?,
    }
    Ok(())
}

/// Write `n g obj ... endobj`
pub fn write_indirect_object<W: Write>(out: &mut W, id: ObjectId, object: &Object) -> PdfResult<()> {
    write!(out, "{} {} obj\n", id.number, id.generation)?;
    write_object(out, object)?;
    out.write_all(b"\nendobj\n")?;
    Ok(())
}

/// Serialize an object into a fresh buffer
pub fn to_bytes(object: &Object) -> PdfResult<Vec<u8>> {
    let mut out = Vec::new();
    write_object(&mut out, object)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use crate::pdf::parser::parse_object;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test_log::test]
    fn test_reals_keep_their_value() {
        assert_eq!(format_real(0.3), "0.3");
        assert_eq!(format_real(1.0), "1.0");
        assert_eq!(format_real(-0.0), "0.0");
        assert_eq!(format_real(612.25), "612.25");
        assert_eq!(format_real(1e-7), "0.0000001");
        assert_eq!(format_real(1e21), "1000000000000000000000.0");
    }

    #[rstest]
    #[case(1.0)]
    #[case(0.1234567)]
    #[case(-42.000001)]
    #[case(1e-7)]
    #[case(123456789.125)]
    fn test_reals_read_back_as_reals(#[case] value: f64) -> PdfResult<()> {
        let bytes = to_bytes(&Object::Real(value))?;
        assert_eq!(parse_object(&bytes)?, Object::Real(value));
        Ok(())
    }

    #[test_log::test]
    fn test_dictionary_keeps_key_order() -> PdfResult<()> {
        let dict = dictionary! {
            "Type" => "Annot",
            "Rect" => vec![Object::Integer(0), Object::Real(1.5)],
            "Contents" => Object::string_literal("a (b) \\"),
            "P" => ObjectId::new(3, 0),
        };
        let bytes = to_bytes(&Object::Dictionary(dict))?;
        assert_eq!(
            String::from_utf8_lossy(&bytes),
            "<</Type /Annot/Rect [0 1.5]/Contents (a \\(b\\) \\\\)/P 3 0 R>>"
        );
        Ok(())
    }

    #[test_log::test]
    fn test_names_and_hex_strings_read_back() -> PdfResult<()> {
        let object = Object::Array(vec![
            Object::Name(b"A B#".to_vec()),
            Object::String(vec![0xfe, 0xff, 0x00, 0x41], StringFormat::Hexadecimal),
            Object::string_literal(b"line\rbreak".to_vec()),
        ]);
        let bytes = to_bytes(&object)?;
        assert_eq!(parse_object(&bytes)?, object);
        Ok(())
    }

    #[test_log::test]
    fn test_stream_length_matches_body() -> PdfResult<()> {
        let mut stream = Stream::new(dictionary! { "Length" => ObjectId::new(9, 0) }, b"0 0 m".to_vec());
        stream.dict.set("Length", ObjectId::new(9, 0));

        let mut out = Vec::new();
        write_indirect_object(&mut out, ObjectId::new(4, 0), &Object::Stream(stream))?;
        assert_eq!(
            String::from_utf8_lossy(&out),
            "4 0 obj\n<</Length 5>>\nstream\n0 0 m\nendstream\nendobj\n"
        );
        Ok(())
    }
}
