//! Document information dictionary

use log::debug;

use crate::error::PdfResult;
use crate::pdf::{Dictionary, Object, StringFormat};
use super::Document;

const UTF16_BOM: [u8; 2] = [0xfe, 0xff];

/// Text entries of the `/Info` dictionary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub mod_date: Option<String>,
}

impl DocumentInfo {
    fn fields(&self) -> [(&'static str, &Option<String>); 8] {
        [
            ("Title", &self.title),
            ("Author", &self.author),
            ("Subject", &self.subject),
            ("Keywords", &self.keywords),
            ("Creator", &self.creator),
            ("Producer", &self.producer),
            ("CreationDate", &self.creation_date),
            ("ModDate", &self.mod_date),
        ]
    }

    fn from_dictionary(dict: &Dictionary) -> Self {
        let text = |key| dict.get_string(key).map(decode_text_string);
        Self {
            title: text("Title"),
            author: text("Author"),
            subject: text("Subject"),
            keywords: text("Keywords"),
            creator: text("Creator"),
            producer: text("Producer"),
            creation_date: text("CreationDate"),
            mod_date: text("ModDate"),
        }
    }
}

/// Decode a text string: UTF-16BE with BOM, otherwise single-byte
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&UTF16_BOM) {
        Some(body) => {
            let units: Vec<u16> = body
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        // PDFDocEncoding agrees with Latin-1 for printable text
        None => bytes.iter().map(|b| *b as char).collect(),
    }
}

/// Encode a text string, as ASCII when possible and UTF-16BE otherwise
pub(crate) fn encode_text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = UTF16_BOM.to_vec();
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

impl Document {
    /// Read the document information dictionary
    pub fn info(&self) -> PdfResult<DocumentInfo> {
        match self.trailer.get("Info") {
            Some(info) => Ok(DocumentInfo::from_dictionary(self.resolve_dict(info)?)),
            None => Ok(DocumentInfo::default()),
        }
    }

    /// Update the information dictionary
    ///
    /// Fields set to `None` are left as they are. A missing dictionary is
    /// created as a new indirect object.
    pub fn set_info(&mut self, info: &DocumentInfo) -> PdfResult<()> {
        let info_id = match self.trailer.get_reference("Info") {
            Some(id) => id,
            None => {
                let id = self.add_object(Dictionary::new());
                self.trailer.set("Info", id);
                id
            }
        };

        let dict = self.get_dictionary_mut(info_id)?;
        for (key, value) in info.fields() {
            if let Some(text) = value {
                dict.set(key, encode_text_string(text));
            }
        }
        debug!("Updated document info {}", info_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn test_text_string_encoding() {
        assert_eq!(decode_text_string(b"Plain"), "Plain");
        assert_eq!(decode_text_string(&[0xfe, 0xff, 0x00, 0x48, 0x00, 0xe9]), "H\u{e9}");

        let encoded = encode_text_string("Gr\u{fc}\u{df}e");
        match &encoded {
            Object::String(bytes, StringFormat::Hexadecimal) => {
                assert_eq!(&bytes[..2], &UTF16_BOM);
                assert_eq!(decode_text_string(bytes), "Gr\u{fc}\u{df}e");
            }
            other => panic!("unexpected encoding {:?}", other),
        }
    }

    #[test]
    fn test_set_and_read_info() -> PdfResult<()> {
        let mut doc = Document::new();
        assert_eq!(doc.info()?, DocumentInfo::default());

        let info = DocumentInfo {
            title: Some("Invoice".to_string()),
            producer: Some("pdf-surgeon".to_string()),
            ..DocumentInfo::default()
        };
        doc.set_info(&info)?;
        doc.set_info(&DocumentInfo {
            author: Some("Ana".to_string()),
            ..DocumentInfo::default()
        })?;

        let read = doc.info()?;
        assert_eq!(read.title.as_deref(), Some("Invoice"));
        assert_eq!(read.author.as_deref(), Some("Ana"));
        assert!(doc.trailer().get_reference("Info").is_some());
        Ok(())
    }
}
