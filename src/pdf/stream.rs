//! PDF stream object implementation

use log::{trace, warn};
use once_cell::sync::OnceCell;

use crate::error::{PdfError, PdfResult};
use super::{Dictionary, Filter, Object};

/// PDF stream object
///
/// The raw (encoded) bytes are owned by the stream. The decoded body is
/// computed by [`Stream::decoded`] on first request and cached until the
/// stream content is replaced.
#[derive(Debug, Clone)]
pub struct Stream {
    /// Stream dictionary
    pub dict: Dictionary,
    /// Raw stream data, exactly as stored in the file
    raw: Vec<u8>,
    /// Decoded stream data
    decoded: OnceCell<Vec<u8>>,
    /// Offset of the first data byte in the source file
    start_offset: Option<usize>,
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.dict == other.dict && self.raw == other.raw
    }
}

impl Stream {
    /// Create new stream object from encoded bytes
    pub fn new(mut dict: Dictionary, raw: Vec<u8>) -> Self {
        dict.set("Length", raw.len());
        Self {
            dict,
            raw,
            decoded: OnceCell::new(),
            start_offset: None,
        }
    }

    /// Create a stream from decoded bytes, Flate-compressed when `level` is set
    pub fn from_content(dict: Dictionary, content: Vec<u8>, level: Option<u32>) -> PdfResult<Self> {
        let mut stream = Self::new(dict, Vec::new());
        stream.set_content(content, level)?;
        Ok(stream)
    }

    pub(crate) fn with_start_offset(mut self, offset: usize) -> Self {
        self.start_offset = Some(offset);
        self
    }

    /// Offset of the stream data in the file it was read from
    pub fn start_offset(&self) -> Option<usize> {
        self.start_offset
    }

    /// Encoded bytes
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Whether the decoded body is already cached
    pub fn is_decoded(&self) -> bool {
        self.decoded.get().is_some()
    }

    /// Filters named by the dictionary, outermost first
    pub fn filters(&self) -> PdfResult<Vec<Filter>> {
        match self.dict.get("Filter") {
            None | Some(Object::Null) => Ok(Vec::new()),
            Some(Object::Name(name)) => Ok(vec![Filter::from_name(&String::from_utf8_lossy(name))?]),
            Some(Object::Array(array)) => array
                .iter()
                .map(|f| {
                    let name = f.as_name()?;
                    Filter::from_name(&String::from_utf8_lossy(name))
                })
                .collect(),
            Some(other) => Err(PdfError::InvalidObjectType {
                expected: "name or array",
                found: other.type_name(),
            }),
        }
    }

    /// Check if the stream data stays encoded with an image codec
    pub fn has_image_codec(&self) -> bool {
        self.filters()
            .map(|filters| filters.iter().any(Filter::is_image_codec))
            .unwrap_or(false)
    }

    /// Decode parameters for filter at `index`
    fn filter_params(&self, index: usize) -> Option<&Dictionary> {
        match self.dict.get("DecodeParms") {
            Some(Object::Dictionary(dict)) if index == 0 => Some(dict),
            Some(Object::Array(array)) => match array.get(index) {
                Some(Object::Dictionary(dict)) => Some(dict),
                _ => None,
            },
            _ => None,
        }
    }

    /// Decoded body, computed on first access and cached
    pub fn decoded(&self) -> PdfResult<&[u8]> {
        self.decoded
            .get_or_try_init(|| self.decode_raw())
            .map(Vec::as_slice)
    }

    fn decode_raw(&self) -> PdfResult<Vec<u8>> {
        let filters = self.filters()?;
        trace!("Decoding stream with {} filters", filters.len());
        let mut data = self.raw.clone();

        for (index, filter) in filters.iter().enumerate() {
            trace!("Applying filter: {:?}", filter);
            data = filter.decode(&data, self.filter_params(index))?;
        }

        Ok(data)
    }

    /// Replace the stream body with decoded `content`
    ///
    /// With a compression level the body is stored Flate-encoded; otherwise it
    /// is stored unfiltered. `/Length` always follows the stored bytes.
    pub fn set_content(&mut self, content: Vec<u8>, level: Option<u32>) -> PdfResult<()> {
        self.dict.remove("DecodeParms");
        match level {
            Some(level) => {
                self.raw = Filter::FlateDecode.encode_with_level(&content, level)?;
                self.dict.set("Filter", "FlateDecode");
            }
            None => {
                self.raw = content.clone();
                self.dict.remove("Filter");
            }
        }
        self.dict.set("Length", self.raw.len());
        self.decoded = OnceCell::new();
        if self.decoded.set(content).is_err() {
            warn!("Decoded stream cache was unexpectedly filled");
        }
        Ok(())
    }

    /// Replace the encoded bytes, keeping the declared filters
    pub fn set_raw(&mut self, raw: Vec<u8>) {
        self.raw = raw;
        self.dict.set("Length", self.raw.len());
        self.decoded = OnceCell::new();
    }
}
