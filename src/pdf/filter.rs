//! PDF stream filters

use std::fmt;
use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{trace, warn};
use weezl::{decode::Decoder as LzwDecoder, encode::Encoder as LzwEncoder, BitOrder};

use crate::error::{PdfError, PdfResult};
use super::Dictionary;

const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// PDF stream filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    ASCII85Decode,
    ASCIIHexDecode,
    CCITTFaxDecode,
    DCTDecode,
    FlateDecode,
    JBIG2Decode,
    JPXDecode,
    LZWDecode,
    RunLengthDecode,
}

/// Filter processing context
#[derive(Debug, Clone)]
struct FilterContext {
    predictor: Option<PredictorParams>,
    early_change: bool,
}

impl Default for FilterContext {
    fn default() -> Self {
        Self {
            predictor: None,
            early_change: true,
        }
    }
}

/// Predictor parameters
#[derive(Debug, Clone)]
struct PredictorParams {
    predictor: i64,
    columns: usize,
    colors: usize,
    bits_per_component: usize,
}

impl PredictorParams {
    /// Bytes per pixel and bytes per row, when both are addressable and a row fits in `available`
    fn row_layout(&self, available: usize) -> PdfResult<(usize, usize)> {
        let bits_per_pixel = self.colors.checked_mul(self.bits_per_component);
        let row_bits = bits_per_pixel.and_then(|bits| bits.checked_mul(self.columns));
        match (bits_per_pixel, row_bits) {
            (Some(pixel), Some(row)) if row.div_ceil(8) <= available => Ok((pixel.div_ceil(8).max(1), row.div_ceil(8))),
            _ => Err(PdfError::compression(format!(
                "predictor row of {} columns x {} colors x {} bits exceeds {} bytes of data",
                self.columns, self.colors, self.bits_per_component, available
            ))),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Filter {
    /// Create filter from a stream `/Filter` name or an inline-image abbreviation
    pub fn from_name(name: &str) -> PdfResult<Self> {
        match name {
            "ASCII85Decode" | "A85" => Ok(Filter::ASCII85Decode),
            "ASCIIHexDecode" | "AHx" => Ok(Filter::ASCIIHexDecode),
            "CCITTFaxDecode" | "CCF" => Ok(Filter::CCITTFaxDecode),
            "DCTDecode" | "DCT" => Ok(Filter::DCTDecode),
            "FlateDecode" | "Fl" => Ok(Filter::FlateDecode),
            "JBIG2Decode" => Ok(Filter::JBIG2Decode),
            "JPXDecode" => Ok(Filter::JPXDecode),
            "LZWDecode" | "LZW" => Ok(Filter::LZWDecode),
            "RunLengthDecode" | "RL" => Ok(Filter::RunLengthDecode),
            _ => Err(PdfError::UnsupportedFilter(name.to_string())),
        }
    }

    /// Canonical filter name
    pub fn name(&self) -> &'static str {
        match self {
            Filter::ASCII85Decode => "ASCII85Decode",
            Filter::ASCIIHexDecode => "ASCIIHexDecode",
            Filter::CCITTFaxDecode => "CCITTFaxDecode",
            Filter::DCTDecode => "DCTDecode",
            Filter::FlateDecode => "FlateDecode",
            Filter::JBIG2Decode => "JBIG2Decode",
            Filter::JPXDecode => "JPXDecode",
            Filter::LZWDecode => "LZWDecode",
            Filter::RunLengthDecode => "RunLengthDecode",
        }
    }

    /// Image codecs are passed through undecoded
    pub fn is_image_codec(&self) -> bool {
        matches!(self,
            Filter::CCITTFaxDecode |
            Filter::DCTDecode |
            Filter::JBIG2Decode |
            Filter::JPXDecode
        )
    }

    /// Process filter parameters
    fn context(&self, params: Option<&Dictionary>) -> FilterContext {
        let mut ctx = FilterContext::default();

        if let Some(params) = params {
            if let Some(predictor) = params.get_integer("Predictor").filter(|p| *p > 1) {
                ctx.predictor = Some(PredictorParams {
                    predictor,
                    columns: params.get_integer("Columns").unwrap_or(1).max(1) as usize,
                    colors: params.get_integer("Colors").unwrap_or(1).max(1) as usize,
                    bits_per_component: params.get_integer("BitsPerComponent").unwrap_or(8).max(1) as usize,
                });
            }
            if *self == Filter::LZWDecode {
                ctx.early_change = params.get_integer("EarlyChange").unwrap_or(1) != 0;
            }
        }

        ctx
    }

    /// Decode data using this filter
    pub fn decode(&self, data: &[u8], params: Option<&Dictionary>) -> PdfResult<Vec<u8>> {
        let ctx = self.context(params);
        let result = match self {
            Filter::ASCII85Decode => decode_ascii85(data)?,
            Filter::ASCIIHexDecode => decode_ascii_hex(data)?,
            Filter::FlateDecode => decode_flate(data)?,
            Filter::LZWDecode => decode_lzw(data, ctx.early_change)?,
            Filter::RunLengthDecode => decode_run_length(data),
            _ => return Err(PdfError::UnsupportedFilter(self.to_string())),
        };

        match ctx.predictor {
            Some(predictor) if matches!(self, Filter::FlateDecode | Filter::LZWDecode) => {
                apply_predictor(&result, &predictor)
            }
            _ => Ok(result),
        }
    }

    /// Encode data using this filter with the default compression level
    pub fn encode(&self, data: &[u8]) -> PdfResult<Vec<u8>> {
        self.encode_with_level(data, DEFAULT_COMPRESSION_LEVEL)
    }

    /// Encode data; `level` only affects Flate
    pub fn encode_with_level(&self, data: &[u8], level: u32) -> PdfResult<Vec<u8>> {
        match self {
            Filter::ASCII85Decode => Ok(encode_ascii85(data)),
            Filter::ASCIIHexDecode => Ok(encode_ascii_hex(data)),
            Filter::FlateDecode => encode_flate(data, level),
            Filter::LZWDecode => LzwEncoder::with_tiff_size_switch(BitOrder::Msb, 8)
                .encode(data)
                .map_err(PdfError::compression),
            Filter::RunLengthDecode => Ok(encode_run_length(data)),
            _ => Err(PdfError::UnsupportedFilter(self.to_string())),
        }
    }
}

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' | b'\0')
}

// ASCII85
fn decode_ascii85(data: &[u8]) -> PdfResult<Vec<u8>> {
    let body = data.strip_prefix(b"<~").unwrap_or(data);
    let mut output = Vec::with_capacity(body.len() * 4 / 5);
    let mut group = [0u32; 5];
    let mut count = 0;

    for &byte in body {
        match byte {
            b'~' => break,
            b'z' if count == 0 => output.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[count] = (byte - b'!') as u32;
                count += 1;
                if count == 5 {
                    let value = group.iter().fold(0u64, |acc, &d| acc * 85 + d as u64);
                    if value > u32::MAX as u64 {
                        return Err(PdfError::compression("ASCII85 group overflow"));
                    }
                    output.extend_from_slice(&(value as u32).to_be_bytes());
                    count = 0;
                }
            }
            b if is_whitespace(b) => continue,
            other => {
                return Err(PdfError::compression(format!(
                    "invalid ASCII85 character 0x{:02x}",
                    other
                )))
            }
        }
    }

    if count == 1 {
        return Err(PdfError::compression("ASCII85 final group too short"));
    }
    if count > 1 {
        for digit in group.iter_mut().skip(count) {
            *digit = 84;
        }
        let value = group.iter().fold(0u64, |acc, &d| acc * 85 + d as u64) as u32;
        output.extend_from_slice(&value.to_be_bytes()[..count - 1]);
    }

    Ok(output)
}

fn encode_ascii85(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() * 5 / 4 + 2);

    for chunk in data.chunks(4) {
        let mut bytes = [0u8; 4];
        bytes[..chunk.len()].copy_from_slice(chunk);
        let mut value = u32::from_be_bytes(bytes);

        if chunk.len() == 4 && value == 0 {
            output.push(b'z');
            continue;
        }

        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            *digit = (value % 85) as u8 + b'!';
            value /= 85;
        }
        output.extend_from_slice(&digits[..chunk.len() + 1]);
    }

    output.extend_from_slice(b"~>");
    output
}

// ASCIIHex
fn decode_ascii_hex(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;

    for &byte in data {
        let nibble = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            b'>' => break,
            b if is_whitespace(b) => continue,
            other => {
                return Err(PdfError::compression(format!(
                    "invalid hex digit 0x{:02x}",
                    other
                )))
            }
        };
        match high.take() {
            Some(h) => output.push(h << 4 | nibble),
            None => high = Some(nibble),
        }
    }

    // Odd number of digits: the last one is followed by an implicit 0
    if let Some(h) = high {
        output.push(h << 4);
    }

    Ok(output)
}

fn encode_ascii_hex(data: &[u8]) -> Vec<u8> {
    let mut output = hex::encode_upper(data).into_bytes();
    output.push(b'>');
    output
}

// RunLength
fn decode_run_length(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        let length = data[i];
        i += 1;
        match length {
            128 => break,
            0..=127 => {
                let end = (i + length as usize + 1).min(data.len());
                output.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                if let Some(&byte) = data.get(i) {
                    output.extend(std::iter::repeat(byte).take(257 - length as usize));
                }
                i += 1;
            }
        }
    }

    output
}

fn encode_run_length(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 128 + 1);
    let mut i = 0;

    while i < data.len() {
        let mut run = 1;
        while i + run < data.len() && data[i + run] == data[i] && run < 128 {
            run += 1;
        }

        if run > 1 {
            output.push((257 - run) as u8);
            output.push(data[i]);
            i += run;
            continue;
        }

        let start = i;
        while i < data.len()
            && i - start < 128
            && !(i + 1 < data.len() && data[i + 1] == data[i])
        {
            i += 1;
        }
        if i == start {
            i += 1;
        }
        output.push((i - start - 1) as u8);
        output.extend_from_slice(&data[start..i]);
    }

    output.push(128);
    output
}

// LZW
fn decode_lzw(data: &[u8], early_change: bool) -> PdfResult<Vec<u8>> {
    let mut decoder = if early_change {
        LzwDecoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        LzwDecoder::new(BitOrder::Msb, 8)
    };
    decoder.decode(data).map_err(PdfError::compression)
}

// Flate
fn decode_flate(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 3);
    match ZlibDecoder::new(data).read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(err) if !output.is_empty() => {
            warn!("Flate stream truncated after {} bytes: {}", output.len(), err);
            Ok(output)
        }
        Err(err) => {
            // Some producers omit the zlib header
            trace!("Retrying as raw deflate after: {}", err);
            let mut raw = Vec::new();
            DeflateDecoder::new(data)
                .read_to_end(&mut raw)
                .map_err(|_| PdfError::compression(err))?;
            Ok(raw)
        }
    }
}

fn encode_flate(data: &[u8], level: u32) -> PdfResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

// Predictors
fn apply_predictor(data: &[u8], params: &PredictorParams) -> PdfResult<Vec<u8>> {
    match params.predictor {
        2 => apply_tiff_predictor(data, params),
        10..=15 => apply_png_predictor(data, params),
        other => {
            warn!("Unknown predictor {}, leaving data unchanged", other);
            Ok(data.to_vec())
        }
    }
}

fn apply_tiff_predictor(data: &[u8], params: &PredictorParams) -> PdfResult<Vec<u8>> {
    if params.bits_per_component != 8 {
        warn!("TIFF predictor with {} bits per component is not supported", params.bits_per_component);
        return Ok(data.to_vec());
    }
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let (bpp, row_bytes) = params.row_layout(data.len())?;
    let mut output = data.to_vec();
    for row in output.chunks_mut(row_bytes) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    Ok(output)
}

fn apply_png_predictor(data: &[u8], params: &PredictorParams) -> PdfResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    // Each row carries a leading filter-type byte
    let (bpp, row_bytes) = params.row_layout(data.len() - 1)?;
    let row_size = row_bytes + 1;

    let mut output = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_bytes];

    for row in data.chunks_exact(row_size) {
        let filter_type = row[0];
        let row_data = &row[1..];
        let mut current = vec![0u8; row_bytes];

        for i in 0..row_bytes {
            let left = if i >= bpp { current[i - bpp] } else { 0 };
            let above = prev_row[i];
            let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
            current[i] = match filter_type {
                0 => row_data[i],
                1 => row_data[i].wrapping_add(left),
                2 => row_data[i].wrapping_add(above),
                3 => row_data[i].wrapping_add(((left as u16 + above as u16) / 2) as u8),
                4 => row_data[i].wrapping_add(paeth_predictor(left, above, upper_left)),
                _ => row_data[i],
            };
        }

        output.extend_from_slice(&current);
        prev_row = current;
    }

    Ok(output)
}

fn paeth_predictor(left: u8, above: u8, upper_left: u8) -> u8 {
    let p = left as i32 + above as i32 - upper_left as i32;
    let pa = (p - left as i32).abs();
    let pb = (p - above as i32).abs();
    let pc = (p - upper_left as i32).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        above
    } else {
        upper_left
    }
}
