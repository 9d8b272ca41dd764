//! Content stream operators

use std::fmt;

use log::warn;

use crate::error::{PdfError, PdfResult};
use crate::pdf::lexer::{is_delimiter, is_whitespace, Token};
use crate::pdf::serialize::write_object;
use crate::pdf::{Dictionary, Object, Parser, StringFormat};

/// Operator name used for an inline image; operands are the image
/// dictionary and the raw image data
pub const INLINE_IMAGE: &str = "BI";

/// One content stream instruction
#[derive(Debug, Clone, PartialEq)]
pub struct ContentOperator {
    pub operator: String,
    pub operands: Vec<Object>,
}

impl ContentOperator {
    pub fn new(operator: impl Into<String>, operands: Vec<Object>) -> Self {
        Self {
            operator: operator.into(),
            operands,
        }
    }

    /// Operands as numbers, when every operand is numeric
    pub fn numbers(&self) -> Option<Vec<f64>> {
        self.operands.iter().map(|o| o.as_f64().ok()).collect()
    }

    /// Append this operator in content stream syntax, with a trailing newline
    pub fn encode(&self, out: &mut Vec<u8>) -> PdfResult<()> {
        if self.operator == INLINE_IMAGE {
            return self.encode_inline_image(out);
        }
        for operand in &self.operands {
            write_object(out, operand)?;
            out.push(b' ');
        }
        out.extend_from_slice(self.operator.as_bytes());
        out.push(b'\n');
        Ok(())
    }

    fn encode_inline_image(&self, out: &mut Vec<u8>) -> PdfResult<()> {
        let (params, data) = match self.operands.as_slice() {
            [Object::Dictionary(params), Object::String(data, _)] => (params, data),
            _ => return Err(PdfError::malformed(0, "inline image needs a dictionary and data")),
        };
        out.extend_from_slice(b"BI");
        for (key, value) in params {
            out.push(b' ');
            write_object(out, &Object::Name(key.clone()))?;
            out.push(b' ');
            write_object(out, value)?;
        }
        out.extend_from_slice(b" ID ");
        out.extend_from_slice(data);
        out.extend_from_slice(b"\nEI\n");
        Ok(())
    }
}

impl fmt::Display for ContentOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = Vec::new();
        self.encode(&mut out).map_err(|_| fmt::Error)?;
        f.write_str(String::from_utf8_lossy(&out).trim_end())
    }
}

/// A content stream body that can be traversed any number of times
#[derive(Debug, Clone, Copy)]
pub struct ContentStream<'a> {
    data: &'a [u8],
}

impl<'a> ContentStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Fresh operator sequence parsed from the start of the stream
    pub fn operators(&self) -> Operators<'a> {
        parse_operators(self.data)
    }
}

/// Lazily parse the operators of `data`
pub fn parse_operators(data: &[u8]) -> Operators<'_> {
    Operators {
        parser: Parser::new(data).without_references(),
        finished: false,
    }
}

/// Lazy sequence of operators; stops after the first error
pub struct Operators<'a> {
    parser: Parser<'a>,
    finished: bool,
}

impl<'a> Operators<'a> {
    fn next_operator(&mut self) -> PdfResult<Option<ContentOperator>> {
        let mut operands = Vec::new();

        loop {
            let token = match self.parser.lexer().next_token()? {
                Some(token) => token,
                None => {
                    if !operands.is_empty() {
                        warn!("Dropping {} operands at end of content stream", operands.len());
                    }
                    return Ok(None);
                }
            };

            match token {
                Token::Keyword(word) if !matches!(word, b"true" | b"false" | b"null") => {
                    let operator = String::from_utf8_lossy(word).into_owned();
                    if operator == INLINE_IMAGE {
                        return self.read_inline_image().map(Some);
                    }
                    return Ok(Some(ContentOperator { operator, operands }));
                }
                token => operands.push(self.parser.parse_token(token, 0)?),
            }
        }
    }

    fn read_inline_image(&mut self) -> PdfResult<ContentOperator> {
        let start = self.parser.position();
        let mut params = Dictionary::new();

        loop {
            match self.parser.lexer().next_token()? {
                Some(Token::Keyword(b"ID")) => break,
                Some(Token::Name(key)) => {
                    let value = self.parser.parse_object()?;
                    params.set(key, value);
                }
                _ => return Err(PdfError::malformed(start, "invalid inline image dictionary")),
            }
        }

        let lexer = self.parser.lexer();
        let data = lexer.data();
        // A single whitespace byte separates ID from the data
        let data_start = (lexer.position() + 1).min(data.len());
        let end = (data_start..data.len().saturating_sub(1))
            .find(|&i| {
                data[i] == b'E'
                    && data[i + 1] == b'I'
                    && i > data_start
                    && is_whitespace(data[i - 1])
                    && data.get(i + 2).map_or(true, |b| is_whitespace(*b) || is_delimiter(*b))
            })
            .ok_or_else(|| PdfError::malformed(start, "inline image without EI"))?;

        let image = data[data_start..end - 1].to_vec();
        lexer.set_position(end + 2);
        Ok(ContentOperator::new(
            INLINE_IMAGE,
            vec![Object::Dictionary(params), Object::String(image, StringFormat::Literal)],
        ))
    }
}

impl Iterator for Operators<'_> {
    type Item = PdfResult<ContentOperator>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_operator() {
            Ok(Some(op)) => Some(Ok(op)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Serialize a sequence of operators
pub fn encode_operators<'a, I>(operators: I) -> PdfResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a ContentOperator>,
{
    let mut out = Vec::new();
    for op in operators {
        op.encode(&mut out)?;
    }
    Ok(out)
}
