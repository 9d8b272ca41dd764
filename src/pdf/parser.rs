//! PDF object parser

use log::{trace, warn};

use crate::config::DEFAULT_MAX_DEPTH;
use crate::error::{PdfError, PdfResult};
use super::lexer::{Lexer, Token};
use super::{Dictionary, Object, ObjectId, Stream, StringFormat};

const ENDSTREAM: &[u8] = b"endstream";

/// Resolves an indirect `/Length` while a stream is being parsed
pub trait LengthResolver {
    fn resolve_length(&self, id: ObjectId) -> Option<i64>;
}

impl<F> LengthResolver for F
where
    F: Fn(ObjectId) -> Option<i64>,
{
    fn resolve_length(&self, id: ObjectId) -> Option<i64> {
        self(id)
    }
}

/// Resolver for contexts where no cross-reference table is available
pub struct NoLengths;

impl LengthResolver for NoLengths {
    fn resolve_length(&self, _id: ObjectId) -> Option<i64> {
        None
    }
}

/// Recursive-descent parser for direct and indirect objects
#[derive(Debug, Clone)]
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    max_depth: usize,
    allow_references: bool,
}

impl<'a> Parser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    /// Parser positioned at `offset`
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self {
            lexer: Lexer::at(data, offset),
            max_depth: DEFAULT_MAX_DEPTH,
            allow_references: true,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Treat `n g R` as three separate tokens, as content streams require
    pub fn without_references(mut self) -> Self {
        self.allow_references = false;
        self
    }

    pub fn position(&self) -> usize {
        self.lexer.position()
    }

    pub fn lexer(&mut self) -> &mut Lexer<'a> {
        &mut self.lexer
    }

    /// Parse one direct object
    pub fn parse_object(&mut self) -> PdfResult<Object> {
        let token = self.expect_token()?;
        self.parse_token(token, 0)
    }

    /// Parse the object that starts with an already-read token
    pub fn parse_token(&mut self, token: Token<'a>, depth: usize) -> PdfResult<Object> {
        let start = self.lexer.token_start();
        match token {
            Token::Integer(value) => Ok(self.maybe_reference(value)),
            Token::Real(value) => Ok(Object::Real(value)),
            Token::Name(name) => Ok(Object::Name(name)),
            Token::LiteralString(bytes) => Ok(Object::String(bytes, StringFormat::Literal)),
            Token::HexString(bytes) => Ok(Object::String(bytes, StringFormat::Hexadecimal)),
            Token::ArrayStart => self.parse_array(start, depth + 1),
            Token::DictStart => self.parse_dictionary(start, depth + 1).map(Object::Dictionary),
            Token::Keyword(b"true") => Ok(Object::Boolean(true)),
            Token::Keyword(b"false") => Ok(Object::Boolean(false)),
            Token::Keyword(b"null") => Ok(Object::Null),
            Token::Keyword(word) => Err(PdfError::malformed(
                start,
                format!("unexpected keyword '{}'", String::from_utf8_lossy(word)),
            )),
            Token::ArrayEnd | Token::DictEnd => {
                Err(PdfError::malformed(start, "unexpected closing delimiter"))
            }
        }
    }

    fn expect_token(&mut self) -> PdfResult<Token<'a>> {
        self.lexer
            .next_token()?
            .ok_or_else(|| PdfError::malformed(self.lexer.position(), "unexpected end of data"))
    }

    fn check_depth(&self, start: usize, depth: usize) -> PdfResult<()> {
        if depth > self.max_depth {
            return Err(PdfError::StructureTooDeep {
                offset: start,
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    /// `n g R` lookahead after an integer
    fn maybe_reference(&mut self, number: i64) -> Object {
        if !self.allow_references || !(0..=u32::MAX as i64).contains(&number) {
            return Object::Integer(number);
        }

        let checkpoint = self.lexer.clone();
        if let Ok(Some(Token::Integer(generation))) = self.lexer.next_token() {
            if (0..=u16::MAX as i64).contains(&generation) {
                if let Ok(Some(Token::Keyword(b"R"))) = self.lexer.next_token() {
                    return Object::Reference(ObjectId::new(number as u32, generation as u16));
                }
            }
        }

        self.lexer = checkpoint;
        Object::Integer(number)
    }

    fn parse_array(&mut self, start: usize, depth: usize) -> PdfResult<Object> {
        self.check_depth(start, depth)?;
        let mut items = Vec::new();

        loop {
            match self.lexer.next_token()? {
                Some(Token::ArrayEnd) => return Ok(Object::Array(items)),
                Some(token) => items.push(self.parse_token(token, depth)?),
                None => return Err(PdfError::malformed(start, "unterminated array")),
            }
        }
    }

    fn parse_dictionary(&mut self, start: usize, depth: usize) -> PdfResult<Dictionary> {
        self.check_depth(start, depth)?;
        let mut dict = Dictionary::new();

        loop {
            match self.lexer.next_token()? {
                Some(Token::DictEnd) => return Ok(dict),
                Some(Token::Name(key)) => {
                    let token = self.expect_token()?;
                    if token == Token::DictEnd {
                        warn!("Dictionary key without value at offset {}", self.lexer.token_start());
                        return Ok(dict);
                    }
                    let value = self.parse_token(token, depth)?;
                    dict.set(key, value);
                }
                Some(_) => {
                    return Err(PdfError::malformed(
                        self.lexer.token_start(),
                        "dictionary key is not a name",
                    ))
                }
                None => return Err(PdfError::malformed(start, "unterminated dictionary")),
            }
        }
    }

    /// Parse `n g obj ... endobj`, including a trailing stream body
    pub fn parse_indirect_object(
        &mut self,
        resolver: &dyn LengthResolver,
    ) -> PdfResult<(ObjectId, Object)> {
        let start = self.position();
        let id = self.parse_object_header(start)?;
        trace!("Parsing object {} at offset {}", id, start);

        let object = match self.expect_token()? {
            Token::Keyword(b"endobj") => {
                warn!("Empty object {} read as null", id);
                return Ok((id, Object::Null));
            }
            token => self.parse_token(token, 0)?,
        };

        let object = match object {
            Object::Dictionary(dict) if self.next_is_keyword(b"stream")? => {
                self.lexer.next_token()?;
                Object::Stream(self.parse_stream_body(id, dict, resolver)?)
            }
            other => other,
        };

        if self.next_is_keyword(b"endobj")? {
            self.lexer.next_token()?;
        } else {
            warn!("Missing endobj for object {}", id);
        }

        Ok((id, object))
    }

    fn parse_object_header(&mut self, start: usize) -> PdfResult<ObjectId> {
        let number = self.expect_token()?;
        let generation = self.expect_token()?;
        let keyword = self.expect_token()?;

        match (number, generation, keyword) {
            (Token::Integer(n), Token::Integer(g), Token::Keyword(b"obj"))
                if (0..=u32::MAX as i64).contains(&n) && (0..=u16::MAX as i64).contains(&g) =>
            {
                Ok(ObjectId::new(n as u32, g as u16))
            }
            _ => Err(PdfError::malformed(start, "expected 'n g obj' header")),
        }
    }

    fn next_is_keyword(&mut self, keyword: &[u8]) -> PdfResult<bool> {
        Ok(matches!(self.lexer.peek_token()?, Some(Token::Keyword(word)) if word == keyword))
    }

    fn parse_stream_body(
        &mut self,
        id: ObjectId,
        dict: Dictionary,
        resolver: &dyn LengthResolver,
    ) -> PdfResult<Stream> {
        self.lexer.skip_stream_eol();
        let data = self.lexer.data();
        let body_start = self.lexer.position();

        let declared = match dict.get("Length") {
            Some(Object::Integer(length)) => Some(*length),
            Some(Object::Reference(length_id)) => resolver.resolve_length(*length_id),
            _ => None,
        };

        let body_end = match declared {
            Some(length) if length < 0 => {
                return Err(PdfError::malformed_stream(Some(id), format!("negative length {}", length)));
            }
            Some(length) => {
                let end = body_start.saturating_add(length as usize);
                if end > data.len() {
                    return Err(PdfError::malformed_stream(
                        Some(id),
                        format!(
                            "declared length {} exceeds the {} bytes available",
                            length,
                            data.len() - body_start
                        ),
                    ));
                }
                let mut lookahead = Lexer::at(data, end);
                lookahead.skip_whitespace();
                if data[lookahead.position()..].starts_with(ENDSTREAM) {
                    self.lexer.set_position(lookahead.position() + ENDSTREAM.len());
                    end
                } else {
                    warn!("Length of stream {} does not end at endstream, scanning", id);
                    self.scan_for_endstream(id, body_start)?
                }
            }
            None => {
                trace!("Stream {} has no usable length, scanning", id);
                self.scan_for_endstream(id, body_start)?
            }
        };

        let raw = data[body_start..body_end].to_vec();
        let mut stream = Stream::new(dict, raw).with_start_offset(body_start);
        // Keep a declared indirect length out of the rewritten dictionary
        stream.dict.set("Length", stream.raw().len());
        Ok(stream)
    }

    /// Locate `endstream` and trim the EOL that precedes it
    fn scan_for_endstream(&mut self, id: ObjectId, body_start: usize) -> PdfResult<usize> {
        let data = self.lexer.data();
        let found = self
            .lexer
            .find(ENDSTREAM)
            .ok_or_else(|| PdfError::malformed_stream(Some(id), "missing endstream"))?;

        let mut end = found;
        if end > body_start && data[end - 1] == b'\n' {
            end -= 1;
        }
        if end > body_start && data[end - 1] == b'\r' {
            end -= 1;
        }
        self.lexer.set_position(found + ENDSTREAM.len());
        Ok(end)
    }
}

/// Parse a single direct object from `data`
pub fn parse_object(data: &[u8]) -> PdfResult<Object> {
    Parser::new(data).parse_object()
}
