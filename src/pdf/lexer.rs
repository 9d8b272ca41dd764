//! PDF token lexer

use log::trace;

use crate::error::{PdfError, PdfResult};

/// Lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    Integer(i64),
    Real(f64),
    /// Name without the leading slash, `#xx` escapes decoded
    Name(Vec<u8>),
    LiteralString(Vec<u8>),
    HexString(Vec<u8>),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    /// Any other run of regular characters: `obj`, `R`, `true`, operators
    Keyword(&'a [u8]),
}

pub(crate) fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' | b'\0')
}

pub(crate) fn is_delimiter(byte: u8) -> bool {
    matches!(byte, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(byte: u8) -> bool {
    !is_whitespace(byte) && !is_delimiter(byte)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Byte-level tokenizer over a borrowed buffer
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
    token_start: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    /// Lexer positioned at `offset`
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            pos: offset.min(data.len()),
            token_start: offset.min(data.len()),
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    /// Offset of the first byte of the last token returned
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Skip whitespace and comments
    pub fn skip_whitespace(&mut self) {
        while let Some(byte) = self.peek_byte() {
            if is_whitespace(byte) {
                self.pos += 1;
            } else if byte == b'%' {
                while let Some(b) = self.peek_byte() {
                    if b == b'\n' || b == b'\r' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Skip the end-of-line marker that follows the `stream` keyword
    pub fn skip_stream_eol(&mut self) {
        match self.peek_byte() {
            Some(b'\r') => {
                self.pos += 1;
                if self.peek_byte() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            Some(b'\n') => self.pos += 1,
            _ => {}
        }
    }

    /// Next token, or `None` at end of input
    pub fn next_token(&mut self) -> PdfResult<Option<Token<'a>>> {
        self.skip_whitespace();
        self.token_start = self.pos;

        let byte = match self.peek_byte() {
            Some(byte) => byte,
            None => return Ok(None),
        };

        let token = match byte {
            b'[' => {
                self.pos += 1;
                Token::ArrayStart
            }
            b']' => {
                self.pos += 1;
                Token::ArrayEnd
            }
            b'<' if self.data.get(self.pos + 1) == Some(&b'<') => {
                self.pos += 2;
                Token::DictStart
            }
            b'>' if self.data.get(self.pos + 1) == Some(&b'>') => {
                self.pos += 2;
                Token::DictEnd
            }
            b'<' => Token::HexString(self.read_hex_string()?),
            b'(' => Token::LiteralString(self.read_literal_string()?),
            b'/' => Token::Name(self.read_name()?),
            b'{' | b'}' => {
                self.pos += 1;
                Token::Keyword(&self.data[self.pos - 1..self.pos])
            }
            b')' | b'>' => {
                return Err(PdfError::malformed(self.pos, format!("unexpected '{}'", byte as char)));
            }
            _ => self.read_regular(),
        };

        Ok(Some(token))
    }

    /// Peek at the next token without consuming it
    pub fn peek_token(&mut self) -> PdfResult<Option<Token<'a>>> {
        let pos = self.pos;
        let start = self.token_start;
        let token = self.next_token();
        self.pos = pos;
        self.token_start = start;
        token
    }

    fn read_regular(&mut self) -> Token<'a> {
        let start = self.pos;
        while self.peek_byte().map_or(false, is_regular) {
            self.pos += 1;
        }
        let word = &self.data[start..self.pos];

        match word.first() {
            Some(b'0'..=b'9' | b'+' | b'-' | b'.') => parse_number(word).unwrap_or(Token::Keyword(word)),
            _ => Token::Keyword(word),
        }
    }

    fn read_name(&mut self) -> PdfResult<Vec<u8>> {
        self.pos += 1;
        let mut name = Vec::new();

        while let Some(byte) = self.peek_byte() {
            if !is_regular(byte) {
                break;
            }
            if byte == b'#' {
                let high = self.data.get(self.pos + 1).copied().and_then(hex_value);
                let low = self.data.get(self.pos + 2).copied().and_then(hex_value);
                if let (Some(high), Some(low)) = (high, low) {
                    name.push(high << 4 | low);
                    self.pos += 3;
                    continue;
                }
                trace!("Keeping bare '#' in name at offset {}", self.pos);
            }
            name.push(byte);
            self.pos += 1;
        }

        Ok(name)
    }

    fn read_hex_string(&mut self) -> PdfResult<Vec<u8>> {
        let start = self.pos;
        self.pos += 1;
        let mut bytes = Vec::new();
        let mut high: Option<u8> = None;

        loop {
            let byte = self
                .peek_byte()
                .ok_or_else(|| PdfError::malformed(start, "unterminated hex string"))?;
            self.pos += 1;

            if byte == b'>' {
                break;
            }
            if is_whitespace(byte) {
                continue;
            }
            let nibble = hex_value(byte).ok_or_else(|| {
                PdfError::malformed(self.pos - 1, format!("invalid hex digit '{}'", byte as char))
            })?;
            match high.take() {
                Some(h) => bytes.push(h << 4 | nibble),
                None => high = Some(nibble),
            }
        }

        if let Some(h) = high {
            bytes.push(h << 4);
        }
        Ok(bytes)
    }

    fn read_literal_string(&mut self) -> PdfResult<Vec<u8>> {
        let start = self.pos;
        self.pos += 1;
        let mut bytes = Vec::new();
        let mut depth = 1usize;

        loop {
            let byte = self
                .peek_byte()
                .ok_or_else(|| PdfError::malformed(start, "unterminated literal string"))?;
            self.pos += 1;

            match byte {
                b'(' => {
                    depth += 1;
                    bytes.push(byte);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    bytes.push(byte);
                }
                b'\\' => self.read_escape(&mut bytes),
                b'\r' => {
                    // CR and CRLF inside a string both read as LF
                    if self.peek_byte() == Some(b'\n') {
                        self.pos += 1;
                    }
                    bytes.push(b'\n');
                }
                _ => bytes.push(byte),
            }
        }

        Ok(bytes)
    }

    fn read_escape(&mut self, bytes: &mut Vec<u8>) {
        let byte = match self.peek_byte() {
            Some(byte) => byte,
            None => return,
        };
        self.pos += 1;

        match byte {
            b'n' => bytes.push(b'\n'),
            b'r' => bytes.push(b'\r'),
            b't' => bytes.push(b'\t'),
            b'b' => bytes.push(0x08),
            b'f' => bytes.push(0x0c),
            b'\r' => {
                if self.peek_byte() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            b'\n' => {}
            b'0'..=b'7' => {
                let mut value = (byte - b'0') as u32;
                for _ in 0..2 {
                    match self.peek_byte() {
                        Some(digit @ b'0'..=b'7') => {
                            value = value * 8 + (digit - b'0') as u32;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                bytes.push(value as u8);
            }
            // \( \) \\ and unknown escapes keep the character
            other => bytes.push(other),
        }
    }

    /// Find `needle` at or after the current position
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        self.data[self.pos..]
            .windows(needle.len())
            .position(|window| window == needle)
            .map(|index| self.pos + index)
    }
}

fn parse_number(word: &[u8]) -> Option<Token<'static>> {
    let text = std::str::from_utf8(word).ok()?;
    if text.contains('.') {
        // Producers sometimes write "-.5" or "4." which f64 parsing accepts
        text.parse::<f64>().ok().map(Token::Real)
    } else {
        match text.parse::<i64>() {
            Ok(value) => Some(Token::Integer(value)),
            Err(_) => text.parse::<f64>().ok().map(Token::Real),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn tokens(data: &[u8]) -> PdfResult<Vec<Token<'_>>> {
        let mut lexer = Lexer::new(data);
        let mut out = Vec::new();
        while let Some(token) = lexer.next_token()? {
            out.push(token);
        }
        Ok(out)
    }

    #[test]
    fn test_basic_tokens() -> PdfResult<()> {
        let result = tokens(b"<< /Type /Page /Count -3 >> [1.5 .25] % comment\n true R")?;
        assert_eq!(
            result,
            vec![
                Token::DictStart,
                Token::Name(b"Type".to_vec()),
                Token::Name(b"Page".to_vec()),
                Token::Name(b"Count".to_vec()),
                Token::Integer(-3),
                Token::DictEnd,
                Token::ArrayStart,
                Token::Real(1.5),
                Token::Real(0.25),
                Token::ArrayEnd,
                Token::Keyword(b"true"),
                Token::Keyword(b"R"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_literal_string_escapes() -> PdfResult<()> {
        let result = tokens(b"(a\\(b\\) (nested) \\101\\n\\\r\nend)")?;
        assert_eq!(result, vec![Token::LiteralString(b"a(b) (nested) A\nend".to_vec())]);
        Ok(())
    }

    #[test]
    fn test_hex_string_and_name_escape() -> PdfResult<()> {
        let result = tokens(b"<48 65 6C6C 6F7> /A#20B")?;
        assert_eq!(
            result,
            vec![
                Token::HexString(b"Hellop".to_vec()),
                Token::Name(b"A B".to_vec()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unterminated_string_is_malformed() {
        let err = tokens(b"  (never closed").unwrap_err();
        assert!(matches!(err, PdfError::MalformedObject { offset: 2, .. }));
    }

    #[test]
    fn test_peek_does_not_consume() -> PdfResult<()> {
        let mut lexer = Lexer::new(b"12 0 R");
        assert_eq!(lexer.peek_token()?, Some(Token::Integer(12)));
        assert_eq!(lexer.next_token()?, Some(Token::Integer(12)));
        assert_eq!(lexer.next_token()?, Some(Token::Integer(0)));
        Ok(())
    }
}
