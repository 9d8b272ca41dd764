//! PDF cross-reference table implementation

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace, warn};

use crate::error::{PdfError, PdfResult};
use super::lexer::Token;
use super::parser::Parser;
use super::{Dictionary, Object, ObjectId, Stream};

/// Generation number that marks an id as permanently retired
pub const MAX_GENERATION: u16 = 65535;

/// One row of the cross-reference table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free id; `generation` is the one a reuse must carry
    Free { next: u32, generation: u16 },
    /// Object stored at a byte offset
    InUse { offset: usize, generation: u16 },
    /// Object stored inside an object stream
    Compressed { stream: u32, index: u32 },
    /// Id handed out during editing, not yet written
    Allocated { generation: u16 },
}

impl XRefEntry {
    pub fn generation(&self) -> u16 {
        match self {
            XRefEntry::Free { generation, .. }
            | XRefEntry::InUse { generation, .. }
            | XRefEntry::Allocated { generation } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }
}

/// Where an object's bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Offset(usize),
    Compressed { stream: u32, index: u32 },
    /// Allocated during editing; only present in the object store
    Unwritten,
}

/// Physical format of a cross-reference section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XRefKind {
    #[default]
    Table,
    Stream,
}

/// One section of the `/Prev` chain as read from the file
#[derive(Debug, Clone, Default)]
pub struct XRefSection {
    pub entries: BTreeMap<u32, XRefEntry>,
    pub trailer: Dictionary,
    pub offset: usize,
    pub kind: XRefKind,
}

/// Merged cross-reference table
#[derive(Debug, Clone, Default)]
pub struct XRefTable {
    entries: BTreeMap<u32, XRefEntry>,
    size: u32,
}

impl XRefTable {
    /// Create new xref table
    pub fn new() -> Self {
        Self::default()
    }

    /// One past the highest id ever recorded
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn get(&self, number: u32) -> Option<&XRefEntry> {
        self.entries.get(&number)
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, &XRefEntry)> + '_ {
        self.entries.iter().map(|(number, entry)| (*number, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record an entry, growing `size` as needed
    pub fn insert(&mut self, number: u32, entry: XRefEntry) {
        self.entries.insert(number, entry);
        self.size = self.size.max(number.saturating_add(1));
    }

    pub(crate) fn set_size(&mut self, size: u32) {
        self.size = self.size.max(size);
    }

    /// Storage location of a live object
    pub fn resolve(&self, id: ObjectId) -> PdfResult<Location> {
        match self.entries.get(&id.number) {
            Some(XRefEntry::InUse { offset, generation }) if *generation == id.generation => {
                Ok(Location::Offset(*offset))
            }
            Some(XRefEntry::Compressed { stream, index }) if id.generation == 0 => {
                Ok(Location::Compressed { stream: *stream, index: *index })
            }
            Some(XRefEntry::Allocated { generation }) if *generation == id.generation => {
                Ok(Location::Unwritten)
            }
            _ => Err(PdfError::ObjectNotFound(id)),
        }
    }

    /// Hand out an id for a new object
    ///
    /// The lowest free id whose generation can still grow is reused; otherwise
    /// the table grows by one.
    pub fn allocate(&mut self) -> ObjectId {
        let reusable = self
            .entries
            .iter()
            .find(|(number, entry)| {
                **number != 0 && matches!(entry, XRefEntry::Free { generation, .. } if *generation < MAX_GENERATION)
            })
            .map(|(number, entry)| ObjectId::new(*number, entry.generation()));

        let id = reusable.unwrap_or_else(|| ObjectId::new(self.size.max(1), 0));
        trace!("Allocated object id {}", id);
        self.insert(id.number, XRefEntry::Allocated { generation: id.generation });
        id
    }

    /// Mark an id free; its next use carries a bumped generation
    pub fn free(&mut self, id: ObjectId) {
        let generation = id.generation.saturating_add(1);
        self.insert(id.number, XRefEntry::Free { next: 0, generation });
    }

    /// Apply a newer section on top of this table; its entries win
    pub fn merge(&mut self, section: &XRefSection) {
        for (number, entry) in &section.entries {
            self.insert(*number, *entry);
        }
        if let Some(size) = section.trailer.get_integer("Size") {
            self.set_size(size.clamp(0, u32::MAX as i64) as u32);
        }
    }

    /// Free ids in ascending order, excluding the list head
    pub fn free_ids(&self) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|(number, entry)| **number != 0 && entry.is_free())
            .map(|(number, _)| *number)
            .collect()
    }
}

/// Parse a classic `xref` table plus its trailer at `offset`
pub fn parse_table_section(data: &[u8], offset: usize, max_depth: usize) -> PdfResult<XRefSection> {
    trace!("Parsing xref table at offset {}", offset);
    let mut parser = Parser::at(data, offset).with_max_depth(max_depth);

    match parser.lexer().next_token()? {
        Some(Token::Keyword(b"xref")) => {}
        _ => return Err(PdfError::broken_xref(offset, "expected 'xref' keyword")),
    }

    let mut section = XRefSection {
        offset,
        kind: XRefKind::Table,
        ..XRefSection::default()
    };

    loop {
        let lexer = parser.lexer();
        match lexer.next_token()? {
            Some(Token::Keyword(b"trailer")) => break,
            Some(Token::Integer(start)) => {
                let count = match lexer.next_token()? {
                    Some(Token::Integer(count)) if count >= 0 => count,
                    _ => return Err(PdfError::malformed(lexer.token_start(), "invalid xref subsection header")),
                };
                if start < 0 {
                    return Err(PdfError::malformed(lexer.token_start(), "negative xref subsection start"));
                }
                let (start, count) = subsection_range(start, count)
                    .ok_or_else(|| PdfError::broken_xref(offset, "xref subsection exceeds the object number range"))?;

                for number in start..start + count {
                    let entry = parse_table_entry(parser.lexer(), number)?;
                    section.entries.insert(number, entry);
                }
            }
            _ => return Err(PdfError::malformed(lexer.token_start(), "expected xref subsection or trailer")),
        }
    }

    section.trailer = parser.parse_object()?.as_dict()?.clone();
    debug!("Parsed xref table with {} entries", section.entries.len());
    Ok(section)
}

/// `start` and `count` of a subsection when every number in it fits an object number
fn subsection_range(start: i64, count: i64) -> Option<(u32, u32)> {
    let start = u32::try_from(start).ok()?;
    let count = u32::try_from(count).ok()?;
    start.checked_add(count)?;
    Some((start, count))
}

fn parse_table_entry(lexer: &mut super::lexer::Lexer<'_>, number: u32) -> PdfResult<XRefEntry> {
    let field = lexer.next_token()?;
    let generation = lexer.next_token()?;
    let kind = lexer.next_token()?;

    match (field, generation, kind) {
        (Some(Token::Integer(field)), Some(Token::Integer(generation)), Some(Token::Keyword(kind))) => {
            let generation = generation.clamp(0, MAX_GENERATION as i64) as u16;
            match kind {
                b"n" => Ok(XRefEntry::InUse {
                    offset: field.max(0) as usize,
                    generation,
                }),
                b"f" => Ok(XRefEntry::Free {
                    next: field.clamp(0, u32::MAX as i64) as u32,
                    generation,
                }),
                _ => Err(PdfError::malformed(lexer.token_start(), format!("invalid xref entry type for object {}", number))),
            }
        }
        _ => Err(PdfError::malformed(lexer.token_start(), format!("invalid xref entry for object {}", number))),
    }
}

/// Read the entries of a `/Type /XRef` stream
pub fn parse_stream_section(stream: &Stream, offset: usize) -> PdfResult<XRefSection> {
    let dict = &stream.dict;
    let malformed = |message: &str| PdfError::malformed(offset, message.to_string());

    let widths: Vec<usize> = dict
        .get_array("W")
        .ok_or_else(|| malformed("xref stream without /W"))?
        .iter()
        .map(|w| w.as_i64().map(|w| w.clamp(0, 8) as usize))
        .collect::<PdfResult<_>>()?;
    if widths.len() != 3 {
        return Err(malformed("xref stream /W must have three entries"));
    }

    let size = dict.get_integer("Size").ok_or_else(|| malformed("xref stream without /Size"))?;
    let index: Vec<i64> = match dict.get_array("Index") {
        Some(index) => index.iter().map(Object::as_i64).collect::<PdfResult<_>>()?,
        None => vec![0, size],
    };

    let data = stream.decoded()?;
    let row = widths.iter().sum::<usize>();
    if row == 0 {
        return Err(malformed("xref stream rows are empty"));
    }

    let mut section = XRefSection {
        offset,
        kind: XRefKind::Stream,
        trailer: dict.clone(),
        ..XRefSection::default()
    };

    let mut rows = data.chunks_exact(row);
    for pair in index.chunks(2) {
        let (start, count) = match pair {
            [start, count] => subsection_range(*start, *count).ok_or_else(|| {
                PdfError::broken_xref(offset, "xref stream /Index exceeds the object number range")
            })?,
            _ => return Err(malformed("invalid xref stream /Index")),
        };

        for number in start..start + count {
            let Some(bytes) = rows.next() else {
                warn!("xref stream at {} ends before its /Index is exhausted", offset);
                return Ok(section);
            };
            let (kind, rest) = bytes.split_at(widths[0]);
            let (second, third) = rest.split_at(widths[1]);

            let kind = if widths[0] == 0 { 1 } else { read_field(kind) };
            let second = read_field(second);
            let third = read_field(third);

            let entry = match kind {
                0 => XRefEntry::Free {
                    next: second as u32,
                    generation: third.min(MAX_GENERATION as u64) as u16,
                },
                1 => XRefEntry::InUse {
                    offset: second as usize,
                    generation: third.min(MAX_GENERATION as u64) as u16,
                },
                2 => XRefEntry::Compressed {
                    stream: second as u32,
                    index: third as u32,
                },
                other => {
                    trace!("Ignoring xref stream entry of type {}", other);
                    continue;
                }
            };
            section.entries.insert(number, entry);
        }
    }

    debug!("Parsed xref stream with {} entries", section.entries.len());
    Ok(section)
}

fn read_field(bytes: &[u8]) -> u64 {
    if bytes.is_empty() {
        0
    } else {
        BigEndian::read_uint(bytes, bytes.len())
    }
}
