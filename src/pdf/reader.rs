//! File reader: header, cross-reference chain and object loading

use std::collections::{BTreeMap, HashSet};

use log::{debug, info, trace, warn};
use once_cell::sync::{Lazy, OnceCell};
use rayon::prelude::*;
use regex::bytes::Regex;

use crate::config::Config;
use crate::error::{PdfError, PdfResult};
use super::lexer::{Lexer, Token};
use super::parser::{LengthResolver, NoLengths, Parser};
use super::xref::{self, Location, XRefEntry, XRefKind, XRefSection, XRefTable};
use super::{Dictionary, Object, ObjectId, Stream};

const PDF_MAGIC: &[u8] = b"%PDF-";
const STARTXREF: &[u8] = b"startxref";
const TRAILER: &[u8] = b"trailer";
const HEADER_SEARCH_WINDOW: usize = 1024;

static OBJECT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s+(\d+)\s+obj\b").expect("object marker pattern is valid")
});

/// Trailer keys carried over into the document trailer
const TRAILER_KEYS: [&str; 5] = ["Size", "Root", "Info", "ID", "Encrypt"];

/// Last cross-reference section of the file as it was read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseRevision {
    pub startxref: usize,
    pub kind: XRefKind,
    pub len: usize,
}

/// Everything the reader extracts from a file
#[derive(Debug)]
pub(crate) struct LoadedFile {
    pub version: String,
    pub trailer: Dictionary,
    pub xref: XRefTable,
    pub objects: BTreeMap<ObjectId, Object>,
    pub base: Option<BaseRevision>,
}

/// Reads a complete file held in memory
pub struct Reader<'a> {
    data: &'a [u8],
    config: &'a Config,
    scanned: OnceCell<BTreeMap<u32, Vec<(usize, u16)>>>,
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|window| window == needle)
}

/// Offset recorded after the last `startxref` keyword
pub fn find_startxref(data: &[u8]) -> PdfResult<usize> {
    let keyword = rfind(data, STARTXREF)
        .ok_or_else(|| PdfError::broken_xref(data.len(), "startxref not found"))?;

    let mut lexer = Lexer::at(data, keyword + STARTXREF.len());
    match lexer.next_token()? {
        Some(Token::Integer(offset)) if offset >= 0 => Ok(offset as usize),
        _ => Err(PdfError::broken_xref(keyword, "startxref is not followed by an offset")),
    }
}

/// Length of an indirect `/Length` object, read through the xref table
struct XRefLengths<'a> {
    data: &'a [u8],
    xref: &'a XRefTable,
}

impl LengthResolver for XRefLengths<'_> {
    fn resolve_length(&self, id: ObjectId) -> Option<i64> {
        match self.xref.resolve(id).ok()? {
            Location::Offset(offset) => {
                let (_, object) = Parser::at(self.data, offset)
                    .parse_indirect_object(&NoLengths)
                    .ok()?;
                object.as_i64().ok()
            }
            _ => None,
        }
    }
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], config: &'a Config) -> Self {
        Self {
            data,
            config,
            scanned: OnceCell::new(),
        }
    }

    pub(crate) fn read(&self) -> PdfResult<LoadedFile> {
        let version = self.read_header()?;
        debug!("Reading PDF {} ({} bytes)", version, self.data.len());

        let (xref, trailer, base) = match self.load_chain() {
            Ok((sections, startxref)) => {
                let kind = sections.first().map(|s| s.kind).unwrap_or_default();
                let (xref, trailer) = merge_sections(&sections);
                let base = BaseRevision {
                    startxref,
                    kind,
                    len: self.data.len(),
                };
                (xref, trailer, Some(base))
            }
            Err(err) if self.config.recover_xref && err.is_structure_error() => {
                warn!("{}; rebuilding cross-reference table by scanning", err);
                match self.scan_xref() {
                    Some((xref, trailer)) => (xref, trailer, None),
                    None => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        self.check_encryption(&trailer, &xref)?;

        let mut objects = self.load_objects(&xref)?;
        let recovered = base.is_none();
        if recovered {
            self.extract_unlisted_compressed(&mut objects)?;
        }

        let mut trailer = trailer;
        if trailer.get_reference("Root").is_none() {
            let catalog = objects
                .iter()
                .find(|(_, object)| object.as_dict().map_or(false, |d| d.type_is("Catalog")))
                .map(|(id, _)| *id)
                .ok_or_else(|| PdfError::MissingDictionaryEntry("Root".to_string()))?;
            info!("Using catalog {} found by scanning", catalog);
            trailer.set("Root", catalog);
        }

        Ok(LoadedFile {
            version,
            trailer,
            xref,
            objects,
            base,
        })
    }

    fn read_header(&self) -> PdfResult<String> {
        let window = &self.data[..self.data.len().min(HEADER_SEARCH_WINDOW)];
        let start = window
            .windows(PDF_MAGIC.len())
            .position(|w| w == PDF_MAGIC)
            .ok_or_else(|| PdfError::malformed(0, "missing %PDF- header"))?;
        if start > 0 {
            warn!("{} bytes of garbage before the PDF header", start);
        }

        let version: String = self.data[start + PDF_MAGIC.len()..]
            .iter()
            .take_while(|b| b.is_ascii_digit() || **b == b'.')
            .map(|b| *b as char)
            .collect();
        if version.is_empty() {
            return Err(PdfError::malformed(start, "missing version in header"));
        }
        Ok(version)
    }

    /// Follow `startxref` and every `/Prev`, newest section first
    fn load_chain(&self) -> PdfResult<(Vec<XRefSection>, usize)> {
        let startxref = find_startxref(self.data)?;
        let mut sections = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(startxref);

        while let Some(offset) = next {
            let section = self.read_section(offset, &mut visited)?;
            next = match section.trailer.get("Prev") {
                Some(Object::Integer(prev)) if *prev >= 0 => Some(*prev as usize),
                Some(other) => {
                    return Err(PdfError::broken_xref(offset, format!("invalid /Prev {:?}", other)))
                }
                None => None,
            };

            let hybrid = match (section.kind, section.trailer.get_integer("XRefStm")) {
                (XRefKind::Table, Some(stm)) if stm >= 0 => Some(stm as usize),
                _ => None,
            };
            sections.push(section);

            if let Some(stm) = hybrid {
                trace!("Loading hybrid xref stream at {}", stm);
                let stream_section = self.read_section(stm, &mut visited)?;
                sections.push(stream_section);
            }
        }

        debug!("Loaded {} cross-reference sections", sections.len());
        Ok((sections, startxref))
    }

    fn read_section(&self, offset: usize, visited: &mut HashSet<usize>) -> PdfResult<XRefSection> {
        if offset >= self.data.len() {
            return Err(PdfError::broken_xref(offset, "offset points past end of file"));
        }
        if !visited.insert(offset) {
            return Err(PdfError::broken_xref(offset, "cyclic /Prev chain"));
        }

        let mut lexer = Lexer::at(self.data, offset);
        lexer.skip_whitespace();
        let start = lexer.position();

        if self.data[start..].starts_with(b"xref") {
            return xref::parse_table_section(self.data, start, self.config.max_depth);
        }

        let (id, object) = Parser::at(self.data, start)
            .with_max_depth(self.config.max_depth)
            .parse_indirect_object(&NoLengths)
            .map_err(|err| PdfError::broken_xref(offset, format!("no cross-reference section: {}", err)))?;
        match object {
            Object::Stream(stream) if stream.dict.type_is("XRef") => {
                trace!("Cross-reference stream {} at {}", id, offset);
                xref::parse_stream_section(&stream, offset)
            }
            _ => Err(PdfError::broken_xref(offset, "no cross-reference section at offset")),
        }
    }

    /// Best-effort table from every `n g obj` marker in the file
    fn scan_xref(&self) -> Option<(XRefTable, Dictionary)> {
        let scanned = self.scanned();
        if scanned.is_empty() {
            return None;
        }

        let mut xref = XRefTable::new();
        for (number, candidates) in scanned {
            // Later definitions belong to later updates
            if let Some(&(offset, generation)) = candidates.last() {
                xref.insert(*number, XRefEntry::InUse { offset, generation });
            }
        }

        let mut trailer = self.find_trailer().unwrap_or_default();
        trailer.set("Size", xref.size());
        info!("Recovered {} objects by scanning", xref.len());
        Some((xref, keep_trailer_keys(&trailer)))
    }

    fn scanned(&self) -> &BTreeMap<u32, Vec<(usize, u16)>> {
        self.scanned.get_or_init(|| {
            let mut found: BTreeMap<u32, Vec<(usize, u16)>> = BTreeMap::new();
            for captures in OBJECT_MARKER.captures_iter(self.data) {
                let number = std::str::from_utf8(&captures[1]).ok().and_then(|n| n.parse().ok());
                let generation = std::str::from_utf8(&captures[2]).ok().and_then(|g| g.parse().ok());
                if let (Some(number), Some(generation), Some(whole)) = (number, generation, captures.get(0)) {
                    found.entry(number).or_default().push((whole.start(), generation));
                }
            }
            found
        })
    }

    fn find_trailer(&self) -> Option<Dictionary> {
        let position = rfind(self.data, TRAILER)?;
        let object = Parser::at(self.data, position + TRAILER.len())
            .with_max_depth(self.config.max_depth)
            .parse_object()
            .ok()?;
        match object {
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    fn check_encryption(&self, trailer: &Dictionary, xref: &XRefTable) -> PdfResult<()> {
        let filter = match trailer.get("Encrypt") {
            None | Some(Object::Null) => return Ok(()),
            Some(Object::Dictionary(dict)) => dict.get_name("Filter").map(str::to_string),
            Some(Object::Reference(id)) => match xref.resolve(*id) {
                Ok(Location::Offset(offset)) => self
                    .read_object_at(offset, *id, xref)
                    .ok()
                    .and_then(|object| object.as_dict().ok()?.get_name("Filter").map(str::to_string)),
                _ => None,
            },
            Some(_) => None,
        };
        Err(PdfError::UnsupportedEncryption(
            filter.unwrap_or_else(|| "unknown security handler".to_string()),
        ))
    }

    fn read_object_at(&self, offset: usize, expected: ObjectId, xref: &XRefTable) -> PdfResult<Object> {
        if offset >= self.data.len() {
            return Err(PdfError::malformed(offset, format!("object {} offset past end of file", expected)));
        }
        let lengths = XRefLengths { data: self.data, xref };
        let (id, object) = Parser::at(self.data, offset)
            .with_max_depth(self.config.max_depth)
            .parse_indirect_object(&lengths)?;
        if id != expected {
            return Err(PdfError::malformed(
                offset,
                format!("expected object {}, found {}", expected, id),
            ));
        }
        Ok(object)
    }

    /// Read at the recorded offset, then at any scanned marker for the same id
    fn read_object(&self, id: ObjectId, offset: usize, xref: &XRefTable) -> PdfResult<Object> {
        let err = match self.read_object_at(offset, id, xref) {
            Ok(object) => return Ok(object),
            Err(err) => err,
        };
        if !self.config.recover_xref {
            return Err(err);
        }

        let candidates = self.scanned().get(&id.number).cloned().unwrap_or_default();
        for (candidate, generation) in candidates.into_iter().rev() {
            if generation != id.generation || candidate == offset {
                continue;
            }
            if let Ok(object) = self.read_object_at(candidate, id, xref) {
                warn!("Object {} recovered at offset {} instead of {}", id, candidate, offset);
                return Ok(object);
            }
        }
        Err(err)
    }

    fn load_objects(&self, xref: &XRefTable) -> PdfResult<BTreeMap<ObjectId, Object>> {
        let located: Vec<(ObjectId, usize)> = xref
            .entries()
            .filter_map(|(number, entry)| match entry {
                XRefEntry::InUse { offset, generation } if number != 0 => {
                    Some((ObjectId::new(number, *generation), *offset))
                }
                _ => None,
            })
            .collect();

        let load = |&(id, offset): &(ObjectId, usize)| self.read_object(id, offset, xref).map(|object| (id, object));
        let parsed: PdfResult<Vec<(ObjectId, Object)>> = if self.config.parallel_decode {
            located.par_iter().map(load).collect()
        } else {
            located.iter().map(load).collect()
        };
        let mut objects: BTreeMap<ObjectId, Object> = parsed?.into_iter().collect();

        let mut compressed: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (number, entry) in xref.entries() {
            if let XRefEntry::Compressed { stream, .. } = entry {
                compressed.entry(*stream).or_default().push(number);
            }
        }

        for (stream_number, members) in compressed {
            let stream_id = ObjectId::new(stream_number, 0);
            let stream = objects
                .get(&stream_id)
                .ok_or(PdfError::ObjectNotFound(stream_id))?
                .as_stream()?;
            let contained = self.parse_object_stream(stream_id, stream)?;
            for (id, object) in contained {
                if members.contains(&id.number) {
                    objects.entry(id).or_insert(object);
                }
            }
        }

        debug!("Loaded {} objects", objects.len());
        Ok(objects)
    }

    /// Objects inside object streams that a rebuilt table cannot list
    fn extract_unlisted_compressed(&self, objects: &mut BTreeMap<ObjectId, Object>) -> PdfResult<()> {
        let streams: Vec<ObjectId> = objects
            .iter()
            .filter(|(_, object)| matches!(object, Object::Stream(s) if s.dict.type_is("ObjStm")))
            .map(|(id, _)| *id)
            .collect();

        for stream_id in streams {
            let contained = match objects.get(&stream_id) {
                Some(Object::Stream(stream)) => self.parse_object_stream(stream_id, stream),
                _ => continue,
            };
            match contained {
                Ok(contained) => {
                    for (id, object) in contained {
                        objects.entry(id).or_insert(object);
                    }
                }
                Err(err) => warn!("Skipping object stream {}: {}", stream_id, err),
            }
        }
        Ok(())
    }

    fn parse_object_stream(&self, id: ObjectId, stream: &Stream) -> PdfResult<Vec<(ObjectId, Object)>> {
        let count = stream
            .dict
            .get_integer("N")
            .ok_or_else(|| PdfError::malformed_stream(Some(id), "object stream without /N"))?;
        let first = stream
            .dict
            .get_integer("First")
            .ok_or_else(|| PdfError::malformed_stream(Some(id), "object stream without /First"))?;
        let data = stream.decoded()?;

        // Every header pair takes at least two bytes
        let count = usize::try_from(count)
            .ok()
            .filter(|count| count.saturating_mul(2) <= data.len())
            .ok_or_else(|| {
                PdfError::malformed_stream(Some(id), format!("/N {} does not fit a {} byte object stream", count, data.len()))
            })?;

        let mut header = Lexer::new(data);
        let mut positions = Vec::with_capacity(count);
        for _ in 0..count {
            match (header.next_token()?, header.next_token()?) {
                (Some(Token::Integer(number)), Some(Token::Integer(offset))) if offset >= 0 => {
                    let number = u32::try_from(number)
                        .map_err(|_| PdfError::malformed_stream(Some(id), "object number out of range"))?;
                    positions.push((number, offset as usize));
                }
                _ => return Err(PdfError::malformed_stream(Some(id), "invalid object stream header")),
            }
        }

        let mut contained = Vec::with_capacity(positions.len());
        for (number, offset) in positions {
            let start = (first.max(0) as usize).saturating_add(offset);
            if start >= data.len() {
                return Err(PdfError::malformed_stream(
                    Some(id),
                    format!("object {} lies outside the object stream", number),
                ));
            }
            let object = Parser::at(data, start)
                .with_max_depth(self.config.max_depth)
                .parse_object()?;
            contained.push((ObjectId::new(number, 0), object));
        }

        trace!("Object stream {} holds {} objects", id, contained.len());
        Ok(contained)
    }
}

/// Build the live table from sections ordered newest first
fn merge_sections(sections: &[XRefSection]) -> (XRefTable, Dictionary) {
    let mut xref = XRefTable::new();
    for section in sections.iter().rev() {
        xref.merge(section);
    }

    let mut trailer = Dictionary::new();
    for section in sections {
        trailer.inherit_from(&keep_trailer_keys(&section.trailer));
    }
    trailer.set("Size", xref.size());
    (xref, trailer)
}

fn keep_trailer_keys(trailer: &Dictionary) -> Dictionary {
    TRAILER_KEYS
        .iter()
        .filter_map(|key| trailer.get(key).map(|value| (key.as_bytes().to_vec(), value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;
    use pretty_assertions::assert_eq;
    use test_log::test;

    /// Assemble a file with a correct classic xref table
    fn build_file(objects: &[&str], trailer: &str) -> Vec<u8> {
        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let startxref = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(format!("trailer\n{}\nstartxref\n{}\n%%EOF\n", trailer, startxref).as_bytes());
        out
    }

    fn read(data: &[u8], config: &Config) -> PdfResult<LoadedFile> {
        Reader::new(data, config).read()
    }

    #[test]
    fn test_read_simple_file() -> PdfResult<()> {
        let data = build_file(
            &[
                "<< /Type /Catalog /Pages 2 0 R >>",
                "<< /Type /Pages /Kids [] /Count 0 >>",
                "<< /Length 4 0 R >>\nstream\nabc\nendstream",
                "3",
            ],
            "<< /Size 5 /Root 1 0 R >>",
        );
        let loaded = read(&data, &Config::default())?;

        assert_eq!(loaded.version, "1.4");
        assert_eq!(loaded.trailer.get_reference("Root"), Some(ObjectId::new(1, 0)));
        assert_eq!(loaded.objects.len(), 4);
        let stream = loaded.objects[&ObjectId::new(3, 0)].as_stream()?;
        assert_eq!(stream.raw(), b"abc");
        assert_eq!(loaded.base.map(|b| b.kind), Some(XRefKind::Table));
        Ok(())
    }

    #[test]
    fn test_cyclic_prev_chain_without_recovery() {
        let mut data = build_file(&["<< /Type /Catalog >>"], "<< /Size 2 /Root 1 0 R /Prev 9999 >>");
        let startxref = find_startxref(&data).unwrap_or(0);
        let text = String::from_utf8_lossy(&data).replace("/Prev 9999", &format!("/Prev {}", startxref));
        data = text.into_bytes();
        // Replacing the offset changed no byte positions before the xref
        let config = Config::default().with_recover_xref(false);
        assert!(matches!(read(&data, &config), Err(PdfError::BrokenXRefChain { .. })));
    }

    #[test]
    fn test_prev_past_end_is_recovered_by_scanning() -> PdfResult<()> {
        let data = build_file(
            &["<< /Type /Catalog /Pages 2 0 R >>", "<< /Type /Pages /Kids [] /Count 0 >>"],
            "<< /Size 3 /Root 1 0 R /Prev 999999 >>",
        );

        let strict = Config::default().with_recover_xref(false);
        assert!(matches!(read(&data, &strict), Err(PdfError::BrokenXRefChain { .. })));

        let loaded = read(&data, &Config::default())?;
        assert!(loaded.base.is_none());
        assert_eq!(loaded.objects.len(), 2);
        assert_eq!(loaded.trailer.get_reference("Root"), Some(ObjectId::new(1, 0)));
        Ok(())
    }

    #[test]
    fn test_missing_trailer_finds_catalog() -> PdfResult<()> {
        let data = b"%PDF-1.7\n1 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
                     2 0 obj\n<< /Type /Catalog /Pages 1 0 R >>\nendobj\n%%EOF\n";
        let loaded = read(data, &Config::default())?;
        assert_eq!(loaded.trailer.get_reference("Root"), Some(ObjectId::new(2, 0)));
        Ok(())
    }

    #[test]
    fn test_encrypted_file_is_rejected() {
        let data = build_file(
            &["<< /Type /Catalog >>", "<< /Filter /Standard /V 2 >>"],
            "<< /Size 3 /Root 1 0 R /Encrypt 2 0 R >>",
        );
        match read(&data, &Config::default()) {
            Err(PdfError::UnsupportedEncryption(filter)) => assert_eq!(filter, "Standard"),
            other => panic!("expected encryption error, got {:?}", other.map(|l| l.version)),
        }
    }

    #[test]
    fn test_wrong_offset_is_recovered() -> PdfResult<()> {
        let mut data = build_file(&["<< /Type /Catalog >>", "(two)"], "<< /Size 3 /Root 1 0 R >>");
        // Grow object 1 without fixing the table, so object 2's offset is stale
        let header_end = b"%PDF-1.4\n1 0 obj\n".len();
        data.splice(header_end..header_end, b"% pad\n".iter().copied());
        let loaded = read(&data, &Config::default())?;
        assert_eq!(loaded.objects.get(&ObjectId::new(2, 0)), Some(&Object::string_literal("two")));
        Ok(())
    }

    #[test]
    fn test_object_stream_count_is_bounded() -> PdfResult<()> {
        let config = Config::default();
        let reader = Reader::new(b"", &config);
        let huge = Stream::new(
            dictionary! { "Type" => "ObjStm", "N" => 1_000_000_000_000_000_000i64, "First" => 4 },
            b"5 0 (five)".to_vec(),
        );
        assert!(matches!(
            reader.parse_object_stream(ObjectId::new(9, 0), &huge),
            Err(PdfError::MalformedStream { .. })
        ));

        let fine = Stream::new(
            dictionary! { "Type" => "ObjStm", "N" => 1, "First" => 4 },
            b"5 0 (five)".to_vec(),
        );
        let contained = reader.parse_object_stream(ObjectId::new(9, 0), &fine)?;
        assert_eq!(contained, vec![(ObjectId::new(5, 0), Object::string_literal("five"))]);
        Ok(())
    }

    #[test]
    fn test_recovery_skips_oversized_object_stream() -> PdfResult<()> {
        let data = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n\
                     2 0 obj\n<< /Type /ObjStm /N 1000000000000000000 /First 4 /Length 10 >>\n\
                     stream\n5 0 (five)\nendstream\nendobj\n%%EOF\n";
        let loaded = read(data, &Config::default())?;
        assert_eq!(loaded.trailer.get_reference("Root"), Some(ObjectId::new(1, 0)));
        assert!(!loaded.objects.contains_key(&ObjectId::new(5, 0)));
        Ok(())
    }
}
