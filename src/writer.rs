//! Full and incremental serialization of a document

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::Write;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, trace, warn};

use crate::dictionary;
use crate::document::Document;
use crate::error::{PdfError, PdfResult};
use crate::pdf::serialize::{write_indirect_object, write_object};
use crate::pdf::{find_startxref, Dictionary, Object, ObjectId, Stream, StringFormat, XRefEntry, XRefKind};

/// Binary marker written on the second line so transports treat the file as binary
const BINARY_MARKER: &[u8] = b"%\xE2\xE3\xCF\xD3\n";

/// One row of a cross-reference section being written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Row {
    Free { next: u32, generation: u16 },
    InUse { offset: usize, generation: u16 },
}

fn ensure_complete(doc: &Document) -> PdfResult<()> {
    match doc.incomplete() {
        Some(pass) => Err(PdfError::IncompleteDocument(pass)),
        None => Ok(()),
    }
}

/// Object references held by the trailer
fn trailer_references(doc: &Document) -> PdfResult<Vec<ObjectId>> {
    let root = doc.catalog_id()?;
    let mut refs = vec![root];
    if let Some(info) = doc.trailer().get_reference("Info") {
        refs.push(info);
    }
    Ok(refs)
}

/// Ids reachable from the trailer
///
/// Fails on the first reference without a target, before anything is written.
fn reachable(doc: &Document) -> PdfResult<BTreeSet<ObjectId>> {
    let mut live = BTreeSet::new();
    let mut queue: VecDeque<(ObjectId, Option<ObjectId>)> =
        trailer_references(doc)?.into_iter().map(|id| (id, None)).collect();
    let mut refs = Vec::new();

    while let Some((id, holder)) = queue.pop_front() {
        if live.contains(&id) {
            continue;
        }
        let object = doc
            .get_object(id)
            .map_err(|_| PdfError::UnresolvedReference { target: id, holder })?;
        live.insert(id);

        refs.clear();
        object.collect_references(&mut refs);
        queue.extend(refs.iter().filter(|r| !live.contains(r)).map(|r| (*r, Some(id))));
    }
    trace!("{} of {} objects are reachable", live.len(), doc.len());
    Ok(live)
}

/// References from edited objects must land on a stored object
fn check_dirty_references(doc: &Document, dirty: &[ObjectId]) -> PdfResult<()> {
    for target in trailer_references(doc)? {
        if !doc.has_object(target) {
            return Err(PdfError::UnresolvedReference { target, holder: None });
        }
    }

    let mut refs = Vec::new();
    for &id in dirty {
        refs.clear();
        doc.get_object(id)?.collect_references(&mut refs);
        if let Some(target) = refs.iter().find(|target| !doc.has_object(**target)) {
            return Err(PdfError::UnresolvedReference {
                target: *target,
                holder: Some(id),
            });
        }
    }
    Ok(())
}

/// Generation a free row carries for `number`
fn free_generation(doc: &Document, number: u32) -> u16 {
    match doc.xref().get(number) {
        Some(XRefEntry::Free { generation, .. }) => *generation,
        Some(entry) => entry.generation().saturating_add(1),
        None => 0,
    }
}

/// Two-part file identifier: kept from the trailer when present, otherwise
/// derived from `body`
fn file_id(doc: &Document, body: &[u8], keep_first: bool) -> Object {
    let digest = md5::compute(body).0.to_vec();
    let existing = doc.trailer().get_array("ID").filter(|id| id.len() == 2);

    let (first, second) = match existing {
        Some(id) if keep_first => (id[0].clone(), Object::String(digest, StringFormat::Hexadecimal)),
        Some(id) => (id[0].clone(), id[1].clone()),
        None => (
            Object::String(digest.clone(), StringFormat::Hexadecimal),
            Object::String(digest, StringFormat::Hexadecimal),
        ),
    };
    Object::Array(vec![first, second])
}

/// Group sorted rows into contiguous `(first, rows)` subsections
fn subsections(rows: &BTreeMap<u32, Row>) -> Vec<(u32, Vec<Row>)> {
    let mut sections: Vec<(u32, Vec<Row>)> = Vec::new();
    for (&number, &row) in rows {
        match sections.last_mut() {
            Some((first, section)) if *first + section.len() as u32 == number => section.push(row),
            _ => sections.push((number, vec![row])),
        }
    }
    sections
}

fn write_xref_table(out: &mut Vec<u8>, rows: &BTreeMap<u32, Row>) -> PdfResult<()> {
    out.extend_from_slice(b"xref\n");
    for (first, section) in subsections(rows) {
        write!(out, "{} {}\n", first, section.len())?;
        for row in section {
            match row {
                Row::Free { next, generation } => write!(out, "{:010} {:05} f\r\n", next, generation)?,
                Row::InUse { offset, generation } => write!(out, "{:010} {:05} n\r\n", offset, generation)?,
            }
        }
    }
    Ok(())
}

fn write_trailer(out: &mut Vec<u8>, trailer: &Dictionary, startxref: usize) -> PdfResult<()> {
    out.extend_from_slice(b"trailer\n");
    write_object(out, &Object::Dictionary(trailer.clone()))?;
    write!(out, "\nstartxref\n{}\n%%EOF\n", startxref)?;
    Ok(())
}

/// Bytes needed to store `value` big-endian
fn field_width(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

/// Append a cross-reference stream `id` holding `rows` plus its own entry
fn write_xref_stream(
    out: &mut Vec<u8>,
    id: ObjectId,
    mut rows: BTreeMap<u32, Row>,
    mut trailer: Dictionary,
    level: u32,
) -> PdfResult<usize> {
    let offset = out.len();
    rows.insert(id.number, Row::InUse { offset, generation: id.generation });

    let widest = rows
        .values()
        .map(|row| match row {
            Row::Free { next, .. } => *next as u64,
            Row::InUse { offset, .. } => *offset as u64,
        })
        .max()
        .unwrap_or(0);
    let width = field_width(widest);

    let mut index = Vec::new();
    let mut data = Vec::new();
    let mut field = [0u8; 8];
    for (first, section) in subsections(&rows) {
        index.push(Object::from(first));
        index.push(Object::from(section.len()));
        for row in section {
            let (kind, value, generation) = match row {
                Row::Free { next, generation } => (0u8, next as u64, generation),
                Row::InUse { offset, generation } => (1u8, offset as u64, generation),
            };
            data.push(kind);
            BigEndian::write_uint(&mut field[..width], value, width);
            data.extend_from_slice(&field[..width]);
            data.extend_from_slice(&generation.to_be_bytes());
        }
    }

    trailer.remove("Size");
    let mut dict = dictionary! {
        "Type" => "XRef",
        "Size" => id.number + 1,
        "W" => vec![Object::Integer(1), Object::from(width), Object::Integer(2)],
        "Index" => index,
    };
    for (key, value) in trailer.iter() {
        dict.set(key.clone(), value.clone());
    }

    let stream = Stream::from_content(dict, data, Some(level))?;
    write_indirect_object(out, id, &Object::Stream(stream))?;
    write!(out, "startxref\n{}\n%%EOF\n", offset)?;
    Ok(offset)
}

/// Serialize every object reachable from the trailer with a fresh
/// cross-reference table
///
/// Object ids are kept. Objects no longer reachable are dropped and their
/// ids written as free entries.
pub fn write_full(doc: &Document) -> PdfResult<Vec<u8>> {
    ensure_complete(doc)?;
    let live = reachable(doc)?;

    let mut out = Vec::new();
    write!(out, "%PDF-{}\n", doc.version())?;
    out.extend_from_slice(BINARY_MARKER);

    let mut rows = BTreeMap::new();
    for &id in &live {
        rows.insert(id.number, Row::InUse { offset: out.len(), generation: id.generation });
        write_indirect_object(&mut out, id, doc.get_object(id)?)?;
        trace!("Wrote object {}", id);
    }

    let size = doc
        .xref()
        .size()
        .max(live.iter().map(|id| id.number + 1).max().unwrap_or(1));
    let free: Vec<u32> = (1..size).filter(|n| !rows.contains_key(n)).collect();
    let head = free.first().copied().unwrap_or(0);
    rows.insert(0, Row::Free { next: head, generation: u16::MAX });
    for (i, &number) in free.iter().enumerate() {
        let next = free.get(i + 1).copied().unwrap_or(0);
        rows.insert(number, Row::Free { next, generation: free_generation(doc, number) });
    }

    let mut trailer = Dictionary::new();
    trailer.set("Size", size);
    trailer.set("Root", doc.catalog_id()?);
    if let Some(info) = doc.trailer().get_reference("Info") {
        trailer.set("Info", info);
    }
    trailer.set("ID", file_id(doc, &out, false));

    let startxref = out.len();
    write_xref_table(&mut out, &rows)?;
    write_trailer(&mut out, &trailer, startxref)?;

    info!(
        "Full write: {} objects, {} free ids, {} bytes",
        live.len(),
        free.len(),
        out.len()
    );
    Ok(out)
}

/// Append the edits made since loading to a copy of `base`
///
/// `base` must be the bytes the document was loaded from. They are copied
/// unchanged; a new section holding only dirty objects and freed ids follows,
/// in the same cross-reference format as the base file's last section.
pub fn write_incremental(doc: &Document, base: &[u8]) -> PdfResult<Vec<u8>> {
    ensure_complete(doc)?;
    let dirty = doc.dirty_ids();
    let freed = doc.freed_ids();
    check_dirty_references(doc, &dirty)?;

    let prev = find_startxref(base)?;
    let kind = match doc.base_revision() {
        Some(revision) => {
            if revision.len != base.len() {
                warn!("Base is {} bytes but the document was read from {}", base.len(), revision.len);
            }
            revision.kind
        }
        None => XRefKind::Table,
    };

    if dirty.is_empty() && freed.is_empty() {
        debug!("No changes to append");
        return Ok(base.to_vec());
    }

    let mut out = base.to_vec();
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    let appended_from = out.len();

    let mut rows = BTreeMap::new();
    for &id in &dirty {
        rows.insert(id.number, Row::InUse { offset: out.len(), generation: id.generation });
        write_indirect_object(&mut out, id, doc.get_object(id)?)?;
        trace!("Appended object {}", id);
    }
    let mut free: Vec<u32> = freed
        .iter()
        .map(|id| id.number)
        .filter(|number| !rows.contains_key(number))
        .collect();
    free.sort_unstable();
    free.dedup();
    if let Some(&head) = free.first() {
        rows.insert(0, Row::Free { next: head, generation: u16::MAX });
    }
    for (i, &number) in free.iter().enumerate() {
        let next = free.get(i + 1).copied().unwrap_or(0);
        rows.insert(number, Row::Free { next, generation: free_generation(doc, number) });
    }

    let mut size = doc
        .xref()
        .size()
        .max(rows.keys().map(|n| n + 1).max().unwrap_or(1));

    let mut trailer = Dictionary::new();
    trailer.set("Root", doc.catalog_id()?);
    if let Some(info) = doc.trailer().get_reference("Info") {
        trailer.set("Info", info);
    }
    trailer.set("ID", file_id(doc, &out[appended_from..], true));
    trailer.set("Prev", prev);

    match kind {
        XRefKind::Table => {
            trailer.set("Size", size);
            let startxref = out.len();
            write_xref_table(&mut out, &rows)?;
            write_trailer(&mut out, &trailer, startxref)?;
        }
        XRefKind::Stream => {
            let id = ObjectId::new(size, 0);
            size += 1;
            write_xref_stream(&mut out, id, rows, trailer, doc.config().compression_level)?;
        }
    }

    info!(
        "Incremental write: {} objects, {} freed, {} bytes appended (size {})",
        dirty.len(),
        freed.len(),
        out.len() - base.len(),
        size
    );
    Ok(out)
}
