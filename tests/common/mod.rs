//! Byte-exact PDF fixtures shared by the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

/// Assembles a PDF file object by object with correct offsets
#[derive(Debug, Clone, Default)]
pub struct PdfBuilder {
    objects: BTreeMap<u32, Vec<u8>>,
    trailer: String,
    startxref: Option<usize>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `number 0 obj <body> endobj`
    pub fn object(mut self, number: u32, body: &str) -> Self {
        self.objects.insert(number, body.as_bytes().to_vec());
        self
    }

    /// Add a stream object; `/Length` is filled in
    pub fn stream(mut self, number: u32, dict: &str, data: &[u8]) -> Self {
        let mut body = format!("<< {} /Length {} >>\nstream\n", dict, data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.objects.insert(number, body);
        self
    }

    /// Extra trailer entries, e.g. `/Root 1 0 R`
    pub fn trailer(mut self, entries: &str) -> Self {
        self.trailer = entries.to_string();
        self
    }

    /// Write this value after `startxref` instead of the real offset
    pub fn startxref(mut self, offset: usize) -> Self {
        self.startxref = Some(offset);
        self
    }

    fn size(&self) -> u32 {
        self.objects.keys().next_back().map_or(1, |n| n + 1)
    }

    fn body(&self) -> (Vec<u8>, BTreeMap<u32, usize>) {
        let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = BTreeMap::new();
        for (number, body) in &self.objects {
            offsets.insert(*number, out.len());
            out.extend_from_slice(format!("{} 0 obj\n", number).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }
        (out, offsets)
    }

    /// File with a classic `xref` table
    pub fn build(&self) -> Vec<u8> {
        let (mut out, offsets) = self.body();
        let size = self.size();

        let xref = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f\r\n");
        for number in 1..size {
            match offsets.get(&number) {
                Some(offset) => out.extend_from_slice(format!("{:010} 00000 n\r\n", offset).as_bytes()),
                None => out.extend_from_slice(b"0000000000 00001 f\r\n"),
            }
        }
        let startxref = self.startxref.unwrap_or(xref);
        out.extend_from_slice(
            format!("trailer\n<< /Size {} {} >>\nstartxref\n{}\n%%EOF\n", size, self.trailer, startxref).as_bytes(),
        );
        out
    }

    /// File indexed by an uncompressed cross-reference stream
    pub fn build_with_xref_stream(&self) -> Vec<u8> {
        let (mut out, offsets) = self.body();
        let stream_number = self.size();
        let size = stream_number + 1;
        let xref = out.len();

        let mut rows = Vec::new();
        for number in 0..size {
            let (kind, value, generation) = match offsets.get(&number) {
                Some(offset) => (1u8, *offset as u32, 0u16),
                None if number == stream_number => (1, xref as u32, 0),
                None if number == 0 => (0, 0, 65535),
                None => (0, 0, 1),
            };
            rows.push(kind);
            rows.extend_from_slice(&value.to_be_bytes());
            rows.extend_from_slice(&generation.to_be_bytes());
        }

        out.extend_from_slice(
            format!(
                "{} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Length {} {} >>\nstream\n",
                stream_number,
                size,
                rows.len(),
                self.trailer
            )
            .as_bytes(),
        );
        out.extend_from_slice(&rows);
        out.extend_from_slice(b"\nendstream\nendobj\n");
        let startxref = self.startxref.unwrap_or(xref);
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", startxref).as_bytes());
        out
    }
}

pub const PAGE_CONTENT: &[u8] = b"BT /F1 12 Tf 72 720 Td (Hello) Tj ET\n1 0 0 rg 0 0 1 RG 72 72 144 144 re B";

/// Three pages with 1, 5 and 2 annotations plus every kind of active content
///
/// Object map:
/// 1 catalog (JavaScript open action 20, name tree 21), 2 page tree root,
/// 3-5 pages, 6 font, 7-9 contents, 10-17 annotations, 20-23 actions.
/// Ids 18 and 19 are free.
pub fn annotated_document() -> PdfBuilder {
    PdfBuilder::new()
        .object(
            1,
            "<< /Type /Catalog /Pages 2 0 R /OpenAction 20 0 R /Names << /JavaScript 21 0 R >> >>",
        )
        .object(
            2,
            "<< /Type /Pages /Kids [3 0 R 4 0 R 5 0 R] /Count 3 /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 6 0 R >> >> >>",
        )
        .object(3, "<< /Type /Page /Parent 2 0 R /Contents 7 0 R /Annots [10 0 R] >>")
        .object(
            4,
            "<< /Type /Page /Parent 2 0 R /Contents 8 0 R /Annots [11 0 R 12 0 R 13 0 R 14 0 R 15 0 R] >>",
        )
        .object(
            5,
            "<< /Type /Page /Parent 2 0 R /Contents 9 0 R /Annots [16 0 R 17 0 R] /Rotate 90 \
             /MediaBox [0 0 595 842] >>",
        )
        .object(6, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>")
        .stream(7, "", PAGE_CONTENT)
        .stream(8, "", PAGE_CONTENT)
        .stream(9, "", PAGE_CONTENT)
        .object(
            10,
            "<< /Type /Annot /Subtype /Link /Rect [72 700 200 720] /A << /S /URI /URI (https://example.com) >> >>",
        )
        .object(11, "<< /Type /Annot /Subtype /Text /Rect [10 10 30 30] /Contents (Note one) >>")
        .object(
            12,
            "<< /Type /Annot /Subtype /Link /Rect [40 10 60 30] /A << /S /GoTo /D [3 0 R /Fit] >> >>",
        )
        .object(
            13,
            "<< /Type /Annot /Subtype /Link /Rect [70 10 90 30] /A << /S /Launch /F (calc.exe) >> >>",
        )
        .object(14, "<< /Type /Annot /Subtype /Widget /Rect [100 10 120 30] /AA << /K 22 0 R >> >>")
        .object(15, "<< /Type /Annot /Subtype /Link /Rect [130 10 150 30] /A 23 0 R >>")
        .object(16, "<< /Type /Annot /Subtype /Text /Rect [10 10 30 30] /Contents (Third page) >>")
        .object(17, "<< /Type /Annot /Subtype /Square /Rect [40 40 80 80] >>")
        .object(20, "<< /Type /Action /S /JavaScript /JS (app.alert\\('hi'\\)) >>")
        .object(21, "<< /Names [(init) 20 0 R] >>")
        .object(22, "<< /S /JavaScript /JS (AFNumber_Keystroke\\(2\\)) >>")
        .object(23, "<< /S /GoToR /F (other.pdf) /D [0 /Fit] >>")
        .trailer("/Root 1 0 R")
}

/// One page whose page tree node lists itself as a kid
pub fn cyclic_page_tree() -> PdfBuilder {
    PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R 2 0 R] /Count 2 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>")
        .stream(4, "", b"0 g")
        .trailer("/Root 1 0 R")
}
