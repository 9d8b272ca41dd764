//! Earlier revisions kept in an incrementally updated file

use log::debug;

use crate::config::Config;
use crate::error::{PdfError, PdfResult};
use super::Document;

const EOF_MARKER: &[u8] = b"%%EOF";

/// End offsets of every revision: just past each `%%EOF` and its line end
fn revision_ends(data: &[u8]) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut from = 0;

    while let Some(index) = data[from..]
        .windows(EOF_MARKER.len())
        .position(|window| window == EOF_MARKER)
    {
        let mut end = from + index + EOF_MARKER.len();
        if data.get(end) == Some(&b'\r') {
            end += 1;
        }
        if data.get(end) == Some(&b'\n') {
            end += 1;
        }
        ends.push(end);
        from = end;
    }
    ends
}

/// Number of revisions (original plus incremental updates) in `data`
pub fn revision_count(data: &[u8]) -> usize {
    revision_ends(data).len()
}

/// Bytes of revision `revision`, counting the original file as 1
pub fn revision_bytes(data: &[u8], revision: usize) -> PdfResult<&[u8]> {
    let ends = revision_ends(data);
    if revision == 0 || revision > ends.len() {
        return Err(PdfError::RevisionOutOfRange {
            revision,
            count: ends.len(),
        });
    }
    Ok(&data[..ends[revision - 1]])
}

impl Document {
    /// Load the document as it was at `revision`
    pub fn load_revision(data: &[u8], revision: usize, config: Config) -> PdfResult<Self> {
        let bytes = revision_bytes(data, revision)?;
        debug!("Loading revision {} ({} of {} bytes)", revision, bytes.len(), data.len());
        Self::load_with(bytes, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_revision_boundaries() -> PdfResult<()> {
        let data = b"%PDF-1.4\nbody\n%%EOF\r\nupdate\n%%EOF\nupdate2\n%%EOF";
        assert_eq!(revision_count(data), 3);
        assert_eq!(revision_bytes(data, 1)?, b"%PDF-1.4\nbody\n%%EOF\r\n");
        assert_eq!(revision_bytes(data, 3)?, &data[..]);
        assert!(matches!(
            revision_bytes(data, 4),
            Err(PdfError::RevisionOutOfRange { revision: 4, count: 3 })
        ));
        Ok(())
    }
}
