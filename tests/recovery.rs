mod common;

use pdf_surgeon::pdf::{find_startxref, Filter};
use pdf_surgeon::{write_full, Config, Document, GrayscaleOptions, ObjectId, PdfError, PdfResult};
use pretty_assertions::assert_eq;
use rstest::rstest;

use common::{annotated_document, PdfBuilder};

fn strict() -> Config {
    Config::default().with_recover_xref(false)
}

/// Point `/Prev` of the only section back at itself
fn self_referencing_prev() -> PdfResult<Vec<u8>> {
    let data = annotated_document().trailer("/Root 1 0 R /Prev 0000000000").build();
    let offset = find_startxref(&data)?;
    let text = String::from_utf8_lossy(&data).replace("/Prev 0000000000", &format!("/Prev {:010}", offset));
    Ok(text.into_bytes())
}

#[test_log::test]
fn test_bad_startxref_is_rebuilt() -> PdfResult<()> {
    let data = annotated_document().startxref(99999).build();

    assert!(matches!(
        Document::load_with(&data, strict()),
        Err(PdfError::BrokenXRefChain { .. })
    ));

    let doc = Document::load_mem(&data)?;
    assert_eq!(doc.num_pages()?, 3);
    assert!(doc.base_revision().is_none());
    assert_eq!(doc.annotations(2)?.len(), 5);
    Ok(())
}

#[test_log::test]
fn test_cyclic_prev_chain() -> PdfResult<()> {
    let data = self_referencing_prev()?;

    assert!(matches!(
        Document::load_with(&data, strict()),
        Err(PdfError::BrokenXRefChain { .. })
    ));
    assert_eq!(Document::load_mem(&data)?.num_pages()?, 3);
    Ok(())
}

#[test_log::test]
fn test_recovered_document_can_be_rewritten() -> PdfResult<()> {
    let data = annotated_document().startxref(12).build();
    let rewritten = write_full(&Document::load_mem(&data)?)?;

    let doc = Document::load_with(&rewritten, strict())?;
    assert_eq!(doc.num_pages()?, 3);
    assert_eq!(doc.page_info(3)?.rotate, 90);
    Ok(())
}

#[test_log::test]
fn test_encrypted_file_is_refused() {
    let data = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, "<< /Filter /Standard /V 4 /R 4 /Length 128 >>")
        .trailer("/Root 1 0 R /Encrypt 3 0 R")
        .build();

    match Document::load_mem(&data) {
        Err(PdfError::UnsupportedEncryption(filter)) => assert_eq!(filter, "Standard"),
        other => panic!("expected an encryption error, got {:?}", other.map(|doc| doc.len())),
    }
}

#[rstest]
#[case::too_deep(64, false)]
#[case::at_limit(64, true)]
#[case::raised_limit(128, false)]
fn test_nesting_limit(#[case] max_depth: usize, #[case] shallow: bool) {
    let levels = if shallow { 60 } else { 100 };
    let nested = format!("{}{}", "[".repeat(levels), "]".repeat(levels));
    let data = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, &nested)
        .trailer("/Root 1 0 R")
        .build();

    let result = Document::load_with(&data, Config::default().with_max_depth(max_depth));
    if levels > max_depth {
        assert!(matches!(result, Err(PdfError::StructureTooDeep { .. })));
    } else {
        assert!(result.is_ok());
    }
}

#[test_log::test]
fn test_stream_length_past_end_of_file() {
    let data = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .object(3, "<< /Length 100000 >>\nstream\nshort\nendstream")
        .trailer("/Root 1 0 R")
        .build();

    assert!(matches!(
        Document::load_mem(&data),
        Err(PdfError::MalformedStream { id: Some(id), .. }) if id.number == 3
    ));
}

#[test_log::test]
fn test_garbage_before_header_is_skipped() -> PdfResult<()> {
    let mut data = b"junk\n".to_vec();
    data.extend_from_slice(&annotated_document().build());

    // every offset is now five bytes short, so objects are found by scanning
    let doc = Document::load_mem(&data)?;
    assert_eq!(doc.num_pages()?, 3);
    assert_eq!(doc.version(), "1.7");
    Ok(())
}

#[test_log::test]
fn test_missing_header() {
    let data = annotated_document().build();
    assert!(matches!(
        Document::load_mem(&data[9..]),
        Err(PdfError::MalformedObject { offset: 0, .. })
    ));
}

#[rstest]
#[case::start_past_object_numbers("9223372036854775807")]
#[case::start_at_last_object_number("4294967295")]
fn test_subsection_outside_object_numbers(#[case] start: &str) -> PdfResult<()> {
    let data = String::from_utf8_lossy(&annotated_document().build())
        .replacen("xref\n0 ", &format!("xref\n{} ", start), 1)
        .into_bytes();

    assert!(matches!(
        Document::load_with(&data, strict()),
        Err(PdfError::BrokenXRefChain { .. })
    ));
    assert_eq!(Document::load_mem(&data)?.num_pages()?, 3);
    Ok(())
}

#[test_log::test]
fn test_object_stream_claiming_too_many_objects() -> PdfResult<()> {
    let data = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .stream(5, "/Type /ObjStm /N 1000000000000000000 /First 4", b"6 0 (six)")
        .trailer("/Root 1 0 R")
        .startxref(99999)
        .build();

    let doc = Document::load_mem(&data)?;
    assert_eq!(doc.num_pages()?, 0);
    assert!(!doc.has_object(ObjectId::new(6, 0)));
    Ok(())
}

#[test_log::test]
fn test_predictor_row_larger_than_stream() -> PdfResult<()> {
    let content = Filter::FlateDecode.encode(&[2, 1, 2, 3, 2, 1, 1, 1])?;
    let data = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>")
        .stream(
            4,
            "/Filter /FlateDecode /DecodeParms << /Predictor 12 /Columns 4611686018427387904 /Colors 4 >>",
            &content,
        )
        .trailer("/Root 1 0 R")
        .build();

    let doc = Document::load_mem(&data)?;
    assert!(matches!(doc.page_content(1), Err(PdfError::Compression(_))));
    Ok(())
}

#[test_log::test]
fn test_image_larger_than_its_samples() -> PdfResult<()> {
    let data = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(
            2,
            "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 100 100] \
             /Resources << /XObject << /Im0 5 0 R >> >> >>",
        )
        .object(3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>")
        .stream(4, "", b"q 100 0 0 100 0 0 cm /Im0 Do Q")
        .stream(
            5,
            "/Type /XObject /Subtype /Image /Width 8589934592 /Height 8589934592 \
             /ColorSpace /DeviceRGB /BitsPerComponent 8",
            &[0, 255, 0],
        )
        .trailer("/Root 1 0 R")
        .build();
    let mut doc = Document::load_mem(&data)?;

    assert!(matches!(
        doc.convert_to_grayscale(&GrayscaleOptions::default()),
        Err(PdfError::MalformedStream { id: Some(id), .. }) if id == ObjectId::new(5, 0)
    ));
    Ok(())
}
