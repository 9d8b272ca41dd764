//! Read, transform every page, optionally sanitize, then write

use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::config::Context;
use crate::content::grayscale::{GrayscaleOptions, GrayscaleStats};
use crate::document::{Document, PageHandle};
use crate::error::{PdfError, PdfResult};
use crate::sanitize::{sanitize, SanitizePolicy, SanitizeReport};
use crate::writer::{write_full, write_incremental};

/// Per-page hook: receives the 1-based page number and a mutable handle
pub type PageCallback<'a> = Box<dyn FnMut(usize, &mut PageHandle<'_>) -> PdfResult<()> + 'a>;

/// How the result is serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Fresh file holding only reachable objects
    #[default]
    Full,
    /// Input bytes kept verbatim with the edits appended
    Incremental,
}

/// What a pipeline run produced
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub bytes: Vec<u8>,
    pub pages: usize,
    pub grayscale: GrayscaleStats,
    pub sanitize: Option<SanitizeReport>,
}

/// A read-transform-write run over one document
///
/// Any page failure aborts the run before anything is written.
pub struct Pipeline<'a> {
    ctx: Context,
    grayscale: Option<GrayscaleOptions>,
    callback: Option<PageCallback<'a>>,
    policy: Option<SanitizePolicy>,
    mode: WriteMode,
}

impl fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("ctx", &self.ctx)
            .field("grayscale", &self.grayscale)
            .field("callback", &self.callback.is_some())
            .field("policy", &self.policy)
            .field("mode", &self.mode)
            .finish()
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            grayscale: None,
            callback: None,
            policy: None,
            mode: WriteMode::Full,
        }
    }

    /// Convert every page to grayscale before the callback runs
    pub fn grayscale(mut self, options: GrayscaleOptions) -> Self {
        self.grayscale = Some(options);
        self
    }

    pub fn on_page<F>(mut self, callback: F) -> Self
    where
        F: FnMut(usize, &mut PageHandle<'_>) -> PdfResult<()> + 'a,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Sanitize after all pages were processed
    pub fn sanitize(mut self, policy: SanitizePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn write_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run over a document held in memory
    pub fn run(&mut self, input: &[u8]) -> PdfResult<PipelineOutput> {
        let mut doc = Document::load_with(input, self.ctx.config.clone())?;
        self.run_document(&mut doc, input)
    }

    /// Run over an already loaded document; `input` is the file it was read from
    pub fn run_document(&mut self, doc: &mut Document, input: &[u8]) -> PdfResult<PipelineOutput> {
        let mut output = PipelineOutput {
            pages: doc.num_pages()?,
            ..PipelineOutput::default()
        };
        debug!("Pipeline over {} pages", output.pages);

        for number in 1..=output.pages {
            self.ctx.cancel.check()?;
            let mut page = PageHandle::new(doc, number)?;
            self.process_page(&mut page, &mut output.grayscale)
                .map_err(|err| PdfError::PageCallbackFailed {
                    page: number,
                    source: Box::new(err),
                })?;
        }

        if let Some(policy) = &self.policy {
            output.sanitize = Some(sanitize(doc, policy, &self.ctx)?);
        }

        output.bytes = match self.mode {
            WriteMode::Full => write_full(doc)?,
            WriteMode::Incremental => write_incremental(doc, input)?,
        };
        info!("Pipeline wrote {} bytes ({:?})", output.bytes.len(), self.mode);
        Ok(output)
    }

    fn process_page(&mut self, page: &mut PageHandle<'_>, total: &mut GrayscaleStats) -> PdfResult<()> {
        if let Some(options) = &self.grayscale {
            let stats = page.convert_to_grayscale(options)?;
            total.operators += stats.operators;
            total.forms += stats.forms;
            total.images += stats.images;
            total.skipped_images.extend(stats.skipped_images);
        }
        if let Some(callback) = self.callback.as_mut() {
            callback(page.number(), page)?;
        }
        Ok(())
    }

    /// Read `input`, run, and write the result to `output`
    pub fn run_file<P: AsRef<Path>, Q: AsRef<Path>>(&mut self, input: P, output: Q) -> PdfResult<PipelineOutput> {
        let data = fs::read(input.as_ref())?;
        info!("Processing {}", input.as_ref().display());
        let result = self.run(&data)?;
        fs::write(output.as_ref(), &result.bytes)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CancellationToken;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn three_pages() -> PdfResult<Vec<u8>> {
        let mut doc = Document::new();
        for i in 0..3 {
            doc.add_page(format!("BT /F1 12 Tf (page {}) Tj ET 1 0 0 rg", i + 1).into_bytes(), None)?;
        }
        doc.add_javascript_open_action("app.alert(1);")?;
        crate::writer::write_full(&doc)
    }

    #[test]
    fn test_callback_sees_every_page() -> PdfResult<()> {
        let input = three_pages()?;
        let mut seen = Vec::new();
        let output = Pipeline::new(Context::default())
            .on_page(|number, page| {
                seen.push(number);
                page.set_rotation(90)
            })
            .run(&input)?;

        assert_eq!(seen, vec![1, 2, 3]);
        let doc = Document::load_mem(&output.bytes)?;
        assert_eq!(doc.page_info(2)?.rotate, 90);
        Ok(())
    }

    #[test]
    fn test_page_failure_aborts_write() -> PdfResult<()> {
        let input = three_pages()?;
        let result = Pipeline::new(Context::default())
            .on_page(|number, _| match number {
                2 => Err(PdfError::MissingDictionaryEntry("Contents".to_string())),
                _ => Ok(()),
            })
            .run(&input);

        assert!(matches!(result, Err(PdfError::PageCallbackFailed { page: 2, .. })));
        Ok(())
    }

    #[test]
    fn test_grayscale_and_sanitize_incrementally() -> PdfResult<()> {
        let input = three_pages()?;
        let output = Pipeline::new(Context::default())
            .grayscale(GrayscaleOptions::default())
            .sanitize(SanitizePolicy::all())
            .write_mode(WriteMode::Incremental)
            .run(&input)?;

        assert_eq!(&output.bytes[..input.len()], &input[..]);
        assert_eq!(output.grayscale.operators, 3);
        assert!(output.sanitize.is_some_and(|report| !report.is_clean()));

        let doc = Document::load_mem(&output.bytes)?;
        assert!(!doc.catalog()?.has("OpenAction"));
        assert!(String::from_utf8_lossy(&doc.page_content(3)?).contains("0.3 g"));
        Ok(())
    }

    #[test]
    fn test_cancelled_run_writes_nothing() -> PdfResult<()> {
        let input = three_pages()?;
        let token = CancellationToken::new();
        token.cancel();
        let result = Pipeline::new(Context::default().with_cancellation(token)).run(&input);
        assert!(matches!(result, Err(PdfError::Cancelled)));
        Ok(())
    }
}
