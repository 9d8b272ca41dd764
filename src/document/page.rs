//! Page tree traversal and page-level edits

use std::collections::HashSet;

use log::{debug, trace, warn};

use crate::content::grayscale::{self, GrayscaleOptions, GrayscaleStats};
use crate::error::{PdfError, PdfResult};
use crate::pdf::{Dictionary, Object, ObjectId, Stream};
use super::Document;

/// Attributes a page inherits from its ancestors
const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// US Letter, used when no MediaBox is found anywhere up the tree
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// A page of the document, addressed by its 1-based number and object id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub id: ObjectId,
}

/// Geometry of a page after inheritance
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub media_box: [f64; 4],
    pub crop_box: Option<[f64; 4]>,
    pub rotate: i64,
}

/// Summary of one annotation
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationSummary {
    /// Id of the annotation when it is an indirect object
    pub id: Option<ObjectId>,
    pub subtype: String,
    pub rect: Option<[f64; 4]>,
    pub contents: Option<String>,
}

fn read_rect(object: Option<&Object>) -> Option<[f64; 4]> {
    let values = object?.as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let mut rect = [0.0; 4];
    for (slot, value) in rect.iter_mut().zip(values) {
        *slot = value.as_f64().ok()?;
    }
    Some(rect)
}

impl Document {
    /// Walk the page tree in document order
    ///
    /// Returns the leaves found plus the node at which a cycle was cut, if
    /// any. A node that is its own ancestor is a cycle. A subtree shared by
    /// two parents is walked only where it first appears. The walk always
    /// terminates.
    pub fn walk_page_tree(&self) -> PdfResult<(Vec<ObjectId>, Option<ObjectId>)> {
        enum Step {
            Enter(ObjectId),
            Leave(ObjectId),
        }

        let root = self
            .catalog()?
            .get_reference("Pages")
            .ok_or_else(|| PdfError::MissingDictionaryEntry("Pages".to_string()))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        let mut ancestors = HashSet::new();
        let mut cycle = None;
        let mut stack = vec![Step::Enter(root)];

        while let Some(step) = stack.pop() {
            let id = match step {
                Step::Enter(id) => id,
                Step::Leave(id) => {
                    ancestors.remove(&id);
                    continue;
                }
            };
            if ancestors.contains(&id) {
                warn!("Page tree node {} is its own ancestor; cutting the cycle", id);
                cycle.get_or_insert(id);
                continue;
            }
            if !visited.insert(id) {
                warn!("Page tree node {} has more than one parent; keeping its first position", id);
                continue;
            }

            let node = match self.get_object(id).and_then(Object::as_dict) {
                Ok(node) => node,
                Err(err) => {
                    warn!("Skipping page tree node {}: {}", id, err);
                    continue;
                }
            };

            match node.get("Kids") {
                Some(kids) if !node.type_is("Page") => {
                    let kids = self.resolve(kids)?.as_array()?;
                    ancestors.insert(id);
                    stack.push(Step::Leave(id));
                    // Reverse so the stack pops kids in order
                    for kid in kids.iter().rev() {
                        match kid {
                            Object::Reference(kid) => stack.push(Step::Enter(*kid)),
                            other => warn!("Ignoring direct {} in /Kids of {}", other.type_name(), id),
                        }
                    }
                }
                _ => pages.push(id),
            }
        }

        trace!("Page tree has {} pages", pages.len());
        Ok((pages, cycle))
    }

    /// Page object ids in document order, cached until the next edit
    pub fn page_ids(&self) -> PdfResult<&[ObjectId]> {
        self.page_cache
            .get_or_try_init(|| match self.walk_page_tree()? {
                (_, Some(node)) => Err(PdfError::CyclicStructure(node)),
                (pages, None) => Ok(pages),
            })
            .map(Vec::as_slice)
    }

    pub fn num_pages(&self) -> PdfResult<usize> {
        Ok(self.page_ids()?.len())
    }

    /// Page `number`, counting from 1
    pub fn get_page(&self, number: usize) -> PdfResult<Page> {
        let ids = self.page_ids()?;
        if number == 0 || number > ids.len() {
            return Err(PdfError::PageOutOfRange {
                page: number,
                count: ids.len(),
            });
        }
        Ok(Page {
            number,
            id: ids[number - 1],
        })
    }

    pub fn pages(&self) -> PdfResult<Vec<Page>> {
        Ok(self
            .page_ids()?
            .iter()
            .enumerate()
            .map(|(i, id)| Page { number: i + 1, id: *id })
            .collect())
    }

    /// Append a page with the given content to the root of the page tree
    pub fn add_page(&mut self, content: Vec<u8>, media_box: Option<[f64; 4]>) -> PdfResult<Page> {
        let pages_id = self
            .catalog()?
            .get_reference("Pages")
            .ok_or_else(|| PdfError::MissingDictionaryEntry("Pages".to_string()))?;

        let stream = self.new_content_stream(content)?;
        let contents = self.add_object(stream);
        let media_box: Vec<Object> = media_box.unwrap_or(DEFAULT_MEDIA_BOX).iter().map(|v| Object::Real(*v)).collect();

        let mut page = Dictionary::new();
        page.set("Type", "Page");
        page.set("Parent", pages_id);
        page.set("MediaBox", media_box);
        page.set("Resources", Dictionary::new());
        page.set("Contents", contents);
        let page_id = self.add_object(page);

        let pages = self.get_dictionary_mut(pages_id)?;
        match pages.get_mut("Kids") {
            Some(Object::Array(kids)) => kids.push(Object::Reference(page_id)),
            _ => pages.set("Kids", vec![Object::Reference(page_id)]),
        }
        let count = pages.get_integer("Count").unwrap_or(0) + 1;
        pages.set("Count", count);

        let number = self.num_pages()?;
        debug!("Added page {} as {}", number, page_id);
        Ok(Page { number, id: page_id })
    }

    /// Value of an inheritable attribute, looking up the `/Parent` chain
    pub fn inherited_attribute(&self, page_id: ObjectId, key: &str) -> PdfResult<Option<&Object>> {
        let mut visited = HashSet::new();
        let mut current = Some(page_id);

        while let Some(id) = current {
            if !visited.insert(id) {
                warn!("Cyclic /Parent chain at {}", id);
                return Err(PdfError::CyclicStructure(id));
            }
            let node = self.get_dictionary(id)?;
            if let Some(value) = node.get(key) {
                return Ok(Some(value));
            }
            if !INHERITABLE.contains(&key) {
                return Ok(None);
            }
            current = node.get_reference("Parent");
        }
        Ok(None)
    }

    fn inherited_resolved(&self, page_id: ObjectId, key: &str) -> PdfResult<Option<&Object>> {
        match self.inherited_attribute(page_id, key)? {
            Some(value) => Ok(Some(self.resolve(value)?)),
            None => Ok(None),
        }
    }

    /// Effective resources of a page
    ///
    /// The page's own entries are merged over those of its ancestors; the
    /// nearest definition of a key wins.
    pub fn page_resources(&self, page: usize) -> PdfResult<Dictionary> {
        let page_id = self.get_page(page)?.id;
        self.node_resources(page_id)
    }

    pub(crate) fn node_resources(&self, node_id: ObjectId) -> PdfResult<Dictionary> {
        let mut merged = Dictionary::new();
        let mut visited = HashSet::new();
        let mut current = Some(node_id);

        while let Some(id) = current {
            if !visited.insert(id) {
                return Err(PdfError::CyclicStructure(id));
            }
            let node = self.get_dictionary(id)?;
            if let Some(resources) = node.get("Resources") {
                merged.inherit_from(self.resolve_dict(resources)?);
            }
            current = node.get_reference("Parent");
        }
        Ok(merged)
    }

    /// MediaBox, CropBox and Rotate after inheritance
    pub fn page_info(&self, page: usize) -> PdfResult<PageInfo> {
        let page_id = self.get_page(page)?.id;

        let media_box = read_rect(self.inherited_resolved(page_id, "MediaBox")?).unwrap_or_else(|| {
            warn!("Page {} has no usable MediaBox, assuming Letter", page);
            DEFAULT_MEDIA_BOX
        });
        let crop_box = read_rect(self.inherited_resolved(page_id, "CropBox")?);
        let rotate = self
            .inherited_resolved(page_id, "Rotate")?
            .and_then(|r| r.as_i64().ok())
            .unwrap_or(0);

        Ok(PageInfo {
            media_box,
            crop_box,
            rotate: rotate.rem_euclid(360),
        })
    }

    /// Set `/Rotate` on the page itself
    pub fn set_rotation(&mut self, page: usize, degrees: i64) -> PdfResult<()> {
        if degrees % 90 != 0 {
            return Err(PdfError::InvalidObjectType {
                expected: "multiple of 90 degrees",
                found: "integer",
            });
        }
        let page_id = self.get_page(page)?.id;
        self.get_dictionary_mut(page_id)?.set("Rotate", degrees.rem_euclid(360));
        Ok(())
    }

    /// Ids of the content streams of a page, in drawing order
    pub fn content_stream_ids(&self, page: usize) -> PdfResult<Vec<ObjectId>> {
        let page_id = self.get_page(page)?.id;
        self.node_content_ids(page_id)
    }

    fn node_content_ids(&self, page_id: ObjectId) -> PdfResult<Vec<ObjectId>> {
        match self.get_dictionary(page_id)?.get("Contents") {
            None | Some(Object::Null) => Ok(Vec::new()),
            Some(Object::Reference(id)) => match self.get_object(*id)? {
                Object::Array(items) => Ok(items.iter().filter_map(|i| i.as_reference().ok()).collect()),
                _ => Ok(vec![*id]),
            },
            Some(Object::Array(items)) => Ok(items.iter().filter_map(|i| i.as_reference().ok()).collect()),
            Some(other) => Err(PdfError::InvalidObjectType {
                expected: "content stream reference",
                found: other.type_name(),
            }),
        }
    }

    /// Decoded content of a page, streams joined by newlines
    pub fn page_content(&self, page: usize) -> PdfResult<Vec<u8>> {
        let mut content = Vec::new();
        for (i, id) in self.content_stream_ids(page)?.into_iter().enumerate() {
            if i > 0 {
                content.push(b'\n');
            }
            let stream = self
                .get_object(id)?
                .as_stream()
                .map_err(|_| PdfError::malformed_stream(Some(id), "page content is not a stream"))?;
            content.extend_from_slice(stream.decoded()?);
        }
        Ok(content)
    }

    /// Stream for new content, compressed as configured
    pub fn new_content_stream(&self, content: Vec<u8>) -> PdfResult<Stream> {
        let level = self.config.compress_new_streams.then_some(self.config.compression_level);
        Stream::from_content(Dictionary::new(), content, level)
    }

    /// Replace the content of a page with `stream`
    ///
    /// The stream is stored as a new object and the page's `/Contents` is
    /// pointed at it. Streams the page used before are left in the store.
    pub fn set_page_content(&mut self, page: usize, stream: Stream) -> PdfResult<ObjectId> {
        let page_id = self.get_page(page)?.id;
        let stream_id = self.add_object(stream);
        self.get_dictionary_mut(page_id)?.set("Contents", stream_id);
        debug!("Page {} content replaced by {}", page, stream_id);
        Ok(stream_id)
    }

    /// Drop the `/Annots` array of a page, returning how many entries it had
    ///
    /// The annotation objects stay in the store; a full rewrite leaves out the
    /// ones nothing else refers to.
    pub fn remove_annotations(&mut self, page: usize) -> PdfResult<usize> {
        let page_id = self.get_page(page)?.id;
        let count = match self.get_dictionary(page_id)?.get("Annots") {
            None => return Ok(0),
            Some(annots) => self.resolve(annots)?.as_array().map(Vec::len).unwrap_or(0),
        };

        self.get_dictionary_mut(page_id)?.remove("Annots");
        debug!("Removed {} annotations from page {}", count, page);
        Ok(count)
    }

    /// Annotations of a page
    pub fn annotations(&self, page: usize) -> PdfResult<Vec<AnnotationSummary>> {
        let page_id = self.get_page(page)?.id;
        let annots = match self.get_dictionary(page_id)?.get("Annots") {
            Some(annots) => self.resolve(annots)?.as_array()?,
            None => return Ok(Vec::new()),
        };

        let mut summaries = Vec::with_capacity(annots.len());
        for entry in annots {
            let id = entry.as_reference().ok();
            let dict = match self.resolve(entry).and_then(Object::as_dict) {
                Ok(dict) => dict,
                Err(err) => {
                    warn!("Unreadable annotation on page {}: {}", page, err);
                    continue;
                }
            };
            summaries.push(AnnotationSummary {
                id,
                subtype: dict.get_name("Subtype").unwrap_or("Unknown").to_string(),
                rect: read_rect(dict.get("Rect").and_then(|r| self.resolve(r).ok())),
                contents: dict.get_string("Contents").map(super::info::decode_text_string),
            });
        }
        Ok(summaries)
    }
}

/// Mutable view of one page, handed to per-page callbacks
pub struct PageHandle<'a> {
    doc: &'a mut Document,
    page: Page,
}

impl<'a> PageHandle<'a> {
    pub fn new(doc: &'a mut Document, number: usize) -> PdfResult<Self> {
        let page = doc.get_page(number)?;
        Ok(Self { doc, page })
    }

    /// 1-based page number
    pub fn number(&self) -> usize {
        self.page.number
    }

    pub fn id(&self) -> ObjectId {
        self.page.id
    }

    pub fn dictionary(&self) -> PdfResult<&Dictionary> {
        self.doc.get_dictionary(self.page.id)
    }

    pub fn dictionary_mut(&mut self) -> PdfResult<&mut Dictionary> {
        self.doc.get_dictionary_mut(self.page.id)
    }

    pub fn resources(&self) -> PdfResult<Dictionary> {
        self.doc.page_resources(self.page.number)
    }

    pub fn info(&self) -> PdfResult<PageInfo> {
        self.doc.page_info(self.page.number)
    }

    pub fn content(&self) -> PdfResult<Vec<u8>> {
        self.doc.page_content(self.page.number)
    }

    /// Replace the page content with `content`
    pub fn set_content(&mut self, content: Vec<u8>) -> PdfResult<ObjectId> {
        let stream = self.doc.new_content_stream(content)?;
        self.doc.set_page_content(self.page.number, stream)
    }

    pub fn annotations(&self) -> PdfResult<Vec<AnnotationSummary>> {
        self.doc.annotations(self.page.number)
    }

    pub fn remove_annotations(&mut self) -> PdfResult<usize> {
        self.doc.remove_annotations(self.page.number)
    }

    pub fn set_rotation(&mut self, degrees: i64) -> PdfResult<()> {
        self.doc.set_rotation(self.page.number, degrees)
    }

    pub fn convert_to_grayscale(&mut self, options: &GrayscaleOptions) -> PdfResult<GrayscaleStats> {
        grayscale::convert_page(self.doc, self.page.number, options)
    }

    pub fn document(&self) -> &Document {
        self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        self.doc
    }
}
