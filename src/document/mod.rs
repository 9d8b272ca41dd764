//! Document graph: the object store plus catalog, page tree and edits

mod actions;
mod info;
mod page;
mod revision;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use rayon::prelude::*;

use crate::config::Config;
use crate::dictionary;
use crate::error::{PdfError, PdfResult};
use crate::pdf::{BaseRevision, Dictionary, Object, ObjectId, Reader, XRefEntry, XRefTable};
use crate::writer;

pub use actions::JAVASCRIPT_NAME_PREFIX;
pub use info::DocumentInfo;
pub use page::{AnnotationSummary, Page, PageHandle, PageInfo};
pub use revision::{revision_bytes, revision_count};

const DEFAULT_VERSION: &str = "1.7";

/// A PDF document: the object store and the tables that index it
///
/// Every indirect object lives in the store keyed by id. Components pass ids
/// around and resolve them here, so edits are always made in place.
#[derive(Debug)]
pub struct Document {
    version: String,
    trailer: Dictionary,
    xref: XRefTable,
    objects: BTreeMap<ObjectId, Object>,
    dirty: BTreeSet<ObjectId>,
    freed: BTreeSet<ObjectId>,
    base: Option<BaseRevision>,
    page_cache: OnceCell<Vec<ObjectId>>,
    incomplete: Option<&'static str>,
    config: Config,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document with a catalog and an empty page tree
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut doc = Self::empty(config);
        let pages = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        let catalog = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages,
        });
        doc.trailer.set("Root", catalog);
        doc
    }

    fn empty(config: Config) -> Self {
        let mut xref = XRefTable::new();
        xref.insert(0, XRefEntry::Free { next: 0, generation: crate::pdf::xref::MAX_GENERATION });
        Self {
            version: DEFAULT_VERSION.to_string(),
            trailer: Dictionary::new(),
            xref,
            objects: BTreeMap::new(),
            dirty: BTreeSet::new(),
            freed: BTreeSet::new(),
            base: None,
            page_cache: OnceCell::new(),
            incomplete: None,
            config,
        }
    }

    /// Load a document from a file
    pub fn load<P: AsRef<Path>>(path: P) -> PdfResult<Self> {
        let data = fs::read(path.as_ref())?;
        info!("Loading {} ({} bytes)", path.as_ref().display(), data.len());
        Self::load_with(&data, Config::default())
    }

    /// Load a document from memory with default settings
    pub fn load_mem(data: &[u8]) -> PdfResult<Self> {
        Self::load_with(data, Config::default())
    }

    /// Load a document from memory
    pub fn load_with(data: &[u8], config: Config) -> PdfResult<Self> {
        let loaded = Reader::new(data, &config).read()?;
        let doc = Self {
            version: loaded.version,
            trailer: loaded.trailer,
            xref: loaded.xref,
            objects: loaded.objects,
            dirty: BTreeSet::new(),
            freed: BTreeSet::new(),
            base: loaded.base,
            page_cache: OnceCell::new(),
            incomplete: None,
            config,
        };

        if doc.config.parallel_decode {
            for (id, err) in doc.decode_streams_parallel() {
                warn!("Stream {} could not be decoded: {}", id, err);
            }
        }
        Ok(doc)
    }

    /// Write a full rewrite to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PdfResult<()> {
        let bytes = writer::write_full(self)?;
        fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    /// Append an incremental update to a copy of `base` and write it to `path`
    pub fn save_incremental<P: AsRef<Path>>(&self, base: &[u8], path: P) -> PdfResult<()> {
        let bytes = writer::write_incremental(self, base)?;
        fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn trailer_mut(&mut self) -> &mut Dictionary {
        self.invalidate_pages();
        &mut self.trailer
    }

    pub fn xref(&self) -> &XRefTable {
        &self.xref
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Last cross-reference section of the file this document was read from
    pub fn base_revision(&self) -> Option<BaseRevision> {
        self.base
    }

    pub fn has_object(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Number of objects in the store
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &Object)> + '_ {
        self.objects.iter().map(|(id, object)| (*id, object))
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn get_object(&self, id: ObjectId) -> PdfResult<&Object> {
        self.objects.get(&id).ok_or(PdfError::ObjectNotFound(id))
    }

    /// Mutable access; the object is recorded as dirty
    pub fn get_object_mut(&mut self, id: ObjectId) -> PdfResult<&mut Object> {
        let object = self.objects.get_mut(&id).ok_or(PdfError::ObjectNotFound(id))?;
        self.dirty.insert(id);
        self.page_cache = OnceCell::new();
        Ok(object)
    }

    pub fn get_dictionary(&self, id: ObjectId) -> PdfResult<&Dictionary> {
        self.get_object(id)?.as_dict()
    }

    pub fn get_dictionary_mut(&mut self, id: ObjectId) -> PdfResult<&mut Dictionary> {
        self.get_object_mut(id)?.as_dict_mut()
    }

    /// Store `object` under `id`, replacing any previous value
    pub fn set_object(&mut self, id: ObjectId, object: impl Into<Object>) {
        if self.xref.resolve(id).is_err() {
            self.xref.insert(id.number, XRefEntry::Allocated { generation: id.generation });
        }
        self.objects.insert(id, object.into());
        self.freed.remove(&id);
        self.mark_dirty(id);
    }

    /// Store a new object under a fresh id
    pub fn add_object(&mut self, object: impl Into<Object>) -> ObjectId {
        let id = self.xref.allocate();
        self.objects.insert(id, object.into());
        self.freed.remove(&id);
        self.mark_dirty(id);
        debug!("Added object {}", id);
        id
    }

    /// Remove an object and free its id
    pub fn delete_object(&mut self, id: ObjectId) -> PdfResult<Object> {
        let object = self.objects.remove(&id).ok_or(PdfError::ObjectNotFound(id))?;
        self.xref.free(id);
        self.dirty.remove(&id);
        self.freed.insert(id);
        self.invalidate_pages();
        Ok(object)
    }

    /// Follow one level of indirection
    ///
    /// A reference whose target is itself a reference resolves to that
    /// reference, not to the end of the chain.
    pub fn resolve<'a>(&'a self, object: &'a Object) -> PdfResult<&'a Object> {
        match object {
            Object::Reference(id) => self.get_object(*id),
            direct => Ok(direct),
        }
    }

    /// Resolve a dictionary value that may be direct or indirect
    pub fn resolve_dict<'a>(&'a self, object: &'a Object) -> PdfResult<&'a Dictionary> {
        self.resolve(object)?.as_dict()
    }

    pub fn catalog_id(&self) -> PdfResult<ObjectId> {
        self.trailer
            .get_reference("Root")
            .ok_or_else(|| PdfError::MissingDictionaryEntry("Root".to_string()))
    }

    pub fn catalog(&self) -> PdfResult<&Dictionary> {
        self.get_dictionary(self.catalog_id()?)
    }

    /// Ids modified or created since loading, in ascending order
    pub fn dirty_ids(&self) -> Vec<ObjectId> {
        self.dirty.iter().copied().collect()
    }

    pub fn is_dirty(&self, id: ObjectId) -> bool {
        self.dirty.contains(&id)
    }

    /// Ids deleted since loading
    pub fn freed_ids(&self) -> Vec<ObjectId> {
        self.freed.iter().copied().collect()
    }

    pub(crate) fn mark_dirty(&mut self, id: ObjectId) {
        self.dirty.insert(id);
        self.invalidate_pages();
    }

    pub(crate) fn invalidate_pages(&mut self) {
        self.page_cache = OnceCell::new();
    }

    /// Detach an object for an in-place edit that needs `&self` lookups
    pub(crate) fn take_object(&mut self, id: ObjectId) -> Option<Object> {
        self.objects.remove(&id)
    }

    /// Put back an object taken with [`Document::take_object`]
    pub(crate) fn restore_object(&mut self, id: ObjectId, object: Object, changed: bool) {
        self.objects.insert(id, object);
        if changed {
            self.mark_dirty(id);
        }
    }

    /// Record that a pass over the document was interrupted
    pub(crate) fn mark_incomplete(&mut self, pass: &'static str) {
        warn!("Document marked incomplete by the {} pass", pass);
        self.incomplete = Some(pass);
    }

    /// Name of the interrupted pass that makes this document unwritable
    pub fn incomplete(&self) -> Option<&'static str> {
        self.incomplete
    }

    /// Decode every stream body concurrently, filling the lazy caches
    ///
    /// Streams kept in an image codec are skipped. Failures are returned,
    /// not raised, so one bad stream does not hide the others.
    pub fn decode_streams_parallel(&self) -> Vec<(ObjectId, PdfError)> {
        let streams: Vec<(ObjectId, &crate::pdf::Stream)> = self
            .objects
            .iter()
            .filter_map(|(id, object)| match object {
                Object::Stream(stream) if !stream.is_decoded() && !stream.has_image_codec() => {
                    Some((*id, stream))
                }
                _ => None,
            })
            .collect();

        debug!("Decoding {} streams in parallel", streams.len());
        streams
            .par_iter()
            .filter_map(|(id, stream)| stream.decoded().err().map(|err| (*id, err)))
            .collect()
    }
}

/// A document behind one coarse exclusive lock
///
/// This is the safe way to share a document between threads: every edit
/// holds the lock for its whole read-modify-write sequence.
#[derive(Debug, Clone)]
pub struct SharedDocument(Arc<Mutex<Document>>);

impl SharedDocument {
    pub fn new(doc: Document) -> Self {
        Self(Arc::new(Mutex::new(doc)))
    }

    /// Exclusive access to the document
    pub fn lock(&self) -> MutexGuard<'_, Document> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access
    pub fn with<T>(&self, f: impl FnOnce(&mut Document) -> T) -> T {
        f(&mut self.lock())
    }
}

impl From<Document> for SharedDocument {
    fn from(doc: Document) -> Self {
        Self::new(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::Stream;
    use pretty_assertions::assert_eq;
    use std::thread;
    use test_log::test;

    #[test]
    fn test_new_document_has_catalog() -> PdfResult<()> {
        let doc = Document::new();
        let catalog = doc.catalog()?;
        assert!(catalog.type_is("Catalog"));
        assert_eq!(doc.num_pages()?, 0);
        Ok(())
    }

    #[test]
    fn test_mutation_marks_dirty() -> PdfResult<()> {
        let mut doc = Document::new();
        let id = doc.add_object(Object::Integer(1));
        assert!(doc.is_dirty(id));

        let catalog = doc.catalog_id()?;
        doc.dirty = BTreeSet::new();
        doc.get_dictionary(catalog)?;
        assert!(doc.dirty_ids().is_empty());

        doc.get_dictionary_mut(catalog)?.set("Lang", Object::string_literal("en"));
        assert_eq!(doc.dirty_ids(), vec![catalog]);
        Ok(())
    }

    #[test]
    fn test_resolve_follows_one_level() -> PdfResult<()> {
        let mut doc = Document::new();
        let target = doc.add_object(Object::Integer(42));
        let middle = doc.add_object(Object::Reference(target));

        let reference = Object::Reference(middle);
        assert_eq!(doc.resolve(&reference)?, &Object::Reference(target));
        assert_eq!(doc.resolve(doc.resolve(&reference)?)?, &Object::Integer(42));
        assert_eq!(doc.resolve(&Object::Integer(3))?, &Object::Integer(3));
        Ok(())
    }

    #[test]
    fn test_delete_then_reuse_id() -> PdfResult<()> {
        let mut doc = Document::new();
        let id = doc.add_object(Object::Null);
        doc.delete_object(id)?;

        assert!(matches!(doc.get_object(id), Err(PdfError::ObjectNotFound(_))));
        assert_eq!(doc.freed_ids(), vec![id]);

        let reused = doc.add_object(Object::Boolean(true));
        assert_eq!(reused.number, id.number);
        assert_eq!(reused.generation, id.generation + 1);
        Ok(())
    }

    #[test]
    fn test_parallel_decode_reports_failures() -> PdfResult<()> {
        let mut doc = Document::new();
        let good = doc.add_object(Stream::from_content(Dictionary::new(), b"q Q".to_vec(), Some(6))?);
        let bad = doc.add_object(Stream::new(dictionary! { "Filter" => "FlateDecode" }, b"not zlib".to_vec()));

        let failures = doc.decode_streams_parallel();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, bad);
        assert!(doc.get_object(good)?.as_stream()?.is_decoded());
        Ok(())
    }

    #[test]
    fn test_shared_document_across_threads() {
        let shared = SharedDocument::new(Document::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                thread::spawn(move || shared.with(|doc| doc.add_object(Object::Integer(i))))
            })
            .collect();

        let mut ids: Vec<ObjectId> = handles.into_iter().filter_map(|h| h.join().ok()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(shared.lock().len(), 6);
    }
}
