//! The canonical artifact as a PDF object graph.
//!
//! [`ArtifactDocument`] wraps a `lopdf::Document` and only ever appends:
//!
//! 1. pages already in the loaded artifact stay first and untouched;
//! 2. [`ArtifactDocument::append_image_page`] adds one page per image, with the
//!    JPEG embedded as-is under `/DCTDecode`;
//! 3. [`ArtifactDocument::append_document`] copies every page of another PDF,
//!    together with the objects it references. Content streams are moved as
//!    raw bytes, so nothing is re-encoded.
//!
//! Copied pages lose their original page-tree parent, so attributes they
//! inherited from it (`MediaBox`, `CropBox`, `Resources`, `Rotate`) are
//! written onto the page itself first. Objects are imported by walking
//! references from each page, which leaves the source's catalog, outlines and
//! cross-reference streams behind.
//!
//! All methods are blocking; callers run them in `spawn_blocking`.

use crate::pipeline::layout::Placement;
use crate::pipeline::normalize::NormalizedImage;
use lopdf::content::{Content, Operation};
use lopdf::xref::XrefType;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use thiserror::Error;

const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guards against cyclic `/Parent` chains in malformed input.
const MAX_TREE_DEPTH: usize = 64;

const IMAGE_NAME: &str = "Im0";

/// Why a PDF could not be loaded or extended.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("cannot parse PDF: {0}")]
    Parse(String),

    #[error("document is encrypted")]
    Encrypted,

    #[error("document has no pages")]
    Empty,

    #[error("malformed page tree: {0}")]
    Structure(String),

    #[error("cannot serialise PDF: {0}")]
    Serialize(String),
}

fn structure(e: lopdf::Error) -> DocumentError {
    DocumentError::Structure(e.to_string())
}

/// Parse a structured-document upload, rejecting what cannot be merged.
pub fn parse_source(bytes: &[u8]) -> Result<Document, DocumentError> {
    let doc = Document::load_mem(bytes).map_err(|e| {
        let detail = e.to_string();
        if detail.to_lowercase().contains("encrypt") || detail.to_lowercase().contains("decrypt") {
            DocumentError::Encrypted
        } else {
            DocumentError::Parse(detail)
        }
    })?;
    if doc.is_encrypted() {
        return Err(DocumentError::Encrypted);
    }
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(DocumentError::Empty);
    }
    for id in pages.values() {
        doc.get_dictionary(*id).map_err(structure)?;
    }
    Ok(doc)
}

/// The document being rebuilt for one `(owner, client, category)`.
#[derive(Debug, Clone)]
pub struct ArtifactDocument {
    doc: Document,
    pages_root: ObjectId,
}

impl Default for ArtifactDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactDocument {
    /// An empty document: catalog plus an empty page tree.
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        doc.reference_table.cross_reference_type = XrefType::CrossReferenceTable;
        let pages_root = doc.new_object_id();
        let catalog = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_root,
        });
        doc.objects.insert(
            pages_root,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => Vec::<Object>::new(),
                "Count" => Object::Integer(0),
            }),
        );
        doc.trailer.set("Root", catalog);
        Self { doc, pages_root }
    }

    /// Parse a previously stored artifact.
    pub fn load(bytes: &[u8]) -> Result<Self, DocumentError> {
        let mut doc = Document::load_mem(bytes).map_err(|e| DocumentError::Parse(e.to_string()))?;
        if doc.is_encrypted() {
            return Err(DocumentError::Encrypted);
        }
        strip_cross_reference_streams(&mut doc);
        // A stale max_id would shift every object written after a reload.
        doc.max_id = doc.objects.keys().map(|id| id.0).max().unwrap_or(0);
        doc.reference_table.cross_reference_type = XrefType::CrossReferenceTable;

        let catalog = doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(structure)?;
        let pages_root = doc
            .get_dictionary(catalog)
            .and_then(|c| c.get(b"Pages"))
            .and_then(Object::as_reference)
            .map_err(structure)?;
        doc.get_dictionary(pages_root).map_err(structure)?;

        Ok(Self { doc, pages_root })
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Borrow the underlying object graph.
    pub fn inner(&self) -> &Document {
        &self.doc
    }

    /// Add a page of `page_width × page_height` showing `image` at `placement`.
    pub fn append_image_page(
        &mut self,
        image: &NormalizedImage,
        placement: &Placement,
        page_width: f64,
        page_height: f64,
    ) -> Result<ObjectId, DocumentError> {
        let color_space = if image.components == 1 {
            "DeviceGray"
        } else {
            "DeviceRGB"
        };
        let xobject = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(image.width as i64),
                "Height" => Object::Integer(image.height as i64),
                "ColorSpace" => color_space,
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            image.bytes.clone(),
        )
        .with_compression(false);
        let image_id = self.doc.add_object(xobject);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        real(placement.width),
                        Object::Integer(0),
                        Object::Integer(0),
                        real(placement.height),
                        real(placement.x),
                        real(placement.y),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| DocumentError::Serialize(e.to_string()))?;
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), encoded).with_compression(false));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_root,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                real(page_width),
                real(page_height),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    IMAGE_NAME => image_id,
                },
            },
            "Contents" => content_id,
        });
        self.push_kids(&[page_id])?;
        Ok(page_id)
    }

    /// Copy every page of `source`, in order. Returns the number of pages added.
    pub fn append_document(&mut self, source: &Document) -> Result<usize, DocumentError> {
        let source_pages: Vec<ObjectId> = source.get_pages().into_values().collect();
        if source_pages.is_empty() {
            return Err(DocumentError::Empty);
        }

        // Reserve ids for all pages up front so links between them resolve to
        // the copies instead of dragging in a second copy of the target page.
        let mut mapping: HashMap<ObjectId, ObjectId> = HashMap::new();
        let new_pages: Vec<ObjectId> = source_pages
            .iter()
            .map(|&old| {
                let new = self.doc.new_object_id();
                mapping.insert(old, new);
                new
            })
            .collect();

        for (&old, &new) in source_pages.iter().zip(&new_pages) {
            let mut page = source.get_dictionary(old).map_err(structure)?.clone();
            for key in INHERITABLE {
                if !page.has(key) {
                    if let Some(value) = inherited(source, old, key) {
                        page.set(key.to_vec(), value);
                    }
                }
            }
            page.remove(b"Parent");

            let mut copied = self.import_dictionary(source, &page, &mut mapping)?;
            copied.set("Parent", self.pages_root);
            self.doc.objects.insert(new, Object::Dictionary(copied));
        }

        self.push_kids(&new_pages)?;
        Ok(new_pages.len())
    }

    /// Serialise the whole document. Deterministic for a given object graph.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, DocumentError> {
        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|e| DocumentError::Serialize(e.to_string()))?;
        Ok(out)
    }

    fn push_kids(&mut self, kids: &[ObjectId]) -> Result<(), DocumentError> {
        let root = self.doc.get_dictionary(self.pages_root).map_err(structure)?;
        let count = root.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
        let mut list = match root.get(b"Kids") {
            Ok(Object::Array(items)) => items.clone(),
            Ok(Object::Reference(id)) => self
                .doc
                .get_object(*id)
                .and_then(Object::as_array)
                .map_err(structure)?
                .clone(),
            Ok(_) => return Err(DocumentError::Structure("/Kids is not an array".into())),
            Err(_) => Vec::new(),
        };
        list.extend(kids.iter().map(|&id| Object::Reference(id)));

        let root = self
            .doc
            .get_object_mut(self.pages_root)
            .and_then(Object::as_dict_mut)
            .map_err(structure)?;
        root.set("Kids", list);
        root.set("Count", Object::Integer(count + kids.len() as i64));
        Ok(())
    }

    fn import_dictionary(
        &mut self,
        source: &Document,
        dict: &Dictionary,
        mapping: &mut HashMap<ObjectId, ObjectId>,
    ) -> Result<Dictionary, DocumentError> {
        let mut out = Dictionary::new();
        for (key, value) in dict.iter() {
            out.set(key.clone(), self.import_object(source, value, mapping)?);
        }
        Ok(out)
    }

    fn import_object(
        &mut self,
        source: &Document,
        object: &Object,
        mapping: &mut HashMap<ObjectId, ObjectId>,
    ) -> Result<Object, DocumentError> {
        Ok(match object {
            Object::Reference(old) => {
                if let Some(&new) = mapping.get(old) {
                    return Ok(Object::Reference(new));
                }
                let target = match source.get_object(*old) {
                    Ok(target) => target,
                    // Dangling references read as null per ISO 32000.
                    Err(_) => return Ok(Object::Null),
                };
                if is_tree_node(target) {
                    return Ok(Object::Null);
                }
                let new = self.doc.new_object_id();
                mapping.insert(*old, new);
                let copied = self.import_object(source, target, mapping)?;
                self.doc.objects.insert(new, copied);
                Object::Reference(new)
            }
            Object::Array(items) => Object::Array(
                items
                    .iter()
                    .map(|item| self.import_object(source, item, mapping))
                    .collect::<Result<_, _>>()?,
            ),
            Object::Dictionary(dict) => {
                Object::Dictionary(self.import_dictionary(source, dict, mapping)?)
            }
            Object::Stream(stream) => {
                let mut dict = stream.dict.clone();
                dict.remove(b"Length");
                let dict = self.import_dictionary(source, &dict, mapping)?;
                Object::Stream(Stream::new(dict, stream.content.clone()).with_compression(false))
            }
            other => other.clone(),
        })
    }
}

/// Walk up the page tree looking for an inherited attribute.
fn inherited(doc: &Document, page: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        let parent = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_dictionary(parent).ok()?;
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
    }
    None
}

/// Catalog and page-tree nodes never travel with copied pages.
fn is_tree_node(object: &Object) -> bool {
    let dict = match object {
        Object::Dictionary(d) => d,
        _ => return false,
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Pages") | Ok(b"Catalog")
    )
}

/// Drop cross-reference and object streams left over from the artifact's
/// original writer; their content has already been unpacked on load. Both
/// [`ArtifactDocument::new`] and [`ArtifactDocument::load`] switch the
/// document to a classic xref table, which lopdf writes without allocating
/// an extra object.
fn strip_cross_reference_streams(doc: &mut Document) {
    doc.objects.retain(|_, object| match object {
        Object::Stream(s) => !matches!(
            s.dict.get(b"Type").and_then(Object::as_name),
            Ok(b"XRef") | Ok(b"ObjStm")
        ),
        _ => true,
    });

    let mut trailer = Dictionary::new();
    for key in [&b"Root"[..], b"Info", b"ID"] {
        if let Ok(value) = doc.trailer.get(key) {
            trailer.set(key.to_vec(), value.clone());
        }
    }
    doc.trailer = trailer;
}

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}
