//! Editable PDF object model backed by lopdf
//!
//! `StampDocument` owns one parsed document for the duration of a
//! stamping call. It exposes the page tree, embeds image XObjects,
//! appends to page content streams and writes the result back out.

use std::collections::BTreeSet;

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, warn};

use crate::error::StampError;
use crate::image::{ColorSpace, EmbeddedImage, ImageFilter};

/// Guard against cyclic `/Parent` chains.
const MAX_TREE_DEPTH: usize = 64;

/// US Letter, used when no MediaBox exists anywhere up the page tree
const DEFAULT_MEDIA_BOX: MediaBox = MediaBox {
    llx: 0.0,
    lly: 0.0,
    urx: 612.0,
    ury: 792.0,
};

/// A page in the page tree: its 0-based position and object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRef {
    pub index: usize,
    pub id: ObjectId,
}

/// Page rectangle in default user space units (points).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaBox {
    pub llx: f64,
    pub lly: f64,
    pub urx: f64,
    pub ury: f64,
}

impl MediaBox {
    pub fn width(&self) -> f64 {
        (self.urx - self.llx).abs()
    }

    pub fn height(&self) -> f64 {
        (self.ury - self.lly).abs()
    }
}

pub struct StampDocument {
    doc: Document,
    /// References that were already dangling in the input. Only new
    /// ones count as a serialization failure.
    baseline_dangling: BTreeSet<ObjectId>,
}

impl StampDocument {
    /// Parse PDF bytes and check the catalog and page tree resolve.
    pub fn parse(bytes: &[u8]) -> Result<Self, StampError> {
        let doc =
            Document::load_mem(bytes).map_err(|e| StampError::MalformedDocument(e.to_string()))?;

        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(StampError::MalformedDocument(
                "Encrypted documents are not supported".to_string(),
            ));
        }

        let catalog = doc
            .catalog()
            .map_err(|e| StampError::MalformedDocument(format!("Missing catalog: {}", e)))?;
        let pages_id = catalog
            .get(b"Pages")
            .and_then(Object::as_reference)
            .map_err(|_| StampError::MalformedDocument("Catalog has no /Pages tree".to_string()))?;
        doc.get_dictionary(pages_id).map_err(|_| {
            StampError::MalformedDocument(format!(
                "Page tree root {} {} R does not resolve to a dictionary",
                pages_id.0, pages_id.1
            ))
        })?;

        let baseline_dangling = dangling_references(&doc);
        debug!(
            version = %doc.version,
            objects = doc.objects.len(),
            pages = doc.get_pages().len(),
            "parsed document"
        );

        Ok(Self {
            doc,
            baseline_dangling,
        })
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Objects the writer will emit. Object streams and cross-reference
    /// streams are containers of the input file layout and are not written
    /// back, so they are not counted.
    pub fn object_count(&self) -> usize {
        self.doc
            .objects
            .values()
            .filter(|object| !is_layout_stream(object))
            .count()
    }

    pub fn version(&self) -> &str {
        &self.doc.version
    }

    /// All pages in document order.
    pub fn pages(&self) -> Vec<PageRef> {
        self.doc
            .get_pages()
            .into_values()
            .enumerate()
            .map(|(index, id)| PageRef { index, id })
            .collect()
    }

    /// Look up a page by 0-based index.
    pub fn page(&self, index: i64) -> Result<PageRef, StampError> {
        let pages = self.pages();
        usize::try_from(index)
            .ok()
            .and_then(|i| pages.get(i).copied())
            .ok_or(StampError::PageIndexOutOfRange {
                index,
                page_count: pages.len(),
            })
    }

    /// The page's MediaBox, inherited from an ancestor if the page has none.
    pub fn media_box(&self, page: PageRef) -> Result<MediaBox, StampError> {
        match self.inherited(page.id, b"MediaBox") {
            Some(obj) => self.parse_rect(obj),
            None => {
                warn!(page = page.index, "page has no MediaBox, assuming US Letter");
                Ok(DEFAULT_MEDIA_BOX)
            }
        }
    }

    /// Insert the image (and its soft mask) as new indirect objects and
    /// register it in the page's `/XObject` resources under a fresh name.
    pub fn embed_image(
        &mut self,
        page: PageRef,
        image: &EmbeddedImage,
        name_prefix: &str,
    ) -> Result<String, StampError> {
        // Resolve resources before adding anything so a bad page fails clean
        let mut resources = self.effective_resources(page.id)?;
        let mut xobjects = match resources.get(b"XObject") {
            Ok(obj) => self.resolve_dict(obj, "XObject resources")?.clone(),
            Err(_) => Dictionary::new(),
        };

        let mut dict = image_dictionary(image);
        if let Some(mask) = &image.soft_mask {
            let mask_dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            };
            let mask_id = self.doc.add_object(Stream::new(mask_dict, mask.clone()));
            dict.set("SMask", Object::Reference(mask_id));
        }
        let image_id = self.doc.add_object(Stream::new(dict, image.data.clone()));

        let name = fresh_name(&xobjects, name_prefix);
        xobjects.set(name.clone(), Object::Reference(image_id));
        resources.set("XObject", Object::Dictionary(xobjects));

        // The page gets its own copy, so inherited or shared resource
        // dictionaries stay untouched for every other page.
        self.page_dict_mut(page.id)?
            .set("Resources", Object::Dictionary(resources));

        debug!(
            page = page.index,
            image = ?image_id,
            name = %name,
            "embedded image XObject"
        );
        Ok(name)
    }

    /// Append operators to the page so they render after existing content.
    ///
    /// With `isolate_graphics_state` the existing content is wrapped in
    /// `q`/`Q` first, so a dangling `cm` in the original cannot move the
    /// appended drawing.
    pub fn append_draw_instruction(
        &mut self,
        page: PageRef,
        instruction: &[u8],
        isolate_graphics_state: bool,
    ) -> Result<(), StampError> {
        let mut segments = self.content_segments(page.id)?;

        if segments.is_empty() {
            let id = self
                .doc
                .add_object(Stream::new(Dictionary::new(), instruction.to_vec()));
            self.page_dict_mut(page.id)?
                .set("Contents", Object::Reference(id));
            return Ok(());
        }

        let mut rewrite_contents = false;
        let mut addition = Vec::with_capacity(instruction.len() + 2);
        if isolate_graphics_state {
            let q_id = self
                .doc
                .add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
            segments.insert(0, q_id);
            rewrite_contents = true;
            addition.extend_from_slice(b"Q\n");
        }
        addition.extend_from_slice(instruction);

        let last = segments[segments.len() - 1];
        match self.plain_content(last) {
            Some(mut content) => {
                if content.last().is_some_and(|b| !b.is_ascii_whitespace()) {
                    content.push(b'\n');
                }
                content.extend_from_slice(&addition);

                let mut stream = match self.doc.get_object(last) {
                    Ok(Object::Stream(stream)) => stream.clone(),
                    _ => {
                        return Err(StampError::SerializationFailure(format!(
                            "Content segment {} {} R vanished",
                            last.0, last.1
                        )))
                    }
                };
                stream.set_plain_content(content);

                if self.is_shared_content(last, page.id) {
                    // Another page draws this stream too; give this page a copy
                    let copy_id = self.doc.add_object(stream);
                    if let Some(slot) = segments.last_mut() {
                        *slot = copy_id;
                    }
                    rewrite_contents = true;
                } else {
                    let target = self
                        .doc
                        .get_object_mut(last)
                        .map_err(|e| StampError::SerializationFailure(e.to_string()))?;
                    *target = Object::Stream(stream);
                }
            }
            None => {
                // Filtered segments stay byte-identical; draw from a new
                // trailing segment instead.
                debug!(segment = ?last, "appending new content segment");
                let id = self.doc.add_object(Stream::new(Dictionary::new(), addition));
                segments.push(id);
                rewrite_contents = true;
            }
        }

        if rewrite_contents {
            let refs = segments.into_iter().map(Object::Reference).collect();
            self.page_dict_mut(page.id)?
                .set("Contents", Object::Array(refs));
        }
        Ok(())
    }

    /// Write the document out with a rebuilt cross-reference table.
    pub fn serialize(&mut self) -> Result<Vec<u8>, StampError> {
        let introduced: Vec<ObjectId> = dangling_references(&self.doc)
            .difference(&self.baseline_dangling)
            .copied()
            .collect();
        if !introduced.is_empty() {
            return Err(StampError::SerializationFailure(format!(
                "Dangling references after mutation: {:?}",
                introduced
            )));
        }

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| StampError::SerializationFailure(e.to_string()))?;
        Ok(buffer)
    }

    /// Object ids of the page's content streams, in drawing order.
    pub fn content_segments(&self, page_id: ObjectId) -> Result<Vec<ObjectId>, StampError> {
        let page = self.page_dict(page_id)?;
        let contents = match page.get(b"Contents") {
            Ok(contents) => contents,
            Err(_) => return Ok(Vec::new()),
        };

        let items: &[Object] = match contents {
            Object::Reference(id) => match self.doc.get_object(*id) {
                Ok(Object::Stream(_)) => return Ok(vec![*id]),
                Ok(Object::Array(items)) => items,
                _ => return Ok(Vec::new()),
            },
            Object::Array(items) => items,
            _ => return Ok(Vec::new()),
        };

        Ok(items
            .iter()
            .filter_map(|item| match item {
                Object::Reference(id) => Some(*id),
                _ => None,
            })
            .filter(|id| matches!(self.doc.get_object(*id), Ok(Object::Stream(_))))
            .collect())
    }

    fn is_shared_content(&self, segment: ObjectId, page_id: ObjectId) -> bool {
        self.doc
            .get_pages()
            .into_values()
            .filter(|id| *id != page_id)
            .any(|id| {
                self.content_segments(id)
                    .map(|segments| segments.contains(&segment))
                    .unwrap_or(false)
            })
    }

    /// Content of an unfiltered stream. Filtered streams are never rewritten.
    fn plain_content(&self, id: ObjectId) -> Option<Vec<u8>> {
        match self.doc.get_object(id) {
            Ok(Object::Stream(stream)) if !stream.dict.has(b"Filter") => {
                Some(stream.content.clone())
            }
            _ => None,
        }
    }

    /// Owned copy of the resources the page actually uses.
    fn effective_resources(&self, page_id: ObjectId) -> Result<Dictionary, StampError> {
        match self.inherited(page_id, b"Resources") {
            Some(obj) => Ok(self.resolve_dict(obj, "Resources")?.clone()),
            None => Ok(Dictionary::new()),
        }
    }

    /// Find `key` on the page or the nearest ancestor that has it.
    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut current = self.doc.get_dictionary(page_id).ok()?;
        for _ in 0..MAX_TREE_DEPTH {
            if let Ok(value) = current.get(key) {
                return Some(value);
            }
            let parent = current.get(b"Parent").and_then(Object::as_reference).ok()?;
            current = self.doc.get_dictionary(parent).ok()?;
        }
        None
    }

    fn page_dict(&self, page_id: ObjectId) -> Result<&Dictionary, StampError> {
        self.doc.get_dictionary(page_id).map_err(|e| {
            StampError::MalformedDocument(format!(
                "Page {} {} R is not a dictionary: {}",
                page_id.0, page_id.1, e
            ))
        })
    }

    fn page_dict_mut(&mut self, page_id: ObjectId) -> Result<&mut Dictionary, StampError> {
        self.doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| {
                StampError::MalformedDocument(format!(
                    "Page {} {} R is not a dictionary: {}",
                    page_id.0, page_id.1, e
                ))
            })
    }

    fn resolve_dict<'a>(&'a self, obj: &'a Object, what: &str) -> Result<&'a Dictionary, StampError> {
        self.doc
            .dereference(obj)
            .and_then(|(_, resolved)| resolved.as_dict())
            .map_err(|_| StampError::MalformedDocument(format!("{} is not a dictionary", what)))
    }

    /// Parse a rectangle array, resolving references.
    fn parse_rect(&self, obj: &Object) -> Result<MediaBox, StampError> {
        let arr = self
            .doc
            .dereference(obj)
            .and_then(|(_, resolved)| resolved.as_array())
            .map_err(|_| StampError::MalformedDocument("MediaBox is not an array".to_string()))?;

        if arr.len() != 4 {
            return Err(StampError::MalformedDocument(format!(
                "MediaBox has {} elements, expected 4",
                arr.len()
            )));
        }

        let mut values = [0.0f64; 4];
        for (i, item) in arr.iter().enumerate() {
            values[i] = self.extract_number(item)?;
        }

        Ok(MediaBox {
            llx: values[0],
            lly: values[1],
            urx: values[2],
            ury: values[3],
        })
    }

    fn extract_number(&self, obj: &Object) -> Result<f64, StampError> {
        let resolved = self
            .doc
            .dereference(obj)
            .map(|(_, resolved)| resolved)
            .map_err(|e| StampError::MalformedDocument(format!("Unresolvable number: {}", e)))?;
        match resolved {
            Object::Integer(i) => Ok(*i as f64),
            Object::Real(r) => Ok(*r as f64),
            _ => Err(StampError::MalformedDocument(
                "Expected a number in MediaBox".to_string(),
            )),
        }
    }
}

fn image_dictionary(image: &EmbeddedImage) -> Dictionary {
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width as i64,
        "Height" => image.height as i64,
        "BitsPerComponent" => image.bits_per_component as i64,
    };
    dict.set("ColorSpace", color_space_object(&image.color_space));

    match image.filter {
        ImageFilter::Dct => {
            dict.set("Filter", "DCTDecode");
        }
        ImageFilter::Flate { predictor } => {
            dict.set("Filter", "FlateDecode");
            if let Some(p) = predictor {
                dict.set(
                    "DecodeParms",
                    dictionary! {
                        "Predictor" => 15,
                        "Colors" => p.colors as i64,
                        "BitsPerComponent" => p.bits_per_component as i64,
                        "Columns" => p.columns as i64,
                    },
                );
            }
        }
    }

    if let Some(decode) = &image.decode {
        dict.set(
            "Decode",
            Object::Array(decode.iter().map(|v| Object::Real(*v)).collect()),
        );
    }
    dict
}

fn color_space_object(space: &ColorSpace) -> Object {
    match space {
        ColorSpace::DeviceGray => Object::Name(b"DeviceGray".to_vec()),
        ColorSpace::DeviceRgb => Object::Name(b"DeviceRGB".to_vec()),
        ColorSpace::DeviceCmyk => Object::Name(b"DeviceCMYK".to_vec()),
        ColorSpace::Indexed { palette } => Object::Array(vec![
            Object::Name(b"Indexed".to_vec()),
            Object::Name(b"DeviceRGB".to_vec()),
            Object::Integer((palette.len() / 3) as i64 - 1),
            Object::String(palette.clone(), StringFormat::Hexadecimal),
        ]),
    }
}

/// `/ObjStm` and `/XRef` streams.
fn is_layout_stream(object: &Object) -> bool {
    match object {
        Object::Stream(stream) => matches!(
            stream.dict.get(b"Type"),
            Ok(Object::Name(name)) if name == b"ObjStm" || name == b"XRef"
        ),
        _ => false,
    }
}

/// First `{prefix}{n}` not already used in the XObject dictionary.
fn fresh_name(xobjects: &Dictionary, prefix: &str) -> String {
    (1..)
        .map(|n| format!("{}{}", prefix, n))
        .find(|candidate| !xobjects.has(candidate.as_bytes()))
        .unwrap_or_else(|| prefix.to_string())
}

/// Every referenced object id that has no entry in the object table.
fn dangling_references(doc: &Document) -> BTreeSet<ObjectId> {
    let mut refs = Vec::new();
    for (_, value) in doc.trailer.iter() {
        collect_references(value, &mut refs);
    }
    for object in doc.objects.values() {
        collect_references(object, &mut refs);
    }
    refs.into_iter()
        .filter(|id| !doc.objects.contains_key(id))
        .collect()
}

fn collect_references(obj: &Object, out: &mut Vec<ObjectId>) {
    match obj {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter() {
                collect_references(value, out);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter() {
                collect_references(value, out);
            }
        }
        _ => {}
    }
}
