//! Image stamping for PDF documents
//!
//! Places a PNG or JPEG image (delivered as base64, optionally wrapped in a
//! data URI) at a caller-specified position on one page of an existing PDF
//! and returns the modified document bytes. Everything else in the document
//! is preserved.
//!
//! ```no_run
//! use pdfstamp_core::{stamp, PlacementRequest};
//!
//! # fn run(pdf: &[u8], signature: &str) -> Result<(), pdfstamp_core::StampError> {
//! let placement = PlacementRequest::new(0, 50.0, 40.0).with_size(Some(120.0), None);
//! let signed = stamp(pdf, signature, &placement)?;
//! assert!(signed.starts_with(b"%PDF-"));
//! # Ok(())
//! # }
//! ```

pub mod coords;
pub mod document;
pub mod error;
pub mod image;
pub mod request;
pub mod stamp;

use serde::Serialize;

pub use coords::{compute_transform, resolve_dimensions, Transform};
pub use document::{MediaBox, PageRef, StampDocument};
pub use error::{ErrorKind, StampError};
pub use image::{decode_image, DecodedImage, ImageFormat};
pub use request::{PlacementRequest, StampRequest};
pub use stamp::{stamp, stamp_with_options, StampMetrics, StampOptions, StampOutput};

/// Size of one page, in points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageInfo {
    pub index: usize,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentInfo {
    /// Header version, e.g. `1.7`
    pub version: String,
    pub page_count: usize,
    pub pages: Vec<PageInfo>,
}

/// Parse PDF bytes and return the page count
pub fn page_count(bytes: &[u8]) -> Result<usize, StampError> {
    Ok(StampDocument::parse(bytes)?.page_count())
}

/// Page count and per-page sizes, for callers choosing where to stamp.
pub fn inspect(bytes: &[u8]) -> Result<DocumentInfo, StampError> {
    let doc = StampDocument::parse(bytes)?;
    let pages = doc
        .pages()
        .into_iter()
        .map(|page| {
            let media_box = doc.media_box(page)?;
            Ok(PageInfo {
                index: page.index,
                width: media_box.width(),
                height: media_box.height(),
            })
        })
        .collect::<Result<Vec<_>, StampError>>()?;

    Ok(DocumentInfo {
        version: doc.version().to_string(),
        page_count: pages.len(),
        pages,
    })
}
