//! Stamp an image onto one page of a PDF

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::coords::{compute_transform, resolve_dimensions};
use crate::document::StampDocument;
use crate::error::StampError;
use crate::image::{decode_image, to_pdf_image, ImageFormat};
use crate::request::PlacementRequest;

const DEFAULT_RESOURCE_PREFIX: &str = "Stamp";

#[derive(Debug, Clone)]
pub struct StampOptions {
    /// Wrap the page's existing content in `q`/`Q` before drawing.
    pub isolate_graphics_state: bool,
    /// Prefix for the XObject resource name (`Stamp1`, `Stamp2`, ...).
    /// Must be alphanumeric; anything else falls back to the default.
    pub resource_prefix: String,
}

impl Default for StampOptions {
    fn default() -> Self {
        Self {
            isolate_graphics_state: true,
            resource_prefix: DEFAULT_RESOURCE_PREFIX.to_string(),
        }
    }
}

impl StampOptions {
    fn name_prefix(&self) -> &str {
        let prefix = self.resource_prefix.as_str();
        if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_alphanumeric()) {
            prefix
        } else {
            DEFAULT_RESOURCE_PREFIX
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StampMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: usize,
    pub page_index: usize,
    pub image_format: ImageFormat,
    pub resource_name: String,
    pub pdf_x: f64,
    pub pdf_y: f64,
    pub draw_width: f64,
    pub draw_height: f64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StampOutput {
    pub bytes: Vec<u8>,
    pub metrics: StampMetrics,
}

/// Stamp `image_base64` onto `placement.page` with default options.
pub fn stamp(
    pdf_bytes: &[u8],
    image_base64: &str,
    placement: &PlacementRequest,
) -> Result<Vec<u8>, StampError> {
    stamp_with_options(pdf_bytes, image_base64, placement, &StampOptions::default())
        .map(|output| output.bytes)
}

/// Stamp an image onto one page and return the re-serialized document.
///
/// The steps:
/// 1. Parse the document
/// 2. Validate the page index and placement before touching anything
/// 3. Decode the image header
/// 4. Embed the image as a new XObject on the page
/// 5. Flip the caller's top-left coordinates into PDF space
/// 6. Append the draw instruction after the page's existing content
/// 7. Serialize
///
/// The input buffer is only read; on failure the caller gets the error
/// and nothing else.
pub fn stamp_with_options(
    pdf_bytes: &[u8],
    image_base64: &str,
    placement: &PlacementRequest,
    options: &StampOptions,
) -> Result<StampOutput, StampError> {
    let started = Instant::now();

    let mut doc = StampDocument::parse(pdf_bytes)?;
    let page = doc.page(placement.page)?;
    placement.validate()?;

    let decoded = decode_image(image_base64)?;
    let image = to_pdf_image(&decoded)?;
    let media_box = doc.media_box(page)?;

    let name = doc.embed_image(page, &image, options.name_prefix())?;

    let (draw_width, draw_height) = resolve_dimensions(
        placement.requested_width(),
        placement.requested_height(),
        decoded.width,
        decoded.height,
    );
    let transform = compute_transform(
        media_box.height(),
        placement.x,
        placement.y,
        draw_width,
        draw_height,
    );
    debug!(?transform, page_height = media_box.height(), "computed placement");

    doc.append_draw_instruction(
        page,
        &transform.to_operators(&name),
        options.isolate_graphics_state,
    )?;

    let page_count = doc.page_count();
    let bytes = doc.serialize()?;

    let metrics = StampMetrics {
        input_size_bytes: pdf_bytes.len(),
        output_size_bytes: bytes.len(),
        page_count,
        page_index: page.index,
        image_format: decoded.format,
        resource_name: name,
        pdf_x: transform.pdf_x,
        pdf_y: transform.pdf_y,
        draw_width,
        draw_height,
        processing_time_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        page = metrics.page_index,
        format = ?metrics.image_format,
        input = metrics.input_size_bytes,
        output = metrics.output_size_bytes,
        ms = metrics.processing_time_ms,
        "stamped document"
    );

    Ok(StampOutput { bytes, metrics })
}
