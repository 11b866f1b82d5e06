//! Coordinate transformation from caller space to PDF page space
//!
//! Callers place stamps with a top-left origin (image/UI convention).
//! PDF user space has a bottom-left origin, so the Y axis is flipped
//! against the page height. One image pixel maps to one point.
//!
//! Page `/Rotate` and a non-zero MediaBox origin are not compensated.

/// Position and scale of a stamp in PDF user space.
///
/// An image XObject paints the unit square, so the scale factors are
/// the drawn width and height in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub pdf_x: f64,
    pub pdf_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

/// Map a top-left placement onto the page's bottom-left coordinate space.
pub fn compute_transform(
    page_height: f64,
    x: f64,
    y: f64,
    draw_width: f64,
    draw_height: f64,
) -> Transform {
    Transform {
        pdf_x: x,
        pdf_y: page_height - y - draw_height,
        scale_x: draw_width,
        scale_y: draw_height,
    }
}

/// Resolve the drawn size: requested dimensions win, otherwise the
/// image's natural pixel size is used as points.
pub fn resolve_dimensions(
    requested_width: Option<f64>,
    requested_height: Option<f64>,
    pixel_width: u32,
    pixel_height: u32,
) -> (f64, f64) {
    (
        requested_width.unwrap_or(pixel_width as f64),
        requested_height.unwrap_or(pixel_height as f64),
    )
}

impl Transform {
    /// Content-stream operators drawing the named XObject at this transform.
    pub fn to_operators(&self, xobject_name: &str) -> Vec<u8> {
        format!(
            "q\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
            format_number(self.scale_x),
            format_number(self.scale_y),
            format_number(self.pdf_x),
            format_number(self.pdf_y),
            xobject_name,
        )
        .into_bytes()
    }
}

/// Format a number for a content stream: at most 4 decimals, no
/// trailing zeros, never exponent notation.
pub fn format_number(value: f64) -> String {
    let mut s = format!("{:.4}", value);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}
