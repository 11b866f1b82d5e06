//! Placement and stamping request types

use serde::{Deserialize, Serialize};

use crate::error::StampError;
use crate::stamp::{stamp_with_options, StampOptions, StampOutput};

/// Where to draw the image.
///
/// `x`/`y` locate the image's top-left corner measured from the page's
/// top-left corner, in points. A missing (or non-positive) width or
/// height falls back to the image's pixel size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    /// 0-based page index. Signed so that negative input is representable
    /// and rejected as out of range rather than wrapping.
    pub page: i64,
    pub x: f64,
    pub y: f64,
    #[serde(default, alias = "w", skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, alias = "h", skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl PlacementRequest {
    pub fn new(page: i64, x: f64, y: f64) -> Self {
        Self {
            page,
            x,
            y,
            width: None,
            height: None,
        }
    }

    pub fn with_size(mut self, width: Option<f64>, height: Option<f64>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn requested_width(&self) -> Option<f64> {
        self.width.filter(|w| *w > 0.0)
    }

    pub fn requested_height(&self) -> Option<f64> {
        self.height.filter(|h| *h > 0.0)
    }

    /// Reject coordinates that cannot be written into a content stream.
    pub fn validate(&self) -> Result<(), StampError> {
        let fields = [
            ("x", Some(self.x)),
            ("y", Some(self.y)),
            ("width", self.width),
            ("height", self.height),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(StampError::InvalidPlacement(format!(
                        "{} must be a finite number, got {}",
                        name, v
                    )));
                }
            }
        }
        Ok(())
    }
}

/// An owned stamping job, as handed over by a transport layer.
#[derive(Debug, Clone)]
pub struct StampRequest {
    pub pdf: Vec<u8>,
    /// Data-URI or bare base64 PNG/JPEG.
    pub image_base64: String,
    pub placement: PlacementRequest,
}

impl StampRequest {
    pub fn execute(&self, options: &StampOptions) -> Result<StampOutput, StampError> {
        stamp_with_options(&self.pdf, &self.image_base64, &self.placement, options)
    }
}
