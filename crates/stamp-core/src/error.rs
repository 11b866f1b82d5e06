use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StampError {
    #[error("Failed to parse PDF: {0}")]
    MalformedDocument(String),

    #[error("{}", page_range_message(.index, .page_count))]
    PageIndexOutOfRange { index: i64, page_count: usize },

    #[error("Unsupported image format: {0}")]
    UnsupportedImageFormat(String),

    #[error("Malformed image data: {0}")]
    MalformedImageData(String),

    #[error("Invalid placement: {0}")]
    InvalidPlacement(String),

    #[error("Serialization failed: {0}")]
    SerializationFailure(String),
}

/// Stable classification of a [`StampError`], for callers that map
/// failures onto their own transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    MalformedDocument,
    PageIndexOutOfRange,
    UnsupportedImageFormat,
    MalformedImageData,
    InvalidPlacement,
    SerializationFailure,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::MalformedDocument => "MALFORMED_DOCUMENT",
            ErrorKind::PageIndexOutOfRange => "PAGE_INDEX_OUT_OF_RANGE",
            ErrorKind::UnsupportedImageFormat => "UNSUPPORTED_IMAGE_FORMAT",
            ErrorKind::MalformedImageData => "MALFORMED_IMAGE_DATA",
            ErrorKind::InvalidPlacement => "INVALID_PLACEMENT",
            ErrorKind::SerializationFailure => "SERIALIZATION_FAILURE",
        }
    }
}

impl StampError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StampError::MalformedDocument(_) => ErrorKind::MalformedDocument,
            StampError::PageIndexOutOfRange { .. } => ErrorKind::PageIndexOutOfRange,
            StampError::UnsupportedImageFormat(_) => ErrorKind::UnsupportedImageFormat,
            StampError::MalformedImageData(_) => ErrorKind::MalformedImageData,
            StampError::InvalidPlacement(_) => ErrorKind::InvalidPlacement,
            StampError::SerializationFailure(_) => ErrorKind::SerializationFailure,
        }
    }

    /// True when the failure points at a bug in this crate rather than
    /// at the caller's input.
    pub fn is_internal(&self) -> bool {
        matches!(self, StampError::SerializationFailure(_))
    }
}

fn page_range_message(index: &i64, page_count: &usize) -> String {
    match *page_count {
        0 => format!("Invalid page index {}: document has no pages", index),
        1 => format!("Invalid page index {}: valid range is 0..=0 (1 page)", index),
        n => format!(
            "Invalid page index {}: valid range is 0..={} ({} pages)",
            index,
            n - 1,
            n
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_range_message_includes_index_and_range() {
        let err = StampError::PageIndexOutOfRange {
            index: 5,
            page_count: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains('5'), "{}", msg);
        assert!(msg.contains("0..=2"), "{}", msg);
    }

    #[test]
    fn test_page_range_message_for_single_page() {
        let err = StampError::PageIndexOutOfRange {
            index: 1,
            page_count: 1,
        };
        assert_eq!(
            err.to_string(),
            "Invalid page index 1: valid range is 0..=0 (1 page)"
        );
    }

    #[test]
    fn test_page_range_message_for_empty_document() {
        let err = StampError::PageIndexOutOfRange {
            index: 0,
            page_count: 0,
        };
        assert!(err.to_string().contains("no pages"));
    }

    #[test]
    fn test_only_serialization_failure_is_internal() {
        assert!(StampError::SerializationFailure("x".into()).is_internal());
        assert!(!StampError::MalformedDocument("x".into()).is_internal());
        assert!(!StampError::PageIndexOutOfRange {
            index: -1,
            page_count: 1
        }
        .is_internal());
    }

    #[test]
    fn test_kind_codes_are_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PageIndexOutOfRange).unwrap();
        assert_eq!(json, format!("\"{}\"", ErrorKind::PageIndexOutOfRange.code()));
    }
}
