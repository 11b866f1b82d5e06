//! Tests for the stamping server API
//!
//! Test categories:
//! - Property tests for error classification
//! - Integration tests driving the router with multipart uploads

/// Small PDFs and images built in memory.
#[cfg(test)]
mod fixtures {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use lopdf::{dictionary, Document, Object};

    pub fn pdf(page_count: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..page_count)
            .map(|_| {
                Object::Reference(doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => Object::Reference(pages_id),
                    "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                }))
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    pub fn png_data_uri(width: u32, height: u32) -> String {
        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer
                .write_image_data(&vec![90u8; (width * height * 4) as usize])
                .unwrap();
        }
        format!("data:image/png;base64,{}", STANDARD.encode(&bytes))
    }
}

#[cfg(test)]
mod property_tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use pdfstamp_core::{stamp, PlacementRequest, StampError};
    use proptest::prelude::*;

    use super::fixtures;
    use crate::error::ApiError;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Property: out-of-range pages are a client error, never a 500
        #[test]
        fn out_of_range_pages_are_bad_requests(
            page_count in 1usize..4,
            offset in 0i64..50,
            negative in any::<bool>(),
        ) {
            let page = if negative { -1 - offset } else { page_count as i64 + offset };
            let err = stamp(
                &fixtures::pdf(page_count),
                &fixtures::png_data_uri(2, 2),
                &PlacementRequest::new(page, 0.0, 0.0),
            ).unwrap_err();
            let is_range = matches!(err, StampError::PageIndexOutOfRange { .. });
            prop_assert!(is_range);

            let response = ApiError::from(err).into_response();
            prop_assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        /// Property: arbitrary text never decodes into an image successfully
        #[test]
        fn arbitrary_text_is_rejected_as_client_error(text in "[a-zA-Z0-9 ]{0,40}") {
            let result = stamp(
                &fixtures::pdf(1),
                &text,
                &PlacementRequest::new(0, 0.0, 0.0),
            );
            if let Err(err) = result {
                let status = ApiError::from(err).into_response().status();
                prop_assert!(status.is_client_error());
            }
        }
    }
}

#[cfg(test)]
mod integration_tests {
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use lopdf::Document;
    use pdfstamp_core::StampOptions;
    use pretty_assertions::assert_eq;

    use super::fixtures;
    use crate::{app, AppState};

    fn create_test_server() -> TestServer {
        let state = AppState::new(StampOptions::default(), 5 * 1024 * 1024);
        TestServer::new(app(state)).unwrap()
    }

    fn stamp_form(pdf: Vec<u8>, image: &str, page: &str, x: &str, y: &str) -> MultipartForm {
        MultipartForm::new()
            .add_part(
                "pdf",
                Part::bytes(pdf)
                    .file_name("contract.pdf")
                    .mime_type("application/pdf"),
            )
            .add_text("imageBase64", image.to_string())
            .add_text("page", page.to_string())
            .add_text("x", x.to_string())
            .add_text("y", y.to_string())
    }

    #[tokio::test]
    async fn test_health_returns_200() {
        let server = create_test_server();
        let response = server.get("/health").await;
        response.assert_status_ok();

        let json = response.json::<serde_json::Value>();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "pdfstamp-api");
    }

    #[tokio::test]
    async fn test_method_pdf_greeting() {
        let server = create_test_server();
        let response = server.get("/pdf/methodpdf").await;
        response.assert_status_ok();
        assert_eq!(response.text(), "Hello Signature!");
    }

    #[tokio::test]
    async fn test_stamp_sign_returns_pdf_attachment() {
        let server = create_test_server();
        let form = stamp_form(
            fixtures::pdf(2),
            &fixtures::png_data_uri(100, 50),
            "1",
            "50",
            "40",
        );

        let response = server.post("/pdf/stamp-sign").multipart(form).await;
        response.assert_status_ok();
        assert_eq!(response.header("content-type"), "application/pdf");
        assert_eq!(
            response.header("content-disposition"),
            "attachment; filename=signed.pdf"
        );

        let doc = Document::load_mem(response.as_bytes()).unwrap();
        let pages: Vec<_> = doc.get_pages().into_values().collect();
        assert_eq!(pages.len(), 2);
        let content = String::from_utf8(doc.get_page_content(pages[1]).unwrap()).unwrap();
        assert!(content.contains("100 0 0 50 50 702 cm\n/Stamp1 Do"));
        assert!(doc.get_page_content(pages[0]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stamp_sign_honours_explicit_size() {
        let server = create_test_server();
        let form = stamp_form(
            fixtures::pdf(1),
            &fixtures::png_data_uri(10, 10),
            "0",
            "0",
            "0",
        )
        .add_text("w", "150")
        .add_text("h", "60");

        let response = server.post("/pdf/stamp-sign").multipart(form).await;
        response.assert_status_ok();

        let doc = Document::load_mem(response.as_bytes()).unwrap();
        let page = doc.get_pages()[&1];
        let content = String::from_utf8(doc.get_page_content(page).unwrap()).unwrap();
        assert!(content.contains("150 0 0 60 0 732 cm"));
    }

    #[tokio::test]
    async fn test_stamp_sign_rejects_out_of_range_page() {
        let server = create_test_server();
        let form = stamp_form(
            fixtures::pdf(1),
            &fixtures::png_data_uri(4, 4),
            "1",
            "0",
            "0",
        );

        let response = server.post("/pdf/stamp-sign").multipart(form).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let json = response.json::<serde_json::Value>();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "PAGE_INDEX_OUT_OF_RANGE");
        assert_eq!(
            json["error"],
            "Invalid page index 1: valid range is 0..=0 (1 page)"
        );
    }

    #[tokio::test]
    async fn test_stamp_sign_rejects_unsupported_image() {
        let server = create_test_server();
        let form = stamp_form(
            fixtures::pdf(1),
            "data:image/gif;base64,R0lGODlhAQABAAAAACw=",
            "0",
            "0",
            "0",
        );

        let response = server.post("/pdf/stamp-sign").multipart(form).await;
        response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let json = response.json::<serde_json::Value>();
        assert_eq!(json["code"], "UNSUPPORTED_IMAGE_FORMAT");
    }

    #[tokio::test]
    async fn test_stamp_sign_rejects_malformed_pdf() {
        let server = create_test_server();
        let form = stamp_form(
            b"not a pdf at all".to_vec(),
            &fixtures::png_data_uri(4, 4),
            "0",
            "0",
            "0",
        );

        let response = server.post("/pdf/stamp-sign").multipart(form).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json = response.json::<serde_json::Value>();
        assert_eq!(json["code"], "MALFORMED_DOCUMENT");
    }

    #[tokio::test]
    async fn test_stamp_sign_requires_pdf_part() {
        let server = create_test_server();
        let form = MultipartForm::new()
            .add_text("imageBase64", fixtures::png_data_uri(1, 1))
            .add_text("page", "0")
            .add_text("x", "0")
            .add_text("y", "0");

        let response = server.post("/pdf/stamp-sign").multipart(form).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json = response.json::<serde_json::Value>();
        assert_eq!(json["code"], "INVALID_REQUEST");
        assert_eq!(json["error"], "Invalid request: No PDF file uploaded");
    }

    #[tokio::test]
    async fn test_stamp_sign_rejects_non_numeric_coordinates() {
        let server = create_test_server();
        let form = stamp_form(
            fixtures::pdf(1),
            &fixtures::png_data_uri(4, 4),
            "0",
            "left",
            "0",
        );

        let response = server.post("/pdf/stamp-sign").multipart(form).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json = response.json::<serde_json::Value>();
        assert_eq!(json["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_pdf_info_lists_pages() {
        let server = create_test_server();
        let form = MultipartForm::new().add_part(
            "pdf",
            Part::bytes(fixtures::pdf(3)).file_name("doc.pdf"),
        );

        let response = server.post("/pdf/info").multipart(form).await;
        response.assert_status_ok();

        let json = response.json::<serde_json::Value>();
        assert_eq!(json["page_count"], 3);
        assert_eq!(json["version"], "1.7");
        assert_eq!(json["pages"][2]["index"], 2);
        assert_eq!(json["pages"][2]["width"], 612.0);
        assert_eq!(json["pages"][2]["height"], 792.0);
    }
}
