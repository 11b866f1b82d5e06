//! API handlers for the stamping server
//!
//! Provides REST endpoints for:
//! - Stamping a signature image onto a PDF page
//! - Page inspection (count and sizes)
//! - Liveness checks

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use pdfstamp_core::{inspect, DocumentInfo, PlacementRequest, StampRequest};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "pdfstamp-api",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Handler: GET /pdf/methodpdf
pub async fn handle_method_pdf() -> &'static str {
    "Hello Signature!"
}

/// Multipart fields of a stamp request. The PDF arrives as a file part,
/// everything else as text parts.
#[derive(Debug, Default)]
struct StampForm {
    pdf: Option<Bytes>,
    text: HashMap<String, String>,
}

impl StampForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = StampForm::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == "pdf" {
                form.pdf = Some(field.bytes().await?);
            } else {
                form.text.insert(name, field.text().await?);
            }
        }
        Ok(form)
    }

    fn take_pdf(&mut self) -> Result<Vec<u8>, ApiError> {
        match self.pdf.take() {
            Some(bytes) if !bytes.is_empty() => Ok(bytes.to_vec()),
            _ => Err(ApiError::InvalidRequest("No PDF file uploaded".to_string())),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.text
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<&str, ApiError> {
        self.field(name)
            .ok_or_else(|| ApiError::InvalidRequest(format!("Missing field '{}'", name)))
    }

    fn number(&self, name: &str) -> Result<Option<f64>, ApiError> {
        self.field(name)
            .map(|raw| {
                raw.parse::<f64>().map_err(|_| {
                    ApiError::InvalidRequest(format!("Field '{}' is not a number: {}", name, raw))
                })
            })
            .transpose()
    }

    fn required_number(&self, name: &str) -> Result<f64, ApiError> {
        self.number(name)?
            .ok_or_else(|| ApiError::InvalidRequest(format!("Missing field '{}'", name)))
    }

    fn page(&self) -> Result<i64, ApiError> {
        let raw = self.required("page")?;
        raw.parse::<i64>().map_err(|_| {
            ApiError::InvalidRequest(format!("Field 'page' is not an integer: {}", raw))
        })
    }

    fn into_request(mut self) -> Result<StampRequest, ApiError> {
        let pdf = self.take_pdf()?;
        let placement = PlacementRequest::new(
            self.page()?,
            self.required_number("x")?,
            self.required_number("y")?,
        )
        .with_size(self.number("w")?, self.number("h")?);
        let image_base64 = self.required("imageBase64")?.to_string();

        Ok(StampRequest {
            pdf,
            image_base64,
            placement,
        })
    }
}

/// Handler: POST /pdf/stamp-sign
///
/// Multipart fields: `pdf` (file), `imageBase64`, `page`, `x`, `y`,
/// optional `w` and `h`. Responds with the stamped PDF as an attachment.
#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn handle_stamp_sign(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let request = StampForm::read(multipart).await?.into_request()?;
    debug!(
        pdf_bytes = request.pdf.len(),
        placement = ?request.placement,
        "stamp request received"
    );

    let options = state.options.clone();
    let output = tokio::task::spawn_blocking(move || request.execute(&options))
        .await
        .map_err(|e| ApiError::Internal(format!("Stamping task failed: {}", e)))??;

    info!(
        page = output.metrics.page_index,
        output_bytes = output.metrics.output_size_bytes,
        ms = output.metrics.processing_time_ms,
        "stamp request completed"
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=signed.pdf",
            ),
        ],
        output.bytes,
    ))
}

/// Handler: POST /pdf/info
///
/// Multipart field `pdf` (file). Reports page count and page sizes so a
/// client can choose where to stamp.
pub async fn handle_pdf_info(multipart: Multipart) -> Result<Json<DocumentInfo>, ApiError> {
    let pdf = StampForm::read(multipart).await?.take_pdf()?;
    let info = tokio::task::spawn_blocking(move || inspect(&pdf))
        .await
        .map_err(|e| ApiError::Internal(format!("Inspection task failed: {}", e)))??;
    Ok(Json(info))
}
