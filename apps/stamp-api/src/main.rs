//! PDF stamping server
//!
//! Accepts a PDF upload plus a base64 signature image and returns the PDF
//! with the image drawn on the requested page. Provides REST API endpoints for:
//!
//! - Stamping (`POST /pdf/stamp-sign`)
//! - Page inspection (`POST /pdf/info`)
//! - Liveness (`GET /health`, `GET /pdf/methodpdf`)
//!
//! Stamping is CPU-bound and runs on the blocking thread pool; the
//! request body size is capped by `--max-upload-mb`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use pdfstamp_core::StampOptions;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;
#[cfg(test)]
mod tests;

use api::{handle_health, handle_method_pdf, handle_pdf_info, handle_stamp_sign};

/// Command-line arguments for the stamping server
#[derive(Parser, Debug)]
#[command(name = "pdfstamp-api")]
#[command(about = "HTTP service that stamps signature images onto PDF pages")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Maximum request body size in megabytes
    #[arg(long, default_value = "25")]
    max_upload_mb: usize,

    /// Rate limit: requests per second per IP
    #[arg(long, default_value = "10")]
    rate_limit: u32,

    /// Draw onto the page without wrapping its existing content in q/Q
    #[arg(long)]
    no_isolation: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub options: Arc<StampOptions>,
    /// Request body cap in bytes
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(options: StampOptions, max_upload_bytes: usize) -> Self {
        Self {
            options: Arc::new(options),
            max_upload_bytes,
        }
    }
}

/// Routes and per-request middleware, without rate limiting.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/pdf/methodpdf", get(handle_method_pdf))
        .route("/pdf/stamp-sign", post(handle_stamp_sign))
        .route("/pdf/info", post(handle_pdf_info))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting pdfstamp server on {}:{}", args.host, args.port);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(args.rate_limit.into())
            .burst_size(args.rate_limit * 2)
            .finish()
            .ok_or_else(|| anyhow!("Invalid rate limit: {}", args.rate_limit))?,
    );

    let options = StampOptions {
        isolate_graphics_state: !args.no_isolation,
        ..StampOptions::default()
    };
    let state = AppState::new(options, args.max_upload_mb * 1024 * 1024);

    let router = app(state).layer(GovernorLayer {
        config: governor_conf,
    });

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Rate limit: {} requests/second per IP", args.rate_limit);
    info!("Upload limit: {} MB", args.max_upload_mb);

    // The governor keys on the peer address
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
