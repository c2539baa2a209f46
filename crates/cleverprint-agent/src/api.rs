// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local HTTP API exposing the spooler to desktop clients on this machine.
//
// The server binds to loopback only.  CORS is wide open (browser-hosted POS
// frontends talk to it directly) and the body limit admits 50 MB base64
// PDFs.  Handlers do nothing but translate between JSON and the spooler's
// thread-safe methods.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use cleverprint_core::config::ConfigStore;
use cleverprint_core::error::{AgentError, Result};
use cleverprint_core::types::{
    JobId, JobSnapshot, Margins, PaperSize, PrintOptions, PrintPayload, Priority,
};
use cleverprint_print::printers::list_printers;
use cleverprint_print::spooler::Spooler;

/// Base64 PDFs inflate by a third; 50 MB admits ~35 MB documents.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
struct ApiState {
    spooler: Arc<Spooler>,
    config: Arc<ConfigStore>,
}

/// Run the API server until the shutdown flag flips.
pub async fn serve(
    spooler: Arc<Spooler>,
    config: Arc<ConfigStore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.api_port()));
    let app = router(spooler, config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("local API listening on http://{addr}");

    tokio::select! {
        r = axum::serve(listener, app) => r.map_err(AgentError::Io)?,
        _ = shutdown.changed() => info!("local API stopping"),
    }
    Ok(())
}

fn router(spooler: Arc<Spooler>, config: Arc<ConfigStore>) -> Router {
    let state = ApiState { spooler, config };
    Router::new()
        .route("/health", get(health))
        .route("/api/print", post(submit_print))
        .route("/api/jobs", get(jobs_list))
        .route("/api/jobs/:job_id", get(job_get))
        .route("/api/jobs/:job_id/cancel", post(job_cancel))
        .route("/api/status", get(status))
        .route("/api/printers", get(printers))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Print submission body. Exactly one payload field must be present; see
/// [`PrintRequest::into_payload`] for the precedence between them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrintRequest {
    pdf: Option<String>,
    pdf_base64: Option<String>,
    pdf_path: Option<String>,
    pdf_url: Option<String>,
    html: Option<String>,
    url: Option<String>,
    printer_name: Option<String>,
    priority: Option<Priority>,
    print_background: Option<bool>,
    page_size: Option<PaperSize>,
    margins: Option<Margins>,
    copies: Option<u32>,
}

impl PrintRequest {
    /// Pick the payload. `pdfBase64` wins over `pdf` (both are blob fields —
    /// callers that send both historically meant the base64 one), then the
    /// remaining variants in declaration order.
    fn into_payload(self) -> (Option<PrintPayload>, PrintOptions, Priority) {
        let payload = self
            .pdf_base64
            .filter(|s| !s.trim().is_empty())
            .map(PrintPayload::PdfBytes)
            .or_else(|| self.pdf.filter(|s| !s.trim().is_empty()).map(PrintPayload::PdfBytes))
            .or_else(|| {
                self.pdf_path
                    .filter(|s| !s.trim().is_empty())
                    .map(|p| PrintPayload::PdfPath(p.into()))
            })
            .or_else(|| self.pdf_url.filter(|s| !s.trim().is_empty()).map(PrintPayload::PdfUrl))
            .or_else(|| self.html.filter(|s| !s.trim().is_empty()).map(PrintPayload::Html))
            .or_else(|| self.url.filter(|s| !s.trim().is_empty()).map(PrintPayload::HtmlUrl));

        let options = PrintOptions {
            printer_name: self.printer_name,
            copies: self.copies.unwrap_or(1).max(1),
            page_size: self.page_size.unwrap_or_default(),
            margins: self.margins,
            print_background: self.print_background.unwrap_or(true),
        };
        (payload, options, self.priority.unwrap_or_default())
    }
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let s = state.spooler.status();
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "spooler": {
            "isProcessing": s.is_processing,
            "queueLength": s.queue_length,
            "maxQueueSize": s.max_queue_size,
            "defaultPrinter": s.default_printer,
        },
    }))
}

async fn submit_print(
    State(state): State<ApiState>,
    Json(body): Json<PrintRequest>,
) -> impl IntoResponse {
    let (payload, options, priority) = body.into_payload();
    let Some(payload) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "no print payload — provide pdfBase64, pdf, pdfPath, or pdfUrl",
            })),
        );
    };

    match state.spooler.enqueue(payload, options, priority, None) {
        Ok(job) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "jobId": job.id.to_string(),
                "status": job.status.as_str(),
                "timestamp": Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            // Only a full queue is the agent's fault; anything else the
            // enqueue can reject (bad payload, shutdown in progress) is a
            // caller-visible 400.
            let code = match &e {
                AgentError::QueueFull(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            };
            (code, Json(json!({ "success": false, "error": e.to_string() })))
        }
    }
}

async fn jobs_list(State(state): State<ApiState>) -> impl IntoResponse {
    let jobs: Vec<_> = state.spooler.list_all().iter().map(job_view).collect();
    Json(json!({ "jobs": jobs }))
}

async fn job_get(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match parse_job_id(&job_id).and_then(|id| state.spooler.find(id)) {
        Some(job) => (StatusCode::OK, Json(job_view(&job))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("job {job_id} not found") })),
        ),
    }
}

async fn job_cancel(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = parse_job_id(&job_id).is_some_and(|id| state.spooler.cancel(id));
    if cancelled {
        (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "job cancelled" })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": format!("job {job_id} not found or already finished"),
            })),
        )
    }
}

async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    let s = state.spooler.status();
    Json(json!({
        "isProcessing": s.is_processing,
        "queueLength": s.queue_length,
        "maxQueueSize": s.max_queue_size,
        "currentJob": s.current_job.as_ref().map(job_view),
        "defaultPrinter": s.default_printer,
    }))
}

async fn printers(State(state): State<ApiState>) -> impl IntoResponse {
    let default = state.config.default_printer();
    let printers: Vec<_> = list_printers(default.as_deref())
        .await
        .into_iter()
        .map(|p| {
            json!({
                "name": p.name,
                "displayName": p.display_name,
                "description": p.description,
                "status": "ready",
                "isDefault": p.is_default,
            })
        })
        .collect();
    Json(json!({ "printers": printers }))
}

fn parse_job_id(raw: &str) -> Option<JobId> {
    Uuid::parse_str(raw).ok().map(JobId)
}

fn job_view(job: &JobSnapshot) -> serde_json::Value {
    json!({
        "id": job.id.to_string(),
        "status": job.status.as_str(),
        "timestamp": job.created_at.to_rfc3339(),
        "priority": job.priority,
        "retryCount": job.retry_count,
        "error": job.last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> PrintRequest {
        serde_json::from_str(body).expect("valid request json")
    }

    #[test]
    fn base64_field_wins_over_raw_pdf() {
        let (payload, _, _) = request(r#"{"pdf": "raw", "pdfBase64": "encoded"}"#).into_payload();
        assert_eq!(payload, Some(PrintPayload::PdfBytes("encoded".into())));
    }

    #[test]
    fn path_and_url_variants_map_one_to_one() {
        let (payload, _, _) = request(r#"{"pdfPath": "/tmp/doc.pdf"}"#).into_payload();
        assert_eq!(payload, Some(PrintPayload::PdfPath("/tmp/doc.pdf".into())));

        let (payload, _, _) =
            request(r#"{"pdfUrl": "https://example.com/doc.pdf"}"#).into_payload();
        assert_eq!(
            payload,
            Some(PrintPayload::PdfUrl("https://example.com/doc.pdf".into()))
        );

        let (payload, _, _) = request(r#"{"url": "https://example.com/page"}"#).into_payload();
        assert_eq!(
            payload,
            Some(PrintPayload::HtmlUrl("https://example.com/page".into()))
        );
    }

    #[test]
    fn missing_payload_yields_none() {
        let (payload, _, _) = request(r#"{"printerName": "Office_Laser"}"#).into_payload();
        assert!(payload.is_none());
    }

    #[test]
    fn blank_payload_fields_are_skipped() {
        let (payload, _, _) = request(r#"{"pdfBase64": "  ", "pdfUrl": "https://x/doc.pdf"}"#)
            .into_payload();
        assert_eq!(payload, Some(PrintPayload::PdfUrl("https://x/doc.pdf".into())));
    }

    #[test]
    fn options_are_normalized_with_defaults() {
        let (_, options, priority) = request(r#"{"pdf": "x", "copies": 0}"#).into_payload();
        assert_eq!(options.copies, 1);
        assert_eq!(options.page_size, PaperSize::A4);
        assert!(options.print_background);
        assert_eq!(priority, Priority::Normal);
    }

    #[test]
    fn explicit_options_pass_through() {
        let (_, options, priority) = request(
            r#"{"pdf": "x", "copies": 4, "priority": "high", "pageSize": "Letter",
                "printBackground": false, "printerName": "Front_Desk"}"#,
        )
        .into_payload();
        assert_eq!(options.copies, 4);
        assert_eq!(options.page_size, PaperSize::Letter);
        assert!(!options.print_background);
        assert_eq!(options.printer_name.as_deref(), Some("Front_Desk"));
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn job_id_parsing_rejects_garbage() {
        assert!(parse_job_id("not-a-uuid").is_none());
        assert!(parse_job_id("00000000-0000-0000-0000-000000000000").is_some());
    }
}
