// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Remote command-center client: pending-job polling, liveness heartbeats,
// and terminal-status reporting.
//
// The server is the source of truth for its own jobs and redelivers until it
// receives a terminal status, so the poller only suppresses duplicates while
// a server job is in flight locally.  Transport failures are logged and the
// loops keep running; nothing here is fatal to the agent.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use cleverprint_core::config::ConfigStore;
use cleverprint_core::error::{AgentError, Result};
use cleverprint_core::types::{
    JobEvent, JobStatus, Margins, PaperSize, PrintOptions, PrintPayload, Priority,
};
use cleverprint_print::spooler::Spooler;

/// Deadline for every request to the command-center.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How many pending jobs one poll asks for.
const POLL_BATCH_LIMIT: u32 = 10;

/// Client for the remote command-center. Construct only when a base URL is
/// configured; an agent without one runs standalone.
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    config: Arc<ConfigStore>,
    spooler: Arc<Spooler>,
    hostname: String,
}

impl RemoteClient {
    pub fn new(base_url: String, config: Arc<ConfigStore>, spooler: Arc<Spooler>) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("CleverPrintingAgent/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("http client");
        Arc::new(Self {
            http,
            base_url,
            config,
            spooler,
            hostname: local_hostname(),
        })
    }

    /// Launch the poll, heartbeat, and status-report tasks.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(base_url = %self.base_url, "remote client starting");
        let probe = Arc::clone(self);
        tokio::spawn(async move {
            match probe.test_connection().await {
                Ok(()) => info!("command-center reachable"),
                Err(e) => warn!(error = %e, "command-center probe failed — polling will keep trying"),
            }
        });
        vec![
            tokio::spawn(Arc::clone(self).poll_loop(shutdown.clone())),
            tokio::spawn(Arc::clone(self).heartbeat_loop(shutdown.clone())),
            tokio::spawn(Arc::clone(self).report_loop(shutdown)),
        ]
    }

    // -- Polling ---------------------------------------------------------------

    async fn poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.poll_interval());
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.poll_once().await {
                        debug!(error = %e, "pending-job poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("remote poller stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<()> {
        let url = format!(
            "{}/api/command-center/printing/pending-jobs?limit={POLL_BATCH_LIMIT}",
            self.base_url
        );
        let response = self
            .with_auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| AgentError::RemoteTransport(humanize_request_error(&e)))?;

        if response.status() != StatusCode::OK {
            return Err(AgentError::RemoteTransport(format!(
                "pending-jobs poll returned {}",
                response.status()
            )));
        }

        let batch: PendingJobsResponse = response
            .json()
            .await
            .map_err(|e| AgentError::RemoteTransport(format!("pending-jobs body: {e}")))?;

        for pending in batch.jobs {
            if self.spooler.has_server_job(&pending.id) {
                continue;
            }
            // A full queue defers the whole rest of the batch — the server
            // redelivers on the next poll, so nothing is reported.
            let status = self.spooler.status();
            if status.queue_length >= status.max_queue_size {
                debug!("queue full — deferring remainder of the batch");
                break;
            }

            let server_job_id = pending.id.clone();
            let (payload, options, priority) = pending.into_job();
            let Some(payload) = payload else {
                warn!(server_job_id = %server_job_id, "server job carries no payload");
                self.report_status(&server_job_id, "failed", Some("job has no print payload"))
                    .await;
                continue;
            };

            match self
                .spooler
                .enqueue(payload, options, priority, Some(server_job_id.clone()))
            {
                Ok(job) => {
                    info!(server_job_id = %server_job_id, job_id = %job.id, "server job queued");
                }
                Err(AgentError::QueueFull(_)) => {
                    debug!("queue filled mid-batch — deferring remainder");
                    break;
                }
                Err(AgentError::DuplicateServerJob(_)) => {}
                Err(e) => {
                    warn!(server_job_id = %server_job_id, error = %e, "server job rejected");
                    self.report_status(&server_job_id, "failed", Some(&e.to_string()))
                        .await;
                }
            }
        }
        Ok(())
    }

    // -- Heartbeats ------------------------------------------------------------

    async fn heartbeat_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        // The first tick fires immediately — startup announces itself.
        let mut tick = tokio::time::interval(self.config.heartbeat_interval());
        loop {
            tokio::select! {
                _ = tick.tick() => self.send_heartbeat("online", None).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // Best effort: tell the server we are going away.
                        self.send_heartbeat("offline", None).await;
                        info!("remote heartbeat stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn send_heartbeat(&self, status: &str, error_message: Option<&str>) {
        let url = format!("{}/api/command-center/printing/heartbeat", self.base_url);
        let mut body = json!({
            "hostname": self.hostname,
            "agentVersion": env!("CARGO_PKG_VERSION"),
            "status": status,
        });
        if let Some(msg) = error_message {
            body["errorMessage"] = json!(msg);
        }

        match self.with_auth(self.http.post(&url)).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(status, "heartbeat delivered");
            }
            Ok(response) => warn!(code = %response.status(), "heartbeat rejected"),
            Err(e) => debug!(error = %humanize_request_error(&e), "heartbeat failed"),
        }
    }

    // -- Terminal-status reporting ----------------------------------------------

    async fn report_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.spooler.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "status reporter lagged behind spooler events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("remote status reporter stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: &JobEvent) {
        let job = event.job();
        if !job.status.is_terminal() {
            return;
        }
        let Some(server_job_id) = job.server_job_id.as_deref() else {
            return;
        };
        let status = remote_status(job.status);
        let error_message = match event {
            JobEvent::Failed { error, .. } => Some(error.clone()),
            _ if job.status == JobStatus::Cancelled => Some("job was cancelled".to_string()),
            _ => job.last_error.clone(),
        };
        self.report_status(server_job_id, status, error_message.as_deref())
            .await;
    }

    /// POST the terminal status for one server job. Failures are logged only;
    /// the server redelivers unacknowledged jobs, which the agent tolerates.
    async fn report_status(&self, server_job_id: &str, status: &str, error_message: Option<&str>) {
        let url = format!(
            "{}/api/command-center/printing/jobs/{server_job_id}/status",
            self.base_url
        );
        let mut body = json!({ "status": status });
        if let Some(msg) = error_message {
            body["errorMessage"] = json!(msg);
        }

        match self.with_auth(self.http.post(&url)).json(&body).send().await {
            Ok(response) if status_ack_ok(response.status()) => {
                info!(server_job_id, status, "terminal status reported");
            }
            Ok(response) => {
                warn!(server_job_id, code = %response.status(), "status report rejected");
            }
            Err(e) => {
                warn!(server_job_id, error = %humanize_request_error(&e), "status report failed");
            }
        }
    }

    // -- Probes and plumbing ------------------------------------------------------

    /// Check connectivity to the command-center.
    pub async fn test_connection(&self) -> Result<()> {
        let url = format!("{}/api/print-jobs/health", self.base_url);
        let response = self
            .with_auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| AgentError::RemoteTransport(humanize_request_error(&e)))?;
        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(AgentError::RemoteTransport(format!(
                "health probe returned {}",
                response.status()
            )))
        }
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(key) = self.config.api_key() else {
            return request;
        };
        auth_headers(&key)
            .into_iter()
            .fold(request, |req, (name, value)| req.header(name, value))
    }
}

/// Build the outbound auth headers for the configured key.
///
/// A key already carrying a `bearer ` prefix goes out verbatim as
/// `Authorization`; a bare key is sent both ways so either server style works.
fn auth_headers(api_key: &str) -> Vec<(&'static str, String)> {
    if api_key
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "))
    {
        vec![("Authorization", api_key.to_string())]
    } else {
        vec![
            ("X-API-Key", api_key.to_string()),
            ("Authorization", format!("Bearer {api_key}")),
        ]
    }
}

/// Map a local terminal status to the server vocabulary.
fn remote_status(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Completed => "printed",
        _ => "failed",
    }
}

/// The server acknowledges status updates with any of these codes.
fn status_ack_ok(code: StatusCode) -> bool {
    matches!(code.as_u16(), 200 | 201 | 204)
}

/// Translate a transport error into something an operator can act on.
fn humanize_request_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "connection timed out — the server did not respond within 10 seconds".into();
    }
    if err.is_connect() {
        let detail = err.to_string();
        if detail.contains("dns") || detail.contains("resolve") {
            return "server address could not be resolved — check the configured URL".into();
        }
        return "connection refused — check the server URL and that the server is up".into();
    }
    err.to_string()
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".into())
}

// -- Wire format -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PendingJobsResponse {
    #[serde(default)]
    jobs: Vec<PendingJob>,
}

/// One pending job as delivered by the server. Fields translate one-for-one
/// into the local payload and options.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingJob {
    id: String,
    pdf: Option<String>,
    pdf_base64: Option<String>,
    pdf_path: Option<String>,
    pdf_url: Option<String>,
    html: Option<String>,
    html_url: Option<String>,
    printer_name: Option<String>,
    priority: Option<Priority>,
    copies: Option<u32>,
    page_size: Option<PaperSize>,
    margins: Option<Margins>,
    print_background: Option<bool>,
}

impl PendingJob {
    fn into_job(self) -> (Option<PrintPayload>, PrintOptions, Priority) {
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
            .or_else(|| {
                self.html_url
                    .filter(|s| !s.trim().is_empty())
                    .map(PrintPayload::HtmlUrl)
            });

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_key_sends_both_headers() {
        let headers = auth_headers("sekrit");
        assert_eq!(
            headers,
            vec![
                ("X-API-Key", "sekrit".to_string()),
                ("Authorization", "Bearer sekrit".to_string()),
            ]
        );
    }

    #[test]
    fn bearer_prefixed_key_goes_out_verbatim() {
        let headers = auth_headers("Bearer abc123");
        assert_eq!(headers, vec![("Authorization", "Bearer abc123".to_string())]);

        // Case-insensitive prefix check.
        let headers = auth_headers("bearer xyz");
        assert_eq!(headers, vec![("Authorization", "bearer xyz".to_string())]);
    }

    #[test]
    fn completed_maps_to_printed_everything_else_to_failed() {
        assert_eq!(remote_status(JobStatus::Completed), "printed");
        assert_eq!(remote_status(JobStatus::Failed), "failed");
        assert_eq!(remote_status(JobStatus::Cancelled), "failed");
    }

    #[test]
    fn ack_codes() {
        assert!(status_ack_ok(StatusCode::OK));
        assert!(status_ack_ok(StatusCode::CREATED));
        assert!(status_ack_ok(StatusCode::NO_CONTENT));
        assert!(!status_ack_ok(StatusCode::ACCEPTED));
        assert!(!status_ack_ok(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn pending_job_translation_prefers_base64() {
        let pending: PendingJob = serde_json::from_str(
            r#"{"id": "srv-1", "pdf": "raw", "pdfBase64": "ZW5j", "copies": 2,
                "priority": "high", "printerName": "Warehouse"}"#,
        )
        .expect("valid pending job");
        let (payload, options, priority) = pending.into_job();
        assert_eq!(payload, Some(PrintPayload::PdfBytes("ZW5j".into())));
        assert_eq!(options.copies, 2);
        assert_eq!(options.printer_name.as_deref(), Some("Warehouse"));
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn pending_job_without_payload_translates_to_none() {
        let pending: PendingJob =
            serde_json::from_str(r#"{"id": "srv-2"}"#).expect("valid pending job");
        let (payload, options, priority) = pending.into_job();
        assert!(payload.is_none());
        assert_eq!(options.copies, 1);
        assert_eq!(priority, Priority::Normal);
    }

    #[test]
    fn jobs_array_defaults_to_empty() {
        let batch: PendingJobsResponse = serde_json::from_str("{}").expect("valid body");
        assert!(batch.jobs.is_empty());
    }
}
