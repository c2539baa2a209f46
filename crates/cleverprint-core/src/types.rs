// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the CleverPrint agent.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Scheduling rank — lower dispatches first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Picked up by the dispatch loop; payload being materialized.
    Processing,
    /// Handed to the OS print command.
    Printing,
    /// Successfully printed.
    Completed,
    /// Gave up after exhausting retries — see `last_error`.
    Failed,
    /// Cancelled by the user or on forced shutdown.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the job currently occupies the spooler's `current` slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Processing | Self::Printing)
    }

    /// Wire keyword, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Printing => "printing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The print content descriptor. Exactly one variant per job by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintPayload {
    /// Raw PDF text or a base64-encoded blob (optionally with a
    /// `data:application/pdf;base64,` prefix).
    PdfBytes(String),
    /// Absolute path to a PDF already on this machine.
    PdfPath(PathBuf),
    /// URL to download the PDF from over HTTP(S).
    PdfUrl(String),
    /// Legacy: inline HTML. Accepted at enqueue, rejected at materialize.
    Html(String),
    /// Legacy: URL of an HTML page. Accepted at enqueue, rejected at materialize.
    HtmlUrl(String),
}

impl PrintPayload {
    /// Whether the payload carries no usable content.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::PdfBytes(s) | Self::PdfUrl(s) | Self::Html(s) | Self::HtmlUrl(s) => {
                s.trim().is_empty()
            }
            Self::PdfPath(p) => p.as_os_str().is_empty(),
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PdfBytes(_) => "pdf-bytes",
            Self::PdfPath(_) => "pdf-path",
            Self::PdfUrl(_) => "pdf-url",
            Self::Html(_) => "html",
            Self::HtmlUrl(_) => "html-url",
        }
    }
}

/// Standard paper sizes accepted on job options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PaperSize {
    #[default]
    A4,
    A3,
    A5,
    Letter,
    Legal,
    Tabloid,
}

/// Page margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

/// Options attached to a print job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintOptions {
    /// Target printer; falls back to the configured default when unset.
    pub printer_name: Option<String>,
    pub copies: u32,
    pub page_size: PaperSize,
    pub margins: Option<Margins>,
    pub print_background: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            printer_name: None,
            copies: 1,
            page_size: PaperSize::A4,
            margins: None,
            print_background: true,
        }
    }
}

/// A complete print job as held by the spooler.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: JobId,
    /// Present iff the job was injected by the remote command-center poller.
    pub server_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub priority: Priority,
    pub status: JobStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub payload: PrintPayload,
    pub options: PrintOptions,
    /// Materialized temp PDF owned exclusively by this job; unlinked on any
    /// exit from the active set.
    pub temp_path: Option<PathBuf>,
}

impl PrintJob {
    pub fn new(
        payload: PrintPayload,
        options: PrintOptions,
        priority: Priority,
        server_job_id: Option<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            server_job_id,
            created_at: Utc::now(),
            priority,
            status: JobStatus::Queued,
            retry_count: 0,
            last_error: None,
            payload,
            options,
            temp_path: None,
        }
    }

    /// Payload-free projection for events and listings.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            server_job_id: self.server_job_id.clone(),
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// A point-in-time view of a job without its payload.
///
/// Events and listing endpoints hand these out so a 50 MB base64 payload is
/// never cloned per subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub server_job_id: Option<String>,
    pub status: JobStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// Lifecycle event fanned out to spooler subscribers.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Added(JobSnapshot),
    Updated(JobSnapshot),
    Completed(JobSnapshot),
    Failed { job: JobSnapshot, error: String },
}

impl JobEvent {
    /// The snapshot carried by this event, whichever variant it is.
    pub fn job(&self) -> &JobSnapshot {
        match self {
            Self::Added(j) | Self::Updated(j) | Self::Completed(j) => j,
            Self::Failed { job, .. } => job,
        }
    }
}

/// An installed printer as reported by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub is_default: bool,
}

impl PrinterInfo {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            description: String::new(),
            is_default: false,
            name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_orders_high_first() {
        assert!(Priority::High.rank() < Priority::Normal.rank());
        assert!(Priority::Normal.rank() < Priority::Low.rank());
    }

    #[test]
    fn priority_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
        let p: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(p, Priority::Low);
    }

    #[test]
    fn status_terminal_classification() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Printing.is_terminal());
    }

    #[test]
    fn status_in_flight_classification() {
        assert!(JobStatus::Processing.is_in_flight());
        assert!(JobStatus::Printing.is_in_flight());
        assert!(!JobStatus::Queued.is_in_flight());
        assert!(!JobStatus::Completed.is_in_flight());
    }

    #[test]
    fn empty_payload_detection() {
        assert!(PrintPayload::PdfBytes("  ".into()).is_empty());
        assert!(PrintPayload::PdfPath(PathBuf::new()).is_empty());
        assert!(!PrintPayload::PdfUrl("https://example.com/a.pdf".into()).is_empty());
    }

    #[test]
    fn default_options_match_documented_defaults() {
        let opts = PrintOptions::default();
        assert_eq!(opts.copies, 1);
        assert_eq!(opts.page_size, PaperSize::A4);
        assert!(opts.print_background);
        assert!(opts.printer_name.is_none());
    }

    #[test]
    fn snapshot_drops_payload_but_keeps_identity() {
        let job = PrintJob::new(
            PrintPayload::PdfBytes("JVBERi0=".into()),
            PrintOptions::default(),
            Priority::High,
            Some("srv-1".into()),
        );
        let snap = job.snapshot();
        assert_eq!(snap.id, job.id);
        assert_eq!(snap.server_job_id.as_deref(), Some("srv-1"));
        assert_eq!(snap.status, JobStatus::Queued);
    }
}
