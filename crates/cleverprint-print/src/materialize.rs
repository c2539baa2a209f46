// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF materialization — turn a job payload into a readable file on disk.
//
// Inline blobs and downloads land in the OS temp directory as
// `print_job_<epochMillis>_<random9>.pdf`; a payload that already names a
// local file is used in place and never deleted by us.  Every owned temp
// file is unlinked exactly once by the spooler when the job leaves the
// active set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use tracing::{debug, warn};

use cleverprint_core::error::{AgentError, Result};
use cleverprint_core::types::PrintPayload;

/// Deadline for downloading a `pdfUrl` payload.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Data-URI prefix accepted on `pdfBytes` payloads.
const DATA_URI_PREFIX: &str = "data:application/pdf;base64,";

/// A payload resolved to a file on disk.
#[derive(Debug)]
pub struct MaterializedPdf {
    pub path: PathBuf,
    /// Whether the file is ours to delete after printing.
    pub owned: bool,
}

/// Resolves payloads to on-disk PDFs.
pub struct PdfMaterializer {
    http: reqwest::Client,
}

impl Default for PdfMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfMaterializer {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(concat!("CleverPrintingAgent/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("http client");
        Self { http }
    }

    /// Resolve `payload` to a readable PDF path.
    pub async fn materialize(&self, payload: &PrintPayload) -> Result<MaterializedPdf> {
        match payload {
            PrintPayload::PdfPath(path) => {
                if path.is_file() {
                    Ok(MaterializedPdf {
                        path: path.clone(),
                        owned: false,
                    })
                } else {
                    Err(AgentError::Materialize(format!(
                        "PDF file not found: {}",
                        path.display()
                    )))
                }
            }
            PrintPayload::PdfBytes(blob) => {
                let bytes = decode_pdf_blob(blob)?;
                let path = temp_pdf_path();
                write_and_verify(&path, &bytes).await?;
                Ok(MaterializedPdf { path, owned: true })
            }
            PrintPayload::PdfUrl(url) => {
                let bytes = self.download(url).await?;
                let path = temp_pdf_path();
                write_and_verify(&path, &bytes).await?;
                Ok(MaterializedPdf { path, owned: true })
            }
            PrintPayload::Html(_) | PrintPayload::HtmlUrl(_) => Err(AgentError::Materialize(
                "HTML payloads are no longer supported — convert the content to PDF before submitting".into(),
            )),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "downloading PDF");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::Materialize(format!("download {url}: {e}")))?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(AgentError::Materialize(format!(
                "download {url}: server returned {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AgentError::Materialize(format!("download {url}: {e}")))?;
        Ok(body.to_vec())
    }
}

/// Decode a `pdfBytes` blob: raw PDF text passes through, anything else is
/// base64 (with an optional data-URI prefix).
fn decode_pdf_blob(blob: &str) -> Result<Vec<u8>> {
    if blob.starts_with("%PDF") {
        return Ok(blob.as_bytes().to_vec());
    }
    let stripped = blob.strip_prefix(DATA_URI_PREFIX).unwrap_or(blob);
    // JSON producers wrap long base64 lines; the decoder does not tolerate that.
    let compact: String = stripped.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|e| AgentError::Materialize(format!("invalid base64 PDF data: {e}")))
}

/// Fresh temp path: `print_job_<epochMillis>_<9 base36 chars>.pdf`.
fn temp_pdf_path() -> PathBuf {
    let millis = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    std::env::temp_dir().join(format!("print_job_{millis}_{suffix}.pdf"))
}

/// Write `bytes` to `path` and read the file back to confirm nothing was
/// truncated or translated on the way to disk.
async fn write_and_verify(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| AgentError::Materialize(format!("write {}: {e}", path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await
        {
            debug!(path = %path.display(), error = %e, "could not set temp file permissions");
        }
    }

    let written = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            cleanup_temp(path);
            return Err(AgentError::Materialize(format!(
                "verify {}: {e}",
                path.display()
            )));
        }
    };
    if written.len() != bytes.len() {
        cleanup_temp(path);
        return Err(AgentError::Materialize(format!(
            "temp file size mismatch: wrote {} bytes, read back {}",
            bytes.len(),
            written.len()
        )));
    }
    debug!(path = %path.display(), size = bytes.len(), "PDF materialized");
    Ok(())
}

/// Unlink an owned temp file. Idempotent — a missing file just logs.
pub fn cleanup_temp(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "temp PDF removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp PDF"),
    }
}
