// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print execution by invoking the host OS's native PDF printing facilities.
//
// POSIX systems hand the file to CUPS via `lp`; Windows prefers a bundled or
// configured SumatraPDF, falling back to the shell "print" verb and, as a
// last resort, a browser in kiosk-print mode.  Arguments are always passed
// as a vector — user input is never spliced into a shell string.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use cleverprint_core::error::{AgentError, Result};
use cleverprint_core::types::PrintOptions;

/// Hard deadline for any single print command.
const PRINT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the kiosk-print browser fallback is allowed to live.
const KIOSK_TIMEOUT: Duration = Duration::from_secs(5);

/// Seam between the spooler and the operating system.
///
/// The production implementation shells out; tests substitute a mock to
/// exercise retry, cancellation, and ordering without touching a printer.
#[async_trait]
pub trait PrintExecutor: Send + Sync {
    /// Print the PDF at `pdf_path`. Must not return until the underlying
    /// command has exited (or the deadline has force-killed it).
    async fn print(&self, pdf_path: &Path, options: &PrintOptions) -> Result<()>;
}

/// Executor backed by the host OS print commands.
pub struct SystemPrintExecutor {
    /// Configured override for the SumatraPDF executable (Windows only).
    sumatra_override: Option<PathBuf>,
}

impl SystemPrintExecutor {
    pub fn new(sumatra_override: Option<PathBuf>) -> Self {
        Self { sumatra_override }
    }
}

#[async_trait]
impl PrintExecutor for SystemPrintExecutor {
    async fn print(&self, pdf_path: &Path, options: &PrintOptions) -> Result<()> {
        if cfg!(target_os = "windows") {
            self.print_windows(pdf_path, options).await
        } else {
            self.print_lp(pdf_path, options).await
        }
    }
}

impl SystemPrintExecutor {
    async fn print_lp(&self, pdf_path: &Path, options: &PrintOptions) -> Result<()> {
        let args = lp_args(options, pdf_path);
        info!(path = %pdf_path.display(), copies = options.copies, "printing via lp");
        run_to_completion("lp", &args).await
    }

    async fn print_windows(&self, pdf_path: &Path, options: &PrintOptions) -> Result<()> {
        if let Some(sumatra) = resolve_sumatra(self.sumatra_override.as_deref()) {
            let args = sumatra_args(options.printer_name.as_deref(), pdf_path);
            info!(sumatra = %sumatra.display(), "printing via SumatraPDF");
            return run_to_completion(&sumatra.to_string_lossy(), &args).await;
        }

        // No Sumatra anywhere — hand the file to whatever application owns
        // the "print" verb for PDFs.
        warn!("SumatraPDF not found — falling back to the shell print verb");
        let verb_cmd = print_verb_command(pdf_path);
        let args = ["-NoProfile", "-WindowStyle", "Hidden", "-Command", verb_cmd.as_str()];
        match run_to_completion("powershell", &args).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "print verb failed — trying kiosk-print browser (best effort)");
                kiosk_print(pdf_path).await
            }
        }
    }
}

/// Build the `lp` argument vector for POSIX printing.
fn lp_args(options: &PrintOptions, pdf_path: &Path) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(printer) = options.printer_name.as_deref() {
        args.push("-d".to_string());
        args.push(printer.to_string());
    }
    args.push("-n".to_string());
    args.push(options.copies.max(1).to_string());
    args.push(pdf_path.to_string_lossy().into_owned());
    args
}

/// Build the SumatraPDF argument vector for silent printing.
fn sumatra_args(printer: Option<&str>, pdf_path: &Path) -> Vec<String> {
    let mut args = vec!["-silent".to_string()];
    match printer {
        Some(name) => {
            args.push("-print-to".to_string());
            args.push(name.to_string());
        }
        None => args.push("-print-to-default".to_string()),
    }
    args.push("-print-settings".to_string());
    args.push("fit,center,paper=auto,bin=auto".to_string());
    args.push(pdf_path.to_string_lossy().into_owned());
    args
}

/// PowerShell one-liner invoking the shell "print" verb on the PDF.
///
/// The path is single-quoted with embedded quotes doubled — PowerShell's
/// literal-string escaping.
fn print_verb_command(pdf_path: &Path) -> String {
    let quoted = pdf_path.to_string_lossy().replace('\'', "''");
    format!("Start-Process -FilePath '{quoted}' -Verb Print -Wait")
}

/// Resolve the SumatraPDF executable, first existing candidate wins.
fn resolve_sumatra(configured: Option<&Path>) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(p) = configured {
        candidates.push(p.to_path_buf());
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("resources").join("sumatra").join("SumatraPDF.exe"));
            candidates.push(
                dir.join("assets")
                    .join("windows")
                    .join("sumatra")
                    .join("SumatraPDF.exe"),
            );
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("sumatra").join("SumatraPDF.exe"));
    }
    candidates.into_iter().find(|p| p.exists())
}

/// Run a command to completion under the 30-second deadline.
///
/// Success is exit status 0; failure carries the captured stderr when there
/// is any, else the exit status or launcher error.
async fn run_to_completion(program: &str, args: &[impl AsRef<str>]) -> Result<()> {
    let mut cmd = Command::new(program);
    for arg in args {
        cmd.arg(arg.as_ref());
    }
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AgentError::Print(format!("failed to launch {program}: {e}")))?;

    let output = tokio::time::timeout(PRINT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            AgentError::Print(format!(
                "{program} did not finish within {}s",
                PRINT_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| AgentError::Print(format!("waiting on {program}: {e}")))?;

    if output.status.success() {
        debug!(program, "print command completed");
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        Err(AgentError::Print(format!(
            "{program} exited with {}",
            output.status
        )))
    } else {
        Err(AgentError::Print(format!("{program}: {stderr}")))
    }
}

/// Last-resort Windows fallback: open the PDF in Edge with kiosk printing,
/// give it a few seconds, then kill it.  Success here only means the browser
/// launched — the print outcome is unknowable, hence "best effort".
async fn kiosk_print(pdf_path: &Path) -> Result<()> {
    let mut child = Command::new("msedge")
        .arg("--kiosk-printing")
        .arg("--kiosk")
        .arg(pdf_path.as_os_str())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AgentError::Print(format!("kiosk fallback failed to launch: {e}")))?;

    tokio::time::sleep(KIOSK_TIMEOUT).await;
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "kiosk browser already exited");
    }
    let _ = child.wait().await;
    warn!("kiosk-print fallback ran — outcome is best effort");
    Ok(())
}
