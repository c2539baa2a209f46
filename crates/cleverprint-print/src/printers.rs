// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Installed-printer discovery by shelling out to the host OS.
//
// Enumeration never fails: every command error is absorbed and logged, and
// the whole chain runs under a 5-second wall-clock deadline.  The parsers
// are pure functions so each platform's output format is unit-testable on
// any platform.

use std::collections::HashSet;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use cleverprint_core::types::PrinterInfo;

/// Deadline for the whole enumeration chain.
const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// List installed printers, marking the one matching `default_name`.
///
/// Returns an empty list on timeout or when no discovery command yields
/// anything.
pub async fn list_printers(default_name: Option<&str>) -> Vec<PrinterInfo> {
    let mut printers =
        match tokio::time::timeout(ENUMERATION_TIMEOUT, enumerate_platform()).await {
            Ok(found) => found,
            Err(_) => {
                warn!("printer enumeration timed out after 5s");
                Vec::new()
            }
        };

    if let Some(default) = default_name {
        for p in &mut printers {
            p.is_default = p.name == default;
        }
    }
    printers
}

async fn enumerate_platform() -> Vec<PrinterInfo> {
    if cfg!(target_os = "windows") {
        let out = run_capture("wmic", &["printer", "get", "name", "/value"]).await;
        return dedup(parse_wmic(&out));
    }

    // macOS and Linux share the CUPS lpstat chain; macOS adds a
    // system_profiler fallback for printers CUPS does not report.
    let mut found = parse_lpstat_p(&run_capture("lpstat", &["-p"]).await);
    if found.is_empty() {
        found = parse_lpstat_a(&run_capture("lpstat", &["-a"]).await);
    }
    if found.is_empty() && cfg!(target_os = "macos") {
        found = parse_system_profiler(
            &run_capture("system_profiler", &["SPPrintersDataType"]).await,
        );
    }
    dedup(found)
}

/// Run a command and return its stdout as a string; failures are absorbed.
async fn run_capture(program: &str, args: &[&str]) -> String {
    match Command::new(program).args(args).output().await {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
        Ok(out) => {
            debug!(
                program,
                status = %out.status,
                "printer discovery command exited nonzero"
            );
            String::new()
        }
        Err(e) => {
            debug!(program, error = %e, "printer discovery command failed to launch");
            String::new()
        }
    }
}

/// Drop duplicate names, preserving first-seen order.
fn dedup(printers: Vec<PrinterInfo>) -> Vec<PrinterInfo> {
    let mut seen = HashSet::new();
    printers
        .into_iter()
        .filter(|p| seen.insert(p.name.clone()))
        .collect()
}

/// Parse `lpstat -p` output: `printer <name> is idle.  enabled since ...`
fn parse_lpstat_p(output: &str) -> Vec<PrinterInfo> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("printer ")?;
            let name = rest.split_whitespace().next()?;
            let mut info = PrinterInfo::named(name);
            info.description = rest
                .splitn(2, char::is_whitespace)
                .nth(1)
                .unwrap_or("")
                .trim()
                .to_string();
            Some(info)
        })
        .collect()
}

/// Parse `lpstat -a` output: `<name> accepting requests since ...`
fn parse_lpstat_a(output: &str) -> Vec<PrinterInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            if parts.next()? != "accepting" {
                return None;
            }
            Some(PrinterInfo::named(name))
        })
        .collect()
}

/// Parse `system_profiler SPPrintersDataType` output for `Printer Name:` lines.
fn parse_system_profiler(output: &str) -> Vec<PrinterInfo> {
    output
        .lines()
        .filter_map(|line| {
            let name = line.trim().strip_prefix("Printer Name:")?.trim();
            if name.is_empty() {
                return None;
            }
            Some(PrinterInfo::named(name))
        })
        .collect()
}

/// Parse `wmic printer get name /value` output for `Name=` lines.
fn parse_wmic(output: &str) -> Vec<PrinterInfo> {
    output
        .lines()
        .filter_map(|line| {
            let name = line.trim().strip_prefix("Name=")?.trim();
            if name.is_empty() {
                return None;
            }
            Some(PrinterInfo::named(name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lpstat_p_extracts_names_and_descriptions() {
        let out = "printer Office_Laser is idle.  enabled since Mon 12 May\n\
                   printer Kitchen_Receipt disabled since Tue 13 May\n";
        let printers = parse_lpstat_p(out);
        assert_eq!(printers.len(), 2);
        assert_eq!(printers[0].name, "Office_Laser");
        assert!(printers[0].description.starts_with("is idle."));
        assert_eq!(printers[1].name, "Kitchen_Receipt");
    }

    #[test]
    fn lpstat_p_ignores_unrelated_lines() {
        let out = "system default destination: Office_Laser\n";
        assert!(parse_lpstat_p(out).is_empty());
    }

    #[test]
    fn lpstat_a_requires_accepting_keyword() {
        let out = "Office_Laser accepting requests since Mon 12 May\n\
                   Broken_One not accepting requests\n";
        let printers = parse_lpstat_a(out);
        assert_eq!(printers.len(), 1);
        assert_eq!(printers[0].name, "Office_Laser");
    }

    #[test]
    fn system_profiler_name_lines() {
        let out = "Printers:\n\n    Office Laser:\n\n      Printer Name: Office_Laser\n      Status: Idle\n";
        let printers = parse_system_profiler(out);
        assert_eq!(printers.len(), 1);
        assert_eq!(printers[0].name, "Office_Laser");
    }

    #[test]
    fn wmic_name_value_lines() {
        let out = "\r\nName=Microsoft Print to PDF\r\n\r\nName=HP LaserJet 4000\r\n\r\n";
        let printers = parse_wmic(out);
        assert_eq!(printers.len(), 2);
        assert_eq!(printers[0].name, "Microsoft Print to PDF");
        assert_eq!(printers[1].name, "HP LaserJet 4000");
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let printers = dedup(vec![
            PrinterInfo::named("A"),
            PrinterInfo::named("B"),
            PrinterInfo::named("A"),
        ]);
        assert_eq!(printers.len(), 2);
        assert_eq!(printers[0].name, "A");
        assert_eq!(printers[1].name, "B");
    }

    #[tokio::test]
    async fn default_flag_marks_matching_printer() {
        // run_capture absorbs missing binaries, so this is safe everywhere;
        // the assertion only exercises the flag logic on whatever was found.
        let printers = list_printers(Some("NoSuchPrinter")).await;
        assert!(printers.iter().all(|p| !p.is_default || p.name == "NoSuchPrinter"));
    }

    #[test]
    fn display_name_defaults_to_name() {
        let p = PrinterInfo::named("Office_Laser");
        assert_eq!(p.display_name, "Office_Laser");
    }
}
