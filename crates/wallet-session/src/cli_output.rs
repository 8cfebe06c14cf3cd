//! Centralised helpers for CLI output: JSON results on stdout, error reports on stderr.

use crate::errors::ErrorReport;
use eyre::Context as _;
use std::io::Write as _;

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

/// Print one compact JSON document to stdout.
pub fn print_json(value: &impl serde::Serialize) -> eyre::Result<()> {
    let s = serde_json::to_string(value).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write output")?;
    Ok(())
}

/// Print a structured error to stderr as `{"error": {...}}`.
pub fn print_error(report: &ErrorReport) {
    let body = serde_json::json!({ "error": report });
    match serde_json::to_string(&body) {
        Ok(s) => stderr_writeln(&s),
        Err(_) => stderr_writeln(&format!("{}: {}", report.code, report.message)),
    }
}
