//! Signing-variables summary
//!
//! A shell-sourceable file (`. signing.env`) so later CI steps can pick up
//! the resolved values. Each variable is preceded by a comment naming the
//! source of its value.

use super::atomic_write;
use crate::config::AppMetadata;
use crate::error::Result;
use crate::resolver::{Provenance, ResolvedSigningConfig};
use std::fmt::Write as _;
use std::path::Path;

/// Quote for POSIX `sh` double quotes.
fn shell_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn push_var(out: &mut String, key: &str, value: &str, source: Provenance) {
    let _ = writeln!(out, "# source: {source}");
    let _ = writeln!(out, "{key}={}", shell_quote(value));
}

fn push_metadata(out: &mut String, app: &AppMetadata) {
    let metadata = [
        ("APP_NAME", &app.app_name),
        ("VERSION_NAME", &app.version_name),
        ("VERSION_CODE", &app.version_code),
    ];
    for (key, value) in metadata {
        if let Some(value) = value {
            push_var(out, key, value, Provenance::Environment);
        }
    }
}

/// Render the summary for a completed resolution.
#[must_use]
pub fn render_summary(config: &ResolvedSigningConfig, app: &AppMetadata) -> String {
    let mut out = String::from("# Generated by ci_sign; safe to source from sh\n");

    push_var(&mut out, "BUNDLE_ID", &config.bundle_id, config.bundle_id_source);
    push_var(&mut out, "APPLE_TEAM_ID", &config.team_id, config.team_id_source);
    push_var(&mut out, "PROFILE_UUID", &config.profile_uuid, Provenance::Profile);
    push_var(
        &mut out,
        "CODE_SIGN_IDENTITY",
        &config.cert_identity_name,
        config.identity_source,
    );

    push_metadata(&mut out, app);
    out
}

/// Summary for a run that had no provisioning profile and signed nothing.
#[must_use]
pub fn render_skipped(app: &AppMetadata) -> String {
    let mut out = String::from("# Generated by ci_sign; safe to source from sh\n");
    out.push_str("# No provisioning profile configured; manual signing was skipped\n");
    let _ = writeln!(out, "SIGNING_SKIPPED={}", shell_quote("1"));
    push_metadata(&mut out, app);
    out
}

pub async fn write_summary(path: &Path, content: &str) -> Result<()> {
    atomic_write(path, content.as_bytes()).await
}
