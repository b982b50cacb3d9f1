//! xcconfig build-settings files
//!
//! An xcconfig is a flat list of `KEY = VALUE` lines plus `#include`
//! directives and `//` comments. Writing a setting replaces the existing
//! line for that key in place; keys not yet present are appended in the
//! order given. An existing `CODE_SIGN_IDENTITY[sdk=iphoneos*]` line is
//! rewritten too, since it wins over the plain key on device builds.
//! Everything else is preserved byte for byte.

use super::atomic_write;
use super::pbxproj::SDK_IDENTITY_KEY;
use crate::error::Result;
use crate::resolver::ResolvedSigningConfig;
use std::path::Path;

/// Settings written for the app's signing, in output order.
#[must_use]
pub fn signing_settings(config: &ResolvedSigningConfig) -> Vec<(&'static str, String)> {
    vec![
        ("CODE_SIGN_STYLE", "Manual".to_string()),
        ("DEVELOPMENT_TEAM", config.team_id.clone()),
        ("PROVISIONING_PROFILE_SPECIFIER", config.profile_uuid.clone()),
        ("CODE_SIGN_IDENTITY", config.cert_identity_name.clone()),
        ("PRODUCT_BUNDLE_IDENTIFIER", config.bundle_id.clone()),
    ]
}

/// Conditional settings that are rewritten only where they already exist.
#[must_use]
pub fn conditional_settings(config: &ResolvedSigningConfig) -> Vec<(&'static str, String)> {
    vec![(SDK_IDENTITY_KEY, config.cert_identity_name.clone())]
}

/// Key of a `KEY = VALUE` line, ignoring conditional suffixes such as
/// `CODE_SIGN_IDENTITY[sdk=iphoneos*]` (those are distinct keys).
fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") || trimmed.starts_with('#') {
        return None;
    }
    // `=` inside a `[cond=value]` suffix is part of the key.
    let mut depth = 0usize;
    let eq = trimmed.char_indices().find_map(|(i, c)| {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return Some(i),
            _ => {}
        }
        None
    })?;
    let key = trimmed[..eq].trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some(key)
}

/// Apply `settings` to xcconfig `content`.
#[must_use]
pub fn apply_settings(content: &str, settings: &[(&str, String)]) -> String {
    rewrite(content, settings, true)
}

/// Like [`apply_settings`], but keys absent from `content` stay absent.
#[must_use]
pub fn replace_existing(content: &str, settings: &[(&str, String)]) -> String {
    rewrite(content, settings, false)
}

fn rewrite(content: &str, settings: &[(&str, String)], append_missing: bool) -> String {
    let mut written = vec![false; settings.len()];
    let mut out = String::with_capacity(content.len() + 256);

    for line in content.lines() {
        let replacement = line_key(line)
            .and_then(|key| settings.iter().position(|(k, _)| *k == key));

        match replacement {
            // Drop later duplicates of a key we already wrote.
            Some(i) if written[i] => continue,
            Some(i) => {
                let (key, value) = &settings[i];
                out.push_str(&format!("{key} = {value}\n"));
                written[i] = true;
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    for (i, (key, value)) in settings.iter().enumerate() {
        if append_missing && !written[i] {
            out.push_str(&format!("{key} = {value}\n"));
        }
    }

    out
}

/// Write the signing settings into the xcconfig at `path`, creating it if missing.
pub async fn write_xcconfig(path: &Path, config: &ResolvedSigningConfig) -> Result<()> {
    let existing = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let updated = replace_existing(
        &apply_settings(&existing, &signing_settings(config)),
        &conditional_settings(config),
    );
    atomic_write(path, updated.as_bytes()).await
}
