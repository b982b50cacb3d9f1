//! Parsing of `security find-identity` output

use crate::error::{Result, SigningError};

/// Common-name prefixes of identities that can sign an App Store / ad-hoc build.
pub const DISTRIBUTION_PREFIXES: &[&str] = &["iPhone Distribution:", "Apple Distribution:"];

/// Extract every quoted identity name from `security find-identity` output
///
/// # Example Output Parsing
/// Input: `  1) ABC123... "iPhone Distribution: Acme Corp (TEAM123)"`
/// Output: `["iPhone Distribution: Acme Corp (TEAM123)"]`
#[must_use]
pub fn parse_identity_names(output: &str) -> Vec<String> {
    let mut names = Vec::new();

    for line in output.lines() {
        let trimmed = line.trim();

        // Skip empty lines and summary line
        if trimmed.is_empty() || trimmed.contains("valid identities found") {
            continue;
        }

        // Format: `  1) HASH "Certificate Name Here"`
        if let Some(start_quote) = trimmed.find('"')
            && let Some(end_quote) = trimmed[start_quote + 1..].find('"')
        {
            names.push(trimmed[start_quote + 1..start_quote + 1 + end_quote].to_string());
        }
    }

    names
}

/// Identities whose common name marks them as distribution certificates.
#[must_use]
pub fn distribution_identities(output: &str) -> Vec<String> {
    parse_identity_names(output)
        .into_iter()
        .filter(|name| DISTRIBUTION_PREFIXES.iter().any(|p| name.starts_with(p)))
        .collect()
}

/// Turn a finished `security find-identity` process into its stdout text.
pub fn identity_output_text(output: &std::process::Output) -> Result<String> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SigningError::CommandExecution(format!(
            "security find-identity failed with status {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    // Strict UTF-8: lossy decoding could corrupt certificate names
    std::str::from_utf8(&output.stdout)
        .map(str::to_string)
        .map_err(|e| {
            SigningError::CommandExecution(format!(
                "security command output is not valid UTF-8: {e}"
            ))
        })
}
