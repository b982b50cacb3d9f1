//! Error types for credential fetching, signing resolution and project writing.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SigningError>;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Download failed for {source_ref}: {reason}")]
    Download { source_ref: String, reason: String },

    #[error("Could not decode provisioning profile {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Provisioning profile field '{field}' not found (tried '{primary}' and '{fallback}')")]
    MissingField {
        field: &'static str,
        primary: String,
        fallback: String,
    },

    #[error("No signing identity found in keychain '{keychain}' (expected an iPhone/Apple Distribution identity)")]
    NoSigningIdentity { keychain: String },

    #[error("Bundle ID mismatch: environment has '{env}', provisioning profile has '{profile}'")]
    BundleIdMismatch { env: String, profile: String },

    #[error("Signing identity '{identity}' does not belong to team '{team}'")]
    IdentityTeamMismatch { identity: String, team: String },

    #[error("Certificate packaging failed: {0}")]
    CertificatePackaging(String),

    #[error("Keychain operation failed: {0}")]
    KeychainOperation(String),

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Xcode project error: {0}")]
    Project(String),

    #[error("Build artifact invalid: {0}")]
    Artifact(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl SigningError {
    /// Process exit status for this failure class.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingConfig(_) | Self::InvalidConfig(_) | Self::Toml(_) => 2,
            Self::Download { .. } | Self::Reqwest(_) => 10,
            Self::Decode { .. } | Self::Plist(_) => 11,
            Self::MissingField { .. } => 12,
            Self::NoSigningIdentity { .. } => 13,
            Self::BundleIdMismatch { .. } | Self::IdentityTeamMismatch { .. } => 14,
            Self::Artifact(_) => 15,
            _ => 1,
        }
    }

    pub(crate) fn download(source_ref: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download {
            source_ref: source_ref.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classes_have_distinct_exit_codes() {
        let codes = [
            SigningError::download("x", "y").exit_code(),
            SigningError::decode("p", "r").exit_code(),
            SigningError::MissingField {
                field: "uuid",
                primary: "UUID".into(),
                fallback: "UUID".into(),
            }
            .exit_code(),
            SigningError::NoSigningIdentity {
                keychain: "k".into(),
            }
            .exit_code(),
            SigningError::BundleIdMismatch {
                env: "a".into(),
                profile: "b".into(),
            }
            .exit_code(),
        ];

        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }
}
