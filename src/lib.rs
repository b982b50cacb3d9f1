//! Provisioning profile and certificate resolution for Flutter iOS CI builds

#[macro_use]
pub mod log;

pub mod artifacts;
pub mod config;
pub mod error;
pub mod keychain;
pub mod pipeline;
pub mod profile;
pub mod resolver;
pub mod writer;

// Re-export common types
pub use config::{FileConfig, RawInputs, SigningConfig};
pub use error::{Result, SigningError};
pub use pipeline::{Orchestrator, RunReport, Stage};
pub use resolver::{ResolvedSigningConfig, SigningWarning};

/// Attempt to remove a file or directory, warning on failure.
///
/// Best effort: a path that is already gone is fine, and nothing is
/// returned because a leftover temp file must not fail the build.
pub async fn cleanup_path<P: AsRef<std::path::Path>>(path: P, description: &str) {
    let path = path.as_ref();

    let Ok(metadata) = tokio::fs::symlink_metadata(path).await else {
        return;
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    // NotFound is OK - removed concurrently
    if let Err(e) = result
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(
            "Failed to clean up {description} at {}: {e}",
            path.display()
        );
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            warn!("   Check permissions on {}", path.display());
        }
    }
}
