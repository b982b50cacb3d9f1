//! Writing resolved signing values into build inputs
//!
//! Every writer is idempotent: the same [`ResolvedSigningConfig`] applied
//! twice leaves byte-identical files. Files are replaced atomically so an
//! interrupted run never leaves a half-written project behind.

pub mod export_options;
pub mod openstep;
pub mod pbxproj;
pub mod summary;
pub mod xcconfig;

pub use export_options::{ExportOptions, write_export_options};
pub use pbxproj::{ProjectEdit, ProjectRole, write_project};
pub use summary::{render_skipped, render_summary, write_summary};
pub use xcconfig::write_xcconfig;

use crate::error::Result;
use rand::distr::{Alphanumeric, SampleString};
use std::path::Path;

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.tmp",
        Alphanumeric.sample_string(&mut rand::rng(), 8)
    ));

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
