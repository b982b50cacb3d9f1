//! Install a decoded profile where Xcode looks for it

use super::decode::SigningProfile;
use crate::error::{Result, SigningError};
use std::path::{Path, PathBuf};

/// A UUID usable as a file name: ASCII alphanumerics and `-` only.
fn is_safe_uuid(uuid: &str) -> bool {
    !uuid.is_empty() && uuid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Copy the profile to `<dir>/<UUID>.mobileprovision`.
///
/// Re-installing the same UUID overwrites the previous copy. A UUID that
/// could escape `dir` is a [`SigningError::Decode`].
pub async fn install_profile(profile: &SigningProfile, dir: &Path) -> Result<PathBuf> {
    if !is_safe_uuid(&profile.uuid) {
        return Err(SigningError::decode(
            &profile.path,
            format!("UUID '{}' is not a valid file name", profile.uuid),
        ));
    }

    tokio::fs::create_dir_all(dir).await?;

    let dest = dir.join(format!("{}.mobileprovision", profile.uuid));
    tokio::fs::copy(&profile.path, &dest).await?;

    Ok(dest)
}
