//! Fetch provisioning profiles and certificates from URLs or local paths

use crate::error::{Result, SigningError};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a credential file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    Http(String),
    Local(PathBuf),
}

impl FetchSource {
    /// Classify a `PROFILE_URL`-style value.
    ///
    /// Returns `Ok(None)` for an empty value; that is a valid "nothing to
    /// fetch" state, not an error.
    pub fn parse(value: &str) -> Result<Option<Self>> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(None);
        }

        let lower = value.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Some(Self::Http(value.to_string())));
        }

        if let Some(path) = value.strip_prefix("file://") {
            return Ok(Some(Self::Local(PathBuf::from(path))));
        }

        if let Some((scheme, _)) = value.split_once("://") {
            return Err(SigningError::download(
                value,
                format!("unsupported URL scheme '{scheme}'"),
            ));
        }

        let expanded = expand_tilde_path(value)?;
        Ok(Some(Self::Local(PathBuf::from(expanded))))
    }
}

/// Expand tilde in path, returning error if HOME is not set
///
/// When HOME is unset, shellexpand leaves `~` unchanged; that case is
/// reported instead of silently producing a relative path named `~`.
pub fn expand_tilde_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path).to_string();

    if path.starts_with('~') && expanded.starts_with('~') {
        return Err(SigningError::InvalidConfig(format!(
            "Could not expand ~ in path '{path}' (HOME environment variable not set).\n\
             Please use an absolute path instead."
        )));
    }

    Ok(expanded)
}

/// Downloads credential files with explicit timeouts.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                SigningError::InvalidConfig(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, timeout })
    }

    /// Fetch `value` into `dest_dir/file_name`.
    ///
    /// * empty `value` → `Ok(None)`
    /// * non-2xx, network failure, timeout, empty body or unreadable local
    ///   file → [`SigningError::Download`]
    pub async fn fetch(
        &self,
        value: &str,
        dest_dir: &Path,
        file_name: &str,
    ) -> Result<Option<PathBuf>> {
        let Some(source) = FetchSource::parse(value)? else {
            return Ok(None);
        };

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(file_name);

        let bytes = match &source {
            FetchSource::Http(url) => self.download(url).await?,
            FetchSource::Local(path) => tokio::fs::read(path).await.map_err(|e| {
                SigningError::download(path.display().to_string(), e.to_string())
            })?,
        };

        if bytes.is_empty() {
            return Err(SigningError::download(value, "file is empty"));
        }

        tokio::fs::write(&dest, &bytes).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(Some(dest))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                SigningError::download(
                    url,
                    format!("timed out after {} seconds", self.timeout.as_secs()),
                )
            } else if e.is_connect() {
                SigningError::download(url, "could not connect. Check network/firewall.")
            } else {
                SigningError::download(url, e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SigningError::download(url, format!("HTTP {}", status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SigningError::download(url, format!("failed to read body: {e}")))?;

        Ok(bytes.to_vec())
    }
}
