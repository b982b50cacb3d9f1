//! Provisioning profile decoding
//!
//! A `.mobileprovision` file is a CMS (PKCS#7) signed-data envelope whose
//! content is an XML property list. The envelope is opened with a host tool
//! (`security cms -D` or `openssl smime`) or, as a last resort, by locating
//! the XML payload inside the DER bytes.

use super::fields::{
    APP_ID_FIELD, ExtractionTier, PathSegment, TEAM_ID_FIELD, UUID_FIELD, bundle_id_from_app_id,
    structured_lookup,
};
use crate::config::{DecoderBackend, ExportMethod};
use crate::error::{Result, SigningError};
use chrono::{DateTime, Utc};
use plist::Value;
use std::path::{Path, PathBuf};

/// Distribution channel a profile was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    AppStore,
    AdHoc,
    Enterprise,
    Development,
}

impl ProfileKind {
    #[must_use]
    pub fn export_method(&self) -> ExportMethod {
        match self {
            Self::AppStore => ExportMethod::AppStore,
            Self::AdHoc => ExportMethod::AdHoc,
            Self::Enterprise => ExportMethod::Enterprise,
            Self::Development => ExportMethod::Development,
        }
    }
}

/// Values read from a decoded provisioning profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningProfile {
    pub path: PathBuf,
    pub uuid: String,
    pub team_identifier: String,
    pub application_identifier: String,
    pub bundle_identifier: String,
    pub name: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub kind: ProfileKind,
    /// Tiers that produced uuid, team id and app id, in that order.
    pub tiers: [ExtractionTier; 3],
}

impl SigningProfile {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.is_some_and(|exp| exp <= now)
    }
}

/// Open the CMS envelope of the profile at `path` and return the XML text.
pub async fn decode_container(path: &Path, backend: DecoderBackend) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SigningError::decode(path, format!("cannot read file: {e}")))?;
    if bytes.is_empty() {
        return Err(SigningError::decode(path, "file is empty"));
    }

    match backend {
        DecoderBackend::Security => decode_with_security(path).await,
        DecoderBackend::Openssl => decode_with_openssl(path).await,
        DecoderBackend::Embedded => extract_embedded_plist(&bytes)
            .ok_or_else(|| SigningError::decode(path, "no embedded property list found")),
        DecoderBackend::Auto => {
            let host = if cfg!(target_os = "macos") {
                decode_with_security(path).await
            } else {
                decode_with_openssl(path).await
            };

            match host {
                Ok(xml) => Ok(xml),
                Err(host_err) => extract_embedded_plist(&bytes).ok_or_else(|| {
                    SigningError::decode(
                        path,
                        format!("{host_err}; embedded scan found no property list"),
                    )
                }),
            }
        }
    }
}

async fn decode_with_security(path: &Path) -> Result<String> {
    let output = tokio::process::Command::new("security")
        .args(["cms", "-D", "-i"])
        .arg(path)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SigningError::MissingDependency("'security' command not available".to_string())
            } else {
                SigningError::CommandExecution(format!("Failed to run security cms: {e}"))
            }
        })?;

    decoded_output(path, "security cms -D", output)
}

async fn decode_with_openssl(path: &Path) -> Result<String> {
    let output = tokio::process::Command::new("openssl")
        .args(["smime", "-inform", "der", "-verify", "-noverify", "-in"])
        .arg(path)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SigningError::MissingDependency(
                    "openssl command not found. Please install OpenSSL.".to_string(),
                )
            } else {
                SigningError::CommandExecution(format!("Failed to run openssl smime: {e}"))
            }
        })?;

    decoded_output(path, "openssl smime", output)
}

fn decoded_output(path: &Path, tool: &str, output: std::process::Output) -> Result<String> {
    if !output.status.success() {
        return Err(SigningError::decode(
            path,
            format!(
                "{tool} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    let text = String::from_utf8(output.stdout)
        .map_err(|e| SigningError::decode(path, format!("{tool} output is not UTF-8: {e}")))?;
    if !text.contains("<plist") {
        return Err(SigningError::decode(
            path,
            format!("{tool} produced no property list"),
        ));
    }
    Ok(text)
}

/// Locate the XML property list inside a DER-encoded CMS envelope.
///
/// The signed content is stored uncompressed, so the `<?xml … </plist>`
/// byte range can be sliced out directly.
#[must_use]
pub fn extract_embedded_plist(bytes: &[u8]) -> Option<String> {
    const END: &[u8] = b"</plist>";

    let start = find(bytes, b"<?xml").or_else(|| find(bytes, b"<plist"))?;
    let end = rfind(bytes, END)? + END.len();
    if end <= start {
        return None;
    }

    String::from_utf8(bytes[start..end].to_vec()).ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Parse decoded XML and extract the profile fields.
pub fn parse_profile(path: &Path, xml: &str) -> Result<SigningProfile> {
    let root = Value::from_reader_xml(xml.as_bytes())
        .map_err(|e| SigningError::decode(path, format!("invalid property list: {e}")))?;
    if root.as_dictionary().is_none() {
        return Err(SigningError::decode(
            path,
            "property list root is not a dictionary",
        ));
    }

    let (uuid, uuid_tier) = UUID_FIELD.extract(&root, xml)?;
    let (team_identifier, team_tier) = TEAM_ID_FIELD.extract(&root, xml)?;
    let (application_identifier, app_tier) = APP_ID_FIELD.extract(&root, xml)?;

    let bundle_identifier = bundle_id_from_app_id(&application_identifier)
        .ok_or_else(|| SigningError::MissingField {
            field: "bundle identifier",
            primary: format!("{} (after first '.')", APP_ID_FIELD.primary_display()),
            fallback: APP_ID_FIELD.fallback_key.to_string(),
        })?
        .to_string();

    let name = structured_lookup(&root, &[PathSegment::Key("Name")]);

    let dict = root.as_dictionary();
    let expiration_date = dict
        .and_then(|d| d.get("ExpirationDate"))
        .and_then(Value::as_date)
        .map(|d| DateTime::<Utc>::from(std::time::SystemTime::from(d)));

    Ok(SigningProfile {
        path: path.to_path_buf(),
        uuid,
        team_identifier,
        application_identifier,
        bundle_identifier,
        name,
        expiration_date,
        kind: infer_kind(&root),
        tiers: [uuid_tier, team_tier, app_tier],
    })
}

/// Infer the distribution channel from device lists and entitlements.
fn infer_kind(root: &Value) -> ProfileKind {
    let Some(dict) = root.as_dictionary() else {
        return ProfileKind::AppStore;
    };

    if dict
        .get("ProvisionsAllDevices")
        .and_then(Value::as_boolean)
        .unwrap_or(false)
    {
        return ProfileKind::Enterprise;
    }

    if dict.get("ProvisionedDevices").is_some() {
        let debuggable = dict
            .get("Entitlements")
            .and_then(Value::as_dictionary)
            .and_then(|e| e.get("get-task-allow"))
            .and_then(Value::as_boolean)
            .unwrap_or(false);
        return if debuggable {
            ProfileKind::Development
        } else {
            ProfileKind::AdHoc
        };
    }

    ProfileKind::AppStore
}

/// Decode the profile at `path` into a [`SigningProfile`].
pub async fn decode_profile(path: &Path, backend: DecoderBackend) -> Result<SigningProfile> {
    let xml = decode_container(path, backend).await?;
    parse_profile(path, &xml)
}
