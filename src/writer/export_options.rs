//! ExportOptions.plist for `xcodebuild -exportArchive`

use super::atomic_write;
use crate::config::ExportMethod;
use crate::error::Result;
use crate::resolver::ResolvedSigningConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    pub method: String,
    /// Bundle id → profile UUID. A `BTreeMap` keeps key order stable.
    pub provisioning_profiles: BTreeMap<String, String>,
    #[serde(rename = "teamID")]
    pub team_id: String,
    pub signing_style: String,
    pub signing_certificate: String,
    pub strip_swift_symbols: bool,
    pub upload_symbols: bool,
}

impl ExportOptions {
    #[must_use]
    pub fn new(config: &ResolvedSigningConfig, method: ExportMethod) -> Self {
        Self {
            method: method.as_str().to_string(),
            provisioning_profiles: BTreeMap::from([(
                config.bundle_id.clone(),
                config.profile_uuid.clone(),
            )]),
            team_id: config.team_id.clone(),
            signing_style: "manual".to_string(),
            signing_certificate: config.cert_identity_name.clone(),
            strip_swift_symbols: true,
            upload_symbols: method == ExportMethod::AppStore,
        }
    }

    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        plist::to_writer_xml(&mut out, self)?;
        Ok(out)
    }
}

pub async fn write_export_options(
    path: &Path,
    config: &ResolvedSigningConfig,
    method: ExportMethod,
) -> Result<ExportOptions> {
    let options = ExportOptions::new(config, method);
    atomic_write(path, &options.to_xml()?).await?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::tests::sample_config;

    #[test]
    fn xml_contains_expected_keys() {
        let xml = ExportOptions::new(&sample_config(), ExportMethod::AdHoc)
            .to_xml()
            .unwrap();

        let value: plist::Value = plist::from_bytes(&xml).unwrap();
        let dict = value.as_dictionary().unwrap();
        assert_eq!(dict.get("method").and_then(|v| v.as_string()), Some("ad-hoc"));
        assert_eq!(dict.get("teamID").and_then(|v| v.as_string()), Some("9H2AD7NQ49"));
        assert_eq!(dict.get("signingStyle").and_then(|v| v.as_string()), Some("manual"));
        assert_eq!(dict.get("uploadSymbols").and_then(|v| v.as_boolean()), Some(false));

        let profiles = dict
            .get("provisioningProfiles")
            .and_then(|v| v.as_dictionary())
            .unwrap();
        assert_eq!(
            profiles.get("com.example.app").and_then(|v| v.as_string()),
            Some("ABCD-1234")
        );
    }

    #[tokio::test]
    async fn rewriting_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ExportOptions.plist");
        let config = sample_config();

        write_export_options(&path, &config, ExportMethod::AppStore)
            .await
            .unwrap();
        let first = tokio::fs::read(&path).await.unwrap();
        write_export_options(&path, &config, ExportMethod::AppStore)
            .await
            .unwrap();
        let second = tokio::fs::read(&path).await.unwrap();

        assert_eq!(first, second);
        let value: plist::Value = plist::from_bytes(&first).unwrap();
        let dict = value.as_dictionary().unwrap();
        assert_eq!(dict.get("method").and_then(|v| v.as_string()), Some("app-store"));
        assert_eq!(dict.get("uploadSymbols").and_then(|v| v.as_boolean()), Some(true));
    }
}
