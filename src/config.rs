//! Configuration for a signing run.
//!
//! Values arrive from three places: the CLI (which also reads the CI
//! environment variables), an optional TOML file, and built-in defaults.
//! They are merged once into an immutable [`SigningConfig`] that is passed
//! by reference through the whole pipeline.

use crate::error::{Result, SigningError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroize;

/// Default keychain for certificate storage
pub const DEFAULT_KEYCHAIN: &str = "login.keychain-db";

/// Native target that receives manual signing in a Flutter iOS project
pub const DEFAULT_APP_TARGET: &str = "Runner";

/// Identity name written when the keychain could not be queried for one
pub const DEFAULT_IDENTITY: &str = "iPhone Distribution";

pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Bundle identifiers that ship in templates and CI samples and never name
/// a real app. An environment value in this list defers to the profile.
pub const DEFAULT_PLACEHOLDER_BUNDLE_IDS: &[&str] = &[
    "com.example.app",
    "com.example.myapp",
    "com.example.flutter_app",
    "com.example.flutterapp",
    "com.mycompany.app",
    "com.yourcompany.app",
    "com.company.app",
    "your.bundle.id",
    "com.your.bundle.id",
];

/// Environment variable names consumed from the CI configuration.
pub mod env {
    pub const PROFILE_URL: &str = "PROFILE_URL";
    pub const CERT_P12_URL: &str = "CERT_P12_URL";
    pub const CERT_CER_URL: &str = "CERT_CER_URL";
    pub const CERT_KEY_URL: &str = "CERT_KEY_URL";
    pub const CERT_PASSWORD: &str = "CERT_PASSWORD";
    pub const CERT_TYPE: &str = "CERT_TYPE";
    pub const BUNDLE_ID: &str = "BUNDLE_ID";
    pub const APPLE_TEAM_ID: &str = "APPLE_TEAM_ID";
    pub const VERSION_NAME: &str = "VERSION_NAME";
    pub const VERSION_CODE: &str = "VERSION_CODE";
    pub const APP_NAME: &str = "APP_NAME";
    pub const PROFILE_TYPE: &str = "PROFILE_TYPE";
    pub const KEYCHAIN_PATH: &str = "KEYCHAIN_PATH";
    pub const KEYCHAIN_PASSWORD: &str = "KEYCHAIN_PASSWORD";
}

/// How a bundle-id disagreement between environment and profile is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Warn and keep the environment value
    #[default]
    Permissive,
    /// Abort the run
    Strict,
}

/// `CERT_TYPE` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CertType {
    P12,
    Manual,
}

/// Export method written to ExportOptions.plist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ExportMethod {
    #[serde(rename = "app-store")]
    #[value(name = "app-store")]
    AppStore,
    #[serde(rename = "ad-hoc")]
    #[value(name = "ad-hoc")]
    AdHoc,
    #[serde(rename = "enterprise")]
    #[value(name = "enterprise")]
    Enterprise,
    #[serde(rename = "development")]
    #[value(name = "development")]
    Development,
}

impl ExportMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppStore => "app-store",
            Self::AdHoc => "ad-hoc",
            Self::Enterprise => "enterprise",
            Self::Development => "development",
        }
    }
}

/// Which tool unwraps the CMS envelope of a provisioning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderBackend {
    /// Host tool first (`security` on macOS, `openssl` elsewhere), then embedded scan
    #[default]
    Auto,
    Security,
    Openssl,
    Embedded,
}

/// A password that is wiped from memory when dropped.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Where the distribution certificate comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// PKCS#12 bundle with its password
    P12 { url: String, password: Secret },
    /// Separate certificate and private key, packaged into a P12 on the fly.
    /// `None` password means the generated P12 is not password protected.
    CerKey {
        cer_url: String,
        key_url: String,
        password: Option<Secret>,
    },
}

/// Keychain that receives the imported identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeychainConfig {
    pub path: String,
    /// When set, the keychain is created/unlocked and its partition list is
    /// configured after import.
    pub password: Option<Secret>,
}

impl Default for KeychainConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_KEYCHAIN.to_string(),
            password: None,
        }
    }
}

/// Files the writer stage produces or edits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPaths {
    pub xcconfig: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub pods_project: Option<PathBuf>,
    pub export_options: Option<PathBuf>,
    pub summary: Option<PathBuf>,
}

/// Values the app declares about itself; only echoed into the summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppMetadata {
    pub app_name: Option<String>,
    pub version_name: Option<String>,
    pub version_code: Option<String>,
}

/// Immutable configuration for one signing run.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub profile_url: Option<String>,
    pub certificate: Option<CertificateSource>,
    pub env_bundle_id: Option<String>,
    pub env_team_id: Option<String>,
    pub export_method: Option<ExportMethod>,
    pub mismatch_policy: MismatchPolicy,
    pub placeholder_bundle_ids: Vec<String>,
    pub app_target: String,
    pub keychain: KeychainConfig,
    pub outputs: OutputPaths,
    pub app: AppMetadata,
    pub decoder: DecoderBackend,
    pub download_timeout: Duration,
    pub connect_timeout: Duration,
    /// Directory the decoded profile is installed into, named by UUID.
    /// `None` disables installation.
    pub profile_install_dir: Option<PathBuf>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            profile_url: None,
            certificate: None,
            env_bundle_id: None,
            env_team_id: None,
            export_method: None,
            mismatch_policy: MismatchPolicy::default(),
            placeholder_bundle_ids: DEFAULT_PLACEHOLDER_BUNDLE_IDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            app_target: DEFAULT_APP_TARGET.to_string(),
            keychain: KeychainConfig::default(),
            outputs: OutputPaths::default(),
            app: AppMetadata::default(),
            decoder: DecoderBackend::default(),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            profile_install_dir: None,
        }
    }
}

/// Raw, not yet validated values from CLI flags / environment.
#[derive(Debug, Clone, Default)]
pub struct RawInputs {
    pub profile_url: Option<String>,
    pub cert_p12_url: Option<String>,
    pub cert_cer_url: Option<String>,
    pub cert_key_url: Option<String>,
    pub cert_password: Option<String>,
    pub cert_type: Option<CertType>,
    pub bundle_id: Option<String>,
    pub team_id: Option<String>,
    pub export_method: Option<ExportMethod>,
    pub mismatch_policy: Option<MismatchPolicy>,
    pub app_target: Option<String>,
    pub keychain: Option<String>,
    pub keychain_password: Option<String>,
    pub outputs: OutputPaths,
    pub app: AppMetadata,
    pub decoder: Option<DecoderBackend>,
    pub download_timeout_secs: Option<u64>,
    pub install_profile: Option<bool>,
}

/// Optional TOML file with defaults for a project.
///
/// ```toml
/// mismatch_policy = "strict"
/// app_target = "Runner"
/// placeholder_bundle_ids = ["com.example.app"]
///
/// [outputs]
/// xcconfig = "ios/Flutter/Release.xcconfig"
/// project = "ios/Runner.xcodeproj/project.pbxproj"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub mismatch_policy: Option<MismatchPolicy>,
    #[serde(default)]
    pub export_method: Option<ExportMethod>,
    #[serde(default)]
    pub app_target: Option<String>,
    #[serde(default)]
    pub placeholder_bundle_ids: Option<Vec<String>>,
    #[serde(default)]
    pub keychain: Option<String>,
    #[serde(default)]
    pub decoder: Option<DecoderBackend>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub install_profile: Option<bool>,
    #[serde(default)]
    pub outputs: FileOutputs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileOutputs {
    pub xcconfig: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub pods_project: Option<PathBuf>,
    pub export_options: Option<PathBuf>,
    pub summary: Option<PathBuf>,
}

impl FileConfig {
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SigningError::InvalidConfig(format!(
                "Cannot read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Treat unset, empty and whitespace-only values the same way.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SigningConfig {
    /// Merge CLI/env inputs over file defaults over built-in defaults.
    ///
    /// CLI/env always win. Certificate inputs are validated here so that a
    /// half-configured certificate fails before anything is downloaded.
    pub fn build(raw: RawInputs, file: FileConfig) -> Result<Self> {
        let defaults = Self::default();

        let certificate = Self::certificate_source(&raw)?;

        let keychain = KeychainConfig {
            path: non_empty(raw.keychain)
                .or(non_empty(file.keychain))
                .unwrap_or(defaults.keychain.path),
            password: non_empty(raw.keychain_password).map(Secret::new),
        };

        let download_timeout = raw
            .download_timeout_secs
            .or(file.download_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.download_timeout);
        if download_timeout.is_zero() {
            return Err(SigningError::InvalidConfig(
                "download timeout must be greater than zero".to_string(),
            ));
        }

        let install_profile = raw.install_profile.or(file.install_profile).unwrap_or(true);
        let profile_install_dir = if install_profile {
            dirs::home_dir().map(|home| home.join("Library/MobileDevice/Provisioning Profiles"))
        } else {
            None
        };

        let outputs = OutputPaths {
            xcconfig: raw.outputs.xcconfig.or(file.outputs.xcconfig),
            project: raw.outputs.project.or(file.outputs.project),
            pods_project: raw.outputs.pods_project.or(file.outputs.pods_project),
            export_options: raw.outputs.export_options.or(file.outputs.export_options),
            summary: raw.outputs.summary.or(file.outputs.summary),
        };

        Ok(Self {
            profile_url: non_empty(raw.profile_url),
            certificate,
            env_bundle_id: non_empty(raw.bundle_id),
            env_team_id: non_empty(raw.team_id),
            export_method: raw.export_method.or(file.export_method),
            mismatch_policy: raw
                .mismatch_policy
                .or(file.mismatch_policy)
                .unwrap_or_default(),
            placeholder_bundle_ids: file
                .placeholder_bundle_ids
                .unwrap_or(defaults.placeholder_bundle_ids),
            app_target: non_empty(raw.app_target)
                .or(non_empty(file.app_target))
                .unwrap_or(defaults.app_target),
            keychain,
            outputs,
            app: AppMetadata {
                app_name: non_empty(raw.app.app_name),
                version_name: non_empty(raw.app.version_name),
                version_code: non_empty(raw.app.version_code),
            },
            decoder: raw.decoder.or(file.decoder).unwrap_or_default(),
            download_timeout,
            connect_timeout: defaults.connect_timeout.min(download_timeout),
            profile_install_dir,
        })
    }

    fn certificate_source(raw: &RawInputs) -> Result<Option<CertificateSource>> {
        let p12 = non_empty(raw.cert_p12_url.clone());
        let cer = non_empty(raw.cert_cer_url.clone());
        let key = non_empty(raw.cert_key_url.clone());
        let password = non_empty(raw.cert_password.clone()).map(Secret::new);

        // CERT_TYPE wins; without it the provided URLs decide.
        let cert_type = match raw.cert_type {
            Some(t) => Some(t),
            None if p12.is_some() => Some(CertType::P12),
            None if cer.is_some() || key.is_some() => Some(CertType::Manual),
            None => None,
        };

        match cert_type {
            None => Ok(None),
            Some(CertType::P12) => {
                let url = p12.ok_or_else(|| {
                    SigningError::MissingConfig(format!(
                        "{} is required when {}=p12",
                        env::CERT_P12_URL,
                        env::CERT_TYPE
                    ))
                })?;
                let password = password.ok_or_else(|| {
                    SigningError::MissingConfig(format!(
                        "{} is required for a P12 certificate",
                        env::CERT_PASSWORD
                    ))
                })?;
                Ok(Some(CertificateSource::P12 { url, password }))
            }
            Some(CertType::Manual) => match (cer, key) {
                (Some(cer_url), Some(key_url)) => Ok(Some(CertificateSource::CerKey {
                    cer_url,
                    key_url,
                    password,
                })),
                _ => Err(SigningError::MissingConfig(format!(
                    "{} and {} are both required when {}=manual",
                    env::CERT_CER_URL,
                    env::CERT_KEY_URL,
                    env::CERT_TYPE
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_yield_defaults() {
        let config = SigningConfig::build(RawInputs::default(), FileConfig::default()).unwrap();
        assert!(config.profile_url.is_none());
        assert!(config.certificate.is_none());
        assert_eq!(config.app_target, DEFAULT_APP_TARGET);
        assert_eq!(config.keychain.path, DEFAULT_KEYCHAIN);
        assert_eq!(config.mismatch_policy, MismatchPolicy::Permissive);
        assert!(config.placeholder_bundle_ids.iter().any(|p| p == "com.example.app"));
        assert!(!config.placeholder_bundle_ids.iter().any(|p| p == "com.test.app"));
    }

    #[test]
    fn blank_env_values_count_as_unset() {
        let raw = RawInputs {
            profile_url: Some("   ".into()),
            team_id: Some(String::new()),
            ..Default::default()
        };
        let config = SigningConfig::build(raw, FileConfig::default()).unwrap();
        assert!(config.profile_url.is_none());
        assert!(config.env_team_id.is_none());
    }

    #[test]
    fn p12_requires_password() {
        let raw = RawInputs {
            cert_p12_url: Some("https://x/cert.p12".into()),
            ..Default::default()
        };
        let err = SigningConfig::build(raw, FileConfig::default()).unwrap_err();
        assert!(matches!(err, SigningError::MissingConfig(_)));
    }

    #[test]
    fn manual_certificate_without_password_has_no_default() {
        let raw = RawInputs {
            cert_type: Some(CertType::Manual),
            cert_cer_url: Some("cert.cer".into()),
            cert_key_url: Some("cert.key".into()),
            ..Default::default()
        };
        let config = SigningConfig::build(raw, FileConfig::default()).unwrap();
        match config.certificate {
            Some(CertificateSource::CerKey { password, .. }) => assert!(password.is_none()),
            other => panic!("unexpected certificate source: {other:?}"),
        }
    }

    #[test]
    fn manual_certificate_requires_both_files() {
        let raw = RawInputs {
            cert_type: Some(CertType::Manual),
            cert_cer_url: Some("cert.cer".into()),
            ..Default::default()
        };
        assert!(SigningConfig::build(raw, FileConfig::default()).is_err());
    }

    #[test]
    fn cli_overrides_file_config() {
        let file = FileConfig::parse(
            r#"
            mismatch_policy = "strict"
            app_target = "App"
            placeholder_bundle_ids = ["org.sample.app"]

            [outputs]
            xcconfig = "ios/Flutter/Release.xcconfig"
            "#,
        )
        .unwrap();
        let raw = RawInputs {
            app_target: Some("Runner".into()),
            ..Default::default()
        };

        let config = SigningConfig::build(raw, file).unwrap();
        assert_eq!(config.mismatch_policy, MismatchPolicy::Strict);
        assert_eq!(config.app_target, "Runner");
        assert!(config.placeholder_bundle_ids.iter().any(|p| p == "org.sample.app"));
        assert!(!config.placeholder_bundle_ids.iter().any(|p| p == "com.example.app"));
        assert_eq!(
            config.outputs.xcconfig,
            Some(PathBuf::from("ios/Flutter/Release.xcconfig"))
        );
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(FileConfig::parse("no_such_key = 1").is_err());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
