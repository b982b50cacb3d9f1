//! Signing pipeline
//!
//! Runs the stages strictly in order:
//!
//! ```text
//! NO_PROFILE → PROFILE_DOWNLOADED → PROFILE_DECODED → IDENTITY_INSTALLED
//!            → CONFIG_RESOLVED → WRITTEN
//! ```
//!
//! Any failure stops the run in the stage it happened in. Without a profile
//! the run ends in `NO_PROFILE` and is reported as skipped, not failed.

use crate::config::{CertificateSource, ExportMethod, SigningConfig};
use crate::error::{Result, SigningError};
use crate::keychain::{
    KeychainTools, LocalCertificate, SigningIdentity, distribution_identities,
};
use crate::log;
use crate::profile::{Fetcher, SigningProfile, decode_profile, install_profile};
use crate::resolver::{self, Resolution, SigningInputs};
use crate::writer::{self, ProjectRole};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

const PROFILE_FILE: &str = "profile.mobileprovision";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    NoProfile,
    ProfileDownloaded,
    ProfileDecoded,
    IdentityInstalled,
    ConfigResolved,
    Written,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoProfile => "NO_PROFILE",
            Self::ProfileDownloaded => "PROFILE_DOWNLOADED",
            Self::ProfileDecoded => "PROFILE_DECODED",
            Self::IdentityInstalled => "IDENTITY_INSTALLED",
            Self::ConfigResolved => "CONFIG_RESOLVED",
            Self::Written => "WRITTEN",
        })
    }
}

/// Profile facts kept after the downloaded file is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub uuid: String,
    pub name: Option<String>,
    pub team_identifier: String,
    pub application_identifier: String,
    pub kind: String,
    pub expires: Option<String>,
    pub installed_at: Option<PathBuf>,
}

impl ProfileSummary {
    fn new(profile: &SigningProfile, installed_at: Option<PathBuf>) -> Self {
        Self {
            uuid: profile.uuid.clone(),
            name: profile.name.clone(),
            team_identifier: profile.team_identifier.clone(),
            application_identifier: profile.application_identifier.clone(),
            kind: profile.kind.export_method().as_str().to_string(),
            expires: profile.expiration_date.map(|d| d.to_rfc3339()),
            installed_at,
        }
    }
}

/// Outcome of a run, printed as the audit summary (or JSON).
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stage: Stage,
    pub profile: Option<ProfileSummary>,
    pub identity_count: usize,
    pub export_method: Option<&'static str>,
    pub resolution: Option<Resolution>,
    pub written: Vec<PathBuf>,
}

impl RunReport {
    #[must_use]
    pub fn skipped(&self) -> bool {
        self.stage == Stage::NoProfile
    }
}

/// Sequences fetch, decode, install, resolve and write for one build.
pub struct Orchestrator<'a, T> {
    config: &'a SigningConfig,
    tools: T,
    fetcher: Fetcher,
    stage: Stage,
}

impl<'a, T: KeychainTools> Orchestrator<'a, T> {
    pub fn new(config: &'a SigningConfig, tools: T) -> Result<Self> {
        let fetcher = Fetcher::new(config.download_timeout, config.connect_timeout)?;
        Ok(Self {
            config,
            tools,
            fetcher,
            stage: Stage::NoProfile,
        })
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stage went backwards: {} → {next}", self.stage);
        self.stage = next;
        crate::info!("Stage: {next}");
    }

    /// Run every stage. Downloads live in a temp dir that is removed on return.
    pub async fn run(&mut self) -> Result<RunReport> {
        let work_dir = tempfile::Builder::new().prefix("ci_signing").tempdir()?;
        let result = self.run_in(work_dir.path()).await;
        crate::cleanup_path(work_dir.path(), "signing work directory").await;
        result
    }

    async fn run_in(&mut self, work_dir: &Path) -> Result<RunReport> {
        let config = self.config;

        log::section("Provisioning profile");
        let Some(profile_url) = config.profile_url.as_deref() else {
            return self.skip().await;
        };
        let Some(profile_path) = self
            .fetcher
            .fetch(profile_url, work_dir, PROFILE_FILE)
            .await?
        else {
            return self.skip().await;
        };
        crate::success!("Fetched provisioning profile");
        self.advance(Stage::ProfileDownloaded);

        let profile = decode_profile(&profile_path, config.decoder).await?;
        crate::success!(
            "Decoded profile {} ({})",
            profile.uuid,
            profile.name.as_deref().unwrap_or("unnamed")
        );
        if profile.is_expired(chrono::Utc::now()) {
            crate::warn!(
                "Provisioning profile {} expired on {}",
                profile.uuid,
                profile
                    .expiration_date
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_default()
            );
        }

        let installed_at = match &config.profile_install_dir {
            Some(dir) => {
                let dest = install_profile(&profile, dir).await?;
                crate::success!("Installed profile to {}", dest.display());
                Some(dest)
            }
            None => None,
        };
        crate::cleanup_path(&profile_path, "downloaded provisioning profile").await;
        self.advance(Stage::ProfileDecoded);

        log::section("Signing certificate");
        let identity = self.install_identity(work_dir).await?;
        crate::success!(
            "Found {} distribution identit{}",
            identity.count(),
            if identity.count() == 1 { "y" } else { "ies" }
        );
        self.advance(Stage::IdentityInstalled);

        log::section("Signing resolution");
        let resolution = resolver::resolve(
            SigningInputs {
                env_bundle_id: config.env_bundle_id.as_deref(),
                env_team_id: config.env_team_id.as_deref(),
                profile_bundle_id: &profile.bundle_identifier,
                profile_team_id: &profile.team_identifier,
                profile_uuid: &profile.uuid,
                identity_names: &identity.names,
            },
            config.placeholder_bundle_ids.as_slice(),
        );
        for warning in &resolution.warnings {
            crate::warn!("{warning}");
        }
        resolver::enforce(config.mismatch_policy, &resolution)?;
        self.advance(Stage::ConfigResolved);

        let export_method = config
            .export_method
            .unwrap_or_else(|| profile.kind.export_method());

        log::section("Writing build settings");
        let written = self.write_outputs(&resolution, export_method).await?;
        self.advance(Stage::Written);

        let report = RunReport {
            stage: self.stage,
            profile: Some(ProfileSummary::new(&profile, installed_at)),
            identity_count: identity.count(),
            export_method: Some(export_method.as_str()),
            resolution: Some(resolution),
            written,
        };
        print_audit(&report);
        Ok(report)
    }

    async fn skip(&mut self) -> Result<RunReport> {
        crate::warn!("No provisioning profile configured; manual signing skipped");

        let mut written = Vec::new();
        if let Some(path) = &self.config.outputs.summary {
            writer::write_summary(path, &writer::render_skipped(&self.config.app)).await?;
            written.push(path.clone());
        }

        let report = RunReport {
            stage: self.stage,
            profile: None,
            identity_count: 0,
            export_method: None,
            resolution: None,
            written,
        };
        print_audit(&report);
        Ok(report)
    }

    /// Fetch and import the configured certificate, or verify the keychain
    /// already holds an identity when none is configured.
    async fn install_identity(&self, work_dir: &Path) -> Result<SigningIdentity> {
        let keychain = &self.config.keychain;

        let Some(source) = &self.config.certificate else {
            crate::info!(
                "No certificate configured; looking for an existing identity in {}",
                keychain.path
            );
            let output = self.tools.find_identities(keychain).await?;
            let names = distribution_identities(&output);
            if names.is_empty() {
                return Err(SigningError::NoSigningIdentity {
                    keychain: keychain.path.clone(),
                });
            }
            return Ok(SigningIdentity {
                names,
                p12_path: PathBuf::new(),
            });
        };

        let downloads = work_dir.join("certificates");
        let local = match source {
            CertificateSource::P12 { url, password } => LocalCertificate::P12 {
                path: self.fetch_required(url, &downloads, "distribution.p12").await?,
                password: password.clone(),
            },
            CertificateSource::CerKey {
                cer_url,
                key_url,
                password,
            } => LocalCertificate::CerKey {
                cer: self.fetch_required(cer_url, &downloads, "distribution.cer").await?,
                key: self.fetch_required(key_url, &downloads, "distribution.key").await?,
                password: password.clone(),
            },
        };
        crate::success!("Fetched {} certificate", local.form());

        crate::keychain::install_certificate(&self.tools, &local, keychain, work_dir).await
    }

    async fn fetch_required(&self, value: &str, dir: &Path, name: &str) -> Result<PathBuf> {
        self.fetcher
            .fetch(value, dir, name)
            .await?
            .ok_or_else(|| SigningError::MissingConfig(format!("no source for {name}")))
    }

    async fn write_outputs(
        &self,
        resolution: &Resolution,
        export_method: ExportMethod,
    ) -> Result<Vec<PathBuf>> {
        let config = self.config;
        let resolved = &resolution.config;
        let mut written = Vec::new();

        if let Some(path) = &config.outputs.xcconfig {
            writer::write_xcconfig(path, resolved).await?;
            crate::success!("Updated {}", path.display());
            written.push(path.clone());
        }

        if let Some(path) = &config.outputs.project {
            let edit =
                writer::write_project(path, resolved, &config.app_target, ProjectRole::App).await?;
            crate::success!(
                "Updated {}: manual signing for '{}', {} other target(s) unsigned",
                path.display(),
                edit.app_target.as_deref().unwrap_or_default(),
                edit.dependency_targets.len()
            );
            written.push(path.clone());
        }

        if let Some(path) = &config.outputs.pods_project {
            let edit = writer::write_project(
                path,
                resolved,
                &config.app_target,
                ProjectRole::Dependencies,
            )
            .await?;
            crate::success!(
                "Updated {}: {} pod target(s) unsigned",
                path.display(),
                edit.dependency_targets.len()
            );
            written.push(path.clone());
        }

        if let Some(path) = &config.outputs.export_options {
            writer::write_export_options(path, resolved, export_method).await?;
            crate::success!("Wrote {} ({})", path.display(), export_method.as_str());
            written.push(path.clone());
        }

        if let Some(path) = &config.outputs.summary {
            writer::write_summary(path, &writer::render_summary(resolved, &config.app)).await?;
            crate::success!("Wrote signing summary {}", path.display());
            written.push(path.clone());
        }

        Ok(written)
    }
}

/// Print the final resolved values and where each came from.
pub fn print_audit(report: &RunReport) {
    log::section("Signing summary");

    let mut rows = vec![("Stage", report.stage.to_string())];
    if let Some(resolution) = &report.resolution {
        let c = &resolution.config;
        rows.push(("Bundle ID", format!("{} ({})", c.bundle_id, c.bundle_id_source)));
        rows.push(("Team ID", format!("{} ({})", c.team_id, c.team_id_source)));
        rows.push(("Profile UUID", c.profile_uuid.clone()));
        rows.push((
            "Identity",
            format!("{} ({})", c.cert_identity_name, c.identity_source),
        ));
        rows.push(("Warnings", resolution.warnings.len().to_string()));
    }
    if let Some(profile) = &report.profile {
        rows.push(("Profile type", profile.kind.clone()));
    }
    if let Some(method) = report.export_method {
        rows.push(("Export method", method.to_string()));
    }
    for path in &report.written {
        rows.push(("Wrote", path.display().to_string()));
    }
    log::key_values(&rows);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecoderBackend, MismatchPolicy};
    use crate::keychain::{DEV_ONLY, FakeTools, ONE_IDENTITY, TWO_TEAMS};
    use crate::profile::{fake_envelope, profile_xml};

    async fn config_with_profile(dir: &Path, bundle: &str) -> SigningConfig {
        let profile = dir.join("in.mobileprovision");
        let xml = profile_xml("UUID-1", "9H2AD7NQ49", bundle, "");
        tokio::fs::write(&profile, fake_envelope(&xml)).await.unwrap();

        SigningConfig {
            profile_url: Some(profile.display().to_string()),
            decoder: DecoderBackend::Embedded,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_profile_is_a_skipped_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = SigningConfig {
            outputs: crate::config::OutputPaths {
                summary: Some(dir.path().join("signing.env")),
                ..Default::default()
            },
            ..Default::default()
        };

        let mut orchestrator = Orchestrator::new(&config, FakeTools::new(ONE_IDENTITY)).unwrap();
        let report = orchestrator.run().await.unwrap();

        assert!(report.skipped());
        assert_eq!(orchestrator.stage(), Stage::NoProfile);
        let summary = std::fs::read_to_string(dir.path().join("signing.env")).unwrap();
        assert!(summary.contains("SIGNING_SKIPPED"));
    }

    #[tokio::test]
    async fn existing_identity_is_used_without_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_profile(dir.path(), "com.acme.app").await;
        let tools = FakeTools::new(ONE_IDENTITY);

        let mut orchestrator = Orchestrator::new(&config, tools).unwrap();
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.stage, Stage::Written);
        let resolved = &report.resolution.unwrap().config;
        assert_eq!(resolved.bundle_id, "com.acme.app");
        assert_eq!(
            resolved.cert_identity_name,
            "iPhone Distribution: Example Corp (9H2AD7NQ49)"
        );
        assert_eq!(report.export_method, Some("app-store"));
    }

    #[tokio::test]
    async fn identity_matches_profile_team_when_keychain_holds_several() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_profile(dir.path(), "com.acme.app").await;
        let xcconfig = dir.path().join("Release.xcconfig");
        config.outputs.xcconfig = Some(xcconfig.clone());

        let mut orchestrator = Orchestrator::new(&config, FakeTools::new(TWO_TEAMS)).unwrap();
        let report = orchestrator.run().await.unwrap();

        let resolution = report.resolution.unwrap();
        assert_eq!(resolution.config.team_id, "9H2AD7NQ49");
        assert_eq!(
            resolution.config.cert_identity_name,
            "Apple Distribution: Example Corp (9H2AD7NQ49)"
        );
        assert!(resolution.warnings.is_empty());
        assert_eq!(report.identity_count, 2);

        let written = std::fs::read_to_string(&xcconfig).unwrap();
        assert!(written.contains(
            "CODE_SIGN_IDENTITY = Apple Distribution: Example Corp (9H2AD7NQ49)\n"
        ));
        assert!(!written.contains("ZZZZZZZZZZ"));
    }

    #[tokio::test]
    async fn missing_identity_stops_after_decode() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_profile(dir.path(), "com.acme.app").await;

        let mut orchestrator = Orchestrator::new(&config, FakeTools::new(DEV_ONLY)).unwrap();
        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, SigningError::NoSigningIdentity { .. }));
        assert_eq!(orchestrator.stage(), Stage::ProfileDecoded);
    }

    #[tokio::test]
    async fn strict_mismatch_stops_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let xcconfig = dir.path().join("Release.xcconfig");
        let mut config = config_with_profile(dir.path(), "com.acme.app").await;
        config.env_bundle_id = Some("com.other.app".into());
        config.mismatch_policy = MismatchPolicy::Strict;
        config.outputs.xcconfig = Some(xcconfig.clone());

        let mut orchestrator = Orchestrator::new(&config, FakeTools::new(ONE_IDENTITY)).unwrap();
        let err = orchestrator.run().await.unwrap_err();

        assert_eq!(err.exit_code(), 14);
        assert_eq!(orchestrator.stage(), Stage::IdentityInstalled);
        assert!(!xcconfig.exists());
    }

    #[tokio::test]
    async fn unreadable_profile_is_a_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SigningConfig {
            profile_url: Some(dir.path().join("missing").display().to_string()),
            ..Default::default()
        };

        let mut orchestrator = Orchestrator::new(&config, FakeTools::new(ONE_IDENTITY)).unwrap();
        let err = orchestrator.run().await.unwrap_err();
        assert_eq!(err.exit_code(), 10);
        assert_eq!(orchestrator.stage(), Stage::NoProfile);
    }
}
