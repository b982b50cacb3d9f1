//! Bundle-id / team-id reconciliation
//!
//! [`resolve`] is a pure function: it takes the environment's values and
//! the profile's values and decides what gets written, together with any
//! warnings. Nothing here touches the filesystem, the network or the
//! keychain, so every branch is covered by plain unit tests.

use crate::config::{DEFAULT_IDENTITY, MismatchPolicy};
use crate::error::{Result, SigningError};
use serde::Serialize;
use std::fmt;

/// Where a resolved value came from. Printed in the audit summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Environment,
    Profile,
    Keychain,
    Default,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Environment => "environment",
            Self::Profile => "profile",
            Self::Keychain => "keychain",
            Self::Default => "default",
        })
    }
}

/// The signing values for one build. Never mutated once computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSigningConfig {
    pub bundle_id: String,
    pub team_id: String,
    pub profile_uuid: String,
    pub cert_identity_name: String,
    pub bundle_id_source: Provenance,
    pub team_id_source: Provenance,
    pub identity_source: Provenance,
}

/// Non-fatal findings from resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SigningWarning {
    BundleIdMismatch { env: String, profile: String },
    TeamIdMismatch { env: String, profile: String },
    WildcardBundleId { bundle_id: String },
    IdentityTeamMismatch { identity: String, team: String },
}

impl fmt::Display for SigningWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BundleIdMismatch { env, profile } => write!(
                f,
                "Bundle ID mismatch: BUNDLE_ID is '{env}' but the provisioning profile is for '{profile}'; keeping '{env}'"
            ),
            Self::TeamIdMismatch { env, profile } => write!(
                f,
                "Team ID mismatch: APPLE_TEAM_ID is '{env}' but the provisioning profile belongs to '{profile}'; keeping '{env}'"
            ),
            Self::WildcardBundleId { bundle_id } => write!(
                f,
                "Resolved bundle ID '{bundle_id}' is a wildcard; set BUNDLE_ID to the real identifier"
            ),
            Self::IdentityTeamMismatch { identity, team } => write!(
                f,
                "No distribution identity for team '{team}' in the keychain; using '{identity}'"
            ),
        }
    }
}

/// Everything [`resolve`] looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigningInputs<'a> {
    pub env_bundle_id: Option<&'a str>,
    pub env_team_id: Option<&'a str>,
    pub profile_bundle_id: &'a str,
    pub profile_team_id: &'a str,
    pub profile_uuid: &'a str,
    /// Distribution identities found in the keychain, in listing order
    pub identity_names: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub config: ResolvedSigningConfig,
    pub warnings: Vec<SigningWarning>,
}

impl Resolution {
    #[must_use]
    pub fn bundle_mismatch(&self) -> Option<(&str, &str)> {
        self.warnings.iter().find_map(|w| match w {
            SigningWarning::BundleIdMismatch { env, profile } => {
                Some((env.as_str(), profile.as_str()))
            }
            _ => None,
        })
    }

    #[must_use]
    pub fn identity_mismatch(&self) -> Option<(&str, &str)> {
        self.warnings.iter().find_map(|w| match w {
            SigningWarning::IdentityTeamMismatch { identity, team } => {
                Some((identity.as_str(), team.as_str()))
            }
            _ => None,
        })
    }
}

/// Does the profile's application identifier authorize `bundle_id`?
///
/// `*` covers everything, `com.example.*` covers `com.example.anything`.
#[must_use]
pub fn profile_covers(profile_bundle_id: &str, bundle_id: &str) -> bool {
    if profile_bundle_id == bundle_id || profile_bundle_id == "*" {
        return true;
    }
    match profile_bundle_id.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('.') => bundle_id.starts_with(prefix),
        _ => false,
    }
}

fn unset(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Identity whose common name ends in `(TEAMID)` for `team_id`.
#[must_use]
pub fn identity_for_team<'a, S: AsRef<str>>(names: &'a [S], team_id: &str) -> Option<&'a str> {
    let suffix = format!("({team_id})");
    names
        .iter()
        .map(AsRef::as_ref)
        .find(|name| name.trim_end().ends_with(&suffix))
}

/// Decide the effective signing values.
///
/// Bundle ID: an unset or placeholder environment value defers to the
/// profile; any other environment value is kept, with one
/// `BundleIdMismatch` warning if the profile does not cover it.
/// Team ID: same precedence, no placeholder list.
/// Identity: the keychain identity issued to the resolved team; the first
/// one with an `IdentityTeamMismatch` warning when no team matches.
#[must_use]
pub fn resolve<S: AsRef<str>>(inputs: SigningInputs<'_>, placeholders: &[S]) -> Resolution {
    let mut warnings = Vec::new();

    let is_placeholder = |id: &str| placeholders.iter().any(|p| p.as_ref() == id);

    let (bundle_id, bundle_id_source) = match unset(inputs.env_bundle_id) {
        Some(env) if !is_placeholder(env) => {
            if !profile_covers(inputs.profile_bundle_id, env) {
                warnings.push(SigningWarning::BundleIdMismatch {
                    env: env.to_string(),
                    profile: inputs.profile_bundle_id.to_string(),
                });
            }
            (env.to_string(), Provenance::Environment)
        }
        _ => (inputs.profile_bundle_id.to_string(), Provenance::Profile),
    };

    if bundle_id.contains('*') {
        warnings.push(SigningWarning::WildcardBundleId {
            bundle_id: bundle_id.clone(),
        });
    }

    let (team_id, team_id_source) = match unset(inputs.env_team_id) {
        Some(env) => {
            if env != inputs.profile_team_id {
                warnings.push(SigningWarning::TeamIdMismatch {
                    env: env.to_string(),
                    profile: inputs.profile_team_id.to_string(),
                });
            }
            (env.to_string(), Provenance::Environment)
        }
        None => (inputs.profile_team_id.to_string(), Provenance::Profile),
    };

    let (cert_identity_name, identity_source) =
        match identity_for_team(inputs.identity_names, &team_id) {
            Some(name) => (name.to_string(), Provenance::Keychain),
            None => match inputs.identity_names.first() {
                Some(first) => {
                    warnings.push(SigningWarning::IdentityTeamMismatch {
                        identity: first.clone(),
                        team: team_id.clone(),
                    });
                    (first.clone(), Provenance::Keychain)
                }
                None => (DEFAULT_IDENTITY.to_string(), Provenance::Default),
            },
        };

    Resolution {
        config: ResolvedSigningConfig {
            bundle_id,
            team_id,
            profile_uuid: inputs.profile_uuid.to_string(),
            cert_identity_name,
            bundle_id_source,
            team_id_source,
            identity_source,
        },
        warnings,
    }
}

/// Apply the mismatch policy. `Strict` turns a bundle-id mismatch, or an
/// identity from another team, into an error.
pub fn enforce(policy: MismatchPolicy, resolution: &Resolution) -> Result<()> {
    if policy == MismatchPolicy::Permissive {
        return Ok(());
    }
    if let Some((env, profile)) = resolution.bundle_mismatch() {
        return Err(SigningError::BundleIdMismatch {
            env: env.to_string(),
            profile: profile.to_string(),
        });
    }
    if let Some((identity, team)) = resolution.identity_mismatch() {
        return Err(SigningError::IdentityTeamMismatch {
            identity: identity.to_string(),
            team: team.to_string(),
        });
    }
    Ok(())
}
