//! Certificate installation: package, import, verify

use super::tools::KeychainTools;
use super::validation::distribution_identities;
use crate::config::{KeychainConfig, Secret};
use crate::error::{Result, SigningError};
use std::path::{Path, PathBuf};

/// A certificate that has been fetched to local disk.
#[derive(Debug, Clone)]
pub enum LocalCertificate {
    P12 {
        path: PathBuf,
        password: Secret,
    },
    CerKey {
        cer: PathBuf,
        key: PathBuf,
        password: Option<Secret>,
    },
}

impl LocalCertificate {
    #[must_use]
    pub fn form(&self) -> &'static str {
        match self {
            Self::P12 { .. } => "p12",
            Self::CerKey { .. } => "cer+key",
        }
    }
}

/// Distribution identities present in the keychain after import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    /// Common names in `find-identity` order; never empty
    pub names: Vec<String>,
    pub p12_path: PathBuf,
}

impl SigningIdentity {
    #[must_use]
    pub fn count(&self) -> usize {
        self.names.len()
    }
}

/// Import `certificate` into `keychain` and assert a distribution identity exists.
///
/// A CER+KEY pair is packaged into `<work_dir>/certificate.p12` first. Zero
/// distribution identities after import is [`SigningError::NoSigningIdentity`]
/// for either certificate form; the import is never retried.
pub async fn install_certificate<T: KeychainTools>(
    tools: &T,
    certificate: &LocalCertificate,
    keychain: &KeychainConfig,
    work_dir: &Path,
) -> Result<SigningIdentity> {
    tools.prepare_keychain(keychain).await?;

    let (p12_path, password) = match certificate {
        LocalCertificate::P12 { path, password } => (path.clone(), Some(password)),
        LocalCertificate::CerKey { cer, key, password } => {
            let out = work_dir.join("certificate.p12");
            tools.package_p12(cer, key, &out, password.as_ref()).await?;
            crate::success!(
                "Packaged certificate and key into P12 ({})",
                if password.is_some() {
                    "password protected"
                } else {
                    "no password"
                }
            );
            (out, password.as_ref())
        }
    };

    tools.import_p12(&p12_path, keychain, password).await?;
    tools.allow_codesign_access(keychain).await?;

    let output = tools.find_identities(keychain).await?;
    let names = distribution_identities(&output);
    if names.is_empty() {
        return Err(SigningError::NoSigningIdentity {
            keychain: keychain.path.clone(),
        });
    }

    Ok(SigningIdentity { names, p12_path })
}
