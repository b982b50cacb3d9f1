//! External tools behind certificate installation
//!
//! [`KeychainTools`] is the seam between the installer's decision logic and
//! the `openssl` / `security` processes it drives. [`SecurityTools`] is the
//! real implementation; tests substitute a recording fake.

use crate::config::{KeychainConfig, Secret};
use crate::error::{Result, SigningError};
use fs4::tokio::AsyncFileExt;
use std::path::{Path, PathBuf};

/// Operations the certificate installer needs from the host.
#[allow(async_fn_in_trait)]
pub trait KeychainTools {
    /// Package a certificate and private key into a PKCS#12 bundle at `out`.
    /// `None` password produces an unprotected bundle.
    async fn package_p12(
        &self,
        cer: &Path,
        key: &Path,
        out: &Path,
        password: Option<&Secret>,
    ) -> Result<()>;

    /// Create (if needed) and unlock a keychain that has a known password.
    async fn prepare_keychain(&self, keychain: &KeychainConfig) -> Result<()>;

    /// Import a PKCS#12 bundle. `None` password means no `-P` argument.
    async fn import_p12(
        &self,
        p12: &Path,
        keychain: &KeychainConfig,
        password: Option<&Secret>,
    ) -> Result<()>;

    /// Let `codesign` use imported keys without an access prompt.
    async fn allow_codesign_access(&self, keychain: &KeychainConfig) -> Result<()>;

    /// Raw `security find-identity -v -p codesigning` output for the keychain.
    async fn find_identities(&self, keychain: &KeychainConfig) -> Result<String>;
}

/// Drives the real `openssl` and `security` binaries.
#[derive(Debug, Clone)]
pub struct SecurityTools {
    lock_path: PathBuf,
}

impl SecurityTools {
    /// Lock file location: `<cache>/ci_signing/keychain.lock`
    #[must_use]
    pub fn new() -> Self {
        let lock_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("ci_signing");

        Self {
            lock_path: lock_dir.join("keychain.lock"),
        }
    }

    async fn run(program: &str, args: &[&str]) -> Result<std::process::Output> {
        tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SigningError::MissingDependency(format!("{program} command not found in PATH"))
                } else {
                    SigningError::CommandExecution(format!("Failed to run {program}: {e}"))
                }
            })
    }

    async fn run_security(args: &[&str]) -> Result<()> {
        let output = Self::run("security", args).await?;
        if !output.status.success() {
            return Err(SigningError::KeychainOperation(format!(
                "security {} failed: {}",
                args[0],
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// OpenSSL 3 defaults to PKCS#12 ciphers that `security import` rejects.
    async fn needs_legacy_pkcs12() -> bool {
        match Self::run("openssl", &["version"]).await {
            Ok(output) => String::from_utf8_lossy(&output.stdout).starts_with("OpenSSL 3"),
            Err(_) => false,
        }
    }

    /// `openssl pkcs12 -in` wants PEM; convert a DER `.cer` first.
    async fn ensure_pem_certificate(cer: &Path, scratch: &Path) -> Result<PathBuf> {
        let bytes = tokio::fs::read(cer).await?;
        if bytes.starts_with(b"-----BEGIN") {
            return Ok(cer.to_path_buf());
        }

        let pem = scratch.join("certificate.pem");
        let output = Self::run(
            "openssl",
            &[
                "x509",
                "-inform",
                "DER",
                "-in",
                path_str(cer)?,
                "-out",
                path_str(&pem)?,
            ],
        )
        .await?;

        if !output.status.success() {
            return Err(SigningError::CertificatePackaging(format!(
                "Failed to convert DER certificate to PEM: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(pem)
    }
}

impl Default for SecurityTools {
    fn default() -> Self {
        Self::new()
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| SigningError::InvalidConfig(format!("Invalid path: {}", path.display())))
}

impl KeychainTools for SecurityTools {
    async fn package_p12(
        &self,
        cer: &Path,
        key: &Path,
        out: &Path,
        password: Option<&Secret>,
    ) -> Result<()> {
        let scratch = out.parent().unwrap_or_else(|| Path::new("."));
        let cer_pem = Self::ensure_pem_certificate(cer, scratch).await?;

        let passout = format!("pass:{}", password.map(Secret::expose).unwrap_or(""));
        let mut args = vec![
            "pkcs12",
            "-export",
            "-inkey",
            path_str(key)?,
            "-in",
            path_str(&cer_pem)?,
            "-out",
            path_str(out)?,
            "-passout",
            &passout,
        ];

        // An encrypted key is assumed to share the certificate password.
        let passin = password.map(|p| format!("pass:{}", p.expose()));
        if let Some(passin) = passin.as_deref() {
            args.push("-passin");
            args.push(passin);
        }

        if Self::needs_legacy_pkcs12().await {
            args.push("-legacy");
        }

        let output = Self::run("openssl", &args).await?;
        if !output.status.success() {
            return Err(SigningError::CertificatePackaging(format!(
                "openssl pkcs12 -export failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(out, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(())
    }

    async fn prepare_keychain(&self, keychain: &KeychainConfig) -> Result<()> {
        let Some(password) = keychain.password.as_ref() else {
            return Ok(());
        };
        let pw = password.expose();
        let path = keychain.path.as_str();

        // Creating an existing keychain fails; that is fine.
        let created = Self::run("security", &["create-keychain", "-p", pw, path]).await?;
        if !created.status.success() {
            let stderr = String::from_utf8_lossy(&created.stderr);
            if !stderr.contains("already exists") {
                return Err(SigningError::KeychainOperation(format!(
                    "security create-keychain failed: {}",
                    stderr.trim()
                )));
            }
        }

        // 1 hour timeout, lock on sleep disabled
        Self::run_security(&["set-keychain-settings", "-t", "3600", "-u", path]).await?;
        Self::run_security(&["unlock-keychain", "-p", pw, path]).await?;

        // Add to keychain search list so xcodebuild can find the identity
        let list_output = Self::run("security", &["list-keychains", "-d", "user"]).await?;
        let current = String::from_utf8_lossy(&list_output.stdout);
        let mut keychains: Vec<String> = current
            .lines()
            .map(|l| l.trim().trim_matches('"').to_string())
            .filter(|l| !l.is_empty())
            .collect();

        if !keychains.iter().any(|k| k == path || k.ends_with(&format!("/{path}"))) {
            keychains.insert(0, path.to_string());
            let mut args = vec!["list-keychains", "-d", "user", "-s"];
            args.extend(keychains.iter().map(String::as_str));
            Self::run_security(&args).await?;
        }

        Ok(())
    }

    /// Imports are serialized across processes with an exclusive file lock.
    async fn import_p12(
        &self,
        p12: &Path,
        keychain: &KeychainConfig,
        password: Option<&Secret>,
    ) -> Result<()> {
        if let Some(dir) = self.lock_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let lock_file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.lock_path)
            .await?;

        lock_file.lock_exclusive().map_err(|e| {
            SigningError::KeychainOperation(format!("Failed to acquire keychain lock: {e}"))
        })?;

        let mut args = vec!["import", path_str(p12)?, "-k", keychain.path.as_str()];
        if let Some(password) = password {
            args.push("-P");
            args.push(password.expose());
        }
        args.extend(["-T", "/usr/bin/codesign", "-T", "/usr/bin/security"]);

        let output = Self::run("security", &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("already exists") {
                crate::info!("Certificate already present in keychain, import skipped");
                return Ok(());
            }
            return Err(SigningError::KeychainOperation(format!(
                "Keychain import failed: {}",
                stderr.trim()
            )));
        }

        // Lock released when lock_file is dropped
        Ok(())
    }

    async fn allow_codesign_access(&self, keychain: &KeychainConfig) -> Result<()> {
        let Some(password) = keychain.password.as_ref() else {
            return Ok(());
        };

        Self::run_security(&[
            "set-key-partition-list",
            "-S",
            "apple-tool:,apple:,codesign:",
            "-s",
            "-k",
            password.expose(),
            keychain.path.as_str(),
        ])
        .await
    }

    async fn find_identities(&self, keychain: &KeychainConfig) -> Result<String> {
        let output = Self::run(
            "security",
            &["find-identity", "-v", "-p", "codesigning", keychain.path.as_str()],
        )
        .await?;

        super::validation::identity_output_text(&output)
    }
}
