//! Build artifact collection
//!
//! After `xcodebuild` (or `flutter build appbundle`) has run, the produced
//! archive and package are checked, copied into an output directory and
//! described in a plain-text report with sizes and SHA-256 digests.

use crate::config::AppMetadata;
use crate::error::{Result, SigningError};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

pub const REPORT_FILE_NAME: &str = "artifacts.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `.xcarchive` directory
    Archive,
    Ipa,
    Aab,
}

impl ArtifactKind {
    fn label(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Ipa => "ipa",
            Self::Aab => "aab",
        }
    }

    fn of_package(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("ipa") => Ok(Self::Ipa),
            Some("aab") => Ok(Self::Aab),
            _ => Err(SigningError::Artifact(format!(
                "{} is neither an .ipa nor an .aab",
                path.display()
            ))),
        }
    }
}

/// Outputs of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildArtifact {
    pub archive_path: Option<PathBuf>,
    /// The `.ipa` or `.aab`
    pub package_path: Option<PathBuf>,
}

/// One collected file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub kind: ArtifactKind,
    pub source: PathBuf,
    pub copied_to: PathBuf,
    pub bytes: u64,
    /// Only computed for regular files
    pub sha256: Option<String>,
}

/// Streaming SHA-256 of a file (constant memory).
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Copy a directory tree, returning the total size of the files copied.
async fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    let mut total = 0;
    let mut pending = vec![(src.to_path_buf(), dest.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push((entry.path(), target));
            } else if file_type.is_symlink() {
                // Frameworks inside an archive use relative symlinks.
                let link = tokio::fs::read_link(entry.path()).await?;
                #[cfg(unix)]
                tokio::fs::symlink(&link, &target).await?;
                #[cfg(not(unix))]
                let _ = link;
            } else {
                total += tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }

    Ok(total)
}

/// Remove a previous copy at `dest` so a re-run starts from a clean slate.
async fn replace_destination(src: &Path, dest: &Path) -> Result<()> {
    let Ok(existing) = tokio::fs::symlink_metadata(dest).await else {
        return Ok(());
    };

    if let (Ok(a), Ok(b)) = (
        tokio::fs::canonicalize(src).await,
        tokio::fs::canonicalize(dest).await,
    ) && a == b
    {
        return Err(SigningError::Artifact(format!(
            "{} is already in the output directory",
            src.display()
        )));
    }

    if existing.is_dir() {
        tokio::fs::remove_dir_all(dest).await?;
    } else {
        tokio::fs::remove_file(dest).await?;
    }
    Ok(())
}

/// Reject missing or empty artifacts.
async fn validate(kind: ArtifactKind, path: &Path) -> Result<std::fs::Metadata> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        SigningError::Artifact(format!("{} {} not found: {e}", kind.label(), path.display()))
    })?;

    let empty = if metadata.is_dir() {
        tokio::fs::read_dir(path).await?.next_entry().await?.is_none()
    } else {
        metadata.len() == 0
    };
    if empty {
        return Err(SigningError::Artifact(format!(
            "{} {} is empty",
            kind.label(),
            path.display()
        )));
    }

    Ok(metadata)
}

async fn collect_one(kind: ArtifactKind, path: &Path, out_dir: &Path) -> Result<ArtifactRecord> {
    let metadata = validate(kind, path).await?;
    let name = path
        .file_name()
        .ok_or_else(|| SigningError::Artifact(format!("{} has no file name", path.display())))?;
    let copied_to = out_dir.join(name);
    replace_destination(path, &copied_to).await?;

    let (bytes, sha256) = if metadata.is_dir() {
        (copy_tree(path, &copied_to).await?, None)
    } else {
        let bytes = tokio::fs::copy(path, &copied_to).await?;
        (bytes, Some(sha256_file(&copied_to).await?))
    };

    Ok(ArtifactRecord {
        kind,
        source: path.to_path_buf(),
        copied_to,
        bytes,
        sha256,
    })
}

/// Validate and copy every artifact into `out_dir`.
pub async fn collect(artifact: &BuildArtifact, out_dir: &Path) -> Result<Vec<ArtifactRecord>> {
    if artifact.archive_path.is_none() && artifact.package_path.is_none() {
        return Err(SigningError::Artifact(
            "no archive or package path given".to_string(),
        ));
    }

    tokio::fs::create_dir_all(out_dir).await?;

    let mut records = Vec::new();
    if let Some(archive) = &artifact.archive_path {
        records.push(collect_one(ArtifactKind::Archive, archive, out_dir).await?);
    }
    if let Some(package) = &artifact.package_path {
        let kind = ArtifactKind::of_package(package)?;
        records.push(collect_one(kind, package, out_dir).await?);
    }
    Ok(records)
}

#[must_use]
pub fn render_report(records: &[ArtifactRecord], app: &AppMetadata) -> String {
    let mut out = String::from("Build artifacts\n");
    if let Some(name) = &app.app_name {
        let _ = writeln!(out, "app: {name}");
    }
    if let Some(version) = &app.version_name {
        match &app.version_code {
            Some(code) => {
                let _ = writeln!(out, "version: {version} ({code})");
            }
            None => {
                let _ = writeln!(out, "version: {version}");
            }
        }
    }
    out.push('\n');

    for record in records {
        let file_name = record
            .copied_to
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let _ = writeln!(out, "[{}] {file_name}", record.kind.label());
        let _ = writeln!(out, "  path:   {}", record.copied_to.display());
        let _ = writeln!(out, "  size:   {} bytes", record.bytes);
        if let Some(digest) = &record.sha256 {
            let _ = writeln!(out, "  sha256: {digest}");
        }
    }
    out
}

/// Collect artifacts and write the report next to them.
pub async fn collect_and_report(
    artifact: &BuildArtifact,
    out_dir: &Path,
    app: &AppMetadata,
) -> Result<(Vec<ArtifactRecord>, PathBuf)> {
    let records = collect(artifact, out_dir).await?;
    let report_path = out_dir.join(REPORT_FILE_NAME);
    tokio::fs::write(&report_path, render_report(&records, app)).await?;
    Ok((records, report_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_archive_and_ipa_with_digest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Runner.xcarchive");
        std::fs::create_dir_all(archive.join("Products/Applications")).unwrap();
        std::fs::write(archive.join("Info.plist"), b"<plist/>").unwrap();
        std::fs::write(archive.join("Products/Applications/Runner"), b"binary").unwrap();
        let ipa = dir.path().join("Runner.ipa");
        std::fs::write(&ipa, b"abc").unwrap();

        let out = dir.path().join("out");
        let artifact = BuildArtifact {
            archive_path: Some(archive),
            package_path: Some(ipa),
        };
        let app = AppMetadata {
            app_name: Some("Runner".into()),
            version_name: Some("1.0.0".into()),
            version_code: Some("7".into()),
        };
        let (records, report) = collect_and_report(&artifact, &out, &app).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, ArtifactKind::Archive);
        assert_eq!(records[0].bytes, 14);
        assert!(records[0].sha256.is_none());
        assert!(out.join("Runner.xcarchive/Products/Applications/Runner").exists());

        assert_eq!(records[1].kind, ArtifactKind::Ipa);
        assert_eq!(
            records[1].sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );

        let text = std::fs::read_to_string(report).unwrap();
        assert!(text.contains("version: 1.0.0 (7)"));
        assert!(text.contains("[ipa] Runner.ipa"));
        assert!(text.contains("size:   3 bytes"));
    }

    #[tokio::test]
    async fn empty_package_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ipa = dir.path().join("Runner.ipa");
        std::fs::write(&ipa, b"").unwrap();

        let err = collect(
            &BuildArtifact {
                archive_path: None,
                package_path: Some(ipa),
            },
            &dir.path().join("out"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SigningError::Artifact(_)));
        assert_eq!(err.exit_code(), 15);
    }

    #[tokio::test]
    async fn missing_or_unknown_artifacts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");

        assert!(collect(&BuildArtifact::default(), &out).await.is_err());
        assert!(
            collect(
                &BuildArtifact {
                    archive_path: Some(dir.path().join("missing.xcarchive")),
                    package_path: None,
                },
                &out,
            )
            .await
            .is_err()
        );

        let zip = dir.path().join("Runner.zip");
        std::fs::write(&zip, b"x").unwrap();
        assert!(
            collect(
                &BuildArtifact {
                    archive_path: None,
                    package_path: Some(zip),
                },
                &out,
            )
            .await
            .is_err()
        );
    }

    #[tokio::test]
    async fn rerun_replaces_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Runner.xcarchive");
        let frameworks = archive.join("Products/Frameworks/Flutter.framework");
        std::fs::create_dir_all(frameworks.join("Versions/A")).unwrap();
        std::fs::write(frameworks.join("Versions/A/Flutter"), b"lib").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("Versions/A/Flutter", frameworks.join("Flutter")).unwrap();

        let out = dir.path().join("out");
        let artifact = BuildArtifact {
            archive_path: Some(archive),
            package_path: None,
        };
        collect(&artifact, &out).await.unwrap();
        std::fs::write(out.join("Runner.xcarchive/stale.txt"), b"old").unwrap();

        let records = collect(&artifact, &out).await.unwrap();

        assert_eq!(records[0].bytes, 3);
        assert!(!out.join("Runner.xcarchive/stale.txt").exists());
        assert!(
            out.join("Runner.xcarchive/Products/Frameworks/Flutter.framework/Versions/A/Flutter")
                .exists()
        );
    }

    #[tokio::test]
    async fn source_inside_output_dir_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let ipa = dir.path().join("Runner.ipa");
        std::fs::write(&ipa, b"abc").unwrap();

        let err = collect(
            &BuildArtifact {
                archive_path: None,
                package_path: Some(ipa.clone()),
            },
            dir.path(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SigningError::Artifact(_)));
        assert_eq!(std::fs::read(&ipa).unwrap(), b"abc");
    }
}
