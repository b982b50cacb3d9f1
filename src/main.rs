use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use ci_signing::artifacts::{self, BuildArtifact};
use ci_signing::config::{
    AppMetadata, CertType, DecoderBackend, ExportMethod, FileConfig, KeychainConfig,
    MismatchPolicy, OutputPaths, RawInputs, SigningConfig, env,
};
use ci_signing::keychain::{
    KeychainTools, SecurityTools, distribution_identities, parse_identity_names,
};
use ci_signing::pipeline::Orchestrator;
use ci_signing::{SigningError, log};

// ============================================================================
// ERROR HANDLING STRATEGY
// ============================================================================
//
// CRITICAL I/O (downloads, keychain, project files) propagates with `?` and
// ends the process with the exit code of its `SigningError` class.
//
// DECORATIVE I/O (colored status lines) ignores errors with `let _ =`; a
// closed stdout must not fail a build that otherwise succeeded.
// ============================================================================

#[derive(Parser)]
#[command(name = "ci_sign")]
#[command(version, about = "Resolve iOS code signing for Flutter CI builds")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch credentials, install the certificate and write signing settings
    ResolveSigning(ResolveArgs),

    /// List code signing identities in a keychain
    Identities {
        /// Keychain to inspect
        #[arg(long, env = env::KEYCHAIN_PATH)]
        keychain: Option<String>,

        /// Include development identities
        #[arg(long)]
        all: bool,
    },

    /// Validate build outputs, copy them and write a report
    CollectArtifacts(ArtifactArgs),
}

#[derive(Args)]
struct ResolveArgs {
    /// Provisioning profile URL or local path
    #[arg(long, env = env::PROFILE_URL)]
    profile_url: Option<String>,

    /// PKCS#12 certificate URL or path
    #[arg(long, env = env::CERT_P12_URL)]
    cert_p12_url: Option<String>,

    /// Certificate (.cer) URL or path, used with --cert-key-url
    #[arg(long, env = env::CERT_CER_URL)]
    cert_cer_url: Option<String>,

    /// Private key URL or path, used with --cert-cer-url
    #[arg(long, env = env::CERT_KEY_URL)]
    cert_key_url: Option<String>,

    /// Password of the P12 (required) or of the generated P12 (optional)
    #[arg(long, env = env::CERT_PASSWORD, hide_env_values = true)]
    cert_password: Option<String>,

    #[arg(long, env = env::CERT_TYPE, value_enum)]
    cert_type: Option<CertType>,

    /// Bundle identifier from the CI configuration
    #[arg(long, env = env::BUNDLE_ID)]
    bundle_id: Option<String>,

    /// Apple team identifier from the CI configuration
    #[arg(long, env = env::APPLE_TEAM_ID)]
    team_id: Option<String>,

    /// Export method; defaults to the one implied by the profile
    #[arg(long, env = env::PROFILE_TYPE, value_enum)]
    export_method: Option<ExportMethod>,

    #[arg(long, value_enum)]
    mismatch_policy: Option<MismatchPolicy>,

    /// Keychain that receives the certificate
    #[arg(long, env = env::KEYCHAIN_PATH)]
    keychain: Option<String>,

    /// Password of a dedicated build keychain
    #[arg(long, env = env::KEYCHAIN_PASSWORD, hide_env_values = true)]
    keychain_password: Option<String>,

    #[arg(long)]
    xcconfig: Option<PathBuf>,

    /// `project.pbxproj` of the app
    #[arg(long)]
    project: Option<PathBuf>,

    /// `Pods.xcodeproj/project.pbxproj`
    #[arg(long)]
    pods_project: Option<PathBuf>,

    #[arg(long)]
    export_options: Option<PathBuf>,

    /// Shell-sourceable summary of the resolved values
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Native target that gets manual signing
    #[arg(long)]
    app_target: Option<String>,

    #[arg(long, value_enum)]
    decoder: Option<DecoderBackend>,

    /// Do not copy the profile into ~/Library/MobileDevice/Provisioning Profiles
    #[arg(long)]
    no_install_profile: bool,

    /// Path to a TOML file with project defaults
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Download timeout in seconds
    #[arg(long)]
    download_timeout: Option<u64>,

    /// Print the run report as JSON on stdout; status output moves to stderr
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    app: AppArgs,
}

#[derive(Args)]
struct AppArgs {
    #[arg(long, env = env::APP_NAME)]
    app_name: Option<String>,

    #[arg(long, env = env::VERSION_NAME)]
    version_name: Option<String>,

    #[arg(long, env = env::VERSION_CODE)]
    version_code: Option<String>,
}

impl From<AppArgs> for AppMetadata {
    fn from(args: AppArgs) -> Self {
        Self {
            app_name: args.app_name,
            version_name: args.version_name,
            version_code: args.version_code,
        }
    }
}

#[derive(Args)]
struct ArtifactArgs {
    /// `.xcarchive` produced by `xcodebuild archive`
    #[arg(long)]
    archive: Option<PathBuf>,

    /// `.ipa` or `.aab`
    #[arg(long)]
    package: Option<PathBuf>,

    #[arg(long, default_value = "build/artifacts")]
    output_dir: PathBuf,

    #[command(flatten)]
    app: AppArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::ResolveSigning(args) => resolve_signing(args).await,
        Command::Identities { keychain, all } => list_identities(keychain, all).await,
        Command::CollectArtifacts(args) => collect_artifacts(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ci_signing::error!("{e:#}");
            let code = e
                .downcast_ref::<SigningError>()
                .map_or(1, SigningError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn resolve_signing(args: ResolveArgs) -> Result<()> {
    // stdout carries only the JSON report
    log::status_to_stderr(args.json);

    let file = match &args.config {
        Some(path) => FileConfig::load(path).await?,
        None => FileConfig::default(),
    };

    let raw = RawInputs {
        profile_url: args.profile_url,
        cert_p12_url: args.cert_p12_url,
        cert_cer_url: args.cert_cer_url,
        cert_key_url: args.cert_key_url,
        cert_password: args.cert_password,
        cert_type: args.cert_type,
        bundle_id: args.bundle_id,
        team_id: args.team_id,
        export_method: args.export_method,
        mismatch_policy: args.mismatch_policy,
        app_target: args.app_target,
        keychain: args.keychain,
        keychain_password: args.keychain_password,
        outputs: OutputPaths {
            xcconfig: args.xcconfig,
            project: args.project,
            pods_project: args.pods_project,
            export_options: args.export_options,
            summary: args.summary,
        },
        app: args.app.into(),
        decoder: args.decoder,
        download_timeout_secs: args.download_timeout,
        install_profile: args.no_install_profile.then_some(false),
    };
    let config = SigningConfig::build(raw, file)?;

    let mut orchestrator = Orchestrator::new(&config, SecurityTools::new())?;
    let report = orchestrator.run().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn list_identities(keychain: Option<String>, all: bool) -> Result<()> {
    let keychain = KeychainConfig {
        path: keychain.unwrap_or_else(|| KeychainConfig::default().path),
        password: None,
    };

    let output = SecurityTools::new()
        .find_identities(&keychain)
        .await
        .with_context(|| format!("Failed to query keychain {}", keychain.path))?;

    let names = if all {
        parse_identity_names(&output)
    } else {
        distribution_identities(&output)
    };

    if names.is_empty() {
        return Err(SigningError::NoSigningIdentity {
            keychain: keychain.path,
        }
        .into());
    }

    log::section(&format!("Identities in {}", keychain.path));
    for name in &names {
        ci_signing::success!("{name}");
    }
    Ok(())
}

async fn collect_artifacts(args: ArtifactArgs) -> Result<()> {
    let artifact = BuildArtifact {
        archive_path: args.archive,
        package_path: args.package,
    };
    let app = AppMetadata::from(args.app);

    let (records, report) =
        artifacts::collect_and_report(&artifact, &args.output_dir, &app).await?;

    for record in &records {
        ci_signing::success!(
            "{} ({} bytes)",
            record.copied_to.display(),
            record.bytes
        );
    }
    ci_signing::info!("Report written to {}", report.display());
    Ok(())
}
