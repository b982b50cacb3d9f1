//! End-to-end runs of the signing pipeline against local fixtures.
//!
//! The keychain side is replaced by a recording fake; everything else
//! (fetching, decoding, resolution, file writing) runs for real.

use ci_signing::config::{
    CertificateSource, DecoderBackend, KeychainConfig, MismatchPolicy, OutputPaths, Secret,
    SigningConfig,
};
use ci_signing::keychain::KeychainTools;
use ci_signing::pipeline::{Orchestrator, Stage};
use ci_signing::resolver::{Provenance, SigningWarning};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const IDENTITIES: &str = concat!(
    "  1) 0F9E8D7C6B5A4F3E2D1C0B9A8F7E6D5C4B3A2F1E ",
    "\"iPhone Distribution: Example Corp (9H2AD7NQ49)\"\n",
    "     1 valid identities found\n"
);

const PBXPROJ: &str = "// !$*UTF8*$!
{
	objects = {
		A1 /* Runner */ = {
			isa = PBXNativeTarget;
			buildConfigurationList = L1;
			name = Runner;
			productType = \"com.apple.product-type.application\";
		};
		A2 /* RunnerTests */ = {
			isa = PBXNativeTarget;
			buildConfigurationList = L2;
			name = RunnerTests;
			productType = \"com.apple.product-type.bundle.unit-test\";
		};
		C1 /* Release */ = {
			isa = XCBuildConfiguration;
			buildSettings = {
				CODE_SIGN_STYLE = Automatic;
				PRODUCT_BUNDLE_IDENTIFIER = com.example.flutterApp;
			};
			name = Release;
		};
		C2 /* Release */ = {
			isa = XCBuildConfiguration;
			buildSettings = {
				PRODUCT_BUNDLE_IDENTIFIER = com.example.flutterApp.RunnerTests;
			};
			name = Release;
		};
		L1 = {
			isa = XCConfigurationList;
			buildConfigurations = (
				C1 /* Release */,
			);
		};
		L2 = {
			isa = XCConfigurationList;
			buildConfigurations = (
				C2 /* Release */,
			);
		};
	};
	rootObject = P1;
}
";

#[derive(Default)]
struct RecordingTools {
    calls: Mutex<Vec<String>>,
}

impl RecordingTools {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn describe(password: Option<&Secret>) -> &str {
    password.map(Secret::expose).unwrap_or("<none>")
}

impl KeychainTools for &RecordingTools {
    async fn package_p12(
        &self,
        _cer: &Path,
        _key: &Path,
        out: &Path,
        password: Option<&Secret>,
    ) -> ci_signing::Result<()> {
        tokio::fs::write(out, b"p12").await?;
        self.record(format!("package password={}", describe(password)));
        Ok(())
    }

    async fn prepare_keychain(&self, _keychain: &KeychainConfig) -> ci_signing::Result<()> {
        self.record("prepare".into());
        Ok(())
    }

    async fn import_p12(
        &self,
        p12: &Path,
        _keychain: &KeychainConfig,
        password: Option<&Secret>,
    ) -> ci_signing::Result<()> {
        self.record(format!(
            "import {} password={}",
            p12.file_name().unwrap().to_string_lossy(),
            describe(password)
        ));
        Ok(())
    }

    async fn allow_codesign_access(&self, _keychain: &KeychainConfig) -> ci_signing::Result<()> {
        self.record("partition".into());
        Ok(())
    }

    async fn find_identities(&self, _keychain: &KeychainConfig) -> ci_signing::Result<String> {
        self.record("find".into());
        Ok(IDENTITIES.to_string())
    }
}

fn profile_plist(uuid: &str, team: &str, bundle: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>Entitlements</key>
	<dict>
		<key>application-identifier</key>
		<string>{team}.{bundle}</string>
	</dict>
	<key>ExpirationDate</key>
	<date>2099-01-01T00:00:00Z</date>
	<key>Name</key>
	<string>Example App Store</string>
	<key>TeamIdentifier</key>
	<array>
		<string>{team}</string>
	</array>
	<key>UUID</key>
	<string>{uuid}</string>
</dict>
</plist>
"#
    )
}

/// The plist wrapped in bytes that look like a DER CMS envelope.
fn mobileprovision(uuid: &str, team: &str, bundle: &str) -> Vec<u8> {
    let mut bytes = vec![0x30, 0x80, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d];
    bytes.extend_from_slice(profile_plist(uuid, team, bundle).as_bytes());
    bytes.extend_from_slice(&[0x00, 0x00, 0xa0, 0x82]);
    bytes
}

/// Serve one `200 OK` with `body` on a loopback port.
async fn serve_once(body: Vec<u8>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(header.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{addr}/profile.mobileprovision")
}

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("ios/Runner.xcodeproj/project.pbxproj");
        std::fs::create_dir_all(project.parent().unwrap()).unwrap();
        std::fs::write(&project, PBXPROJ).unwrap();
        Self { dir }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn profile_file(&self, bundle: &str) -> String {
        let path = self.path("downloads/profile.mobileprovision");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, mobileprovision("ABCD-1234", "9H2AD7NQ49", bundle)).unwrap();
        path.display().to_string()
    }

    fn config(&self, profile_url: String) -> SigningConfig {
        SigningConfig {
            profile_url: Some(profile_url),
            decoder: DecoderBackend::Embedded,
            outputs: OutputPaths {
                xcconfig: Some(self.path("ios/Flutter/Release.xcconfig")),
                project: Some(self.path("ios/Runner.xcodeproj/project.pbxproj")),
                pods_project: None,
                export_options: Some(self.path("ios/ExportOptions.plist")),
                summary: Some(self.path("signing.env")),
            },
            ..Default::default()
        }
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).unwrap()
    }
}

#[tokio::test]
async fn placeholder_bundle_and_empty_team_resolve_from_downloaded_profile() {
    let ws = Workspace::new();
    let url = serve_once(mobileprovision("ABCD-1234", "9H2AD7NQ49", "com.example.app")).await;
    let mut config = ws.config(url);
    config.env_bundle_id = Some("com.example.app".into());
    config.env_team_id = None;

    let tools = RecordingTools::default();
    let report = Orchestrator::new(&config, &tools)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stage, Stage::Written);
    let resolution = report.resolution.unwrap();
    assert!(resolution.warnings.is_empty());
    assert_eq!(resolution.config.bundle_id, "com.example.app");
    assert_eq!(resolution.config.team_id, "9H2AD7NQ49");
    assert_eq!(resolution.config.team_id_source, Provenance::Profile);
    assert_eq!(resolution.config.profile_uuid, "ABCD-1234");

    let xcconfig = ws.read("ios/Flutter/Release.xcconfig");
    assert!(xcconfig.contains("CODE_SIGN_STYLE = Manual\n"));
    assert!(xcconfig.contains("DEVELOPMENT_TEAM = 9H2AD7NQ49\n"));
    assert!(xcconfig.contains("PROVISIONING_PROFILE_SPECIFIER = ABCD-1234\n"));
    assert!(xcconfig.contains("PRODUCT_BUNDLE_IDENTIFIER = com.example.app\n"));

    let project = ws.read("ios/Runner.xcodeproj/project.pbxproj");
    assert!(project.contains("CODE_SIGN_STYLE = Manual;"));
    assert!(project.contains("CODE_SIGNING_ALLOWED = NO;"));
    assert!(project.contains("PRODUCT_BUNDLE_IDENTIFIER = com.example.flutterApp.RunnerTests;"));

    let summary = ws.read("signing.env");
    assert!(summary.contains("PROFILE_UUID=\"ABCD-1234\""));
}

#[tokio::test]
async fn non_placeholder_mismatch_keeps_env_value_with_one_warning() {
    let ws = Workspace::new();
    let mut config = ws.config(ws.profile_file("com.example.app"));
    config.env_bundle_id = Some("com.test.app".into());

    let tools = RecordingTools::default();
    let report = Orchestrator::new(&config, &tools)
        .unwrap()
        .run()
        .await
        .unwrap();

    let resolution = report.resolution.unwrap();
    assert_eq!(resolution.config.bundle_id, "com.test.app");
    assert_eq!(resolution.config.bundle_id_source, Provenance::Environment);
    assert_eq!(
        resolution.warnings,
        vec![SigningWarning::BundleIdMismatch {
            env: "com.test.app".into(),
            profile: "com.example.app".into(),
        }]
    );
    let message = resolution.warnings[0].to_string();
    assert!(message.contains("com.test.app") && message.contains("com.example.app"));

    let plist = ws.read("ios/ExportOptions.plist");
    assert!(plist.contains("<key>com.test.app</key>"));
}

#[tokio::test]
async fn strict_policy_aborts_on_mismatch_before_writing() {
    let ws = Workspace::new();
    let mut config = ws.config(ws.profile_file("com.example.app"));
    config.env_bundle_id = Some("com.test.app".into());
    config.mismatch_policy = MismatchPolicy::Strict;

    let tools = RecordingTools::default();
    let mut orchestrator = Orchestrator::new(&config, &tools).unwrap();
    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(err.exit_code(), 14);
    assert_eq!(orchestrator.stage(), Stage::IdentityInstalled);
    assert!(!ws.path("ios/Flutter/Release.xcconfig").exists());
    assert_eq!(ws.read("ios/Runner.xcodeproj/project.pbxproj"), PBXPROJ);
}

#[tokio::test]
async fn cer_and_key_without_password_import_unprotected_p12() {
    let ws = Workspace::new();
    let cer = ws.path("certs/dist.cer");
    let key = ws.path("certs/dist.key");
    std::fs::create_dir_all(cer.parent().unwrap()).unwrap();
    std::fs::write(&cer, b"cer").unwrap();
    std::fs::write(&key, b"key").unwrap();

    let mut config = ws.config(ws.profile_file("com.example.app"));
    config.certificate = Some(CertificateSource::CerKey {
        cer_url: cer.display().to_string(),
        key_url: key.display().to_string(),
        password: None,
    });

    let tools = RecordingTools::default();
    Orchestrator::new(&config, &tools)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(
        tools.calls(),
        vec![
            "prepare",
            "package password=<none>",
            "import certificate.p12 password=<none>",
            "partition",
            "find",
        ]
    );
}

#[tokio::test]
async fn repeated_runs_leave_identical_files() {
    let ws = Workspace::new();
    let config = ws.config(ws.profile_file("com.acme.app"));
    let outputs = [
        "ios/Flutter/Release.xcconfig",
        "ios/Runner.xcodeproj/project.pbxproj",
        "ios/ExportOptions.plist",
        "signing.env",
    ];

    let tools = RecordingTools::default();
    Orchestrator::new(&config, &tools)
        .unwrap()
        .run()
        .await
        .unwrap();
    let first: Vec<String> = outputs.iter().map(|p| ws.read(p)).collect();

    ws.profile_file("com.acme.app");
    Orchestrator::new(&config, &tools)
        .unwrap()
        .run()
        .await
        .unwrap();
    let second: Vec<String> = outputs.iter().map(|p| ws.read(p)).collect();

    assert_eq!(first, second);
}

#[tokio::test]
async fn missing_profile_skips_signing_successfully() {
    let ws = Workspace::new();
    let mut config = ws.config(String::new());
    config.profile_url = None;

    let tools = RecordingTools::default();
    let report = Orchestrator::new(&config, &tools)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(report.skipped());
    assert!(tools.calls().is_empty());
    assert!(!ws.path("ios/Flutter/Release.xcconfig").exists());
    assert!(ws.read("signing.env").contains("SIGNING_SKIPPED=\"1\""));
}
