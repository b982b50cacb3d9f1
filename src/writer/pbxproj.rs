//! Scoped signing settings in `project.pbxproj`
//!
//! Only the app target is signed manually. Every other native target
//! (unit tests, extensions, Pods frameworks) is switched to automatic
//! signing with code signing disabled, so no third-party framework ever
//! asks for the app's profile or identity.

use super::atomic_write;
use super::openstep::{self, Entry, Node, render_string};
use crate::error::{Result, SigningError};
use crate::resolver::ResolvedSigningConfig;
use std::collections::BTreeMap;
use std::path::Path;

const APPLICATION_PRODUCT_TYPE: &str = "com.apple.product-type.application";
pub(crate) const SDK_IDENTITY_KEY: &str = "CODE_SIGN_IDENTITY[sdk=iphoneos*]";

/// A `PBXNativeTarget` and the build configurations it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTarget {
    pub id: String,
    pub name: String,
    pub product_type: Option<String>,
    /// Object ids of its `XCBuildConfiguration`s
    pub configurations: Vec<String>,
}

impl NativeTarget {
    #[must_use]
    pub fn is_application(&self) -> bool {
        self.product_type.as_deref() == Some(APPLICATION_PRODUCT_TYPE)
    }
}

/// What [`apply_signing`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectEdit {
    pub content: String,
    pub app_target: Option<String>,
    pub dependency_targets: Vec<String>,
    pub configurations_touched: usize,
}

/// Whether the project must contain the app target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectRole {
    /// The app's own project; the app target must exist
    App,
    /// A dependency project (Pods); every target is a dependency
    Dependencies,
}

fn project_error(path: &Path, message: impl std::fmt::Display) -> SigningError {
    SigningError::Project(format!("{}: {message}", path.display()))
}

/// List the native targets in a parsed project.
#[must_use]
pub fn native_targets(root: &Node) -> Vec<NativeTarget> {
    let Some(objects) = root.get("objects") else {
        return Vec::new();
    };
    let Some(entries) = objects.entries() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter(|e| e.value.get_str("isa") == Some("PBXNativeTarget"))
        .map(|e| {
            let configurations = e
                .value
                .get_str("buildConfigurationList")
                .and_then(|list_id| objects.get(list_id))
                .and_then(|list| list.get("buildConfigurations"))
                .and_then(Node::items)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Node::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            NativeTarget {
                id: e.key.clone(),
                name: e.value.get_str("name").unwrap_or(&e.key).to_string(),
                product_type: e.value.get_str("productType").map(str::to_string),
                configurations,
            }
        })
        .collect()
}

/// Pick the app target: the one named `preferred`, else the first application target.
#[must_use]
pub fn find_app_target<'a>(
    targets: &'a [NativeTarget],
    preferred: &str,
) -> Option<&'a NativeTarget> {
    targets
        .iter()
        .find(|t| t.name == preferred)
        .or_else(|| targets.iter().find(|t| t.is_application()))
}

/// Settings for the app target's configurations.
fn app_settings(config: &ResolvedSigningConfig, existing: &[Entry]) -> BTreeMap<String, String> {
    let mut settings = BTreeMap::from([
        ("CODE_SIGN_STYLE".to_string(), "Manual".to_string()),
        ("DEVELOPMENT_TEAM".to_string(), config.team_id.clone()),
        (
            "PROVISIONING_PROFILE_SPECIFIER".to_string(),
            config.profile_uuid.clone(),
        ),
        (
            "CODE_SIGN_IDENTITY".to_string(),
            config.cert_identity_name.clone(),
        ),
        (
            "PRODUCT_BUNDLE_IDENTIFIER".to_string(),
            config.bundle_id.clone(),
        ),
    ]);

    // An sdk-conditional identity would otherwise win over CODE_SIGN_IDENTITY.
    if existing.iter().any(|e| e.key == SDK_IDENTITY_KEY) {
        settings.insert(SDK_IDENTITY_KEY.to_string(), config.cert_identity_name.clone());
    }

    settings
}

/// Settings for every non-app target's configurations.
fn dependency_settings() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("CODE_SIGN_STYLE".to_string(), "Automatic".to_string()),
        ("CODE_SIGNING_ALLOWED".to_string(), "NO".to_string()),
        ("CODE_SIGNING_REQUIRED".to_string(), "NO".to_string()),
        ("PROVISIONING_PROFILE_SPECIFIER".to_string(), String::new()),
    ])
}

/// A text edit: replace `range` of the source with `text`.
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Leading whitespace of the line containing `pos`.
fn indent_at(src: &str, pos: usize) -> &str {
    let line_start = src[..pos].rfind('\n').map_or(0, |i| i + 1);
    let line = &src[line_start..pos];
    &line[..line.len() - line.trim_start().len()]
}

/// Edits that make `settings` hold in the `buildSettings` dictionary `dict`.
///
/// Existing keys get their value replaced; new keys are inserted in sorted
/// position on their own line with the dictionary's indentation.
fn settings_edits(
    src: &str,
    dict: &Node,
    settings: &BTreeMap<String, String>,
    edits: &mut Vec<Edit>,
) {
    let Node::Dict { entries, span } = dict else {
        return;
    };

    let indent = match entries.first() {
        Some(first) => indent_at(src, first.key_span.start).to_string(),
        None => format!("{}\t", indent_at(src, span.end - 1)),
    };

    for (key, value) in settings {
        let rendered = render_string(value);

        if let Some(entry) = entries.iter().rev().find(|e| &e.key == key) {
            let value_span = entry.value.span();
            edits.push(Edit {
                start: value_span.start,
                end: value_span.end,
                text: rendered,
            });
            continue;
        }

        let line = format!("{} = {};", render_string(key), rendered);
        match entries.iter().find(|e| e.key.as_str() > key.as_str()) {
            Some(next) => {
                let at = next.key_span.start - indent_at(src, next.key_span.start).len();
                edits.push(Edit {
                    start: at,
                    end: at,
                    text: format!("{indent}{line}\n"),
                });
            }
            None => {
                let at = entries.last().map_or(span.start + 1, |e| e.span.end);
                edits.push(Edit {
                    start: at,
                    end: at,
                    text: format!("\n{indent}{line}"),
                });
            }
        }
    }
}

fn apply_edits(src: &str, mut edits: Vec<Edit>) -> String {
    // Stable sort keeps same-position inserts in key order.
    edits.sort_by_key(|e| e.start);

    let mut out = String::with_capacity(src.len() + edits.len() * 48);
    let mut cursor = 0;
    for edit in edits {
        out.push_str(&src[cursor..edit.start]);
        out.push_str(&edit.text);
        cursor = edit.end;
    }
    out.push_str(&src[cursor..]);
    out
}

/// Rewrite the signing settings of every native target in `src`.
pub fn apply_signing(
    path: &Path,
    src: &str,
    config: &ResolvedSigningConfig,
    app_target: &str,
    role: ProjectRole,
) -> Result<ProjectEdit> {
    let root = openstep::parse(src).map_err(|e| project_error(path, e))?;
    let objects = root
        .get("objects")
        .ok_or_else(|| project_error(path, "no 'objects' dictionary"))?;

    let targets = native_targets(&root);
    let app = match role {
        ProjectRole::App => Some(find_app_target(&targets, app_target).ok_or_else(|| {
            project_error(
                path,
                format!("no native target named '{app_target}' and no application target"),
            )
        })?),
        ProjectRole::Dependencies => None,
    };

    let mut edits = Vec::new();
    let mut report = ProjectEdit {
        app_target: app.map(|t| t.name.clone()),
        ..Default::default()
    };

    for target in &targets {
        let is_app = app.is_some_and(|a| a.id == target.id);
        if !is_app {
            report.dependency_targets.push(target.name.clone());
        }

        for config_id in &target.configurations {
            let Some(build_settings) = objects.get(config_id).and_then(|c| c.get("buildSettings"))
            else {
                return Err(project_error(
                    path,
                    format!(
                        "build configuration {config_id} of target '{}' has no buildSettings",
                        target.name
                    ),
                ));
            };

            let settings = if is_app {
                app_settings(config, build_settings.entries().unwrap_or_default())
            } else {
                dependency_settings()
            };
            settings_edits(src, build_settings, &settings, &mut edits);
            report.configurations_touched += 1;
        }
    }

    report.content = apply_edits(src, edits);
    Ok(report)
}

/// Apply signing settings to the project file at `path` in place.
pub async fn write_project(
    path: &Path,
    config: &ResolvedSigningConfig,
    app_target: &str,
    role: ProjectRole,
) -> Result<ProjectEdit> {
    let src = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| project_error(path, format!("cannot read project: {e}")))?;

    let edit = apply_signing(path, &src, config, app_target, role)?;
    if edit.content != src {
        atomic_write(path, edit.content.as_bytes()).await?;
    }
    Ok(edit)
}
