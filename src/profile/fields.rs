//! Two-tier field extraction from a decoded provisioning profile
//!
//! Tier one walks the parsed property list along a primary path. When that
//! yields nothing (or an empty string), tier two scans the decoded XML text
//! for an alternate key, the way `grep -A1 '<key>…</key>'` would. Only when
//! both tiers come back empty is the field reported missing.

use crate::error::{Result, SigningError};
use plist::Value;

/// One step of a property path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment {
    Key(&'static str),
    Index(usize),
}

/// A field read from the profile, with both extraction tiers.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub primary: &'static [PathSegment],
    pub fallback_key: &'static str,
}

pub const UUID_FIELD: FieldSpec = FieldSpec {
    name: "uuid",
    primary: &[PathSegment::Key("UUID")],
    fallback_key: "UUID",
};

pub const TEAM_ID_FIELD: FieldSpec = FieldSpec {
    name: "team identifier",
    primary: &[PathSegment::Key("TeamIdentifier"), PathSegment::Index(0)],
    fallback_key: "com.apple.developer.team-identifier",
};

pub const APP_ID_FIELD: FieldSpec = FieldSpec {
    name: "application identifier",
    primary: &[
        PathSegment::Key("Entitlements"),
        PathSegment::Key("application-identifier"),
    ],
    fallback_key: "com.apple.application-identifier",
};

/// Which tier produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTier {
    Structured,
    TextScan,
}

impl FieldSpec {
    /// Render the primary path the way PlistBuddy would (`:A:B:0`).
    #[must_use]
    pub fn primary_display(&self) -> String {
        self.primary
            .iter()
            .map(|seg| match seg {
                PathSegment::Key(k) => format!(":{k}"),
                PathSegment::Index(i) => format!(":{i}"),
            })
            .collect()
    }

    /// Run both tiers; `MissingField` if neither yields a non-empty string.
    pub fn extract(&self, root: &Value, xml: &str) -> Result<(String, ExtractionTier)> {
        if let Some(value) = structured_lookup(root, self.primary) {
            return Ok((value, ExtractionTier::Structured));
        }

        if let Some(value) = text_scan(xml, self.fallback_key) {
            return Ok((value, ExtractionTier::TextScan));
        }

        Err(SigningError::MissingField {
            field: self.name,
            primary: self.primary_display(),
            fallback: self.fallback_key.to_string(),
        })
    }
}

/// Tier one: walk the property list. Strings are returned trimmed; empty
/// strings and non-string leaves count as absent.
pub fn structured_lookup(root: &Value, path: &[PathSegment]) -> Option<String> {
    let mut current = root;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Key(k), Value::Dictionary(dict)) => dict.get(k)?,
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
            // A scalar where an array was expected: treat as the only element.
            (PathSegment::Index(0), other @ Value::String(_)) => other,
            _ => return None,
        };
    }

    current
        .as_string()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Tier two: find `<key>KEY</key>` and return the first `<string>` that
/// follows it, looking through an intervening `<array>` if present.
pub fn text_scan(xml: &str, key: &str) -> Option<String> {
    let needle = format!("<key>{key}</key>");
    let after_key = &xml[xml.find(&needle)? + needle.len()..];

    // The value must belong to this key, not to a later one.
    let next_key = after_key.find("<key>").unwrap_or(after_key.len());
    let scope = &after_key[..next_key];

    let start = scope.find("<string>")? + "<string>".len();
    let end = scope[start..].find("</string>")?;
    let value = unescape_xml(scope[start..start + end].trim());

    if value.is_empty() { None } else { Some(value) }
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Bundle identifier embedded in an application identifier: everything
/// after the first `.` (the part before it is the team prefix).
#[must_use]
pub fn bundle_id_from_app_id(app_id: &str) -> Option<&str> {
    app_id
        .split_once('.')
        .map(|(_, rest)| rest)
        .filter(|rest| !rest.is_empty())
}
