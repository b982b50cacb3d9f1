//! Provisioning profile handling
//!
//! - `fetch` - Download or copy profiles and certificates
//! - `decode` - Open the CMS envelope and parse the property list
//! - `fields` - Two-tier extraction of UUID, team id and app id
//! - `install` - Copy the profile into Xcode's profile directory

mod decode;
mod fetch;
pub mod fields;
mod install;

pub use decode::{
    ProfileKind, SigningProfile, decode_container, decode_profile, extract_embedded_plist,
    parse_profile,
};
pub use fetch::{FetchSource, Fetcher, expand_tilde_path};
pub use install::install_profile;

#[cfg(test)]
pub(crate) use decode::tests::{fake_envelope, profile_xml};
