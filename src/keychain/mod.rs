//! Certificate and keychain operations
//!
//! This module provides functionality for:
//! - Packaging a CER+KEY pair into a P12 bundle
//! - Importing P12 bundles into a signing keychain
//! - Verifying that a distribution identity is present afterwards

mod installer;
mod tools;
mod validation;

pub use installer::{LocalCertificate, SigningIdentity, install_certificate};
pub use tools::{KeychainTools, SecurityTools};
pub use validation::{
    DISTRIBUTION_PREFIXES, distribution_identities, identity_output_text, parse_identity_names,
};

#[cfg(test)]
pub(crate) use installer::tests::{DEV_ONLY, FakeTools, ONE_IDENTITY, TWO_TEAMS};
