//! OpenID Connect key-set discovery.
//!
//! When an authentication provider omits its `jwks_uri`, the builder looks
//! the key-set location up from the issuer's OpenID Connect discovery
//! document. This is the single blocking network call in the compiler; a
//! failure aborts the whole compilation because the provider cannot be
//! configured without it.

use std::time::Duration;

use serde::Deserialize;

use crate::errors::{Error, Result};

/// Resolves an issuer to its JWKS URI.
///
/// Implemented over the network by [`OpenIdDiscovery`]; tests inject stubs.
pub trait KeySetResolver {
    fn jwks_uri(&self, issuer: &str) -> Result<String>;
}

/// Discovery document fields we care about.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: Option<String>,
}

/// Network-backed resolver using the issuer's well-known discovery document.
pub struct OpenIdDiscovery {
    client: reqwest::blocking::Client,
}

impl OpenIdDiscovery {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::discovery("-", format!("failed to build client: {}", err)))?;
        Ok(Self { client })
    }

    fn discovery_url(issuer: &str) -> String {
        format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'))
    }
}

impl KeySetResolver for OpenIdDiscovery {
    fn jwks_uri(&self, issuer: &str) -> Result<String> {
        let url = Self::discovery_url(issuer);
        tracing::debug!(issuer, url = %url, "discovering key-set location");

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| Error::discovery(issuer, err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::discovery(
                issuer,
                format!("discovery document fetch returned {}", response.status()),
            ));
        }

        let document: DiscoveryDocument = response
            .json()
            .map_err(|err| Error::discovery(issuer, format!("invalid discovery document: {}", err)))?;

        document
            .jwks_uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| Error::discovery(issuer, "discovery document has no jwks_uri"))
    }
}

/// Resolver that refuses every lookup.
///
/// Used by [`crate::compile`] via discovery only when a provider actually
/// needs it; descriptions with explicit `jwks_uri` values never hit the
/// resolver at all.
pub struct NoDiscovery;

impl KeySetResolver for NoDiscovery {
    fn jwks_uri(&self, issuer: &str) -> Result<String> {
        Err(Error::discovery(issuer, "key-set discovery is disabled"))
    }
}
