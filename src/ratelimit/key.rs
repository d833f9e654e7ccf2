//! Caller identity and rate key derivation.

use std::fmt;

use crate::error::{Result, TollgateError};

/// What the upstream middleware knows about an inbound request.
///
/// The principal id and privilege flag come from the authentication step;
/// the network address is always expected to be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Stable id of the authenticated principal, if any
    pub principal_id: Option<String>,
    /// Network address of the caller
    pub address: Option<String>,
    /// Whether the authenticated principal is privileged
    pub privileged: bool,
}

impl RequestContext {
    /// Context for an anonymous caller at the given address.
    pub fn from_address(address: impl Into<String>) -> Self {
        Self {
            principal_id: None,
            address: Some(address.into()),
            privileged: false,
        }
    }

    /// Attach an authenticated principal.
    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    /// Mark the caller as privileged.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }
}

/// Identity used to bucket counters and violation records.
///
/// Unauthenticated callers behind the same address share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateKey(String);

impl RateKey {
    /// Key for an authenticated principal.
    pub fn user(principal_id: &str) -> Self {
        Self(format!("user:{}", principal_id))
    }

    /// Key for an address.
    pub fn ip(address: &str) -> Self {
        Self(format!("ip:{}", address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the key for a request: the principal when known, else the address.
    ///
    /// A missing address is an error even when a principal is known.
    pub fn resolve(ctx: &RequestContext) -> Result<Self> {
        let address = ctx
            .address
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or(TollgateError::MissingAddress)?;

        match ctx.principal_id.as_deref().filter(|p| !p.is_empty()) {
            Some(principal) => Ok(Self::user(principal)),
            None => Ok(Self::ip(address)),
        }
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
