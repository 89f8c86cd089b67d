//! Control-plane catalog access
//!
//! The control plane is the gateway's REST administration interface. It owns
//! partners, accounts, rules, credentials, authorities and the address
//! override table. This module exposes it through the small [`Catalog`]
//! trait so the protocol clients do not care whether records come from the
//! REST API ([`RestCatalog`]) or from memory ([`MemoryCatalog`]).

pub mod address;
pub mod credentials;
pub mod memory;
pub mod model;
pub mod rest;

pub use address::resolve_real_address;
pub use credentials::{fetch_credentials, get_password};
pub use memory::MemoryCatalog;
pub use model::{Authority, Credential, CredentialType, Direction, Partner, RemoteAccount, Rule};
pub use rest::RestCatalog;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Result type for control-plane fetches
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Errors returned by control-plane fetches
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request exceeded the per-request timeout
    #[error("GET {resource}: request timed out")]
    Timeout { resource: String },

    /// The resource does not exist
    #[error("GET {resource}: not found: {message}")]
    NotFound { resource: String, message: String },

    /// The capability behind this resource is not implemented by the deployment
    #[error("GET {resource}: not implemented")]
    NotImplemented { resource: String },

    /// Any other unexpected HTTP status
    #[error("GET {resource}: unexpected response ({status}): {message}")]
    Status {
        resource: String,
        status: u16,
        message: String,
    },

    /// The request could not be sent (refused, DNS, TLS...)
    #[error("GET {resource}: {source}")]
    Transport {
        resource: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The body was not the expected JSON object
    #[error("GET {resource}: invalid JSON response object: {source}")]
    Decode {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    /// The control-plane base address could not be joined with a resource path
    #[error("invalid control-plane URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, FetchError::NotImplemented { .. })
    }

    /// The resource path this error concerns
    pub fn resource(&self) -> &str {
        match self {
            FetchError::Timeout { resource }
            | FetchError::NotFound { resource, .. }
            | FetchError::NotImplemented { resource }
            | FetchError::Status { resource, .. }
            | FetchError::Transport { resource, .. }
            | FetchError::Decode { resource, .. } => resource,
            FetchError::InvalidUrl { url, .. } => url,
        }
    }
}

/// Read-only access to the control-plane catalog
///
/// Implementations must be usable from several clients at once; each call is
/// an independent blocking request.
pub trait Catalog: Send + Sync {
    /// Fetch the raw body of a resource
    ///
    /// `path` is an absolute resource path such as `/api/partners/foo`.
    fn get(&self, path: &str) -> FetchResult<Vec<u8>>;

    /// Fetch a resource and decode it as JSON
    fn get_json<T: DeserializeOwned>(&self, path: &str) -> FetchResult<T>
    where
        Self: Sized,
    {
        decode(path, &self.get(path)?)
    }
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn get(&self, path: &str) -> FetchResult<Vec<u8>> {
        (**self).get(path)
    }
}

impl<C: Catalog + ?Sized> Catalog for Box<C> {
    fn get(&self, path: &str) -> FetchResult<Vec<u8>> {
        (**self).get(path)
    }
}

/// Decode a JSON body fetched from `path`
pub fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> FetchResult<T> {
    serde_json::from_slice(body).map_err(|source| FetchError::Decode {
        resource: path.to_string(),
        source,
    })
}

/// Fetch and decode through a `dyn Catalog`
pub fn fetch_json<T: DeserializeOwned>(catalog: &dyn Catalog, path: &str) -> FetchResult<T> {
    decode(path, &catalog.get(path)?)
}

// Path segment escaping: everything that is not unreserved.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

fn seg(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

/// Resource paths of the control-plane REST interface
pub mod paths {
    use super::{seg, Direction};

    pub const AUTHORITIES: &str = "/api/authorities";
    pub const ADDRESS_OVERRIDES: &str = "/api/override/addresses";

    pub fn partner(partner: &str) -> String {
        format!("/api/partners/{}", seg(partner))
    }

    pub fn account(partner: &str, login: &str) -> String {
        format!("/api/partners/{}/accounts/{}", seg(partner), seg(login))
    }

    pub fn rule(rule: &str, direction: Direction) -> String {
        format!("/api/rules/{}/{}", seg(rule), direction)
    }

    pub fn partner_credentials(partner: &str) -> String {
        format!("/api/partners/{}/credentials", seg(partner))
    }

    pub fn account_credentials(partner: &str, login: &str) -> String {
        format!(
            "/api/partners/{}/accounts/{}/credentials",
            seg(partner),
            seg(login)
        )
    }

    /// Join a collection path with an escaped item name
    pub fn item(collection: &str, name: &str) -> String {
        format!("{}/{}", collection.trim_end_matches('/'), seg(name))
    }
}

/// Fetch a partner record by name
pub fn fetch_partner(catalog: &dyn Catalog, name: &str) -> FetchResult<Partner> {
    fetch_json(catalog, &paths::partner(name))
}

/// Fetch a remote account record
pub fn fetch_account(catalog: &dyn Catalog, partner: &str, login: &str) -> FetchResult<RemoteAccount> {
    fetch_json(catalog, &paths::account(partner, login))
}

/// Fetch a rule record by name and direction
pub fn fetch_rule(catalog: &dyn Catalog, name: &str, direction: Direction) -> FetchResult<Rule> {
    fetch_json(catalog, &paths::rule(name, direction))
}

/// Fetch the trust authorities
///
/// Deployments without authority support answer 404 or 501; both mean
/// "no authorities" rather than a failure.
pub fn fetch_authorities(catalog: &dyn Catalog) -> FetchResult<Vec<Authority>> {
    match fetch_json(catalog, paths::AUTHORITIES) {
        Ok(authorities) => Ok(authorities),
        Err(e) if e.is_not_found() || e.is_not_implemented() => {
            tracing::debug!("No trust authorities available: {}", e);
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}
