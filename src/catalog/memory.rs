//! In-memory catalog
//!
//! Serves canned control-plane resources without any network. Used by the
//! test suites and handy for dry runs against a fixed configuration.

use super::model::{Authority, Credential, Partner, RemoteAccount, Rule};
use super::{paths, Catalog, FetchError, FetchResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
enum Entry {
    Body(Vec<u8>),
    NotImplemented,
    Timeout,
}

/// Control-plane catalog backed by a map of resource path to body
///
/// # Example
///
/// ```
/// use gateway_remote::catalog::{Catalog, MemoryCatalog, Partner};
///
/// let catalog = MemoryCatalog::new();
/// catalog.add_partner(&Partner {
///     name: "remote".into(),
///     protocol: "sftp".into(),
///     address: "127.0.0.1:2222".into(),
///     proto_config: None,
///     credentials: vec![],
/// });
/// assert!(catalog.get("/api/partners/remote").is_ok());
/// ```
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw body at `path`
    pub fn insert_raw(&self, path: &str, body: Vec<u8>) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), Entry::Body(body));
    }

    /// Store a JSON-serialized value at `path`
    pub fn insert<T: Serialize>(&self, path: &str, value: &T) {
        // Serializing the catalog's own record types cannot fail.
        let body = serde_json::to_vec(value).unwrap_or_default();
        self.insert_raw(path, body);
    }

    /// Make `path` answer "not implemented"
    pub fn set_not_implemented(&self, path: &str) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), Entry::NotImplemented);
    }

    /// Make `path` answer with a timeout
    pub fn set_timeout(&self, path: &str) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), Entry::Timeout);
    }

    pub fn add_partner(&self, partner: &Partner) {
        self.insert(&paths::partner(&partner.name), partner);
    }

    pub fn add_account(&self, partner: &str, account: &RemoteAccount) {
        self.insert(&paths::account(partner, &account.login), account);
    }

    pub fn add_rule(&self, rule: &Rule) {
        let direction = rule.direction.unwrap_or_default();
        self.insert(&paths::rule(&rule.name, direction), rule);
    }

    pub fn add_partner_credential(&self, partner: &str, cred: &Credential) {
        let path = paths::item(&paths::partner_credentials(partner), &cred.name);
        self.insert(&path, cred);
    }

    pub fn add_account_credential(&self, partner: &str, login: &str, cred: &Credential) {
        let path = paths::item(&paths::account_credentials(partner, login), &cred.name);
        self.insert(&path, cred);
    }

    pub fn set_authorities(&self, authorities: &[Authority]) {
        self.insert(paths::AUTHORITIES, &authorities);
    }

    pub fn set_address_overrides(&self, overrides: &HashMap<String, String>) {
        self.insert(paths::ADDRESS_OVERRIDES, overrides);
    }
}

impl Catalog for MemoryCatalog {
    fn get(&self, path: &str) -> FetchResult<Vec<u8>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        match entries.get(path) {
            Some(Entry::Body(body)) => Ok(body.clone()),
            Some(Entry::NotImplemented) => Err(FetchError::NotImplemented {
                resource: path.to_string(),
            }),
            Some(Entry::Timeout) => Err(FetchError::Timeout {
                resource: path.to_string(),
            }),
            None => Err(FetchError::NotFound {
                resource: path.to_string(),
                message: "no such resource".to_string(),
            }),
        }
    }
}
