//! Address override resolution
//!
//! The control plane may map a partner's nominal address to the address that
//! must actually be dialed. A deployment without override support answers
//! "not implemented", which is a normal state, not an error.

use super::{fetch_json, paths, Catalog, FetchResult};
use std::collections::HashMap;

/// Resolve the address to dial for `nominal`
///
/// Falls back to `nominal` when the override capability is absent, when the
/// table has no entry for it, or when the entry is empty.
pub fn resolve_real_address(catalog: &dyn Catalog, nominal: &str) -> FetchResult<String> {
    let overrides: HashMap<String, String> = match fetch_json(catalog, paths::ADDRESS_OVERRIDES) {
        Ok(table) => table,
        Err(e) if e.is_not_implemented() => {
            tracing::debug!("Address overrides not supported, using {}", nominal);
            return Ok(nominal.to_string());
        }
        Err(e) => return Err(e),
    };

    match overrides.get(nominal) {
        Some(real) if !real.is_empty() => {
            tracing::debug!("Address {} overridden by {}", nominal, real);
            Ok(real.clone())
        }
        _ => Ok(nominal.to_string()),
    }
}

/// Split `host:port` and return the host part
///
/// Bracketed IPv6 literals lose their brackets. An address without a port is
/// returned unchanged.
pub fn host_of(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match address.rsplit_once(':') {
        // Bare IPv6 without brackets has several colons and no port.
        Some((host, _)) if !host.contains(':') => host,
        _ => address,
    }
}
