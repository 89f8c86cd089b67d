//! Per-connection transfer context
//!
//! Everything a client needs before it can dial a partner, resolved once per
//! connect attempt and dropped afterwards.

use crate::catalog::{
    fetch_credentials, paths, resolve_real_address, Catalog, Credential, Partner, RemoteAccount,
};
use crate::client::{ClientError, ClientResult};
use serde::de::DeserializeOwned;

/// Resolved partner/account material for one connection attempt
///
/// `C` is the protocol-specific partner configuration parsed from the
/// partner's `protoConfig`.
#[derive(Debug)]
pub struct TransferContext<C> {
    pub partner_creds: Vec<Credential>,
    pub account_creds: Vec<Credential>,
    /// Address to dial, after override resolution
    pub real_address: String,
    pub proto_config: C,
}

impl<C> TransferContext<C>
where
    C: DeserializeOwned + Default,
{
    /// Resolve the context for `account` on `partner`
    ///
    /// A missing or null `protoConfig` yields `C::default()`; a malformed one is
    /// a configuration error.
    pub fn resolve(
        catalog: &dyn Catalog,
        partner: &Partner,
        account: &RemoteAccount,
    ) -> ClientResult<Self> {
        let proto_config = parse_proto_config::<C>(partner)?;

        let partner_creds = fetch_credentials(
            catalog,
            &partner.credentials,
            &paths::partner_credentials(&partner.name),
        )
        .map_err(|(fetched, source)| ClientError::PartialCredentials {
            what: format!("partner {} credentials", partner.name),
            fetched,
            source,
        })?;

        let account_creds = fetch_credentials(
            catalog,
            &account.credentials,
            &paths::account_credentials(&partner.name, &account.login),
        )
        .map_err(|(fetched, source)| ClientError::PartialCredentials {
            what: format!("account {} credentials", account.login),
            fetched,
            source,
        })?;

        let real_address = resolve_real_address(catalog, &partner.address).map_err(|source| {
            ClientError::Catalog {
                what: format!("real address of partner {}", partner.name),
                source,
            }
        })?;

        tracing::debug!(
            partner = %partner.name,
            account = %account.login,
            address = %real_address,
            "Resolved transfer context ({} partner, {} account credentials)",
            partner_creds.len(),
            account_creds.len()
        );

        Ok(Self {
            partner_creds,
            account_creds,
            real_address,
            proto_config,
        })
    }
}

/// Parse a partner's protocol configuration
pub fn parse_proto_config<C>(partner: &Partner) -> ClientResult<C>
where
    C: DeserializeOwned + Default,
{
    match &partner.proto_config {
        None | Some(serde_json::Value::Null) => Ok(C::default()),
        Some(value) => C::deserialize(value).map_err(|e| {
            ClientError::config(
                &partner.protocol,
                format!("partner {}: {}", partner.name, e),
            )
        }),
    }
}
