//! TLS client configuration builder
//!
//! Turns partner/account credentials and trust authorities into a rustls
//! [`ClientConfig`]. Trust is the system store plus the authorities valid for
//! the target host plus the partner's trusted certificates. A client
//! certificate is attached from the account's TLS certificate credential.

use crate::catalog::{credentials::of_type, Authority, Credential, CredentialType};
use crate::client::{ClientError, ClientResult};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Minimum TLS protocol version accepted on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "v1.0")]
    V10,
    #[serde(rename = "v1.1")]
    V11,
    #[default]
    #[serde(rename = "v1.2")]
    V12,
    #[serde(rename = "v1.3")]
    V13,
}

static TLS12_AND_UP: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13, &rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

impl TlsVersion {
    /// Protocol versions rustls may negotiate under this minimum
    ///
    /// rustls implements neither TLS 1.0 nor 1.1, so those minimums behave
    /// like 1.2.
    pub fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            TlsVersion::V10 | TlsVersion::V11 => {
                tracing::debug!("TLS minimum {:?} raised to TLS 1.2", self);
                TLS12_AND_UP
            }
            TlsVersion::V12 => TLS12_AND_UP,
            TlsVersion::V13 => TLS13_ONLY,
        }
    }
}

/// Server name used for SNI and certificate verification
pub fn server_name(host: &str) -> ClientResult<ServerName<'static>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }
    ServerName::try_from(host.to_string())
        .map_err(|e| ClientError::Tls(format!("invalid server name '{}': {}", host, e)))
}

fn parse_pem_certs(pem: &str) -> std::io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut pem.as_bytes()).collect()
}

/// Trust anchors added on top of the system store for `host`
///
/// Every certificate of an authority valid for `host`, and the first
/// certificate of each partner credential of type "trusted TLS certificate".
pub fn extra_roots(
    host: &str,
    partner_creds: &[Credential],
    authorities: &[Authority],
) -> ClientResult<Vec<CertificateDer<'static>>> {
    let mut roots = Vec::new();

    for authority in authorities.iter().filter(|a| a.is_valid_for(host)) {
        let certs = parse_pem_certs(&authority.public_identity).map_err(|e| {
            ClientError::Tls(format!(
                "failed to parse authority {} certificate: {}",
                authority.name, e
            ))
        })?;
        tracing::debug!("Trusting authority {} for {}", authority.name, host);
        roots.extend(certs);
    }

    for cred in of_type(partner_creds, &CredentialType::TrustedTlsCertificate) {
        let chain = parse_pem_certs(&cred.value).map_err(|e| {
            ClientError::Tls(format!(
                "failed to parse the certification chain {}: {}",
                cred.name, e
            ))
        })?;
        match chain.into_iter().next() {
            Some(cert) => roots.push(cert),
            None => {
                return Err(ClientError::Tls(format!(
                    "trusted certificate {} contains no certificate",
                    cred.name
                )))
            }
        }
    }

    Ok(roots)
}

fn parse_key_pair(
    cred: &Credential,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), String> {
    let chain = parse_pem_certs(&cred.value).map_err(|e| e.to_string())?;
    if chain.is_empty() {
        return Err("no certificate found".to_string());
    }
    let key = rustls_pemfile::private_key(&mut cred.value2.as_bytes())
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "no private key found".to_string())?;
    Ok((chain, key))
}

/// Client certificate to present, from the account's TLS certificates
///
/// The first credential whose certificate and key both parse is used.
/// Credentials that do not parse are skipped with a warning.
pub fn client_identity(
    account_creds: &[Credential],
) -> Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    for cred in of_type(account_creds, &CredentialType::TlsCertificate) {
        match parse_key_pair(cred) {
            Ok(identity) => {
                tracing::debug!("Using client certificate {}", cred.name);
                return Some(identity);
            }
            Err(e) => tracing::warn!("Failed to parse TLS certificate {:?}: {}", cred.name, e),
        }
    }
    None
}

/// Build a TLS client configuration for `host`
///
/// `host` is the host part of the dialed address; it is the name the server
/// certificate must match.
pub fn build_client_config(
    host: &str,
    min_version: TlsVersion,
    partner_creds: &[Credential],
    account_creds: &[Credential],
    authorities: &[Authority],
) -> ClientResult<ClientConfig> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::debug!("Skipping system certificate: {}", err);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::trace!("Loaded {} system roots ({} ignored)", added, ignored);

    for cert in extra_roots(host, partner_creds, authorities)? {
        roots
            .add(cert)
            .map_err(|e| ClientError::Tls(format!("invalid trust anchor: {}", e)))?;
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(min_version.protocol_versions())
        .map_err(|e| ClientError::Tls(e.to_string()))?
        .with_root_certificates(roots);

    let config = match client_identity(account_creds) {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| ClientError::Tls(format!("invalid client certificate: {}", e)))?,
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}
