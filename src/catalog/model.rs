//! Control-plane records consumed by the remote clients
//!
//! These mirror the JSON bodies served by the gateway's REST administration
//! interface. Only the fields needed to connect and list are kept.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote file-transfer endpoint known to the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partner {
    /// Partner name
    pub name: String,

    /// Protocol identifier ("ftp", "ftps", "sftp", "r66", "r66-tls", "webdav", "webdavs")
    pub protocol: String,

    /// Nominal network address (host:port)
    pub address: String,

    /// Protocol-specific configuration, opaque until parsed by a client
    #[serde(default)]
    pub proto_config: Option<serde_json::Value>,

    /// Names of the credentials attached to this partner
    #[serde(default)]
    pub credentials: Vec<String>,
}

/// A login scoped to one partner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAccount {
    pub login: String,

    #[serde(default)]
    pub credentials: Vec<String>,
}

/// Transfer direction of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    #[default]
    Receive,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Receive => "receive",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "send" => Ok(Direction::Send),
            "receive" | "recv" => Ok(Direction::Receive),
            other => Err(format!("unknown rule direction '{}'", other)),
        }
    }
}

/// A named transfer policy anchoring a remote root directory
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,

    /// Remote root directory all listing patterns are relative to
    #[serde(default)]
    pub remote_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

/// Credential type tag
///
/// The tag alone decides how a credential's values may be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialType {
    #[serde(rename = "password")]
    Password,
    #[serde(rename = "tls_certificate")]
    TlsCertificate,
    #[serde(rename = "trusted_tls_certificate")]
    TrustedTlsCertificate,
    #[serde(rename = "ssh_public_key")]
    SshPublicKey,
    #[serde(rename = "ssh_private_key")]
    SshPrivateKey,
    #[serde(rename = "r66_legacy_certificate")]
    LegacyCertificate,
    /// Any tag this client does not know; never interpreted
    #[serde(untagged)]
    Other(String),
}

impl CredentialType {
    pub fn as_str(&self) -> &str {
        match self {
            CredentialType::Password => "password",
            CredentialType::TlsCertificate => "tls_certificate",
            CredentialType::TrustedTlsCertificate => "trusted_tls_certificate",
            CredentialType::SshPublicKey => "ssh_public_key",
            CredentialType::SshPrivateKey => "ssh_private_key",
            CredentialType::LegacyCertificate => "r66_legacy_certificate",
            CredentialType::Other(tag) => tag,
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed secret or public material attached to a partner or an account
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: CredentialType,

    /// Primary value (password, certificate chain, public/private key)
    #[serde(default)]
    pub value: String,

    /// Secondary value (the private key of a certificate)
    #[serde(default)]
    pub value2: String,
}

impl Credential {
    pub fn new(name: impl Into<String>, kind: CredentialType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            value: value.into(),
            value2: String::new(),
        }
    }

    /// Attach a secondary value
    pub fn with_value2(mut self, value2: impl Into<String>) -> Self {
        self.value2 = value2.into();
        self
    }

    pub fn is(&self, kind: &CredentialType) -> bool {
        &self.kind == kind
    }
}

// Values stay out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A named certificate trusted for a set of hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authority {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    /// PEM encoded certificate
    pub public_identity: String,

    /// Hosts this authority may vouch for; empty means every host
    #[serde(default)]
    pub valid_hosts: Vec<String>,
}

/// Authority type tag for TLS authorities
pub const AUTHORITY_TLS: &str = "tls_authority";

impl Authority {
    /// Whether this authority may be used to verify `host`
    pub fn is_valid_for(&self, host: &str) -> bool {
        self.kind == AUTHORITY_TLS
            && (self.valid_hosts.is_empty()
                || self.valid_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partner_from_json() {
        let json = r#"{
            "name": "remote1",
            "protocol": "sftp",
            "address": "10.0.0.1:22",
            "protoConfig": {"foo": 1},
            "credentials": ["hostkey"]
        }"#;
        let partner: Partner = serde_json::from_str(json).unwrap();
        assert_eq!(partner.name, "remote1");
        assert_eq!(partner.credentials, vec!["hostkey".to_string()]);
        assert!(partner.proto_config.is_some());
    }

    #[test]
    fn test_credential_type_tags() {
        let cred: Credential =
            serde_json::from_str(r#"{"name":"c","type":"trusted_tls_certificate","value":"x"}"#)
                .unwrap();
        assert_eq!(cred.kind, CredentialType::TrustedTlsCertificate);
        assert!(cred.value2.is_empty());

        let cred: Credential =
            serde_json::from_str(r#"{"name":"c","type":"pesit_pre-connection_auth","value":"x"}"#)
                .unwrap();
        assert_eq!(
            cred.kind,
            CredentialType::Other("pesit_pre-connection_auth".to_string())
        );
    }

    #[test]
    fn test_credential_debug_hides_values() {
        let cred = Credential::new("pwd", CredentialType::Password, "hunter2");
        assert!(!format!("{:?}", cred).contains("hunter2"));
    }

    #[test]
    fn test_authority_valid_hosts() {
        let mut auth = Authority {
            name: "ca".to_string(),
            kind: AUTHORITY_TLS.to_string(),
            public_identity: String::new(),
            valid_hosts: vec!["files.example.com".to_string()],
        };
        assert!(auth.is_valid_for("files.example.com"));
        assert!(!auth.is_valid_for("other.example.com"));

        auth.valid_hosts.clear();
        assert!(auth.is_valid_for("other.example.com"));

        auth.kind = "ssh_cert_authority".to_string();
        assert!(!auth.is_valid_for("other.example.com"));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("receive".parse::<Direction>().unwrap(), Direction::Receive);
        assert_eq!("SEND".parse::<Direction>().unwrap(), Direction::Send);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
