//! SFTP client
//!
//! The server must present one of the partner's configured host keys,
//! compared byte for byte. There is no known_hosts file, no CA trust and no
//! trust on first use.

use super::listing::{list_matching, DirLister, RemoteEntry};
use super::{ClientError, ClientResult, ConnectTarget, RemoteClient};
use crate::catalog::{credentials::of_type, get_password, Credential, CredentialType, Rule};
use crate::context::TransferContext;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ssh2::{MethodType, Session, Sftp};
use std::net::TcpStream;
use std::path::Path;

pub const PROTOCOL_SFTP: &str = "sftp";

const KEY_ALGO_RSA: &str = "ssh-rsa";
const CERT_ALGO_RSA: &str = "ssh-rsa-cert-v01@openssh.com";

/// SFTP partner configuration; no protocol-specific fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SftpPartnerConfig {}

/// A host key the server is allowed to present
#[derive(Clone, PartialEq, Eq)]
pub struct HostKey {
    /// Key type from the wire encoding ("ssh-ed25519", "ssh-rsa", ...)
    pub kind: String,
    /// Wire-encoded public key
    pub blob: Vec<u8>,
}

impl HostKey {
    /// OpenSSH style SHA256 fingerprint
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.blob)
    }
}

impl std::fmt::Debug for HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostKey({} {})", self.kind, self.fingerprint())
    }
}

fn fingerprint(blob: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(blob)))
}

/// Read the key type embedded at the start of a wire-encoded key
fn blob_key_type(blob: &[u8]) -> Option<&str> {
    let len = u32::from_be_bytes(blob.get(..4)?.try_into().ok()?) as usize;
    let end = len.checked_add(4)?;
    std::str::from_utf8(blob.get(4..end)?).ok()
}

/// Parse one authorized_keys style line (`[options] type base64 [comment]`)
pub fn parse_authorized_key(line: &str) -> Option<HostKey> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| {
        let blob = STANDARD.decode(pair[1]).ok()?;
        let kind = blob_key_type(&blob)?;
        (kind == pair[0]).then(|| HostKey {
            kind: kind.to_string(),
            blob: blob.clone(),
        })
    })
}

/// Host-key signature algorithms to offer for a key type
///
/// RSA keys prefer the SHA-2 signature schemes, which servers that disabled
/// SHA-1 still accept.
pub fn algorithms_for_key_type(kind: &str) -> Vec<String> {
    match kind {
        KEY_ALGO_RSA => vec![
            "rsa-sha2-256".to_string(),
            "rsa-sha2-512".to_string(),
            KEY_ALGO_RSA.to_string(),
        ],
        CERT_ALGO_RSA => vec![
            "rsa-sha2-256-cert-v01@openssh.com".to_string(),
            "rsa-sha2-512-cert-v01@openssh.com".to_string(),
            CERT_ALGO_RSA.to_string(),
        ],
        other => vec![other.to_string()],
    }
}

/// Host keys and algorithm preferences from the partner's SSH public keys
///
/// Unparsable keys are skipped. No usable key at all is an error.
pub fn parse_host_keys(partner_creds: &[Credential]) -> ClientResult<(Vec<HostKey>, Vec<String>)> {
    let mut keys = Vec::new();
    let mut algos: Vec<String> = Vec::new();

    for cred in of_type(partner_creds, &CredentialType::SshPublicKey) {
        let Some(key) = parse_authorized_key(&cred.value) else {
            tracing::warn!("Failed to parse the SFTP partner hostkey {:?}", cred.name);
            continue;
        };

        for algo in algorithms_for_key_type(&key.kind) {
            if !algos.contains(&algo) {
                algos.push(algo);
            }
        }
        keys.push(key);
    }

    if keys.is_empty() {
        return Err(ClientError::NoHostKey);
    }
    Ok((keys, algos))
}

/// Exact match of the presented key against the configured set
pub fn check_host_key(known: &[HostKey], presented: Option<&[u8]>) -> ClientResult<()> {
    let presented = presented.ok_or(ClientError::NoHostKey)?;
    if known.iter().any(|k| k.blob.as_slice() == presented) {
        Ok(())
    } else {
        tracing::error!("Server presented unknown host key {}", fingerprint(presented));
        Err(ClientError::HostKeyMismatch)
    }
}

struct SftpConnection {
    session: Session,
    sftp: Sftp,
}

/// SFTP implementation of [`RemoteClient`]
#[derive(Default)]
pub struct SftpClient {
    conn: Option<SftpConnection>,
}

impl SftpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(unix)]
fn auth_with_key(session: &Session, login: &str, cred: &Credential) -> Result<(), ssh2::Error> {
    session.userauth_pubkey_memory(login, None, &cred.value, None)
}

#[cfg(not(unix))]
fn auth_with_key(_session: &Session, _login: &str, _cred: &Credential) -> Result<(), ssh2::Error> {
    Err(ssh2::Error::new(
        ssh2::ErrorCode::Session(-19),
        "in-memory private keys are not supported on this platform",
    ))
}

/// Authenticate with every private key, then the password
fn authenticate(session: &Session, login: &str, account_creds: &[Credential]) -> ClientResult<()> {
    let mut tried = 0;

    for cred in of_type(account_creds, &CredentialType::SshPrivateKey) {
        tried += 1;
        match auth_with_key(session, login, cred) {
            Ok(()) if session.authenticated() => {
                tracing::debug!("Authenticated as {} with key {}", login, cred.name);
                return Ok(());
            }
            Ok(()) => {}
            Err(e) => tracing::debug!("Key {} rejected for {}: {}", cred.name, login, e),
        }
    }

    if let Some(password) = get_password(account_creds).filter(|p| !p.is_empty()) {
        tried += 1;
        match session.userauth_password(login, password) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => {}
            Err(e) => tracing::debug!("Password rejected for {}: {}", login, e),
        }
    }

    if tried == 0 {
        return Err(ClientError::auth(
            PROTOCOL_SFTP,
            format!("no authentication method available for {}", login),
        ));
    }
    Err(ClientError::auth(
        PROTOCOL_SFTP,
        format!("unable to authenticate as {}", login),
    ))
}

impl RemoteClient for SftpClient {
    fn connect(&mut self, target: &ConnectTarget<'_>) -> ClientResult<()> {
        let ctx = TransferContext::<SftpPartnerConfig>::resolve(
            target.catalog,
            target.partner,
            target.account,
        )?;
        let (host_keys, algos) = parse_host_keys(&ctx.partner_creds)?;
        let address = ctx.real_address.as_str();
        let login = target.account.login.as_str();

        let tcp = TcpStream::connect(address)
            .map_err(|e| ClientError::connection(PROTOCOL_SFTP, address, e))?;

        let mut session =
            Session::new().map_err(|e| ClientError::connection(PROTOCOL_SFTP, address, e))?;
        session.set_tcp_stream(tcp);

        if let Err(e) = session.method_pref(MethodType::HostKey, &algos.join(",")) {
            tracing::warn!("Host key algorithm preference {:?} refused: {}", algos, e);
        }

        session
            .handshake()
            .map_err(|e| ClientError::connection(PROTOCOL_SFTP, address, e))?;

        let teardown = |session: &Session| {
            let _ = session.disconnect(None, "closing", None);
        };

        if let Err(e) = check_host_key(&host_keys, session.host_key().map(|(blob, _)| blob)) {
            teardown(&session);
            return Err(e);
        }

        if let Err(e) = authenticate(&session, login, &ctx.account_creds) {
            tracing::error!("SFTP authentication on {} failed: {}", target.partner.name, e);
            teardown(&session);
            return Err(e);
        }

        let sftp = match session.sftp() {
            Ok(sftp) => sftp,
            Err(e) => {
                teardown(&session);
                return Err(ClientError::connection(
                    PROTOCOL_SFTP,
                    address,
                    format!("failed to start SFTP session: {}", e),
                ));
            }
        };

        tracing::info!(
            "Connected to sftp partner {} as {}",
            target.partner.name,
            login
        );
        self.conn = Some(SftpConnection { session, sftp });
        Ok(())
    }

    fn list(&mut self, rule: &Rule, pattern: &str) -> ClientResult<Vec<String>> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ClientError::not_connected(PROTOCOL_SFTP))?;
        list_matching(&mut SftpLister(&conn.sftp), rule, pattern)
    }

    fn close(&mut self) -> ClientResult<()> {
        if let Some(SftpConnection { session, sftp }) = self.conn.take() {
            drop(sftp);
            if let Err(e) = session.disconnect(None, "closing", None) {
                tracing::debug!("Error closing SSH session: {}", e);
            }
        }
        Ok(())
    }

    fn protocol(&self) -> &str {
        PROTOCOL_SFTP
    }
}

struct SftpLister<'a>(&'a Sftp);

impl DirLister for SftpLister<'_> {
    fn read_dir(&mut self, path: &str) -> ClientResult<Vec<RemoteEntry>> {
        let entries = self
            .0
            .readdir(Path::new(path))
            .map_err(|e| ClientError::ListFailed {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        Ok(entries
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_str()?.to_string();
                Some(RemoteEntry {
                    name,
                    is_dir: stat.is_dir(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_key(kind: &str, body: &[u8]) -> Vec<u8> {
        let mut blob = (kind.len() as u32).to_be_bytes().to_vec();
        blob.extend_from_slice(kind.as_bytes());
        blob.extend_from_slice(&(body.len() as u32).to_be_bytes());
        blob.extend_from_slice(body);
        blob
    }

    fn authorized_line(kind: &str, body: &[u8]) -> String {
        format!("{} {} host@example", kind, STANDARD.encode(wire_key(kind, body)))
    }

    #[test]
    fn test_parse_authorized_key() {
        let key = parse_authorized_key(&authorized_line("ssh-ed25519", &[7; 32])).unwrap();
        assert_eq!(key.kind, "ssh-ed25519");
        assert_eq!(key.blob, wire_key("ssh-ed25519", &[7; 32]));

        let with_options = format!("no-pty {}", authorized_line("ssh-rsa", &[1, 2, 3]));
        assert_eq!(parse_authorized_key(&with_options).unwrap().kind, "ssh-rsa");

        // Declared type must match the encoded one.
        let lying = format!("ssh-rsa {}", STANDARD.encode(wire_key("ssh-ed25519", &[0; 32])));
        assert!(parse_authorized_key(&lying).is_none());
        assert!(parse_authorized_key("not a key").is_none());
    }

    #[test]
    fn test_blob_key_type_bounds() {
        assert_eq!(blob_key_type(&wire_key("ssh-rsa", &[1])), Some("ssh-rsa"));

        let mut huge = u32::MAX.to_be_bytes().to_vec();
        huge.extend_from_slice(b"ssh-rsa");
        assert_eq!(blob_key_type(&huge), None);
        assert_eq!(blob_key_type(&[0, 0]), None);
        assert_eq!(blob_key_type(&[0, 0, 0, 9, b's']), None);
    }

    #[test]
    fn test_rsa_algorithms_prefer_sha2() {
        assert_eq!(
            algorithms_for_key_type("ssh-rsa"),
            vec!["rsa-sha2-256", "rsa-sha2-512", "ssh-rsa"]
        );
        assert_eq!(algorithms_for_key_type(CERT_ALGO_RSA)[0], "rsa-sha2-256-cert-v01@openssh.com");
        assert_eq!(algorithms_for_key_type("ssh-ed25519"), vec!["ssh-ed25519"]);
    }

    #[test]
    fn test_host_keys_deduplicate_algorithms() {
        let creds = vec![
            Credential::new("k1", CredentialType::SshPublicKey, authorized_line("ssh-rsa", &[1])),
            Credential::new("k2", CredentialType::SshPublicKey, authorized_line("ssh-rsa", &[2])),
            Credential::new("k3", CredentialType::SshPublicKey, authorized_line("ssh-ed25519", &[3])),
            Credential::new("bad", CredentialType::SshPublicKey, "garbage"),
        ];
        let (keys, algos) = parse_host_keys(&creds).unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(
            algos,
            vec!["rsa-sha2-256", "rsa-sha2-512", "ssh-rsa", "ssh-ed25519"]
        );
    }

    #[test]
    fn test_no_usable_host_key() {
        let creds = vec![
            Credential::new("pwd", CredentialType::Password, authorized_line("ssh-rsa", &[1])),
            Credential::new("bad", CredentialType::SshPublicKey, "garbage"),
        ];
        assert!(matches!(parse_host_keys(&creds), Err(ClientError::NoHostKey)));
    }

    #[test]
    fn test_check_host_key_exact_match() {
        let known = vec![HostKey {
            kind: "ssh-ed25519".to_string(),
            blob: wire_key("ssh-ed25519", &[9; 32]),
        }];

        assert!(check_host_key(&known, Some(wire_key("ssh-ed25519", &[9; 32]).as_slice())).is_ok());
        assert!(matches!(
            check_host_key(&known, Some(wire_key("ssh-ed25519", &[8; 32]).as_slice())),
            Err(ClientError::HostKeyMismatch)
        ));
        assert!(matches!(
            check_host_key(&known, None),
            Err(ClientError::NoHostKey)
        ));
    }

    #[test]
    fn test_fingerprint_format() {
        let key = HostKey {
            kind: "ssh-ed25519".to_string(),
            blob: wire_key("ssh-ed25519", &[0; 32]),
        };
        assert!(key.fingerprint().starts_with("SHA256:"));
        assert!(!key.fingerprint().ends_with('='));
    }
}
