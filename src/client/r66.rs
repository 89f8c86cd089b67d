//! R66 and R66-TLS client
//!
//! Authentication is mutual. The client presents the account's login and
//! password, then checks the identity the server sends back: its login must
//! be the one expected for the partner, and its password must match the
//! bcrypt hash stored as the partner's password credential.

use super::{ClientError, ClientResult, ConnectTarget, RemoteClient};
use crate::catalog::address::host_of;
use crate::catalog::{fetch_authorities, get_password, Partner, Rule};
use crate::context::TransferContext;
use crate::r66::packet::code;
use crate::r66::{AuthentReply, R66Error, Session, SessionOptions, TlsParams};
use crate::tls::{build_client_config, server_name, TlsVersion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub const PROTOCOL_R66: &str = "r66";
pub const PROTOCOL_R66_TLS: &str = "r66-tls";

pub const DEFAULT_BLOCK_SIZE: u32 = 65536;
pub const DEFAULT_FINAL_HASH_ALGO: &str = "SHA-256";

/// R66 partner configuration (`protoConfig`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct R66PartnerConfig {
    /// Login the server identifies itself with; the partner name if empty
    #[serde(default)]
    pub server_login: String,

    /// Use TLS even when the protocol is plain `r66`
    #[serde(rename = "isTLS", default)]
    pub is_tls: Option<bool>,

    #[serde(rename = "minTLSVersion", default)]
    pub min_tls_version: TlsVersion,

    /// Transfer block size; carried for transfers, unused when listing
    #[serde(default)]
    pub block_size: u32,

    #[serde(default)]
    pub no_final_hash: Option<bool>,

    #[serde(default)]
    pub final_hash_algo: String,

    /// Per-block hash checks; carried for transfers, unused when listing
    #[serde(default)]
    pub check_block_hash: Option<bool>,
}

impl R66PartnerConfig {
    /// Login the server must present
    pub fn expected_login<'a>(&'a self, partner: &'a Partner) -> &'a str {
        if self.server_login.is_empty() {
            &partner.name
        } else {
            &self.server_login
        }
    }

    pub fn block_size(&self) -> u32 {
        if self.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.block_size
        }
    }

    /// Options requested during authentication
    pub fn session_options(&self) -> SessionOptions {
        let digest = if self.final_hash_algo.is_empty() {
            DEFAULT_FINAL_HASH_ALGO
        } else {
            &self.final_hash_algo
        };
        SessionOptions {
            file_size: true,
            final_hash: !self.no_final_hash.unwrap_or(false),
            digest: digest.to_string(),
        }
    }

    pub fn use_tls(&self, protocol: &str) -> bool {
        protocol == PROTOCOL_R66_TLS || self.is_tls.unwrap_or(false)
    }
}

/// Verify the identity the server presented
///
/// Both checks always run. A wrong login takes precedence in the returned
/// error.
pub fn verify_server(
    expected_login: &str,
    password_hash: Option<&str>,
    reply: &AuthentReply,
) -> ClientResult<()> {
    let login_ok: bool = expected_login
        .as_bytes()
        .ct_eq(reply.login.as_bytes())
        .into();

    let password_ok = match password_hash {
        Some(hash) => bcrypt::verify(&reply.password, hash).unwrap_or_else(|e| {
            tracing::debug!("Partner password hash unusable: {}", e);
            false
        }),
        None => false,
    };

    if !login_ok {
        tracing::error!("Server authentication failed: wrong login {:?}", reply.login);
        return Err(ClientError::WrongLogin {
            expected: expected_login.to_string(),
            received: reply.login.clone(),
        });
    }
    if !password_ok {
        tracing::error!("Server authentication failed: wrong password");
        return Err(ClientError::WrongPassword);
    }
    Ok(())
}

/// Check that the server accepted the options we asked for
pub fn check_options(requested: &SessionOptions, accepted: &SessionOptions) -> ClientResult<()> {
    let mismatch = if accepted.file_size != requested.file_size {
        Some("file size verification")
    } else if accepted.final_hash != requested.final_hash {
        Some("final hash verification")
    } else if accepted.digest != requested.digest {
        Some("unknown digest algorithm")
    } else {
        None
    };

    match mismatch {
        Some(what) => {
            tracing::error!("Client-server configuration mismatch: {}", what);
            Err(ClientError::ConfigMismatch(what.to_string()))
        }
        None => Ok(()),
    }
}

/// R66 implementation of [`RemoteClient`]
pub struct R66Client {
    protocol: String,
    session: Option<Session>,
}

impl R66Client {
    pub fn new(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            session: None,
        }
    }

    fn tls_params(
        &self,
        target: &ConnectTarget<'_>,
        ctx: &TransferContext<R66PartnerConfig>,
    ) -> ClientResult<Option<TlsParams>> {
        if !ctx.proto_config.use_tls(&self.protocol) {
            return Ok(None);
        }

        let host = host_of(&ctx.real_address);
        let authorities =
            fetch_authorities(target.catalog).map_err(|source| ClientError::Catalog {
                what: "TLS authorities".to_string(),
                source,
            })?;
        let config = build_client_config(
            host,
            ctx.proto_config.min_tls_version,
            &ctx.partner_creds,
            &ctx.account_creds,
            &authorities,
        )?;

        Ok(Some(TlsParams {
            config: Arc::new(config),
            server_name: server_name(host)?,
        }))
    }

    fn remote_error(&self, err: R66Error) -> ClientError {
        match err {
            R66Error::Remote { code: c, message } if c == code::BAD_AUTHENT => {
                ClientError::auth(&self.protocol, message)
            }
            R66Error::Remote { message, .. } => ClientError::Remote(message),
            other => ClientError::Remote(other.to_string()),
        }
    }
}

fn release(mut session: Session) {
    if let Err(e) = session.end() {
        tracing::debug!("Error ending R66 session: {}", e);
    }
    if let Err(e) = session.shutdown() {
        tracing::debug!("Error closing R66 connection: {}", e);
    }
}

impl RemoteClient for R66Client {
    fn connect(&mut self, target: &ConnectTarget<'_>) -> ClientResult<()> {
        let ctx = TransferContext::<R66PartnerConfig>::resolve(
            target.catalog,
            target.partner,
            target.account,
        )?;
        let address = ctx.real_address.as_str();
        let tls = self.tls_params(target, &ctx)?;

        let mut session = Session::connect(address, tls)
            .map_err(|e| ClientError::connection(&self.protocol, address, e))?;

        let options = ctx.proto_config.session_options();
        let password = get_password(&ctx.account_creds).unwrap_or_default();

        let reply = match session.authent(&target.account.login, password.as_bytes(), &options) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Client authentication on {} failed: {}", target.partner.name, e);
                let err = match e {
                    R66Error::Remote { message, .. } => ClientError::auth(&self.protocol, message),
                    // The server never answered; nothing was rejected.
                    other => ClientError::connection(&self.protocol, address, other),
                };
                release(session);
                return Err(err);
            }
        };

        let verified = verify_server(
            ctx.proto_config.expected_login(target.partner),
            get_password(&ctx.partner_creds),
            &reply,
        )
        .and_then(|()| check_options(&options, &reply.options));

        if let Err(e) = verified {
            release(session);
            return Err(e);
        }

        tracing::info!(
            "Connected to {} partner {} as {}",
            self.protocol,
            target.partner.name,
            target.account.login
        );
        self.session = Some(session);
        Ok(())
    }

    fn list(&mut self, rule: &Rule, pattern: &str) -> ClientResult<Vec<String>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ClientError::not_connected(&self.protocol))?;

        let infos = match session.get_file_info(&rule.name, pattern) {
            Ok(infos) => infos,
            Err(e) if e.remote_code() == Some(code::FILE_NOT_FOUND) => {
                tracing::debug!("No file matching {} for rule {}", pattern, rule.name);
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.remote_error(e)),
        };

        Ok(infos
            .into_iter()
            .filter(|info| !info.is_dir)
            .map(|info| info.name)
            .collect())
    }

    fn close(&mut self) -> ClientResult<()> {
        if let Some(session) = self.session.take() {
            release(session);
        }
        Ok(())
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }
}
