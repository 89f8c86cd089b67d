//! FTP and FTPS client
//!
//! Plain FTP attaches no TLS at all. FTPS negotiates explicit TLS (AUTH TLS)
//! unless the partner asks for implicit TLS.

use super::listing::{list_matching, DirLister, RemoteEntry};
use super::{ClientError, ClientResult, ConnectTarget, RemoteClient};
use crate::catalog::address::host_of;
use crate::catalog::{fetch_authorities, get_password, Rule};
use crate::context::TransferContext;
use crate::tls::{build_client_config, TlsVersion};
use rustls::client::Resumption;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use suppaftp::list::File;
use suppaftp::{FtpError, FtpResult, Mode, RustlsConnector, RustlsFtpStream};

pub const PROTOCOL_FTP: &str = "ftp";
pub const PROTOCOL_FTPS: &str = "ftps";

/// Dial timeout for the control connection
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// FTP partner configuration (`protoConfig`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FtpPartnerConfig {
    #[serde(rename = "minTLSVersion", default)]
    pub min_tls_version: TlsVersion,

    /// Connect with TLS from the first byte instead of AUTH TLS
    #[serde(rename = "useImplicitTLS", default)]
    pub use_implicit_tls: bool,

    /// Use PASV instead of EPSV for data connections
    #[serde(rename = "disableEPSV", default)]
    pub disable_epsv: bool,

    #[serde(rename = "disableTLSSessionReuse", default)]
    pub disable_tls_session_reuse: bool,
}

/// How TLS is layered on the control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpTlsMode {
    None,
    Explicit,
    Implicit,
}

/// TLS mode for `protocol` under the partner configuration
///
/// Plain `ftp` never uses TLS, whatever the partner flags say.
pub fn tls_mode(protocol: &str, config: &FtpPartnerConfig) -> FtpTlsMode {
    match protocol {
        PROTOCOL_FTPS if config.use_implicit_tls => FtpTlsMode::Implicit,
        PROTOCOL_FTPS => FtpTlsMode::Explicit,
        _ => FtpTlsMode::None,
    }
}

/// FTP/FTPS implementation of [`RemoteClient`]
pub struct FtpClient {
    protocol: String,
    stream: Option<RustlsFtpStream>,
}

impl FtpClient {
    pub fn new(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            stream: None,
        }
    }

    fn dial(
        &self,
        target: &ConnectTarget<'_>,
        ctx: &TransferContext<FtpPartnerConfig>,
    ) -> ClientResult<RustlsFtpStream> {
        let address = ctx.real_address.as_str();
        let host = host_of(address);
        let mode = tls_mode(&self.protocol, &ctx.proto_config);

        let connector = match mode {
            FtpTlsMode::None => None,
            FtpTlsMode::Explicit | FtpTlsMode::Implicit => {
                let authorities =
                    fetch_authorities(target.catalog).map_err(|source| ClientError::Catalog {
                        what: "TLS authorities".to_string(),
                        source,
                    })?;
                let mut config = build_client_config(
                    host,
                    ctx.proto_config.min_tls_version,
                    &ctx.partner_creds,
                    &ctx.account_creds,
                    &authorities,
                )?;
                if ctx.proto_config.disable_tls_session_reuse {
                    config.resumption = Resumption::disabled();
                }
                Some(RustlsConnector::from(Arc::new(config)))
            }
        };

        tracing::debug!("Dialing {} ({:?} TLS)", address, mode);

        let addrs = resolve(&self.protocol, address)?;
        let stream = match connector {
            None => dial_each(&addrs),
            Some(connector) if mode == FtpTlsMode::Implicit => {
                // suppaftp has no timeout variant for implicit TLS dials.
                first_reachable(&addrs)
                    .map_err(FtpError::ConnectionError)
                    .and_then(|addr| RustlsFtpStream::connect_secure_implicit(addr, connector, host))
            }
            Some(connector) => {
                dial_each(&addrs).and_then(|stream| stream.into_secure(connector, host))
            }
        };

        stream.map_err(|e| ClientError::connection(&self.protocol, address, e))
    }
}

fn resolve(protocol: &str, address: &str) -> ClientResult<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = address
        .to_socket_addrs()
        .map_err(|e| ClientError::connection(protocol, address, e))?
        .collect();
    if addrs.is_empty() {
        return Err(ClientError::connection(protocol, address, "address resolved to nothing"));
    }
    Ok(addrs)
}

/// Dial each address in turn until one answers with a welcome
fn dial_each(addrs: &[SocketAddr]) -> FtpResult<RustlsFtpStream> {
    let mut last_err = None;
    for addr in addrs {
        match RustlsFtpStream::connect_timeout(*addr, DIAL_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("Dial to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        FtpError::ConnectionError(io::Error::new(io::ErrorKind::NotFound, "no address to dial"))
    }))
}

/// First address accepting a TCP connection within [`DIAL_TIMEOUT`]
fn first_reachable(addrs: &[SocketAddr]) -> io::Result<SocketAddr> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no address to dial");
    for addr in addrs {
        match TcpStream::connect_timeout(addr, DIAL_TIMEOUT) {
            Ok(_) => return Ok(*addr),
            Err(e) => {
                tracing::debug!("{} is unreachable: {}", addr, e);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

impl RemoteClient for FtpClient {
    fn connect(&mut self, target: &ConnectTarget<'_>) -> ClientResult<()> {
        let ctx = TransferContext::<FtpPartnerConfig>::resolve(
            target.catalog,
            target.partner,
            target.account,
        )?;
        let password = get_password(&ctx.account_creds).unwrap_or_default();

        let mut stream = self.dial(target, &ctx)?;

        if let Err(e) = stream.login(target.account.login.as_str(), password) {
            tracing::error!(
                "FTP login as {} on {} failed: {}",
                target.account.login,
                target.partner.name,
                e
            );
            let _ = stream.quit();
            return Err(ClientError::auth(&self.protocol, e));
        }

        stream.set_mode(if ctx.proto_config.disable_epsv {
            Mode::Passive
        } else {
            Mode::ExtendedPassive
        });

        tracing::info!(
            "Connected to {} partner {} as {}",
            self.protocol,
            target.partner.name,
            target.account.login
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn list(&mut self, rule: &Rule, pattern: &str) -> ClientResult<Vec<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ClientError::not_connected(&self.protocol))?;
        list_matching(&mut FtpLister(stream), rule, pattern)
    }

    fn close(&mut self) -> ClientResult<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.quit() {
                tracing::debug!("Error closing {} connection: {}", self.protocol, e);
            }
        }
        Ok(())
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }
}

struct FtpLister<'a>(&'a mut RustlsFtpStream);

impl DirLister for FtpLister<'_> {
    fn read_dir(&mut self, path: &str) -> ClientResult<Vec<RemoteEntry>> {
        let lines = self.0.list(Some(path)).map_err(|e| ClientError::ListFailed {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        Ok(lines.iter().filter_map(|line| parse_list_line(line)).collect())
    }
}

/// Parse one LIST line (UNIX or DOS format)
fn parse_list_line(line: &str) -> Option<RemoteEntry> {
    match File::from_str(line) {
        Ok(file) => Some(RemoteEntry {
            name: file.name().to_string(),
            is_dir: file.is_directory(),
        }),
        Err(e) => {
            tracing::debug!("Skipping unparsable LIST line {:?}: {}", line, e);
            None
        }
    }
}
