//! R66 wire session
//!
//! A blocking request/response session over TCP, optionally wrapped in TLS.
//! Only the exchanges needed to authenticate and query file information are
//! implemented.

pub mod packet;

pub use packet::{FileInfo, Packet, PacketError, SessionOptions};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use thiserror::Error;

pub type R66Result<T> = std::result::Result<T, R66Error>;

#[derive(Error, Debug)]
pub enum R66Error {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("protocol error: {0}")]
    Packet(#[from] PacketError),

    /// The peer answered with an error packet
    #[error("remote error '{}': {message}", code_char(.code))]
    Remote { code: u8, message: String },

    #[error("unexpected {got} packet (expected {expected})")]
    Unexpected {
        expected: &'static str,
        got: &'static str,
    },
}

fn code_char(code: &u8) -> char {
    char::from(*code)
}

impl R66Error {
    /// Error code sent by the peer, if this is a remote error
    pub fn remote_code(&self) -> Option<u8> {
        match self {
            R66Error::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Byte stream under a session
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Transport {
    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(tcp) => tcp,
            Transport::Tls(tls) => tls.get_ref(),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(tcp) => tcp.read(buf),
            Transport::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(tcp) => tcp.write(buf),
            Transport::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(tcp) => tcp.flush(),
            Transport::Tls(tls) => tls.flush(),
        }
    }
}

/// TLS parameters for [`Session::connect`]
pub struct TlsParams {
    pub config: Arc<ClientConfig>,
    pub server_name: ServerName<'static>,
}

/// Server identity returned by a successful authentication
#[derive(Debug, Clone)]
pub struct AuthentReply {
    pub login: String,
    pub password: Vec<u8>,
    pub options: SessionOptions,
}

/// An open R66 session
pub struct Session {
    transport: Transport,
}

impl Session {
    /// Open a TCP connection to `address`, completing the TLS handshake first
    /// when `tls` is given
    pub fn connect(address: &str, tls: Option<TlsParams>) -> R66Result<Self> {
        let mut tcp = TcpStream::connect(address)?;
        tcp.set_nodelay(true).ok();

        let transport = match tls {
            None => Transport::Plain(tcp),
            Some(TlsParams {
                config,
                server_name,
            }) => {
                let mut conn = ClientConnection::new(config, server_name)
                    .map_err(|e| R66Error::Tls(e.to_string()))?;
                while conn.is_handshaking() {
                    conn.complete_io(&mut tcp)
                        .map_err(|e| R66Error::Tls(e.to_string()))?;
                }
                Transport::Tls(Box::new(StreamOwned::new(conn, tcp)))
            }
        };

        tracing::trace!("R66 transport to {} open", address);
        Ok(Self { transport })
    }

    /// Wrap an already connected transport
    pub fn from_transport(transport: Transport) -> Self {
        Self { transport }
    }

    fn exchange(&mut self, request: &Packet) -> R66Result<Packet> {
        packet::write_packet(&mut self.transport, request)?;
        match packet::read_packet(&mut self.transport)? {
            Packet::Error { code, message } => Err(R66Error::Remote { code, message }),
            reply => Ok(reply),
        }
    }

    /// Authenticate as `login` and return the server's own identity
    pub fn authent(
        &mut self,
        login: &str,
        password: &[u8],
        options: &SessionOptions,
    ) -> R66Result<AuthentReply> {
        let request = Packet::Authent {
            login: login.to_string(),
            password: password.to_vec(),
            options: options.clone(),
        };

        match self.exchange(&request)? {
            Packet::AuthentReply {
                login,
                password,
                options,
            } => Ok(AuthentReply {
                login,
                password,
                options,
            }),
            other => Err(R66Error::Unexpected {
                expected: packet::kind_name(packet::kind::AUTHENT_REPLY),
                got: other.name(),
            }),
        }
    }

    /// Query the files of `rule` matching `pattern`
    pub fn get_file_info(&mut self, rule: &str, pattern: &str) -> R66Result<Vec<FileInfo>> {
        let request = Packet::FileInfoRequest {
            rule: rule.to_string(),
            pattern: pattern.to_string(),
        };

        match self.exchange(&request)? {
            Packet::FileInfoReply { entries } => Ok(entries),
            other => Err(R66Error::Unexpected {
                expected: packet::kind_name(packet::kind::FILE_INFO_REPLY),
                got: other.name(),
            }),
        }
    }

    /// Announce the end of the session
    pub fn end(&mut self) -> R66Result<()> {
        packet::write_packet(&mut self.transport, &Packet::EndSession)?;
        Ok(())
    }

    /// Close the underlying connection
    pub fn shutdown(mut self) -> R66Result<()> {
        if let Transport::Tls(tls) = &mut self.transport {
            tls.conn.send_close_notify();
            // Best effort; the peer may already be gone.
            let _ = tls.flush();
        }
        self.transport.tcp().shutdown(Shutdown::Both)?;
        Ok(())
    }
}
