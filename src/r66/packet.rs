//! R66 packet codec
//!
//! Every packet is framed as `[u32 BE length][u8 kind][body]`, where length
//! counts the kind byte and the body. Strings are a u32 BE length followed by
//! UTF-8 bytes; byte strings the same without the UTF-8 check.

use std::io::{Read, Write};
use thiserror::Error;

/// Largest accepted packet (kind + body)
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Packet kind identifiers
pub mod kind {
    pub const AUTHENT: u8 = 1;
    pub const AUTHENT_REPLY: u8 = 2;
    pub const ERROR: u8 = 3;
    pub const FILE_INFO_REQUEST: u8 = 4;
    pub const FILE_INFO_REPLY: u8 = 5;
    pub const END_SESSION: u8 = 6;
}

/// Error codes carried by [`Packet::Error`]
pub mod code {
    pub const INTERNAL: u8 = b'I';
    pub const BAD_AUTHENT: u8 = b'A';
    pub const INCORRECT_COMMAND: u8 = b'c';
    pub const FILE_NOT_FOUND: u8 = b'f';
}

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet too large: {0} bytes")]
    TooLarge(usize),

    #[error("empty packet")]
    Empty,

    #[error("unknown packet kind {0}")]
    UnknownKind(u8),

    #[error("truncated packet body")]
    Truncated,

    #[error("invalid UTF-8 in packet: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("{0} trailing bytes after packet body")]
    Trailing(usize),
}

/// Session options negotiated during authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Check the file size at the end of a transfer
    pub file_size: bool,
    /// Send a hash of the whole file at the end of a transfer
    pub final_hash: bool,
    /// Digest algorithm name for the final hash ("SHA-256", ...)
    pub digest: String,
}

/// One entry of a file-info reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Client identification
    Authent {
        login: String,
        password: Vec<u8>,
        options: SessionOptions,
    },
    /// Server identification, in answer to [`Packet::Authent`]
    AuthentReply {
        login: String,
        password: Vec<u8>,
        options: SessionOptions,
    },
    Error {
        code: u8,
        message: String,
    },
    /// Ask for the files of a rule matching a pattern
    FileInfoRequest {
        rule: String,
        pattern: String,
    },
    FileInfoReply {
        entries: Vec<FileInfo>,
    },
    EndSession,
}

impl Packet {
    pub fn kind(&self) -> u8 {
        match self {
            Packet::Authent { .. } => kind::AUTHENT,
            Packet::AuthentReply { .. } => kind::AUTHENT_REPLY,
            Packet::Error { .. } => kind::ERROR,
            Packet::FileInfoRequest { .. } => kind::FILE_INFO_REQUEST,
            Packet::FileInfoReply { .. } => kind::FILE_INFO_REPLY,
            Packet::EndSession => kind::END_SESSION,
        }
    }

    /// Human readable kind name, for logs and errors
    pub fn name(&self) -> &'static str {
        kind_name(self.kind())
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            Packet::Authent {
                login,
                password,
                options,
            }
            | Packet::AuthentReply {
                login,
                password,
                options,
            } => {
                put_bytes(buf, login.as_bytes());
                put_bytes(buf, password);
                buf.push(options.file_size as u8);
                buf.push(options.final_hash as u8);
                put_bytes(buf, options.digest.as_bytes());
            }
            Packet::Error { code, message } => {
                buf.push(*code);
                put_bytes(buf, message.as_bytes());
            }
            Packet::FileInfoRequest { rule, pattern } => {
                put_bytes(buf, rule.as_bytes());
                put_bytes(buf, pattern.as_bytes());
            }
            Packet::FileInfoReply { entries } => {
                buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
                for entry in entries {
                    put_bytes(buf, entry.name.as_bytes());
                    buf.extend_from_slice(&entry.size.to_be_bytes());
                    buf.push(entry.is_dir as u8);
                }
            }
            Packet::EndSession => {}
        }
    }

    fn decode(kind_byte: u8, body: &[u8]) -> Result<Self, PacketError> {
        let mut r = BodyReader { buf: body };
        let packet = match kind_byte {
            kind::AUTHENT | kind::AUTHENT_REPLY => {
                let login = r.string()?;
                let password = r.bytes()?.to_vec();
                let options = SessionOptions {
                    file_size: r.u8()? != 0,
                    final_hash: r.u8()? != 0,
                    digest: r.string()?,
                };
                if kind_byte == kind::AUTHENT {
                    Packet::Authent {
                        login,
                        password,
                        options,
                    }
                } else {
                    Packet::AuthentReply {
                        login,
                        password,
                        options,
                    }
                }
            }
            kind::ERROR => Packet::Error {
                code: r.u8()?,
                message: r.string()?,
            },
            kind::FILE_INFO_REQUEST => Packet::FileInfoRequest {
                rule: r.string()?,
                pattern: r.string()?,
            },
            kind::FILE_INFO_REPLY => {
                let count = r.u32()? as usize;
                // Each entry takes at least 13 bytes.
                let mut entries = Vec::with_capacity(count.min(r.buf.len() / 13));
                for _ in 0..count {
                    entries.push(FileInfo {
                        name: r.string()?,
                        size: r.u64()?,
                        is_dir: r.u8()? != 0,
                    });
                }
                Packet::FileInfoReply { entries }
            }
            kind::END_SESSION => Packet::EndSession,
            other => return Err(PacketError::UnknownKind(other)),
        };

        if !r.buf.is_empty() {
            return Err(PacketError::Trailing(r.buf.len()));
        }
        Ok(packet)
    }
}

/// Name of a packet kind
pub fn kind_name(kind_byte: u8) -> &'static str {
    match kind_byte {
        kind::AUTHENT => "authent",
        kind::AUTHENT_REPLY => "authent reply",
        kind::ERROR => "error",
        kind::FILE_INFO_REQUEST => "file info request",
        kind::FILE_INFO_REPLY => "file info reply",
        kind::END_SESSION => "end session",
        _ => "unknown",
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        if self.buf.len() < n {
            return Err(PacketError::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, PacketError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, PacketError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    fn bytes(&mut self) -> Result<&'a [u8], PacketError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, PacketError> {
        Ok(String::from_utf8(self.bytes()?.to_vec())?)
    }
}

/// Encode a packet with its frame header
pub fn encode(packet: &Packet) -> Result<Vec<u8>, PacketError> {
    let mut body = Vec::new();
    packet.encode_body(&mut body);

    let len = body.len() + 1;
    if len > MAX_PACKET_SIZE {
        return Err(PacketError::TooLarge(len));
    }

    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.push(packet.kind());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one packet and flush
pub fn write_packet<W: Write + ?Sized>(w: &mut W, packet: &Packet) -> Result<(), PacketError> {
    let frame = encode(packet)?;
    w.write_all(&frame)?;
    w.flush()?;
    Ok(())
}

/// Read one packet
pub fn read_packet<R: Read + ?Sized>(r: &mut R) -> Result<Packet, PacketError> {
    let mut hdr = [0u8; 4];
    r.read_exact(&mut hdr)?;
    let len = u32::from_be_bytes(hdr) as usize;

    if len == 0 {
        return Err(PacketError::Empty);
    }
    if len > MAX_PACKET_SIZE {
        return Err(PacketError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Packet::decode(payload[0], &payload[1..])
}
