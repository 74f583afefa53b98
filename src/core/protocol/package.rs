// src/core/protocol/package.rs

//! The typed package layer of the wire protocol, and the combined codec that
//! stacks it on top of the length-prefixed framing.
//!
//! Package layout: `command (u8) | flags (u8) | correlation id (16 bytes) |
//! [login/password, each u8-length-prefixed, when the auth flag is set] |
//! payload`.

use crate::core::OpaliteError;
use crate::core::protocol::command::TcpCommand;
use crate::core::protocol::frame::FrameCodec;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

/// Flag bit marking a package that carries explicit credentials.
pub const FLAG_AUTHENTICATED: u8 = 0x01;

const PACKAGE_HEADER_LEN: usize = 18;

/// Credentials attached to a package or to the connection handshake.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

/// A single protocol unit: command, correlation id, optional credentials and
/// an opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub command: TcpCommand,
    pub correlation_id: Uuid,
    pub credentials: Option<Credentials>,
    pub payload: Bytes,
}

impl Package {
    pub fn new(command: TcpCommand, correlation_id: Uuid) -> Self {
        Self {
            command,
            correlation_id,
            credentials: None,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(command: TcpCommand, correlation_id: Uuid, payload: Bytes) -> Self {
        Self {
            command,
            correlation_id,
            credentials: None,
            payload,
        }
    }

    pub fn authenticated(
        command: TcpCommand,
        correlation_id: Uuid,
        credentials: Credentials,
        payload: Bytes,
    ) -> Self {
        Self {
            command,
            correlation_id,
            credentials: Some(credentials),
            payload,
        }
    }

    pub fn heartbeat_response(correlation_id: Uuid) -> Self {
        Self::new(TcpCommand::HeartbeatResponse, correlation_id)
    }

    /// Encodes the package body (without the frame length prefix).
    pub fn encode(&self) -> Result<Bytes, OpaliteError> {
        let credentials_len = match &self.credentials {
            Some(credentials) => {
                if credentials.login.len() > u8::MAX as usize {
                    return Err(OpaliteError::InvalidArgument(
                        "login exceeds 255 bytes".to_string(),
                    ));
                }
                if credentials.password.len() > u8::MAX as usize {
                    return Err(OpaliteError::InvalidArgument(
                        "password exceeds 255 bytes".to_string(),
                    ));
                }
                2 + credentials.login.len() + credentials.password.len()
            }
            None => 0,
        };

        let mut buf = BytesMut::with_capacity(PACKAGE_HEADER_LEN + credentials_len + self.payload.len());
        buf.put_u8(self.command.as_u8());
        buf.put_u8(if self.credentials.is_some() {
            FLAG_AUTHENTICATED
        } else {
            0
        });
        buf.extend_from_slice(self.correlation_id.as_bytes());

        if let Some(credentials) = &self.credentials {
            buf.put_u8(credentials.login.len() as u8);
            buf.extend_from_slice(credentials.login.as_bytes());
            buf.put_u8(credentials.password.len() as u8);
            buf.extend_from_slice(credentials.password.as_bytes());
        }

        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decodes a package from a complete frame payload.
    pub fn decode(mut src: Bytes) -> Result<Self, OpaliteError> {
        if src.len() < PACKAGE_HEADER_LEN {
            return Err(OpaliteError::ProtocolViolation(format!(
                "package header truncated: {} bytes",
                src.len()
            )));
        }

        let command = TcpCommand::from_u8(src[0])?;
        let flags = src[1];
        let correlation_id = Uuid::from_slice(&src[2..PACKAGE_HEADER_LEN])?;
        let mut cursor = PACKAGE_HEADER_LEN;

        let credentials = if flags & FLAG_AUTHENTICATED != 0 {
            let login = read_short_string(&src, &mut cursor)?;
            let password = read_short_string(&src, &mut cursor)?;
            Some(Credentials { login, password })
        } else {
            None
        };

        let payload = src.split_off(cursor);
        Ok(Self {
            command,
            correlation_id,
            credentials,
            payload,
        })
    }
}

/// Reads a u8-length-prefixed UTF-8 string, advancing the cursor.
fn read_short_string(src: &Bytes, cursor: &mut usize) -> Result<String, OpaliteError> {
    let Some(&len) = src.get(*cursor) else {
        return Err(OpaliteError::ProtocolViolation(
            "credentials block truncated".to_string(),
        ));
    };
    let start = *cursor + 1;
    let end = start + len as usize;
    let Some(bytes) = src.get(start..end) else {
        return Err(OpaliteError::ProtocolViolation(
            "credentials block truncated".to_string(),
        ));
    };
    *cursor = end;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| OpaliteError::ProtocolViolation("credentials are not valid UTF-8".to_string()))
}

/// The codec used on the wire: packages stacked on length-prefixed frames.
#[derive(Debug, Default)]
pub struct PackageCodec {
    frame: FrameCodec,
}

impl Encoder<Package> for PackageCodec {
    type Error = OpaliteError;

    fn encode(&mut self, item: Package, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.encode()?;
        self.frame.encode(body, dst)
    }
}

impl Decoder for PackageCodec {
    type Item = Package;
    type Error = OpaliteError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frame.decode(src)? {
            Some(body) => Ok(Some(Package::decode(body)?)),
            None => Ok(None),
        }
    }
}
