// src/connection/auth.rs

//! The opening credential exchange on a freshly established channel.

use crate::config::Settings;
use crate::connection::channel::ChannelHandle;
use crate::core::OpaliteError;
use crate::core::operations::text_payload;
use crate::core::protocol::{Package, TcpCommand};
use bytes::Bytes;
use std::time::Instant;
use uuid::Uuid;

/// The outcome of the handshake, reported exactly once per channel.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticationStatus {
    Success,
    Failed(String),
    Timeout,
    /// No credentials are configured; the handshake is skipped.
    Ignored,
}

/// Tracks one in-flight credential exchange.
pub struct AuthenticationStage {
    correlation_id: Uuid,
    deadline: Instant,
}

impl AuthenticationStage {
    /// Sends the authentication request on a fresh channel. Returns `None`
    /// when no credentials are configured, which maps to `Ignored`.
    pub fn begin(
        settings: &Settings,
        channel: &ChannelHandle,
    ) -> Result<Option<Self>, OpaliteError> {
        let Some(credentials) = &settings.credentials else {
            return Ok(None);
        };

        let correlation_id = Uuid::new_v4();
        channel.send(Package::authenticated(
            TcpCommand::Authenticate,
            correlation_id,
            credentials.clone(),
            Bytes::new(),
        ))?;

        Ok(Some(Self {
            correlation_id,
            deadline: Instant::now() + settings.operation_timeout(),
        }))
    }

    /// Matches a package against the pending exchange. Packages for other
    /// correlation ids pass through untouched.
    pub fn inspect(&self, package: &Package) -> Option<AuthenticationStatus> {
        if package.correlation_id != self.correlation_id {
            return None;
        }
        match package.command {
            TcpCommand::Authenticated => Some(AuthenticationStatus::Success),
            TcpCommand::NotAuthenticated => Some(AuthenticationStatus::Failed(text_payload(
                package,
                "authentication failed",
            ))),
            _ => None,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}
