// src/core/operations/mod.rs

//! One-shot request/response operations and the manager that tracks them
//! across retries, timeouts and reconnections.

pub mod append;
pub mod delete;
pub mod manager;
pub mod persistent;
pub mod read_all;
pub mod read_event;
pub mod read_stream;
pub mod transaction;

pub use manager::{OperationItem, OperationManager};

use crate::core::OpaliteError;
use crate::core::discovery::NodeEndpoints;
use crate::core::protocol::messages::{self, MasterInfo, NotHandled, NotHandledReason};
use crate::core::protocol::{Credentials, Package, TcpCommand};
use serde::Serialize;
use uuid::Uuid;

/// What the manager should do with an operation after a response package has
/// been inspected.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The package did not conclude the operation; keep it in flight.
    DoNothing,
    /// The operation reached a terminal outcome and can be removed.
    EndOperation,
    /// The operation should be re-sent with a fresh correlation id.
    Retry,
    /// The server asked us to talk to another node; re-send there.
    Reconnect(NodeEndpoints),
}

/// A single request/response exchange. The concrete type owns the caller's
/// future and completes it exactly once.
pub trait Operation: Send {
    fn name(&self) -> &'static str;

    /// Builds the request package for one send attempt.
    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError>;

    /// Applies a response package addressed to this operation.
    fn inspect(&mut self, package: &Package) -> Decision;

    /// Completes the caller's future exceptionally. Idempotent.
    fn fail(&mut self, error: OpaliteError);
}

/// Builds a request package, attaching credentials when present.
pub(crate) fn request_package<T: Serialize>(
    command: TcpCommand,
    correlation_id: Uuid,
    credentials: &Option<Credentials>,
    body: &T,
) -> Result<Package, OpaliteError> {
    let payload = messages::encode(body)?;
    Ok(match credentials {
        Some(credentials) => {
            Package::authenticated(command, correlation_id, credentials.clone(), payload)
        }
        None => Package::with_payload(command, correlation_id, payload),
    })
}

/// The handling shared by all operations for packages other than their
/// expected completion command.
pub(crate) enum OutOfBand {
    Fail(OpaliteError),
    Retry,
    Reconnect(NodeEndpoints),
}

pub(crate) fn inspect_out_of_band(name: &str, package: &Package) -> OutOfBand {
    match package.command {
        TcpCommand::NotAuthenticated => OutOfBand::Fail(OpaliteError::NotAuthenticated(
            text_payload(package, "authentication required"),
        )),
        TcpCommand::BadRequest => OutOfBand::Fail(OpaliteError::BadRequest(text_payload(
            package,
            "<no message>",
        ))),
        TcpCommand::NotHandled => match messages::decode::<NotHandled>(&package.payload) {
            Ok(not_handled) => match not_handled.reason {
                NotHandledReason::NotReady | NotHandledReason::TooBusy => OutOfBand::Retry,
                NotHandledReason::NotMaster => match not_handled
                    .master_info
                    .as_ref()
                    .and_then(master_endpoints)
                {
                    Some(endpoints) => OutOfBand::Reconnect(endpoints),
                    None => OutOfBand::Fail(OpaliteError::ProtocolViolation(
                        "NotMaster response without a usable master address".to_string(),
                    )),
                },
            },
            Err(e) => OutOfBand::Fail(e),
        },
        other => OutOfBand::Fail(OpaliteError::ProtocolViolation(format!(
            "unexpected command {other:?} for {name}"
        ))),
    }
}

/// The plain-text payload of auth and bad-request packages.
pub(crate) fn text_payload(package: &Package, fallback: &str) -> String {
    if package.payload.is_empty() {
        fallback.to_string()
    } else {
        String::from_utf8_lossy(&package.payload).to_string()
    }
}

fn master_endpoints(info: &MasterInfo) -> Option<NodeEndpoints> {
    let tcp = format!("{}:{}", info.external_tcp_address, info.external_tcp_port)
        .parse()
        .ok()?;
    let secure_tcp = match (
        &info.external_secure_tcp_address,
        info.external_secure_tcp_port,
    ) {
        (Some(address), Some(port)) => format!("{address}:{port}").parse().ok(),
        _ => None,
    };
    Some(NodeEndpoints::new(Some(tcp), secure_tcp))
}
