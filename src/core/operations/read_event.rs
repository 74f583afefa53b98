// src/core/operations/read_event.rs

//! The read-single-event operation.

use crate::core::OpaliteError;
use crate::core::operations::{Decision, Operation, OutOfBand, inspect_out_of_band, request_package};
use crate::core::protocol::messages::{self, ReadEvent, ReadEventCompleted, ReadEventResult};
use crate::core::protocol::{Credentials, Package, TcpCommand};
use crate::core::types::{EventReadResult, EventReadStatus, ResolvedEvent};
use tokio::sync::oneshot;
use uuid::Uuid;

pub struct ReadEventOperation {
    result: Option<oneshot::Sender<Result<EventReadResult, OpaliteError>>>,
    stream: String,
    event_number: i64,
    resolve_link_tos: bool,
    require_master: bool,
    credentials: Option<Credentials>,
}

impl ReadEventOperation {
    pub fn new(
        result: oneshot::Sender<Result<EventReadResult, OpaliteError>>,
        stream: String,
        event_number: i64,
        resolve_link_tos: bool,
        require_master: bool,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            stream,
            event_number,
            resolve_link_tos,
            require_master,
            credentials,
        }
    }

    fn complete(&mut self, status: EventReadStatus, event: Option<ResolvedEvent>) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Ok(EventReadResult {
                status,
                stream: self.stream.clone(),
                event_number: self.event_number,
                event,
            }));
        }
    }
}

impl Operation for ReadEventOperation {
    fn name(&self) -> &'static str {
        "ReadEvent"
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            TcpCommand::ReadEvent,
            correlation_id,
            &self.credentials,
            &ReadEvent {
                event_stream_id: self.stream.clone(),
                event_number: self.event_number,
                resolve_link_tos: self.resolve_link_tos,
                require_master: self.require_master,
            },
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != TcpCommand::ReadEventCompleted {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: ReadEventCompleted = match messages::decode(&package.payload) {
            Ok(completed) => completed,
            Err(e) => {
                self.fail(e);
                return Decision::EndOperation;
            }
        };

        match completed.result {
            ReadEventResult::Success => {
                self.complete(
                    EventReadStatus::Success,
                    completed.event.map(ResolvedEvent::from),
                );
                Decision::EndOperation
            }
            ReadEventResult::NotFound => {
                self.complete(EventReadStatus::NotFound, None);
                Decision::EndOperation
            }
            ReadEventResult::NoStream => {
                self.complete(EventReadStatus::NoStream, None);
                Decision::EndOperation
            }
            ReadEventResult::StreamDeleted => {
                self.complete(EventReadStatus::StreamDeleted, None);
                Decision::EndOperation
            }
            ReadEventResult::Error => {
                self.fail(OpaliteError::ServerError(completed.error));
                Decision::EndOperation
            }
            ReadEventResult::AccessDenied => {
                self.fail(OpaliteError::AccessDenied(format!(
                    "read of '{}'",
                    self.stream
                )));
                Decision::EndOperation
            }
        }
    }

    fn fail(&mut self, error: OpaliteError) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Err(error));
        }
    }
}
