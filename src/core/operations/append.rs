// src/core/operations/append.rs

//! The append-to-stream operation.

use crate::core::OpaliteError;
use crate::core::operations::{Decision, Operation, OutOfBand, inspect_out_of_band, request_package};
use crate::core::protocol::messages::{
    self, NewEvent, OperationResult, WriteEvents, WriteEventsCompleted,
};
use crate::core::protocol::{Credentials, Package, TcpCommand};
use crate::core::types::{Position, WriteResult};
use tokio::sync::oneshot;
use uuid::Uuid;

pub struct AppendToStreamOperation {
    result: Option<oneshot::Sender<Result<WriteResult, OpaliteError>>>,
    require_master: bool,
    stream: String,
    expected_version: i64,
    events: Vec<NewEvent>,
    credentials: Option<Credentials>,
}

impl AppendToStreamOperation {
    pub fn new(
        result: oneshot::Sender<Result<WriteResult, OpaliteError>>,
        require_master: bool,
        stream: String,
        expected_version: i64,
        events: Vec<NewEvent>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            require_master,
            stream,
            expected_version,
            events,
            credentials,
        }
    }

    fn complete(&mut self, write_result: WriteResult) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Ok(write_result));
        }
    }
}

impl Operation for AppendToStreamOperation {
    fn name(&self) -> &'static str {
        "AppendToStream"
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            TcpCommand::WriteEvents,
            correlation_id,
            &self.credentials,
            &WriteEvents {
                event_stream_id: self.stream.clone(),
                expected_version: self.expected_version,
                events: self.events.clone(),
                require_master: self.require_master,
            },
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != TcpCommand::WriteEventsCompleted {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: WriteEventsCompleted = match messages::decode(&package.payload) {
            Ok(completed) => completed,
            Err(e) => {
                self.fail(e);
                return Decision::EndOperation;
            }
        };

        match completed.result {
            OperationResult::Success => {
                self.complete(WriteResult {
                    next_expected_version: completed.last_event_number,
                    log_position: Position::new(
                        completed.commit_position,
                        completed.prepare_position,
                    ),
                });
                Decision::EndOperation
            }
            OperationResult::PrepareTimeout
            | OperationResult::CommitTimeout
            | OperationResult::ForwardTimeout => Decision::Retry,
            OperationResult::WrongExpectedVersion => {
                self.fail(OpaliteError::WrongExpectedVersion(format!(
                    "append to '{}' expected version {}",
                    self.stream, self.expected_version
                )));
                Decision::EndOperation
            }
            OperationResult::StreamDeleted => {
                self.fail(OpaliteError::StreamDeleted(self.stream.clone()));
                Decision::EndOperation
            }
            OperationResult::InvalidTransaction => {
                self.fail(OpaliteError::ServerError(completed.message));
                Decision::EndOperation
            }
            OperationResult::AccessDenied => {
                self.fail(OpaliteError::AccessDenied(format!(
                    "append to '{}'",
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
