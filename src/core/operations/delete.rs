// src/core/operations/delete.rs

//! The delete-stream operation.

use crate::core::OpaliteError;
use crate::core::operations::{Decision, Operation, OutOfBand, inspect_out_of_band, request_package};
use crate::core::protocol::messages::{self, DeleteStream, DeleteStreamCompleted, OperationResult};
use crate::core::protocol::{Credentials, Package, TcpCommand};
use crate::core::types::{DeleteResult, Position};
use tokio::sync::oneshot;
use uuid::Uuid;

pub struct DeleteStreamOperation {
    result: Option<oneshot::Sender<Result<DeleteResult, OpaliteError>>>,
    require_master: bool,
    stream: String,
    expected_version: i64,
    hard_delete: bool,
    credentials: Option<Credentials>,
}

impl DeleteStreamOperation {
    pub fn new(
        result: oneshot::Sender<Result<DeleteResult, OpaliteError>>,
        require_master: bool,
        stream: String,
        expected_version: i64,
        hard_delete: bool,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            require_master,
            stream,
            expected_version,
            hard_delete,
            credentials,
        }
    }
}

impl Operation for DeleteStreamOperation {
    fn name(&self) -> &'static str {
        "DeleteStream"
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            TcpCommand::DeleteStream,
            correlation_id,
            &self.credentials,
            &DeleteStream {
                event_stream_id: self.stream.clone(),
                expected_version: self.expected_version,
                require_master: self.require_master,
                hard_delete: self.hard_delete,
            },
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != TcpCommand::DeleteStreamCompleted {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: DeleteStreamCompleted = match messages::decode(&package.payload) {
            Ok(completed) => completed,
            Err(e) => {
                self.fail(e);
                return Decision::EndOperation;
            }
        };

        match completed.result {
            OperationResult::Success => {
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(DeleteResult {
                        log_position: Position::new(
                            completed.commit_position,
                            completed.prepare_position,
                        ),
                    }));
                }
                Decision::EndOperation
            }
            OperationResult::PrepareTimeout
            | OperationResult::CommitTimeout
            | OperationResult::ForwardTimeout => Decision::Retry,
            OperationResult::WrongExpectedVersion => {
                self.fail(OpaliteError::WrongExpectedVersion(format!(
                    "delete of '{}' expected version {}",
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
                    "delete of '{}'",
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
