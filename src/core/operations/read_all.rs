// src/core/operations/read_all.rs

//! Paged reads over the all-stream, in either direction.

use crate::core::OpaliteError;
use crate::core::operations::{Decision, Operation, OutOfBand, inspect_out_of_band, request_package};
use crate::core::protocol::messages::{self, ReadAllEvents, ReadAllEventsCompleted, ReadAllResult};
use crate::core::protocol::{Credentials, Package, TcpCommand};
use crate::core::types::{AllEventsSlice, Position, ReadDirection, ResolvedEvent};
use tokio::sync::oneshot;
use uuid::Uuid;

pub struct ReadAllEventsOperation {
    result: Option<oneshot::Sender<Result<AllEventsSlice, OpaliteError>>>,
    position: Position,
    max_count: i32,
    direction: ReadDirection,
    resolve_link_tos: bool,
    require_master: bool,
    credentials: Option<Credentials>,
}

impl ReadAllEventsOperation {
    pub fn new(
        result: oneshot::Sender<Result<AllEventsSlice, OpaliteError>>,
        position: Position,
        max_count: i32,
        direction: ReadDirection,
        resolve_link_tos: bool,
        require_master: bool,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            position,
            max_count,
            direction,
            resolve_link_tos,
            require_master,
            credentials,
        }
    }

    fn request_command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadAllEventsForward,
            ReadDirection::Backward => TcpCommand::ReadAllEventsBackward,
        }
    }

    fn completion_command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadAllEventsForwardCompleted,
            ReadDirection::Backward => TcpCommand::ReadAllEventsBackwardCompleted,
        }
    }
}

impl Operation for ReadAllEventsOperation {
    fn name(&self) -> &'static str {
        match self.direction {
            ReadDirection::Forward => "ReadAllEventsForward",
            ReadDirection::Backward => "ReadAllEventsBackward",
        }
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            self.request_command(),
            correlation_id,
            &self.credentials,
            &ReadAllEvents {
                commit_position: self.position.commit_position,
                prepare_position: self.position.prepare_position,
                max_count: self.max_count,
                resolve_link_tos: self.resolve_link_tos,
                require_master: self.require_master,
            },
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != self.completion_command() {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: ReadAllEventsCompleted = match messages::decode(&package.payload) {
            Ok(completed) => completed,
            Err(e) => {
                self.fail(e);
                return Decision::EndOperation;
            }
        };

        match completed.result {
            ReadAllResult::Success => {
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(AllEventsSlice {
                        read_direction: self.direction,
                        from_position: Position::new(
                            completed.commit_position,
                            completed.prepare_position,
                        ),
                        next_position: Position::new(
                            completed.next_commit_position,
                            completed.next_prepare_position,
                        ),
                        events: completed
                            .events
                            .into_iter()
                            .map(ResolvedEvent::from)
                            .collect(),
                    }));
                }
                Decision::EndOperation
            }
            ReadAllResult::NotModified | ReadAllResult::Error => {
                self.fail(OpaliteError::ServerError(completed.error));
                Decision::EndOperation
            }
            ReadAllResult::AccessDenied => {
                self.fail(OpaliteError::AccessDenied("read of $all".to_string()));
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
