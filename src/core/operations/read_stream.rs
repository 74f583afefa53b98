// src/core/operations/read_stream.rs

//! Paged reads over a single stream, in either direction.

use crate::core::OpaliteError;
use crate::core::operations::{Decision, Operation, OutOfBand, inspect_out_of_band, request_package};
use crate::core::protocol::messages::{
    self, ReadStreamEvents, ReadStreamEventsCompleted, SliceReadResult,
};
use crate::core::protocol::{Credentials, Package, TcpCommand};
use crate::core::types::{ReadDirection, ResolvedEvent, SliceReadStatus, StreamEventsSlice};
use tokio::sync::oneshot;
use uuid::Uuid;

pub struct ReadStreamEventsOperation {
    result: Option<oneshot::Sender<Result<StreamEventsSlice, OpaliteError>>>,
    stream: String,
    from_event_number: i64,
    max_count: i32,
    direction: ReadDirection,
    resolve_link_tos: bool,
    require_master: bool,
    credentials: Option<Credentials>,
}

impl ReadStreamEventsOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        result: oneshot::Sender<Result<StreamEventsSlice, OpaliteError>>,
        stream: String,
        from_event_number: i64,
        max_count: i32,
        direction: ReadDirection,
        resolve_link_tos: bool,
        require_master: bool,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            stream,
            from_event_number,
            max_count,
            direction,
            resolve_link_tos,
            require_master,
            credentials,
        }
    }

    fn request_command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadStreamEventsForward,
            ReadDirection::Backward => TcpCommand::ReadStreamEventsBackward,
        }
    }

    fn completion_command(&self) -> TcpCommand {
        match self.direction {
            ReadDirection::Forward => TcpCommand::ReadStreamEventsForwardCompleted,
            ReadDirection::Backward => TcpCommand::ReadStreamEventsBackwardCompleted,
        }
    }

    fn complete(&mut self, status: SliceReadStatus, completed: ReadStreamEventsCompleted) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Ok(StreamEventsSlice {
                status,
                stream: self.stream.clone(),
                from_event_number: self.from_event_number,
                read_direction: self.direction,
                events: completed
                    .events
                    .into_iter()
                    .map(ResolvedEvent::from)
                    .collect(),
                next_event_number: completed.next_event_number,
                last_event_number: completed.last_event_number,
                is_end_of_stream: completed.is_end_of_stream,
            }));
        }
    }
}

impl Operation for ReadStreamEventsOperation {
    fn name(&self) -> &'static str {
        match self.direction {
            ReadDirection::Forward => "ReadStreamEventsForward",
            ReadDirection::Backward => "ReadStreamEventsBackward",
        }
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            self.request_command(),
            correlation_id,
            &self.credentials,
            &ReadStreamEvents {
                event_stream_id: self.stream.clone(),
                from_event_number: self.from_event_number,
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

        let completed: ReadStreamEventsCompleted = match messages::decode(&package.payload) {
            Ok(completed) => completed,
            Err(e) => {
                self.fail(e);
                return Decision::EndOperation;
            }
        };

        match completed.result {
            SliceReadResult::Success => {
                self.complete(SliceReadStatus::Success, completed);
                Decision::EndOperation
            }
            SliceReadResult::NoStream => {
                self.complete(SliceReadStatus::StreamNotFound, completed);
                Decision::EndOperation
            }
            SliceReadResult::StreamDeleted => {
                self.complete(SliceReadStatus::StreamDeleted, completed);
                Decision::EndOperation
            }
            SliceReadResult::NotModified | SliceReadResult::Error => {
                self.fail(OpaliteError::ServerError(completed.error));
                Decision::EndOperation
            }
            SliceReadResult::AccessDenied => {
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
