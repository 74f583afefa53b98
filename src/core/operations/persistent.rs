// src/core/operations/persistent.rs

//! CRUD operations for server-side persistent subscription groups.

use crate::core::OpaliteError;
use crate::core::operations::{Decision, Operation, OutOfBand, inspect_out_of_band, request_package};
use crate::core::protocol::messages::{
    self, CreatePersistentSubscription, CreatePersistentSubscriptionCompleted,
    CreatePersistentSubscriptionResult, DeletePersistentSubscription,
    DeletePersistentSubscriptionCompleted, DeletePersistentSubscriptionResult,
    UpdatePersistentSubscriptionCompleted, UpdatePersistentSubscriptionResult,
};
use crate::core::protocol::{Credentials, Package, TcpCommand};
use crate::core::types::PersistentSubscriptionSettings;
use tokio::sync::oneshot;
use uuid::Uuid;

fn group_message(
    stream: &str,
    group: &str,
    settings: &PersistentSubscriptionSettings,
) -> CreatePersistentSubscription {
    CreatePersistentSubscription {
        subscription_group_name: group.to_string(),
        event_stream_id: stream.to_string(),
        resolve_link_tos: settings.resolve_link_tos,
        start_from: settings.start_from,
        message_timeout_ms: settings.message_timeout_ms,
        record_statistics: settings.record_statistics,
        live_buffer_size: settings.live_buffer_size,
        read_batch_size: settings.read_batch_size,
        buffer_size: settings.history_buffer_size,
        max_retry_count: settings.max_retry_count,
        checkpoint_after_ms: settings.checkpoint_after_ms,
        checkpoint_max_count: settings.checkpoint_max_count,
        checkpoint_min_count: settings.checkpoint_min_count,
        subscriber_max_count: settings.max_subscriber_count,
        named_consumer_strategy: settings.consumer_strategy.clone(),
    }
}

pub struct CreatePersistentSubscriptionOperation {
    result: Option<oneshot::Sender<Result<(), OpaliteError>>>,
    stream: String,
    group: String,
    settings: PersistentSubscriptionSettings,
    credentials: Option<Credentials>,
}

impl CreatePersistentSubscriptionOperation {
    pub fn new(
        result: oneshot::Sender<Result<(), OpaliteError>>,
        stream: String,
        group: String,
        settings: PersistentSubscriptionSettings,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            stream,
            group,
            settings,
            credentials,
        }
    }
}

impl Operation for CreatePersistentSubscriptionOperation {
    fn name(&self) -> &'static str {
        "CreatePersistentSubscription"
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            TcpCommand::CreatePersistentSubscription,
            correlation_id,
            &self.credentials,
            &group_message(&self.stream, &self.group, &self.settings),
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != TcpCommand::CreatePersistentSubscriptionCompleted {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: CreatePersistentSubscriptionCompleted =
            match messages::decode(&package.payload) {
                Ok(completed) => completed,
                Err(e) => {
                    self.fail(e);
                    return Decision::EndOperation;
                }
            };

        match completed.result {
            CreatePersistentSubscriptionResult::Success => {
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(()));
                }
            }
            CreatePersistentSubscriptionResult::AlreadyExists => {
                self.fail(OpaliteError::ServerError(format!(
                    "subscription group '{}' on stream '{}' already exists",
                    self.group, self.stream
                )));
            }
            CreatePersistentSubscriptionResult::Fail => {
                self.fail(OpaliteError::ServerError(completed.reason));
            }
            CreatePersistentSubscriptionResult::AccessDenied => {
                self.fail(OpaliteError::AccessDenied(format!(
                    "create of subscription group '{}' on stream '{}'",
                    self.group, self.stream
                )));
            }
        }
        Decision::EndOperation
    }

    fn fail(&mut self, error: OpaliteError) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Err(error));
        }
    }
}

pub struct UpdatePersistentSubscriptionOperation {
    result: Option<oneshot::Sender<Result<(), OpaliteError>>>,
    stream: String,
    group: String,
    settings: PersistentSubscriptionSettings,
    credentials: Option<Credentials>,
}

impl UpdatePersistentSubscriptionOperation {
    pub fn new(
        result: oneshot::Sender<Result<(), OpaliteError>>,
        stream: String,
        group: String,
        settings: PersistentSubscriptionSettings,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            stream,
            group,
            settings,
            credentials,
        }
    }
}

impl Operation for UpdatePersistentSubscriptionOperation {
    fn name(&self) -> &'static str {
        "UpdatePersistentSubscription"
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            TcpCommand::UpdatePersistentSubscription,
            correlation_id,
            &self.credentials,
            &group_message(&self.stream, &self.group, &self.settings),
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != TcpCommand::UpdatePersistentSubscriptionCompleted {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: UpdatePersistentSubscriptionCompleted =
            match messages::decode(&package.payload) {
                Ok(completed) => completed,
                Err(e) => {
                    self.fail(e);
                    return Decision::EndOperation;
                }
            };

        match completed.result {
            UpdatePersistentSubscriptionResult::Success => {
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(()));
                }
            }
            UpdatePersistentSubscriptionResult::DoesNotExist => {
                self.fail(OpaliteError::ServerError(format!(
                    "subscription group '{}' on stream '{}' does not exist",
                    self.group, self.stream
                )));
            }
            UpdatePersistentSubscriptionResult::Fail => {
                self.fail(OpaliteError::ServerError(completed.reason));
            }
            UpdatePersistentSubscriptionResult::AccessDenied => {
                self.fail(OpaliteError::AccessDenied(format!(
                    "update of subscription group '{}' on stream '{}'",
                    self.group, self.stream
                )));
            }
        }
        Decision::EndOperation
    }

    fn fail(&mut self, error: OpaliteError) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Err(error));
        }
    }
}

pub struct DeletePersistentSubscriptionOperation {
    result: Option<oneshot::Sender<Result<(), OpaliteError>>>,
    stream: String,
    group: String,
    credentials: Option<Credentials>,
}

impl DeletePersistentSubscriptionOperation {
    pub fn new(
        result: oneshot::Sender<Result<(), OpaliteError>>,
        stream: String,
        group: String,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            result: Some(result),
            stream,
            group,
            credentials,
        }
    }
}

impl Operation for DeletePersistentSubscriptionOperation {
    fn name(&self) -> &'static str {
        "DeletePersistentSubscription"
    }

    fn create_request(&self, correlation_id: Uuid) -> Result<Package, OpaliteError> {
        request_package(
            TcpCommand::DeletePersistentSubscription,
            correlation_id,
            &self.credentials,
            &DeletePersistentSubscription {
                subscription_group_name: self.group.clone(),
                event_stream_id: self.stream.clone(),
            },
        )
    }

    fn inspect(&mut self, package: &Package) -> Decision {
        if package.command != TcpCommand::DeletePersistentSubscriptionCompleted {
            return match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => Decision::Retry,
                OutOfBand::Reconnect(endpoints) => Decision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.fail(e);
                    Decision::EndOperation
                }
            };
        }

        let completed: DeletePersistentSubscriptionCompleted =
            match messages::decode(&package.payload) {
                Ok(completed) => completed,
                Err(e) => {
                    self.fail(e);
                    return Decision::EndOperation;
                }
            };

        match completed.result {
            DeletePersistentSubscriptionResult::Success => {
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(()));
                }
            }
            DeletePersistentSubscriptionResult::DoesNotExist => {
                self.fail(OpaliteError::ServerError(format!(
                    "subscription group '{}' on stream '{}' does not exist",
                    self.group, self.stream
                )));
            }
            DeletePersistentSubscriptionResult::Fail => {
                self.fail(OpaliteError::ServerError(completed.reason));
            }
            DeletePersistentSubscriptionResult::AccessDenied => {
                self.fail(OpaliteError::AccessDenied(format!(
                    "delete of subscription group '{}' on stream '{}'",
                    self.group, self.stream
                )));
            }
        }
        Decision::EndOperation
    }

    fn fail(&mut self, error: OpaliteError) {
        if let Some(sender) = self.result.take() {
            let _ = sender.send(Err(error));
        }
    }
}
