// src/core/subscriptions/persistent.rs

//! The consumer side of persistent subscription groups: connect, event
//! delivery, and acknowledgements.

use crate::connection::channel::{ChannelHandle, PackageSender};
use crate::core::OpaliteError;
use crate::core::operations::{OutOfBand, inspect_out_of_band, request_package, text_payload};
use crate::core::protocol::messages::{
    self, ConnectToPersistentSubscription, NakAction, PersistentSubscriptionAckEvents,
    PersistentSubscriptionConfirmation, PersistentSubscriptionNakEvents,
    PersistentSubscriptionStreamEventAppeared, SubscriptionDropped,
};
use crate::core::protocol::{Credentials, Package, TcpCommand};
use crate::core::subscriptions::{
    SubscriptionDecision, SubscriptionDropReason, SubscriptionListener, SubscriptionNotice,
    SubscriptionOperation, spawn_listener_driver,
};
use crate::core::types::ResolvedEvent;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

/// A live connection to a persistent subscription group, handed to the caller
/// upon confirmation. Events must be acknowledged for the group's checkpoint
/// to advance.
#[derive(Debug)]
pub struct PersistentSubscription {
    /// The server-assigned id of this consumer.
    pub subscription_id: String,
    pub stream_id: String,
    pub group: String,
    pub last_commit_position: i64,
    pub last_event_number: i64,
    correlation_id: Uuid,
    channel: PackageSender,
}

impl PersistentSubscription {
    /// Acknowledges processed events.
    pub fn acknowledge(&self, event_ids: Vec<Uuid>) -> Result<(), OpaliteError> {
        let package = request_package(
            TcpCommand::PersistentSubscriptionAckEvents,
            self.correlation_id,
            &None,
            &PersistentSubscriptionAckEvents {
                subscription_id: self.subscription_id.clone(),
                processed_event_ids: event_ids,
            },
        )?;
        self.channel.send(package)
    }

    /// Negatively acknowledges events, telling the server what to do with them.
    pub fn fail_events(
        &self,
        event_ids: Vec<Uuid>,
        action: NakAction,
        message: impl Into<String>,
    ) -> Result<(), OpaliteError> {
        let package = request_package(
            TcpCommand::PersistentSubscriptionNakEvents,
            self.correlation_id,
            &None,
            &PersistentSubscriptionNakEvents {
                subscription_id: self.subscription_id.clone(),
                processed_event_ids: event_ids,
                message: message.into(),
                action,
            },
        )?;
        self.channel.send(package)
    }

    /// Stops consuming. The listener receives its `on_dropped` once the
    /// server acknowledges.
    pub fn stop(&self) -> Result<(), OpaliteError> {
        let package = request_package(
            TcpCommand::UnsubscribeFromStream,
            self.correlation_id,
            &None,
            &messages::UnsubscribeFromStream {},
        )?;
        self.channel.send(package)
    }
}

/// The client side of a persistent subscription connect exchange.
pub struct PersistentSubscriptionOperation {
    result: Option<oneshot::Sender<Result<PersistentSubscription, OpaliteError>>>,
    stream_id: String,
    group: String,
    buffer_size: i32,
    credentials: Option<Credentials>,
    notices: mpsc::UnboundedSender<SubscriptionNotice>,
    correlation_id: Uuid,
    dropped: bool,
}

impl PersistentSubscriptionOperation {
    /// Builds the operation and starts the task that relays events to the
    /// listener. Must be called inside a Tokio runtime.
    pub fn new(
        result: oneshot::Sender<Result<PersistentSubscription, OpaliteError>>,
        stream_id: String,
        group: String,
        buffer_size: i32,
        credentials: Option<Credentials>,
        listener: Box<dyn SubscriptionListener>,
    ) -> Self {
        let notices = spawn_listener_driver(listener);
        Self {
            result: Some(result),
            stream_id,
            group,
            buffer_size,
            credentials,
            notices,
            correlation_id: Uuid::nil(),
            dropped: false,
        }
    }
}

impl SubscriptionOperation for PersistentSubscriptionOperation {
    fn name(&self) -> &'static str {
        "PersistentSubscription"
    }

    fn subscribe(
        &mut self,
        correlation_id: Uuid,
        channel: &ChannelHandle,
    ) -> Result<(), OpaliteError> {
        self.correlation_id = correlation_id;
        let package = request_package(
            TcpCommand::ConnectToPersistentSubscription,
            correlation_id,
            &self.credentials,
            &ConnectToPersistentSubscription {
                subscription_group_name: self.group.clone(),
                event_stream_id: self.stream_id.clone(),
                allowed_in_flight_messages: self.buffer_size,
            },
        )?;
        channel.send(package)
    }

    fn inspect(&mut self, package: &Package, channel: &ChannelHandle) -> SubscriptionDecision {
        match package.command {
            TcpCommand::PersistentSubscriptionConfirmation => {
                let confirmation: PersistentSubscriptionConfirmation =
                    match messages::decode(&package.payload) {
                        Ok(confirmation) => confirmation,
                        Err(e) => {
                            self.drop_subscription(SubscriptionDropReason::Error, Some(e));
                            return SubscriptionDecision::EndOperation;
                        }
                    };
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(PersistentSubscription {
                        subscription_id: confirmation.subscription_id,
                        stream_id: self.stream_id.clone(),
                        group: self.group.clone(),
                        last_commit_position: confirmation.last_commit_position,
                        last_event_number: confirmation.last_event_number,
                        correlation_id: self.correlation_id,
                        channel: channel.package_sender(),
                    }));
                }
                debug!(
                    stream = %self.stream_id,
                    group = %self.group,
                    "Persistent subscription confirmed."
                );
                SubscriptionDecision::Subscribed
            }
            TcpCommand::PersistentSubscriptionStreamEventAppeared => {
                match messages::decode::<PersistentSubscriptionStreamEventAppeared>(
                    &package.payload,
                ) {
                    Ok(appeared) => {
                        let _ = self.notices.send(SubscriptionNotice::EventAppeared(
                            ResolvedEvent::from(appeared.event),
                        ));
                        SubscriptionDecision::DoNothing
                    }
                    Err(e) => {
                        self.drop_subscription(SubscriptionDropReason::Error, Some(e));
                        SubscriptionDecision::EndOperation
                    }
                }
            }
            TcpCommand::SubscriptionDropped => {
                match messages::decode::<SubscriptionDropped>(&package.payload) {
                    Ok(dropped) => self.drop_subscription(dropped.reason.into(), None),
                    Err(e) => self.drop_subscription(SubscriptionDropReason::Error, Some(e)),
                }
                SubscriptionDecision::EndOperation
            }
            TcpCommand::NotAuthenticated => {
                self.drop_subscription(
                    SubscriptionDropReason::Error,
                    Some(OpaliteError::NotAuthenticated(text_payload(
                        package,
                        "authentication required",
                    ))),
                );
                SubscriptionDecision::EndOperation
            }
            _ => match inspect_out_of_band(self.name(), package) {
                OutOfBand::Retry => SubscriptionDecision::Retry,
                OutOfBand::Reconnect(endpoints) => SubscriptionDecision::Reconnect(endpoints),
                OutOfBand::Fail(e) => {
                    self.drop_subscription(SubscriptionDropReason::Error, Some(e));
                    SubscriptionDecision::EndOperation
                }
            },
        }
    }

    fn drop_subscription(&mut self, reason: SubscriptionDropReason, error: Option<OpaliteError>) {
        if self.dropped {
            return;
        }
        self.dropped = true;

        if let Some(sender) = self.result.take() {
            let error = error.unwrap_or_else(|| match reason {
                SubscriptionDropReason::AccessDenied => OpaliteError::AccessDenied(format!(
                    "persistent subscription '{}' on '{}'",
                    self.group, self.stream_id
                )),
                SubscriptionDropReason::NotFound => OpaliteError::ServerError(format!(
                    "persistent subscription group '{}' on '{}' does not exist",
                    self.group, self.stream_id
                )),
                other => OpaliteError::ServerError(format!("subscription dropped: {other:?}")),
            });
            let _ = sender.send(Err(error));
        } else {
            let _ = self
                .notices
                .send(SubscriptionNotice::Dropped(reason, error));
        }
    }
}
