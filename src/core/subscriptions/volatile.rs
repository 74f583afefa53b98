// src/core/subscriptions/volatile.rs

//! Volatile subscriptions: live events only, no server-side state.

use crate::connection::channel::{ChannelHandle, PackageSender};
use crate::core::OpaliteError;
use crate::core::operations::{OutOfBand, inspect_out_of_band, request_package, text_payload};
use crate::core::protocol::messages::{
    self, StreamEventAppeared, SubscribeToStream, SubscriptionConfirmation, SubscriptionDropped,
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

/// A live volatile subscription, handed to the caller upon confirmation.
#[derive(Debug)]
pub struct Subscription {
    /// The subscribed stream; empty for the all-stream.
    pub stream_id: String,
    pub last_commit_position: i64,
    pub last_event_number: i64,
    correlation_id: Uuid,
    channel: PackageSender,
}

impl Subscription {
    pub fn is_subscribed_to_all(&self) -> bool {
        self.stream_id.is_empty()
    }

    /// Asks the server to drop the subscription. The listener receives its
    /// `on_dropped` once the server acknowledges.
    pub fn unsubscribe(&self) -> Result<(), OpaliteError> {
        let package = request_package(
            TcpCommand::UnsubscribeFromStream,
            self.correlation_id,
            &None,
            &messages::UnsubscribeFromStream {},
        )?;
        self.channel.send(package)
    }
}

/// The client side of a volatile subscription exchange.
pub struct VolatileSubscriptionOperation {
    result: Option<oneshot::Sender<Result<Subscription, OpaliteError>>>,
    stream_id: String,
    resolve_link_tos: bool,
    credentials: Option<Credentials>,
    notices: mpsc::UnboundedSender<SubscriptionNotice>,
    correlation_id: Uuid,
    dropped: bool,
}

impl VolatileSubscriptionOperation {
    /// Builds the operation and starts the task that relays events to the
    /// listener. Must be called inside a Tokio runtime.
    pub fn new(
        result: oneshot::Sender<Result<Subscription, OpaliteError>>,
        stream_id: String,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
        listener: Box<dyn SubscriptionListener>,
    ) -> Self {
        let notices = spawn_listener_driver(listener);
        Self {
            result: Some(result),
            stream_id,
            resolve_link_tos,
            credentials,
            notices,
            correlation_id: Uuid::nil(),
            dropped: false,
        }
    }

    fn deliver(&self, event: ResolvedEvent) {
        let _ = self
            .notices
            .send(SubscriptionNotice::EventAppeared(event));
    }
}

impl SubscriptionOperation for VolatileSubscriptionOperation {
    fn name(&self) -> &'static str {
        "VolatileSubscription"
    }

    fn subscribe(
        &mut self,
        correlation_id: Uuid,
        channel: &ChannelHandle,
    ) -> Result<(), OpaliteError> {
        self.correlation_id = correlation_id;
        let package = request_package(
            TcpCommand::SubscribeToStream,
            correlation_id,
            &self.credentials,
            &SubscribeToStream {
                event_stream_id: self.stream_id.clone(),
                resolve_link_tos: self.resolve_link_tos,
            },
        )?;
        channel.send(package)
    }

    fn inspect(&mut self, package: &Package, channel: &ChannelHandle) -> SubscriptionDecision {
        match package.command {
            TcpCommand::SubscriptionConfirmation => {
                let confirmation: SubscriptionConfirmation =
                    match messages::decode(&package.payload) {
                        Ok(confirmation) => confirmation,
                        Err(e) => {
                            self.drop_subscription(SubscriptionDropReason::Error, Some(e));
                            return SubscriptionDecision::EndOperation;
                        }
                    };
                if let Some(sender) = self.result.take() {
                    let _ = sender.send(Ok(Subscription {
                        stream_id: self.stream_id.clone(),
                        last_commit_position: confirmation.last_commit_position,
                        last_event_number: confirmation.last_event_number,
                        correlation_id: self.correlation_id,
                        channel: channel.package_sender(),
                    }));
                }
                debug!(stream = %self.stream_id, "Subscription confirmed.");
                SubscriptionDecision::Subscribed
            }
            TcpCommand::StreamEventAppeared => {
                match messages::decode::<StreamEventAppeared>(&package.payload) {
                    Ok(appeared) => {
                        self.deliver(ResolvedEvent::from(appeared.event));
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
            // Still pending: the caller's future carries the failure.
            let error = error.unwrap_or_else(|| match reason {
                SubscriptionDropReason::AccessDenied => {
                    OpaliteError::AccessDenied(format!("subscription to '{}'", self.stream_id))
                }
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
