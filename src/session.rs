// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker session lifecycle.
//!
//! The [`SessionManager`] owns the single broker connection and moves
//! through an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Listening
//!                      |             |
//!                      +--> Errored <+
//! ```
//!
//! While listening, a single spawned coordinator task consumes broker
//! notifications from the transport's channel. On every message seen on the
//! account topic it re-subscribes every device in the current registry
//! snapshot. The broker may drop per-device subscriptions silently on
//! connection events signalled only via the account topic; blanket
//! re-subscription is the recovery for that, at the cost of redundant
//! subscribe calls.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::credentials::ConnectionDetails;
use crate::device::DeviceHandle;
use crate::error::SessionError;
use crate::registry::DeviceRegistry;
use crate::transport::{Notification, Transport};

/// Lifecycle state of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection has been opened, or it was explicitly closed.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connection is up and the account topics are subscribed.
    Connected,
    /// A listener task is consuming broker notifications.
    Listening,
    /// Connect or bootstrap subscription failed. Terminal until `disconnect`.
    Errored,
}

/// Owner of the single broker connection for one account session.
///
/// At most one connection is active per manager. Replacing it requires an
/// explicit [`disconnect`](Self::disconnect) first; `connect` on an already
/// connected session closes the previous transport before opening the new
/// one, so the old connection is never leaked.
pub struct SessionManager<T: Transport> {
    state: SessionState,
    connection: Option<Arc<T>>,
    account_topic: Option<String>,
    listener: Option<JoinHandle<()>>,
}

impl<T: Transport> SessionManager<T> {
    /// Creates a disconnected session manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            connection: None,
            account_topic: None,
            listener: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The live broker connection, if any.
    ///
    /// The registry borrows this to bind device handles for per-device
    /// publish/subscribe.
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<T>> {
        self.connection.as_ref()
    }

    /// Opens the broker connection and subscribes the account and
    /// client-response topics.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConnectFailed` if the transport cannot
    /// connect, or `SessionError::SubscribeFailed` if a bootstrap topic
    /// subscription fails. Either failure leaves the session `Errored`.
    pub async fn connect(&mut self, details: &ConnectionDetails) -> Result<(), SessionError> {
        // Close any previous connection before replacing it.
        self.teardown().await;

        self.state = SessionState::Connecting;
        tracing::info!(
            account_id = details.account_id(),
            host = %details.broker_domain(),
            port = details.port(),
            "Connecting to broker"
        );

        let transport = match T::connect(details).await {
            Ok(transport) => Arc::new(transport),
            Err(source) => {
                self.state = SessionState::Errored;
                return Err(SessionError::ConnectFailed(source));
            }
        };

        for topic in [details.account_topic(), details.client_response_topic()] {
            if let Err(source) = transport.subscribe(topic).await {
                self.state = SessionState::Errored;
                return Err(SessionError::SubscribeFailed {
                    topic: topic.to_string(),
                    source,
                });
            }
        }

        self.connection = Some(transport);
        self.account_topic = Some(details.account_topic().to_string());
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Subscribes a device's topic on the live connection.
    ///
    /// Safe to call repeatedly for the same device; duplicate subscriptions
    /// are a broker-side no-op.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SubscribeFailed` if the subscription fails.
    pub async fn subscribe_device(&self, device: &DeviceHandle<T>) -> Result<(), SessionError> {
        device.initialize().await
    }

    /// Starts the listener task that reacts to broker notifications.
    ///
    /// Exactly one listener is active per connection; calling this again
    /// replaces the previous one. The task reads the registry through the
    /// shared snapshot, so a rebuild via the facade is picked up on the
    /// next notification without restarting the listener.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotConnected` if no connection is open.
    pub fn listen(
        &mut self,
        registry: &Arc<ArcSwap<DeviceRegistry<T>>>,
    ) -> Result<(), SessionError> {
        let transport = self
            .connection
            .as_ref()
            .map(Arc::clone)
            .ok_or(SessionError::NotConnected)?;
        let account_topic = self
            .account_topic
            .clone()
            .ok_or(SessionError::NotConnected)?;

        if let Some(previous) = self.listener.take() {
            tracing::debug!("Replacing active notification listener");
            previous.abort();
        }

        let rx = transport.notifications();
        let registry = Arc::clone(registry);
        self.listener = Some(tokio::spawn(async move {
            resubscribe_loop(rx, account_topic, registry).await;
        }));

        self.state = SessionState::Listening;
        Ok(())
    }

    /// Stops the listener and closes the transport.
    ///
    /// Always leaves the session `Disconnected`, even if closing the
    /// transport reported an error.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        self.state = SessionState::Disconnected;
    }

    async fn teardown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.account_topic = None;
        if let Some(transport) = self.connection.take()
            && let Err(e) = transport.disconnect().await
        {
            tracing::warn!(error = %e, "Error closing broker connection");
        }
    }
}

impl<T: Transport> Default for SessionManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> std::fmt::Debug for SessionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state)
            .field("connected", &self.connection.is_some())
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

/// Consumes broker notifications and re-subscribes every registered device
/// on each account-topic message.
///
/// The transport fans out every inbound publish; messages on other topics
/// (client responses, device telemetry) are ignored here. Individual
/// subscribe failures are logged and skipped; one failing device never
/// prevents the remaining devices from being re-subscribed.
async fn resubscribe_loop<T: Transport>(
    mut rx: broadcast::Receiver<Notification>,
    account_topic: String,
    registry: Arc<ArcSwap<DeviceRegistry<T>>>,
) {
    loop {
        match rx.recv().await {
            Ok(notification) => {
                if notification.topic != account_topic {
                    tracing::trace!(
                        topic = %notification.topic,
                        "Ignoring message outside the account topic"
                    );
                    continue;
                }
                tracing::info!(topic = %notification.topic, "Received broker notification");

                let snapshot = registry.load_full();
                for (uuid, device) in snapshot.iter() {
                    if let Err(e) = device.initialize().await {
                        tracing::error!(
                            uuid = %uuid,
                            error = %e,
                            "Error re-subscribing device topic"
                        );
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Notification listener lagged behind broker");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("Notification channel closed, stopping listener");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cloud::DeviceDescriptor;
    use crate::transport::testing::{FakeTransport, REFUSE_ACCOUNT_TOPIC_KEY, REFUSE_CONNECT_KEY};

    fn details() -> ConnectionDetails {
        ConnectionDetails::derive("key", 7, "token", "pw")
    }

    async fn settle() {
        // Give the spawned listener task a chance to drain the channel.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn new_session_is_disconnected() {
        let session = SessionManager::<FakeTransport>::new();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.connection().is_none());
    }

    #[tokio::test]
    async fn connect_subscribes_account_topics() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = details();

        session.connect(&details).await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        let transport = session.connection().unwrap();
        assert_eq!(
            transport.subscribed(),
            vec![
                details.account_topic().to_string(),
                details.client_response_topic().to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn connect_failure_leaves_session_errored() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = ConnectionDetails::derive(REFUSE_CONNECT_KEY, 7, "token", "pw");

        let result = session.connect(&details).await;

        assert!(matches!(result, Err(SessionError::ConnectFailed(_))));
        assert_eq!(session.state(), SessionState::Errored);
        assert!(session.connection().is_none());
    }

    #[tokio::test]
    async fn bootstrap_subscribe_failure_leaves_session_errored() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = ConnectionDetails::derive(REFUSE_ACCOUNT_TOPIC_KEY, 7, "token", "pw");

        let result = session.connect(&details).await;

        assert!(matches!(result, Err(SessionError::SubscribeFailed { .. })));
        assert_eq!(session.state(), SessionState::Errored);
    }

    #[tokio::test]
    async fn listen_without_connection_fails() {
        let mut session = SessionManager::<FakeTransport>::new();
        let registry = Arc::new(ArcSwap::from_pointee(DeviceRegistry::empty()));

        let result = session.listen(&registry);

        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn notification_triggers_resubscribe_of_all_devices() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = details();
        session.connect(&details).await.unwrap();
        let transport = Arc::clone(session.connection().unwrap());

        let discovered = vec![
            DeviceDescriptor::new("a", "Lamp", 1, true),
            DeviceDescriptor::new("b", "Plug", 1, true),
        ];
        let built = DeviceRegistry::build(&discovered, &transport).await.unwrap();
        let registry = Arc::new(ArcSwap::from_pointee(built));

        session.listen(&registry).unwrap();
        assert_eq!(session.state(), SessionState::Listening);

        transport.push_notification(details.account_topic(), "{}");
        settle().await;

        // Once from build, once from the notification.
        assert_eq!(transport.subscribe_count("/appliance/a/subscribe"), 2);
        assert_eq!(transport.subscribe_count("/appliance/b/subscribe"), 2);
    }

    #[tokio::test]
    async fn messages_outside_account_topic_do_not_resubscribe() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = details();
        session.connect(&details).await.unwrap();
        let transport = Arc::clone(session.connection().unwrap());

        let discovered = vec![DeviceDescriptor::new("a", "Lamp", 1, true)];
        let built = DeviceRegistry::build(&discovered, &transport).await.unwrap();
        let registry = Arc::new(ArcSwap::from_pointee(built));
        session.listen(&registry).unwrap();

        // Device telemetry and client responses also arrive on the channel;
        // neither may trigger a re-subscribe cycle.
        transport.push_notification("/appliance/a/subscribe", "{}");
        transport.push_notification(details.client_response_topic(), "{}");
        settle().await;

        assert_eq!(transport.subscribe_count("/appliance/a/subscribe"), 1);

        // The account topic still does.
        transport.push_notification(details.account_topic(), "{}");
        settle().await;
        assert_eq!(transport.subscribe_count("/appliance/a/subscribe"), 2);
    }

    #[tokio::test]
    async fn consecutive_notifications_resubscribe_each_time() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = details();
        session.connect(&details).await.unwrap();
        let transport = Arc::clone(session.connection().unwrap());

        let discovered = vec![DeviceDescriptor::new("a", "Lamp", 1, true)];
        let built = DeviceRegistry::build(&discovered, &transport).await.unwrap();
        let registry = Arc::new(ArcSwap::from_pointee(built));
        session.listen(&registry).unwrap();

        transport.push_notification(details.account_topic(), "{}");
        transport.push_notification(details.account_topic(), "{}");
        settle().await;

        assert!(transport.subscribe_count("/appliance/a/subscribe") >= 3);
    }

    #[tokio::test]
    async fn device_failure_does_not_stop_resubscribe_iteration() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = details();
        session.connect(&details).await.unwrap();
        let transport = Arc::clone(session.connection().unwrap());

        let discovered = vec![
            DeviceDescriptor::new("a", "Lamp", 1, true),
            DeviceDescriptor::new("b", "Plug", 1, true),
        ];
        let built = DeviceRegistry::build(&discovered, &transport).await.unwrap();
        let registry = Arc::new(ArcSwap::from_pointee(built));
        session.listen(&registry).unwrap();

        // Fail "a" after the registry was built, then notify.
        transport.fail_topic("/appliance/a/subscribe");
        transport.push_notification(details.account_topic(), "{}");
        settle().await;

        // "b" was still attempted in the same cycle.
        assert_eq!(transport.subscribe_count("/appliance/b/subscribe"), 2);
    }

    #[tokio::test]
    async fn relisten_replaces_previous_listener() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = details();
        session.connect(&details).await.unwrap();
        let transport = Arc::clone(session.connection().unwrap());

        let discovered = vec![DeviceDescriptor::new("a", "Lamp", 1, true)];
        let built = DeviceRegistry::build(&discovered, &transport).await.unwrap();
        let registry = Arc::new(ArcSwap::from_pointee(built));

        session.listen(&registry).unwrap();
        session.listen(&registry).unwrap();
        settle().await;

        transport.push_notification(details.account_topic(), "{}");
        settle().await;

        // Exactly one active listener: one build subscribe plus one
        // re-subscribe for the single notification.
        assert_eq!(transport.subscribe_count("/appliance/a/subscribe"), 2);
    }

    #[tokio::test]
    async fn registry_swap_is_visible_to_listener() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = details();
        session.connect(&details).await.unwrap();
        let transport = Arc::clone(session.connection().unwrap());

        let first = DeviceRegistry::build(
            &[DeviceDescriptor::new("a", "Lamp", 1, true)],
            &transport,
        )
        .await
        .unwrap();
        let registry = Arc::new(ArcSwap::from_pointee(first));
        session.listen(&registry).unwrap();

        let second = DeviceRegistry::build(
            &[DeviceDescriptor::new("b", "Plug", 1, true)],
            &transport,
        )
        .await
        .unwrap();
        registry.store(Arc::new(second));

        transport.push_notification(details.account_topic(), "{}");
        settle().await;

        // Only the swapped-in device is re-subscribed.
        assert_eq!(transport.subscribe_count("/appliance/a/subscribe"), 1);
        assert_eq!(transport.subscribe_count("/appliance/b/subscribe"), 2);
    }

    #[tokio::test]
    async fn disconnect_stops_listener_and_closes_transport() {
        let mut session = SessionManager::<FakeTransport>::new();
        let details = details();
        session.connect(&details).await.unwrap();
        let transport = Arc::clone(session.connection().unwrap());

        let discovered = vec![DeviceDescriptor::new("a", "Lamp", 1, true)];
        let built = DeviceRegistry::build(&discovered, &transport).await.unwrap();
        let registry = Arc::new(ArcSwap::from_pointee(built));
        session.listen(&registry).unwrap();

        session.disconnect().await;
        settle().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.connection().is_none());
        assert!(transport.is_disconnected());

        transport.push_notification(details.account_topic(), "{}");
        settle().await;

        // No re-subscription after teardown.
        assert_eq!(transport.subscribe_count("/appliance/a/subscribe"), 1);
    }

    #[tokio::test]
    async fn subscribe_device_is_idempotent() {
        let mut session = SessionManager::<FakeTransport>::new();
        session.connect(&details()).await.unwrap();
        let transport = Arc::clone(session.connection().unwrap());

        let handle = crate::device::DeviceHandle::new(
            DeviceDescriptor::new("a", "Lamp", 1, true),
            Arc::clone(&transport),
        );

        session.subscribe_device(&handle).await.unwrap();
        session.subscribe_device(&handle).await.unwrap();

        assert_eq!(transport.subscribe_count("/appliance/a/subscribe"), 2);
    }
}
