// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker transport layer.
//!
//! The session only depends on the [`Transport`] trait; [`MqttTransport`]
//! is the production implementation over `rumqttc`. Inbound publishes are
//! fanned out as [`Notification`] values on a broadcast channel, so the
//! session's listener consumes broker events as messages instead of
//! re-entering shared state from a transport callback.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::{broadcast, oneshot};

use crate::credentials::ConnectionDetails;
use crate::error::ProtocolError;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the notification fan-out channel.
const NOTIFICATION_CAPACITY: usize = 32;

/// One inbound broker message on a subscribed topic.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw UTF-8 payload.
    pub payload: String,
}

/// Trait for broker transports the session can drive.
///
/// All returned futures are `Send` so the session may await them from a
/// spawned listener task.
pub trait Transport: Send + Sync + 'static {
    /// Opens an authenticated connection described by `details`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the connection cannot be established.
    fn connect(
        details: &ConnectionDetails,
    ) -> impl Future<Output = Result<Self, ProtocolError>> + Send
    where
        Self: Sized;

    /// Subscribes to a topic. Subscribing twice to the same topic is a
    /// broker-side no-op.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the subscription fails.
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Publishes a payload to a topic.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the publish fails.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Returns a fresh receiver of inbound messages on subscribed topics.
    fn notifications(&self) -> broadcast::Receiver<Notification>;

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the disconnect operation fails.
    fn disconnect(&self) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}

/// MQTT transport to the Meross cloud broker.
///
/// Connection state is driven by a spawned `rumqttc` event loop task; every
/// inbound publish is forwarded to the notification channel.
#[derive(Debug)]
pub struct MqttTransport {
    client: AsyncClient,
    notifications: broadcast::Sender<Notification>,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Returns whether the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Transport for MqttTransport {
    async fn connect(details: &ConnectionDetails) -> Result<Self, ProtocolError> {
        let mut options = MqttOptions::new(
            details.client_id(),
            details.broker_domain(),
            details.port(),
        );
        options.set_credentials(details.mqtt_username(), details.hashed_password());
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options.set_transport(rumqttc::Transport::tls_with_default_config());

        let (client, event_loop) = AsyncClient::new(options, 10);
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        // Channel to signal when ConnAck is received
        let (connack_tx, connack_rx) = oneshot::channel();

        let task_tx = notify_tx.clone();
        let task_connected = Arc::clone(&connected);
        tokio::spawn(async move {
            handle_transport_events(event_loop, task_tx, task_connected, Some(connack_tx)).await;
        });

        // Wait for ConnAck with timeout
        match tokio::time::timeout(CONNECT_TIMEOUT, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %details.broker_domain(),
                    port = details.port(),
                    "Connected to Meross broker"
                );
            }
            Ok(Err(_)) => {
                return Err(ProtocolError::ConnectionFailed(
                    "MQTT event loop terminated unexpectedly".to_string(),
                ));
            }
            Err(_) => {
                // Safe: the timeout constant is far below u64::MAX milliseconds
                #[allow(clippy::cast_possible_truncation)]
                return Err(ProtocolError::Timeout(CONNECT_TIMEOUT.as_millis() as u64));
            }
        }

        Ok(Self {
            client,
            notifications: notify_tx,
            connected,
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        tracing::debug!(topic = %topic, "Subscribing to broker topic");
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(ProtocolError::Mqtt)
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError> {
        tracing::debug!(topic = %topic, bytes = payload.len(), "Publishing to broker topic");
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(ProtocolError::Mqtt)
    }

    fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!("Disconnecting from Meross broker");
        self.connected.store(false, Ordering::Release);
        self.client.disconnect().await.map_err(ProtocolError::Mqtt)
    }
}

/// Handles MQTT events for the broker connection.
async fn handle_transport_events(
    mut event_loop: EventLoop,
    notify_tx: broadcast::Sender<Notification>,
    connected: Arc<AtomicBool>,
    connack_tx: Option<oneshot::Sender<()>>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = connack_tx;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(topic = %publish.topic, "MQTT message received");
                // Ignore send errors - no listener is registered yet
                let _ = notify_tx.send(notification_from_publish(&publish));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                connected.store(false, Ordering::Release);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT event loop error");
                connected.store(false, Ordering::Release);
                break;
            }
        }
    }
}

/// Converts an inbound publish into a [`Notification`].
///
/// Non-UTF-8 payload bytes are replaced rather than dropping the message;
/// the listener reacts to every message on a subscribed topic, whatever
/// the payload looks like.
fn notification_from_publish(publish: &rumqttc::Publish) -> Notification {
    Notification {
        topic: publish.topic.clone(),
        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport double for session and registry unit tests.

    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    /// Sentinel signing key that makes [`FakeTransport::connect`] fail.
    pub(crate) const REFUSE_CONNECT_KEY: &str = "refuse-connect";

    /// Sentinel signing key that makes the account topic subscription fail.
    pub(crate) const REFUSE_ACCOUNT_TOPIC_KEY: &str = "refuse-account-topic";

    /// Records subscriptions and publishes; notifications are injected by
    /// the test through [`FakeTransport::push_notification`].
    pub(crate) struct FakeTransport {
        subscriptions: Mutex<Vec<String>>,
        fail_topics: Mutex<HashSet<String>>,
        publishes: Mutex<Vec<(String, Vec<u8>)>>,
        notify: broadcast::Sender<Notification>,
        disconnected: AtomicBool,
    }

    impl FakeTransport {
        pub(crate) fn subscribed(&self) -> Vec<String> {
            self.subscriptions.lock().unwrap().clone()
        }

        pub(crate) fn subscribe_count(&self, topic: &str) -> usize {
            self.subscriptions
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.as_str() == topic)
                .count()
        }

        pub(crate) fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.publishes.lock().unwrap().clone()
        }

        pub(crate) fn fail_topic(&self, topic: impl Into<String>) {
            self.fail_topics.lock().unwrap().insert(topic.into());
        }

        pub(crate) fn push_notification(&self, topic: &str, payload: &str) {
            let _ = self.notify.send(Notification {
                topic: topic.to_string(),
                payload: payload.to_string(),
            });
        }

        pub(crate) fn is_disconnected(&self) -> bool {
            self.disconnected.load(Ordering::Acquire)
        }
    }

    impl Transport for FakeTransport {
        async fn connect(details: &ConnectionDetails) -> Result<Self, ProtocolError> {
            if details.signing_key() == REFUSE_CONNECT_KEY {
                return Err(ProtocolError::ConnectionFailed(
                    "refused by fake".to_string(),
                ));
            }
            let (notify, _) = broadcast::channel(NOTIFICATION_CAPACITY);
            let mut fail_topics = HashSet::new();
            if details.signing_key() == REFUSE_ACCOUNT_TOPIC_KEY {
                fail_topics.insert(details.account_topic().to_string());
            }
            Ok(Self {
                subscriptions: Mutex::new(Vec::new()),
                fail_topics: Mutex::new(fail_topics),
                publishes: Mutex::new(Vec::new()),
                notify,
                disconnected: AtomicBool::new(false),
            })
        }

        async fn subscribe(&self, topic: &str) -> Result<(), ProtocolError> {
            if self.fail_topics.lock().unwrap().contains(topic) {
                return Err(ProtocolError::ConnectionFailed(format!(
                    "subscribe refused for {topic}"
                )));
            }
            self.subscriptions.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError> {
            self.publishes
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        fn notifications(&self) -> broadcast::Receiver<Notification> {
            self.notify.subscribe()
        }

        async fn disconnect(&self) -> Result<(), ProtocolError> {
            self.disconnected.store(true, Ordering::Release);
            Ok(())
        }
    }
}
