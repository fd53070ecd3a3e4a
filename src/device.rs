// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory handle for one remote Meross device.

use std::sync::Arc;

use crate::cloud::DeviceDescriptor;
use crate::error::{ProtocolError, SessionError};
use crate::topics;
use crate::transport::Transport;

/// Handle for one remote device, bound to the shared broker connection.
///
/// Handles are owned by the registry; they reference, not own, the broker
/// connection and use it for per-device publish/subscribe. The derived
/// device topic is fixed at construction.
pub struct DeviceHandle<T: Transport> {
    descriptor: DeviceDescriptor,
    topic: String,
    connection: Arc<T>,
}

impl<T: Transport> DeviceHandle<T> {
    pub(crate) fn new(descriptor: DeviceDescriptor, connection: Arc<T>) -> Self {
        let topic = topics::device_topic(descriptor.uuid());
        Self {
            descriptor,
            topic,
            connection,
        }
    }

    /// The unique device identifier.
    #[must_use]
    pub fn uuid(&self) -> &str {
        self.descriptor.uuid()
    }

    /// Human-readable device name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.descriptor.display_name()
    }

    /// Number of controllable channels on the device.
    #[must_use]
    pub fn channel_count(&self) -> u32 {
        self.descriptor.channel_count()
    }

    /// The broker topic this device listens on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Performs the per-device handshake: subscribes the device topic on
    /// the shared connection.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SubscribeFailed` if the subscription fails.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.connection
            .subscribe(&self.topic)
            .await
            .map_err(|source| SessionError::SubscribeFailed {
                topic: self.topic.clone(),
                source,
            })
    }

    /// Publishes a raw payload to the device topic.
    ///
    /// Encoding the vendor message envelope is the protocol collaborator's
    /// job; this is the transport passthrough it builds on.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the publish fails.
    pub async fn publish(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.connection.publish(&self.topic, payload).await
    }
}

impl<T: Transport> std::fmt::Debug for DeviceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("uuid", &self.uuid())
            .field("display_name", &self.display_name())
            .field("topic", &self.topic)
            .finish()
    }
}
