// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of live device handles.
//!
//! The registry is rebuilt wholesale from every discovery result; previous
//! contents are discarded, never merged. Only devices reported online at
//! discovery time are admitted, and insertion order equals discovery order.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::cloud::DeviceDescriptor;
use crate::device::DeviceHandle;
use crate::error::SessionError;
use crate::transport::Transport;

/// Mapping from device uuid to its live handle, in discovery order.
pub struct DeviceRegistry<T: Transport> {
    devices: IndexMap<String, DeviceHandle<T>>,
}

impl<T: Transport> DeviceRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            devices: IndexMap::new(),
        }
    }

    /// Builds a fresh registry from a discovery snapshot.
    ///
    /// Online devices get a handle bound to the shared connection and their
    /// per-device handshake is run immediately; offline devices are logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if a device handshake fails.
    pub async fn build(
        discovered: &[DeviceDescriptor],
        connection: &Arc<T>,
    ) -> Result<Self, SessionError> {
        let mut devices = IndexMap::with_capacity(discovered.len());

        for descriptor in discovered {
            tracing::info!(
                uuid = %descriptor.uuid(),
                name = %descriptor.display_name(),
                channels = descriptor.channel_count(),
                "Found device"
            );

            if descriptor.is_online() {
                let handle = DeviceHandle::new(descriptor.clone(), Arc::clone(connection));
                handle.initialize().await?;
                devices.insert(descriptor.uuid().to_string(), handle);
            } else {
                tracing::info!(
                    uuid = %descriptor.uuid(),
                    "Skipping offline device, not subscribing"
                );
            }
        }

        Ok(Self { devices })
    }

    /// Returns the handle for a device uuid, if registered.
    #[must_use]
    pub fn get(&self, uuid: &str) -> Option<&DeviceHandle<T>> {
        self.devices.get(uuid)
    }

    /// Returns whether a device uuid is registered.
    #[must_use]
    pub fn contains(&self, uuid: &str) -> bool {
        self.devices.contains_key(uuid)
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Iterates devices in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceHandle<T>)> {
        self.devices.iter().map(|(uuid, handle)| (uuid.as_str(), handle))
    }

    /// Device uuids in discovery order.
    #[must_use]
    pub fn uuids(&self) -> Vec<&str> {
        self.devices.keys().map(String::as_str).collect()
    }
}

impl<T: Transport> Default for DeviceRegistry<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Transport> std::fmt::Debug for DeviceRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.uuids())
            .finish()
    }
}
