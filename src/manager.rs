// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facade orchestrating cloud discovery, broker session and registry.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::cloud::{CloudClient, DeviceDescriptor, HttpCloudClient};
use crate::credentials::{ConnectionDetails, derive_connection_details};
use crate::error::{CloudError, Error, SessionError};
use crate::registry::DeviceRegistry;
use crate::session::{SessionManager, SessionState};
use crate::transport::{MqttTransport, Transport};

/// `DeviceManager` wired to the production cloud API and MQTT broker.
pub type CloudDeviceManager = DeviceManager<HttpCloudClient, MqttTransport>;

/// Top-level facade over the session/registry subsystem.
///
/// Drives the sequence credentials → broker connection → device registry →
/// notification listener. The expected call order is
/// [`connect`](Self::connect), [`initialize_devices`](Self::initialize_devices),
/// [`listen_to_updates`](Self::listen_to_updates).
///
/// # Examples
///
/// ```no_run
/// use meross_lib::CloudDeviceManager;
///
/// #[tokio::main]
/// async fn main() -> meross_lib::Result<()> {
///     let mut manager = CloudDeviceManager::new("user@example.com", "password")?;
///
///     manager.connect().await?;
///     manager.initialize_devices().await?;
///
///     for (uuid, device) in manager.supported_devices().iter() {
///         println!("{uuid}: {}", device.display_name());
///     }
///
///     if manager.listen_to_updates()? {
///         // Device subscriptions are now kept alive across broker events.
///     }
///
///     manager.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct DeviceManager<C: CloudClient, T: Transport> {
    email: String,
    password: String,
    cloud: C,
    session: SessionManager<T>,
    registry: Arc<ArcSwap<DeviceRegistry<T>>>,
    discovered: Option<Vec<DeviceDescriptor>>,
    details: Option<ConnectionDetails>,
}

impl CloudDeviceManager {
    /// Creates a manager for the given account against the production cloud.
    ///
    /// # Errors
    ///
    /// Returns error if the cloud HTTP client cannot be created.
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CloudError> {
        Ok(Self::with_cloud(HttpCloudClient::new()?, email, password))
    }
}

impl<C: CloudClient, T: Transport> DeviceManager<C, T> {
    /// Creates a manager with a custom cloud client.
    #[must_use]
    pub fn with_cloud(cloud: C, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            cloud,
            session: SessionManager::new(),
            registry: Arc::new(ArcSwap::from_pointee(DeviceRegistry::empty())),
            discovered: None,
            details: None,
        }
    }

    /// Derives connection details from the cloud and opens the broker session.
    ///
    /// The discovery device list obtained during the exchange is cached for
    /// [`initialize_devices`](Self::initialize_devices).
    ///
    /// # Errors
    ///
    /// Returns `Error::Cloud` if the credential exchange fails and
    /// `Error::Session` if the broker connection or the bootstrap topic
    /// subscriptions fail. Unlike the lenient contract this replaces, the
    /// outcome is always visible to the caller.
    pub async fn connect(&mut self) -> Result<(), Error> {
        let (details, devices) =
            derive_connection_details(&self.cloud, &self.email, &self.password).await?;

        self.session.connect(&details).await?;

        self.details = Some(details);
        self.discovered = Some(devices);
        Ok(())
    }

    /// Builds the device registry from the cached discovery list.
    ///
    /// The registry is rebuilt wholesale; a previous registry is replaced
    /// atomically, so an active listener picks up the new snapshot on its
    /// next notification.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotConnected` if called before a successful
    /// [`connect`](Self::connect), or the handshake error of a device that
    /// failed to initialize.
    pub async fn initialize_devices(&mut self) -> Result<&mut Self, Error> {
        let discovered = self
            .discovered
            .as_deref()
            .ok_or(SessionError::NotConnected)?;
        let connection = self
            .session
            .connection()
            .ok_or(SessionError::NotConnected)?;

        let built = DeviceRegistry::build(discovered, connection).await?;
        tracing::info!(device_count = built.len(), "Device registry initialized");

        self.registry.store(Arc::new(built));
        Ok(self)
    }

    /// Returns the current registry snapshot.
    #[must_use]
    pub fn supported_devices(&self) -> Arc<DeviceRegistry<T>> {
        self.registry.load_full()
    }

    /// Starts listening for broker notifications.
    ///
    /// Returns `Ok(false)` without registering anything when the registry
    /// is empty; this mirrors the warn-and-skip behavior for accounts with
    /// no online devices.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotConnected` if no broker connection is open.
    pub fn listen_to_updates(&mut self) -> Result<bool, Error> {
        if self.registry.load().is_empty() {
            tracing::warn!("No devices fetched, not listening to any updates");
            return Ok(false);
        }

        self.session.listen(&self.registry)?;
        Ok(true)
    }

    /// Stops the listener and closes the broker connection.
    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }

    /// The underlying session manager.
    #[must_use]
    pub fn session(&self) -> &SessionManager<T> {
        &self.session
    }

    /// Current session lifecycle state.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Connection details derived for the current session, if connected.
    #[must_use]
    pub fn connection_details(&self) -> Option<&ConnectionDetails> {
        self.details.as_ref()
    }
}

impl<C: CloudClient, T: Transport> std::fmt::Debug for DeviceManager<C, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("email", &self.email)
            .field("session", &self.session)
            .field("device_count", &self.registry.load().len())
            .finish()
    }
}
