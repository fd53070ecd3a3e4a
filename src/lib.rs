// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `meross_lib` - A Rust library to manage Meross smart-home devices
//! through the vendor's cloud MQTT broker.
//!
//! The library turns a set of account credentials into an active broker
//! session and keeps a registry of the account's devices synchronized with
//! broker topic subscriptions:
//!
//! 1. Exchange `(email, password)` with the cloud API for a signing key,
//!    session token, account id and the attached device list.
//! 2. Open the authenticated MQTT connection and subscribe the account and
//!    client-response topics.
//! 3. Build the device registry from the discovery snapshot, skipping
//!    devices reported offline and subscribing each online device's topic.
//! 4. Listen for account-topic notifications; on each one, re-subscribe
//!    every registered device, since the broker may silently drop
//!    per-device subscriptions on connection events.
//!
//! # Quick Start
//!
//! ```no_run
//! use meross_lib::CloudDeviceManager;
//!
//! #[tokio::main]
//! async fn main() -> meross_lib::Result<()> {
//!     let mut manager = CloudDeviceManager::new("user@example.com", "password")?;
//!
//!     manager.connect().await?;
//!     manager.initialize_devices().await?;
//!
//!     for (uuid, device) in manager.supported_devices().iter() {
//!         println!("{uuid}: {} ({} channels)", device.display_name(), device.channel_count());
//!     }
//!
//!     manager.listen_to_updates()?;
//!     Ok(())
//! }
//! ```
//!
//! # Custom collaborators
//!
//! The cloud exchange and the broker transport are trait seams
//! ([`cloud::CloudClient`], [`transport::Transport`]), so alternative
//! backends and test doubles plug into the same [`DeviceManager`].

pub mod cloud;
pub mod credentials;
mod device;
pub mod error;
mod manager;
mod registry;
pub mod session;
pub mod topics;
pub mod transport;

pub use cloud::{CloudClient, DeviceDescriptor, DiscoveryResponse, HttpCloudClient};
pub use credentials::{ConnectionDetails, derive_connection_details};
pub use device::DeviceHandle;
pub use error::{CloudError, Error, ProtocolError, Result, SessionError};
pub use manager::{CloudDeviceManager, DeviceManager};
pub use registry::DeviceRegistry;
pub use session::{SessionManager, SessionState};
pub use transport::{MqttTransport, Notification, Transport};
