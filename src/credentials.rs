// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection credential derivation.
//!
//! Turns account credentials plus one discovery exchange into the complete
//! set of values needed to open the broker connection. A
//! [`ConnectionDetails`] is only ever constructed fully populated; there is
//! no partially-filled variant that could reach the transport.

use md5::{Digest, Md5};

use crate::cloud::{CloudClient, DeviceDescriptor};
use crate::error::CloudError;
use crate::topics;

/// Everything required to open and authenticate the broker connection.
///
/// Produced once per session by [`derive_connection_details`]. The secret
/// fields (signing key, token, hashed password) are redacted from the
/// `Debug` output and must never be logged.
#[derive(Clone)]
pub struct ConnectionDetails {
    signing_key: String,
    account_id: u64,
    token: String,
    broker_domain: String,
    port: u16,
    account_topic: String,
    client_response_topic: String,
    hashed_password: String,
}

impl ConnectionDetails {
    /// Builds connection details from a discovery result and the account password.
    #[must_use]
    pub fn derive(
        signing_key: impl Into<String>,
        account_id: u64,
        token: impl Into<String>,
        password: &str,
    ) -> Self {
        Self {
            signing_key: signing_key.into(),
            account_id,
            token: token.into(),
            broker_domain: topics::BROKER_DOMAIN.to_string(),
            port: topics::SECURE_MQTT_PORT,
            account_topic: topics::account_topic(account_id),
            client_response_topic: topics::client_response_topic(account_id),
            hashed_password: hashed_password(password),
        }
    }

    /// Session signing key issued by the cloud.
    #[must_use]
    pub fn signing_key(&self) -> &str {
        &self.signing_key
    }

    /// Numeric account identifier.
    #[must_use]
    pub fn account_id(&self) -> u64 {
        self.account_id
    }

    /// Cloud session token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Broker host to connect to.
    #[must_use]
    pub fn broker_domain(&self) -> &str {
        &self.broker_domain
    }

    /// Broker TLS port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Topic for account-wide broker notifications.
    #[must_use]
    pub fn account_topic(&self) -> &str {
        &self.account_topic
    }

    /// Topic for direct responses to this client.
    #[must_use]
    pub fn client_response_topic(&self) -> &str {
        &self.client_response_topic
    }

    /// Password used for broker authentication. Never log this value.
    #[must_use]
    pub fn hashed_password(&self) -> &str {
        &self.hashed_password
    }

    /// Username for broker authentication.
    #[must_use]
    pub fn mqtt_username(&self) -> String {
        self.account_id.to_string()
    }

    /// MQTT client identifier for this session.
    #[must_use]
    pub fn client_id(&self) -> String {
        format!("app:{}", topics::app_id(self.account_id))
    }
}

impl std::fmt::Debug for ConnectionDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDetails")
            .field("account_id", &self.account_id)
            .field("broker_domain", &self.broker_domain)
            .field("port", &self.port)
            .field("account_topic", &self.account_topic)
            .field("client_response_topic", &self.client_response_topic)
            .field("signing_key", &"<redacted>")
            .field("token", &"<redacted>")
            .field("hashed_password", &"<redacted>")
            .finish()
    }
}

/// Derives the broker password from the account password.
#[must_use]
pub fn hashed_password(password: &str) -> String {
    hex::encode(Md5::digest(password.as_bytes()))
}

/// Performs the credential/discovery exchange and derives connection details.
///
/// Invokes the cloud collaborator exactly once; the returned device list is
/// the discovery snapshot the registry is later built from.
///
/// # Errors
///
/// Returns `CloudError` if the exchange fails. Unlike the lenient contract
/// this replaces, the failure is surfaced to the caller instead of yielding
/// zero-valued details.
pub async fn derive_connection_details<C: CloudClient>(
    cloud: &C,
    email: &str,
    password: &str,
) -> Result<(ConnectionDetails, Vec<DeviceDescriptor>), CloudError> {
    let discovery = cloud.discover(email, password).await?;

    let details = ConnectionDetails::derive(
        discovery.signing_key,
        discovery.account_id,
        discovery.token,
        password,
    );

    tracing::debug!(
        account_id = details.account_id(),
        broker = %details.broker_domain(),
        device_count = discovery.devices.len(),
        "Derived connection details"
    );

    Ok((details, discovery.devices))
}
