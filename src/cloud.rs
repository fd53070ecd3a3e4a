// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Meross cloud discovery client.
//!
//! The cloud API exchanges account credentials for the signing key, session
//! token and numeric account id used for broker authentication, plus the
//! list of devices attached to the account. The session layer only depends
//! on the [`CloudClient`] trait; [`HttpCloudClient`] is the production
//! implementation over the vendor REST API.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use md5::{Digest, Md5};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CloudError;

/// Shared secret the vendor uses to sign API request envelopes.
const CLOUD_SECRET: &str = "23x17ahWarFH6w29";

/// Vendor status code for a successful API call.
const API_STATUS_OK: i32 = 0;

const LOGIN_PATH: &str = "/v1/Auth/Login";
const DEV_LIST_PATH: &str = "/v1/Device/devList";

/// Online status value the cloud reports for reachable devices.
const ONLINE: u8 = 1;

/// Trait for clients that can perform the credential/discovery exchange.
#[allow(async_fn_in_trait)]
pub trait CloudClient {
    /// Exchanges account credentials for broker credentials and the device list.
    ///
    /// # Errors
    ///
    /// Returns `CloudError` if the exchange fails at the transport level or
    /// the cloud rejects the credentials.
    async fn discover(&self, email: &str, password: &str)
    -> Result<DiscoveryResponse, CloudError>;
}

/// Result of one credential/discovery exchange.
#[derive(Debug, Clone)]
pub struct DiscoveryResponse {
    /// Signing key issued for this session; opaque to this library.
    pub signing_key: String,
    /// Numeric account identifier.
    pub account_id: u64,
    /// Session token for subsequent cloud calls and broker auth.
    pub token: String,
    /// Devices attached to the account, in cloud-reported order.
    pub devices: Vec<DeviceDescriptor>,
}

/// One device entry from the discovery response.
///
/// Descriptors are created fresh on every discovery call and are immutable
/// afterwards; nothing here is persisted across sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDescriptor {
    uuid: String,
    #[serde(rename = "devName")]
    dev_name: String,
    #[serde(default)]
    channels: u32,
    #[serde(rename = "onlineStatus")]
    online_status: u8,
}

impl DeviceDescriptor {
    /// Creates a descriptor directly, bypassing the cloud.
    ///
    /// Mostly useful for tests and alternative [`CloudClient`] implementations.
    #[must_use]
    pub fn new(
        uuid: impl Into<String>,
        dev_name: impl Into<String>,
        channels: u32,
        online: bool,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            dev_name: dev_name.into(),
            channels,
            online_status: if online { ONLINE } else { 0 },
        }
    }

    /// The unique device identifier.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Human-readable device name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.dev_name
    }

    /// Number of controllable channels on the device.
    #[must_use]
    pub fn channel_count(&self) -> u32 {
        self.channels
    }

    /// Whether the cloud reported the device reachable at discovery time.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online_status == ONLINE
    }
}

/// HTTP client for the Meross cloud REST API.
///
/// Requests carry the vendor's signed envelope: the JSON parameters are
/// base64-encoded and signed with an MD5 over secret, timestamp, nonce and
/// the encoded parameters.
///
/// # Examples
///
/// ```no_run
/// use meross_lib::cloud::{CloudClient, HttpCloudClient};
///
/// # async fn example() -> meross_lib::Result<()> {
/// let cloud = HttpCloudClient::new()?;
/// let discovery = cloud.discover("user@example.com", "password").await?;
/// println!("{} devices attached", discovery.devices.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpCloudClient {
    base_url: String,
    client: Client,
}

impl HttpCloudClient {
    /// Default vendor API endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://iot.meross.com";
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a client against the default vendor endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, CloudError> {
        Self::with_base_url(Self::DEFAULT_BASE_URL)
    }

    /// Creates a client against a custom endpoint.
    ///
    /// Useful for tests and region-specific API hosts.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()
            .map_err(CloudError::Http)?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Returns the base URL this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &serde_json::Value,
        token: Option<&str>,
    ) -> Result<T, CloudError> {
        let url = format!("{}{path}", self.base_url);
        let form = SignedForm::new(params);

        tracing::debug!(url = %url, "Sending signed cloud request");

        let mut request = self.client.post(&url).form(&form);
        if let Some(token) = token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Basic {token}"));
        }

        let envelope: ApiEnvelope<T> = request
            .send()
            .await
            .map_err(CloudError::Http)?
            .json()
            .await
            .map_err(CloudError::Http)?;

        if envelope.api_status != API_STATUS_OK {
            return Err(CloudError::AuthFailed {
                code: envelope.api_status,
                message: envelope.info.unwrap_or_default(),
            });
        }

        envelope
            .data
            .ok_or_else(|| CloudError::UnexpectedResponse("missing data field".to_string()))
    }
}

impl CloudClient for HttpCloudClient {
    async fn discover(
        &self,
        email: &str,
        password: &str,
    ) -> Result<DiscoveryResponse, CloudError> {
        let login: LoginData = self
            .post_signed(
                LOGIN_PATH,
                &serde_json::json!({ "email": email, "password": password }),
                None,
            )
            .await?;

        let account_id: u64 = login.userid.parse().map_err(|_| {
            CloudError::UnexpectedResponse(format!("non-numeric account id: {}", login.userid))
        })?;

        tracing::info!(account_id, "Signed in to Meross cloud");

        let devices: Vec<DeviceDescriptor> = self
            .post_signed(DEV_LIST_PATH, &serde_json::json!({}), Some(&login.token))
            .await?;

        tracing::debug!(device_count = devices.len(), "Fetched attached device list");

        Ok(DiscoveryResponse {
            signing_key: login.key,
            account_id,
            token: login.token,
            devices,
        })
    }
}

/// Vendor request envelope: base64 parameters plus an MD5 signature.
#[derive(Debug, Serialize)]
struct SignedForm {
    params: String,
    sign: String,
    timestamp: i64,
    nonce: String,
}

impl SignedForm {
    fn new(params: &serde_json::Value) -> Self {
        let params = BASE64.encode(params.to_string());
        let timestamp = Utc::now().timestamp_millis();
        let nonce = Uuid::new_v4().simple().to_string();
        let sign = hex::encode(Md5::digest(
            format!("{CLOUD_SECRET}{timestamp}{nonce}{params}").as_bytes(),
        ));

        Self {
            params,
            sign,
            timestamp,
            nonce,
        }
    }
}

/// Vendor response envelope wrapping every API payload.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(rename = "apiStatus")]
    api_status: i32,
    info: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
    key: String,
    userid: String,
}
