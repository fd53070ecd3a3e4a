// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `meross_lib` library.
//!
//! This module provides a layered error hierarchy for handling failures
//! across the library: cloud discovery, broker transport, and session
//! lifecycle operations.

use thiserror::Error;

/// The main error type for this library.
///
/// This enum encompasses all possible errors that can occur when managing
/// a Meross cloud session and its device registry.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while talking to the Meross cloud API.
    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Error occurred at the broker transport layer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred in the session lifecycle.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Errors from the cloud discovery/credential exchange.
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The cloud rejected the credentials or the request.
    #[error("authentication failed (code {code}): {message}")]
    AuthFailed {
        /// Vendor status code from the API envelope.
        code: i32,
        /// Human-readable message from the API envelope.
        message: String,
    },

    /// JSON parsing of a cloud response failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The cloud returned a response this library cannot interpret.
    #[error("unexpected cloud response: {0}")]
    UnexpectedResponse(String),
}

/// Errors related to the MQTT broker transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT connection or communication failed.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation timed out.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors from the session lifecycle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation required an active broker connection.
    #[error("session is not connected")]
    NotConnected,

    /// Opening the broker connection failed.
    #[error("broker connect failed: {0}")]
    ConnectFailed(#[source] ProtocolError),

    /// A topic subscription failed.
    #[error("subscribe to {topic} failed: {source}")]
    SubscribeFailed {
        /// The topic that could not be subscribed.
        topic: String,
        /// The underlying transport error.
        #[source]
        source: ProtocolError,
    },
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
