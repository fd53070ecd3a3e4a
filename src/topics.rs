// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Meross broker topic derivation.
//!
//! All topic strings used by the session are derived here, so the session
//! bootstrap and the per-device subscribe path always produce the same
//! topic for the same identifier. Every function is pure: same input,
//! same output, no I/O.

use md5::{Digest, Md5};

/// The Meross cloud MQTT broker all account sessions connect to.
pub const BROKER_DOMAIN: &str = "eu-iot.meross.com";

/// TLS MQTT port used by the Meross broker. Derived, not configurable.
pub const SECURE_MQTT_PORT: u16 = 2001;

/// Derives the application id for an account.
///
/// The app id is the lowercase MD5 hex of the decimal account id. It keeps
/// the client-response topic distinct from the plain account topic while
/// remaining a pure function of the account id.
#[must_use]
pub fn app_id(account_id: u64) -> String {
    hex::encode(Md5::digest(account_id.to_string().as_bytes()))
}

/// Topic the broker uses for account-wide notifications.
#[must_use]
pub fn account_topic(account_id: u64) -> String {
    format!("/app/{account_id}/subscribe")
}

/// Topic the broker routes direct responses for this client to.
#[must_use]
pub fn client_response_topic(account_id: u64) -> String {
    format!("/app/{account_id}-{}/subscribe", app_id(account_id))
}

/// Topic a specific appliance listens on.
#[must_use]
pub fn device_topic(uuid: &str) -> String {
    format!("/appliance/{uuid}/subscribe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_topic_shape() {
        assert_eq!(account_topic(4711), "/app/4711/subscribe");
    }

    #[test]
    fn device_topic_shape() {
        assert_eq!(
            device_topic("1907298646292951813448e1e91d224a"),
            "/appliance/1907298646292951813448e1e91d224a/subscribe"
        );
    }

    #[test]
    fn derivations_are_pure() {
        assert_eq!(account_topic(99), account_topic(99));
        assert_eq!(client_response_topic(99), client_response_topic(99));
        assert_eq!(device_topic("abc"), device_topic("abc"));
    }

    #[test]
    fn app_id_is_lowercase_hex() {
        let id = app_id(42);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn client_response_topic_embeds_app_id() {
        let topic = client_response_topic(42);
        assert!(topic.starts_with("/app/42-"));
        assert!(topic.ends_with("/subscribe"));
        assert!(topic.contains(&app_id(42)));
    }

    #[test]
    fn distinct_accounts_get_distinct_topics() {
        assert_ne!(account_topic(1), account_topic(2));
        assert_ne!(client_response_topic(1), client_response_topic(2));
    }
}
