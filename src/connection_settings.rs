// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Connection settings for the agent: everything needed to build a CONNECT command and the
//! underlying transport, loadable from a builder or from environment variables.
//!
//! Configuration loading sits outside the agent's own command/ack/dispatch core, but a usable
//! crate still needs some way to construct a [`crate::control_packet::ConnectInfo`] and an
//! `rumqttc::MqttOptions` without hand-assembling both at every call site: a `derive_builder`
//! struct with an `AGENT_`-prefixed environment-variable loader.

use std::env::{self, VarError};
use std::time::Duration;

use crate::control_packet::ConnectInfo;

/// All the settings required to establish an MQTT 3.1.1 connection.
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct MqttConnectionSettings {
    /// Client identifier.
    pub(crate) client_id: String,
    /// FQDN or IP address of the broker to connect to.
    pub(crate) hostname: String,
    /// TCP port to connect to the broker on.
    #[builder(default = "1883")]
    pub(crate) tcp_port: u16,
    /// Keep-alive interval advertised to the broker.
    #[builder(default = "Duration::from_secs(60)")]
    pub(crate) keep_alive: Duration,
    /// How long a CONNECT command waits for a CONNACK before giving up.
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) connack_timeout: Duration,
    /// Whether to start a clean session (discard any prior session state).
    #[builder(default = "true")]
    pub(crate) clean_session: bool,
    /// Username for username/password authentication, if any.
    #[builder(default = "None")]
    pub(crate) username: Option<String>,
    /// Password for username/password authentication, if any.
    #[builder(default = "None")]
    pub(crate) password: Option<String>,
    /// Path to a file containing the password, as an alternative to setting it directly.
    #[builder(default = "None")]
    pub(crate) password_file: Option<String>,
    /// TLS negotiation enabled.
    #[builder(default = "true")]
    pub(crate) use_tls: bool,
    /// Path to a PEM file used to validate the broker's identity.
    #[builder(default = "None")]
    pub(crate) ca_file: Option<String>,
    /// Path to a PEM file used to establish X.509 client authentication.
    #[builder(default = "None")]
    pub(crate) cert_file: Option<String>,
    /// Path to a file containing the key used to establish X.509 client authentication.
    #[builder(default = "None")]
    pub(crate) key_file: Option<String>,
}

impl MqttConnectionSettings {
    /// Resolve the effective password, reading `password_file` if `password` was not set
    /// directly.
    ///
    /// # Errors
    /// Returns an error string if `password_file` is set but cannot be read.
    pub fn resolve_password(&self) -> Result<Option<String>, String> {
        if let Some(password) = &self.password {
            return Ok(Some(password.clone()));
        }
        if let Some(path) = &self.password_file {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read password_file {path}: {e}"))?;
            return Ok(Some(contents.trim().to_string()));
        }
        Ok(None)
    }

    /// Build the [`ConnectInfo`] a CONNECT command should carry for these settings.
    ///
    /// # Errors
    /// Propagates [`MqttConnectionSettings::resolve_password`]'s error if `password_file` cannot
    /// be read.
    pub fn connect_info(&self) -> Result<ConnectInfo, String> {
        Ok(ConnectInfo {
            client_id: self.client_id.clone(),
            clean_session: self.clean_session,
            keep_alive_secs: u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX),
            username: self.username.clone(),
            password: self.resolve_password()?,
            will: None,
            connack_timeout: self.connack_timeout,
        })
    }
}

impl MqttConnectionSettingsBuilder {
    /// Initialize the [`MqttConnectionSettingsBuilder`] from environment variables.
    ///
    /// Recognizes `AGENT_MQTT_CLIENT_ID`, `AGENT_MQTT_HOSTNAME`, `AGENT_MQTT_TCP_PORT`,
    /// `AGENT_MQTT_KEEP_ALIVE`, `AGENT_MQTT_CLEAN_SESSION`, `AGENT_MQTT_USERNAME`,
    /// `AGENT_MQTT_PASSWORD_FILE`, `AGENT_MQTT_USE_TLS`, `AGENT_MQTT_CA_FILE`,
    /// `AGENT_MQTT_CERT_FILE`, and `AGENT_MQTT_KEY_FILE`.
    ///
    /// # Errors
    /// Returns a `String` describing the error if any of the environment variables are present
    /// but cannot be parsed.
    pub fn from_environment() -> Result<Self, String> {
        let client_id = string_from_environment("AGENT_MQTT_CLIENT_ID")?;
        let hostname = string_from_environment("AGENT_MQTT_HOSTNAME")?;
        let tcp_port = string_from_environment("AGENT_MQTT_TCP_PORT")?
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|e| format!("AGENT_MQTT_TCP_PORT: {e}"))?;
        let keep_alive = string_from_environment("AGENT_MQTT_KEEP_ALIVE")?
            .map(|v| v.parse::<u64>().map(Duration::from_secs))
            .transpose()
            .map_err(|e| format!("AGENT_MQTT_KEEP_ALIVE: {e}"))?;
        let clean_session = string_from_environment("AGENT_MQTT_CLEAN_SESSION")?
            .map(|v| v.parse::<bool>())
            .transpose()
            .map_err(|e| format!("AGENT_MQTT_CLEAN_SESSION: {e}"))?;
        let username = Some(string_from_environment("AGENT_MQTT_USERNAME")?);
        let password_file = Some(string_from_environment("AGENT_MQTT_PASSWORD_FILE")?);
        let use_tls = string_from_environment("AGENT_MQTT_USE_TLS")?
            .map(|v| v.parse::<bool>())
            .transpose()
            .map_err(|e| format!("AGENT_MQTT_USE_TLS: {e}"))?;
        let ca_file = Some(string_from_environment("AGENT_MQTT_CA_FILE")?);
        let cert_file = Some(string_from_environment("AGENT_MQTT_CERT_FILE")?);
        let key_file = Some(string_from_environment("AGENT_MQTT_KEY_FILE")?);

        // NOTE: Do not error here on missing required values. It is valid to have empty values
        // if the caller will be overriding them via further builder calls; the `validate` step
        // is the authority on whether the final settings are usable.
        if client_id.is_none() {
            log::warn!("AGENT_MQTT_CLIENT_ID is not set in environment");
        }
        if hostname.is_none() {
            log::warn!("AGENT_MQTT_HOSTNAME is not set in environment");
        }

        Ok(Self {
            client_id,
            hostname,
            tcp_port,
            keep_alive,
            connack_timeout: Some(Duration::from_secs(30)),
            clean_session,
            username,
            password: None,
            password_file,
            use_tls,
            ca_file,
            cert_file,
            key_file,
        })
    }

    /// Validate the MQTT connection settings.
    ///
    /// # Errors
    /// Returns a `String` describing the error if
    /// - `hostname` is empty
    /// - `client_id` is empty and `clean_session` is false
    /// - `password` and `password_file` are both set
    /// - `key_file` is set and `cert_file` is not, or vice versa
    fn validate(&self) -> Result<(), String> {
        if let Some(hostname) = &self.hostname {
            if hostname.is_empty() {
                return Err("hostname cannot be empty".to_string());
            }
        }
        if let Some(client_id) = &self.client_id {
            let clean_session = self.clean_session.unwrap_or(true);
            if client_id.is_empty() && !clean_session {
                return Err("client_id is mandatory when clean_session is false".to_string());
            }
        }
        if let (Some(Some(_)), Some(Some(_))) = (&self.password, &self.password_file) {
            return Err("password and password_file should not both be set".to_string());
        }
        match (&self.cert_file, &self.key_file) {
            (Some(Some(cert)), Some(Some(key))) if cert.is_empty() || key.is_empty() => {
                Err("cert_file and key_file must both be non-empty if provided".to_string())
            }
            (Some(Some(_)), Some(Some(_))) | (None, None) => Ok(()),
            (Some(Some(_)), _) if !matches!(&self.key_file, Some(Some(_))) => {
                Err("cert_file and key_file must be provided together".to_string())
            }
            (_, Some(Some(_))) if !matches!(&self.cert_file, Some(Some(_))) => {
                Err("cert_file and key_file must be provided together".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Helper function to get an environment variable as a string.
fn string_from_environment(key: &str) -> Result<Option<String>, String> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None), // Handled by `validate` if the value is required.
        Err(VarError::NotUnicode(_)) => {
            Err("could not parse non-unicode environment variable".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn minimum_configuration() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test-client-id")
            .hostname("test-host")
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn empty_hostname_rejected() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test-client-id")
            .hostname(String::new())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn client_id_required_unless_clean_session() {
        let result = MqttConnectionSettingsBuilder::default()
            .hostname("test-host")
            .client_id(String::new())
            .clean_session(false)
            .build();
        assert!(result.is_err());

        let result = MqttConnectionSettingsBuilder::default()
            .hostname("test-host")
            .client_id(String::new())
            .clean_session(true)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn password_and_password_file_are_mutually_exclusive() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test-client-id")
            .hostname("test-host")
            .password("hunter2")
            .password_file("/path/to/password")
            .build();
        assert!(result.is_err());
    }

    #[test_case(Some("cert"), None; "cert without key")]
    #[test_case(None, Some("key"); "key without cert")]
    fn cert_and_key_must_be_provided_together(cert: Option<&str>, key: Option<&str>) {
        let mut builder = MqttConnectionSettingsBuilder::default()
            .client_id("test-client-id")
            .hostname("test-host");
        if let Some(cert) = cert {
            builder = builder.cert_file(cert);
        }
        if let Some(key) = key {
            builder = builder.key_file(key);
        }
        assert!(builder.build().is_err());
    }

    #[test]
    fn connect_info_carries_resolved_settings() {
        let settings = MqttConnectionSettingsBuilder::default()
            .client_id("test-client-id")
            .hostname("test-host")
            .clean_session(false)
            .keep_alive(Duration::from_secs(45))
            .build()
            .unwrap();
        let info = settings.connect_info().unwrap();
        assert_eq!(info.client_id, "test-client-id");
        assert!(!info.clean_session);
        assert_eq!(info.keep_alive_secs, 45);
    }

    #[test]
    fn from_environment_minimal_configuration() {
        temp_env::with_vars(
            [
                ("AGENT_MQTT_CLIENT_ID", Some("test-client-id")),
                ("AGENT_MQTT_HOSTNAME", Some("test.hostname.com")),
            ],
            || {
                let builder = MqttConnectionSettingsBuilder::from_environment().unwrap();
                assert_eq!(builder.client_id, Some("test-client-id".to_string()));
                assert_eq!(builder.hostname, Some("test.hostname.com".to_string()));
                assert!(builder.build().is_ok());
            },
        );
    }

    #[test_case("AGENT_MQTT_TCP_PORT", "not numeric"; "tcp_port")]
    #[test_case("AGENT_MQTT_KEEP_ALIVE", "not numeric"; "keep_alive")]
    #[test_case("AGENT_MQTT_CLEAN_SESSION", "not boolean"; "clean_session")]
    #[test_case("AGENT_MQTT_USE_TLS", "not boolean"; "use_tls")]
    fn from_environment_rejects_unparseable_values(env_var: &str, invalid_value: &str) {
        temp_env::with_vars(
            [
                ("AGENT_MQTT_CLIENT_ID", Some("test-client-id")),
                ("AGENT_MQTT_HOSTNAME", Some("test.hostname.com")),
                (env_var, Some(invalid_value)),
            ],
            || {
                assert!(MqttConnectionSettingsBuilder::from_environment().is_err());
            },
        );
    }

    #[test]
    fn from_environment_missing_required_values_still_builds_a_builder() {
        temp_env::with_vars(
            [
                ("AGENT_MQTT_CLIENT_ID", None::<&str>),
                ("AGENT_MQTT_HOSTNAME", None::<&str>),
            ],
            || {
                let builder = MqttConnectionSettingsBuilder::from_environment().unwrap();
                assert!(builder.build().is_err());
            },
        );
    }
}
