// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Handler configuration.
//!
//! Settings are read from YAML (or any JSON-like value) and may then be
//! overridden from the environment:
//!
//! ```yaml
//! handlers:
//!   default:
//!     protocol: UDP
//!     host: graylog.internal
//!     level: INFO
//!     recognizer:
//!       type: grok
//!       pattern: "%{TIMESTAMP_ISO8601:time} %{LOGLEVEL:LOGLEVEL} %{GREEDYDATA:text}"
//! ```
//!
//! | Variable                  | Effect                                          |
//! |---------------------------|-------------------------------------------------|
//! | `GRAYLOG_ENABLED`         | `true`/`True`/`1` enables, anything else disables |
//! | `GRAYLOG_PROTOCOL`        | protocol of the `default` handler               |
//! | `GRAYLOG_HOST`            | host of the `default` handler                   |
//! | `GRAYLOG_PORT`            | port of the `default` handler                   |
//! | `GRAYLOG_OPTIONAL_FIELDS` | JSON object of additional fields                |

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::errors::ConfigError;
use crate::severity::Severity;

pub const DEFAULT_HANDLER: &str = "default";
pub const DEFAULT_PORT: u16 = 12201;
pub const DEFAULT_PATH: &str = "/gelf";
pub const DEFAULT_TIMEOUT: f64 = 5.0;
pub const DEFAULT_CHUNK_SIZE: usize = 1300;
pub const DEFAULT_MULTILINE_TIMEOUT: f64 = 0.5;

/// Upper bound, in seconds, of `timeout` and `multiline_timeout`.
pub const MAX_TIMEOUT: f64 = 86_400.0;

/// Largest UDP payload minus the GELF chunk header.
pub const MAX_CHUNK_SIZE: usize = 65_507 - 12;

const ENV_ENABLED: &str = "GRAYLOG_ENABLED";
const ENV_PROTOCOL: &str = "GRAYLOG_PROTOCOL";
const ENV_HOST: &str = "GRAYLOG_HOST";
const ENV_PORT: &str = "GRAYLOG_PORT";
const ENV_OPTIONAL_FIELDS: &str = "GRAYLOG_OPTIONAL_FIELDS";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Udp,
    Tcp,
    Tls,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(Protocol::Http),
            "HTTPS" => Ok(Protocol::Https),
            "UDP" => Ok(Protocol::Udp),
            "TCP" => Ok(Protocol::Tcp),
            "TLS" => Ok(Protocol::Tls),
            _ => Err(format!(
                "Invalid protocol: '{s}'. Valid protocols are: HTTP, HTTPS, UDP, TCP, TLS"
            )),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
            Protocol::Tls => "TLS",
        })
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Protocol::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Line recognizer selection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecognizerSettings {
    /// `default` or `grok`.
    #[serde(rename = "type")]
    pub kind: String,
    pub pattern: Option<String>,
    /// Capture carrying the severity, `LOGLEVEL` when unset.
    pub severity_tag: Option<String>,
    /// Extra Grok definitions available to `pattern`.
    pub patterns: BTreeMap<String, String>,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        RecognizerSettings {
            kind: "default".to_string(),
            pattern: None,
            severity_tag: None,
            patterns: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct HandlerSettings {
    pub enabled: bool,
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    /// Static additional fields attached to every message.
    pub optional_fields: Map<String, Value>,
    /// HTTP(S) only.
    pub path: String,
    /// Compress UDP (zlib) and HTTP (gzip) payloads.
    pub compress: bool,
    /// Network timeout in seconds.
    pub timeout: f64,
    /// UDP chunk payload size in bytes.
    pub chunk_size: usize,
    /// Verify server certificates (HTTPS, TLS).
    pub validate: bool,
    /// PEM bundle of trusted CAs. System roots are used when unset.
    pub ca_certs: Option<PathBuf>,
    /// TLS client certificate chain (PEM).
    pub certfile: Option<PathBuf>,
    /// TLS client key (PEM). Read from `certfile` when unset.
    pub keyfile: Option<PathBuf>,
    /// Records below this severity are not forwarded.
    pub level: Severity,
    /// Idle time in seconds after which a multi-line group is complete.
    pub multiline_timeout: f64,
    pub recognizer: RecognizerSettings,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        HandlerSettings {
            enabled: true,
            protocol: Protocol::Http,
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            optional_fields: Map::new(),
            path: DEFAULT_PATH.to_string(),
            compress: true,
            timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            validate: false,
            ca_certs: None,
            certfile: None,
            keyfile: None,
            level: Severity::Debug,
            multiline_timeout: DEFAULT_MULTILINE_TIMEOUT,
            recognizer: RecognizerSettings::default(),
        }
    }
}

impl HandlerSettings {
    /// Network timeout of the transport.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        seconds("timeout", self.timeout).map_err(ConfigError::Invalid)
    }

    pub fn multiline_timeout(&self) -> Result<Duration, ConfigError> {
        seconds("multiline_timeout", self.multiline_timeout).map_err(ConfigError::Invalid)
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid(format!("handler {name}: {reason}"));

        if self.host.trim().is_empty() {
            return Err(invalid("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(invalid("port must be greater than 0".to_string()));
        }
        seconds("timeout", self.timeout).map_err(invalid)?;
        seconds("multiline_timeout", self.multiline_timeout).map_err(invalid)?;
        if self.protocol == Protocol::Udp && !(1..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(invalid(format!(
                "chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if matches!(self.protocol, Protocol::Http | Protocol::Https) && !self.path.starts_with('/')
        {
            return Err(invalid(format!("path must start with '/', got '{}'", self.path)));
        }
        if self.protocol == Protocol::Tls && self.keyfile.is_some() && self.certfile.is_none() {
            return Err(invalid("keyfile requires certfile".to_string()));
        }

        match self.recognizer.kind.as_str() {
            "default" => Ok(()),
            "grok" => match self.recognizer.pattern.as_deref() {
                Some(pattern) if !pattern.trim().is_empty() => Ok(()),
                _ => Err(ConfigError::MissingPattern),
            },
            other => Err(ConfigError::UnsupportedRecognizer(other.to_string())),
        }
    }
}

/// Settings of every configured handler, keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GelfSettings {
    pub handlers: BTreeMap<String, HandlerSettings>,
}

impl GelfSettings {
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        if source.trim().is_empty() {
            return Ok(GelfSettings::default());
        }
        serde_yaml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        if value.is_null() {
            return Ok(GelfSettings::default());
        }
        serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.handlers
            .iter()
            .try_for_each(|(name, handler)| handler.validate(name))
    }
}

/// Overrides read from `GRAYLOG_*` variables.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvOverrides {
    pub enabled: Option<bool>,
    pub protocol: Option<Protocol>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub optional_fields: Option<Map<String, Value>>,
}

impl EnvOverrides {
    /// Reads overrides from `env`, usually `std::env::vars().collect()`.
    pub fn from_env(env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let enabled = env
            .get(ENV_ENABLED)
            .map(|value| matches!(value.trim(), "true" | "True" | "1"));

        let protocol = env
            .get(ENV_PROTOCOL)
            .map(|value| Protocol::from_str(value.trim()))
            .transpose()
            .map_err(|reason| environment_error(ENV_PROTOCOL, reason))?;

        let host = env.get(ENV_HOST).map(|value| value.trim().to_string());

        let port = env
            .get(ENV_PORT)
            .map(|value| value.trim().parse::<u16>())
            .transpose()
            .map_err(|e| environment_error(ENV_PORT, e.to_string()))?;

        let optional_fields = env
            .get(ENV_OPTIONAL_FIELDS)
            .map(|value| match serde_json::from_str::<Value>(value) {
                Ok(Value::Object(fields)) => Ok(fields),
                Ok(_) => Err("expected a JSON object".to_string()),
                Err(e) => Err(e.to_string()),
            })
            .transpose()
            .map_err(|reason| environment_error(ENV_OPTIONAL_FIELDS, reason))?;

        Ok(EnvOverrides {
            enabled,
            protocol,
            host,
            port,
            optional_fields,
        })
    }

    fn touches_handler(&self) -> bool {
        self.protocol.is_some()
            || self.host.is_some()
            || self.port.is_some()
            || self.optional_fields.is_some()
    }

    /// Creates or patches the `default` handler. Returns the resulting
    /// extension enablement given the configured one.
    pub fn apply(&self, enabled: bool, settings: &mut GelfSettings) -> bool {
        if self.touches_handler() {
            let handler = settings
                .handlers
                .entry(DEFAULT_HANDLER.to_string())
                .or_default();
            handler.enabled = true;
            if let Some(protocol) = self.protocol {
                handler.protocol = protocol;
            }
            if let Some(host) = &self.host {
                handler.host.clone_from(host);
            }
            if let Some(port) = self.port {
                handler.port = port;
            }
            if let Some(fields) = &self.optional_fields {
                handler.optional_fields.clone_from(fields);
            }
        }
        self.enabled.unwrap_or(enabled)
    }
}

/// Converts a setting in seconds, rejecting values no `Duration` or deadline
/// can hold.
fn seconds(name: &str, value: f64) -> Result<Duration, String> {
    if !(value > 0.0 && value <= MAX_TIMEOUT) {
        return Err(format!(
            "{name} must be a number of seconds in (0, {MAX_TIMEOUT}], got {value}"
        ));
    }
    Duration::try_from_secs_f64(value).map_err(|e| format!("{name} of {value} seconds: {e}"))
}

fn environment_error(name: &str, reason: String) -> ConfigError {
    ConfigError::Environment {
        name: name.to_string(),
        reason,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_default_handler_is_valid() {
        assert!(HandlerSettings::default().validate("default").is_ok());
    }

    #[test]
    fn test_yaml_defaults() {
        let settings = GelfSettings::from_yaml(
            r"
handlers:
  graylog:
    protocol: udp
    host: graylog.internal
",
        )
        .unwrap();
        let handler = &settings.handlers["graylog"];
        assert_eq!(handler.protocol, Protocol::Udp);
        assert_eq!(handler.host, "graylog.internal");
        assert_eq!(handler.port, 12201);
        assert!(handler.enabled);
        assert!(handler.compress);
        assert_eq!(handler.chunk_size, 1300);
        assert_eq!(handler.level, Severity::Debug);
        assert_eq!(handler.multiline_timeout().unwrap(), Duration::from_millis(500));
        assert_eq!(handler.timeout().unwrap(), Duration::from_secs(5));
        assert_eq!(handler.recognizer.kind, "default");
    }

    #[test]
    fn test_yaml_full_handler() {
        let settings = GelfSettings::from_yaml(
            r#"
handlers:
  graylog:
    enabled: false
    protocol: HTTPS
    host: logs.example.com
    port: 443
    path: /ingest
    level: warning
    multiline_timeout: 1.5
    optional_fields:
      env: prod
    recognizer:
      type: grok
      pattern: "%{LOGLEVEL:LOGLEVEL} %{GREEDYDATA:text}"
"#,
        )
        .unwrap();
        let handler = &settings.handlers["graylog"];
        assert!(!handler.enabled);
        assert_eq!(handler.protocol, Protocol::Https);
        assert_eq!(handler.path, "/ingest");
        assert_eq!(handler.level, Severity::Warning);
        assert_eq!(handler.optional_fields["env"], "prod");
        assert_eq!(handler.recognizer.kind, "grok");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(GelfSettings::from_yaml("").unwrap(), GelfSettings::default());
        assert_eq!(
            GelfSettings::from_value(Value::Null).unwrap(),
            GelfSettings::default()
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            GelfSettings::from_yaml("handlers: {x: {protocol: smtp}}"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            GelfSettings::from_yaml("handlers: {x: {level: loud}}"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_handler() {
        let cases = [
            HandlerSettings {
                host: "  ".to_string(),
                ..Default::default()
            },
            HandlerSettings {
                port: 0,
                ..Default::default()
            },
            HandlerSettings {
                timeout: 0.0,
                ..Default::default()
            },
            HandlerSettings {
                multiline_timeout: -1.0,
                ..Default::default()
            },
            HandlerSettings {
                protocol: Protocol::Udp,
                chunk_size: 0,
                ..Default::default()
            },
            HandlerSettings {
                path: "gelf".to_string(),
                ..Default::default()
            },
            HandlerSettings {
                protocol: Protocol::Tls,
                keyfile: Some(PathBuf::from("client.key")),
                ..Default::default()
            },
        ];
        for handler in cases {
            assert!(
                matches!(handler.validate("h"), Err(ConfigError::Invalid(_))),
                "{handler:?} should be invalid"
            );
        }
    }

    #[test]
    fn test_out_of_range_timeouts_are_errors() {
        for value in [1e30, f64::MAX, f64::INFINITY, f64::NAN, MAX_TIMEOUT + 1.0, 0.0] {
            let handler = HandlerSettings {
                protocol: Protocol::Tcp,
                timeout: value,
                ..Default::default()
            };
            assert!(matches!(handler.timeout(), Err(ConfigError::Invalid(_))), "{value}");
            assert!(matches!(handler.validate("h"), Err(ConfigError::Invalid(_))), "{value}");

            let handler = HandlerSettings {
                multiline_timeout: value,
                ..Default::default()
            };
            assert!(
                matches!(handler.multiline_timeout(), Err(ConfigError::Invalid(_))),
                "{value}"
            );
            assert!(matches!(handler.validate("h"), Err(ConfigError::Invalid(_))), "{value}");
        }

        let handler = HandlerSettings {
            timeout: MAX_TIMEOUT,
            multiline_timeout: MAX_TIMEOUT,
            ..Default::default()
        };
        assert!(handler.validate("h").is_ok());
        assert_eq!(handler.timeout().unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_yaml_tls_handler() {
        let settings = GelfSettings::from_yaml(
            r"
handlers:
  secure:
    protocol: tls
    host: graylog.internal
    validate: true
    ca_certs: /etc/ssl/ca.pem
    certfile: /etc/ssl/client.pem
",
        )
        .unwrap();
        let handler = &settings.handlers["secure"];
        assert_eq!(handler.protocol, Protocol::Tls);
        assert_eq!(handler.protocol.to_string(), "TLS");
        assert!(handler.validate);
        assert_eq!(handler.certfile, Some(PathBuf::from("/etc/ssl/client.pem")));
        assert_eq!(handler.keyfile, None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_recognizer() {
        let mut handler = HandlerSettings::default();
        handler.recognizer.kind = "grok".to_string();
        assert!(matches!(
            handler.validate("h"),
            Err(ConfigError::MissingPattern)
        ));

        handler.recognizer.kind = "magic".to_string();
        assert!(matches!(
            handler.validate("h"),
            Err(ConfigError::UnsupportedRecognizer(_))
        ));
    }

    #[test]
    fn test_env_enabled_values() {
        for (value, expected) in [("true", true), ("True", true), ("1", true), ("yes", false)] {
            let overrides = EnvOverrides::from_env(&env(&[("GRAYLOG_ENABLED", value)])).unwrap();
            assert_eq!(overrides.enabled, Some(expected), "{value}");
        }
        let overrides = EnvOverrides::from_env(&env(&[])).unwrap();
        assert_eq!(overrides, EnvOverrides::default());
    }

    #[test]
    fn test_env_creates_default_handler() {
        let overrides = EnvOverrides::from_env(&env(&[
            ("GRAYLOG_HOST", "graylog.internal"),
            ("GRAYLOG_OPTIONAL_FIELDS", r#"{"env": "prod"}"#),
        ]))
        .unwrap();

        let mut settings = GelfSettings::default();
        assert!(overrides.apply(true, &mut settings));

        let handler = &settings.handlers[DEFAULT_HANDLER];
        assert_eq!(handler.host, "graylog.internal");
        assert_eq!(handler.protocol, Protocol::Http);
        assert_eq!(handler.port, 12201);
        assert_eq!(handler.optional_fields["env"], "prod");
    }

    #[test]
    fn test_env_overrides_existing_handler() {
        let mut settings =
            GelfSettings::from_yaml("handlers: {default: {enabled: false, host: a, port: 1}}")
                .unwrap();
        let overrides = EnvOverrides::from_env(&env(&[
            ("GRAYLOG_PROTOCOL", "tcp"),
            ("GRAYLOG_PORT", "5555"),
            ("GRAYLOG_ENABLED", "0"),
        ]))
        .unwrap();

        assert!(!overrides.apply(true, &mut settings));
        let handler = &settings.handlers[DEFAULT_HANDLER];
        assert!(handler.enabled);
        assert_eq!(handler.host, "a");
        assert_eq!(handler.port, 5555);
        assert_eq!(handler.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_env_parse_errors() {
        for (name, value) in [
            ("GRAYLOG_PORT", "not-a-port"),
            ("GRAYLOG_PROTOCOL", "smtp"),
            ("GRAYLOG_OPTIONAL_FIELDS", "[1, 2]"),
            ("GRAYLOG_OPTIONAL_FIELDS", "{broken"),
        ] {
            let err = EnvOverrides::from_env(&env(&[(name, value)])).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Environment { name: n, .. } if n == name),
                "{name}={value}: {err}"
            );
        }
    }
}
