// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Severity levels assigned to log records.
//!
//! Several names collapse onto the same level:
//! - **CRITICAL**: also `EMERGENCY`, `ALERT`, `FATAL`
//! - **ERROR**
//! - **WARNING**: also `WARN`
//! - **INFO**
//! - **DEBUG**
//!
//! Names are matched case-insensitively. The canonical name of a level is the
//! first one in each group above.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

/// Every recognized severity name with the level it maps to, in the order the
/// default recognizer tries them.
pub(crate) const SEVERITY_NAMES: [(&str, Severity); 9] = [
    ("EMERGENCY", Severity::Critical),
    ("ALERT", Severity::Critical),
    ("CRITICAL", Severity::Critical),
    ("FATAL", Severity::Critical),
    ("ERROR", Severity::Error),
    ("WARN", Severity::Warning),
    ("WARNING", Severity::Warning),
    ("INFO", Severity::Info),
    ("DEBUG", Severity::Debug),
];

/// Importance of a log record, ordered from least to most severe.
///
/// The numeric codes follow the usual logging convention (`DEBUG = 10` up to
/// `CRITICAL = 50`) so thresholds compare naturally.
///
/// ```
/// use gelf_pipeline::severity::Severity;
/// use std::str::FromStr;
///
/// assert_eq!(Severity::from_str("warn").unwrap(), Severity::Warning);
/// assert_eq!(Severity::from_str("FATAL").unwrap().as_ref(), "CRITICAL");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Numeric severity code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Severity::Debug => 10,
            Severity::Info => 20,
            Severity::Warning => 30,
            Severity::Error => 40,
            Severity::Critical => 50,
        }
    }

    /// Syslog level used by GELF's `level` field.
    #[must_use]
    pub fn syslog_level(self) -> u8 {
        match self {
            Severity::Critical => 2,
            Severity::Error => 3,
            Severity::Warning => 4,
            Severity::Info => 6,
            Severity::Debug => 7,
        }
    }

    /// Looks up a severity by any of its names, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Severity> {
        SEVERITY_NAMES
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, severity)| *severity)
    }
}

impl AsRef<str> for Severity {
    fn as_ref(&self) -> &str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::from_name(s).ok_or_else(|| {
            format!(
                "Invalid severity: '{s}'. Valid severities are: debug, info, warn, warning, error, critical, fatal, alert, emergency"
            )
        })
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Severity::Error,
            tracing::Level::WARN => Severity::Warning,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::DEBUG | tracing::Level::TRACE => Severity::Debug,
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Severity::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_synonyms_share_code() {
        assert_eq!(
            Severity::from_name("WARN").unwrap().code(),
            Severity::from_name("WARNING").unwrap().code()
        );
        for name in ["FATAL", "ALERT", "EMERGENCY"] {
            assert_eq!(
                Severity::from_name(name).unwrap().code(),
                Severity::from_name("CRITICAL").unwrap().code()
            );
        }
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(Severity::from_name("warn").unwrap().to_string(), "WARNING");
        assert_eq!(Severity::from_name("Fatal").unwrap().to_string(), "CRITICAL");
        assert_eq!(Severity::Info.as_ref(), "INFO");
    }

    #[test]
    fn test_unknown_name() {
        assert!(Severity::from_name("notice").is_none());
        assert!(Severity::from_str("").is_err());
    }

    #[test]
    fn test_ordering_follows_codes() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(Severity::Error.code(), 40);
    }

    #[test]
    fn test_syslog_levels() {
        assert_eq!(Severity::Critical.syslog_level(), 2);
        assert_eq!(Severity::Debug.syslog_level(), 7);
    }

    #[test]
    fn test_deserialize() {
        let severity: Severity = serde_json::from_value(serde_json::json!("error")).unwrap();
        assert_eq!(severity, Severity::Error);
        assert!(serde_json::from_value::<Severity>(serde_json::json!("loud")).is_err());
    }
}
