// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification of free-text log lines.
//!
//! A recognizer decides whether a line starts a fresh log entry and, if so,
//! what its severity is. Lines that are not recognized (stack frames, wrapped
//! output, blank separators) are treated as continuations of the previous
//! entry.
//!
//! Two strategies are provided:
//! - **[`DefaultRecognizer`]**: looks for a severity keyword at the start of the line
//! - **[`GrokRecognizer`]**: matches a Grok pattern and extracts its named captures

pub mod grok;

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::config::RecognizerSettings;
use crate::errors::ConfigError;
use crate::severity::{Severity, SEVERITY_NAMES};
use grok::GrokCompiler;

/// Capture name that carries the severity in Grok patterns unless configured
/// otherwise.
pub const DEFAULT_SEVERITY_TAG: &str = "LOGLEVEL";

/// Characters that may open a one-character log line.
const SINGLE_CHAR_OPENERS: [char; 3] = ['[', '{', '|'];

/// Outcome of classifying a single line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recognition {
    pub line: String,
    /// `None` when the line is not a log line.
    pub severity: Option<Severity>,
    /// Extracted fields. Always empty when `severity` is `None`.
    pub fields: HashMap<String, String>,
}

impl Recognition {
    #[must_use]
    pub fn not_a_log_line(line: &str) -> Self {
        Recognition {
            line: line.to_string(),
            severity: None,
            fields: HashMap::new(),
        }
    }

    #[must_use]
    pub fn log_line(line: &str, severity: Severity, fields: HashMap<String, String>) -> Self {
        Recognition {
            line: line.to_string(),
            severity: Some(severity),
            fields,
        }
    }

    #[must_use]
    pub fn is_log_line(&self) -> bool {
        self.severity.is_some()
    }
}

/// Classifies raw lines. Implementations are stateless per call.
pub trait LineRecognizer: Send + Sync {
    fn recognize(&self, line: &str) -> Recognition;
}

/// Keyword heuristic: a line is a log line when it starts with a severity name.
#[derive(Debug, Clone)]
pub struct DefaultRecognizer {
    level_pattern: Regex,
}

impl Default for DefaultRecognizer {
    fn default() -> Self {
        let names = SEVERITY_NAMES
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join("|");
        #[allow(clippy::expect_used)]
        let level_pattern =
            Regex::new(&format!("(?i)^({names})")).expect("severity names form a valid pattern");
        DefaultRecognizer { level_pattern }
    }
}

impl DefaultRecognizer {
    /// A lone character that cannot open a log entry, e.g. a closing brace of a
    /// dumped structure.
    fn is_fragment(line: &str) -> bool {
        let mut chars = line.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => !(c.is_alphanumeric() || SINGLE_CHAR_OPENERS.contains(&c)),
            _ => false,
        }
    }
}

impl LineRecognizer for DefaultRecognizer {
    fn recognize(&self, line: &str) -> Recognition {
        if Self::is_fragment(line) {
            return Recognition::not_a_log_line(line);
        }

        self.level_pattern
            .captures(line)
            .and_then(|captures| captures.get(1))
            .and_then(|name| Severity::from_name(name.as_str()))
            .map_or_else(
                || Recognition::not_a_log_line(line),
                |severity| Recognition::log_line(line, severity, HashMap::new()),
            )
    }
}

/// Pattern-based recognizer built from a Grok expression.
///
/// Every named capture except the severity tag becomes an extracted field.
#[derive(Debug, Clone)]
pub struct GrokRecognizer {
    pattern: Regex,
    severity_tag: String,
}

impl GrokRecognizer {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        Self::with_compiler(&GrokCompiler::default(), pattern, DEFAULT_SEVERITY_TAG)
    }

    pub fn with_compiler(
        compiler: &GrokCompiler,
        pattern: &str,
        severity_tag: &str,
    ) -> Result<Self, ConfigError> {
        Ok(GrokRecognizer {
            pattern: compiler.compile(pattern)?,
            severity_tag: severity_tag.to_string(),
        })
    }
}

impl LineRecognizer for GrokRecognizer {
    fn recognize(&self, line: &str) -> Recognition {
        let Some(captures) = self.pattern.captures(line) else {
            return Recognition::not_a_log_line(line);
        };

        let severity = captures
            .name(&self.severity_tag)
            .and_then(|tag| Severity::from_name(tag.as_str()));
        let Some(severity) = severity else {
            return Recognition::not_a_log_line(line);
        };

        let fields = self
            .pattern
            .capture_names()
            .flatten()
            .filter(|name| *name != self.severity_tag)
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|value| (name.to_string(), value.as_str().to_string()))
            })
            .collect();
        Recognition::log_line(line, severity, fields)
    }
}

/// Builds the recognizer selected by configuration.
///
/// Fails eagerly on an unknown recognizer type or a missing/invalid pattern so
/// misconfiguration is reported before any record flows.
pub fn create_recognizer(
    settings: &RecognizerSettings,
) -> Result<Arc<dyn LineRecognizer>, ConfigError> {
    match settings.kind.as_str() {
        "default" => Ok(Arc::new(DefaultRecognizer::default())),
        "grok" => {
            let pattern = settings
                .pattern
                .as_deref()
                .filter(|pattern| !pattern.trim().is_empty())
                .ok_or(ConfigError::MissingPattern)?;

            let mut compiler = GrokCompiler::default();
            for (name, definition) in &settings.patterns {
                compiler.add_pattern(name.clone(), definition.clone());
            }
            let tag = settings
                .severity_tag
                .as_deref()
                .unwrap_or(DEFAULT_SEVERITY_TAG);
            Ok(Arc::new(GrokRecognizer::with_compiler(
                &compiler, pattern, tag,
            )?))
        }
        other => Err(ConfigError::UnsupportedRecognizer(other.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_recognizes_error_prefix() {
        let recognition = DefaultRecognizer::default().recognize("ERROR failed");
        assert_eq!(recognition.severity, Some(Severity::Error));
        assert!(recognition.fields.is_empty());
        assert_eq!(recognition.line, "ERROR failed");
    }

    #[test]
    fn test_default_is_case_insensitive() {
        let recognizer = DefaultRecognizer::default();
        assert_eq!(
            recognizer.recognize("warning: disk almost full").severity,
            Some(Severity::Warning)
        );
        assert_eq!(
            recognizer.recognize("Fatal: out of memory").severity,
            Some(Severity::Critical)
        );
        assert_eq!(
            recognizer.recognize("debug cache miss").severity,
            Some(Severity::Debug)
        );
    }

    #[test]
    fn test_default_requires_keyword_at_start() {
        let recognizer = DefaultRecognizer::default();
        assert!(!recognizer.recognize(" stack trace").is_log_line());
        assert!(!recognizer.recognize("request ERROR").is_log_line());
        assert!(!recognizer.recognize("Traceback (most recent call last):").is_log_line());
        assert!(!recognizer.recognize("").is_log_line());
    }

    #[test]
    fn test_default_single_character_lines() {
        let recognizer = DefaultRecognizer::default();
        assert!(!recognizer.recognize("}").is_log_line());
        assert!(!recognizer.recognize(")").is_log_line());
        // openers are not fragments, but carry no severity either
        assert!(!recognizer.recognize("[").is_log_line());
        assert!(!recognizer.recognize("a").is_log_line());
    }

    #[test]
    fn test_grok_extracts_fields_and_severity() {
        let recognizer =
            GrokRecognizer::new("%{TIMESTAMP_ISO8601:time} %{LOGLEVEL:LOGLEVEL} %{GREEDYDATA:text}")
                .unwrap();
        let recognition = recognizer.recognize("2024-01-02 03:04:05 WARNING low disk");
        assert_eq!(recognition.severity, Some(Severity::Warning));
        assert_eq!(recognition.fields["time"], "2024-01-02 03:04:05");
        assert_eq!(recognition.fields["text"], "low disk");
        assert!(!recognition.fields.contains_key("LOGLEVEL"));
    }

    #[test]
    fn test_grok_no_match() {
        let recognizer = GrokRecognizer::new("%{INT:pid} %{LOGLEVEL:LOGLEVEL}").unwrap();
        let recognition = recognizer.recognize("    at Foo.bar(Foo.java:10)");
        assert_eq!(recognition, Recognition::not_a_log_line("    at Foo.bar(Foo.java:10)"));
    }

    #[test]
    fn test_grok_without_severity_yields_no_fields() {
        let recognizer = GrokRecognizer::new("%{INT:pid} %{GREEDYDATA:text}").unwrap();
        let recognition = recognizer.recognize("42 hello");
        assert!(!recognition.is_log_line());
        assert!(recognition.fields.is_empty());
    }

    #[test]
    fn test_grok_unknown_severity_name() {
        let recognizer = GrokRecognizer::new("%{LOGLEVEL:LOGLEVEL} %{GREEDYDATA:text}").unwrap();
        let recognition = recognizer.recognize("NOTICE something");
        assert!(!recognition.is_log_line());
        assert!(recognition.fields.is_empty());
    }

    #[test]
    fn test_create_recognizer() {
        let settings = RecognizerSettings::default();
        assert!(create_recognizer(&settings).is_ok());

        let settings = RecognizerSettings {
            kind: "grok".to_string(),
            pattern: Some("%{LOGLEVEL:LOGLEVEL} %{GREEDYDATA:text}".to_string()),
            ..Default::default()
        };
        let recognizer = create_recognizer(&settings).unwrap();
        assert_eq!(
            recognizer.recognize("ERROR bad").severity,
            Some(Severity::Error)
        );
    }

    #[test]
    fn test_create_recognizer_errors() {
        let settings = RecognizerSettings {
            kind: "grok".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_recognizer(&settings),
            Err(ConfigError::MissingPattern)
        ));

        let settings = RecognizerSettings {
            kind: "json".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_recognizer(&settings),
            Err(ConfigError::UnsupportedRecognizer(kind)) if kind == "json"
        ));
    }

    #[test]
    fn test_create_recognizer_custom_severity_tag() {
        let settings = RecognizerSettings {
            kind: "grok".to_string(),
            pattern: Some("\\[%{WORD:lvl}\\] %{GREEDYDATA:text}".to_string()),
            severity_tag: Some("lvl".to_string()),
            ..Default::default()
        };
        let recognition = create_recognizer(&settings).unwrap().recognize("[info] up");
        assert_eq!(recognition.severity, Some(Severity::Info));
        assert_eq!(recognition.fields.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_keyword_prefix_is_recognized(
            index in 0usize..SEVERITY_NAMES.len(),
            rest in "[ a-z0-9]{0,20}",
        ) {
            let (name, severity) = SEVERITY_NAMES[index];
            let line = format!("{}{}", name.to_lowercase(), rest);
            let recognition = DefaultRecognizer::default().recognize(&line);
            prop_assert_eq!(recognition.severity, Some(severity));
            prop_assert!(recognition.fields.is_empty());
        }

        #[test]
        fn prop_unrecognized_lines_have_no_fields(line in "\\PC{0,30}") {
            let recognition = DefaultRecognizer::default().recognize(&line);
            if recognition.severity.is_none() {
                prop_assert!(recognition.fields.is_empty());
            }
        }
    }
}
