// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Grok pattern compilation.
//!
//! A Grok pattern is a regular expression with `%{SYNTAX}` and
//! `%{SYNTAX:name}` references to named sub-patterns. References are expanded
//! recursively against a pattern library; a reference with a name becomes a
//! named capture group, one without a name becomes a plain group. A trailing
//! type annotation (`%{INT:pid:int}`) is accepted and ignored.
//!
//! ```text
//! %{TIMESTAMP_ISO8601:time} %{LOGLEVEL:LOGLEVEL} %{GREEDYDATA:message}
//! ```

use std::collections::HashMap;

use regex::Regex;

use crate::errors::ConfigError;

/// Nesting depth at which expansion gives up, catching self-referencing
/// definitions.
const MAX_EXPANSION_DEPTH: usize = 32;

/// Built-in pattern library, a subset of the standard Logstash definitions
/// rewritten without look-around so they compile with the `regex` crate.
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    ("USERNAME", r"[a-zA-Z0-9._-]+"),
    ("USER", r"%{USERNAME}"),
    ("INT", r"(?:[+-]?(?:[0-9]+))"),
    ("BASE10NUM", r"(?:[+-]?(?:[0-9]+(?:\.[0-9]+)?|\.[0-9]+))"),
    ("NUMBER", r"(?:%{BASE10NUM})"),
    ("BASE16NUM", r"(?:0[xX])?[0-9a-fA-F]+"),
    ("POSINT", r"\b(?:[1-9][0-9]*)\b"),
    ("NONNEGINT", r"\b(?:[0-9]+)\b"),
    ("WORD", r"\b\w+\b"),
    ("NOTSPACE", r"\S+"),
    ("SPACE", r"\s*"),
    ("DATA", r".*?"),
    ("GREEDYDATA", r".*"),
    ("QUOTEDSTRING", r#"(?:"(?:\\.|[^\\"])*"|'(?:\\.|[^\\'])*')"#),
    (
        "UUID",
        r"[A-Fa-f0-9]{8}-(?:[A-Fa-f0-9]{4}-){3}[A-Fa-f0-9]{12}",
    ),
    (
        "IPV4",
        r"(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)",
    ),
    ("IPV6", r"(?:[0-9A-Fa-f]{0,4}:){2,7}[0-9A-Fa-f]{0,4}"),
    ("IP", r"(?:%{IPV6}|%{IPV4})"),
    (
        "HOSTNAME",
        r"\b(?:[0-9A-Za-z][0-9A-Za-z-]{0,62})(?:\.(?:[0-9A-Za-z][0-9A-Za-z-]{0,62}))*\.?\b",
    ),
    ("IPORHOST", r"(?:%{IP}|%{HOSTNAME})"),
    ("HOSTPORT", r"%{IPORHOST}:%{POSINT}"),
    ("UNIXPATH", r"(?:/[\w_%!$@:.,+~-]*)+"),
    ("PATH", r"%{UNIXPATH}"),
    ("URIPATH", r"(?:/[A-Za-z0-9$.+!*'(){},~:;=@#%&_\-]*)+"),
    (
        "JAVACLASS",
        r"(?:[a-zA-Z$_][a-zA-Z$_0-9]*\.)*[a-zA-Z$_][a-zA-Z$_0-9]*",
    ),
    ("PROG", r"[\x21-\x5a\x5c\x5e-\x7e]+"),
    ("SYSLOGPROG", r"%{PROG:program}(?:\[%{POSINT:pid}\])?"),
    (
        "MONTH",
        r"\b(?:[Jj]an(?:uary)?|[Ff]eb(?:ruary)?|[Mm]ar(?:ch)?|[Aa]pr(?:il)?|[Mm]ay|[Jj]un(?:e)?|[Jj]ul(?:y)?|[Aa]ug(?:ust)?|[Ss]ep(?:tember)?|[Oo]ct(?:ober)?|[Nn]ov(?:ember)?|[Dd]ec(?:ember)?)\b",
    ),
    ("MONTHNUM", r"(?:0?[1-9]|1[0-2])"),
    ("MONTHDAY", r"(?:(?:0[1-9])|(?:[12][0-9])|(?:3[01])|[1-9])"),
    (
        "DAY",
        r"(?:Mon(?:day)?|Tue(?:sday)?|Wed(?:nesday)?|Thu(?:rsday)?|Fri(?:day)?|Sat(?:urday)?|Sun(?:day)?)",
    ),
    ("YEAR", r"(?:\d\d){1,2}"),
    ("HOUR", r"(?:2[0123]|[01]?[0-9])"),
    ("MINUTE", r"(?:[0-5][0-9])"),
    ("SECOND", r"(?:(?:[0-5]?[0-9]|60)(?:[:.,][0-9]+)?)"),
    ("TIME", r"%{HOUR}:%{MINUTE}(?::%{SECOND})?"),
    ("DATE_US", r"%{MONTHNUM}[/-]%{MONTHDAY}[/-]%{YEAR}"),
    ("DATE_EU", r"%{MONTHDAY}[./-]%{MONTHNUM}[./-]%{YEAR}"),
    ("DATE", r"%{DATE_US}|%{DATE_EU}"),
    ("DATESTAMP", r"%{DATE}[- ]%{TIME}"),
    ("ISO8601_TIMEZONE", r"(?:Z|[+-]%{HOUR}(?::?%{MINUTE}))"),
    (
        "TIMESTAMP_ISO8601",
        r"%{YEAR}-%{MONTHNUM}-%{MONTHDAY}[T ]%{HOUR}:?%{MINUTE}(?::?%{SECOND})?%{ISO8601_TIMEZONE}?",
    ),
    ("SYSLOGTIMESTAMP", r"%{MONTH} +%{MONTHDAY} %{TIME}"),
    (
        "LOGLEVEL",
        r"(?:[Aa]lert|ALERT|[Tt]race|TRACE|[Dd]ebug|DEBUG|[Nn]otice|NOTICE|[Ii]nfo|INFO|[Ww]arn(?:ing)?|WARN(?:ING)?|[Ee]rr(?:or)?|ERR(?:OR)?|[Cc]rit(?:ical)?|CRIT(?:ICAL)?|[Ff]atal|FATAL|[Ss]evere|SEVERE|[Ee]merg(?:ency)?|EMERG(?:ENCY)?)",
    ),
];

/// Expands Grok references and compiles the result.
#[derive(Debug, Clone)]
pub struct GrokCompiler {
    patterns: HashMap<String, String>,
    reference: Regex,
}

impl Default for GrokCompiler {
    fn default() -> Self {
        #[allow(clippy::expect_used)]
        let reference = Regex::new(r"%\{(\w+)(?::([\w.@\[\]-]+))?(?::(\w+))?\}")
            .expect("grok reference pattern is valid");
        GrokCompiler {
            patterns: BUILTIN_PATTERNS
                .iter()
                .map(|(name, pattern)| ((*name).to_string(), (*pattern).to_string()))
                .collect(),
            reference,
        }
    }
}

impl GrokCompiler {
    /// Adds or replaces a named pattern definition.
    pub fn add_pattern(&mut self, name: impl Into<String>, pattern: impl Into<String>) {
        self.patterns.insert(name.into(), pattern.into());
    }

    /// Expands `pattern` and compiles it into a regex anchored at the start of
    /// the line.
    pub fn compile(&self, pattern: &str) -> Result<Regex, ConfigError> {
        let expanded = self.expand(pattern, pattern, 0)?;
        Regex::new(&format!("^(?:{expanded})")).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
    }

    fn expand(&self, source: &str, pattern: &str, depth: usize) -> Result<String, ConfigError> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(ConfigError::InvalidPattern {
                pattern: source.to_string(),
                reason: "pattern references nest too deeply".to_string(),
            });
        }

        let mut expanded = String::with_capacity(pattern.len());
        let mut last = 0;
        for captures in self.reference.captures_iter(pattern) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let syntax = &captures[1];
            let Some(definition) = self.patterns.get(syntax) else {
                return Err(ConfigError::InvalidPattern {
                    pattern: source.to_string(),
                    reason: format!("unknown pattern %{{{syntax}}}"),
                });
            };
            let inner = self.expand(source, definition, depth + 1)?;

            expanded.push_str(&pattern[last..whole.start()]);
            match captures.get(2) {
                Some(name) => {
                    expanded.push_str("(?P<");
                    expanded.push_str(name.as_str());
                    expanded.push('>');
                }
                None => expanded.push_str("(?:"),
            }
            expanded.push_str(&inner);
            expanded.push(')');
            last = whole.end();
        }
        expanded.push_str(&pattern[last..]);
        Ok(expanded)
    }
}
