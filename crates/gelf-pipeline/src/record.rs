// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The enriched log record threaded through every pipeline stage.
//!
//! A record is created by the producer (one per output line of a supervised
//! program, or one per diagnostic event of the host), mutated in place by each
//! handler, and dropped once the terminal sink returns.

use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::severity::Severity;
use crate::{ENCAB, GELF_PROGRAM};

/// Key in `extra` that marks a record as never to be forwarded.
pub const SUPPRESS_KEY: &str = "suppress";

/// Key in `extra` naming the program a record originates from.
pub const PROGRAM_KEY: &str = "program";

/// Source code location of the call that produced a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub function: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LogRecord {
    /// Logger or source identifier, usually the supervised program name.
    pub name: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// Identity of the producing thread. Multi-line groups never span threads.
    pub thread: ThreadId,
    pub thread_name: Option<String>,
    pub location: Option<Location>,
    /// Raw text, or a template with `{}` placeholders when `args` is non-empty.
    pub msg: String,
    pub args: Vec<String>,
    /// Structured fields forwarded as GELF additional fields.
    pub extra: Map<String, Value>,
    pub suppress: bool,
    pub program: Option<String>,
    /// Whether the message starts a fresh log entry. `None` until classified.
    pub log_line: Option<bool>,
}

impl LogRecord {
    /// Creates a plain text record stamped with the current time and thread.
    pub fn new(name: impl Into<String>, severity: Severity, msg: impl Into<String>) -> Self {
        let current = thread::current();
        LogRecord {
            name: name.into(),
            severity,
            timestamp: Utc::now(),
            thread: current.id(),
            thread_name: current.name().map(str::to_string),
            location: None,
            msg: msg.into(),
            args: Vec::new(),
            extra: Map::new(),
            suppress: false,
            program: None,
            log_line: None,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Attaches structured fields. The `suppress` and `program` control keys
    /// are lifted out of the map into their dedicated fields.
    #[must_use]
    pub fn with_extra(mut self, mut extra: Map<String, Value>) -> Self {
        if let Some(suppress) = extra.remove(SUPPRESS_KEY) {
            self.suppress = suppress.as_bool().unwrap_or(false);
        }
        if let Some(Value::String(program)) = extra.remove(PROGRAM_KEY) {
            self.program = Some(program);
        }
        self.extra.extend(extra);
        self
    }

    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_log_line(mut self, log_line: bool) -> Self {
        self.log_line = Some(log_line);
        self
    }

    #[must_use]
    pub fn suppressed(mut self) -> Self {
        self.suppress = true;
        self
    }

    /// True when the record was produced by the host or by this pipeline.
    #[must_use]
    pub fn is_from_core(&self) -> bool {
        matches!(self.program.as_deref(), Some(ENCAB | GELF_PROGRAM))
    }

    /// True when the message is a template with positional arguments.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        !self.args.is_empty()
    }

    /// Renders the message, substituting positional arguments for `{}`.
    ///
    /// A template whose placeholder count does not match the arguments is
    /// returned verbatim.
    #[must_use]
    pub fn message(&self) -> String {
        if self.args.is_empty() {
            return self.msg.clone();
        }
        if self.msg.matches("{}").count() != self.args.len() {
            return self.msg.clone();
        }

        let mut rendered = String::with_capacity(self.msg.len());
        let mut pieces = self.msg.split("{}");
        if let Some(first) = pieces.next() {
            rendered.push_str(first);
        }
        for (piece, arg) in pieces.zip(&self.args) {
            rendered.push_str(arg);
            rendered.push_str(piece);
        }
        rendered
    }
}
