// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! GELF 1.1 payload encoding.
//!
//! ```json
//! {
//!   "version": "1.1",
//!   "host": "web-1",
//!   "short_message": "Traceback (most recent call last):",
//!   "full_message": "Traceback (most recent call last):\n  File x",
//!   "timestamp": 1700000000.123,
//!   "level": 3,
//!   "_logger": "web",
//!   "_program": "web"
//! }
//! ```

use std::io::{self, Write};

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde_json::{Map, Value};

use crate::errors::SinkError;
use crate::record::LogRecord;

pub const GELF_VERSION: &str = "1.1";

/// Additional field name GELF reserves for the server.
const RESERVED_ID: &str = "_id";

#[derive(Debug, Clone)]
pub struct GelfEncoder {
    host: String,
    optional_fields: Map<String, Value>,
}

impl GelfEncoder {
    pub fn new(host: impl Into<String>, optional_fields: Map<String, Value>) -> Self {
        GelfEncoder {
            host: host.into(),
            optional_fields,
        }
    }

    #[must_use]
    pub fn encode(&self, record: &LogRecord) -> Map<String, Value> {
        let message = record.message();
        let short_message = message.lines().next().unwrap_or_default().to_string();

        let mut payload = Map::new();
        payload.insert("version".into(), GELF_VERSION.into());
        payload.insert("host".into(), self.host.clone().into());
        if short_message != message {
            payload.insert("full_message".into(), message.into());
        }
        payload.insert("short_message".into(), short_message.into());
        #[allow(clippy::cast_precision_loss)]
        let timestamp = record.timestamp.timestamp_millis() as f64 / 1000.0;
        payload.insert("timestamp".into(), timestamp.into());
        payload.insert("level".into(), record.severity.syslog_level().into());
        payload.insert("_logger".into(), record.name.clone().into());

        if let Some(thread_name) = &record.thread_name {
            payload.insert("_thread_name".into(), thread_name.clone().into());
        }
        if let Some(location) = &record.location {
            payload.insert("_file".into(), location.file.clone().into());
            payload.insert("_line".into(), location.line.into());
            if let Some(function) = &location.function {
                payload.insert("_function".into(), function.clone().into());
            }
        }
        if let Some(program) = &record.program {
            payload.insert("_program".into(), program.clone().into());
        }

        for (key, value) in self.optional_fields.iter().chain(record.extra.iter()) {
            let key = additional_field_name(key);
            if key == RESERVED_ID {
                continue;
            }
            payload.insert(key, scalar(value));
        }
        payload
    }

    /// Serializes `record` to a JSON document.
    pub fn to_bytes(&self, record: &LogRecord) -> Result<Vec<u8>, SinkError> {
        serde_json::to_vec(&self.encode(record))
            .map_err(|e| SinkError::Other(format!("failed to serialize GELF payload: {e}")))
    }
}

fn additional_field_name(key: &str) -> String {
    if key.starts_with('_') {
        key.to_string()
    } else {
        format!("_{key}")
    }
}

/// GELF additional fields hold strings or numbers only.
fn scalar(value: &Value) -> Value {
    match value {
        Value::String(_) | Value::Number(_) => value.clone(),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Null => Value::String(String::new()),
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
    }
}

pub fn compress_zlib(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn compress_gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
