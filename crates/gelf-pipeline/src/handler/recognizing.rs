// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use serde_json::Value;

use crate::handler::Handler;
use crate::record::LogRecord;
use crate::recognizer::LineRecognizer;

/// Classifies free-text records before handing them on.
///
/// Structured, suppressed and core records pass through untouched.
pub struct Recognizing<H> {
    recognizer: Arc<dyn LineRecognizer>,
    next: H,
}

impl<H: Handler> Recognizing<H> {
    pub fn new(recognizer: Arc<dyn LineRecognizer>, next: H) -> Self {
        Recognizing { recognizer, next }
    }

    fn classify(&self, record: &mut LogRecord) {
        let recognition = self.recognizer.recognize(&record.message());
        match recognition.severity {
            Some(severity) => {
                record.severity = severity;
                for (name, value) in recognition.fields {
                    record.extra.insert(name, Value::String(value));
                }
                record.log_line = Some(true);
            }
            None => record.log_line = Some(false),
        }
    }
}

impl<H: Handler> Handler for Recognizing<H> {
    fn emit(&self, mut record: LogRecord) {
        if !(record.is_structured() || record.suppress || record.is_from_core()) {
            self.classify(&mut record);
        }
        self.next.emit(record);
    }

    fn close(&self) {
        self.next.close();
    }
}
