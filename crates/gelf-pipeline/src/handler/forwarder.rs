// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{error, warn};

use crate::errors::SinkError;
use crate::handler::Handler;
use crate::layer::PipelineGuard;
use crate::record::LogRecord;
use crate::severity::Severity;
use crate::sink::Sink;
use crate::GELF_PROGRAM;

/// Bound of the consecutive failure counter.
const ERROR_COUNT_WRAP: u32 = 100;

/// Terminal stage: delivers records to a sink and absorbs every failure.
///
/// Connectivity failures are reported once per outage. The counter restarts at
/// zero on the next successful delivery, which re-enables the warning.
pub struct Forwarder<S> {
    name: String,
    threshold: Severity,
    sink: S,
    error_count: AtomicU32,
}

impl<S: Sink> Forwarder<S> {
    pub fn new(name: impl Into<String>, threshold: Severity, sink: S) -> Self {
        Forwarder {
            name: name.into(),
            threshold,
            sink,
            error_count: AtomicU32::new(0),
        }
    }

    /// Number of consecutive connectivity failures, modulo the wrap bound.
    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    fn connectivity_failure(&self, err: &SinkError) {
        // wraps to 1, not 0, so a long outage stays silent
        let previous = self
            .error_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(if count + 1 >= ERROR_COUNT_WRAP {
                    1
                } else {
                    count + 1
                })
            })
            .unwrap_or_else(|count| count);

        if previous == 0 {
            warn!(
                suppress = true,
                program = GELF_PROGRAM,
                "Handler {} failed to send log record to {}: {}",
                self.name,
                self.sink.destination(),
                err
            );
        }
    }

    fn unexpected_failure(&self, reason: &str) {
        error!(
            suppress = true,
            program = GELF_PROGRAM,
            "Handler {} raised an unexpected error sending log record to {}: {}",
            self.name,
            self.sink.destination(),
            reason
        );
    }
}

impl<S: Sink> Handler for Forwarder<S> {
    fn emit(&self, record: LogRecord) {
        if record.suppress || record.severity < self.threshold {
            return;
        }

        let _guard = PipelineGuard::enter();
        match panic::catch_unwind(AssertUnwindSafe(|| self.sink.deliver(&record))) {
            Ok(Ok(())) => self.error_count.store(0, Ordering::SeqCst),
            Ok(Err(err)) if err.is_connectivity() => self.connectivity_failure(&err),
            Ok(Err(err)) => self.unexpected_failure(&format!("{err:?}")),
            Err(payload) => self.unexpected_failure(&panic_message(payload.as_ref())),
        }
    }

    fn close(&self) {
        self.sink.close();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}
