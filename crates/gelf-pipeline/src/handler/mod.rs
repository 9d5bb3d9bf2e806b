// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Handler chain stages.
//!
//! Each stage owns the next one and decorates it. The chain built for every
//! configured sink is:
//!
//! ```text
//! MultiLine ──► Recognizing ──► Forwarder ──► Sink
//! ```
//!
//! - **[`MultiLine`]**: coalesces continuation lines into one record
//! - **[`Recognizing`]**: classifies the rendered message and fills in severity and fields
//! - **[`Forwarder`]**: applies the severity threshold and isolates sink failures

pub mod forwarder;
pub mod multiline;
pub mod recognizing;

use std::sync::Arc;

pub use forwarder::Forwarder;
pub use multiline::MultiLine;
pub use recognizing::Recognizing;

use crate::record::LogRecord;

/// A stage that accepts log records.
///
/// `emit` never fails: every stage handles its own errors so nothing reaches
/// the producer.
pub trait Handler: Send + Sync {
    fn emit(&self, record: LogRecord);

    /// Releases resources and flushes pending records.
    fn close(&self) {}
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn emit(&self, record: LogRecord) {
        (**self).emit(record);
    }

    fn close(&self) {
        (**self).close();
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn emit(&self, record: LogRecord) {
        (**self).emit(record);
    }

    fn close(&self) {
        (**self).close();
    }
}

/// A fully assembled chain for one named sink.
pub type HandlerChain = Arc<dyn Handler>;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::Handler;
    use crate::record::LogRecord;

    /// Terminal handler that keeps everything it receives.
    #[derive(Default)]
    pub struct Collector {
        pub records: Mutex<Vec<LogRecord>>,
        pub closed: Mutex<usize>,
    }

    impl Collector {
        #[allow(clippy::unwrap_used)]
        pub fn messages(&self) -> Vec<String> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(LogRecord::message)
                .collect()
        }
    }

    impl Handler for Collector {
        #[allow(clippy::unwrap_used)]
        fn emit(&self, record: LogRecord) {
            self.records.lock().unwrap().push(record);
        }

        #[allow(clippy::unwrap_used)]
        fn close(&self) {
            *self.closed.lock().unwrap() += 1;
        }
    }
}
