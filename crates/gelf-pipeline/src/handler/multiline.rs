// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Multi-line aggregation.
//!
//! Supervised programs write stack traces and wrapped messages as several
//! lines. The aggregator buffers a header record together with the
//! continuation lines that follow it on the same thread, and emits them as a
//! single record once the group is complete:
//!
//! ```text
//! Traceback (most recent call last):   ◄── header, arms the timer
//!   File x                             ◄── continuation
//!   File y                             ◄── continuation
//!                                      ◄── idle timeout: one record is emitted
//! ```
//!
//! A group is complete when the timer expires or when a record arrives that
//! cannot continue it (different source, severity or thread, or a fresh log
//! line). The interrupting record is forwarded straight away.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::errors::TimerError;
use crate::handler::Handler;
use crate::record::LogRecord;
use crate::recognizer::LineRecognizer;
use crate::timer::DelayTimer;

struct Backlog<H> {
    buffer: Mutex<Vec<LogRecord>>,
    recognizer: Arc<dyn LineRecognizer>,
    next: H,
}

impl<H: Handler> Backlog<H> {
    fn lock(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        // a poisoned buffer still holds valid records
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records that never take part in grouping.
    fn bypasses(record: &LogRecord) -> bool {
        record.is_structured() || record.suppress || record.is_from_core()
    }

    /// Whether `record` starts a new entry and so can never be a continuation.
    fn is_fresh(&self, record: &LogRecord) -> bool {
        if Self::bypasses(record) {
            return true;
        }
        record
            .log_line
            .unwrap_or_else(|| self.recognizer.recognize(&record.message()).is_log_line())
    }

    fn continues(&self, header: &LogRecord, record: &LogRecord) -> bool {
        header.name == record.name
            && header.severity == record.severity
            && header.thread == record.thread
            && !header.is_structured()
            && !self.is_fresh(record)
    }

    fn flush(&self) {
        let mut buffer = self.lock();
        self.flush_locked(&mut buffer);
    }

    /// Emits the buffered group downstream. The lock stays held so groups
    /// leave in the order they completed.
    fn flush_locked(&self, buffer: &mut Vec<LogRecord>) {
        let mut records = std::mem::take(buffer).into_iter();
        let Some(mut header) = records.next() else {
            return;
        };

        let continuations = records.map(|record| record.message()).collect::<Vec<_>>();
        if !continuations.is_empty() {
            let mut lines = Vec::with_capacity(continuations.len() + 1);
            lines.push(header.message());
            lines.extend(continuations);
            header.msg = lines.join("\n");
            header.args.clear();
            header.log_line = None;
        }
        self.next.emit(header);
    }
}

/// Outermost stage of a chain: groups continuation lines.
pub struct MultiLine<H: Handler + 'static> {
    backlog: Arc<Backlog<H>>,
    timer: DelayTimer,
}

impl<H: Handler + 'static> MultiLine<H> {
    /// Creates the aggregator and its timer. `recognizer` decides which
    /// incoming records are fresh log lines.
    pub fn new(
        next: H,
        recognizer: Arc<dyn LineRecognizer>,
        timeout: Duration,
    ) -> Result<Self, TimerError> {
        let backlog = Arc::new(Backlog {
            buffer: Mutex::new(Vec::new()),
            recognizer,
            next,
        });

        let weak: Weak<Backlog<H>> = Arc::downgrade(&backlog);
        let timer = DelayTimer::new(timeout, move || {
            if let Some(backlog) = weak.upgrade() {
                backlog.flush();
            }
        })?;

        Ok(MultiLine { backlog, timer })
    }

    /// Emits the pending group, if any.
    pub fn flush(&self) {
        self.backlog.flush();
    }

    /// Number of records waiting for their group to complete.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.backlog.lock().len()
    }
}

impl<H: Handler + 'static> Handler for MultiLine<H> {
    fn emit(&self, record: LogRecord) {
        let mut buffer = self.backlog.lock();

        if buffer.is_empty() {
            if Backlog::<H>::bypasses(&record) {
                self.backlog.next.emit(record);
            } else {
                buffer.push(record);
                self.timer.start();
            }
            return;
        }

        let continues = buffer
            .first()
            .is_some_and(|header| self.backlog.continues(header, &record));
        if continues {
            buffer.push(record);
            return;
        }

        self.backlog.flush_locked(&mut buffer);
        self.backlog.next.emit(record);
    }

    fn close(&self) {
        self.timer.close();
        self.backlog.flush();
        self.backlog.next.close();
    }
}

impl<H: Handler + 'static> Drop for MultiLine<H> {
    fn drop(&mut self) {
        self.timer.close();
        self.backlog.flush();
    }
}
