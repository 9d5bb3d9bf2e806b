// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bridge from `tracing` events to handler chains.
//!
//! [`RecordLayer`] turns every event into a [`LogRecord`] and emits it into the
//! chains registered in its [`HandlerRegistry`]. The registry starts empty and
//! is filled once configuration is loaded, so the layer can be installed
//! before the chains exist.
//!
//! Events that would make the pipeline feed itself are skipped: events
//! carrying `suppress = true`, events raised on a thread that is already
//! delivering a record, and events of the transport crates, which may come
//! from their own worker threads.

use std::cell::Cell;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::handler::HandlerChain;
use crate::record::{Location, LogRecord, PROGRAM_KEY, SUPPRESS_KEY};
use crate::severity::Severity;

/// Crates whose events originate inside a delivery.
const TRANSPORT_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "rustls"];

fn is_transport_target(target: &str) -> bool {
    TRANSPORT_TARGETS.iter().any(|krate| {
        target
            .strip_prefix(krate)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

thread_local! {
    static IN_PIPELINE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as delivering a record until dropped.
pub(crate) struct PipelineGuard {
    previous: bool,
}

impl PipelineGuard {
    pub(crate) fn enter() -> Self {
        PipelineGuard {
            previous: IN_PIPELINE.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        IN_PIPELINE.with(|flag| flag.set(previous));
    }
}

fn in_pipeline() -> bool {
    IN_PIPELINE.with(Cell::get)
}

/// Chains receiving records produced by a [`RecordLayer`].
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    chains: Arc<RwLock<Vec<HandlerChain>>>,
}

impl HandlerRegistry {
    pub fn register(&self, chain: HandlerChain) {
        self.chains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chain);
    }

    /// Removes every chain and returns them, e.g. to close them.
    pub fn take(&self) -> Vec<HandlerChain> {
        std::mem::take(&mut *self.chains.write().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, record: &LogRecord) {
        let chains = self.chains.read().unwrap_or_else(PoisonError::into_inner);
        for chain in chains.iter() {
            chain.emit(record.clone());
        }
    }
}

pub struct RecordLayer {
    program: String,
    registry: HandlerRegistry,
}

impl RecordLayer {
    /// Creates a layer attributing records without an explicit `program`
    /// field to `program`.
    pub fn new(program: impl Into<String>, registry: HandlerRegistry) -> Self {
        RecordLayer {
            program: program.into(),
            registry,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

impl<S: Subscriber> Layer<S> for RecordLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if in_pipeline()
            || self.registry.is_empty()
            || is_transport_target(event.metadata().target())
        {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        if visitor.suppress {
            return;
        }

        let _guard = PipelineGuard::enter();
        let metadata = event.metadata();
        let mut record = LogRecord::new(
            metadata.target(),
            Severity::from(*metadata.level()),
            visitor.message,
        )
        .with_extra(visitor.fields)
        .with_program(visitor.program.unwrap_or_else(|| self.program.clone()));
        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            record = record.with_location(Location {
                file: file.to_string(),
                line,
                function: metadata.module_path().map(str::to_string),
            });
        }

        self.registry.emit(&record);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    suppress: bool,
    program: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                }
            }
            SUPPRESS_KEY => self.suppress = value.as_bool().unwrap_or(false),
            PROGRAM_KEY => {
                self.program = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                });
            }
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.into());
    }
}
