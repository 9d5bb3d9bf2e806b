// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Multi-line aware log forwarding to GELF endpoints.
//!
//! Raw output lines of supervised programs go through one handler chain per
//! configured sink. The chain reassembles multi-line entries such as stack
//! traces, infers each entry's severity and forwards it without ever letting a
//! sink failure reach the producer.
//!
//! ```text
//!   producer ──► MultiLine ──► Recognizing ──► Forwarder ──► Sink (UDP/TCP/TLS/HTTP)
//!                   │
//!               DelayTimer
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod errors;
pub mod extension;
pub mod handler;
pub mod hostname;
pub mod layer;
pub mod recognizer;
pub mod record;
pub mod severity;
pub mod sink;
pub mod timer;

/// Program name of the host supervisor. Its own output is forwarded through
/// its logging, never through [`extension::GelfExtension::handlers_for`].
pub const ENCAB: &str = "encab";

/// Program name attached to this crate's own diagnostics.
pub const GELF_PROGRAM: &str = "gelf_pipeline";

pub use errors::{ConfigError, SinkError, TimerError};
pub use extension::GelfExtension;
pub use handler::{Handler, HandlerChain};
pub use record::LogRecord;
pub use severity::Severity;
