// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types shared across the pipeline.
//!
//! Configuration problems surface as [`ConfigError`] while the handler chain is
//! being built. Delivery problems surface as [`SinkError`] from a
//! [`Sink`](crate::sink::Sink) and never leave the forwarding stage.

use std::io;

/// Errors raised while loading settings or building handler chains.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unsupported recognizer {0}")]
    UnsupportedRecognizer(String),

    #[error("Missing Grok recognizer pattern")]
    MissingPattern,

    #[error("Invalid Grok pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Error parsing environment variable {name}: {reason}")]
    Environment { name: String, reason: String },

    #[error("Failed to parse settings: {0}")]
    Parse(String),

    #[error("Failed to start multi-line timer: {0}")]
    Timer(#[from] TimerError),
}

/// Errors raised when a delay timer cannot be created.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("failed to spawn timer thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Failure reported by a sink when delivering a record.
///
/// The first three variants are expected connectivity failures and are
/// rate-limited by the forwarder. [`SinkError::Other`] is anything else and is
/// always reported.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl SinkError {
    /// Returns true for failures talking to the remote end.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, SinkError::Other(_))
    }
}
