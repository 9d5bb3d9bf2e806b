// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Terminal delivery of records to a remote GELF endpoint.
//!
//! A [`Sink`] is an opaque, fallible `deliver(record)` capability. Failures are
//! classified by [`SinkError`] so the forwarding stage can tell an unreachable
//! endpoint apart from a bug.

pub mod gelf;
pub mod http;
pub mod tcp;
pub mod tls;
pub mod udp;

use crate::config::{HandlerSettings, Protocol};
use crate::errors::{ConfigError, SinkError};
use crate::record::LogRecord;
use gelf::GelfEncoder;

pub use http::HttpSink;
pub use tcp::TcpSink;
pub use udp::UdpSink;

pub trait Sink: Send + Sync {
    fn deliver(&self, record: &LogRecord) -> Result<(), SinkError>;

    /// Human readable endpoint, used in diagnostics.
    fn destination(&self) -> String;

    fn close(&self) {}
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn deliver(&self, record: &LogRecord) -> Result<(), SinkError> {
        (**self).deliver(record)
    }

    fn destination(&self) -> String {
        (**self).destination()
    }

    fn close(&self) {
        (**self).close();
    }
}

/// Builds the transport selected by `settings`, encoding records as GELF.
pub fn create_sink(
    settings: &HandlerSettings,
    hostname: &str,
) -> Result<Box<dyn Sink>, ConfigError> {
    let encoder = GelfEncoder::new(hostname, settings.optional_fields.clone());
    let timeout = settings.timeout()?;

    let sink: Box<dyn Sink> = match settings.protocol {
        Protocol::Udp => Box::new(UdpSink::new(
            &settings.host,
            settings.port,
            encoder,
            settings.compress,
            settings.chunk_size,
        )),
        Protocol::Tcp => Box::new(TcpSink::new(
            &settings.host,
            settings.port,
            encoder,
            timeout,
        )),
        Protocol::Tls => Box::new(TcpSink::with_tls(
            &settings.host,
            settings.port,
            encoder,
            timeout,
            tls::client_config(settings)?,
        )?),
        Protocol::Http | Protocol::Https => Box::new(HttpSink::new(settings, encoder)?),
    };
    Ok(sink)
}
