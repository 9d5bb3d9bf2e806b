// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! GELF over TCP and TLS: uncompressed JSON documents terminated by a null
//! byte.
//!
//! The connection is opened on first use and dropped on any write error, so
//! the next delivery reconnects.

use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use tracing::debug;

use crate::errors::{ConfigError, SinkError};
use crate::record::LogRecord;
use crate::sink::gelf::GelfEncoder;
use crate::sink::{tls, Sink};
use crate::GELF_PROGRAM;

const FRAME_DELIMITER: u8 = 0;

struct TlsParams {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

enum Connection {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Connection {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        match self {
            Connection::Plain(stream) => stream.write_all(frame),
            Connection::Tls(stream) => {
                stream.write_all(frame)?;
                stream.flush()
            }
        }
    }

    fn shutdown(self) {
        match self {
            Connection::Plain(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            Connection::Tls(mut stream) => {
                stream.conn.send_close_notify();
                let _ = stream.flush();
                let _ = stream.sock.shutdown(Shutdown::Both);
            }
        }
    }
}

pub struct TcpSink {
    host: String,
    port: u16,
    encoder: GelfEncoder,
    timeout: Duration,
    tls: Option<TlsParams>,
    stream: Mutex<Option<Connection>>,
}

impl TcpSink {
    pub fn new(host: &str, port: u16, encoder: GelfEncoder, timeout: Duration) -> Self {
        TcpSink {
            host: host.to_string(),
            port,
            encoder,
            timeout,
            tls: None,
            stream: Mutex::new(None),
        }
    }

    /// Wraps every connection in a TLS session configured by `config`. The
    /// server certificate must match `host` when the config verifies it.
    pub fn with_tls(
        host: &str,
        port: u16,
        encoder: GelfEncoder,
        timeout: Duration,
        config: Arc<ClientConfig>,
    ) -> Result<Self, ConfigError> {
        let server_name = tls::server_name(host)?;
        Ok(TcpSink {
            tls: Some(TlsParams {
                config,
                server_name,
            }),
            ..TcpSink::new(host, port, encoder, timeout)
        })
    }

    fn connect(&self) -> Result<Connection, SinkError> {
        let mut socket = self.connect_socket()?;
        let Some(params) = &self.tls else {
            return Ok(Connection::Plain(socket));
        };

        let mut session =
            ClientConnection::new(Arc::clone(&params.config), params.server_name.clone())
                .map_err(|e| self.handshake_error(e))?;
        while session.is_handshaking() {
            session
                .complete_io(&mut socket)
                .map_err(|e| self.handshake_error(e))?;
        }
        Ok(Connection::Tls(Box::new(StreamOwned::new(session, socket))))
    }

    fn handshake_error(&self, e: impl fmt::Display) -> SinkError {
        SinkError::Connection(format!(
            "TLS handshake with {} failed: {e}",
            self.destination()
        ))
    }

    fn connect_socket(&self) -> Result<TcpStream, SinkError> {
        let mut last_error = None;
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| SinkError::Connection(format!("could not resolve {}: {e}", self.host)))?;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_read_timeout(Some(self.timeout))?;
                    debug!(
                        suppress = true,
                        program = GELF_PROGRAM,
                        "Connected to {}",
                        self.destination()
                    );
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(SinkError::Connection(match last_error {
            Some(e) => format!("could not connect to {}: {e}", self.destination()),
            None => format!("no address found for {}", self.host),
        }))
    }
}

impl Sink for TcpSink {
    fn deliver(&self, record: &LogRecord) -> Result<(), SinkError> {
        let mut frame = self.encoder.to_bytes(record)?;
        frame.push(FRAME_DELIMITER);

        let mut stream = self
            .stream
            .lock()
            .map_err(|_| SinkError::Other("TCP stream lock poisoned".to_string()))?;
        if stream.is_none() {
            *stream = Some(self.connect()?);
        }

        let written = match stream.as_mut() {
            Some(connection) => connection.write_frame(&frame),
            None => Ok(()),
        };
        if let Err(e) = written {
            *stream = None;
            return Err(SinkError::Socket(e));
        }
        Ok(())
    }

    fn destination(&self) -> String {
        let scheme = if self.tls.is_some() { "tls" } else { "tcp" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    fn close(&self) {
        if let Ok(mut stream) = self.stream.lock() {
            if let Some(connection) = stream.take() {
                connection.shutdown();
            }
        }
    }
}
