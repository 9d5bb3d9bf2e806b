// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! GELF over UDP.
//!
//! Payloads larger than the chunk size are split into GELF chunks, each
//! prefixed with a 12 byte header:
//!
//! ```text
//! 0x1e 0x0f | message id (8 bytes) | sequence number | sequence count
//! ```

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Mutex;

use crate::errors::SinkError;
use crate::record::LogRecord;
use crate::sink::gelf::{compress_zlib, GelfEncoder};
use crate::sink::Sink;

pub const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
pub const CHUNK_HEADER_LEN: usize = 12;
pub const MAX_CHUNKS: usize = 128;

pub struct UdpSink {
    host: String,
    port: u16,
    encoder: GelfEncoder,
    compress: bool,
    chunk_size: usize,
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpSink {
    pub fn new(
        host: &str,
        port: u16,
        encoder: GelfEncoder,
        compress: bool,
        chunk_size: usize,
    ) -> Self {
        UdpSink {
            host: host.to_string(),
            port,
            encoder,
            compress,
            chunk_size,
            socket: Mutex::new(None),
        }
    }

    fn resolve(&self) -> Result<SocketAddr, SinkError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SinkError::Connection(format!("could not resolve {}", self.host)))
    }

    fn send(&self, target: SocketAddr, datagrams: &[Vec<u8>]) -> Result<(), SinkError> {
        let mut socket = self
            .socket
            .lock()
            .map_err(|_| SinkError::Other("UDP socket lock poisoned".to_string()))?;

        if socket.is_none() {
            let local = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
            *socket = Some(UdpSocket::bind(local)?);
        }
        if let Some(socket) = socket.as_ref() {
            for datagram in datagrams {
                socket.send_to(datagram, target)?;
            }
        }
        Ok(())
    }
}

impl Sink for UdpSink {
    fn deliver(&self, record: &LogRecord) -> Result<(), SinkError> {
        let mut payload = self.encoder.to_bytes(record)?;
        if self.compress {
            payload = compress_zlib(&payload)
                .map_err(|e| SinkError::Other(format!("failed to compress payload: {e}")))?;
        }

        let datagrams = chunk(&payload, self.chunk_size, rand::random::<[u8; 8]>())?;
        let target = self.resolve()?;
        self.send(target, &datagrams)
    }

    fn destination(&self) -> String {
        format!("udp://{}:{}", self.host, self.port)
    }
}

/// Splits `payload` into datagrams of at most `chunk_size` payload bytes.
///
/// A payload that fits in one chunk is sent as is, without a chunk header.
pub fn chunk(payload: &[u8], chunk_size: usize, id: [u8; 8]) -> Result<Vec<Vec<u8>>, SinkError> {
    let chunk_size = chunk_size.max(1);
    if payload.len() <= chunk_size {
        return Ok(vec![payload.to_vec()]);
    }

    let count = payload.len().div_ceil(chunk_size);
    if count > MAX_CHUNKS {
        return Err(SinkError::Protocol(format!(
            "message of {} bytes needs {count} chunks, at most {MAX_CHUNKS} are allowed",
            payload.len()
        )));
    }

    Ok(payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(sequence, piece)| {
            let mut datagram = Vec::with_capacity(CHUNK_HEADER_LEN + piece.len());
            datagram.extend_from_slice(&CHUNK_MAGIC);
            datagram.extend_from_slice(&id);
            #[allow(clippy::cast_possible_truncation)]
            datagram.extend_from_slice(&[sequence as u8, count as u8]);
            datagram.extend_from_slice(piece);
            datagram
        })
        .collect())
}
