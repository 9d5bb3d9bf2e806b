// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! GELF over HTTP(S): one `POST` per record.

use std::fs;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};

use crate::config::{HandlerSettings, Protocol};
use crate::errors::{ConfigError, SinkError};
use crate::record::LogRecord;
use crate::sink::gelf::{compress_gzip, GelfEncoder};
use crate::sink::Sink;

pub struct HttpSink {
    client: Client,
    url: String,
    encoder: GelfEncoder,
    compress: bool,
}

impl HttpSink {
    /// Builds the client. An unreadable CA bundle is a configuration error.
    pub fn new(settings: &HandlerSettings, encoder: GelfEncoder) -> Result<Self, ConfigError> {
        let scheme = match settings.protocol {
            Protocol::Https => "https",
            _ => "http",
        };
        let url = format!(
            "{scheme}://{}:{}{}",
            settings.host, settings.port, settings.path
        );

        let mut builder = Client::builder().timeout(settings.timeout()?);
        if settings.protocol == Protocol::Https {
            builder = builder.danger_accept_invalid_certs(!settings.validate);
            if let Some(ca_certs) = &settings.ca_certs {
                let pem = fs::read(ca_certs).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "could not read CA certificates {}: {e}",
                        ca_certs.display()
                    ))
                })?;
                let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "invalid CA certificates {}: {e}",
                        ca_certs.display()
                    ))
                })?;
                builder = builder.add_root_certificate(certificate);
            }
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("could not build HTTP client: {e}")))?;

        Ok(HttpSink {
            client,
            url,
            encoder,
            compress: settings.compress,
        })
    }
}

impl Sink for HttpSink {
    fn deliver(&self, record: &LogRecord) -> Result<(), SinkError> {
        let mut body = self.encoder.to_bytes(record)?;
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json");
        if self.compress {
            body = compress_gzip(&body)
                .map_err(|e| SinkError::Other(format!("failed to compress payload: {e}")))?;
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        let response = request.body(body).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                SinkError::Connection(e.to_string())
            } else {
                SinkError::Protocol(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Protocol(format!(
                "{} responded with {status}",
                self.url
            )))
        }
    }

    fn destination(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::severity::Severity;
    use mockito::Matcher;
    use serde_json::Map;

    fn settings(url: &str, compress: bool) -> HandlerSettings {
        let address = url.trim_start_matches("http://");
        let (host, port) = address.split_once(':').unwrap();
        HandlerSettings {
            protocol: Protocol::Http,
            host: host.to_string(),
            port: port.parse().unwrap(),
            compress,
            timeout: 2.0,
            ..Default::default()
        }
    }

    fn sink(url: &str, compress: bool) -> HttpSink {
        HttpSink::new(&settings(url, compress), GelfEncoder::new("web-1", Map::new())).unwrap()
    }

    #[test]
    fn test_posts_json_payload() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/gelf")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJsonString(
                r#"{"short_message": "hello", "host": "web-1", "level": 6}"#.to_string(),
            ))
            .with_status(202)
            .create();

        sink(&server.url(), false)
            .deliver(&LogRecord::new("web", Severity::Info, "hello"))
            .unwrap();
        mock.assert();
    }

    #[test]
    fn test_gzip_header_when_compressed() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/gelf")
            .match_header("content-encoding", "gzip")
            .with_status(202)
            .create();

        sink(&server.url(), true)
            .deliver(&LogRecord::new("web", Severity::Info, "hello"))
            .unwrap();
        mock.assert();
    }

    #[test]
    fn test_error_status_is_protocol_error() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("POST", "/gelf").with_status(503).create();

        let err = sink(&server.url(), false)
            .deliver(&LogRecord::new("web", Severity::Info, "hello"))
            .unwrap_err();
        assert!(matches!(err, SinkError::Protocol(_)));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_refused_connection_is_connection_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = sink(&format!("http://127.0.0.1:{port}"), false)
            .deliver(&LogRecord::new("web", Severity::Info, "hello"))
            .unwrap_err();
        assert!(matches!(err, SinkError::Connection(_)));
    }

    #[test]
    fn test_missing_ca_bundle_is_config_error() {
        let settings = HandlerSettings {
            protocol: Protocol::Https,
            validate: true,
            ca_certs: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        let result = HttpSink::new(&settings, GelfEncoder::new("web-1", Map::new()));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
