// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client side TLS settings for the GELF TLS transport.
//!
//! With `validate` set, the server must present a chain rooted in `ca_certs`,
//! or in the platform store when no bundle is configured. Without it, any
//! certificate is accepted. `certfile`/`keyfile` enable client authentication.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::debug;

use crate::config::HandlerSettings;
use crate::errors::ConfigError;
use crate::GELF_PROGRAM;

/// Builds the client configuration described by `settings`.
pub fn client_config(settings: &HandlerSettings) -> Result<Arc<ClientConfig>, ConfigError> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Invalid(format!("unsupported TLS configuration: {e}")))?;

    let builder = if settings.validate {
        builder.with_root_certificates(root_store(settings.ca_certs.as_deref())?)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
    };

    let config = match &settings.certfile {
        Some(certfile) => {
            let chain = load_certs(certfile)?;
            let key = load_key(settings.keyfile.as_deref().unwrap_or(certfile.as_path()))?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| ConfigError::Invalid(format!("invalid client certificate: {e}")))?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

/// Parses `host` as the name the server certificate must match.
pub fn server_name(host: &str) -> Result<ServerName<'static>, ConfigError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| ConfigError::Invalid(format!("invalid TLS server name {host}: {e}")))
}

fn root_store(ca_certs: Option<&Path>) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();
    match ca_certs {
        Some(path) => {
            for certificate in load_certs(path)? {
                roots.add(certificate).map_err(|e| {
                    ConfigError::Invalid(format!("invalid CA certificate in {}: {e}", path.display()))
                })?;
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs();
            for e in &native.errors {
                debug!(
                    suppress = true,
                    program = GELF_PROGRAM,
                    "Failed to load a system certificate: {e}"
                );
            }
            let (added, ignored) = roots.add_parsable_certificates(native.certs);
            debug!(
                suppress = true,
                program = GELF_PROGRAM,
                "Loaded {added} system root certificates, ignored {ignored}"
            );
        }
    }
    if roots.is_empty() {
        return Err(ConfigError::Invalid(
            "no trusted CA certificates available to validate the server".to_string(),
        ));
    }
    Ok(roots)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path)
        .map_err(|e| ConfigError::Invalid(format!("could not read {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let pem = read_pem(path)?;
    let certificates = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            ConfigError::Invalid(format!("invalid certificates in {}: {e}", path.display()))
        })?;
    if certificates.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certificates)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut BufReader::new(pem.as_slice()))
        .map_err(|e| ConfigError::Invalid(format!("invalid private key in {}: {e}", path.display())))?
        .ok_or_else(|| ConfigError::Invalid(format!("no private key found in {}", path.display())))
}

/// Verifier used when `validate` is off. Handshake signatures are still
/// checked so the session keys belong to the presented certificate.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::testing::cert_path;
    use super::*;
    use crate::config::Protocol;

    fn settings() -> HandlerSettings {
        HandlerSettings {
            protocol: Protocol::Tls,
            host: "127.0.0.1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_client_config_without_validation() {
        assert!(client_config(&settings()).is_ok());
    }

    #[test]
    fn test_client_config_with_ca_bundle() {
        let settings = HandlerSettings {
            validate: true,
            ca_certs: Some(cert_path("ca.pem")),
            ..settings()
        };
        assert!(client_config(&settings).is_ok());
    }

    #[test]
    fn test_client_certificate_with_key_file() {
        let settings = HandlerSettings {
            certfile: Some(cert_path("server.pem")),
            keyfile: Some(cert_path("server.key")),
            ..settings()
        };
        let config = client_config(&settings).unwrap();
        assert!(config.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_unreadable_files_are_config_errors() {
        let cases = [
            HandlerSettings {
                validate: true,
                ca_certs: Some(cert_path("missing.pem")),
                ..settings()
            },
            HandlerSettings {
                validate: true,
                ca_certs: Some(cert_path("server.key")),
                ..settings()
            },
            HandlerSettings {
                certfile: Some(cert_path("server.pem")),
                ..settings()
            },
        ];
        for case in cases {
            assert!(
                matches!(client_config(&case), Err(ConfigError::Invalid(_))),
                "{case:?}"
            );
        }
    }

    #[test]
    fn test_server_name() {
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("graylog.internal").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
