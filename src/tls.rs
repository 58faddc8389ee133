//! TLS client configuration.
//!
//! One rustls `ClientConfig` is built per broker and shared by every
//! handler, so certificate policy is identical regardless of which transport
//! performs the exchange. Roots always come from the bundled webpki set;
//! handlers never fall back to a library's own bundle resolution.

use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// Certificate-policy knobs exposed to the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsOptions {
    /// Validate server certificates. Disabling accepts any chain.
    pub verify_certificates: bool,
    /// Keep the widest supported protocol range enabled for servers that
    /// cannot complete a modern handshake. rustls never renegotiates, so
    /// this cannot re-enable insecure renegotiation itself.
    pub legacy_server_connect: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        TlsOptions {
            verify_certificates: true,
            legacy_server_connect: false,
        }
    }
}

/// Builds the shared rustls client configuration.
///
/// The crypto provider is pinned explicitly so the result does not depend on
/// which provider features other dependencies happen to enable.
pub fn build_tls_config(options: &TlsOptions) -> Result<Arc<ClientConfig>, crate::error::Error> {
    let versions: &[&rustls::SupportedProtocolVersion] = if options.legacy_server_connect {
        rustls::ALL_VERSIONS
    } else {
        rustls::DEFAULT_VERSIONS
    };

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(versions)
    .map_err(|e| {
        crate::error::Error::new(crate::error::ErrorKind::Request {
            msg: "failed to assemble TLS configuration".to_string(),
            source: Some(Box::new(e)),
        })
    })?;

    let config = if options.verify_certificates {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification))
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Verifier that accepts every certificate chain.
///
/// Installed only when certificate verification is explicitly disabled.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_config_builds() {
        build_tls_config(&TlsOptions::default()).unwrap();
    }

    #[test]
    fn unverified_config_builds() {
        build_tls_config(&TlsOptions {
            verify_certificates: false,
            legacy_server_connect: true,
        })
        .unwrap();
    }
}
