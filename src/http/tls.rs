//! Opportunistic TLS introspection.
//!
//! The handshake accepts any certificate: the goal is to read what the
//! server presents, not to judge it.

use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::types::TlsInfo;

/// Bound on connect plus handshake.
pub const TLS_TIMEOUT: Duration = Duration::from_millis(1500);

const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

#[derive(Debug)]
struct AcceptAnyCert {
    supported_algs: rustls::crypto::WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyCert {
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}

fn client_config() -> Option<Arc<ClientConfig>> {
    static INSTANCE: OnceLock<Option<Arc<ClientConfig>>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
            let verifier = Arc::new(AcceptAnyCert {
                supported_algs: provider.signature_verification_algorithms,
            });
            let builder = ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .map_err(|err| tracing::warn!(error = %err, "TLS client configuration unavailable"))
                .ok()?;
            let mut config = builder
                .dangerous()
                .with_custom_certificate_verifier(verifier)
                .with_no_client_auth();
            config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
            Some(Arc::new(config))
        })
        .clone()
}

/// Issuer organization of a DER certificate, else its common name.
pub fn issuer_name(der: &[u8]) -> Option<String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let issuer = cert.issuer();
    issuer
        .iter_organization()
        .chain(issuer.iter_common_name())
        .find_map(|attr| attr.as_str().ok())
        .map(str::to_string)
}

async fn handshake(host: &str, port: u16) -> io::Result<TlsInfo> {
    let config = client_config()
        .ok_or_else(|| io::Error::other("TLS client configuration unavailable"))?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    let stream = TcpStream::connect((host, port)).await?;
    let tls = TlsConnector::from(config).connect(server_name, stream).await?;
    let (_, conn) = tls.get_ref();

    let alpn = conn
        .alpn_protocol()
        .map(|proto| String::from_utf8_lossy(proto).into_owned());
    let issuer = conn
        .peer_certificates()
        .and_then(|certs| certs.first())
        .and_then(|cert| issuer_name(cert.as_ref()));

    Ok(TlsInfo {
        alpn,
        issuer,
        sni: Some(host.to_string()),
    })
}

/// Handshake with `host:port` and report ALPN, issuer and SNI.
///
/// Any failure, including the timeout, yields `None`.
pub async fn tls_info(host: &str, port: u16, timeout: Duration) -> Option<TlsInfo> {
    match tokio::time::timeout(timeout, handshake(host, port)).await {
        Ok(Ok(info)) => Some(info),
        Ok(Err(err)) => {
            tracing::trace!(host, port, error = %err, "TLS introspection failed");
            None
        }
        Err(_) => {
            tracing::trace!(host, port, "TLS introspection timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_return_none_when_nothing_listens() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(tls_info("127.0.0.1", port, TLS_TIMEOUT).await.is_none());
    }

    #[tokio::test]
    async fn should_return_none_when_peer_is_not_tls() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            }
        });

        assert!(
            tls_info("127.0.0.1", port, Duration::from_millis(500))
                .await
                .is_none()
        );
    }

    #[test]
    fn should_ignore_garbage_certificates() {
        assert_eq!(issuer_name(b"not a certificate"), None);
    }

    #[test]
    fn should_build_client_config_with_alpn() {
        let config = client_config().unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
    }
}
