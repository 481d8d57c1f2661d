use crate::server::tls::Error::{
    CaCertificateError, CertificateError, MissingPrivateKey, PrivateKeyError, ReadError,
};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore, ServerConfig,
};
use std::{fmt, io::Cursor, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read {0}: {1}")]
    ReadError(String, std::io::Error),
    #[error("cannot parse certificates from {0}: {1}")]
    CertificateError(String, String),
    #[error("cannot parse private key from {0}: {1}")]
    PrivateKeyError(String, std::io::Error),
    #[error("no private key found in {0}")]
    MissingPrivateKey(String),
    #[error("CA certificate error: {0}")]
    CaCertificateError(String),
    #[error("invalid TLS configuration: {0}")]
    ConfigError(#[from] rustls::Error),
    #[error("cannot build client certificate verifier: {0}")]
    VerifierError(#[from] rustls::server::VerifierBuilderError),
}

/// Where PEM encoded key material comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum TlsSource {
    /// A PEM file on disk.
    File(PathBuf),
    /// PEM content held in memory.
    Pem(String),
}

impl TlsSource {
    fn read(&self) -> Result<Vec<u8>, Error> {
        match self {
            TlsSource::File(path) => {
                std::fs::read(path).map_err(|err| ReadError(self.to_string(), err))
            }
            TlsSource::Pem(pem) => Ok(pem.as_bytes().to_vec()),
        }
    }
}

impl fmt::Display for TlsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsSource::File(path) => write!(f, "file '{}'", path.display()),
            TlsSource::Pem(_) => f.write_str("inline PEM"),
        }
    }
}

// Keeps key material out of debug output.
impl fmt::Debug for TlsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsSource::File(path) => f.debug_tuple("File").field(path).finish(),
            TlsSource::Pem(_) => f.debug_tuple("Pem").field(&"..").finish(),
        }
    }
}

impl From<PathBuf> for TlsSource {
    fn from(path: PathBuf) -> Self {
        TlsSource::File(path)
    }
}

/// Builds an acceptor for one-way TLS or, when `ca` is given, for mutual TLS where clients must
/// present a certificate signed by that authority.
pub(crate) fn server_acceptor(
    key: &TlsSource,
    cert: &TlsSource,
    ca: Option<&TlsSource>,
) -> Result<TlsAcceptor, Error> {
    let certificates = load_certificates(cert)?;
    let private_key = load_private_key(key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = match ca {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            for certificate in load_certificates(ca)? {
                roots
                    .add(certificate)
                    .map_err(|err| CaCertificateError(err.to_string()))?;
            }
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider).build()?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder.with_single_cert(certificates, private_key)?;
    config.alpn_protocols = vec![
        b"h2".to_vec(),
        b"http/1.1".to_vec(),
        b"http/1.0".to_vec(),
    ];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certificates(source: &TlsSource) -> Result<Vec<CertificateDer<'static>>, Error> {
    let mut reader = Cursor::new(source.read()?);
    let certificates = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| CertificateError(source.to_string(), err.to_string()))?;

    if certificates.is_empty() {
        return Err(CertificateError(
            source.to_string(),
            "no certificates found".to_string(),
        ));
    }

    Ok(certificates)
}

fn load_private_key(source: &TlsSource) -> Result<PrivateKeyDer<'static>, Error> {
    let mut reader = Cursor::new(source.read()?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| PrivateKeyError(source.to_string(), err))?
        .ok_or_else(|| MissingPrivateKey(source.to_string()))
}
