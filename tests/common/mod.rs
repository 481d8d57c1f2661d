use httpstub::{ListenerKind, StubServer, TlsSource};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use std::{net::SocketAddr, time::Duration};
use tokio::{io::AsyncReadExt, net::TcpStream};

/// Certificates of a throwaway PKI: a CA that signed one server and one client certificate.
pub struct TestPki {
    pub ca_cert: String,
    pub server_cert: String,
    pub server_key: String,
    pub client_cert: String,
    pub client_key: String,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "httpstub test authority");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let server = leaf(
            vec!["localhost".to_string()],
            ExtendedKeyUsagePurpose::ServerAuth,
            &server_key,
            &ca,
            &ca_key,
        );

        let client_key = KeyPair::generate().unwrap();
        let client = leaf(
            vec!["client.localhost".to_string()],
            ExtendedKeyUsagePurpose::ClientAuth,
            &client_key,
            &ca,
            &ca_key,
        );

        TestPki {
            ca_cert: ca.pem(),
            server_cert: server.pem(),
            server_key: server_key.serialize_pem(),
            client_cert: client.pem(),
            client_key: client_key.serialize_pem(),
        }
    }

    pub fn server_key_source(&self) -> TlsSource {
        TlsSource::Pem(self.server_key.clone())
    }

    pub fn server_cert_source(&self) -> TlsSource {
        TlsSource::Pem(self.server_cert.clone())
    }

    pub fn ca_source(&self) -> TlsSource {
        TlsSource::Pem(self.ca_cert.clone())
    }

    /// An HTTPS client that trusts the test authority and resolves `localhost` to `addr`.
    pub fn client(&self, addr: SocketAddr, with_identity: bool) -> reqwest::Client {
        let mut builder = reqwest::Client::builder()
            .no_proxy()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(reqwest::Certificate::from_pem(self.ca_cert.as_bytes()).unwrap())
            .resolve("localhost", addr);

        if with_identity {
            let identity = format!("{}{}", self.client_key, self.client_cert);
            builder = builder.identity(reqwest::Identity::from_pem(identity.as_bytes()).unwrap());
        }

        builder.build().unwrap()
    }
}

fn leaf(
    names: Vec<String>,
    usage: ExtendedKeyUsagePurpose,
    key: &KeyPair,
    ca: &Certificate,
    ca_key: &KeyPair,
) -> Certificate {
    let mut params = CertificateParams::new(names.clone()).unwrap();
    params.distinguished_name.push(DnType::CommonName, names[0].as_str());
    params.extended_key_usages = vec![usage];
    params.signed_by(key, ca, ca_key).unwrap()
}

pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Starts a server with an HTTP listener on a free port.
pub async fn start_http_server() -> StubServer {
    init_logging();
    let server = StubServer::builder().http_port(0).build();
    server.start().await.unwrap();
    server
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// TLS listeners are addressed by name so that the server certificate verifies.
pub fn url(server: &StubServer, kind: ListenerKind, path: &str) -> String {
    let addr = server.address(kind).unwrap();
    match kind {
        ListenerKind::Https | ListenerKind::TwoWaySsl => {
            format!("https://localhost:{}{}", addr.port(), path)
        }
        _ => format!("http://{}{}", addr, path),
    }
}

/// Waits until the peer closes the connection. Returns false if it stays open for `limit`.
pub async fn closed_within(stream: &mut TcpStream, limit: Duration) -> bool {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(limit, stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        Ok(Ok(_)) => panic!("unexpected data on an idle connection"),
        Err(_) => false,
    }
}

/// Polls `condition` every few milliseconds until it holds or `limit` elapsed.
pub async fn eventually<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
