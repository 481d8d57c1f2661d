use crate::common::{init_logging, url, TestPki};
use httpstub::{Error, Filter, ListenerKind, StubDefinition, StubResponse, StubServer, TlsSource};

#[tokio::test]
async fn https_test() {
    // Arrange
    init_logging();
    let pki = TestPki::generate();
    let server = StubServer::builder()
        .https(0, pki.server_key_source(), pki.server_cert_source())
        .build();
    server.start().await.unwrap();
    server
        .create_stub(StubDefinition::new(
            "GET",
            "/secure",
            StubResponse::new(200).body("encrypted").delay(0),
        ))
        .unwrap();
    let client = pki.client(server.address(ListenerKind::Https).unwrap(), false);

    // Act
    let response = client
        .get(url(&server, ListenerKind::Https, "/secure"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "encrypted");

    server.stop().await;
}

#[tokio::test]
async fn two_way_ssl_accepts_trusted_client_test() {
    // Arrange
    init_logging();
    let pki = TestPki::generate();
    let server = StubServer::builder()
        .two_way_ssl(
            0,
            pki.server_key_source(),
            pki.server_cert_source(),
            pki.ca_source(),
        )
        .build();
    server.start().await.unwrap();
    server
        .create_stub(StubDefinition::new(
            "GET",
            "/mutual",
            StubResponse::new(200).body("trusted").delay(0),
        ))
        .unwrap();
    let client = pki.client(server.address(ListenerKind::TwoWaySsl).unwrap(), true);

    // Act
    let response = client
        .get(url(&server, ListenerKind::TwoWaySsl, "/mutual"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "trusted");
    assert_eq!(server.find_requests(&Filter::all()).len(), 1);

    server.stop().await;
}

/// The handshake fails before any request is read, so nothing is recorded.
#[tokio::test]
async fn two_way_ssl_rejects_client_without_certificate_test() {
    // Arrange
    init_logging();
    let pki = TestPki::generate();
    let server = StubServer::builder()
        .two_way_ssl(
            0,
            pki.server_key_source(),
            pki.server_cert_source(),
            pki.ca_source(),
        )
        .build();
    server.start().await.unwrap();
    let client = pki.client(server.address(ListenerKind::TwoWaySsl).unwrap(), false);

    // Act
    let result = client
        .get(url(&server, ListenerKind::TwoWaySsl, "/mutual"))
        .send()
        .await;

    // Assert
    assert!(result.is_err());
    assert!(server.find_requests(&Filter::all()).is_empty());

    server.stop().await;
}

#[tokio::test]
async fn invalid_tls_material_fails_startup_test() {
    // Arrange
    init_logging();
    let server = StubServer::builder()
        .http_port(0)
        .https(
            0,
            TlsSource::Pem("not a key".to_string()),
            TlsSource::Pem("not a certificate".to_string()),
        )
        .build();

    // Act
    let result = server.start().await;

    // Assert
    assert!(matches!(
        result,
        Err(Error::TlsConfigurationError(ListenerKind::Https, _))
    ));
    assert_eq!(server.address(ListenerKind::Http), None);
}
