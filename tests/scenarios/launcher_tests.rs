use crate::common::{http_client, init_logging};
use httpstub::{
    run_server, AdminClient, LaunchError, ListenerKind, StubDefinition, StubResponse, StubServer,
};
use std::time::Duration;
use tokio::net::TcpListener;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// The handle is returned only after every listener accepts connections.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn launched_server_is_ready_test() {
    // Arrange
    init_logging();
    let settings = StubServer::builder().http_port(0).settings();

    // Act
    let handle = tokio::task::spawn_blocking(move || run_server(settings, STARTUP_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    let admin = AdminClient::new(handle.address(ListenerKind::Admin).unwrap());
    admin
        .create_stub(&StubDefinition::new(
            "GET",
            "/ready",
            StubResponse::new(200).body("yes").delay(0),
        ))
        .await
        .unwrap();
    let response = http_client()
        .get(format!("http://{}/ready", handle.address(ListenerKind::Http).unwrap()))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(handle.addresses().len(), 2);
    assert_eq!(response.text().await.unwrap(), "yes");

    let http = handle.address(ListenerKind::Http).unwrap();
    tokio::task::spawn_blocking(move || handle.stop()).await.unwrap();
    assert!(tokio::net::TcpStream::connect(http).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn launch_failure_is_reported_test() {
    // Arrange
    init_logging();
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let settings = StubServer::builder()
        .http_port(occupied.local_addr().unwrap().port())
        .settings();

    // Act
    let result = tokio::task::spawn_blocking(move || run_server(settings, STARTUP_TIMEOUT))
        .await
        .unwrap();

    // Assert
    assert!(matches!(result, Err(LaunchError::ServerError(_))));
}
