use crate::common::{closed_within, eventually, init_logging};
use httpstub::{AdminClient, ListenerKind, StubServer};
use std::time::Duration;
use tokio::net::TcpStream;

#[tokio::test]
async fn idle_connection_is_closed_test() {
    // Arrange
    init_logging();
    let server = StubServer::builder().http_port(0).timeout(200).build();
    server.start().await.unwrap();

    // Act
    let mut stream = TcpStream::connect(server.address(ListenerKind::Http).unwrap())
        .await
        .unwrap();

    // Assert
    assert!(closed_within(&mut stream, Duration::from_secs(3)).await);

    server.stop().await;
}

/// Connections keep the timeout they were accepted with.
#[tokio::test]
async fn timeout_change_applies_to_new_connections_only_test() {
    // Arrange
    init_logging();
    let server = StubServer::builder().http_port(0).timeout(10_000).build();
    server.start().await.unwrap();
    let addr = server.address(ListenerKind::Http).unwrap();
    let admin = AdminClient::new(server.address(ListenerKind::Admin).unwrap());

    let mut before = TcpStream::connect(addr).await.unwrap();
    assert!(
        eventually(
            || server.connection_count(ListenerKind::Http) == 1,
            Duration::from_secs(2)
        )
        .await
    );

    // Act
    admin.set_timeout(200).await.unwrap();
    let mut after = TcpStream::connect(addr).await.unwrap();

    // Assert
    assert_eq!(admin.timeout().await.unwrap(), 200);
    assert_eq!(server.timeout(), 200);
    assert!(closed_within(&mut after, Duration::from_secs(3)).await);
    assert!(!closed_within(&mut before, Duration::from_millis(500)).await);

    server.stop().await;
}

#[tokio::test]
async fn zero_timeout_disables_idle_close_test() {
    // Arrange
    init_logging();
    let server = StubServer::builder().http_port(0).timeout(0).build();
    server.start().await.unwrap();

    // Act
    let mut stream = TcpStream::connect(server.address(ListenerKind::Http).unwrap())
        .await
        .unwrap();

    // Assert
    assert!(!closed_within(&mut stream, Duration::from_millis(500)).await);
    assert!(
        eventually(
            || server.connection_count(ListenerKind::Http) == 1,
            Duration::from_secs(2)
        )
        .await
    );

    server.stop().await;
}
