use crate::common::{http_client, start_http_server, url};
use httpstub::{AdminClient, Filter, ListenerKind, StubDefinition, StubResponse};
use serde_json::{json, Value};

#[tokio::test]
async fn create_stub_over_the_wire_test() {
    // Arrange
    let server = start_http_server().await;
    let client = http_client();
    let configs = url(&server, ListenerKind::Admin, "/admin/v1/configs");

    // Act
    let created = client
        .post(&configs)
        .json(&json!({
            "method": "GET",
            "path": "/wire",
            "response": {
                "statusCode": 202,
                "headers": { "X-Stub": "yes" },
                "body": "3q2+7w==",
                "binaryBody": true,
                "delay": 0
            }
        }))
        .send()
        .await
        .unwrap();
    let status = created.status();
    let location = created.headers()["location"].to_str().unwrap().to_string();
    let stub: Value = created.json().await.unwrap();

    let served = client
        .get(url(&server, ListenerKind::Http, "/wire"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(status, 201);
    assert_eq!(location, format!("/admin/v1/configs/{}", stub["id"]));
    assert_eq!(stub["response"]["body"], "3q2+7w==");
    assert_eq!(stub["response"]["binaryBody"], true);
    assert_eq!(served.status(), 202);
    assert_eq!(served.headers()["x-stub"], "yes");
    assert_eq!(served.bytes().await.unwrap().as_ref(), &[0xde, 0xad, 0xbe, 0xef]);

    server.stop().await;
}

#[tokio::test]
async fn admin_rejects_invalid_requests_test() {
    // Arrange
    let server = start_http_server().await;
    let client = http_client();
    let configs = url(&server, ListenerKind::Admin, "/admin/v1/configs");

    // Act
    let bad_json = client
        .post(&configs)
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    let bad_status = client
        .post(&configs)
        .json(&json!({ "method": "GET", "path": "/x", "response": { "statusCode": 1000 } }))
        .send()
        .await
        .unwrap();
    let wrong_content_type = client
        .post(&configs)
        .header("content-type", "text/plain")
        .body("{}")
        .send()
        .await
        .unwrap();
    let wrong_method = client.patch(&configs).send().await.unwrap();
    let unknown_route = client
        .get(url(&server, ListenerKind::Admin, "/admin/v1/unknown"))
        .send()
        .await
        .unwrap();
    let unknown_stub = client
        .get(url(&server, ListenerKind::Admin, "/admin/v1/configs/999"))
        .send()
        .await
        .unwrap();
    let bad_id = client
        .get(url(&server, ListenerKind::Admin, "/admin/v1/configs/abc"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(bad_json.status(), 400);
    assert_eq!(bad_status.status(), 400);
    assert_eq!(wrong_content_type.status(), 415);
    assert_eq!(wrong_method.status(), 405);
    assert_eq!(unknown_route.status(), 404);
    assert_eq!(unknown_stub.status(), 404);
    assert_eq!(bad_id.status(), 400);
    let message: Value = unknown_stub.json().await.unwrap();
    assert!(message["message"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn filtered_stub_queries_test() {
    // Arrange
    let server = start_http_server().await;
    let admin = AdminClient::new(server.address(ListenerKind::Admin).unwrap());
    for (method, path) in [("GET", "/a"), ("POST", "/a"), ("GET", "/b")] {
        admin
            .create_stub(&StubDefinition::new(method, path, StubResponse::new(200).delay(0)))
            .await
            .unwrap();
    }

    // Act
    let gets = admin.find_stubs(&Filter::all().method("GET")).await.unwrap();
    let on_a = admin.find_stubs(&Filter::all().path("/a")).await.unwrap();
    let get_b = admin
        .find_stubs(&Filter::all().method("get").path("/b"))
        .await
        .unwrap();
    let deleted = admin.delete_stubs(&Filter::all().path("/a")).await.unwrap();
    let remaining = admin.find_stubs(&Filter::all()).await.unwrap();

    // Assert
    assert_eq!(gets.len(), 2);
    assert_eq!(on_a.len(), 2);
    assert_eq!(get_b.len(), 1);
    assert_eq!(get_b[0].path(), "/b");
    assert_eq!(deleted, 2);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].path(), "/b");

    server.stop().await;
}

#[tokio::test]
async fn deleting_unknown_stub_test() {
    // Arrange
    let server = start_http_server().await;
    let admin = AdminClient::new(server.address(ListenerKind::Admin).unwrap());

    // Act
    let deleted = admin.delete_stub(12345).await.unwrap();
    let read = admin.read_stub(12345).await.unwrap();

    // Assert
    assert!(!deleted);
    assert!(read.is_none());

    server.stop().await;
}

#[tokio::test]
async fn timeout_over_the_wire_test() {
    // Arrange
    let server = start_http_server().await;
    let client = http_client();
    let timeout = url(&server, ListenerKind::Admin, "/admin/v1/timeout");

    // Act
    let initial: Value = client.get(&timeout).send().await.unwrap().json().await.unwrap();
    let updated = client
        .put(&timeout)
        .json(&json!({ "timeout": 1500 }))
        .send()
        .await
        .unwrap();
    let current: Value = client.get(&timeout).send().await.unwrap().json().await.unwrap();

    // Assert
    assert_eq!(initial, json!({ "timeout": 120000 }));
    assert_eq!(updated.status(), 200);
    assert_eq!(current, json!({ "timeout": 1500 }));
    assert_eq!(server.timeout(), 1500);

    server.stop().await;
}
