use crate::common::{http_client, start_http_server, url};
use httpstub::{
    AdminClient, Body, Filter, ListenerKind, RequestPredicates, StubDefinition, StubResponse,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Creates a stub, hits it, misses it, deletes it and misses it again.
#[tokio::test]
async fn stub_lifecycle_test() {
    // Arrange
    let server = start_http_server().await;
    let admin = AdminClient::new(server.address(ListenerKind::Admin).unwrap());
    let client = http_client();

    let stub = admin
        .create_stub(&StubDefinition::new(
            "GET",
            "/foo",
            StubResponse::new(200).body("bar").delay(0),
        ))
        .await
        .unwrap();

    // Act
    let hit = client.get(url(&server, ListenerKind::Http, "/foo")).send().await.unwrap();
    let hit_status = hit.status();
    let hit_body = hit.text().await.unwrap();

    let miss = client.get(url(&server, ListenerKind::Http, "/baz")).send().await.unwrap();
    let miss_status = miss.status();
    let miss_body: Value = miss.json().await.unwrap();

    let deleted = admin.delete_stub(stub.id).await.unwrap();
    let after_delete = client.get(url(&server, ListenerKind::Http, "/foo")).send().await.unwrap();

    // Assert
    assert_eq!(hit_status, 200);
    assert_eq!(hit_body, "bar");
    assert_eq!(miss_status, 404);
    assert_eq!(miss_body, json!({ "message": "no stub matches GET /baz" }));
    assert!(deleted);
    assert_eq!(after_delete.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn binary_body_round_trip_test() {
    // Arrange
    let server = start_http_server().await;
    let admin = AdminClient::new(server.address(ListenerKind::Admin).unwrap());
    let payload: Vec<u8> = vec![0x00, 0xff, 0xfe, 0x80, 0x0a, 0xc3, 0x28, 0x7f];

    // Act
    let created = admin
        .create_stub(&StubDefinition::new(
            "GET",
            "/blob",
            StubResponse::new(200)
                .header("Content-Type", "application/octet-stream")
                .body(payload.clone())
                .delay(0),
        ))
        .await
        .unwrap();
    let read_back = admin.read_stub(created.id).await.unwrap().unwrap();

    let response = http_client()
        .get(url(&server, ListenerKind::Http, "/blob"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(read_back.response().body, Body::Binary(payload.clone().into()));
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), payload.as_slice());

    server.stop().await;
}

#[tokio::test]
async fn latest_stub_wins_test() {
    // Arrange
    let server = start_http_server().await;
    for body in ["first", "second", "third"] {
        server
            .create_stub(StubDefinition::new(
                "GET",
                "/same",
                StubResponse::new(200).body(body).delay(0),
            ))
            .unwrap();
    }
    let client = http_client();

    // Act
    let mut bodies = Vec::new();
    for _ in 0..3 {
        let response = client.get(url(&server, ListenerKind::Http, "/same")).send().await.unwrap();
        bodies.push(response.text().await.unwrap());
    }

    // Assert
    assert_eq!(bodies, vec!["third", "third", "third"]);

    server.stop().await;
}

#[tokio::test]
async fn delete_all_stubs_test() {
    // Arrange
    let server = start_http_server().await;
    let admin = AdminClient::new(server.address(ListenerKind::Admin).unwrap());
    for path in ["/a", "/b", "/c"] {
        admin
            .create_stub(&StubDefinition::new("GET", path, StubResponse::new(204).delay(0)))
            .await
            .unwrap();
    }

    // Act
    let deleted = admin.delete_stubs(&Filter::all()).await.unwrap();

    // Assert
    assert_eq!(deleted, 3);
    assert!(admin.find_stubs(&Filter::all()).await.unwrap().is_empty());
    for path in ["/a", "/b", "/c", "/"] {
        let response = http_client()
            .get(url(&server, ListenerKind::Http, path))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    server.stop().await;
}

#[tokio::test]
async fn path_parameters_and_predicates_test() {
    // Arrange
    let server = start_http_server().await;
    let mut query = BTreeMap::new();
    query.insert("verbose".to_string(), "true".to_string());

    server
        .create_stub(StubDefinition::new(
            "GET",
            "/users/:id",
            StubResponse::new(200).body("any user").delay(0),
        ))
        .unwrap();
    server
        .create_stub(
            StubDefinition::new(
                "POST",
                "/users/:id",
                StubResponse::new(201).body("verbose user").delay(0),
            )
            .predicates(RequestPredicates {
                query: Some(query),
                body: Some(json!({ "name": "Fred" })),
                ..Default::default()
            }),
        )
        .unwrap();
    let client = http_client();

    // Act
    let by_pattern = client
        .get(url(&server, ListenerKind::Http, "/users/42"))
        .send()
        .await
        .unwrap();
    let predicates_met = client
        .post(url(&server, ListenerKind::Http, "/users/42?verbose=true"))
        .json(&json!({ "name": "Fred", "age": 3 }))
        .send()
        .await
        .unwrap();
    let predicates_missed = client
        .post(url(&server, ListenerKind::Http, "/users/42"))
        .json(&json!({ "name": "Fred" }))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(by_pattern.status(), 200);
    assert_eq!(by_pattern.text().await.unwrap(), "any user");
    assert_eq!(predicates_met.status(), 201);
    assert_eq!(predicates_missed.status(), 404);

    server.stop().await;
}

/// Every request is recorded before it is answered, matched or not.
#[tokio::test]
async fn requests_are_recorded_test() {
    // Arrange
    let server = start_http_server().await;
    let admin = AdminClient::new(server.address(ListenerKind::Admin).unwrap());
    server
        .create_stub(StubDefinition::new(
            "PUT",
            "/record",
            StubResponse::new(200).delay(0),
        ))
        .unwrap();
    let client = http_client();

    // Act
    client
        .put(url(&server, ListenerKind::Http, "/record?x=1"))
        .header("X-Trace", "abc")
        .body("hello")
        .send()
        .await
        .unwrap();
    client
        .get(url(&server, ListenerKind::Http, "/unknown"))
        .send()
        .await
        .unwrap();

    let recorded = admin.find_requests(&Filter::all()).await.unwrap();
    let puts = admin.find_requests(&Filter::all().method("put")).await.unwrap();
    let forgotten = admin.delete_requests(&Filter::all()).await.unwrap();

    // Assert
    assert_eq!(recorded.len(), 2);
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].path, "/record");
    assert_eq!(puts[0].query.get("x").map(String::as_str), Some("1"));
    assert_eq!(puts[0].headers.get("x-trace").map(String::as_str), Some("abc"));
    assert_eq!(puts[0].body, Body::Text("hello".to_string()));
    assert_eq!(recorded[1].path, "/unknown");
    assert_eq!(forgotten, 2);
    assert!(server.find_requests(&Filter::all()).is_empty());

    server.stop().await;
}
