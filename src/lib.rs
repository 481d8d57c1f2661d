//! `httpstub` is a standalone HTTP server that impersonates arbitrary back ends in test
//! automation. It contains two major components:
//!
//! * a **stub server** with an administration API and up to three data-plane listeners
//!   (plain HTTP, HTTPS and two-way SSL), and
//! * a small **client library** to register stubs and inspect the requests the server received.
//!
//! A *stub* describes how the server answers requests with a given method and path: the status
//! code, headers, a text or binary body and an artificial delay. Every request that reaches a
//! data-plane listener is recorded, whether a stub matched it or not. When several stubs match
//! a request, the most recently created one answers it. Requests that no stub matches get a
//! `404` with a JSON error body.
//!
//! # Getting Started
//! The following example starts a server on free ports, registers a stub through the
//! administration API and stops the server again:
//!
//! ```no_run
//! use httpstub::{run_server, AdminClient, ListenerKind, StubDefinition, StubResponse, StubServer};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = StubServer::builder().http_port(0).settings();
//! let server = run_server(settings, Duration::from_secs(5))?;
//!
//! let client = AdminClient::new(server.address(ListenerKind::Admin).unwrap());
//! client
//!     .create_stub(&StubDefinition::new(
//!         "GET",
//!         "/foo",
//!         StubResponse::new(200).body("bar").delay(0),
//!     ))
//!     .await?;
//!
//! // Requests to `server.address(ListenerKind::Http)` + "/foo" are now answered with "bar".
//!
//! server.stop();
//! # Ok(())
//! # }
//! ```
//!
//! # Administration API
//! The administration listener serves JSON under `/admin/v1`:
//!
//! * `POST /configs` creates a stub, `GET /configs[/:id]` reads stubs and
//!   `DELETE /configs[/:id]` deletes them.
//! * `GET /lastrequests` lists recorded requests and `DELETE /lastrequests` forgets them.
//! * `GET /timeout` and `PUT /timeout` read and change the idle timeout of data-plane
//!   connections.
//!
//! Collection routes accept the query filters `id`, `method` and `path`. Binary bodies are
//! base64 encoded on the wire and flagged with `"binaryBody": true`.
//!
//! # Standalone Mode
//! With the `standalone` feature enabled, the crate builds the `httpstub` binary:
//!
//! ```text
//! httpstub --admin-port 5001 --port 5002 --https-port 5003 --key key.pem --cert cert.pem
//! ```
//!
//! Every flag can also be set with an `HTTPSTUB_*` environment variable. When a listener fails
//! after startup the process exits with a listener specific code: 101 for the administration
//! listener, 102 for HTTP, 103 for HTTPS and 104 for two-way SSL.
pub mod api;
pub mod common;
pub mod server;

pub use api::{
    client::{AdminClient, Error as ClientError},
    launcher::{run_server, Error as LaunchError, ServerHandle},
};
pub use common::data::{
    Body, Filter, LastRequestEntry, RequestPredicates, StubConfig, StubDefinition, StubResponse,
    ANY_METHOD, DEFAULT_DELAY_MS,
};
pub use server::{
    Error, ListenerEvent, ListenerKind, ListenerState, MutualTlsSettings, ServerSettings,
    StoreError, StubServer, StubServerBuilder, TlsSettings, TlsSource, DEFAULT_TIMEOUT_MS,
};
