use crate::{
    api::client::Error::{
        JsonDeserializationError, JsonSerializationError, RequestBuildError, UnexpectedStatus,
    },
    common::{
        data::{
            DeletedCount, ErrorResponse, Filter, LastRequestEntry, StubConfig, StubDefinition,
            TimeoutConfig,
        },
        http::{self as http_client, HttpClient, HttpStubHttpClient},
    },
    server::admin::ADMIN_BASE_PATH,
};
use bytes::Bytes;
use http::{header::CONTENT_TYPE, Method, Request, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot send request: {0}")]
    HttpClientError(#[from] http_client::Error),
    #[error("cannot build request: {0}")]
    RequestBuildError(http::Error),
    #[error("cannot serialize request body: {0}")]
    JsonSerializationError(serde_json::Error),
    #[error("cannot deserialize response body: {0}")]
    JsonDeserializationError(serde_json::Error),
    #[error("unexpected status code {0}: {1}")]
    UnexpectedStatus(u16, String),
}

/// Talks to the administration API of a running stub server.
///
/// Binary bodies are exchanged as raw bytes. Their base64 form only exists on the wire.
pub struct AdminClient {
    base_url: String,
    http_client: Arc<dyn HttpClient + Send + Sync + 'static>,
}

impl AdminClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_base_url(format!("http://{}{}", addr, ADMIN_BASE_PATH))
    }

    /// `base_url` points at the API root, e.g. `http://localhost:5001/admin/v1`.
    pub fn with_base_url<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: Arc::new(HttpStubHttpClient::new()),
        }
    }

    pub async fn create_stub(&self, definition: &StubDefinition) -> Result<StubConfig, Error> {
        let (status, body) = self
            .request(Method::POST, "/configs", Some(definition))
            .await?;
        expect_json(status, StatusCode::CREATED, &body)
    }

    /// Returns `Ok(None)` if no stub with this id exists.
    pub async fn read_stub(&self, id: usize) -> Result<Option<StubConfig>, Error> {
        let (status, body) = self
            .request::<()>(Method::GET, &format!("/configs/{}", id), None)
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        expect_json(status, StatusCode::OK, &body).map(Some)
    }

    pub async fn find_stubs(&self, filter: &Filter) -> Result<Vec<StubConfig>, Error> {
        let (status, body) = self
            .request::<()>(Method::GET, &with_query("/configs", filter), None)
            .await?;
        expect_json(status, StatusCode::OK, &body)
    }

    /// Returns whether a stub was deleted.
    pub async fn delete_stub(&self, id: usize) -> Result<bool, Error> {
        let (status, body) = self
            .request::<()>(Method::DELETE, &format!("/configs/{}", id), None)
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let deleted: DeletedCount = expect_json(status, StatusCode::OK, &body)?;
        Ok(deleted.deleted > 0)
    }

    pub async fn delete_stubs(&self, filter: &Filter) -> Result<usize, Error> {
        let (status, body) = self
            .request::<()>(Method::DELETE, &with_query("/configs", filter), None)
            .await?;
        let deleted: DeletedCount = expect_json(status, StatusCode::OK, &body)?;
        Ok(deleted.deleted)
    }

    pub async fn find_requests(&self, filter: &Filter) -> Result<Vec<LastRequestEntry>, Error> {
        let (status, body) = self
            .request::<()>(Method::GET, &with_query("/lastrequests", filter), None)
            .await?;
        expect_json(status, StatusCode::OK, &body)
    }

    pub async fn delete_requests(&self, filter: &Filter) -> Result<usize, Error> {
        let (status, body) = self
            .request::<()>(Method::DELETE, &with_query("/lastrequests", filter), None)
            .await?;
        let deleted: DeletedCount = expect_json(status, StatusCode::OK, &body)?;
        Ok(deleted.deleted)
    }

    pub async fn timeout(&self) -> Result<u64, Error> {
        let (status, body) = self.request::<()>(Method::GET, "/timeout", None).await?;
        let config: TimeoutConfig = expect_json(status, StatusCode::OK, &body)?;
        Ok(config.timeout)
    }

    pub async fn set_timeout(&self, millis: u64) -> Result<(), Error> {
        let (status, body) = self
            .request(
                Method::PUT,
                "/timeout",
                Some(&TimeoutConfig { timeout: millis }),
            )
            .await?;
        expect_json::<TimeoutConfig>(status, StatusCode::OK, &body)?;
        Ok(())
    }

    async fn request<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<(StatusCode, Bytes), Error> {
        let builder = Request::builder()
            .method(method)
            .uri(format!("{}{}", self.base_url, path));

        let request = match body {
            Some(body) => {
                let json = serde_json::to_vec(body).map_err(JsonSerializationError)?;
                builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(Bytes::from(json))
            }
            None => builder.body(Bytes::new()),
        }
        .map_err(RequestBuildError)?;

        let response = self.http_client.send(request).await?;
        Ok((response.status(), response.into_body()))
    }
}

fn with_query(path: &str, filter: &Filter) -> String {
    if filter.is_empty() {
        return path.to_string();
    }
    format!("{}?{}", path, filter.to_query())
}

fn expect_json<T: DeserializeOwned>(
    status: StatusCode,
    expected: StatusCode,
    body: &Bytes,
) -> Result<T, Error> {
    if status != expected {
        let message = serde_json::from_slice::<ErrorResponse>(body)
            .map(|err| err.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).to_string());
        return Err(UnexpectedStatus(status.as_u16(), message));
    }

    serde_json::from_slice(body).map_err(JsonDeserializationError)
}
