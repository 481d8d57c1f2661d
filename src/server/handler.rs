use crate::{
    common::data::{Body, InboundRequest},
    server::{
        dispatch::{self, ResponseBody},
        matcher::StubMatcher,
        state,
        state::StateManager,
    },
};
use async_trait::async_trait;
use http::HeaderMap;
use hyper::{body::Bytes, Request, Response};
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot deserialize request body: {0}")]
    RequestBodyDeserializeError(serde_json::Error),
    #[error("cannot serialize response body: {0}")]
    ResponseBodySerializeError(serde_json::Error),
    #[error("cannot build response: {0}")]
    ResponseConstructionError(http::Error),
    #[error("expected URL parameters not found")]
    ParamError,
    #[error("URL parameter format is invalid: {0}")]
    ParamFormatError(String),
    #[error("{0}")]
    StateManagerError(#[from] state::Error),
    #[error("invalid status code: {0}")]
    InvalidStatusCode(#[from] http::status::InvalidStatusCode),
    #[error("{0}")]
    FilterError(#[from] crate::common::data::Error),
    #[error("no route for path {0}")]
    RouteNotFound(String),
    #[error("method {0} is not allowed for path {1}")]
    MethodNotAllowed(String, String),
    #[error("unsupported content type '{0}', expected application/json")]
    UnsupportedContentType(String),
}

#[async_trait]
pub(crate) trait Handler {
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, Error>;
}

/// Serves data-plane requests: every request is recorded and answered by the best matching
/// stub, or by a JSON 404 when nothing matches.
pub(crate) struct StubHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    matcher: StubMatcher<S>,
}

impl<S> StubHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    pub fn new(state: Arc<S>) -> Self {
        Self {
            matcher: StubMatcher::new(state),
        }
    }
}

#[async_trait]
impl<S> Handler for StubHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        tracing::trace!("Matching incoming request: {} {}", req.method(), req.uri());

        let request = to_inbound_request(req);
        let (method, path) = (request.method.clone(), request.path.clone());

        match self.matcher.find_stub(request) {
            Some(stub) => dispatch::stub_response(&stub).await,
            None => dispatch::no_match_response(&method, &path),
        }
    }
}

pub(crate) fn to_inbound_request(req: Request<Bytes>) -> InboundRequest {
    let (parts, body) = req.into_parts();

    InboundRequest {
        timestamp: now_millis(),
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        headers: headers_to_map(&parts.headers),
        query: query_to_map(parts.uri.query()),
        body: Body::from_bytes(body),
    }
}

/// Header names are lowercased. Repeated headers are joined with ", ".
fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    map
}

/// The first occurrence of a repeated query parameter wins.
fn query_to_map(query: Option<&str>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        map.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    map
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
