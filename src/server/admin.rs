use crate::{
    common::data::{DeletedCount, ErrorResponse, Filter, StubDefinition, TimeoutConfig},
    server::{
        dispatch::{json_response, ResponseBody},
        handler::{
            Error::{
                self, FilterError, MethodNotAllowed, ParamError, ParamFormatError,
                RequestBodyDeserializeError, RouteNotFound, StateManagerError,
                UnsupportedContentType,
            },
            Handler,
        },
        manager::ServerTimeout,
        state::{self, StateManager},
    },
};
use async_trait::async_trait;
use http::{
    header::{CONTENT_TYPE, LOCATION},
    HeaderValue, Method, Request, Response, StatusCode,
};
use hyper::body::Bytes;
use path_tree::{Path, PathTree};
use serde::de::DeserializeOwned;
use std::{
    fmt::{Debug, Display},
    str::FromStr,
    sync::Arc,
};

pub const ADMIN_BASE_PATH: &str = "/admin/v1";

enum RoutePath {
    StubCollection,
    SingleStub,
    LastRequestCollection,
    Timeout,
}

/// Serves the JSON administration API.
pub(crate) struct AdminHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    path_tree: PathTree<RoutePath>,
    state: Arc<S>,
    timeout: Arc<ServerTimeout>,
}

#[async_trait]
impl<S> Handler for AdminHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        tracing::trace!("Routing admin request: {} {}", req.method(), req.uri());

        match self.route(req) {
            Ok(response) => Ok(response),
            Err(err) => error_response(err),
        }
    }
}

impl<S> AdminHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    pub fn new(state: Arc<S>, timeout: Arc<ServerTimeout>) -> Self {
        let mut path_tree: PathTree<RoutePath> = PathTree::new();
        #[allow(unused_must_use)]
        {
            path_tree.insert("/admin/v1/configs", RoutePath::StubCollection);
            path_tree.insert("/admin/v1/configs/:id", RoutePath::SingleStub);
            path_tree.insert("/admin/v1/lastrequests", RoutePath::LastRequestCollection);
            path_tree.insert("/admin/v1/timeout", RoutePath::Timeout);
        }

        Self {
            path_tree,
            state,
            timeout,
        }
    }

    fn route(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let (matched_path, params) = self
            .path_tree
            .find(&path)
            .ok_or_else(|| RouteNotFound(path.clone()))?;

        match (matched_path, method) {
            (RoutePath::StubCollection, Method::POST) => self.handle_create_stub(req),
            (RoutePath::StubCollection, Method::GET) => self.handle_find_stubs(&req),
            (RoutePath::StubCollection, Method::DELETE) => self.handle_delete_stubs(&req),
            (RoutePath::SingleStub, Method::GET) => self.handle_read_stub(params),
            (RoutePath::SingleStub, Method::DELETE) => self.handle_delete_stub(params),
            (RoutePath::LastRequestCollection, Method::GET) => self.handle_find_requests(&req),
            (RoutePath::LastRequestCollection, Method::DELETE) => {
                self.handle_delete_requests(&req)
            }
            (RoutePath::Timeout, Method::GET) => self.handle_read_timeout(),
            (RoutePath::Timeout, Method::PUT) => self.handle_set_timeout(req),
            (_, method) => Err(MethodNotAllowed(method.to_string(), path.clone())),
        }
    }

    fn handle_create_stub(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        let definition: StubDefinition = parse_json_body(req)?;
        let stub = self.state.create_stub(definition)?;

        let mut response = json_response(StatusCode::CREATED, stub.as_ref())?;
        if let Ok(location) =
            HeaderValue::from_str(&format!("{}/configs/{}", ADMIN_BASE_PATH, stub.id))
        {
            response.headers_mut().insert(LOCATION, location);
        }

        Ok(response)
    }

    fn handle_read_stub(&self, params: Path) -> Result<Response<ResponseBody>, Error> {
        let id: usize = param("id", params)?;
        let stub = self.state.read_stub(id)?;
        json_response(StatusCode::OK, stub.as_ref())
    }

    fn handle_find_stubs(&self, req: &Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        let stubs = self.state.find_stubs(&filter(req)?);
        json_response(StatusCode::OK, &stubs)
    }

    fn handle_delete_stub(&self, params: Path) -> Result<Response<ResponseBody>, Error> {
        let id: usize = param("id", params)?;
        match self.state.delete_stubs(&Filter::by_id(id)) {
            0 => Err(StateManagerError(state::Error::NotFound(id))),
            deleted => json_response(StatusCode::OK, &DeletedCount { deleted }),
        }
    }

    fn handle_delete_stubs(&self, req: &Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        let deleted = self.state.delete_stubs(&filter(req)?);
        json_response(StatusCode::OK, &DeletedCount { deleted })
    }

    fn handle_find_requests(&self, req: &Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        let requests = self.state.find_requests(&filter(req)?);
        json_response(StatusCode::OK, &requests)
    }

    fn handle_delete_requests(
        &self,
        req: &Request<Bytes>,
    ) -> Result<Response<ResponseBody>, Error> {
        let deleted = self.state.delete_requests(&filter(req)?);
        json_response(StatusCode::OK, &DeletedCount { deleted })
    }

    fn handle_read_timeout(&self) -> Result<Response<ResponseBody>, Error> {
        json_response(
            StatusCode::OK,
            &TimeoutConfig {
                timeout: self.timeout.get(),
            },
        )
    }

    fn handle_set_timeout(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        let config: TimeoutConfig = parse_json_body(req)?;
        self.timeout.set(config.timeout);
        json_response(StatusCode::OK, &config)
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        StateManagerError(state::Error::ValidationError(_))
        | RequestBodyDeserializeError(_)
        | ParamFormatError(_)
        | FilterError(_) => StatusCode::BAD_REQUEST,
        StateManagerError(state::Error::NotFound(_)) | RouteNotFound(_) | ParamError => {
            StatusCode::NOT_FOUND
        }
        MethodNotAllowed(_, _) => StatusCode::METHOD_NOT_ALLOWED,
        UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Result<Response<ResponseBody>, Error> {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::warn!("Admin request failed: {}", err);
    } else {
        tracing::debug!("Admin request rejected with {}: {}", status, err);
    }

    json_response(status, &ErrorResponse::new(&err))
}

fn param<T>(name: &str, tree_path: Path) -> Result<T, Error>
where
    T: FromStr,
    T::Err: Debug + Display,
{
    for (n, v) in tree_path.params() {
        if n.eq(name) {
            return v
                .parse::<T>()
                .map_err(|e| ParamFormatError(format!("{} '{}': {}", name, v, e)));
        }
    }

    Err(ParamError)
}

fn filter(req: &Request<Bytes>) -> Result<Filter, Error> {
    Ok(Filter::from_query(req.uri().query().unwrap_or(""))?)
}

/// A missing content type is accepted as JSON.
fn ensure_json(req: &Request<Bytes>) -> Result<(), Error> {
    let Some(content_type) = req.headers().get(CONTENT_TYPE) else {
        return Ok(());
    };

    let content_type = String::from_utf8_lossy(content_type.as_bytes()).to_string();
    let media_type = content_type.split(';').next().unwrap_or("").trim();
    if media_type.eq_ignore_ascii_case("application/json") {
        return Ok(());
    }

    Err(UnsupportedContentType(content_type))
}

fn parse_json_body<T>(req: Request<Bytes>) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    ensure_json(&req)?;
    let body: T =
        serde_json::from_slice(req.body().as_ref()).map_err(RequestBodyDeserializeError)?;
    Ok(body)
}
