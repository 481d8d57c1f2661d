use crate::{
    common::data::{ErrorResponse, Filter, LastRequestEntry, StubConfig, StubDefinition},
    server::{
        admin::AdminHandler,
        builder::{ServerSettings, StubServerBuilder},
        dispatch::{full, ResponseBody},
        handler::{self, Handler, StubHandler},
        listener::{ListenerEvent, ListenerKind, ListenerState},
        manager::{ListenerManager, ServerTimeout},
        server::Error::{BufferError, RouterError, ServerConnectionError},
        state::{self, HttpStubStateManager, StateManager},
        tls,
    },
};
use http::{header::CONTENT_TYPE, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::{
    body::{Bytes, Incoming},
    service::service_fn,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder as ServerBuilder,
};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Server configuration error: {0}")]
    ConfigurationError(String),
    #[error("cannot configure TLS for the {0} server: {1}")]
    TlsConfigurationError(ListenerKind, tls::Error),
    #[error("cannot bind {0} server to socket addr {1}: {2}")]
    SocketBindError(ListenerKind, SocketAddr, std::io::Error),
    #[error("cannot obtain local address: {0}")]
    LocalSocketAddrError(std::io::Error),
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeError(std::io::Error),
    #[error("buffering error: {0}")]
    BufferError(hyper::Error),
    #[error("HTTP error: {0}")]
    HTTPError(#[from] http::Error),
    #[error("cannot serialize response body: {0}")]
    ResponseBodySerializeError(#[from] serde_json::Error),
    #[error("cannot process request: {0}")]
    RouterError(#[from] handler::Error),
    #[error("Server error: {0}")]
    ServerConnectionError(Box<dyn std::error::Error + Send + Sync>),
}

/// A stub server: one store and recorder shared by an administration listener and up to three
/// data-plane listeners (plain HTTP, HTTPS and two-way SSL).
pub struct StubServer {
    settings: ServerSettings,
    state: Arc<HttpStubStateManager>,
    manager: ListenerManager,
}

impl StubServer {
    pub fn new(settings: ServerSettings) -> Self {
        let timeout = Arc::new(ServerTimeout::new(settings.timeout));
        StubServer {
            state: Arc::new(HttpStubStateManager::new(settings.history_limit)),
            manager: ListenerManager::new(timeout),
            settings,
        }
    }

    pub fn builder() -> StubServerBuilder {
        StubServerBuilder::new()
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Binds every configured listener and starts accepting connections. Resolves once all of
    /// them are listening, or with the first error after tearing the others down.
    pub async fn start(&self) -> Result<(), Error> {
        let admin = Arc::new(AdminHandler::new(
            self.state.clone(),
            self.manager.timeout().clone(),
        ));
        let data = Arc::new(StubHandler::new(self.state.clone()));

        self.manager.start(&self.settings, admin, data).await
    }

    /// Stops every listener and force-closes all open connections. Resolves once everything is
    /// closed.
    pub async fn stop(&self) {
        self.manager.stop().await
    }

    pub fn address(&self, kind: ListenerKind) -> Option<SocketAddr> {
        self.manager.address(kind)
    }

    /// A listener that was never started reports `Stopped`. After `stop` it reports `Closed`
    /// until the server starts again.
    pub fn listener_state(&self, kind: ListenerKind) -> ListenerState {
        self.manager.state(kind)
    }

    /// Number of open connections on a listener.
    pub fn connection_count(&self, kind: ListenerKind) -> usize {
        self.manager.connection_count(kind)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.manager.subscribe()
    }

    pub fn timeout(&self) -> u64 {
        self.manager.timeout().get()
    }

    /// Changes the idle timeout. Only connections accepted afterwards are affected.
    pub fn set_timeout(&self, millis: u64) {
        self.manager.timeout().set(millis)
    }

    pub fn create_stub(&self, definition: StubDefinition) -> Result<Arc<StubConfig>, state::Error> {
        self.state.create_stub(definition)
    }

    pub fn read_stub(&self, id: usize) -> Result<Arc<StubConfig>, state::Error> {
        self.state.read_stub(id)
    }

    pub fn find_stubs(&self, filter: &Filter) -> Vec<Arc<StubConfig>> {
        self.state.find_stubs(filter)
    }

    pub fn delete_stubs(&self, filter: &Filter) -> usize {
        self.state.delete_stubs(filter)
    }

    pub fn find_requests(&self, filter: &Filter) -> Vec<Arc<LastRequestEntry>> {
        self.state.find_requests(filter)
    }

    pub fn delete_requests(&self, filter: &Filter) -> usize {
        self.state.delete_requests(filter)
    }

    /// Removes all stubs and recorded requests.
    pub fn reset(&self) {
        self.state.reset()
    }
}

pub(crate) async fn serve_connection<S>(
    handler: Arc<dyn Handler + Send + Sync>,
    stream: S,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut server_builder = ServerBuilder::new(TokioExecutor::new());
    server_builder.http1().preserve_header_case(true);

    server_builder
        .serve_connection(
            TokioIo::new(stream),
            service_fn(|req| service(handler.clone(), req)),
        )
        .await
        .map_err(ServerConnectionError)
}

async fn service(
    handler: Arc<dyn Handler + Send + Sync>,
    req: Request<Incoming>,
) -> Result<Response<ResponseBody>, Error> {
    tracing::trace!("New HTTP request received: {} {}", req.method(), req.uri());

    let req = match buffer_request(req).await {
        Ok(req) => req,
        Err(err) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, BufferError(err));
        }
    };

    match handler.handle(req).await {
        Ok(response) => Ok(response),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, RouterError(err)),
    }
}

async fn buffer_request(req: Request<Incoming>) -> Result<Request<Bytes>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(Request::from_parts(parts, body))
}

fn error_response(code: StatusCode, err: Error) -> Result<Response<ResponseBody>, Error> {
    tracing::error!("failed to process request: {}", err);

    let body = serde_json::to_vec(&ErrorResponse::new(&err))?;
    Ok(Response::builder()
        .status(code)
        .header(CONTENT_TYPE, "application/json")
        .body(full(body))?)
}
