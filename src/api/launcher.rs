use crate::{
    api::launcher::Error::{ServerError, StartupTimeout, ThreadError, ThreadTerminated},
    common::runtime,
    server::{
        builder::ServerSettings,
        listener::ListenerKind,
        server::{self, StubServer},
    },
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum Error {
    #[error("server did not become ready within {0:?}")]
    StartupTimeout(Duration),
    #[error("cannot start server: {0}")]
    ServerError(#[from] server::Error),
    #[error("cannot build runtime: {0}")]
    RuntimeError(std::io::Error),
    #[error("cannot spawn server thread: {0}")]
    ThreadError(std::io::Error),
    #[error("server thread terminated before it became ready")]
    ThreadTerminated,
}

type Readiness = Result<HashMap<ListenerKind, SocketAddr>, Error>;

/// A server started by [`run_server`]. Dropping the handle stops the server.
pub struct ServerHandle {
    addresses: HashMap<ListenerKind, SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn address(&self, kind: ListenerKind) -> Option<SocketAddr> {
        self.addresses.get(&kind).copied()
    }

    pub fn addresses(&self) -> &HashMap<ListenerKind, SocketAddr> {
        &self.addresses
    }

    /// Stops the server and waits until every listener is closed.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Server thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// Starts a stub server on a dedicated thread with its own runtime and blocks until every
/// listener is bound, startup failed or `startup_timeout` elapsed.
pub fn run_server(
    settings: ServerSettings,
    startup_timeout: Duration,
) -> Result<ServerHandle, Error> {
    let (ready_sender, ready_receiver) = mpsc::channel::<Readiness>();
    let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();

    let thread = thread::Builder::new()
        .name("httpstub-server".to_string())
        .spawn(move || serve(settings, ready_sender, shutdown_receiver))
        .map_err(ThreadError)?;

    match ready_receiver.recv_timeout(startup_timeout) {
        Ok(Ok(addresses)) => Ok(ServerHandle {
            addresses,
            shutdown: Some(shutdown_sender),
            thread: Some(thread),
        }),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err)
        }
        // The thread notices the dropped receiver once it is ready and shuts itself down.
        Err(RecvTimeoutError::Timeout) => Err(StartupTimeout(startup_timeout)),
        Err(RecvTimeoutError::Disconnected) => {
            let _ = thread.join();
            Err(ThreadTerminated)
        }
    }
}

fn serve(
    settings: ServerSettings,
    ready: mpsc::Sender<Readiness>,
    shutdown: oneshot::Receiver<()>,
) {
    let runtime = match runtime::new(2, 4) {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(Error::RuntimeError(err)));
            return;
        }
    };

    runtime.block_on(async move {
        let server = StubServer::new(settings);
        if let Err(err) = server.start().await {
            let _ = ready.send(Err(ServerError(err)));
            return;
        }

        let addresses = ListenerKind::ALL
            .iter()
            .filter_map(|kind| server.address(*kind).map(|addr| (*kind, addr)))
            .collect();

        if ready.send(Ok(addresses)).is_ok() {
            // A dropped handle counts as a shutdown request as well.
            let _ = shutdown.await;
        }

        server.stop().await;
    });
}
