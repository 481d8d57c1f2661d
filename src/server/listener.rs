use crate::server::{
    handler::Handler,
    io::IdleTimeoutStream,
    manager::ServerTimeout,
    server::{
        serve_connection,
        Error::{self, LocalSocketAddrError, SocketBindError, TlsHandshakeError},
    },
};
use std::{
    collections::HashMap,
    fmt,
    future::{poll_fn, Future},
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::{broadcast, oneshot, watch},
    task::{AbortHandle, JoinHandle, JoinSet},
};
use tokio_rustls::TlsAcceptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListenerKind {
    Admin,
    Http,
    Https,
    TwoWaySsl,
}

impl ListenerKind {
    pub const ALL: [ListenerKind; 4] = [
        ListenerKind::Admin,
        ListenerKind::Http,
        ListenerKind::Https,
        ListenerKind::TwoWaySsl,
    ];

    /// Process exit code of the standalone binary when this listener fails.
    pub fn exit_code(&self) -> u8 {
        match self {
            ListenerKind::Admin => 101,
            ListenerKind::Http => 102,
            ListenerKind::Https => 103,
            ListenerKind::TwoWaySsl => 104,
        }
    }

    pub fn is_data_plane(&self) -> bool {
        !matches!(self, ListenerKind::Admin)
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ListenerKind::Admin => "Administration",
            ListenerKind::Http => "HTTP",
            ListenerKind::Https => "HTTPS",
            ListenerKind::TwoWaySsl => "2waySSL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Listening,
    Draining,
    Closed,
}

/// Lifecycle notifications published by the listeners of a server.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    StateChanged {
        kind: ListenerKind,
        state: ListenerState,
        addr: Option<SocketAddr>,
    },
    /// The listener could not accept connections anymore and shut itself down.
    Failed {
        kind: ListenerKind,
        error: Arc<io::Error>,
    },
}

type ConnectionArena = Arc<Mutex<HashMap<u64, (SocketAddr, AbortHandle)>>>;

/// A source of inbound connections for an accept loop.
pub(crate) trait Accept: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn poll_accept(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<(Self::Stream, SocketAddr)>>;
}

impl Accept for TcpListener {
    type Stream = TcpStream;

    fn poll_accept(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<(Self::Stream, SocketAddr)>> {
        TcpListener::poll_accept(self, cx)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn publish(
    events: &broadcast::Sender<ListenerEvent>,
    kind: ListenerKind,
    state: ListenerState,
    addr: Option<SocketAddr>,
) {
    // Nobody subscribed is not an error.
    let _ = events.send(ListenerEvent::StateChanged { kind, state, addr });
}

/// A bound socket that is not accepting connections yet.
pub(crate) struct Listener {
    kind: ListenerKind,
    tcp: TcpListener,
    local_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    pub async fn bind(
        kind: ListenerKind,
        addr: SocketAddr,
        tls: Option<TlsAcceptor>,
    ) -> Result<Self, Error> {
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|err| SocketBindError(kind, addr, err))?;
        let local_addr = tcp.local_addr().map_err(LocalSocketAddrError)?;

        Ok(Listener {
            kind,
            tcp,
            local_addr,
            tls,
        })
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts the accept loop. Data-plane listeners pass the shared timeout, which every new
    /// connection reads once when it is accepted.
    pub fn spawn(
        self,
        handler: Arc<dyn Handler + Send + Sync>,
        timeout: Option<Arc<ServerTimeout>>,
        events: broadcast::Sender<ListenerEvent>,
    ) -> ListenerHandle {
        let accept_loop = AcceptLoop::new(self.kind, self.tls, handler, timeout, events);
        accept_loop.spawn(self.tcp, self.local_addr)
    }
}

/// Controls an accept loop. The handle stays valid after the loop closed, so the final state
/// remains observable.
pub(crate) struct ListenerHandle {
    kind: ListenerKind,
    local_addr: SocketAddr,
    state: watch::Receiver<ListenerState>,
    connections: ConnectionArena,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ListenerState::Closed
    }

    /// Signals the loop to stop accepting and to force-close every open connection. The returned
    /// future resolves once the listener is closed. Returns `None` if it was closed before.
    pub fn close(&mut self) -> Option<impl Future<Output = ()> + Send + 'static> {
        if let Some(shutdown) = self.shutdown.take() {
            // The receiver is gone when the loop already ended on its own.
            let _ = shutdown.send(());
        }

        let task = self.task.take()?;
        let kind = self.kind;
        Some(async move {
            if let Err(err) = task.await {
                tracing::warn!("{} server task ended abnormally: {}", kind, err);
            }
        })
    }
}

struct AcceptLoop {
    kind: ListenerKind,
    tls: Option<TlsAcceptor>,
    handler: Arc<dyn Handler + Send + Sync>,
    timeout: Option<Arc<ServerTimeout>>,
    events: broadcast::Sender<ListenerEvent>,
    connections: ConnectionArena,
    state: watch::Sender<ListenerState>,
    next_connection_id: u64,
}

impl AcceptLoop {
    pub fn new(
        kind: ListenerKind,
        tls: Option<TlsAcceptor>,
        handler: Arc<dyn Handler + Send + Sync>,
        timeout: Option<Arc<ServerTimeout>>,
        events: broadcast::Sender<ListenerEvent>,
    ) -> Self {
        AcceptLoop {
            kind,
            tls,
            handler,
            timeout,
            events,
            connections: ConnectionArena::default(),
            state: watch::channel(ListenerState::Listening).0,
            next_connection_id: 0,
        }
    }

    /// Publishes `Listening` and runs the loop on its own task.
    pub fn spawn<A: Accept>(self, acceptor: A, local_addr: SocketAddr) -> ListenerHandle {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let kind = self.kind;
        let connections = self.connections.clone();
        let state = self.state.subscribe();

        publish(&self.events, kind, ListenerState::Listening, Some(local_addr));
        let task = tokio::spawn(self.run(acceptor, shutdown_receiver));

        ListenerHandle {
            kind,
            local_addr,
            state,
            connections,
            shutdown: Some(shutdown_sender),
            task: Some(task),
        }
    }

    async fn run<A: Accept>(mut self, mut acceptor: A, mut shutdown: oneshot::Receiver<()>) {
        let mut tasks = JoinSet::new();

        let failure = loop {
            tokio::select! {
                accepted = poll_fn(|cx| acceptor.poll_accept(cx)) => match accepted {
                    Ok((stream, remote)) => self.accept(&mut tasks, stream, remote),
                    Err(err) if is_transient(&err) => {
                        tracing::debug!("{} server skipped a failed accept: {}", self.kind, err);
                    }
                    Err(err) => break Some(err),
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                _ = &mut shutdown => break None,
            }
        };

        self.set_state(ListenerState::Draining);
        drop(acceptor);

        if let Some(err) = &failure {
            tracing::error!("{} server stopped accepting connections: {}", self.kind, err);
        }

        let open: Vec<(u64, (SocketAddr, AbortHandle))> = lock(&self.connections).drain().collect();
        tracing::debug!(
            "{} server closing {} open connection(s)",
            self.kind,
            open.len()
        );
        for (_, (_, handle)) in open {
            handle.abort();
        }
        while tasks.join_next().await.is_some() {}

        if let Some(err) = failure {
            let _ = self.events.send(ListenerEvent::Failed {
                kind: self.kind,
                error: Arc::new(err),
            });
        }

        self.set_state(ListenerState::Closed);
        tracing::info!("{} server closed", self.kind);
    }

    fn set_state(&self, state: ListenerState) {
        self.state.send_replace(state);
        publish(&self.events, self.kind, state, None);
    }

    fn accept<S>(&mut self, tasks: &mut JoinSet<()>, stream: S, remote: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_connection_id;
        self.next_connection_id += 1;

        let idle_timeout = self
            .timeout
            .as_ref()
            .and_then(|timeout| timeout.idle_duration());
        let kind = self.kind;
        let tls = self.tls.clone();
        let handler = self.handler.clone();
        let connections = self.connections.clone();

        tracing::trace!("{} server accepted connection from {}", kind, remote);

        // Registration happens under the lock so the task cannot deregister before it is tracked.
        let mut tracked = lock(&self.connections);
        let handle = tasks.spawn(async move {
            let stream = IdleTimeoutStream::new(stream, idle_timeout);

            let result = match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(handler, stream).await,
                    Err(err) => Err(TlsHandshakeError(err)),
                },
                None => serve_connection(handler, stream).await,
            };

            if let Err(err) = result {
                tracing::debug!("{} connection from {} closed: {}", kind, remote, err);
            }

            lock(&connections).remove(&id);
        });
        tracked.insert(id, (remote, handle));
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
