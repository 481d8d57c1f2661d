use crate::server::{
    builder::ServerSettings,
    handler::Handler,
    listener::{publish, Listener, ListenerEvent, ListenerHandle, ListenerKind, ListenerState},
    server::Error::{self, ConfigurationError, TlsConfigurationError},
    tls::{self, TlsSource},
};
use futures_util::future::{join_all, try_join_all};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

/// Idle timeout applied to new data-plane connections unless configured otherwise.
pub const DEFAULT_TIMEOUT_MS: u64 = 2 * 60 * 1000;

const EVENT_CAPACITY: usize = 64;

/// The process-wide idle timeout in milliseconds. Zero disables it.
#[derive(Debug)]
pub struct ServerTimeout {
    millis: AtomicU64,
}

impl ServerTimeout {
    pub fn new(millis: u64) -> Self {
        ServerTimeout {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn get(&self) -> u64 {
        self.millis.load(Ordering::Relaxed)
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::Relaxed);
        tracing::info!("Idle timeout set to {} ms", millis);
    }

    pub fn idle_duration(&self) -> Option<Duration> {
        match self.get() {
            0 => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }
}

impl Default for ServerTimeout {
    fn default() -> Self {
        ServerTimeout::new(DEFAULT_TIMEOUT_MS)
    }
}

/// Owns the listeners of one server and coordinates their start and stop.
pub(crate) struct ListenerManager {
    timeout: Arc<ServerTimeout>,
    listeners: Mutex<HashMap<ListenerKind, ListenerHandle>>,
    events: broadcast::Sender<ListenerEvent>,
}

impl ListenerManager {
    pub fn new(timeout: Arc<ServerTimeout>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        ListenerManager {
            timeout,
            listeners: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListenerKind, ListenerHandle>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timeout(&self) -> &Arc<ServerTimeout> {
        &self.timeout
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.events.subscribe()
    }

    /// Closed listeners have no address.
    pub fn address(&self, kind: ListenerKind) -> Option<SocketAddr> {
        self.lock()
            .get(&kind)
            .filter(|handle| !handle.is_closed())
            .map(ListenerHandle::local_addr)
    }

    /// Listeners that were never started report `Stopped`. Closed listeners report `Closed`
    /// until the next `start`.
    pub fn state(&self, kind: ListenerKind) -> ListenerState {
        self.lock()
            .get(&kind)
            .map_or(ListenerState::Stopped, ListenerHandle::state)
    }

    pub fn connection_count(&self, kind: ListenerKind) -> usize {
        self.lock()
            .get(&kind)
            .map_or(0, ListenerHandle::connection_count)
    }

    pub async fn start(
        &self,
        settings: &ServerSettings,
        admin: Arc<dyn Handler + Send + Sync>,
        data: Arc<dyn Handler + Send + Sync>,
    ) -> Result<(), Error> {
        if !settings.has_data_plane() {
            return Err(ConfigurationError("no server configured".to_string()));
        }

        if is_running(&self.lock()) {
            return Err(ConfigurationError("server already started".to_string()));
        }

        let plan = plan_listeners(settings)?;
        let kinds: Vec<ListenerKind> = plan.iter().map(|(kind, _, _)| *kind).collect();
        for (kind, addr, _) in &plan {
            publish(&self.events, *kind, ListenerState::Starting, Some(*addr));
        }

        let binds = plan
            .into_iter()
            .map(|(kind, addr, tls)| Listener::bind(kind, addr, tls));
        let bound = match try_join_all(binds).await {
            Ok(bound) => bound,
            Err(err) => {
                tracing::error!("Cannot start servers: {}", err);
                for kind in kinds {
                    publish(&self.events, kind, ListenerState::Closed, None);
                }
                return Err(err);
            }
        };

        let mut listeners = self.lock();
        if is_running(&listeners) {
            return Err(ConfigurationError("server already started".to_string()));
        }
        listeners.clear();

        for listener in bound {
            let kind = listener.kind();
            let (handler, timeout) = if kind.is_data_plane() {
                (data.clone(), Some(self.timeout.clone()))
            } else {
                (admin.clone(), None)
            };

            tracing::info!(
                "{} server listening on port {}",
                kind,
                listener.local_addr().port()
            );
            listeners.insert(kind, listener.spawn(handler, timeout, self.events.clone()));
        }

        Ok(())
    }

    pub async fn stop(&self) {
        let closing: Vec<_> = self
            .lock()
            .values_mut()
            .filter_map(ListenerHandle::close)
            .collect();
        if closing.is_empty() {
            return;
        }

        join_all(closing).await;
        tracing::info!("All servers stopped");
    }
}

fn is_running(listeners: &HashMap<ListenerKind, ListenerHandle>) -> bool {
    listeners.values().any(|handle| !handle.is_closed())
}

/// Resolves the socket address and TLS acceptor of every requested listener. The admin
/// listener always comes first.
fn plan_listeners(
    settings: &ServerSettings,
) -> Result<Vec<(ListenerKind, SocketAddr, Option<TlsAcceptor>)>, Error> {
    let host = settings.host();
    let mut plan = vec![(
        ListenerKind::Admin,
        SocketAddr::new(host, settings.admin_port),
        None,
    )];

    if let Some(port) = settings.http_port {
        plan.push((ListenerKind::Http, SocketAddr::new(host, port), None));
    }

    if let Some(https) = &settings.https {
        let acceptor = acceptor(ListenerKind::Https, &https.key, &https.cert, None)?;
        plan.push((
            ListenerKind::Https,
            SocketAddr::new(host, https.port),
            Some(acceptor),
        ));
    }

    if let Some(mutual) = &settings.two_way_ssl {
        let acceptor = acceptor(
            ListenerKind::TwoWaySsl,
            &mutual.key,
            &mutual.cert,
            Some(&mutual.ca),
        )?;
        plan.push((
            ListenerKind::TwoWaySsl,
            SocketAddr::new(host, mutual.port),
            Some(acceptor),
        ));
    }

    Ok(plan)
}

fn acceptor(
    kind: ListenerKind,
    key: &TlsSource,
    cert: &TlsSource,
    ca: Option<&TlsSource>,
) -> Result<TlsAcceptor, Error> {
    tls::server_acceptor(key, cert, ca).map_err(|err| TlsConfigurationError(kind, err))
}
