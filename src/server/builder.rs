use crate::server::{manager::DEFAULT_TIMEOUT_MS, server::StubServer, tls::TlsSource};
use std::net::{IpAddr, Ipv4Addr};

/// Settings of the one-way TLS (HTTPS) listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub port: u16,
    pub key: TlsSource,
    pub cert: TlsSource,
}

/// Settings of the mutual TLS (two-way SSL) listener. Clients must present a certificate
/// signed by `ca`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutualTlsSettings {
    pub port: u16,
    pub key: TlsSource,
    pub cert: TlsSource,
    pub ca: TlsSource,
}

/// Everything a [`StubServer`] needs to start its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port of the administration listener. `0` picks a free port.
    pub admin_port: u16,
    pub http_port: Option<u16>,
    pub https: Option<TlsSettings>,
    pub two_way_ssl: Option<MutualTlsSettings>,
    /// Idle timeout of data-plane connections in milliseconds. `0` disables it.
    pub timeout: u64,
    /// Binds to all interfaces instead of the loopback interface.
    pub expose: bool,
    /// Maximum number of recorded requests kept.
    pub history_limit: usize,
}

impl ServerSettings {
    /// Whether at least one listener that serves stubs is configured.
    pub fn has_data_plane(&self) -> bool {
        self.http_port.is_some() || self.https.is_some() || self.two_way_ssl.is_some()
    }

    pub(crate) fn host(&self) -> IpAddr {
        if self.expose {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            admin_port: 0,
            http_port: None,
            https: None,
            two_way_ssl: None,
            timeout: DEFAULT_TIMEOUT_MS,
            expose: false,
            history_limit: usize::MAX,
        }
    }
}

/// The `StubServerBuilder` struct is used to configure a stub server.
/// It provides methods to set the ports of the listeners, their TLS material, the idle timeout
/// and the request history limit.
pub struct StubServerBuilder {
    admin_port: Option<u16>,
    http_port: Option<u16>,
    https: Option<TlsSettings>,
    two_way_ssl: Option<MutualTlsSettings>,
    timeout: Option<u64>,
    expose: Option<bool>,
    history_limit: Option<usize>,
}

impl StubServerBuilder {
    /// Creates a new instance of `StubServerBuilder` with default settings.
    ///
    /// # Returns
    /// A new `StubServerBuilder` instance.
    pub fn new() -> Self {
        StubServerBuilder {
            admin_port: None,
            http_port: None,
            https: None,
            two_way_ssl: None,
            timeout: None,
            expose: None,
            history_limit: None,
        }
    }

    /// Sets the port of the administration listener.
    ///
    /// # Parameters
    /// - `port`: The port number. `0` picks a free port.
    ///
    /// # Returns
    /// A modified `StubServerBuilder` instance for method chaining.
    pub fn admin_port(mut self, port: u16) -> Self {
        self.admin_port = Some(port);
        self
    }

    /// Sets the port of the administration listener as an optional value.
    pub fn admin_port_option(mut self, port: Option<u16>) -> Self {
        self.admin_port = port;
        self
    }

    /// Enables the plain HTTP listener.
    ///
    /// # Parameters
    /// - `port`: The port number. `0` picks a free port.
    ///
    /// # Returns
    /// A modified `StubServerBuilder` instance for method chaining.
    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    /// Enables the plain HTTP listener when `port` is set.
    pub fn http_port_option(mut self, port: Option<u16>) -> Self {
        self.http_port = port;
        self
    }

    /// Enables the HTTPS listener.
    ///
    /// # Parameters
    /// - `port`: The port number. `0` picks a free port.
    /// - `key`: The PEM encoded private key of the server.
    /// - `cert`: The PEM encoded certificate chain of the server.
    ///
    /// # Returns
    /// A modified `StubServerBuilder` instance for method chaining.
    pub fn https(mut self, port: u16, key: TlsSource, cert: TlsSource) -> Self {
        self.https = Some(TlsSettings { port, key, cert });
        self
    }

    /// Sets the HTTPS listener settings as an optional value.
    pub fn https_option(mut self, settings: Option<TlsSettings>) -> Self {
        self.https = settings;
        self
    }

    /// Enables the two-way SSL listener, which requires clients to authenticate with a
    /// certificate.
    ///
    /// # Parameters
    /// - `port`: The port number. `0` picks a free port.
    /// - `key`: The PEM encoded private key of the server.
    /// - `cert`: The PEM encoded certificate chain of the server.
    /// - `ca`: The PEM encoded certificate authority client certificates must be signed by.
    ///
    /// # Returns
    /// A modified `StubServerBuilder` instance for method chaining.
    pub fn two_way_ssl(
        mut self,
        port: u16,
        key: TlsSource,
        cert: TlsSource,
        ca: TlsSource,
    ) -> Self {
        self.two_way_ssl = Some(MutualTlsSettings {
            port,
            key,
            cert,
            ca,
        });
        self
    }

    /// Sets the two-way SSL listener settings as an optional value.
    pub fn two_way_ssl_option(mut self, settings: Option<MutualTlsSettings>) -> Self {
        self.two_way_ssl = settings;
        self
    }

    /// Sets the idle timeout of data-plane connections.
    ///
    /// # Parameters
    /// - `millis`: The timeout in milliseconds. `0` disables it.
    ///
    /// # Returns
    /// A modified `StubServerBuilder` instance for method chaining.
    pub fn timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }

    /// Sets the idle timeout of data-plane connections as an optional value.
    pub fn timeout_option(mut self, millis: Option<u64>) -> Self {
        self.timeout = millis;
        self
    }

    /// Sets whether the server should be exposed to external access.
    ///
    /// # Parameters
    /// - `expose`: A boolean indicating whether to bind to all interfaces.
    ///
    /// # Returns
    /// A modified `StubServerBuilder` instance for method chaining.
    pub fn expose(mut self, expose: bool) -> Self {
        self.expose = Some(expose);
        self
    }

    /// Sets whether the server should be exposed to external access as an optional value.
    pub fn expose_option(mut self, expose: Option<bool>) -> Self {
        self.expose = expose;
        self
    }

    /// Sets the history limit for the server.
    ///
    /// # Parameters
    /// - `limit`: The maximum number of recorded requests to keep.
    ///
    /// # Returns
    /// A modified `StubServerBuilder` instance for method chaining.
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Sets the history limit for the server as an optional value.
    pub fn history_limit_option(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    /// Resolves the configured values and their defaults into `ServerSettings`.
    pub fn settings(self) -> ServerSettings {
        let defaults = ServerSettings::default();
        ServerSettings {
            admin_port: self.admin_port.unwrap_or(defaults.admin_port),
            http_port: self.http_port,
            https: self.https,
            two_way_ssl: self.two_way_ssl,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            expose: self.expose.unwrap_or(defaults.expose),
            history_limit: self.history_limit.unwrap_or(defaults.history_limit),
        }
    }

    /// Builds a `StubServer`. Nothing is bound until [`StubServer::start`] is called.
    pub fn build(self) -> StubServer {
        StubServer::new(self.settings())
    }
}

impl Default for StubServerBuilder {
    fn default() -> Self {
        StubServerBuilder::new()
    }
}
