pub(crate) mod admin;
pub(crate) mod builder;
pub(crate) mod dispatch;
pub(crate) mod handler;
pub(crate) mod io;
pub(crate) mod listener;
pub(crate) mod manager;
pub(crate) mod matcher;
pub(crate) mod server;
pub(crate) mod state;
pub(crate) mod tls;

pub use builder::{MutualTlsSettings, ServerSettings, StubServerBuilder, TlsSettings};
pub use listener::{ListenerEvent, ListenerKind, ListenerState};
pub use manager::DEFAULT_TIMEOUT_MS;
pub use server::{Error, StubServer};
pub use state::Error as StoreError;
pub use tls::{Error as TlsError, TlsSource};
