//! Assembling clients from options or configuration files

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::io::SocketAdapter;
use crate::plugins::{ClientPlugin, PluginManager};
use crate::timeout::{DEFAULT_POLL_INTERVAL, Timeout};

/// Client settings, typically loaded from a JSON file
///
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Timeout for interactive line reads; none when absent
    pub read_timeout_ms: Option<u64>,
    pub max_line_length: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            read_timeout_ms: None,
            max_line_length: None,
        }
    }
}

impl ClientConfig {
    /// Per-line read timeout, if one is configured
    pub fn read_timeout(&self) -> Option<Timeout> {
        self.read_timeout_ms.map(Timeout::from_millis)
    }
}

/// Builder for [`Client`]
///
/// ```
/// use std::time::Duration;
/// use sockline::{ClientBuilder, io::MemoryAdapter, plugins::TracingPlugin};
///
/// let client = ClientBuilder::new()
///     .path("/virtual/app.sock")
///     .poll_interval(Duration::from_millis(5))
///     .plugin(TracingPlugin)
///     .build(MemoryAdapter::new());
///
/// assert!(client.is_closed());
/// assert_eq!(client.poll_interval(), Duration::from_millis(5));
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    path: Option<PathBuf>,
    plugins: PluginManager,
    poll_interval: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the path and poll interval in `config`
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            path: config.path.clone(),
            plugins: PluginManager::default(),
            poll_interval: Some(Duration::from_millis(config.poll_interval_ms)),
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Register a plugin; plugins are notified in registration order
    pub fn plugin(mut self, plugin: impl ClientPlugin + 'static) -> Self {
        self.plugins.add(Box::new(plugin));
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn build<A: SocketAdapter>(self, adapter: A) -> Client<A> {
        Client::with_parts(
            adapter,
            self.path,
            self.plugins,
            self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
        )
    }
}
