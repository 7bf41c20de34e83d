//! Observers notified of client activity
//!
//! Plugins are called synchronously, in the order they were registered, after
//! the operation they observe has finished. A plugin that panics unwinds
//! through the client call that triggered it; there is no isolation between
//! plugins.

use std::path::{Path, PathBuf};

use bytes::Bytes;

/// Read-only view of a client handed to plugins
pub trait ClientInfo {
    fn path(&self) -> Option<&Path>;
    fn is_open(&self) -> bool;
    /// Bytes received but not yet returned by a read
    fn buffered(&self) -> usize;
}

/// Receives notifications about a client
///
/// All methods default to doing nothing.
pub trait ClientPlugin: Send {
    fn connected(&self, _client: &dyn ClientInfo) {}

    fn disconnected(&self, _client: &dyn ClientInfo) {}

    /// Called at the end of every read, with `None` when nothing was read
    fn read(&self, _client: &dyn ClientInfo, _input: Option<&[u8]>) {}

    fn write(&self, _client: &dyn ClientInfo, _output: &[u8]) {}
}

/// Ordered fan-out over registered plugins
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Box<dyn ClientPlugin>>,
}

impl PluginManager {
    pub fn new(plugins: Vec<Box<dyn ClientPlugin>>) -> Self {
        Self { plugins }
    }

    pub fn add(&mut self, plugin: Box<dyn ClientPlugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl ClientPlugin for PluginManager {
    fn connected(&self, client: &dyn ClientInfo) {
        for plugin in &self.plugins {
            plugin.connected(client);
        }
    }

    fn disconnected(&self, client: &dyn ClientInfo) {
        for plugin in &self.plugins {
            plugin.disconnected(client);
        }
    }

    fn read(&self, client: &dyn ClientInfo, input: Option<&[u8]>) {
        for plugin in &self.plugins {
            plugin.read(client, input);
        }
    }

    fn write(&self, client: &dyn ClientInfo, output: &[u8]) {
        for plugin in &self.plugins {
            plugin.write(client, output);
        }
    }
}

/// Client activity as an owned value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { path: Option<PathBuf> },
    Disconnected { path: Option<PathBuf> },
    Read(Option<Bytes>),
    Write(Bytes),
}

/// Forwards every notification as a [`ClientEvent`] over a channel
///
/// Events are dropped silently once the receiver has gone away.
///
/// ```
/// use sockline::plugins::{ChannelPlugin, ClientEvent};
/// use sockline::{ClientBuilder, io::MemoryAdapter};
///
/// let (tx, rx) = crossbeam_channel::unbounded();
/// let adapter = MemoryAdapter::new();
/// let _listener = adapter.listen_at("/virtual/events.sock");
///
/// let mut client = ClientBuilder::new()
///     .path("/virtual/events.sock")
///     .plugin(ChannelPlugin::new(tx))
///     .build(adapter);
/// client.connect()?;
///
/// assert!(matches!(rx.try_recv(), Ok(ClientEvent::Connected { .. })));
/// # Ok::<(), sockline::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ChannelPlugin {
    tx: crossbeam_channel::Sender<ClientEvent>,
}

impl ChannelPlugin {
    pub fn new(tx: crossbeam_channel::Sender<ClientEvent>) -> Self {
        Self { tx }
    }
}

impl ClientPlugin for ChannelPlugin {
    fn connected(&self, client: &dyn ClientInfo) {
        let _ = self.tx.send(ClientEvent::Connected {
            path: client.path().map(Path::to_path_buf),
        });
    }

    fn disconnected(&self, client: &dyn ClientInfo) {
        let _ = self.tx.send(ClientEvent::Disconnected {
            path: client.path().map(Path::to_path_buf),
        });
    }

    fn read(&self, _client: &dyn ClientInfo, input: Option<&[u8]>) {
        let _ = self
            .tx
            .send(ClientEvent::Read(input.map(Bytes::copy_from_slice)));
    }

    fn write(&self, _client: &dyn ClientInfo, output: &[u8]) {
        let _ = self.tx.send(ClientEvent::Write(Bytes::copy_from_slice(output)));
    }
}

/// Logs client activity with `tracing` at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPlugin;

impl ClientPlugin for TracingPlugin {
    fn connected(&self, client: &dyn ClientInfo) {
        tracing::debug!(path = ?client.path(), "client connected");
    }

    fn disconnected(&self, client: &dyn ClientInfo) {
        tracing::debug!(path = ?client.path(), "client disconnected");
    }

    fn read(&self, client: &dyn ClientInfo, input: Option<&[u8]>) {
        match input {
            Some(data) => tracing::debug!(
                data = %String::from_utf8_lossy(data),
                buffered = client.buffered(),
                "read"
            ),
            None => tracing::debug!(buffered = client.buffered(), "read returned nothing"),
        }
    }

    fn write(&self, _client: &dyn ClientInfo, output: &[u8]) {
        tracing::debug!(data = %String::from_utf8_lossy(output), "write");
    }
}
