//! IO abstraction layer for the socket client
//!
//! This module provides an abstraction over the raw socket operations the
//! client needs. The core trait [`SocketAdapter`] allows plugging in different
//! implementations such as real Unix domain sockets or in-memory channels.
//!
//! # Examples
//!
//! ## Using Unix domain sockets
//!
//! ```no_run
//! use sockline::{Client, Timeout, io::UnixAdapter};
//!
//! let mut client = Client::new(UnixAdapter);
//! client.connect_to("/tmp/service.sock")?;
//! client.write_line("status")?;
//! let line = client.read_line(Timeout::from_millis(500), None)?;
//! # Ok::<(), sockline::Error>(())
//! ```
//!
//! ## Using the in-memory adapter for testing
//!
//! ```
//! use sockline::{Client, Timeout, io::MemoryAdapter};
//!
//! let adapter = MemoryAdapter::new();
//! let listener = adapter.listen_at("/virtual/service.sock");
//!
//! let mut client = Client::new(adapter);
//! client.connect_to("/virtual/service.sock")?;
//!
//! let peer = listener.try_accept().expect("client connected");
//! peer.send(b"ready\n")?;
//!
//! let line = client.read_line(Timeout::from_millis(100), None)?;
//! assert_eq!(line.as_deref(), Some(&b"ready\n"[..]));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::Path;

use bytes::Bytes;

use crate::error::Result;

mod memory;
mod unix;

pub use memory::{MemoryAdapter, MemoryHandle, MemoryListener, MemoryStream};
pub use unix::{UnixAdapter, UnixHandle};

/// Raw socket operations the client is built on
///
/// A handle starts out unconnected from [`create`](SocketAdapter::create) and
/// becomes either a stream (via `connect` or `accept`) or a listener (via
/// `bind` and `listen`).
///
/// # Error contract
///
/// - `read` returns an empty [`Bytes`] when no data is available yet. It must
///   not block once the handle is non-blocking.
/// - `read` and `write` report a peer that has gone away, or any other fatal
///   socket failure, as [`Error::ConnectionLost`](crate::Error::ConnectionLost).
/// - Everything else is reported as [`Error::Io`](crate::Error::Io).
pub trait SocketAdapter {
    /// One end of a socket, or a listener
    type Handle;

    /// Create a fresh, unconnected handle
    fn create(&mut self) -> Result<Self::Handle>;

    /// Connect `handle` to the socket listening at `path`
    fn connect(&mut self, handle: &mut Self::Handle, path: &Path) -> Result<()>;

    /// Bind `handle` to `path`, creating the socket file
    fn bind(&mut self, handle: &mut Self::Handle, path: &Path) -> Result<()>;

    /// Put a bound handle into listening mode
    fn listen(&mut self, handle: &mut Self::Handle) -> Result<()>;

    /// Accept a pending client
    ///
    /// On a blocking listener this waits for a client. On a non-blocking one
    /// it returns `Ok(None)` when nobody is waiting.
    fn accept(&mut self, handle: &Self::Handle) -> Result<Option<Self::Handle>>;

    fn set_nonblocking(&mut self, handle: &mut Self::Handle) -> Result<()>;

    /// Release the handle; failures are not reported
    fn close(&mut self, handle: Self::Handle);

    /// Read up to `max` bytes
    fn read(&mut self, handle: &mut Self::Handle, max: usize) -> Result<Bytes>;

    /// Send all of `data`, returning the number of bytes sent
    fn write(&mut self, handle: &mut Self::Handle, data: &[u8]) -> Result<usize>;

    /// Remove the socket file a listener was bound to
    ///
    /// Best effort: a missing file is not an error and failures are only
    /// logged.
    fn unlink(&mut self, path: &Path) {
        if !path.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "removing socket file");
        }
    }
}
