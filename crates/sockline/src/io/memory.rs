//! In-memory adapter implementation for testing

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::SocketAdapter;
use crate::error::{Error, Result};

type Registry = Arc<Mutex<HashMap<PathBuf, Sender<MemoryStream>>>>;

/// In-memory adapter for testing
///
/// Paths live in a namespace shared by every clone of the adapter, so a
/// listener registered through one clone can be reached by a client using
/// another. Streams are a pair of channels and never block: a read with
/// nothing queued returns no data, the same as a non-blocking socket.
///
/// # Examples
///
/// ```
/// use sockline::Client;
/// use sockline::io::MemoryAdapter;
///
/// let adapter = MemoryAdapter::new();
/// let listener = adapter.listen_at("/virtual/echo.sock");
///
/// let mut client = Client::new(adapter.clone());
/// client.connect_to("/virtual/echo.sock")?;
/// client.write_line("hello")?;
///
/// let mut peer = listener.try_accept().expect("client connected");
/// assert_eq!(peer.recv_available(), b"hello\n");
/// # Ok::<(), sockline::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    listeners: Registry,
}

/// Handle produced by [`MemoryAdapter`]
#[derive(Debug)]
pub enum MemoryHandle {
    Unbound,
    Bound(PathBuf),
    Listener {
        path: PathBuf,
        incoming: Receiver<MemoryStream>,
        nonblocking: bool,
    },
    Stream(MemoryStream),
}

/// One end of an in-memory connection
///
/// Besides backing [`MemoryHandle::Stream`], this is what a test holds to act
/// as the peer of a client.
#[derive(Debug)]
pub struct MemoryStream {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: BytesMut,
}

impl MemoryStream {
    /// Create a connected pair of streams
    ///
    /// Data sent on one end is received on the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = crossbeam_channel::unbounded();
        let (b_tx, a_rx) = crossbeam_channel::unbounded();

        let a = Self {
            tx: a_tx,
            rx: a_rx,
            pending: BytesMut::new(),
        };
        let b = Self {
            tx: b_tx,
            rx: b_rx,
            pending: BytesMut::new(),
        };
        (a, b)
    }

    /// Queue `data` for the other end
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel disconnected"))
    }

    /// Drain everything the other end has sent so far
    pub fn recv_available(&mut self) -> Vec<u8> {
        let mut out = self.pending.split().to_vec();
        while let Ok(chunk) = self.rx.try_recv() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Hang up; the other end sees a lost connection
    pub fn close(self) {
        drop(self);
    }

    fn read_chunk(&mut self, max: usize) -> Result<Bytes> {
        if self.pending.is_empty() {
            match self.rx.try_recv() {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => return Ok(Bytes::new()),
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::ConnectionLost(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "channel disconnected",
                    )));
                }
            }
        }
        let n = max.min(self.pending.len());
        Ok(self.pending.split_to(n).freeze())
    }
}

/// A listener registered directly on the namespace
///
/// Lets a test play the server side without going through a second client.
/// The path is unregistered when the listener is dropped.
#[derive(Debug)]
pub struct MemoryListener {
    path: PathBuf,
    incoming: Receiver<MemoryStream>,
    listeners: Registry,
}

impl MemoryListener {
    /// Accept a waiting client, if there is one
    pub fn try_accept(&self) -> Option<MemoryStream> {
        self.incoming.try_recv().ok()
    }

    /// Wait up to `timeout` for a client
    pub fn accept_timeout(&self, timeout: Duration) -> Option<MemoryStream> {
        match self.incoming.recv_timeout(timeout) {
            Ok(stream) => Some(stream),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        lock(&self.listeners).remove(&self.path);
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<PathBuf, Sender<MemoryStream>>> {
    // the map stays consistent even if a holder panicked
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn wrong_handle(expected: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("memory handle is not {expected}"),
    ))
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener at `path` for a test to accept on
    pub fn listen_at(&self, path: impl Into<PathBuf>) -> MemoryListener {
        let path = path.into();
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.listeners).insert(path.clone(), tx);
        MemoryListener {
            path,
            incoming: rx,
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Whether anything is listening at `path`
    pub fn is_listening(&self, path: impl AsRef<Path>) -> bool {
        lock(&self.listeners).contains_key(path.as_ref())
    }

    /// Connect to `path` without a client, returning the local end
    pub fn dial(&self, path: impl AsRef<Path>) -> io::Result<MemoryStream> {
        let path = path.as_ref();
        let listeners = lock(&self.listeners);
        let Some(incoming) = listeners.get(path) else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("nothing listening at {}", path.display()),
            ));
        };
        let (local, remote) = MemoryStream::pair();
        incoming
            .send(remote)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener went away"))?;
        Ok(local)
    }
}

impl SocketAdapter for MemoryAdapter {
    type Handle = MemoryHandle;

    fn create(&mut self) -> Result<Self::Handle> {
        Ok(MemoryHandle::Unbound)
    }

    fn connect(&mut self, handle: &mut Self::Handle, path: &Path) -> Result<()> {
        if !matches!(handle, MemoryHandle::Unbound) {
            return Err(wrong_handle("unbound"));
        }
        let stream = self.dial(path)?;
        *handle = MemoryHandle::Stream(stream);
        Ok(())
    }

    fn bind(&mut self, handle: &mut Self::Handle, path: &Path) -> Result<()> {
        if !matches!(handle, MemoryHandle::Unbound) {
            return Err(wrong_handle("unbound"));
        }
        if self.is_listening(path) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is already in use", path.display()),
            )));
        }
        *handle = MemoryHandle::Bound(path.to_path_buf());
        Ok(())
    }

    fn listen(&mut self, handle: &mut Self::Handle) -> Result<()> {
        let MemoryHandle::Bound(path) = handle else {
            return Err(wrong_handle("bound"));
        };
        let path = std::mem::take(path);
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.listeners).insert(path.clone(), tx);
        *handle = MemoryHandle::Listener {
            path,
            incoming: rx,
            nonblocking: false,
        };
        Ok(())
    }

    fn accept(&mut self, handle: &Self::Handle) -> Result<Option<Self::Handle>> {
        let MemoryHandle::Listener {
            incoming,
            nonblocking,
            ..
        } = handle
        else {
            return Err(wrong_handle("a listener"));
        };
        let stream = if *nonblocking {
            match incoming.try_recv() {
                Ok(stream) => stream,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(listener_gone()),
            }
        } else {
            incoming.recv().map_err(|_| listener_gone())?
        };
        Ok(Some(MemoryHandle::Stream(stream)))
    }

    fn set_nonblocking(&mut self, handle: &mut Self::Handle) -> Result<()> {
        match handle {
            // streams never block
            MemoryHandle::Stream(_) => Ok(()),
            MemoryHandle::Listener { nonblocking, .. } => {
                *nonblocking = true;
                Ok(())
            }
            _ => Err(wrong_handle("connected or listening")),
        }
    }

    fn close(&mut self, handle: Self::Handle) {
        if let MemoryHandle::Listener { path, .. } = &handle {
            lock(&self.listeners).remove(path);
        }
        drop(handle);
    }

    fn read(&mut self, handle: &mut Self::Handle, max: usize) -> Result<Bytes> {
        match handle {
            MemoryHandle::Stream(stream) => stream.read_chunk(max),
            _ => Err(wrong_handle("a connected stream")),
        }
    }

    fn write(&mut self, handle: &mut Self::Handle, data: &[u8]) -> Result<usize> {
        let MemoryHandle::Stream(stream) = handle else {
            return Err(wrong_handle("a connected stream"));
        };
        stream.send(data).map_err(Error::ConnectionLost)?;
        Ok(data.len())
    }

    fn unlink(&mut self, _path: &Path) {
        // nothing on disk; the listener is unregistered when closed
    }
}

fn listener_gone() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "listener registration removed",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_pair_bidirectional() {
        let (a, mut b) = MemoryStream::pair();
        a.send(b"Hello from a").unwrap();
        assert_eq!(b.recv_available(), b"Hello from a");

        b.send(b"Hello from b").unwrap();
        let mut a = a;
        assert_eq!(a.recv_available(), b"Hello from b");
    }

    #[test]
    fn test_read_respects_max_length() {
        let (a, b) = MemoryStream::pair();
        let mut adapter = MemoryAdapter::new();
        let mut handle = MemoryHandle::Stream(a);

        b.send(b"abcdef").unwrap();
        assert_eq!(&adapter.read(&mut handle, 4).unwrap()[..], b"abcd");
        assert_eq!(&adapter.read(&mut handle, 4).unwrap()[..], b"ef");
        assert!(adapter.read(&mut handle, 4).unwrap().is_empty());
    }

    #[test]
    fn test_read_after_peer_close_is_connection_lost() {
        let (a, b) = MemoryStream::pair();
        let mut adapter = MemoryAdapter::new();
        let mut handle = MemoryHandle::Stream(a);

        b.send(b"last words").unwrap();
        b.close();

        // queued data is still delivered first
        assert_eq!(&adapter.read(&mut handle, 64).unwrap()[..], b"last words");
        let err = adapter.read(&mut handle, 64).unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)), "got {err:?}");
    }

    #[test]
    fn test_write_after_peer_close_is_connection_lost() {
        let (a, b) = MemoryStream::pair();
        let mut adapter = MemoryAdapter::new();
        let mut handle = MemoryHandle::Stream(a);
        drop(b);

        let err = adapter.write(&mut handle, b"anyone?").unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)), "got {err:?}");
    }

    #[test]
    fn test_connect_without_listener_is_refused() {
        let mut adapter = MemoryAdapter::new();
        let mut handle = adapter.create().unwrap();
        let err = adapter
            .connect(&mut handle, Path::new("/virtual/nobody.sock"))
            .unwrap_err();
        assert!(
            matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused),
            "got {err:?}"
        );
    }

    #[test]
    fn test_bind_listen_accept() {
        let mut server = MemoryAdapter::new();
        let path = Path::new("/virtual/server.sock");

        let mut listener = server.create().unwrap();
        server.bind(&mut listener, path).unwrap();
        server.listen(&mut listener).unwrap();
        server.set_nonblocking(&mut listener).unwrap();
        assert!(server.accept(&listener).unwrap().is_none());

        let mut peer = server.dial(path).unwrap();
        let mut accepted = server.accept(&listener).unwrap().expect("pending client");
        server.write(&mut accepted, b"welcome").unwrap();
        assert_eq!(peer.recv_available(), b"welcome");

        server.close(listener);
        assert!(!server.is_listening(path));
    }

    #[test]
    fn test_bind_in_use_path() {
        let mut adapter = MemoryAdapter::new();
        let _listener = adapter.listen_at("/virtual/taken.sock");

        let mut handle = adapter.create().unwrap();
        let err = adapter
            .bind(&mut handle, Path::new("/virtual/taken.sock"))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {err:?}");
    }

    #[test]
    fn test_listener_unregisters_on_drop() {
        let adapter = MemoryAdapter::new();
        let listener = adapter.listen_at("/virtual/short-lived.sock");
        assert!(adapter.is_listening(listener.path()));
        drop(listener);
        assert!(!adapter.is_listening("/virtual/short-lived.sock"));
    }
}
