//! Unix domain socket adapter

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;

use super::SocketAdapter;
use crate::error::{Error, Result};

/// How long a write waits before retrying when the socket buffer is full
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Adapter backed by the standard library's Unix domain sockets
///
/// Streams that have been switched to non-blocking mode report "no data yet"
/// as an empty read. A read of zero bytes from the OS means the peer shut
/// down its end, and is reported as [`Error::ConnectionLost`].
///
/// # Examples
///
/// ```no_run
/// use sockline::{Client, io::UnixAdapter};
///
/// let mut client = Client::new(UnixAdapter);
/// client.set_path("/run/app/control.sock");
/// if !client.try_connect()? {
///     eprintln!("service is not running");
/// }
/// # Ok::<(), sockline::Error>(())
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixAdapter;

/// Handle produced by [`UnixAdapter`]
#[derive(Debug)]
pub enum UnixHandle {
    /// Created but not yet connected or bound
    Unbound,
    Stream(UnixStream),
    Listener(UnixListener),
}

impl UnixHandle {
    fn stream(&mut self) -> Result<&mut UnixStream> {
        match self {
            UnixHandle::Stream(stream) => Ok(stream),
            _ => Err(wrong_handle("a connected stream")),
        }
    }
}

fn wrong_handle(expected: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("socket handle is not {expected}"),
    ))
}

/// Errors after which the stream is unusable
fn is_connection_lost(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

fn classify(e: io::Error) -> Error {
    if is_connection_lost(&e) {
        Error::ConnectionLost(e)
    } else {
        Error::Io(e)
    }
}

impl SocketAdapter for UnixAdapter {
    type Handle = UnixHandle;

    fn create(&mut self) -> Result<Self::Handle> {
        Ok(UnixHandle::Unbound)
    }

    fn connect(&mut self, handle: &mut Self::Handle, path: &Path) -> Result<()> {
        if !matches!(handle, UnixHandle::Unbound) {
            return Err(wrong_handle("unbound"));
        }
        tracing::trace!(path = %path.display(), "connecting unix stream");
        let stream = UnixStream::connect(path)?;
        *handle = UnixHandle::Stream(stream);
        Ok(())
    }

    fn bind(&mut self, handle: &mut Self::Handle, path: &Path) -> Result<()> {
        if !matches!(handle, UnixHandle::Unbound) {
            return Err(wrong_handle("unbound"));
        }
        tracing::trace!(path = %path.display(), "binding unix listener");
        // std binds and listens in one step
        let listener = UnixListener::bind(path)?;
        *handle = UnixHandle::Listener(listener);
        Ok(())
    }

    fn listen(&mut self, handle: &mut Self::Handle) -> Result<()> {
        match handle {
            UnixHandle::Listener(_) => Ok(()),
            _ => Err(wrong_handle("a bound listener")),
        }
    }

    fn accept(&mut self, handle: &Self::Handle) -> Result<Option<Self::Handle>> {
        let UnixHandle::Listener(listener) = handle else {
            return Err(wrong_handle("a listener"));
        };
        match listener.accept() {
            Ok((stream, _)) => Ok(Some(UnixHandle::Stream(stream))),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn set_nonblocking(&mut self, handle: &mut Self::Handle) -> Result<()> {
        match handle {
            UnixHandle::Stream(stream) => stream.set_nonblocking(true)?,
            UnixHandle::Listener(listener) => listener.set_nonblocking(true)?,
            UnixHandle::Unbound => return Err(wrong_handle("connected or bound")),
        }
        Ok(())
    }

    fn close(&mut self, handle: Self::Handle) {
        if let UnixHandle::Stream(stream) = &handle {
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                // the peer already hung up, nothing left to shut down
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                    tracing::trace!(error = %e, "unix stream already disconnected");
                }
                Err(e) => tracing::warn!(error = %e, "shutting down unix stream"),
            }
        }
        drop(handle);
    }

    fn read(&mut self, handle: &mut Self::Handle, max: usize) -> Result<Bytes> {
        let stream = handle.stream()?;
        let mut buf = vec![0; max];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    return Err(Error::ConnectionLost(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the connection",
                    )));
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Bytes::from(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Bytes::new()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify(e)),
            }
        }
    }

    fn write(&mut self, handle: &mut Self::Handle, data: &[u8]) -> Result<usize> {
        let stream = handle.stream()?;
        let mut sent = 0;
        while sent < data.len() {
            match stream.write(&data[sent..]) {
                Ok(0) => {
                    return Err(Error::ConnectionLost(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("sent {sent} of {} bytes", data.len()),
                    )));
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(WRITE_RETRY_DELAY);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(classify(e)),
            }
        }
        stream.flush().map_err(classify)?;
        Ok(sent)
    }
}
