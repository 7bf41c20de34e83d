use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::io::SocketAdapter;
use crate::plugins::{ClientInfo, ClientPlugin, PluginManager};
use crate::timeout::{DEFAULT_POLL_INTERVAL, Deadline, Timeout};

/// Default `max_len` for [`Client::read`] and `len` for [`Client::read_exactly`]
pub const DEFAULT_READ_LENGTH: usize = 1024;

/// Appended by [`Client::write_line`]
pub const LINE_TERMINATOR: &str = "\n";

/// Either byte ends a line for [`Client::read_line`]
pub const LINE_STOPS: [&str; 2] = ["\r", "\n"];

/// Bytes requested from the adapter per poll
const REFILL_CHUNK: usize = 1024;

/// Buffered, timeout-bounded client for a stream socket
///
/// A client starts out closed. [`connect`](Client::connect) or
/// [`accept`](Client::accept) opens it, and reads and writes are only
/// possible while it is open. Dropping the client closes it.
///
/// All waiting is done by polling a non-blocking socket and sleeping for the
/// poll interval in between, so a read never blocks past its deadline by more
/// than one interval.
///
/// Methods take `&mut self`; sharing a client between threads requires
/// external locking.
///
/// # Example
///
/// ```no_run
/// use sockline::{Client, Timeout, io::UnixAdapter};
///
/// let mut client = Client::new(UnixAdapter);
/// client.connect_to("/tmp/repl.sock")?;
///
/// client.write_line("print(1 + 1)")?;
/// while let Some(line) = client.read_line(Timeout::from_millis(200), None)? {
///     print!("{}", String::from_utf8_lossy(&line));
/// }
/// # Ok::<(), sockline::Error>(())
/// ```
pub struct Client<A: SocketAdapter> {
    adapter: A,
    path: Option<PathBuf>,

    // set iff the client is open
    active: Option<A::Handle>,
    // released alongside `active` on close
    auxiliary: Vec<A::Handle>,

    buffer: Buffer,
    plugins: PluginManager,

    // whether we created the socket file at `path`
    bound_path: bool,
    poll_interval: Duration,
}

impl<A: SocketAdapter> Client<A> {
    pub fn new(adapter: A) -> Self {
        Self::with_parts(adapter, None, PluginManager::default(), DEFAULT_POLL_INTERVAL)
    }

    pub(crate) fn with_parts(
        adapter: A,
        path: Option<PathBuf>,
        plugins: PluginManager,
        poll_interval: Duration,
    ) -> Self {
        Self {
            adapter,
            path,
            active: None,
            auxiliary: Vec::new(),
            buffer: Buffer::new(),
            plugins,
            bound_path: false,
            poll_interval,
        }
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.active.is_none()
    }

    /// The handle used for I/O, while open
    pub fn handle(&self) -> Option<&A::Handle> {
        self.active.as_ref()
    }

    /// Number of bytes received but not yet returned by a read
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Connect to the socket at the configured path
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyOpen`] if the client is open
    /// - [`Error::Configuration`] if no path is set
    /// - [`Error::Io`] if the connection cannot be made
    #[tracing::instrument(skip(self), fields(path = ?self.path), level = "debug")]
    pub fn connect(&mut self) -> Result<()> {
        self.validate_closed()?;
        let path = self.require_path()?;

        let mut handle = self.adapter.create()?;
        if let Err(e) = self.adapter.connect(&mut handle, &path) {
            self.adapter.close(handle);
            return Err(e);
        }
        let handle = self.prepare(handle)?;
        self.activate(handle);
        Ok(())
    }

    /// Set the path, then [`connect`](Client::connect)
    pub fn connect_to(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.validate_closed()?;
        self.set_path(path);
        self.connect()
    }

    /// Like [`connect`](Client::connect), but reports a failure to reach the
    /// socket as `Ok(false)`.
    ///
    /// Configuration and state errors are still returned as errors.
    pub fn try_connect(&mut self) -> Result<bool> {
        match self.connect() {
            Ok(()) => Ok(true),
            Err(e) if e.is_establishment_failure() => {
                tracing::debug!(error = %e, "connect failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Listen at the configured path and wait for one client
    ///
    /// With [`Timeout::Unbounded`] this blocks until a client arrives. With a
    /// bounded timeout the listener is polled until the deadline. If nobody
    /// connects in time the call still succeeds, but the client stays closed,
    /// so check [`is_open`](Client::is_open) afterwards. The listener and its
    /// socket file are cleaned up in that case.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyOpen`] if the client is open
    /// - [`Error::Configuration`] if no path is set
    /// - [`Error::Io`] if the path cannot be bound
    #[tracing::instrument(skip(self, timeout), fields(path = ?self.path), level = "debug")]
    pub fn accept(&mut self, timeout: impl Into<Timeout>) -> Result<()> {
        let timeout = timeout.into();
        let deadline = timeout.deadline();
        self.validate_closed()?;
        let path = self.require_path()?;

        let mut listener = self.adapter.create()?;
        if let Err(e) = self.adapter.bind(&mut listener, &path) {
            self.adapter.close(listener);
            return Err(e);
        }
        self.bound_path = true;

        let accepted = self
            .wait_for_client(&mut listener, timeout, deadline)
            .and_then(|client| client.map(|c| self.prepare(c)).transpose());

        match accepted {
            Ok(Some(client)) => {
                self.auxiliary.push(listener);
                self.activate(client);
                Ok(())
            }
            Ok(None) => {
                tracing::debug!("no client connected before the deadline");
                self.release_listener(listener, &path);
                Ok(())
            }
            Err(e) => {
                self.release_listener(listener, &path);
                Err(e)
            }
        }
    }

    /// Like [`accept`](Client::accept), returning whether a client was
    /// accepted.
    ///
    /// Failures to bind or accept are reported as `Ok(false)`; configuration
    /// and state errors are still returned as errors.
    pub fn try_accept(&mut self, timeout: impl Into<Timeout>) -> Result<bool> {
        match self.accept(timeout) {
            Ok(()) => Ok(self.is_open()),
            Err(e) if e.is_establishment_failure() => {
                tracing::debug!(error = %e, "accept failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Release every handle, discard buffered data and remove the socket file
    /// if this client created it.
    ///
    /// Closing a closed client does nothing.
    #[tracing::instrument(skip(self), fields(path = ?self.path), level = "debug")]
    pub fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.adapter.close(active);
        for handle in self.auxiliary.drain(..) {
            self.adapter.close(handle);
        }
        if std::mem::take(&mut self.bound_path) {
            if let Some(path) = &self.path {
                self.adapter.unlink(path);
            }
        }
        self.buffer.clear();
        tracing::debug!("client closed");
        self.plugins.disconnected(&*self);
    }

    /// Whether there is data to read without waiting
    ///
    /// Checks the buffer first, then polls the socket once.
    pub fn has_input(&mut self) -> Result<bool> {
        self.validate_open()?;
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        self.fill()
    }

    /// Read up to `max_len` bytes
    ///
    /// Waits until new data arrives or the timeout expires, then returns up to
    /// `max_len` bytes from the buffer. Returns `None` if nothing is buffered.
    #[tracing::instrument(skip(self, timeout), level = "trace")]
    pub fn read(&mut self, max_len: usize, timeout: impl Into<Timeout>) -> Result<Option<Bytes>> {
        let deadline = timeout.into().deadline();
        validate_length(max_len)?;
        self.validate_open()?;

        self.poll_until(deadline, |_, progressed| progressed)?;
        Ok(self.finish_read(Some(max_len)))
    }

    /// Read exactly `len` bytes
    ///
    /// Returns `None` if fewer than `len` bytes arrived before the timeout.
    /// Nothing is consumed in that case.
    #[tracing::instrument(skip(self, timeout), level = "trace")]
    pub fn read_exactly(&mut self, len: usize, timeout: impl Into<Timeout>) -> Result<Option<Bytes>> {
        let deadline = timeout.into().deadline();
        validate_length(len)?;
        self.validate_open()?;

        self.poll_until(deadline, |buffer, _| buffer.len() >= len)?;
        let take = (self.buffer.len() >= len).then_some(len);
        Ok(self.finish_read(take))
    }

    /// Read a line ending in `\r` or `\n`, terminator included
    ///
    /// See [`read_until`](Client::read_until) for how `timeout` and `max_len`
    /// interact.
    pub fn read_line(
        &mut self,
        timeout: impl Into<Timeout>,
        max_len: Option<usize>,
    ) -> Result<Option<Bytes>> {
        self.read_until(&LINE_STOPS, timeout, max_len)
    }

    /// Read up to and including the earliest of `stops`
    ///
    /// Without `max_len`, returns `None` unless a stop sequence arrives in
    /// time. A timeout of exactly zero is special in this mode: rather than
    /// giving up at once, the client keeps polling for as long as data keeps
    /// arriving and stops at the first poll that yields nothing.
    ///
    /// With `max_len`, also stops once that many bytes are buffered. The
    /// segment never exceeds `max_len`, even if that cuts off a stop sequence.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `stops` is empty or contains an empty
    /// sequence, or `max_len` is zero.
    #[tracing::instrument(skip_all, fields(max_len = ?max_len), level = "trace")]
    pub fn read_until<S: AsRef<[u8]>>(
        &mut self,
        stops: &[S],
        timeout: impl Into<Timeout>,
        max_len: Option<usize>,
    ) -> Result<Option<Bytes>> {
        let timeout = timeout.into();
        if stops.is_empty() || stops.iter().any(|s| s.as_ref().is_empty()) {
            return Err(Error::configuration("stop sequences must be non-empty"));
        }
        if let Some(max_len) = max_len {
            validate_length(max_len)?;
        }
        self.validate_open()?;

        let drain = max_len.is_none() && timeout.is_zero();
        let deadline = if drain {
            Deadline::Never
        } else {
            timeout.deadline()
        };

        let mut found = None;
        self.poll_until(deadline, |buffer, progressed| {
            found = buffer.find_earliest(stops);
            found.is_some()
                || (drain && !progressed)
                || max_len.is_some_and(|max| buffer.len() >= max)
        })?;

        let take = match (found, max_len) {
            (Some(m), Some(max)) => Some(m.segment_len().min(max)),
            (Some(m), None) => Some(m.segment_len()),
            (None, Some(max)) if self.buffer.len() >= max => Some(max),
            (None, _) => None,
        };
        Ok(self.finish_read(take))
    }

    /// Send all of `data`
    ///
    /// If the peer has gone away the client is closed and `Ok(())` is
    /// returned; check [`is_closed`](Client::is_closed) to find out.
    #[tracing::instrument(skip_all, fields(len = data.as_ref().len()), level = "trace")]
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let data = data.as_ref();
        let handle = self.active.as_mut().ok_or(Error::NotOpen)?;

        let result = match self.adapter.write(handle, data) {
            Ok(sent) => {
                tracing::trace!(sent, "wrote");
                Ok(())
            }
            Err(Error::ConnectionLost(e)) => {
                tracing::debug!(error = %e, "connection lost while writing");
                self.close();
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.plugins.write(&*self, data);
        result
    }

    /// Send `data` followed by [`LINE_TERMINATOR`]
    pub fn write_line(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let data = data.as_ref();
        let mut line = Vec::with_capacity(data.len() + LINE_TERMINATOR.len());
        line.extend_from_slice(data);
        line.extend_from_slice(LINE_TERMINATOR.as_bytes());
        self.write(line)
    }

    fn validate_closed(&self) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }
        Ok(())
    }

    fn validate_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    fn require_path(&self) -> Result<PathBuf> {
        self.path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::configuration("socket path is not set"))
    }

    /// Make a freshly connected handle ready for polling
    fn prepare(&mut self, mut handle: A::Handle) -> Result<A::Handle> {
        if let Err(e) = self.adapter.set_nonblocking(&mut handle) {
            self.adapter.close(handle);
            return Err(e);
        }
        Ok(handle)
    }

    fn activate(&mut self, handle: A::Handle) {
        self.active = Some(handle);
        tracing::debug!("client open");
        self.plugins.connected(&*self);
    }

    fn wait_for_client(
        &mut self,
        listener: &mut A::Handle,
        timeout: Timeout,
        deadline: Deadline,
    ) -> Result<Option<A::Handle>> {
        self.adapter.listen(listener)?;

        if timeout == Timeout::Unbounded {
            loop {
                if let Some(client) = self.adapter.accept(listener)? {
                    return Ok(Some(client));
                }
            }
        }

        self.adapter.set_nonblocking(listener)?;
        loop {
            if let Some(client) = self.adapter.accept(listener)? {
                return Ok(Some(client));
            }
            if deadline.has_passed() {
                return Ok(None);
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn release_listener(&mut self, listener: A::Handle, path: &Path) {
        self.adapter.close(listener);
        self.adapter.unlink(path);
        self.bound_path = false;
    }

    /// Pull at most one chunk from the socket into the buffer
    ///
    /// Returns whether any bytes arrived. A lost connection closes the
    /// client before the error is returned.
    fn fill(&mut self) -> Result<bool> {
        let handle = self.active.as_mut().ok_or(Error::NotOpen)?;
        match self.adapter.read(handle, REFILL_CHUNK) {
            Ok(data) if data.is_empty() => Ok(false),
            Ok(data) => {
                tracing::trace!(len = data.len(), "buffered");
                self.buffer.append(&data);
                Ok(true)
            }
            Err(Error::ConnectionLost(e)) => {
                tracing::debug!(error = %e, "connection lost while reading");
                self.close();
                Err(Error::ConnectionLost(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Refill, check `stop`, sleep, repeat until `stop` holds or the deadline
    /// passes.
    ///
    /// `stop` sees the buffer and whether the last refill made progress. There
    /// is always at least one refill.
    fn poll_until<F>(&mut self, deadline: Deadline, mut stop: F) -> Result<()>
    where
        F: FnMut(&Buffer, bool) -> bool,
    {
        loop {
            let progressed = self.fill()?;
            if stop(&self.buffer, progressed) {
                return Ok(());
            }
            if deadline.has_passed() {
                tracing::trace!(buffered = self.buffer.len(), "deadline passed");
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn finish_read(&mut self, take: Option<usize>) -> Option<Bytes> {
        let result = take.and_then(|n| self.buffer.extract(n));
        self.plugins.read(&*self, result.as_deref());
        result
    }
}

impl<A: SocketAdapter> ClientInfo for Client<A> {
    fn path(&self) -> Option<&Path> {
        Client::path(self)
    }

    fn is_open(&self) -> bool {
        Client::is_open(self)
    }

    fn buffered(&self) -> usize {
        Client::buffered(self)
    }
}

impl<A: SocketAdapter> Drop for Client<A> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<A: SocketAdapter> std::fmt::Debug for Client<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("buffered", &self.buffer.len())
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

fn validate_length(len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::configuration("length must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::io::{MemoryAdapter, MemoryListener, MemoryStream};
    use crate::builder::ClientBuilder;
    use crate::plugins::{ChannelPlugin, ClientEvent};

    const PATH: &str = "/virtual/client-tests.sock";

    fn connected() -> (Client<MemoryAdapter>, MemoryStream, MemoryListener) {
        let adapter = MemoryAdapter::new();
        let listener = adapter.listen_at(PATH);
        let mut client = Client::new(adapter);
        client.connect_to(PATH).expect("connecting");
        let peer = listener.try_accept().expect("pending client");
        (client, peer, listener)
    }

    fn ms(n: u64) -> Timeout {
        Timeout::from_millis(n)
    }

    #[test]
    fn read_returns_up_to_max_len() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"hello world").unwrap();

        let data = client.read(5, ms(100)).unwrap();
        assert_eq!(data.as_deref(), Some(&b"hello"[..]));
        assert_eq!(client.buffered(), 6);

        // nothing new arrives, so a zero timeout hands back what is buffered
        let data = client.read(DEFAULT_READ_LENGTH, ms(0)).unwrap();
        assert_eq!(data.as_deref(), Some(&b" world"[..]));
    }

    #[test]
    fn read_times_out_empty() {
        let (mut client, _peer, _listener) = connected();

        let start = Instant::now();
        let data = client.read(10, ms(30)).unwrap();
        assert_eq!(data, None);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(client.is_open());
    }

    #[test]
    fn read_exactly_accumulates_chunks() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"abc").unwrap();
        peer.send(b"defg").unwrap();

        let data = client.read_exactly(5, ms(500)).unwrap();
        assert_eq!(data.as_deref(), Some(&b"abcde"[..]));
        assert_eq!(client.buffered(), 2);
    }

    #[test]
    fn read_exactly_short_keeps_buffer() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"abc").unwrap();

        assert_eq!(client.read_exactly(5, ms(30)).unwrap(), None);
        assert_eq!(client.buffered(), 3);

        peer.send(b"de").unwrap();
        let data = client.read_exactly(5, ms(500)).unwrap();
        assert_eq!(data.as_deref(), Some(&b"abcde"[..]));
    }

    #[test]
    fn read_until_zero_timeout_drains_until_quiet() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"abc").unwrap();

        let start = Instant::now();
        assert_eq!(client.read_until(&["\n"], ms(0), None).unwrap(), None);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(client.buffered(), 3);
    }

    #[test]
    fn read_until_zero_timeout_keeps_polling_while_data_flows() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"ab").unwrap();
        peer.send(b"cd").unwrap();
        peer.send(b"e\nf").unwrap();

        let data = client.read_until(&["\n"], ms(0), None).unwrap();
        assert_eq!(data.as_deref(), Some(&b"abcde\n"[..]));
        assert_eq!(client.buffered(), 1);
    }

    #[test]
    fn read_until_length_cap_beats_late_match() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"abcdefX").unwrap();

        let data = client
            .read_until(&["X"], Timeout::Unbounded, Some(3))
            .unwrap();
        assert_eq!(data.as_deref(), Some(&b"abc"[..]));
        assert_eq!(client.buffered(), 4);
    }

    #[test]
    fn read_until_match_inside_cap() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"ab;cd").unwrap();

        let data = client.read_until(&[";"], ms(100), Some(3)).unwrap();
        assert_eq!(data.as_deref(), Some(&b"ab;"[..]));
    }

    #[test]
    fn read_until_cap_reached_without_match() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"abcdef").unwrap();

        let data = client
            .read_until(&["\n"], Timeout::Unbounded, Some(4))
            .unwrap();
        assert_eq!(data.as_deref(), Some(&b"abcd"[..]));
        assert_eq!(client.buffered(), 2);
    }

    #[test]
    fn read_until_timeout_below_cap() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"ab").unwrap();

        assert_eq!(client.read_until(&["\n"], ms(20), Some(10)).unwrap(), None);
        assert_eq!(client.buffered(), 2);
    }

    #[test]
    fn read_line_splits_on_either_terminator() {
        let (mut client, peer, _listener) = connected();
        peer.send(b"one\r\ntwo\n").unwrap();

        let mut lines = Vec::new();
        while let Some(line) = client.read_line(ms(0), None).unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one\r", "\n", "two\n"]);
    }

    #[test]
    fn argument_errors_before_io() {
        let (mut client, _peer, _listener) = connected();

        assert!(matches!(client.read(0, ms(0)), Err(Error::Configuration(_))));
        assert!(matches!(
            client.read_exactly(0, ms(0)),
            Err(Error::Configuration(_))
        ));
        let no_stops: [&str; 0] = [];
        assert!(matches!(
            client.read_until(&no_stops, ms(0), None),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            client.read_until(&[""], ms(0), None),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            client.read_line(ms(0), Some(0)),
            Err(Error::Configuration(_))
        ));
        assert!(client.is_open());
    }

    #[test]
    fn missing_path_is_configuration_error() {
        let mut client = Client::new(MemoryAdapter::new());
        assert!(matches!(client.connect(), Err(Error::Configuration(_))));
        assert!(matches!(
            client.accept(ms(10)),
            Err(Error::Configuration(_))
        ));

        client.set_path("");
        assert!(matches!(client.try_connect(), Err(Error::Configuration(_))));
        assert!(matches!(
            client.try_accept(ms(10)),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn has_input() {
        let (mut client, peer, _listener) = connected();
        assert!(!client.has_input().unwrap());

        peer.send(b"x").unwrap();
        assert!(client.has_input().unwrap());
        // now buffered, so no poll is needed
        assert!(client.has_input().unwrap());
        assert_eq!(client.buffered(), 1);
    }

    #[test]
    fn read_after_peer_close_closes_and_reraises() {
        let (mut client, peer, _listener) = connected();
        peer.close();

        let err = client.read(10, ms(100)).unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)), "got {err:?}");
        assert!(client.is_closed());
    }

    #[test]
    fn has_input_after_peer_close_closes() {
        let (mut client, peer, _listener) = connected();
        peer.close();

        assert!(matches!(
            client.has_input(),
            Err(Error::ConnectionLost(_))
        ));
        assert!(client.is_closed());
    }

    #[test]
    fn write_after_peer_close_is_swallowed() {
        let (mut client, peer, _listener) = connected();
        peer.close();

        client.write("into the void").unwrap();
        assert!(client.is_closed());
    }

    #[test]
    fn write_line_appends_terminator() {
        let (mut client, mut peer, _listener) = connected();
        client.write_line("status").unwrap();
        client.write(b"raw").unwrap();
        assert_eq!(peer.recv_available(), b"status\nraw");
    }

    #[test]
    fn plugins_see_lifecycle_reads_and_writes() {
        let adapter = MemoryAdapter::new();
        let listener = adapter.listen_at(PATH);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut plugins = PluginManager::default();
        plugins.add(Box::new(ChannelPlugin::new(tx)));
        let mut client =
            Client::with_parts(adapter, Some(PATH.into()), plugins, Duration::from_millis(1));

        client.connect().unwrap();
        let peer = listener.try_accept().unwrap();
        client.write("ping").unwrap();
        peer.send(b"pong").unwrap();
        client.read(4, ms(100)).unwrap();
        client.read(4, ms(0)).unwrap();
        client.close();
        client.close();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ClientEvent::Connected {
                    path: Some(PATH.into())
                },
                ClientEvent::Write(Bytes::from_static(b"ping")),
                ClientEvent::Read(Some(Bytes::from_static(b"pong"))),
                ClientEvent::Read(None),
                ClientEvent::Disconnected {
                    path: Some(PATH.into())
                },
            ]
        );
    }

    #[test]
    fn plugins_see_write_after_connection_lost() {
        let adapter = MemoryAdapter::new();
        let listener = adapter.listen_at(PATH);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut client = ClientBuilder::new()
            .path(PATH)
            .plugin(ChannelPlugin::new(tx))
            .build(adapter);

        client.connect().unwrap();
        listener.try_accept().unwrap().close();
        client.write("zz").unwrap();
        assert!(client.is_closed());

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ClientEvent::Connected {
                    path: Some(PATH.into())
                },
                ClientEvent::Disconnected {
                    path: Some(PATH.into())
                },
                ClientEvent::Write(Bytes::from_static(b"zz")),
            ]
        );
    }

    /// Dial `PATH` from another thread once a server starts listening there
    fn dial_when_listening(
        adapter: &MemoryAdapter,
        greeting: &'static [u8],
    ) -> thread::JoinHandle<MemoryStream> {
        let dialer = adapter.clone();
        thread::spawn(move || {
            let start = Instant::now();
            loop {
                match dialer.dial(PATH) {
                    Ok(stream) => {
                        stream.send(greeting).unwrap();
                        return stream;
                    }
                    Err(_) if start.elapsed() < Duration::from_secs(5) => {
                        thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => panic!("server never listened: {e}"),
                }
            }
        })
    }

    #[test]
    fn accept_through_memory_namespace() {
        let adapter = MemoryAdapter::new();
        let peer = dial_when_listening(&adapter, b"hi\n");
        let mut server = Client::new(adapter);
        server.set_path(PATH);

        server.accept(Duration::from_secs(5)).unwrap();
        assert!(server.is_open());
        let _peer = peer.join().unwrap();

        let line = server.read_line(ms(500), None).unwrap();
        assert_eq!(line.as_deref(), Some(&b"hi\n"[..]));

        server.close();
        assert!(server.is_closed());
    }

    #[test]
    fn unbounded_accept_blocks_until_peer() {
        let adapter = MemoryAdapter::new();
        let peer = dial_when_listening(&adapter, b"ready\n");
        let mut server = Client::new(adapter);
        server.set_path(PATH);

        server.accept(Timeout::Unbounded).unwrap();
        assert!(server.is_open());
        let _peer = peer.join().unwrap();

        let line = server.read_line(ms(500), None).unwrap();
        assert_eq!(line.as_deref(), Some(&b"ready\n"[..]));
    }

    #[test]
    fn try_accept_on_taken_path() {
        let adapter = MemoryAdapter::new();
        let _other = adapter.listen_at(PATH);
        let mut server = Client::new(adapter.clone());
        server.set_path(PATH);

        assert!(!server.try_accept(ms(10)).unwrap());
        assert!(server.is_closed());
        // the existing listener is left alone
        assert!(adapter.is_listening(PATH));
    }

    #[test]
    fn accept_timeout_leaves_nothing_behind() {
        let adapter = MemoryAdapter::new();
        let namespace = adapter.clone();
        let mut server = Client::new(adapter);
        server.set_path(PATH);

        assert!(!server.try_accept(ms(20)).unwrap());
        assert!(server.is_closed());
        assert!(!namespace.is_listening(PATH));

        // the path can be reused straight away
        server.accept(ms(0)).unwrap();
        assert!(server.is_closed());
    }

    #[test]
    fn try_connect_reports_refusal() {
        let mut client = Client::new(MemoryAdapter::new());
        client.set_path(PATH);
        assert!(!client.try_connect().unwrap());
        assert!(client.is_closed());
    }

    #[test]
    fn drop_closes() {
        let adapter = MemoryAdapter::new();
        let listener = adapter.listen_at(PATH);
        let mut client = Client::new(adapter);
        client.connect_to(PATH).unwrap();
        let peer = listener.try_accept().unwrap();

        drop(client);
        assert!(peer.send(b"still there?").is_err());
    }
}
