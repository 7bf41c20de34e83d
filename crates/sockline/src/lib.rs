//! Unix socket client
//!
//! This crate provides a buffered, timeout-bounded client for Unix domain
//! stream sockets. It is aimed at scripts and interactive tools that drive a
//! local process over a socket and want to read whole lines, or everything up
//! to a marker, without blocking forever.
//!
//! # Architecture
//!
//! - [`Client`] owns the connection state, the receive buffer and the read
//!   algorithms
//! - [`io::SocketAdapter`] is the raw socket capability the client calls into,
//!   with [`io::UnixAdapter`] for real sockets and [`io::MemoryAdapter`] for
//!   tests
//! - [`plugins`] lets observers watch connects, disconnects, reads and writes
//!
//! # Usage
//!
//! ```no_run
//! use sockline::{Client, Timeout, io::UnixAdapter};
//!
//! let mut client = Client::new(UnixAdapter);
//! client.set_path("/tmp/worker.sock");
//! client.accept(Timeout::from_millis(5_000))?;
//! if client.is_closed() {
//!     eprintln!("nobody connected");
//!     return Ok(());
//! }
//!
//! client.write_line("hello")?;
//! let reply = client.read_until(&["> "], Timeout::from_millis(1_000), None)?;
//! # Ok::<(), sockline::Error>(())
//! ```
pub mod buffer;
mod builder;
mod client;
mod error;
pub mod io;
pub mod plugins;
mod timeout;

pub use builder::{ClientBuilder, ClientConfig};
pub use client::{Client, DEFAULT_READ_LENGTH, LINE_STOPS, LINE_TERMINATOR};
pub use error::{Error, Result};
pub use timeout::{DEFAULT_POLL_INTERVAL, Deadline, Timeout};
