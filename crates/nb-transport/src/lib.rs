//! # Overview
//!
//! `nb-transport` owns the single accepted TCP connection between the
//! controller and the editor process: binding a listening socket with
//! port-contention retry, accepting exactly one client, and reading/writing
//! LF-terminated lines with the blocking-with-timeout polling discipline the
//! protocol expects.
//!
//! # Design
//!
//! [`LineTransport::start_listening`] mirrors the teacher crate's direct-connect
//! helper in spirit (explicit [`socket2::Socket`] construction, explicit
//! timeouts) but for the server side: a `SO_REUSEADDR` listening socket is
//! bound, and a port already in use is retried with a random offset rather
//! than failing outright, matching the historical launcher's behavior of
//! sharing a well-known port range with other local listeners.
//!
//! Once a client is accepted, reads go through a buffered, line-splitting
//! reader with a 200ms socket timeout; writes are unbuffered so each call to
//! [`LineTransport::write_line`] reaches the socket immediately. [`LineTransport::read_line`]
//! distinguishes three outcomes: a line, end-of-file, and "no data yet",
//! the last of which only matters in non-blocking mode.
//!
//! # Invariants
//!
//! - [`LineTransport::read_line`] with `blocking = true` never returns
//!   [`LineOutcome::Empty`]; it either returns a line or [`LineOutcome::Eof`].
//! - [`LineTransport::write_line`] appends exactly one trailing `\n` and
//!   never more than one.
//!
//! # Errors
//!
//! I/O failures other than timeout/would-block surface as [`TransportError`].
//!
//! # See also
//!
//! - `nb-session` for the component that drives this transport's read/write
//!   loop under the protocol's dispatch rules.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nb_logsink::{LogLevel, LogSink};
use socket2::{Domain, Socket, Type};

/// Number of random retry offsets attempted when the requested port is
/// already bound by another process, matching the historical launcher's
/// retry budget.
const MAX_BIND_RETRIES: u32 = 100;

/// Errors raised while binding, accepting, or performing line I/O.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind a listening socket near port {requested}: {source}")]
    Bind {
        requested: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
    #[error("socket I/O failed: {0}")]
    Io(#[source] std::io::Error),
    #[error("line transport is not connected to a client")]
    NotConnected,
}

/// The result of one [`LineTransport::read_line`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// A complete line, with the trailing `\n` already stripped.
    Line(String),
    /// The peer closed the connection.
    Eof,
    /// No data available yet; only returned in non-blocking mode.
    Empty,
}

/// Tunable timing knobs for a [`LineTransport`].
#[derive(Debug, Clone, Copy)]
pub struct ListenConfig {
    /// Port to request; the actually bound port may differ if retried.
    pub port: u16,
    /// Socket read timeout applied after a client is accepted.
    pub io_timeout: Duration,
    /// Sleep interval between blocking read retries on timeout.
    pub blocking_poll_interval: Duration,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: 5678,
            io_timeout: Duration::from_millis(200),
            blocking_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Owns the listening socket, the single accepted connection, and the
/// buffered reader/unbuffered writer pair used to speak the line protocol.
pub struct LineTransport {
    listener: TcpListener,
    bound_port: u16,
    config: ListenConfig,
    reader: Option<BufReader<TcpStream>>,
    writer: Option<TcpStream>,
    sink: Arc<dyn LogSink>,
}

impl LineTransport {
    /// Binds a listening socket at `config.port`, retrying on a random
    /// nearby port when the requested one is already in use.
    pub fn start_listening(
        config: ListenConfig,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, TransportError> {
        let mut candidate = config.port;
        let mut last_err = None;
        for attempt in 0..=MAX_BIND_RETRIES {
            match bind_listener(candidate) {
                Ok(listener) => {
                    let bound_port = listener
                        .local_addr()
                        .map(|addr| addr.port())
                        .unwrap_or(candidate);
                    sink.log(
                        LogLevel::Info,
                        "nb_transport::listen",
                        format!("listening on port {bound_port}"),
                    );
                    return Ok(Self {
                        listener,
                        bound_port,
                        config,
                        reader: None,
                        writer: None,
                        sink,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AddrInUse && attempt < MAX_BIND_RETRIES => {
                    let offset = 1 + (pseudo_random_offset(attempt) % 100);
                    candidate = config.port.wrapping_add(offset);
                    last_err = Some(err);
                }
                Err(err) => {
                    return Err(TransportError::Bind {
                        requested: config.port,
                        source: err,
                    });
                }
            }
        }
        Err(TransportError::Bind {
            requested: config.port,
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::AddrInUse, "exhausted bind retries")
            }),
        })
    }

    /// The port actually bound, which may differ from the requested one.
    #[must_use]
    pub fn bound_port(&self) -> u16 {
        self.bound_port
    }

    /// Blocks until a client connects, then configures the accepted socket
    /// with the transport's read timeout.
    pub fn accept_one(&mut self) -> Result<SocketAddr, TransportError> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream
            .set_read_timeout(Some(self.config.io_timeout))
            .map_err(TransportError::Io)?;
        let writer = stream.try_clone().map_err(TransportError::Io)?;
        self.reader = Some(BufReader::new(stream));
        self.writer = Some(writer);
        self.sink.log(
            LogLevel::Info,
            "nb_transport::accept",
            format!("accepted connection from {peer}"),
        );
        Ok(peer)
    }

    /// Reads one line. In blocking mode, sleeps and retries on timeout
    /// until a line or EOF is available; in non-blocking mode, a timeout
    /// immediately yields [`LineOutcome::Empty`].
    pub fn read_line(&mut self, blocking: bool) -> Result<LineOutcome, TransportError> {
        let reader = self.reader.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            let mut buf = String::new();
            match reader.read_line(&mut buf) {
                Ok(0) => return Ok(LineOutcome::Eof),
                Ok(_) => {
                    if buf.ends_with('\n') {
                        buf.pop();
                    }
                    return Ok(LineOutcome::Line(buf));
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    if blocking {
                        thread::sleep(self.config.blocking_poll_interval);
                        continue;
                    }
                    return Ok(LineOutcome::Empty);
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    /// Writes `line` followed by a single `\n`, unbuffered.
    pub fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(line.as_bytes()).map_err(TransportError::Io)?;
        writer.write_all(b"\n").map_err(TransportError::Io)?;
        writer.flush().map_err(TransportError::Io)
    }

    /// Shuts the connection down. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        self.reader = None;
    }

    /// Whether a client is currently accepted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }
}

fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(5)?;
    Ok(socket.into())
}

/// A tiny xorshift-style offset generator seeded from the attempt count and
/// the process's address-space layout, avoiding a dependency on a real RNG
/// crate for a value whose only requirement is "probably different next
/// time".
fn pseudo_random_offset(attempt: u32) -> u16 {
    let seed = (&attempt as *const u32 as u64) ^ (attempt as u64).wrapping_mul(2_654_435_761);
    (seed % 100) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use nb_logsink::NullLogSink;
    use std::io::Write as _;
    use std::net::TcpStream as StdTcpStream;

    fn sink() -> Arc<dyn LogSink> {
        Arc::new(NullLogSink)
    }

    #[test]
    fn binds_an_ephemeral_port_when_requested() {
        let config = ListenConfig {
            port: 0,
            ..ListenConfig::default()
        };
        let transport = LineTransport::start_listening(config, sink()).unwrap();
        assert_ne!(transport.bound_port(), 0);
        assert_eq!(
            transport.bound_port(),
            transport.listener.local_addr().unwrap().port()
        );
    }

    #[test]
    fn accepts_and_round_trips_a_line() {
        let config = ListenConfig {
            port: 0,
            io_timeout: Duration::from_millis(50),
            blocking_poll_interval: Duration::from_millis(10),
        };
        let mut transport = LineTransport::start_listening(config, sink()).unwrap();
        let local_addr = transport.listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut stream = StdTcpStream::connect(local_addr).unwrap();
            stream.write_all(b"AUTH secret\n").unwrap();
            stream
        });

        transport.accept_one().unwrap();
        let line = transport.read_line(true).unwrap();
        assert_eq!(line, LineOutcome::Line("AUTH secret".to_string()));
        client.join().unwrap();
    }

    #[test]
    fn non_blocking_read_returns_empty_without_data() {
        let config = ListenConfig {
            port: 0,
            io_timeout: Duration::from_millis(30),
            blocking_poll_interval: Duration::from_millis(10),
        };
        let mut transport = LineTransport::start_listening(config, sink()).unwrap();
        let local_addr = transport.listener.local_addr().unwrap();
        let _client = StdTcpStream::connect(local_addr).unwrap();
        transport.accept_one().unwrap();
        let outcome = transport.read_line(false).unwrap();
        assert_eq!(outcome, LineOutcome::Empty);
    }
}
