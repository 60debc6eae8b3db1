//! # Overview
//!
//! `nb-session` implements the protocol engine and session state machine
//! sitting on top of [`nb_transport::LineTransport`]: classifying each
//! inbound line as an authentication request, an event, or a reply,
//! gating outbound commands on the authentication/startup flags, and
//! multiplexing the single in-flight synchronous call back to its caller.
//!
//! # Design
//!
//! [`ProtocolEngine`] owns the transport and every piece of session state.
//! Three anchored regular expressions implement the dispatch table from the
//! historical implementation, tried in a fixed order: `AUTH`, then a
//! colon-delimited event line, then a bare numeric reply line. Because the
//! protocol allows at most one outstanding [`ProtocolEngine::call`] at a
//! time, a single `Option` slot is sufficient to carry a pending reply —
//! no sequence-keyed table is needed.
//!
//! Commands submitted before the editor signals `startupDone` are queued
//! in [`ProtocolEngine::deferred_commands`] and flushed, in submission
//! order, the instant `startupDone` arrives.
//!
//! # Invariants
//!
//! - Sequence numbers handed to the wire are strictly increasing, starting
//!   at 1.
//! - At most one [`ProtocolEngine::call`] may be in flight; a nested call
//!   from within an event callback is rejected as [`ProtocolError::Reentrant`].
//! - A reply whose sequence does not match the pending call is always
//!   fatal ([`ProtocolError::BadSequence`]), even though no event in the
//!   supported vocabulary can currently produce one.
//!
//! # Errors
//!
//! Transport failures, malformed replies, and protocol violations all
//! surface as [`ProtocolError`]. Most variants are fatal: [`ProtocolEngine::process_one`]
//! and [`ProtocolEngine::call`] close the session (transitioning to
//! [`SessionState::Closed`]) themselves before returning a fatal error, so
//! callers never need to close on the engine's behalf and subsequent reads
//! are rejected outright.
//!
//! # See also
//!
//! - `nb-wire` for the argument codec used to encode commands and decode
//!   replies.
//! - `nb-editor` for the buffer registry and wrapper facade built on top of
//!   this engine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use nb_logsink::{LogLevel, LogSink};
use nb_transport::{LineOutcome, LineTransport, ListenConfig, TransportError};
use nb_wire::{ArgumentValue, ParseError, TypeTag, encode_args, parse_args};
use regex::Regex;

/// Protocol version below which the editor's `version` event is rejected.
pub const MIN_SUPPORTED_VERSION: f64 = 2.0;

/// Safety cap on the number of blocking reads `call` will perform while
/// waiting for its reply, matching the historical implementation's
/// infinite-loop guard.
const CALL_SAFETY_CAP: u32 = 300;

/// Configuration handed to [`ProtocolEngine::start_listening`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub listen: ListenConfig,
    pub shared_secret: String,
    pub min_protocol_version: f64,
}

impl SessionConfig {
    #[must_use]
    pub fn new(port: u16, shared_secret: impl Into<String>) -> Self {
        Self {
            listen: ListenConfig {
                port,
                ..ListenConfig::default()
            },
            shared_secret: shared_secret.into(),
            min_protocol_version: MIN_SUPPORTED_VERSION,
        }
    }
}

/// The state machine's discrete states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listening,
    ConnectedUnauth,
    AuthedWaitingStartup,
    Ready,
    Closed,
}

/// Errors raised while running the protocol engine.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed reply: {0}")]
    Parse(#[from] ParseError),
    #[error("reply sequence {got} does not match the pending call's sequence {expected}")]
    BadSequence { expected: u64, got: u64 },
    #[error("received reply {0} with no call pending")]
    UnsolicitedReply(u64),
    #[error("editor reported protocol version {0}, below the minimum {1}")]
    VersionTooLow(f64, f64),
    #[error("invalid version string: {0:?}")]
    InvalidVersion(String),
    #[error("call did not receive a reply within {CALL_SAFETY_CAP} polling iterations")]
    InfiniteLoop,
    #[error("a call is already in flight; calls cannot be nested")]
    Reentrant,
    #[error("command requires authentication, which has not completed")]
    NotAuthenticated,
    #[error("command requires startup to be complete")]
    NotReady,
}

struct PendingReply {
    sequence: u64,
    tail: Option<String>,
}

/// Parsed dispatch-table lines.
enum Dispatched {
    Auth { secret: String },
    Event { buffer_id: u64, name: String, tail: String },
    Reply { sequence: u64, tail: String },
}

fn dispatch_tables() -> (Regex, Regex, Regex) {
    (
        Regex::new(r"^AUTH\s+(.*)\s*$").expect("fixed pattern"),
        Regex::new(r"^(\d+):(\w+)=\d+(?:\s+(.*))?$").expect("fixed pattern"),
        Regex::new(r"^(\d+)(?:\s+(.*))?$").expect("fixed pattern"),
    )
}

fn classify(line: &str, auth_re: &Regex, event_re: &Regex, reply_re: &Regex) -> Option<Dispatched> {
    if let Some(caps) = auth_re.captures(line) {
        return Some(Dispatched::Auth {
            secret: caps[1].to_string(),
        });
    }
    if let Some(caps) = event_re.captures(line) {
        return Some(Dispatched::Event {
            buffer_id: caps[1].parse().ok()?,
            name: caps[2].to_string(),
            tail: caps.get(3).map_or(String::new(), |m| m.as_str().to_string()),
        });
    }
    if let Some(caps) = reply_re.captures(line) {
        return Some(Dispatched::Reply {
            sequence: caps[1].parse().ok()?,
            tail: caps.get(2).map_or(String::new(), |m| m.as_str().to_string()),
        });
    }
    None
}

/// One editor-originated event the engine does not handle internally
/// (anything other than `version`/`startupDone`): buffer id, event name,
/// raw argument tail.
pub type RawEvent = (u64, String, String);

/// The protocol engine: transport ownership, session flags, deferred
/// command queue, and the single in-flight reply slot.
///
/// Unhandled events are collected into an internal queue rather than
/// dispatched through a stored callback, so the engine never needs to hold
/// a closure that borrows back into whatever owns it (see `nb-editor`'s
/// `Wrapper`, which owns both this engine and the buffer registry the
/// events ultimately mutate).
pub struct ProtocolEngine {
    transport: LineTransport,
    state: SessionState,
    shared_secret: String,
    min_protocol_version: f64,
    next_seq: u64,
    pending_reply: Option<PendingReply>,
    in_call: bool,
    deferred_commands: VecDeque<String>,
    pending_events: VecDeque<RawEvent>,
    sink: Arc<dyn LogSink>,
    auth_re: Regex,
    event_re: Regex,
    reply_re: Regex,
}

impl ProtocolEngine {
    /// Starts listening per `config.listen` without yet accepting a client.
    pub fn start_listening(
        config: SessionConfig,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, ProtocolError> {
        let transport = LineTransport::start_listening(config.listen, Arc::clone(&sink))?;
        let (auth_re, event_re, reply_re) = dispatch_tables();
        Ok(Self {
            transport,
            state: SessionState::Listening,
            shared_secret: config.shared_secret,
            min_protocol_version: config.min_protocol_version,
            next_seq: 0,
            pending_reply: None,
            in_call: false,
            deferred_commands: VecDeque::new(),
            pending_events: VecDeque::new(),
            sink,
            auth_re,
            event_re,
            reply_re,
        })
    }

    #[must_use]
    pub fn bound_port(&self) -> u16 {
        self.transport.bound_port()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !matches!(self.state, SessionState::Listening | SessionState::Closed)
    }

    /// Drains every event the engine collected but did not consume
    /// internally (`version`/`startupDone` are handled here and never
    /// appear), in arrival order.
    pub fn take_events(&mut self) -> Vec<RawEvent> {
        self.pending_events.drain(..).collect()
    }

    /// Blocks until the editor connects.
    pub fn accept_one(&mut self) -> Result<(), ProtocolError> {
        self.transport.accept_one()?;
        self.state = SessionState::ConnectedUnauth;
        Ok(())
    }

    /// Reads and dispatches exactly one line if one is available (or, in
    /// blocking mode, waits until one is). Returns `0` when the connection
    /// produced no progress (non-blocking, no data, or EOF) and `1` when a
    /// line was dispatched.
    pub fn process_one(&mut self, blocking: bool) -> Result<u8, ProtocolError> {
        if self.state == SessionState::Closed {
            return Ok(0);
        }
        match self.transport.read_line(blocking)? {
            LineOutcome::Empty => Ok(0),
            LineOutcome::Eof => {
                self.close();
                Ok(0)
            }
            LineOutcome::Line(line) => {
                if let Err(err) = self.dispatch_line(&line) {
                    self.close();
                    return Err(err);
                }
                Ok(1)
            }
        }
    }

    fn dispatch_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let parsed = classify(line, &self.auth_re, &self.event_re, &self.reply_re);
        match parsed {
            Some(Dispatched::Auth { secret }) => {
                self.handle_auth(&secret);
                Ok(())
            }
            Some(Dispatched::Event { buffer_id, name, tail }) => self.handle_event(buffer_id, &name, &tail),
            Some(Dispatched::Reply { sequence, tail }) => self.handle_reply(sequence, tail),
            None => {
                self.sink.log(
                    LogLevel::Warn,
                    "nb_session::dispatch",
                    format!("unrecognized line, ignoring: {line:?}"),
                );
                Ok(())
            }
        }
    }

    fn handle_auth(&mut self, received: &str) {
        if self.state != SessionState::ConnectedUnauth {
            // Authentication is one-shot: a later AUTH line (e.g. a
            // duplicate or out-of-order send) must not regress a session
            // that already passed this state, or `Ready` would fall back
            // to `AuthedWaitingStartup` and commands would be re-deferred.
            self.sink.log(
                LogLevel::Warn,
                "nb_session::auth",
                format!("ignoring AUTH line received outside ConnectedUnauth (state: {:?})", self.state),
            );
            return;
        }
        if received != self.shared_secret {
            self.sink.log(
                LogLevel::Warn,
                "nb_session::auth",
                "received AUTH token does not match the configured shared secret; \
                 accepting the connection anyway to match historical behavior"
                    .to_string(),
            );
        }
        self.state = SessionState::AuthedWaitingStartup;
    }

    fn handle_event(&mut self, buffer_id: u64, name: &str, tail: &str) -> Result<(), ProtocolError> {
        match name {
            "version" => {
                self.handle_version_event(tail)?;
            }
            "startupDone" => {
                self.state = SessionState::Ready;
                self.flush_deferred()?;
            }
            other => {
                self.pending_events
                    .push_back((buffer_id, other.to_string(), tail.to_string()));
            }
        }
        Ok(())
    }

    fn handle_version_event(&mut self, tail: &str) -> Result<(), ProtocolError> {
        let values = match parse_args(tail, &[TypeTag::Str]) {
            Ok(values) => values,
            Err(err) => {
                self.sink.log(
                    LogLevel::Error,
                    "nb_session::version",
                    format!("malformed version event {tail:?}: {err}"),
                );
                return Ok(());
            }
        };
        let ArgumentValue::Str(raw) = &values[0] else {
            unreachable!("STR spec always yields ArgumentValue::Str")
        };
        let version: f64 = raw
            .parse()
            .map_err(|_| ProtocolError::InvalidVersion(raw.clone()))?;
        if version < self.min_protocol_version {
            return Err(ProtocolError::VersionTooLow(version, self.min_protocol_version));
        }
        Ok(())
    }

    fn flush_deferred(&mut self) -> Result<(), ProtocolError> {
        while let Some(line) = self.deferred_commands.pop_front() {
            self.transport.write_line(&line)?;
        }
        Ok(())
    }

    fn handle_reply(&mut self, sequence: u64, tail: String) -> Result<(), ProtocolError> {
        match &mut self.pending_reply {
            None => Err(ProtocolError::UnsolicitedReply(sequence)),
            Some(pending) if pending.sequence != sequence => Err(ProtocolError::BadSequence {
                expected: pending.sequence,
                got: sequence,
            }),
            Some(pending) => {
                pending.tail = Some(tail);
                Ok(())
            }
        }
    }

    /// Drains pending inbound lines non-blocking, stopping after `limit`
    /// lines (or when the socket has nothing more to offer if `limit` is
    /// `None`). Returns the number of lines processed.
    pub fn drain_events(&mut self, limit: Option<usize>) -> Result<usize, ProtocolError> {
        let mut processed = 0usize;
        loop {
            if let Some(limit) = limit {
                if processed >= limit {
                    break;
                }
            }
            if self.process_one(false)? == 0 {
                break;
            }
            processed += 1;
        }
        Ok(processed)
    }

    fn send_line(&mut self, line: &str, force: bool) -> Result<(), ProtocolError> {
        let authenticated = !matches!(
            self.state,
            SessionState::Listening | SessionState::ConnectedUnauth
        );
        if !force && !authenticated {
            return Err(ProtocolError::NotAuthenticated);
        }
        if !force && self.state != SessionState::Ready {
            self.deferred_commands.push_back(line.to_string());
            return Ok(());
        }
        self.transport.write_line(line).map_err(Into::into)
    }

    /// Sends a fire-and-forget command, bumping the sequence counter.
    pub fn send(&mut self, buffer_id: u64, command: &str, args: &[ArgumentValue]) -> Result<(), ProtocolError> {
        self.next_seq += 1;
        let line = format!(
            "{buffer_id}:{command}!{}{}",
            self.next_seq,
            encode_args(args)
        );
        self.send_line(&line, false)
    }

    /// Sends `DISCONNECT`, bypassing the authentication/startup gates, and
    /// closes the transport.
    pub fn disconnect(&mut self) {
        let _ = self.send_line("DISCONNECT", true);
        self.close();
    }

    fn close(&mut self) {
        self.transport.close();
        self.state = SessionState::Closed;
    }

    /// Sends a reply-expected command and blocks until the matching reply
    /// arrives, decoding it against `reply_spec`.
    ///
    /// Drains pending events first so the editor is not starved while this
    /// call blocks.
    pub fn call(
        &mut self,
        buffer_id: u64,
        command: &str,
        reply_spec: &[TypeTag],
        args: &[ArgumentValue],
    ) -> Result<Vec<ArgumentValue>, ProtocolError> {
        self.drain_events(None)?;
        if self.state != SessionState::Ready {
            return Err(ProtocolError::NotReady);
        }
        if self.in_call {
            return Err(ProtocolError::Reentrant);
        }
        self.in_call = true;
        self.next_seq += 1;
        let sequence = self.next_seq;
        let line = format!("{buffer_id}:{command}/{sequence}{}", encode_args(args));
        if let Err(err) = self.transport.write_line(&line) {
            self.in_call = false;
            return Err(err.into());
        }
        self.pending_reply = Some(PendingReply { sequence, tail: None });

        let result = self.wait_for_reply();
        self.in_call = false;
        let tail = result?;
        parse_args(&tail, reply_spec).map_err(ProtocolError::from)
    }

    fn wait_for_reply(&mut self) -> Result<String, ProtocolError> {
        for _ in 0..CALL_SAFETY_CAP {
            if let Some(pending) = &self.pending_reply {
                if let Some(tail) = &pending.tail {
                    let tail = tail.clone();
                    self.pending_reply = None;
                    return Ok(tail);
                }
            }
            self.process_one(true)?;
        }
        self.pending_reply = None;
        self.close();
        Err(ProtocolError::InfiniteLoop)
    }

    /// Synchronous liveness probe: issues `getCursor` and reports whether
    /// it completed without a protocol error.
    pub fn ping_connection(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.call(
            0,
            "getCursor",
            &[TypeTag::Num, TypeTag::Num, TypeTag::Num, TypeTag::Num],
            &[],
        )
        .is_ok()
    }

    /// Sleeps for `duration`, used by callers that want to back off between
    /// reconnection attempts; exposed here so embedders do not need a
    /// separate timing dependency.
    pub fn sleep(duration: Duration) {
        std::thread::sleep(duration);
    }
}
