//! The typed convenience surface an embedder actually calls: cursor
//! queries, text edits, buffer/file lifecycle, and the event router that
//! turns editor-originated events into [`BufferRegistry`] mutations.
//!
//! [`Wrapper`] owns the [`ProtocolEngine`] and the [`BufferRegistry`] by
//! value. Because [`ProtocolEngine::take_events`] hands raw events back
//! instead of invoking a stored callback, `Wrapper` can route them into its
//! own registry without any shared-ownership trick — every public method
//! here drains and routes events immediately after touching the engine.

use std::sync::Arc;

use nb_logsink::{LogLevel, LogSink};
use nb_session::{ProtocolEngine, SessionConfig, SessionState};
use nb_wire::{ArgumentValue, TypeTag};

use crate::error::EditorError;
use crate::launcher::{EditorLauncher, EditorProcess};
use crate::registry::{BufferEvent, BufferRegistry};

/// The four-tuple `getCursor` decodes into: current buffer id, line,
/// column, and byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub buffer_id: u64,
    pub line: i64,
    pub col: i64,
    pub offset: i64,
}

/// The typed facade an embedding host programs against.
pub struct Wrapper {
    engine: ProtocolEngine,
    registry: BufferRegistry,
    launcher: Box<dyn EditorLauncher>,
    process: Option<Box<dyn EditorProcess>>,
    ignore_next_open_file: u32,
    shared_secret: String,
    sink: Arc<dyn LogSink>,
}

impl Wrapper {
    /// Starts listening per `config`, but does not yet accept a client or
    /// launch the editor; call [`Wrapper::start`] for that.
    pub fn new(
        config: SessionConfig,
        launcher: Box<dyn EditorLauncher>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, EditorError> {
        let shared_secret = config.shared_secret.clone();
        let engine = ProtocolEngine::start_listening(config, Arc::clone(&sink))?;
        Ok(Self {
            engine,
            registry: BufferRegistry::new(),
            launcher,
            process: None,
            ignore_next_open_file: 0,
            shared_secret,
            sink,
        })
    }

    /// The port the underlying listener actually bound.
    #[must_use]
    pub fn bound_port(&self) -> u16 {
        self.engine.bound_port()
    }

    /// Read-only access to the buffer registry.
    #[must_use]
    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    /// Subscribes to buffer created/deleted/hotkey notifications.
    pub fn subscribe_buffer_events(&mut self, callback: Box<dyn FnMut(&BufferEvent) + Send>) {
        self.registry.subscribe(callback);
    }

    /// Launches the editor, waits for it to connect, authenticate, and
    /// signal startup-done.
    ///
    /// # Errors
    ///
    /// [`LaunchError`] if the subprocess could not be spawned; a protocol
    /// or transport error if the connection drops before startup
    /// completes.
    pub fn start(&mut self) -> Result<(), EditorError> {
        let port = self.engine.bound_port();
        let process = self.launcher.spawn("localhost", port, &self.shared_secret)?;
        self.process = Some(process);

        self.engine.accept_one()?;
        loop {
            match self.engine.state() {
                SessionState::Ready => break,
                SessionState::Closed => {
                    return Err(nb_transport::TransportError::NotConnected.into());
                }
                _ => {
                    self.engine.process_one(true)?;
                }
            }
        }
        self.route_pending_events();
        Ok(())
    }

    /// Disconnects (if still connected) and clears the registry.
    pub fn close(&mut self) {
        if self.engine.is_connected() {
            self.engine.disconnect();
        }
        self.registry.clear();
    }

    fn route_pending_events(&mut self) {
        for (buffer_id, name, tail) in self.engine.take_events() {
            self.event_received(buffer_id, &name, &tail);
        }
    }

    // ---------------------------------------------------------------
    // Buffer info, properties
    // ---------------------------------------------------------------

    /// `(bufId, cursorLine, cursorCol, cursorFileOffset)` for the
    /// currently focused buffer.
    pub fn get_cursor(&mut self) -> Result<Cursor, EditorError> {
        let reply = self.engine.call(
            0,
            "getCursor",
            &[TypeTag::Num, TypeTag::Num, TypeTag::Num, TypeTag::Num],
            &[],
        )?;
        self.route_pending_events();
        Ok(Cursor {
            buffer_id: as_num(&reply[0]) as u64,
            line: as_num(&reply[1]),
            col: as_num(&reply[2]),
            offset: as_num(&reply[3]),
        })
    }

    /// Length of the content of `buffer_id`.
    pub fn get_length(&mut self, buffer_id: u64) -> Result<i64, EditorError> {
        let reply = self.engine.call(buffer_id, "getLength", &[TypeTag::Num], &[])?;
        self.route_pending_events();
        Ok(as_num(&reply[0]))
    }

    /// Marks `buffer_id` as modified (or not), fire-and-forget.
    pub fn set_modified(&mut self, buffer_id: u64, modified: bool) -> Result<(), EditorError> {
        self.engine
            .send(buffer_id, "setModified", &[ArgumentValue::Bool(modified)])?;
        self.route_pending_events();
        Ok(())
    }

    /// Whether `buffer_id` currently has unsaved modifications.
    pub fn is_buffer_modified(&mut self, buffer_id: u64) -> Result<bool, EditorError> {
        let reply = self.engine.call(buffer_id, "getModified", &[TypeTag::Num], &[])?;
        self.route_pending_events();
        Ok(as_num(&reply[0]) == 1)
    }

    /// The number of currently-modified buffers, queried on buffer 0. Zero
    /// means it is safe to tell the editor to exit.
    pub fn number_buffer_modified(&mut self) -> Result<i64, EditorError> {
        let reply = self.engine.call(0, "getModified", &[TypeTag::Num], &[])?;
        self.route_pending_events();
        Ok(as_num(&reply[0]))
    }

    /// Makes `buffer_id` the visible/current buffer.
    pub fn set_current_buffer(&mut self, buffer_id: u64) -> Result<(), EditorError> {
        self.engine
            .send(buffer_id, "setVisible", &[ArgumentValue::Bool(true)])?;
        self.route_pending_events();
        Ok(())
    }

    /// Makes `buffer_id` current and positions the cursor at a byte offset.
    pub fn set_current_buffer_offset(&mut self, buffer_id: u64, offset: i64) -> Result<(), EditorError> {
        self.engine
            .send(buffer_id, "setDot", &[ArgumentValue::Num(offset)])?;
        self.route_pending_events();
        Ok(())
    }

    /// Makes `buffer_id` current and positions the cursor at `(line, col)`.
    pub fn set_current_buffer_line_col(&mut self, buffer_id: u64, line: i64, col: i64) -> Result<(), EditorError> {
        self.engine
            .send(buffer_id, "setDot", &[ArgumentValue::Pos(line, col)])?;
        self.route_pending_events();
        Ok(())
    }

    /// Marks `buffer_id` read-only. Carried over from the original
    /// implementation's `setBufferReadonly`; sent with no arguments.
    pub fn set_buffer_readonly(&mut self, buffer_id: u64) -> Result<(), EditorError> {
        self.engine.send(buffer_id, "setReadOnly", &[])?;
        self.route_pending_events();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Text manipulation
    // ---------------------------------------------------------------

    /// The full content of `buffer_id`.
    pub fn text(&mut self, buffer_id: u64) -> Result<String, EditorError> {
        let reply = self.engine.call(buffer_id, "getText", &[TypeTag::Str], &[])?;
        self.route_pending_events();
        Ok(as_str(&reply[0]))
    }

    /// Inserts `text` at `offset`. Returns `None` on success, `Some(diagnostic)`
    /// on failure. Does not change the modified flag; callers must set it
    /// explicitly via [`Wrapper::set_modified`].
    pub fn insert_text(&mut self, buffer_id: u64, offset: i64, text: &str) -> Result<Option<String>, EditorError> {
        let reply = self.engine.call(
            buffer_id,
            "insert",
            &[TypeTag::OptMsg],
            &[ArgumentValue::Num(offset), ArgumentValue::Str(text.to_string())],
        )?;
        self.route_pending_events();
        Ok(as_optmsg(&reply[0]))
    }

    /// Removes `length` bytes starting at `offset`. Returns `None` on
    /// success, `Some(diagnostic)` on failure.
    pub fn remove_text(&mut self, buffer_id: u64, offset: i64, length: i64) -> Result<Option<String>, EditorError> {
        let reply = self.engine.call(
            buffer_id,
            "remove",
            &[TypeTag::OptMsg],
            &[ArgumentValue::Num(offset), ArgumentValue::Num(length)],
        )?;
        self.route_pending_events();
        Ok(as_optmsg(&reply[0]))
    }

    // ---------------------------------------------------------------
    // Buffer / file lifecycle
    // ---------------------------------------------------------------

    /// Opens `path` in the editor. Returns the newly allocated buffer id.
    pub fn open_file(&mut self, path: &str) -> Result<u64, EditorError> {
        let id = self.registry.allocate_id();
        self.ignore_next_open_file += 1;
        self.engine
            .send(id, "editFile", &[ArgumentValue::Str(path.to_string())])?;
        self.engine.drain_events(None)?;
        self.route_pending_events();
        self.engine
            .send(id, "setFullName", &[ArgumentValue::Str(path.to_string())])?;
        self.engine.send(id, "initDone", &[])?;
        self.route_pending_events();
        self.registry.add(id, path);
        Ok(id)
    }

    /// Creates a brand new buffer in the editor for `path` (which need not
    /// exist on disk yet). Returns the newly allocated buffer id.
    pub fn create_buffer(&mut self, path: &str) -> Result<u64, EditorError> {
        let id = self.registry.allocate_id();
        self.engine.send(id, "create", &[])?;
        self.engine
            .send(id, "setTitle", &[ArgumentValue::Str(path.to_string())])?;
        self.engine
            .send(id, "setFullName", &[ArgumentValue::Str(path.to_string())])?;
        self.engine.send(id, "initDone", &[])?;
        self.registry.add(id, path);
        self.engine.drain_events(None)?;
        self.route_pending_events();
        Ok(id)
    }

    /// Closes `buffer_id`, making the next buffer in insertion order
    /// current if `buffer_id` was the current buffer.
    ///
    /// Matches the historical implementation's buffer close sequencing
    /// exactly: `next_id_after` is computed *before* the buffer is removed
    /// from the registry, so if `buffer_id` is the sole remaining buffer,
    /// `next_id_after` returns `buffer_id` itself (it wraps to the only
    /// entry, which is the one about to be removed). The resulting "current
    /// buffer after closing the last buffer" state is therefore undefined;
    /// this mirrors the original and is not treated as a bug here.
    pub fn close_buffer(&mut self, buffer_id: u64) -> Result<(), EditorError> {
        let current = self.get_cursor()?.buffer_id;
        let next_id = self.registry.next_id_after(buffer_id)?;
        self.registry.remove_by_id(buffer_id)?;
        self.engine.send(buffer_id, "close", &[])?;
        self.route_pending_events();
        if current == buffer_id {
            self.set_current_buffer(next_id)?;
        }
        Ok(())
    }

    /// Assigns `buffer_id` to `path` for a buffer the editor opened on its
    /// own (the echo-suppression counterpart to `openFile`).
    pub fn assign_buffer_id(&mut self, buffer_id: u64, path: &str) -> Result<(), EditorError> {
        self.engine
            .send(buffer_id, "putBufferNumber", &[ArgumentValue::Str(path.to_string())])?;
        self.route_pending_events();
        Ok(())
    }

    /// Saves `buffer_id` and asks the editor to display a confirmation.
    pub fn save_buffer(&mut self, buffer_id: u64) -> Result<(), EditorError> {
        self.engine.send(buffer_id, "save", &[])?;
        self.engine.send(buffer_id, "saveDone", &[])?;
        self.route_pending_events();
        Ok(())
    }

    /// Saves all modified buffers and asks the editor to exit.
    ///
    /// Returns `0` on success (the editor will close the connection), or
    /// `n > 0` when `n` buffers still contain unsaved modifications.
    pub fn save_and_exit(&mut self) -> Result<i64, EditorError> {
        let reply = self.engine.call(0, "saveAndExit", &[TypeTag::OptNum], &[])?;
        self.route_pending_events();
        Ok(match &reply[0] {
            ArgumentValue::OptNum(Some(n)) => *n,
            ArgumentValue::OptNum(None) => 0,
            other => unreachable!("OPTNUM spec always yields ArgumentValue::OptNum, got {other:?}"),
        })
    }

    // ---------------------------------------------------------------
    // Keys / foreground
    // ---------------------------------------------------------------

    /// Registers the editor's netbeans hotkeys.
    pub fn set_special_keys(&mut self, keys: &str) -> Result<(), EditorError> {
        self.engine
            .send(0, "specialKeys", &[ArgumentValue::Str(keys.to_string())])?;
        self.route_pending_events();
        Ok(())
    }

    /// Raises the editor window to the foreground.
    pub fn raise(&mut self) -> Result<(), EditorError> {
        self.engine.send(0, "raise", &[])?;
        self.route_pending_events();
        Ok(())
    }

    /// Drains pending inbound events non-blocking and routes them into the
    /// registry, returning how many were processed.
    pub fn pump_events(&mut self, limit: Option<usize>) -> Result<usize, EditorError> {
        let n = self.engine.drain_events(limit)?;
        self.route_pending_events();
        Ok(n)
    }

    /// Synchronous liveness probe.
    pub fn ping_connection(&mut self) -> bool {
        self.engine.ping_connection()
    }

    // ---------------------------------------------------------------
    // Event router
    // ---------------------------------------------------------------

    fn event_received(&mut self, buffer_id: u64, name: &str, tail: &str) {
        match name {
            "fileOpened" => self.event_file_opened(buffer_id, tail),
            "killed" => self.event_file_closed(buffer_id),
            "keyAtPos" => self.event_hotkey(buffer_id, tail),
            "keyCommand" => self.event_key_command(tail),
            "newDotAndMark" => {}
            _ => {}
        }
    }

    fn event_file_opened(&mut self, buffer_id: u64, tail: &str) {
        if buffer_id != 0 {
            // The editor already associated this file with a buffer id we
            // gave it (via `openFile`/`createBuffer`); nothing to do.
            return;
        }
        if self.ignore_next_open_file > 0 {
            self.ignore_next_open_file -= 1;
            return;
        }
        let values = match nb_wire::parse_args(tail, &[TypeTag::Str, TypeTag::Bool, TypeTag::Bool]) {
            Ok(values) => values,
            Err(err) => {
                self.sink.log(
                    LogLevel::Error,
                    "nb_editor::event_file_opened",
                    format!("malformed fileOpened args {tail:?}: {err}"),
                );
                return;
            }
        };
        let path = as_str(&values[0]);
        let id = self.registry.allocate_id();
        if let Err(err) = self
            .engine
            .send(id, "putBufferNumber", &[ArgumentValue::Str(path.clone())])
        {
            self.sink.log(
                LogLevel::Error,
                "nb_editor::event_file_opened",
                format!("failed to assign buffer id {id} to {path:?}: {err}"),
            );
        }
        self.registry.add(id, path);
    }

    fn event_file_closed(&mut self, buffer_id: u64) {
        if let Err(err) = self.registry.remove_by_id(buffer_id) {
            self.sink.log(
                LogLevel::Warn,
                "nb_editor::event_file_closed",
                format!("killed event for unknown buffer {buffer_id}: {err}"),
            );
        }
    }

    fn event_hotkey(&mut self, buffer_id: u64, tail: &str) {
        let values = match nb_wire::parse_args(tail, &[TypeTag::Str, TypeTag::Num, TypeTag::Pos]) {
            Ok(values) => values,
            Err(err) => {
                self.sink.log(
                    LogLevel::Error,
                    "nb_editor::event_hotkey",
                    format!("malformed keyAtPos args {tail:?}: {err}"),
                );
                return;
            }
        };
        let key = as_str(&values[0]);
        let offset = as_num(&values[1]);
        let (line, col) = match &values[2] {
            ArgumentValue::Pos(l, c) => (*l, *c),
            other => unreachable!("POS spec always yields ArgumentValue::Pos, got {other:?}"),
        };
        self.registry.notify(&BufferEvent::Hotkey {
            buffer_id,
            key,
            offset,
            line,
            col,
        });
    }

    fn event_key_command(&mut self, tail: &str) {
        match nb_wire::parse_args(tail, &[TypeTag::Str]) {
            Ok(values) => {
                self.sink.log(
                    LogLevel::Info,
                    "nb_editor::event_key_command",
                    format!("keyCommand {}", as_str(&values[0])),
                );
            }
            Err(err) => {
                self.sink.log(
                    LogLevel::Error,
                    "nb_editor::event_key_command",
                    format!("malformed keyCommand args {tail:?}: {err}"),
                );
            }
        }
    }
}

fn as_num(value: &ArgumentValue) -> i64 {
    match value {
        ArgumentValue::Num(n) => *n,
        other => unreachable!("expected ArgumentValue::Num, got {other:?}"),
    }
}

fn as_str(value: &ArgumentValue) -> String {
    match value {
        ArgumentValue::Str(s) => s.clone(),
        other => unreachable!("expected ArgumentValue::Str, got {other:?}"),
    }
}

fn as_optmsg(value: &ArgumentValue) -> Option<String> {
    match value {
        ArgumentValue::OptMsg(msg) => msg.clone(),
        other => unreachable!("expected ArgumentValue::OptMsg, got {other:?}"),
    }
}
