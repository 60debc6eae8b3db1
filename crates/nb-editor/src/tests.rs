//! End-to-end tests driving [`Wrapper`] against a scripted fake editor
//! speaking raw TCP, the same harness shape `nb-session` uses for its own
//! protocol tests.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nb_logsink::NullLogSink;
use nb_session::SessionConfig;

use crate::launcher::{EditorLauncher, EditorProcess, LaunchError};
use crate::registry::BufferEvent;
use crate::Wrapper;

struct FakeProcess;

impl EditorProcess for FakeProcess {
    fn is_running(&mut self) -> bool {
        true
    }
}

/// A launcher that, instead of spawning a real process, connects back to
/// the given port itself and performs the AUTH/version/startupDone
/// handshake synchronously. This works without a background thread because
/// the handshake is pure writes from the (fake) editor's side; the
/// controller only starts reading after `spawn` returns, when it calls
/// `accept_one`.
struct ScriptedLauncher {
    secret: String,
    handed_off: mpsc::Sender<TcpStream>,
}

impl EditorLauncher for ScriptedLauncher {
    fn spawn(&self, _host: &str, port: u16, secret: &str) -> Result<Box<dyn EditorProcess>, LaunchError> {
        assert_eq!(secret, self.secret);
        let mut stream = TcpStream::connect(("127.0.0.1", port)).map_err(LaunchError::Spawn)?;
        stream
            .write_all(format!("AUTH {secret}\n0:version=0 \"2.5\"\n0:startupDone=0\n").as_bytes())
            .map_err(LaunchError::Spawn)?;
        let clone = stream.try_clone().map_err(LaunchError::Spawn)?;
        let _ = self.handed_off.send(clone);
        Ok(Box::new(FakeProcess))
    }
}

fn start_wrapper() -> (Wrapper, BufReader<TcpStream>) {
    let mut config = SessionConfig::new(0, "abcdefgh");
    config.listen.io_timeout = Duration::from_millis(30);
    config.listen.blocking_poll_interval = Duration::from_millis(5);
    let (tx, rx) = mpsc::channel();
    let launcher = ScriptedLauncher {
        secret: "abcdefgh".to_string(),
        handed_off: tx,
    };
    let mut wrapper = Wrapper::new(config, Box::new(launcher), Arc::new(NullLogSink)).unwrap();
    wrapper.start().unwrap();
    let stream = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    (wrapper, BufReader::new(stream))
}

#[test]
fn start_completes_handshake_and_reaches_ready() {
    let (wrapper, _editor) = start_wrapper();
    assert!(wrapper.bound_port() > 0);
}

#[test]
fn open_file_suppresses_the_self_echo_fileopened_event() {
    let (mut wrapper, mut editor) = start_wrapper();

    let id = wrapper.open_file("/a").unwrap();

    // Drain the editFile/setFullName/initDone lines the wrapper just sent.
    for _ in 0..3 {
        let mut line = String::new();
        editor.read_line(&mut line).unwrap();
    }

    // The editor echoes back a fileOpened event for the same file, on
    // buffer 0 per the protocol's convention for editor-initiated opens.
    editor
        .get_mut()
        .write_all(b"0:fileOpened=0 \"/a\" T F\n")
        .unwrap();
    wrapper.pump_events(None).unwrap();

    assert_eq!(wrapper.registry().len(), 1);
    assert_eq!(wrapper.registry().path_of(id), Some("/a"));
}

#[test]
fn file_opened_with_nonzero_buffer_id_is_ignored() {
    let (mut wrapper, mut editor) = start_wrapper();

    editor
        .get_mut()
        .write_all(b"5:fileOpened=0 \"/already-assigned\" T F\n")
        .unwrap();
    wrapper.pump_events(None).unwrap();

    assert!(!wrapper.registry().has_path("/already-assigned"));
}

#[test]
fn unprompted_file_opened_on_buffer_zero_registers_a_new_buffer() {
    let (mut wrapper, mut editor) = start_wrapper();

    editor
        .get_mut()
        .write_all(b"0:fileOpened=0 \"/opened-by-editor\" T F\n")
        .unwrap();
    wrapper.pump_events(None).unwrap();

    assert!(wrapper.registry().has_path("/opened-by-editor"));

    let mut assign_line = String::new();
    editor.read_line(&mut assign_line).unwrap();
    assert!(assign_line.contains("putBufferNumber"));
    assert!(assign_line.contains("/opened-by-editor"));
}

#[test]
fn get_cursor_round_trips_through_a_real_call() {
    let (mut wrapper, mut editor) = start_wrapper();

    let responder = thread::spawn(move || {
        let mut line = String::new();
        editor.read_line(&mut line).unwrap();
        assert_eq!(line, "0:getCursor/1\n");
        editor.get_mut().write_all(b"1 3 5 0 42\n").unwrap();
    });

    let cursor = wrapper.get_cursor().unwrap();
    assert_eq!(cursor.buffer_id, 3);
    assert_eq!(cursor.line, 5);
    assert_eq!(cursor.col, 0);
    assert_eq!(cursor.offset, 42);
    responder.join().unwrap();
}

#[test]
fn hotkey_event_fans_out_to_registry_subscribers() {
    let (mut wrapper, mut editor) = start_wrapper();

    let (tx, rx) = mpsc::channel();
    wrapper.subscribe_buffer_events(Box::new(move |event| {
        let _ = tx.send(event.clone());
    }));

    editor
        .get_mut()
        .write_all(b"7:keyAtPos=0 \"F2\" 10 2/4\n")
        .unwrap();
    wrapper.pump_events(None).unwrap();

    let event = rx.recv_timeout(Duration::from_millis(200)).unwrap();
    assert_eq!(
        event,
        BufferEvent::Hotkey {
            buffer_id: 7,
            key: "F2".to_string(),
            offset: 10,
            line: 2,
            col: 4,
        }
    );
}

#[test]
fn close_sends_disconnect_and_clears_the_registry() {
    let (mut wrapper, mut editor) = start_wrapper();
    wrapper.open_file("/a").unwrap();
    for _ in 0..3 {
        let mut line = String::new();
        editor.read_line(&mut line).unwrap();
    }
    assert_eq!(wrapper.registry().len(), 1);

    wrapper.close();

    let mut line = String::new();
    editor.read_line(&mut line).unwrap();
    assert!(line.starts_with("DISCONNECT"));
    assert_eq!(wrapper.registry().len(), 0);
}
