//! The editor subprocess is an external collaborator, not part of the
//! core control plane (see §1 Non-goals: launching the subprocess is out
//! of scope for the protocol/session/registry core). [`EditorLauncher`] is
//! the trait boundary [`crate::Wrapper::start`] calls through; a real
//! [`ProcessLauncher`] implementation is provided alongside the core for
//! convenience, but a host or test harness may supply a fake that never
//! spawns anything.

use std::path::PathBuf;
use std::process::{Child, Command};

use crate::error::LaunchError;

/// A running (or exited) editor subprocess handle.
pub trait EditorProcess: Send {
    /// Whether the process is still running, best-effort.
    fn is_running(&mut self) -> bool;
}

impl EditorProcess for Child {
    fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }
}

/// The collaborator [`crate::Wrapper::start`] calls to spawn the editor,
/// pointed at the bound listener port with the generated shared secret.
pub trait EditorLauncher: Send {
    /// Spawns the editor process, passing it `-nb:<host>:<port>:<secret>`
    /// per the wire protocol's launch convention.
    ///
    /// # Errors
    ///
    /// [`LaunchError`] if the process could not be started.
    fn spawn(&self, host: &str, port: u16, secret: &str) -> Result<Box<dyn EditorProcess>, LaunchError>;
}

/// The diagnostic environment variables the historical launcher set for
/// the editor process. Out-of-core per the spec, but kept here since
/// [`ProcessLauncher`] is the provided (not mandatory) real implementation.
const DEBUG_LOG_ENV: (&str, &str) = ("SPRO_GVIM_DEBUG", "netbeans.log");
const DEBUG_LEVEL_ENV: (&str, &str) = ("SPRO_GVIM_DLEVEL", "0xffffffff");

/// Spawns a real editor subprocess via [`std::process::Command`].
pub struct ProcessLauncher {
    executable: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl ProcessLauncher {
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
            extra_args: Vec::new(),
        }
    }

    /// Arguments appended after the `-nb:` netbeans argument, e.g.
    /// `--servername`.
    #[must_use]
    pub fn with_extra_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args = args.into_iter().collect();
        self
    }
}

impl EditorLauncher for ProcessLauncher {
    fn spawn(&self, host: &str, port: u16, secret: &str) -> Result<Box<dyn EditorProcess>, LaunchError> {
        let executable = self.executable.as_ref().ok_or(LaunchError::MissingExecutable)?;
        let mut command = Command::new(executable);
        command
            .arg(format!("-nb:{host}:{port}:{secret}"))
            .args(&self.extra_args)
            .env(DEBUG_LOG_ENV.0, DEBUG_LOG_ENV.1)
            .env(DEBUG_LEVEL_ENV.0, DEBUG_LEVEL_ENV.1);
        let child = command.spawn().map_err(LaunchError::Spawn)?;
        Ok(Box::new(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProcess {
        running: bool,
    }

    impl EditorProcess for FakeProcess {
        fn is_running(&mut self) -> bool {
            self.running
        }
    }

    struct FakeLauncher;

    impl EditorLauncher for FakeLauncher {
        fn spawn(&self, host: &str, port: u16, secret: &str) -> Result<Box<dyn EditorProcess>, LaunchError> {
            assert_eq!(host, "localhost");
            assert_eq!(port, 5678);
            assert_eq!(secret, "s3cret");
            Ok(Box::new(FakeProcess { running: true }))
        }
    }

    #[test]
    fn fake_launcher_reports_running() {
        let launcher = FakeLauncher;
        let mut handle = launcher.spawn("localhost", 5678, "s3cret").unwrap();
        assert!(handle.is_running());
    }

    #[test]
    fn missing_executable_is_reported() {
        let launcher = ProcessLauncher {
            executable: None,
            extra_args: Vec::new(),
        };
        let err = launcher.spawn("localhost", 5678, "secret").unwrap_err();
        assert!(matches!(err, LaunchError::MissingExecutable));
    }

    #[cfg(unix)]
    #[test]
    fn process_launcher_spawns_a_real_child_with_the_nb_argument() {
        use std::io::Write as _;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("fake-editor.sh");
        let mut script = std::fs::File::create(&script_path).unwrap();
        writeln!(script, "#!/bin/sh").unwrap();
        writeln!(script, "echo \"$1\" > \"{}/args.txt\"", dir.path().display()).unwrap();
        drop(script);
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let launcher = ProcessLauncher::new(&script_path);
        let mut handle = launcher.spawn("localhost", 5678, "s3cret").unwrap();
        while handle.is_running() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let recorded = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(recorded.trim(), "-nb:localhost:5678:s3cret");
    }
}
