//! Test helpers for the behavioral specifications.
//!
//! Black-box: every test shells out to the real `meow`/`meowd` binaries
//! over a temporary, isolated state directory. See `tests/specs.rs` for
//! how these modules are wired together.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const MEOW_TIMEOUT_CONNECT_MS: &str = "2000";
const MEOW_TIMEOUT_EXIT_MS: &str = "500";
const MEOW_TIMEOUT_IPC_MS: &str = "500";
const MEOW_CONNECT_POLL_MS: &str = "5";

pub const SPEC_POLL_INTERVAL_MS: u64 = 10;
pub const SPEC_WAIT_MAX_MS: u64 = 3000;

/// Resolve a binary built alongside the test harness, preferring
/// llvm-cov's target dir (coverage runs) over the standard one, and
/// falling back to a path relative to the test binary itself.
fn binary_path(name: &str) -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));

    let llvm_cov_path = manifest_dir.join("target/llvm-cov-target/debug").join(name);
    if llvm_cov_path.exists() {
        return llvm_cov_path;
    }

    let standard = manifest_dir.join("target/debug").join(name);
    if standard.exists() {
        return standard;
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(debug_dir) = exe.parent().and_then(|d| d.parent()) {
            let fallback = debug_dir.join(name);
            if fallback.exists() {
                return fallback;
            }
        }
    }

    standard
}

fn meow_binary() -> PathBuf {
    binary_path("meow")
}

pub fn meowd_binary() -> PathBuf {
    binary_path("meowd")
}

pub fn cli() -> CliBuilder {
    CliBuilder::new()
}

pub struct CliBuilder {
    args: Vec<String>,
    dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl CliBuilder {
    fn new() -> Self {
        Self {
            args: Vec::new(),
            dir: None,
            envs: vec![
                (
                    "MEOW_DAEMON_BINARY".into(),
                    meowd_binary().to_string_lossy().into(),
                ),
                (
                    "MEOW_TIMEOUT_CONNECT_MS".into(),
                    MEOW_TIMEOUT_CONNECT_MS.into(),
                ),
                ("MEOW_TIMEOUT_EXIT_MS".into(), MEOW_TIMEOUT_EXIT_MS.into()),
                ("MEOW_TIMEOUT_IPC_MS".into(), MEOW_TIMEOUT_IPC_MS.into()),
                ("MEOW_CONNECT_POLL_MS".into(), MEOW_CONNECT_POLL_MS.into()),
            ],
        }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn pwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.dir = Some(path.into());
        self
    }

    pub fn env(mut self, key: &str, value: impl AsRef<Path>) -> Self {
        self.envs.push((
            key.to_string(),
            value.as_ref().to_string_lossy().to_string(),
        ));
        self
    }

    pub fn command(self) -> Command {
        let mut cmd = Command::new(meow_binary());
        cmd.args(&self.args);
        if let Some(dir) = self.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    pub fn passes(self) -> RunAssert {
        let output = self.command().output().expect("command should run");
        assert!(
            output.status.success(),
            "expected command to pass, got exit code {:?}\nstdout: {}\nstderr: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        RunAssert { output }
    }

    pub fn fails(self) -> RunAssert {
        let output = self.command().output().expect("command should run");
        assert!(
            !output.status.success(),
            "expected command to fail, but it passed\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        RunAssert { output }
    }

    pub fn run(self) -> RunAssert {
        let output = self.command().output().expect("command should run");
        RunAssert { output }
    }
}

pub struct RunAssert {
    output: Output,
}

impl RunAssert {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    pub fn stdout_has(self, expected: &str) -> Self {
        let stdout = self.stdout();
        assert!(
            stdout.contains(expected),
            "stdout does not contain '{}'\nstdout: {}",
            expected,
            stdout
        );
        self
    }

    pub fn stderr_has(self, expected: &str) -> Self {
        let stderr = self.stderr();
        assert!(
            stderr.contains(expected),
            "stderr does not contain '{}'\nstderr: {}",
            expected,
            stderr
        );
        self
    }
}

/// Poll a condition until it returns true or the timeout elapses.
pub fn wait_for<F>(timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(SPEC_POLL_INTERVAL_MS));
    }
    false
}

/// A temporary, isolated daemon state directory with helper methods for
/// installing templates and invoking the `meow` CLI against it.
pub struct Daemon {
    state_dir: tempfile::TempDir,
}

impl Daemon {
    pub fn empty() -> Self {
        let daemon = Self {
            state_dir: tempfile::tempdir().unwrap(),
        };
        std::fs::create_dir_all(daemon.templates_dir()).unwrap();
        daemon
    }

    pub fn state_path(&self) -> &Path {
        self.state_dir.path()
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.state_path().join("templates")
    }

    /// Write a template definition (already-serialized JSON) under
    /// `<state>/templates/<name>.json`, matching `FsTemplateLoader`'s
    /// on-disk layout.
    pub fn template(&self, name: &str, def: &serde_json::Value) {
        std::fs::write(
            self.templates_dir().join(format!("{name}.json")),
            serde_json::to_string_pretty(def).unwrap(),
        )
        .unwrap();
    }

    pub fn meow(&self) -> CliBuilder {
        cli().env("MEOW_STATE_DIR", self.state_path())
    }

    pub fn daemon_log(&self) -> String {
        std::fs::read_to_string(self.state_path().join("daemon.log"))
            .unwrap_or_else(|_| "(no daemon log)".to_string())
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let mut cmd = self.meow().args(&["daemon", "stop"]).command();
        cmd.stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        let _ = cmd.status();
    }
}

/// Build a single-step shell template definition: `{"steps": [...]}`.
pub fn shell_template(steps: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "steps": steps })
}

/// A shell step definition with no dependencies.
pub fn shell_step(id: &str, command: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "needs": [],
        "executor": { "kind": "shell", "command": command },
    })
}

/// A shell step definition that depends on other step IDs.
pub fn shell_step_needs(id: &str, command: &str, needs: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "needs": needs,
        "executor": { "kind": "shell", "command": command },
    })
}
