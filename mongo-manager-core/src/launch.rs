use std::{
    fs,
    path::Path,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::error::{Error, Result};

pub(crate) const LOG_TAIL_LINES: usize = 50;

const PID_FILE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Launch the first element of `argv` with the remaining arguments.
///
/// The argv produced by the planner makes the server detach from the
/// terminal as its own session leader, redirect its output to `log_path`,
/// and write its own pid to `pid_path` before serving; this function runs
/// that command, then blocks until the pid file names a live process.
/// Failures carry the tail of `log_path`.
pub fn spawn(argv: &[String], log_path: &Path, pid_path: &Path) -> Result<u32> {
    let (binary, args) = match argv.split_first() {
        Some(split) => split,
        None => {
            return Err(Error::Spawn {
                binary: String::new(),
                message: "empty start command".into(),
                log_tail: String::new(),
            });
        }
    };

    debug!(binary = %binary, "spawning server process");

    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|error| Error::Spawn {
            binary: binary.clone(),
            message: error.to_string(),
            log_tail: tail(log_path, LOG_TAIL_LINES),
        })?;

    if !output.status.success() {
        return Err(Error::Spawn {
            binary: binary.clone(),
            message: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim(),
            ),
            log_tail: tail(log_path, LOG_TAIL_LINES),
        });
    }

    let pid = await_pid_file(binary, pid_path, log_path)?;

    if !process_running(pid) {
        return Err(Error::Spawn {
            binary: binary.clone(),
            message: format!("process {} exited after writing its pid file", pid),
            log_tail: tail(log_path, LOG_TAIL_LINES),
        });
    }

    debug!(binary = %binary, pid, "server process is up");

    Ok(pid)
}

/// Send a signal to `pid`, reporting whether it was delivered. A pid that
/// no longer names a process is not an error.
pub fn signal(pid: u32, signal: Signal) -> Result<bool> {
    if unsafe { libc::kill(pid as libc::pid_t, signal.raw()) } == 0 {
        return Ok(true);
    }

    let error = std::io::Error::last_os_error();
    if error.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(error.into())
    }
}

/// Poll until `pid` no longer names a process, or fail with the tail of
/// `log_path` once `timeout` passes.
pub fn wait_for_exit(pid: u32, timeout: Duration, label: &str, log_path: &Path) -> Result<()> {
    let deadline = Instant::now() + timeout;

    loop {
        if !process_running(pid) {
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(Error::StopTimeout {
                label: label.into(),
                pid,
                timeout_secs: timeout.as_secs(),
                log_tail: tail(log_path, LOG_TAIL_LINES),
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

pub(crate) fn process_running(pid: u32) -> bool {
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }

    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn await_pid_file(binary: &str, pid_path: &Path, log_path: &Path) -> Result<u32> {
    let deadline = Instant::now() + PID_FILE_TIMEOUT;

    loop {
        // The file may exist before its contents; tolerate a read racing
        // the server's write.
        if let Ok(contents) = fs::read_to_string(pid_path) {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                return Ok(pid);
            }
        }

        if Instant::now() >= deadline {
            return Err(Error::Spawn {
                binary: binary.into(),
                message: format!("pid file {} never appeared", pid_path.display()),
                log_tail: tail(log_path, LOG_TAIL_LINES),
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Last `lines` lines of the file at `path`; empty when it cannot be read.
pub(crate) fn tail(path: &Path, lines: usize) -> String {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(..) => return String::new(),
    };

    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
