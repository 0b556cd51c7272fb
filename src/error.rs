use std::collections::TryReserveError;
use std::ffi::{CStr, NulError};
use std::io::{self, Write};
use std::path::PathBuf;

use libc::{c_int, pid_t};
use thiserror::Error;
use tracing::{debug, warn};

/// The single line shown for every failure except a failed `cat` open.
pub(crate) const DIAGNOSTIC: &str = "Invalid Command";

#[derive(Debug, Error)]
pub(crate) enum ShellError {
    #[error("empty command")]
    EmptyCommand,

    #[error("{0}: missing operand")]
    MissingOperand(&'static str),

    #[error("{0}: too many arguments")]
    TooManyArguments(&'static str),

    #[error("dd: operands must be if=<path> of=<path>")]
    DdOperands,

    #[error("cd: HOME not set")]
    HomeNotSet,

    #[error("cd: no previous directory")]
    NoPreviousDirectory,

    #[error("cd: {}: {source}", .path.display())]
    ChangeDirectory { path: PathBuf, source: io::Error },

    #[error("cat: {}: {}", .path.display(), os_message(.source))]
    Open { path: PathBuf, source: io::Error },

    #[error("{program}: {}", strerror(*.errno))]
    Exec { program: String, errno: c_int },

    #[error("{call}: {source}")]
    Syscall {
        call: &'static str,
        source: io::Error,
    },

    #[error("{program} exited with status {code}")]
    ExitStatus { program: &'static str, code: c_int },

    #[error("{program} (pid {pid}) was stopped by signal {signal}")]
    Stopped {
        program: String,
        pid: pid_t,
        signal: c_int,
    },

    #[error("ls wrote to stderr: {0}")]
    Stderr(String),

    #[error("argument contains a NUL byte")]
    NulByte(#[from] NulError),

    #[error("out of memory")]
    OutOfMemory(#[from] TryReserveError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ShellError {
    pub(crate) fn last_os_error(call: &'static str) -> Self {
        ShellError::Syscall {
            call,
            source: io::Error::last_os_error(),
        }
    }

    /// Text of the line shown to the user for this error.
    pub(crate) fn diagnostic(&self) -> String {
        match self {
            ShellError::Open { source, .. } => format!("cat: {}", os_message(source)),
            _ => DIAGNOSTIC.to_owned(),
        }
    }
}

/// Writes the diagnostic line for `err` to the session output.
pub(crate) fn report(out: &mut dyn Write, err: &ShellError) {
    debug!(error = %err, "command failed");

    if let Err(write_err) = writeln!(out, "{}", err.diagnostic()) {
        warn!(error = %write_err, "could not write diagnostic");
    }
}

pub(crate) fn strerror(errno: c_int) -> String {
    unsafe { CStr::from_ptr(libc::strerror(errno)) }
        .to_string_lossy()
        .into_owned()
}

fn os_message(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(errno) => strerror(errno),
        None => err.to_string(),
    }
}
