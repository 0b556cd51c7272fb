use std::env;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ShellError;
use crate::execution::{pipe, spawn, Command, ExitStatus, Program, StageIo, Streams};
use crate::session::SessionState;

/// Builtins that run inside the shell process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Cd,
    History,
    Cat,
}

/// External utilities the shell starts itself, each with its own notion of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wrapper {
    Dd,
    Grep,
    Ls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handler {
    InProcess(Builtin),
    Wrapped(Wrapper),
    External,
}

const HANDLERS: [(&str, Handler); 6] = [
    ("cd", Handler::InProcess(Builtin::Cd)),
    ("history", Handler::InProcess(Builtin::History)),
    ("cat", Handler::InProcess(Builtin::Cat)),
    ("dd", Handler::Wrapped(Wrapper::Dd)),
    ("grep", Handler::Wrapped(Wrapper::Grep)),
    ("ls", Handler::Wrapped(Wrapper::Ls)),
];

pub(crate) fn lookup(name: &[u8]) -> Handler {
    HANDLERS
        .iter()
        .find(|(builtin, _)| builtin.as_bytes() == name)
        .map_or(Handler::External, |(_, handler)| *handler)
}

/// Runs the final stage of a pipeline.
///
/// `input` is the read end left by the previous stage, or `None` when the
/// stage should read the session input.
pub(crate) fn dispatch(
    argv: &[&[u8]],
    input: Option<OwnedFd>,
    state: &mut SessionState,
    streams: &mut Streams,
) -> Result<(), ShellError> {
    let name = *argv.first().ok_or(ShellError::EmptyCommand)?;
    let handler = lookup(name);
    debug!(?handler, program = %String::from_utf8_lossy(name), "dispatching");

    match handler {
        Handler::InProcess(builtin) => {
            drop(input);
            let out = &mut streams.output;
            match builtin {
                Builtin::Cd => change_directory(&argv[1..], state, out),
                Builtin::History => Ok(state.history.write_to(out)?),
                Builtin::Cat => cat(&argv[1..], out),
            }
        }
        Handler::Wrapped(Wrapper::Dd) => dd(argv, streams),
        Handler::Wrapped(Wrapper::Grep) => grep(argv, input, streams),
        Handler::Wrapped(Wrapper::Ls) => ls(argv, input, streams),
        Handler::External => external(argv, input, streams),
    }
}

fn change_directory(
    args: &[&[u8]],
    state: &mut SessionState,
    out: &mut dyn Write,
) -> Result<(), ShellError> {
    let current = env::current_dir()?;

    let (target, announce) = match args.first().copied() {
        None | Some(b"~") => (
            env::var_os("HOME")
                .map(PathBuf::from)
                .ok_or(ShellError::HomeNotSet)?,
            false,
        ),
        Some(b"-") => (
            state
                .previous_dir
                .clone()
                .ok_or(ShellError::NoPreviousDirectory)?,
            true,
        ),
        Some(path) => (PathBuf::from(OsStr::from_bytes(path)), false),
    };

    env::set_current_dir(&target).map_err(|source| ShellError::ChangeDirectory {
        path: target.clone(),
        source,
    })?;
    state.previous_dir = Some(current);

    if announce {
        writeln!(out, "{}", target.display())?;
    }
    Ok(())
}

/// Copies one file to `out`, followed by a newline.
///
/// Only a failed open is an error. A read error, such as the operand being a
/// directory, ends the copy early and the newline is still written.
fn cat(args: &[&[u8]], out: &mut dyn Write) -> Result<(), ShellError> {
    let path = match args {
        [] => return Err(ShellError::MissingOperand("cat")),
        [path] => PathBuf::from(OsStr::from_bytes(path)),
        _ => return Err(ShellError::TooManyArguments("cat")),
    };

    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(source) => return Err(ShellError::Open { path, source }),
    };

    let mut buf = [0u8; 8192];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => out.write_all(&buf[..read])?,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                debug!(error = %err, path = %path.display(), "cat stopped reading");
                break;
            }
        }
    }
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn dd(argv: &[&[u8]], streams: &Streams) -> Result<(), ShellError> {
    match argv.get(1..3) {
        Some([input, output]) if input.starts_with(b"if=") && output.starts_with(b"of=") => {}
        _ => return Err(ShellError::DdOperands),
    }

    let command = Command::new(argv)?;
    let null = File::options().write(true).open("/dev/null")?;
    let io = StageIo {
        stdin: Some(streams.input.as_fd()),
        stdout: Some(null.as_fd()),
        stderr: Some(null.as_fd()),
        ..StageIo::default()
    };

    match spawn(Program::Exec(&command), &io)?.wait()? {
        ExitStatus::Exited(0) => Ok(()),
        ExitStatus::Exited(code) => Err(ShellError::ExitStatus { program: "dd", code }),
        status => {
            debug!(?status, "dd did not exit normally");
            Ok(())
        }
    }
}

fn grep(argv: &[&[u8]], input: Option<OwnedFd>, streams: &Streams) -> Result<(), ShellError> {
    if argv.len() < 2 {
        return Err(ShellError::MissingOperand("grep"));
    }

    let command = Command::new(argv)?;
    let io = StageIo {
        stdin: Some(stage_input(&input, streams)),
        stdout: Some(streams.output.as_fd()),
        ..StageIo::default()
    };

    let child = spawn(Program::Exec(&command), &io)?;
    drop(input);

    match child.wait()? {
        // 1 means no line matched
        ExitStatus::Exited(0) | ExitStatus::Exited(1) => Ok(()),
        ExitStatus::Exited(code) => Err(ShellError::ExitStatus {
            program: "grep",
            code,
        }),
        status => {
            debug!(?status, "grep did not exit normally");
            Ok(())
        }
    }
}

fn ls(argv: &[&[u8]], input: Option<OwnedFd>, streams: &Streams) -> Result<(), ShellError> {
    let command = Command::new(argv)?;
    let (errors_rx, errors_tx) = pipe()?;
    let io = StageIo {
        stdin: Some(stage_input(&input, streams)),
        stdout: Some(streams.output.as_fd()),
        stderr: Some(errors_tx.as_fd()),
        unused: Some(errors_rx.as_fd()),
    };

    let child = spawn(Program::Exec(&command), &io)?;
    drop(errors_tx);
    drop(input);

    let mut errors = Vec::new();
    File::from(errors_rx).read_to_end(&mut errors)?;
    let status = child.wait()?;

    ls_outcome(status, &errors)
}

/// `ls` failed if it exited non-zero or wrote anything to stderr.
fn ls_outcome(status: ExitStatus, errors: &[u8]) -> Result<(), ShellError> {
    match status {
        ExitStatus::Exited(code) if code != 0 => Err(ShellError::ExitStatus {
            program: "ls",
            code,
        }),
        _ if !errors.is_empty() => Err(ShellError::Stderr(
            String::from_utf8_lossy(errors).trim_end().to_owned(),
        )),
        _ => Ok(()),
    }
}

fn external(argv: &[&[u8]], input: Option<OwnedFd>, streams: &Streams) -> Result<(), ShellError> {
    let command = Command::new(argv)?;
    let io = StageIo {
        stdin: Some(stage_input(&input, streams)),
        stdout: Some(streams.output.as_fd()),
        ..StageIo::default()
    };

    let child = spawn(Program::Exec(&command), &io)?;
    let pid = child.pid();
    drop(input);

    // a stopped child is reported and left as is
    match child.wait_untraced()? {
        ExitStatus::Stopped(signal) => {
            trace!(pid, signal, "external command stopped");
            Err(ShellError::Stopped {
                program: command.program(),
                pid,
                signal,
            })
        }
        status => {
            debug!(?status, program = %command.program(), "external command finished");
            Ok(())
        }
    }
}

fn stage_input<'a>(input: &'a Option<OwnedFd>, streams: &'a Streams) -> BorrowedFd<'a> {
    match input {
        Some(fd) => fd.as_fd(),
        None => streams.input.as_fd(),
    }
}
