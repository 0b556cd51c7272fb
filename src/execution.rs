use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read};
use std::iter;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::ptr::null;

use libc::{c_char, c_int, pid_t, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use tracing::{debug, trace};

use crate::error::ShellError;

/// Exit status reported for a child whose `exec` failed.
const EXEC_FAILED: c_int = 127;

/// The input and output of the running session.
///
/// The first pipeline stage reads from `input`; the final stage and all
/// in-process builtins write to `output`.
pub(crate) struct Streams {
    pub(crate) input: OwnedFd,
    pub(crate) output: File,
}

impl Streams {
    pub(crate) fn inherit() -> io::Result<Self> {
        Ok(Self {
            input: io::stdin().as_fd().try_clone_to_owned()?,
            output: File::from(io::stdout().as_fd().try_clone_to_owned()?),
        })
    }
}

/// An argument vector converted for `execvp`.
///
/// Arguments are raw bytes; only an interior NUL is rejected.
#[derive(Debug)]
pub(crate) struct Command {
    argv: Vec<CString>,
}

impl Command {
    pub(crate) fn new<A: AsRef<[u8]>>(argv: &[A]) -> Result<Self, ShellError> {
        if argv.is_empty() {
            return Err(ShellError::EmptyCommand);
        }

        let mut converted = Vec::new();
        converted.try_reserve_exact(argv.len())?;
        for arg in argv {
            converted.push(CString::new(arg.as_ref())?);
        }

        Ok(Self { argv: converted })
    }

    pub(crate) fn program(&self) -> String {
        self.argv[0].to_string_lossy().into_owned()
    }

    fn pointers(&self) -> Vec<*const c_char> {
        self.argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(iter::once(null()))
            .collect()
    }
}

/// What a forked child does once its descriptors are in place.
pub(crate) enum Program<'a> {
    Exec(&'a Command),
    /// Write the bytes to stdout and exit, used for builtins inside a pipeline.
    Emit(&'a [u8]),
}

/// Descriptor wiring for one child. `None` keeps the shell's own descriptor.
#[derive(Default)]
pub(crate) struct StageIo<'a> {
    pub(crate) stdin: Option<BorrowedFd<'a>>,
    pub(crate) stdout: Option<BorrowedFd<'a>>,
    pub(crate) stderr: Option<BorrowedFd<'a>>,
    /// Closed in the child before anything else, e.g. the read end of its own output pipe.
    pub(crate) unused: Option<BorrowedFd<'a>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitStatus {
    Exited(c_int),
    Signaled(c_int),
    Stopped(c_int),
}

impl ExitStatus {
    fn from_raw(status: c_int) -> Self {
        if libc::WIFEXITED(status) {
            ExitStatus::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        } else {
            ExitStatus::Stopped(libc::WSTOPSIG(status))
        }
    }

    pub(crate) fn code(self) -> Option<c_int> {
        match self {
            ExitStatus::Exited(code) => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Child {
    pid: pid_t,
}

impl Child {
    pub(crate) fn pid(&self) -> pid_t {
        self.pid
    }

    pub(crate) fn wait(self) -> Result<ExitStatus, ShellError> {
        waitpid(self.pid, 0)
    }

    /// Like [`Child::wait`], but also returns when the child is stopped.
    pub(crate) fn wait_untraced(self) -> Result<ExitStatus, ShellError> {
        waitpid(self.pid, libc::WUNTRACED)
    }
}

/// Creates a close-on-exec pipe, returning `(read_end, write_end)`.
pub(crate) fn pipe() -> Result<(OwnedFd, OwnedFd), ShellError> {
    let mut filedes: [c_int; 2] = [-1, -1];

    match unsafe { libc::pipe2(filedes.as_mut_ptr(), libc::O_CLOEXEC) } {
        -1 => Err(ShellError::last_os_error("pipe")),
        _ => Ok(unsafe {
            (
                OwnedFd::from_raw_fd(filedes[0]),
                OwnedFd::from_raw_fd(filedes[1]),
            )
        }),
    }
}

/// Forks a child wired according to `io` and runs `program` in it.
///
/// An `exec` failure is sent back through a close-on-exec pipe, so it is
/// returned here as [`ShellError::Exec`] after the child has been reaped.
pub(crate) fn spawn(program: Program<'_>, io: &StageIo<'_>) -> Result<Child, ShellError> {
    let (report_rx, report_tx) = pipe()?;
    let argv = match &program {
        Program::Exec(command) => command.pointers(),
        Program::Emit(_) => Vec::new(),
    };

    let pid = unsafe { libc::fork() };
    match pid {
        -1 => Err(ShellError::last_os_error("fork")),
        0 => {
            drop(report_rx);
            unsafe { run_child(&program, io, &argv, report_tx) }
        }
        _ => {
            drop(report_tx);

            let mut errno = [0u8; 4];
            match File::from(report_rx).read_exact(&mut errno) {
                Ok(()) => {
                    let program = match program {
                        Program::Exec(command) => command.program(),
                        Program::Emit(_) => String::new(),
                    };
                    let status = waitpid(pid, 0)?;
                    trace!(pid, ?status, "reaped child after failed exec");

                    Err(ShellError::Exec {
                        program,
                        errno: c_int::from_ne_bytes(errno),
                    })
                }
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(pid, "spawned child");
                    Ok(Child { pid })
                }
                Err(err) => Err(ShellError::Syscall {
                    call: "read",
                    source: err,
                }),
            }
        }
    }
}

/// Body of the forked child. Never returns.
///
/// Only async-signal-safe calls are made here: every allocation the child
/// needs happened before the fork.
unsafe fn run_child(
    program: &Program<'_>,
    io: &StageIo<'_>,
    argv: &[*const c_char],
    report: OwnedFd,
) -> ! {
    if let Some(fd) = io.unused {
        libc::close(fd.as_raw_fd());
    }

    let wiring = [
        (io.stdin, STDIN_FILENO),
        (io.stdout, STDOUT_FILENO),
        (io.stderr, STDERR_FILENO),
    ];
    for (source, target) in wiring.iter() {
        if let Some(fd) = source {
            if fd.as_raw_fd() != *target && libc::dup2(fd.as_raw_fd(), *target) == -1 {
                libc::_exit(EXEC_FAILED);
            }
        }
    }
    for (source, _) in wiring.iter() {
        if let Some(fd) = source {
            if fd.as_raw_fd() > STDERR_FILENO {
                libc::close(fd.as_raw_fd());
            }
        }
    }

    match program {
        Program::Emit(bytes) => {
            let status = if write_all_raw(STDOUT_FILENO, bytes) { 0 } else { 1 };
            libc::_exit(status)
        }
        Program::Exec(_) => {
            // the shell ignores SIGPIPE; the programs it starts should not
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
            libc::execvp(argv[0], argv.as_ptr());

            let errno = io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(libc::ENOENT);
            write_all_raw(report.as_raw_fd(), &errno.to_ne_bytes());
            libc::_exit(EXEC_FAILED)
        }
    }
}

fn write_all_raw(fd: c_int, mut bytes: &[u8]) -> bool {
    while !bytes.is_empty() {
        let written = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if written < 0 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return false;
        }
        bytes = &bytes[written as usize..];
    }
    true
}

fn waitpid(pid: pid_t, options: c_int) -> Result<ExitStatus, ShellError> {
    let mut status: c_int = 0;

    loop {
        if unsafe { libc::waitpid(pid, &mut status, options) } != -1 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(ShellError::Syscall {
                call: "waitpid",
                source: err,
            });
        }
    }

    let status = ExitStatus::from_raw(status);
    trace!(pid, ?status, "child changed state");
    Ok(status)
}


#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Read;
    use std::os::unix::io::AsFd;

    use super::testing::{captured, captured_bytes, streams};
    use super::{pipe, spawn, Command, ExitStatus, Program, StageIo};
    use crate::error::ShellError;

    #[test]
    fn test_command_rejects_empty_argv() {
        assert!(matches!(
            Command::new::<&str>(&[]),
            Err(ShellError::EmptyCommand)
        ));
    }

    #[test]
    fn test_command_rejects_nul_byte() {
        assert!(matches!(
            Command::new(&["echo", "a\0b"]),
            Err(ShellError::NulByte(_))
        ));
    }

    #[test]
    fn test_command_accepts_non_utf8_bytes() -> Result<(), ShellError> {
        let (streams, mut reader) = streams();
        let command = Command::new(&[&b"printf"[..], &b"ok\xff"[..]])?;
        let io = StageIo {
            stdout: Some(streams.output.as_fd()),
            ..StageIo::default()
        };

        spawn(Program::Exec(&command), &io)?.wait()?;

        assert_eq!(captured_bytes(&mut reader), b"ok\xff");
        Ok(())
    }

    #[test]
    fn test_spawn_reports_exit_code() -> Result<(), ShellError> {
        let command = Command::new(&["sh", "-c", "exit 3"])?;
        let status = spawn(Program::Exec(&command), &StageIo::default())?.wait()?;

        assert_eq!(status, ExitStatus::Exited(3));
        assert_eq!(status.code(), Some(3));
        Ok(())
    }

    #[test]
    fn test_spawn_unknown_program_fails_with_exec_error() {
        let command = Command::new(&["pipesh-no-such-program"]).unwrap();
        let result = spawn(Program::Exec(&command), &StageIo::default());

        match result {
            Err(ShellError::Exec { program, errno }) => {
                assert_eq!(program, "pipesh-no-such-program");
                assert_eq!(errno, libc::ENOENT);
            }
            other => panic!("expected exec error, got {:?}", other),
        }
    }

    #[test]
    fn test_emit_writes_into_pipe() -> Result<(), ShellError> {
        let (read_end, write_end) = pipe()?;
        let io = StageIo {
            stdout: Some(write_end.as_fd()),
            unused: Some(read_end.as_fd()),
            ..StageIo::default()
        };

        let child = spawn(Program::Emit(b"ls\ncd /tmp\n"), &io)?;
        drop(write_end);
        assert_eq!(child.wait()?, ExitStatus::Exited(0));

        let mut text = String::new();
        File::from(read_end).read_to_string(&mut text)?;
        assert_eq!(text, "ls\ncd /tmp\n");
        Ok(())
    }

    #[test]
    fn test_exec_binds_stdin_and_stdout() -> Result<(), ShellError> {
        let (streams, mut reader) = super::testing::streams_with_input(b"from input\n");
        let command = Command::new(&["cat"])?;
        let io = StageIo {
            stdin: Some(streams.input.as_fd()),
            stdout: Some(streams.output.as_fd()),
            ..StageIo::default()
        };

        spawn(Program::Exec(&command), &io)?.wait()?;

        assert_eq!(captured(&mut reader), "from input\n");
        Ok(())
    }

    #[test]
    fn test_killed_child_is_signaled() -> Result<(), ShellError> {
        let (streams, _reader) = streams();
        let command = Command::new(&["sh", "-c", "kill -9 $$"])?;
        let io = StageIo {
            stdout: Some(streams.output.as_fd()),
            ..StageIo::default()
        };

        let status = spawn(Program::Exec(&command), &io)?.wait()?;

        assert_eq!(status, ExitStatus::Signaled(libc::SIGKILL));
        assert_eq!(status.code(), None);
        Ok(())
    }
}
