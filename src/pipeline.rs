use std::os::unix::io::{AsFd, OwnedFd};

use tracing::debug;

use crate::builtins::{self, Builtin, Handler};
use crate::error::{self, ShellError};
use crate::execution::{pipe, spawn, Command, Program, StageIo, Streams};
use crate::parser::{split_pipeline, tokenize};
use crate::session::SessionState;

/// Runs every stage of `line`, one after the other.
///
/// Each non-final stage writes into a fresh pipe and is waited for before the
/// next stage starts, so at most one stage runs at a time. The read end of
/// that pipe becomes the next stage's input. The final stage goes through
/// [`builtins::dispatch`], and its failure is the one returned here.
///
/// A failing intermediate stage is reported on the session output and the
/// remaining stages still run on whatever it produced.
pub(crate) fn run_line(
    line: &[u8],
    state: &mut SessionState,
    streams: &mut Streams,
) -> Result<(), ShellError> {
    let segments = split_pipeline(line);
    let (last, upstream) = segments.split_last().ok_or(ShellError::EmptyCommand)?;

    let mut input: Option<OwnedFd> = None;
    for (index, segment) in upstream.iter().enumerate() {
        let (read_end, write_end) = pipe()?;

        if let Err(err) = run_stage(segment, input.as_ref(), &read_end, write_end, state, streams)
        {
            debug!(stage = index, "pipeline stage failed");
            error::report(&mut streams.output, &err);
        }

        input = Some(read_end);
    }

    let argv = tokenize(last);
    if argv.is_empty() {
        return Err(ShellError::EmptyCommand);
    }
    builtins::dispatch(&argv, input, state, streams)
}

fn run_stage(
    segment: &[u8],
    input: Option<&OwnedFd>,
    read_end: &OwnedFd,
    write_end: OwnedFd,
    state: &SessionState,
    streams: &Streams,
) -> Result<(), ShellError> {
    let argv = tokenize(segment);
    let name = *argv.first().ok_or(ShellError::EmptyCommand)?;

    let io = StageIo {
        stdin: Some(input.unwrap_or(&streams.input).as_fd()),
        stdout: Some(write_end.as_fd()),
        stderr: None,
        unused: Some(read_end.as_fd()),
    };

    let child = match builtins::lookup(name) {
        Handler::InProcess(Builtin::History) => {
            let rendered = state.history.render();
            spawn(Program::Emit(&rendered), &io)?
        }
        _ => {
            let command = Command::new(&argv)?;
            spawn(Program::Exec(&command), &io)?
        }
    };
    drop(write_end);

    let status = child.wait()?;
    debug!(
        stage = %String::from_utf8_lossy(segment).trim(),
        ?status,
        code = ?status.code(),
        "pipeline stage finished"
    );
    Ok(())
}
