use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::{self, ShellError};
use crate::execution::Streams;
use crate::history::HistoryLog;
use crate::parser;
use crate::pipeline;

pub(crate) const PROMPT: &str = "MTL458 > ";

/// State that outlives a single command line.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) history: HistoryLog,
    /// Directory left by the last successful `cd`, consulted by `cd -`.
    pub(crate) previous_dir: Option<PathBuf>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Exit,
}

pub(crate) struct Session {
    state: SessionState,
    streams: Streams,
}

impl Session {
    pub(crate) fn new(streams: Streams) -> Self {
        Self {
            state: SessionState::new(),
            streams,
        }
    }

    /// Prompts for and executes lines until `exit` or end of input.
    ///
    /// Lines are raw bytes and need not be valid UTF-8.
    pub(crate) fn run<R: BufRead>(&mut self, mut input: R) -> io::Result<()> {
        let mut line = Vec::new();

        loop {
            self.streams.output.write_all(PROMPT.as_bytes())?;
            self.streams.output.flush()?;

            line.clear();
            match input.read_until(b'\n', &mut line) {
                Ok(0) => {
                    debug!("end of input");
                    return Ok(());
                }
                Ok(_) => {
                    if self.submit(&line) == Flow::Exit {
                        return Ok(());
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => error::report(&mut self.streams.output, &ShellError::Io(err)),
            }
        }
    }

    pub(crate) fn submit(&mut self, line: &[u8]) -> Flow {
        let line = parser::trim(line);
        if line.is_empty() {
            return Flow::Continue;
        }
        if line == b"exit" {
            return Flow::Exit;
        }

        if let Err(err) = self.state.history.record(line) {
            error::report(&mut self.streams.output, &err);
            return Flow::Continue;
        }
        trace!(
            line = %String::from_utf8_lossy(line),
            entries = self.state.history.len(),
            "recorded"
        );

        if let Err(err) = pipeline::run_line(line, &mut self.state, &mut self.streams) {
            error::report(&mut self.streams.output, &err);
        }
        Flow::Continue
    }
}
