use std::io::{self, Write};

use crate::error::ShellError;

const INITIAL_CAPACITY: usize = 100;

/// Submitted command lines, oldest first.
///
/// The backing storage starts at [`INITIAL_CAPACITY`] entries and doubles
/// whenever it is full. Growth is fallible: an allocation failure is returned
/// to the caller instead of aborting the shell.
#[derive(Debug, Default)]
pub(crate) struct HistoryLog {
    entries: Vec<Vec<u8>>,
}

impl HistoryLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, line: &[u8]) -> Result<(), ShellError> {
        if self.entries.len() == self.entries.capacity() {
            let additional = self.entries.capacity().max(INITIAL_CAPACITY);
            self.entries.try_reserve_exact(additional)?;
        }

        let mut entry = Vec::new();
        entry.try_reserve_exact(line.len())?;
        entry.extend_from_slice(line);
        self.entries.push(entry);

        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(Vec::as_slice)
    }

    pub(crate) fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        for entry in self.iter() {
            out.write_all(entry)?;
            out.write_all(b"\n")?;
        }
        out.flush()
    }

    /// The bytes `write_to` would produce, prepared ahead of a fork.
    pub(crate) fn render(&self) -> Vec<u8> {
        let mut rendered = Vec::new();
        for entry in self.iter() {
            rendered.extend_from_slice(entry);
            rendered.push(b'\n');
        }
        rendered
    }
}
