//! Output renderer
//!
//! Human mode buffers list records into one table (printed by
//! [`Renderer::finish`]), prints views as a summary block and follow records
//! as one line each. Structured mode writes every record as its own JSON line
//! and flushes immediately, so whatever was emitted before a failure stays
//! parseable. Only records reach this writer; diagnostics go to stderr.

mod json;
mod table;

pub use json::JsonLinesFormatter;
pub use table::TableFormatter;

use std::io::{self, Write};

use crate::records::NormalizedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Structured,
}

#[derive(Debug, Clone)]
pub struct RecordTable {
    pub columns: &'static [&'static str],
    pub rows: Vec<Vec<String>>,
}

pub struct Renderer<W: Write> {
    mode: OutputMode,
    out: W,
    /// Buffered human-mode list
    table: Option<RecordTable>,
    emitted: usize,
}

impl<W: Write> Renderer<W> {
    pub fn new(mode: OutputMode, out: W) -> Self {
        Self {
            mode,
            out,
            table: None,
            emitted: 0,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Records handed to the renderer so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn write_json(&mut self, record: &NormalizedRecord) -> io::Result<()> {
        let line = JsonLinesFormatter::format(record)?;
        writeln!(self.out, "{}", line)?;
        self.out.flush()
    }

    /// One record of a bounded list
    pub fn list_item(&mut self, record: &NormalizedRecord) -> io::Result<()> {
        self.emitted += 1;
        match self.mode {
            OutputMode::Structured => self.write_json(record),
            OutputMode::Human => {
                let table = self.table.get_or_insert_with(|| RecordTable {
                    columns: record.columns(),
                    rows: Vec::new(),
                });
                table.rows.push(record.cells());
                Ok(())
            }
        }
    }

    /// A single item (`view`, `stats`, mutation outcomes)
    pub fn view(&mut self, record: &NormalizedRecord) -> io::Result<()> {
        self.emitted += 1;
        match self.mode {
            OutputMode::Structured => self.write_json(record),
            OutputMode::Human => {
                writeln!(self.out, "{}", TableFormatter::format_summary(&record.summary()))?;
                self.out.flush()
            }
        }
    }

    /// A record of a follow session, printed as soon as it arrives
    pub fn stream_item(&mut self, record: &NormalizedRecord) -> io::Result<()> {
        self.emitted += 1;
        match self.mode {
            OutputMode::Structured => self.write_json(record),
            OutputMode::Human => {
                writeln!(self.out, "{}", record.line())?;
                self.out.flush()
            }
        }
    }

    /// Print the buffered human table; `columns` heads an empty result
    pub fn finish(&mut self, columns: &'static [&'static str]) -> io::Result<()> {
        if self.mode == OutputMode::Structured {
            return self.out.flush();
        }
        let table = self.table.take().unwrap_or(RecordTable {
            columns,
            rows: Vec::new(),
        });
        writeln!(self.out, "{}", TableFormatter::format(&table))?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
