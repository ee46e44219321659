//! Loads transition tables from their text format. Loading is line by line
//! and forgiving: a malformed line is reported with its line number and
//! skipped, so one typo does not cost the whole file.

use crate::machine::Tape;
use crate::parser::{parse_line, Directive, Line};
use crate::table::TransitionTable;
use crate::types::{MachineError, DEFAULT_FILL_SYMBOL};
use std::fs;
use std::mem;
use std::path::Path;

/// A per-line diagnostic gathered while loading.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    pub line: usize,
    pub message: String,
}

/// Everything a table file produces: the table itself, the tape preimage
/// seeded by `#! write` directives, and any diagnostics.
#[derive(Debug)]
pub struct LoadReport {
    pub table: TransitionTable,
    pub tape: Tape,
    pub errors: Vec<LineError>,
}

/// Incremental loader. Feed it lines in order, then call `finish`.
///
/// Comment lines accumulate and attach to the next transition; a blank line
/// discards the accumulation, so only comments directly above an entry
/// travel with it. Directives are transparent to comment anchoring.
pub struct Loader {
    table: TransitionTable,
    tape: Tape,
    pending_comments: Vec<String>,
    errors: Vec<LineError>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Loader {
            table: TransitionTable::new(),
            tape: Tape::new(DEFAULT_FILL_SYMBOL),
            pending_comments: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Loads a whole table from a string.
    pub fn load_str(text: &str) -> LoadReport {
        let mut loader = Loader::new();
        for (index, line) in text.lines().enumerate() {
            loader.line(line, index + 1);
        }
        loader.finish()
    }

    /// Loads a whole table from a file.
    pub fn load_file(path: &Path) -> Result<LoadReport, MachineError> {
        let content = fs::read_to_string(path).map_err(|e| {
            MachineError::File(format!("failed to read {}: {}", path.display(), e))
        })?;
        Ok(Self::load_str(&content))
    }

    /// Feeds one source line.
    pub fn line(&mut self, text: &str, number: usize) {
        match parse_line(text) {
            Err(e) => self.errors.push(LineError {
                line: number,
                message: e.to_string(),
            }),
            Ok(Line::Blank) => self.pending_comments.clear(),
            Ok(Line::Comment(comment)) => self.pending_comments.push(comment),
            Ok(Line::Transition {
                state,
                symbol,
                transition,
            }) => {
                self.table.insert(state.clone(), symbol, transition);
                if !self.pending_comments.is_empty() {
                    let comments = mem::take(&mut self.pending_comments);
                    self.table.set_comments(state, symbol, comments);
                }
            }
            Ok(Line::Directive(directive)) => self.directive(directive, number),
        }
    }

    fn directive(&mut self, directive: Directive, number: usize) {
        match directive {
            Directive::Start(state) => self.table.set_start(state),
            Directive::Fill(symbol) => self.tape.set_fill(symbol),
            Directive::Write {
                offset,
                right_aligned,
                symbols,
            } => {
                let count = symbols.chars().count() as i64;
                let base = if right_aligned {
                    offset - count + 1
                } else {
                    offset
                };
                for (i, symbol) in symbols.chars().enumerate() {
                    self.tape.write(base + i as i64, symbol);
                }
            }
            Directive::Delete { state, symbol } => {
                if self.table.remove(&state, symbol).is_none() {
                    self.errors.push(LineError {
                        line: number,
                        message: format!("delete: no entry for state '{}' symbol '{}'", state, symbol),
                    });
                }
            }
        }
    }

    /// Finishes loading and hands back the table, tape, and diagnostics.
    pub fn finish(self) -> LoadReport {
        LoadReport {
            table: self.table,
            tape: self.tape,
            errors: self.errors,
        }
    }
}
