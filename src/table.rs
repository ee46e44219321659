//! The transition table: a sorted mapping from `(state, symbol)` pairs to
//! transitions. Tables remember the symbols they have ever mentioned (the
//! garbage collector walks those), the start state, and any comment lines
//! that sat directly above an entry in the source text so a saved table
//! keeps its annotations.

use crate::types::{Direction, MachineError, Transition};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// A deterministic single-tape transition table.
///
/// One branch of a state may be defined without the other; a missing
/// `(state, symbol)` entry halts the machine. Entries iterate in sorted
/// order, which keeps saved tables stable under load/save cycles.
///
/// Entries are stored per state so a lookup borrows the state name; the
/// engine calls `get` every step, and a keyed `(String, char)` map would
/// allocate on each of them.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionTable {
    start: String,
    entries: BTreeMap<String, BTreeMap<char, Transition>>,
    symbols: BTreeSet<char>,
    comments: HashMap<(String, char), Vec<String>>,
}

impl Default for TransitionTable {
    fn default() -> Self {
        TransitionTable {
            start: "0".to_string(),
            entries: BTreeMap::new(),
            symbols: BTreeSet::new(),
            comments: HashMap::new(),
        }
    }
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn set_start(&mut self, start: impl Into<String>) {
        self.start = start.into();
    }

    /// Inserts or replaces an entry, returning the previous transition if
    /// one existed. Both the read symbol and the written symbol are added
    /// to the table's symbol alphabet.
    pub fn insert(
        &mut self,
        state: impl Into<String>,
        symbol: char,
        transition: Transition,
    ) -> Option<Transition> {
        self.symbols.insert(symbol);
        self.symbols.insert(transition.write);
        self.entries
            .entry(state.into())
            .or_default()
            .insert(symbol, transition)
    }

    pub fn get(&self, state: &str, symbol: char) -> Option<&Transition> {
        self.entries.get(state)?.get(&symbol)
    }

    pub fn remove(&mut self, state: &str, symbol: char) -> Option<Transition> {
        self.comments.remove(&(state.to_string(), symbol));
        let row = self.entries.get_mut(state)?;
        let removed = row.remove(&symbol);
        if row.is_empty() {
            self.entries.remove(state);
        }
        removed
    }

    /// Attaches source comment lines to an entry. They are emitted directly
    /// above the entry when the table is saved.
    pub fn set_comments(&mut self, state: impl Into<String>, symbol: char, lines: Vec<String>) {
        self.comments.insert((state.into(), symbol), lines);
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, char, &Transition)> {
        self.entries.iter().flat_map(|(state, row)| {
            row.iter().map(move |(symbol, t)| (state.as_str(), *symbol, t))
        })
    }

    /// Every state that owns at least one entry, in sorted order.
    pub fn states(&self) -> BTreeSet<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn contains_state(&self, state: &str) -> bool {
        self.entries.contains_key(state)
    }

    /// The symbol alphabet seen so far.
    pub fn symbols(&self) -> &BTreeSet<char> {
        &self.symbols
    }

    /// Removes every entry whose state cannot be reached from the start
    /// state or from the given extra roots, following every defined entry.
    /// Returns the removed entries.
    pub fn gc(&mut self, extra_roots: &[&str]) -> Vec<(String, char, Transition)> {
        let mut grey: Vec<String> = vec![self.start.clone()];
        grey.extend(extra_roots.iter().map(|s| s.to_string()));
        let mut black: BTreeSet<String> = BTreeSet::new();

        while let Some(state) = grey.pop() {
            if !black.insert(state.clone()) {
                continue;
            }
            if let Some(row) = self.entries.get(&state) {
                for t in row.values() {
                    grey.push(t.next.clone());
                }
            }
        }

        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|state| !black.contains(*state))
            .cloned()
            .collect();

        let mut removed = Vec::new();
        for state in doomed {
            if let Some(row) = self.entries.remove(&state) {
                for (symbol, t) in row {
                    self.comments.remove(&(state.clone(), symbol));
                    removed.push((state.clone(), symbol, t));
                }
            }
        }
        removed
    }

    /// Renders the table in its text format: a `#! start` directive followed
    /// by the entries in sorted order, each preceded by its comments.
    pub fn save_to_string(&self) -> String {
        let mut out = format!("#! start {}\n", self.start);
        for (state, symbol, t) in self.iter() {
            if let Some(lines) = self.comments.get(&(state.to_string(), symbol)) {
                for line in lines {
                    out.push_str(line);
                    out.push('\n');
                }
            }
            out.push_str(&format!(
                "{} {} {} {} {}\n",
                state,
                symbol,
                t.write,
                t.direction.letter(),
                t.next
            ));
        }
        out
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), MachineError> {
        fs::write(path, self.save_to_string()).map_err(|e| {
            MachineError::File(format!("failed to write {}: {}", path.display(), e))
        })
    }
}

/// Convenience constructor used throughout the compiler.
pub fn transition(write: char, direction: Direction, next: impl Into<String>) -> Transition {
    Transition::new(write, direction, next)
}
