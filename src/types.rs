//! Core data structures shared by the compiler and the execution engine:
//! transitions, step outcomes, and the crate's error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Rule;

/// Fill symbol a fresh tape is padded with unless a `#! fill` directive
/// overrides it.
pub const DEFAULT_FILL_SYMBOL: char = '0';
/// The distinguished halt state. It carries no transitions of its own, so
/// the machine stops on the step after entering it.
pub const HALT_STATE: &str = "halt";
/// Default step budget for `Machine::run`. Compiled machines spend most of
/// their steps shuttling between the program counter and the register file,
/// so budgets need to be generous.
pub const DEFAULT_STEP_LIMIT: usize = 100_000_000;

/// Head movement. The table format has no stay move; every transition
/// shifts the head one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    /// The single-letter form used by the table text format.
    pub fn letter(&self) -> char {
        match self {
            Direction::Left => 'L',
            Direction::Right => 'R',
        }
    }
}

/// A single table entry: what to write, where to move, which state comes next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub write: char,
    pub direction: Direction,
    pub next: String,
}

impl Transition {
    pub fn new(write: char, direction: Direction, next: impl Into<String>) -> Self {
        Transition {
            write,
            direction,
            next: next.into(),
        }
    }
}

/// The outcome of a single machine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The machine performed a step and can keep going.
    Continue,
    /// The head just moved onto never-written fill under a transition that
    /// re-enters the same state in the same direction. The machine would
    /// walk the fill forever.
    Looping,
    /// No transition is defined for the current state and symbol.
    Halted,
}

/// The outcome of running a machine under a step budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Halted { steps: usize },
    Looping { steps: usize },
    StepLimit { steps: usize },
}

/// Errors raised while parsing or loading transition tables.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MachineError {
    /// The line did not match the table grammar.
    #[error("parse error: {0}")]
    Parse(#[from] Box<pest::error::Error<Rule>>),
    /// The line parsed but its content is unusable, e.g. a multi-character
    /// fill symbol or an unknown directive.
    #[error("{0}")]
    Malformed(String),
    /// A file could not be read or written.
    #[error("file error: {0}")]
    File(String),
}

/// Errors raised while building a program or generating its machine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("register name '{0}' is empty or contains whitespace")]
    BadRegisterName(String),
    /// Two-phase register traffic cannot read and write the same register
    /// in one primitive, so output registers must be distinct from inputs.
    #[error("output register '{0}' may not alias an input register")]
    AliasedRegisters(String),
    #[error("{0} requires a non-empty body")]
    EmptyBody(&'static str),
    /// A break or continue marker survived every label that could have
    /// claimed it.
    #[error("control label '{0}' escaped resolution")]
    UnresolvedLabel(String),
    #[error("label resolution crossed a sequence with {0} children; control depth is only defined over binary sequences")]
    NonBinarySequence(usize),
    #[error("state name '{0}' is claimed by two distinct sequences")]
    DuplicateStateName(String),
    #[error("a program needs at least one register")]
    NoRegisters,
    #[error("the program root must be a sequence of two or more entries")]
    TrivialProgram,
    #[error("sequence node {0} reached code generation without a name")]
    UnnamedNode(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_serialization() {
        let left_json = serde_json::to_string(&Direction::Left).unwrap();
        let right_json = serde_json::to_string(&Direction::Right).unwrap();

        assert_eq!(left_json, "\"Left\"");
        assert_eq!(right_json, "\"Right\"");

        let left: Direction = serde_json::from_str(&left_json).unwrap();
        let right: Direction = serde_json::from_str(&right_json).unwrap();

        assert_eq!(left, Direction::Left);
        assert_eq!(right, Direction::Right);
    }

    #[test]
    fn test_transition_roundtrip() {
        let transition = Transition::new('1', Direction::Right, "q1");

        let json = serde_json::to_string(&transition).unwrap();
        let back: Transition = serde_json::from_str(&json).unwrap();

        assert_eq!(back, transition);
        assert_eq!(back.direction.letter(), 'R');
    }

    #[test]
    fn test_error_display() {
        let error = BuildError::UnresolvedLabel("loop".to_string());

        let message = format!("{}", error);
        assert!(message.contains("loop"));
        assert!(message.contains("escaped resolution"));
    }
}
