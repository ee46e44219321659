//! Compiles register machine programs down to single-tape, two-symbol
//! Turing machine transition tables, and runs the result.
//!
//! Programs are built with [`Builder`]: declare registers, compose
//! sequences of `inc`/`dec`/`decnz` operations with labeled break and
//! continue, and call [`Builder::build`] to get a ready-to-run [`Machine`].
//! Tables can also be loaded from and saved to a plain text format via
//! [`Loader`] and [`TransitionTable`]. The [`evaluate`] function runs a
//! program over abstract registers without compiling it, which is the fast
//! way to check program logic.

pub mod builder;
pub mod codegen;
pub mod eval;
pub mod loader;
pub mod machine;
pub mod parser;
pub mod pipeline;
pub mod store;
pub mod table;
pub mod types;

/// Re-exports the `Rule` enum from the parser module, used by the `pest` grammar.
pub use crate::parser::Rule;
pub use builder::{Builder, Register};
pub use eval::{evaluate, EvalError, EvalOutcome};
pub use loader::{LineError, LoadReport, Loader};
pub use machine::{Machine, Tape};
pub use store::{Entry, MarkerKind, NodeId, NodeStore};
pub use table::TransitionTable;
pub use types::{
    BuildError, Direction, MachineError, Outcome, Step, Transition, DEFAULT_FILL_SYMBOL,
    DEFAULT_STEP_LIMIT, HALT_STATE,
};
