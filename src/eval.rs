//! A reference evaluator for programs over abstract registers. It runs the
//! sequence tree directly, with break and continue as counted unwinds, and
//! never touches a tape. Useful for checking program logic quickly and for
//! verifying that normalization passes preserve behavior.

use crate::store::{Entry, MarkerKind, NodeStore};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("control marker for label '{0}' was never resolved")]
    UnresolvedMarker(String),
    #[error("unknown micro-operation '{0}'")]
    UnknownOp(String),
    #[error("fuel exhausted after {0} operations")]
    OutOfFuel(usize),
}

/// How the program finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOutcome {
    /// True when a halt entry was reached; false when the program ran off
    /// its end. The compiled machine would restart from the first
    /// instruction in the latter case, the evaluator runs one pass.
    pub halted: bool,
    /// Entries evaluated, for rough cost comparisons.
    pub ops: usize,
}

/// Control flow propagating out of a sequence.
///
/// Finishing a sequence normally is indistinguishable from breaking out of
/// zero levels, so there is no separate "done" value: `Break(0)` is it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Break(usize),
    Continue(usize),
    Halted,
}

/// Evaluates a program entry against a register file. Registers are created
/// on first touch, starting at zero. `fuel` bounds the number of entries
/// evaluated so diverging programs error out instead of hanging.
pub fn evaluate(
    store: &NodeStore,
    program: &Entry,
    registers: &mut BTreeMap<String, u64>,
    fuel: usize,
) -> Result<EvalOutcome, EvalError> {
    let mut eval = Eval {
        store,
        registers,
        fuel,
        ops: 0,
    };
    let flow = eval.entry(program)?;
    Ok(EvalOutcome {
        halted: matches!(flow, Flow::Halted),
        ops: eval.ops,
    })
}

struct Eval<'a> {
    store: &'a NodeStore,
    registers: &'a mut BTreeMap<String, u64>,
    fuel: usize,
    ops: usize,
}

impl Eval<'_> {
    fn entry(&mut self, entry: &Entry) -> Result<Flow, EvalError> {
        self.ops += 1;
        if self.ops > self.fuel {
            return Err(EvalError::OutOfFuel(self.ops));
        }
        match entry {
            Entry::Empty => Ok(Flow::Break(0)),
            Entry::Halt => Ok(Flow::Halted),
            Entry::Marker { label, .. } => Err(EvalError::UnresolvedMarker(label.clone())),
            Entry::Unwind { kind, depth } => Ok(match kind {
                MarkerKind::Break => Flow::Break(*depth),
                MarkerKind::Continue => Flow::Continue(*depth),
            }),
            Entry::Op(name) => self.op(name),
            Entry::Node(id) => {
                let children = self.store.children(*id).to_vec();
                self.sequence(&children)
            }
        }
    }

    /// Runs a sequence of two or more entries with the unwind semantics of
    /// its binary right-fold: breaks count sequence levels leaving through
    /// a head position, continues count levels entered through tails, and
    /// `Continue(1)` arriving from the tail restarts the sequence.
    fn sequence(&mut self, items: &[Entry]) -> Result<Flow, EvalError> {
        loop {
            match self.entry(&items[0])? {
                Flow::Break(0) => {}
                Flow::Break(depth) => return Ok(Flow::Break(depth - 1)),
                Flow::Continue(depth) => return Ok(Flow::Continue(depth)),
                Flow::Halted => return Ok(Flow::Halted),
            }
            let rest = if items.len() == 2 {
                self.entry(&items[1])?
            } else {
                self.sequence(&items[1..])?
            };
            match rest {
                Flow::Break(depth) => return Ok(Flow::Break(depth)),
                Flow::Continue(1) => continue,
                Flow::Continue(depth) => return Ok(Flow::Continue(depth - 1)),
                Flow::Halted => return Ok(Flow::Halted),
            }
        }
    }

    fn op(&mut self, name: &str) -> Result<Flow, EvalError> {
        let unknown = || EvalError::UnknownOp(name.to_string());
        let rest = name.strip_prefix("4.").ok_or_else(unknown)?;
        let (register, op) = rest.rsplit_once('.').ok_or_else(unknown)?;
        if register.is_empty() {
            return Err(unknown());
        }
        let value = self.registers.entry(register.to_string()).or_insert(0);
        match op {
            "inc" => {
                *value += 1;
                Ok(Flow::Break(0))
            }
            // At this level dec and decnz agree: decrement if possible,
            // otherwise unwind one extra level.
            "dec" | "decnz" => {
                if *value > 0 {
                    *value -= 1;
                    Ok(Flow::Break(0))
                } else {
                    Ok(Flow::Break(1))
                }
            }
            _ => Err(unknown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NodeStore;

    fn run(
        store: &NodeStore,
        program: &Entry,
        seed: &[(&str, u64)],
    ) -> (BTreeMap<String, u64>, EvalOutcome) {
        let mut registers: BTreeMap<String, u64> = seed
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        let outcome = evaluate(store, program, &mut registers, 100_000).unwrap();
        (registers, outcome)
    }

    #[test]
    fn test_inc_and_decnz() {
        let mut store = NodeStore::new();
        let program = store.intern(vec![
            Entry::op("4.a.inc"),
            Entry::op("4.a.inc"),
            Entry::op("4.a.decnz"),
        ]);

        let (registers, outcome) = run(&store, &program, &[]);

        assert_eq!(registers["a"], 1);
        assert!(!outcome.halted);
    }

    #[test]
    fn test_decnz_on_zero_skips_the_tail() {
        let mut store = NodeStore::new();
        // decnz on an empty register breaks out one level, so b stays zero.
        let guarded = store.intern(vec![Entry::op("4.a.decnz"), Entry::op("4.b.inc")]);
        let program = store.intern(vec![guarded, Entry::op("4.c.inc")]);

        let (registers, _) = run(&store, &program, &[]);

        assert_eq!(registers["a"], 0);
        assert_eq!(registers.get("b"), None);
        assert_eq!(registers["c"], 1);
    }

    #[test]
    fn test_halt_stops_everything() {
        let mut store = NodeStore::new();
        let inner = store.intern(vec![Entry::op("4.a.inc"), Entry::Halt]);
        let program = store.intern(vec![inner, Entry::op("4.b.inc")]);

        let (registers, outcome) = run(&store, &program, &[]);

        assert!(outcome.halted);
        assert_eq!(registers["a"], 1);
        assert_eq!(registers.get("b"), None);
    }

    #[test]
    fn test_continue_restarts_the_sequence() {
        let mut store = NodeStore::new();
        // (decnz a, continue(1)) drains a to zero, one pass per unit.
        let program = store.intern(vec![
            Entry::op("4.a.decnz"),
            Entry::Unwind {
                kind: MarkerKind::Continue,
                depth: 1,
            },
        ]);

        let (registers, outcome) = run(&store, &program, &[("a", 5)]);

        assert_eq!(registers["a"], 0);
        assert!(!outcome.halted);
    }

    #[test]
    fn test_break_depth_unwinds_nested_sequences() {
        let mut store = NodeStore::new();
        // Innermost break(2) leaves both enclosing sequences, skipping b
        // and c but not d.
        let deep = store.intern(vec![
            Entry::Unwind {
                kind: MarkerKind::Break,
                depth: 2,
            },
            Entry::op("4.b.inc"),
        ]);
        let mid = store.intern(vec![deep, Entry::op("4.c.inc")]);
        let program = store.intern(vec![mid, Entry::op("4.d.inc")]);

        let (registers, _) = run(&store, &program, &[]);

        assert_eq!(registers.get("b"), None);
        assert_eq!(registers.get("c"), None);
        assert_eq!(registers["d"], 1);
    }

    #[test]
    fn test_unresolved_marker_is_an_error() {
        let mut store = NodeStore::new();
        let program = store.intern(vec![Entry::op("4.a.inc"), Entry::brk("fn")]);
        let mut registers = BTreeMap::new();

        let result = evaluate(&store, &program, &mut registers, 1000);

        assert_eq!(result, Err(EvalError::UnresolvedMarker("fn".to_string())));
    }

    #[test]
    fn test_unknown_op_is_an_error() {
        let store = NodeStore::new();
        let mut registers = BTreeMap::new();

        for bad in ["4.a.negate", "3.reg.prep_1", "4..inc"] {
            let result = evaluate(&store, &Entry::op(bad), &mut registers, 1000);
            assert_eq!(result, Err(EvalError::UnknownOp(bad.to_string())), "{}", bad);
        }
    }

    #[test]
    fn test_fuel_exhaustion() {
        let mut store = NodeStore::new();
        // inc then continue(1): runs forever.
        let program = store.intern(vec![
            Entry::op("4.a.inc"),
            Entry::Unwind {
                kind: MarkerKind::Continue,
                depth: 1,
            },
        ]);
        let mut registers = BTreeMap::new();

        let result = evaluate(&store, &program, &mut registers, 100);

        assert!(matches!(result, Err(EvalError::OutOfFuel(_))));
    }
}
