//! Code generation: merges the fixed framework table with the program's
//! register wiring, emits the decision tree for the normalized sequence
//! store, sizes the dispatch chain, and wires the boot states to the first
//! register.

use crate::loader::Loader;
use crate::store::{Entry, MarkerKind, NodeId, NodeStore};
use crate::table::TransitionTable;
use crate::types::{BuildError, Direction, Transition, HALT_STATE};
use lazy_static::lazy_static;
use std::collections::HashMap;

/// The state every generated table starts in.
pub const BOOT_STATE: &str = "0.boot1.A";
/// The framework dispatches into the decision tree under this name, so the
/// program root is always named this.
pub const ENTRY_NODE: &str = "main().0";

/// The fixed part of the register machine framework. Program-dependent
/// entries (boot handoff to the first register, the dispatch chain, and the
/// re-entries into it) are inserted by `generate`.
const FRAMEWORK_TEXT: &str = "\
#! start 0.boot1.A
#
# boot1 runs on the empty tape and lays down a long field of singleton 1s.
# Its final transition leaves the tape mid register operation, so the
# handoff into the first register's inc state finishes the cleanup.
#
0.boot1.A 0 1 R 0.boot1.B
0.boot1.A 1 1 L 0.boot1.C
0.boot1.B 0 0 L 0.boot1.A
0.boot1.B 1 0 L 0.boot1.D
0.boot1.C 0 1 L 0.boot1.A
0.boot1.D 0 1 L 0.boot1.B
0.boot1.D 1 1 R 0.boot1.E
0.boot1.E 0 0 R 0.boot1.D
0.boot1.E 1 0 R 0.boot1.B
#
# boot2 rides the dispatch loop to convert the boot1 field into the
# register file, one register per successful decnz.
#
1.boot2.0 1 1 R 1.boot2.1
1.boot2.1 0 0 R 1.boot2.0
1.boot2.1 1 1 R 1.boot2.2
#
# Dispatch walks left to the start of the program counter.
#
2.dispatch.0 0 0 L 2.dispatch.find.pc
2.dispatch.0 1 1 L 2.dispatch.0
2.dispatch.find.pc 0 0 R 2.dispatch.find.pc
2.dispatch.find.pc 1 1 R 2.root.1
#
# The PC moving from 101 to 110 starts the main loop; overflow to 111
# resets it to 110 and the main loop runs again.
#
2.root.1 0 0 R 1.boot2.0
2.root.1 1 1 R 2.root.1.1
2.root.1.1 0 0 R main().0
2.root.1.1 1 0 R main().0
#
# Register operations pass through dispatch twice. Phase one stretches the
# -1 marker register left toward the PC; phase two performs the operation,
# collapses the marker, and returns. The -1 and -2 walk states below are
# the fixed tail of the per-register walk chains.
#
3.reg.-1.dec 0 0 R 3.reg.-2.dec
3.reg.-1.dec 1 1 R 3.reg.-1.dec
3.reg.-1.inc 0 0 R 3.reg.-2.inc
3.reg.-1.inc 1 1 R 3.reg.-1.inc
3.reg.-2.dec 0 1 L 3.reg.return_2_1
3.reg.-2.dec 1 0 R 3.reg.dec.check
3.reg.-2.inc 0 1 R 3.reg.inc.shift_1
3.reg.-2.inc 1 1 R 3.reg.-2.inc
3.reg.cleanup_1 0 0 R 3.reg.cleanup_1
3.reg.cleanup_1 1 0 R 3.reg.cleanup_2
3.reg.cleanup_2 0 0 L 3.reg.cleanup_3
3.reg.cleanup_2 1 0 R 3.reg.cleanup_2
# The marker is collapsed back to one cell; ride the zero gap left to the
# PC before dispatching.
3.reg.cleanup_3 0 1 L 5.continue.0
3.reg.dec.check 0 0 L 3.reg.-2.dec
3.reg.dec.check 1 1 R 3.reg.dec.scan_1
3.reg.dec.scan_1 1 1 R 3.reg.dec.scan_1
3.reg.dec.scan_1 0 0 R 3.reg.dec.scan_2
3.reg.dec.scan_2 0 0 L 3.reg.dec.shift_1
3.reg.dec.scan_2 1 1 R 3.reg.dec.scan_1
3.reg.dec.shift_1 0 1 L 3.reg.dec.shift_2
3.reg.dec.shift_1 1 1 L 3.reg.dec.shift_1
3.reg.dec.shift_2 0 0 L 3.reg.return_1_1
3.reg.dec.shift_2 1 0 L 3.reg.dec.shift_1
3.reg.inc.shift_1 0 0 L 3.reg.return_1_1
3.reg.inc.shift_1 1 0 R 3.reg.inc.shift_2
3.reg.inc.shift_2 0 1 R 3.reg.inc.shift_1
3.reg.inc.shift_2 1 1 R 3.reg.inc.shift_2
3.reg.prep_1 0 0 R 3.reg.prep_2
3.reg.prep_2 0 1 R 3.reg.prep_2
# Phase one is over; which register and operation were asked for is
# forgotten, so ride dispatch around again.
3.reg.prep_2 1 1 L 5.continue.0
3.reg.return_1_1 0 0 L 3.reg.return_1_2
3.reg.return_1_1 1 1 L 3.reg.return_1_1
3.reg.return_1_2 0 0 L 5.break.0
3.reg.return_1_2 1 1 L 3.reg.return_1_1
3.reg.return_2_1 0 0 L 3.reg.return_2_2
3.reg.return_2_1 1 1 L 3.reg.return_2_1
3.reg.return_2_2 0 0 L 5.break.1
3.reg.return_2_2 1 1 L 3.reg.return_2_1
#
# PC jumps. break.0 may or may not be arriving from phase two of a
# register operation, so it always runs the marker cleanup; when there is
# nothing to clean up the cleanup states fall straight through to dispatch.
#
5.break.0 0 1 R 3.reg.cleanup_1
5.break.0 1 0 L 5.break.0
5.break.1 0 0 L 5.break.0
5.break.1 1 0 L 5.break.1
5.continue.0 0 0 L 5.continue.0
";

lazy_static! {
    /// The framework, parsed once.
    static ref FRAMEWORK: TransitionTable = {
        let report = Loader::load_str(FRAMEWORK_TEXT);
        assert!(
            report.errors.is_empty(),
            "framework table must load cleanly: {:?}",
            report.errors
        );
        report.table
    };
}

/// Generates the full transition table for a normalized program.
///
/// `wiring` carries the per-register states collected while registers were
/// declared, and `zero_register` names the register the boot states hand
/// off to.
pub fn generate(
    store: &NodeStore,
    root: NodeId,
    wiring: &TransitionTable,
    zero_register: &str,
) -> Result<TransitionTable, BuildError> {
    if store.name(root) != Some(ENTRY_NODE) {
        return Err(BuildError::DuplicateStateName(ENTRY_NODE.to_string()));
    }

    let mut table = FRAMEWORK.clone();
    for (state, symbol, transition) in wiring.iter() {
        table.insert(state.to_string(), symbol, transition.clone());
    }

    // Decision tree: each node reads one PC bit without changing it and
    // moves on to the corresponding child.
    let mut deepest_break = 1usize;
    let mut deepest_continue = 0usize;
    for id in store.reachable(root) {
        let name = store
            .name(id)
            .ok_or(BuildError::UnnamedNode(id))?
            .to_string();
        let children = store.children(id);
        if children.len() != 2 {
            return Err(BuildError::NonBinarySequence(children.len()));
        }
        for (symbol, child) in [('0', &children[0]), ('1', &children[1])] {
            let target = match child {
                Entry::Node(c) => store
                    .name(*c)
                    .ok_or(BuildError::UnnamedNode(*c))?
                    .to_string(),
                Entry::Op(op) => op.clone(),
                Entry::Halt => HALT_STATE.to_string(),
                Entry::Unwind {
                    kind: MarkerKind::Break,
                    depth,
                } => {
                    deepest_break = deepest_break.max(*depth);
                    format!("5.break.{}", depth)
                }
                Entry::Unwind {
                    kind: MarkerKind::Continue,
                    depth,
                } => {
                    deepest_continue = deepest_continue.max(*depth);
                    format!("5.continue.{}", depth)
                }
                Entry::Marker { label, .. } => {
                    return Err(BuildError::UnresolvedLabel(label.clone()));
                }
                Entry::Empty => {
                    return Err(BuildError::NonBinarySequence(0));
                }
            };
            if table.get(&name, symbol).is_some() {
                return Err(BuildError::DuplicateStateName(name));
            }
            table.insert(name.clone(), symbol, Transition::new(symbol, Direction::Right, target));
        }
    }

    // Unwind chains. A break erases PC ones and carries into the next bit;
    // a continue zeroes its way back out to the label's own bit.
    for depth in 2..=deepest_break {
        table.insert(
            format!("5.break.{}", depth),
            '0',
            Transition::new('0', Direction::Left, format!("5.break.{}", depth - 1)),
        );
        table.insert(
            format!("5.break.{}", depth),
            '1',
            Transition::new('0', Direction::Left, format!("5.break.{}", depth)),
        );
    }
    for depth in 1..=deepest_continue {
        table.insert(
            format!("5.continue.{}", depth),
            '1',
            Transition::new('0', Direction::Left, format!("5.continue.{}", depth - 1)),
        );
        table.insert(
            format!("5.continue.{}", depth),
            '0',
            Transition::new('0', Direction::Left, format!("5.continue.{}", depth)),
        );
    }

    // The dispatch chain must cover the deepest run of PC zeros any path
    // through the decision tree can produce.
    let widest = max_zeros(store, root);
    for i in 1..=widest {
        table.insert(
            format!("2.dispatch.{}", i),
            '0',
            Transition::new('0', Direction::Left, format!("2.dispatch.{}", i - 1)),
        );
        table.insert(
            format!("2.dispatch.{}", i),
            '1',
            Transition::new('1', Direction::Left, format!("2.dispatch.{}", i)),
        );
    }

    // Dispatch is always re-entered at the widest link.
    let dispatch = format!("2.dispatch.{}", widest);
    table.insert(
        "5.continue.0",
        '1',
        Transition::new('1', Direction::Left, dispatch),
    );

    // Boot handoff to the first register.
    table.insert(
        "0.boot1.C",
        '1',
        Transition::new('1', Direction::Right, format!("4.{}.inc", zero_register)),
    );
    table.insert(
        "1.boot2.2",
        '0',
        Transition::new('0', Direction::Right, format!("4.{}.inc", zero_register)),
    );
    table.insert(
        "1.boot2.2",
        '1',
        Transition::new('1', Direction::Right, format!("4.{}.decnz", zero_register)),
    );

    Ok(table)
}

/// Width of the dispatch chain: the most zeros dispatch can cross inside
/// the PC. A root-to-leaf path costs one zero per head edge (tail edges
/// are free), the `2.root.1.1` bit is clear while the main loop runs, and
/// the phase one re-entry also crosses the cell `3.reg.prep_1` skipped.
fn max_zeros(store: &NodeStore, root: NodeId) -> usize {
    fn walk(store: &NodeStore, entry: &Entry, memo: &mut HashMap<NodeId, usize>) -> usize {
        let Entry::Node(id) = entry else { return 0 };
        if let Some(&known) = memo.get(id) {
            return known;
        }
        let children = store.children(*id).to_vec();
        let last = children.len() - 1;
        let depth = children
            .iter()
            .enumerate()
            .map(|(i, child)| {
                let d = walk(store, child, memo);
                if i < last {
                    d + 1
                } else {
                    d
                }
            })
            .max()
            .unwrap_or(0);
        memo.insert(*id, depth);
        depth
    }
    2 + walk(store, &Entry::Node(root), &mut HashMap::new())
}
