//! The execution engine: an unbounded single-tape machine driven by a
//! `TransitionTable`. The tape grows on demand in both directions and the
//! engine watches for the one kind of divergence that is cheap to prove,
//! a head that has walked off the written region under a self-looping
//! transition.

use crate::table::TransitionTable;
use crate::types::{Direction, Outcome, Step, Transition};

/// An unbounded tape with a distinguished head cell.
///
/// The cells on each side of the head are stored with the cell nearest the
/// head last, so moving the head is a push and a pop. Cells that were never
/// written read as the fill symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Tape {
    head: char,
    left: Vec<char>,
    right: Vec<char>,
    fill: char,
}

impl Tape {
    pub fn new(fill: char) -> Self {
        Tape {
            head: fill,
            left: Vec::new(),
            right: Vec::new(),
            fill,
        }
    }

    pub fn fill(&self) -> char {
        self.fill
    }

    /// Changes the fill symbol. Cells already materialized keep their
    /// symbols; an entirely untouched tape re-fills its head cell.
    pub fn set_fill(&mut self, fill: char) {
        if self.left.is_empty() && self.right.is_empty() && self.head == self.fill {
            self.head = fill;
        }
        self.fill = fill;
    }

    pub fn head(&self) -> char {
        self.head
    }

    /// Reads the cell at a signed offset from the head. Negative offsets
    /// are to the left.
    pub fn read(&self, offset: i64) -> char {
        if offset == 0 {
            return self.head;
        }
        let (side, distance) = if offset < 0 {
            (&self.left, (-offset) as usize)
        } else {
            (&self.right, offset as usize)
        };
        if side.len() >= distance {
            side[side.len() - distance]
        } else {
            self.fill
        }
    }

    /// Writes the cell at a signed offset from the head, materializing any
    /// intervening fill cells.
    pub fn write(&mut self, offset: i64, symbol: char) {
        if offset == 0 {
            self.head = symbol;
            return;
        }
        let fill = self.fill;
        let (side, distance) = if offset < 0 {
            (&mut self.left, (-offset) as usize)
        } else {
            (&mut self.right, offset as usize)
        };
        while side.len() < distance {
            side.insert(0, fill);
        }
        let index = side.len() - distance;
        side[index] = symbol;
    }

    /// Leftmost materialized offset, relative to the head.
    pub fn left_extent(&self) -> i64 {
        -(self.left.len() as i64)
    }

    /// Rightmost materialized offset, relative to the head.
    pub fn right_extent(&self) -> i64 {
        self.right.len() as i64
    }

    /// Renders the cells between two offsets inclusive, mostly for tests
    /// and debugging.
    pub fn render(&self, from: i64, to: i64) -> String {
        (from..=to).map(|offset| self.read(offset)).collect()
    }

    /// Writes under the head and shifts it one cell left. Returns true when
    /// the new head cell had never been written.
    pub(crate) fn step_left(&mut self, write: char) -> bool {
        self.right.push(write);
        match self.left.pop() {
            Some(symbol) => {
                self.head = symbol;
                false
            }
            None => {
                self.head = self.fill;
                true
            }
        }
    }

    /// Writes under the head and shifts it one cell right. Returns true when
    /// the new head cell had never been written.
    pub(crate) fn step_right(&mut self, write: char) -> bool {
        self.left.push(write);
        match self.right.pop() {
            Some(symbol) => {
                self.head = symbol;
                false
            }
            None => {
                self.head = self.fill;
                true
            }
        }
    }
}

/// A running machine: a table, a tape, and a current state.
#[derive(Debug, Clone)]
pub struct Machine {
    table: TransitionTable,
    tape: Tape,
    state: String,
    steps: usize,
    looping: bool,
}

impl Machine {
    /// Creates a machine positioned at the table's start state.
    pub fn new(table: TransitionTable, tape: Tape) -> Self {
        let state = table.start().to_string();
        Machine {
            table,
            tape,
            state,
            steps: 0,
            looping: false,
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn tape_mut(&mut self) -> &mut Tape {
        &mut self.tape
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// The table can be edited while the machine runs; the next step picks
    /// up the change.
    pub fn table_mut(&mut self) -> &mut TransitionTable {
        &mut self.table
    }

    /// Whether the last step detected a permanent walk into the fill.
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Performs one step. Missing transitions halt; a step that carries the
    /// head onto never-written fill is checked against the next state's
    /// fill transition, and a self-loop in the same direction is reported
    /// as divergence.
    pub fn step(&mut self) -> Step {
        self.looping = false;
        let transition = match self.table.get(&self.state, self.tape.head()) {
            Some(t) => t.clone(),
            None => return Step::Halted,
        };

        let fresh = match transition.direction {
            Direction::Left => self.tape.step_left(transition.write),
            Direction::Right => self.tape.step_right(transition.write),
        };
        self.state = transition.next;
        self.steps += 1;

        if fresh {
            if let Some(next) = self.table.get(&self.state, self.tape.fill()) {
                if next.next == self.state && next.direction == transition.direction {
                    self.looping = true;
                    return Step::Looping;
                }
            }
        }
        Step::Continue
    }

    /// Runs until the machine halts, diverges, or the step budget runs out.
    pub fn run(&mut self, max_steps: usize) -> Outcome {
        for _ in 0..max_steps {
            match self.step() {
                Step::Continue => {}
                Step::Looping => return Outcome::Looping { steps: self.steps },
                Step::Halted => return Outcome::Halted { steps: self.steps },
            }
        }
        Outcome::StepLimit { steps: self.steps }
    }

    /// Prunes table entries unreachable from the start state and the
    /// current state. Returns the removed entries.
    pub fn gc(&mut self) -> Vec<(String, char, Transition)> {
        let state = self.state.clone();
        self.table.gc(&[&state])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::transition;
    use crate::types::Direction::{Left, Right};

    #[test]
    fn test_tape_signed_offsets() {
        let mut tape = Tape::new('0');

        tape.write(0, '1');
        tape.write(-3, 'a');
        tape.write(2, 'b');

        assert_eq!(tape.read(0), '1');
        assert_eq!(tape.read(-3), 'a');
        assert_eq!(tape.read(2), 'b');
        // Materialized on demand, padded with fill.
        assert_eq!(tape.read(-2), '0');
        assert_eq!(tape.read(1), '0');
        // Never touched.
        assert_eq!(tape.read(-10), '0');
        assert_eq!(tape.render(-3, 2), "a0010b");
    }

    #[test]
    fn test_tape_render_window() {
        let mut tape = Tape::new('0');
        tape.write(0, '1');
        tape.write(-1, '1');
        tape.write(1, '1');

        assert_eq!(tape.render(-2, 2), "01110");
    }

    #[test]
    fn test_tape_moves_preserve_cells() {
        let mut tape = Tape::new('0');
        tape.write(0, 'x');
        tape.write(1, 'y');

        // Head at 'x', move right writing 'a': behind us lies 'a', under us 'y'.
        let fresh = tape.step_right('a');
        assert!(!fresh);
        assert_eq!(tape.head(), 'y');
        assert_eq!(tape.read(-1), 'a');

        // Move left back over 'a'.
        let fresh = tape.step_left('z');
        assert!(!fresh);
        assert_eq!(tape.head(), 'a');
        assert_eq!(tape.read(1), 'z');

        // Move left into untouched territory.
        let fresh = tape.step_left('w');
        assert!(fresh);
        assert_eq!(tape.head(), '0');
    }

    fn two_state_table() -> TransitionTable {
        // Writes two ones then halts.
        let mut table = TransitionTable::new();
        table.set_start("a");
        table.insert("a", '0', transition('1', Right, "b"));
        table.insert("b", '0', transition('1', Right, "halt"));
        table
    }

    #[test]
    fn test_machine_runs_to_halt() {
        let table = two_state_table();
        let mut machine = Machine::new(table, Tape::new('0'));

        let outcome = machine.run(100);

        assert_eq!(outcome, Outcome::Halted { steps: 2 });
        assert_eq!(machine.state(), "halt");
        assert_eq!(machine.tape().read(-2), '1');
        assert_eq!(machine.tape().read(-1), '1');
    }

    #[test]
    fn test_missing_transition_halts() {
        let mut table = two_state_table();
        table.remove("b", '0');
        let mut machine = Machine::new(table, Tape::new('0'));

        assert_eq!(machine.step(), Step::Continue);
        assert_eq!(machine.step(), Step::Halted);
        // Halting is stable.
        assert_eq!(machine.step(), Step::Halted);
        assert_eq!(machine.steps(), 1);
    }

    #[test]
    fn test_looping_detection() {
        let mut table = TransitionTable::new();
        table.set_start("s");
        table.insert("s", '0', transition('1', Right, "s"));
        let mut machine = Machine::new(table, Tape::new('0'));

        assert_eq!(machine.step(), Step::Looping);
        assert!(machine.is_looping());
    }

    #[test]
    fn test_looping_reported_by_run() {
        let mut table = TransitionTable::new();
        table.set_start("s");
        // Cross one written cell, then march right into the fill forever.
        table.insert("s", '0', transition('0', Right, "t"));
        table.insert("t", '1', transition('1', Right, "t"));
        table.insert("t", '0', transition('0', Right, "t"));
        let mut tape = Tape::new('0');
        tape.write(1, '1');
        let mut machine = Machine::new(table, tape);

        assert_eq!(machine.run(1000), Outcome::Looping { steps: 2 });
    }

    #[test]
    fn test_moving_over_written_cells_is_not_looping() {
        let mut table = TransitionTable::new();
        table.set_start("s");
        table.insert("s", '1', transition('1', Right, "s"));
        let mut tape = Tape::new('0');
        tape.write(0, '1');
        tape.write(1, '1');
        tape.write(2, '1');
        let mut machine = Machine::new(table, tape);

        assert_eq!(machine.step(), Step::Continue);
        assert_eq!(machine.step(), Step::Continue);
        assert_eq!(machine.step(), Step::Continue);
        // Off the end of the ones: (s, '0') is undefined, so we halt rather
        // than loop.
        assert_eq!(machine.step(), Step::Halted);
    }

    #[test]
    fn test_hot_edit_changes_behavior() {
        let mut table = TransitionTable::new();
        table.set_start("s");
        table.insert("s", '0', transition('1', Right, "s2"));
        let mut machine = Machine::new(table, Tape::new('0'));

        assert_eq!(machine.step(), Step::Continue);
        // Define the missing state mid-run.
        machine
            .table_mut()
            .insert("s2", '0', transition('1', Right, "halt"));
        assert_eq!(machine.step(), Step::Continue);
        assert_eq!(machine.state(), "halt");
    }

    #[test]
    fn test_step_limit() {
        let mut table = TransitionTable::new();
        table.set_start("ping");
        table.insert("ping", '0', transition('0', Right, "pong"));
        table.insert("ping", '1', transition('1', Right, "pong"));
        table.insert("pong", '0', transition('1', Left, "ping"));
        table.insert("pong", '1', transition('0', Left, "ping"));
        let mut machine = Machine::new(table, Tape::new('0'));

        assert_eq!(machine.run(7), Outcome::StepLimit { steps: 7 });
    }

    #[test]
    fn test_machine_gc_uses_current_state() {
        let mut table = two_state_table();
        table.insert("stale", '0', transition('0', Right, "stale"));
        let mut machine = Machine::new(table, Tape::new('0'));
        machine.step();

        let removed = machine.gc();

        assert_eq!(removed.len(), 1);
        assert!(machine.table().contains_state("a"));
        assert!(machine.table().contains_state("b"));
    }
}
