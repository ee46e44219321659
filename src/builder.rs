//! The program builder: registers, sequences, labeled control flow, and a
//! small library of memoized primitives (loops, conditionals, pairing).
//! `build` runs the normalization pipeline and code generation and hands
//! back a ready machine.

use crate::codegen;
use crate::machine::{Machine, Tape};
use crate::pipeline;
use crate::store::{Entry, MarkerKind, NodeStore};
use crate::table::TransitionTable;
use crate::types::{BuildError, Direction, Transition, DEFAULT_FILL_SYMBOL};
use std::collections::{BTreeMap, HashMap};

/// A handle to a declared register. Handles can only be obtained from
/// `Builder::reg`, so programs cannot name a register that was never
/// declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    name: String,
    index: usize,
}

impl Register {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the register file, in declaration order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Increment.
    pub fn inc(&self) -> Entry {
        Entry::op(format!("4.{}.inc", self.name))
    }

    /// Decrement; on an empty register the sequence advances without
    /// decrementing.
    pub fn dec(&self) -> Entry {
        Entry::op(format!("4.{}.dec", self.name))
    }

    /// Decrement; on an empty register control breaks out of the enclosing
    /// sequence level instead.
    pub fn decnz(&self) -> Entry {
        Entry::op(format!("4.{}.decnz", self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Prim {
    WhileDecnz,
    IfDecnz,
    IfNotDecnz,
    IfEq,
    Pair,
    Unpair,
}

impl Prim {
    fn name(self) -> &'static str {
        match self {
            Prim::WhileDecnz => "while_decnz",
            Prim::IfDecnz => "if_decnz",
            Prim::IfNotDecnz => "if_not_decnz",
            Prim::IfEq => "if_eq",
            Prim::Pair => "pair",
            Prim::Unpair => "unpair",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MemoArg {
    Reg(String),
    Body(Entry),
}

type MemoKey = (Prim, Vec<MemoArg>);

/// Builds one program. Declaring registers wires their micro-operation
/// states; primitives are memoized, so calling one twice with the same
/// arguments reuses the node it built the first time.
pub struct Builder {
    store: NodeStore,
    wiring: TransitionTable,
    registers: BTreeMap<String, Register>,
    next_index: usize,
    zero_register: Option<String>,
    memo: HashMap<MemoKey, Entry>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            store: NodeStore::new(),
            wiring: TransitionTable::new(),
            registers: BTreeMap::new(),
            next_index: 0,
            zero_register: None,
            memo: HashMap::new(),
        }
    }

    /// Read access to the sequence store, mainly for evaluating programs
    /// before they are compiled.
    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Declares a register, or returns the existing handle if the name was
    /// declared before. Declaration wires the register's micro-operation
    /// states into the table.
    pub fn reg(&mut self, name: &str) -> Result<Register, BuildError> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(BuildError::BadRegisterName(name.to_string()));
        }
        if let Some(existing) = self.registers.get(name) {
            return Ok(existing.clone());
        }

        let index = self.next_index;
        self.next_index += 1;
        let i = index as i64;
        let right = Direction::Right;

        // Walk states that skip earlier registers; index -1 and -2 belong
        // to the framework.
        for op in ["inc", "dec"] {
            self.wiring.insert(
                format!("3.reg.{}.{}", i, op),
                '0',
                Transition::new('0', right, format!("3.reg.{}.{}", i - 1, op)),
            );
            self.wiring.insert(
                format!("3.reg.{}.{}", i, op),
                '1',
                Transition::new('1', right, format!("3.reg.{}.{}", i, op)),
            );
        }

        // Entry states. Phase one (boundary bit clear) marks the program
        // counter and grows the sentinel; phase two (boundary bit set)
        // clears the mark and walks out to the register.
        self.wiring.insert(
            format!("4.{}.inc", name),
            '0',
            Transition::new('1', right, "3.reg.prep_1"),
        );
        self.wiring.insert(
            format!("4.{}.inc", name),
            '1',
            Transition::new('0', right, format!("3.reg.{}.inc", i)),
        );
        self.wiring.insert(
            format!("4.{}.decnz", name),
            '0',
            Transition::new('1', right, "3.reg.prep_1"),
        );
        self.wiring.insert(
            format!("4.{}.decnz", name),
            '1',
            Transition::new('0', right, format!("3.reg.{}.dec", i)),
        );
        self.wiring.insert(
            format!("4.{}.dec", name),
            '0',
            Transition::new('0', right, format!("4.{}.decnz", name)),
        );
        self.wiring.insert(
            format!("4.{}.dec", name),
            '1',
            Transition::new('0', Direction::Left, "5.break.0"),
        );

        if index == 0 {
            self.zero_register = Some(name.to_string());
        }
        let register = Register {
            name: name.to_string(),
            index,
        };
        self.registers.insert(name.to_string(), register.clone());
        Ok(register)
    }

    /// Interns a sequence of entries.
    pub fn seq(&mut self, entries: impl IntoIterator<Item = Entry>) -> Entry {
        self.store.intern(entries.into_iter().collect())
    }

    /// Resolves break and continue markers for `name` inside `body`,
    /// replacing each with an unwind of the right depth. Markers for other
    /// labels are left for their own `label` call; resolution happens here,
    /// eagerly, so equal label names in nested scopes cannot capture each
    /// other.
    pub fn label(&mut self, name: &str, body: Entry) -> Result<Entry, BuildError> {
        if !self.store.contains_label(&body, name) {
            return Ok(body);
        }
        self.resolve_label(name, &body, 0, 0)
    }

    fn resolve_label(
        &mut self,
        name: &str,
        entry: &Entry,
        zeros: usize,
        ones: usize,
    ) -> Result<Entry, BuildError> {
        match entry {
            Entry::Marker { kind, label } if label == name => Ok(Entry::Unwind {
                kind: *kind,
                depth: match kind {
                    MarkerKind::Break => zeros,
                    MarkerKind::Continue => ones,
                },
            }),
            Entry::Node(id) if self.store.unresolved(*id).contains(name) => {
                let children = self.store.children(*id).to_vec();
                if children.len() != 2 {
                    return Err(BuildError::NonBinarySequence(children.len()));
                }
                let head = self.resolve_label(name, &children[0], zeros + 1, ones)?;
                let tail = self.resolve_label(name, &children[1], zeros, ones + 1)?;
                Ok(self.store.intern(vec![head, tail]))
            }
            other => Ok(other.clone()),
        }
    }

    /// Drains `var` to zero, running `body` once per unit. The body may be
    /// `Entry::Empty`.
    pub fn while_decnz(&mut self, var: &Register, body: Entry) -> Result<Entry, BuildError> {
        let key = (
            Prim::WhileDecnz,
            vec![MemoArg::Reg(var.name.clone()), MemoArg::Body(body.clone())],
        );
        if let Some(hit) = self.memo.get(&key) {
            return Ok(hit.clone());
        }

        let looped = if body == Entry::Empty {
            self.seq([var.decnz(), Entry::cont("loop")])
        } else {
            let tail = self.seq([body, Entry::cont("loop")]);
            self.seq([var.decnz(), tail])
        };
        let resolved = self.label("loop", looped)?;
        Ok(self.finish(key, resolved))
    }

    /// Runs `body` once if `var` is non-zero, consuming one unit of it.
    pub fn if_decnz(&mut self, var: &Register, body: Entry) -> Result<Entry, BuildError> {
        if body == Entry::Empty {
            return Err(BuildError::EmptyBody("if_decnz"));
        }
        let key = (
            Prim::IfDecnz,
            vec![MemoArg::Reg(var.name.clone()), MemoArg::Body(body.clone())],
        );
        if let Some(hit) = self.memo.get(&key) {
            return Ok(hit.clone());
        }

        let built = self.seq([var.decnz(), body]);
        Ok(self.finish(key, built))
    }

    /// Runs `body` once if `var` is zero; a non-zero `var` loses one unit
    /// and the body is skipped.
    pub fn if_not_decnz(&mut self, var: &Register, body: Entry) -> Result<Entry, BuildError> {
        if body == Entry::Empty {
            return Err(BuildError::EmptyBody("if_not_decnz"));
        }
        let key = (
            Prim::IfNotDecnz,
            vec![MemoArg::Reg(var.name.clone()), MemoArg::Body(body.clone())],
        );
        if let Some(hit) = self.memo.get(&key) {
            return Ok(hit.clone());
        }

        let guard = self.seq([var.decnz(), Entry::brk("fn")]);
        let built = self.seq([guard, body]);
        let resolved = self.label("fn", built)?;
        Ok(self.finish(key, resolved))
    }

    /// Runs `body` once if the two registers hold equal values. Both are
    /// drained to zero either way.
    pub fn if_eq(
        &mut self,
        first: &Register,
        second: &Register,
        body: Entry,
    ) -> Result<Entry, BuildError> {
        if body == Entry::Empty {
            return Err(BuildError::EmptyBody("if_eq"));
        }
        let key = (
            Prim::IfEq,
            vec![
                MemoArg::Reg(first.name.clone()),
                MemoArg::Reg(second.name.clone()),
                MemoArg::Body(body.clone()),
            ],
        );
        if let Some(hit) = self.memo.get(&key) {
            return Ok(hit.clone());
        }

        // Count both registers down in lock step. Whichever empties first
        // settles it: drain the other and bail out of "fn" before the body.
        let drain_first = self.while_decnz(first, Entry::Empty)?;
        let first_empty = self.seq([drain_first, Entry::brk("fn")]);
        let step = self.seq([second.decnz(), Entry::cont("loop")]);
        let arms = self.seq([step, first_empty]);
        let lockstep = self.seq([first.decnz(), arms]);
        let lockstep = self.label("loop", lockstep)?;

        let drain_second = self.while_decnz(second, Entry::Empty)?;
        let second_left = self.seq([drain_second, Entry::brk("fn")]);
        let second_check = self.seq([second.decnz(), second_left]);

        let checks = self.seq([lockstep, second_check]);
        let built = self.seq([checks, body]);
        let resolved = self.label("fn", built)?;
        Ok(self.finish(key, resolved))
    }

    /// Folds `first` and `second` into `out` with the diagonal pairing
    /// bijection, leaving both inputs zero. `out` picks up the pair value
    /// on top of whatever it held.
    pub fn pair(
        &mut self,
        out: &Register,
        first: &Register,
        second: &Register,
    ) -> Result<Entry, BuildError> {
        if out.name == first.name || out.name == second.name {
            return Err(BuildError::AliasedRegisters(out.name.clone()));
        }
        let key = (
            Prim::Pair,
            vec![
                MemoArg::Reg(out.name.clone()),
                MemoArg::Reg(first.name.clone()),
                MemoArg::Reg(second.name.clone()),
            ],
        );
        if let Some(hit) = self.memo.get(&key) {
            return Ok(hit.clone());
        }

        // One diagonal step: move first onto second counting into out,
        // then take a unit off second and move it all back.
        let count = self.seq([second.inc(), out.inc()]);
        let shift = self.while_decnz(first, count)?;
        let swap_back = self.while_decnz(second, first.inc())?;
        let step_tail = self.seq([out.inc(), swap_back]);
        let step = self.seq([step_tail, Entry::cont("loop")]);
        let second_nonzero = self.seq([second.decnz(), step]);
        let looped = self.seq([shift, second_nonzero]);
        let resolved = self.label("loop", looped)?;
        Ok(self.finish(key, resolved))
    }

    /// Inverts `pair`: unfolds `input` into `first` and `second`, on top of
    /// whatever they held, leaving `input` zero.
    pub fn unpair(
        &mut self,
        first: &Register,
        second: &Register,
        input: &Register,
    ) -> Result<Entry, BuildError> {
        if input.name == first.name || input.name == second.name {
            return Err(BuildError::AliasedRegisters(input.name.clone()));
        }
        let key = (
            Prim::Unpair,
            vec![
                MemoArg::Reg(first.name.clone()),
                MemoArg::Reg(second.name.clone()),
                MemoArg::Reg(input.name.clone()),
            ],
        );
        if let Some(hit) = self.memo.get(&key) {
            return Ok(hit.clone());
        }

        // Walk the diagonal backwards, one input unit at a time.
        let step_down = self.seq([second.decnz(), Entry::cont("loop")]);
        let restart = self.while_decnz(first, second.inc())?;
        let next_diagonal = self.seq([restart, Entry::cont("loop")]);
        let arms = self.seq([step_down, next_diagonal]);
        let advance = self.seq([first.inc(), arms]);
        let looped = self.seq([input.decnz(), advance]);
        let resolved = self.label("loop", looped)?;
        Ok(self.finish(key, resolved))
    }

    fn finish(&mut self, key: MemoKey, result: Entry) -> Entry {
        if let Entry::Node(id) = result {
            if self.store.name(id).is_none() {
                let args: Vec<String> = key.1.iter().map(render_arg).collect();
                let name = format!("{}({}).0", key.0.name(), args.join(","));
                self.store.set_name(id, name);
            } else {
                // The node already belongs to another primitive; give it a
                // neutral name instead of stacking claims.
                self.store.set_name(id, format!("fn_{}().0", id));
            }
        }
        self.memo.insert(key, result.clone());
        result
    }

    /// Compiles the program: normalizes the sequence store, generates the
    /// transition table around the framework, prunes unreachable states,
    /// and returns a machine on a fresh tape positioned at boot.
    pub fn build(mut self, program: Entry) -> Result<Machine, BuildError> {
        let Entry::Node(root) = program else {
            return Err(BuildError::TrivialProgram);
        };
        if self.registers.is_empty() {
            return Err(BuildError::NoRegisters);
        }
        let zero = self
            .zero_register
            .clone()
            .ok_or(BuildError::NoRegisters)?;

        // The framework dispatches to the root under this name.
        self.store.set_name(root, codegen::ENTRY_NODE);

        pipeline::extract_common_runs(&mut self.store, root);
        pipeline::reduce_to_binary(&mut self.store, root);
        pipeline::check_resolved(&self.store, root)?;
        pipeline::assign_names(&mut self.store, root)?;

        let mut table = codegen::generate(&self.store, root, &self.wiring, &zero)?;
        table.gc(&[]);
        Ok(Machine::new(table, Tape::new(DEFAULT_FILL_SYMBOL)))
    }
}

fn render_arg(arg: &MemoArg) -> String {
    match arg {
        MemoArg::Reg(name) => name.clone(),
        MemoArg::Body(entry) => render_entry(entry),
    }
}

fn render_entry(entry: &Entry) -> String {
    match entry {
        Entry::Empty => "()".to_string(),
        Entry::Node(id) => format!("n{}", id),
        Entry::Op(op) => op.clone(),
        Entry::Halt => "halt".to_string(),
        Entry::Unwind {
            kind: MarkerKind::Break,
            depth,
        } => format!("break.{}", depth),
        Entry::Unwind {
            kind: MarkerKind::Continue,
            depth,
        } => format!("continue.{}", depth),
        Entry::Marker { kind, label } => match kind {
            MarkerKind::Break => format!("break_{}", label),
            MarkerKind::Continue => format!("continue_{}", label),
        },
    }
}
