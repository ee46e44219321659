//! The sequence store: a hash-consed arena of program sequences. Programs
//! are trees of entries; interior sequences are interned by content, so
//! building the same subsequence twice yields the same node and the code
//! generator emits it once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Index of an interned sequence inside a `NodeStore`.
pub type NodeId = usize;

/// Whether a control marker unwinds forward (break) or backward (continue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerKind {
    Break,
    Continue,
}

/// One element of a program sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entry {
    /// The empty sequence. Vanishes when interned into a parent.
    Empty,
    /// A reference to an interned child sequence.
    Node(NodeId),
    /// A micro-operation, named by the machine state that performs it,
    /// e.g. `4.car.inc`.
    Op(String),
    /// An unresolved control marker waiting for its label.
    Marker { kind: MarkerKind, label: String },
    /// A resolved control transfer with its unwind depth.
    Unwind { kind: MarkerKind, depth: usize },
    /// Stops the machine.
    Halt,
}

impl Entry {
    pub fn op(name: impl Into<String>) -> Entry {
        Entry::Op(name.into())
    }

    /// A break marker targeting the named label.
    pub fn brk(label: impl Into<String>) -> Entry {
        Entry::Marker {
            kind: MarkerKind::Break,
            label: label.into(),
        }
    }

    /// A continue marker targeting the named label.
    pub fn cont(label: impl Into<String>) -> Entry {
        Entry::Marker {
            kind: MarkerKind::Continue,
            label: label.into(),
        }
    }
}

/// An interned sequence: its children, an optional state name, and the set
/// of label names its subtree still has markers for.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    children: Vec<Entry>,
    name: Option<String>,
    unresolved: BTreeSet<String>,
}

/// Arena of interned sequences with content-keyed lookup.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: Vec<Node>,
    lookup: HashMap<Vec<Entry>, NodeId>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Interns a sequence. Empty entries are dropped; an empty result is
    /// `Entry::Empty` and a singleton collapses to its only element, so
    /// `intern([x]) == x`. Identical content always returns the same node.
    pub fn intern(&mut self, entries: Vec<Entry>) -> Entry {
        let mut items: Vec<Entry> = entries
            .into_iter()
            .filter(|e| !matches!(e, Entry::Empty))
            .collect();
        match items.len() {
            0 => Entry::Empty,
            1 => items.remove(0),
            _ => {
                if let Some(&id) = self.lookup.get(&items) {
                    return Entry::Node(id);
                }
                let unresolved = self.collect_unresolved(&items);
                let id = self.nodes.len();
                self.lookup.insert(items.clone(), id);
                self.nodes.push(Node {
                    children: items,
                    name: None,
                    unresolved,
                });
                Entry::Node(id)
            }
        }
    }

    pub fn children(&self, id: NodeId) -> &[Entry] {
        &self.nodes[id].children
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes[id].name.as_deref()
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) {
        self.nodes[id].name = Some(name.into());
    }

    /// Label names with unresolved markers somewhere under this node.
    pub fn unresolved(&self, id: NodeId) -> &BTreeSet<String> {
        &self.nodes[id].unresolved
    }

    /// Whether the entry's subtree still carries a marker for the label.
    pub fn contains_label(&self, entry: &Entry, label: &str) -> bool {
        match entry {
            Entry::Marker { label: l, .. } => l == label,
            Entry::Node(id) => self.nodes[*id].unresolved.contains(label),
            _ => false,
        }
    }

    /// Rewrites a node's children in place, keeping the content lookup
    /// consistent. If the new content already keys another node, that node
    /// keeps the key; first interned wins.
    pub fn set_children(&mut self, id: NodeId, children: Vec<Entry>) {
        let unresolved = self.collect_unresolved(&children);
        let old = std::mem::replace(&mut self.nodes[id].children, children.clone());
        if self.lookup.get(&old) == Some(&id) {
            self.lookup.remove(&old);
        }
        self.lookup.entry(children).or_insert(id);
        self.nodes[id].unresolved = unresolved;
    }

    /// Every node reachable from the root, in deterministic preorder.
    pub fn reachable(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if seen[id] {
                continue;
            }
            seen[id] = true;
            order.push(id);
            for child in self.nodes[id].children.iter().rev() {
                if let Entry::Node(c) = child {
                    if !seen[*c] {
                        stack.push(*c);
                    }
                }
            }
        }
        order
    }

    fn collect_unresolved(&self, children: &[Entry]) -> BTreeSet<String> {
        let mut labels = BTreeSet::new();
        for child in children {
            match child {
                Entry::Node(id) => {
                    labels.extend(self.nodes[*id].unresolved.iter().cloned());
                }
                Entry::Marker { label, .. } => {
                    labels.insert(label.clone());
                }
                _ => {}
            }
        }
        labels
    }
}
