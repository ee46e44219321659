//! Normalization passes that run between program construction and code
//! generation. In order: shared runs of entries are extracted into their
//! own nodes, every sequence is reduced to binary cons cells, leftover
//! control markers are rejected, and each node gets a unique state name.

use crate::store::{Entry, NodeId, NodeStore};
use crate::types::BuildError;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Extracts contiguous runs of entries that occur more than once among the
/// reachable sequences, longest runs first. Each shared run becomes its own
/// interned node so its states are emitted once.
///
/// Whole-sequence matches are left alone (the node itself already is the
/// shared form), so binary sequences and their resolved control depths are
/// never rewritten.
pub fn extract_common_runs(store: &mut NodeStore, root: NodeId) {
    let mut run_len = store
        .reachable(root)
        .iter()
        .map(|&id| store.children(id).len())
        .max()
        .unwrap_or(0);

    while run_len > 1 {
        let reachable = store.reachable(root);

        let mut seen: HashSet<Vec<Entry>> = HashSet::new();
        let mut duplicate: Option<Vec<Entry>> = None;
        'scan: for &id in &reachable {
            let children = store.children(id);
            if children.len() < run_len {
                continue;
            }
            for window in children.windows(run_len) {
                if seen.contains(window) {
                    duplicate = Some(window.to_vec());
                    break 'scan;
                }
                seen.insert(window.to_vec());
            }
        }

        match duplicate {
            None => run_len -= 1,
            Some(run) => {
                let replacement = store.intern(run.clone());
                let mut rewrote = false;
                for &id in &reachable {
                    loop {
                        let children = store.children(id);
                        // A sequence that is exactly the run stays as is.
                        if children.len() <= run_len {
                            break;
                        }
                        let Some(at) = children
                            .windows(run_len)
                            .position(|window| window == run.as_slice())
                        else {
                            break;
                        };
                        let mut rewritten = children[..at].to_vec();
                        rewritten.push(replacement.clone());
                        rewritten.extend_from_slice(&children[at + run_len..]);
                        store.set_children(id, rewritten);
                        rewrote = true;
                    }
                }
                // Every occurrence was a whole sequence (a rewrite can
                // produce a copy of an existing node). The run is as shared
                // as it will get; move on or the same duplicate is found
                // forever.
                if !rewrote {
                    run_len -= 1;
                }
            }
        }
    }
}

/// Rewrites every reachable sequence of more than two entries into a head
/// plus an interned tail, repeatedly, until the whole program is binary.
/// Tails are interned, so sequences with a common suffix share it.
pub fn reduce_to_binary(store: &mut NodeStore, root: NodeId) {
    for id in store.reachable(root) {
        let children = store.children(id).to_vec();
        if children.len() <= 2 {
            continue;
        }
        let tail = fold_tail(store, &children[1..]);
        store.set_children(id, vec![children[0].clone(), tail]);
    }
}

/// Right-folds a slice of entries into nested binary nodes, interning each
/// level so identical suffixes resolve to the same node.
fn fold_tail(store: &mut NodeStore, items: &[Entry]) -> Entry {
    if items.len() == 1 {
        return items[0].clone();
    }
    let tail = fold_tail(store, &items[1..]);
    store.intern(vec![items[0].clone(), tail])
}

/// Rejects any control marker that survived label resolution. Markers must
/// all have been replaced by resolved unwinds before code generation.
pub fn check_resolved(store: &NodeStore, root: NodeId) -> Result<(), BuildError> {
    for id in store.reachable(root) {
        for child in store.children(id) {
            if let Entry::Marker { label, .. } = child {
                return Err(BuildError::UnresolvedLabel(label.clone()));
            }
        }
    }
    Ok(())
}

/// Assigns a state name to every reachable node. Named nodes keep their
/// names; children derive theirs from the parent (the head child appends
/// `.0`, the tail child increments a trailing number). A node two parents
/// disagree about gets a synthetic name, and any name still shared after
/// propagation is disambiguated with the node id.
pub fn assign_names(store: &mut NodeStore, root: NodeId) -> Result<(), BuildError> {
    let reachable = store.reachable(root);

    let mut proposed: BTreeMap<NodeId, String> = BTreeMap::new();
    for &id in &reachable {
        if let Some(name) = store.name(id) {
            proposed.insert(id, name.to_string());
        }
    }

    fn propose(
        store: &NodeStore,
        proposed: &mut BTreeMap<NodeId, String>,
        id: NodeId,
        candidate: String,
    ) {
        match proposed.get(&id) {
            None => {
                proposed.insert(id, candidate);
            }
            Some(existing) if *existing == candidate => {}
            Some(_) => {
                // Contested and not pinned by an existing name: fall back to
                // a synthetic name.
                if store.name(id).is_none() {
                    proposed.insert(id, format!("node_{}.0", id));
                }
            }
        }
    }

    // Propagation reaches every node in at most |reachable| sweeps.
    for _ in 0..reachable.len() {
        for &id in &reachable {
            let Some(name) = proposed.get(&id).cloned() else {
                continue;
            };
            let children = store.children(id).to_vec();
            if children.len() != 2 {
                return Err(BuildError::NonBinarySequence(children.len()));
            }
            if let Entry::Node(head) = children[0] {
                propose(store, &mut proposed, head, format!("{}.0", name));
            }
            if let Entry::Node(tail) = children[1] {
                let candidate = increment_trailing(&name)
                    .unwrap_or_else(|| format!("node_{}.0", tail));
                propose(store, &mut proposed, tail, candidate);
            }
        }
    }

    for (&id, name) in &proposed {
        store.set_name(id, name.clone());
    }

    // Disambiguate any name claimed by several nodes.
    let mut seen = BTreeSet::new();
    let mut shared = BTreeSet::new();
    for &id in &reachable {
        if let Some(name) = store.name(id) {
            if !seen.insert(name.to_string()) {
                shared.insert(name.to_string());
            }
        }
    }
    for &id in &reachable {
        if let Some(name) = store.name(id) {
            if shared.contains(name) {
                let unique = format!("{}.n{}", name, id);
                store.set_name(id, unique);
            }
        }
    }

    let mut taken = BTreeSet::new();
    for &id in &reachable {
        let name = store
            .name(id)
            .ok_or(BuildError::UnnamedNode(id))?
            .to_string();
        if !taken.insert(name.clone()) {
            return Err(BuildError::DuplicateStateName(name));
        }
    }
    Ok(())
}

/// `main().0` becomes `main().1`; names without a trailing number have no
/// successor.
fn increment_trailing(name: &str) -> Option<String> {
    let (prefix, last) = name.rsplit_once('.')?;
    let n: u64 = last.parse().ok()?;
    Some(format!("{}.{}", prefix, n + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluate;
    use std::collections::BTreeMap as Regs;

    fn ops(names: &[&str]) -> Vec<Entry> {
        names.iter().map(|n| Entry::op(format!("4.{}.inc", n))).collect()
    }

    #[test]
    fn test_increment_trailing() {
        assert_eq!(increment_trailing("main().0"), Some("main().1".to_string()));
        assert_eq!(increment_trailing("node_7.12"), Some("node_7.13".to_string()));
        assert_eq!(increment_trailing("main()"), None);
        assert_eq!(increment_trailing("x.y"), None);
    }

    #[test]
    fn test_extraction_shares_repeated_runs() {
        let mut store = NodeStore::new();
        // The run a b c appears in two different sequences.
        let mut first = ops(&["a", "b", "c", "d"]);
        let mut second = ops(&["x", "a", "b", "c"]);
        let f = store.intern(std::mem::take(&mut first));
        let s = store.intern(std::mem::take(&mut second));
        let root = store.intern(vec![f, s]);
        let Entry::Node(root_id) = root else { panic!() };

        extract_common_runs(&mut store, root_id);

        // Both parents now reference one shared node holding a b c.
        let shared = store.intern(ops(&["a", "b", "c"]));
        let Entry::Node(shared_id) = shared else {
            panic!("run was not extracted");
        };
        let reachable = store.reachable(root_id);
        assert!(reachable.contains(&shared_id));
        let holders = reachable
            .iter()
            .filter(|&&id| store.children(id).contains(&Entry::Node(shared_id)))
            .count();
        assert_eq!(holders, 2);
    }

    #[test]
    fn test_extraction_settles_when_a_rewrite_recreates_a_node() {
        let mut store = NodeStore::new();
        // Extracting a b c from the long sequence turns it into a copy of
        // the existing binary node; the pass must settle on that instead of
        // rediscovering the same duplicate.
        let run = store.intern(ops(&["a", "b", "c"]));
        let d = Entry::op("4.d.inc");
        let pair = store.intern(vec![run.clone(), d.clone()]);
        let mut long = ops(&["a", "b", "c"]);
        long.push(d.clone());
        let long = store.intern(long);
        let root = store.intern(vec![pair, long.clone()]);
        let (Entry::Node(root_id), Entry::Node(long_id)) = (root.clone(), long) else {
            panic!()
        };

        let mut before: Regs<String, u64> = Regs::new();
        evaluate(&store, &root, &mut before, 10_000).unwrap();

        extract_common_runs(&mut store, root_id);

        assert_eq!(store.children(long_id), &[run, d]);
        let mut after: Regs<String, u64> = Regs::new();
        evaluate(&store, &root, &mut after, 10_000).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_reduction_makes_everything_binary() {
        let mut store = NodeStore::new();
        let long = store.intern(ops(&["a", "b", "c", "d", "e"]));
        let other = store.intern(ops(&["x", "y", "z"]));
        let root = store.intern(vec![long, other]);
        let Entry::Node(root_id) = root else { panic!() };

        reduce_to_binary(&mut store, root_id);

        for id in store.reachable(root_id) {
            assert_eq!(store.children(id).len(), 2, "node {} is not binary", id);
        }
    }

    #[test]
    fn test_reduction_shares_common_tails() {
        let mut store = NodeStore::new();
        let first = store.intern(ops(&["a", "x", "y", "z"]));
        let second = store.intern(ops(&["b", "x", "y", "z"]));
        let root = store.intern(vec![first, second]);
        let Entry::Node(root_id) = root else { panic!() };

        reduce_to_binary(&mut store, root_id);

        // Both reduced sequences hang off the same tail node.
        let Entry::Node(first_id) = store.children(root_id)[0].clone() else {
            panic!("head child should be a node");
        };
        let Entry::Node(second_id) = store.children(root_id)[1].clone() else {
            panic!("tail child should be a node");
        };
        let first_tail = store.children(first_id)[1].clone();
        let second_tail = store.children(second_id)[1].clone();
        assert_eq!(first_tail, second_tail);

        // And that tail is itself binary: x then (y z).
        let Entry::Node(tail_id) = first_tail else {
            panic!("tail was not a node");
        };
        assert_eq!(store.children(tail_id)[0], Entry::op("4.x.inc"));
        assert!(matches!(store.children(tail_id)[1], Entry::Node(_)));
    }

    #[test]
    fn test_normalization_preserves_evaluation() {
        let mut store = NodeStore::new();
        // A program with both a repeated run and long sequences.
        let run = &["a", "b", "a"];
        let mut left = ops(run);
        left.extend(ops(&["c"]));
        let mut right = ops(&["c"]);
        right.extend(ops(run));
        let l = store.intern(left);
        let r = store.intern(right);
        let root = store.intern(vec![l, r, Entry::op("4.a.inc")]);
        let Entry::Node(root_id) = root else { panic!() };

        let mut before: Regs<String, u64> = Regs::new();
        evaluate(&store, &root, &mut before, 10_000).unwrap();

        extract_common_runs(&mut store, root_id);
        reduce_to_binary(&mut store, root_id);

        let mut after: Regs<String, u64> = Regs::new();
        evaluate(&store, &root, &mut after, 10_000).unwrap();

        assert_eq!(before, after);
        assert_eq!(before["a"], 5);
        assert_eq!(before["b"], 2);
        assert_eq!(before["c"], 2);
    }

    #[test]
    fn test_check_resolved_rejects_markers() {
        let mut store = NodeStore::new();
        let body = store.intern(vec![Entry::op("4.a.decnz"), Entry::cont("loop")]);
        let root = store.intern(vec![Entry::op("4.a.inc"), body]);
        let Entry::Node(root_id) = root else { panic!() };

        assert_eq!(
            check_resolved(&store, root_id),
            Err(BuildError::UnresolvedLabel("loop".to_string()))
        );
    }

    #[test]
    fn test_assign_names_propagates_from_root() {
        let mut store = NodeStore::new();
        let inner = store.intern(ops(&["a", "b"]));
        let tail = store.intern(vec![inner.clone(), Entry::Halt]);
        let root = store.intern(vec![Entry::op("4.a.inc"), tail.clone()]);
        let (Entry::Node(root_id), Entry::Node(tail_id), Entry::Node(inner_id)) =
            (root, tail, inner)
        else {
            panic!()
        };
        store.set_name(root_id, "main().0");

        assign_names(&mut store, root_id).unwrap();

        assert_eq!(store.name(root_id), Some("main().0"));
        assert_eq!(store.name(tail_id), Some("main().1"));
        assert_eq!(store.name(inner_id), Some("main().1.0"));
    }

    #[test]
    fn test_assign_names_disambiguates_contested_children() {
        let mut store = NodeStore::new();
        let shared = store.intern(ops(&["a", "b"]));
        let left = store.intern(vec![shared.clone(), Entry::op("4.c.inc")]);
        let right = store.intern(vec![shared.clone(), Entry::op("4.d.inc")]);
        let root = store.intern(vec![left, right]);
        let (Entry::Node(root_id), Entry::Node(shared_id)) = (root, shared) else {
            panic!()
        };
        store.set_name(root_id, "main().0");

        assign_names(&mut store, root_id).unwrap();

        // Two parents proposed different names; the shared child got a
        // synthetic one.
        assert_eq!(
            store.name(shared_id),
            Some(format!("node_{}.0", shared_id).as_str())
        );

        // All names unique.
        let mut names = BTreeSet::new();
        for id in store.reachable(root_id) {
            assert!(names.insert(store.name(id).unwrap().to_string()));
        }
    }
}
