//! Parent/child view over the store.
//!
//! The tree is a snapshot: build it, read it, drop it. Every traversal is
//! iterative and tracks visited nodes, so a parent cycle delivered by a
//! misbehaving sender cannot make it loop.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{store::SpanStore, types::SpanId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyWarning {
    /// Parent links formed a loop. `cut_child` was promoted to a root and
    /// its link to `cut_parent` is ignored by this tree.
    CorruptTopology {
        cycle: Vec<SpanId>,
        cut_child: SpanId,
        cut_parent: SpanId,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallTree {
    roots: Vec<SpanId>,
    children: HashMap<SpanId, Vec<SpanId>>,
    warnings: Vec<TopologyWarning>,
}

impl CallTree {
    pub fn build(store: &SpanStore) -> Self {
        let mut children: HashMap<SpanId, Vec<SpanId>> = HashMap::new();
        let mut roots = Vec::new();
        for span in store.spans() {
            let kids = store.children(span.id);
            if !kids.is_empty() {
                children.insert(span.id, kids.to_vec());
            }
            if span.parent.is_none() {
                roots.push(span.id);
            }
        }

        let mut tree = CallTree {
            roots,
            children,
            warnings: Vec::new(),
        };

        let mut visited = HashSet::with_capacity(store.span_count());
        for root in tree.roots.clone() {
            tree.mark_reachable(root, &mut visited);
        }

        // Anything still unvisited hangs below a parent cycle. Spans come in
        // insertion order, so the walk starts from the earliest one.
        for span in store.spans() {
            if visited.contains(&span.id) {
                continue;
            }
            let cycle = find_cycle(store, span.id);
            let Some(cut_child) = cycle
                .iter()
                .copied()
                .min_by_key(|id| store.span(*id).map_or(u64::MAX, |s| s.seq))
            else {
                continue;
            };
            let Some(cut_parent) = store.span(cut_child).and_then(|s| s.parent) else {
                continue;
            };

            tracing::warn!(
                cycle = ?cycle,
                promoted = %cut_child,
                "parent links form a cycle; promoting span to root"
            );

            if let Some(kids) = tree.children.get_mut(&cut_parent) {
                kids.retain(|kid| *kid != cut_child);
            }
            tree.roots.push(cut_child);
            tree.warnings.push(TopologyWarning::CorruptTopology {
                cycle,
                cut_child,
                cut_parent,
            });
            tree.mark_reachable(cut_child, &mut visited);
        }

        tree.roots
            .sort_by_key(|id| store.span(*id).map_or(u64::MAX, |s| s.seq));
        tree
    }

    pub fn roots(&self) -> &[SpanId] {
        &self.roots
    }

    pub fn children(&self, id: SpanId) -> &[SpanId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn warnings(&self) -> &[TopologyWarning] {
        &self.warnings
    }

    pub fn is_corrupt(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Pre-order walk from every root, paired with the depth of each span.
    pub fn depth_first(&self) -> Vec<(SpanId, usize)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<(SpanId, usize)> =
            self.roots.iter().rev().map(|root| (*root, 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push((id, depth));
            for kid in self.children(id).iter().rev() {
                stack.push((*kid, depth + 1));
            }
        }
        out
    }

    fn mark_reachable(&self, from: SpanId, visited: &mut HashSet<SpanId>) {
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if visited.insert(id) {
                stack.extend_from_slice(self.children(id));
            }
        }
    }
}

/// Follows parent links from `start` until one repeats and returns the loop.
fn find_cycle(store: &SpanStore, start: SpanId) -> Vec<SpanId> {
    let mut path = Vec::new();
    let mut on_path = HashSet::new();
    let mut current = Some(start);

    while let Some(id) = current {
        if !on_path.insert(id) {
            let at = path.iter().position(|p| *p == id).unwrap_or(0);
            return path.split_off(at);
        }
        path.push(id);
        current = store.span(id).and_then(|span| span.parent);
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Span;

    fn span(id: u64, parent: Option<u64>) -> Span {
        let mut span = Span::new(SpanId(id));
        span.parent = parent.map(SpanId);
        span
    }

    #[test]
    fn placeholder_parent_is_a_root() {
        let mut store = SpanStore::new();
        store.apply_span(span(2, Some(1)));
        store.apply_span(span(3, Some(2)));
        store.apply_span(span(4, None));

        let tree = CallTree::build(&store);
        assert_eq!(tree.roots(), &[SpanId(1), SpanId(4)]);
        assert_eq!(
            tree.depth_first(),
            vec![(SpanId(1), 0), (SpanId(2), 1), (SpanId(3), 2), (SpanId(4), 0)]
        );
        assert!(!tree.is_corrupt());
    }

    #[test]
    fn cycle_is_cut_at_earliest_member() {
        let mut store = SpanStore::new();
        store.apply_span(span(1, None));
        store.apply_span(span(2, None));
        store.apply_span(span(3, Some(2)));
        store.apply_span(span(2, Some(3)));
        store.apply_span(span(4, Some(3)));

        let tree = CallTree::build(&store);
        assert_eq!(tree.roots(), &[SpanId(1), SpanId(2)]);
        assert!(tree.children(SpanId(3)).contains(&SpanId(4)));
        assert!(!tree.children(SpanId(3)).contains(&SpanId(2)));
        assert_eq!(
            tree.warnings(),
            &[TopologyWarning::CorruptTopology {
                cycle: vec![SpanId(2), SpanId(3)],
                cut_child: SpanId(2),
                cut_parent: SpanId(3),
            }]
        );

        let ids: Vec<_> = tree.depth_first().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, [SpanId(1), SpanId(2), SpanId(3), SpanId(4)]);
    }

    #[test]
    fn self_parent_is_cut() {
        let mut store = SpanStore::new();
        store.apply_span(span(5, Some(5)));

        let tree = CallTree::build(&store);
        assert_eq!(tree.roots(), &[SpanId(5)]);
        assert!(tree.children(SpanId(5)).is_empty());
        assert_eq!(tree.warnings().len(), 1);
    }
}
