//! A generic before/after constraint solver.
//!
//! Nodes are registered under unique names with a payload and two sets of
//! constraints. Sorting builds a directed graph from the constraints, with two
//! virtual nodes, [`Anchor::First`] and [`Anchor::Last`], that are always
//! present and carry no payload, and then runs Kahn's algorithm over it.
//!
//! Ties between nodes that are ready at the same time are broken by
//! registration order, so the same input always sorts the same way.
//!
//! ## Soft constraints
//!
//! [`Anchor::OneOf`] constrains against the first of its names that is
//! actually registered when sorting. If none of them is, the constraint is
//! dropped. This allows ordering relative to things that may or may not be
//! part of a given configuration.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::ArcStr;
use crate::error::{CycleError, SortError};

/// One end of an ordering constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Anchor {
    /// The virtual node that sorts before everything.
    First,
    /// The virtual node that sorts after everything.
    Last,
    /// A registered name. Sorting fails if it is missing.
    Name(ArcStr),
    /// The first registered name of the list, or nothing.
    OneOf(Vec<ArcStr>),
}

impl Anchor {
    pub fn name(name: impl Into<ArcStr>) -> Self {
        Anchor::Name(name.into())
    }

    pub fn one_of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        Anchor::OneOf(names.into_iter().map(Into::into).collect())
    }

    /// Drops references to `name`. Returns `false` when nothing is left of
    /// the constraint.
    fn forget(&mut self, name: &str) -> bool {
        match self {
            Anchor::First | Anchor::Last => true,
            Anchor::Name(other) => &**other != name,
            Anchor::OneOf(names) => {
                names.retain(|other| &**other != name);
                !names.is_empty()
            }
        }
    }
}

impl From<&str> for Anchor {
    fn from(name: &str) -> Self {
        Anchor::Name(name.into())
    }
}

#[derive(Debug)]
struct Node<T> {
    name: ArcStr,
    value: T,
    after: Vec<Anchor>,
    before: Vec<Anchor>,
}

/// Sorts named values by their before/after constraints.
#[derive(Debug)]
pub struct TopologicalSorter<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Default for TopologicalSorter<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T> TopologicalSorter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under `name`.
    ///
    /// A node declared without any constraint sorts before [`Anchor::Last`].
    /// Registering a name again replaces the earlier node, which also moves
    /// it to the end of the registration order.
    pub fn add(
        &mut self,
        name: impl Into<ArcStr>,
        value: T,
        after: impl IntoIterator<Item = Anchor>,
        before: impl IntoIterator<Item = Anchor>,
    ) {
        let name = name.into();
        let after: Vec<_> = after.into_iter().collect();
        let mut before: Vec<_> = before.into_iter().collect();

        if after.is_empty() && before.is_empty() {
            before.push(Anchor::Last);
        }

        self.nodes.retain(|node| node.name != name);
        self.nodes.push(Node {
            name,
            value,
            after,
            before,
        });
    }

    /// Removes a node together with every constraint that refers to it.
    pub fn remove(&mut self, name: &str) -> Option<T> {
        let position = self.nodes.iter().position(|node| &*node.name == name)?;
        let node = self.nodes.remove(position);

        for other in &mut self.nodes {
            other.after.retain_mut(|anchor| anchor.forget(name));
            other.before.retain_mut(|anchor| anchor.forget(name));
        }

        Some(node.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|node| &*node.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.nodes
            .iter()
            .find(|node| &*node.name == name)
            .map(|node| &node.value)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| &*node.name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns every node in an order that satisfies all constraints.
    pub fn sorted(&self) -> Result<Vec<(&str, &T)>, SortError> {
        // Weights are positions in `self.nodes`, the virtual nodes have none.
        // Node indices follow registration order, which the ready queue
        // relies on for tie-breaking.
        let mut graph: DiGraph<Option<usize>, ()> = DiGraph::new();
        let first = graph.add_node(None);
        let last = graph.add_node(None);
        graph.add_edge(first, last, ());

        let mut index: HashMap<&str, NodeIndex> = HashMap::new();
        for (position, node) in self.nodes.iter().enumerate() {
            index.insert(&node.name, graph.add_node(Some(position)));
        }

        let resolve = |node: &Node<T>, anchor: &Anchor| -> Result<Option<NodeIndex>, SortError> {
            match anchor {
                Anchor::First => Ok(Some(first)),
                Anchor::Last => Ok(Some(last)),
                Anchor::Name(name) => match index.get(&**name) {
                    Some(&target) => Ok(Some(target)),
                    None => Err(SortError::Unsatisfied {
                        name: node.name.clone(),
                        missing: name.clone(),
                    }),
                },
                Anchor::OneOf(names) => Ok(names
                    .iter()
                    .find_map(|name| index.get(&**name).copied())),
            }
        };

        let mut edges = Vec::new();
        for node in &self.nodes {
            let this = index[&*node.name];

            for anchor in &node.after {
                if let Some(other) = resolve(node, anchor)? {
                    edges.push((other, this));
                }
            }

            for anchor in &node.before {
                if let Some(other) = resolve(node, anchor)? {
                    edges.push((this, other));
                }
            }
        }

        for (from, to) in edges {
            graph.update_edge(from, to, ());
        }

        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|ix| graph.neighbors_directed(ix, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
            .node_indices()
            .filter(|ix| in_degree[ix.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(graph.node_count());
        let mut done = vec![false; graph.node_count()];

        while let Some(Reverse(ix)) = ready.pop() {
            order.push(ix);
            done[ix.index()] = true;

            for next in graph.neighbors_directed(ix, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < graph.node_count() {
            let label = |ix: NodeIndex| -> ArcStr {
                match graph[ix] {
                    Some(position) => self.nodes[position].name.clone(),
                    None if ix == first => "FIRST".into(),
                    None => "LAST".into(),
                }
            };

            let mut dependents = BTreeMap::new();
            for ix in graph.node_indices().filter(|ix| !done[ix.index()]) {
                let mut names: Vec<ArcStr> = graph
                    .neighbors_directed(ix, Direction::Outgoing)
                    .filter(|next| !done[next.index()])
                    .map(label)
                    .collect();
                names.sort();
                dependents.insert(label(ix), names);
            }

            return Err(CycleError { dependents }.into());
        }

        Ok(order
            .into_iter()
            .filter_map(|ix| graph[ix])
            .map(|position| {
                let node = &self.nodes[position];
                (&*node.name, &node.value)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<T>(sorted: &[(&str, &T)]) -> Vec<String> {
        sorted.iter().map(|(name, _)| name.to_string()).collect()
    }

    #[test]
    fn test_registration_order_without_constraints() {
        let mut sorter = TopologicalSorter::new();
        sorter.add("a", 1, [], []);
        sorter.add("b", 2, [], []);
        sorter.add("c", 3, [], []);

        let sorted = sorter.sorted().unwrap();
        assert_eq!(names(&sorted), vec!["a", "b", "c"]);
        assert_eq!(*sorted[1].1, 2);
    }

    #[test]
    fn test_before_and_after() {
        let mut sorter = TopologicalSorter::new();
        sorter.add("a", (), [Anchor::name("c")], []);
        sorter.add("b", (), [], [Anchor::name("c")]);
        sorter.add("c", (), [], []);
        sorter.add("d", (), [Anchor::First], []);

        let sorted = sorter.sorted().unwrap();
        assert_eq!(names(&sorted), vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_soft_fallback() {
        let mut sorter = TopologicalSorter::new();
        sorter.add("Y", (), [Anchor::one_of(["Z", "X"])], []);
        sorter.add("X", (), [], [Anchor::Last]);

        let sorted = sorter.sorted().unwrap();
        assert_eq!(names(&sorted), vec!["X", "Y"]);
    }

    #[test]
    fn test_soft_fallback_prefers_first_alternative() {
        let mut sorter = TopologicalSorter::new();
        sorter.add("Y", (), [Anchor::one_of(["Z", "X"])], []);
        sorter.add("X", (), [], []);
        sorter.add("Z", (), [Anchor::name("X")], []);

        let sorted = sorter.sorted().unwrap();
        assert_eq!(names(&sorted), vec!["X", "Z", "Y"]);
    }

    #[test]
    fn test_soft_constraint_dropped() {
        let mut sorter = TopologicalSorter::new();
        sorter.add("a", (), [Anchor::one_of(["missing"])], []);

        assert_eq!(names(&sorter.sorted().unwrap()), vec!["a"]);
    }

    #[test]
    fn test_missing_name_is_unsatisfied() {
        let mut sorter = TopologicalSorter::new();
        sorter.add("a", (), [Anchor::name("missing")], []);

        assert!(matches!(
            sorter.sorted(),
            Err(SortError::Unsatisfied { .. })
        ));
    }

    #[test]
    fn test_cycle() {
        let mut sorter = TopologicalSorter::new();
        sorter.add("A", (), [], [Anchor::name("B")]);
        sorter.add("B", (), [], [Anchor::name("A")]);

        let Err(SortError::Cycle(err)) = sorter.sorted() else {
            panic!("expected a cycle");
        };

        let names: Vec<_> = err.names().collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(err.dependents[&ArcStr::from("A")], vec![ArcStr::from("B")]);
        assert_eq!(err.dependents[&ArcStr::from("B")], vec![ArcStr::from("A")]);
    }

    #[test]
    fn test_remove_drops_constraints() {
        let mut sorter = TopologicalSorter::new();
        sorter.add("a", 1, [], []);
        sorter.add("b", 2, [Anchor::name("a")], []);
        sorter.add("c", 3, [Anchor::one_of(["a", "b"])], []);

        assert_eq!(sorter.remove("a"), Some(1));
        assert!(!sorter.contains("a"));

        let sorted = sorter.sorted().unwrap();
        assert_eq!(names(&sorted), vec!["b", "c"]);
    }

    #[test]
    fn test_add_replaces() {
        let mut sorter = TopologicalSorter::new();
        sorter.add("a", 1, [], []);
        sorter.add("b", 2, [], []);
        sorter.add("a", 3, [], []);

        assert_eq!(sorter.len(), 2);
        assert_eq!(sorter.get("a"), Some(&3));
        assert_eq!(names(&sorter.sorted().unwrap()), vec!["b", "a"]);
    }
}
