//! # Forest: the service dependency graph.
//!
//! Services are arena nodes; an edge `p → c` means `c` may only start once `p`
//! is healthy. Edges come from both sides of the declaration:
//! `c.requires = [p]` and `p.dependents = [c]` produce the same edge.
//!
//! ```text
//! build(specs)   duplicate names, unresolved references and cycles are rejected
//!     │
//! shake(pred)    drops matching nodes with their whole subtree, to a fixpoint
//!     │
//! weight()       freezes every node's subtree and seeds its barrier
//! ```
//!
//! ## Weighting
//! Nodes are visited children first. A node whose barrier is still zero adds
//! one unit to itself and one to every node of its subtree. Since every
//! descendant is visited before its ancestors, each node ends with one unit of
//! its own plus one per distinct ancestor:
//!
//! ```text
//!   a          a: 1
//!  / \         b: 2   c: 2
//! b   c
//!  \ /
//!   d          d: 4   (self + a + b + c)
//! ```
//!
//! The subtree sets computed here are never recomputed during activation.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use super::CountdownBarrier;
use crate::config::ServiceSpec;
use crate::error::BuildError;

/// One service inside the forest.
#[derive(Debug)]
pub struct ServiceNode {
    spec: Arc<ServiceSpec>,
    children: Vec<usize>,
    parents: Vec<usize>,
    subtree: Vec<usize>,
    barrier: CountdownBarrier,
    satisfied: AtomicBool,
}

impl ServiceNode {
    fn new(spec: Arc<ServiceSpec>) -> Self {
        Self {
            spec,
            children: Vec::new(),
            parents: Vec::new(),
            subtree: Vec::new(),
            barrier: CountdownBarrier::new(),
            satisfied: AtomicBool::new(false),
        }
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Service declaration.
    pub fn spec(&self) -> &Arc<ServiceSpec> {
        &self.spec
    }

    /// Indices of direct dependents.
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Indices of direct prerequisites.
    pub fn parents(&self) -> &[usize] {
        &self.parents
    }

    /// Indices of every transitive dependent, frozen by [`Forest::weight`].
    pub fn subtree(&self) -> &[usize] {
        &self.subtree
    }

    /// Activation barrier.
    pub fn barrier(&self) -> &CountdownBarrier {
        &self.barrier
    }

    /// Marks the node satisfied; `true` only for the first call.
    pub(crate) fn mark_satisfied(&self) -> bool {
        !self.satisfied.swap(true, Ordering::AcqRel)
    }
}

/// Dependency forest of all declared services.
#[derive(Debug, Default)]
pub struct Forest {
    nodes: Vec<ServiceNode>,
    index: HashMap<String, usize>,
    weighted: bool,
}

impl Forest {
    /// Builds the forest, validating names, references and acyclicity.
    pub fn build<I>(specs: I) -> Result<Self, BuildError>
    where
        I: IntoIterator,
        I::Item: Into<Arc<ServiceSpec>>,
    {
        let mut forest = Forest::default();
        for spec in specs {
            let spec: Arc<ServiceSpec> = spec.into();
            if forest.index.contains_key(&spec.name) {
                return Err(BuildError::DuplicateService {
                    name: spec.name.clone(),
                });
            }
            forest.index.insert(spec.name.clone(), forest.nodes.len());
            forest.nodes.push(ServiceNode::new(spec));
        }

        let mut edges = Vec::new();
        for (idx, node) in forest.nodes.iter().enumerate() {
            for required in &node.spec.requires {
                edges.push((forest.resolve(node.name(), required)?, idx));
            }
            for dependent in &node.spec.dependents {
                edges.push((idx, forest.resolve(node.name(), dependent)?));
            }
        }
        for (parent, child) in edges {
            if !forest.nodes[parent].children.contains(&child) {
                forest.nodes[parent].children.push(child);
                forest.nodes[child].parents.push(parent);
            }
        }

        forest.check_acyclic()?;
        Ok(forest)
    }

    fn resolve(&self, service: &str, reference: &str) -> Result<usize, BuildError> {
        self.index
            .get(reference)
            .copied()
            .ok_or_else(|| BuildError::UnresolvedReference {
                service: service.to_owned(),
                reference: reference.to_owned(),
            })
    }

    fn check_acyclic(&self) -> Result<(), BuildError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            forest: &Forest,
            idx: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            marks[idx] = Mark::Active;
            stack.push(idx);
            for &child in &forest.nodes[idx].children {
                match marks[child] {
                    Mark::Active => {
                        // Active nodes are exactly the ones on the stack.
                        let start = stack.iter().position(|&n| n == child);
                        debug_assert!(start.is_some(), "active node {child} missing from the DFS stack");
                        let start = start.unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(child);
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(forest, child, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[idx] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        let mut stack = Vec::new();
        for idx in 0..self.nodes.len() {
            if marks[idx] == Mark::New {
                if let Some(cycle) = visit(self, idx, &mut marks, &mut stack) {
                    return Err(BuildError::Cycle {
                        path: cycle
                            .into_iter()
                            .map(|n| self.nodes[n].name().to_owned())
                            .collect(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Drops disabled services, and lazy services nobody depends on.
    pub fn shake_default(&mut self) -> usize {
        self.shake(|spec, children| !spec.enabled || (spec.lazy && children == 0))
    }

    /// Drops every node for which `drop(spec, remaining_children)` holds, together
    /// with its subtree, until nothing more matches. Returns the number of dropped nodes.
    ///
    /// Clears any previous weighting.
    pub fn shake<F>(&mut self, drop: F) -> usize
    where
        F: Fn(&ServiceSpec, usize) -> bool,
    {
        let mut alive = vec![true; self.nodes.len()];
        loop {
            let matched: Vec<usize> = (0..self.nodes.len())
                .filter(|&idx| alive[idx])
                .filter(|&idx| {
                    let node = &self.nodes[idx];
                    let children = node.children.iter().filter(|&&c| alive[c]).count();
                    drop(&node.spec, children)
                })
                .collect();
            if matched.is_empty() {
                break;
            }
            for idx in matched {
                for gone in self.descendants(idx).into_iter().chain([idx]) {
                    if std::mem::replace(&mut alive[gone], false) {
                        info!(service = self.nodes[gone].name(), "service dropped from the forest");
                    }
                }
            }
        }

        let dropped = alive.iter().filter(|a| !**a).count();
        if dropped > 0 {
            self.retain(&alive);
        }
        self.weighted = false;
        dropped
    }

    fn retain(&mut self, alive: &[bool]) {
        let mut remap = vec![None; self.nodes.len()];
        let mut next = 0;
        for (idx, keep) in alive.iter().enumerate() {
            if *keep {
                remap[idx] = Some(next);
                next += 1;
            }
        }
        let renumber = |list: &[usize]| -> Vec<usize> { list.iter().filter_map(|&i| remap[i]).collect() };

        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .zip(alive)
            .filter(|(_, keep)| **keep)
            .map(|(node, _)| ServiceNode {
                children: renumber(&node.children),
                parents: renumber(&node.parents),
                ..ServiceNode::new(node.spec)
            })
            .collect();
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.name().to_owned(), idx))
            .collect();
    }

    /// Distinct transitive dependents of `idx`, in discovery order.
    fn descendants(&self, idx: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[idx].children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            if seen.insert(n) {
                out.push(n);
                stack.extend(self.nodes[n].children.iter().rev().copied());
            }
        }
        out
    }

    /// Freezes subtree membership and seeds every barrier.
    pub fn weight(&mut self) {
        for idx in 0..self.nodes.len() {
            let subtree = self.descendants(idx);
            let node = &mut self.nodes[idx];
            node.subtree = subtree;
            node.barrier.reset();
            node.satisfied.store(false, Ordering::Release);
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        for idx in 0..self.nodes.len() {
            self.post_order(idx, &mut visited, &mut order);
        }
        for idx in order {
            let node = &self.nodes[idx];
            if node.barrier.count() == 0 {
                node.barrier.increment();
                for &d in &node.subtree {
                    self.nodes[d].barrier.increment();
                }
            }
        }
        self.weighted = true;
    }

    fn post_order(&self, idx: usize, visited: &mut [bool], order: &mut Vec<usize>) {
        if std::mem::replace(&mut visited[idx], true) {
            return;
        }
        for &child in &self.nodes[idx].children {
            self.post_order(child, visited, order);
        }
        order.push(idx);
    }

    /// Whether [`weight`](Self::weight) ran since the last shape change.
    pub fn is_weighted(&self) -> bool {
        self.weighted
    }

    /// All nodes, in declaration order.
    pub fn nodes(&self) -> &[ServiceNode] {
        &self.nodes
    }

    /// Node by index.
    pub fn node_at(&self, idx: usize) -> Option<&ServiceNode> {
        self.nodes.get(idx)
    }

    /// Node by name.
    pub fn node(&self, name: &str) -> Option<&ServiceNode> {
        self.index_of(name).map(|idx| &self.nodes[idx])
    }

    /// Index of `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Nodes without prerequisites.
    pub fn roots(&self) -> impl Iterator<Item = &ServiceNode> {
        self.nodes.iter().filter(|n| n.parents.is_empty())
    }

    /// Number of services.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no service survived.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Renders every tree, roots at column zero.
    ///
    /// A node with several prerequisites appears under each of them.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.parents.is_empty() {
                let _ = writeln!(out, "{}", node.name());
                self.render_children(idx, "", &mut out);
            }
        }
        out
    }

    fn render_children(&self, idx: usize, prefix: &str, out: &mut String) {
        let children = &self.nodes[idx].children;
        for (pos, &child) in children.iter().enumerate() {
            let last = pos + 1 == children.len();
            let branch = if last { "└── " } else { "├── " };
            let _ = writeln!(out, "{prefix}{branch}{}", self.nodes[child].name());
            let nested = format!("{prefix}{}", if last { "    " } else { "│   " });
            self.render_children(child, &nested, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str) -> ServiceSpec {
        ServiceSpec::new(name, "/bin/true")
    }

    fn counts(forest: &Forest) -> Vec<(String, usize)> {
        forest
            .nodes()
            .iter()
            .map(|n| (n.name().to_owned(), n.barrier().count()))
            .collect()
    }

    #[test]
    fn every_name_appears_once() {
        let forest = Forest::build([
            svc("db"),
            svc("cache"),
            svc("api").with_requires(["db", "cache"]),
            svc("worker").with_requires(["db"]),
        ])
        .unwrap();
        let mut names: Vec<_> = forest.nodes().iter().map(|n| n.name().to_owned()).collect();
        names.sort();
        assert_eq!(names, vec!["api", "cache", "db", "worker"]);

        let roots: Vec<_> = forest.roots().map(|n| n.name()).collect();
        assert_eq!(roots, vec!["db", "cache"]);
    }

    #[test]
    fn requires_and_dependents_are_merged() {
        let forest = Forest::build([
            svc("db").with_dependents(["api"]),
            svc("api").with_requires(["db"]),
        ])
        .unwrap();
        let db = forest.node("db").unwrap();
        assert_eq!(db.children(), &[1]);
        assert_eq!(forest.node("api").unwrap().parents(), &[0]);
    }

    #[test]
    fn unresolved_reference_is_rejected() {
        let err = Forest::build([svc("api").with_requires(["db"])]).unwrap_err();
        assert_eq!(
            err,
            BuildError::UnresolvedReference {
                service: "api".into(),
                reference: "db".into()
            }
        );
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = Forest::build([svc("a"), svc("a")]).unwrap_err();
        assert_eq!(err.as_label(), "build_duplicate_service");
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let err = Forest::build([
            svc("a").with_requires(["c"]),
            svc("b").with_requires(["a"]),
            svc("c").with_requires(["b"]),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> c -> a");

        let err = Forest::build([svc("self").with_requires(["self"])]).unwrap_err();
        assert_eq!(err.as_label(), "build_cycle");
    }

    #[test]
    fn cycle_path_starts_at_the_reentered_node() {
        let err = Forest::build([
            svc("root"),
            svc("x").with_requires(["root", "z"]),
            svc("y").with_requires(["x"]),
            svc("z").with_requires(["y"]),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle detected: x -> y -> z -> x");
    }

    #[test]
    fn weight_counts_self_plus_distinct_ancestors() {
        let mut forest = Forest::build([
            svc("a"),
            svc("b").with_requires(["a"]),
            svc("c").with_requires(["a"]),
            svc("d").with_requires(["b", "c"]),
        ])
        .unwrap();
        forest.weight();
        assert!(forest.is_weighted());
        assert_eq!(
            counts(&forest),
            vec![
                ("a".into(), 1),
                ("b".into(), 2),
                ("c".into(), 2),
                ("d".into(), 4)
            ]
        );
        let mut subtree = forest.node("a").unwrap().subtree().to_vec();
        subtree.sort_unstable();
        assert_eq!(subtree, vec![1, 2, 3]);
    }

    #[test]
    fn weight_is_repeatable() {
        let mut forest = Forest::build([svc("a"), svc("b").with_requires(["a"])]).unwrap();
        forest.weight();
        forest.weight();
        assert_eq!(counts(&forest), vec![("a".into(), 1), ("b".into(), 2)]);
    }

    #[test]
    fn disabled_service_is_dropped_with_its_subtree() {
        let mut forest = Forest::build([
            svc("db").with_enabled(false),
            svc("api").with_requires(["db"]),
            svc("cron"),
        ])
        .unwrap();
        assert_eq!(forest.shake_default(), 2);
        assert_eq!(forest.len(), 1);
        assert!(forest.node("cron").is_some());
        assert_eq!(forest.index_of("cron"), Some(0));
    }

    #[test]
    fn lazy_leaves_are_shaken_to_a_fixpoint() {
        let mut forest = Forest::build([
            svc("base").with_lazy(true),
            svc("mid").with_lazy(true).with_requires(["base"]),
            svc("used").with_lazy(true),
            svc("app").with_requires(["used"]),
        ])
        .unwrap();
        assert_eq!(forest.shake_default(), 2);
        let names: Vec<_> = forest.nodes().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["used", "app"]);
        assert_eq!(forest.node("used").unwrap().children(), &[1]);
        assert_eq!(forest.node("app").unwrap().parents(), &[0]);
    }

    #[test]
    fn render_draws_each_tree() {
        let forest = Forest::build([
            svc("a"),
            svc("b").with_requires(["a"]),
            svc("c").with_requires(["a"]),
            svc("d").with_requires(["b"]),
            svc("solo"),
        ])
        .unwrap();
        let expected = "a\n├── b\n│   └── d\n└── c\nsolo\n";
        assert_eq!(forest.render(), expected);
    }
}
