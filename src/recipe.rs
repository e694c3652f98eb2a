// src/recipe.rs

//! Recipes and the composed work-dependency graph.
//!
//! A recipe names a product: a DAG of work types where each work depends on
//! a set of parent works, plus how many units to produce and which direction
//! the product enters its start module from. Recipes share one work-type
//! vocabulary; the seeder composes all recipe graphs into a single
//! [`WorkGraph`] whose parent-less nodes carry the names of the recipes that
//! start there.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::grid::Direction;

/// A named product: a DAG of work-type dependencies with a multiplicity.
#[derive(Debug, Clone)]
pub struct Recipe {
    name: String,
    /// Work type to the set of work types it depends on.
    dependencies: BTreeMap<String, BTreeSet<String>>,
    start_direction: Direction,
    amount: u32,
}

impl Recipe {
    /// Create a new recipe.
    pub fn new(
        name: impl Into<String>,
        dependencies: BTreeMap<String, BTreeSet<String>>,
        start_direction: Direction,
        amount: u32,
    ) -> Self {
        Self {
            name: name.into(),
            dependencies,
            start_direction,
            amount,
        }
    }

    /// The recipe name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The direction the product enters its start module from.
    pub fn start_direction(&self) -> Direction {
        self.start_direction
    }

    /// How many units to produce.
    pub fn amount(&self) -> u32 {
        self.amount
    }

    /// The work types this recipe declares dependencies for.
    pub fn works(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    /// Iterate `(work, parents)` pairs.
    pub fn items(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.dependencies
            .iter()
            .map(|(w, parents)| (w.as_str(), parents))
    }

    /// The parents of a work type, if declared.
    pub fn parents(&self, work: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(work)
    }

    /// Build this recipe's dependency graph, tagging its entry points.
    ///
    /// Every work mentioned anywhere (as a key or as a parent) becomes a
    /// node; parent-less nodes are marked as starting this recipe.
    pub fn to_graph(&self) -> WorkGraph {
        let mut graph = WorkGraph::default();
        for (work, parents) in self.items() {
            graph.add_work(work);
            for p in parents {
                graph.add_dependency(work, p);
            }
        }
        for (work, _) in graph.top_nodes() {
            graph.mark_start(&work, &self.name);
        }
        graph
    }

    /// The deterministic recipe encoding used in layout strings.
    pub fn encode(&self, start_module: &str, start_direction: Direction) -> String {
        format!(
            "{}@{}&{}",
            self.name,
            start_module,
            start_direction.index()
        )
    }
}

/// A directed graph over the shared work-type vocabulary.
///
/// Edges point from a work to the works it depends on; the "top" nodes are
/// those with no remaining parents, which is exactly the work that can be
/// performed next.
#[derive(Debug, Clone, Default)]
pub struct WorkGraph {
    /// Work type to its unfinished parents.
    parents: BTreeMap<String, BTreeSet<String>>,
    /// Work type to the recipes whose entry point it is.
    starts: BTreeMap<String, BTreeSet<String>>,
}

impl WorkGraph {
    /// Ensure a work node exists.
    pub fn add_work(&mut self, work: &str) {
        self.parents.entry(work.to_string()).or_default();
    }

    /// Add a dependency edge: `work` depends on `parent`.
    pub fn add_dependency(&mut self, work: &str, parent: &str) {
        self.add_work(work);
        self.add_work(parent);
        self.parents
            .get_mut(work)
            .unwrap()
            .insert(parent.to_string());
    }

    /// Record that `recipe` starts at `work`.
    pub fn mark_start(&mut self, work: &str, recipe: &str) {
        self.starts
            .entry(work.to_string())
            .or_default()
            .insert(recipe.to_string());
    }

    /// Whether the graph has no nodes left.
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Number of work nodes.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Whether `work` is a node of the graph.
    pub fn contains(&self, work: &str) -> bool {
        self.parents.contains_key(work)
    }

    /// The parent-less nodes, with the recipes starting at each.
    pub fn top_nodes(&self) -> Vec<(String, BTreeSet<String>)> {
        self.parents
            .iter()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(work, _)| {
                (
                    work.clone(),
                    self.starts.get(work).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Remove a node, unblocking any work that depended on it.
    pub fn remove_node(&mut self, work: &str) {
        self.parents.remove(work);
        self.starts.remove(work);
        for parents in self.parents.values_mut() {
            parents.remove(work);
        }
    }

    /// Topologically sort the works, parents before children.
    ///
    /// Returns an error naming the stuck works when the graph has a cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut remaining = self.clone();
        let mut order = Vec::with_capacity(remaining.len());
        loop {
            let tops = remaining.top_nodes();
            if tops.is_empty() {
                break;
            }
            for (work, _) in tops {
                order.push(work.clone());
                remaining.remove_node(&work);
            }
        }
        if !remaining.is_empty() {
            let stuck: Vec<String> = remaining.parents.keys().cloned().collect();
            return Err(Error::SeedError(format!(
                "circular work dependency among: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Whether the dependency graph contains a cycle.
    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }
}

/// Compose the dependency graphs of all recipes over the shared work-type
/// vocabulary, unioning the per-node recipe start sets.
pub fn compose_recipes(recipes: &[Recipe]) -> WorkGraph {
    let mut result = WorkGraph::default();
    for recipe in recipes {
        let graph = recipe.to_graph();
        for (work, parents) in &graph.parents {
            result.add_work(work);
            for p in parents {
                result.add_dependency(work, p);
            }
        }
        for (work, names) in &graph.starts {
            for name in names {
                result.mark_start(work, name);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        pairs
            .iter()
            .map(|(w, ps)| {
                (
                    w.to_string(),
                    ps.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_recipe_encoding() {
        let r = Recipe::new("rec0", deps(&[("a", &[])]), Direction::Up, 1);
        assert_eq!(r.encode("m3", Direction::Left), "rec0@m3&3");
        assert_eq!(r.encode("m3", Direction::Up), "rec0@m3&0");
    }

    #[test]
    fn test_to_graph_marks_entry_points() {
        // b depends on a; a is the entry point.
        let r = Recipe::new("rec0", deps(&[("b", &["a"]), ("a", &[])]), Direction::Up, 1);
        let g = r.to_graph();
        let tops = g.top_nodes();
        assert_eq!(tops.len(), 1);
        assert_eq!(tops[0].0, "a");
        assert!(tops[0].1.contains("rec0"));
    }

    #[test]
    fn test_parent_only_works_become_nodes() {
        // "a" appears only as a parent of "b".
        let r = Recipe::new("rec0", deps(&[("b", &["a"])]), Direction::Up, 1);
        let g = r.to_graph();
        assert!(g.contains("a"));
        assert!(g.contains("b"));
        assert_eq!(g.top_nodes().len(), 1);
    }

    #[test]
    fn test_remove_node_unblocks_children() {
        let r = Recipe::new(
            "rec0",
            deps(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]),
            Direction::Up,
            1,
        );
        let mut g = r.to_graph();
        g.remove_node("a");
        let tops = g.top_nodes();
        assert_eq!(tops.len(), 1);
        assert_eq!(tops[0].0, "b");
    }

    #[test]
    fn test_topological_sort_linear() {
        let r = Recipe::new(
            "rec0",
            deps(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]),
            Direction::Up,
            1,
        );
        let order = r.to_graph().topological_sort().unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topological_sort_detects_cycle() {
        let r = Recipe::new(
            "rec0",
            deps(&[("a", &["b"]), ("b", &["a"])]),
            Direction::Up,
            1,
        );
        assert!(r.to_graph().has_cycle());
    }

    #[test]
    fn test_compose_unions_starts() {
        let r0 = Recipe::new("rec0", deps(&[("b", &["a"]), ("a", &[])]), Direction::Up, 1);
        let r1 = Recipe::new("rec1", deps(&[("c", &["a"]), ("a", &[])]), Direction::Up, 1);
        let g = compose_recipes(&[r0, r1]);
        assert_eq!(g.len(), 3);
        let tops = g.top_nodes();
        assert_eq!(tops.len(), 1);
        let (work, starts) = &tops[0];
        assert_eq!(work, "a");
        assert!(starts.contains("rec0") && starts.contains("rec1"));
    }

    #[test]
    fn test_compose_disjoint_recipes() {
        let r0 = Recipe::new("rec0", deps(&[("a", &[])]), Direction::Up, 1);
        let r1 = Recipe::new("rec1", deps(&[("b", &[])]), Direction::Up, 1);
        let g = compose_recipes(&[r0, r1]);
        let tops = g.top_nodes();
        assert_eq!(tops.len(), 2);
        assert!(tops.iter().any(|(w, s)| w == "a" && s.contains("rec0")));
        assert!(tops.iter().any(|(w, s)| w == "b" && s.contains("rec1")));
    }
}
