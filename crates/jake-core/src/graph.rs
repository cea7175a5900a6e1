//! Dependency Graph - petgraph-based recipe dependency tracking
//!
//! Built fresh per invocation from the requested targets. Edges point from a
//! dependency to the recipe that needs it, so a node's in-degree is its count
//! of unfinished dependencies.

use crate::error::{JakeError, Result};
use crate::globs;
use crate::recipe::{Jakefile, Recipe};
use crate::suggest;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Why one recipe waits for another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Listed in `dependencies`
    Explicit,
    /// A File recipe's `file_deps` pattern matches another File recipe's output
    File,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    InProgress,
    Done,
}

/// Resolved, acyclic graph of the recipes reachable from the targets
#[derive(Debug)]
pub struct RecipeGraph<'a> {
    graph: DiGraph<&'a Recipe, EdgeKind>,
    index: HashMap<&'a str, NodeIndex>,
    targets: Vec<NodeIndex>,
}

impl<'a> RecipeGraph<'a> {
    /// Build the graph for `targets`, failing on unknown names, duplicate
    /// outputs and cycles before anything is executed.
    pub fn resolve<S: AsRef<str>>(jakefile: &'a Jakefile, targets: &[S]) -> Result<Self> {
        check_duplicate_outputs(jakefile)?;

        let mut order: Vec<&'a Recipe> = Vec::new();
        let mut edges: HashMap<&'a str, Vec<(&'a Recipe, EdgeKind)>> = HashMap::new();
        let mut queue: VecDeque<&'a Recipe> = VecDeque::new();
        let mut roots = Vec::new();

        for target in targets {
            let recipe = lookup(jakefile, target.as_ref(), None)?;
            roots.push(recipe.name.as_str());
            queue.push_back(recipe);
        }

        while let Some(recipe) = queue.pop_front() {
            if edges.contains_key(recipe.name.as_str()) {
                continue;
            }
            let deps = direct_dependencies(jakefile, recipe)?;
            for (dep, _) in &deps {
                if !edges.contains_key(dep.name.as_str()) {
                    queue.push_back(*dep);
                }
            }
            edges.insert(recipe.name.as_str(), deps);
            order.push(recipe);
        }

        detect_cycle(&order, &edges)?;

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for recipe in &order {
            index.insert(recipe.name.as_str(), graph.add_node(*recipe));
        }
        for recipe in &order {
            let to = index[recipe.name.as_str()];
            for (dep, kind) in &edges[recipe.name.as_str()] {
                graph.add_edge(index[dep.name.as_str()], to, *kind);
            }
        }

        let mut target_nodes = Vec::new();
        for name in roots {
            let idx = index[name];
            if !target_nodes.contains(&idx) {
                target_nodes.push(idx);
            }
        }

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "dependency graph resolved"
        );

        Ok(Self {
            graph,
            index,
            targets: target_nodes,
        })
    }

    /// Dependencies before dependents
    pub fn topological_order(&self) -> Vec<NodeIndex> {
        // Acyclic by construction, so toposort cannot fail here
        toposort(&self.graph, None).unwrap_or_default()
    }

    pub fn build_order(&self) -> Vec<&'a Recipe> {
        self.topological_order()
            .into_iter()
            .map(|idx| self.graph[idx])
            .collect()
    }

    pub fn recipe(&self, idx: NodeIndex) -> &'a Recipe {
        self.graph[idx]
    }

    pub fn node(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn recipes(&self) -> impl Iterator<Item = &'a Recipe> + '_ {
        self.graph.node_weights().copied()
    }

    pub fn targets(&self) -> &[NodeIndex] {
        &self.targets
    }

    /// Number of direct dependencies
    pub fn in_degree(&self, idx: NodeIndex) -> usize {
        self.graph.neighbors_directed(idx, Direction::Incoming).count()
    }

    /// Recipes that wait on `idx`
    pub fn dependents(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Outgoing)
    }

    /// Direct dependencies with the kind of edge that introduced them
    pub fn dependencies(&self, idx: NodeIndex) -> Vec<(NodeIndex, EdgeKind)> {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

fn lookup<'a>(jakefile: &'a Jakefile, name: &str, parent: Option<&str>) -> Result<&'a Recipe> {
    jakefile.find(name).ok_or_else(|| JakeError::UnknownRecipe {
        name: name.to_string(),
        referenced_by: parent.map(str::to_string),
        suggestion: suggest::closest(name, jakefile.names()).map(str::to_string),
    })
}

fn direct_dependencies<'a>(
    jakefile: &'a Jakefile,
    recipe: &'a Recipe,
) -> Result<Vec<(&'a Recipe, EdgeKind)>> {
    let mut deps: Vec<(&'a Recipe, EdgeKind)> = Vec::new();

    for name in &recipe.dependencies {
        let dep = lookup(jakefile, name, Some(&recipe.name))?;
        if !deps.iter().any(|(d, _)| d.name == dep.name) {
            deps.push((dep, EdgeKind::Explicit));
        }
    }

    if recipe.is_file() {
        for pattern in &recipe.file_deps {
            for other in &jakefile.recipes {
                let Some(output) = other.output.as_deref() else {
                    continue;
                };
                if other.is_file()
                    && other.name != recipe.name
                    && globs::matches(pattern, output)
                    && !deps.iter().any(|(d, _)| d.name == other.name)
                {
                    deps.push((other, EdgeKind::File));
                }
            }
        }
    }

    Ok(deps)
}

fn check_duplicate_outputs(jakefile: &Jakefile) -> Result<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for recipe in jakefile.recipes.iter().filter(|r| r.is_file()) {
        let Some(output) = recipe.output.as_deref() else {
            continue;
        };
        let output = output.strip_prefix("./").unwrap_or(output);
        if let Some(first) = seen.insert(output, &recipe.name) {
            return Err(JakeError::DuplicateOutput {
                output: output.to_string(),
                first: first.to_string(),
                second: recipe.name.clone(),
            });
        }
    }
    Ok(())
}

/// Three-colour DFS. On reaching an in-progress node the whole cycle is
/// reported, starting and ending with the same recipe.
fn detect_cycle<'a>(
    order: &[&'a Recipe],
    edges: &HashMap<&'a str, Vec<(&'a Recipe, EdgeKind)>>,
) -> Result<()> {
    fn visit<'r>(
        name: &'r str,
        edges: &HashMap<&str, Vec<(&'r Recipe, EdgeKind)>>,
        colors: &mut HashMap<&'r str, Color>,
        stack: &mut Vec<&'r str>,
    ) -> Result<()> {
        colors.insert(name, Color::InProgress);
        stack.push(name);

        for (dep, _) in edges.get(name).map(Vec::as_slice).unwrap_or_default() {
            match colors.get(dep.name.as_str()) {
                Some(Color::Done) => {}
                Some(Color::InProgress) => {
                    let start = stack
                        .iter()
                        .position(|n| *n == dep.name)
                        .unwrap_or_default();
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|n| n.to_string()).collect();
                    path.push(dep.name.clone());
                    return Err(JakeError::Cycle { path });
                }
                None => visit(dep.name.as_str(), edges, colors, stack)?,
            }
        }

        stack.pop();
        colors.insert(name, Color::Done);
        Ok(())
    }

    let mut colors = HashMap::new();
    let mut stack = Vec::new();
    for recipe in order {
        if !colors.contains_key(recipe.name.as_str()) {
            visit(recipe.name.as_str(), edges, &mut colors, &mut stack)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(graph: &RecipeGraph<'_>, nodes: &[NodeIndex]) -> Vec<String> {
        nodes
            .iter()
            .map(|idx| graph.recipe(*idx).name.clone())
            .collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_diamond_order() {
        let jakefile = Jakefile::new(vec![
            Recipe::task("a"),
            Recipe::task("b").depends_on(["a"]),
            Recipe::task("c").depends_on(["a"]),
            Recipe::task("d").depends_on(["b", "c"]),
        ]);
        let graph = RecipeGraph::resolve(&jakefile, &["d"]).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.edge_count(), 4);

        let order = names(&graph, &graph.topological_order());
        assert_eq!(order[0], "a");
        assert_eq!(order[3], "d");
        assert_eq!(graph.in_degree(graph.node("d").unwrap()), 2);
    }

    #[test]
    fn test_only_reachable_nodes() {
        let jakefile = Jakefile::new(vec![
            Recipe::task("a"),
            Recipe::task("b").depends_on(["a"]),
            Recipe::task("unrelated"),
        ]);
        let graph = RecipeGraph::resolve(&jakefile, &["b"]).unwrap();
        assert_eq!(graph.len(), 2);
        assert!(!graph.contains("unrelated"));
    }

    #[test]
    fn test_alias_resolution() {
        let mut build = Recipe::task("build");
        build.aliases.push("b".into());
        let jakefile = Jakefile::new(vec![build, Recipe::task("ship").depends_on(["b"])]);
        let graph = RecipeGraph::resolve(&jakefile, &["ship"]).unwrap();
        assert!(graph.contains("build"));
    }

    #[test]
    fn test_two_node_cycle_reports_path() {
        let jakefile = Jakefile::new(vec![
            Recipe::task("a").depends_on(["b"]),
            Recipe::task("b").depends_on(["a"]),
        ]);
        let err = RecipeGraph::resolve(&jakefile, &["a"]).unwrap_err();
        match err {
            JakeError::Cycle { path } => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_cycle_path_excludes_entry_prefix() {
        let jakefile = Jakefile::new(vec![
            Recipe::task("top").depends_on(["x"]),
            Recipe::task("x").depends_on(["y"]),
            Recipe::task("y").depends_on(["z"]),
            Recipe::task("z").depends_on(["x"]),
        ]);
        let err = RecipeGraph::resolve(&jakefile, &["top"]).unwrap_err();
        match err {
            JakeError::Cycle { path } => assert_eq!(path, vec!["x", "y", "z", "x"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let jakefile = Jakefile::new(vec![Recipe::task("a").depends_on(["a"])]);
        let err = RecipeGraph::resolve(&jakefile, &["a"]).unwrap_err();
        assert!(matches!(err, JakeError::Cycle { ref path } if path == &["a", "a"]));
    }

    #[test]
    fn test_unknown_dependency_suggests() {
        let jakefile = Jakefile::new(vec![
            Recipe::task("build"),
            Recipe::task("release").depends_on(["biuld"]),
        ]);
        match RecipeGraph::resolve(&jakefile, &["release"]).unwrap_err() {
            JakeError::UnknownRecipe {
                name,
                referenced_by,
                suggestion,
            } => {
                assert_eq!(name, "biuld");
                assert_eq!(referenced_by.as_deref(), Some("release"));
                assert_eq!(suggestion.as_deref(), Some("build"));
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_unknown_target() {
        let jakefile = Jakefile::new(vec![Recipe::task("test")]);
        let err = RecipeGraph::resolve(&jakefile, &["tset"]).unwrap_err();
        assert!(matches!(err, JakeError::UnknownRecipe { referenced_by: None, .. }));
    }

    #[test]
    fn test_implicit_file_edges() {
        let jakefile = Jakefile::new(vec![
            Recipe::file("build/a.o").with_file_deps(["src/a.c"]),
            Recipe::file("build/b.o").with_file_deps(["src/b.c"]),
            Recipe::file("app").with_file_deps(["build/*.o"]),
        ]);
        let graph = RecipeGraph::resolve(&jakefile, &["app"]).unwrap();
        assert_eq!(graph.len(), 3);
        let app = graph.node("app").unwrap();
        let deps = graph.dependencies(app);
        assert_eq!(deps.len(), 2);
        assert!(deps.iter().all(|(_, kind)| *kind == EdgeKind::File));
    }

    #[test]
    fn test_duplicate_outputs_rejected() {
        let mut second = Recipe::file("out.txt");
        second.name = "other".into();
        let jakefile = Jakefile::new(vec![Recipe::file("out.txt"), second]);
        let err = RecipeGraph::resolve(&jakefile, &["out.txt"]).unwrap_err();
        assert!(matches!(err, JakeError::DuplicateOutput { .. }));
        assert!(err.is_structural());
    }

    /// Edges only point from higher to lower index, so the graph is acyclic
    fn acyclic_jakefile(deps: &[Vec<usize>]) -> Jakefile {
        let recipes = deps
            .iter()
            .enumerate()
            .map(|(i, ds)| {
                Recipe::task(format!("r{i}"))
                    .depends_on(ds.iter().filter(|d| **d < i).map(|d| format!("r{d}")))
            })
            .collect();
        Jakefile::new(recipes)
    }

    proptest! {
        #[test]
        fn prop_acyclic_resolves_in_dependency_order(
            deps in prop::collection::vec(prop::collection::vec(0usize..12, 0..4), 1..12)
        ) {
            let jakefile = acyclic_jakefile(&deps);
            let targets: Vec<String> = jakefile.recipes.iter().map(|r| r.name.clone()).collect();
            let graph = RecipeGraph::resolve(&jakefile, &targets).unwrap();
            let order = names(&graph, &graph.topological_order());
            prop_assert_eq!(order.len(), jakefile.recipes.len());
            for recipe in &jakefile.recipes {
                for dep in &recipe.dependencies {
                    prop_assert!(position(&order, dep) < position(&order, &recipe.name));
                }
            }
        }

        #[test]
        fn prop_cycle_reports_real_cycle(
            deps in prop::collection::vec(prop::collection::vec(0usize..12, 0..4), 2..12),
            pick in 0usize..100,
        ) {
            let mut jakefile = acyclic_jakefile(&deps);
            // Close a loop: r0 depends on some later recipe that (transitively) depends on r0
            let n = jakefile.recipes.len();
            let back = 1 + pick % (n - 1);
            jakefile.recipes[back].dependencies.push("r0".into());
            jakefile.recipes[0].dependencies.push(format!("r{back}"));

            let targets: Vec<String> = jakefile.recipes.iter().map(|r| r.name.clone()).collect();
            match RecipeGraph::resolve(&jakefile, &targets) {
                Err(JakeError::Cycle { path }) => {
                    prop_assert!(path.len() >= 2);
                    prop_assert_eq!(path.first(), path.last());
                    for pair in path.windows(2) {
                        let from = jakefile.find(&pair[0]).unwrap();
                        prop_assert!(from.dependencies.contains(&pair[1]));
                    }
                }
                other => prop_assert!(false, "expected cycle, got {:?}", other.map(|g| g.len())),
            }
        }
    }
}
