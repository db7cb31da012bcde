//! Dependency edges between named objects.
//!
//! Edges are recorded as objects are built: explicit `depends-on` entries,
//! references and autowired parameters all register "`dependent` needs
//! `dependency`". The graph answers two questions:
//! - would a new `depends-on` edge close a cycle (checked before building)
//! - which already built objects captured a reference to a failed object
//!   (so their cache entries can be purged)

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{trace, warn};

/// Directed dependency edges, stored in both directions.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    /// dependency → objects that need it
    dependents: HashMap<String, BTreeSet<String>>,
    /// object → what it needs
    dependencies: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `dependent` needs `dependency`.
    pub fn register(&mut self, dependency: &str, dependent: &str) {
        let added = self
            .dependents
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());

        if added {
            trace!(dependency = %dependency, dependent = %dependent, "Registered dependency edge");
            self.dependencies
                .entry(dependent.to_string())
                .or_default()
                .insert(dependency.to_string());
        }
    }

    /// `true` if `candidate` needs `name`, directly or transitively.
    pub fn is_dependent(&self, name: &str, candidate: &str) -> bool {
        let mut visited = HashSet::new();
        self.is_dependent_inner(name, candidate, &mut visited)
    }

    fn is_dependent_inner<'a>(&'a self, name: &'a str, candidate: &str, visited: &mut HashSet<&'a str>) -> bool {
        if !visited.insert(name) {
            return false;
        }

        let Some(dependents) = self.dependents.get(name) else {
            return false;
        };

        if dependents.contains(candidate) {
            return true;
        }

        dependents
            .iter()
            .any(|transitive| self.is_dependent_inner(transitive, candidate, visited))
    }

    /// Chain of names `from → … → to` following dependency edges (DFS).
    pub fn path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut path = Vec::new();
        let mut visiting = HashSet::new();
        self.path_inner(from, to, &mut path, &mut visiting).then_some(path)
    }

    fn path_inner<'a>(
        &'a self,
        current: &'a str,
        target: &str,
        path: &mut Vec<String>,
        visiting: &mut HashSet<&'a str>,
    ) -> bool {
        if !visiting.insert(current) {
            return false;
        }

        path.push(current.to_string());
        if current == target {
            return true;
        }

        if let Some(next) = self.dependencies.get(current) {
            for dependency in next {
                if self.path_inner(dependency, target, path, visiting) {
                    return true;
                }
            }
        }

        path.pop();
        false
    }

    /// The cycle that a new edge `dependent → dependency` would close,
    /// rendered as `dependent → dependency → … → dependent`.
    pub fn cycle_through(&self, dependent: &str, dependency: &str) -> Vec<String> {
        let mut chain = vec![dependent.to_string()];
        match self.path(dependency, dependent) {
            Some(path) => chain.extend(path),
            None => {
                warn!(dependent = %dependent, dependency = %dependency, "Cycle reported without a recorded path");
                chain.push(dependency.to_string());
                chain.push(dependent.to_string());
            }
        }
        chain
    }

    /// Objects that directly need `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.dependents
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// What `name` directly needs.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.dependencies
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forgets every edge that starts or ends at `name`.
    pub fn remove(&mut self, name: &str) {
        if let Some(dependents) = self.dependents.remove(name) {
            for dependent in dependents {
                if let Some(set) = self.dependencies.get_mut(&dependent) {
                    set.remove(name);
                }
            }
        }
        if let Some(dependencies) = self.dependencies.remove(name) {
            for dependency in dependencies {
                if let Some(set) = self.dependents.get_mut(&dependency) {
                    set.remove(name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_and_transitive_dependents() {
        let mut graph = DependencyGraph::new();
        // service → repo → db
        graph.register("db", "repo");
        graph.register("repo", "service");

        assert!(graph.is_dependent("db", "repo"));
        assert!(graph.is_dependent("db", "service"));
        assert!(!graph.is_dependent("service", "db"));
        assert_eq!(graph.dependents_of("db"), vec!["repo".to_string()]);
        assert_eq!(graph.dependencies_of("service"), vec!["repo".to_string()]);
    }

    #[test]
    fn cycle_rendering() {
        let mut graph = DependencyGraph::new();
        // a depends-on b has been registered; b now asks for a
        graph.register("b", "a");

        assert!(graph.is_dependent("b", "a"));
        assert_eq!(graph.cycle_through("b", "a"), vec!["b", "a", "b"]);
    }

    #[test]
    fn longer_cycle_path() {
        let mut graph = DependencyGraph::new();
        graph.register("b", "a");
        graph.register("c", "b");

        assert!(graph.is_dependent("c", "a"));
        assert_eq!(graph.cycle_through("c", "a"), vec!["c", "a", "b", "c"]);
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.register("b", "a");
        graph.register("c", "a");
        graph.register("d", "b");
        graph.register("d", "c");

        assert!(graph.is_dependent("d", "a"));
        assert!(!graph.is_dependent("a", "d"));
    }

    #[test]
    fn self_loops_terminate() {
        let mut graph = DependencyGraph::new();
        graph.register("a", "a");
        assert!(graph.is_dependent("a", "a"));
        assert!(!graph.is_dependent("a", "z"));
    }

    #[test]
    fn remove_forgets_edges() {
        let mut graph = DependencyGraph::new();
        graph.register("db", "repo");
        graph.register("repo", "service");

        graph.remove("repo");
        assert!(graph.dependents_of("db").is_empty());
        assert!(graph.dependencies_of("service").is_empty());
    }
}
