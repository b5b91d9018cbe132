//! Cycle detection and ordering over dependency graphs keyed by id
//!
//! Both the project graph and the task graph expose their edges as a map
//! from node id to the ids it depends on, so every algorithm here works on
//! that shape.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// Read access to a dependency map
pub trait DependencyGraph {
    /// Map from node id to the ids it depends on
    fn dependency_map(&self) -> &BTreeMap<String, Vec<String>>;
}

/// A graph whose edges can be pruned in place
pub trait MutableDependencyGraph: DependencyGraph {
    /// Mutable access to the dependency map
    fn dependency_map_mut(&mut self) -> &mut BTreeMap<String, Vec<String>>;

    /// Replace the set of root ids
    fn set_roots(&mut self, roots: Vec<String>);
}

impl DependencyGraph for BTreeMap<String, Vec<String>> {
    fn dependency_map(&self) -> &BTreeMap<String, Vec<String>> {
        self
    }
}

/// Find the first cycle reachable by depth-first search from any node.
///
/// The returned path starts at the node the search began from and ends with
/// the node that closed the cycle, e.g. `[a, b, c, a]`.
pub fn find_cycle<G: DependencyGraph + ?Sized>(graph: &G) -> Option<Vec<String>> {
    let deps = graph.dependency_map();
    for start in deps.keys() {
        let mut visited = HashSet::new();
        let mut path = vec![start.clone()];
        if let Some(cycle) = find_cycle_from(deps, start, &mut visited, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn find_cycle_from(
    deps: &BTreeMap<String, Vec<String>>,
    id: &str,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    if !visited.insert(id.to_string()) {
        return None;
    }

    for dep in deps.get(id).map(Vec::as_slice).unwrap_or_default() {
        if path.contains(dep) {
            let mut cycle = path.clone();
            cycle.push(dep.clone());
            return Some(cycle);
        }
        path.push(dep.clone());
        if let Some(cycle) = find_cycle_from(deps, dep, visited, path) {
            return Some(cycle);
        }
        path.pop();
    }

    None
}

/// Remove every edge that closes a cycle relative to the current DFS path,
/// then recompute roots. Returns the removed `(from, to)` edges.
pub fn make_acyclic<G: MutableDependencyGraph + ?Sized>(graph: &mut G) -> Vec<(String, String)> {
    let mut removed = Vec::new();
    let mut visited = HashSet::new();
    let ids: Vec<String> = graph.dependency_map().keys().cloned().collect();

    for id in &ids {
        let mut path = vec![id.clone()];
        prune_from(graph.dependency_map_mut(), id, &mut visited, &mut path, &mut removed);
    }

    let roots = roots_of(graph.dependency_map());
    graph.set_roots(roots);
    removed
}

fn prune_from(
    deps: &mut BTreeMap<String, Vec<String>>,
    id: &str,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
    removed: &mut Vec<(String, String)>,
) {
    if !visited.insert(id.to_string()) {
        return;
    }

    let current: Vec<String> = deps.get(id).cloned().unwrap_or_default();
    for dep in current {
        if path.contains(&dep) {
            if let Some(list) = deps.get_mut(id) {
                list.retain(|d| d != &dep);
            }
            removed.push((id.to_string(), dep));
        } else {
            path.push(dep.clone());
            prune_from(deps, &dep, visited, path, removed);
            path.pop();
        }
    }
}

/// Nodes with no dependencies, in id order
pub fn roots_of(deps: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    deps.iter()
        .filter(|(_, d)| d.is_empty())
        .map(|(id, _)| id.clone())
        .collect()
}

/// Reverse the edges: map from node id to the ids depending on it
pub fn reverse_dependencies(deps: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>> {
    let mut reverse: BTreeMap<String, Vec<String>> =
        deps.keys().map(|id| (id.clone(), Vec::new())).collect();
    for (id, list) in deps {
        for dep in list {
            reverse.entry(dep.clone()).or_default().push(id.clone());
        }
    }
    reverse
}

/// Topological order using Kahn's algorithm (dependencies first).
///
/// Nodes that sit on a cycle are left out, so a result shorter than the
/// graph means the graph is cyclic.
pub fn topological_order(deps: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let reverse = reverse_dependencies(deps);
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut queue: VecDeque<String> = VecDeque::new();

    for (id, list) in deps {
        let degree = list.iter().filter(|d| deps.contains_key(*d)).count();
        in_degree.insert(id.as_str(), degree);
        if degree == 0 {
            queue.push_back(id.clone());
        }
    }

    let mut sorted = Vec::with_capacity(deps.len());
    while let Some(id) = queue.pop_front() {
        for dependent in reverse.get(&id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(dependent.clone());
                }
            }
        }
        sorted.push(id);
    }

    sorted
}

/// Every node reachable by following dependency edges from `id`
pub fn transitive_dependencies(deps: &BTreeMap<String, Vec<String>>, id: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([id]);

    while let Some(current) = queue.pop_front() {
        for dep in deps.get(current).map(Vec::as_slice).unwrap_or_default() {
            if seen.insert(dep.clone()) {
                queue.push_back(dep);
            }
        }
    }

    seen.remove(id);
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(id, deps)| (id.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    struct Pruned {
        deps: BTreeMap<String, Vec<String>>,
        roots: Vec<String>,
    }

    impl DependencyGraph for Pruned {
        fn dependency_map(&self) -> &BTreeMap<String, Vec<String>> {
            &self.deps
        }
    }

    impl MutableDependencyGraph for Pruned {
        fn dependency_map_mut(&mut self) -> &mut BTreeMap<String, Vec<String>> {
            &mut self.deps
        }

        fn set_roots(&mut self, roots: Vec<String>) {
            self.roots = roots;
        }
    }

    #[test]
    fn test_find_cycle_three_nodes() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        assert_eq!(
            find_cycle(&g),
            Some(vec!["a".into(), "b".into(), "c".into(), "a".into()])
        );
    }

    #[test]
    fn test_find_cycle_none_on_dag() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        assert_eq!(find_cycle(&g), None);
    }

    #[test]
    fn test_find_cycle_self_reference() {
        let g = graph(&[("a", &["a"])]);
        assert_eq!(find_cycle(&g), Some(vec!["a".into(), "a".into()]));
    }

    #[test]
    fn test_find_cycle_ignores_unknown_nodes() {
        let g = graph(&[("a", &["missing"])]);
        assert_eq!(find_cycle(&g), None);
    }

    #[test]
    fn test_make_acyclic_breaks_cycle() {
        let mut g = Pruned {
            deps: graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]),
            roots: Vec::new(),
        };

        let removed = make_acyclic(&mut g);

        assert_eq!(removed, vec![("c".to_string(), "a".to_string())]);
        assert_eq!(find_cycle(&g), None);
        assert_eq!(g.roots, vec!["c".to_string()]);
    }

    #[test]
    fn test_make_acyclic_leaves_dag_untouched() {
        let deps = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        let mut g = Pruned {
            deps: deps.clone(),
            roots: Vec::new(),
        };

        assert!(make_acyclic(&mut g).is_empty());
        assert_eq!(g.deps, deps);
        assert_eq!(g.roots, vec!["a".to_string()]);
    }

    #[test]
    fn test_topological_order() {
        let g = graph(&[("app", &["lib", "util"]), ("lib", &["util"]), ("util", &[])]);
        assert_eq!(topological_order(&g), vec!["util", "lib", "app"]);
    }

    #[test]
    fn test_topological_order_drops_cycles() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        assert_eq!(topological_order(&g), vec!["c"]);
    }

    #[test]
    fn test_transitive_dependencies() {
        let g = graph(&[("app", &["lib"]), ("lib", &["util"]), ("util", &[])]);
        let deps = transitive_dependencies(&g, "app");
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["lib", "util"]);
    }

    #[test]
    fn test_reverse_dependencies() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"])]);
        let reverse = reverse_dependencies(&g);
        assert_eq!(reverse["a"], vec!["b".to_string(), "c".to_string()]);
        assert!(reverse["b"].is_empty());
    }
}
