// ABOUTME: Forward and reverse dependency links between cached files.
// ABOUTME: Cascades walk reverse links breadth-first with a visited set, so cycles terminate.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Tracks which files each cached file depends on, and the reverse.
///
/// Reverse links to a path survive [`unlink`](Self::unlink) of that path, so
/// the dependents of an invalidated file can still be found afterwards.
#[derive(Debug, Default, Clone)]
pub struct DependencyIndex {
    dependencies: HashMap<String, BTreeSet<String>>,
    dependents: HashMap<String, BTreeSet<String>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path -> deps`, replacing whatever `path` depended on before.
    pub fn link<I, S>(&mut self, path: &str, deps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unlink(path);
        let deps: BTreeSet<String> = deps
            .into_iter()
            .map(Into::into)
            .filter(|dep| dep != path)
            .collect();
        if deps.is_empty() {
            return;
        }
        for dep in &deps {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(path.to_string());
        }
        self.dependencies.insert(path.to_string(), deps);
    }

    /// Drop the links `path` declared. Links other files declared on `path` stay.
    pub fn unlink(&mut self, path: &str) {
        let Some(deps) = self.dependencies.remove(path) else {
            return;
        };
        for dep in deps {
            if let Some(set) = self.dependents.get_mut(&dep) {
                set.remove(path);
                if set.is_empty() {
                    self.dependents.remove(&dep);
                }
            }
        }
    }

    /// Direct dependents of `path`, sorted.
    pub fn dependents_of(&self, path: &str) -> Vec<String> {
        self.dependents
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dependencies_of(&self, path: &str) -> Vec<String> {
        self.dependencies
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every file that transitively depends on `path`, in breadth-first
    /// visit order. `path` itself is never part of the result.
    pub fn cascade(&self, path: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut order = Vec::new();

        visited.insert(path);
        queue.push_back(path);
        while let Some(current) = queue.pop_front() {
            let Some(direct) = self.dependents.get(current) else {
                continue;
            };
            for dependent in direct {
                if visited.insert(dependent.as_str()) {
                    order.push(dependent.clone());
                    queue.push_back(dependent.as_str());
                }
            }
        }
        order
    }

    /// Number of files with at least one recorded dependency.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.dependents.clear();
    }
}
