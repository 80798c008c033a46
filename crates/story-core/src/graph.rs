//! Project dependency graph.
//!
//! An edge `A → B` means "B depends on A": a change to A affects B.
//! Package dependencies between private repositories may form cycles, so the
//! graph accepts them and traversal tracks visited nodes.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::{StoryError, StoryResult};

/// Directed dependency graph over project names.
#[derive(Debug, Clone, Default)]
pub struct ProjectGraph {
    /// `dependency → {dependent, ...}`
    downstream: HashMap<String, HashSet<String>>,
}

impl ProjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project. Idempotent.
    pub fn add_project(&mut self, project: &str) {
        self.downstream.entry(project.to_string()).or_default();
    }

    pub fn contains(&self, project: &str) -> bool {
        self.downstream.contains_key(project)
    }

    /// `dependent` depends on `dependency`. Both must be registered.
    pub fn add_dependency(&mut self, dependency: &str, dependent: &str) -> StoryResult<()> {
        for project in [dependency, dependent] {
            if !self.contains(project) {
                return Err(StoryError::UnknownProject {
                    project: project.to_string(),
                });
            }
        }
        if dependency == dependent {
            return Ok(());
        }

        self.downstream
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
        Ok(())
    }

    /// All transitive dependents of `project` (BFS over downstream edges),
    /// sorted, never including `project` itself.
    pub fn transitive_dependents_of(&self, project: &str) -> StoryResult<Vec<String>> {
        if !self.contains(project) {
            return Err(StoryError::UnknownProject {
                project: project.to_string(),
            });
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(project.to_string());

        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.downstream.get(&current) {
                for dependent in dependents {
                    if dependent != project && visited.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }

        Ok(visited.into_iter().collect())
    }
}
