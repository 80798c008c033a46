//! Blast radius calculation.
//!
//! The lifecycle only depends on [`BlastRadiusCalculator`]. The default
//! implementation walks the private package dependencies declared between
//! registry projects.

use std::path::Path;

use tracing::debug;

use crate::config::REGISTRY_BACKUP_FILE;
use crate::error::{StoryError, StoryResult};
use crate::graph::ProjectGraph;
use crate::package::PackageManifest;
use crate::registry::Registry;
use crate::workspace::{OsWorkspace, Workspace};

/// Computes which projects are affected by a change to `project`.
pub trait BlastRadiusCalculator: Send + Sync {
    /// Affected project names. Order is meaningful to callers; duplicates
    /// are allowed.
    fn calculate(&self, root: &Path, project: &str) -> StoryResult<Vec<String>>;
}

/// Blast radius from the `package.json` dependency graph of every registry
/// project. Projects without a package manifest are leaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestGraphCalculator;

impl ManifestGraphCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Build the dependency graph of every registry project.
    pub fn build_graph(&self, ws: &dyn Workspace) -> StoryResult<ProjectGraph> {
        let registry = if ws.exists(Path::new(REGISTRY_BACKUP_FILE)) {
            Registry::load_on_branch(ws)?
        } else {
            Registry::load_on_trunk(ws)?
        };

        let mut graph = ProjectGraph::new();
        for project in registry.projects.keys() {
            graph.add_project(project);
        }

        for project in registry.projects.keys() {
            if !PackageManifest::exists(ws, project) {
                continue;
            }
            let manifest = PackageManifest::load(ws, project)?;
            for dependency in manifest.dependency_names() {
                if registry.contains(&dependency) {
                    graph.add_dependency(&dependency, project)?;
                }
            }
        }
        Ok(graph)
    }

    /// Sorted transitive dependents of `project` within `ws`.
    pub fn calculate_in(&self, ws: &dyn Workspace, project: &str) -> StoryResult<Vec<String>> {
        let failed = |err: StoryError| StoryError::BlastRadius {
            project: project.to_string(),
            reason: err.to_string(),
        };
        let graph = self.build_graph(ws).map_err(failed)?;
        let radius = graph.transitive_dependents_of(project).map_err(failed)?;
        debug!(project = %project, affected = radius.len(), "dependency graph walked");
        Ok(radius)
    }
}

impl BlastRadiusCalculator for ManifestGraphCalculator {
    fn calculate(&self, root: &Path, project: &str) -> StoryResult<Vec<String>> {
        self.calculate_in(&OsWorkspace::new(root), project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryWorkspace;

    const REGISTRY: &str = r#"{
  "organisation": "test-org",
  "projects": {
    "one": "git://github.com/test-org/one.git",
    "two": "git://github.com/test-org/two.git",
    "three": "git://github.com/test-org/three.git"
  }
}
"#;

    fn workspace() -> MemoryWorkspace {
        let ws = MemoryWorkspace::new();
        ws.put(".meta", REGISTRY);
        ws.put(
            "two/package.json",
            r#"{"dependencies": {"one": "git://github.com/test-org/one.git", "left-pad": "^1.0.0"}}"#,
        );
        ws.put(
            "three/package.json",
            r#"{"dependencies": {"two": "git://github.com/test-org/two.git"}}"#,
        );
        ws
    }

    #[test]
    fn test_radius_is_transitive_and_sorted() {
        let ws = workspace();
        let radius = ManifestGraphCalculator::new().calculate_in(&ws, "one").unwrap();
        assert_eq!(radius, vec!["three".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_leaf_project_has_empty_radius() {
        let ws = workspace();
        let radius = ManifestGraphCalculator::new()
            .calculate_in(&ws, "three")
            .unwrap();
        assert!(radius.is_empty());
    }

    #[test]
    fn test_prefers_parked_registry_in_story_mode() {
        let ws = workspace();
        Registry::archive(&ws).unwrap();
        ws.put(".meta", r#"{"story": "feature", "projects": {}}"#);
        let radius = ManifestGraphCalculator::new().calculate_in(&ws, "two").unwrap();
        assert_eq!(radius, vec!["three".to_string()]);
    }

    #[test]
    fn test_unknown_project_is_blast_radius_error() {
        let ws = workspace();
        let err = ManifestGraphCalculator::new()
            .calculate_in(&ws, "ghost")
            .unwrap_err();
        assert!(matches!(err, StoryError::BlastRadius { ref project, .. } if project == "ghost"));
    }

    #[test]
    fn test_calculate_reads_real_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let ws = OsWorkspace::new(dir.path());
        ws.write(Path::new(".meta"), REGISTRY.as_bytes()).unwrap();
        ws.write(
            Path::new("two/package.json"),
            br#"{"dependencies": {"one": "git://github.com/test-org/one.git"}}"#,
        )
        .unwrap();

        let radius = ManifestGraphCalculator::new()
            .calculate(dir.path(), "one")
            .unwrap();
        assert_eq!(radius, vec!["two".to_string()]);
    }
}
