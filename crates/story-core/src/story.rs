//! The story manifest: the aggregate every lifecycle operation mutates.
//!
//! A [`StoryManifest`] replaces the registry at the metarepo root while a
//! story is active. After every mutation the lifecycle calls
//! [`StoryManifest::recompute_artifacts`] and
//! [`StoryManifest::refresh_hashes`] so that
//!
//! - every member is a registry project,
//! - every blast-radius key is a member,
//! - `artifacts` keeps exactly the registry's keys, `true` iff the project is
//!   a member or appears in any blast radius,
//! - `hashes` has exactly one entry per member.
//!
//! [`StoryManifest::invariant_violations`] checks the same rules.

use std::collections::BTreeSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{archive_path, StoryConfig, MANIFEST_FILE};
use crate::error::{StoryError, StoryResult};
use crate::radius::BlastRadiusCalculator;
use crate::registry::Registry;
use crate::vcs::{Repo, Vcs};
use crate::workspace::{read_json, write_json, Workspace};

/// Why a project is part of a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Membership {
    /// Explicitly requested through `add`.
    Direct,
    /// Pulled in as a private package dependency of direct members.
    Derived {
        #[serde(rename = "claimed-by")]
        claimed_by: Vec<String>,
    },
}

/// On-disk story manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryManifest {
    #[serde(rename = "story", default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organisation: String,

    /// Registry projects frozen at creation time.
    #[serde(
        rename = "all-projects",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub all_projects: IndexMap<String, String>,

    /// Current members: name → clone URL.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub projects: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub membership: IndexMap<String, Membership>,

    #[serde(
        rename = "blast-radius",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub blast_radius: IndexMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub artifacts: IndexMap<String, bool>,

    /// Head of the story branch in each member.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub hashes: IndexMap<String, String>,
}

impl StoryManifest {
    /// Derive an empty story from the registry.
    pub fn new(name: &str, registry: &Registry) -> Self {
        StoryManifest {
            name: name.to_string(),
            organisation: registry.organisation.clone(),
            all_projects: registry.projects.clone(),
            artifacts: registry
                .artifacts
                .keys()
                .map(|k| (k.clone(), false))
                .collect(),
            ..Self::default()
        }
    }

    /// Load the story occupying the primary manifest path.
    pub fn load(ws: &dyn Workspace) -> StoryResult<Self> {
        read_json(ws, Path::new(MANIFEST_FILE))
    }

    /// Load the story for `branch`, preferring a prepared archive.
    pub fn load_for_branch(ws: &dyn Workspace, branch: &str) -> StoryResult<Self> {
        let archived = archive_path(branch);
        if ws.exists(&archived) {
            return read_json(ws, &archived);
        }
        Self::load(ws)
    }

    pub fn write(&self, ws: &dyn Workspace) -> StoryResult<()> {
        self.write_to(ws, Path::new(MANIFEST_FILE))
    }

    pub fn write_to(&self, ws: &dyn Workspace, path: &Path) -> StoryResult<()> {
        write_json(ws, path, self)
    }

    /// Add a requested project. Fails if the registry does not know it.
    ///
    /// Returns `true` when the project was not a member before.
    pub fn insert_direct(&mut self, project: &str) -> StoryResult<bool> {
        let url = self
            .all_projects
            .get(project)
            .ok_or_else(|| StoryError::UnknownProject {
                project: project.to_string(),
            })?
            .clone();

        let added = self.projects.insert(project.to_string(), url).is_none();
        self.membership
            .insert(project.to_string(), Membership::Direct);
        Ok(added)
    }

    /// Record that `claimant` pulls `project` in as a dependency.
    ///
    /// Unknown projects and the claimant itself are ignored. A direct member
    /// stays direct. Returns `true` when the project was not a member before.
    pub fn insert_derived(&mut self, project: &str, claimant: &str) -> bool {
        if project == claimant {
            return false;
        }
        let Some(url) = self.all_projects.get(project).cloned() else {
            return false;
        };

        let added = !self.projects.contains_key(project);
        if added {
            self.projects.insert(project.to_string(), url);
        }

        match self.membership.get_mut(project) {
            Some(Membership::Direct) => {}
            None if !added => {
                // Members recorded before membership tracking count as direct.
                self.membership
                    .insert(project.to_string(), Membership::Direct);
            }
            Some(Membership::Derived { claimed_by }) => {
                if !claimed_by.iter().any(|c| c == claimant) {
                    claimed_by.push(claimant.to_string());
                }
            }
            None => {
                self.membership.insert(
                    project.to_string(),
                    Membership::Derived {
                        claimed_by: vec![claimant.to_string()],
                    },
                );
            }
        }
        added
    }

    /// Drop a member with its blast radius, hash and the claims it held.
    ///
    /// Returns `true` when the project was a member.
    pub fn remove_member(&mut self, project: &str) -> bool {
        let removed = self.projects.shift_remove(project).is_some();
        self.membership.shift_remove(project);
        self.blast_radius.shift_remove(project);
        self.hashes.shift_remove(project);

        for membership in self.membership.values_mut() {
            if let Membership::Derived { claimed_by } = membership {
                claimed_by.retain(|c| c != project);
            }
        }
        removed
    }

    /// `true` unless the project is recorded as derived.
    pub fn is_direct(&self, project: &str) -> bool {
        !matches!(
            self.membership.get(project),
            Some(Membership::Derived { .. })
        )
    }

    /// Derived members nobody claims any more, sorted.
    pub fn orphaned_members(&self) -> Vec<String> {
        let mut orphans: Vec<String> = self
            .membership
            .iter()
            .filter(|(name, m)| {
                self.projects.contains_key(name.as_str())
                    && matches!(m, Membership::Derived { claimed_by } if claimed_by.is_empty())
            })
            .map(|(name, _)| name.clone())
            .collect();
        orphans.sort();
        orphans
    }

    /// Recalculate and store the blast radius of `project`, replacing any
    /// previous entry. Does not touch membership or artifacts.
    pub fn add_project_to_blast_radius(
        &mut self,
        calculator: &dyn BlastRadiusCalculator,
        root: &Path,
        project: &str,
    ) -> StoryResult<()> {
        let radius = calculator.calculate(root, project)?;
        debug!(project = %project, radius = ?radius, "blast radius calculated");
        self.blast_radius.insert(project.to_string(), radius);
        Ok(())
    }

    /// Rebuild `artifacts` from scratch. Keys never change.
    pub fn recompute_artifacts(&mut self) {
        for flag in self.artifacts.values_mut() {
            *flag = false;
        }

        for radius in self.blast_radius.values() {
            for project in radius {
                if let Some(flag) = self.artifacts.get_mut(project) {
                    *flag = true;
                }
            }
        }

        for project in self.projects.keys() {
            if let Some(flag) = self.artifacts.get_mut(project) {
                *flag = true;
            }
        }
    }

    /// Replace `hashes` with the story-branch head of every member.
    pub fn refresh_hashes(&mut self, vcs: &dyn Vcs) -> StoryResult<()> {
        let mut hashes = IndexMap::with_capacity(self.projects.len());
        for project in self.projects.keys() {
            let head = vcs.head(Repo::Project(project), &self.name)?;
            hashes.insert(project.clone(), head);
        }
        self.hashes = hashes;
        Ok(())
    }

    /// Member names, sorted.
    pub fn project_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.projects.keys().cloned().collect();
        names.sort();
        names
    }

    /// Deployables that must be rebuilt, sorted.
    pub fn artifacts_to_build(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .artifacts
            .iter()
            .filter(|(_, &flag)| flag)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every project named by any blast radius, de-duplicated and sorted.
    pub fn flattened_blast_radius(&self) -> Vec<String> {
        self.blast_radius
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Sorted commit links for the current hashes.
    pub fn commit_links(&self, config: &StoryConfig) -> Vec<String> {
        let mut links: Vec<String> = self
            .hashes
            .iter()
            .map(|(project, hash)| config.commit_url(&self.organisation, project, hash))
            .collect();
        links.sort();
        links
    }

    /// Rebuild a registry-shaped record with every artifact flag cleared.
    pub fn to_registry(&self) -> Registry {
        Registry {
            organisation: self.organisation.clone(),
            projects: self.all_projects.clone(),
            artifacts: self
                .artifacts
                .keys()
                .map(|k| (k.clone(), false))
                .collect(),
        }
    }

    /// Describe every broken consistency rule. Empty when the manifest is sound.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for project in self.projects.keys() {
            if !self.all_projects.contains_key(project) {
                violations.push(format!("member {project} is not a registry project"));
            }
            if !self.hashes.contains_key(project) {
                violations.push(format!("member {project} has no hash"));
            }
        }

        for project in self.blast_radius.keys() {
            if !self.projects.contains_key(project) {
                violations.push(format!("blast radius key {project} is not a member"));
            }
        }

        for project in self.hashes.keys() {
            if !self.projects.contains_key(project) {
                violations.push(format!("hash recorded for non-member {project}"));
            }
        }

        let radius: BTreeSet<&str> = self
            .blast_radius
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        for (project, &flag) in &self.artifacts {
            let expected =
                self.projects.contains_key(project) || radius.contains(project.as_str());
            if flag != expected {
                violations.push(format!("artifact {project} is {flag}, expected {expected}"));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeVcs, MemoryWorkspace, StaticRadius};

    fn registry() -> Registry {
        let mut registry = Registry {
            organisation: "test-org".to_string(),
            ..Registry::default()
        };
        for name in ["one", "two", "three"] {
            registry.projects.insert(
                name.to_string(),
                format!("git://github.com/test-org/{name}.git"),
            );
        }
        registry.artifacts.insert("two".to_string(), true);
        registry.artifacts.insert("three".to_string(), true);
        registry
    }

    #[test]
    fn test_new_story_clears_artifact_flags() {
        let story = StoryManifest::new("test-story", &registry());
        assert_eq!(story.artifacts.len(), 2);
        assert!(story.artifacts.values().all(|flag| !flag));
        assert!(story.projects.is_empty());
        assert_eq!(story.all_projects.len(), 3);
    }

    #[test]
    fn test_insert_direct_rejects_unknown_project() {
        let mut story = StoryManifest::new("test-story", &registry());
        let err = story.insert_direct("four").unwrap_err();
        assert!(matches!(err, StoryError::UnknownProject { .. }));
        assert!(story.projects.is_empty());
    }

    #[test]
    fn test_insert_direct_uses_registry_url() {
        let mut story = StoryManifest::new("test-story", &registry());
        assert!(story.insert_direct("one").unwrap());
        assert!(!story.insert_direct("one").unwrap());
        assert_eq!(
            story.projects.get("one").map(String::as_str),
            Some("git://github.com/test-org/one.git")
        );
        assert!(story.is_direct("one"));
    }

    #[test]
    fn test_direct_membership_wins_over_claims() {
        let mut story = StoryManifest::new("test-story", &registry());
        story.insert_direct("one").unwrap();
        story.insert_direct("two").unwrap();
        assert!(!story.insert_derived("one", "two"));
        assert!(story.is_direct("one"));
    }

    #[test]
    fn test_derived_member_orphaned_when_last_claim_released() {
        let mut story = StoryManifest::new("test-story", &registry());
        story.insert_direct("one").unwrap();
        story.insert_direct("two").unwrap();
        assert!(story.insert_derived("three", "one"));
        assert!(!story.insert_derived("three", "two"));

        story.remove_member("one");
        assert!(story.orphaned_members().is_empty());

        story.remove_member("two");
        assert_eq!(story.orphaned_members(), vec!["three".to_string()]);
    }

    #[test]
    fn test_recompute_artifacts_from_members_and_radius() {
        let mut story = StoryManifest::new("test-story", &registry());
        story.insert_direct("one").unwrap();
        story
            .blast_radius
            .insert("one".to_string(), vec!["two".to_string()]);
        story.recompute_artifacts();

        assert_eq!(story.artifacts.get("two"), Some(&true));
        assert_eq!(story.artifacts.get("three"), Some(&false));
        assert!(!story.artifacts.contains_key("one"));
    }

    #[test]
    fn test_recompute_artifacts_clears_stale_flags() {
        let mut story = StoryManifest::new("test-story", &registry());
        story.insert_direct("three").unwrap();
        story.recompute_artifacts();
        assert_eq!(story.artifacts.get("three"), Some(&true));

        story.remove_member("three");
        story.recompute_artifacts();
        assert_eq!(story.artifacts.get("three"), Some(&false));
    }

    #[test]
    fn test_recompute_artifacts_is_deterministic() {
        let mut story = StoryManifest::new("test-story", &registry());
        story.insert_direct("one").unwrap();
        story.blast_radius.insert(
            "one".to_string(),
            vec!["two".to_string(), "two".to_string(), "unknown".to_string()],
        );
        story.recompute_artifacts();
        let first = story.artifacts.clone();
        story.recompute_artifacts();
        assert_eq!(first, story.artifacts);
        assert_eq!(
            first.keys().collect::<Vec<_>>(),
            vec!["two", "three"],
            "artifact keys never change"
        );
    }

    #[test]
    fn test_add_project_to_blast_radius_overwrites_entry() {
        let mut story = StoryManifest::new("test-story", &registry());
        story.insert_direct("one").unwrap();

        let first = StaticRadius::new().with("one", &["two"]);
        story
            .add_project_to_blast_radius(&first, Path::new("."), "one")
            .unwrap();
        let second = StaticRadius::new().with("one", &["three"]);
        story
            .add_project_to_blast_radius(&second, Path::new("."), "one")
            .unwrap();

        assert_eq!(story.blast_radius.get("one"), Some(&vec!["three".to_string()]));
        assert_eq!(story.artifacts.get("three"), Some(&false));
    }

    #[test]
    fn test_refresh_hashes_tracks_members_exactly() {
        let vcs = FakeVcs::new();
        vcs.set_head(Repo::Project("one"), "test-story", "aaa");
        vcs.set_head(Repo::Project("two"), "test-story", "bbb");

        let mut story = StoryManifest::new("test-story", &registry());
        story.insert_direct("one").unwrap();
        story.insert_direct("two").unwrap();
        story.refresh_hashes(&vcs).unwrap();
        assert_eq!(story.hashes.len(), 2);

        story.remove_member("two");
        story.refresh_hashes(&vcs).unwrap();
        assert_eq!(story.hashes.keys().collect::<Vec<_>>(), vec!["one"]);
    }

    #[test]
    fn test_flattened_blast_radius_deduplicates() {
        let mut story = StoryManifest::new("test-story", &registry());
        story
            .blast_radius
            .insert("one".to_string(), vec!["three".to_string(), "two".to_string()]);
        story
            .blast_radius
            .insert("two".to_string(), vec!["three".to_string()]);
        assert_eq!(
            story.flattened_blast_radius(),
            vec!["three".to_string(), "two".to_string()]
        );
    }

    #[test]
    fn test_to_registry_forces_artifacts_false() {
        let mut story = StoryManifest::new("test-story", &registry());
        story.insert_direct("two").unwrap();
        story.recompute_artifacts();
        let rebuilt = story.to_registry();
        assert_eq!(rebuilt.projects, registry().projects);
        assert!(rebuilt.artifacts.values().all(|flag| !flag));
    }

    #[test]
    fn test_serialized_field_names_and_omission() {
        let story = StoryManifest::new("test-story", &registry());
        let json = serde_json::to_value(&story).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.get("story").and_then(|v| v.as_str()), Some("test-story"));
        assert!(obj.contains_key("all-projects"));
        assert!(!obj.contains_key("projects"));
        assert!(!obj.contains_key("blast-radius"));
        assert!(!obj.contains_key("hashes"));
    }

    #[test]
    fn test_membership_serialization() {
        let derived = Membership::Derived {
            claimed_by: vec!["one".to_string()],
        };
        assert_eq!(
            serde_json::to_string(&derived).unwrap(),
            r#"{"derived":{"claimed-by":["one"]}}"#
        );
        assert_eq!(
            serde_json::to_string(&Membership::Direct).unwrap(),
            r#""direct""#
        );
    }

    #[test]
    fn test_write_then_load_preserves_bytes() {
        let ws = MemoryWorkspace::new();
        let vcs = FakeVcs::new();
        let mut story = StoryManifest::new("test-story", &registry());
        story.insert_direct("two").unwrap();
        story.insert_direct("one").unwrap();
        story.recompute_artifacts();
        story.refresh_hashes(&vcs).unwrap();
        story.write(&ws).unwrap();

        let first = ws.get_string(".meta").unwrap();
        let loaded = StoryManifest::load(&ws).unwrap();
        loaded.write(&ws).unwrap();
        assert_eq!(first, ws.get_string(".meta").unwrap());
        assert_eq!(
            loaded.projects.keys().collect::<Vec<_>>(),
            vec!["two", "one"],
            "insertion order survives a round trip"
        );
    }

    #[test]
    fn test_load_for_branch_prefers_archive() {
        let ws = MemoryWorkspace::new();
        let story = StoryManifest::new("feature/x", &registry());
        story
            .write_to(&ws, &crate::config::archive_path("feature/x"))
            .unwrap();
        registry().write(&ws).unwrap();

        let loaded = StoryManifest::load_for_branch(&ws, "feature/x").unwrap();
        assert_eq!(loaded.name, "feature/x");
    }

    #[test]
    fn test_invariant_violations_detects_stale_hash() {
        let mut story = StoryManifest::new("test-story", &registry());
        story
            .hashes
            .insert("one".to_string(), "abc".to_string());
        let violations = story.invariant_violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("non-member one"));
    }
}
