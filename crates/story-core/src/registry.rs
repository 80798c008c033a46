//! Global project registry: the universe of repositories a metarepo knows.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{MANIFEST_FILE, REGISTRY_BACKUP_FILE};
use crate::error::StoryResult;
use crate::workspace::{read_json, write_json, Workspace};

/// The registry file that lives at the metarepo root on trunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organisation: String,

    /// Project name → clone URL.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub projects: IndexMap<String, String>,

    /// Independently deployable projects.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub artifacts: IndexMap<String, bool>,
}

impl Registry {
    /// Load the registry from the primary manifest path (trunk mode).
    pub fn load_on_trunk(ws: &dyn Workspace) -> StoryResult<Self> {
        read_json(ws, Path::new(MANIFEST_FILE))
    }

    /// Load the registry from its parked location (story mode).
    pub fn load_on_branch(ws: &dyn Workspace) -> StoryResult<Self> {
        read_json(ws, Path::new(REGISTRY_BACKUP_FILE))
    }

    /// Write the registry to the primary manifest path.
    pub fn write(&self, ws: &dyn Workspace) -> StoryResult<()> {
        write_json(ws, Path::new(MANIFEST_FILE), self)
    }

    /// Park the on-disk registry so a story manifest can take its place.
    pub fn archive(ws: &dyn Workspace) -> StoryResult<()> {
        ws.rename(Path::new(MANIFEST_FILE), Path::new(REGISTRY_BACKUP_FILE))?;
        Ok(())
    }

    pub fn contains(&self, project: &str) -> bool {
        self.projects.contains_key(project)
    }
}
