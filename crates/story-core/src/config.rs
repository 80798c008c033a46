//! Story tool configuration.
//!
//! Paths are relative to the metarepo root. Every field has a default so a
//! bare metarepo works without any configuration; environment variables
//! override the defaults through [`StoryConfig::from_env`].

use std::path::PathBuf;
use std::time::Duration;

/// Primary manifest location: the registry on trunk, the story on a story branch.
pub const MANIFEST_FILE: &str = ".meta";

/// Where the registry is parked while a story occupies [`MANIFEST_FILE`].
pub const REGISTRY_BACKUP_FILE: &str = ".meta.json";

/// Directory holding prepared story archives.
pub const ARCHIVE_DIR: &str = "story";

/// Projects listed here are never package-manifest rewritten.
pub const IGNORE_FILE: &str = ".storyignore";

/// Package manifest file name inside each project.
pub const PACKAGE_MANIFEST_FILE: &str = "package.json";

/// Runtime configuration shared by every lifecycle operation.
#[derive(Debug, Clone)]
pub struct StoryConfig {
    /// Release branch name.
    pub trunk: String,
    /// Remote used by push/fetch.
    pub remote: String,
    /// Base URL for commit links in commit messages.
    pub commit_url_base: String,
    /// Pause between successive code-hosting API calls.
    pub api_delay: Duration,
}

impl Default for StoryConfig {
    fn default() -> Self {
        StoryConfig {
            trunk: "master".to_string(),
            remote: "origin".to_string(),
            commit_url_base: "https://github.com".to_string(),
            api_delay: Duration::from_secs(1),
        }
    }
}

impl StoryConfig {
    /// Build a config from `STORY_TRUNK`, `STORY_REMOTE` and
    /// `STORY_COMMIT_URL_BASE`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        StoryConfig {
            trunk: std::env::var("STORY_TRUNK").unwrap_or(defaults.trunk),
            remote: std::env::var("STORY_REMOTE").unwrap_or(defaults.remote),
            commit_url_base: std::env::var("STORY_COMMIT_URL_BASE")
                .unwrap_or(defaults.commit_url_base),
            api_delay: defaults.api_delay,
        }
    }

    /// Override the trunk branch name.
    pub fn with_trunk(mut self, trunk: &str) -> Self {
        self.trunk = trunk.to_string();
        self
    }

    /// Override the delay between API calls.
    pub fn with_api_delay(mut self, delay: Duration) -> Self {
        self.api_delay = delay;
        self
    }

    /// Link to a commit in a project hosted under `organisation`.
    pub fn commit_url(&self, organisation: &str, project: &str, hash: &str) -> String {
        format!(
            "{}/{}/{}/commit/{}",
            self.commit_url_base.trim_end_matches('/'),
            organisation,
            project,
            hash
        )
    }
}

/// Archive path for a prepared story. Slashes in branch names become dashes.
pub fn archive_path(story: &str) -> PathBuf {
    PathBuf::from(ARCHIVE_DIR).join(format!("{}.json", story.replace('/', "-")))
}

/// Package manifest path of a project.
pub fn package_manifest_path(project: &str) -> PathBuf {
    PathBuf::from(project).join(PACKAGE_MANIFEST_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_trunk_is_master() {
        let config = StoryConfig::default();
        assert_eq!(config.trunk, "master");
        assert_eq!(config.remote, "origin");
    }

    #[test]
    fn test_archive_path_replaces_slashes() {
        assert_eq!(
            archive_path("feature/login"),
            PathBuf::from("story/feature-login.json")
        );
    }

    #[test]
    fn test_commit_url_trims_trailing_slash() {
        let config = StoryConfig {
            commit_url_base: "https://git.example.com/".to_string(),
            ..StoryConfig::default()
        };
        assert_eq!(
            config.commit_url("acme", "api", "abc123"),
            "https://git.example.com/acme/api/commit/abc123"
        );
    }

    #[test]
    fn test_with_trunk_overrides_default() {
        let config = StoryConfig::default().with_trunk("main");
        assert_eq!(config.trunk, "main");
    }
}
