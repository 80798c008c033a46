//! Error types for story lifecycle operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the story engine and its collaborators.
#[derive(Debug, Error)]
pub enum StoryError {
    /// A trunk-only operation was attempted while a story is checked out.
    #[error("already working on a story")]
    AlreadyOnStory,

    /// A story operation was attempted while the metarepo is on trunk.
    #[error("not working on a story")]
    NotOnStory,

    /// The command needs at least one argument.
    #[error("this command requires an argument")]
    RequiresArgument,

    /// The command was given arguments it does not accept.
    #[error("this command takes no arguments")]
    TakesNoArguments,

    /// A project name is not part of the metarepo's registry.
    #[error("project is not in the metarepo: {project}")]
    UnknownProject { project: String },

    /// A git command failed in a repository.
    #[error("git {command} failed in {repo}: {output}")]
    Vcs {
        repo: String,
        command: String,
        output: String,
    },

    /// The blast radius calculator failed for a project.
    #[error("blast radius calculation failed for {project}: {reason}")]
    BlastRadius { project: String, reason: String },

    /// A package manifest is missing or cannot be parsed.
    #[error("invalid package manifest {path:?}: {reason}")]
    PackageManifest { path: PathBuf, reason: String },

    /// The story was archived by `prepare`; only pushing and merging remain.
    #[error("story {story} is prepared for merge; only push and merge are allowed")]
    Prepared { story: String },

    /// A story or registry manifest is missing or malformed.
    #[error("invalid manifest {path:?}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// The code-hosting API rejected or failed a call.
    #[error("code hosting error: {0}")]
    Hosting(String),

    /// An API token is needed for the code-hosting API.
    #[error("an API token is required, either using --github-api-token or $GITHUB_API_TOKEN")]
    MissingToken,

    /// An issue URL is needed to open pull requests.
    #[error("an issue URL is required")]
    MissingIssue,

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for StoryError {
    fn from(err: reqwest::Error) -> Self {
        StoryError::Hosting(err.to_string())
    }
}

/// Convenience result alias.
pub type StoryResult<T> = std::result::Result<T, StoryError>;
