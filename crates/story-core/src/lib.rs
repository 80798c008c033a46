//! Story: cross-repository stories over a metarepo.
//!
//! A story is a named unit of work spanning a metarepo and any number of
//! member repositories. This crate keeps the story manifest consistent
//! (membership, blast radius, artifacts, head hashes) and rewrites package
//! manifest dependency pins as projects join and leave the story.
//!
//! Side effects go through injected collaborators: [`Workspace`] for files,
//! [`Vcs`] for git, [`BlastRadiusCalculator`] for the dependency graph and
//! [`CodeHost`] for pull requests. [`fakes`] has in-memory versions of each.

pub mod config;
pub mod error;
pub mod fakes;
pub mod graph;
pub mod hosting;
pub mod ignore;
pub mod lifecycle;
pub mod mode;
pub mod package;
pub mod radius;
pub mod registry;
pub mod story;
pub mod telemetry;
pub mod vcs;
pub mod workspace;

pub use config::StoryConfig;
pub use error::{StoryError, StoryResult};
pub use hosting::{CodeHost, GitHubClient};
pub use lifecycle::{
    AddOptions, AddReport, HostMergeOutcome, HostReport, PruneReport, PullRequestOutcome,
    RemoveReport, RepoOutput, StoryLifecycle,
};
pub use mode::Mode;
pub use package::PackageManifest;
pub use radius::{BlastRadiusCalculator, ManifestGraphCalculator};
pub use registry::Registry;
pub use story::{Membership, StoryManifest};
pub use vcs::{GitCli, Repo, Vcs};
pub use workspace::{OsWorkspace, Workspace};
