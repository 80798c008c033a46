//! Version-control collaborator.
//!
//! Every operation is addressed at a [`Repo`]: either the metarepo root or a
//! member project checked out underneath it. [`GitCli`] shells out to `git`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{StoryError, StoryResult};

/// Returned by [`Vcs::commit`] when there is nothing to commit.
pub const NOTHING_STAGED: &str = "no staged changes to commit";

/// Returned by [`Vcs::push`] when every commit is already on a remote.
pub const NOTHING_TO_PUSH: &str = "no unpushed commits";

/// Which working copy an operation runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repo<'a> {
    Metarepo,
    Project(&'a str),
}

impl Repo<'_> {
    /// Directory of the working copy under `root`.
    pub fn dir(&self, root: &Path) -> PathBuf {
        match self {
            Repo::Metarepo => root.to_path_buf(),
            Repo::Project(name) => root.join(name),
        }
    }
}

impl fmt::Display for Repo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repo::Metarepo => f.write_str("metarepo"),
            Repo::Project(name) => f.write_str(name),
        }
    }
}

/// Branch, commit and remote operations used by the lifecycle.
///
/// Methods returning `String` return the tool's trimmed output for display.
pub trait Vcs: Send + Sync {
    fn checkout_branch(&self, repo: Repo<'_>, branch: &str, create: bool) -> StoryResult<String>;

    /// Delete `branch` locally (after checking out `trunk`) and/or on the
    /// named remote.
    fn delete_branch(
        &self,
        repo: Repo<'_>,
        branch: &str,
        trunk: &str,
        local: bool,
        remote: Option<&str>,
    ) -> StoryResult<String>;

    fn current_branch(&self, repo: Repo<'_>) -> StoryResult<String>;

    /// Commit id at the tip of `branch`.
    fn head(&self, repo: Repo<'_>, branch: &str) -> StoryResult<String>;

    fn heads_equal(&self, repo: Repo<'_>, a: &str, b: &str) -> StoryResult<bool> {
        Ok(self.head(repo, a)? == self.head(repo, b)?)
    }

    fn add(&self, repo: Repo<'_>, files: &[&str]) -> StoryResult<String>;

    /// Commit staged changes with one `--message` per entry. Returns
    /// [`NOTHING_STAGED`] without committing when nothing is staged.
    fn commit(&self, repo: Repo<'_>, messages: &[String]) -> StoryResult<String>;

    /// Push `branch` to `remote`. Returns [`NOTHING_TO_PUSH`] when there are
    /// no unpushed commits.
    fn push(&self, repo: Repo<'_>, remote: &str, branch: &str) -> StoryResult<String>;

    /// Merge `source` into the checked-out branch. A squash merge leaves the
    /// result staged for a separate commit.
    fn merge(&self, repo: Repo<'_>, source: &str, squash: bool) -> StoryResult<String>;

    /// Update the local `branch` from `remote`.
    fn fetch(&self, repo: Repo<'_>, remote: &str, branch: &str) -> StoryResult<String>;

    /// Zero-context diff of the last commit.
    fn diff(&self, repo: Repo<'_>) -> StoryResult<String>;

    /// Clone `url` into the project directory.
    fn clone_repo(&self, url: &str, project: &str) -> StoryResult<String>;
}

/// [`Vcs`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn run(&self, repo: Repo<'_>, args: &[&str]) -> StoryResult<String> {
        let command = args.join(" ");
        debug!(repo = %repo, command = %command, "running git");

        let output = Command::new("git")
            .args(args)
            .current_dir(repo.dir(&self.root))
            .output()
            .map_err(|e| StoryError::Vcs {
                repo: repo.to_string(),
                command: command.clone(),
                output: format!("failed to run git: {e}"),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            return Err(StoryError::Vcs {
                repo: repo.to_string(),
                command,
                output: combined,
            });
        }
        Ok(combined)
    }
}

impl Vcs for GitCli {
    fn checkout_branch(&self, repo: Repo<'_>, branch: &str, create: bool) -> StoryResult<String> {
        if create {
            self.run(repo, &["checkout", "-b", branch])
        } else {
            self.run(repo, &["checkout", branch])
        }
    }

    fn delete_branch(
        &self,
        repo: Repo<'_>,
        branch: &str,
        trunk: &str,
        local: bool,
        remote: Option<&str>,
    ) -> StoryResult<String> {
        let mut outputs = Vec::new();
        if local {
            self.checkout_branch(repo, trunk, false)?;
            outputs.push(self.run(repo, &["branch", "--delete", "--force", branch])?);
        }
        if let Some(remote) = remote {
            outputs.push(self.run(repo, &["push", remote, "--delete", branch])?);
        }
        Ok(outputs.join("\n"))
    }

    fn current_branch(&self, repo: Repo<'_>) -> StoryResult<String> {
        self.run(repo, &["symbolic-ref", "--short", "HEAD"])
    }

    fn head(&self, repo: Repo<'_>, branch: &str) -> StoryResult<String> {
        let reference = format!("refs/heads/{branch}");
        self.run(repo, &["rev-parse", "--verify", &reference])
    }

    fn add(&self, repo: Repo<'_>, files: &[&str]) -> StoryResult<String> {
        let mut args = vec!["add"];
        args.extend_from_slice(files);
        self.run(repo, &args)
    }

    fn commit(&self, repo: Repo<'_>, messages: &[String]) -> StoryResult<String> {
        if self.run(repo, &["diff", "--cached", "--name-only"])?.is_empty() {
            return Ok(NOTHING_STAGED.to_string());
        }
        let mut args = vec!["commit"];
        for message in messages {
            args.push("--message");
            args.push(message);
        }
        self.run(repo, &args)
    }

    fn push(&self, repo: Repo<'_>, remote: &str, branch: &str) -> StoryResult<String> {
        if self
            .run(repo, &["log", "--branches", "--not", "--remotes"])?
            .is_empty()
        {
            return Ok(NOTHING_TO_PUSH.to_string());
        }
        self.run(repo, &["push", "-u", remote, branch])
    }

    fn merge(&self, repo: Repo<'_>, source: &str, squash: bool) -> StoryResult<String> {
        if squash {
            self.run(repo, &["merge", "--squash", source])
        } else {
            self.run(repo, &["merge", source])
        }
    }

    fn fetch(&self, repo: Repo<'_>, remote: &str, branch: &str) -> StoryResult<String> {
        let refspec = format!("{branch}:{branch}");
        self.run(repo, &["fetch", remote, &refspec])
    }

    fn diff(&self, repo: Repo<'_>) -> StoryResult<String> {
        self.run(repo, &["--no-pager", "diff", "-U0", "HEAD~1"])
    }

    fn clone_repo(&self, url: &str, project: &str) -> StoryResult<String> {
        self.run(Repo::Metarepo, &["clone", url, project])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn init_repo(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        run_git(dir, &["init"]);
        run_git(dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        run_git(dir, &["config", "user.name", "test-user"]);
        run_git(dir, &["config", "user.email", "test@example.com"]);
        run_git(dir, &["commit", "--allow-empty", "-m", "initial"]);
    }

    /// Metarepo at the temp root with one project `api` underneath.
    fn make_metarepo() -> (tempfile::TempDir, GitCli) {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        init_repo(&dir.path().join("api"));
        let git = GitCli::new(dir.path());
        (dir, git)
    }

    #[test]
    fn checkout_create_switches_branch() {
        let (_dir, git) = make_metarepo();
        git.checkout_branch(Repo::Project("api"), "feature", true)
            .unwrap();
        assert_eq!(git.current_branch(Repo::Project("api")).unwrap(), "feature");
        assert_eq!(git.current_branch(Repo::Metarepo).unwrap(), "master");
    }

    #[test]
    fn new_branch_head_equals_trunk() {
        let (_dir, git) = make_metarepo();
        let api = Repo::Project("api");
        git.checkout_branch(api, "feature", true).unwrap();
        assert!(git.heads_equal(api, "feature", "master").unwrap());

        git.run(api, &["commit", "--allow-empty", "-m", "work"])
            .unwrap();
        assert!(!git.heads_equal(api, "feature", "master").unwrap());
        assert_eq!(git.head(api, "feature").unwrap().len(), 40);
    }

    #[test]
    fn commit_without_staged_changes_is_noop() {
        let (_dir, git) = make_metarepo();
        let before = git.head(Repo::Metarepo, "master").unwrap();
        let output = git
            .commit(Repo::Metarepo, &["nothing".to_string()])
            .unwrap();
        assert_eq!(output, NOTHING_STAGED);
        assert_eq!(git.head(Repo::Metarepo, "master").unwrap(), before);
    }

    #[test]
    fn add_and_commit_with_multiple_messages() {
        let (dir, git) = make_metarepo();
        let api = Repo::Project("api");
        fs::write(dir.path().join("api/package.json"), "{}\n").unwrap();
        git.add(api, &["package.json"]).unwrap();
        git.commit(api, &["subject".to_string(), "body".to_string()])
            .unwrap();

        let log = git.run(api, &["log", "-1", "--format=%B"]).unwrap();
        assert!(log.starts_with("subject"));
        assert!(log.contains("body"));
        assert!(git.diff(api).unwrap().contains("package.json"));
    }

    #[test]
    fn delete_branch_returns_to_trunk() {
        let (_dir, git) = make_metarepo();
        let api = Repo::Project("api");
        git.checkout_branch(api, "feature", true).unwrap();
        git.delete_branch(api, "feature", "master", true, None)
            .unwrap();
        assert_eq!(git.current_branch(api).unwrap(), "master");
        assert!(git.head(api, "feature").is_err());
    }

    #[test]
    fn delete_branch_on_named_remote() {
        let (dir, git) = make_metarepo();
        let url = dir.path().join("api");
        git.clone_repo(&url.to_string_lossy(), "copy").unwrap();
        let copy = Repo::Project("copy");
        git.run(copy, &["remote", "rename", "origin", "upstream"])
            .unwrap();
        git.checkout_branch(copy, "feature", true).unwrap();
        git.run(copy, &["push", "upstream", "feature"]).unwrap();
        assert!(git.head(Repo::Project("api"), "feature").is_ok());

        git.delete_branch(copy, "feature", "master", true, Some("upstream"))
            .unwrap();
        assert!(git.head(copy, "feature").is_err());
        assert!(git.head(Repo::Project("api"), "feature").is_err());
    }

    #[test]
    fn squash_merge_stages_changes() {
        let (dir, git) = make_metarepo();
        let api = Repo::Project("api");
        git.checkout_branch(api, "feature", true).unwrap();
        fs::write(dir.path().join("api/file.txt"), "change\n").unwrap();
        git.add(api, &["file.txt"]).unwrap();
        git.commit(api, &["feature work".to_string()]).unwrap();

        git.checkout_branch(api, "master", false).unwrap();
        git.merge(api, "feature", true).unwrap();
        let output = git.commit(api, &["squashed".to_string()]).unwrap();
        assert_ne!(output, NOTHING_STAGED);
        assert!(dir.path().join("api/file.txt").exists());
    }

    #[test]
    fn clone_repo_into_project_directory() {
        let (dir, git) = make_metarepo();
        let url = dir.path().join("api");
        git.clone_repo(&url.to_string_lossy(), "copy").unwrap();
        assert!(dir.path().join("copy/.git").exists());
    }

    #[test]
    fn failure_reports_repo_and_command() {
        let (_dir, git) = make_metarepo();
        let err = git
            .checkout_branch(Repo::Project("api"), "missing", false)
            .unwrap_err();
        match err {
            StoryError::Vcs { repo, command, .. } => {
                assert_eq!(repo, "api");
                assert_eq!(command, "checkout missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn repo_dir_resolves_under_root() {
        let root = Path::new("/work");
        assert_eq!(Repo::Metarepo.dir(root), PathBuf::from("/work"));
        assert_eq!(Repo::Project("api").dir(root), PathBuf::from("/work/api"));
    }
}
