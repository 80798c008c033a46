//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryWorkspace`, `FakeVcs`, `StaticRadius` and `FakeCodeHost`
//! that satisfy the trait contracts without touching disk, `git` or the
//! network.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StoryError, StoryResult};
use crate::hosting::{
    CodeHost, CreateOutcome, MergeStatus, NewPullRequest, PullRequest, PullRequestState,
};
use crate::radius::BlastRadiusCalculator;
use crate::vcs::{Repo, Vcs, NOTHING_STAGED};
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// MemoryWorkspace
// ---------------------------------------------------------------------------

/// In-memory file tree keyed by path relative to the root.
#[derive(Debug)]
pub struct MemoryWorkspace {
    root: PathBuf,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<HashSet<PathBuf>>,
}

impl Default for MemoryWorkspace {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/work/metarepo"),
            files: Mutex::default(),
            dirs: Mutex::default(),
        }
    }
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a UTF-8 file.
    pub fn put(&self, path: &str, contents: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), contents.as_bytes().to_vec());
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(Path::new(path))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl Workspace for MemoryWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    /// A path exists if it is a file, a created directory, or the parent of
    /// any file.
    fn exists(&self, path: &Path) -> bool {
        if self.dirs.lock().unwrap().contains(path) {
            return true;
        }
        self.files
            .lock()
            .unwrap()
            .keys()
            .any(|file| file.starts_with(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.files.lock().unwrap();
        let data = files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.display().to_string()))?;
        files.insert(to.to_path_buf(), data);
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.dirs.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeVcs
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VcsState {
    /// repo → checked-out branch (default `master`)
    branches: HashMap<String, String>,
    /// (repo, branch) → head commit
    heads: HashMap<(String, String), String>,
    staged: HashSet<String>,
    commits: Vec<(String, Vec<String>)>,
    calls: Vec<String>,
    cloned: Vec<(String, String)>,
    fail: Option<(String, String)>,
    counter: u64,
}

/// Scripted [`Vcs`] that records every call.
///
/// Branch heads default to `<repo>-initial`, so a fresh story branch has the
/// same head as trunk until something is committed on it.
#[derive(Debug, Default)]
pub struct FakeVcs {
    state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_branch(&self, repo: Repo<'_>, branch: &str) {
        self.state
            .lock()
            .unwrap()
            .branches
            .insert(repo.to_string(), branch.to_string());
    }

    pub fn set_head(&self, repo: Repo<'_>, branch: &str, hash: &str) {
        self.state
            .lock()
            .unwrap()
            .heads
            .insert((repo.to_string(), branch.to_string()), hash.to_string());
    }

    /// Mark changes as staged in `repo`.
    pub fn stage(&self, repo: Repo<'_>) {
        self.state.lock().unwrap().staged.insert(repo.to_string());
    }

    /// Make the next call of `operation` (e.g. `"checkout"`) in `repo` fail.
    pub fn fail_on(&self, repo: Repo<'_>, operation: &str) {
        self.state.lock().unwrap().fail = Some((repo.to_string(), operation.to_string()));
    }

    /// Every call as `"<repo>: <operation> <args>"`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Commit messages recorded for `repo`, one entry per commit.
    pub fn commits(&self, repo: Repo<'_>) -> Vec<Vec<String>> {
        let key = repo.to_string();
        self.state
            .lock()
            .unwrap()
            .commits
            .iter()
            .filter(|(r, _)| *r == key)
            .map(|(_, messages)| messages.clone())
            .collect()
    }

    /// `(url, project)` pairs passed to `clone_repo`.
    pub fn cloned(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().cloned.clone()
    }

    fn record(&self, repo: Repo<'_>, operation: &str, args: &str) -> StoryResult<()> {
        let mut state = self.state.lock().unwrap();
        let key = repo.to_string();
        let command = format!("{operation} {args}").trim().to_string();
        state.calls.push(format!("{key}: {command}"));

        if state.fail.as_ref() == Some(&(key.clone(), operation.to_string())) {
            state.fail = None;
            return Err(StoryError::Vcs {
                repo: key,
                command,
                output: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    fn branch_of(state: &VcsState, repo: &str) -> String {
        state
            .branches
            .get(repo)
            .cloned()
            .unwrap_or_else(|| "master".to_string())
    }
}

impl Vcs for FakeVcs {
    fn checkout_branch(&self, repo: Repo<'_>, branch: &str, create: bool) -> StoryResult<String> {
        let flag = if create { "-b " } else { "" };
        self.record(repo, "checkout", &format!("{flag}{branch}"))?;
        self.set_branch(repo, branch);
        Ok(format!("Switched to branch '{branch}'"))
    }

    fn delete_branch(
        &self,
        repo: Repo<'_>,
        branch: &str,
        trunk: &str,
        local: bool,
        remote: Option<&str>,
    ) -> StoryResult<String> {
        self.record(repo, "delete-branch", branch)?;
        let mut state = self.state.lock().unwrap();
        if local {
            state.branches.insert(repo.to_string(), trunk.to_string());
        }
        if local || remote.is_some() {
            state.heads.remove(&(repo.to_string(), branch.to_string()));
        }
        Ok(format!("Deleted branch {branch}"))
    }

    fn current_branch(&self, repo: Repo<'_>) -> StoryResult<String> {
        let state = self.state.lock().unwrap();
        Ok(Self::branch_of(&state, &repo.to_string()))
    }

    fn head(&self, repo: Repo<'_>, branch: &str) -> StoryResult<String> {
        let state = self.state.lock().unwrap();
        let key = repo.to_string();
        Ok(state
            .heads
            .get(&(key.clone(), branch.to_string()))
            .cloned()
            .unwrap_or_else(|| format!("{key}-initial")))
    }

    fn add(&self, repo: Repo<'_>, files: &[&str]) -> StoryResult<String> {
        self.record(repo, "add", &files.join(" "))?;
        self.stage(repo);
        Ok(String::new())
    }

    fn commit(&self, repo: Repo<'_>, messages: &[String]) -> StoryResult<String> {
        self.record(repo, "commit", messages.first().map(String::as_str).unwrap_or(""))?;
        let mut state = self.state.lock().unwrap();
        let key = repo.to_string();
        if !state.staged.remove(&key) {
            return Ok(NOTHING_STAGED.to_string());
        }

        state.counter += 1;
        let hash = format!("{key}-{}", state.counter);
        let branch = Self::branch_of(&state, &key);
        state.heads.insert((key.clone(), branch), hash.clone());
        state.commits.push((key, messages.to_vec()));
        Ok(format!("[{hash}] committed"))
    }

    fn push(&self, repo: Repo<'_>, remote: &str, branch: &str) -> StoryResult<String> {
        self.record(repo, "push", &format!("{remote} {branch}"))?;
        Ok(format!("pushed {branch} to {remote}"))
    }

    fn merge(&self, repo: Repo<'_>, source: &str, squash: bool) -> StoryResult<String> {
        let flag = if squash { "--squash " } else { "" };
        self.record(repo, "merge", &format!("{flag}{source}"))?;
        if squash {
            self.stage(repo);
        }
        Ok(format!("merged {source}"))
    }

    fn fetch(&self, repo: Repo<'_>, remote: &str, branch: &str) -> StoryResult<String> {
        self.record(repo, "fetch", &format!("{remote} {branch}"))?;
        Ok(String::new())
    }

    fn diff(&self, repo: Repo<'_>) -> StoryResult<String> {
        self.record(repo, "diff", "")?;
        Ok(String::new())
    }

    fn clone_repo(&self, url: &str, project: &str) -> StoryResult<String> {
        self.record(Repo::Project(project), "clone", url)?;
        self.state
            .lock()
            .unwrap()
            .cloned
            .push((url.to_string(), project.to_string()));
        Ok(format!("Cloning into '{project}'..."))
    }
}

// ---------------------------------------------------------------------------
// StaticRadius
// ---------------------------------------------------------------------------

/// Deterministic [`BlastRadiusCalculator`] backed by a fixed map.
/// Unknown projects have an empty blast radius.
#[derive(Debug, Default, Clone)]
pub struct StaticRadius {
    radius: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
}

impl StaticRadius {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, project: &str, affected: &[&str]) -> Self {
        self.radius.insert(
            project.to_string(),
            affected.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    /// Calculation for `project` fails.
    pub fn failing(mut self, project: &str) -> Self {
        self.failing.insert(project.to_string());
        self
    }
}

impl BlastRadiusCalculator for StaticRadius {
    fn calculate(&self, _root: &Path, project: &str) -> StoryResult<Vec<String>> {
        if self.failing.contains(project) {
            return Err(StoryError::BlastRadius {
                project: project.to_string(),
                reason: "working copy is missing".to_string(),
            });
        }
        Ok(self.radius.get(project).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// FakeCodeHost
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HostState {
    /// project → pull requests with their state
    pull_requests: HashMap<String, Vec<(PullRequest, PullRequestState)>>,
    create_outcomes: HashMap<String, CreateOutcome>,
    merge_statuses: HashMap<String, MergeStatus>,
    created: Vec<(String, NewPullRequest)>,
    merged: Vec<(String, u64, String, String)>,
    next_number: u64,
}

/// In-memory [`CodeHost`]. Pull requests are opened successfully unless an
/// outcome is scripted for the project; merges succeed unless a status is
/// scripted.
#[derive(Debug, Default)]
pub struct FakeCodeHost {
    state: Mutex<HostState>,
}

impl FakeCodeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pull_request(self, project: &str, title: &str, state: PullRequestState) -> Self {
        {
            let mut host = self.state.lock().unwrap();
            host.next_number += 1;
            let pr = PullRequest {
                number: host.next_number,
                title: title.to_string(),
                html_url: format!("https://example.test/{project}/pull/{}", host.next_number),
            };
            host.pull_requests
                .entry(project.to_string())
                .or_default()
                .push((pr, state));
        }
        self
    }

    pub fn with_create_outcome(self, project: &str, outcome: CreateOutcome) -> Self {
        self.state
            .lock()
            .unwrap()
            .create_outcomes
            .insert(project.to_string(), outcome);
        self
    }

    pub fn with_merge_status(self, project: &str, status: MergeStatus) -> Self {
        self.state
            .lock()
            .unwrap()
            .merge_statuses
            .insert(project.to_string(), status);
        self
    }

    /// `(project, request)` for every successfully opened pull request.
    pub fn created(&self) -> Vec<(String, NewPullRequest)> {
        self.state.lock().unwrap().created.clone()
    }

    /// `(project, number, commit title, sha)` for every merge call.
    pub fn merged(&self) -> Vec<(String, u64, String, String)> {
        self.state.lock().unwrap().merged.clone()
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn create_pull_request(
        &self,
        _organisation: &str,
        project: &str,
        pull_request: &NewPullRequest,
    ) -> StoryResult<CreateOutcome> {
        let mut host = self.state.lock().unwrap();
        if let Some(outcome) = host.create_outcomes.get(project) {
            return Ok(outcome.clone());
        }

        host.next_number += 1;
        let pr = PullRequest {
            number: host.next_number,
            title: pull_request.title.clone(),
            html_url: format!("https://example.test/{project}/pull/{}", host.next_number),
        };
        host.pull_requests
            .entry(project.to_string())
            .or_default()
            .push((pr.clone(), PullRequestState::Open));
        host.created
            .push((project.to_string(), pull_request.clone()));
        Ok(CreateOutcome::Created(pr))
    }

    async fn list_pull_requests(
        &self,
        _organisation: &str,
        project: &str,
        state: PullRequestState,
        _base: &str,
    ) -> StoryResult<Vec<PullRequest>> {
        let host = self.state.lock().unwrap();
        Ok(host
            .pull_requests
            .get(project)
            .into_iter()
            .flatten()
            .filter(|(_, s)| *s == state)
            .map(|(pr, _)| pr.clone())
            .collect())
    }

    async fn merge_pull_request(
        &self,
        _organisation: &str,
        project: &str,
        number: u64,
        commit_title: &str,
        sha: &str,
    ) -> StoryResult<MergeStatus> {
        let mut host = self.state.lock().unwrap();
        host.merged.push((
            project.to_string(),
            number,
            commit_title.to_string(),
            sha.to_string(),
        ));
        Ok(host
            .merge_statuses
            .get(project)
            .copied()
            .unwrap_or(MergeStatus::Merged))
    }
}
