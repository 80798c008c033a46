//! Story lifecycle orchestration.
//!
//! [`StoryLifecycle`] drives the story manifest, the dependency rewriter and
//! the collaborators in lock-step. Every operation takes the [`Mode`]
//! detected for this invocation and checks its precondition before touching
//! anything. Projects are always visited in sorted order.
//!
//! Failures from collaborators abort the operation where they happen.
//! Nothing is rolled back: re-running an operation is always safe.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{
    archive_path, StoryConfig, ARCHIVE_DIR, MANIFEST_FILE, PACKAGE_MANIFEST_FILE,
};
use crate::error::{StoryError, StoryResult};
use crate::hosting::{CodeHost, CreateOutcome, MergeStatus, NewPullRequest, PullRequestState};
use crate::ignore::load_ignore;
use crate::mode::Mode;
use crate::package::PackageManifest;
use crate::radius::BlastRadiusCalculator;
use crate::registry::Registry;
use crate::story::StoryManifest;
use crate::vcs::{Repo, Vcs};
use crate::workspace::Workspace;

/// Output of one collaborator call, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOutput {
    pub repo: String,
    pub output: String,
}

impl RepoOutput {
    fn new(repo: Repo<'_>, output: impl Into<String>) -> Self {
        Self {
            repo: repo.to_string(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Only clone missing projects; leave the story untouched.
    pub ci: bool,
    /// Also pull in private package dependencies of added projects.
    pub dependencies: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AddReport {
    pub added: Vec<String>,
    /// Pulled in as dependencies of added projects.
    pub derived: Vec<String>,
    /// Not in the registry.
    pub skipped: Vec<String>,
    pub outputs: Vec<RepoOutput>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveReport {
    pub removed: Vec<String>,
    /// Not members of the story.
    pub skipped: Vec<String>,
    pub outputs: Vec<RepoOutput>,
}

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    /// Members whose story branch never moved off trunk.
    pub unchanged: Vec<String>,
    /// Derived members left without a claimant but with work of their own.
    /// They keep their branch and are now direct members.
    pub promoted: Vec<String>,
    pub outputs: Vec<RepoOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestOutcome {
    Opened { url: String },
    Existing { url: String },
    /// The story branch has no commits over trunk.
    IdenticalToTrunk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMergeOutcome {
    Merged { url: String },
    NotMergeable { url: String },
    HeadModified { url: String },
    AlreadyClosed { url: String },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport<T> {
    pub repo: String,
    pub outcome: T,
}

/// Orchestrates story operations over injected collaborators.
pub struct StoryLifecycle {
    ws: Arc<dyn Workspace>,
    vcs: Arc<dyn Vcs>,
    radius: Arc<dyn BlastRadiusCalculator>,
    config: StoryConfig,
}

impl StoryLifecycle {
    pub fn new(
        ws: Arc<dyn Workspace>,
        vcs: Arc<dyn Vcs>,
        radius: Arc<dyn BlastRadiusCalculator>,
        config: StoryConfig,
    ) -> Self {
        Self {
            ws,
            vcs,
            radius,
            config,
        }
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    /// Detect the mode of the metarepo for this invocation.
    pub fn detect_mode(&self) -> StoryResult<Mode> {
        Mode::detect(self.vcs.as_ref(), &self.config.trunk)
    }

    fn ws(&self) -> &dyn Workspace {
        self.ws.as_ref()
    }

    /// The live story manifest for `branch`, for operations that change it.
    ///
    /// After `prepare` the manifest path holds the registry again, which is
    /// rejected rather than read as a nameless story.
    fn load_story(&self, branch: &str) -> StoryResult<StoryManifest> {
        let story = StoryManifest::load(self.ws())?;
        if !story.name.is_empty() {
            return Ok(story);
        }
        if self.ws().exists(&archive_path(branch)) {
            return Err(StoryError::Prepared {
                story: branch.to_string(),
            });
        }
        Err(StoryError::Manifest {
            path: MANIFEST_FILE.into(),
            reason: "not a story manifest".to_string(),
        })
    }

    /// The story for `branch` as last recorded, archived or live.
    fn view_story(&self, branch: &str) -> StoryResult<StoryManifest> {
        StoryManifest::load_for_branch(self.ws(), branch)
    }

    fn ensure_cloned(
        &self,
        story: &StoryManifest,
        project: &str,
    ) -> StoryResult<Option<RepoOutput>> {
        if self.ws().exists(Path::new(project)) {
            return Ok(None);
        }
        let url = story
            .all_projects
            .get(project)
            .ok_or_else(|| StoryError::UnknownProject {
                project: project.to_string(),
            })?;
        let output = self.vcs.clone_repo(url, project)?;
        Ok(Some(RepoOutput::new(Repo::Project(project), output)))
    }

    /// Recompute derived state, refresh hashes and persist.
    fn settle(&self, story: &mut StoryManifest) -> StoryResult<()> {
        story.recompute_artifacts();
        story.refresh_hashes(self.vcs.as_ref())?;
        story.write(self.ws())
    }

    /// `[header, commit links, blast radius]` for metarepo commits.
    fn summary_messages(&self, story: &StoryManifest, header: String) -> Vec<String> {
        vec![
            header,
            story.commit_links(&self.config).join("\n"),
            format!("Blast Radius: {}", story.flattened_blast_radius().join(" ")),
        ]
    }

    fn commit_metarepo(&self, messages: &[String], files: &[&str]) -> StoryResult<RepoOutput> {
        self.vcs.add(Repo::Metarepo, files)?;
        let output = self.vcs.commit(Repo::Metarepo, messages)?;
        Ok(RepoOutput::new(Repo::Metarepo, output))
    }

    /// Rewrite the package manifest of every non-ignored member with `edit`,
    /// saving only manifests that changed. Returns the projects saved.
    fn rewrite_manifests(
        &self,
        story: &StoryManifest,
        mut edit: impl FnMut(&mut PackageManifest) -> usize,
    ) -> StoryResult<Vec<String>> {
        let ignored = load_ignore(self.ws())?;
        let mut saved = Vec::new();
        for project in story.project_names() {
            if ignored.contains(&project) {
                continue;
            }
            let mut manifest = PackageManifest::load(self.ws(), &project)?;
            if edit(&mut manifest) > 0 {
                manifest.save(self.ws(), &project)?;
                saved.push(project);
            }
        }
        Ok(saved)
    }

    // -----------------------------------------------------------------------
    // Trunk-mode operations
    // -----------------------------------------------------------------------

    /// Start a story: branch the metarepo and swap the registry for a fresh
    /// story manifest.
    pub fn create(&self, mode: &Mode, name: &str) -> StoryResult<Vec<RepoOutput>> {
        mode.require_trunk()?;
        if name.is_empty() {
            return Err(StoryError::RequiresArgument);
        }

        let registry = Registry::load_on_trunk(self.ws())?;
        let story = StoryManifest::new(name, &registry);

        let output = self.vcs.checkout_branch(Repo::Metarepo, name, true)?;
        Registry::archive(self.ws())?;
        story.write(self.ws())?;

        info!(story = %name, projects = registry.projects.len(), "story created");
        Ok(vec![RepoOutput::new(Repo::Metarepo, output)])
    }

    /// Check out an existing story everywhere, cloning missing members.
    pub fn load(&self, mode: &Mode, name: &str) -> StoryResult<Vec<RepoOutput>> {
        mode.require_trunk()?;
        if name.is_empty() {
            return Err(StoryError::RequiresArgument);
        }

        let mut outputs = vec![RepoOutput::new(
            Repo::Metarepo,
            self.vcs.checkout_branch(Repo::Metarepo, name, false)?,
        )];

        let story = self.view_story(name)?;
        for project in story.project_names() {
            outputs.extend(self.ensure_cloned(&story, &project)?);
            let repo = Repo::Project(&project);
            outputs.push(RepoOutput::new(
                repo,
                self.vcs.checkout_branch(repo, name, false)?,
            ));
        }

        info!(story = %name, "story loaded");
        Ok(outputs)
    }

    // -----------------------------------------------------------------------
    // Story-mode operations
    // -----------------------------------------------------------------------

    /// Return every member and the metarepo to trunk.
    pub fn reset(&self, mode: &Mode) -> StoryResult<Vec<RepoOutput>> {
        let branch = mode.require_story()?;
        let story = self.view_story(branch)?;
        let trunk = &self.config.trunk;

        let mut outputs = Vec::new();
        for project in story.project_names() {
            let repo = Repo::Project(&project);
            outputs.push(RepoOutput::new(repo, self.vcs.checkout_branch(repo, trunk, false)?));
        }
        outputs.push(RepoOutput::new(
            Repo::Metarepo,
            self.vcs.checkout_branch(Repo::Metarepo, trunk, false)?,
        ));
        Ok(outputs)
    }

    /// Add projects to the story.
    ///
    /// Unknown names are skipped and reported. Each added project gets the
    /// story branch and a fresh blast radius. Afterwards every member's
    /// private dependencies on other members are pinned to the story branch.
    pub fn add(
        &self,
        mode: &Mode,
        names: &[String],
        options: AddOptions,
    ) -> StoryResult<AddReport> {
        let branch = mode.require_story()?;
        if names.is_empty() {
            return Err(StoryError::RequiresArgument);
        }

        let mut story = self.load_story(branch)?;
        let mut report = AddReport::default();

        for name in &dedup_names(names) {
            if !story.all_projects.contains_key(name) {
                warn!(project = %name, "project is not in the metarepo, skipping");
                report.skipped.push(name.clone());
                continue;
            }
            report.outputs.extend(self.ensure_cloned(&story, name)?);
            if options.ci {
                continue;
            }

            let newly_added = story.insert_direct(name)?;
            story.add_project_to_blast_radius(self.radius.as_ref(), self.ws().root(), name)?;
            let repo = Repo::Project(name);
            report.outputs.push(RepoOutput::new(
                repo,
                self.vcs.checkout_branch(repo, &story.name, newly_added)?,
            ));
            report.added.push(name.clone());

            if options.dependencies {
                self.add_dependencies(&mut story, name, &mut report)?;
            }
        }

        if options.ci {
            return Ok(report);
        }

        self.settle(&mut story)?;

        let members = story.project_names();
        let pinned = self.rewrite_manifests(&story, |manifest| {
            manifest.set_story_pins(&story.name, members.iter().map(String::as_str))
        })?;

        info!(
            story = %story.name,
            added = ?report.added,
            derived = ?report.derived,
            pinned = ?pinned,
            "projects added"
        );
        Ok(report)
    }

    /// Claim the private package dependencies of `claimant` as derived members.
    fn add_dependencies(
        &self,
        story: &mut StoryManifest,
        claimant: &str,
        report: &mut AddReport,
    ) -> StoryResult<()> {
        if load_ignore(self.ws())?.contains(claimant) {
            return Ok(());
        }
        let manifest = PackageManifest::load(self.ws(), claimant)?;
        for dependency in manifest.private_dependencies() {
            if !story.insert_derived(&dependency, claimant) {
                continue;
            }
            report.outputs.extend(self.ensure_cloned(story, &dependency)?);
            let repo = Repo::Project(&dependency);
            report.outputs.push(RepoOutput::new(
                repo,
                self.vcs.checkout_branch(repo, &story.name, true)?,
            ));
            report.derived.push(dependency);
        }
        Ok(())
    }

    /// Remove projects from the story and revert their story pins elsewhere.
    pub fn remove(&self, mode: &Mode, names: &[String]) -> StoryResult<RemoveReport> {
        let branch = mode.require_story()?;
        if names.is_empty() {
            return Err(StoryError::RequiresArgument);
        }

        let mut story = self.load_story(branch)?;
        let mut report = RemoveReport::default();
        let mut targets = Vec::new();
        for name in dedup_names(names) {
            if story.projects.contains_key(&name) {
                targets.push(name);
            } else {
                warn!(project = %name, "project is not part of the story, skipping");
                report.skipped.push(name);
            }
        }

        report.outputs = self.remove_members(&mut story, &targets)?;
        report.removed = targets;
        Ok(report)
    }

    fn remove_members(
        &self,
        story: &mut StoryManifest,
        names: &[String],
    ) -> StoryResult<Vec<RepoOutput>> {
        let mut outputs = Vec::new();
        for name in names {
            story.remove_member(name);
            let repo = Repo::Project(name);
            let output = self
                .vcs
                .delete_branch(repo, &story.name, &self.config.trunk, true, None)?;
            outputs.push(RepoOutput::new(repo, output));
        }

        self.settle(story)?;

        let unpinned = self.rewrite_manifests(story, |manifest| {
            names
                .iter()
                .filter(|name| manifest.unpin_one(name, &story.name))
                .count()
        })?;

        info!(story = %story.name, removed = ?names, unpinned = ?unpinned, "projects removed");
        Ok(outputs)
    }

    /// Remove members whose story branch is still at trunk. Derived members
    /// left without a claimant keep their branch and become direct members.
    pub fn prune(&self, mode: &Mode) -> StoryResult<PruneReport> {
        let branch = mode.require_story()?;
        let mut story = self.load_story(branch)?;

        let mut unchanged = Vec::new();
        for project in story.project_names() {
            if self
                .vcs
                .heads_equal(Repo::Project(&project), &story.name, &self.config.trunk)?
            {
                unchanged.push(project);
            }
        }

        // Every unchanged member is going, so an orphan left over has work.
        let mut preview = story.clone();
        for project in &unchanged {
            preview.remove_member(project);
        }
        let promoted = preview.orphaned_members();

        let mut report = PruneReport {
            unchanged,
            promoted,
            outputs: Vec::new(),
        };
        if report.unchanged.is_empty() && report.promoted.is_empty() {
            info!(story = %story.name, "nothing to prune");
            return Ok(report);
        }

        for project in &report.promoted {
            story.insert_direct(project)?;
            story.add_project_to_blast_radius(self.radius.as_ref(), self.ws().root(), project)?;
            info!(project = %project, "unclaimed dependency has work, kept as a direct member");
        }

        if report.unchanged.is_empty() {
            self.settle(&mut story)?;
        } else {
            report.outputs = self.remove_members(&mut story, &report.unchanged)?;
        }
        Ok(report)
    }

    /// Pin every member's private dependencies on other members to their
    /// current commit hashes and stage the manifests.
    pub fn pin(&self, mode: &Mode) -> StoryResult<Vec<RepoOutput>> {
        let branch = mode.require_story()?;
        let story = self.load_story(branch)?;
        let members = story.project_names();

        let pinned = self.rewrite_manifests(&story, |manifest| {
            manifest.set_commit_pins(&story.hashes, members.iter().map(String::as_str))
        })?;

        let mut outputs = Vec::new();
        for project in &pinned {
            let repo = Repo::Project(project);
            self.vcs.add(repo, &[PACKAGE_MANIFEST_FILE])?;
            outputs.push(RepoOutput::new(repo, "package.json updated"));
        }
        Ok(outputs)
    }

    /// Release every pin on the story: branch pins and commit pins on
    /// members both go back to bare trunk references. Commits everywhere.
    pub fn unpin(&self, mode: &Mode) -> StoryResult<Vec<RepoOutput>> {
        let branch = mode.require_story()?;
        let mut story = self.load_story(branch)?;
        let header = format!(
            "[story unpin] Unpinning package.json dependencies from '{}' [skip ci]",
            story.name
        );
        let members = story.project_names();

        let unpinned = self.rewrite_manifests(&story, |manifest| {
            let members_reverted = members
                .iter()
                .filter(|member| manifest.unpin_any(member))
                .count();
            members_reverted + manifest.unpin_suffix(&story.name)
        })?;

        let mut outputs = Vec::new();
        for project in &unpinned {
            let repo = Repo::Project(project);
            self.vcs.add(repo, &[PACKAGE_MANIFEST_FILE])?;
            outputs.push(RepoOutput::new(
                repo,
                self.vcs.commit(repo, std::slice::from_ref(&header))?,
            ));
        }

        story.refresh_hashes(self.vcs.as_ref())?;
        story.write(self.ws())?;

        let messages = self.summary_messages(&story, header);
        outputs.push(self.commit_metarepo(&messages, &[MANIFEST_FILE])?);
        Ok(outputs)
    }

    /// Commit staged work in every member, then the story manifest.
    pub fn commit(&self, mode: &Mode, message: &str) -> StoryResult<Vec<RepoOutput>> {
        let branch = mode.require_story()?;
        if message.is_empty() {
            return Err(StoryError::RequiresArgument);
        }
        let mut story = self.load_story(branch)?;
        let messages = vec![message.to_string()];

        let mut outputs = Vec::new();
        for project in story.project_names() {
            let repo = Repo::Project(&project);
            outputs.push(RepoOutput::new(repo, self.vcs.commit(repo, &messages)?));
        }

        story.refresh_hashes(self.vcs.as_ref())?;
        story.write(self.ws())?;

        let messages = self.summary_messages(&story, message.to_string());
        outputs.push(self.commit_metarepo(&messages, &[MANIFEST_FILE])?);
        Ok(outputs)
    }

    /// Push the story branch in every member and the metarepo.
    pub fn push(&self, mode: &Mode) -> StoryResult<Vec<RepoOutput>> {
        let branch = mode.require_story()?;
        let story = self.view_story(branch)?;
        let remote = &self.config.remote;

        let mut outputs = Vec::new();
        for project in story.project_names() {
            let repo = Repo::Project(&project);
            outputs.push(RepoOutput::new(repo, self.vcs.push(repo, remote, &story.name)?));
        }
        outputs.push(RepoOutput::new(
            Repo::Metarepo,
            self.vcs.push(Repo::Metarepo, remote, &story.name)?,
        ));
        Ok(outputs)
    }

    /// Bring trunk into the story branch of every member.
    pub fn update(&self, mode: &Mode) -> StoryResult<Vec<RepoOutput>> {
        let branch = mode.require_story()?;
        let story = self.load_story(branch)?;
        let trunk = &self.config.trunk;

        let mut outputs = Vec::new();
        for project in story.project_names() {
            let repo = Repo::Project(&project);
            outputs.push(RepoOutput::new(
                repo,
                self.vcs.fetch(repo, &self.config.remote, trunk)?,
            ));
            outputs.push(RepoOutput::new(repo, self.vcs.merge(repo, trunk, false)?));
        }
        Ok(outputs)
    }

    /// Archive the story and restore the registry ahead of merging.
    pub fn prepare(&self, mode: &Mode) -> StoryResult<Vec<RepoOutput>> {
        let branch = mode.require_story()?;
        let mut story = self.load_story(branch)?;
        story.refresh_hashes(self.vcs.as_ref())?;

        let archive = archive_path(&story.name);
        self.ws().create_dir_all(Path::new(ARCHIVE_DIR))?;
        story.write_to(self.ws(), &archive)?;
        story.to_registry().write(self.ws())?;

        let archive = archive.to_string_lossy().into_owned();
        let messages = vec![
            format!("[story prepare] Preparing '{}' for merge [skip ci]", story.name),
            story.commit_links(&self.config).join("\n"),
        ];
        let output = self.commit_metarepo(&messages, &[archive.as_str(), MANIFEST_FILE])?;

        info!(story = %story.name, archive = %archive, "story prepared");
        Ok(vec![output])
    }

    /// Squash-merge the story branch into trunk in every member, then the
    /// metarepo.
    pub fn merge(&self, mode: &Mode) -> StoryResult<Vec<RepoOutput>> {
        let branch = mode.require_story()?;
        let story = self.view_story(branch)?;
        let messages = vec![merge_header(&story.name)];
        let trunk = &self.config.trunk;

        let mut outputs = Vec::new();
        let projects = story.project_names();
        let repos = projects
            .iter()
            .map(|p| Repo::Project(p))
            .chain(std::iter::once(Repo::Metarepo));
        for repo in repos {
            outputs.push(RepoOutput::new(repo, self.vcs.checkout_branch(repo, trunk, false)?));
            outputs.push(RepoOutput::new(repo, self.vcs.merge(repo, &story.name, true)?));
            outputs.push(RepoOutput::new(repo, self.vcs.commit(repo, &messages)?));
        }

        info!(story = %story.name, "story merged");
        Ok(outputs)
    }

    /// Members of the story, sorted.
    pub fn list(&self, mode: &Mode) -> StoryResult<Vec<String>> {
        let branch = mode.require_story()?;
        Ok(self.view_story(branch)?.project_names())
    }

    /// Deployables that must be rebuilt, sorted.
    pub fn artifacts(&self, mode: &Mode) -> StoryResult<Vec<String>> {
        let branch = mode.require_story()?;
        Ok(self.view_story(branch)?.artifacts_to_build())
    }

    /// Every project in any blast radius, sorted and de-duplicated.
    pub fn blast_radius(&self, mode: &Mode) -> StoryResult<Vec<String>> {
        let branch = mode.require_story()?;
        Ok(self.view_story(branch)?.flattened_blast_radius())
    }

    // -----------------------------------------------------------------------
    // Code-hosting operations
    // -----------------------------------------------------------------------

    /// Open a pull request per member, titled with the story name and linked
    /// to `issue`.
    pub async fn open_pull_requests(
        &self,
        mode: &Mode,
        host: &dyn CodeHost,
        issue: &str,
    ) -> StoryResult<Vec<HostReport<PullRequestOutcome>>> {
        let branch = mode.require_story()?;
        if issue.is_empty() {
            return Err(StoryError::MissingIssue);
        }
        let story = self.view_story(branch)?;
        let trunk = &self.config.trunk;

        let mut reports = Vec::new();
        for (i, project) in story.project_names().into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.api_delay).await;
            }
            let request = NewPullRequest {
                title: story.name.clone(),
                head: story.name.clone(),
                base: trunk.clone(),
                body: issue.to_string(),
                maintainer_can_modify: true,
            };
            let outcome = match host
                .create_pull_request(&story.organisation, &project, &request)
                .await?
            {
                CreateOutcome::Created(pr) => PullRequestOutcome::Opened { url: pr.html_url },
                CreateOutcome::AlreadyExists => {
                    let pr = host
                        .list_pull_requests(
                            &story.organisation,
                            &project,
                            PullRequestState::Open,
                            trunk,
                        )
                        .await?
                        .into_iter()
                        .find(|pr| pr.title == story.name)
                        .ok_or_else(|| {
                            StoryError::Hosting(format!(
                                "a pull request already exists in {project} \
                                 but the url could not be retrieved"
                            ))
                        })?;
                    PullRequestOutcome::Existing { url: pr.html_url }
                }
                CreateOutcome::NoCommits => PullRequestOutcome::IdenticalToTrunk,
            };
            reports.push(HostReport {
                repo: project,
                outcome,
            });
        }
        Ok(reports)
    }

    /// Squash-merge the story's pull request in every member and the
    /// metarepo through the code host.
    pub async fn merge_via_host(
        &self,
        mode: &Mode,
        host: &dyn CodeHost,
    ) -> StoryResult<Vec<HostReport<HostMergeOutcome>>> {
        let branch = mode.require_story()?;
        let story = self.view_story(branch)?;
        let title = merge_header(&story.name);
        let trunk = &self.config.trunk;

        let metarepo = self.metarepo_name();
        let mut targets: Vec<(String, String)> = Vec::new();
        for project in story.project_names() {
            let sha = match story.hashes.get(&project) {
                Some(hash) => hash.clone(),
                None => self.vcs.head(Repo::Project(&project), &story.name)?,
            };
            targets.push((project, sha));
        }
        targets.push((metarepo, self.vcs.head(Repo::Metarepo, &story.name)?));

        let mut reports = Vec::new();
        for (i, (repo, sha)) in targets.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.api_delay).await;
            }
            let org = &story.organisation;
            let open = host
                .list_pull_requests(org, &repo, PullRequestState::Open, trunk)
                .await?
                .into_iter()
                .find(|pr| pr.title == story.name);

            let outcome = match open {
                Some(pr) => {
                    let status = host
                        .merge_pull_request(org, &repo, pr.number, &title, &sha)
                        .await?;
                    let url = pr.html_url;
                    match status {
                        MergeStatus::Merged => HostMergeOutcome::Merged { url },
                        MergeStatus::NotMergeable => HostMergeOutcome::NotMergeable { url },
                        MergeStatus::HeadModified => HostMergeOutcome::HeadModified { url },
                    }
                }
                None => host
                    .list_pull_requests(org, &repo, PullRequestState::Closed, trunk)
                    .await?
                    .into_iter()
                    .find(|pr| pr.title == story.name)
                    .map(|pr| HostMergeOutcome::AlreadyClosed { url: pr.html_url })
                    .unwrap_or(HostMergeOutcome::NotFound),
            };
            reports.push(HostReport { repo, outcome });
        }
        Ok(reports)
    }

    /// Name of the metarepo on the code host: its directory name.
    fn metarepo_name(&self) -> String {
        self.ws()
            .root()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| Repo::Metarepo.to_string())
    }
}

fn merge_header(story: &str) -> String {
    format!("[story merge] Merge branch '{story}'")
}

/// Reject stray positional arguments for commands that take none.
pub fn no_arguments(args: &[String]) -> StoryResult<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(StoryError::TakesNoArguments)
    }
}

/// Collapse `names` into a de-duplicated list, keeping first occurrence.
pub fn dedup_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}
