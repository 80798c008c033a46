//! Code-hosting collaborator: pull requests per project.
//!
//! [`GitHubClient`] talks to the GitHub REST API. Outcomes the lifecycle
//! treats as informational (a pull request already exists, the branch has
//! no commits over trunk, a pull request cannot be merged) are values, not
//! errors.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoryError, StoryResult};

pub const GITHUB_API: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("story/", env!("CARGO_PKG_VERSION"));

/// A pull request as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
}

/// Pull request to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
    pub maintainer_can_modify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(PullRequest),
    /// A pull request for this head already exists.
    AlreadyExists,
    /// The head branch has no commits over the base.
    NoCommits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestState {
    Open,
    Closed,
}

impl PullRequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullRequestState::Open => "open",
            PullRequestState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    Merged,
    NotMergeable,
    /// The head moved since the expected commit.
    HeadModified,
}

/// Pull request operations scoped by organisation and project.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn create_pull_request(
        &self,
        organisation: &str,
        project: &str,
        pull_request: &NewPullRequest,
    ) -> StoryResult<CreateOutcome>;

    async fn list_pull_requests(
        &self,
        organisation: &str,
        project: &str,
        state: PullRequestState,
        base: &str,
    ) -> StoryResult<Vec<PullRequest>>;

    /// Squash-merge pull request `number`, expecting its head to be `sha`.
    async fn merge_pull_request(
        &self,
        organisation: &str,
        project: &str,
        number: u64,
        commit_title: &str,
        sha: &str,
    ) -> StoryResult<MergeStatus>;
}

#[derive(Serialize)]
struct MergeRequest<'a> {
    commit_title: &'a str,
    merge_method: &'a str,
    sha: &'a str,
}

/// [`CodeHost`] over the GitHub REST API.
pub struct GitHubClient {
    http_client: reqwest::Client,
    api_base: String,
    token: String,
}

impl GitHubClient {
    pub fn new(token: &str) -> StoryResult<Self> {
        if token.is_empty() {
            return Err(StoryError::MissingToken);
        }
        let http_client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(GitHubClient {
            http_client,
            api_base: GITHUB_API.to_string(),
            token: token.to_string(),
        })
    }

    /// Point the client at another API root, e.g. GitHub Enterprise.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn pulls_url(&self, organisation: &str, project: &str) -> String {
        format!("{}/repos/{}/{}/pulls", self.api_base, organisation, project)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }
}

async fn unexpected(response: reqwest::Response) -> StoryError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StoryError::Hosting(format!("{status}: {body}"))
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn create_pull_request(
        &self,
        organisation: &str,
        project: &str,
        pull_request: &NewPullRequest,
    ) -> StoryResult<CreateOutcome> {
        let url = self.pulls_url(organisation, project);
        debug!(url = %url, head = %pull_request.head, "creating pull request");

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(pull_request)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(CreateOutcome::Created(response.json().await?)),
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().await?;
                if body.contains("A pull request already exists") {
                    Ok(CreateOutcome::AlreadyExists)
                } else if body.contains("No commits between") {
                    Ok(CreateOutcome::NoCommits)
                } else {
                    Err(StoryError::Hosting(format!(
                        "{}: {body}",
                        StatusCode::UNPROCESSABLE_ENTITY
                    )))
                }
            }
            _ => Err(unexpected(response).await),
        }
    }

    async fn list_pull_requests(
        &self,
        organisation: &str,
        project: &str,
        state: PullRequestState,
        base: &str,
    ) -> StoryResult<Vec<PullRequest>> {
        let response = self
            .request(reqwest::Method::GET, &self.pulls_url(organisation, project))
            .query(&[("state", state.as_str()), ("base", base)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(unexpected(response).await);
        }
        Ok(response.json().await?)
    }

    async fn merge_pull_request(
        &self,
        organisation: &str,
        project: &str,
        number: u64,
        commit_title: &str,
        sha: &str,
    ) -> StoryResult<MergeStatus> {
        let url = format!("{}/{}/merge", self.pulls_url(organisation, project), number);
        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(&MergeRequest {
                commit_title,
                merge_method: "squash",
                sha,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(MergeStatus::Merged),
            StatusCode::METHOD_NOT_ALLOWED => Ok(MergeStatus::NotMergeable),
            StatusCode::CONFLICT => Ok(MergeStatus::HeadModified),
            _ => Err(unexpected(response).await),
        }
    }
}
