//! Read-only GitHub REST client: repository info and the recent-activity feed.
//!
//! Every request is bounded by `GITHUB_TIMEOUT_SEC`. The activity feed merges recent pull
//! requests, commits and issues; a failing source is logged and left out rather than
//! failing the whole feed.

use crate::config::ConfigSnapshot;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Items returned by the `/api/activity` feed.
pub const ACTIVITY_LIMIT: usize = 10;

const ACCEPT_V3: &str = "application/vnd.github.v3+json";
const PULLS_PER_PAGE: u8 = 5;
const COMMITS_PER_PAGE: u8 = 5;
const ISSUES_PER_PAGE: u8 = 3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GitHubError {
    #[error("GITHUB_REPO is not configured")]
    RepoNotConfigured,
    #[error("GitHub request timed out")]
    Timeout,
    #[error("GitHub unreachable: {0}")]
    Unreachable(String),
    #[error("GitHub returned HTTP {status}")]
    Status { status: u16, message: Option<String> },
    #[error("invalid GitHub response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GitHubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GitHubError::Timeout
        } else if err.is_decode() {
            GitHubError::InvalidResponse(err.to_string())
        } else {
            GitHubError::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Commit,
    PullRequest,
    Issue,
}

/// One entry of the activity feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub title: String,
    pub author: String,
    /// Relative age ("5m ago", "2d ago"); "recently" when GitHub sent no usable date.
    pub timestamp: String,
    #[serde(skip)]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub private: bool,
}

#[derive(Deserialize)]
struct Account {
    login: String,
}

#[derive(Deserialize)]
struct PullSummary {
    number: u64,
    title: String,
    #[serde(default)]
    user: Option<Account>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    merged_at: Option<String>,
}

#[derive(Deserialize)]
struct CommitSummary {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

#[derive(Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Deserialize)]
struct IssueSummary {
    number: u64,
    title: String,
    #[serde(default)]
    user: Option<Account>,
    #[serde(default)]
    updated_at: Option<String>,
    /// Present when the "issue" is really a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), GITHUB_API_BASE)
    }
}

impl GitHubClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Same client against another API root (GitHub Enterprise, a local stand-in).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::new(reqwest::Client::new(), base_url)
    }

    /// `GET /repos/{GITHUB_REPO}`.
    pub async fn repo_info(&self, config: &ConfigSnapshot) -> Result<RepoInfo, GitHubError> {
        let repo = repo_of(config)?;
        self.get_json(config, &format!("/repos/{}", repo)).await
    }

    /// Newest pull requests, commits and issues merged into one feed, newest first.
    pub async fn recent_activity(
        &self,
        config: &ConfigSnapshot,
        limit: usize,
    ) -> Result<Vec<ActivityItem>, GitHubError> {
        let repo = repo_of(config)?;
        let now = Utc::now();

        let pulls_path = format!(
            "/repos/{}/pulls?state=all&sort=updated&direction=desc&per_page={}",
            repo, PULLS_PER_PAGE
        );
        let commits_path = format!("/repos/{}/commits?per_page={}", repo, COMMITS_PER_PAGE);
        let issues_path = format!(
            "/repos/{}/issues?state=all&sort=updated&direction=desc&per_page={}",
            repo, ISSUES_PER_PAGE
        );
        let (pulls, commits, issues) = tokio::join!(
            self.get_json::<Vec<PullSummary>>(config, &pulls_path),
            self.get_json::<Vec<CommitSummary>>(config, &commits_path),
            self.get_json::<Vec<IssueSummary>>(config, &issues_path),
        );

        let mut items = Vec::new();
        if let Some(pulls) = keep("pull requests", pulls) {
            items.extend(pulls.iter().map(|pr| pull_item(pr, now)));
        }
        if let Some(commits) = keep("commits", commits) {
            items.extend(commits.iter().map(|c| commit_item(c, now)));
        }
        if let Some(issues) = keep("issues", issues) {
            items.extend(
                issues
                    .iter()
                    .filter(|i| i.pull_request.is_none())
                    .map(|i| issue_item(i, now)),
            );
        }

        // Undated items sort last.
        items.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        config: &ConfigSnapshot,
        path: &str,
    ) -> Result<T, GitHubError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, ACCEPT_V3)
            .header(USER_AGENT, concat!("repo-recon/", env!("CARGO_PKG_VERSION")))
            .timeout(config.github_timeout());
        let token = config.github_token.trim();
        if !token.is_empty() {
            request = request.header(AUTHORIZATION, format!("token {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string));
            return Err(GitHubError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

fn repo_of(config: &ConfigSnapshot) -> Result<&str, GitHubError> {
    let repo = config.github_repo.trim().trim_matches('/');
    if repo.is_empty() {
        Err(GitHubError::RepoNotConfigured)
    } else {
        Ok(repo)
    }
}

fn keep<T>(source: &str, result: Result<Vec<T>, GitHubError>) -> Option<Vec<T>> {
    match result {
        Ok(items) => Some(items),
        Err(e) => {
            tracing::warn!(target: "recon::github", source, error = %e, "skipping activity source");
            None
        }
    }
}

fn pull_item(pr: &PullSummary, now: DateTime<Utc>) -> ActivityItem {
    let verb = if pr.merged_at.is_some() { "Merged" } else { "Opened" };
    activity(
        format!("pr-{}", pr.number),
        ActivityKind::PullRequest,
        format!("{}: {}", verb, pr.title),
        login_of(&pr.user),
        pr.updated_at.as_deref(),
        now,
    )
}

fn commit_item(c: &CommitSummary, now: DateTime<Utc>) -> ActivityItem {
    let headline = c.commit.message.lines().next().unwrap_or_default();
    let author = c.commit.author.as_ref();
    activity(
        format!("commit-{}", c.sha.get(..7).unwrap_or(c.sha.as_str())),
        ActivityKind::Commit,
        format!("Commit: {}", headline),
        author
            .and_then(|a| a.name.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        author.and_then(|a| a.date.as_deref()),
        now,
    )
}

fn issue_item(issue: &IssueSummary, now: DateTime<Utc>) -> ActivityItem {
    activity(
        format!("issue-{}", issue.number),
        ActivityKind::Issue,
        format!("Issue: {}", issue.title),
        login_of(&issue.user),
        issue.updated_at.as_deref(),
        now,
    )
}

fn login_of(user: &Option<Account>) -> String {
    user.as_ref()
        .map(|u| u.login.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

fn activity(
    id: String,
    kind: ActivityKind,
    title: String,
    author: String,
    at: Option<&str>,
    now: DateTime<Utc>,
) -> ActivityItem {
    let occurred_at = at
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    let timestamp = match occurred_at {
        Some(t) => relative_time(t, now),
        None => "recently".to_string(),
    };
    ActivityItem {
        id,
        kind,
        title,
        author,
        timestamp,
        occurred_at,
    }
}

/// "just now", "12m ago", "3h ago", "4d ago", "2w ago". Future dates read as "just now".
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds();
    match secs {
        s if s < 60 => "just now".to_string(),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s if s < 604_800 => format!("{}d ago", s / 86_400),
        s => format!("{}w ago", s / 604_800),
    }
}
