//! ReadinessEvaluator: the ordered configuration checks behind `/api/config/diagnostics`.
//!
//! All seven checks run on every call; `ready` is false iff at least one is `error`.
//! The OAuth check may consult the deployment's environment through an
//! [`ExternalEnvLookup`]; a failed lookup counts as "keys absent" and never aborts
//! the evaluation.

use crate::config::{is_absolute_http_url, ConfigSnapshot, ProviderMode};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

pub const AUTH_GITHUB_ID: &str = "AUTH_GITHUB_ID";
pub const AUTH_GITHUB_SECRET: &str = "AUTH_GITHUB_SECRET";

const LIST_TIMEOUT: Duration = Duration::from_secs(20);
const SET_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticCheck {
    pub key: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl DiagnosticCheck {
    fn new(key: &'static str, passed: bool, failed_as: CheckStatus, ok_msg: &str, fail_msg: &str) -> Self {
        if passed {
            Self {
                key,
                status: CheckStatus::Ok,
                message: ok_msg.to_string(),
            }
        } else {
            Self {
                key,
                status: failed_as,
                message: fail_msg.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub checks: Vec<DiagnosticCheck>,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command timed out after {0:?}")]
    TimedOut(Duration),
    #[error("command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Lists the environment keys set on an external deployment.
#[async_trait::async_trait]
pub trait ExternalEnvLookup: Send + Sync {
    async fn list_keys(&self, deployment: &str) -> Result<HashSet<String>, LookupError>;
}

/// Writes one environment value on an external deployment.
#[async_trait::async_trait]
pub trait ExternalEnvWriter: Send + Sync {
    async fn set_value(&self, deployment: &str, key: &str, value: &str) -> Result<(), LookupError>;
}

/// Run every check against `snapshot`, in order.
pub async fn evaluate(snapshot: &ConfigSnapshot, lookup: &dyn ExternalEnvLookup) -> ReadinessReport {
    let mut checks = Vec::with_capacity(7);

    checks.push(DiagnosticCheck::new(
        "repo_identifier",
        is_set(&snapshot.github_repo),
        CheckStatus::Error,
        "GitHub repo configured.",
        "Set GITHUB_REPO (owner/repo).",
    ));
    checks.push(DiagnosticCheck::new(
        "source_control_token",
        is_set(&snapshot.github_token),
        CheckStatus::Warning,
        "GitHub token configured.",
        "Set GITHUB_TOKEN for backend GitHub API access.",
    ));
    checks.push(DiagnosticCheck::new(
        "ai_provider_ready",
        ai_provider_ready(snapshot),
        CheckStatus::Warning,
        "AI provider appears configured.",
        "Configure a local model host and/or LLM_API_KEY.",
    ));
    checks.push(DiagnosticCheck::new(
        "public_client_endpoint",
        is_absolute_http_url(&snapshot.next_public_convex_url),
        CheckStatus::Error,
        "NEXT_PUBLIC_CONVEX_URL configured.",
        "Set NEXT_PUBLIC_CONVEX_URL to an absolute URL for the frontend client.",
    ));
    checks.push(DiagnosticCheck::new(
        "site_origin_endpoint",
        is_absolute_http_url(&snapshot.convex_site_url),
        CheckStatus::Error,
        "CONVEX_SITE_URL configured.",
        "Set CONVEX_SITE_URL to an absolute URL for the OAuth routes.",
    ));
    checks.push(DiagnosticCheck::new(
        "redirect_target",
        is_absolute_http_url(&snapshot.site_url),
        CheckStatus::Error,
        "SITE_URL configured for OAuth redirect target.",
        "Set SITE_URL to your app origin (for local dev usually http://localhost:3000).",
    ));

    let local_oauth = is_set(&snapshot.auth_github_id) && is_set(&snapshot.auth_github_secret);
    let remote_oauth = if local_oauth {
        false
    } else {
        deployment_has_oauth(snapshot, lookup).await
    };
    checks.push(DiagnosticCheck::new(
        "oauth_credentials_ready",
        local_oauth || remote_oauth,
        CheckStatus::Error,
        "GitHub OAuth credentials configured.",
        "Set AUTH_GITHUB_ID and AUTH_GITHUB_SECRET for sign-in (locally or in the deployment env).",
    ));

    let ready = checks.iter().all(|c| c.status != CheckStatus::Error);
    tracing::debug!(
        target: "recon::readiness",
        ready,
        errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count(),
        "readiness evaluated"
    );
    ReadinessReport { ready, checks }
}

fn ai_provider_ready(snapshot: &ConfigSnapshot) -> bool {
    let has_local = is_set(&snapshot.ollama_host);
    let has_remote = snapshot.has_remote_credential();
    match snapshot.ai_provider {
        ProviderMode::Mock => true,
        ProviderMode::Local => has_local,
        ProviderMode::Remote => has_remote,
        ProviderMode::Auto => has_local || has_remote,
    }
}

async fn deployment_has_oauth(snapshot: &ConfigSnapshot, lookup: &dyn ExternalEnvLookup) -> bool {
    let deployment = snapshot.convex_deployment.trim();
    if deployment.is_empty() {
        return false;
    }
    match lookup.list_keys(deployment).await {
        Ok(keys) => keys.contains(AUTH_GITHUB_ID) && keys.contains(AUTH_GITHUB_SECRET),
        Err(e) => {
            tracing::warn!(
                target: "recon::readiness",
                deployment,
                error = %e,
                "deployment env lookup failed; treating OAuth keys as absent"
            );
            false
        }
    }
}

/// Result of pushing OAuth values to the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OAuthSync {
    pub synced: Vec<String>,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to sync {key} to Convex env. Ensure Convex CLI is logged in for this project.")]
pub struct SyncError {
    pub key: &'static str,
    #[source]
    pub source: LookupError,
}

/// Push AUTH_GITHUB_ID, AUTH_GITHUB_SECRET and SITE_URL (non-empty ones) to the deployment.
pub async fn sync_oauth_env(
    snapshot: &ConfigSnapshot,
    writer: &dyn ExternalEnvWriter,
) -> Result<OAuthSync, SyncError> {
    let deployment = snapshot.convex_deployment.trim();
    if deployment.is_empty() {
        return Ok(OAuthSync {
            synced: Vec::new(),
            message: "CONVEX_DEPLOYMENT is not set. Skipping Convex env sync.".to_string(),
        });
    }

    let pending: Vec<(&'static str, &str)> = [
        (AUTH_GITHUB_ID, snapshot.auth_github_id.trim()),
        (AUTH_GITHUB_SECRET, snapshot.auth_github_secret.trim()),
        ("SITE_URL", snapshot.site_url.trim()),
    ]
    .into_iter()
    .filter(|(_, v)| !v.is_empty())
    .collect();

    if pending.is_empty() {
        return Ok(OAuthSync {
            synced: Vec::new(),
            message: "No OAuth values to sync.".to_string(),
        });
    }

    let mut synced = Vec::with_capacity(pending.len());
    for (key, value) in pending {
        writer
            .set_value(deployment, key, value)
            .await
            .map_err(|source| SyncError { key, source })?;
        synced.push(key.to_string());
    }
    tracing::info!(target: "recon::readiness", deployment, keys = ?synced, "synced OAuth values");
    Ok(OAuthSync {
        synced,
        message: "Synced OAuth values to Convex deployment.".to_string(),
    })
}

/// Talks to the deployment through `npx convex env ...` run in the project root.
#[derive(Debug, Clone)]
pub struct ConvexCli {
    program: String,
    project_root: PathBuf,
}

impl ConvexCli {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self::with_program("npx", project_root)
    }

    pub fn with_program(program: impl Into<String>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            project_root: project_root.into(),
        }
    }

    async fn run(&self, deployment: &str, args: &[&str], limit: Duration) -> Result<String, LookupError> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .arg("convex")
            .args(args)
            .current_dir(&self.project_root)
            .env("CONVEX_DEPLOYMENT", deployment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(limit, command.output())
            .await
            .map_err(|_| LookupError::TimedOut(limit))?
            .map_err(|source| LookupError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(LookupError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl ExternalEnvLookup for ConvexCli {
    async fn list_keys(&self, deployment: &str) -> Result<HashSet<String>, LookupError> {
        let stdout = self.run(deployment, &["env", "list"], LIST_TIMEOUT).await?;
        Ok(parse_env_keys(&stdout))
    }
}

#[async_trait::async_trait]
impl ExternalEnvWriter for ConvexCli {
    async fn set_value(&self, deployment: &str, key: &str, value: &str) -> Result<(), LookupError> {
        self.run(deployment, &["env", "set", key, value], SET_TIMEOUT)
            .await
            .map(|_| ())
    }
}

/// Keys from `KEY=value` lines; other lines are ignored.
fn parse_env_keys(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, _)| key.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_set(value: &str) -> bool {
    !value.trim().is_empty()
}
