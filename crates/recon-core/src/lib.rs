//! RepoRecon core: configuration, provider routing, webhook verification, the GitHub
//! activity client and readiness diagnostics. The HTTP surface lives in the `recon-gateway` add-on.

pub mod config;
pub mod github;
pub mod providers;
pub mod readiness;
pub mod router;
pub mod signature;
pub mod webhook;

pub use config::{ConfigError, ConfigSnapshot, ConfigStore, ConfigUpdate, ConfigView, ProviderMode};
pub use github::{ActivityItem, ActivityKind, GitHubClient, GitHubError, RepoInfo, ACTIVITY_LIMIT};
pub use providers::{
    classify, FailureClassification, ModelClient, OllamaClient, OpenAiCompatClient, ProviderError,
    SYSTEM_PROMPT,
};
pub use readiness::{
    evaluate, sync_oauth_env, CheckStatus, ConvexCli, DiagnosticCheck, ExternalEnvLookup,
    ExternalEnvWriter, LookupError, OAuthSync, ReadinessReport, SyncError,
};
pub use router::{ChatReply, ProviderRouter, ProviderUsed};
pub use webhook::{WebhookError, WebhookProcessor};
