//! RepoRecon gateway: HTTP surface over `recon-core`.
//!
//! Routes: `/`, `/health`, `/api/activity`, `/api/terminal`, `/webhooks/github`, and the local-only
//! `/api/config`, `/api/config/sync-convex-auth`, `/api/config/diagnostics`.
//! Bind address comes from `RECON_BIND` (default `0.0.0.0:8000`).

mod error;
mod handlers;

use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use recon_core::{
    ConfigSnapshot, ConfigStore, ConvexCli, ExternalEnvLookup, ExternalEnvWriter, GitHubClient,
    OllamaClient, OpenAiCompatClient, ProviderRouter, WebhookProcessor,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND: &str = "0.0.0.0:8000";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub router: Arc<ProviderRouter>,
    pub github: Arc<GitHubClient>,
    pub env_lookup: Arc<dyn ExternalEnvLookup>,
    pub env_writer: Arc<dyn ExternalEnvWriter>,
    pub webhooks: Arc<WebhookProcessor>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let snapshot = match ConfigSnapshot::load() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(target: "recon::gateway", "configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if snapshot.github_webhook_secret.is_empty() {
        tracing::warn!(
            target: "recon::gateway",
            "GITHUB_WEBHOOK_SECRET is empty: webhook signatures are NOT verified"
        );
    }
    if !snapshot.has_remote_credential() {
        tracing::info!(target: "recon::gateway", "LLM_API_KEY not set; remote provider disabled");
    }

    let project_root = std::env::var("RECON_PROJECT_ROOT")
        .map(std::path::PathBuf::from)
        .or_else(|_| std::env::current_dir())
        .unwrap_or_else(|_| std::path::PathBuf::from("."));
    let convex = Arc::new(ConvexCli::new(project_root));

    tracing::info!(
        target: "recon::gateway",
        repo = %snapshot.github_repo,
        ai_provider = %snapshot.ai_provider,
        "configuration loaded"
    );

    let state = AppState {
        config: Arc::new(ConfigStore::new(snapshot)),
        router: Arc::new(ProviderRouter::new(
            Arc::new(OllamaClient::default()),
            Arc::new(OpenAiCompatClient::default()),
        )),
        github: Arc::new(GitHubClient::default()),
        env_lookup: convex.clone(),
        env_writer: convex,
        webhooks: Arc::new(WebhookProcessor::new()),
    };
    let app = build_app(state);

    let bind = std::env::var("RECON_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let addr: SocketAddr = match bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(target: "recon::gateway", bind = %bind, "invalid RECON_BIND: {}", e);
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(target: "recon::gateway", %addr, "failed to bind: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(target: "recon::gateway", "RepoRecon backend listening on {}", addr);

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(target: "recon::gateway", "shutdown requested");
    });
    if let Err(e) = server.await {
        tracing::error!(target: "recon::gateway", "server error: {}", e);
    }
}

fn build_app(state: AppState) -> Router {
    // Origins are fixed at startup; ALLOWED_ORIGINS changes need a restart.
    let origins: Vec<HeaderValue> = state
        .config
        .snapshot()
        .allowed_origins()
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-github-event"),
            HeaderName::from_static("x-hub-signature-256"),
        ])
        .allow_credentials(true);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/activity", get(handlers::activity::recent_activity))
        .route("/api/terminal", post(handlers::terminal::handle_terminal))
        .route("/webhooks/github", post(handlers::webhook::handle_github_webhook))
        .route(
            "/api/config",
            get(handlers::config::get_config).post(handlers::config::update_config),
        )
        .route(
            "/api/config/sync-convex-auth",
            post(handlers::config::sync_convex_auth),
        )
        .route("/api/config/diagnostics", get(handlers::config::diagnostics))
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "RepoRecon Backend",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let config = state.config.snapshot();
    let github_connected = match state.github.repo_info(&config).await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(target: "recon::gateway", error = %e, "GitHub repository not reachable");
            false
        }
    };
    Json(json!({
        "status": "healthy",
        "github_connected": github_connected,
        "repo": config.github_repo,
        "ai_provider_default": config.ai_provider,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use recon_core::signature;
    use recon_core::{LookupError, ModelClient, ProviderError};
    use std::collections::HashSet;
    use tower::ServiceExt;

    struct FixedClient(Result<String, ProviderError>);

    #[async_trait::async_trait]
    impl ModelClient for FixedClient {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn chat(
            &self,
            _config: &ConfigSnapshot,
            _system_prompt: &str,
            _user_message: &str,
        ) -> Result<String, ProviderError> {
            self.0.clone()
        }
    }

    struct FakeDeployment {
        keys: Vec<&'static str>,
        writable: bool,
    }

    #[async_trait::async_trait]
    impl ExternalEnvLookup for FakeDeployment {
        async fn list_keys(&self, _deployment: &str) -> Result<HashSet<String>, LookupError> {
            Ok(self.keys.iter().map(|k| k.to_string()).collect())
        }
    }

    #[async_trait::async_trait]
    impl ExternalEnvWriter for FakeDeployment {
        async fn set_value(&self, _deployment: &str, _key: &str, _value: &str) -> Result<(), LookupError> {
            if self.writable {
                Ok(())
            } else {
                Err(LookupError::Failed {
                    status: "exit status: 1".to_string(),
                    stderr: "not logged in".to_string(),
                })
            }
        }
    }

    // Nothing listens on port 1; GitHub calls fail fast with a refused connection.
    const NO_GITHUB: &str = "http://127.0.0.1:1";

    fn unreachable() -> Result<String, ProviderError> {
        Err(ProviderError::Unreachable("connection refused".to_string()))
    }

    fn test_state(
        snapshot: ConfigSnapshot,
        local: Result<String, ProviderError>,
        remote: Result<String, ProviderError>,
    ) -> AppState {
        let deployment = Arc::new(FakeDeployment {
            keys: vec!["AUTH_GITHUB_ID", "AUTH_GITHUB_SECRET"],
            writable: false,
        });
        AppState {
            config: Arc::new(ConfigStore::new(snapshot)),
            router: Arc::new(ProviderRouter::new(
                Arc::new(FixedClient(local)),
                Arc::new(FixedClient(remote)),
            )),
            github: Arc::new(GitHubClient::with_base_url(NO_GITHUB)),
            env_lookup: deployment.clone(),
            env_writer: deployment,
            webhooks: Arc::new(WebhookProcessor::new()),
        }
    }

    fn app_from(state: AppState, peer: [u8; 4]) -> Router {
        build_app(state).layer(MockConnectInfo(SocketAddr::from((peer, 40123))))
    }

    fn app(snapshot: ConfigSnapshot) -> Router {
        app_from(test_state(snapshot, unreachable(), unreachable()), [127, 0, 0, 1])
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(res: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_and_health() {
        let snapshot = ConfigSnapshot {
            github_repo: "acme/widgets".to_string(),
            ..Default::default()
        };
        let app = app(snapshot);
        let res = app.clone().oneshot(get_req("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["message"], "RepoRecon Backend");

        let res = app.oneshot(get_req("/health")).await.unwrap();
        let json = json_body(res).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["github_connected"], false);
        assert_eq!(json["repo"], "acme/widgets");
        assert_eq!(json["ai_provider_default"], "auto");
    }

    async fn fake_repo() -> Json<Value> {
        Json(json!({ "full_name": "acme/widgets" }))
    }

    async fn fake_pulls() -> Json<Value> {
        Json(json!([{ "number": 3, "title": "Tidy", "user": { "login": "octocat" },
                      "updated_at": "2024-01-01T00:00:00Z", "merged_at": null }]))
    }

    async fn fake_empty() -> Json<Value> {
        Json(json!([]))
    }

    async fn fake_github() -> String {
        let app = Router::new()
            .route("/repos/acme/widgets", get(fake_repo))
            .route("/repos/acme/widgets/pulls", get(fake_pulls))
            .route("/repos/acme/widgets/commits", get(fake_empty))
            .route("/repos/acme/widgets/issues", get(fake_empty));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn with_github(base: String) -> Router {
        let snapshot = ConfigSnapshot {
            github_repo: "acme/widgets".to_string(),
            ..Default::default()
        };
        let mut state = test_state(snapshot, unreachable(), unreachable());
        state.github = Arc::new(GitHubClient::with_base_url(base));
        app_from(state, [10, 0, 0, 7])
    }

    #[tokio::test]
    async fn health_reports_reachable_repo() {
        let app = with_github(fake_github().await);
        let res = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(json_body(res).await["github_connected"], true);
    }

    #[tokio::test]
    async fn activity_lists_recent_items() {
        let app = with_github(fake_github().await);
        let res = app.oneshot(get_req("/api/activity")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["id"], "pr-3");
        assert_eq!(json[0]["type"], "pull_request");
        assert_eq!(json[0]["title"], "Opened: Tidy");
        assert_eq!(json[0]["author"], "octocat");
        assert!(json[0]["timestamp"].as_str().unwrap().ends_with("w ago"));
    }

    #[tokio::test]
    async fn activity_without_repo_is_500() {
        let res = app(ConfigSnapshot::default())
            .oneshot(get_req("/api/activity"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(res).await["detail"],
            "Failed to fetch activity: GITHUB_REPO is not configured"
        );
    }

    #[tokio::test]
    async fn terminal_rejects_empty_and_oversized_messages() {
        let app = app(ConfigSnapshot::default());
        let res = app
            .clone()
            .oneshot(post_json("/api/terminal", json!({ "message": "   \n" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["detail"], "Empty message");

        let res = app
            .oneshot(post_json("/api/terminal", json!({ "message": "a".repeat(4001) })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn terminal_length_is_measured_after_trimming() {
        let padded = format!("{}{}{}", " ".repeat(200), "s".repeat(3990), "\n".repeat(50));
        let res = app(ConfigSnapshot::default())
            .oneshot(post_json("/api/terminal", json!({ "message": padded, "provider": "mock" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["provider_used"], "mock");
    }

    #[tokio::test]
    async fn terminal_mock_status_prompt() {
        let res = app(ConfigSnapshot::default())
            .oneshot(post_json("/api/terminal", json!({ "message": "status?", "provider": "mock" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["provider_used"], "mock");
        assert!(json["response"].as_str().unwrap().contains("System Status"));
        assert_eq!(json["timestamp"].as_str().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn terminal_auto_without_providers_falls_back() {
        let res = app(ConfigSnapshot::default())
            .oneshot(post_json("/api/terminal", json!({ "message": "summarise the repo" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["provider_used"], "fallback");
        assert!(json["response"].as_str().unwrap().contains("LLM_API_KEY missing"));
    }

    #[tokio::test]
    async fn terminal_explicit_remote_quota_is_502() {
        let snapshot = ConfigSnapshot {
            llm_api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let quota = Err(ProviderError::Status {
            status: 429,
            code: Some("insufficient_quota".to_string()),
            message: None,
        });
        let app = app_from(test_state(snapshot, Ok("local".to_string()), quota), [127, 0, 0, 1]);
        let res = app
            .oneshot(post_json("/api/terminal", json!({ "message": "hi", "provider": "remote" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            json_body(res).await["detail"],
            "Model API quota exceeded (429 insufficient_quota). Check billing/quota for LLM_API_KEY."
        );
    }

    #[tokio::test]
    async fn terminal_explicit_local_timeout_is_504() {
        let app = app_from(
            test_state(ConfigSnapshot::default(), Err(ProviderError::Timeout), Ok("remote".to_string())),
            [127, 0, 0, 1],
        );
        let res = app
            .oneshot(post_json("/api/terminal", json!({ "message": "hi", "provider": "ollama" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json_body(res).await["detail"], "Model provider timed out");
    }

    fn webhook_req(body: &[u8], signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("X-GitHub-Event", "push");
        if let Some(sig) = signature {
            builder = builder.header("X-Hub-Signature-256", sig);
        }
        builder.body(Body::from(body.to_vec())).unwrap()
    }

    fn with_secret() -> ConfigSnapshot {
        ConfigSnapshot {
            github_webhook_secret: "shh".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn webhook_signature_is_enforced() {
        let body = br#"{"ref":"refs/heads/main","commits":[{}]}"#;
        let app = app(with_secret());

        let res = app.clone().oneshot(webhook_req(body, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["detail"], "Invalid webhook signature");

        let sig = signature::sign("shh", body);
        let res = app.oneshot(webhook_req(body, Some(&sig))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["status"], "received");
        assert_eq!(json["event"]["type"], "push");
        assert_eq!(json["event"]["commits"], 1);
    }

    #[tokio::test]
    async fn webhook_malformed_json_is_400() {
        let body = b"{not json";
        let sig = signature::sign("shh", body);
        let res = app(with_secret())
            .oneshot(webhook_req(body, Some(&sig)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_without_secret_accepts_unsigned() {
        let res = app(ConfigSnapshot::default())
            .oneshot(webhook_req(br#"{"type":"ping"}"#, None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_routes_are_local_only() {
        let app = app_from(
            test_state(ConfigSnapshot::default(), unreachable(), unreachable()),
            [10, 0, 0, 7],
        );
        for req in [
            get_req("/api/config"),
            get_req("/api/config/diagnostics"),
            post_json("/api/config", json!({})),
            post_json("/api/config/sync-convex-auth", json!({})),
        ] {
            let res = app.clone().oneshot(req).await.unwrap();
            assert_eq!(res.status(), StatusCode::FORBIDDEN);
            assert_eq!(
                json_body(res).await["detail"],
                "Config updates are allowed from localhost only"
            );
        }
    }

    #[test]
    fn ipv4_mapped_loopback_counts_as_local() {
        let mapped: SocketAddr = "[::ffff:127.0.0.1]:9000".parse().unwrap();
        assert!(handlers::ensure_local(&mapped).is_ok());
        let v6: SocketAddr = "[::1]:9000".parse().unwrap();
        assert!(handlers::ensure_local(&v6).is_ok());
        let remote: SocketAddr = "[2001:db8::1]:9000".parse().unwrap();
        assert!(handlers::ensure_local(&remote).is_err());
    }

    #[tokio::test]
    async fn config_update_validates_and_swaps() {
        let state = test_state(ConfigSnapshot::default(), unreachable(), unreachable());
        let store = state.config.clone();
        let app = app_from(state, [127, 0, 0, 1]);

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/config",
                json!({ "github_repo": "acme/widgets", "site_url": "/relative" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(res).await["detail"],
            "SITE_URL must be an absolute http(s) URL"
        );
        assert_eq!(store.snapshot().github_repo, "");

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/config",
                json!({ "github_repo": "acme/widgets", "llm_api_key": "sk-new", "llm_api_timeout_sec": 500 }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["github_repo"], "acme/widgets");
        assert_eq!(json["llm_api_key_configured"], true);
        assert_eq!(json["llm_api_timeout_sec"], 120.0);
        assert!(!json.to_string().contains("sk-new"));

        let res = app.oneshot(get_req("/api/config")).await.unwrap();
        assert_eq!(json_body(res).await["github_repo"], "acme/widgets");
    }

    #[tokio::test]
    async fn diagnostics_reports_readiness() {
        let snapshot = ConfigSnapshot {
            github_repo: "acme/widgets".to_string(),
            github_token: "ghp".to_string(),
            next_public_convex_url: "https://demo.convex.cloud".to_string(),
            convex_site_url: "https://demo.convex.site".to_string(),
            convex_deployment: "dev:demo".to_string(),
            ..Default::default()
        };
        let res = app(snapshot).oneshot(get_req("/api/config/diagnostics")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["ready"], true);
        assert_eq!(json["checks"].as_array().unwrap().len(), 7);
        assert_eq!(json["checks"][6]["key"], "oauth_credentials_ready");
        assert_eq!(json["checks"][6]["status"], "ok");
    }

    #[tokio::test]
    async fn sync_failure_is_500_naming_the_key() {
        let snapshot = ConfigSnapshot {
            convex_deployment: "dev:demo".to_string(),
            auth_github_id: "Iv1.abc".to_string(),
            ..Default::default()
        };
        let res = app(snapshot)
            .oneshot(post_json("/api/config/sync-convex-auth", json!({})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(res).await["detail"]
            .as_str()
            .unwrap()
            .contains("Failed to sync AUTH_GITHUB_ID"));
    }

    #[tokio::test]
    async fn sync_without_deployment_is_skipped() {
        let res = app(ConfigSnapshot::default())
            .oneshot(post_json("/api/config/sync-convex-auth", json!({})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = json_body(res).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["updated_keys"], json!([]));
        assert!(json.get("synced").is_none());
        assert!(json["message"].as_str().unwrap().contains("Skipping"));
    }
}
