//! Portal Client adapter (§4.3): a thin `reqwest` wrapper implementing the
//! [`PortalClient`] port, generalized from the teacher's
//! `ClaudeClientImpl` (connection pooling, rate-limit-aware retry, typed
//! error classification).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::warn;

use crate::domain::errors::PortalError;
use crate::domain::models::{ActionRun, Entity, PortAppConfig};
use crate::domain::ports::{MigrationStatus, PortalClient, UserAgentLabel};
use crate::infrastructure::portal::token::TokenCache;
use crate::services::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PortalClientConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
}

pub struct ReqwestPortalClient {
    http: Client,
    config: PortalClientConfig,
    token: TokenCache,
    retry_policy: RetryPolicy,
}

impl ReqwestPortalClient {
    pub fn new(config: PortalClientConfig) -> Result<Self, PortalError> {
        let http = Client::builder().timeout(config.timeout).pool_max_idle_per_host(10).build()?;
        Ok(Self::with_client(http, config))
    }

    /// Builds on a `reqwest::Client` owned elsewhere (the process `Runtime`),
    /// rather than constructing its own connection pool.
    pub fn with_client(http: Client, config: PortalClientConfig) -> Self {
        Self { http, config, token: TokenCache::new(), retry_policy: RetryPolicy::default() }
    }

    async fn access_token(&self) -> Result<String, PortalError> {
        if let Some(token) = self.token.get().await {
            return Ok(token);
        }
        self.fetch_token().await
    }

    async fn fetch_token(&self) -> Result<String, PortalError> {
        let url = format!("{}/auth/access_token", self.config.base_url);
        let body = serde_json::json!({
            "clientId": self.config.client_id,
            "clientSecret": self.config.client_secret,
        });

        let response = self
            .retry_policy
            .execute(|| async {
                self.http.post(&url).json(&body).send().await.map_err(PortalError::from)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.text().await.unwrap_or_default()));
        }

        let payload: Value = response.json().await.map_err(PortalError::Transport)?;
        let token = payload
            .get("accessToken")
            .and_then(Value::as_str)
            .ok_or_else(|| PortalError::Auth("access_token response missing accessToken".to_string()))?
            .to_string();
        let expires_in = payload.get("expiresIn").and_then(Value::as_i64).unwrap_or(3600);
        let expires_at: DateTime<Utc> = Utc::now() + chrono::Duration::seconds(expires_in);
        self.token.set(token.clone(), expires_at).await;
        Ok(token)
    }

    /// Issues one request, retrying transient failures with backoff and
    /// refreshing the cached token exactly once on a `401`.
    async fn call(&self, label: Option<&UserAgentLabel>, build: impl Fn(&Client, &str) -> reqwest::RequestBuilder) -> Result<Value, PortalError> {
        let mut refreshed_once = false;
        let mut server_error_attempts = 0;
        loop {
            let token = self.access_token().await?;
            let attempt = self
                .retry_policy
                .execute(|| async {
                    let mut request = build(&self.http, &token);
                    if let Some(label) = label {
                        request = request.header("user-agent", label.header_value());
                    }
                    request.send().await.map_err(PortalError::from)
                })
                .await?;

            let status = attempt.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed_once {
                refreshed_once = true;
                self.token.invalidate().await;
                continue;
            }
            if status == StatusCode::UNAUTHORIZED {
                return Err(PortalError::Auth("token refresh did not resolve repeated 401".to_string()));
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = attempt.headers().get("retry-after").and_then(|v| v.to_str().ok()).and_then(|v| v.parse::<u64>().ok());
                if let Some(seconds) = retry_after {
                    warn!(seconds, "portal rate-limited, honoring Retry-After");
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                    continue;
                }
                return Err(PortalError::RateLimit { retry_after_secs: None });
            }
            if !status.is_success() {
                let error = classify_status(status, attempt.text().await.unwrap_or_default());
                if error.is_transient() && server_error_attempts < self.retry_policy.max_retries {
                    tokio::time::sleep(self.retry_policy.delay_for(server_error_attempts)).await;
                    server_error_attempts += 1;
                    continue;
                }
                return Err(error);
            }
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            return attempt.json().await.map_err(PortalError::Transport);
        }
    }
}

fn classify_status(status: StatusCode, body: String) -> PortalError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortalError::Auth(body),
        StatusCode::CONFLICT => PortalError::Conflict(body),
        StatusCode::NOT_FOUND => PortalError::NotFound(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => PortalError::BadRequest(body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => PortalError::Timeout,
        s if s.is_server_error() => PortalError::Server(body),
        _ => PortalError::Server(body),
    }
}

#[async_trait]
impl PortalClient for ReqwestPortalClient {
    async fn get_integration(&self, label: &UserAgentLabel) -> Result<Value, PortalError> {
        let url = format!("{}/integrations/{}", self.config.base_url, label.integration_identifier);
        self.call(Some(label), |client, token| client.get(&url).bearer_auth(token)).await
    }

    async fn update_integration_state(&self, label: &UserAgentLabel, state: &Value) -> Result<(), PortalError> {
        let url = format!("{}/integrations/{}/state", self.config.base_url, label.integration_identifier);
        let state = state.clone();
        self.call(Some(label), move |client, token| client.patch(&url).bearer_auth(token).json(&state)).await?;
        Ok(())
    }

    async fn get_app_config(&self, label: &UserAgentLabel) -> Result<PortAppConfig, PortalError> {
        let url = format!("{}/integrations/{}/config", self.config.base_url, label.integration_identifier);
        let value = self.call(Some(label), |client, token| client.get(&url).bearer_auth(token)).await?;
        serde_json::from_value(value).map_err(|err| PortalError::BadRequest(err.to_string()))
    }

    async fn search_entities(&self, query: &Value) -> Result<Vec<Entity>, PortalError> {
        let url = format!("{}/entities/search", self.config.base_url);
        let query = query.clone();
        let value = self.call(None, move |client, token| client.post(&url).bearer_auth(token).json(&query)).await?;
        let entities = value.get("entities").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(entities).map_err(|err| PortalError::BadRequest(err.to_string()))
    }

    async fn upsert_entities_bulk(&self, blueprint: &str, entities: &[Entity], label: &UserAgentLabel, merge: bool) -> Result<(), PortalError> {
        let url = format!("{}/blueprints/{}/entities/bulk?merge={}", self.config.base_url, blueprint, merge);
        let body = serde_json::json!({"entities": entities});
        self.call(Some(label), move |client, token| client.post(&url).bearer_auth(token).json(&body)).await?;
        Ok(())
    }

    async fn delete_entity(&self, blueprint: &str, identifier: &str, label: &UserAgentLabel, cascade: bool) -> Result<(), PortalError> {
        let url = format!("{}/blueprints/{}/entities/{}?cascade={}", self.config.base_url, blueprint, identifier, cascade);
        self.call(Some(label), |client, token| client.delete(&url).bearer_auth(token)).await?;
        Ok(())
    }

    async fn delete_all_entities_for_blueprint(&self, blueprint: &str, label: &UserAgentLabel) -> Result<String, PortalError> {
        let url = format!("{}/blueprints/{}/entities", self.config.base_url, blueprint);
        let value = self.call(Some(label), |client, token| client.delete(&url).bearer_auth(token)).await?;
        value
            .get("migrationId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PortalError::BadRequest("response missing migrationId".to_string()))
    }

    async fn get_migration(&self, id: &str) -> Result<MigrationStatus, PortalError> {
        let url = format!("{}/migrations/{}", self.config.base_url, id);
        let value = self.call(None, |client, token| client.get(&url).bearer_auth(token)).await?;
        Ok(MigrationStatus {
            id: id.to_string(),
            completed: value.get("completed").and_then(Value::as_bool).unwrap_or(false),
            failed: value.get("failed").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    async fn get_blueprint(&self, id: &str) -> Result<Value, PortalError> {
        let url = format!("{}/blueprints/{}", self.config.base_url, id);
        self.call(None, |client, token| client.get(&url).bearer_auth(token)).await
    }

    async fn patch_blueprint(&self, id: &str, patch: &Value) -> Result<(), PortalError> {
        let url = format!("{}/blueprints/{}", self.config.base_url, id);
        let patch = patch.clone();
        self.call(None, move |client, token| client.patch(&url).bearer_auth(token).json(&patch)).await?;
        Ok(())
    }

    async fn patch_run(&self, run_id: &uuid::Uuid, patch: &Value) -> Result<(), PortalError> {
        let url = format!("{}/actions/runs/{}", self.config.base_url, run_id);
        let patch = patch.clone();
        self.call(None, move |client, token| client.patch(&url).bearer_auth(token).json(&patch)).await?;
        Ok(())
    }

    async fn poll_action_runs(&self, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<ActionRun>, PortalError> {
        let mut url = format!("{}/actions/runs?limit={}", self.config.base_url, limit);
        if let Some(since) = since {
            url.push_str(&format!("&since={}", since.to_rfc3339()));
        }
        let value = self.call(None, |client, token| client.get(&url).bearer_auth(token)).await?;
        let runs = value.get("runs").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(runs).map_err(|err| PortalError::BadRequest(err.to_string()))
    }
}
