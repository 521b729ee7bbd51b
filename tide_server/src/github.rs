//! GitHub integration: commit statuses and PR comments for tides.

use async_trait::async_trait;

use tide_core::ports::{CommentSink, StatusSink};
use tide_core::status::Status;
use tide_core::Tide;

const API_URL: &str = "https://api.github.com";

pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
    dashboard_url: String,
    context: String,
}

impl GitHubClient {
    pub fn new(token: String, dashboard_url: String, context: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            dashboard_url,
            context,
        }
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "tide-engine")
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error: {status} {text}");
        }

        Ok(())
    }
}

#[async_trait]
impl StatusSink for GitHubClient {
    async fn update(&self, tide: &Tide, status: &Status) -> anyhow::Result<()> {
        if self.token.is_empty() {
            tracing::debug!("GitHub token not set, skipping status update");
            return Ok(());
        }

        let reference = tide.code_reference();
        let url = format!(
            "{API_URL}/repos/{}/statuses/{}",
            reference.repository.full_name, reference.sha
        );
        let body = serde_json::json!({
            "state": status.state.as_str(),
            "description": status.description,
            "target_url": format!("{}/{}", self.dashboard_url.trim_end_matches('/'), tide.uuid()),
            "context": self.context,
        });

        self.post(&url, &body).await?;
        tracing::debug!(
            tide_uuid = %tide.uuid(),
            state = status.state.as_str(),
            "GitHub status updated"
        );
        Ok(())
    }
}

#[async_trait]
impl CommentSink for GitHubClient {
    async fn comment(&self, tide: &Tide, pull_request: u64, body: &str) -> anyhow::Result<()> {
        if self.token.is_empty() {
            return Ok(());
        }

        let url = format!(
            "{API_URL}/repos/{}/issues/{pull_request}/comments",
            tide.code_reference().repository.full_name
        );
        self.post(&url, &serde_json::json!({ "body": body })).await
    }
}
