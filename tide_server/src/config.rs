//! Host configuration: loaded from environment variables.

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// GitHub personal access token for status updates and PR comments.
    pub github_token: String,
    /// Dashboard base URL for GitHub status links.
    pub dashboard_url: String,
    /// Context name of the commit statuses.
    pub status_context: String,
    /// Running tides allowed per flow when the flow sets no limit. `0` disables the limit.
    pub max_concurrent_tides: usize,
    /// Port of the Prometheus scrape endpoint.
    pub metrics_port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let github_token = std::env::var("TIDE_GITHUB_TOKEN").unwrap_or_default();
        let dashboard_url = std::env::var("TIDE_DASHBOARD_URL")
            .unwrap_or_else(|_| "http://localhost:9090/tides".to_string());
        let status_context =
            std::env::var("TIDE_STATUS_CONTEXT").unwrap_or_else(|_| "tide".to_string());
        let max_concurrent_tides = std::env::var("TIDE_MAX_CONCURRENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);
        let metrics_port = std::env::var("TIDE_METRICS_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(9000);

        if github_token.is_empty() {
            tracing::warn!("TIDE_GITHUB_TOKEN not set -- GitHub status updates disabled");
        }

        Self {
            github_token,
            dashboard_url,
            status_context,
            max_concurrent_tides,
            metrics_port,
        }
    }

    pub fn default_concurrency_limit(&self) -> Option<usize> {
        match self.max_concurrent_tides {
            0 => None,
            limit => Some(limit),
        }
    }
}
