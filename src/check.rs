/// `heartbeat-agent check`: probe a running agent's `/health` endpoint.
///
/// Meant for container HEALTHCHECK lines, so the result is reduced to a
/// process exit code: 0 when the agent reports alive, 1 otherwise.
use std::time::Duration;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub http_status: u16,
    pub status: String,
}

impl CheckResult {
    pub fn is_healthy(&self) -> bool {
        (200..300).contains(&self.http_status)
    }
}

/// GET `<base_url>/health` and return the reported status.
pub async fn probe(base_url: &str, timeout: Duration) -> Result<CheckResult, CheckError> {
    let url = format!("{}/health", base_url.trim_end_matches('/'));

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CheckError::Client { source: e })?;

    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| CheckError::Request {
            url: url.clone(),
            source: e,
        })?;

    let http_status = resp.status().as_u16();
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    let status = body
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(CheckResult {
        http_status,
        status,
    })
}

/// Run the probe and map it to an exit code.
pub async fn run(base_url: &str, timeout: Duration) -> i32 {
    match probe(base_url, timeout).await {
        Ok(result) => {
            println!("Healthcheck result: {}", result.status);
            if result.is_healthy() {
                0
            } else {
                tracing::debug!(http_status = result.http_status, "agent reported unhealthy");
                1
            }
        }
        Err(e) => {
            println!("Healthcheck error: {e}");
            1
        }
    }
}

/// Errors from probing the health endpoint.
#[derive(Debug)]
pub enum CheckError {
    Client { source: reqwest::Error },
    Request { url: String, source: reqwest::Error },
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckError::Client { source } => write!(f, "failed to build http client: {source}"),
            CheckError::Request { url, source } => write!(f, "request to {url} failed: {source}"),
        }
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckError::Client { source } => Some(source),
            CheckError::Request { source, .. } => Some(source),
        }
    }
}
