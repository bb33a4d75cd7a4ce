//! The agent kernel: heartbeat executor and digest summarizer over HTTP.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use somnus_core::ChunkText;

use crate::config::KernelConfig;
use crate::retry::{Cancelled, pause};

/// Runs one reasoning turn of the agent.
pub trait HeartbeatExecutor {
    async fn run_heartbeat(&mut self, message: &str) -> Result<String>;
}

/// Folds one chunk of experience into the running learnings text.
pub trait DigestSummarizer {
    async fn summarize(&mut self, learnings: &str, chunk: &ChunkText) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    response: String,
}

#[derive(Serialize)]
struct SummarizeRequest<'a> {
    learnings: &'a str,
    chunk: &'a ChunkText,
}

#[derive(Deserialize)]
struct SummarizeResponse {
    learnings: String,
}

/// HTTP handle to the kernel.
///
/// The pooled client is built lazily and dropped after a connection-level
/// failure, so the next call reconnects from scratch instead of reusing a
/// pool that points at a dead process.
pub struct KernelClient {
    base: String,
    request_timeout: Duration,
    connect_timeout: Duration,
    http: Option<reqwest::Client>,
}

impl KernelClient {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            base: config.url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs.max(1)),
            http: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.http.is_some()
    }

    fn client(&mut self) -> Result<reqwest::Client> {
        if let Some(client) = &self.http {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .context("failed to build HTTP client")?;
        tracing::debug!("connected kernel client to {}", self.base);
        self.http = Some(client.clone());
        Ok(client)
    }

    fn invalidate_on(&mut self, e: &reqwest::Error) {
        let connection_level = e.is_connect() || e.is_timeout() || e.is_request();
        if connection_level && self.http.take().is_some() {
            tracing::warn!("kernel connection lost ({e}); will reconnect");
        }
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &mut self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let client = self.client()?;
        let url = format!("{}{path}", self.base);
        let response = match client.post(&url).json(body).send().await {
            Ok(r) => r,
            Err(e) => {
                self.invalidate_on(&e);
                return Err(anyhow!(e).context(format!("POST {url}")));
            }
        };
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("POST {url} returned {status}: {}", preview(&text, 200)));
        }
        match response.json::<Resp>().await {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                self.invalidate_on(&e);
                Err(anyhow!(e).context(format!("POST {url}: unreadable response")))
            }
        }
    }

    /// `GET /ping`; any 2xx counts as ready.
    pub async fn ping(&mut self) -> bool {
        let client = match self.client() {
            Ok(c) => c,
            Err(_) => return false,
        };
        match client.get(format!("{}/ping", self.base)).send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                self.invalidate_on(&e);
                false
            }
        }
    }
}

impl HeartbeatExecutor for KernelClient {
    async fn run_heartbeat(&mut self, message: &str) -> Result<String> {
        let reply: ChatResponse = self.post("/chat", &ChatRequest { message }).await?;
        Ok(reply.response)
    }
}

impl DigestSummarizer for KernelClient {
    async fn summarize(&mut self, learnings: &str, chunk: &ChunkText) -> Result<String> {
        let reply: SummarizeResponse = self
            .post("/summarize", &SummarizeRequest { learnings, chunk })
            .await?;
        Ok(reply.learnings)
    }
}

/// Poll `/ping` until the kernel answers.
pub async fn wait_for_kernel(
    client: &mut KernelClient,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), Cancelled> {
    tracing::info!("waiting for kernel at {}", client.base_url());
    let mut attempts = 0u64;
    while !client.ping().await {
        attempts += 1;
        if attempts % 30 == 0 {
            tracing::info!("kernel still unreachable after {attempts} pings");
        }
        pause(interval, cancel).await?;
    }
    tracing::info!("kernel ready");
    Ok(())
}

/// First `limit` characters, for log lines.
pub fn preview(text: &str, limit: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
