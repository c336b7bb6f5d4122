//! Ollama control API client
//!
//! Only the two endpoints the bootstrap needs: `/api/version` for
//! readiness and `/api/pull` for provisioning.

use std::time::Duration;

use futures_util::stream::StreamExt;
use serde::Deserialize;

/// Error type for control API calls
#[derive(Debug)]
pub enum OllamaError {
    /// Transport-level failure (connection refused, timeout, ...)
    Request(reqwest::Error),
    /// Non-2xx HTTP status
    Status { status: u16, body: String },
    /// Malformed response body
    Parse(serde_json::Error),
    /// Registry or daemon reported an error inside the pull stream
    Registry(String),
    /// Pull stream ended without a success status
    Incomplete,
}

impl std::fmt::Display for OllamaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OllamaError::Request(e) => write!(f, "Request error: {}", e),
            OllamaError::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            OllamaError::Parse(e) => write!(f, "Parse error: {}", e),
            OllamaError::Registry(msg) => write!(f, "Registry error: {}", msg),
            OllamaError::Incomplete => write!(f, "Pull stream ended without success"),
        }
    }
}

impl std::error::Error for OllamaError {}

impl From<reqwest::Error> for OllamaError {
    fn from(e: reqwest::Error) -> Self {
        OllamaError::Request(e)
    }
}

impl From<serde_json::Error> for OllamaError {
    fn from(e: serde_json::Error) -> Self {
        OllamaError::Parse(e)
    }
}

/// One line of the `/api/pull` NDJSON progress stream
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    pub digest: Option<String>,
    pub total: Option<u64>,
    pub completed: Option<u64>,
    pub error: Option<String>,
}

impl PullProgress {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Completion percentage for layer downloads
    pub fn percent(&self) -> Option<u64> {
        match (self.completed, self.total) {
            (Some(done), Some(total)) if total > 0 => Some(done.min(total) * 100 / total),
            _ => None,
        }
    }
}

/// Summary of a finished pull
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullSummary {
    /// Last layer digest seen in the stream, if any
    pub digest: Option<String>,
    /// Number of progress lines received
    pub updates: usize,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

/// Splits a byte stream into complete newline-terminated lines
///
/// HTTP chunk boundaries do not line up with NDJSON records, so partial
/// lines are carried over to the next chunk.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk and get back every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    /// Whatever is left once the stream ended
    pub fn finish(&mut self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Client for interacting with Ollama's HTTP API
#[derive(Clone, Debug)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query the daemon version; any 2xx answer means the API is up
    pub async fn version(&self, timeout: Duration) -> Result<String, OllamaError> {
        let endpoint = format!("{}/api/version", self.base_url);
        let response = self.client.get(&endpoint).timeout(timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OllamaError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: VersionResponse = response.json().await?;
        Ok(body.version)
    }

    /// Pull a model, streaming progress into `on_progress`
    ///
    /// Blocks until the daemon reports `success` or an error. No timeout:
    /// large models can take arbitrarily long.
    pub async fn pull<F>(&self, model: &str, mut on_progress: F) -> Result<PullSummary, OllamaError>
    where
        F: FnMut(&PullProgress),
    {
        let endpoint = format!("{}/api/pull", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&serde_json::json!({
                "model": model,
                "stream": true
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OllamaError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let mut bytes_stream = response.bytes_stream();
        let mut buffer = LineBuffer::default();
        let mut summary = PullSummary::default();
        let mut succeeded = false;

        let mut handle_line = |line: &str, summary: &mut PullSummary| -> Result<bool, OllamaError> {
            let progress: PullProgress = serde_json::from_str(line)?;
            summary.updates += 1;
            if let Some(error) = progress.error.as_ref() {
                return Err(OllamaError::Registry(error.clone()));
            }
            if progress.digest.is_some() {
                summary.digest = progress.digest.clone();
            }
            on_progress(&progress);
            Ok(progress.is_success())
        };

        while let Some(chunk) = bytes_stream.next().await {
            let chunk = chunk?;
            for line in buffer.push(&chunk) {
                succeeded |= handle_line(&line, &mut summary)?;
            }
        }
        if let Some(line) = buffer.finish() {
            succeeded |= handle_line(&line, &mut summary)?;
        }

        if succeeded {
            Ok(summary)
        } else {
            Err(OllamaError::Incomplete)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_reassembles_split_records() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"status\":\"pulling ").is_empty());
        let lines = buffer.push(b"manifest\"}\n{\"status\":\"success\"}\n{\"sta");
        assert_eq!(
            lines,
            vec![
                "{\"status\":\"pulling manifest\"}".to_string(),
                "{\"status\":\"success\"}".to_string()
            ]
        );
        assert_eq!(buffer.finish(), Some("{\"sta".to_string()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_pull_progress_parsing() {
        let line = r#"{"status":"pulling 6a0746a1ec1a","digest":"sha256:6a0746a1ec1a","total":2019377376,"completed":1009688688}"#;
        let progress: PullProgress = serde_json::from_str(line).unwrap();

        assert_eq!(progress.digest.as_deref(), Some("sha256:6a0746a1ec1a"));
        assert_eq!(progress.percent(), Some(50));
        assert!(!progress.is_success());
    }

    #[test]
    fn test_pull_progress_error_line() {
        let progress: PullProgress =
            serde_json::from_str(r#"{"error":"pull model manifest: file does not exist"}"#).unwrap();

        assert_eq!(progress.status, "");
        assert_eq!(progress.error.as_deref(), Some("pull model manifest: file does not exist"));
        assert_eq!(progress.percent(), None);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/");
        assert_eq!(client.base_url(), "http://localhost:11434");
    }
}
