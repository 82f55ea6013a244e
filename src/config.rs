use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Everything a synchronisation run can be tuned with. Secrets are not part of it:
/// the bearer credential is handed to the client separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub canvas: CanvasConfig,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    pub sync: SyncOptions,
}

impl SyncConfig {
    pub fn trace_loaded(&self) {
        info!(
            base_url = %self.canvas.base_url,
            page_size = self.canvas.page_size,
            max_attempts = self.retry.max_attempts,
            match_key = ?self.sync.match_key,
            max_concurrency = self.sync.max_concurrency,
            sync_assignment_points = self.sync.sync_assignment_points,
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Root of the Canvas instance, e.g. `https://canvas.example.edu`.
    pub base_url: String,
    pub timeout_secs: u64,
    /// `per_page` sent on list requests.
    pub page_size: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            base_url: "https://canvas.instructure.com".to_string(),
            timeout_secs: 30,
            page_size: 50,
        }
    }
}

impl CanvasConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry behaviour for transient failures: exponential backoff with jitter,
/// overridden by a server-provided `Retry-After`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per request, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the computed delay added or removed at random (0.1 = ±10%).
    pub jitter: f64,
    pub retry_on: Vec<u16>,
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.1,
            retry_on: vec![429, 502, 503],
            respect_retry_after: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Pause before the next request once the remaining budget drops below this.
    pub throttle_below: f64,
    pub pause_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            throttle_below: 50.0,
            pause_ms: 1_000,
        }
    }
}

/// How local and remote criteria are paired up during reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKey {
    /// Exact, case-sensitive criterion name.
    #[default]
    Name,
    /// A local criterion's remote id when it carries one, its name otherwise.
    RemoteIdThenName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub match_key: MatchKey,
    /// Create/Update entries applied at once. 1 keeps the run strictly sequential.
    pub max_concurrency: usize,
    pub decode_html_entities: bool,
    /// Set the assignment's `points_possible` to the rubric total once every
    /// entry of the run has been applied. Requires `assignment_id`.
    pub sync_assignment_points: bool,
    #[serde(deserialize_with = "id_from_text_or_number")]
    pub assignment_id: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            match_key: MatchKey::Name,
            max_concurrency: 1,
            decode_html_entities: true,
            sync_assignment_points: false,
            assignment_id: None,
        }
    }
}

/// Canvas ids are written as `55` or `"55"` in config files.
fn id_from_text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }
    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(text) => text,
        Id::Number(n) => n.to_string(),
    }))
}
