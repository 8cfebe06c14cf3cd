use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};

/// Bounded exponential backoff for best-effort remote writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Random jitter (`0..=jitter_max_ms`) added to each sleep.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            jitter_max_ms: 100,
        }
    }
}

impl BackoffConfig {
    /// No waiting between attempts.
    pub const fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_max_ms: 0,
        }
    }
}

fn backoff_delay(cfg: &BackoffConfig, attempt: u32) -> Duration {
    let pow2 = 1_u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
    let ms = cfg.base_delay_ms.saturating_mul(pow2).min(cfg.max_delay_ms);
    let jitter = if cfg.jitter_max_ms == 0 {
        0
    } else {
        rand::random::<u64>() % cfg.jitter_max_ms.saturating_add(1)
    };
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Run `op` up to `cfg.attempts` times, sleeping with backoff between failures. The last
/// error is returned with `label` as context.
pub async fn retry_with_backoff<T, E, Fut>(
    cfg: &BackoffConfig,
    mut op: impl FnMut(u32) -> Fut + Send,
    label: &'static str,
) -> eyre::Result<T>
where
    E: std::fmt::Display,
    Fut: Future<Output = Result<T, E>> + Send,
{
    let attempts = cfg.attempts.max(1);
    let mut last_err = String::new();
    for attempt in 0..attempts {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                tracing::debug!(op = label, attempt, error = %e, "attempt failed");
                last_err = e.to_string();
            }
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(backoff_delay(cfg, attempt)).await;
        }
    }
    Err(eyre::eyre!("{last_err}").wrap_err(format!("{label}: gave up after {attempts} attempts")))
}
