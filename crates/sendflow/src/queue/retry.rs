use chrono::{DateTime, Utc};
use rand::Rng;

/// Tick-initiated retry of failed items. Manual retries ignore this entirely.
#[derive(Debug, Clone)]
pub struct AutoRetry {
    /// Items whose retry_count reached this value are left for an operator.
    pub max_retries: i32,
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for AutoRetry {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_seconds: 60,
            max_seconds: 6 * 60 * 60,
            jitter_pct: 0.20,
        }
    }
}

impl AutoRetry {
    pub fn with_max_retries(max_retries: i32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// When a failed item becomes eligible for the tick again.
    /// `retry_count` is the value after the failure was recorded.
    pub fn next_attempt_at(
        &self,
        retry_count: i32,
        now: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> Option<DateTime<Utc>> {
        if retry_count >= self.max_retries {
            return None;
        }
        let delay = next_delay_seconds(retry_count, self, rng);
        Some(now + chrono::Duration::seconds(delay))
    }
}

pub fn next_delay_seconds(retry_count: i32, cfg: &AutoRetry, rng: &mut impl Rng) -> i64 {
    let retry_count = retry_count.max(1) as u32;

    let exp = retry_count.saturating_sub(1);

    // 2^exp; absurd exponents saturate and the cap below takes over
    let pow2 = 1_i64.checked_shl(exp).unwrap_or(i64::MAX);

    let mut delay = cfg.base_seconds.saturating_mul(pow2);

    if delay > cfg.max_seconds {
        delay = cfg.max_seconds;
    }

    let jitter_range = (delay as f64) * cfg.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay as f64 + jitter).round() as i64;
    jittered.clamp(0, cfg.max_seconds)
}
