//! Retry policy for chain reads.

use std::time::Duration;

/// Exponential backoff from `base_ms`, doubling per attempt, never above
/// `cap_ms` (or `base_ms` if the cap is lower).
pub fn bounded_exponential_backoff_ms(base_ms: u64, attempt: u32, cap_ms: u64) -> u64 {
  if base_ms == 0 {
    return 0;
  }
  let clamped = attempt.min(16);
  base_ms
    .saturating_mul(1u64 << clamped)
    .min(cap_ms.max(base_ms))
}

/// How often and how patiently a failed block fetch is retried before the
/// height is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_ms:     u64,
  pub cap_ms:      u64,
}

impl Default for RetryPolicy {
  fn default() -> Self { Self { max_retries: 5, base_ms: 250, cap_ms: 10_000 } }
}

impl RetryPolicy {
  /// Delay before retry number `attempt` (0-based).
  pub fn delay(&self, attempt: u32) -> Duration {
    Duration::from_millis(bounded_exponential_backoff_ms(self.base_ms, attempt, self.cap_ms))
  }
}
