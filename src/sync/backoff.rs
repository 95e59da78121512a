use rand::Rng;
use std::time::Duration;

/// Exponential backoff: `min(base * 2^attempt, cap)` plus up to a quarter of
/// that as random jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
  base: Duration,
  cap: Duration,
}

impl Backoff {
  pub fn new(base: Duration, cap: Duration) -> Self {
    Self { base, cap }
  }

  /// Delay before retry number `attempt` (0-based), without jitter.
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    self.base.saturating_mul(factor).min(self.cap)
  }

  pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
    let delay = self.delay(attempt);
    let spread = (delay.as_millis() / 4) as u64;
    if spread == 0 {
      return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
  }
}
