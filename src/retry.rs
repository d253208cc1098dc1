//! Bounded retry with a pluggable backoff delay.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Remaining number of automatic re-attempts after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
  remaining: u32,
}

impl RetryBudget {
  pub fn new(retries: u32) -> Self {
    Self { remaining: retries }
  }

  pub fn remaining(&self) -> u32 {
    self.remaining
  }

  pub fn is_exhausted(&self) -> bool {
    self.remaining == 0
  }

  /// Spend one retry. Returns `false` once the budget is exhausted.
  pub fn try_consume(&mut self) -> bool {
    if self.remaining == 0 {
      return false;
    }
    self.remaining -= 1;
    true
  }
}

/// Delay awaited before each retry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Backoff {
  /// Re-attempt immediately
  #[default]
  None,
  Fixed(Duration),
  /// `initial * multiplier^n` for the n-th retry (0-based), capped at `max`
  Exponential {
    initial: Duration,
    max: Duration,
    multiplier: f64,
  },
}

impl Backoff {
  /// Delay before the retry with 0-based index `retry`.
  pub fn delay(&self, retry: u32) -> Duration {
    match *self {
      Backoff::None => Duration::ZERO,
      Backoff::Fixed(delay) => delay,
      Backoff::Exponential {
        initial,
        max,
        multiplier,
      } => {
        let delay_ms = initial.as_millis() as f64 * multiplier.powi(retry as i32);
        if !delay_ms.is_finite() || delay_ms >= max.as_millis() as f64 {
          return max;
        }
        Duration::from_millis(delay_ms as u64)
      }
    }
  }
}

/// Run `attempt` until it succeeds or the budget runs out.
///
/// `before_retry` is called with the failure and the 1-based retry number
/// before each re-attempt; returning `ControlFlow::Break` gives up early and
/// yields that failure. The loop makes at most `budget + 1` attempts.
pub async fn run_with_retry<T, A, Fut, R>(
  mut budget: RetryBudget,
  backoff: Backoff,
  mut attempt: A,
  mut before_retry: R,
) -> Result<T, FetchError>
where
  A: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T, FetchError>>,
  R: FnMut(&FetchError, u32) -> ControlFlow<()>,
{
  let mut retries = 0u32;

  loop {
    let error = match attempt(retries).await {
      Ok(value) => {
        if retries > 0 {
          debug!("request succeeded after {} retries", retries);
        }
        return Ok(value);
      }
      Err(error) => error,
    };

    if !budget.try_consume() {
      return Err(error);
    }
    retries += 1;

    if before_retry(&error, retries).is_break() {
      return Err(error);
    }

    let delay = backoff.delay(retries - 1);
    warn!(
      "request failed (retry {}, {} left), retrying in {:?}: {}",
      retries,
      budget.remaining(),
      delay,
      error
    );
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
  }
}
