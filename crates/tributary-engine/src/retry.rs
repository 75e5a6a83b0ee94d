use std::time::Duration;

use rand::Rng;
use tributary_config::RetryDelayConfig;

use crate::error::DefinitionError;

/// Delay before a failed attempt is retried.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDelay {
  Fixed(Duration),
  /// One delay per retry; the last value repeats once the list runs out.
  Sequence(Vec<Duration>),
  /// `base * 2^(retry - 1)`, capped at `max`, scaled by a random factor in
  /// `[1 - jitter, 1 + jitter]`.
  Exponential {
    base: Duration,
    max: Option<Duration>,
    jitter: f64,
  },
}

impl RetryDelay {
  /// Delay before retry number `retry` (1 for the first retry).
  pub fn for_retry(&self, retry: u32) -> Duration {
    match self {
      RetryDelay::Fixed(delay) => *delay,
      RetryDelay::Sequence(delays) => {
        let index = usize::try_from(retry.saturating_sub(1)).unwrap_or(usize::MAX);
        delays
          .get(index)
          .or_else(|| delays.last())
          .copied()
          .unwrap_or_default()
      }
      RetryDelay::Exponential { base, max, jitter } => {
        let exponent = i32::try_from(retry.saturating_sub(1)).map_or(30, |e| e.min(30));
        let mut seconds = base.as_secs_f64() * 2f64.powi(exponent);
        if let Some(max) = max {
          seconds = seconds.min(max.as_secs_f64());
        }

        let jitter = jitter.abs().min(1.0);
        if jitter > 0.0 {
          seconds *= 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        }
        Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
      }
    }
  }

  pub fn from_config(config: &RetryDelayConfig) -> Result<Self, DefinitionError> {
    match config {
      RetryDelayConfig::Constant { seconds } => Ok(RetryDelay::Fixed(seconds_to_duration(*seconds)?)),
      RetryDelayConfig::Sequence { seconds } => seconds
        .iter()
        .map(|s| seconds_to_duration(*s))
        .collect::<Result<Vec<_>, _>>()
        .map(RetryDelay::Sequence),
      RetryDelayConfig::Exponential {
        base_seconds,
        max_seconds,
        jitter_factor,
      } => Ok(RetryDelay::Exponential {
        base: seconds_to_duration(*base_seconds)?,
        max: max_seconds.map(seconds_to_duration).transpose()?,
        jitter: jitter_factor.unwrap_or(0.0),
      }),
    }
  }
}

fn seconds_to_duration(seconds: f64) -> Result<Duration, DefinitionError> {
  Duration::try_from_secs_f64(seconds).map_err(|e| DefinitionError::InvalidRetryDelay {
    message: format!("{seconds}: {e}"),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sequence_repeats_last_delay() {
    let delay = RetryDelay::Sequence(vec![Duration::from_secs(1), Duration::from_secs(5)]);
    assert_eq!(delay.for_retry(1), Duration::from_secs(1));
    assert_eq!(delay.for_retry(2), Duration::from_secs(5));
    assert_eq!(delay.for_retry(7), Duration::from_secs(5));
  }

  #[test]
  fn test_exponential_doubles_and_caps() {
    let delay = RetryDelay::Exponential {
      base: Duration::from_secs(1),
      max: Some(Duration::from_secs(5)),
      jitter: 0.0,
    };
    assert_eq!(delay.for_retry(1), Duration::from_secs(1));
    assert_eq!(delay.for_retry(2), Duration::from_secs(2));
    assert_eq!(delay.for_retry(3), Duration::from_secs(4));
    assert_eq!(delay.for_retry(4), Duration::from_secs(5));
  }

  #[test]
  fn test_jitter_stays_in_range() {
    let delay = RetryDelay::Exponential {
      base: Duration::from_secs(10),
      max: None,
      jitter: 0.25,
    };
    for _ in 0..50 {
      let d = delay.for_retry(1).as_secs_f64();
      assert!((7.5..=12.5).contains(&d), "{d}");
    }
  }

  #[test]
  fn test_from_config_rejects_negative_seconds() {
    let err = RetryDelay::from_config(&RetryDelayConfig::Constant { seconds: -1.0 }).unwrap_err();
    assert!(matches!(err, DefinitionError::InvalidRetryDelay { .. }));
  }
}
