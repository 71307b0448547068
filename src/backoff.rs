// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

use rand::Rng;
use std::time::Duration;

/// Jittered exponential backoff: `duration_n = clamp(min*mult^n, min, max) * (1 + U[0, jitter))`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Backoff {
            min,
            max,
            multiplier,
            jitter,
            attempt: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Computes the next duration and advances the internal attempt counter.
    pub fn next(&mut self) -> Duration {
        let base = duration_for_attempt(self.min, self.max, self.multiplier, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        add_jitter(base, self.jitter)
    }
}

fn duration_for_attempt(min: Duration, max: Duration, multiplier: f64, attempt: u32) -> Duration {
    let scaled = min.as_secs_f64() * multiplier.powi(attempt as i32);
    let clamped = scaled.clamp(min.as_secs_f64(), max.as_secs_f64());
    Duration::from_secs_f64(clamped)
}

/// Adds `U[0, jitter)` proportional jitter to `d`. `jitter <= 0` returns `d` unchanged.
pub fn add_jitter(d: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return d;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(0.0..jitter);
    Duration::from_secs_f64(d.as_secs_f64() * factor)
}

/// Retries `f` forever, sleeping with backoff between attempts, until it returns `Ok`.
pub async fn retry_with_backoff<F, Fut, T, E>(mut backoff: Backoff, mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    loop {
        match f().await {
            Ok(v) => return v,
            Err(e) => {
                let wait = backoff.next();
                log::warn!("retrying after error: {} (sleeping {:?})", e, wait);
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Retries `f` up to `n` times, returning the last error if all attempts fail.
pub async fn retry_n_with_backoff<F, Fut, T, E>(
    mut backoff: Backoff,
    n: u32,
    mut f: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_err = None;
    for _ in 0..n {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let wait = backoff.next();
                log::warn!("retrying after error: {} (sleeping {:?})", e, wait);
                tokio::time::sleep(wait).await;
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("n > 0"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_simple_backoff() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.0);
        assert_eq!(b.attempt, 0);
    }

    #[test]
    fn test_duration_clamps_to_max() {
        let d = duration_for_attempt(Duration::from_secs(1), Duration::from_secs(10), 2.0, 10);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn test_duration_grows_by_multiplier() {
        let d0 = duration_for_attempt(Duration::from_secs(1), Duration::from_secs(100), 2.0, 0);
        let d1 = duration_for_attempt(Duration::from_secs(1), Duration::from_secs(100), 2.0, 1);
        assert_eq!(d0, Duration::from_secs(1));
        assert_eq!(d1, Duration::from_secs(2));
    }

    #[test]
    fn test_add_jitter_zero_is_exact() {
        assert_eq!(add_jitter(Duration::from_secs(1), 0.0), Duration::from_secs(1));
    }

    #[test]
    fn test_add_jitter_positive_is_ge() {
        let d = add_jitter(Duration::from_secs(1), 0.99);
        assert!(d >= Duration::from_secs(1));
    }
}
