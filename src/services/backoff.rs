use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::FailureResponse;

/// Decides when a failing feed should be paused, and for how long.
///
/// The first `max_consecutive_failures` failures within the reset window are
/// free. Every further failure yields a pause that grows geometrically with
/// the number of charged failures, jittered so that feeds sharing a failing
/// upstream do not resume in lockstep, rounded up to a whole quantum and
/// capped at the maximum pause.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_consecutive_failures: usize,
    pause_period: Duration,
    pause_escalation: f64,
    max_pause: Duration,
    pause_reset: Duration,
    jitter_factor: f64,
    quantum: Duration,
    failure_times: Vec<DateTime<Utc>>,
}

impl Backoff {
    pub fn new(config: &FailureResponse) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures,
            pause_period: config.pause_period(),
            pause_escalation: config.pause_escalation,
            max_pause: config.max_pause(),
            pause_reset: config.pause_reset(),
            jitter_factor: config.jitter_factor,
            quantum: config.quantum(),
            failure_times: Vec::new(),
        }
    }

    pub fn observe_execution(&mut self, at: DateTime<Utc>, is_error: bool) -> Option<Duration> {
        self.observe_with(at, is_error, &mut rand::thread_rng())
    }

    fn observe_with<R: Rng + ?Sized>(
        &mut self,
        at: DateTime<Utc>,
        is_error: bool,
        rng: &mut R,
    ) -> Option<Duration> {
        if is_error {
            self.failure_times.push(at);
        }

        let reset = chrono::Duration::from_std(self.pause_reset)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        self.failure_times.retain(|t| at - *t <= reset);

        let charged = self
            .failure_times
            .len()
            .saturating_sub(self.max_consecutive_failures);

        if !is_error || charged == 0 {
            return None;
        }

        let exponent = i32::try_from(charged).unwrap_or(i32::MAX);
        let escalated = self.pause_period.as_secs_f64() * self.pause_escalation.powi(exponent);
        let escalated = Duration::from_secs_f64(escalated.min(self.max_pause.as_secs_f64() * 2.0));

        let pause = quantize(jitter(escalated, self.jitter_factor, rng), self.quantum);
        Some(pause.min(self.max_pause))
    }

    pub fn failures_in_window(&self) -> usize {
        self.failure_times.len()
    }
}

/// Rounds `duration` up to a whole number of `quantum`s.
pub fn quantize(duration: Duration, quantum: Duration) -> Duration {
    if quantum.is_zero() {
        return duration;
    }
    let steps = (duration.as_secs_f64() / quantum.as_secs_f64()).ceil();
    quantum.mul_f64(steps)
}

/// Scales `duration` by a random factor in `[1 - jitter_factor, 1 + jitter_factor)`.
pub fn jitter<R: Rng + ?Sized>(duration: Duration, jitter_factor: f64, rng: &mut R) -> Duration {
    if jitter_factor > 0.0 {
        duration.mul_f64(rng.gen_range((1.0 - jitter_factor)..(1.0 + jitter_factor)))
    } else {
        duration
    }
}
