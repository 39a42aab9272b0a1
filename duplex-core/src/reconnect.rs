//! Reconnect backoff policies.
//!
//! `Connect` retries the underlying dial using one of two policies, chosen
//! by `PeerOptions::reconnect_interval_max`:
//!
//! - constant-with-jitter (`reconnect_interval_max == 0`): every attempt
//!   waits `base`, resampled each time as `normal(0, base*J) + base`.
//! - exponential-with-cap (`reconnect_interval_max != 0`): `delay =
//!   min(delay*e, max)`, then jittered the same way.
//!
//! `J = 0.1196` is the jitter coefficient named by the wire spec.

use std::time::Duration;

use rand::Rng;

use crate::options::{PeerOptions, ReconnectInterval};

/// The jitter coefficient: the jittered delay is drawn from
/// `Normal(base, base * J)`.
pub const JITTER_COEFFICIENT: f64 = 0.1196;

/// Euler's number, used by the exponential-with-cap policy's growth factor.
const GROWTH_FACTOR: f64 = std::f64::consts::E;

/// Draw one sample from `Normal(mean, std_dev)` via the Box-Muller
/// transform, using the given RNG (no `rand_distr` dependency in the
/// stack; `rand::thread_rng()` is the only randomness source available,
/// matching `duplex_transport::security::curve`'s key generation).
fn sample_normal(rng: &mut impl Rng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z0
}

/// Apply the spec's jitter formula to a base delay, clamped to be
/// non-negative.
fn jittered(base: Duration) -> Duration {
    let base_secs = base.as_secs_f64();
    let mut rng = rand::thread_rng();
    let sample = sample_normal(&mut rng, 0.0, base_secs * JITTER_COEFFICIENT) + base_secs;
    Duration::from_secs_f64(sample.max(0.0))
}

/// Which backoff policy a `ReconnectState` implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Every attempt waits the same jittered base delay.
    ConstantWithJitter,
    /// Delay grows by a factor of `e` each attempt, capped at `max`, then
    /// jittered.
    ExponentialWithCap,
}

/// Tracks reconnect attempts and produces the next delay to wait.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    base: Duration,
    max: Duration,
    policy: BackoffPolicy,
    attempt: u32,
    current: Duration,
}

impl ReconnectState {
    /// Build reconnect state from a peer's options. Returns `None` if
    /// retry is disabled (`ReconnectInterval::Disabled`).
    #[must_use]
    pub fn from_options(options: &PeerOptions) -> Option<Self> {
        let base_ms = match options.reconnect_interval {
            ReconnectInterval::Disabled => return None,
            ReconnectInterval::Millis(ms) => ms,
        };
        let base = Duration::from_millis(base_ms);
        let max = options.reconnect_interval_max;
        let policy = if max.is_zero() {
            BackoffPolicy::ConstantWithJitter
        } else {
            BackoffPolicy::ExponentialWithCap
        };
        Some(Self {
            base,
            max,
            policy,
            attempt: 0,
            current: base,
        })
    }

    /// Construct state directly, bypassing `PeerOptions`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        let policy = if max.is_zero() {
            BackoffPolicy::ConstantWithJitter
        } else {
            BackoffPolicy::ExponentialWithCap
        };
        Self {
            base,
            max,
            policy,
            attempt: 0,
            current: base,
        }
    }

    /// The policy this state is running.
    #[must_use]
    pub const fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Number of attempts made so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Produce the jittered delay for the next attempt and advance the
    /// internal state.
    pub fn next_delay(&mut self) -> Duration {
        let unjittered = self.current;
        self.attempt += 1;
        match self.policy {
            BackoffPolicy::ConstantWithJitter => {
                // current stays at base
            }
            BackoffPolicy::ExponentialWithCap => {
                let grown = self.current.as_secs_f64() * GROWTH_FACTOR;
                self.current = Duration::from_secs_f64(grown).min(self.max);
            }
        }
        jittered(unjittered)
    }

    /// Reset to the initial state after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current = self.base;
    }
}
