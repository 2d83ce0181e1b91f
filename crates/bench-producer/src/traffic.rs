/// Traffic shaping for the produce loop.
///
/// A `TrafficGen` tells the loop how long to wait before the next send.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::TrafficKind;

/// At most `amount` events per `duration`.
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    pub amount: u32,
    pub duration: Duration,
}

impl Rate {
    pub fn per_second(amount: u32) -> Self {
        Self {
            amount,
            duration: Duration::from_secs(1),
        }
    }
}

pub trait TrafficGen: Send {
    /// How long to wait before sending the next event.
    fn next_wait(&mut self) -> Duration;
}

pub fn for_kind(kind: TrafficKind, messages_per_sec: u32) -> Box<dyn TrafficGen> {
    let rate = Rate::per_second(messages_per_sec.max(1));
    match kind {
        TrafficKind::Unbounded => Box::new(Unbounded),
        TrafficKind::Throttled => Box::new(Throttler::new(rate)),
        TrafficKind::Poisson => Box::new(PoissonGen::new(StdRng::from_entropy(), rate)),
    }
}

// ── Unbounded ────────────────────────────────────────────────

pub struct Unbounded;

impl TrafficGen for Unbounded {
    fn next_wait(&mut self) -> Duration {
        Duration::ZERO
    }
}

// ── Throttler ────────────────────────────────────────────────

/// Sliding-window limiter: remembers the send instants of the last window and
/// makes the caller wait once `amount` of them are still inside it.
pub struct Throttler {
    rate: Rate,
    sent: VecDeque<Instant>,
}

impl Throttler {
    pub fn new(rate: Rate) -> Self {
        Self {
            rate,
            sent: VecDeque::with_capacity(rate.amount as usize),
        }
    }

    fn free_up(&mut self, now: Instant) {
        let Some(threshold) = now.checked_sub(self.rate.duration) else {
            return;
        };
        while let Some(&oldest) = self.sent.front() {
            if oldest < threshold {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}

impl TrafficGen for Throttler {
    fn next_wait(&mut self) -> Duration {
        let now = Instant::now();
        self.free_up(now);
        self.sent.push_back(now);
        if (self.sent.len() as u32) < self.rate.amount {
            return Duration::ZERO;
        }
        match self.sent.front() {
            Some(&oldest) => (oldest + self.rate.duration).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

// ── Poisson ──────────────────────────────────────────────────

/// Poisson arrivals: exponentially distributed waits with mean `1 / rate`.
pub struct PoissonGen<R: Rng> {
    rng: R,
    rate: Rate,
}

impl<R: Rng> PoissonGen<R> {
    pub fn new(rng: R, rate: Rate) -> Self {
        Self { rng, rate }
    }
}

impl<R: Rng + Send> TrafficGen for PoissonGen<R> {
    fn next_wait(&mut self) -> Duration {
        let rate_per_sec = self.rate.amount as f64 / self.rate.duration.as_secs_f64();
        // gen() is uniform in [0, 1), so 1 - gen() is in (0, 1] and ln() stays finite
        let uniform = 1.0 - self.rng.gen::<f64>();
        Duration::from_secs_f64(-uniform.ln() / rate_per_sec)
    }
}
