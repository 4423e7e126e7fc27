//! Randomized cadence for the bot's recurring actions

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks when the next check-in is due.
///
/// The first gap after the startup check-in is drawn from one range, every
/// later gap from another.
#[derive(Debug, Clone)]
pub struct CheckInSchedule {
    first_gap: (u64, u64),
    later_gap: (u64, u64),
    last: Option<Instant>,
    next_gap: Duration,
    completed: u32,
}

impl CheckInSchedule {
    pub fn new(first_gap_secs: (u64, u64), later_gap_secs: (u64, u64)) -> Self {
        Self {
            first_gap: first_gap_secs,
            later_gap: later_gap_secs,
            last: None,
            next_gap: Duration::ZERO,
            completed: 0,
        }
    }

    /// Due when nothing was recorded yet or the drawn gap has fully elapsed
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.next_gap,
        }
    }

    /// Record a check-in attempt at `now` and draw the next gap
    pub fn record(&mut self, now: Instant) {
        let range = if self.completed == 0 {
            self.first_gap
        } else {
            self.later_gap
        };
        self.record_with_gap(now, random_secs(range.0, range.1));
    }

    fn record_with_gap(&mut self, now: Instant, gap: Duration) {
        self.last = Some(now);
        self.next_gap = gap;
        self.completed += 1;
    }

    pub fn next_gap(&self) -> Duration {
        self.next_gap
    }
}

/// Uniform whole seconds in `[min, max]`
pub fn random_secs(min: u64, max: u64) -> Duration {
    if min >= max {
        return Duration::from_secs(min);
    }
    Duration::from_secs(rand::thread_rng().gen_range(min..=max))
}

/// Uniform amount in `[min, max]`, rounded to two decimals
pub fn random_amount(min: f64, max: f64) -> f64 {
    let raw = if min >= max {
        min
    } else {
        rand::thread_rng().gen_range(min..=max)
    };
    (raw * 100.0).round() / 100.0
}

/// Amount of token to swap back, keeping `reserve` and skipping dust
pub fn plan_return_swap(token_balance: f64, reserve: f64, minimum: f64) -> Option<f64> {
    let amount = token_balance - reserve;
    if amount < minimum {
        None
    } else {
        Some(amount)
    }
}
