use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Which recorded outcomes count against `max_requests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    #[default]
    All,
    SuccessfulOnly,
    FailedOnly,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: usize,
    pub count_mode: CountMode,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
            count_mode: CountMode::All,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Instant,
    success: bool,
}

/// Sliding-window gate on transport attempts, downstream of quota admission.
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<VecDeque<Outcome>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.current_count() < self.config.max_requests
    }

    pub fn record_outcome(&self, success: bool) {
        let mut window = self.window.lock();
        self.purge(&mut window);
        window.push_back(Outcome {
            at: Instant::now(),
            success,
        });
    }

    /// Number of outcomes in the window that count under the configured mode.
    pub fn current_count(&self) -> usize {
        let mut window = self.window.lock();
        self.purge(&mut window);
        window
            .iter()
            .filter(|outcome| match self.config.count_mode {
                CountMode::All => true,
                CountMode::SuccessfulOnly => outcome.success,
                CountMode::FailedOnly => !outcome.success,
            })
            .count()
    }

    fn purge(&self, window: &mut VecDeque<Outcome>) {
        let now = Instant::now();
        while window
            .front()
            .is_some_and(|oldest| now.duration_since(oldest.at) >= self.config.window)
        {
            window.pop_front();
        }
    }
}
