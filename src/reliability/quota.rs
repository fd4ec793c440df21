use chrono::{Datelike, Local, NaiveDate, TimeZone};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a report was refused admission. A routing decision, not a failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaRejection {
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("burst limit exceeded ({limit} per {window:?})")]
    BurstLimitExceeded { limit: usize, window: Duration },
    #[error("daily quota exceeded ({limit})")]
    DailyQuotaExceeded { limit: u64 },
    #[error("monthly quota exceeded ({limit})")]
    MonthlyQuotaExceeded { limit: u64 },
}

impl QuotaRejection {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            QuotaRejection::PayloadTooLarge { .. } => "payload_too_large",
            QuotaRejection::BurstLimitExceeded { .. } => "burst_limit",
            QuotaRejection::DailyQuotaExceeded { .. } => "daily_quota",
            QuotaRejection::MonthlyQuotaExceeded { .. } => "monthly_quota",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub daily_limit: u64,
    pub monthly_limit: u64,
    pub burst_limit: usize,
    pub burst_window: Duration,
    pub max_payload_size: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 1000,
            monthly_limit: 10_000,
            burst_limit: 50,
            burst_window: Duration::from_secs(60),
            max_payload_size: 1024 * 1024, // 1MB
        }
    }
}

/// Source of the wall-clock calendar date used for daily/monthly keys.
pub trait Calendar: Send + Sync {
    fn today(&self) -> NaiveDate;

    fn until_next_midnight(&self) -> Duration;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCalendar;

impl Calendar for LocalCalendar {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn until_next_midnight(&self) -> Duration {
        let now = Local::now();
        now.date_naive()
            .succ_opt()
            .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
            .and_then(|midnight| (midnight - now).to_std().ok())
            .unwrap_or(Duration::from_secs(3600))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaUsage {
    pub daily_count: u64,
    pub monthly_count: u64,
    pub burst_count: usize,
    pub daily_remaining: u64,
    pub monthly_remaining: u64,
    pub bytes_today: u64,
}

#[derive(Debug)]
struct QuotaState {
    daily_count: u64,
    monthly_count: u64,
    bytes_today: u64,
    burst_timestamps: VecDeque<Instant>,
    last_reset_date: NaiveDate,
    last_reset_month: (i32, u32),
}

pub struct QuotaManager {
    config: QuotaConfig,
    calendar: Arc<dyn Calendar>,
    state: Mutex<QuotaState>,
}

impl QuotaManager {
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_calendar(config, Arc::new(LocalCalendar))
    }

    pub fn with_calendar(config: QuotaConfig, calendar: Arc<dyn Calendar>) -> Self {
        let today = calendar.today();
        Self {
            config,
            calendar,
            state: Mutex::new(QuotaState {
                daily_count: 0,
                monthly_count: 0,
                bytes_today: 0,
                burst_timestamps: VecDeque::new(),
                last_reset_date: today,
                last_reset_month: (today.year(), today.month()),
            }),
        }
    }

    /// Admission check. Rules run in a fixed order and the first failure wins:
    /// payload size, burst window, daily quota, monthly quota.
    pub fn can_send(&self, payload_size: usize) -> Result<(), QuotaRejection> {
        if payload_size > self.config.max_payload_size {
            return Err(QuotaRejection::PayloadTooLarge {
                size: payload_size,
                max: self.config.max_payload_size,
            });
        }

        let mut state = self.state.lock();
        self.roll_over(&mut state);
        self.prune_burst(&mut state);

        if state.burst_timestamps.len() >= self.config.burst_limit {
            return Err(QuotaRejection::BurstLimitExceeded {
                limit: self.config.burst_limit,
                window: self.config.burst_window,
            });
        }
        if state.daily_count >= self.config.daily_limit {
            return Err(QuotaRejection::DailyQuotaExceeded {
                limit: self.config.daily_limit,
            });
        }
        if state.monthly_count >= self.config.monthly_limit {
            return Err(QuotaRejection::MonthlyQuotaExceeded {
                limit: self.config.monthly_limit,
            });
        }

        Ok(())
    }

    pub fn record_usage(&self, payload_size: usize) {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
        self.prune_burst(&mut state);

        state.daily_count += 1;
        state.monthly_count += 1;
        state.bytes_today += payload_size as u64;
        state.burst_timestamps.push_back(Instant::now());
    }

    /// Applies any pending day/month rollover. Safe to call redundantly.
    pub fn reset_if_needed(&self) {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
    }

    pub fn usage(&self) -> QuotaUsage {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
        self.prune_burst(&mut state);

        QuotaUsage {
            daily_count: state.daily_count,
            monthly_count: state.monthly_count,
            burst_count: state.burst_timestamps.len(),
            daily_remaining: self.config.daily_limit.saturating_sub(state.daily_count),
            monthly_remaining: self.config.monthly_limit.saturating_sub(state.monthly_count),
            bytes_today: state.bytes_today,
        }
    }

    /// Re-arming timer that applies the rollover at each local midnight.
    pub fn spawn_midnight_reset(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let quota = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let wait = quota.calendar.until_next_midnight();
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(wait) => {
                        quota.reset_if_needed();
                        tracing::debug!("Quota midnight check ran");
                    }
                }
            }
        })
    }

    fn roll_over(&self, state: &mut QuotaState) {
        let today = self.calendar.today();
        let month = (today.year(), today.month());

        if state.last_reset_date != today {
            tracing::info!(
                previous = %state.last_reset_date,
                daily_count = state.daily_count,
                "Resetting daily error quota"
            );
            state.daily_count = 0;
            state.bytes_today = 0;
            state.last_reset_date = today;
        }

        if state.last_reset_month != month {
            tracing::info!(monthly_count = state.monthly_count, "Resetting monthly error quota");
            state.monthly_count = 0;
            state.last_reset_month = month;
        }
    }

    fn prune_burst(&self, state: &mut QuotaState) {
        let now = Instant::now();
        while let Some(oldest) = state.burst_timestamps.front() {
            if now.duration_since(*oldest) >= self.config.burst_window {
                state.burst_timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
