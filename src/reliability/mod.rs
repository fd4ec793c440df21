pub mod circuit_breaker;
pub mod health;
pub mod metrics;
pub mod offline_queue;
pub mod quota;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{ComponentHealth, HealthConfig, HealthMonitor, HealthReport, HealthStatus};
pub use metrics::{MetricsCollector, MetricsError, MetricsSnapshot, ReportOutcome};
pub use offline_queue::{DrainSummary, OfflineQueue, QueueConfig, QueueEntry, QueueError};
pub use quota::{Calendar, LocalCalendar, QuotaConfig, QuotaManager, QuotaRejection, QuotaUsage};
pub use rate_limit::{CountMode, RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, RetryManager, RetryPredicate, RetryStats};
