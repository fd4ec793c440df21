use crate::sender::Transport;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const TRANSPORT_COMPONENT: &str = "transport";
pub const QUEUE_COMPONENT: &str = "offline_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentHealth {
    Healthy,
    Degraded(String),  // reason
    Unhealthy(String), // reason
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub check_interval: Duration,
    pub unhealthy_threshold: u32,
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            unhealthy_threshold: 3, // 3 consecutive failures = unhealthy
            recovery_threshold: 2,  // 2 consecutive successes = recovered
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub uptime: Duration,
}

#[derive(Debug)]
struct ComponentState {
    health: ComponentHealth,
    recent_checks: VecDeque<bool>,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl ComponentState {
    fn new() -> Self {
        Self {
            health: ComponentHealth::Healthy,
            recent_checks: VecDeque::with_capacity(100),
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }
}

pub struct HealthMonitor {
    config: HealthConfig,
    components: Mutex<HashMap<String, ComponentState>>,
    started: Instant,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        let mut components = HashMap::new();
        components.insert(TRANSPORT_COMPONENT.to_string(), ComponentState::new());
        components.insert(QUEUE_COMPONENT.to_string(), ComponentState::new());

        Self {
            config,
            components: Mutex::new(components),
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn update_component_health(&self, component: &str, health: ComponentHealth) {
        let mut components = self.components.lock();
        let state = components
            .entry(component.to_string())
            .or_insert_with(ComponentState::new);

        if state.health != health {
            tracing::debug!(component, ?health, "Component health updated");
            state.health = health;
        }
    }

    /// Folds one check result into the component's consecutive counters.
    pub fn record_check(&self, component: &str, success: bool) {
        let mut components = self.components.lock();
        let state = components
            .entry(component.to_string())
            .or_insert_with(ComponentState::new);

        state.recent_checks.push_back(success);
        if state.recent_checks.len() > 100 {
            state.recent_checks.pop_front();
        }

        if success {
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
        }

        let new_health = if state.consecutive_failures >= self.config.unhealthy_threshold {
            ComponentHealth::Unhealthy(format!(
                "{} consecutive failures",
                state.consecutive_failures
            ))
        } else if state.consecutive_failures > 0 {
            ComponentHealth::Degraded(format!(
                "{} consecutive failures",
                state.consecutive_failures
            ))
        } else if state.consecutive_successes >= self.config.recovery_threshold
            || state.health == ComponentHealth::Healthy
        {
            ComponentHealth::Healthy
        } else {
            state.health.clone()
        };

        if new_health != state.health {
            tracing::info!(
                component,
                from = ?state.health,
                to = ?new_health,
                "Component health changed"
            );
            state.health = new_health;
        }
    }

    pub fn component_health(&self, component: &str) -> Option<ComponentHealth> {
        self.components
            .lock()
            .get(component)
            .map(|state| state.health.clone())
    }

    pub fn component_history(&self, component: &str) -> Vec<bool> {
        self.components
            .lock()
            .get(component)
            .map(|state| state.recent_checks.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn overall_health(&self) -> HealthStatus {
        let components = self.components.lock();
        overall(components.values().map(|state| &state.health))
    }

    pub fn report(&self) -> HealthReport {
        let components = self.components.lock();
        HealthReport {
            status: overall(components.values().map(|state| &state.health)),
            components: components
                .iter()
                .map(|(name, state)| (name.clone(), state.health.clone()))
                .collect(),
            uptime: self.started.elapsed(),
        }
    }

    /// Probes the transport endpoint every `check_interval` until cancelled.
    pub fn spawn_periodic_checks(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let ok = match transport.health_check().await {
                            Ok(()) => true,
                            Err(e) => {
                                tracing::debug!(endpoint = transport.endpoint(), error = %e, "Endpoint health check failed");
                                false
                            }
                        };
                        monitor.record_check(TRANSPORT_COMPONENT, ok);
                    }
                }
            }
        })
    }
}

fn overall<'a>(healths: impl Iterator<Item = &'a ComponentHealth>) -> HealthStatus {
    let mut status = HealthStatus::Healthy;
    for health in healths {
        match health {
            ComponentHealth::Unhealthy(_) => return HealthStatus::Unhealthy,
            ComponentHealth::Degraded(_) => status = HealthStatus::Degraded,
            ComponentHealth::Healthy => {}
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_failures_degrade_then_fail() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        assert_eq!(monitor.overall_health(), HealthStatus::Healthy);

        monitor.record_check(TRANSPORT_COMPONENT, false);
        assert_eq!(monitor.overall_health(), HealthStatus::Degraded);

        monitor.record_check(TRANSPORT_COMPONENT, false);
        monitor.record_check(TRANSPORT_COMPONENT, false);
        assert!(matches!(
            monitor.component_health(TRANSPORT_COMPONENT),
            Some(ComponentHealth::Unhealthy(_))
        ));
        assert_eq!(monitor.overall_health(), HealthStatus::Unhealthy);
    }

    #[test]
    fn recovery_needs_consecutive_successes() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        for _ in 0..3 {
            monitor.record_check(TRANSPORT_COMPONENT, false);
        }

        monitor.record_check(TRANSPORT_COMPONENT, true);
        assert!(matches!(
            monitor.component_health(TRANSPORT_COMPONENT),
            Some(ComponentHealth::Unhealthy(_))
        ));

        monitor.record_check(TRANSPORT_COMPONENT, true);
        assert_eq!(
            monitor.component_health(TRANSPORT_COMPONENT),
            Some(ComponentHealth::Healthy)
        );
        assert_eq!(
            monitor.component_history(TRANSPORT_COMPONENT),
            vec![false, false, false, true, true]
        );
    }

    #[test]
    fn report_lists_all_components() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.update_component_health(QUEUE_COMPONENT, ComponentHealth::Degraded("full".into()));

        let report = monitor.report();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.components.len(), 2);
    }
}
