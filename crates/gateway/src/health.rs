//! Database health monitoring behind `/health`.
//!
//! A background task probes the database on a fixed cadence and feeds
//! a pure state machine: probes every 30 seconds with a 10-second
//! timeout, failures inside a 5-second startup grace window are
//! ignored, and 3 consecutive failures flip the reported state to
//! unhealthy. Any success flips it back. `/health` serves the cached
//! state so probes from the container host stay cheap.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use bs_db::DbPool;

/// Probe cadence and failure thresholds.
#[derive(Debug, Clone)]
pub struct ProbePolicy {
    /// Time between probes.
    pub interval: Duration,
    /// Per-probe timeout; a slow probe counts as a failure.
    pub timeout: Duration,
    /// Failures within this window after startup are not counted.
    pub grace: Duration,
    /// Consecutive failures before the state turns unhealthy.
    pub failure_threshold: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            grace: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Reported health of the gateway's database dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// No successful probe yet.
    Starting,
    Healthy,
    Unhealthy,
}

/// Pure probe-outcome accumulator.
#[derive(Debug)]
pub struct HealthTracker {
    policy: ProbePolicy,
    state: HealthState,
    consecutive_failures: u32,
}

impl HealthTracker {
    pub fn new(policy: ProbePolicy) -> Self {
        Self {
            policy,
            state: HealthState::Starting,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Feed one probe outcome. `elapsed` is the time since monitoring
    /// began, used to honor the startup grace window.
    pub fn observe(&mut self, ok: bool, elapsed: Duration) -> HealthState {
        if ok {
            self.consecutive_failures = 0;
            self.state = HealthState::Healthy;
        } else if elapsed >= self.policy.grace {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.policy.failure_threshold {
                self.state = HealthState::Unhealthy;
            }
        }
        self.state
    }
}

/// Shared read handle to the monitored health state.
#[derive(Clone)]
pub struct HealthMonitor {
    rx: watch::Receiver<HealthState>,
}

impl HealthMonitor {
    /// Spawn the probe task. Returns the read handle and the task's
    /// join handle for shutdown.
    pub fn start(
        pool: DbPool,
        policy: ProbePolicy,
        cancel: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = watch::channel(HealthState::Starting);
        let handle = tokio::spawn(run(pool, policy, tx, cancel));
        (Self { rx }, handle)
    }

    /// A monitor pinned to a fixed state (tests). The watch channel
    /// keeps serving its last value after the sender is dropped.
    pub fn fixed(state: HealthState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self { rx }
    }

    pub fn state(&self) -> HealthState {
        *self.rx.borrow()
    }
}

async fn run(
    pool: DbPool,
    policy: ProbePolicy,
    tx: watch::Sender<HealthState>,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let mut tracker = HealthTracker::new(policy.clone());
    let mut interval = tokio::time::interval(policy.interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Health monitor stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let ok = match tokio::time::timeout(policy.timeout, bs_db::health_check(&pool)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Database probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(timeout_secs = policy.timeout.as_secs(), "Database probe timed out");
                false
            }
        };

        let previous = tracker.state();
        let state = tracker.observe(ok, started.elapsed());
        if state != previous {
            match state {
                HealthState::Healthy => tracing::info!("Health state: healthy"),
                HealthState::Unhealthy => tracing::error!("Health state: unhealthy"),
                HealthState::Starting => {}
            }
        }
        let _ = tx.send(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ProbePolicy {
        ProbePolicy::default()
    }

    const AFTER_GRACE: Duration = Duration::from_secs(6);

    #[test]
    fn starts_in_starting_state() {
        let tracker = HealthTracker::new(policy());
        assert_eq!(tracker.state(), HealthState::Starting);
    }

    #[test]
    fn success_moves_to_healthy() {
        let mut tracker = HealthTracker::new(policy());
        assert_eq!(tracker.observe(true, Duration::ZERO), HealthState::Healthy);
    }

    #[test]
    fn failures_within_grace_are_ignored() {
        let mut tracker = HealthTracker::new(policy());
        for _ in 0..5 {
            assert_eq!(
                tracker.observe(false, Duration::from_secs(1)),
                HealthState::Starting
            );
        }
    }

    #[test]
    fn three_consecutive_failures_turn_unhealthy() {
        let mut tracker = HealthTracker::new(policy());
        tracker.observe(true, Duration::ZERO);

        assert_eq!(tracker.observe(false, AFTER_GRACE), HealthState::Healthy);
        assert_eq!(tracker.observe(false, AFTER_GRACE), HealthState::Healthy);
        assert_eq!(tracker.observe(false, AFTER_GRACE), HealthState::Unhealthy);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let mut tracker = HealthTracker::new(policy());
        tracker.observe(true, Duration::ZERO);

        tracker.observe(false, AFTER_GRACE);
        tracker.observe(false, AFTER_GRACE);
        tracker.observe(true, AFTER_GRACE);

        // Streak restarted: two more failures are not enough.
        tracker.observe(false, AFTER_GRACE);
        assert_eq!(tracker.observe(false, AFTER_GRACE), HealthState::Healthy);
        assert_eq!(tracker.observe(false, AFTER_GRACE), HealthState::Unhealthy);
    }

    #[test]
    fn recovery_after_unhealthy() {
        let mut tracker = HealthTracker::new(policy());
        for _ in 0..3 {
            tracker.observe(false, AFTER_GRACE);
        }
        assert_eq!(tracker.state(), HealthState::Unhealthy);

        assert_eq!(tracker.observe(true, AFTER_GRACE), HealthState::Healthy);
    }

    #[test]
    fn fixed_monitor_reports_pinned_state() {
        let monitor = HealthMonitor::fixed(HealthState::Healthy);
        assert_eq!(monitor.state(), HealthState::Healthy);
    }
}
