use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::tools::optimize::{run_auto_optimize, AutoOptimizeOutcome};
use crate::tools::ToolContext;

/// Terminal state of one scheduled auto-optimization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// The interval had not elapsed; never counted as a failure.
    SkippedTooSoon,
    Failed,
}

/// Drives the periodic auto-optimization pass: one startup kick-off after a
/// short delay, then a recurring timer. Invokes the same handler an
/// external `auto_optimize` call goes through, with `force=false`.
///
/// Every attempt is isolated: an error is caught, logged, and counted, so a
/// failing optimization can never crash or hang the host process. After the
/// consecutive-failure counter exceeds the threshold the breaker trips,
/// `autoOptimization.enabled` flips to false, and the timer loop exits for
/// the lifetime of the process. There is no automatic re-enable.
pub struct AutoOptimizeScheduler {
    ctx: Arc<ToolContext>,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
}

impl AutoOptimizeScheduler {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let failure_threshold = ctx.config.optimization.failure_threshold;
        Self {
            ctx,
            failure_threshold,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Whether scheduled runs are still allowed. A poisoned state lock
    /// reads as disabled so the loop cannot spin on a broken store.
    pub fn is_enabled(&self) -> bool {
        match self.ctx.lock_state() {
            Ok(state) => state.auto_optimization().enabled,
            Err(_) => false,
        }
    }

    /// Run one attempt and feed its outcome through the failure-counting
    /// state machine. Never panics and never propagates an error.
    pub fn run_once(&self) -> RunOutcome {
        let outcome = match run_auto_optimize(&self.ctx, false) {
            Ok(AutoOptimizeOutcome::Ran { .. }) => RunOutcome::Success,
            Ok(AutoOptimizeOutcome::Skipped { next_eligible }) => {
                debug!(next_eligible = %next_eligible, "Scheduled optimization skipped");
                RunOutcome::SkippedTooSoon
            }
            Err(e) => {
                error!(error = %e, "Scheduled auto-optimization failed");
                if let Ok(mut state) = self.ctx.lock_state() {
                    state.record_tool_error("auto_optimize", &e.to_string());
                    state.record_optimization_failure();
                }
                RunOutcome::Failed
            }
        };

        self.record_outcome(outcome);
        outcome
    }

    /// Advance the failure-counting state machine. Public so tests can
    /// simulate consecutive failures without timers: a success resets the
    /// counter, a skip leaves it unchanged, and the failure that pushes the
    /// counter past the threshold trips the breaker.
    pub fn record_outcome(&self, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Success => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            RunOutcome::SkippedTooSoon => {}
            RunOutcome::Failed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures > self.failure_threshold {
                    self.trip_breaker(failures);
                }
            }
        }
    }

    fn trip_breaker(&self, failures: u32) {
        warn!(
            failures,
            "Auto-optimization circuit breaker tripped; disabling scheduled runs"
        );
        match self.ctx.lock_state() {
            Ok(mut state) => state.disable_auto_optimization(),
            Err(e) => error!(error = %e, "Could not flip auto-optimization off"),
        }
    }

    /// Spawn the background loop: startup kick-off after the configured
    /// delay, then ticks at the configured interval until the breaker
    /// trips or the process exits.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let startup_delay = Duration::from_millis(self.ctx.config.optimization.startup_delay_ms);
        let interval = Duration::from_millis(self.ctx.config.optimization.interval_ms.max(1));

        tokio::spawn(async move {
            tokio::time::sleep(startup_delay).await;
            if self.is_enabled() {
                self.run_once();
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; consume it so the loop
            // waits a full interval after the startup attempt.
            ticker.tick().await;

            while self.is_enabled() {
                ticker.tick().await;
                if !self.is_enabled() {
                    break;
                }
                self.run_once();
            }

            info!("Auto-optimization scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn scheduler() -> AutoOptimizeScheduler {
        let config = Arc::new(ServerConfig::default());
        AutoOptimizeScheduler::new(Arc::new(ToolContext::new(config)))
    }

    #[test]
    fn test_first_run_succeeds_then_skips() {
        let sched = scheduler();
        assert_eq!(sched.run_once(), RunOutcome::Success);
        assert_eq!(sched.run_once(), RunOutcome::SkippedTooSoon);
        assert_eq!(sched.consecutive_failures(), 0);
    }

    #[test]
    fn test_breaker_trips_on_sixth_consecutive_failure() {
        let sched = scheduler();
        for _ in 0..5 {
            sched.record_outcome(RunOutcome::Failed);
        }
        assert!(sched.is_enabled());

        sched.record_outcome(RunOutcome::Failed);
        assert!(!sched.is_enabled());
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let sched = scheduler();
        for _ in 0..5 {
            sched.record_outcome(RunOutcome::Failed);
        }
        sched.record_outcome(RunOutcome::Success);
        assert_eq!(sched.consecutive_failures(), 0);

        sched.record_outcome(RunOutcome::Failed);
        assert!(sched.is_enabled());
    }

    #[test]
    fn test_skip_leaves_counter_unchanged() {
        let sched = scheduler();
        for _ in 0..5 {
            sched.record_outcome(RunOutcome::Failed);
        }
        sched.record_outcome(RunOutcome::SkippedTooSoon);
        assert_eq!(sched.consecutive_failures(), 5);
        assert!(sched.is_enabled());
    }

    #[test]
    fn test_breaker_is_one_way() {
        let sched = scheduler();
        for _ in 0..6 {
            sched.record_outcome(RunOutcome::Failed);
        }
        assert!(!sched.is_enabled());

        // Later successes do not re-enable scheduled runs.
        sched.record_outcome(RunOutcome::Success);
        assert!(!sched.is_enabled());
    }

    #[test]
    fn test_poisoned_state_is_failure_not_panic() {
        let config = Arc::new(ServerConfig::default());
        let ctx = Arc::new(ToolContext::new(config));
        let sched = AutoOptimizeScheduler::new(ctx.clone());

        let state = ctx.state.clone();
        let _ = std::thread::spawn(move || {
            let _guard = state.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert_eq!(sched.run_once(), RunOutcome::Failed);
        assert_eq!(sched.consecutive_failures(), 1);
        assert!(!sched.is_enabled());
    }
}
