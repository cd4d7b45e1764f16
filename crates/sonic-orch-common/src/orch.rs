//! Base Orch trait.

use async_trait::async_trait;
use std::time::Instant;

/// Base trait for all orchestration agents.
///
/// Each Orch module implements this trait to participate in the daemon
/// event loop. The daemon calls these methods in response to pending
/// change notifications and timer expiry.
///
/// # Lifecycle
///
/// 1. Construction: the Orch is created with its backends
/// 2. Replay: persisted configuration is applied
/// 3. Registration: the Orch is handed to the daemon
/// 4. Event loop: `do_task()` runs while work is pending, `on_timer()` runs
///    whenever a deadline from `next_timer_deadline()` has passed
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the daemon may be driven from a
/// multi-threaded runtime.
#[async_trait]
pub trait Orch: Send + Sync {
    /// Returns the name of this Orch (for logging and debugging).
    fn name(&self) -> &str;

    /// Processes pending change notifications.
    async fn do_task(&mut self);

    /// Returns the priority of this Orch (lower = processed first).
    fn priority(&self) -> i32 {
        0
    }

    /// Returns true if `do_task()` has work to do.
    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Dumps pending tasks for debugging.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }

    /// Runs expired timers.
    fn on_timer(&mut self) {}

    /// Returns the earliest armed timer deadline, if any.
    ///
    /// The daemon sleeps no longer than this.
    fn next_timer_deadline(&self) -> Option<Instant> {
        None
    }

    /// Handles an asynchronous notification (JSON encoded).
    fn on_notification(&mut self, _notification: &str) {}
}
