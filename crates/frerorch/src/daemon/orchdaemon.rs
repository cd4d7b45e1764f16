//! OrchDaemon implementation.
//!
//! The OrchDaemon is the single dispatch loop for all Orch modules:
//! - Orch registration and priority ordering
//! - Task dispatch to Orchs with pending change notifications
//! - Timer dispatch, sleeping no longer than the earliest Orch deadline
//! - Delivery of asynchronous notifications (JSON) to every Orch

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use log::{debug, info, warn};
use sonic_orch_common::Orch;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Configuration for the OrchDaemon.
#[derive(Debug, Clone)]
pub struct OrchDaemonConfig {
    /// Longest sleep between two passes, in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Capacity of the notification channel
    pub notification_queue_len: usize,
}

impl Default for OrchDaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            notification_queue_len: 1024,
        }
    }
}

/// Stops a running [`OrchDaemon`] from another task.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The main orchestration daemon.
pub struct OrchDaemon {
    config: OrchDaemonConfig,
    /// Registered Orchs sorted by priority
    orchs: BTreeMap<i32, Vec<Box<dyn Orch>>>,
    running: Arc<AtomicBool>,
    notif_tx: mpsc::Sender<String>,
    notif_rx: mpsc::Receiver<String>,
}

impl OrchDaemon {
    pub fn new(config: OrchDaemonConfig) -> Self {
        let (notif_tx, notif_rx) = mpsc::channel(config.notification_queue_len.max(1));
        Self {
            config,
            orchs: BTreeMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            notif_tx,
            notif_rx,
        }
    }

    /// Registers an Orch with the daemon.
    ///
    /// Orchs are ordered by priority (lower = higher priority).
    pub fn register_orch(&mut self, orch: Box<dyn Orch>) {
        let priority = orch.priority();
        let orch_name = orch.name().to_string();
        info!("Registering {} with priority {}", orch_name, priority);

        let record = AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "OrchDaemon",
            format!("register_orch: {}", orch_name),
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(&orch_name)
        .with_object_type("orch_module")
        .with_details(serde_json::json!({
            "priority": priority,
        }));
        audit_log!(record);

        self.orchs.entry(priority).or_default().push(orch);
    }

    /// Sender for notifications delivered to every Orch's
    /// `on_notification`.
    pub fn notification_sender(&self) -> mpsc::Sender<String> {
        self.notif_tx.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.running))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.orchs
            .values()
            .flatten()
            .filter_map(|orch| orch.next_timer_deadline())
            .min()
    }

    /// One pass: pending tasks in priority order, then expired timers.
    pub async fn run_once(&mut self) {
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                if orch.has_pending_tasks() {
                    debug!("Processing tasks for {}", orch.name());
                    orch.do_task().await;
                }
            }
        }

        let now = Instant::now();
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                if orch.next_timer_deadline().is_some_and(|deadline| deadline <= now) {
                    orch.on_timer();
                }
            }
        }
    }

    fn dispatch_notification(&mut self, notification: &str) {
        debug!("Notification: {}", notification);
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                orch.on_notification(notification);
            }
        }
    }

    /// Runs the event loop until [`StopHandle::stop`] is called.
    pub async fn run(&mut self) {
        info!("Starting OrchDaemon event loop");
        self.running.store(true, Ordering::SeqCst);

        let record = AuditRecord::new(AuditCategory::SystemLifecycle, "OrchDaemon", "event_loop_started")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "heartbeat_interval_ms": self.config.heartbeat_interval_ms,
                "orch_count": self.orchs.values().map(Vec::len).sum::<usize>(),
            }));
        audit_log!(record);

        let heartbeat = Duration::from_millis(self.config.heartbeat_interval_ms);

        while self.is_running() {
            self.run_once().await;

            let mut sleep = heartbeat;
            if let Some(deadline) = self.next_deadline() {
                sleep = sleep.min(deadline.saturating_duration_since(Instant::now()));
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                notification = self.notif_rx.recv() => match notification {
                    Some(notification) => self.dispatch_notification(&notification),
                    None => warn!("Notification channel closed"),
                },
            }
        }

        info!("OrchDaemon event loop stopped");

        let stop_record = AuditRecord::new(AuditCategory::SystemLifecycle, "OrchDaemon", "event_loop_stopped")
            .with_outcome(AuditOutcome::Success);
        audit_log!(stop_record);
    }

    /// Dumps state for debugging.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!("OrchDaemon running: {}", self.is_running()));

        for (priority, orchs) in &self.orchs {
            for orch in orchs {
                lines.push(format!(
                    "  [{:3}] {} - {} pending",
                    priority,
                    orch.name(),
                    orch.dump_pending_tasks().len()
                ));
            }
        }

        lines
    }
}
