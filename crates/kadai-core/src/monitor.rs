//! Due-date monitor.
//!
//! [`scan`] is the pure decision: which tasks have just entered the
//! warning window. [`DueMonitor`] runs it on a timer, dispatches one
//! notification per hit through a [`Notifier`], and records
//! `overdue_notified` through [`DataStore::mutate`].
//!
//! A flag is only written when the permission oracle allows notifying and
//! the dispatch succeeded, so a task that could not be announced is picked
//! up again on the next scan.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::datastore::DataStore;
use crate::task::{Task, TaskId};

/// Period between scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Lookahead before a deadline during which one warning may fire.
pub const WARNING_WINDOW_MINUTES: i64 = 60;

pub const NOTIFICATION_TITLE: &str = "Task due soon";
pub const NOTIFICATION_TITLE_JA: &str = "タスクの期限が近づいています";

pub fn default_warning_window() -> chrono::Duration {
    chrono::Duration::minutes(WARNING_WINDOW_MINUTES)
}

/// Notification state of one task at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueState {
    /// No deadline set.
    NoDeadline,
    /// Deadline beyond the warning window.
    Pending,
    /// Inside the window and not yet announced.
    Warning,
    /// Already announced for this deadline.
    Notified,
    /// Deadline passed without an announcement; nothing fires.
    Lapsed,
    /// Completed.
    Done,
}

pub fn classify(task: &Task, now: DateTime<Utc>, window: chrono::Duration) -> DueState {
    if task.completed {
        return DueState::Done;
    }
    let Some(due) = task.due_date_time else {
        return DueState::NoDeadline;
    };
    if task.overdue_notified {
        return DueState::Notified;
    }

    let remaining = due - now;
    if remaining <= chrono::Duration::zero() {
        DueState::Lapsed
    } else if remaining <= window {
        DueState::Warning
    } else {
        DueState::Pending
    }
}

/// Ids that should move to notified during this scan, using the default
/// one-hour window.
pub fn scan(tasks: &[Task], now: DateTime<Utc>) -> BTreeSet<TaskId> {
    scan_within(tasks, now, default_warning_window())
}

pub fn scan_within(
    tasks: &[Task],
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> BTreeSet<TaskId> {
    tasks
        .iter()
        .filter(|task| classify(task, now, window) == DueState::Warning)
        .map(|task| task.id)
        .collect()
}

/// Language of the notification title and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationLanguage {
    #[default]
    English,
    Japanese,
}

impl NotificationLanguage {
    /// Japanese for `ja` and its regional variants, English otherwise.
    pub fn for_locale(locale: &str) -> Self {
        let primary = locale
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if primary == "ja" {
            Self::Japanese
        } else {
            Self::English
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::English => NOTIFICATION_TITLE,
            Self::Japanese => NOTIFICATION_TITLE_JA,
        }
    }

    pub fn body(self, task: &Task, window: chrono::Duration) -> String {
        let text = task.text.trim();
        match self {
            Self::English => {
                let label = if text.is_empty() {
                    format!("Task {}", task.id)
                } else {
                    text.to_string()
                };
                format!("{label} is due within {}", describe_window(window))
            }
            Self::Japanese => {
                let label = if text.is_empty() {
                    format!("タスク{}", task.id)
                } else {
                    text.to_string()
                };
                format!("{label}の期限が{}以内です", describe_window_ja(window))
            }
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Notification sink. Errors are caught by the monitor.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> anyhow::Result<()>;
}

pub trait PermissionOracle: Send + Sync {
    fn is_notification_permitted(&self) -> bool;
}

/// Permission that never changes, e.g. from a config switch.
#[derive(Debug, Clone, Copy)]
pub struct FixedPermission(pub bool);

impl PermissionOracle for FixedPermission {
    fn is_notification_permitted(&self) -> bool {
        self.0
    }
}

/// Outcome of one [`DueMonitor::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tasks the scan selected.
    pub candidates: Vec<TaskId>,
    /// Dispatched successfully.
    pub notified: Vec<TaskId>,
    /// Dispatch returned an error.
    pub failed: Vec<TaskId>,
    /// Skipped because notifications are not permitted.
    pub suppressed: Vec<TaskId>,
    /// `overdue_notified` written for these.
    pub committed: Vec<TaskId>,
}

pub struct DueMonitor {
    store: Arc<DataStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    permission: Arc<dyn PermissionOracle>,
    interval: Duration,
    window: chrono::Duration,
    language: NotificationLanguage,
}

impl DueMonitor {
    pub fn new(
        store: Arc<DataStore>,
        notifier: Arc<dyn Notifier>,
        permission: Arc<dyn PermissionOracle>,
    ) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            notifier,
            permission,
            interval: DEFAULT_SCAN_INTERVAL,
            window: default_warning_window(),
            language: NotificationLanguage::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        // tokio intervals reject a zero period.
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_window(mut self, window: chrono::Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_language(mut self, language: NotificationLanguage) -> Self {
        self.language = language;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One complete scan: snapshot, decide, dispatch, record. Runs to
    /// completion without yielding; every failure is logged and absorbed.
    #[tracing::instrument(skip(self))]
    pub fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let tasks = self.store.tasks();
        let due = scan_within(&tasks, now, self.window);

        let mut report = TickReport {
            candidates: due.iter().copied().collect(),
            ..TickReport::default()
        };
        if due.is_empty() {
            debug!(scanned = tasks.len(), "no tasks entering the warning window");
            return report;
        }

        if !self.permission.is_notification_permitted() {
            debug!(
                count = due.len(),
                "notifications not permitted; leaving tasks unmarked"
            );
            report.suppressed = report.candidates.clone();
            return report;
        }

        let title = self.language.title();
        for task in tasks.iter().filter(|task| due.contains(&task.id)) {
            let body = self.language.body(task, self.window);
            match self.notifier.notify(title, &body) {
                Ok(()) => {
                    debug!(task_id = task.id, "dispatched due notification");
                    report.notified.push(task.id);
                }
                Err(err) => {
                    error!(task_id = task.id, error = %err, "failed to dispatch due notification");
                    report.failed.push(task.id);
                }
            }
        }

        if report.notified.is_empty() {
            return report;
        }
        if !self.permission.is_notification_permitted() {
            warn!(
                count = report.notified.len(),
                "notification permission revoked mid-scan; not recording"
            );
            return report;
        }

        let notified: BTreeSet<TaskId> = report.notified.iter().copied().collect();
        let window = self.window;
        // Re-checked against fresh state: an edit since the snapshot may
        // have moved the deadline.
        let committed = self.store.mutate(|state| {
            let mut committed = Vec::new();
            for task in state
                .tasks
                .iter_mut()
                .filter(|task| notified.contains(&task.id))
            {
                if classify(task, now, window) == DueState::Warning {
                    task.overdue_notified = true;
                    committed.push(task.id);
                }
            }
            Ok(committed)
        });

        match committed {
            Ok(ids) => report.committed = ids,
            Err(err) => error!(error = %err, "failed to record notified tasks"),
        }

        info!(
            candidates = report.candidates.len(),
            notified = report.notified.len(),
            failed = report.failed.len(),
            committed = report.committed.len(),
            "due-date scan finished"
        );
        report
    }

    /// Spawns the scan loop on the current tokio runtime: one scan right
    /// away, then one per interval until the returned handle is stopped or
    /// dropped.
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs_f64(), "due-date monitor started");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!("due-date monitor stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick();
                    }
                }
            }
        });

        MonitorHandle {
            cancel,
            join: Some(join),
        }
    }
}

/// Owns a running monitor loop. Dropping it cancels the loop.
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Cancels the loop and waits for it to exit. No scan starts after
    /// this returns.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take()
            && let Err(err) = join.await
        {
            warn!(error = %err, "due-date monitor task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn describe_window(window: chrono::Duration) -> String {
    let minutes = window.num_minutes();
    match minutes {
        60 => "1 hour".to_string(),
        m if m > 0 && m % 60 == 0 => format!("{} hours", m / 60),
        1 => "1 minute".to_string(),
        m => format!("{m} minutes"),
    }
}

fn describe_window_ja(window: chrono::Duration) -> String {
    match window.num_minutes() {
        m if m > 0 && m % 60 == 0 => format!("{}時間", m / 60),
        m => format!("{m}分"),
    }
}
