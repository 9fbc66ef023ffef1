//! Per-chat job scheduler.
//!
//! - `run_once` fires the notification pipeline once after a short delay
//! - `run_daily` fires it every day at a fixed UTC time (one daily job per chat;
//!   calling it again replaces the previous job)
//! - `cancel` stops every job of a chat; a run already in progress finishes
//! - `restore` re-arms daily jobs from the persisted store after a restart
//!
//! Jobs are tokio tasks guarded by a `CancellationToken`; handles are never persisted.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    domain::{ChatId, DailyTime},
    notifier::Notifier,
    store::SubscriptionStore,
    Result,
};

/// Snapshot of a chat's jobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChatJobStatus {
    pub pending_runs: usize,
    pub daily: Option<DailyTime>,
}

impl ChatJobStatus {
    pub fn is_idle(&self) -> bool {
        self.pending_runs == 0 && self.daily.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DailyOutcome {
    Started,
    Replaced { previous: DailyTime },
}

#[derive(Clone)]
pub struct ScheduleManager {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    notifier: Arc<Notifier>,
    store: Arc<SubscriptionStore>,
    run_once_delay: Duration,
    next_job_id: AtomicU64,
    state: Mutex<HashMap<ChatId, ChatJobs>>,
}

#[derive(Default)]
struct ChatJobs {
    one_shot: HashMap<u64, JobEntry>,
    daily: Option<DailyJob>,
}

impl ChatJobs {
    fn is_empty(&self) -> bool {
        self.one_shot.is_empty() && self.daily.is_none()
    }
}

struct JobEntry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl JobEntry {
    /// Prevent future firings. A run in progress is left to finish.
    fn cancel(self) {
        self.cancel.cancel();
    }
}

struct DailyJob {
    at: DailyTime,
    job: JobEntry,
}

impl ScheduleManager {
    pub fn new(
        notifier: Arc<Notifier>,
        store: Arc<SubscriptionStore>,
        run_once_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                notifier,
                store,
                run_once_delay,
                next_job_id: AtomicU64::new(1),
                state: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Schedule a single run after the configured delay. Returns the job id.
    pub async fn run_once(&self, chat_id: ChatId) -> u64 {
        let id = self.inner.next_job_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let delay = self.inner.run_once_delay;

        // Hold the state lock across spawn + insert so the task cannot try to
        // deregister itself before it is registered.
        let mut st = self.inner.state.lock().await;
        let scheduler = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
              _ = token.cancelled() => {
                debug!(chat_id = chat_id.0, job_id = id, "one-shot run cancelled");
                return;
              }
              _ = sleep(delay) => {}
            }
            scheduler.inner.notifier.notify_chat(chat_id).await;
            scheduler.finish_one_shot(chat_id, id).await;
        });
        st.entry(chat_id)
            .or_default()
            .one_shot
            .insert(id, JobEntry { cancel, handle });

        info!(
            chat_id = chat_id.0,
            job_id = id,
            delay_ms = delay.as_millis() as u64,
            "one-shot run scheduled"
        );
        id
    }

    /// Register the chat's daily job at `at` (UTC), replacing any existing one.
    ///
    /// The time is persisted first; if that fails no job is touched.
    pub async fn run_daily(&self, chat_id: ChatId, at: DailyTime) -> Result<DailyOutcome> {
        self.inner.store.set_daily(chat_id, Some(at))?;
        let previous = self.arm_daily(chat_id, at).await;
        Ok(match previous {
            Some(previous) => DailyOutcome::Replaced { previous },
            None => DailyOutcome::Started,
        })
    }

    /// Cancel every job of the chat. Returns how many jobs were cancelled.
    pub async fn cancel(&self, chat_id: ChatId) -> usize {
        let jobs = {
            let mut st = self.inner.state.lock().await;
            st.remove(&chat_id)
        };
        let Some(jobs) = jobs else {
            return 0;
        };

        let mut cancelled = 0usize;
        for (_, job) in jobs.one_shot {
            job.cancel();
            cancelled += 1;
        }
        if let Some(daily) = jobs.daily {
            daily.job.cancel();
            cancelled += 1;
        }
        info!(chat_id = chat_id.0, cancelled, "jobs cancelled");
        cancelled
    }

    /// Re-arm daily jobs for every chat with a persisted daily time.
    pub async fn restore(&self) -> usize {
        let schedules = self.inner.store.daily_schedules();
        for (chat_id, at) in &schedules {
            self.arm_daily(*chat_id, *at).await;
        }
        if !schedules.is_empty() {
            info!(count = schedules.len(), "daily jobs restored");
        }
        schedules.len()
    }

    pub async fn status(&self, chat_id: ChatId) -> ChatJobStatus {
        let st = self.inner.state.lock().await;
        st.get(&chat_id)
            .map(|jobs| ChatJobStatus {
                pending_runs: jobs.one_shot.len(),
                daily: jobs.daily.as_ref().map(|d| d.at),
            })
            .unwrap_or_default()
    }

    /// Abort every task (process shutdown).
    pub async fn shutdown(&self) {
        let mut st = self.inner.state.lock().await;
        for (_, jobs) in st.drain() {
            for (_, job) in jobs.one_shot {
                job.cancel.cancel();
                job.handle.abort();
            }
            if let Some(daily) = jobs.daily {
                daily.job.cancel.cancel();
                daily.job.handle.abort();
            }
        }
    }

    async fn arm_daily(&self, chat_id: ChatId, at: DailyTime) -> Option<DailyTime> {
        let cancel = CancellationToken::new();
        let scheduler = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler.daily_loop(chat_id, at, token).await;
        });

        let previous = {
            let mut st = self.inner.state.lock().await;
            st.entry(chat_id).or_default().daily.replace(DailyJob {
                at,
                job: JobEntry { cancel, handle },
            })
        };

        let previous = previous.map(|old| {
            old.job.cancel();
            old.at
        });
        match previous {
            Some(old) => info!(chat_id = chat_id.0, from = %old, to = %at, "daily job replaced"),
            None => info!(chat_id = chat_id.0, at = %at, "daily job started"),
        }
        previous
    }

    async fn daily_loop(&self, chat_id: ChatId, at: DailyTime, cancel: CancellationToken) {
        // Last slot fired; a timer waking slightly early must not fire the same slot twice.
        let mut last_slot: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            let from = last_slot.map_or(now, |slot| slot.max(now));
            let next = next_daily_after(from, at);
            let dur = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(chat_id = chat_id.0, next = %next, "daily job sleeping");

            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = sleep(dur) => {
                info!(chat_id = chat_id.0, at = %at, "daily job firing");
                self.inner.notifier.notify_chat(chat_id).await;
                last_slot = Some(next);
              }
            }
        }
        debug!(chat_id = chat_id.0, "daily job stopped");
    }

    async fn finish_one_shot(&self, chat_id: ChatId, id: u64) {
        let mut st = self.inner.state.lock().await;
        let Some(jobs) = st.get_mut(&chat_id) else {
            return;
        };
        if jobs.one_shot.remove(&id).is_none() {
            warn!(chat_id = chat_id.0, job_id = id, "finished job was not registered");
        }
        if jobs.is_empty() {
            st.remove(&chat_id);
        }
    }
}

/// The first instant strictly after `now` whose UTC wall clock reads `at`.
pub fn next_daily_after(now: DateTime<Utc>, at: DailyTime) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(at.hour(), at.minute(), 0)
        .map(|t| t.and_utc());
    match today {
        Some(t) if t > now => t,
        Some(t) => t + chrono::Duration::days(1),
        // DailyTime is range-checked, so this cannot happen; fall back to a day later.
        None => now + chrono::Duration::days(1),
    }
}
