//! Scheduled-message engine
//!
//! Delayed one-shot and recurring messages that feed the queue. Each active
//! entry owns one timer task; rescheduling an id cancels its previous
//! timer. Auto-assignment entries do not enqueue directly — they funnel
//! through a sequential worker with a settle gap, so two timers firing
//! together cannot interleave their effects.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AUTO_ASSIGN_SETTLE_DELAY;
use crate::queue::{MessageQueue, NewMessage, SourceMetadata};

const STORE_VERSION: u32 = 1;

/// Unit of a scheduled delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

/// How a fired entry is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Enqueue directly when the timer fires
    #[default]
    Reminder,
    /// Route through the sequential auto-assignment worker
    AutoAssign,
}

/// A persisted scheduled message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_project: Option<String>,
    pub body: String,
    pub delay_amount: u64,
    pub delay_unit: DelayUnit,
    pub is_recurring: bool,
    pub is_active: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub kind: ScheduleKind,
}

impl ScheduledMessage {
    /// The configured delay as a wall-clock duration
    pub fn delay(&self) -> Duration {
        match self.delay_unit {
            DelayUnit::Milliseconds => Duration::from_millis(self.delay_amount),
            DelayUnit::Seconds => Duration::from_secs(self.delay_amount),
            DelayUnit::Minutes => Duration::from_secs(self.delay_amount * 60),
            DelayUnit::Hours => Duration::from_secs(self.delay_amount * 3600),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    version: u32,
    saved_at: DateTime<Utc>,
    messages: Vec<ScheduledMessage>,
}

/// JSON-file-backed store of scheduled messages
pub struct ScheduledMessageStore {
    path: PathBuf,
    inner: Mutex<HashMap<Uuid, ScheduledMessage>>,
}

impl ScheduledMessageStore {
    /// Open the store, loading any existing file
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut messages = HashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read '{}'", path.display()))?;
            let file: StoreFile = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse '{}'", path.display()))?;
            if file.version == STORE_VERSION {
                messages = file.messages.into_iter().map(|m| (m.id, m)).collect();
            } else {
                tracing::warn!(
                    version = file.version,
                    "unknown scheduled-message store version, starting empty"
                );
            }
        }
        Ok(Self {
            path,
            inner: Mutex::new(messages),
        })
    }

    pub fn upsert(&self, message: ScheduledMessage) -> Result<()> {
        self.inner.lock().unwrap().insert(message.id, message);
        self.persist()
    }

    pub fn get(&self, id: Uuid) -> Option<ScheduledMessage> {
        self.inner.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: Uuid) -> Result<()> {
        self.inner.lock().unwrap().remove(&id);
        self.persist()
    }

    /// Record a firing durably
    pub fn set_run_times(
        &self,
        id: Uuid,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(message) = inner.get_mut(&id) {
                message.last_run = last_run;
                message.next_run = next_run;
            }
        }
        self.persist()
    }

    /// Flip a one-shot entry off durably
    pub fn deactivate(&self, id: Uuid) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(message) = inner.get_mut(&id) {
                message.is_active = false;
            }
        }
        self.persist()
    }

    /// All entries still eligible to fire
    pub fn load_active(&self) -> Vec<ScheduledMessage> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.is_active)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<ScheduledMessage> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    fn persist(&self) -> Result<()> {
        let mut messages: Vec<ScheduledMessage> =
            self.inner.lock().unwrap().values().cloned().collect();
        messages.sort_by_key(|m| m.id);
        let file = StoreFile {
            version: STORE_VERSION,
            saved_at: Utc::now(),
            messages,
        };
        let parent = self.path.parent().context("store path has no parent")?;
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(serde_json::to_string_pretty(&file)?.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| anyhow::anyhow!("rename failed: {}", e))?;
        Ok(())
    }
}

/// Arms timers for scheduled messages and feeds firings into the queue
pub struct MessageScheduler {
    queue: Arc<MessageQueue>,
    store: Arc<ScheduledMessageStore>,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    auto_assign_tx: mpsc::Sender<ScheduledMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MessageScheduler {
    pub fn new(queue: Arc<MessageQueue>, store: Arc<ScheduledMessageStore>) -> Self {
        Self::with_settle_delay(queue, store, AUTO_ASSIGN_SETTLE_DELAY)
    }

    pub fn with_settle_delay(
        queue: Arc<MessageQueue>,
        store: Arc<ScheduledMessageStore>,
        settle: Duration,
    ) -> Self {
        let (auto_assign_tx, mut auto_assign_rx) = mpsc::channel::<ScheduledMessage>(32);
        let worker_queue = Arc::clone(&queue);
        let worker = tokio::spawn(async move {
            while let Some(message) = auto_assign_rx.recv().await {
                Self::enqueue_now(&worker_queue, &message);
                tokio::time::sleep(settle).await;
            }
        });
        Self {
            queue,
            store,
            timers: Mutex::new(HashMap::new()),
            auto_assign_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Arm (or re-arm) the timer for a message. Any prior timer for the
    /// same id is cancelled first. Inactive entries only clear the timer.
    pub fn schedule_message(&self, message: ScheduledMessage) -> Result<()> {
        self.cancel_message(message.id);
        if !message.is_active {
            return Ok(());
        }

        let delay = message.delay();
        let mut stored = message.clone();
        stored.next_run = Some(Utc::now() + chrono::Duration::from_std(delay)?);
        self.store.upsert(stored)?;

        let queue = Arc::clone(&self.queue);
        let store = Arc::clone(&self.store);
        let auto_assign_tx = self.auto_assign_tx.clone();
        let message_id = message.id;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                let now = Utc::now();
                match message.kind {
                    ScheduleKind::AutoAssign => {
                        if auto_assign_tx.send(message.clone()).await.is_err() {
                            tracing::warn!(schedule = %message.name, "auto-assign worker gone");
                            break;
                        }
                    }
                    ScheduleKind::Reminder => Self::enqueue_now(&queue, &message),
                }
                if message.is_recurring {
                    let next = now
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    if let Err(e) = store.set_run_times(message.id, Some(now), Some(next)) {
                        tracing::warn!(schedule = %message.name, error = %e, "run-time update failed");
                    }
                } else {
                    if let Err(e) = store.set_run_times(message.id, Some(now), None) {
                        tracing::warn!(schedule = %message.name, error = %e, "run-time update failed");
                    }
                    if let Err(e) = store.deactivate(message.id) {
                        tracing::warn!(schedule = %message.name, error = %e, "deactivate failed");
                    }
                    break;
                }
            }
        });
        self.timers.lock().unwrap().insert(message_id, handle);
        Ok(())
    }

    fn enqueue_now(queue: &MessageQueue, message: &ScheduledMessage) {
        let result = queue.enqueue(NewMessage {
            content: message.body.clone(),
            conversation_id: format!("scheduled:{}", message.name),
            metadata: SourceMetadata::SystemEvent,
        });
        match result {
            Ok(id) => {
                tracing::info!(schedule = %message.name, queued = %id, "scheduled message fired")
            }
            Err(e) => {
                tracing::warn!(schedule = %message.name, error = %e, "scheduled enqueue failed")
            }
        }
    }

    /// Cancel the timer for one entry
    pub fn cancel_message(&self, id: Uuid) {
        if let Some(handle) = self.timers.lock().unwrap().remove(&id) {
            handle.abort();
        }
    }

    /// Cancel every armed timer
    pub fn cancel_all_messages(&self) {
        let mut timers = self.timers.lock().unwrap();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// Cancel all timers, reload active entries from the store, re-arm
    pub fn reschedule_all_messages(&self) -> Result<()> {
        self.cancel_all_messages();
        for message in self.store.load_active() {
            self.schedule_message(message)?;
        }
        Ok(())
    }

    /// Tear everything down, including the auto-assign worker
    pub fn cleanup(&self) {
        self.cancel_all_messages();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            worker.abort();
        }
    }

    /// Number of armed timers
    pub fn active_timer_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }
}

impl Drop for MessageScheduler {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueEvent;

    fn fast_entry(name: &str, recurring: bool, kind: ScheduleKind) -> ScheduledMessage {
        ScheduledMessage {
            id: Uuid::new_v4(),
            name: name.to_string(),
            target_team: None,
            target_project: None,
            body: format!("run {name}"),
            delay_amount: 10,
            delay_unit: DelayUnit::Milliseconds,
            is_recurring: recurring,
            is_active: true,
            last_run: None,
            next_run: None,
            kind,
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> Arc<ScheduledMessageStore> {
        Arc::new(ScheduledMessageStore::new(dir.path().join("scheduled-messages.json")).unwrap())
    }

    async fn wait_enqueued(queue: &MessageQueue, count: usize) {
        let mut events = queue.subscribe();
        let mut seen = 0;
        tokio::time::timeout(Duration::from_secs(2), async {
            while seen < count {
                if let Ok(QueueEvent::Enqueued { .. }) = events.recv().await {
                    seen += 1;
                }
            }
        })
        .await
        .expect("scheduled messages did not fire in time");
    }

    #[tokio::test]
    async fn test_one_shot_fires_once_and_deactivates() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(MessageQueue::new());
        let store = store_in(&dir);
        let scheduler = MessageScheduler::with_settle_delay(
            Arc::clone(&queue),
            Arc::clone(&store),
            Duration::from_millis(1),
        );

        let message = fast_entry("standup", false, ScheduleKind::Reminder);
        let id = message.id;
        scheduler.schedule_message(message).unwrap();
        wait_enqueued(&queue, 1).await;

        // Durably deactivated; no second firing possible on reschedule.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.pending_len(), 1);
        let stored = store.get(id).unwrap();
        assert!(!stored.is_active);
        assert!(stored.last_run.is_some());
        assert!(stored.next_run.is_none());
    }

    #[tokio::test]
    async fn test_recurring_fires_repeatedly_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(MessageQueue::new());
        let store = store_in(&dir);
        let scheduler = MessageScheduler::with_settle_delay(
            Arc::clone(&queue),
            Arc::clone(&store),
            Duration::from_millis(1),
        );

        let message = fast_entry("poll", true, ScheduleKind::Reminder);
        let id = message.id;
        scheduler.schedule_message(message).unwrap();
        wait_enqueued(&queue, 3).await;

        scheduler.cancel_message(id);
        let settled = queue.pending_len();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.pending_len(), settled, "no firings after cancel");
        assert!(store.get(id).unwrap().is_active, "cancel does not deactivate");
    }

    #[tokio::test]
    async fn test_reschedule_replaces_prior_timer() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(MessageQueue::new());
        let scheduler = MessageScheduler::with_settle_delay(
            Arc::clone(&queue),
            store_in(&dir),
            Duration::from_millis(1),
        );

        let message = fast_entry("dup", true, ScheduleKind::Reminder);
        scheduler.schedule_message(message.clone()).unwrap();
        scheduler.schedule_message(message).unwrap();
        assert_eq!(scheduler.active_timer_count(), 1);
    }

    #[tokio::test]
    async fn test_reschedule_all_rearms_only_active_entries() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(MessageQueue::new());
        let store = store_in(&dir);

        let mut active = fast_entry("active", true, ScheduleKind::Reminder);
        active.delay_amount = 3600; // far future; we only count timers
        active.delay_unit = DelayUnit::Seconds;
        let mut inactive = active.clone();
        inactive.id = Uuid::new_v4();
        inactive.name = "inactive".to_string();
        inactive.is_active = false;
        store.upsert(active).unwrap();
        store.upsert(inactive).unwrap();

        let scheduler = MessageScheduler::with_settle_delay(
            Arc::clone(&queue),
            Arc::clone(&store),
            Duration::from_millis(1),
        );
        scheduler.reschedule_all_messages().unwrap();
        assert_eq!(scheduler.active_timer_count(), 1);
    }

    #[tokio::test]
    async fn test_auto_assign_executions_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(MessageQueue::new());
        let store = store_in(&dir);
        let settle = Duration::from_millis(40);
        let scheduler =
            MessageScheduler::with_settle_delay(Arc::clone(&queue), Arc::clone(&store), settle);

        // Two auto-assign timers firing at the same instant
        scheduler
            .schedule_message(fast_entry("assign-a", false, ScheduleKind::AutoAssign))
            .unwrap();
        scheduler
            .schedule_message(fast_entry("assign-b", false, ScheduleKind::AutoAssign))
            .unwrap();
        wait_enqueued(&queue, 2).await;

        let mut timestamps: Vec<_> = Vec::new();
        let mut head = queue.peek();
        while let Some(message) = head {
            timestamps.push(message.enqueued_at);
            queue.start_processing(message.id).unwrap();
            queue.complete(message.id, None).unwrap();
            head = queue.peek();
        }
        assert_eq!(timestamps.len(), 2);
        let gap = (timestamps[1] - timestamps[0])
            .to_std()
            .unwrap_or_default();
        assert!(
            gap >= settle - Duration::from_millis(5),
            "auto-assign firings were {gap:?} apart, settle is {settle:?}"
        );
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let message = fast_entry("persisted", true, ScheduleKind::Reminder);
        let id = message.id;
        store.upsert(message).unwrap();

        let reopened =
            ScheduledMessageStore::new(dir.path().join("scheduled-messages.json")).unwrap();
        let loaded = reopened.get(id).unwrap();
        assert_eq!(loaded.name, "persisted");
        assert!(loaded.is_recurring);
    }
}
