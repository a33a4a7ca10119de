//! Filesystem-backed durable queue with visibility leases and dead-letter
//! routing.
//!
//! Records are written with the temp-write/fsync/rename/dir-fsync sequence,
//! so an enqueue that has returned survives a crash. Redelivery state lives
//! beside each record in a small `.meta` file owned by the queue; visibility
//! leases are process-local, which means a restart simply makes every
//! unacked record deliverable again (at-least-once, by construction).
//!
//! Delivery guarantees:
//! - `enqueue` is durable before it returns and rejects duplicate delivery
//!   ids, including ids that have already been dead-lettered.
//! - `receive` hands out a record at most once per visibility window; the
//!   receive count is persisted before the message is handed out, so a
//!   crash mid-attempt still burns one delivery.
//! - after `max_receive_count` deliveries without an ack, the record moves
//!   to the `dead/` directory instead of being delivered again.
//!
//! Scan order is deterministic (sorted by delivery id); no cross-message
//! ordering is guaranteed.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::message::{delivery_id_is_safe, EventRecord, QueueMessage};
use crate::types::DeliveryId;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Duplicate delivery ID (already enqueued or dead-lettered).
    #[error("duplicate delivery ID: {0}")]
    DuplicateDelivery(DeliveryId),

    /// Delivery ID unsafe to use as a file name.
    #[error("invalid delivery ID: contains unsafe characters: {0}")]
    InvalidDeliveryId(DeliveryId),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Tuning knobs for the queue adapter.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a received message stays invisible before it is considered
    /// abandoned and redelivered.
    pub visibility_timeout: Duration,
    /// Maximum number of deliveries before a record is dead-lettered.
    pub max_receive_count: u32,
    /// How often a long-polling `receive` rescans when idle. Enqueues and
    /// nacks wake pollers immediately; this bound covers lease expiry.
    pub scan_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            visibility_timeout: Duration::from_secs(300),
            max_receive_count: 3,
            scan_interval: Duration::from_millis(500),
        }
    }
}

/// Redelivery state persisted beside each record.
#[derive(Debug, Serialize, Deserialize)]
struct ReceiveMeta {
    receive_count: u32,
}

/// A filesystem directory acting as a durable message queue.
///
/// Layout: `<dir>/<delivery-id>.json` per record, `<delivery-id>.json.meta`
/// for its receive count, and `<dir>/dead/` for records that exhausted
/// their redelivery budget.
pub struct DurableQueue {
    dir: PathBuf,
    dead_dir: PathBuf,
    config: QueueConfig,
    /// Active visibility leases: delivery id to lease expiry.
    leases: Mutex<HashMap<String, Instant>>,
    /// Wakes long-polling receivers on enqueue and nack.
    notify: Notify,
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DurableQueue {
    /// Opens (or creates) a queue rooted at `dir`.
    ///
    /// Removes temp files orphaned by a crash mid-enqueue. Must not be
    /// called twice on the same directory within one process; leases are
    /// tracked per instance.
    pub fn open(dir: impl Into<PathBuf>, config: QueueConfig) -> Result<Self> {
        let dir = dir.into();
        let dead_dir = dir.join("dead");
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(&dead_dir)?;

        // A .tmp file means a crash interrupted an enqueue before the
        // rename; the delivery was never acknowledged to the sender.
        let mut removed_any = false;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "tmp") && std::fs::remove_file(&path).is_ok() {
                removed_any = true;
            }
        }
        if removed_any {
            fsync_dir(&dir)?;
        }

        Ok(DurableQueue {
            dir,
            dead_dir,
            config,
            leases: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        })
    }

    /// Durably enqueues a record.
    ///
    /// Returns `DuplicateDelivery` when the delivery id is already present,
    /// either pending or dead-lettered. On success the record has been
    /// fsynced and its directory entry is durable.
    pub fn enqueue(&self, record: &EventRecord) -> Result<()> {
        if !delivery_id_is_safe(&record.delivery_id) {
            return Err(QueueError::InvalidDeliveryId(record.delivery_id.clone()));
        }

        let payload_path = self.payload_path(&record.delivery_id);
        if payload_path.exists() || self.dead_payload_path(&record.delivery_id).exists() {
            return Err(QueueError::DuplicateDelivery(record.delivery_id.clone()));
        }

        let bytes = serde_json::to_vec(record)?;
        atomic_write(&self.dir, &payload_path, &bytes)?;

        debug!(delivery_id = %record.delivery_id, event_type = %record.event_type, "enqueued");
        self.notify.notify_waiters();
        Ok(())
    }

    /// Receives zero or one message, long-polling up to `max_wait`.
    ///
    /// The returned message is invisible to other receivers until its
    /// visibility timeout lapses or it is nacked. Its receive count has
    /// already been persisted, so abandoning the message still consumed one
    /// delivery from its budget.
    pub async fn receive(&self, max_wait: Duration) -> Result<Option<QueueMessage>> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(message) = self.try_receive()? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(self.config.scan_interval);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Single non-blocking scan: claims and returns the first available
    /// record, dead-lettering exhausted or unreadable ones along the way.
    fn try_receive(&self) -> Result<Option<QueueMessage>> {
        for delivery_id in self.pending_ids()? {
            if !self.claim(&delivery_id) {
                continue;
            }

            match self.deliver_claimed(&delivery_id) {
                Ok(Some(message)) => return Ok(Some(message)),
                Ok(None) => {
                    // Dead-lettered during delivery; claim entry is stale
                    // but harmless, drop it.
                    self.release(&delivery_id);
                }
                Err(err) => {
                    self.release(&delivery_id);
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    /// Finishes delivery of a claimed record: bumps the persisted receive
    /// count, dead-letters on budget exhaustion or corruption.
    fn deliver_claimed(&self, delivery_id: &DeliveryId) -> Result<Option<QueueMessage>> {
        let receive_count = self.read_receive_count(delivery_id)? + 1;
        if receive_count > self.config.max_receive_count {
            warn!(
                delivery_id = %delivery_id,
                receive_count = receive_count - 1,
                "redelivery budget exhausted, dead-lettering"
            );
            self.dead_letter(delivery_id)?;
            return Ok(None);
        }

        // Persist the count before handing the message out, so a crash
        // mid-attempt still burns one delivery.
        self.write_receive_count(delivery_id, receive_count)?;

        let bytes = std::fs::read(self.payload_path(delivery_id))?;
        let record: EventRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!(delivery_id = %delivery_id, error = %err, "unreadable record, dead-lettering");
                self.dead_letter(delivery_id)?;
                return Ok(None);
            }
        };

        Ok(Some(QueueMessage {
            record,
            receive_count,
        }))
    }

    /// Acknowledges a message, deleting its record. Idempotent: acking an
    /// already-deleted message is a no-op.
    pub fn ack(&self, message: &QueueMessage) -> Result<()> {
        let delivery_id = message.delivery_id();
        remove_if_exists(&self.payload_path(delivery_id))?;
        remove_if_exists(&self.meta_path(delivery_id))?;
        fsync_dir(&self.dir)?;
        self.release(delivery_id);
        debug!(delivery_id = %delivery_id, "acked");
        Ok(())
    }

    /// Explicitly abandons a message, lifting its visibility lease so it is
    /// immediately redeliverable. The receive count stays burned.
    pub fn nack(&self, message: &QueueMessage) {
        self.release(message.delivery_id());
        self.notify.notify_waiters();
        debug!(delivery_id = %message.delivery_id(), "nacked");
    }

    /// Number of records currently pending (leased ones included).
    pub fn depth(&self) -> Result<usize> {
        Ok(self.pending_ids()?.len())
    }

    /// Delivery ids currently parked in the dead-letter directory.
    pub fn dead_letter_ids(&self) -> Result<Vec<DeliveryId>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dead_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(DeliveryId::new(stem));
                }
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    // ─── Lease bookkeeping ───

    /// Claims a record for delivery. Returns false when another receiver
    /// holds an unexpired lease on it.
    fn claim(&self, delivery_id: &DeliveryId) -> bool {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        match leases.get(delivery_id.as_str()) {
            Some(expiry) if *expiry > now => false,
            _ => {
                leases.insert(
                    delivery_id.as_str().to_string(),
                    now + self.config.visibility_timeout,
                );
                true
            }
        }
    }

    fn release(&self, delivery_id: &DeliveryId) {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.remove(delivery_id.as_str());
    }

    // ─── Paths and sidecar state ───

    fn payload_path(&self, delivery_id: &DeliveryId) -> PathBuf {
        self.dir.join(format!("{}.json", delivery_id.as_str()))
    }

    fn meta_path(&self, delivery_id: &DeliveryId) -> PathBuf {
        self.dir.join(format!("{}.json.meta", delivery_id.as_str()))
    }

    fn dead_payload_path(&self, delivery_id: &DeliveryId) -> PathBuf {
        self.dead_dir.join(format!("{}.json", delivery_id.as_str()))
    }

    /// All pending delivery ids, sorted for deterministic scan order.
    fn pending_ids(&self) -> Result<Vec<DeliveryId>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_dir() {
                continue;
            }
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(DeliveryId::new(stem));
                }
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    fn read_receive_count(&self, delivery_id: &DeliveryId) -> Result<u32> {
        match std::fs::read(self.meta_path(delivery_id)) {
            Ok(bytes) => {
                let meta: ReceiveMeta = serde_json::from_slice(&bytes)?;
                Ok(meta.receive_count)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn write_receive_count(&self, delivery_id: &DeliveryId, receive_count: u32) -> Result<()> {
        let bytes = serde_json::to_vec(&ReceiveMeta { receive_count })?;
        atomic_write(&self.dir, &self.meta_path(delivery_id), &bytes)
    }

    /// Moves a record and its meta into the dead-letter directory.
    fn dead_letter(&self, delivery_id: &DeliveryId) -> Result<()> {
        std::fs::rename(
            self.payload_path(delivery_id),
            self.dead_payload_path(delivery_id),
        )?;
        let meta = self.meta_path(delivery_id);
        if meta.exists() {
            let dead_meta = self
                .dead_dir
                .join(format!("{}.json.meta", delivery_id.as_str()));
            std::fs::rename(meta, dead_meta)?;
        }
        fsync_dir(&self.dead_dir)?;
        fsync_dir(&self.dir)?;
        Ok(())
    }
}

// ─── Filesystem helpers ───

/// Writes `bytes` to `path` atomically and durably: temp file, fsync,
/// rename, directory fsync.
fn atomic_write(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    });
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp_path, path)?;
    fsync_dir(dir)?;
    Ok(())
}

/// Syncs a directory so entry creations, renames, and deletions survive a
/// power loss.
fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir: File = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn test_config() -> QueueConfig {
        QueueConfig {
            visibility_timeout: Duration::from_millis(40),
            max_receive_count: 3,
            scan_interval: Duration::from_millis(5),
        }
    }

    fn record(id: &str) -> EventRecord {
        EventRecord {
            event_type: "check_suite".to_string(),
            action: "requested".to_string(),
            delivery_id: DeliveryId::new(id),
            payload: serde_json::json!({"n": id}),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_receive_roundtrip() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        queue.enqueue(&record("d-1")).unwrap();

        let message = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(message.record, record_with_time(&message, "d-1"));
        assert_eq!(message.receive_count, 1);
    }

    /// Rebuilds the expected record with the received timestamp, which is
    /// set at enqueue time and not controlled by the test.
    fn record_with_time(message: &QueueMessage, id: &str) -> EventRecord {
        EventRecord {
            received_at: message.record.received_at,
            ..record(id)
        }
    }

    #[tokio::test]
    async fn duplicate_enqueue_rejected() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        queue.enqueue(&record("d-1")).unwrap();
        let err = queue.enqueue(&record("d-1")).unwrap_err();
        assert!(matches!(err, QueueError::DuplicateDelivery(_)));
    }

    #[tokio::test]
    async fn unsafe_delivery_id_rejected() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        let err = queue.enqueue(&record("../escape")).unwrap_err();
        assert!(matches!(err, QueueError::InvalidDeliveryId(_)));
    }

    #[tokio::test]
    async fn empty_queue_times_out_with_none() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        let start = Instant::now();
        let result = queue.receive(Duration::from_millis(20)).await.unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn ack_deletes_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        queue.enqueue(&record("d-1")).unwrap();
        let message = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();

        queue.ack(&message).unwrap();
        queue.ack(&message).unwrap();

        assert_eq!(queue.depth().unwrap(), 0);
        assert!(queue.receive(Duration::from_millis(15)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leased_message_is_invisible_until_timeout() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        queue.enqueue(&record("d-1")).unwrap();
        let first = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(first.receive_count, 1);

        // Within the visibility window the record is claimed.
        assert!(queue.receive(Duration::from_millis(10)).await.unwrap().is_none());

        // After the window lapses it comes back with a bumped count.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(second.delivery_id(), first.delivery_id());
        assert_eq!(second.receive_count, 2);
    }

    #[tokio::test]
    async fn nack_makes_immediately_redeliverable() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        queue.enqueue(&record("d-1")).unwrap();
        let first = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        queue.nack(&first);

        let second = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(second.receive_count, 2);
    }

    #[tokio::test]
    async fn exhausted_message_is_dead_lettered_not_redelivered() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        queue.enqueue(&record("d-1")).unwrap();
        for expected in 1..=3 {
            let message = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
            assert_eq!(message.receive_count, expected);
            queue.nack(&message);
        }

        // Fourth delivery attempt routes to the dead-letter directory.
        assert!(queue.receive(Duration::from_millis(20)).await.unwrap().is_none());
        assert_eq!(queue.depth().unwrap(), 0);
        assert_eq!(queue.dead_letter_ids().unwrap(), vec![DeliveryId::new("d-1")]);

        // The payload itself is preserved for inspection.
        let dead = dir.path().join("dead").join("d-1.json");
        let bytes = std::fs::read(dead).unwrap();
        let parsed: EventRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.delivery_id, DeliveryId::new("d-1"));
    }

    #[tokio::test]
    async fn dead_lettered_id_cannot_be_re_enqueued() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        queue.enqueue(&record("d-1")).unwrap();
        for _ in 0..3 {
            let message = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
            queue.nack(&message);
        }
        assert!(queue.receive(Duration::from_millis(20)).await.unwrap().is_none());

        let err = queue.enqueue(&record("d-1")).unwrap_err();
        assert!(matches!(err, QueueError::DuplicateDelivery(_)));
    }

    #[tokio::test]
    async fn long_poll_wakes_on_enqueue() {
        let dir = tempdir().unwrap();
        let queue = std::sync::Arc::new(DurableQueue::open(dir.path(), test_config()).unwrap());

        let enqueuer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            enqueuer.enqueue(&record("d-1")).unwrap();
        });

        let start = Instant::now();
        let message = queue.receive(Duration::from_secs(5)).await.unwrap();
        assert!(message.is_some());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn scan_order_is_deterministic() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        queue.enqueue(&record("d-b")).unwrap();
        queue.enqueue(&record("d-a")).unwrap();

        let first = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(first.delivery_id().as_str(), "d-a");
    }

    #[tokio::test]
    async fn receive_count_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let queue = DurableQueue::open(dir.path(), test_config()).unwrap();
            queue.enqueue(&record("d-1")).unwrap();
            let _leased = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
            // Process "crashes" holding the lease.
        }

        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();
        let message = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(message.receive_count, 2);
    }

    #[tokio::test]
    async fn orphaned_temp_files_cleaned_on_open() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("half-written.json.tmp"), b"partial").unwrap();

        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();
        assert!(!dir.path().join("half-written.json.tmp").exists());
        assert_eq!(queue.depth().unwrap(), 0);

        // The interrupted delivery can be enqueued fresh.
        queue.enqueue(&record("half-written")).unwrap();
    }

    #[tokio::test]
    async fn corrupt_record_is_dead_lettered() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        std::fs::write(dir.path().join("corrupt.json"), b"not json at all").unwrap();

        assert!(queue.receive(Duration::from_millis(20)).await.unwrap().is_none());
        assert_eq!(queue.dead_letter_ids().unwrap(), vec![DeliveryId::new("corrupt")]);
    }

    #[tokio::test]
    async fn depth_counts_pending_records() {
        let dir = tempdir().unwrap();
        let queue = DurableQueue::open(dir.path(), test_config()).unwrap();

        assert_eq!(queue.depth().unwrap(), 0);
        queue.enqueue(&record("d-1")).unwrap();
        queue.enqueue(&record("d-2")).unwrap();
        assert_eq!(queue.depth().unwrap(), 2);

        let message = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        // Leased but unacked records still count toward depth.
        assert_eq!(queue.depth().unwrap(), 2);
        queue.ack(&message).unwrap();
        assert_eq!(queue.depth().unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_receivers_never_share_a_message() {
        let dir = tempdir().unwrap();
        let queue = std::sync::Arc::new(DurableQueue::open(dir.path(), test_config()).unwrap());

        for i in 0..4 {
            queue.enqueue(&record(&format!("d-{i}"))).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.receive(Duration::from_millis(100)).await.unwrap()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            if let Some(message) = handle.await.unwrap() {
                assert!(seen.insert(message.delivery_id().clone()), "duplicate delivery");
            }
        }
        assert_eq!(seen.len(), 4);
    }
}
