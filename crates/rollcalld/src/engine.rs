use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rollcall_core::{
    Action, AttendanceTracker, DisplayState, EmotionLabel, Identity, LookupRequest,
    ObservationBatch,
};
use rollcall_store::{AttendanceLedger, LedgerError, LedgerRecord};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of feeding one observation batch.
#[derive(Debug, Clone, Copy)]
pub struct ObserveOutcome {
    /// Named observations accepted into the session. Unknown faces are
    /// never tracked and do not count.
    pub accepted: usize,
    /// Emotion lookups newly queued for the classifier.
    pub lookups_queued: usize,
}

/// Outcome of one emotion resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOutcome {
    /// False when the resolution arrived after a reset and was dropped.
    pub applied: bool,
    /// True when this resolution produced the session's ledger write.
    pub logged: bool,
}

/// Point-in-time engine state, surfaced over D-Bus as Status().
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub session_id: Uuid,
    pub session_started_at: DateTime<Utc>,
    pub debounce_ms: i64,
    pub tracked: usize,
    pub logged: usize,
    pub pending_lookups: usize,
    pub dropped_writes: u64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    ObserveBatch {
        batch: ObservationBatch,
        reply: oneshot::Sender<ObserveOutcome>,
    },
    ResolveEmotion {
        identity: Identity,
        label: EmotionLabel,
        reply: oneshot::Sender<ResolveOutcome>,
    },
    TakePendingLookups {
        reply: oneshot::Sender<Vec<LookupRequest>>,
    },
    Snapshot {
        reply: oneshot::Sender<BTreeMap<Identity, DisplayState>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    ResetSession {
        reply: oneshot::Sender<Uuid>,
    },
    RecentRecords {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<LedgerRecord>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Feed one batch of face observations into the current session.
    pub async fn observe(&self, batch: ObservationBatch) -> Result<ObserveOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ObserveBatch {
                batch,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Deliver a classifier verdict for a previously queued lookup.
    pub async fn resolve_emotion(
        &self,
        identity: Identity,
        label: EmotionLabel,
    ) -> Result<ResolveOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ResolveEmotion {
                identity,
                label,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Drain the queue of emotion lookups awaiting a classifier.
    pub async fn take_pending_lookups(&self) -> Result<Vec<LookupRequest>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::TakePendingLookups { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Per-identity display state for the current session.
    pub async fn snapshot(&self) -> Result<BTreeMap<Identity, DisplayState>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Counters and session metadata.
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Discard all session state and start a fresh session.
    pub async fn reset_session(&self) -> Result<Uuid, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ResetSession { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Most recent ledger rows, newest first.
    pub async fn recent_records(&self, limit: usize) -> Result<Vec<LedgerRecord>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::RecentRecords {
                limit,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the session engine on a dedicated OS thread.
///
/// Opens the ledger up front (fail-fast), then enters a request loop.
/// The engine owns the tracker, the ledger handle and the pending
/// lookup queue; every caller goes through the channel, so no state
/// is ever shared across threads.
pub fn spawn_engine(ledger_path: &Path, debounce: Duration) -> Result<EngineHandle, EngineError> {
    let ledger = AttendanceLedger::open(ledger_path)?;
    tracing::info!(path = %ledger_path.display(), "attendance ledger opened");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut engine = SessionEngine::new(ledger, debounce);
            tracing::info!(session = %engine.session_id, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Single-owner session state living on the engine thread.
struct SessionEngine {
    tracker: AttendanceTracker,
    ledger: AttendanceLedger,
    pending_lookups: Vec<LookupRequest>,
    session_id: Uuid,
    dropped_writes: u64,
}

impl SessionEngine {
    fn new(ledger: AttendanceLedger, debounce: Duration) -> Self {
        Self {
            tracker: AttendanceTracker::new(debounce, Utc::now()),
            ledger,
            pending_lookups: Vec::new(),
            session_id: Uuid::new_v4(),
            dropped_writes: 0,
        }
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::ObserveBatch { batch, reply } => {
                let _ = reply.send(self.observe(batch));
            }
            EngineRequest::ResolveEmotion {
                identity,
                label,
                reply,
            } => {
                let _ = reply.send(self.resolve(identity, label));
            }
            EngineRequest::TakePendingLookups { reply } => {
                let _ = reply.send(std::mem::take(&mut self.pending_lookups));
            }
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.tracker.snapshot());
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            EngineRequest::ResetSession { reply } => {
                let _ = reply.send(self.reset());
            }
            EngineRequest::RecentRecords { limit, reply } => {
                let _ = reply.send(self.ledger.recent(limit).map_err(EngineError::from));
            }
        }
    }

    fn observe(&mut self, batch: ObservationBatch) -> ObserveOutcome {
        let accepted = batch
            .observations
            .iter()
            .filter(|obs| obs.identity.is_some())
            .count();
        let out = self.tracker.observe(&batch, Utc::now());
        let lookups_queued = self.apply_actions(out.actions);
        ObserveOutcome {
            accepted,
            lookups_queued,
        }
    }

    fn resolve(&mut self, identity: Identity, label: EmotionLabel) -> ResolveOutcome {
        let applied = self.tracker.entry(&identity).is_some();
        let out = self.tracker.resolve_emotion(&identity, label, Utc::now());
        let logged = out
            .actions
            .iter()
            .any(|action| matches!(action, Action::LogWriteRequested(_)));
        self.apply_actions(out.actions);
        ResolveOutcome { applied, logged }
    }

    /// Dispatch tracker actions: queue emotion lookups for the
    /// classifier and append log writes to the ledger. A failed append
    /// is counted and logged, never fatal. Returns the number of
    /// lookups queued.
    fn apply_actions(&mut self, actions: Vec<Action>) -> usize {
        let mut queued = 0;
        for action in actions {
            match action {
                Action::EmotionLookupRequested(request) => {
                    tracing::debug!(
                        identity = %request.identity,
                        frame = request.frame_seq,
                        "emotion lookup queued"
                    );
                    self.pending_lookups.push(request);
                    queued += 1;
                }
                Action::LogWriteRequested(record) => match self.ledger.append(&record) {
                    Ok(()) => tracing::info!(
                        identity = %record.identity,
                        emotion = %record.emotion,
                        "attendance logged"
                    ),
                    Err(err) => {
                        self.dropped_writes += 1;
                        tracing::error!(
                            identity = %record.identity,
                            error = %err,
                            dropped_writes = self.dropped_writes,
                            "ledger append failed"
                        );
                    }
                },
            }
        }
        queued
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            session_id: self.session_id,
            session_started_at: self.tracker.session_started_at(),
            debounce_ms: self.tracker.debounce().num_milliseconds(),
            tracked: self.tracker.tracked_count(),
            logged: self.tracker.logged_count(),
            pending_lookups: self.pending_lookups.len(),
            dropped_writes: self.dropped_writes,
        }
    }

    /// Clear tracker state and the undrained lookup queue, then mint a
    /// new session id. Lookups already taken by a classifier are not
    /// cancelled; their late resolutions land as no-ops.
    fn reset(&mut self) -> Uuid {
        self.tracker.reset(Utc::now());
        self.pending_lookups.clear();
        self.session_id = Uuid::new_v4();
        tracing::info!(session = %self.session_id, "session reset");
        self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{FaceRegion, Observation};
    use std::fs;
    use std::path::PathBuf;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rollcall_engine_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn region() -> FaceRegion {
        FaceRegion {
            top: 10,
            right: 110,
            bottom: 110,
            left: 10,
        }
    }

    fn batch_of(names: &[&str]) -> ObservationBatch {
        ObservationBatch::new(
            1,
            names
                .iter()
                .map(|n| Observation::known(region(), Identity::from(*n), 0.9))
                .collect(),
        )
    }

    #[tokio::test]
    async fn observe_then_resolve_writes_ledger() {
        let dir = test_dir("observe_resolve");
        let path = dir.join("attendance.csv");
        let engine = spawn_engine(&path, Duration::zero()).unwrap();

        let out = engine.observe(batch_of(&["Alice"])).await.unwrap();
        assert_eq!(out.accepted, 1);
        assert_eq!(out.lookups_queued, 1);

        let lookups = engine.take_pending_lookups().await.unwrap();
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].identity, Identity::from("Alice"));
        assert!(engine.take_pending_lookups().await.unwrap().is_empty());

        let res = engine
            .resolve_emotion(Identity::from("Alice"), EmotionLabel::from("happy"))
            .await
            .unwrap();
        assert!(res.applied);
        assert!(res.logged);

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Alice,happy,"));

        let status = engine.status().await.unwrap();
        assert_eq!(status.tracked, 1);
        assert_eq!(status.logged, 1);
        assert_eq!(status.dropped_writes, 0);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn lookup_fires_after_dwell() {
        let dir = test_dir("dwell");
        let path = dir.join("attendance.csv");
        let engine = spawn_engine(&path, Duration::milliseconds(50)).unwrap();

        let first = engine.observe(batch_of(&["Bob"])).await.unwrap();
        assert_eq!(first.lookups_queued, 0);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let second = engine.observe(batch_of(&["Bob"])).await.unwrap();
        assert_eq!(second.lookups_queued, 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unknown_faces_are_not_accepted() {
        let dir = test_dir("unknown");
        let path = dir.join("attendance.csv");
        let engine = spawn_engine(&path, Duration::zero()).unwrap();

        let batch = ObservationBatch::new(1, vec![Observation::unknown(region())]);
        let out = engine.observe(batch).await.unwrap();
        assert_eq!(out.accepted, 0);
        assert_eq!(out.lookups_queued, 0);
        assert!(engine.snapshot().await.unwrap().is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn stale_resolution_is_dropped() {
        let dir = test_dir("stale");
        let path = dir.join("attendance.csv");
        let engine = spawn_engine(&path, Duration::zero()).unwrap();

        let res = engine
            .resolve_emotion(Identity::from("Ghost"), EmotionLabel::from("sad"))
            .await
            .unwrap();
        assert!(!res.applied);
        assert!(!res.logged);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn reset_rotates_session_and_clears_pending() {
        let dir = test_dir("reset");
        let path = dir.join("attendance.csv");
        let engine = spawn_engine(&path, Duration::zero()).unwrap();

        engine.observe(batch_of(&["Alice"])).await.unwrap();
        let before = engine.status().await.unwrap();
        assert_eq!(before.pending_lookups, 1);

        let new_session = engine.reset_session().await.unwrap();
        assert_ne!(new_session, before.session_id);

        assert!(engine.take_pending_lookups().await.unwrap().is_empty());
        let after = engine.status().await.unwrap();
        assert_eq!(after.session_id, new_session);
        assert_eq!(after.tracked, 0);
        assert_eq!(after.pending_lookups, 0);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn second_resolution_never_appends_again() {
        let dir = test_dir("double_resolve");
        let path = dir.join("attendance.csv");
        let engine = spawn_engine(&path, Duration::zero()).unwrap();

        engine.observe(batch_of(&["Alice"])).await.unwrap();
        let first = engine
            .resolve_emotion(Identity::from("Alice"), EmotionLabel::from("happy"))
            .await
            .unwrap();
        assert!(first.logged);

        let second = engine
            .resolve_emotion(Identity::from("Alice"), EmotionLabel::from("calm"))
            .await
            .unwrap();
        assert!(second.applied);
        assert!(!second.logged);

        // Header plus exactly one record.
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_append_is_counted_not_fatal() {
        let dir = test_dir("failed_append");
        let path = dir.join("attendance.csv");
        let engine = spawn_engine(&path, Duration::zero()).unwrap();

        engine.observe(batch_of(&["Alice"])).await.unwrap();

        // Make the append fail: the ledger path now names a directory.
        fs::remove_file(&path).unwrap();
        fs::create_dir_all(&path).unwrap();

        let res = engine
            .resolve_emotion(Identity::from("Alice"), EmotionLabel::from("happy"))
            .await
            .unwrap();
        assert!(res.applied);
        assert!(res.logged);

        let status = engine.status().await.unwrap();
        assert_eq!(status.dropped_writes, 1);
        assert_eq!(status.logged, 1);

        // The engine keeps serving after the write was dropped.
        assert_eq!(engine.snapshot().await.unwrap().len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn recent_records_come_back_newest_first() {
        let dir = test_dir("recent");
        let path = dir.join("attendance.csv");
        let engine = spawn_engine(&path, Duration::zero()).unwrap();

        for name in ["Alice", "Bob"] {
            engine.observe(batch_of(&[name])).await.unwrap();
            engine
                .resolve_emotion(Identity::from(name), EmotionLabel::from("neutral"))
                .await
                .unwrap();
        }

        let records = engine.recent_records(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, Identity::from("Bob"));
        assert_eq!(records[1].name, Identity::from("Alice"));

        let _ = fs::remove_dir_all(&dir);
    }
}
