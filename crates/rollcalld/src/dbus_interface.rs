use chrono::Utc;
use rollcall_core::{Embedding, EmotionLabel, EnrollError, Identity, ObservationBatch, SampleCollector};
use rollcall_store::ledger::DEFAULT_RECENT_LIMIT;
use rollcall_store::{Roster, RosterError, TIMESTAMP_FORMAT};
use tokio::sync::Mutex;
use zbus::interface;

use crate::engine::EngineHandle;

/// D-Bus interface for the rollcall session daemon.
///
/// Bus name: org.rollcall.Tracker1
/// Object path: /org/rollcall/Tracker1
///
/// Camera-side collaborators push observation batches and pull pending
/// emotion lookups; UI collaborators poll the snapshot. Structured
/// payloads travel as JSON strings.
pub struct TrackerService {
    engine: EngineHandle,
    roster: Mutex<Roster>,
    enrollment: Mutex<Option<SampleCollector>>,
    match_tolerance: f32,
    enroll_samples: usize,
}

impl TrackerService {
    pub fn new(
        engine: EngineHandle,
        roster: Roster,
        match_tolerance: f32,
        enroll_samples: usize,
    ) -> Self {
        Self {
            engine,
            roster: Mutex::new(roster),
            enrollment: Mutex::new(None),
            match_tolerance,
            enroll_samples,
        }
    }
}

fn failed(err: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "org.rollcall.Tracker1")]
impl TrackerService {
    /// Feed one frame's observations into the session. Returns the
    /// number of named observations accepted.
    async fn observe_batch(&self, batch_json: &str) -> zbus::fdo::Result<u32> {
        let batch: ObservationBatch = serde_json::from_str(batch_json)
            .map_err(|err| zbus::fdo::Error::InvalidArgs(format!("bad observation batch: {err}")))?;
        tracing::debug!(
            frame = batch.frame_seq,
            observations = batch.observations.len(),
            "observe_batch"
        );
        let out = self.engine.observe(batch).await.map_err(failed)?;
        Ok(out.accepted as u32)
    }

    /// Deliver a classifier verdict for a queued lookup. Returns false
    /// when the verdict arrived after a session reset and was dropped.
    async fn resolve_emotion(&self, name: &str, label: &str) -> zbus::fdo::Result<bool> {
        tracing::debug!(name, label, "resolve_emotion");
        let out = self
            .engine
            .resolve_emotion(Identity::from(name), EmotionLabel::from(label))
            .await
            .map_err(failed)?;
        Ok(out.applied)
    }

    /// Drain queued emotion lookups. Each request is handed out exactly
    /// once; the caller is expected to resolve them.
    async fn take_pending_lookups(&self) -> zbus::fdo::Result<String> {
        let lookups = self.engine.take_pending_lookups().await.map_err(failed)?;
        serde_json::to_string(&lookups).map_err(failed)
    }

    /// Per-identity display labels for the current session, as a JSON
    /// object of name to label.
    async fn snapshot(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.engine.snapshot().await.map_err(failed)?;
        let labels: serde_json::Map<String, serde_json::Value> = snapshot
            .iter()
            .map(|(identity, state)| {
                (
                    identity.to_string(),
                    serde_json::Value::from(state.label()),
                )
            })
            .collect();
        Ok(serde_json::Value::Object(labels).to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        let people = self.roster.lock().await.len();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session_id": status.session_id.to_string(),
            "session_started_at": status.session_started_at.to_rfc3339(),
            "debounce_ms": status.debounce_ms,
            "tracked": status.tracked,
            "logged": status.logged,
            "pending_lookups": status.pending_lookups,
            "dropped_writes": status.dropped_writes,
            "enrolled_people": people,
        })
        .to_string())
    }

    /// Discard the current session and start a fresh one. Returns the
    /// new session id.
    async fn reset_session(&self) -> zbus::fdo::Result<String> {
        tracing::info!("reset_session requested");
        let session = self.engine.reset_session().await.map_err(failed)?;
        Ok(session.to_string())
    }

    /// Most recent attendance records, newest first, as a JSON array.
    /// A limit of zero means the default of ten.
    async fn recent_records(&self, limit: u32) -> zbus::fdo::Result<String> {
        let limit = if limit == 0 {
            DEFAULT_RECENT_LIMIT
        } else {
            limit as usize
        };
        let records = self.engine.recent_records(limit).await.map_err(failed)?;
        let rows: Vec<serde_json::Value> = records
            .iter()
            .map(|record| {
                serde_json::json!({
                    "name": record.name.as_str(),
                    "emotion": record.emotion.as_str(),
                    "timestamp": record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                })
            })
            .collect();
        serde_json::to_string(&rows).map_err(failed)
    }

    /// Current reference set for identity matching, built from the
    /// roster. Camera-side matchers refresh this after enrollments.
    async fn references(&self) -> zbus::fdo::Result<String> {
        let roster = self.roster.lock().await;
        let set = roster.reference_set(self.match_tolerance);
        serde_json::to_string(&set).map_err(failed)
    }

    /// Begin an enrollment session for the given person. A target of
    /// zero means the configured default. Restarting while another
    /// enrollment is active discards the earlier one.
    async fn start_enrollment(&self, name: &str, target: u32) -> zbus::fdo::Result<bool> {
        if name.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs("name must not be empty".into()));
        }
        let target = if target == 0 {
            self.enroll_samples
        } else {
            target as usize
        };
        let collector = SampleCollector::new(Identity::from(name), target)
            .map_err(|err| zbus::fdo::Error::InvalidArgs(err.to_string()))?;

        let mut active = self.enrollment.lock().await;
        if let Some(previous) = active.replace(collector) {
            tracing::warn!(
                previous = %previous.name(),
                "enrollment restarted; discarding samples in progress"
            );
        }
        tracing::info!(name, target, "enrollment started");
        Ok(true)
    }

    /// Offer one capture's embeddings to the active enrollment. The
    /// capture is rejected unless it holds exactly one face. On the
    /// final sample the person is saved to the roster.
    async fn enroll_capture(&self, samples_json: &str) -> zbus::fdo::Result<String> {
        let embeddings: Vec<Embedding> = serde_json::from_str(samples_json)
            .map_err(|err| zbus::fdo::Error::InvalidArgs(format!("bad embedding list: {err}")))?;

        let mut active = self.enrollment.lock().await;
        let collector = active
            .as_mut()
            .ok_or_else(|| failed("no enrollment in progress"))?;

        let progress = match collector.offer(embeddings) {
            Ok(progress) => progress,
            Err(EnrollError::WrongFaceCount(found)) => {
                let progress = collector.progress();
                tracing::debug!(found, "enrollment capture rejected");
                return Ok(serde_json::json!({
                    "accepted": false,
                    "found_faces": found,
                    "captured": progress.captured,
                    "target": progress.target,
                    "complete": false,
                })
                .to_string());
            }
            Err(err) => return Err(failed(err)),
        };

        if progress.complete {
            if let Some(done) = active.take() {
                let (identity, samples) = done.finish().map_err(failed)?;
                let mut roster = self.roster.lock().await;
                roster
                    .enroll(identity.clone(), samples, Utc::now())
                    .map_err(failed)?;
                tracing::info!(name = %identity, "enrollment complete");
            }
        }

        Ok(serde_json::json!({
            "accepted": true,
            "captured": progress.captured,
            "target": progress.target,
            "complete": progress.complete,
        })
        .to_string())
    }

    /// Abandon the active enrollment, if any. Returns whether one was
    /// in progress.
    async fn cancel_enrollment(&self) -> zbus::fdo::Result<bool> {
        let mut active = self.enrollment.lock().await;
        match active.take() {
            Some(collector) => {
                tracing::info!(name = %collector.name(), "enrollment cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// List enrolled people as a JSON array.
    async fn list_people(&self) -> zbus::fdo::Result<String> {
        let roster = self.roster.lock().await;
        let people: Vec<serde_json::Value> = roster
            .people()
            .map(|(identity, enrollment)| {
                serde_json::json!({
                    "name": identity.as_str(),
                    "samples": enrollment.samples.len(),
                    "enrolled_at": enrollment.enrolled_at.to_rfc3339(),
                })
            })
            .collect();
        serde_json::to_string(&people).map_err(failed)
    }

    /// Remove an enrolled person. Returns false if the name is not on
    /// the roster.
    async fn remove_person(&self, name: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(name, "remove_person requested");
        let mut roster = self.roster.lock().await;
        match roster.remove(&Identity::from(name)) {
            Ok(()) => Ok(true),
            Err(RosterError::UnknownPerson(_)) => Ok(false),
            Err(err) => Err(failed(err)),
        }
    }
}
