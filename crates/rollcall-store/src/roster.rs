//! Durable enrollment roster.
//!
//! A JSON file mapping each enrolled name to its raw sample
//! embeddings and enrollment time. Samples are kept raw so the
//! averaged reference set can be rebuilt whenever someone is added or
//! removed; matching collaborators consume the result of
//! [`Roster::reference_set`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rollcall_core::{Embedding, Identity, ReferenceSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("roster file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no enrollment named {0}")]
    UnknownPerson(Identity),
}

/// One person's enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub samples: Vec<Embedding>,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RosterFile {
    people: BTreeMap<Identity, Enrollment>,
}

/// In-memory roster bound to its backing file. Mutations persist
/// immediately; a missing file is an empty roster.
#[derive(Debug)]
pub struct Roster {
    path: PathBuf,
    people: BTreeMap<Identity, Enrollment>,
}

impl Roster {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RosterError> {
        let path = path.into();
        let people = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let file: RosterFile = serde_json::from_str(&contents)?;
            file.people
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), people = people.len(), "roster loaded");
        Ok(Self { path, people })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add or replace a person's enrollment and persist. Re-enrolling
    /// an existing name discards their previous samples.
    pub fn enroll(
        &mut self,
        name: Identity,
        samples: Vec<Embedding>,
        now: DateTime<Utc>,
    ) -> Result<(), RosterError> {
        let replaced = self
            .people
            .insert(
                name.clone(),
                Enrollment {
                    samples,
                    enrolled_at: now,
                },
            )
            .is_some();
        self.save()?;

        tracing::info!(name = %name, replaced, "enrollment saved");
        Ok(())
    }

    /// Remove a person and persist.
    pub fn remove(&mut self, name: &Identity) -> Result<(), RosterError> {
        if self.people.remove(name).is_none() {
            return Err(RosterError::UnknownPerson(name.clone()));
        }
        self.save()?;

        tracing::info!(name = %name, "enrollment removed");
        Ok(())
    }

    pub fn contains(&self, name: &Identity) -> bool {
        self.people.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Enrolled people in name order.
    pub fn people(&self) -> impl Iterator<Item = (&Identity, &Enrollment)> {
        self.people.iter()
    }

    /// Averaged references for matching collaborators.
    pub fn reference_set(&self, tolerance: f32) -> ReferenceSet {
        ReferenceSet::from_samples(
            self.people
                .iter()
                .map(|(name, enrollment)| (name.clone(), enrollment.samples.clone())),
            tolerance,
        )
    }

    fn save(&self) -> Result<(), RosterError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = RosterFile {
            people: self.people.clone(),
        };
        let contents = serde_json::to_string_pretty(&file)?;

        // Write-then-rename so a crash mid-save cannot leave a
        // truncated roster behind.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rollcall_roster_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 9, 0, 0).unwrap()
    }

    fn samples(values: &[f32]) -> Vec<Embedding> {
        values.iter().map(|v| Embedding::new(vec![*v, 0.0])).collect()
    }

    #[test]
    fn test_missing_file_is_empty_roster() {
        let dir = test_dir("missing");
        let roster = Roster::load(dir.join("roster.json")).unwrap();
        assert!(roster.is_empty());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_enroll_persists_across_reload() {
        let dir = test_dir("persist");
        let path = dir.join("roster.json");

        let mut roster = Roster::load(&path).unwrap();
        roster
            .enroll(Identity::from("Alice"), samples(&[1.0, 3.0]), now())
            .unwrap();
        drop(roster);

        let reloaded = Roster::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&Identity::from("Alice")));
        let (_, enrollment) = reloaded.people().next().unwrap();
        assert_eq!(enrollment.samples.len(), 2);
        assert_eq!(enrollment.enrolled_at, now());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reenroll_replaces_samples() {
        let dir = test_dir("replace");
        let mut roster = Roster::load(dir.join("roster.json")).unwrap();

        roster
            .enroll(Identity::from("Alice"), samples(&[1.0, 2.0, 3.0]), now())
            .unwrap();
        roster
            .enroll(Identity::from("Alice"), samples(&[9.0]), now())
            .unwrap();

        assert_eq!(roster.len(), 1);
        let (_, enrollment) = roster.people().next().unwrap();
        assert_eq!(enrollment.samples.len(), 1);
        assert_eq!(enrollment.samples[0].values, vec![9.0, 0.0]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_remove_unknown_person_errors() {
        let dir = test_dir("remove_unknown");
        let mut roster = Roster::load(dir.join("roster.json")).unwrap();

        let err = roster.remove(&Identity::from("Ghost")).unwrap_err();
        assert!(matches!(err, RosterError::UnknownPerson(_)));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_remove_persists() {
        let dir = test_dir("remove");
        let path = dir.join("roster.json");

        let mut roster = Roster::load(&path).unwrap();
        roster
            .enroll(Identity::from("Alice"), samples(&[1.0]), now())
            .unwrap();
        roster
            .enroll(Identity::from("Bob"), samples(&[2.0]), now())
            .unwrap();
        roster.remove(&Identity::from("Alice")).unwrap();

        let reloaded = Roster::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(!reloaded.contains(&Identity::from("Alice")));
        assert!(reloaded.contains(&Identity::from("Bob")));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reference_set_averages_samples() {
        let dir = test_dir("references");
        let mut roster = Roster::load(dir.join("roster.json")).unwrap();
        roster
            .enroll(Identity::from("Alice"), samples(&[1.0, 3.0]), now())
            .unwrap();

        let set = roster.reference_set(0.6);
        assert_eq!(set.len(), 1);
        assert_eq!(set.tolerance(), 0.6);
        assert_eq!(set.references()[0].embedding.values, vec![2.0, 0.0]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_malformed_roster_is_an_error() {
        let dir = test_dir("malformed");
        let path = dir.join("roster.json");
        fs::write(&path, "{ not json").unwrap();

        // Unlike the ledger, the roster refuses corrupt input: silently
        // treating it as empty would drop every enrollment on the next
        // save.
        let err = Roster::load(&path).unwrap_err();
        assert!(matches!(err, RosterError::Parse(_)));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = test_dir("parents");
        let path = dir.join("nested/roster.json");

        let mut roster = Roster::load(&path).unwrap();
        roster
            .enroll(Identity::from("Alice"), samples(&[1.0]), now())
            .unwrap();

        assert!(path.exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
