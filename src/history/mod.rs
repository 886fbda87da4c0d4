use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to parse history file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("expected to read history on {expected} host(s), got {got}")]
    IncompleteRead { expected: usize, got: usize },
    #[error("history file diverged across hosts")]
    Diverged,
    #[error("version {0} does not exist in history")]
    UnknownVersion(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Replicated version history. One instance is loaded, mutated and re-serialized per
/// deploy/rollback; it is not meant to be shared across concurrent deploys.
#[derive(Debug, Default, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    sorted: bool,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HistoryError> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::new());
        }
        let entries: Vec<HistoryEntry> = serde_json::from_slice(bytes)?;
        Ok(Self {
            entries,
            sorted: false,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HistoryError> {
        Ok(serde_json::to_vec_pretty(&self.entries)?)
    }

    /// Accepts a set of per-host byte blobs iff every host answered and all answers
    /// are byte-identical; otherwise the history is treated as diverged rather than
    /// silently picking one host's copy.
    pub fn merge_from_hosts(
        contents: &[(String, Vec<u8>)],
        expected_hosts: usize,
    ) -> Result<Self, HistoryError> {
        if contents.len() != expected_hosts || contents.is_empty() {
            return Err(HistoryError::IncompleteRead {
                expected: expected_hosts,
                got: contents.len(),
            });
        }
        let first = &contents[0].1;
        if contents.iter().any(|(_, bytes)| bytes != first) {
            return Err(HistoryError::Diverged);
        }
        Self::from_bytes(first)
    }

    pub fn sort_descending(&mut self) {
        self.entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.sorted = true;
    }

    pub fn append(&mut self, version: impl Into<String>, now: DateTime<Utc>) {
        self.entries.push(HistoryEntry {
            version: version.into(),
            timestamp: now,
        });
        self.sorted = false;
    }

    pub fn contains(&self, version: &str) -> bool {
        self.entries.iter().any(|e| e.version == version)
    }

    /// Moves `version` to the front by giving it a fresh timestamp, for rollback.
    pub fn touch(&mut self, version: &str, now: DateTime<Utc>) -> Result<(), HistoryError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.version == version)
            .ok_or_else(|| HistoryError::UnknownVersion(version.to_string()))?;
        entry.timestamp = now;
        self.sorted = false;
        Ok(())
    }

    pub fn latest_version(&mut self) -> Option<String> {
        if !self.sorted {
            self.sort_descending();
        }
        self.entries.first().map(|e| e.version.clone())
    }

    pub fn entries(&mut self) -> &[HistoryEntry] {
        if !self.sorted {
            self.sort_descending();
        }
        &self.entries
    }

    pub fn entries_ascending(&self) -> Vec<HistoryEntry> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn append_then_latest_version_round_trips() {
        let mut history = History::new();
        history.append("ABCDEFGHIJ", ts(100));
        assert_eq!(history.latest_version().as_deref(), Some("ABCDEFGHIJ"));
    }

    #[test]
    fn sort_is_idempotent_on_serialized_bytes() {
        let mut history = History::new();
        history.append("V1", ts(100));
        history.append("V2", ts(200));
        history.sort_descending();
        let once = history.to_bytes().unwrap();
        history.sort_descending();
        let twice = history.to_bytes().unwrap();
        assert_eq!(once, twice);
        assert_eq!(history.latest_version().as_deref(), Some("V2"));
    }

    #[test]
    fn merge_requires_all_hosts_and_byte_equality() {
        let a = vec![1, 2, 3];
        let contents = vec![("h1".to_string(), a.clone()), ("h2".to_string(), a)];
        assert!(History::merge_from_hosts(&contents, 2).is_ok());

        let diverged = vec![("h1".to_string(), vec![1]), ("h2".to_string(), vec![2])];
        assert!(matches!(
            History::merge_from_hosts(&diverged, 2),
            Err(HistoryError::Diverged)
        ));

        let incomplete = vec![("h1".to_string(), vec![1])];
        assert!(matches!(
            History::merge_from_hosts(&incomplete, 2),
            Err(HistoryError::IncompleteRead { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn touch_moves_entry_to_head_on_rollback() {
        let mut history = History::new();
        history.append("OLD", ts(100));
        history.append("NEW", ts(200));
        history.touch("OLD", ts(300)).unwrap();
        assert_eq!(history.latest_version().as_deref(), Some("OLD"));
    }

    #[test]
    fn touch_unknown_version_errors() {
        let mut history = History::new();
        history.append("V1", ts(100));
        assert!(matches!(
            history.touch("MISSING", ts(200)),
            Err(HistoryError::UnknownVersion(_))
        ));
    }
}
