//! Lock-probe rendezvous harness.
//!
//! Runs two concurrent SQLite transactions against a single seeded row and
//! records the order in which they finish.  Worker A executes a *probe
//! statement* and then keeps its transaction open; worker B tries to update
//! the same row.  If the probe took a blocking lock, B's update cannot return
//! until A commits, and the coordinator's `"wait"` label lands between the two
//! worker labels.  The final label ordering is the only signal the harness
//! uses to decide whether a statement form locks.
//!
//! ## Layout
//!
//! - [`latch`] - one-shot countdown signals with bounded waits.
//! - [`event_log`] - append-only label log shared across workers.
//! - [`fixture`] - temp database, schema bootstrap, probe-row reseeding.
//! - [`runner`] - transaction-per-thread worker with explicit handles.
//! - [`rendezvous`] - the two-worker interleaving protocol.
//! - [`scenario`] - catalog of probe statements and expected orderings.
//! - [`report`] - repeated sweeps and JSON/Markdown reporting.
//! - [`logging`] - `tracing` subscriber setup.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub mod event_log;
pub mod fixture;
pub mod latch;
pub mod logging;
pub mod rendezvous;
pub mod report;
pub mod runner;
pub mod scenario;

/// Label appended by the probe worker once its statement has executed.
pub const PROBE_LABEL: &str = "Obtain Lock";
/// Label appended by the second worker once its conflicting update returned.
pub const SECOND_LABEL: &str = "Second Update";
/// Label appended by the coordinator after the settle interval.
pub const WAIT_LABEL: &str = "wait";

// ── Errors ──────────────────────────────────────────────────────────────

/// Errors raised while running lock-probe scenarios.
#[derive(Debug, thiserror::Error)]
pub enum LockProbeError {
    /// A statement failed inside SQLite.
    #[error("sqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),

    /// Filesystem failure (temp dir, log file, report output).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report or settings (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A worker's unit of work returned an error; its transaction was rolled back.
    #[error("worker `{role}` failed: {source}")]
    Worker {
        role: String,
        #[source]
        source: Box<LockProbeError>,
    },

    /// A worker thread panicked before returning.
    #[error("worker `{role}` panicked")]
    WorkerPanicked { role: String },

    /// The observed label ordering differs from the scenario's expectation.
    #[error("scenario `{scenario}` ordering mismatch: expected {expected:?}, got {actual:?}")]
    OrderingMismatch {
        scenario: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// No scenario with the requested name exists in the catalog.
    #[error("unknown scenario: {name}")]
    UnknownScenario { name: String },

    /// Invalid settings.
    #[error("invalid settings: {0}")]
    Config(String),
}

impl LockProbeError {
    /// Whether this is the domain-level ordering failure rather than an
    /// infrastructure fault.
    #[must_use]
    pub const fn is_ordering_mismatch(&self) -> bool {
        matches!(self, Self::OrderingMismatch { .. })
    }
}

/// Result alias used throughout the crate.
pub type LockProbeResult<T> = Result<T, LockProbeError>;

// ── Settings ────────────────────────────────────────────────────────────

/// Journal modes the fixture accepts.
const JOURNAL_MODES: &[&str] = &["wal", "delete", "truncate", "persist"];

/// Connection and timing settings shared by every scenario in a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// `PRAGMA journal_mode` applied when the fixture is created.
    pub journal_mode: String,
    /// `PRAGMA busy_timeout` for every worker connection.
    pub busy_timeout_ms: u32,
    /// Bound for every barrier wait in the rendezvous.
    pub signal_timeout_ms: u64,
    /// Delay between the probe signal and the coordinator's `"wait"` label.
    pub settle_ms: u64,
    /// How many times each scenario is executed in a sweep.
    pub repetitions: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            journal_mode: "wal".to_owned(),
            busy_timeout_ms: 5000,
            signal_timeout_ms: 1000,
            settle_ms: 100,
            repetitions: 10,
        }
    }
}

impl ProbeSettings {
    /// Load settings from a JSON file.  Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LockProbeError::Io`] if the file cannot be read,
    /// [`LockProbeError::Json`] if it is not valid JSON, or
    /// [`LockProbeError::Config`] if the loaded values fail [`Self::validate`].
    pub fn load(path: &Path) -> LockProbeResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check that the timing windows can produce a meaningful ordering.
    ///
    /// The holder releases on its own once the signal timeout expires, so the
    /// settle interval must be shorter than it.  The second worker's busy
    /// handler must outlast the holder.
    ///
    /// # Errors
    ///
    /// Returns [`LockProbeError::Config`] describing the first violated rule.
    pub fn validate(&self) -> LockProbeResult<()> {
        if !JOURNAL_MODES.contains(&self.journal_mode.to_ascii_lowercase().as_str()) {
            return Err(LockProbeError::Config(format!(
                "unsupported journal_mode {:?}",
                self.journal_mode
            )));
        }
        if self.repetitions == 0 {
            return Err(LockProbeError::Config("repetitions must be at least 1".to_owned()));
        }
        if self.settle_ms >= self.signal_timeout_ms {
            return Err(LockProbeError::Config(format!(
                "settle_ms ({}) must be shorter than signal_timeout_ms ({})",
                self.settle_ms, self.signal_timeout_ms
            )));
        }
        if u64::from(self.busy_timeout_ms) <= self.signal_timeout_ms {
            return Err(LockProbeError::Config(format!(
                "busy_timeout_ms ({}) must exceed signal_timeout_ms ({})",
                self.busy_timeout_ms, self.signal_timeout_ms
            )));
        }
        Ok(())
    }

    /// Bound for every barrier wait.
    #[must_use]
    pub const fn signal_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.signal_timeout_ms)
    }

    /// Settle interval slept by the coordinator.
    #[must_use]
    pub const fn settle(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.settle_ms)
    }
}

impl fmt::Display for ProbeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "journal_mode={} busy_timeout_ms={} signal_timeout_ms={} settle_ms={} repetitions={}",
            self.journal_mode,
            self.busy_timeout_ms,
            self.signal_timeout_ms,
            self.settle_ms,
            self.repetitions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        ProbeSettings::default().validate().unwrap();
    }

    #[test]
    fn settle_must_be_shorter_than_signal_timeout() {
        let settings = ProbeSettings {
            settle_ms: 1000,
            signal_timeout_ms: 1000,
            ..ProbeSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, LockProbeError::Config(_)), "got {err}");
    }

    #[test]
    fn busy_timeout_must_outlast_holder() {
        let settings = ProbeSettings {
            busy_timeout_ms: 500,
            ..ProbeSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_repetitions_rejected() {
        let settings = ProbeSettings {
            repetitions: 0,
            ..ProbeSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn unknown_journal_mode_rejected() {
        let settings = ProbeSettings {
            journal_mode: "memory".to_owned(),
            ..ProbeSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{"settle_ms": 50, "repetitions": 3}"#).unwrap();

        let settings = ProbeSettings::load(&path).unwrap();
        assert_eq!(settings.settle_ms, 50);
        assert_eq!(settings.repetitions, 3);
        assert_eq!(settings.journal_mode, "wal");
        assert_eq!(settings.busy_timeout_ms, 5000);
    }

    #[test]
    fn load_rejects_invalid_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ProbeSettings::load(&path),
            Err(LockProbeError::Json(_))
        ));
    }

    #[test]
    fn ordering_mismatch_message_lists_both_sequences() {
        let err = LockProbeError::OrderingMismatch {
            scenario: "update_does_lock".to_owned(),
            expected: vec![PROBE_LABEL.to_owned(), WAIT_LABEL.to_owned(), SECOND_LABEL.to_owned()],
            actual: vec![PROBE_LABEL.to_owned(), SECOND_LABEL.to_owned(), WAIT_LABEL.to_owned()],
        };
        assert!(err.is_ordering_mismatch());
        let msg = err.to_string();
        assert!(msg.contains("update_does_lock"));
        assert!(msg.contains(r#"["Obtain Lock", "wait", "Second Update"]"#));
        assert!(msg.contains(r#"["Obtain Lock", "Second Update", "wait"]"#));
    }
}
