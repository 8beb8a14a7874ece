//! Disposable SQLite database holding the single probe row.
//!
//! Every fixture lives in its own temporary directory and is removed when the
//! fixture is dropped.  Worker connections are opened fresh per run so each
//! transaction runner owns its connection outright.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use tempfile::TempDir;

use crate::{LockProbeResult, ProbeSettings};

/// Table probed by every scenario.
pub const PROBE_TABLE: &str = "example";
/// Primary key of the probe row.
pub const PROBE_ROW_ID: i64 = 23;
/// Text the probe row holds right after reseeding.
pub const SEED_TEXT: &str = "Insert";

const CREATE_PROBE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS example (id INTEGER PRIMARY KEY, text TEXT NOT NULL)";

/// A temp-dir database with the probe table created and configured.
#[derive(Debug)]
pub struct ProbeFixture {
    // Held for its Drop; removes the database directory.
    _dir: TempDir,
    db_path: PathBuf,
    settings: ProbeSettings,
}

impl ProbeFixture {
    /// Create the database file, apply the journal mode, and create the
    /// probe table.
    ///
    /// # Errors
    ///
    /// Returns `LockProbeError::Io` if the temp directory cannot be created,
    /// or `LockProbeError::Rusqlite` if the bootstrap statements fail.
    pub fn create(settings: &ProbeSettings) -> LockProbeResult<Self> {
        let dir = tempfile::Builder::new().prefix("lockprobe-").tempdir()?;
        let db_path = dir.path().join("probe.db");

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode={};\nPRAGMA synchronous=NORMAL;",
            settings.journal_mode
        ))?;
        conn.execute(CREATE_PROBE_TABLE, [])?;
        drop(conn);

        tracing::debug!(
            db_path = %db_path.display(),
            journal_mode = %settings.journal_mode,
            "probe fixture created"
        );

        Ok(Self {
            _dir: dir,
            db_path,
            settings: settings.clone(),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub const fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Open a new connection with the configured busy timeout.
    ///
    /// # Errors
    ///
    /// Returns `LockProbeError::Rusqlite` if the open or PRAGMA fails.
    pub fn open_connection(&self) -> LockProbeResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_millis(u64::from(self.settings.busy_timeout_ms)))?;
        Ok(conn)
    }

    /// Delete every row and reinsert the probe row with its seed text.
    ///
    /// # Errors
    ///
    /// Returns `LockProbeError::Rusqlite` if either statement fails.
    pub fn reseed(&self) -> LockProbeResult<()> {
        let mut conn = self.open_connection()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM example", [])?;
        tx.execute(
            "INSERT INTO example (id, text) VALUES (?1, ?2)",
            params![PROBE_ROW_ID, SEED_TEXT],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Current text of the probe row, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `LockProbeError::Rusqlite` if the query fails.
    pub fn probe_text(&self) -> LockProbeResult<Option<String>> {
        let conn = self.open_connection()?;
        let text = conn
            .query_row(
                "SELECT text FROM example WHERE id = ?1",
                params![PROBE_ROW_ID],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    /// Number of rows in the probe table.
    ///
    /// # Errors
    ///
    /// Returns `LockProbeError::Rusqlite` if the query fails.
    pub fn row_count(&self) -> LockProbeResult<usize> {
        let conn = self.open_connection()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM example", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_applies_journal_mode() {
        let fixture = ProbeFixture::create(&ProbeSettings::default()).unwrap();
        let conn = fixture.open_connection().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn reseed_leaves_single_seed_row() {
        let fixture = ProbeFixture::create(&ProbeSettings::default()).unwrap();
        assert_eq!(fixture.row_count().unwrap(), 0);
        assert_eq!(fixture.probe_text().unwrap(), None);

        fixture.reseed().unwrap();
        assert_eq!(fixture.row_count().unwrap(), 1);
        assert_eq!(fixture.probe_text().unwrap().as_deref(), Some(SEED_TEXT));

        let conn = fixture.open_connection().unwrap();
        conn.execute("UPDATE example SET text = 'changed' WHERE id = 23", [])
            .unwrap();
        conn.execute("INSERT INTO example (id, text) VALUES (42, 'extra')", [])
            .unwrap();
        assert_eq!(fixture.row_count().unwrap(), 2);

        fixture.reseed().unwrap();
        assert_eq!(fixture.row_count().unwrap(), 1);
        assert_eq!(fixture.probe_text().unwrap().as_deref(), Some(SEED_TEXT));
    }

    #[test]
    fn database_removed_on_drop() {
        let fixture = ProbeFixture::create(&ProbeSettings::default()).unwrap();
        let path = fixture.db_path().to_path_buf();
        assert!(path.exists());
        drop(fixture);
        assert!(!path.exists());
    }

    #[test]
    fn connections_use_configured_busy_timeout() {
        let settings = ProbeSettings {
            busy_timeout_ms: 1234,
            ..ProbeSettings::default()
        };
        let fixture = ProbeFixture::create(&settings).unwrap();
        let conn = fixture.open_connection().unwrap();
        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 1234);
    }
}
