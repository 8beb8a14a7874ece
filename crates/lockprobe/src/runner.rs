//! Transaction runner: one unit of work, one transaction, one OS thread.
//!
//! The worker owns its connection and receives the open transaction as an
//! explicit parameter.  `Ok` commits, `Err` rolls back (the transaction is
//! dropped), and either way the result travels back through
//! [`WorkerHandle::join`].

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::{LockProbeError, LockProbeResult};

/// How the worker's transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeginBehavior {
    /// `BEGIN DEFERRED`: no lock until the first read or write.
    Deferred,
    /// `BEGIN IMMEDIATE`: take the write lock at begin.
    Immediate,
    /// `BEGIN EXCLUSIVE`: take the exclusive lock at begin.
    Exclusive,
}

impl BeginBehavior {
    pub const ALL: [Self; 3] = [Self::Deferred, Self::Immediate, Self::Exclusive];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Immediate => "immediate",
            Self::Exclusive => "exclusive",
        }
    }

    const fn to_rusqlite(self) -> TransactionBehavior {
        match self {
            Self::Deferred => TransactionBehavior::Deferred,
            Self::Immediate => TransactionBehavior::Immediate,
            Self::Exclusive => TransactionBehavior::Exclusive,
        }
    }
}

impl fmt::Display for BeginBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a running transaction worker.
#[derive(Debug)]
pub struct WorkerHandle<T> {
    role: String,
    handle: JoinHandle<LockProbeResult<T>>,
}

impl<T> WorkerHandle<T> {
    /// Wait for the worker and return its result.
    ///
    /// # Errors
    ///
    /// Returns [`LockProbeError::Worker`] wrapping the worker's own error, or
    /// [`LockProbeError::WorkerPanicked`] if the thread panicked.
    pub fn join(self) -> LockProbeResult<T> {
        match self.handle.join() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(LockProbeError::Worker {
                role: self.role,
                source: Box::new(source),
            }),
            Err(_) => Err(LockProbeError::WorkerPanicked { role: self.role }),
        }
    }
}

/// Run `work` inside a new transaction on a dedicated thread.
///
/// # Errors
///
/// Returns [`LockProbeError::Io`] if the thread cannot be spawned.  Errors
/// raised by the work itself are reported through [`WorkerHandle::join`].
pub fn spawn_in_transaction<T, F>(
    role: &str,
    mut conn: Connection,
    behavior: BeginBehavior,
    work: F,
) -> LockProbeResult<WorkerHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(&Transaction<'_>) -> LockProbeResult<T> + Send + 'static,
{
    let thread_role = role.to_owned();
    let handle = thread::Builder::new()
        .name(format!("lockprobe-{role}"))
        .spawn(move || -> LockProbeResult<T> {
            let role = thread_role.as_str();
            let start = Instant::now();
            let tx = conn.transaction_with_behavior(behavior.to_rusqlite())?;
            tracing::debug!(role, %behavior, "transaction started");

            let value = match work(&tx) {
                Ok(value) => value,
                Err(e) => {
                    drop(tx);
                    tracing::warn!(role, error = %e, "unit of work failed, rolled back");
                    return Err(e);
                }
            };

            tx.commit()?;
            tracing::debug!(
                role,
                elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                "transaction committed"
            );
            Ok(value)
        })?;

    Ok(WorkerHandle {
        role: role.to_owned(),
        handle,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rusqlite::ErrorCode;

    use super::*;
    use crate::ProbeSettings;
    use crate::fixture::ProbeFixture;
    use crate::latch::Latch;

    fn seeded_fixture() -> ProbeFixture {
        let fixture = ProbeFixture::create(&ProbeSettings::default()).unwrap();
        fixture.reseed().unwrap();
        fixture
    }

    #[test]
    fn ok_result_commits() {
        let fixture = seeded_fixture();
        let conn = fixture.open_connection().unwrap();
        let worker = spawn_in_transaction("writer", conn, BeginBehavior::Deferred, |tx| {
            Ok(tx.execute("UPDATE example SET text = 'committed' WHERE id = 23", [])?)
        })
        .unwrap();

        assert_eq!(worker.join().unwrap(), 1);
        assert_eq!(fixture.probe_text().unwrap().as_deref(), Some("committed"));
    }

    #[test]
    fn err_result_rolls_back_and_reports_role() {
        let fixture = seeded_fixture();
        let conn = fixture.open_connection().unwrap();
        let worker = spawn_in_transaction("failing", conn, BeginBehavior::Deferred, |tx| {
            tx.execute("UPDATE example SET text = 'lost' WHERE id = 23", [])?;
            tx.execute("UPDATE no_such_table SET x = 1", [])?;
            Ok(())
        })
        .unwrap();

        let err = worker.join().unwrap_err();
        match err {
            LockProbeError::Worker { role, source } => {
                assert_eq!(role, "failing");
                assert!(matches!(*source, LockProbeError::Rusqlite(_)));
            }
            other => panic!("expected worker error, got {other}"),
        }
        assert_eq!(fixture.probe_text().unwrap().as_deref(), Some("Insert"));
    }

    #[test]
    fn panic_is_surfaced() {
        let fixture = seeded_fixture();
        let conn = fixture.open_connection().unwrap();
        let worker: WorkerHandle<()> =
            spawn_in_transaction("panicky", conn, BeginBehavior::Deferred, |_tx| {
                panic!("boom");
            })
            .unwrap();

        assert!(matches!(
            worker.join(),
            Err(LockProbeError::WorkerPanicked { role }) if role == "panicky"
        ));
    }

    #[test]
    fn immediate_transaction_holds_write_lock_until_commit() {
        let fixture = seeded_fixture();
        let conn = fixture.open_connection().unwrap();
        let release = Arc::new(Latch::new());
        let holding = Arc::new(Latch::new());

        let worker = {
            let release = Arc::clone(&release);
            let holding = Arc::clone(&holding);
            spawn_in_transaction("holder", conn, BeginBehavior::Immediate, move |_tx| {
                holding.signal();
                release.wait_timeout(Duration::from_secs(5));
                Ok(())
            })
            .unwrap()
        };

        assert!(holding.wait_timeout(Duration::from_secs(5)));
        let other = fixture.open_connection().unwrap();
        other.busy_timeout(Duration::from_millis(10)).unwrap();
        let err = other
            .execute("UPDATE example SET text = 'blocked' WHERE id = 23", [])
            .unwrap_err();
        assert_eq!(err.sqlite_error_code(), Some(ErrorCode::DatabaseBusy));

        release.signal();
        worker.join().unwrap();
        other
            .execute("UPDATE example SET text = 'after' WHERE id = 23", [])
            .unwrap();
    }

    #[test]
    fn begin_behavior_names() {
        let names: Vec<_> = BeginBehavior::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["deferred", "immediate", "exclusive"]);
    }
}
