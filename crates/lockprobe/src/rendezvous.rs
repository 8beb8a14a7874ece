//! Two-worker rendezvous that makes a lock conflict observable.
//!
//! ```text
//!  holder (probe begin)        second (deferred)           coordinator
//!  ───────────────────         ─────────────────           ───────────
//!  run probe statement
//!  log "Obtain Lock"
//!  signal probe_done ────────► await probe_done            await probe_done
//!  await holder_finished       UPDATE probe row            sleep settle
//!        │                       (blocks if locked)        log "wait"
//!        ◄──────────────────────────────────────────────── signal holder_finished
//!  COMMIT                      log "Second Update"
//!                              signal second_finished ───► await second_finished
//!                              COMMIT                      join both workers
//! ```
//!
//! Every await is bounded by `signal_timeout_ms`.  A timeout just lets the
//! participant proceed; the final label ordering is the only verdict.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::event_log::EventLog;
use crate::fixture::{PROBE_ROW_ID, ProbeFixture};
use crate::latch::RendezvousSignals;
use crate::runner::{BeginBehavior, spawn_in_transaction};
use crate::scenario::{Expectation, ProbeStatement, Scenario};
use crate::{LockProbeResult, PROBE_LABEL, SECOND_LABEL, WAIT_LABEL};

/// Worker role that runs the probe statement and holds its transaction open.
pub const HOLDER_ROLE: &str = "holder";
/// Worker role that issues the conflicting update.
pub const SECOND_ROLE: &str = "second";

const SECOND_UPDATE_SQL: &str = "UPDATE example SET text = ?1 WHERE id = ?2";

/// What one rendezvous run observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousOutcome {
    /// Final event log, in append order.
    pub observed: Vec<String>,
    /// Whether the coordinator saw `probe_done` before its timeout.
    pub probe_signaled: bool,
    /// Whether the coordinator saw `second_finished` before its timeout.
    pub second_signaled: bool,
    /// Wall-clock duration of the run, reseed included.
    pub elapsed_ms: u64,
}

impl RendezvousOutcome {
    /// Which ordering the run produced, if it matches either expectation.
    #[must_use]
    pub fn classification(&self) -> Option<Expectation> {
        Expectation::classify(&self.observed)
    }
}

/// Reseed the probe row and run one rendezvous with `probe` as the holder's
/// statement.  The observed ordering is returned without judging it.
///
/// # Errors
///
/// Returns an error if reseeding or opening a worker connection fails, or if
/// either worker returned an error or panicked.  Connections are opened
/// before any worker starts, and every spawned worker is joined before an
/// error is returned.
pub fn run_rendezvous(
    fixture: &ProbeFixture,
    probe: ProbeStatement,
) -> LockProbeResult<RendezvousOutcome> {
    let start = Instant::now();
    fixture.reseed()?;

    let settings = fixture.settings();
    let timeout = settings.signal_timeout();
    let signals = RendezvousSignals::new();
    let log = Arc::new(EventLog::new());

    // Both connections exist before either worker starts.
    let holder_conn = fixture.open_connection()?;
    let second_conn = fixture.open_connection()?;

    let holder = {
        let signals = signals.clone();
        let log = Arc::clone(&log);
        spawn_in_transaction(HOLDER_ROLE, holder_conn, probe.begin, move |tx| {
            probe.action.execute(tx)?;
            log.append(PROBE_LABEL);
            signals.probe_done.signal();
            if !signals.holder_finished.wait_timeout(timeout) {
                tracing::warn!(role = HOLDER_ROLE, "holder release timed out");
            }
            Ok(())
        })?
    };

    let second = {
        let signals = signals.clone();
        let log = Arc::clone(&log);
        let spawned = spawn_in_transaction(
            SECOND_ROLE,
            second_conn,
            BeginBehavior::Deferred,
            move |tx| {
                if !signals.probe_done.wait_timeout(timeout) {
                    tracing::warn!(role = SECOND_ROLE, "probe signal timed out");
                }
                tx.execute(SECOND_UPDATE_SQL, params![SECOND_LABEL, PROBE_ROW_ID])?;
                log.append(SECOND_LABEL);
                signals.second_finished.signal();
                Ok(())
            },
        );
        match spawned {
            Ok(handle) => handle,
            Err(e) => {
                signals.holder_finished.signal();
                let _ = holder.join();
                return Err(e);
            }
        }
    };

    let probe_signaled = signals.probe_done.wait_timeout(timeout);
    if !probe_signaled {
        tracing::warn!("coordinator did not see the probe signal");
    }
    thread::sleep(settings.settle());
    log.append(WAIT_LABEL);
    signals.holder_finished.signal();
    let second_signaled = signals.second_finished.wait_timeout(timeout);
    if !second_signaled {
        tracing::warn!("coordinator did not see the second worker finish");
    }

    let holder_result = holder.join();
    let second_result = second.join();
    holder_result?;
    second_result?;

    let outcome = RendezvousOutcome {
        observed: log.snapshot(),
        probe_signaled,
        second_signaled,
        elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    tracing::debug!(
        probe = %probe,
        observed = ?outcome.observed,
        elapsed_ms = outcome.elapsed_ms,
        "rendezvous finished"
    );
    Ok(outcome)
}

/// Run one rendezvous for `scenario` and check its ordering.
///
/// # Errors
///
/// Returns any error from [`run_rendezvous`], or
/// `LockProbeError::OrderingMismatch` if the observed ordering differs from
/// the scenario's expectation.
pub fn run_scenario(
    fixture: &ProbeFixture,
    scenario: &Scenario,
) -> LockProbeResult<RendezvousOutcome> {
    let outcome = run_rendezvous(fixture, scenario.probe)?;
    match scenario.verify_order(&outcome.observed) {
        Ok(()) => {
            tracing::info!(
                scenario = scenario.name,
                expectation = %scenario.expectation,
                elapsed_ms = outcome.elapsed_ms,
                "scenario passed"
            );
            Ok(outcome)
        }
        Err(e) => {
            tracing::warn!(scenario = scenario.name, error = %e, "scenario failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::find_scenario;
    use crate::{LockProbeError, ProbeSettings};

    #[test]
    fn outcome_classification() {
        let outcome = RendezvousOutcome {
            observed: vec![
                PROBE_LABEL.to_owned(),
                WAIT_LABEL.to_owned(),
                SECOND_LABEL.to_owned(),
            ],
            probe_signaled: true,
            second_signaled: true,
            elapsed_ms: 0,
        };
        assert_eq!(outcome.classification(), Some(Expectation::Blocks));

        let partial = RendezvousOutcome {
            observed: vec![PROBE_LABEL.to_owned(), WAIT_LABEL.to_owned()],
            ..outcome
        };
        assert_eq!(partial.classification(), None);
    }

    #[test]
    fn blocked_update_lands_after_wait() {
        let fixture = ProbeFixture::create(&ProbeSettings::default()).unwrap();
        let scenario = find_scenario("update_does_lock").unwrap();
        let outcome = run_scenario(&fixture, scenario).unwrap();
        assert!(outcome.probe_signaled);
        assert_eq!(outcome.observed, scenario.expected_order());
        assert_eq!(fixture.probe_text().unwrap().as_deref(), Some(SECOND_LABEL));
    }

    #[test]
    fn unblocked_update_lands_before_wait() {
        let fixture = ProbeFixture::create(&ProbeSettings::default()).unwrap();
        let scenario = find_scenario("select_does_not_lock").unwrap();
        let outcome = run_scenario(&fixture, scenario).unwrap();
        assert!(outcome.second_signaled);
        assert_eq!(outcome.observed.len(), 3);
        assert_eq!(outcome.classification(), Some(Expectation::DoesNotBlock));
    }

    #[test]
    fn unopenable_database_fails_without_waiting_on_signals() {
        let fixture = ProbeFixture::create(&ProbeSettings::default()).unwrap();
        std::fs::remove_file(fixture.db_path()).unwrap();
        std::fs::create_dir(fixture.db_path()).unwrap();

        let scenario = find_scenario("update_does_lock").unwrap();
        let start = Instant::now();
        let err = run_rendezvous(&fixture, scenario.probe).unwrap_err();
        assert!(matches!(err, LockProbeError::Rusqlite(_)), "got {err}");
        assert!(start.elapsed() < fixture.settings().signal_timeout());
    }

    #[test]
    fn failed_run_releases_the_write_lock() {
        let fixture = ProbeFixture::create(&ProbeSettings::default()).unwrap();
        let probe = ProbeStatement {
            begin: BeginBehavior::Immediate,
            action: crate::scenario::ProbeAction::Execute("UPDATE missing SET x = 1"),
        };
        assert!(run_rendezvous(&fixture, probe).is_err());

        let conn = fixture.open_connection().unwrap();
        conn.busy_timeout(std::time::Duration::ZERO).unwrap();
        conn.execute_batch("BEGIN IMMEDIATE; COMMIT;").unwrap();
    }
}
