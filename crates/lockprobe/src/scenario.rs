//! Catalog of probe statements and the label ordering each should produce.
//!
//! SQLite has no per-statement lock hints, so a probe's "hint" is the begin
//! behavior of the holder's transaction.  The statement itself is one of four
//! actions; the prepare-only form compiles a statement without stepping it,
//! which is the SQLite counterpart of handing a statement to a driver without
//! fetching from it.

use std::fmt;

use rusqlite::Transaction;
use serde::{Deserialize, Serialize};

use crate::runner::BeginBehavior;
use crate::{LockProbeError, LockProbeResult, PROBE_LABEL, SECOND_LABEL, WAIT_LABEL};

/// What the holder does inside its transaction before signaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "sql", rename_all = "snake_case")]
pub enum ProbeAction {
    /// Execute nothing.
    Noop,
    /// Step a query and read the first column of its first row.
    Query(&'static str),
    /// Run a DML statement to completion.
    Execute(&'static str),
    /// Prepare the statement and drop it without stepping.
    PrepareOnly(&'static str),
}

impl ProbeAction {
    /// SQL text of the action, if any.
    #[must_use]
    pub const fn sql(self) -> Option<&'static str> {
        match self {
            Self::Noop => None,
            Self::Query(sql) | Self::Execute(sql) | Self::PrepareOnly(sql) => Some(sql),
        }
    }

    /// Run the action in `tx`.
    ///
    /// # Errors
    ///
    /// Returns `LockProbeError::Rusqlite` if preparing or stepping fails.
    pub fn execute(self, tx: &Transaction<'_>) -> LockProbeResult<()> {
        match self {
            Self::Noop => {}
            Self::Query(sql) => {
                let value: rusqlite::types::Value = tx.query_row(sql, [], |row| row.get(0))?;
                tracing::trace!(?value, "probe query returned");
            }
            Self::Execute(sql) => {
                let changed = tx.execute(sql, [])?;
                tracing::trace!(changed, "probe statement executed");
            }
            Self::PrepareOnly(sql) => {
                let stmt = tx.prepare(sql)?;
                drop(stmt);
            }
        }
        Ok(())
    }
}

impl fmt::Display for ProbeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noop => f.write_str("noop"),
            Self::Query(sql) => write!(f, "query `{sql}`"),
            Self::Execute(sql) => write!(f, "execute `{sql}`"),
            Self::PrepareOnly(sql) => write!(f, "prepare-only `{sql}`"),
        }
    }
}

/// Statement form under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeStatement {
    pub begin: BeginBehavior,
    pub action: ProbeAction,
}

impl fmt::Display for ProbeStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.begin, self.action)
    }
}

/// Whether the probe should make the second worker's update wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    DoesNotBlock,
    Blocks,
}

impl Expectation {
    /// Label ordering a passing run produces.
    #[must_use]
    pub fn expected_order(self) -> [&'static str; 3] {
        match self {
            Self::DoesNotBlock => [PROBE_LABEL, SECOND_LABEL, WAIT_LABEL],
            Self::Blocks => [PROBE_LABEL, WAIT_LABEL, SECOND_LABEL],
        }
    }

    /// Classify an observed ordering, if it matches either expectation.
    #[must_use]
    pub fn classify(observed: &[String]) -> Option<Self> {
        [Self::DoesNotBlock, Self::Blocks]
            .into_iter()
            .find(|e| e.matches(observed))
    }

    #[must_use]
    pub fn matches(self, observed: &[String]) -> bool {
        observed.iter().map(String::as_str).eq(self.expected_order())
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::DoesNotBlock => "does not block",
            Self::Blocks => "blocks",
        })
    }
}

/// One probe statement paired with its expected outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub name: &'static str,
    pub probe: ProbeStatement,
    pub expectation: Expectation,
}

impl Scenario {
    const fn new(
        name: &'static str,
        begin: BeginBehavior,
        action: ProbeAction,
        expectation: Expectation,
    ) -> Self {
        Self {
            name,
            probe: ProbeStatement { begin, action },
            expectation,
        }
    }

    #[must_use]
    pub fn expected_order(&self) -> Vec<String> {
        self.expectation
            .expected_order()
            .iter()
            .map(|s| (*s).to_owned())
            .collect()
    }

    /// Compare an observed ordering against this scenario's expectation.
    ///
    /// # Errors
    ///
    /// Returns [`LockProbeError::OrderingMismatch`] carrying both sequences.
    pub fn verify_order(&self, actual: &[String]) -> LockProbeResult<()> {
        if self.expectation.matches(actual) {
            Ok(())
        } else {
            Err(LockProbeError::OrderingMismatch {
                scenario: self.name.to_owned(),
                expected: self.expected_order(),
                actual: actual.to_vec(),
            })
        }
    }
}

const SCENARIOS: &[Scenario] = &[
    Scenario::new(
        "noop_does_not_lock",
        BeginBehavior::Deferred,
        ProbeAction::Noop,
        Expectation::DoesNotBlock,
    ),
    Scenario::new(
        "select_does_not_lock",
        BeginBehavior::Deferred,
        ProbeAction::Query("SELECT 1 FROM example WHERE id = 23"),
        Expectation::DoesNotBlock,
    ),
    Scenario::new(
        "select_text_does_not_lock",
        BeginBehavior::Deferred,
        ProbeAction::Query("SELECT text FROM example WHERE id = 23"),
        Expectation::DoesNotBlock,
    ),
    Scenario::new(
        "prepared_update_does_not_lock",
        BeginBehavior::Deferred,
        ProbeAction::PrepareOnly("UPDATE example SET text = 'First Update' WHERE id = 23"),
        Expectation::DoesNotBlock,
    ),
    Scenario::new(
        "update_does_lock",
        BeginBehavior::Deferred,
        ProbeAction::Execute("UPDATE example SET text = 'First Update' WHERE id = 23"),
        Expectation::Blocks,
    ),
    // SQLite locks the whole database for writing, so touching a different
    // row still blocks the second worker.
    Scenario::new(
        "insert_other_row_does_lock",
        BeginBehavior::Deferred,
        ProbeAction::Execute("INSERT INTO example (id, text) VALUES (42, 'Other Row')"),
        Expectation::Blocks,
    ),
    Scenario::new(
        "select_in_immediate_transaction_does_lock",
        BeginBehavior::Immediate,
        ProbeAction::Query("SELECT text FROM example WHERE id = 23"),
        Expectation::Blocks,
    ),
    Scenario::new(
        "select_in_exclusive_transaction_does_lock",
        BeginBehavior::Exclusive,
        ProbeAction::Query("SELECT id FROM example WHERE id = 23"),
        Expectation::Blocks,
    ),
];

/// Every scenario, in catalog order.
#[must_use]
pub fn scenario_catalog() -> &'static [Scenario] {
    SCENARIOS
}

/// Look up a scenario by name.
///
/// # Errors
///
/// Returns [`LockProbeError::UnknownScenario`] if no scenario has that name.
pub fn find_scenario(name: &str) -> LockProbeResult<&'static Scenario> {
    SCENARIOS
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| LockProbeError::UnknownScenario {
            name: name.to_owned(),
        })
}
