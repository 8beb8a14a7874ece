//! Repeated scenario sweeps and their reports.
//!
//! The rendezvous depends on wall-clock windows, so a single passing run says
//! little.  A sweep executes every scenario `repetitions` times against one
//! fixture and records each observed ordering.  Worker faults are captured as
//! failed runs instead of aborting the sweep.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::fixture::{PROBE_TABLE, ProbeFixture};
use crate::rendezvous::run_rendezvous;
use crate::scenario::{Expectation, Scenario};
use crate::{LockProbeResult, ProbeSettings};

/// Schema version for the sweep report format.
pub const SWEEP_SCHEMA_V1: &str = "lockprobe.sweep.v1";

/// One execution of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// 1-based repetition index.
    pub iteration: u32,
    /// Observed label ordering (empty if the run failed before reading it).
    pub observed: Vec<String>,
    pub passed: bool,
    pub elapsed_ms: u64,
    /// Worker or database error, if the run did not complete.
    pub error: Option<String>,
}

/// All runs of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    /// Human-readable probe statement (`begin / action`).
    pub probe: String,
    pub expectation: Expectation,
    pub expected: Vec<String>,
    pub runs: Vec<RunRecord>,
}

impl ScenarioReport {
    #[must_use]
    pub fn passed(&self) -> usize {
        self.runs.iter().filter(|r| r.passed).count()
    }

    /// Runs that produced the wrong ordering or failed outright.
    #[must_use]
    pub fn violations(&self) -> usize {
        self.runs.len() - self.passed()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.violations() == 0
    }

    /// Count of runs per observed outcome: `blocks`, `does not block`,
    /// `unrecognized`, or `error`.
    #[must_use]
    pub fn outcome_histogram(&self) -> BTreeMap<String, usize> {
        let mut hist = BTreeMap::new();
        for run in &self.runs {
            let key = if run.error.is_some() {
                "error".to_owned()
            } else {
                Expectation::classify(&run.observed)
                    .map_or_else(|| "unrecognized".to_owned(), |e| e.to_string())
            };
            *hist.entry(key).or_insert(0) += 1;
        }
        hist
    }

    /// First failing run, for diagnostics.
    #[must_use]
    pub fn first_failure(&self) -> Option<&RunRecord> {
        self.runs.iter().find(|r| !r.passed)
    }
}

/// Results of sweeping a set of scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub schema_version: String,
    pub settings: ProbeSettings,
    pub scenarios: Vec<ScenarioReport>,
    pub elapsed_ms: u64,
}

impl SweepReport {
    #[must_use]
    pub fn total_runs(&self) -> usize {
        self.scenarios.iter().map(|s| s.runs.len()).sum()
    }

    #[must_use]
    pub fn violations(&self) -> usize {
        self.scenarios.iter().map(ScenarioReport::violations).sum()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.violations() == 0
    }

    /// # Errors
    ///
    /// Returns `LockProbeError::Json` if serialization fails.
    pub fn to_json_pretty(&self) -> LockProbeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Execute `scenario` `repetitions` times, reseeding before each run.
#[must_use]
pub fn run_scenario_repeated(
    fixture: &ProbeFixture,
    scenario: &Scenario,
    repetitions: u32,
) -> ScenarioReport {
    let mut runs = Vec::with_capacity(repetitions as usize);

    for iteration in 1..=repetitions {
        let start = Instant::now();
        let record = match run_rendezvous(fixture, scenario.probe) {
            Ok(outcome) => match scenario.verify_order(&outcome.observed) {
                Ok(()) => RunRecord {
                    iteration,
                    observed: outcome.observed,
                    passed: true,
                    elapsed_ms: outcome.elapsed_ms,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(
                        scenario = scenario.name,
                        iteration,
                        error = %e,
                        "ordering violation"
                    );
                    RunRecord {
                        iteration,
                        observed: outcome.observed,
                        passed: false,
                        elapsed_ms: outcome.elapsed_ms,
                        error: None,
                    }
                }
            },
            Err(e) => {
                tracing::warn!(scenario = scenario.name, iteration, error = %e, "run failed");
                RunRecord {
                    iteration,
                    observed: Vec::new(),
                    passed: false,
                    elapsed_ms: elapsed_ms(start),
                    error: Some(e.to_string()),
                }
            }
        };
        runs.push(record);
    }

    let report = ScenarioReport {
        name: scenario.name.to_owned(),
        probe: scenario.probe.to_string(),
        expectation: scenario.expectation,
        expected: scenario.expected_order(),
        runs,
    };
    tracing::info!(
        scenario = scenario.name,
        passed = report.passed(),
        violations = report.violations(),
        "scenario sweep complete"
    );
    report
}

/// Validate `settings`, create one fixture, and sweep `scenarios`.
///
/// # Errors
///
/// Returns `LockProbeError::Config` for invalid settings, or a fixture
/// bootstrap error.  Per-run failures are recorded in the report.
pub fn run_sweep(settings: &ProbeSettings, scenarios: &[Scenario]) -> LockProbeResult<SweepReport> {
    settings.validate()?;
    let start = Instant::now();
    let fixture = ProbeFixture::create(settings)?;
    tracing::info!(
        scenarios = scenarios.len(),
        repetitions = settings.repetitions,
        settings = %settings,
        "starting sweep"
    );

    let reports = scenarios
        .iter()
        .map(|scenario| run_scenario_repeated(&fixture, scenario, settings.repetitions))
        .collect();

    Ok(SweepReport {
        schema_version: SWEEP_SCHEMA_V1.to_owned(),
        settings: settings.clone(),
        scenarios: reports,
        elapsed_ms: elapsed_ms(start),
    })
}

// ── Report rendering ─────────────────────────────────────────────────

/// Render a sweep as Markdown: settings table, per-scenario table, and the
/// first failing ordering of every scenario that had violations.
#[must_use]
pub fn render_sweep_report(report: &SweepReport) -> String {
    let mut out = String::with_capacity(4096);

    let _ = writeln!(out, "# Lock Probe Sweep\n");
    let verdict = if report.all_passed() { "PASS" } else { "FAIL" };
    let _ = writeln!(
        out,
        "> {verdict}: {} runs across {} scenarios on table `{PROBE_TABLE}`, {} violations.\n",
        report.total_runs(),
        report.scenarios.len(),
        report.violations()
    );

    let s = &report.settings;
    let _ = writeln!(out, "## Settings\n");
    let _ = writeln!(out, "| Parameter | Value |");
    let _ = writeln!(out, "|-----------|-------|");
    let _ = writeln!(out, "| Journal mode | {} |", s.journal_mode);
    let _ = writeln!(out, "| Busy timeout (ms) | {} |", s.busy_timeout_ms);
    let _ = writeln!(out, "| Signal timeout (ms) | {} |", s.signal_timeout_ms);
    let _ = writeln!(out, "| Settle interval (ms) | {} |", s.settle_ms);
    let _ = writeln!(out, "| Repetitions | {} |", s.repetitions);
    let _ = writeln!(out);

    if report.scenarios.is_empty() {
        let _ = writeln!(out, "_No scenarios were run._");
        return out;
    }

    let _ = writeln!(out, "## Scenarios\n");
    let _ = writeln!(out, "| Scenario | Probe | Expected | Passed | Violations |");
    let _ = writeln!(out, "|----------|-------|----------|--------|------------|");
    for sc in &report.scenarios {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {}/{} | {} |",
            sc.name,
            sc.probe,
            sc.expectation,
            sc.passed(),
            sc.runs.len(),
            sc.violations()
        );
    }
    let _ = writeln!(out);

    let failing: Vec<_> = report.scenarios.iter().filter(|s| !s.all_passed()).collect();
    if !failing.is_empty() {
        let _ = writeln!(out, "## Violations\n");
        for sc in failing {
            let Some(run) = sc.first_failure() else { continue };
            let _ = writeln!(out, "- **{}** (run {}):", sc.name, run.iteration);
            let _ = writeln!(out, "  - expected: {:?}", sc.expected);
            match &run.error {
                Some(err) => {
                    let _ = writeln!(out, "  - error: {err}");
                }
                None => {
                    let _ = writeln!(out, "  - actual: {:?}", run.observed);
                }
            }
            let hist = sc
                .outcome_histogram()
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "  - outcomes: {hist}");
        }
        let _ = writeln!(out);
    }

    out
}
