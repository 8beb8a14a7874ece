//! `tracing` setup for sweeps and tests.
//!
//! A sweep writes human-readable output to stderr and JSON lines to
//! `<run_dir>/lockprobe.log.jsonl`, so every scenario outcome carries its
//! structured fields (`scenario`, `role`, `elapsed_ms`) for later analysis.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// File name of the JSON-lines log inside the run directory.
pub const LOG_FILE_NAME: &str = "lockprobe.log.jsonl";

/// Returned by [`init_logging`]; keep it alive until the process exits.
#[derive(Debug)]
pub struct LogGuard {
    pub log_path: PathBuf,
}

/// JSON-lines layer over `file`.  Worker threads are named after their
/// role, so the thread name identifies which participant logged an event.
fn json_file_layer<S>(file: File) -> impl Layer<S> + Send + Sync
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_writer(Arc::new(file))
        .with_target(true)
        .with_thread_names(true)
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber: compact terminal output on stderr plus
/// the JSON-lines file in `run_dir`.
///
/// `verbose` lowers the default level to `debug` (worker lifecycle and
/// signal timeouts); `RUST_LOG` overrides either default.
///
/// # Errors
///
/// Returns `std::io::Error` if the run directory or log file cannot be
/// created.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging(run_dir: &Path, verbose: bool) -> std::io::Result<LogGuard> {
    std::fs::create_dir_all(run_dir)?;
    let log_path = run_dir.join(LOG_FILE_NAME);
    let file = File::create(&log_path)?;

    tracing_subscriber::registry()
        .with(default_filter(if verbose { "debug" } else { "info" }))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(json_file_layer(file))
        .init();

    Ok(LogGuard { log_path })
}

/// Terminal-only logging captured by the test harness.  Later calls are
/// no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(default_filter("info"))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}

/// Run `f`, then log `operation`, elapsed time, and success.
pub fn log_timed_operation<T, E: std::fmt::Display>(
    operation: &str,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let start = Instant::now();
    let result = f();
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match &result {
        Ok(_) => tracing::info!(operation, elapsed_ms, success = true, "operation complete"),
        Err(e) => tracing::warn!(
            operation,
            elapsed_ms,
            success = false,
            error = %e,
            "operation failed"
        ),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_events(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn timed_operation_writes_one_json_event_per_call() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log_path = tmp.path().join(LOG_FILE_NAME);
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("info"))
            .with(json_file_layer(File::create(&log_path).unwrap()));

        tracing::subscriber::with_default(subscriber, || {
            let ok: Result<u32, String> = log_timed_operation("sweep", || Ok(7));
            assert_eq!(ok.unwrap(), 7);
            let err: Result<u32, String> =
                log_timed_operation("reseed", || Err("database is locked".to_owned()));
            assert!(err.is_err());
            tracing::debug!("filtered out");
        });

        let events = json_events(&log_path);
        assert_eq!(events.len(), 2);

        let fields = &events[0]["fields"];
        assert_eq!(events[0]["level"], "INFO");
        assert_eq!(fields["operation"], "sweep");
        assert_eq!(fields["success"], true);
        assert!(fields["elapsed_ms"].is_u64());

        assert_eq!(events[1]["level"], "WARN");
        assert_eq!(events[1]["fields"]["operation"], "reseed");
        assert_eq!(events[1]["fields"]["error"], "database is locked");
    }

    #[test]
    fn worker_thread_name_is_recorded() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log_path = tmp.path().join(LOG_FILE_NAME);
        let subscriber = tracing_subscriber::registry()
            .with(json_file_layer(File::create(&log_path).unwrap()));

        let dispatch = tracing::Dispatch::new(subscriber);
        std::thread::Builder::new()
            .name("lockprobe-holder".to_owned())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    tracing::info!(role = "holder", "transaction started");
                });
            })
            .unwrap()
            .join()
            .unwrap();

        let events = json_events(&log_path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["threadName"], "lockprobe-holder");
        assert_eq!(events[0]["fields"]["role"], "holder");
    }
}
