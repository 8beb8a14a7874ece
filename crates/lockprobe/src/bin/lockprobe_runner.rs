use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use lockprobe::logging::{init_logging, log_timed_operation};
use lockprobe::report::{render_sweep_report, run_sweep};
use lockprobe::scenario::{Scenario, find_scenario, scenario_catalog};
use lockprobe::{LockProbeResult, ProbeSettings};

#[derive(Debug, Default)]
struct CliConfig {
    config_path: Option<PathBuf>,
    repetitions: Option<u32>,
    settle_ms: Option<u64>,
    signal_timeout_ms: Option<u64>,
    busy_timeout_ms: Option<u32>,
    scenarios: Vec<String>,
    run_dir: Option<PathBuf>,
    json_out: Option<PathBuf>,
    report_out: Option<PathBuf>,
    verbose: bool,
    list: bool,
}

fn print_help() {
    let help = "\
lockprobe_runner - sweep the lock-probe scenario catalog against SQLite

USAGE:
    cargo run -p lockprobe --bin lockprobe_runner -- [OPTIONS]

OPTIONS:
    --config <PATH>             Load settings from a JSON file
    --repetitions <N>           Runs per scenario (default: 10)
    --scenario <NAME>           Only run this scenario (repeatable)
    --settle-ms <MS>            Coordinator settle interval (default: 100)
    --signal-timeout-ms <MS>    Bound for every barrier wait (default: 1000)
    --busy-timeout-ms <MS>      SQLite busy timeout per worker (default: 5000)
    --run-dir <PATH>            Directory for the JSON-lines log (default: artifacts/lockprobe)
    --json-out <PATH>           Write the sweep report as JSON
    --report-out <PATH>         Write the Markdown report to a file
    --list                      List scenarios and exit
    -v, --verbose               Debug-level logging
    -h, --help                  Show this help
";
    println!("{help}");
}

fn take_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_num<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse::<T>()
        .map_err(|_| format!("invalid {flag} value: {raw}"))
}

fn parse_args(args: &[String]) -> Result<Option<CliConfig>, String> {
    let mut cfg = CliConfig::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                cfg.config_path = Some(PathBuf::from(take_value(args, &mut i, "--config")?));
            }
            "--repetitions" => {
                let raw = take_value(args, &mut i, "--repetitions")?;
                cfg.repetitions = Some(parse_num(raw, "--repetitions")?);
            }
            "--scenario" => cfg
                .scenarios
                .push(take_value(args, &mut i, "--scenario")?.to_owned()),
            "--settle-ms" => {
                let raw = take_value(args, &mut i, "--settle-ms")?;
                cfg.settle_ms = Some(parse_num(raw, "--settle-ms")?);
            }
            "--signal-timeout-ms" => {
                let raw = take_value(args, &mut i, "--signal-timeout-ms")?;
                cfg.signal_timeout_ms = Some(parse_num(raw, "--signal-timeout-ms")?);
            }
            "--busy-timeout-ms" => {
                let raw = take_value(args, &mut i, "--busy-timeout-ms")?;
                cfg.busy_timeout_ms = Some(parse_num(raw, "--busy-timeout-ms")?);
            }
            "--run-dir" => {
                cfg.run_dir = Some(PathBuf::from(take_value(args, &mut i, "--run-dir")?));
            }
            "--json-out" => {
                cfg.json_out = Some(PathBuf::from(take_value(args, &mut i, "--json-out")?));
            }
            "--report-out" => {
                cfg.report_out = Some(PathBuf::from(take_value(args, &mut i, "--report-out")?));
            }
            "--list" => cfg.list = true,
            "-v" | "--verbose" => cfg.verbose = true,
            "-h" | "--help" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    Ok(Some(cfg))
}

fn resolve_settings(cfg: &CliConfig) -> LockProbeResult<ProbeSettings> {
    let mut settings = match &cfg.config_path {
        Some(path) => ProbeSettings::load(path)?,
        None => ProbeSettings::default(),
    };
    if let Some(n) = cfg.repetitions {
        settings.repetitions = n;
    }
    if let Some(ms) = cfg.settle_ms {
        settings.settle_ms = ms;
    }
    if let Some(ms) = cfg.signal_timeout_ms {
        settings.signal_timeout_ms = ms;
    }
    if let Some(ms) = cfg.busy_timeout_ms {
        settings.busy_timeout_ms = ms;
    }
    settings.validate()?;
    Ok(settings)
}

fn resolve_scenarios(names: &[String]) -> LockProbeResult<Vec<Scenario>> {
    if names.is_empty() {
        return Ok(scenario_catalog().to_vec());
    }
    names
        .iter()
        .map(|name| find_scenario(name).copied())
        .collect()
}

fn run(cfg: &CliConfig) -> LockProbeResult<bool> {
    let settings = resolve_settings(cfg)?;
    let scenarios = resolve_scenarios(&cfg.scenarios)?;

    let run_dir = cfg
        .run_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("artifacts/lockprobe"));
    let guard = init_logging(&run_dir, cfg.verbose)?;
    tracing::info!(log_path = %guard.log_path.display(), "logging initialized");

    let report = log_timed_operation("sweep", || run_sweep(&settings, &scenarios))?;
    let markdown = render_sweep_report(&report);
    println!("{markdown}");

    if let Some(path) = &cfg.json_out {
        fs::write(path, report.to_json_pretty()?)?;
        tracing::info!(path = %path.display(), "wrote JSON report");
    }
    if let Some(path) = &cfg.report_out {
        fs::write(path, &markdown)?;
        tracing::info!(path = %path.display(), "wrote Markdown report");
    }

    Ok(report.all_passed())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let cfg = match parse_args(&args) {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("error: {e}");
            print_help();
            return ExitCode::from(2);
        }
    };

    if cfg.list {
        for scenario in scenario_catalog() {
            println!(
                "{:<45} {:<15} {}",
                scenario.name, scenario.expectation, scenario.probe
            );
        }
        return ExitCode::SUCCESS;
    }

    match run(&cfg) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}
