use chrono::{DateTime, Utc};
use clap::error::ErrorKind;
use clap::Parser;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pack8s_functest::config::{self, TEST_DIR_ENV};
use pack8s_functest::{check_apiserver, run, FunctestError};

#[derive(Parser, Debug)]
#[command(
    name = "pack8s-functest",
    version,
    about = "Bring up a kubevirtci cluster, check its API server and tear it down"
)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    timeout_sec: Option<u64>,
    /// Cluster provider, e.g. k8s-1.17
    provider: String,
    /// Directory holding kubevirtci/ and bin/ (default: $PACK8S_FUNCTEST_DIR)
    test_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    provider: String,
    test_dir: PathBuf,
    test_dir_source: &'static str,
    exit_code: i32,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                eprint!("{err}");
                std::process::exit(1);
            }
        },
    };

    let Some((test_dir, source)) = config::resolve_test_dir(cli.test_dir.as_ref()) else {
        eprintln!("pack8s-functest: no test-dir given, nor env var {TEST_DIR_ENV} set");
        std::process::exit(1);
    };
    if !cli.json {
        println!("test dir: {} from {}", test_dir.display(), source.as_str());
    }
    tracing::info!(test_dir = %test_dir.display(), source = source.as_str(), "resolved test dir");

    let started_at = Utc::now();
    match execute(&cli, &test_dir) {
        Ok(exit_code) => {
            let report = RunReport {
                provider: cli.provider.clone(),
                test_dir,
                test_dir_source: source.as_str(),
                exit_code,
                started_at,
                finished_at: Utc::now(),
            };
            if let Err(err) = print_report(&cli, &report) {
                eprintln!("{err}");
            }
            std::process::exit(exit_code);
        }
        Err(err) => {
            if cli.json {
                let payload = JsonResult::<serde_json::Value> {
                    ok: false,
                    result: None,
                    error: Some(err.to_string()),
                };
                if let Err(err) = print_json(&payload) {
                    eprintln!("{err}");
                }
            } else {
                eprintln!("{err}");
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn execute(cli: &Cli, test_dir: &Path) -> Result<i32, FunctestError> {
    let source = config::resolve_config_path(cli.config.as_ref());
    let mut cfg = config::load_config(&source)?;
    if let Some(timeout_sec) = cli.timeout_sec {
        if timeout_sec == 0 {
            return Err(FunctestError::Configuration(
                "--timeout-sec must be greater than zero".to_string(),
            ));
        }
        cfg.timeout_sec = timeout_sec;
    }
    tracing::debug!(config = %source.path().display(), ?cfg, "loaded config");
    run(&cli.provider, test_dir, &cfg, |pods| Ok(check_apiserver(pods)))
}

fn print_report(cli: &Cli, report: &RunReport) -> Result<(), FunctestError> {
    if cli.json {
        let error = if report.exit_code == 0 {
            None
        } else {
            Some(format!("health check failed with code {}", report.exit_code))
        };
        return print_json(&JsonResult {
            ok: report.exit_code == 0,
            result: Some(report),
            error,
        });
    }
    let verdict = if report.exit_code == 0 { "PASS" } else { "FAIL" };
    println!("{}: {} (exit code {})", report.provider, verdict, report.exit_code);
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), FunctestError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
