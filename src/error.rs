use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cluster::ClusterStatus;

#[derive(Debug, Error)]
pub enum FunctestError {
    #[error("config error: {0}")]
    Configuration(String),
    #[error("{provider} already running (lock file {} exists)", .lock_path.display())]
    AlreadyRunning { provider: String, lock_path: PathBuf },
    #[error("{provider} not running (lock file {} missing)", .lock_path.display())]
    NotRunning { provider: String, lock_path: PathBuf },
    #[error("invalid transition: {from} -> {to}")]
    IllegalTransition { from: ClusterStatus, to: ClusterStatus },
    #[error("{provider} {operation} did not finish within {}s{}", .timeout.as_secs(), reap_note(.reap))]
    Timeout {
        provider: String,
        operation: &'static str,
        timeout: Duration,
        /// Set when the terminated process could not be reaped.
        #[source]
        reap: Option<Box<FunctestError>>,
    },
    #[error("process error: {0}")]
    Execution(String),
    #[error("failed to launch {operation} for {provider}: {source}")]
    Spawn {
        provider: String,
        operation: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("cluster start failed: {provider} ended in {status}")]
    ClusterStart {
        provider: String,
        status: ClusterStatus,
    },
    #[error("check failed: {0}")]
    Check(String),
    #[error("signal error: {0}")]
    Signal(#[from] nix::errno::Errno),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn reap_note(reap: &Option<Box<FunctestError>>) -> String {
    match reap {
        Some(err) => format!("; process not reaped: {err}"),
        None => String::new(),
    }
}
