//! Functional-test harness for the pack8s/kubevirtci cluster toolchain: bring
//! a named cluster up, check that its API server runs, tear it down.

pub mod cluster;
pub mod config;
pub mod environ;
pub mod error;
pub mod lockfile;
pub mod orchestrator;
pub mod probe;
pub mod supervise;

#[cfg(all(test, unix))]
mod testutil;

pub use cluster::{ClusterController, ClusterStatus};
pub use config::Config;
pub use error::FunctestError;
pub use orchestrator::{run, run_with, ClusterSession};
pub use probe::{check_apiserver, PodList, WorkloadQuery};
