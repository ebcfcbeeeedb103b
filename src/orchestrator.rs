use std::path::Path;
use std::time::Duration;

use crate::cluster::{ClusterController, ClusterStatus};
use crate::config::Config;
use crate::error::FunctestError;
use crate::probe::{OcQuery, PodList, WorkloadQuery};

/// Result reported when the probe itself could not produce a verdict.
pub const PROBE_FAILED: i32 = -1;

/// A cluster whose lock this process took. `stop` runs exactly once: through
/// `release`, or from `Drop` on any other way out.
#[derive(Debug)]
pub struct ClusterSession {
    cluster: ClusterController,
    timeout: Duration,
    released: bool,
}

impl ClusterSession {
    /// Starts `cluster`. Once the lock was taken, every failure path tears the
    /// cluster down again before the error is returned.
    pub fn acquire(mut cluster: ClusterController, timeout: Duration) -> Result<Self, FunctestError> {
        let started = cluster.start(timeout);
        if let Err(err) = started {
            if !cluster.holds_lock() {
                return Err(err);
            }
            drop(Self::owning(cluster, timeout));
            return Err(err);
        }
        let status = cluster.status();
        if status != ClusterStatus::Running {
            let provider = cluster.provider().to_string();
            drop(Self::owning(cluster, timeout));
            return Err(FunctestError::ClusterStart { provider, status });
        }
        Ok(Self::owning(cluster, timeout))
    }

    fn owning(cluster: ClusterController, timeout: Duration) -> Self {
        Self {
            cluster,
            timeout,
            released: false,
        }
    }

    pub fn cluster(&self) -> &ClusterController {
        &self.cluster
    }

    /// Stops the cluster and reports the status it ended in.
    pub fn release(mut self) -> Result<ClusterStatus, FunctestError> {
        self.released = true;
        self.cluster.stop(self.timeout)?;
        Ok(self.cluster.status())
    }
}

impl Drop for ClusterSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        tracing::info!(provider = %self.cluster.provider(), "tearing down cluster");
        if let Err(err) = self.cluster.stop(self.timeout) {
            tracing::error!(provider = %self.cluster.provider(), "cluster teardown failed: {err}");
        }
    }
}

/// Brings the cluster up, runs `check` on the pods reported by `oc`, and tears
/// the cluster down again.
pub fn run<C>(provider: &str, base_dir: &Path, cfg: &Config, check: C) -> Result<i32, FunctestError>
where
    C: FnOnce(&PodList) -> Result<i32, FunctestError>,
{
    run_with(
        provider,
        base_dir,
        cfg,
        |cluster, kubeconfig| OcQuery::for_cluster(cluster, kubeconfig, cfg),
        check,
    )
}

/// Like `run`, with the query collaborator built by `make_query` from the
/// running cluster and its kubeconfig.
pub fn run_with<Q, M, C>(
    provider: &str,
    base_dir: &Path,
    cfg: &Config,
    make_query: M,
    check: C,
) -> Result<i32, FunctestError>
where
    Q: WorkloadQuery,
    M: FnOnce(&ClusterController, &str) -> Q,
    C: FnOnce(&PodList) -> Result<i32, FunctestError>,
{
    let cluster = ClusterController::setup_with(provider, base_dir, cfg)?;
    let session = ClusterSession::acquire(cluster, cfg.timeout())?;
    tracing::info!(provider, "cluster running, probing");

    let outcome = probe(session.cluster(), make_query, check);
    let final_status = session.release()?;
    if final_status != ClusterStatus::Stopped {
        tracing::warn!(provider, status = %final_status, "cluster did not stop cleanly");
    }
    outcome
}

fn probe<Q, M, C>(cluster: &ClusterController, make_query: M, check: C) -> Result<i32, FunctestError>
where
    Q: WorkloadQuery,
    M: FnOnce(&ClusterController, &str) -> Q,
    C: FnOnce(&PodList) -> Result<i32, FunctestError>,
{
    let kubeconfig = cluster.kubeconfig()?;
    let query = make_query(cluster, &kubeconfig);
    let verdict = query.pods().and_then(|pods| check(&pods));
    match verdict {
        Ok(code) => {
            tracing::info!(provider = %cluster.provider(), code, "probe finished");
            Ok(code)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(PROBE_FAILED)
        }
    }
}
