use nix::unistd::{access, AccessFlags};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::config::Config;
use crate::environ::{cluster_env, resolve_program, Environment};
use crate::error::FunctestError;
use crate::lockfile::LockFile;
use crate::supervise::{terminate_and_reap, wait_bounded, WaitOutcome};

const KUBEVIRTCI_DIR: &str = "kubevirtci";
const PROVIDERS_DIR: &str = "kubevirtci/cluster-up/cluster";
const KUBECONFIG_SCRIPT: &str = "kubevirtci/cluster-up/kubeconfig.sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Failed => "FAILED",
        }
    }

    /// Only `STARTING -> RUNNING` and `STOPPING -> STOPPED` are legal.
    /// Moving to `FAILED` does not go through this check.
    pub fn check_transition(self, to: ClusterStatus) -> Result<(), FunctestError> {
        match (self, to) {
            (Self::Starting, Self::Running) | (Self::Stopping, Self::Stopped) => Ok(()),
            (from, to) => Err(FunctestError::IllegalTransition { from, to }),
        }
    }

    fn in_flight(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one named cluster through bring-up and tear-down.
///
/// A child process is owned only while the status is `STARTING` or
/// `STOPPING`. The lock file, not `status`, decides whether the cluster is up:
/// it outlives this object and is only removed by a clean `stop`.
#[derive(Debug)]
pub struct ClusterController {
    status: ClusterStatus,
    provider: String,
    base_dir: PathBuf,
    child: Option<Child>,
    env: Environment,
    lock: LockFile,
    lock_held: bool,
}

impl ClusterController {
    pub fn setup(provider: &str, base_dir: &Path) -> Result<Self, FunctestError> {
        Self::setup_with(provider, base_dir, &Config::default())
    }

    pub fn setup_with(provider: &str, base_dir: &Path, cfg: &Config) -> Result<Self, FunctestError> {
        if provider.is_empty() || provider.contains('/') || provider == "." || provider == ".." {
            return Err(FunctestError::Configuration(format!(
                "invalid provider name {provider:?}"
            )));
        }
        let provider_path = base_dir.join(PROVIDERS_DIR).join(provider);
        if !is_readable_executable(&provider_path) {
            return Err(FunctestError::Configuration(format!(
                "unknown provider {provider} (no usable {})",
                provider_path.display()
            )));
        }
        let helper_path = base_dir.join("bin").join(&cfg.helper_binary);
        if !is_readable_executable(&helper_path) {
            return Err(FunctestError::Configuration(format!(
                "missing testing binary {} in {}",
                cfg.helper_binary,
                base_dir.join("bin").display()
            )));
        }
        Ok(Self {
            status: ClusterStatus::Stopped,
            provider: provider.to_string(),
            base_dir: base_dir.to_path_buf(),
            child: None,
            env: cluster_env(base_dir, provider, &cfg.runtime),
            lock: LockFile::new(base_dir, provider),
            lock_held: false,
        })
    }

    pub fn status(&self) -> ClusterStatus {
        self.status
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// True once `start` created the lock file and no clean `stop` removed it.
    pub fn holds_lock(&self) -> bool {
        self.lock_held
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    pub fn log_path(&self, suffix: &str) -> PathBuf {
        self.base_dir.join(format!("{}-{}.log", self.provider, suffix))
    }

    /// Runs `make cluster-up` and waits for it. A non-zero exit leaves the
    /// controller `FAILED`, which is not an error here; the caller inspects
    /// `status()`. The lock file stays in place in every case but a spawn failure.
    pub fn start(&mut self, timeout: Duration) -> Result<(), FunctestError> {
        self.enter(ClusterStatus::Starting)?;
        self.lock.acquire()?;
        self.lock_held = true;
        self.status = ClusterStatus::Starting;
        tracing::info!(provider = %self.provider, status = %self.status, "starting cluster");

        match self.spawn_make("cluster-up", "up") {
            Ok(child) => self.child = Some(child),
            Err(err) => {
                self.status = ClusterStatus::Failed;
                self.child = None;
                self.lock.release()?;
                self.lock_held = false;
                return Err(err);
            }
        }
        self.supervise("cluster-up", ClusterStatus::Running, timeout)
    }

    /// Runs `make cluster-down`. The lock file is removed only when the
    /// controller reaches `STOPPED`.
    pub fn stop(&mut self, timeout: Duration) -> Result<(), FunctestError> {
        self.enter(ClusterStatus::Stopping)?;
        self.lock.ensure_held()?;
        self.status = ClusterStatus::Stopping;
        tracing::info!(provider = %self.provider, status = %self.status, "stopping cluster");

        match self.spawn_make("cluster-down", "down") {
            Ok(child) => self.child = Some(child),
            Err(err) => {
                self.status = ClusterStatus::Failed;
                return Err(err);
            }
        }
        self.supervise("cluster-down", ClusterStatus::Stopped, timeout)?;
        if self.status == ClusterStatus::Stopped {
            self.lock.release()?;
            self.lock_held = false;
        } else {
            tracing::warn!(
                provider = %self.provider,
                lock = %self.lock.path().display(),
                "cluster-down failed; lock file left in place"
            );
        }
        Ok(())
    }

    pub fn kubeconfig(&self) -> Result<String, FunctestError> {
        self.lock.ensure_held()?;
        let script = self.base_dir.join(KUBECONFIG_SCRIPT);
        let output = Command::new(&script)
            .env_clear()
            .envs(&self.env)
            .current_dir(&self.base_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                FunctestError::Execution(format!("failed to run {}: {err}", script.display()))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let mut message = format!("{} failed with status {}", script.display(), output.status);
            if !stderr.is_empty() {
                message = format!("{message}: {stderr}");
            }
            return Err(FunctestError::Execution(message));
        }
        // A trailing newline would end up inside KUBECONFIG and command lines.
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn spawn_make(&self, target: &'static str, log_suffix: &str) -> Result<Child, FunctestError> {
        let make = resolve_program("make", &self.env, &self.base_dir)?;
        let log_path = self.log_path(log_suffix);
        let logfile = File::create(&log_path)?;
        let stderr = logfile.try_clone()?;
        let child = Command::new(make)
            .arg("-C")
            .arg(self.base_dir.join(KUBEVIRTCI_DIR))
            .arg(target)
            .env_clear()
            .envs(&self.env)
            .current_dir(&self.base_dir)
            .stdin(Stdio::null())
            .stdout(logfile)
            .stderr(stderr)
            .spawn()
            .map_err(|source| FunctestError::Spawn {
                provider: self.provider.clone(),
                operation: target,
                source,
            })?;
        tracing::info!(
            provider = %self.provider,
            pid = child.id(),
            log = %log_path.display(),
            "launched make {target}"
        );
        Ok(child)
    }

    fn supervise(
        &mut self,
        operation: &'static str,
        target: ClusterStatus,
        timeout: Duration,
    ) -> Result<(), FunctestError> {
        let result = match self.child.as_mut() {
            Some(child) => match wait_bounded(child, timeout) {
                Ok(WaitOutcome::Exited(status)) => Ok(status),
                Ok(WaitOutcome::TimedOut) => {
                    tracing::warn!(
                        provider = %self.provider,
                        timeout_sec = timeout.as_secs(),
                        "{operation} timed out, terminating"
                    );
                    let reap = match terminate_and_reap(child) {
                        Ok(status) => {
                            tracing::info!(provider = %self.provider, %status, "{operation} reaped");
                            None
                        }
                        Err(err) => {
                            tracing::error!(provider = %self.provider, "{operation} not reaped: {err}");
                            Some(Box::new(err))
                        }
                    };
                    Err(FunctestError::Timeout {
                        provider: self.provider.clone(),
                        operation,
                        timeout,
                        reap,
                    })
                }
                Err(err) => match terminate_and_reap(child) {
                    Ok(_) => Err(err.into()),
                    Err(reap) => {
                        tracing::error!(provider = %self.provider, "{operation} not reaped: {reap}");
                        Err(FunctestError::Execution(format!(
                            "waiting for {operation} failed: {err}; process not reaped: {reap}"
                        )))
                    }
                },
            },
            None => Err(FunctestError::Execution(format!(
                "{operation} has no process to wait for"
            ))),
        };
        self.child = None;

        match result {
            Ok(status) if status.success() => self.transition(target),
            Ok(status) => {
                tracing::warn!(provider = %self.provider, %status, "{operation} failed");
                self.fail();
                Ok(())
            }
            Err(err) => {
                self.fail();
                Err(err)
            }
        }
    }

    /// A new operation may begin only from an idle status: `start` from
    /// `STOPPED` or `FAILED`, `stop` additionally from `RUNNING`.
    fn enter(&self, to: ClusterStatus) -> Result<(), FunctestError> {
        let allowed = match to {
            ClusterStatus::Starting => {
                matches!(self.status, ClusterStatus::Stopped | ClusterStatus::Failed)
            }
            ClusterStatus::Stopping => !self.status.in_flight(),
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(FunctestError::IllegalTransition {
                from: self.status,
                to,
            })
        }
    }

    fn transition(&mut self, to: ClusterStatus) -> Result<(), FunctestError> {
        self.status.check_transition(to)?;
        tracing::info!(provider = %self.provider, from = %self.status, %to, "cluster transition");
        self.status = to;
        debug_assert!(self.child.is_none() || self.status.in_flight());
        Ok(())
    }

    fn fail(&mut self) {
        tracing::info!(provider = %self.provider, from = %self.status, "cluster transition to FAILED");
        self.status = ClusterStatus::Failed;
    }
}

fn is_readable_executable(path: &Path) -> bool {
    access(path, AccessFlags::R_OK | AccessFlags::X_OK).is_ok()
}
