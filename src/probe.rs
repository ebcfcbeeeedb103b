use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::cluster::ClusterController;
use crate::config::Config;
use crate::environ::{resolve_program, search_path, Environment};
use crate::error::FunctestError;

pub const APISERVER_TOKEN: &str = "apiserver";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: PodMetadata,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PodMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: String,
}

impl Pod {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn phase(&self) -> &str {
        &self.status.phase
    }
}

/// Source of the current workload state of a running cluster.
pub trait WorkloadQuery {
    fn pods(&self) -> Result<PodList, FunctestError>;
}

/// `oc get pods -o json` against the cluster named by `KUBECONFIG`.
#[derive(Debug, Clone)]
pub struct OcQuery {
    tool: String,
    namespace: Option<String>,
    cwd: PathBuf,
    env: Environment,
}

impl OcQuery {
    pub fn new(
        tool: &str,
        kubeconfig: &str,
        search_path: impl AsRef<OsStr>,
        namespace: Option<&str>,
        cwd: &Path,
    ) -> Self {
        let mut env = Environment::new();
        env.insert("PATH".into(), search_path.as_ref().to_os_string());
        env.insert("KUBECONFIG".into(), kubeconfig.into());
        Self {
            tool: tool.to_string(),
            namespace: namespace.map(str::to_string),
            cwd: cwd.to_path_buf(),
            env,
        }
    }

    pub fn for_cluster(cluster: &ClusterController, kubeconfig: &str, cfg: &Config) -> Self {
        Self::new(
            &cfg.query_tool,
            kubeconfig,
            search_path(cluster.env()),
            cfg.namespace.as_deref(),
            cluster.base_dir(),
        )
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "get".to_string(),
            "pods".to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        match &self.namespace {
            Some(ns) => {
                args.push("-n".to_string());
                args.push(ns.clone());
            }
            None => args.push("--all-namespaces".to_string()),
        }
        args
    }
}

impl WorkloadQuery for OcQuery {
    fn pods(&self) -> Result<PodList, FunctestError> {
        let program = resolve_program(&self.tool, &self.env, &self.cwd)?;
        let args = self.args();
        tracing::debug!(tool = %program.display(), args = ?args, "querying pods");
        let output = Command::new(&program)
            .args(&args)
            .env_clear()
            .envs(&self.env)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| FunctestError::Execution(format!("failed to run {}: {err}", self.tool)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FunctestError::Execution(format!(
                "[{} {}] failed with status {}: {}",
                self.tool,
                args.join(" "),
                output.status,
                stderr
            )));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// 0 if some pod whose name contains `apiserver` is in phase `Running`
/// (any case), -1 otherwise.
pub fn check_apiserver(pods: &PodList) -> i32 {
    let healthy = pods
        .items
        .iter()
        .any(|pod| pod.name().contains(APISERVER_TOKEN) && pod.phase().eq_ignore_ascii_case("running"));
    if healthy {
        0
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pods(json: &str) -> PodList {
        serde_json::from_str(json).expect("pod list")
    }

    #[test]
    fn running_apiserver_passes() {
        let list = pods(r#"{"items":[{"metadata":{"name":"kube-apiserver-1"},"status":{"phase":"Running"}}]}"#);
        assert_eq!(check_apiserver(&list), 0);
    }

    #[test]
    fn pending_apiserver_fails() {
        let list = pods(r#"{"items":[{"metadata":{"name":"kube-apiserver-1"},"status":{"phase":"Pending"}}]}"#);
        assert_eq!(check_apiserver(&list), -1);
    }

    #[test]
    fn empty_list_fails() {
        assert_eq!(check_apiserver(&pods(r#"{"items":[]}"#)), -1);
        assert_eq!(check_apiserver(&PodList::default()), -1);
    }

    #[test]
    fn phase_match_ignores_case() {
        let list = pods(r#"{"items":[
            {"metadata":{"name":"etcd-node01"},"status":{"phase":"Running"}},
            {"metadata":{"name":"openshift-apiserver-x"},"status":{"phase":"RUNNING"}}
        ]}"#);
        assert_eq!(check_apiserver(&list), 0);
    }

    #[test]
    fn running_pods_without_apiserver_fail() {
        let list = pods(r#"{"items":[{"metadata":{"name":"etcd-node01"},"status":{"phase":"Running"}}]}"#);
        assert_eq!(check_apiserver(&list), -1);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let list = pods(r#"{"apiVersion":"v1","kind":"List","items":[
            {"metadata":{"name":"kube-apiserver-1","namespace":"kube-system","uid":"x"},
             "spec":{},"status":{"phase":"Running","podIP":"10.0.0.1"}}]}"#);
        assert_eq!(list.items[0].metadata.namespace.as_deref(), Some("kube-system"));
        assert_eq!(check_apiserver(&list), 0);
    }

    #[test]
    fn namespace_selects_query_args() {
        let all = OcQuery::new("oc", "/tmp/kc", "/usr/bin", None, Path::new("/tmp"));
        assert_eq!(all.args(), vec!["get", "pods", "-o", "json", "--all-namespaces"]);
        let scoped = OcQuery::new("oc", "/tmp/kc", "/usr/bin", Some("kube-system"), Path::new("/tmp"));
        assert_eq!(scoped.args(), vec!["get", "pods", "-o", "json", "-n", "kube-system"]);
        assert_eq!(scoped.env[OsStr::new("KUBECONFIG")], "/tmp/kc");
    }

    #[cfg(unix)]
    #[test]
    fn oc_query_parses_tool_output() {
        use crate::testutil::FakeCluster;
        let fake = FakeCluster::new("exit 0", "exit 0");
        let search_path = format!("{}:/usr/bin:/bin", fake.path().join("bin").display());
        let query = OcQuery::new("oc", "/tmp/kc", search_path, None, fake.path());
        let list = query.pods().expect("pods");
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].name(), "kube-apiserver-node01");
    }

    #[cfg(unix)]
    #[test]
    fn oc_query_failure_is_execution_error() {
        use crate::testutil::FakeCluster;
        let fake = FakeCluster::new("exit 0", "exit 0");
        fake.write_query_tool("echo 'Unauthorized' >&2; exit 1");
        let search_path = format!("{}:/usr/bin:/bin", fake.path().join("bin").display());
        let query = OcQuery::new("oc", "/tmp/kc", search_path, None, fake.path());
        let err = query.pods().unwrap_err();
        assert!(matches!(err, FunctestError::Execution(_)));
        assert!(err.to_string().contains("Unauthorized"));
    }
}
