//! Fake kubevirtci checkout used by unit tests: shell scripts standing in for
//! `make`, the helper binary, `kubeconfig.sh` and `oc`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

use crate::cluster::ClusterController;

pub(crate) struct FakeCluster {
    dir: TempDir,
}

impl FakeCluster {
    pub const PROVIDER: &'static str = "k8s-1.17";
    pub const HANG: &'static str = "trap 'kill $pid 2>/dev/null; echo terminated >> \"$CALLS\"; exit 143' TERM\nsleep 30 &\npid=$!\nwait $pid";
    pub const APISERVER_RUNNING: &'static str = r#"{"items":[{"metadata":{"name":"kube-apiserver-node01"},"status":{"phase":"Running"}}]}"#;

    pub fn new(up: &str, down: &str) -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("kubevirtci/cluster-up/cluster").join(Self::PROVIDER)).unwrap();
        fs::create_dir_all(root.join("bin")).unwrap();
        let fake = Self { dir };
        write_script(&root.join("bin/pack8s"), "exit 0");
        write_script(
            &root.join("bin/make"),
            &format!(
                "CALLS='{}'\necho \"$3\" >> \"$CALLS\"\ncase \"$3\" in\ncluster-up)\n{up}\n;;\ncluster-down)\n{down}\n;;\nesac",
                fake.calls_path().display()
            ),
        );
        fake.write_kubeconfig_script(&format!("echo '{}/.kubeconfig'", root.display()));
        fake.write_query_tool(&format!("cat <<'JSON'\n{}\nJSON", Self::APISERVER_RUNNING));
        fake
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn controller(&self) -> ClusterController {
        ClusterController::setup(Self::PROVIDER, self.path()).unwrap()
    }

    pub fn calls_path(&self) -> PathBuf {
        self.path().join("calls.log")
    }

    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.calls_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn write_kubeconfig_script(&self, body: &str) {
        write_script(&self.path().join("kubevirtci/cluster-up/kubeconfig.sh"), body);
    }

    /// Replaces `bin/oc`. Every invocation is recorded in the calls log.
    pub fn write_query_tool(&self, body: &str) {
        write_script(
            &self.path().join("bin/oc"),
            &format!(
                "echo \"oc $* KUBECONFIG=$KUBECONFIG\" >> '{}'\n{body}",
                self.calls_path().display()
            ),
        );
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}
