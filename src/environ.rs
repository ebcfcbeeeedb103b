use std::collections::BTreeMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::FunctestError;

/// Child-process environment. Kept as `OsString` so variables that are not
/// valid UTF-8 reach the child unchanged.
pub type Environment = BTreeMap<OsString, OsString>;

/// Copies the OS environment and applies `overrides` on top.
pub fn make_env<I, K, V>(overrides: I) -> Environment
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    make_env_from(env::vars_os(), overrides)
}

pub fn make_env_from<B, I, K, V>(base: B, overrides: I) -> Environment
where
    B: IntoIterator<Item = (OsString, OsString)>,
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    let mut envs: Environment = base.into_iter().collect();
    for (key, value) in overrides {
        envs.insert(key.into(), value.into());
    }
    envs
}

/// Environment for the bring-up toolchain: `<base>/bin` goes first on PATH.
pub fn cluster_env(base_dir: &Path, provider: &str, runtime: &str) -> Environment {
    let mut path = OsString::from(base_dir.join("bin"));
    if let Some(inherited) = env::var_os("PATH").filter(|value| !value.is_empty()) {
        path.push(":");
        path.push(inherited);
    }
    make_env([
        ("PATH", path),
        ("KUBEVIRTCI_RUNTIME", OsString::from(runtime)),
        ("KUBEVIRT_PROVIDER", OsString::from(provider)),
    ])
}

pub fn search_path(envs: &Environment) -> &OsStr {
    envs.get(OsStr::new("PATH")).map(OsString::as_os_str).unwrap_or_default()
}

/// Looks `program` up on the PATH carried by `envs`, not the one of this process.
pub fn resolve_program(program: &str, envs: &Environment, cwd: &Path) -> Result<PathBuf, FunctestError> {
    let search_path = search_path(envs);
    which::which_in(program, Some(search_path), cwd).map_err(|err| {
        FunctestError::Configuration(format!(
            "{program} not found on PATH {}: {err}",
            search_path.to_string_lossy()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn overrides_replace_inherited_values() {
        let envs = make_env([("KUBEVIRT_PROVIDER", "k8s-1.17")]);
        assert_eq!(envs[OsStr::new("KUBEVIRT_PROVIDER")], "k8s-1.17");
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_variables_are_kept() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![b'/', b'o', b'p', b't', 0xff]);
        let base = vec![
            (OsString::from("LEGACY_DIR"), raw.clone()),
            (OsString::from("HOME"), OsString::from("/root")),
        ];
        let envs = make_env_from(base, [("KUBEVIRT_PROVIDER", "k8s-1.17")]);
        assert_eq!(envs[OsStr::new("LEGACY_DIR")], raw);
        assert_eq!(envs[OsStr::new("HOME")], "/root");
        assert_eq!(envs.len(), 3);
    }

    #[test]
    fn cluster_env_prepends_bin_dir() {
        let envs = cluster_env(Path::new("/srv/functest"), "k8s-1.17", "podman");
        let path = search_path(&envs).to_string_lossy().to_string();
        assert!(path.starts_with("/srv/functest/bin"));
        assert_eq!(envs[OsStr::new("KUBEVIRTCI_RUNTIME")], "podman");
        assert_eq!(envs[OsStr::new("KUBEVIRT_PROVIDER")], "k8s-1.17");
    }

    #[cfg(unix)]
    #[test]
    fn resolve_program_uses_child_path() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let tool = bin.join("fake-tool");
        fs::write(&tool, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let envs = cluster_env(dir.path(), "p", "podman");
        let resolved = resolve_program("fake-tool", &envs, dir.path()).expect("resolve");
        assert_eq!(resolved, tool);

        let err = resolve_program("missing-tool-xyz", &envs, dir.path()).unwrap_err();
        assert!(matches!(err, FunctestError::Configuration(_)));
    }
}
