//! Configuration management for the CLI

use anyhow::Result;
use inspector_lib::InspectorConfig;
use std::path::{Path, PathBuf};

/// Resolve the kubeconfig to load
///
/// An explicit flag wins, then `$HOME/.kube/config` if it exists, then the
/// first existing entry of `KUBECONFIG`. `None` leaves the choice to the
/// client's own inference.
pub fn kubeconfig_path(override_path: Option<&str>) -> Option<PathBuf> {
    resolve_kubeconfig(
        override_path,
        dirs_next::home_dir().as_deref(),
        std::env::var("KUBECONFIG").ok(),
    )
}

fn resolve_kubeconfig(
    override_path: Option<&str>,
    home: Option<&Path>,
    env: Option<String>,
) -> Option<PathBuf> {
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }

    if let Some(default) = home.map(|h| h.join(".kube").join("config")) {
        if default.exists() {
            return Some(default);
        }
    }

    let env = env.filter(|p| !p.is_empty())?;
    std::env::split_paths(&env).find(|p| p.exists())
}

/// Load engine settings and apply command-line overrides
pub fn inspector_config(pool_size: Option<usize>) -> Result<InspectorConfig> {
    let mut config = InspectorConfig::load()?;
    if let Some(pool_size) = pool_size {
        config.pool_size = pool_size;
        config.validate()?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flag_wins() {
        let home = TempDir::new().unwrap();
        let path = resolve_kubeconfig(
            Some("/tmp/custom"),
            Some(home.path()),
            Some("/tmp/env".into()),
        );
        assert_eq!(path, Some(PathBuf::from("/tmp/custom")));
    }

    #[test]
    fn test_home_config_before_env() {
        let home = TempDir::new().unwrap();
        let kube_dir = home.path().join(".kube");
        std::fs::create_dir_all(&kube_dir).unwrap();
        std::fs::write(kube_dir.join("config"), "apiVersion: v1\n").unwrap();

        let path = resolve_kubeconfig(None, Some(home.path()), Some("/tmp/env".into()));
        assert_eq!(path, Some(kube_dir.join("config")));
    }

    #[test]
    fn test_env_when_home_config_missing() {
        let home = TempDir::new().unwrap();
        let env_config = home.path().join("env-config");
        std::fs::write(&env_config, "apiVersion: v1\n").unwrap();

        let path = resolve_kubeconfig(
            None,
            Some(home.path()),
            Some(env_config.to_string_lossy().into_owned()),
        );
        assert_eq!(path, Some(env_config));
    }

    #[test]
    fn test_env_list_takes_first_existing_file() {
        let home = TempDir::new().unwrap();
        let missing = home.path().join("missing");
        let present = home.path().join("present");
        std::fs::write(&present, "apiVersion: v1\n").unwrap();
        let list = std::env::join_paths([&missing, &present]).unwrap();

        let path = resolve_kubeconfig(
            None,
            Some(home.path()),
            Some(list.to_string_lossy().into_owned()),
        );
        assert_eq!(path, Some(present));
    }

    #[test]
    fn test_env_without_existing_file_falls_back_to_inference() {
        let home = TempDir::new().unwrap();
        let list = std::env::join_paths([home.path().join("a"), home.path().join("b")]).unwrap();

        let path = resolve_kubeconfig(
            None,
            Some(home.path()),
            Some(list.to_string_lossy().into_owned()),
        );
        assert_eq!(path, None);
    }

    #[test]
    fn test_infer_when_nothing_set() {
        let home = TempDir::new().unwrap();
        assert_eq!(resolve_kubeconfig(None, Some(home.path()), None), None);
        assert_eq!(resolve_kubeconfig(Some(""), None, Some(String::new())), None);
    }
}
