use crate::infrastructure::config::{ConfigBundle, ensure_default_configs, load_configs_with_lookup};
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub configs: ConfigBundle,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    bootstrap_workspace_with_lookup(workspace_root, |key| std::env::var(key).ok())
}

/// Creates `config/` and `logs/`, writes default configs, and loads them.
pub fn bootstrap_workspace_with_lookup<F>(
    workspace_root: &Path,
    lookup: F,
) -> Result<BootstrapResult, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let config_dir = workspace_root.join("config");
    let logs_dir = workspace_root.join("logs");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let configs = load_configs_with_lookup(&config_dir, lookup)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        configs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "mission-control-bootstrap-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn bootstrap_creates_directories_and_default_configs() {
        let workspace = TempWorkspace::new();

        let result = bootstrap_workspace_with_lookup(&workspace.path, |_| None).expect("bootstrap");

        assert!(result.config_dir.join("app.json").exists());
        assert!(result.config_dir.join("backend.json").exists());
        assert!(result.logs_dir.is_dir());
        assert_eq!(result.configs.app.app_name, "Mission Control");
        assert_eq!(result.configs.backend.api_key, None);
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let workspace = TempWorkspace::new();
        bootstrap_workspace_with_lookup(&workspace.path, |_| None).expect("first bootstrap");
        let app_json = workspace.path.join("config").join("app.json");
        let edited = fs::read_to_string(&app_json)
            .expect("read app.json")
            .replace("\"UTC\"", "\"Europe/Berlin\"");
        fs::write(&app_json, edited).expect("write app.json");

        let result = bootstrap_workspace_with_lookup(&workspace.path, |_| None).expect("second bootstrap");

        assert_eq!(result.configs.app.timezone, chrono_tz::Europe::Berlin);
    }
}
