//! Layered configuration loading.

use super::{ConfigError, ConfigIssue, ConfigResult, SafetyConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const ENV_PREFIX: &str = "SAFEPRUNE_";

/// Returns the global config file path.
///
/// This is `~/.safeprune/config.yml`.
pub fn global_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".safeprune").join("config.yml"))
        .unwrap_or_else(|| PathBuf::from("~/.safeprune/config.yml"))
}

/// Project config files in lookup order. The first existing one wins.
pub fn project_config_candidates(project_root: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for base in [project_root.to_path_buf(), project_root.join(".config")] {
        let stem = if base == project_root { ".cleanup" } else { "cleanup" };
        for ext in ["yaml", "yml", "json", "toml"] {
            candidates.push(base.join(format!("{stem}.{ext}")));
        }
    }
    candidates
}

/// Load configuration for a project from all sources with real I/O.
pub fn load_config(project_root: &Path) -> ConfigResult<SafetyConfig> {
    load_config_with(project_root, Some(&global_config_path()), |key| {
        std::env::var(key).ok()
    })
}

/// Load configuration with an explicit global file and environment lookup.
pub fn load_config_with<F>(
    project_root: &Path,
    global_path: Option<&Path>,
    env: F,
) -> ConfigResult<SafetyConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = serde_json::to_value(SafetyConfig::default()).map_err(|e| {
        ConfigError::Parse {
            path: PathBuf::from("<defaults>"),
            message: e.to_string(),
        }
    })?;

    if let Some(path) = global_path.filter(|p| p.is_file()) {
        debug!("Loading global config from {}", path.display());
        merge_values(&mut merged, read_config_file(path)?);
    }

    if let Some(path) = project_config_candidates(project_root)
        .into_iter()
        .find(|p| p.is_file())
    {
        debug!("Loading project config from {}", path.display());
        merge_values(&mut merged, read_config_file(&path)?);
    }

    let mut config: SafetyConfig =
        serde_json::from_value(merged).map_err(|e| ConfigError::Parse {
            path: project_root.to_path_buf(),
            message: e.to_string(),
        })?;

    apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> ConfigResult<Value> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(path, &content)
}

fn parse_config_str(path: &Path, content: &str) -> ConfigResult<Value> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?,
        Some("toml") => toml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
        _ => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
    };
    Ok(value)
}

/// Deep-merge `overlay` into `base`. Objects merge key by key, everything else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides<F>(config: &mut SafetyConfig, env: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let mut issues = Vec::new();
    let lookup = |name: &str| env(&format!("{ENV_PREFIX}{name}"));

    let mut flag = |name: &str, target: &mut bool| {
        if let Some(raw) = lookup(name) {
            match parse_bool(&raw) {
                Some(value) => *target = value,
                None => issues.push(ConfigIssue {
                    path: format!("{ENV_PREFIX}{name}"),
                    message: format!("expected a boolean, got '{raw}'"),
                }),
            }
        }
    };
    flag("STRICT_MODE", &mut config.safety.strict_mode);
    flag("DRY_RUN", &mut config.safety.dry_run_by_default);
    flag("CREATE_BACKUP", &mut config.safety.create_backup);
    flag("REQUIRE_CONFIRMATION", &mut config.safety.require_confirmation);
    flag(
        "SIGNAL_HANDLERS",
        &mut config.emergency.install_signal_handlers,
    );
    flag(
        "RESOURCE_MONITORING",
        &mut config.emergency.resource_monitoring,
    );

    if let Some(level) = lookup("LOG_LEVEL") {
        config.log_level = level.to_lowercase();
    }
    if let Some(dir) = lookup("BACKUP_DIR") {
        config.safety.backup_directory = PathBuf::from(dir);
    }
    if let Some(dir) = lookup("AUDIT_DIR") {
        config.audit.directory = PathBuf::from(dir);
    }
    if let Some(raw) = lookup("OPERATION_TIMEOUT_SECS") {
        match raw.trim().parse::<u64>() {
            Ok(secs) => config.safety.operation_timeout = Duration::from_secs(secs),
            Err(_) => issues.push(ConfigIssue {
                path: format!("{ENV_PREFIX}OPERATION_TIMEOUT_SECS"),
                message: format!("expected whole seconds, got '{raw}'"),
            }),
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(issues))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupMethod;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = TempDir::new().unwrap();
        let config = load_config_with(dir.path(), None, no_env).unwrap();
        assert_eq!(config, SafetyConfig::default());
    }

    #[test]
    fn test_project_yaml_overrides_global() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("global.yml");
        std::fs::write(
            &global,
            "safety:\n  strict_mode: false\nbackup:\n  max_parallel_workers: 8\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(".cleanup.yaml"),
            "backup:\n  max_parallel_workers: 2\n",
        )
        .unwrap();

        let config = load_config_with(dir.path(), Some(&global), no_env).unwrap();
        assert!(!config.safety.strict_mode);
        assert_eq!(config.backup.max_parallel_workers, 2);
        assert_eq!(config.backup.compression_level, 6);
    }

    #[test]
    fn test_toml_in_config_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".config")).unwrap();
        std::fs::write(
            dir.path().join(".config/cleanup.toml"),
            "[backup]\nmethod = \"archive\"\n\n[safety]\noperation_timeout = \"10m\"\n",
        )
        .unwrap();

        let config = load_config_with(dir.path(), None, no_env).unwrap();
        assert_eq!(config.backup.method, BackupMethod::Archive);
        assert_eq!(config.safety.operation_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_json_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".cleanup.json"),
            r#"{"audit": {"enable_csv": false}}"#,
        )
        .unwrap();
        let config = load_config_with(dir.path(), None, no_env).unwrap();
        assert!(!config.audit.enable_csv);
        assert!(config.audit.enable_json);
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".cleanup.yml"), "safety:\n  strict_mode: true\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("SAFEPRUNE_STRICT_MODE", "false"),
            ("SAFEPRUNE_BACKUP_DIR", "/tmp/snapshots"),
            ("SAFEPRUNE_OPERATION_TIMEOUT_SECS", "30"),
        ]
        .into_iter()
        .collect();

        let config = load_config_with(dir.path(), None, |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        assert!(!config.safety.strict_mode);
        assert_eq!(
            config.safety.backup_directory,
            PathBuf::from("/tmp/snapshots")
        );
        assert_eq!(config.safety.operation_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_bad_env_values_are_reported_together() {
        let dir = TempDir::new().unwrap();
        let result = load_config_with(dir.path(), None, |k| match k {
            "SAFEPRUNE_DRY_RUN" => Some("maybe".to_string()),
            "SAFEPRUNE_OPERATION_TIMEOUT_SECS" => Some("soon".to_string()),
            _ => None,
        });
        match result {
            Err(ConfigError::Invalid(issues)) => assert_eq!(issues.len(), 2),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".cleanup.yaml"), "safety: [unclosed").unwrap();
        assert!(matches!(
            load_config_with(dir.path(), None, no_env),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_merge_values_nested() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        merge_values(&mut base, serde_json::json!({"a": {"c": 5}, "e": 6}));
        assert_eq!(base, serde_json::json!({"a": {"b": 1, "c": 5}, "d": 3, "e": 6}));
    }
}
