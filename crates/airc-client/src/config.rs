//! Client configuration loading from `~/.airc/config.toml`.
//!
//! A config file may pull in shared fragments with `include = ["a.toml"]`.
//! Fragments are merged in order and the including file wins. Includes must
//! be relative, stay inside the including file's directory, and may nest at
//! most [`MAX_INCLUDE_DEPTH`] levels.

use airc_types::config::{airc_home, ClientConfig};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Maximum include nesting depth.
pub const MAX_INCLUDE_DEPTH: u32 = 10;

/// Load the client configuration, falling back to defaults on any error.
pub fn load_config(path: Option<&Path>) -> ClientConfig {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return ClientConfig::default();
    }

    match read_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Invalid config, using defaults");
            ClientConfig::default()
        }
    }
}

/// Parse `path` and its includes into a config, reporting the first error.
pub fn read_config(path: &Path) -> Result<ClientConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let mut value: toml::Value =
        toml::from_str(&contents).map_err(|e| format!("cannot parse {}: {e}", path.display()))?;

    let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let mut visited = HashSet::new();
    visited.insert(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
    resolve_includes(&mut value, &dir, &mut visited, 0)?;

    value
        .try_into::<ClientConfig>()
        .map_err(|e| format!("invalid config: {e}"))
}

fn take_includes(value: &mut toml::Value) -> Vec<String> {
    let toml::Value::Table(table) = value else {
        return Vec::new();
    };
    match table.remove("include") {
        Some(toml::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// Replace `value` with its includes merged underneath it.
fn resolve_includes(
    value: &mut toml::Value,
    dir: &Path,
    visited: &mut HashSet<PathBuf>,
    depth: u32,
) -> Result<(), String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(format!("include depth exceeds {MAX_INCLUDE_DEPTH}"));
    }

    let includes = take_includes(value);
    if includes.is_empty() {
        return Ok(());
    }

    let canonical_dir =
        std::fs::canonicalize(dir).map_err(|e| format!("cannot resolve {}: {e}", dir.display()))?;
    let mut merged = toml::Value::Table(toml::map::Map::new());

    for include in &includes {
        let relative = Path::new(include);
        if relative.is_absolute() {
            return Err(format!("include must be relative: {include}"));
        }
        if relative.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(format!("include may not contain '..': {include}"));
        }

        let resolved = std::fs::canonicalize(dir.join(relative))
            .map_err(|e| format!("include '{include}' cannot be resolved: {e}"))?;
        if !resolved.starts_with(&canonical_dir) {
            return Err(format!("include '{include}' escapes {}", dir.display()));
        }
        if !visited.insert(resolved.clone()) {
            return Err(format!("circular include: {include}"));
        }

        info!(include = %include, "Loading config include");
        let contents = std::fs::read_to_string(&resolved)
            .map_err(|e| format!("cannot read include '{include}': {e}"))?;
        let mut fragment: toml::Value = toml::from_str(&contents)
            .map_err(|e| format!("cannot parse include '{include}': {e}"))?;
        let fragment_dir = resolved.parent().unwrap_or(dir).to_path_buf();
        resolve_includes(&mut fragment, &fragment_dir, visited, depth + 1)?;

        deep_merge_toml(&mut merged, &fragment);
    }

    deep_merge_toml(&mut merged, value);
    *value = merged;
    Ok(())
}

/// Deep-merge two TOML values; `overlay` wins except where both are tables.
pub fn deep_merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(key) {
                    Some(base_value) => deep_merge_toml(base_value, overlay_value),
                    None => {
                        base_table.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// `~/.airc/config.toml`.
pub fn default_config_path() -> PathBuf {
    airc_home().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/airc/config.toml")));
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_fields_and_nested_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "config.toml",
            r#"
            agent_name = "scout"
            registry_url = "http://localhost:8080"
            key_dir = "/tmp/airc-test-keys"
            sign_requests = true

            [retry]
            max_attempts = 7
            "#,
        );
        let config = load_config(Some(&path));
        assert_eq!(config.agent_name, "scout");
        assert_eq!(config.registry_url, "http://localhost:8080");
        assert_eq!(config.key_dir, PathBuf::from("/tmp/airc-test-keys"));
        assert!(config.sign_requests);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.min_delay_ms, 500);
        assert_eq!(config.heartbeat_interval_secs, 5);
    }

    #[test]
    fn test_deep_merge_nested_tables() {
        let mut base: toml::Value = toml::from_str(
            r#"
            agent_name = "a"
            [retry]
            max_attempts = 2
            jitter = 0.3
            "#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
            [retry]
            max_attempts = 9
            "#,
        )
        .unwrap();
        deep_merge_toml(&mut base, &overlay);
        assert_eq!(base["agent_name"].as_str(), Some("a"));
        assert_eq!(base["retry"]["max_attempts"].as_integer(), Some(9));
        assert_eq!(base["retry"]["jitter"].as_float(), Some(0.3));
    }

    #[test]
    fn test_include_root_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "shared.toml",
            "registry_url = \"http://relay.internal\"\nagent_name = \"shared\"\n",
        );
        let root = write(
            dir.path(),
            "config.toml",
            "include = [\"shared.toml\"]\nagent_name = \"scout\"\n",
        );
        let config = read_config(&root).unwrap();
        assert_eq!(config.agent_name, "scout");
        assert_eq!(config.registry_url, "http://relay.internal");
    }

    #[test]
    fn test_nested_include() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "c.toml", "poll_interval_secs = 11\n");
        write(dir.path(), "b.toml", "include = [\"c.toml\"]\nclock_skew_secs = 60\n");
        let root = write(dir.path(), "a.toml", "include = [\"b.toml\"]\n");
        let config = read_config(&root).unwrap();
        assert_eq!(config.poll_interval_secs, 11);
        assert_eq!(config.clock_skew_secs, 60);
    }

    #[test]
    fn test_circular_include_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.toml", "include = [\"b.toml\"]\n");
        write(dir.path(), "b.toml", "include = [\"a.toml\"]\n");
        let err = read_config(&a).unwrap_err();
        assert!(err.contains("circular"), "{err}");
        assert_eq!(load_config(Some(&a)), ClientConfig::default());
    }

    #[test]
    fn test_traversal_and_absolute_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let up = write(dir.path(), "up.toml", "include = [\"../x.toml\"]\n");
        assert!(read_config(&up).unwrap_err().contains(".."));
        let abs = write(dir.path(), "abs.toml", "include = [\"/etc/passwd\"]\n");
        assert!(read_config(&abs).unwrap_err().contains("relative"));
    }

    #[test]
    fn test_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..13 {
            let body = if i < 12 {
                format!("include = [\"level{}.toml\"]\n", i + 1)
            } else {
                "agent_name = \"deep\"\n".to_string()
            };
            write(dir.path(), &format!("level{i}.toml"), &body);
        }
        let err = read_config(&dir.path().join("level0.toml")).unwrap_err();
        assert!(err.contains("depth"), "{err}");
    }

    #[test]
    fn test_bad_type_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "config.toml", "poll_interval_secs = \"soon\"\n");
        assert!(read_config(&path).is_err());
        assert_eq!(load_config(Some(&path)), ClientConfig::default());
    }
}
