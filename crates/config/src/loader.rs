use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::SwarmConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["swarm.toml", "swarm.yaml", "swarm.yml", "swarm.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

fn override_slot() -> MutexGuard<'static, Option<PathBuf>> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Set a custom config directory. When set, config discovery only looks in
/// this directory (project-local and user-global paths are skipped).
pub fn set_config_dir(path: PathBuf) {
    *override_slot() = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *override_slot() = None;
}

fn config_dir_override() -> Option<PathBuf> {
    override_slot().clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<SwarmConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./swarm.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/swarm/swarm.{toml,yaml,yml,json}` (user-global)
///
/// When nothing is found the defaults are written to the user-global path so
/// operators have a file to edit, and `SwarmConfig::default()` is returned.
pub fn discover_and_load() -> SwarmConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, writing default config");
        let config = SwarmConfig::default();
        if let Err(e) = write_default_config(&config) {
            warn!(error = %e, "failed to write default config file");
        }
        return config;
    }
    SwarmConfig::default()
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return CONFIG_FILENAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists());
    }

    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/swarm/
    if let Some(dir) = home_dir().map(|h| h.join(".config").join("swarm")) {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the config directory: override, or `~/.config/swarm/` on all platforms.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("swarm"))
}

/// Returns the data directory: `~/.swarm/` on all platforms.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".swarm"))
        .unwrap_or_else(|| PathBuf::from(".swarm"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("swarm.toml")
}

/// Write the default config file to the user-global config path.
/// Only called when no config file exists yet.
fn write_default_config(config: &SwarmConfig) -> anyhow::Result<()> {
    let path = find_or_default_config_path();
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(&path, &toml_str)?;
    debug!(path = %path.display(), "wrote default config file");
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SwarmConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // The only test that sets the process-wide override.
    #[test]
    fn discovery_in_override_dir() {
        let dir = tempfile::tempdir().unwrap();
        set_config_dir(dir.path().to_path_buf());

        // Nothing there yet: defaults are returned and written out.
        let cfg = discover_and_load();
        assert_eq!(cfg.server.http_port, 5566);
        let written = dir.path().join("swarm.toml");
        assert!(written.exists());
        let reloaded = load_config(&written).unwrap();
        assert_eq!(reloaded.session.cookie_name, "swarm.sid");

        // An edited file wins.
        std::fs::write(&written, "[server]\nhttp_port = 9000\n").unwrap();
        assert_eq!(discover_and_load().server.http_port, 9000);

        clear_config_dir();
    }

    #[test]
    fn parses_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("swarm.yaml");
        std::fs::write(&yaml, "hashcash:\n  level: 20\n").unwrap();
        assert_eq!(load_config(&yaml).unwrap().hashcash.level, 20);

        let json = dir.path().join("swarm.json");
        std::fs::write(&json, r#"{"locale": {"default": "zh-tw"}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().locale.default, "zh-tw");

        let bad = dir.path().join("swarm.ini");
        std::fs::write(&bad, "x=1").unwrap();
        assert!(load_config(&bad).is_err());
    }
}
