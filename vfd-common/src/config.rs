//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable consulted for the root folder
pub const ROOT_FOLDER_ENV: &str = "VFD_ROOT_FOLDER";

/// Root folder resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `root_folder` key of the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_root_folder: Option<&Path>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_root_folder {
        return path.to_path_buf();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/vfd (or /var/lib/vfd for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("vfd"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/vfd"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("vfd"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/vfd"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("vfd"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\vfd"))
    } else {
        PathBuf::from("./vfd_data")
    }
}

/// Default location of a service's TOML file (`~/.config/vfd/<service>.toml`)
pub fn default_config_path(service_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vfd").join(format!("{}.toml", service_name)))
}

/// Create the root folder if it does not exist yet
pub fn ensure_root_folder(root: &Path) -> Result<()> {
    if !root.exists() {
        std::fs::create_dir_all(root)?;
        info!("Created root folder: {}", root.display());
    }
    Ok(())
}

/// Load a TOML config file, falling back to defaults when the file is missing
///
/// A missing file is not an error: the service starts with defaults and logs
/// a warning. A file that exists but does not parse is a configuration error.
pub fn load_toml_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct SampleConfig {
        #[serde(default)]
        port: u16,
        #[serde(default)]
        name: Option<String>,
    }

    #[test]
    #[serial]
    fn test_cli_argument_wins_over_env() {
        std::env::set_var("VFD_TEST_ROOT_A", "/from/env");
        let resolved = resolve_root_folder(
            Some(Path::new("/from/cli")),
            "VFD_TEST_ROOT_A",
            Some(Path::new("/from/toml")),
        );
        std::env::remove_var("VFD_TEST_ROOT_A");

        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    #[serial]
    fn test_env_wins_over_toml() {
        std::env::set_var("VFD_TEST_ROOT_B", "/from/env");
        let resolved =
            resolve_root_folder(None, "VFD_TEST_ROOT_B", Some(Path::new("/from/toml")));
        std::env::remove_var("VFD_TEST_ROOT_B");

        assert_eq!(resolved, PathBuf::from("/from/env"));
    }

    #[test]
    #[serial]
    fn test_toml_used_when_nothing_else_set() {
        std::env::remove_var("VFD_TEST_ROOT_C");
        let resolved = resolve_root_folder(None, "VFD_TEST_ROOT_C", Some(Path::new("/from/toml")));
        assert_eq!(resolved, PathBuf::from("/from/toml"));
    }

    #[test]
    #[serial]
    fn test_falls_back_to_default() {
        std::env::remove_var("VFD_TEST_ROOT_D");
        let resolved = resolve_root_folder(None, "VFD_TEST_ROOT_D", None);
        assert_eq!(resolved, default_root_folder());
    }

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let config: SampleConfig = load_toml_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SampleConfig::default());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("svc.toml");
        let config = SampleConfig {
            port: 5740,
            name: Some("analyzer".to_string()),
        };

        write_toml_config(&config, &path).unwrap();
        assert!(!path.with_extension("toml.tmp").exists());

        let loaded: SampleConfig = load_toml_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "port = [not valid").unwrap();

        let result: Result<SampleConfig> = load_toml_or_default(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
