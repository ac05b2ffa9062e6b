//! Configuration file loading and merging

use super::builtin;
use super::schema::Config;
use crate::error::{ConnectivityError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Find user config by checking environment and standard locations
    pub fn find_user_config() -> Option<PathBuf> {
        // 1. $NETPOL_CONFIG
        if let Ok(path) = env::var("NETPOL_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        // 2. $XDG_CONFIG_HOME/netpol/config.toml
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            let p = PathBuf::from(xdg).join("netpol/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        // 3. ~/.config/netpol/config.toml
        if let Ok(home) = env::var("HOME") {
            let p = PathBuf::from(home).join(".config/netpol/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        None
    }

    fn read_table(path: &Path) -> Result<toml::Table> {
        let contents = fs::read_to_string(path).map_err(|source| ConnectivityError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load a single config file on its own, without builtin defaults underneath
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let table = Self::read_table(path.as_ref())?;
        Ok(toml::Value::Table(table).try_into()?)
    }

    pub fn load_builtin() -> Config {
        builtin::get_builtin().clone()
    }

    /// Merge `overlay` into `base`: nested tables merge key by key, any other
    /// value (arrays included) replaces what was there
    pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
        for (key, value) in overlay {
            match (base.get_mut(&key), value) {
                (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                    Self::merge_tables(existing, nested);
                }
                (_, value) => {
                    base.insert(key, value);
                }
            }
        }
    }

    /// Load with full config priority order
    /// Priority: built-in < user < explicit
    pub fn load_with_priority(explicit_config: Option<&Path>) -> Result<Config> {
        let mut merged: toml::Table = toml::from_str(builtin::BUILTIN_TOML)?;

        if let Some(user_path) = Self::find_user_config() {
            tracing::debug!("Loading user config from {:?}", user_path);
            Self::merge_tables(&mut merged, Self::read_table(&user_path)?);
        }

        if let Some(explicit_path) = explicit_config {
            tracing::debug!("Loading explicit config from {:?}", explicit_path);
            Self::merge_tables(&mut merged, Self::read_table(explicit_path)?);
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file_fills_defaults() {
        let file = write_config(
            r#"
[interpreter]
retries = 3
batch_jobs = true
"#,
        );
        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.interpreter.retries, 3);
        assert!(config.interpreter.batch_jobs);
        assert_eq!(config.interpreter.job_timeout_seconds, 10);
        assert_eq!(config.cluster.pods, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let file = write_config("[interpreter]\nretry = 3\n");
        assert!(matches!(
            ConfigLoader::load_from_file(file.path()),
            Err(ConnectivityError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::load_from_file("/nonexistent/netpol.toml").unwrap_err();
        assert!(matches!(err, ConnectivityError::ConfigLoad { .. }));
    }

    #[test]
    fn test_merge_keeps_unset_keys() {
        let mut base: toml::Table = toml::from_str(builtin::BUILTIN_TOML).unwrap();
        let overlay: toml::Table = toml::from_str(
            r#"
[cluster]
namespaces = ["p", "q"]

[generator]
exclude = ["multi-step"]
"#,
        )
        .unwrap();
        ConfigLoader::merge_tables(&mut base, overlay);
        let config: Config = toml::Value::Table(base).try_into().unwrap();

        assert_eq!(config.cluster.namespaces, vec!["p", "q"]);
        assert_eq!(config.cluster.pods, vec!["a", "b", "c"]);
        assert_eq!(config.generator.exclude, vec!["multi-step"]);
        assert!(config.generator.allow_dns);
    }

    #[test]
    fn test_explicit_config_wins() {
        let file = write_config("[interpreter]\nignore_loopback = true\nworker_count = 2\n");
        let config = ConfigLoader::load_with_priority(Some(file.path())).unwrap();
        assert!(config.interpreter.ignore_loopback);
        assert_eq!(config.interpreter.worker_count, 2);
        assert_eq!(config.common.config_version, "1.0");
    }
}
