//! Built-in default configuration embedded in the binary
//!
//! Lazy-loaded on first access and cached in a LazyLock.

use super::schema::Config;
use std::sync::LazyLock;

pub(crate) const BUILTIN_TOML: &str = include_str!("../builtin-config.toml");

static BUILTIN_CONFIG: LazyLock<Config> = LazyLock::new(load_builtin_config);

pub fn get_builtin() -> &'static Config {
    &BUILTIN_CONFIG
}

fn load_builtin_config() -> Config {
    toml::from_str(BUILTIN_TOML).expect("Failed to parse builtin configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_loads() {
        let config = get_builtin();
        assert_eq!(config.common.config_version, "1.0");
        assert_eq!(config.cluster.namespaces, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_builtin_matches_defaults() {
        assert_eq!(get_builtin(), &Config::default());
    }

    #[test]
    fn test_builtin_cached() {
        let config1 = get_builtin();
        let config2 = get_builtin();
        assert_eq!(config1 as *const _, config2 as *const _);
    }
}
