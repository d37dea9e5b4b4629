// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::IpAddr;
use std::path::PathBuf;

/// Challforge engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_path: PathBuf,
    /// Root directory scanned for challenge definitions
    pub challenge_dir: PathBuf,
    /// Directory where build artifact archives are cached
    pub artifact_dir: PathBuf,
    /// Host interface published ports are bound to
    pub interface: IpAddr,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `CHALLFORGE_DB`: SQLite database path (default: `challforge.db`)
    /// - `CHALLFORGE_DIR`: challenge root directory (default: `.`)
    /// - `CHALLFORGE_ARTIFACT_DIR`: artifact cache directory (default: `.`)
    /// - `CHALLFORGE_INTERFACE`: bind interface for published ports
    ///   (default: `0.0.0.0`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = std::env::var("CHALLFORGE_DB")
            .unwrap_or_else(|_| "challforge.db".to_string())
            .into();

        let challenge_dir: PathBuf = std::env::var("CHALLFORGE_DIR")
            .unwrap_or_else(|_| ".".to_string())
            .into();

        let artifact_dir: PathBuf = std::env::var("CHALLFORGE_ARTIFACT_DIR")
            .unwrap_or_else(|_| ".".to_string())
            .into();

        let interface: IpAddr = std::env::var("CHALLFORGE_INTERFACE")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CHALLFORGE_INTERFACE", "must be a valid IP address")
            })?;

        Ok(Self {
            database_path,
            challenge_dir,
            artifact_dir,
            interface,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("CHALLFORGE_DB");
        guard.remove("CHALLFORGE_DIR");
        guard.remove("CHALLFORGE_ARTIFACT_DIR");
        guard.remove("CHALLFORGE_INTERFACE");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_path, PathBuf::from("challforge.db"));
        assert_eq!(config.challenge_dir, PathBuf::from("."));
        assert_eq!(config.artifact_dir, PathBuf::from("."));
        assert_eq!(config.interface.to_string(), "0.0.0.0");
    }

    #[test]
    fn test_config_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("CHALLFORGE_DB", "/var/lib/challforge/state.db");
        guard.set("CHALLFORGE_DIR", "/srv/challenges");
        guard.set("CHALLFORGE_ARTIFACT_DIR", "/var/cache/challforge");
        guard.set("CHALLFORGE_INTERFACE", "127.0.0.1");

        let config = Config::from_env().unwrap();

        assert_eq!(
            config.database_path,
            PathBuf::from("/var/lib/challforge/state.db")
        );
        assert_eq!(config.challenge_dir, PathBuf::from("/srv/challenges"));
        assert_eq!(config.artifact_dir, PathBuf::from("/var/cache/challforge"));
        assert_eq!(config.interface.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_config_invalid_interface() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("CHALLFORGE_INTERFACE", "not_an_ip");

        let result = Config::from_env();
        assert!(result.is_err());

        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("CHALLFORGE_INTERFACE", _)));
    }

    #[test]
    fn test_config_ipv6_interface() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("CHALLFORGE_INTERFACE", "::1");
        guard.remove("CHALLFORGE_DB");

        let config = Config::from_env().unwrap();
        assert_eq!(config.interface.to_string(), "::1");
    }

    #[test]
    fn test_config_error_display() {
        let invalid = ConfigError::Invalid("MY_VAR", "must be an IP");
        assert_eq!(invalid.to_string(), "invalid value for MY_VAR: must be an IP");
    }

    #[test]
    fn test_config_clone() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("CHALLFORGE_DB");
        guard.remove("CHALLFORGE_INTERFACE");

        let config = Config::from_env().unwrap();
        let cloned = config.clone();

        assert_eq!(config.database_path, cloned.database_path);
        assert_eq!(config.interface, cloned.interface);
    }
}
