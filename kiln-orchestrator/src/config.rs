//! Orchestrator configuration
//!
//! Defines all configurable parameters for the orchestrator: HTTP binding,
//! database location, where repositories are cloned to, how steps are run in
//! containers and how many builds may run at once.

use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on (e.g., "0.0.0.0:8080")
    pub bind_addr: String,

    /// SQLite database URL (e.g., "sqlite://kiln.db")
    pub database_url: String,

    /// Size of the database connection pool
    pub db_max_connections: u32,

    /// Name of the pipeline definition file at the repository root
    pub pipeline_filename: String,

    /// Directory commits are checked out into
    pub repositories_dir: PathBuf,

    /// Container CLI used to run steps
    pub container_runtime: String,

    /// Mount point of the checked-out source inside step containers
    pub container_working_dir: String,

    /// Number of builds the runner executes concurrently
    pub max_parallel_builds: usize,

    /// Shortest polling interval a repository may be added with
    pub min_polling_interval: Duration,

    /// How long engine loops get to drain on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: "sqlite://kiln.db".to_string(),
            db_max_connections: 5,
            pipeline_filename: ".ci.yaml".to_string(),
            repositories_dir: PathBuf::from("./.cache/git"),
            container_runtime: "podman".to_string(),
            container_working_dir: "/ci".to_string(),
            max_parallel_builds: 1,
            min_polling_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Every variable is optional and falls back to the default:
    /// - KILN_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL (default: sqlite://kiln.db)
    /// - KILN_DB_MAX_CONNECTIONS (default: 5)
    /// - KILN_PIPELINE_FILE (default: .ci.yaml)
    /// - KILN_REPOSITORIES_DIR (default: ./.cache/git)
    /// - KILN_CONTAINER_RUNTIME (default: podman)
    /// - KILN_CONTAINER_WORKDIR (default: /ci)
    /// - KILN_MAX_PARALLEL_BUILDS (default: 1)
    /// - KILN_MIN_POLLING_INTERVAL (duration, default: 1s)
    /// - KILN_SHUTDOWN_TIMEOUT (duration, default: 5s)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let duration = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match lookup(key) {
                Some(raw) => kiln_core::duration::parse(&raw)
                    .map_err(|e| anyhow::anyhow!("{} is not a valid duration: {}", key, e)),
                None => Ok(default),
            }
        };

        let number = |key: &str, default: usize| -> anyhow::Result<usize> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|e| anyhow::anyhow!("{} is not a valid number: {}", key, e)),
                None => Ok(default),
            }
        };

        Ok(Self {
            bind_addr: lookup("KILN_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: number(
                "KILN_DB_MAX_CONNECTIONS",
                defaults.db_max_connections as usize,
            )?
            .try_into()
            .map_err(|_| anyhow::anyhow!("KILN_DB_MAX_CONNECTIONS is too large"))?,
            pipeline_filename: lookup("KILN_PIPELINE_FILE").unwrap_or(defaults.pipeline_filename),
            repositories_dir: lookup("KILN_REPOSITORIES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.repositories_dir),
            container_runtime: lookup("KILN_CONTAINER_RUNTIME")
                .unwrap_or(defaults.container_runtime),
            container_working_dir: lookup("KILN_CONTAINER_WORKDIR")
                .unwrap_or(defaults.container_working_dir),
            max_parallel_builds: number("KILN_MAX_PARALLEL_BUILDS", defaults.max_parallel_builds)?,
            min_polling_interval: duration(
                "KILN_MIN_POLLING_INTERVAL",
                defaults.min_polling_interval,
            )?,
            shutdown_timeout: duration("KILN_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout)?,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.database_url.is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }

        if self.db_max_connections == 0 {
            anyhow::bail!("db_max_connections must be greater than 0");
        }

        if self.pipeline_filename.trim().is_empty() {
            anyhow::bail!("pipeline_filename cannot be empty");
        }

        if self.container_runtime.is_empty() {
            anyhow::bail!("container_runtime cannot be empty");
        }

        if !self.container_working_dir.starts_with('/') {
            anyhow::bail!("container_working_dir must be an absolute path");
        }

        if self.max_parallel_builds == 0 {
            anyhow::bail!("max_parallel_builds must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline_filename, ".ci.yaml");
        assert_eq!(config.container_working_dir, "/ci");
        assert_eq!(config.max_parallel_builds, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("KILN_BIND_ADDR", "127.0.0.1:9000"),
            ("KILN_PIPELINE_FILE", "kiln.yaml"),
            ("KILN_MAX_PARALLEL_BUILDS", "4"),
            ("KILN_MIN_POLLING_INTERVAL", "30s"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.pipeline_filename, "kiln.yaml");
        assert_eq!(config.max_parallel_builds, 4);
        assert_eq!(config.min_polling_interval, Duration::from_secs(30));
        assert_eq!(config.database_url, "sqlite://kiln.db");
    }

    #[test]
    fn test_from_lookup_rejects_bad_duration() {
        let result = Config::from_lookup(lookup_from(&[("KILN_SHUTDOWN_TIMEOUT", "soon")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        for (key, value) in [
            ("KILN_MAX_PARALLEL_BUILDS", "four"),
            ("KILN_MAX_PARALLEL_BUILDS", "-1"),
            ("KILN_DB_MAX_CONNECTIONS", "many"),
            ("KILN_DB_MAX_CONNECTIONS", "99999999999"),
        ] {
            let err = Config::from_lookup(lookup_from(&[(key, value)])).unwrap_err();
            assert!(err.to_string().contains(key), "{}={}", key, value);
        }
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.max_parallel_builds = 0;
        assert!(config.validate().is_err());
        config.max_parallel_builds = 1;

        config.container_working_dir = "ci".to_string();
        assert!(config.validate().is_err());
        config.container_working_dir = "/ci".to_string();

        config.pipeline_filename = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
