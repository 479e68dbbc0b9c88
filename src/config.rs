//! Configuration module for driftwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the SQLite database file (default: "driftwatch.db")
    pub db_path: String,
    /// User agent sent with every probe
    pub user_agent: String,
    /// URL registered as a sample target when no targets exist
    pub seed_url: Option<String>,
    /// Confirmation threshold of the sample target (default: 2)
    pub seed_threshold: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: "driftwatch.db".to_string(),
            user_agent: format!("driftwatch/{}", env!("CARGO_PKG_VERSION")),
            seed_url: None,
            seed_threshold: 2,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DRIFTWATCH_DB_PATH`: Database file path (default: "driftwatch.db")
    /// - `DRIFTWATCH_USER_AGENT`: Probe user agent (default: "driftwatch/<version>")
    /// - `DRIFTWATCH_SEED_URL`: Sample target URL (default: none)
    /// - `DRIFTWATCH_SEED_THRESHOLD`: Sample target confirmation threshold (default: 2)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(db_path) = lookup("DRIFTWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(user_agent) = lookup("DRIFTWATCH_USER_AGENT") {
            if !user_agent.trim().is_empty() {
                cfg.user_agent = user_agent;
            }
        }

        cfg.seed_url = lookup("DRIFTWATCH_SEED_URL").filter(|u| !u.trim().is_empty());

        if let Some(threshold_str) = lookup("DRIFTWATCH_SEED_THRESHOLD") {
            match threshold_str.parse::<u32>() {
                Ok(threshold) if threshold >= 1 => cfg.seed_threshold = threshold,
                _ => tracing::warn!(
                    "Ignoring invalid DRIFTWATCH_SEED_THRESHOLD {:?}",
                    threshold_str
                ),
            }
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.db_path, "driftwatch.db");
        assert!(cfg.user_agent.starts_with("driftwatch/"));
        assert_eq!(cfg.seed_url, None);
        assert_eq!(cfg.seed_threshold, 2);
    }

    #[test]
    fn test_overrides() {
        let cfg = load_from(&[
            ("DRIFTWATCH_DB_PATH", "/tmp/dw.db"),
            ("DRIFTWATCH_SEED_URL", "https://example.com"),
            ("DRIFTWATCH_SEED_THRESHOLD", "3"),
        ]);
        assert_eq!(cfg.db_path, "/tmp/dw.db");
        assert_eq!(cfg.seed_url.as_deref(), Some("https://example.com"));
        assert_eq!(cfg.seed_threshold, 3);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = load_from(&[
            ("DRIFTWATCH_SEED_THRESHOLD", "0"),
            ("DRIFTWATCH_USER_AGENT", " "),
            ("DRIFTWATCH_SEED_URL", ""),
        ]);
        assert_eq!(cfg.seed_threshold, 2);
        assert!(cfg.user_agent.starts_with("driftwatch/"));
        assert_eq!(cfg.seed_url, None);

        let cfg = load_from(&[("DRIFTWATCH_SEED_THRESHOLD", "many")]);
        assert_eq!(cfg.seed_threshold, 2);
    }
}
