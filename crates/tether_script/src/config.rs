//! Bridge configuration

use serde::{Deserialize, Serialize};

/// Tunables for one script engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Folder inside each mod directory holding its scripts.
    pub scripts_dir: String,
    /// Entry module inside `scripts_dir`.
    pub entry_point: String,
    /// Extension appended to import specifiers that have none.
    pub module_extension: String,
    pub memory_limit_bytes: usize,
    pub gc_threshold_bytes: usize,
    /// Floor applied to `setInterval` periods.
    pub min_interval_ms: u64,
    /// Upper bound on promise jobs drained per tick.
    pub max_jobs_per_tick: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            scripts_dir: "js".to_string(),
            entry_point: "main.js".to_string(),
            module_extension: "js".to_string(),
            memory_limit_bytes: 100 * 1024 * 1024,
            gc_threshold_bytes: 1024 * 1024,
            min_interval_ms: 1,
            max_jobs_per_tick: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ScriptConfig =
            serde_json::from_str(r#"{ "entry_point": "index.js", "min_interval_ms": 5 }"#).unwrap();

        assert_eq!(config.entry_point, "index.js");
        assert_eq!(config.min_interval_ms, 5);
        assert_eq!(config.scripts_dir, "js");
        assert_eq!(config.memory_limit_bytes, 100 * 1024 * 1024);
    }
}
