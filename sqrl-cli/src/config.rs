//! Environment-variable plumbing for the `sqrl` binary (§6). Read once at
//! startup into a plain value struct — no thread-locals (§9 "Config
//! objects"), in the style of `memory-cli`'s config loader.

use std::path::PathBuf;

/// Everything the CLI needs to start the server or run an offline
/// subcommand, resolved from environment variables with the defaults from
/// §6.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub strong_model: Option<String>,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub embedding_max_retries: u32,
    pub embedding_retry_delay_secs: f64,
    pub embedding_retry_backoff: f64,
    pub max_memories_per_episode: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            socket_path: PathBuf::from(sqrl_ipc::server::DEFAULT_SOCKET_PATH),
            strong_model: None,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dims: 1536,
            embedding_max_retries: 3,
            embedding_retry_delay_secs: 1.0,
            embedding_retry_backoff: 2.0,
            max_memories_per_episode: 5,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServiceConfig {
    /// Loads from the environment variables in §6. Missing variables fall
    /// back to their documented defaults; malformed numeric values also
    /// fall back rather than failing startup.
    pub fn from_env() -> Self {
        let defaults = ServiceConfig::default();
        ServiceConfig {
            socket_path: std::env::var("SQRL_SOCKET_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.socket_path),
            strong_model: std::env::var("SQRL_STRONG_MODEL").ok(),
            embedding_model: std::env::var("SQRL_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dims: env_parsed("SQRL_EMBEDDING_DIMS", defaults.embedding_dims),
            embedding_max_retries: env_parsed("SQRL_EMBEDDING_MAX_RETRIES", defaults.embedding_max_retries),
            embedding_retry_delay_secs: env_parsed(
                "SQRL_EMBEDDING_RETRY_DELAY",
                defaults.embedding_retry_delay_secs,
            ),
            embedding_retry_backoff: env_parsed("SQRL_EMBEDDING_RETRY_BACKOFF", defaults.embedding_retry_backoff),
            max_memories_per_episode: env_parsed(
                "SQRL_MAX_MEMORIES_PER_EPISODE",
                defaults.max_memories_per_episode,
            ),
        }
    }
}

/// Resolves the project database path: `<project_root>/.sqrl/memory.db`
/// (§6 persisted state layout).
pub fn project_db_path(project_root: &std::path::Path) -> PathBuf {
    project_root.join(".sqrl").join("memory.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = ServiceConfig::default();
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.embedding_dims, 1536);
        assert_eq!(config.embedding_max_retries, 3);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/sqrl_agent.sock"));
    }

    #[test]
    fn project_db_path_is_dot_sqrl_memory_db() {
        let root = std::path::Path::new("/tmp/myproject");
        assert_eq!(project_db_path(root), PathBuf::from("/tmp/myproject/.sqrl/memory.db"));
    }
}
