//! Application configuration

use ocrdesk_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the settings database
    pub database_path: PathBuf,
    /// Base URL of the Ollama server
    pub ollama_url: String,
    /// Prompts, generation options and repetition thresholds
    pub session: SessionConfig,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        let ollama_url = std::env::var("OLLAMA_HOST")
            .ok()
            .and_then(|host| normalize_host(&host))
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Self {
            database_path: data_dir.join("ocrdesk.db"),
            ollama_url,
            session: SessionConfig::default(),
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("ocrdesk"))
            .unwrap_or_else(|| PathBuf::from(".ocrdesk"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

/// `OLLAMA_HOST` is often given as `host:port` without a scheme
fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return None;
    }

    if host.starts_with("http://") || host.starts_with("https://") {
        Some(host.to_string())
    } else {
        Some(format!("http://{host}"))
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
