//! Configuration system.
//!
//! Loads host configuration from JSON strings/files.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration shared by the display host and tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Rendezvous listen address, e.g. `0.0.0.0:4321`. One TCP port per
    /// running rendezvous server, fixed for the process lifetime.
    pub listen_addr: String,
    /// Side length of the square pixel grid.
    #[serde(default = "default_board_size")]
    pub board_size: i32,
    /// Program started when the host boots.
    #[serde(default = "default_program")]
    pub default_program: String,
}

fn default_board_size() -> i32 {
    64
}

fn default_program() -> String {
    "idle".to_string()
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4321".to_string(),
            board_size: default_board_size(),
            default_program: default_program(),
        }
    }
}

impl MatrixConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads config from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&raw).context("parse config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg = MatrixConfig::from_json_str(r#"{"listen_addr": "0.0.0.0:9"}"#).unwrap();
        assert_eq!(cfg.board_size, 64);
        assert_eq!(cfg.default_program, "idle");
    }
}
