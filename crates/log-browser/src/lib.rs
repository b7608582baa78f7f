//! Log Browser
//!
//! Read-only HTTP view over the pubsub logger's log directory tree, plus a
//! JSON status endpoint fed by whoever embeds the server.

pub mod error;
pub mod listing;
pub mod server;

use std::path::PathBuf;

pub use error::{BrowserError, BrowserResult};
pub use server::{router, serve, StatusProvider};

/// Configuration for the browser server
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Directory exposed under `/logs/`
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("logs"),
            host: "0.0.0.0".to_string(),
            port: 39393,
        }
    }
}

impl BrowserConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
