//! Browser pool configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserPoolConfig {
    /// Run headless (default). Head mode is for debugging only.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Page load timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,
}

fn default_headless() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_secs: default_timeout_secs(),
            chrome_args: Vec::new(),
        }
    }
}
