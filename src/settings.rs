use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::mail_reader::fetch::DEFAULT_CHANNEL_CAPACITY;
use crate::mail_reader::multipart::DEFAULT_MAX_DEPTH;

// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImapConfig {
    pub server: String,
    /// Defaults to 993, or 143 when `tls` is off.
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub tls: bool,
    pub username: String,
    /// Prompted for when absent.
    pub password: Option<String>,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_true")]
    pub read_only: bool,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl ImapConfig {
    pub fn port(&self) -> u16 {
        match (self.port, self.tls) {
            (Some(port), _) => port,
            (None, true) => 993,
            (None, false) => 143,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchConfig {
    #[serde(default)]
    pub query: String,
    pub since: Option<NaiveDate>,
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_true() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

pub fn load_settings(path: &Path) -> Result<Config> {
    let file = File::open(path)
        .with_context(|| format!("cannot find settings at {}", path.display()))?;
    let reader = BufReader::new(file);

    // Parse the YAML file into the Config struct
    serde_yaml::from_reader(reader)
        .with_context(|| format!("cannot deserialize settings from {}", path.display()))
}
