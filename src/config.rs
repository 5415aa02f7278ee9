//! Runtime settings.
//!
//! Loaded from an optional `canoe-hub.toml` next to the working directory
//! with `CANOE_HUB_*` environment overrides on top. Every field has a
//! default, so running with no settings file at all is the normal case.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::catalog::default_scan_roots;
use crate::error::HubResult;
use crate::matcher::PollPolicy;
use crate::resolver::DEFAULT_MAX_ATTEMPTS;

/// Default settings file name, looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "canoe-hub.toml";

/// Tunables for discovery, connection and resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Extra directories to scan for engine installations, tried before
    /// the built-in roots.
    pub scan_roots: Vec<PathBuf>,

    /// Delay between connection poll rounds.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Budget for attaching to an already-running automation server.
    #[serde(with = "humantime_serde")]
    pub attach_timeout: Duration,

    /// Budget for spawning a fresh automation server.
    #[serde(with = "humantime_serde")]
    pub spawn_timeout: Duration,

    /// Pause after stop before touching the run's files.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    /// Output-resolver attempt budget (one attempt per poll).
    pub resolve_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_roots: Vec::new(),
            poll_interval: Duration::from_millis(500),
            attach_timeout: Duration::from_secs(15),
            spawn_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(500),
            resolve_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Settings {
    /// Load settings from `path` (or the default file) plus environment
    /// overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> HubResult<Self> {
        let file = path
            .map(File::from)
            .unwrap_or_else(|| File::from(Path::new(DEFAULT_SETTINGS_FILE)));
        let settings = Config::builder()
            .add_source(file.required(false))
            .add_source(Environment::with_prefix("CANOE_HUB").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Poll bounds for the attach phase.
    pub fn attach_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            timeout: self.attach_timeout,
        }
    }

    /// Poll bounds for the spawn phase.
    pub fn spawn_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            timeout: self.spawn_timeout,
        }
    }

    /// Configured scan roots followed by the built-in platform roots.
    pub fn effective_scan_roots(&self) -> Vec<PathBuf> {
        let mut roots = self.scan_roots.clone();
        for root in default_scan_roots() {
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        roots
    }
}
