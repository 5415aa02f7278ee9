//! Persisted operator state, release tables and the vehicle catalog.
//!
//! The state file is a flat key-value JSON snapshot of the last session's
//! metadata, restored at startup so the operator does not retype the same
//! release/vehicle/tag every morning. Loading is deliberately forgiving:
//! a missing, unreadable or malformed file yields defaults and unknown
//! keys are ignored, so downgrades and hand edits never block startup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HubResult;

/// Known software major releases, oldest first.
pub const SW_MAJOR_RELEASES: [&str; 10] = [
    "R120", "R200", "R300", "R310", "R320", "R400", "R410", "R420", "R500", "R510",
];

/// Release type letters that prefix a minor number.
pub const SW_RELEASE_TYPES: [&str; 2] = ["RC", "RX"];

/// Minor numbers valid after a release type.
pub const SW_RELEASE_MINORS: [&str; 11] =
    ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10"];

/// Supported measurement-equipment versions.
pub const ME_VERSIONS: [&str; 3] = ["2.0", "2.1", "4.2"];

/// Fleet numbers for the known vehicle plates.
pub const VEHICLE_FLEET_NUMBERS: [(&str, u32); 5] = [
    ("YJA55E", 1),
    ("SOF03C", 3),
    ("RWA50U", 4),
    ("MUD01W", 5),
    ("JUD79J", 6),
];

/// All valid minor-release tokens (`RC0` .. `RX10`), types outermost.
pub fn sw_minor_releases() -> Vec<String> {
    SW_RELEASE_TYPES
        .iter()
        .flat_map(|ty| SW_RELEASE_MINORS.iter().map(move |minor| format!("{ty}{minor}")))
        .collect()
}

/// Combine major and minor tokens into the composed release, e.g. `R300RC1`.
pub fn compose_sw_release(major: &str, minor: &str) -> String {
    format!("{}{}", major.trim().to_uppercase(), minor.trim().to_uppercase())
        .trim()
        .to_string()
}

/// Split a composed release back into `(major, minor)`.
///
/// Unrecognized input falls back to the first table entries, so the pair is
/// always valid for re-composition.
pub fn split_sw_release(combined: &str) -> (String, String) {
    let minors = sw_minor_releases();
    let default_major = SW_MAJOR_RELEASES[0].to_string();
    let default_minor = minors[0].clone();

    let raw = combined.trim().to_uppercase();
    for major in SW_MAJOR_RELEASES {
        if let Some(remainder) = raw.strip_prefix(major) {
            let minor = if minors.iter().any(|m| m == remainder) {
                remainder.to_string()
            } else {
                default_minor.clone()
            };
            return (major.to_string(), minor);
        }
    }
    (default_major, default_minor)
}

/// Session metadata persisted between runs of the application.
///
/// Serialized as flat JSON; every field defaults to empty so files written
/// by older versions load cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    /// Path of the engine configuration to open.
    pub cfg_file: String,
    /// Free-text recording tag.
    pub tag: String,
    /// Composed software release, e.g. `R300RC1`.
    pub sw_rel: String,
    /// Measurement-equipment version, e.g. `2.0`.
    pub me_version: String,
    /// Vehicle plate or fleet code.
    pub vehicle_id: String,
    /// Preferred engine executable.
    pub canoe_exec: String,
    /// Base directory for log output.
    pub log_dir: String,
}

impl AppState {
    /// Load persisted state, returning defaults on any read/parse failure.
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                log::warn!("ignoring unreadable state file {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Persist as pretty JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> HubResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// The configured log root, when one is set.
    pub fn log_root(&self) -> Option<PathBuf> {
        let trimmed = self.log_dir.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// Vehicle id → descriptor map plus the static fleet-number table.
#[derive(Debug, Clone, Default)]
pub struct VehicleCatalog {
    descriptors: HashMap<String, String>,
}

impl VehicleCatalog {
    /// A catalog with no descriptors. Fleet numbers still resolve.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load descriptors from a JSON object file; missing or malformed files
    /// yield an empty catalog.
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            return Self::default();
        };
        let parsed: HashMap<String, String> = match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(err) => {
                log::warn!("ignoring vehicle catalog {}: {err}", path.display());
                return Self::default();
            }
        };
        Self::from_entries(
            parsed
                .iter()
                .map(|(id, descriptor)| (id.as_str(), descriptor.as_str())),
        )
    }

    /// Build a catalog from id/descriptor pairs; blank ids are dropped.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let descriptors = entries
            .into_iter()
            .filter_map(|(id, descriptor)| {
                let id = id.trim();
                (!id.is_empty()).then(|| (id.to_uppercase(), descriptor.trim().to_string()))
            })
            .filter(|(_, descriptor)| !descriptor.is_empty())
            .collect();
        Self { descriptors }
    }

    /// Descriptor (model name) for a vehicle id, case-insensitive.
    pub fn descriptor(&self, vehicle_id: &str) -> Option<&str> {
        self.descriptors
            .get(&vehicle_id.trim().to_uppercase())
            .map(String::as_str)
    }

    /// Fleet number for a vehicle id from the built-in table.
    pub fn fleet_number(&self, vehicle_id: &str) -> Option<u32> {
        let key = vehicle_id.trim().to_uppercase();
        VEHICLE_FLEET_NUMBERS
            .iter()
            .find(|(plate, _)| *plate == key)
            .map(|(_, number)| *number)
    }
}

/// Locations of the per-user state file, vehicle catalog and default log
/// root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Writable per-user data directory.
    pub data_dir: PathBuf,
    /// Persisted [`AppState`] file.
    pub state_file: PathBuf,
    /// Vehicle descriptor catalog.
    pub vehicles_file: PathBuf,
    /// Log root used when the state carries none.
    pub default_log_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths under the platform data directory, creating the data
    /// directory. Falls back to the working directory when the platform
    /// offers none.
    pub fn discover() -> HubResult<Self> {
        let base = match dirs::data_dir() {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let data_dir = base.join("canoe-hub");
        fs::create_dir_all(&data_dir)?;
        let default_log_dir = std::env::current_dir()?.join("Logs");
        Ok(Self {
            state_file: data_dir.join("state.json"),
            vehicles_file: data_dir.join("vehicles.json"),
            data_dir,
            default_log_dir,
        })
    }
}
