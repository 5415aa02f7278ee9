//! Deterministic file/folder naming for one recording run.
//!
//! Every artifact of a run shares a `name_prefix` derived purely from the
//! session metadata (software release, vehicle token, free-text tag), so
//! operators can find and correlate files by eye. The run folder groups all
//! runs with identical release+date+prefix; within it, individual runs are
//! told apart only by the start-time token the engine embeds in each file
//! name.
//!
//! `build_run_layout` is a pure function of its inputs plus one idempotent
//! `create_dir_all`; repeated calls with the same metadata land in the same
//! folder.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::persist::VehicleCatalog;

/// Folder and file-name prefix for one recording run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    /// Folder the engine writes into. Created by [`build_run_layout`].
    pub log_folder: PathBuf,
    /// Prefix shared by every file of the run, without trailing separator.
    pub name_prefix: String,
}

/// Make a metadata component safe for file names: trim and replace spaces
/// with underscores.
pub fn sanitize_component(raw: &str) -> String {
    raw.trim().replace(' ', "_")
}

/// Join components with `_`, skipping empty ones so the result never
/// contains doubled separators.
pub fn join_nonempty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Compact vehicle token for file names, e.g. `XC60_Veh6`.
///
/// Prefers catalog descriptor plus fleet number; a known fleet number alone
/// yields `VehN`; otherwise the sanitized raw vehicle id. An absent catalog
/// entry degrades gracefully to the id-only form.
pub fn vehicle_token(vehicle_id: &str, catalog: &VehicleCatalog) -> String {
    let vehicle_id = vehicle_id.trim();
    let descriptor = catalog.descriptor(vehicle_id);
    let number = catalog.fleet_number(vehicle_id);

    let mut parts: Vec<String> = Vec::new();
    if let Some(descriptor) = descriptor {
        parts.push(sanitize_component(descriptor));
    }
    if let Some(number) = number {
        parts.push(format!("Veh{number}"));
    } else if !vehicle_id.is_empty() {
        parts.push(sanitize_component(vehicle_id));
    }

    join_nonempty(parts.iter().map(String::as_str))
}

/// Derive the folder hierarchy and name prefix for a run starting `now`.
///
/// Layout: `log_root/<release>/<release>_<YYYY-MM-DD>/<name_prefix>`, where
/// `name_prefix` joins release, vehicle token and sanitized tag. Creates
/// the folder (and ancestors); this is the only mutation.
pub fn build_run_layout(
    log_root: &Path,
    release: &str,
    vehicle_token: &str,
    tag: &str,
    now: DateTime<Local>,
) -> io::Result<RunLayout> {
    let release = sanitize_component(release);
    let tag = sanitize_component(tag);
    let name_prefix = join_nonempty([release.as_str(), vehicle_token, tag.as_str()]);

    let date = now.format("%Y-%m-%d");
    let log_folder = log_root
        .join(&release)
        .join(format!("{release}_{date}"))
        .join(&name_prefix);
    fs::create_dir_all(&log_folder)?;

    Ok(RunLayout {
        log_folder,
        name_prefix,
    })
}
