//! Process-list and install-registry contracts.
//!
//! Discovery and matching need two things from the host OS: the list of
//! running processes, and the ability to resolve an activation identifier
//! (a COM ProgID on Windows) to the executable it would launch. Both are
//! behind traits so the core stays testable and portable; the registry
//! walk itself is a platform adapter's job and is deliberately not
//! reimplemented here.

use std::fs;
use std::path::{Path, PathBuf};

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// One running process as seen by the probe.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    /// Image name, e.g. `CANoe64.exe`.
    pub name: String,
    /// Full executable path, when the OS exposes it.
    pub executable: Option<PathBuf>,
}

/// Source of the running-process list.
pub trait ProcessProbe {
    /// Snapshot of currently running processes.
    fn running_processes(&self) -> Vec<ProcessInfo>;
}

/// Resolution service for engine installations.
pub trait InstallProbe {
    /// Resolve an activation identifier to the executable it launches, or
    /// `None` if the identifier is not registered.
    fn resolve_activation_target(&self, activation_id: &str) -> Option<PathBuf>;

    /// Read the embedded version resource of an executable.
    ///
    /// Platforms without version resources return `None`; the catalog then
    /// falls back to an empty version hint.
    fn binary_version(&self, _executable: &Path) -> Option<Vec<u32>> {
        None
    }
}

/// Process probe backed by the `sysinfo` crate.
#[derive(Debug, Default)]
pub struct SysinfoProcessProbe;

impl ProcessProbe for SysinfoProcessProbe {
    fn running_processes(&self) -> Vec<ProcessInfo> {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::everything()),
        );
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .values()
            .map(|process| ProcessInfo {
                name: process.name().to_string_lossy().into_owned(),
                executable: process.exe().map(Path::to_path_buf),
            })
            .collect()
    }
}

/// Install probe for platforms without an activation registry.
///
/// Every lookup misses, so discovered installations carry no activation id
/// and connection falls back to the generic identifiers.
#[derive(Debug, Default)]
pub struct NullInstallProbe;

impl InstallProbe for NullInstallProbe {
    fn resolve_activation_target(&self, _activation_id: &str) -> Option<PathBuf> {
        None
    }
}

/// Normalized, case-insensitive path key.
///
/// This is the uniqueness key for installations and the equality used when
/// matching a running process against a selected executable. Resolution is
/// best effort: paths that do not exist are normalized lexically.
pub fn normalize_path_key(path: &Path) -> String {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    resolved
        .to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_key_is_case_insensitive() {
        assert_eq!(
            normalize_path_key(Path::new("C:/Vector/CANoe64.exe")),
            normalize_path_key(Path::new("c:/vector/canoe64.exe")),
        );
    }

    #[test]
    fn path_key_normalizes_separators() {
        assert_eq!(
            normalize_path_key(Path::new("C:\\Vector\\CANoe64.exe")),
            "c:/vector/canoe64.exe",
        );
    }

    #[test]
    fn path_key_resolves_existing_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("CANoe64.exe");
        std::fs::write(&file, b"").expect("touch");
        // A dotted route to the same file collapses to the same key.
        let dotted = dir.path().join(".").join("CANoe64.exe");
        assert_eq!(normalize_path_key(&file), normalize_path_key(&dotted));
    }
}
