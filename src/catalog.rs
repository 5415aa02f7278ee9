//! Installation catalog: discovery of CANoe installations on this machine.
//!
//! A scan walks a bounded set of root directories (configured roots plus a
//! shallow, name-pruned descent) looking for the known executable layouts,
//! derives a version hint for each hit, and probes the activation registry
//! for an identifier that launches exactly that executable. The result is a
//! deduplicated list ranked highest-version-first.
//!
//! The scan never fails as a whole: a candidate that cannot be listed or
//! probed is skipped and the reason logged at debug level. Per-candidate
//! failures are typed ([`DiscoveryError`]) so tests can tell "nothing
//! there" from "lookup failed".

use std::collections::{HashMap, HashSet, VecDeque};
use std::env;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DiscoveryError;
use crate::probe::{normalize_path_key, InstallProbe};

/// Lowercased substring that marks an engine directory or process name.
pub const ENGINE_MARKER: &str = "canoe";

/// Lowercased substring that marks a vendor directory worth descending into.
const VENDOR_MARKER: &str = "vector";

/// Activation identifier family for the engine's automation server.
pub const ACTIVATION_FAMILY: &str = "CANoe.Application";

/// Maximum descent below each scan root.
const MAX_SCAN_DEPTH: usize = 2;

/// Executable layouts inside an installation directory, 64-bit preferred.
const EXEC_CANDIDATES: [(Option<&str>, &str, &str); 4] = [
    (Some("Exec64"), "CANoe64.exe", "64-bit"),
    (Some("Exec32"), "CANoe32.exe", "32-bit"),
    (None, "CANoe64.exe", "64-bit"),
    (None, "CANoe32.exe", "32-bit"),
];

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(\d+(?:\.\d+)*)").expect("version pattern is valid")
});

/// One discovered engine installation.
///
/// Immutable once discovered; a refresh rebuilds the whole list. Identity
/// across scans is the normalized executable path only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    /// Human-readable label, e.g. `"CANoe 15 (64-bit)"`.
    pub label: String,
    /// Discovered executable.
    pub executable: PathBuf,
    /// Dotted version numbers from folder/file metadata; empty if unknown.
    pub version_hint: Vec<u32>,
    /// Activation identifier that launches exactly this executable, when
    /// one could be verified against the registry.
    pub activation_id: Option<String>,
}

impl Installation {
    /// Major version from the hint, if any.
    pub fn major(&self) -> Option<u32> {
        self.version_hint.first().copied()
    }
}

/// Extract a dotted version number from free text, e.g.
/// `"CANoe 15.3"` → `[15, 3]`. Empty when no number is present.
pub fn extract_version_hint(text: &str) -> Vec<u32> {
    let Some(captures) = VERSION_PATTERN.captures(text) else {
        return Vec::new();
    };
    captures[1]
        .split('.')
        .filter_map(|part| part.parse().ok())
        .collect()
}

/// Leading integer of a version string, e.g. `"15.3.45"` → `Some(15)`.
pub fn major_from_text(text: &str) -> Option<u32> {
    extract_version_hint(text).first().copied()
}

/// Activation identifiers worth probing for a given major version, most
/// specific first: unpadded and zero-padded forms, then the generic family
/// identifiers.
pub fn activation_id_candidates(major: Option<u32>) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(major) = major {
        for suffix in [
            format!("{major}"),
            format!("{major}.0"),
            format!("{major:02}"),
            format!("{major:02}.0"),
        ] {
            candidates.push(format!("{ACTIVATION_FAMILY}.{suffix}"));
        }
    }
    candidates.push(ACTIVATION_FAMILY.to_string());
    candidates.push(format!("{ACTIVATION_FAMILY}.1"));

    let mut seen = HashSet::new();
    candidates.retain(|id| seen.insert(id.clone()));
    candidates
}

/// Explicit cache of activation-id-to-target lookups.
///
/// Registry lookups are repeated across candidates and refreshes; the cache
/// is owned by the scanner (never process-global) so tests can supply a
/// fresh one.
#[derive(Debug, Default)]
pub struct ActivationCache {
    entries: HashMap<String, Option<PathBuf>>,
}

impl ActivationCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an activation id through the probe, memoizing the result
    /// (including misses).
    pub fn resolve(&mut self, probe: &dyn InstallProbe, activation_id: &str) -> Option<PathBuf> {
        if let Some(cached) = self.entries.get(activation_id) {
            return cached.clone();
        }
        let target = probe.resolve_activation_target(activation_id);
        self.entries
            .insert(activation_id.to_string(), target.clone());
        target
    }

    /// Number of distinct ids looked up so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been looked up yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scanner over a set of root directories.
pub struct CatalogScanner<'p> {
    roots: Vec<PathBuf>,
    probe: &'p dyn InstallProbe,
    cache: ActivationCache,
}

impl<'p> CatalogScanner<'p> {
    /// Scanner over explicit roots with a fresh activation cache.
    pub fn new(roots: Vec<PathBuf>, probe: &'p dyn InstallProbe) -> Self {
        Self {
            roots,
            probe,
            cache: ActivationCache::new(),
        }
    }

    /// Run one discovery pass.
    ///
    /// Returns whatever was found, possibly empty; never fails.
    pub fn discover(&mut self) -> Vec<Installation> {
        let mut installations: Vec<Installation> = Vec::new();
        let mut seen = HashSet::new();

        let roots = self.roots.clone();
        for root in &roots {
            // A root that itself is an engine directory counts too.
            if dir_name_contains(root, ENGINE_MARKER) {
                self.collect(root, &mut installations, &mut seen);
            }
            for directory in self.candidate_directories(root) {
                self.collect(&directory, &mut installations, &mut seen);
            }
        }

        rank(&mut installations);
        installations
    }

    fn collect(
        &mut self,
        directory: &Path,
        installations: &mut Vec<Installation>,
        seen: &mut HashSet<String>,
    ) {
        match self.installation_from_dir(directory) {
            Ok(Some(installation)) => {
                let key = normalize_path_key(&installation.executable);
                if seen.insert(key) {
                    installations.push(installation);
                }
            }
            Ok(None) => {}
            Err(err) => log::debug!("skipping candidate {}: {err}", directory.display()),
        }
    }

    /// Breadth-first walk below a root, bounded to [`MAX_SCAN_DEPTH`].
    ///
    /// Only directories whose name contains the engine marker become
    /// candidates; the walk descends through vendor/engine directories
    /// only, which keeps a `Program Files` scan cheap.
    fn candidate_directories(&self, root: &Path) -> Vec<PathBuf> {
        let mut queue = VecDeque::from([(root.to_path_buf(), 0usize)]);
        let mut visited = HashSet::new();
        let mut candidates = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            let children = match list_dirs(&current) {
                Ok(children) => children,
                Err(err) => {
                    log::debug!("skipping {}: {err}", current.display());
                    continue;
                }
            };
            for child in children {
                if !visited.insert(child.clone()) {
                    continue;
                }
                let lowered = child
                    .file_name()
                    .map(|name| name.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if lowered.contains(ENGINE_MARKER) {
                    candidates.push(child.clone());
                }
                if depth < MAX_SCAN_DEPTH
                    && (lowered.contains(VENDOR_MARKER) || lowered.contains(ENGINE_MARKER))
                {
                    queue.push_back((child, depth + 1));
                }
            }
        }

        candidates
    }

    /// Probe one directory for the known executable layouts.
    fn installation_from_dir(
        &mut self,
        directory: &Path,
    ) -> Result<Option<Installation>, DiscoveryError> {
        for (subdir, file_name, bits) in EXEC_CANDIDATES {
            let executable = match subdir {
                Some(subdir) => directory.join(subdir).join(file_name),
                None => directory.join(file_name),
            };
            if !executable.is_file() {
                continue;
            }

            let folder_name = directory
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let mut version_hint = extract_version_hint(&folder_name);
            if version_hint.is_empty() {
                let stem = executable
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                version_hint = extract_version_hint(&stem);
            }
            if version_hint.is_empty() {
                version_hint = self.probe.binary_version(&executable).unwrap_or_default();
            }

            let activation_id =
                self.resolve_activation_id(&executable, version_hint.first().copied());

            return Ok(Some(Installation {
                label: format_label(&folder_name, bits),
                executable,
                version_hint,
                activation_id,
            }));
        }
        Ok(None)
    }

    /// First candidate identifier whose registered target is this
    /// executable.
    fn resolve_activation_id(&mut self, executable: &Path, major: Option<u32>) -> Option<String> {
        let exec_key = normalize_path_key(executable);
        activation_id_candidates(major).into_iter().find(|id| {
            self.cache
                .resolve(self.probe, id)
                .is_some_and(|target| normalize_path_key(&target) == exec_key)
        })
    }
}

/// Default scan roots: explicit override variables, the Program Files
/// family, and the conventional vendor directories. Only roots that exist
/// are kept.
pub fn default_scan_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let env_roots = [
        env::var("VECTOR_CANOE_HOME").ok(),
        env::var("VECTOR_CANOE_ROOT").ok(),
        env::var("ProgramFiles").ok(),
        env::var("ProgramW6432").ok(),
        env::var("ProgramFiles(x86)").ok(),
        Some(r"C:\Program Files\Vector".to_string()),
        Some(r"C:\Program Files".to_string()),
        Some(r"C:\Program Files (x86)".to_string()),
    ];
    for raw in env_roots.into_iter().flatten() {
        let path = PathBuf::from(raw);
        if path.exists() && !roots.contains(&path) {
            roots.push(path);
        }
    }
    roots
}

/// Highest version first, empty hints last; label breaks ties.
fn rank(installations: &mut [Installation]) {
    installations.sort_by(|a, b| a.label.to_lowercase().cmp(&b.label.to_lowercase()));
    installations.sort_by(|a, b| b.version_hint.cmp(&a.version_hint));
}

fn dir_name_contains(path: &Path, marker: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase().contains(marker))
        .unwrap_or(false)
}

fn list_dirs(path: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let entries = std::fs::read_dir(path).map_err(|source| DiscoveryError::ReadDir {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|entry| entry.is_dir())
        .collect())
}

/// `"CANoe_15" + "64-bit"` → `"CANoe 15 (64-bit)"`.
fn format_label(folder_name: &str, bits: &str) -> String {
    let base = folder_name.replace('_', " ");
    let base = base.trim();
    let base = if base.is_empty() { "CANoe" } else { base };
    if bits.is_empty() {
        base.to_string()
    } else {
        format!("{base} ({bits})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::NullInstallProbe;
    use std::fs;
    use tempfile::tempdir;

    struct TableProbe {
        targets: HashMap<String, PathBuf>,
        lookups: std::cell::RefCell<Vec<String>>,
    }

    impl TableProbe {
        fn new(entries: &[(&str, &Path)]) -> Self {
            Self {
                targets: entries
                    .iter()
                    .map(|(id, path)| (id.to_string(), path.to_path_buf()))
                    .collect(),
                lookups: std::cell::RefCell::new(Vec::new()),
            }
        }
    }

    impl InstallProbe for TableProbe {
        fn resolve_activation_target(&self, activation_id: &str) -> Option<PathBuf> {
            self.lookups.borrow_mut().push(activation_id.to_string());
            self.targets.get(activation_id).cloned()
        }
    }

    fn make_install(root: &Path, dir: &str, exec_sub: Option<&str>, exe: &str) -> PathBuf {
        let base = root.join(dir);
        let exec_dir = match exec_sub {
            Some(sub) => base.join(sub),
            None => base,
        };
        fs::create_dir_all(&exec_dir).expect("mkdir");
        let path = exec_dir.join(exe);
        fs::write(&path, b"").expect("touch exe");
        path
    }

    #[test]
    fn version_hint_extraction() {
        assert_eq!(extract_version_hint("CANoe_15.3"), vec![15, 3]);
        assert_eq!(extract_version_hint("CANoe64"), vec![64]);
        assert_eq!(extract_version_hint("no digits"), Vec::<u32>::new());
        assert_eq!(major_from_text("15.3.45 SP2"), Some(15));
    }

    #[test]
    fn activation_candidates_are_ordered_and_unique() {
        let ids = activation_id_candidates(Some(9));
        assert_eq!(
            ids,
            vec![
                "CANoe.Application.9",
                "CANoe.Application.9.0",
                "CANoe.Application.09",
                "CANoe.Application.09.0",
                "CANoe.Application",
                "CANoe.Application.1",
            ]
        );
        // Two-digit majors collapse the padded duplicates.
        let ids = activation_id_candidates(Some(15));
        assert_eq!(
            ids,
            vec![
                "CANoe.Application.15",
                "CANoe.Application.15.0",
                "CANoe.Application",
                "CANoe.Application.1",
            ]
        );
    }

    #[test]
    fn discovers_and_ranks_installations() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("Vector");
        make_install(&root, "CANoe_15", Some("Exec64"), "CANoe64.exe");
        make_install(&root, "CANoe_12", None, "CANoe64.exe");
        // A digit-free folder name: the hint falls back to the exe stem.
        make_install(&root, "canoe-legacy", None, "CANoe32.exe");

        let probe = NullInstallProbe;
        let mut scanner = CatalogScanner::new(vec![dir.path().to_path_buf()], &probe);
        let installs = scanner.discover();

        assert_eq!(installs.len(), 3);
        assert_eq!(installs[0].version_hint, vec![32]);
        assert_eq!(installs[1].version_hint, vec![15]);
        assert_eq!(installs[2].version_hint, vec![12]);
        assert_eq!(installs[1].label, "CANoe 15 (64-bit)");
        assert_eq!(installs[0].label, "canoe-legacy (32-bit)");
    }

    #[test]
    fn ranking_puts_unknown_version_hints_last() {
        fn install(label: &str, hint: &[u32]) -> Installation {
            Installation {
                label: label.to_string(),
                executable: PathBuf::from(format!("C:/Vector/{label}/CANoe64.exe")),
                version_hint: hint.to_vec(),
                activation_id: None,
            }
        }

        let mut installs = vec![
            install("unknown build", &[]),
            install("CANoe 5.1", &[5, 1, 0]),
            install("CANoe 5.2", &[5, 2, 0]),
        ];
        rank(&mut installs);
        assert_eq!(installs[0].version_hint, vec![5, 2, 0]);
        assert_eq!(installs[1].version_hint, vec![5, 1, 0]);
        assert!(installs[2].version_hint.is_empty());

        // Equal hints fall back to the label, case-insensitively.
        let mut installs = vec![
            install("b variant", &[15]),
            install("A variant", &[15]),
        ];
        rank(&mut installs);
        assert_eq!(installs[0].label, "A variant");
    }

    #[test]
    fn prefers_64_bit_when_both_exist() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("Vector");
        let exe64 = make_install(&root, "CANoe_15", Some("Exec64"), "CANoe64.exe");
        make_install(&root, "CANoe_15", Some("Exec32"), "CANoe32.exe");

        let probe = NullInstallProbe;
        let mut scanner = CatalogScanner::new(vec![dir.path().to_path_buf()], &probe);
        let installs = scanner.discover();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].executable, exe64);
    }

    #[test]
    fn deduplicates_by_normalized_executable_path() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("Vector");
        make_install(&root, "CANoe_15", Some("Exec64"), "CANoe64.exe");

        let probe = NullInstallProbe;
        // Same root listed twice: first occurrence wins, one result.
        let mut scanner = CatalogScanner::new(
            vec![dir.path().to_path_buf(), dir.path().to_path_buf()],
            &probe,
        );
        assert_eq!(scanner.discover().len(), 1);
    }

    #[test]
    fn activation_id_matches_registered_target() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("Vector");
        let exe = make_install(&root, "CANoe_15", Some("Exec64"), "CANoe64.exe");

        let probe = TableProbe::new(&[("CANoe.Application.15", exe.as_path())]);
        let mut scanner = CatalogScanner::new(vec![dir.path().to_path_buf()], &probe);
        let installs = scanner.discover();
        assert_eq!(
            installs[0].activation_id.as_deref(),
            Some("CANoe.Application.15")
        );
    }

    #[test]
    fn activation_cache_memoizes_misses() {
        let probe = TableProbe::new(&[]);
        let mut cache = ActivationCache::new();
        assert!(cache.resolve(&probe, "CANoe.Application.15").is_none());
        assert!(cache.resolve(&probe, "CANoe.Application.15").is_none());
        assert_eq!(probe.lookups.borrow().len(), 1, "second hit served from cache");
    }

    #[test]
    fn no_activation_id_when_registry_targets_elsewhere() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("Vector");
        let exe = make_install(&root, "CANoe_15", Some("Exec64"), "CANoe64.exe");
        let other = dir.path().join("elsewhere.exe");
        fs::write(&other, b"").expect("touch");

        let probe = TableProbe::new(&[("CANoe.Application.15", other.as_path())]);
        let mut scanner = CatalogScanner::new(vec![dir.path().to_path_buf()], &probe);
        let installs = scanner.discover();
        assert_eq!(installs[0].executable, exe);
        assert_eq!(installs[0].activation_id, None);
    }
}
