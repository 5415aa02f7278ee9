//! Output resolver: discovering the filename the engine actually chose.
//!
//! Once a measurement starts, the engine substitutes its own start-time
//! token into each sink's file name. That timestamp is the one operators
//! see on disk, so the companion comment file must carry it too, but it
//! only becomes observable when the engine creates the first output file.
//! Until then, comments are buffered under a provisional wall-clock name.
//!
//! The resolver is a tick-driven state machine: the host event loop calls
//! [`OutputResolver::tick`] on its poll interval (0.5 s in the reference
//! setup) and the resolver never blocks. After [`OutputResolver::new`] the
//! state is `Pending`; it settles into `Resolved` on the first matching
//! output file, or `GaveUp` after the attempt budget (default 30, ~15 s)
//! is exhausted. Once settled it stays settled.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Extensions that can never be the engine's log container: the companion
/// comment file, video captures, and temp files.
pub const IGNORED_EXTENSIONS: [&str; 3] = ["txt", "avi", "tmp"];

/// Default attempt budget (~15 s at a 0.5 s tick).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Tolerance when comparing file mtimes against the run start, covering
/// clock/filesystem skew.
const MTIME_TOLERANCE: Duration = Duration::from_secs(1);

/// Lifecycle of one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    /// Still polling for the engine's first output file.
    Pending,
    /// The engine's token was observed; the comment path is final.
    Resolved,
    /// Budget exhausted; the provisional wall-clock name is kept.
    GaveUp,
}

/// Result of one [`OutputResolver::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveTick {
    /// Nothing matched yet; poll again.
    Pending,
    /// Resolution succeeded (now or on an earlier tick).
    Resolved {
        /// Final comment file path.
        comment_path: PathBuf,
        /// The engine-chosen token stripped from the output file name.
        suffix: String,
    },
    /// Budget exhausted (now or on an earlier tick).
    GaveUp {
        /// The provisional comment path that stays in use.
        comment_path: PathBuf,
    },
}

/// Polling state machine that maps the engine's real output filename to
/// the companion comment file.
#[derive(Debug)]
pub struct OutputResolver {
    log_folder: PathBuf,
    name_prefix: String,
    start_wallclock: SystemTime,
    comment_path: PathBuf,
    attempts: u32,
    max_attempts: u32,
    state: ResolveState,
    suffix: Option<String>,
}

impl OutputResolver {
    /// Arm a resolver for a run that just started.
    ///
    /// `provisional_comment` is the wall-clock-named comment file created
    /// at start; it is renamed once resolution succeeds.
    pub fn new(
        log_folder: PathBuf,
        name_prefix: String,
        start_wallclock: SystemTime,
        provisional_comment: PathBuf,
        max_attempts: u32,
    ) -> Self {
        Self {
            log_folder,
            name_prefix,
            start_wallclock,
            comment_path: provisional_comment,
            attempts: 0,
            max_attempts,
            state: ResolveState::Pending,
            suffix: None,
        }
    }

    /// Current comment file path (provisional until resolved).
    pub fn comment_path(&self) -> &Path {
        &self.comment_path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ResolveState {
        self.state
    }

    /// The resolved engine token, once known.
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Whether the resolver reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.state != ResolveState::Pending
    }

    /// One poll attempt. Idempotent once settled.
    pub fn tick(&mut self) -> ResolveTick {
        match self.state {
            ResolveState::Resolved => ResolveTick::Resolved {
                comment_path: self.comment_path.clone(),
                suffix: self.suffix.clone().unwrap_or_default(),
            },
            ResolveState::GaveUp => ResolveTick::GaveUp {
                comment_path: self.comment_path.clone(),
            },
            ResolveState::Pending => self.poll_once(),
        }
    }

    fn poll_once(&mut self) -> ResolveTick {
        if let Some(suffix) =
            scan_output(&self.log_folder, &self.name_prefix, self.start_wallclock)
        {
            let resolved = self
                .log_folder
                .join(format!("{}_{suffix}.txt", self.name_prefix));
            if resolved != self.comment_path {
                if self.comment_path.exists() {
                    match fs::rename(&self.comment_path, &resolved) {
                        Ok(()) => self.comment_path = resolved,
                        // Keep writing to the provisional file; no retry.
                        Err(err) => log::warn!(
                            "could not rename comment file to {}: {err}",
                            resolved.display()
                        ),
                    }
                } else {
                    self.comment_path = resolved;
                }
            }
            self.state = ResolveState::Resolved;
            self.suffix = Some(suffix.clone());
            return ResolveTick::Resolved {
                comment_path: self.comment_path.clone(),
                suffix,
            };
        }

        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            self.state = ResolveState::GaveUp;
            log::warn!(
                "output name not resolved after {} attempts, keeping {}",
                self.max_attempts,
                self.comment_path.display()
            );
            ResolveTick::GaveUp {
                comment_path: self.comment_path.clone(),
            }
        } else {
            ResolveTick::Pending
        }
    }
}

/// Single scan of `folder` for the engine's output file of this run.
///
/// Keeps regular files named `<prefix>_<token>.<ext>` whose extension is
/// not in [`IGNORED_EXTENSIONS`] and whose mtime is no more than 1 s older
/// than `start` (stale files from a previous run in the same folder are
/// excluded). The newest survivor's token is returned; an empty token
/// counts as not found.
pub fn scan_output(folder: &Path, name_prefix: &str, start: SystemTime) -> Option<String> {
    let marker = format!("{name_prefix}_");
    let mut best: Option<(SystemTime, PathBuf)> = None;

    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) => {
            log::debug!("cannot scan {}: {err}", folder.display());
            return None;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(&marker) {
            continue;
        }
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if IGNORED_EXTENSIONS.contains(&extension.as_str()) {
            continue;
        }
        let Ok(mtime) = metadata.modified() else {
            continue;
        };
        if mtime + MTIME_TOLERANCE < start {
            continue;
        }
        if best.as_ref().map_or(true, |(latest, _)| mtime > *latest) {
            best = Some((mtime, path));
        }
    }

    let (_, path) = best?;
    let stem = path.file_stem()?.to_str()?;
    let suffix = stem.strip_prefix(&marker)?;
    (!suffix.is_empty()).then(|| suffix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const PREFIX: &str = "R300RC1_Veh6_tag";

    fn touch(folder: &Path, name: &str) -> PathBuf {
        let path = folder.join(name);
        fs::write(&path, b"x").expect("touch");
        path
    }

    #[test]
    fn scan_picks_newest_matching_file() {
        let dir = tempdir().expect("tempdir");
        let start = SystemTime::now();
        touch(dir.path(), &format!("{PREFIX}_2024-03-07_10-30-00.blf"));
        std::thread::sleep(Duration::from_millis(30));
        touch(dir.path(), &format!("{PREFIX}_2024-03-07_10-30-05.blf"));

        let suffix = scan_output(dir.path(), PREFIX, start).expect("resolved");
        assert_eq!(suffix, "2024-03-07_10-30-05");
    }

    #[test]
    fn scan_ignores_companion_extensions() {
        let dir = tempdir().expect("tempdir");
        let start = SystemTime::now();
        touch(dir.path(), &format!("{PREFIX}_tok.txt"));
        touch(dir.path(), &format!("{PREFIX}_tok.avi"));
        touch(dir.path(), &format!("{PREFIX}_tok.tmp"));
        assert_eq!(scan_output(dir.path(), PREFIX, start), None);

        touch(dir.path(), &format!("{PREFIX}_tok.blf"));
        assert_eq!(scan_output(dir.path(), PREFIX, start).as_deref(), Some("tok"));
    }

    #[test]
    fn scan_excludes_stale_files_from_a_previous_run() {
        let dir = tempdir().expect("tempdir");
        touch(dir.path(), &format!("{PREFIX}_oldtoken.blf"));
        // Start the run well after the stale file's mtime tolerance.
        std::thread::sleep(Duration::from_millis(1200));
        let start = SystemTime::now();
        assert_eq!(scan_output(dir.path(), PREFIX, start), None);

        touch(dir.path(), &format!("{PREFIX}_newtoken.blf"));
        assert_eq!(
            scan_output(dir.path(), PREFIX, start).as_deref(),
            Some("newtoken")
        );
    }

    #[test]
    fn scan_requires_prefix_and_nonempty_suffix() {
        let dir = tempdir().expect("tempdir");
        let start = SystemTime::now();
        touch(dir.path(), "OTHER_tok.blf");
        touch(dir.path(), &format!("{PREFIX}_.blf"));
        assert_eq!(scan_output(dir.path(), PREFIX, start), None);
    }

    #[test]
    fn tick_renames_provisional_comment_file_once() {
        let dir = tempdir().expect("tempdir");
        let start = SystemTime::now();
        let provisional = touch(dir.path(), &format!("{PREFIX}_2024-03-07_10-29-58.txt"));
        fs::write(&provisional, b"Recording metadata\n").expect("seed");

        let mut resolver = OutputResolver::new(
            dir.path().to_path_buf(),
            PREFIX.to_string(),
            start,
            provisional.clone(),
            DEFAULT_MAX_ATTEMPTS,
        );
        assert_eq!(resolver.tick(), ResolveTick::Pending);

        touch(dir.path(), &format!("{PREFIX}_realtoken.blf"));
        let tick = resolver.tick();
        let expected = dir.path().join(format!("{PREFIX}_realtoken.txt"));
        assert_eq!(
            tick,
            ResolveTick::Resolved {
                comment_path: expected.clone(),
                suffix: "realtoken".to_string(),
            }
        );
        assert!(expected.exists(), "comment file renamed");
        assert!(!provisional.exists(), "provisional name gone");
        assert_eq!(
            fs::read(&expected).expect("content"),
            b"Recording metadata\n",
            "contents preserved across rename"
        );

        // Settled: further ticks are idempotent.
        assert!(resolver.is_settled());
        assert_eq!(resolver.tick(), tick);
    }

    #[test]
    fn exhausted_budget_keeps_provisional_path() {
        let dir = tempdir().expect("tempdir");
        let provisional = touch(dir.path(), &format!("{PREFIX}_2024-03-07_10-29-58.txt"));
        let mut resolver = OutputResolver::new(
            dir.path().to_path_buf(),
            PREFIX.to_string(),
            SystemTime::now(),
            provisional.clone(),
            3,
        );
        assert_eq!(resolver.tick(), ResolveTick::Pending);
        assert_eq!(resolver.tick(), ResolveTick::Pending);
        assert_eq!(
            resolver.tick(),
            ResolveTick::GaveUp {
                comment_path: provisional.clone(),
            }
        );
        assert_eq!(resolver.state(), ResolveState::GaveUp);
        assert!(provisional.exists());
    }
}
