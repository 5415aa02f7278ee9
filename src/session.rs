//! Recording session controller.
//!
//! Owns the engine handle and the lifecycle of one recording run: start
//! (precondition checks, run layout, sink configuration, measurement
//! start), stop, discard, operator comments and the periodic
//! reconciliation against the engine's actual measurement flag.
//!
//! The engine is an external process the operator can also drive directly,
//! so the controller never trusts its own view for long: [`reconcile`]
//! re-reads the measurement flag each poll and the engine's answer wins.
//! A failing read means the server is gone and the session drops to
//! [`SessionState::Disconnected`].
//!
//! [`reconcile`]: SessionController::reconcile

use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};

use crate::catalog::Installation;
use crate::engine::{EngineFactory, EngineHandle, MEASUREMENT_START_TOKEN};
use crate::error::{HubError, HubResult};
use crate::matcher::{self, PollPolicy};
use crate::naming::{self, vehicle_token};
use crate::persist::{AppState, VehicleCatalog};
use crate::resolver::{scan_output, OutputResolver, ResolveTick, DEFAULT_MAX_ATTEMPTS};

/// Default file extension for a logging sink whose configured path has
/// none.
const DEFAULT_LOG_EXTENSION: &str = "blf";

/// Observable session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live automation handle.
    Disconnected,
    /// Connected, no measurement running.
    Idle,
    /// A measurement is running.
    Recording,
}

impl SessionState {
    /// Whether a recording can be started from this state.
    pub fn can_start(self) -> bool {
        self == Self::Idle
    }

    /// Whether stop/discard/comment operations are available.
    pub fn can_stop(self) -> bool {
        self == Self::Recording
    }

    /// Whether an automation handle is held.
    pub fn is_connected(self) -> bool {
        self != Self::Disconnected
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Idle => "idle",
            Self::Recording => "recording",
        };
        write!(f, "{label}")
    }
}

/// Result of a [`SessionController::discard`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardOutcome {
    /// There was no live run to discard.
    NothingToDiscard,
    /// The run was stopped and its files deleted.
    Discarded {
        /// Files removed.
        deleted: usize,
        /// Files that could not be removed.
        failed: usize,
        /// Whether the (then empty) run folder was removed too.
        removed_folder: bool,
    },
}

/// Result of a [`SessionController::append_comment`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentOutcome {
    /// The comment line was appended.
    Saved,
    /// The text was blank after trimming; nothing was written.
    EmptyIgnored,
}

/// State change observed by one [`SessionController::reconcile`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No handle, or the handle stopped answering and was dropped.
    Disconnected,
    /// The engine reports a measurement this controller did not start.
    BecameRecording,
    /// The measurement was stopped outside this controller; run state was
    /// cleared.
    BecameIdle,
    /// Engine and controller agree.
    Unchanged,
}

/// Book-keeping for one live recording run.
#[derive(Debug)]
struct RecordingRun {
    log_folder: PathBuf,
    name_prefix: String,
    start_wallclock: SystemTime,
    resolver: OutputResolver,
}

/// Owner of the engine handle and the active recording run.
pub struct SessionController {
    engine: Option<Box<dyn EngineHandle>>,
    run: Option<RecordingRun>,
    last_running: bool,
    resolve_attempts: u32,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    /// A disconnected controller with the default resolver budget.
    pub fn new() -> Self {
        Self {
            engine: None,
            run: None,
            last_running: false,
            resolve_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the output-resolver attempt budget.
    pub fn with_resolver_budget(mut self, attempts: u32) -> Self {
        self.resolve_attempts = attempts;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.engine.is_none() {
            SessionState::Disconnected
        } else if self.run.is_some() || self.last_running {
            SessionState::Recording
        } else {
            SessionState::Idle
        }
    }

    /// Whether a run started by this controller is live.
    pub fn is_recording(&self) -> bool {
        self.run.is_some()
    }

    /// The live automation handle, when connected.
    pub fn engine(&self) -> Option<&dyn EngineHandle> {
        self.engine.as_deref()
    }

    /// Comment file path of the live run (provisional until resolved).
    pub fn comment_path(&self) -> Option<&Path> {
        self.run.as_ref().map(|run| run.resolver.comment_path())
    }

    /// Output folder of the live run.
    pub fn run_folder(&self) -> Option<&Path> {
        self.run.as_ref().map(|run| run.log_folder.as_path())
    }

    /// Take ownership of an already-established handle (tests, demo).
    pub fn adopt_engine(&mut self, engine: Box<dyn EngineHandle>) {
        self.engine = Some(engine);
        self.last_running = false;
    }

    /// Connect to an automation instance matching `installation`.
    ///
    /// Blocks for at most the two policy timeouts. An existing handle is
    /// replaced; any run book-keeping is cleared.
    pub fn connect(
        &mut self,
        factory: &dyn EngineFactory,
        installation: &Installation,
        attach_policy: PollPolicy,
        spawn_policy: PollPolicy,
    ) -> HubResult<()> {
        let handle =
            matcher::connect_installation(factory, installation, attach_policy, spawn_policy)?;
        log::info!("connected to engine for '{}'", installation.label);
        self.engine = Some(handle);
        self.run = None;
        self.last_running = false;
        Ok(())
    }

    /// Drop the automation handle and all run book-keeping.
    pub fn disconnect(&mut self) {
        self.engine = None;
        self.run = None;
        self.last_running = false;
    }

    /// Load a configuration into the engine unless already loaded.
    /// Returns `true` if an open was issued.
    pub fn load_config(&mut self, cfg: &Path) -> HubResult<bool> {
        let engine = self.engine.as_deref().ok_or(HubError::NotConnected)?;
        Ok(crate::engine::ensure_config_loaded(engine, cfg)?)
    }

    /// Start a recording run at `now` using the session metadata.
    ///
    /// Builds the run layout, creates the provisional comment file with its
    /// metadata header, points every logging and video sink into the run
    /// folder and starts the measurement. Any sink or start failure aborts
    /// the whole start; no run state is kept.
    pub fn start(
        &mut self,
        meta: &AppState,
        vehicles: &VehicleCatalog,
        now: DateTime<Local>,
    ) -> HubResult<()> {
        let engine = self.engine.as_deref().ok_or(HubError::NotConnected)?;
        if self.run.is_some() || engine.measurement_running()? {
            return Err(HubError::AlreadyRecording);
        }

        let log_root = meta.log_root().ok_or(HubError::LogRootUnset)?;
        if !log_root.exists() {
            return Err(HubError::LogRootMissing(log_root));
        }
        if !log_root.is_dir() {
            return Err(HubError::LogRootNotADirectory(log_root));
        }

        let token = vehicle_token(&meta.vehicle_id, vehicles);
        let layout = naming::build_run_layout(&log_root, &meta.sw_rel, &token, &meta.tag, now)?;
        log::info!("run folder: {}", layout.log_folder.display());

        let start_wallclock = SystemTime::from(now);
        let provisional = layout.log_folder.join(format!(
            "{}_{}.txt",
            layout.name_prefix,
            now.format("%Y-%m-%d_%H-%M-%S")
        ));
        if let Err(err) = write_metadata_header(&provisional, meta, vehicles, now) {
            // Comments still work against an empty file.
            log::warn!("could not write metadata header: {err}");
        }

        // The engine replaces the token with its own start timestamp.
        let log_name = format!("{}_{MEASUREMENT_START_TOKEN}", layout.name_prefix);
        for index in 0..engine.logging_sink_count()? {
            let configured = engine.logging_sink_path(index)?;
            let extension = configured
                .extension()
                .and_then(OsStr::to_str)
                .unwrap_or(DEFAULT_LOG_EXTENSION);
            let target = layout.log_folder.join(format!("{log_name}.{extension}"));
            engine.set_logging_sink_path(index, &target)?;
        }
        for index in 0..engine.video_sink_count()? {
            let video_name = engine.video_sink_name(index)?;
            let target = layout
                .log_folder
                .join(format!("_{log_name}_{video_name}.avi"));
            engine.set_video_record_file(index, &target)?;
        }

        engine.start_measurement()?;
        log::info!("measurement started as '{}'", layout.name_prefix);

        self.last_running = true;
        self.run = Some(RecordingRun {
            resolver: OutputResolver::new(
                layout.log_folder.clone(),
                layout.name_prefix.clone(),
                start_wallclock,
                provisional,
                self.resolve_attempts,
            ),
            log_folder: layout.log_folder,
            name_prefix: layout.name_prefix,
            start_wallclock,
        });
        Ok(())
    }

    /// Stop the running measurement and close the run.
    ///
    /// A failing stop leaves the run book-keeping in place so stop can be
    /// retried (or reconciliation can clean up).
    pub fn stop(&mut self) -> HubResult<()> {
        let engine = self.engine.as_deref().ok_or(HubError::NotConnected)?;
        if self.run.is_none() && !engine.measurement_running()? {
            return Err(HubError::NoActiveRecording);
        }
        engine.stop_measurement()?;
        log::info!("measurement stopped");
        self.run = None;
        self.last_running = false;
        Ok(())
    }

    /// Stop the measurement and delete the files of the current run.
    ///
    /// `settle` gives the engine time to close its files before deletion.
    /// Deletion is best effort; the outcome carries per-file counts. With
    /// no live run there is nothing to do, whether connected or not.
    pub fn discard(&mut self, settle: Duration) -> HubResult<DiscardOutcome> {
        let Some(run) = &self.run else {
            return Ok(DiscardOutcome::NothingToDiscard);
        };
        let engine = self.engine.as_deref().ok_or(HubError::NotConnected)?;

        engine.stop_measurement()?;
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        let (deleted, failed, removed_folder) = delete_run_files(run);
        log::info!("discarded run: {deleted} deleted, {failed} failed");
        self.run = None;
        self.last_running = false;
        Ok(DiscardOutcome::Discarded {
            deleted,
            failed,
            removed_folder,
        })
    }

    /// Re-read the engine's measurement flag and converge on it.
    pub fn reconcile(&mut self) -> ReconcileOutcome {
        let Some(engine) = self.engine.as_deref() else {
            return ReconcileOutcome::Disconnected;
        };
        let running = match engine.measurement_running() {
            Ok(running) => running,
            Err(err) => {
                log::warn!("engine stopped answering, dropping handle: {err}");
                self.disconnect();
                return ReconcileOutcome::Disconnected;
            }
        };

        let was_recording = self.run.is_some() || self.last_running;
        self.last_running = running;
        match (was_recording, running) {
            (false, true) => ReconcileOutcome::BecameRecording,
            (true, false) => {
                if self.run.take().is_some() {
                    log::info!("measurement stopped externally, run closed");
                }
                ReconcileOutcome::BecameIdle
            }
            _ => ReconcileOutcome::Unchanged,
        }
    }

    /// Advance the output resolver of the live run by one poll.
    pub fn resolver_tick(&mut self) -> Option<ResolveTick> {
        self.run.as_mut().map(|run| run.resolver.tick())
    }

    /// Append a timestamped operator comment to the run's comment file.
    ///
    /// The timestamp prefers the engine's measurement clock and falls back
    /// to the wall-clock delta since start.
    pub fn append_comment(&self, text: &str) -> HubResult<CommentOutcome> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(CommentOutcome::EmptyIgnored);
        }
        let engine = self.engine.as_deref().ok_or(HubError::NotConnected)?;
        let run = self.run.as_ref().ok_or(HubError::NoActiveRecording)?;

        let seconds = match engine.measurement_time() {
            Ok(seconds) => seconds,
            Err(_) => run
                .start_wallclock
                .elapsed()
                .map(|elapsed| elapsed.as_secs_f64())
                .unwrap_or(0.0),
        };

        let comment_path = run.resolver.comment_path();
        if let Some(parent) = comment_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(comment_path)?;
        writeln!(file, "[{}] {trimmed}", format_elapsed(seconds))?;
        Ok(CommentOutcome::Saved)
    }

    /// Read a system variable from the engine, `None` when disconnected.
    pub fn system_variable(&self, path: &str) -> Option<String> {
        self.engine
            .as_deref()
            .and_then(|engine| engine.system_variable(path))
    }
}

/// Format elapsed seconds as `HH:MM:SS.mmm`. Negative input clamps to zero.
pub fn format_elapsed(elapsed_seconds: f64) -> String {
    let total_ms = (elapsed_seconds.max(0.0) * 1000.0) as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

fn write_metadata_header(
    path: &Path,
    meta: &AppState,
    vehicles: &VehicleCatalog,
    now: DateTime<Local>,
) -> std::io::Result<()> {
    fn fallback(value: &str) -> &str {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            "--"
        } else {
            trimmed
        }
    }

    let vehicle_id = meta.vehicle_id.trim();
    let model = vehicles.descriptor(vehicle_id).unwrap_or("");
    let number = vehicles
        .fleet_number(vehicle_id)
        .map(|n| n.to_string())
        .unwrap_or_else(|| "--".to_string());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut body = String::new();
    body.push_str("Recording metadata\n");
    body.push_str(&format!("Timestamp: {}\n", now.format("%Y-%m-%d %H:%M:%S")));
    body.push_str(&format!("SW release: {}\n", fallback(&meta.sw_rel)));
    body.push_str(&format!("ME version: {}\n", fallback(&meta.me_version)));
    body.push_str(&format!("Recording tag: {}\n", fallback(&meta.tag)));
    body.push_str(&format!("Vehicle model: {}\n", fallback(model)));
    body.push_str(&format!("Vehicle plate/ID: {}\n", fallback(vehicle_id)));
    body.push_str(&format!("Vehicle number: {number}\n"));
    body.push('\n');
    body.push_str("Operator comments:\n");
    fs::write(path, body)
}

/// Delete the files of a run. Returns `(deleted, failed, removed_folder)`.
///
/// With the engine's suffix known (resolved earlier or by a fresh scan),
/// only files carrying exactly that suffix are touched. Without it, the
/// match widens to the run's prefix plus the start-time window, so files
/// of earlier runs sharing the folder survive.
fn delete_run_files(run: &RecordingRun) -> (usize, usize, bool) {
    let suffix = run
        .resolver
        .suffix()
        .map(str::to_string)
        .or_else(|| scan_output(&run.log_folder, &run.name_prefix, run.start_wallclock));

    let mut deleted = 0usize;
    let mut failed = 0usize;

    match fs::read_dir(&run.log_folder) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(OsStr::to_str) else {
                    continue;
                };

                let matches = match &suffix {
                    Some(suffix) => {
                        name.starts_with(&format!("{}_{suffix}", run.name_prefix))
                            || name.starts_with(&format!("_{}_{suffix}_", run.name_prefix))
                    }
                    None => {
                        let in_run = name.starts_with(&format!("{}_", run.name_prefix))
                            || name.starts_with(&format!("_{}_", run.name_prefix));
                        if !in_run {
                            false
                        } else {
                            match entry.metadata().and_then(|m| m.modified()) {
                                Ok(mtime) => {
                                    mtime + Duration::from_secs(1) >= run.start_wallclock
                                }
                                Err(_) => false,
                            }
                        }
                    }
                };
                if !matches {
                    continue;
                }

                match fs::remove_file(&path) {
                    Ok(()) => deleted += 1,
                    Err(err) => {
                        log::warn!("could not delete {}: {err}", path.display());
                        failed += 1;
                    }
                }
            }
        }
        Err(err) => {
            log::warn!("cannot list {}: {err}", run.log_folder.display());
            failed += 1;
        }
    }

    let removed_folder = fs::read_dir(&run.log_folder)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
        && fs::remove_dir(&run.log_folder).is_ok();

    (deleted, failed, removed_folder)
}
