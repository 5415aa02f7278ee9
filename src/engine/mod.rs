//! Automation contract for the external CANoe engine.
//!
//! CANoe exposes a loosely-typed COM object graph (`Configuration`,
//! `Measurement`, `OnlineSetup`, `System.Namespaces`, ...). The session core
//! never touches that graph directly; it consumes exactly the operations in
//! [`EngineHandle`], and a thin per-platform adapter implements the trait
//! over the real automation object. This keeps all dynamic/reflective access
//! in one place and the rest of the crate statically typable.
//!
//! Sinks (logging blocks and video windows inside the loaded configuration)
//! are addressed by index, mirroring the indexed collections the automation
//! model exposes. Only the file-path property of a sink is ever rewritten;
//! its other settings are the operator's business.
//!
//! [`mock::MockEngine`] provides a scriptable in-memory implementation for
//! tests and the demo CLI.

pub mod mock;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Placeholder the engine substitutes with the measurement start timestamp
/// when it materializes a sink's file name.
///
/// The substituted value is chosen by the engine and is not predictable in
/// advance, which is why the output resolver exists.
pub const MEASUREMENT_START_TOKEN: &str = "{MeasurementStart}";

/// Errors raised by calls on the automation object.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A specific automation call was rejected.
    #[error("automation call '{call}' failed: {message}")]
    Call {
        /// Name of the failing operation, e.g. `Measurement.Start`.
        call: &'static str,
        /// Message reported by the automation layer.
        message: String,
    },

    /// The automation server is gone (process died, RPC channel broken).
    #[error("automation server unavailable: {0}")]
    Unavailable(String),

    /// A sink index outside the collection was addressed.
    #[error("no sink at index {0}")]
    SinkIndex(usize),
}

/// Capability interface over one live automation instance.
///
/// All methods may fail at any time: the engine is an external process the
/// operator can close under us. Callers treat errors as "instance possibly
/// gone" and let the session controller's reconciliation sort it out.
pub trait EngineHandle {
    /// Version string reported by the instance, e.g. `"15.3.45"`.
    fn version(&self) -> Result<String, EngineError>;

    /// Path of the currently loaded configuration.
    fn config_path(&self) -> Result<PathBuf, EngineError>;

    /// Open a configuration file in the instance.
    fn open_config(&self, path: &Path) -> Result<(), EngineError>;

    /// Whether a measurement is currently running.
    fn measurement_running(&self) -> Result<bool, EngineError>;

    /// Start the measurement.
    fn start_measurement(&self) -> Result<(), EngineError>;

    /// Stop the measurement.
    fn stop_measurement(&self) -> Result<(), EngineError>;

    /// Elapsed measurement time in seconds.
    fn measurement_time(&self) -> Result<f64, EngineError>;

    /// Number of logging sinks in the loaded configuration.
    fn logging_sink_count(&self) -> Result<usize, EngineError>;

    /// Configured output path of a logging sink.
    fn logging_sink_path(&self, index: usize) -> Result<PathBuf, EngineError>;

    /// Rewrite the output path of a logging sink.
    fn set_logging_sink_path(&self, index: usize, path: &Path) -> Result<(), EngineError>;

    /// Number of video sinks in the loaded configuration.
    fn video_sink_count(&self) -> Result<usize, EngineError>;

    /// Display name of a video sink (used in the recorded file name).
    fn video_sink_name(&self, index: usize) -> Result<String, EngineError>;

    /// Rewrite the record-file path of a video sink.
    fn set_video_record_file(&self, index: usize, path: &Path) -> Result<(), EngineError>;

    /// Read a system variable by `::`-delimited path, e.g.
    /// `"anSWer_SysVal::Network_Status::Ethernet"`.
    ///
    /// Best effort: an absent namespace or variable is `None`, never an
    /// error.
    fn system_variable(&self, path: &str) -> Option<String>;
}

/// Obtains [`EngineHandle`]s from the OS automation-activation service.
///
/// An activation identifier names a packaged engine version (for CANoe a
/// COM ProgID such as `CANoe.Application.15`). `attach` asks for an
/// already-running server; `spawn` requests a fresh instance.
pub trait EngineFactory {
    /// Attach to an already-running automation server for `activation_id`.
    fn attach(&self, activation_id: &str) -> Result<Box<dyn EngineHandle>, EngineError>;

    /// Request a new automation server instance for `activation_id`.
    fn spawn(&self, activation_id: &str) -> Result<Box<dyn EngineHandle>, EngineError>;
}

/// Load `cfg` into the instance unless it is already the loaded
/// configuration. Returns `true` if an open was issued.
pub fn ensure_config_loaded(engine: &dyn EngineHandle, cfg: &Path) -> Result<bool, EngineError> {
    let current = engine.config_path()?;
    let same = !current.as_os_str().is_empty()
        && crate::probe::normalize_path_key(&current) == crate::probe::normalize_path_key(cfg);
    if same {
        return Ok(false);
    }
    engine.open_config(cfg)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::mock::MockEngine;
    use super::*;

    #[test]
    fn ensure_config_loaded_skips_matching_path() {
        let engine = MockEngine::new("15.3.45");
        engine.set_config_path("/configs/sysval.cfg");
        let handle = engine.handle();
        let opened = ensure_config_loaded(handle.as_ref(), Path::new("/configs/sysval.cfg"))
            .expect("config check");
        assert!(!opened);
    }

    #[test]
    fn ensure_config_loaded_opens_different_path() {
        let engine = MockEngine::new("15.3.45");
        engine.set_config_path("/configs/old.cfg");
        let handle = engine.handle();
        let opened = ensure_config_loaded(handle.as_ref(), Path::new("/configs/new.cfg"))
            .expect("config check");
        assert!(opened);
        assert_eq!(engine.config_path(), PathBuf::from("/configs/new.cfg"));
    }
}
