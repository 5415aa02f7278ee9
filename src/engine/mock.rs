//! Scriptable in-memory engine for tests and demos.
//!
//! `MockEngine` stands in for a live CANoe automation instance. Tests (and
//! the `demo` CLI subcommand) configure its sink tables and failure flags,
//! hand out [`EngineHandle`]s via [`MockEngine::handle`], and inspect the
//! calls the session core made. Handles share state with the `MockEngine`
//! that created them, so flipping a flag mid-test is visible to the
//! controller immediately; this is how external stops and dying servers
//! are simulated.
//!
//! The session model is single-threaded (one event loop, no locking), so
//! shared state is a plain `Rc<RefCell<..>>`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{EngineError, EngineFactory, EngineHandle};

/// One video window in the mock configuration.
#[derive(Debug, Clone)]
pub struct MockVideoSink {
    /// Display name, e.g. `"Cam1"`.
    pub name: String,
    /// Last record-file path written by the controller.
    pub record_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct MockState {
    version: String,
    config_path: PathBuf,
    running: bool,
    /// `None` makes `measurement_time` fail, exercising the wall-clock
    /// fallback in comment timestamps.
    measurement_time: Option<f64>,
    logging_sinks: Vec<PathBuf>,
    video_sinks: Vec<MockVideoSink>,
    system_variables: HashMap<String, String>,
    fail_start: bool,
    fail_stop: bool,
    fail_running: bool,
    fail_version: bool,
    fail_sink_update: bool,
    start_calls: usize,
    stop_calls: usize,
}

/// Test double for a live automation instance.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Rc<RefCell<MockState>>,
}

impl MockEngine {
    /// Create a mock reporting the given version string.
    pub fn new(version: &str) -> Self {
        let engine = Self::default();
        engine.state.borrow_mut().version = version.to_string();
        engine
    }

    /// Hand out an [`EngineHandle`] sharing this mock's state.
    pub fn handle(&self) -> Box<dyn EngineHandle> {
        Box::new(MockHandle {
            state: Rc::clone(&self.state),
        })
    }

    /// Add a logging sink with the given configured path.
    pub fn add_logging_sink(&self, path: &str) {
        self.state.borrow_mut().logging_sinks.push(PathBuf::from(path));
    }

    /// Add a video sink with the given display name.
    pub fn add_video_sink(&self, name: &str) {
        self.state.borrow_mut().video_sinks.push(MockVideoSink {
            name: name.to_string(),
            record_file: None,
        });
    }

    /// Set the currently loaded configuration path.
    pub fn set_config_path(&self, path: &str) {
        self.state.borrow_mut().config_path = PathBuf::from(path);
    }

    /// Currently loaded configuration path.
    pub fn config_path(&self) -> PathBuf {
        self.state.borrow().config_path.clone()
    }

    /// Flip the running flag directly (simulates an external start/stop in
    /// the CANoe UI).
    pub fn set_running(&self, running: bool) {
        self.state.borrow_mut().running = running;
    }

    /// Set the elapsed measurement time reported by `measurement_time`, or
    /// `None` to make that call fail.
    pub fn set_measurement_time(&self, seconds: Option<f64>) {
        self.state.borrow_mut().measurement_time = seconds;
    }

    /// Publish a system variable under its `::`-delimited path.
    pub fn set_system_variable(&self, path: &str, value: &str) {
        self.state
            .borrow_mut()
            .system_variables
            .insert(path.to_string(), value.to_string());
    }

    /// Make `start_measurement` fail.
    pub fn fail_start(&self, fail: bool) {
        self.state.borrow_mut().fail_start = fail;
    }

    /// Make `stop_measurement` fail.
    pub fn fail_stop(&self, fail: bool) {
        self.state.borrow_mut().fail_stop = fail;
    }

    /// Make `measurement_running` fail (simulates a dead server).
    pub fn fail_running(&self, fail: bool) {
        self.state.borrow_mut().fail_running = fail;
    }

    /// Make `version` fail.
    pub fn fail_version(&self, fail: bool) {
        self.state.borrow_mut().fail_version = fail;
    }

    /// Make sink path updates fail.
    pub fn fail_sink_update(&self, fail: bool) {
        self.state.borrow_mut().fail_sink_update = fail;
    }

    /// Whether the mock currently reports a running measurement.
    pub fn running(&self) -> bool {
        self.state.borrow().running
    }

    /// Paths currently configured on the logging sinks.
    pub fn logging_sink_paths(&self) -> Vec<PathBuf> {
        self.state.borrow().logging_sinks.clone()
    }

    /// Snapshot of the video sinks.
    pub fn video_sinks(&self) -> Vec<MockVideoSink> {
        self.state.borrow().video_sinks.clone()
    }

    /// Number of `start_measurement` calls seen.
    pub fn start_calls(&self) -> usize {
        self.state.borrow().start_calls
    }

    /// Number of `stop_measurement` calls seen.
    pub fn stop_calls(&self) -> usize {
        self.state.borrow().stop_calls
    }
}

#[derive(Debug)]
struct MockHandle {
    state: Rc<RefCell<MockState>>,
}

impl EngineHandle for MockHandle {
    fn version(&self) -> Result<String, EngineError> {
        let state = self.state.borrow();
        if state.fail_version {
            return Err(EngineError::Call {
                call: "Application.Version",
                message: "injected failure".into(),
            });
        }
        Ok(state.version.clone())
    }

    fn config_path(&self) -> Result<PathBuf, EngineError> {
        Ok(self.state.borrow().config_path.clone())
    }

    fn open_config(&self, path: &Path) -> Result<(), EngineError> {
        self.state.borrow_mut().config_path = path.to_path_buf();
        Ok(())
    }

    fn measurement_running(&self) -> Result<bool, EngineError> {
        let state = self.state.borrow();
        if state.fail_running {
            return Err(EngineError::Unavailable("injected failure".into()));
        }
        Ok(state.running)
    }

    fn start_measurement(&self) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        state.start_calls += 1;
        if state.fail_start {
            return Err(EngineError::Call {
                call: "Measurement.Start",
                message: "injected failure".into(),
            });
        }
        state.running = true;
        Ok(())
    }

    fn stop_measurement(&self) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        state.stop_calls += 1;
        if state.fail_stop {
            return Err(EngineError::Call {
                call: "Measurement.Stop",
                message: "injected failure".into(),
            });
        }
        state.running = false;
        Ok(())
    }

    fn measurement_time(&self) -> Result<f64, EngineError> {
        self.state
            .borrow()
            .measurement_time
            .ok_or(EngineError::Call {
                call: "Measurement.GetTime",
                message: "no time source".into(),
            })
    }

    fn logging_sink_count(&self) -> Result<usize, EngineError> {
        Ok(self.state.borrow().logging_sinks.len())
    }

    fn logging_sink_path(&self, index: usize) -> Result<PathBuf, EngineError> {
        self.state
            .borrow()
            .logging_sinks
            .get(index)
            .cloned()
            .ok_or(EngineError::SinkIndex(index))
    }

    fn set_logging_sink_path(&self, index: usize, path: &Path) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if state.fail_sink_update {
            return Err(EngineError::Call {
                call: "LoggingCollection.FullName",
                message: "injected failure".into(),
            });
        }
        match state.logging_sinks.get_mut(index) {
            Some(sink) => {
                *sink = path.to_path_buf();
                Ok(())
            }
            None => Err(EngineError::SinkIndex(index)),
        }
    }

    fn video_sink_count(&self) -> Result<usize, EngineError> {
        Ok(self.state.borrow().video_sinks.len())
    }

    fn video_sink_name(&self, index: usize) -> Result<String, EngineError> {
        self.state
            .borrow()
            .video_sinks
            .get(index)
            .map(|sink| sink.name.clone())
            .ok_or(EngineError::SinkIndex(index))
    }

    fn set_video_record_file(&self, index: usize, path: &Path) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if state.fail_sink_update {
            return Err(EngineError::Call {
                call: "VideoWindows.RecordFile",
                message: "injected failure".into(),
            });
        }
        match state.video_sinks.get_mut(index) {
            Some(sink) => {
                sink.record_file = Some(path.to_path_buf());
                Ok(())
            }
            None => Err(EngineError::SinkIndex(index)),
        }
    }

    fn system_variable(&self, path: &str) -> Option<String> {
        self.state.borrow().system_variables.get(path).cloned()
    }
}

/// [`EngineFactory`] over a table of mock engines keyed by activation id.
///
/// `attach` succeeds only for ids registered as running; `spawn` only for
/// ids registered as spawnable. Unknown ids fail the way a missing COM
/// server registration would.
#[derive(Default)]
pub struct MockEngineFactory {
    running: RefCell<HashMap<String, MockEngine>>,
    spawnable: RefCell<HashMap<String, MockEngine>>,
    attach_attempts: RefCell<Vec<String>>,
}

impl MockEngineFactory {
    /// Empty factory: every attach/spawn fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already-running instance under an activation id.
    pub fn register_running(&self, activation_id: &str, engine: MockEngine) {
        self.running
            .borrow_mut()
            .insert(activation_id.to_string(), engine);
    }

    /// Register a spawnable instance under an activation id.
    pub fn register_spawnable(&self, activation_id: &str, engine: MockEngine) {
        self.spawnable
            .borrow_mut()
            .insert(activation_id.to_string(), engine);
    }

    /// Activation ids attach was attempted for, in order.
    pub fn attach_attempts(&self) -> Vec<String> {
        self.attach_attempts.borrow().clone()
    }
}

impl EngineFactory for MockEngineFactory {
    fn attach(&self, activation_id: &str) -> Result<Box<dyn EngineHandle>, EngineError> {
        self.attach_attempts
            .borrow_mut()
            .push(activation_id.to_string());
        self.running
            .borrow()
            .get(activation_id)
            .map(MockEngine::handle)
            .ok_or_else(|| EngineError::Unavailable(format!("no running server for {activation_id}")))
    }

    fn spawn(&self, activation_id: &str) -> Result<Box<dyn EngineHandle>, EngineError> {
        self.spawnable
            .borrow()
            .get(activation_id)
            .map(MockEngine::handle)
            .ok_or_else(|| EngineError::Unavailable(format!("cannot spawn server for {activation_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_share_state_with_the_mock() {
        let engine = MockEngine::new("15.3.45");
        let handle = engine.handle();
        handle.start_measurement().expect("start");
        assert!(engine.running());
        engine.set_running(false);
        assert!(!handle.measurement_running().expect("running flag"));
    }

    #[test]
    fn sink_index_errors_are_reported() {
        let engine = MockEngine::new("15.3.45");
        let handle = engine.handle();
        assert!(matches!(
            handle.logging_sink_path(0),
            Err(EngineError::SinkIndex(0))
        ));
    }
}
