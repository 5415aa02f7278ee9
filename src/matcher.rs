//! Process/instance matching and the bounded connect sequence.
//!
//! Activation identifiers are not guaranteed unique per packaged major
//! release, so obtaining a handle is never trusted on its own: every
//! candidate instance is interrogated for its reported version and matched
//! against the installation the operator selected. Everything that can
//! throw on the automation side (attaching, reading the version string) is
//! treated as "no match, try the next candidate"; only the overall timeout
//! surfaces as a failure.
//!
//! The attach/spawn polls here are the one place the core blocks the
//! caller, bounded by an explicit [`PollPolicy`].

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::catalog::{activation_id_candidates, major_from_text, Installation, ENGINE_MARKER};
use crate::engine::{EngineFactory, EngineHandle};
use crate::error::ConnectError;
use crate::probe::{normalize_path_key, ProcessProbe};

/// Bounds for one blocking poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Delay between candidate rounds.
    pub interval: Duration,
    /// Total budget before giving up.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Default bounds for attaching to a running server.
    pub fn attach_default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(15),
        }
    }

    /// Default bounds for spawning a new server.
    pub fn spawn_default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Whether an engine process is running.
///
/// Matches any process whose image name contains the engine marker
/// (case-insensitive). With `executable` given, the running process must
/// additionally resolve to exactly that path.
pub fn is_engine_running(probe: &dyn ProcessProbe, executable: Option<&Path>) -> bool {
    let exec_key = executable.map(normalize_path_key);
    probe.running_processes().iter().any(|process| {
        if !process.name.to_lowercase().contains(ENGINE_MARKER) {
            return false;
        }
        match (&exec_key, &process.executable) {
            (None, _) => true,
            (Some(key), Some(path)) => normalize_path_key(path) == *key,
            (Some(_), None) => false,
        }
    })
}

/// Read the instance's version and compare its leading integer.
///
/// An unreadable version string is a non-match, never a panic.
pub fn version_matches(engine: &dyn EngineHandle, expected_major: u32) -> bool {
    match engine.version() {
        Ok(version) => major_from_text(&version) == Some(expected_major),
        Err(err) => {
            log::debug!("candidate rejected, cannot read version: {err}");
            false
        }
    }
}

/// Poll for an already-running automation server.
///
/// Tries each activation id in order, returning the first handle the
/// predicate accepts; `None` once the timeout elapses. An empty id list
/// returns `None` immediately.
pub fn attach_running(
    factory: &dyn EngineFactory,
    activation_ids: &[String],
    mut predicate: impl FnMut(&dyn EngineHandle) -> bool,
    policy: PollPolicy,
) -> Option<Box<dyn EngineHandle>> {
    if activation_ids.is_empty() {
        return None;
    }
    poll_candidates(activation_ids, policy, |id| match factory.attach(id) {
        Ok(handle) if predicate(handle.as_ref()) => Some(handle),
        Ok(_) => None,
        Err(err) => {
            log::debug!("attach via '{id}' failed: {err}");
            None
        }
    })
}

/// Poll for a freshly spawned automation server.
///
/// Same structure as [`attach_running`] but requests a new instance per
/// candidate id. An empty id list returns `None` immediately.
pub fn spawn_instance(
    factory: &dyn EngineFactory,
    activation_ids: &[String],
    mut predicate: impl FnMut(&dyn EngineHandle) -> bool,
    policy: PollPolicy,
) -> Option<Box<dyn EngineHandle>> {
    if activation_ids.is_empty() {
        return None;
    }
    poll_candidates(activation_ids, policy, |id| match factory.spawn(id) {
        Ok(handle) if predicate(handle.as_ref()) => Some(handle),
        Ok(_) => None,
        Err(err) => {
            log::debug!("spawn via '{id}' failed: {err}");
            None
        }
    })
}

fn poll_candidates(
    activation_ids: &[String],
    policy: PollPolicy,
    mut try_candidate: impl FnMut(&str) -> Option<Box<dyn EngineHandle>>,
) -> Option<Box<dyn EngineHandle>> {
    let deadline = Instant::now() + policy.timeout;
    loop {
        for id in activation_ids {
            if let Some(handle) = try_candidate(id) {
                return Some(handle);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(policy.interval);
    }
}

/// Activation identifiers to try for an installation, most specific first:
/// padded/unpadded forms of its major version, its own verified id, then
/// the generic family identifiers.
pub fn connection_candidates(installation: &Installation) -> Vec<String> {
    let mut candidates = activation_id_candidates(installation.major());
    if let Some(id) = &installation.activation_id {
        if !candidates.contains(id) {
            // Keep the verified id ahead of the generic fallbacks.
            let generic_at = candidates
                .iter()
                .position(|c| !c.chars().last().is_some_and(|ch| ch.is_ascii_digit()))
                .unwrap_or(candidates.len());
            candidates.insert(generic_at, id.clone());
        }
    }
    candidates
}

/// Connect to an automation instance matching the installation: attach to a
/// running server first, spawn a new one if none matches.
///
/// With no version hint on the installation any instance is accepted.
/// Failure distinguishes "instances seen, none matched" from a plain
/// timeout.
pub fn connect_installation(
    factory: &dyn EngineFactory,
    installation: &Installation,
    attach_policy: PollPolicy,
    spawn_policy: PollPolicy,
) -> Result<Box<dyn EngineHandle>, ConnectError> {
    let candidates = connection_candidates(installation);
    if candidates.is_empty() {
        return Err(ConnectError::NoCandidates(installation.label.clone()));
    }

    let expected_major = installation.major();
    let mut instances_seen = 0usize;
    let mut accept = |engine: &dyn EngineHandle| {
        instances_seen += 1;
        match expected_major {
            Some(major) => version_matches(engine, major),
            None => true,
        }
    };

    if let Some(handle) = attach_running(factory, &candidates, &mut accept, attach_policy) {
        log::debug!("attached to running instance for '{}'", installation.label);
        return Ok(handle);
    }
    if let Some(handle) = spawn_instance(factory, &candidates, &mut accept, spawn_policy) {
        log::debug!("spawned new instance for '{}'", installation.label);
        return Ok(handle);
    }

    if instances_seen > 0 {
        Err(ConnectError::NoMatch(installation.label.clone()))
    } else {
        Err(ConnectError::Timeout(installation.label.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockEngine, MockEngineFactory};
    use crate::probe::ProcessInfo;
    use std::path::PathBuf;

    struct FixedProbe(Vec<ProcessInfo>);

    impl ProcessProbe for FixedProbe {
        fn running_processes(&self) -> Vec<ProcessInfo> {
            self.0.clone()
        }
    }

    fn quick_poll() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(40),
        }
    }

    fn installation(major: Option<u32>) -> Installation {
        Installation {
            label: "CANoe 15 (64-bit)".into(),
            executable: PathBuf::from("C:/Vector/CANoe_15/Exec64/CANoe64.exe"),
            version_hint: major.map(|m| vec![m]).unwrap_or_default(),
            activation_id: Some("CANoe.Application.15".into()),
        }
    }

    #[test]
    fn running_check_matches_marker_substring() {
        let probe = FixedProbe(vec![ProcessInfo {
            name: "CANoe64.exe".into(),
            executable: Some(PathBuf::from("C:/Vector/CANoe64.exe")),
        }]);
        assert!(is_engine_running(&probe, None));

        let probe = FixedProbe(vec![ProcessInfo {
            name: "notepad.exe".into(),
            executable: None,
        }]);
        assert!(!is_engine_running(&probe, None));
    }

    #[test]
    fn running_check_with_executable_requires_exact_path() {
        let processes = vec![ProcessInfo {
            name: "CANoe64.exe".into(),
            executable: Some(PathBuf::from("C:/Vector/CANoe_15/Exec64/CANoe64.exe")),
        }];
        let probe = FixedProbe(processes);
        assert!(is_engine_running(
            &probe,
            Some(Path::new("c:/vector/canoe_15/exec64/canoe64.exe")),
        ));
        assert!(!is_engine_running(
            &probe,
            Some(Path::new("C:/Vector/CANoe_12/CANoe64.exe")),
        ));
    }

    #[test]
    fn version_match_reads_leading_integer() {
        let engine = MockEngine::new("15.3.45 SP2");
        let handle = engine.handle();
        assert!(version_matches(handle.as_ref(), 15));
        assert!(!version_matches(handle.as_ref(), 12));

        engine.fail_version(true);
        assert!(!version_matches(handle.as_ref(), 15));
    }

    #[test]
    fn attach_prefers_first_matching_candidate() {
        let factory = MockEngineFactory::new();
        factory.register_running("CANoe.Application.12", MockEngine::new("12.0.101"));
        factory.register_running("CANoe.Application.15", MockEngine::new("15.3.45"));

        let ids = vec![
            "CANoe.Application.15".to_string(),
            "CANoe.Application.12".to_string(),
        ];
        let handle = attach_running(
            &factory,
            &ids,
            |engine| version_matches(engine, 15),
            quick_poll(),
        )
        .expect("attach");
        assert!(version_matches(handle.as_ref(), 15));
    }

    #[test]
    fn attach_times_out_without_running_server() {
        let factory = MockEngineFactory::new();
        let ids = vec!["CANoe.Application.15".to_string()];
        let handle = attach_running(&factory, &ids, |_| true, quick_poll());
        assert!(handle.is_none());
        assert!(!factory.attach_attempts().is_empty());
    }

    #[test]
    fn spawn_with_no_candidates_returns_immediately() {
        let factory = MockEngineFactory::new();
        let started = Instant::now();
        assert!(spawn_instance(&factory, &[], |_| true, quick_poll()).is_none());
        assert!(started.elapsed() < Duration::from_millis(30));
    }

    #[test]
    fn attach_with_no_candidates_returns_immediately() {
        let factory = MockEngineFactory::new();
        let started = Instant::now();
        assert!(attach_running(&factory, &[], |_| true, quick_poll()).is_none());
        assert!(started.elapsed() < Duration::from_millis(30));
        assert!(factory.attach_attempts().is_empty());
    }

    #[test]
    fn connect_falls_back_to_spawn() {
        let factory = MockEngineFactory::new();
        factory.register_spawnable("CANoe.Application.15", MockEngine::new("15.3.45"));

        let handle =
            connect_installation(&factory, &installation(Some(15)), quick_poll(), quick_poll())
                .expect("connect");
        assert!(version_matches(handle.as_ref(), 15));
    }

    #[test]
    fn connect_distinguishes_no_match_from_timeout() {
        // A running server with the wrong major: NoMatch.
        let factory = MockEngineFactory::new();
        factory.register_running("CANoe.Application.15", MockEngine::new("12.0.101"));
        let err = connect_installation(&factory, &installation(Some(15)), quick_poll(), quick_poll())
            .err()
            .expect("wrong version must not connect");
        assert!(matches!(err, ConnectError::NoMatch(_)));

        // No server at all: Timeout.
        let factory = MockEngineFactory::new();
        let err = connect_installation(&factory, &installation(Some(15)), quick_poll(), quick_poll())
            .err()
            .expect("nothing to connect to");
        assert!(matches!(err, ConnectError::Timeout(_)));
    }

    #[test]
    fn connection_candidates_include_verified_id_before_generics() {
        let mut inst = installation(Some(15));
        inst.activation_id = Some("CANoe.Application.15 SP2".into());
        let candidates = connection_candidates(&inst);
        let verified = candidates
            .iter()
            .position(|c| c == "CANoe.Application.15 SP2")
            .expect("verified id present");
        let generic = candidates
            .iter()
            .position(|c| c == "CANoe.Application")
            .expect("generic present");
        assert!(verified < generic);
    }
}
