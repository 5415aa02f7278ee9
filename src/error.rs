//! Custom error types for the session core.
//!
//! The crate keeps three layers of errors apart, because the recovery
//! policy differs for each (see the connection/operation/filesystem split
//! the session controller documents):
//!
//! - [`HubError`] is the crate-level type every fallible session operation
//!   returns. It wraps configuration, I/O and engine errors via `#[from]`
//!   and adds the precondition failures an operator can act on (not
//!   connected, log root missing, ...).
//! - [`ConnectError`] distinguishes the ways establishing an automation
//!   connection can fail: no candidate identifiers at all, live instances
//!   seen but none matching the requested version, or a plain timeout.
//! - [`DiscoveryError`] tags failures inside the installation scan. The
//!   scan itself never fails as a whole; these exist so callers and tests
//!   can tell "not found" from "lookup failed".
//!
//! Engine-call failures live in [`crate::engine::EngineError`] next to the
//! trait they belong to.

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::EngineError;

/// Convenience alias for results using the crate error type.
pub type HubResult<T> = std::result::Result<T, HubError>;

/// Crate-level error type for session operations.
#[derive(Error, Debug)]
pub enum HubError {
    /// Settings file or environment override could not be read.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Filesystem failure outside the best-effort paths.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A call on the automation object failed.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Connecting to an automation instance failed.
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// An operation that needs a live automation handle was invoked without one.
    #[error("Not connected to a CANoe instance")]
    NotConnected,

    /// `start` was invoked while a recording run is already live.
    #[error("A recording is already active")]
    AlreadyRecording,

    /// A comment was saved (or similar) with no recording run live.
    #[error("No active recording")]
    NoActiveRecording,

    /// The configured log root is empty.
    #[error("Log directory is not configured")]
    LogRootUnset,

    /// The configured log root does not exist on disk.
    #[error("Log directory does not exist: {}", .0.display())]
    LogRootMissing(PathBuf),

    /// The configured log root exists but is not a directory.
    #[error("Log path is not a folder: {}", .0.display())]
    LogRootNotADirectory(PathBuf),
}

/// Failure modes of the attach/spawn connection sequence.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConnectError {
    /// The installation yielded no activation identifiers to try.
    #[error("no activation candidates for '{0}'")]
    NoCandidates(String),

    /// Live instances were obtained but none satisfied the version predicate.
    #[error("running instances found for '{0}', but none matched the requested version")]
    NoMatch(String),

    /// The bounded poll elapsed without obtaining any instance.
    #[error("timed out waiting for an automation server for '{0}'")]
    Timeout(String),
}

/// Per-candidate failures inside the installation scan.
///
/// These never escape [`crate::catalog::CatalogScanner::discover`]; the
/// affected candidate is skipped and the error logged at debug level.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// A directory in the walk could not be listed.
    #[error("cannot list directory {}: {source}", .path.display())]
    ReadDir {
        /// Directory that failed to enumerate.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_errors_are_distinguishable() {
        let a = ConnectError::NoMatch("CANoe 15 (64-bit)".into());
        let b = ConnectError::Timeout("CANoe 15 (64-bit)".into());
        assert_ne!(a, b);
        assert!(a.to_string().contains("none matched"));
        assert!(b.to_string().contains("timed out"));
    }

    #[test]
    fn log_root_errors_carry_the_path() {
        let err = HubError::LogRootMissing(PathBuf::from("D:/Logs"));
        assert!(err.to_string().contains("D:/Logs"));
    }
}
