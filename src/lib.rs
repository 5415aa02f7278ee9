//! # canoe-hub core library
//!
//! This crate is the headless session core of a control panel for Vector
//! CANoe, the vendor measurement/logging application automotive test
//! engineers drive during in-vehicle recording sessions. CANoe itself is
//! only reachable through its automation object model, so everything that
//! touches it goes through the narrow [`engine::EngineHandle`] capability
//! trait; the rest of the crate is statically typed session logic.
//!
//! ## Crate structure
//!
//! - **`engine`**: the automation call contract (`EngineHandle`,
//!   `EngineFactory`) plus a scriptable [`engine::mock::MockEngine`] used by
//!   tests and the demo CLI.
//! - **`probe`**: process-list and registry lookup contracts
//!   (`ProcessProbe`, `InstallProbe`) with a `sysinfo`-backed process probe.
//! - **`catalog`**: discovery of installed CANoe versions on the local
//!   machine, ranked and deduplicated.
//! - **`matcher`**: matching a running process or live automation instance
//!   to a requested installation, with bounded attach/spawn polling.
//! - **`naming`**: deterministic file/folder naming for one recording run.
//! - **`resolver`**: polling state machine that discovers the real output
//!   filename CANoe chose after a measurement starts.
//! - **`session`**: the session state machine owning the engine handle and
//!   the lifecycle of one recording run (start/stop/discard, operator
//!   comments, background reconciliation).
//! - **`persist`**: flat-JSON persisted state and the vehicle catalog.
//! - **`config`**: runtime settings (scan roots, poll intervals, budgets).
//! - **`error`**: the crate error taxonomy.
//!
//! All polling outside the bounded connect path is modelled as `tick()`
//! entry points driven by whatever event loop hosts this crate; nothing in
//! here spawns threads.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod naming;
pub mod persist;
pub mod probe;
pub mod resolver;
pub mod session;

pub use catalog::{CatalogScanner, Installation};
pub use config::Settings;
pub use engine::{EngineFactory, EngineHandle};
pub use error::{HubError, HubResult};
pub use session::{SessionController, SessionState};
