//! # timer-core
//!
//! Cross-process timer synchronization for the ambient timer surface.
//!
//! The main process owns the authoritative timer through [`SyncController`].
//! The rendering extension never mutates it: it reads the published
//! [`TimerRecord`] and records user intents through the [`ActionRelay`].
//! The shared container directory is the only channel between them.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Every store operation is a
//!   small local file read or an atomic rename.
//! - **Not thread-safe**: The controller is a plain owned value; the daemon
//!   wraps it in a `Mutex`.
//! - **Fail closed**: A missing or corrupt container reads as "nothing to
//!   display", never as a crash.
//! - **Injectable**: Clock, host surface, store root, and config are all
//!   passed in at the process entry point.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use timer_core::{ContainerPaths, FileSurfaceHost, SharedStore, SyncConfig, SyncController, SystemClock};
//!
//! let paths = ContainerPaths::from_env().expect("container");
//! let clock = Arc::new(SystemClock);
//! let store = SharedStore::new(paths.clone(), clock.clone());
//! let host = Box::new(FileSurfaceHost::new(paths.clone(), clock.clone()));
//! let mut controller = SyncController::new(store, host, clock, SyncConfig::default());
//! controller.start("Session A", chrono::Duration::minutes(5), timer_protocol::TimerMode::Countdown)?;
//! ```

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod foreground;
pub mod host;
pub mod projection;
pub mod relay;
pub mod storage;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use config::SyncConfig;
pub use controller::{ControllerSnapshot, Phase, SyncController, TickReport};
pub use error::{HostError, Result, TimerError};
pub use foreground::{ForegroundPhase, ForegroundSnapshot, ForegroundTimerService};
pub use host::{ActivityAttributes, ActivityHandle, Dismissal, FileSurfaceHost, SurfaceContent, SurfaceHost};
pub use projection::{SurfaceView, TimerView};
pub use relay::{ActionRelay, PollTrigger};
pub use storage::ContainerPaths;
pub use store::{SharedStore, TimerRecord};

#[cfg(any(test, feature = "test-helpers"))]
pub use clock::ManualClock;
#[cfg(any(test, feature = "test-helpers"))]
pub use host::{HostCall, RecordingHost};
