//! # machsight-core
//!
//! Core library for machsight - a desktop client for a machine-monitoring
//! backend.
//!
//! This library provides:
//! - Domain types for machines, measurements, events, chat, and analysis
//! - An async REST client for the backend API
//! - The in-memory data model with its cache invariants
//! - The presenter that coordinates user actions, cache, and view
//! - A supervisor that spawns and manages a local backend process
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ ensure_running ┌───────────────────┐
//! │ Supervisor ├───────────────►│  backend process  │
//! └────────────┘                └───────┬───────────┘
//!                                       │ HTTP
//! ┌────────────┐   requests    ┌────────┴──────┐
//! │ Presenter  ├──────────────►│   ApiClient   │
//! └─────┬──────┘               └───────────────┘
//!       │ mutations / notifications
//! ┌─────┴──────┐    view updates    ┌──────────────┐
//! │ DataModel  │◄──────────────────►│ dyn MainView │
//! └────────────┘                    └──────────────┘
//! ```
//!
//! Everything except the supervisor runs on a single-threaded event loop;
//! components are shared with `Rc` and never block the loop on network I/O.

// Re-export commonly used items at the crate root
pub use api::{ApiClient, ClientSignal};
pub use config::Config;
pub use error::{Error, Result};
pub use model::{DataModel, ModelEvent};
pub use presenter::Presenter;
pub use supervisor::{BackendCommand, BackendSupervisor, Startup, SupervisorEvent, SupervisorState, Timings};
pub use types::*;
pub use view::MainView;

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod presenter;
pub mod supervisor;
pub mod types;
pub mod view;
