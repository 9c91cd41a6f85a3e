#![forbid(unsafe_code)]

//! weft Runtime
//!
//! The owner-thread event loop and everything that feeds it.
//!
//! # Key Components
//!
//! - [`Runtime`] - owner-thread handle: top-level and modal loops, hooks,
//!   targets, identifiers, layout entry points
//! - [`Application`] - thread-safe half of the context: `synchronize`, `go`,
//!   `exit`, fault boundary
//! - [`Bridge`] - cross-thread work queue and layout-result batch, woken
//!   through the message pump
//! - [`LayoutPerformer`] - single worker thread computing form layouts with
//!   per-form coalescing
//! - [`Modal`] - components that run a nested loop
//! - [`RuntimeConfig`] - tunables, optionally loaded from TOML/JSON
//!
//! # Role in weft
//! `weft-runtime` is the orchestrator. It fetches messages from a
//! `weft-backend` pump, runs hooks, dispatches to window procedures inside
//! the `weft-core` fault boundary, and applies layout results computed off
//! the owner thread.
//!
//! # Quick start
//!
//! ```
//! use weft_runtime::{Runtime, RuntimeConfig};
//!
//! let rt = Runtime::new(RuntimeConfig::default()).unwrap();
//! let app = rt.app().clone();
//! std::thread::spawn(move || {
//!     let inner = app.clone();
//!     app.synchronize(move || inner.exit(3));
//! });
//! assert_eq!(rt.run(), 3);
//! ```

pub mod application;
pub mod bridge;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod hooks;
pub mod layout;
pub mod modal;
pub mod shutdown;
pub mod tasks;

pub use application::{Application, app, append_to_init, init, try_app};
pub use bridge::{Bridge, Wakeup};
pub use config::{
    ConfigError, IdPoolConfig, LayoutConfig, MessageRangeConfig, ModalConfig, RuntimeConfig,
    TaskConfig,
};
pub use error::RuntimeError;
pub use event_loop::{Runtime, RuntimeBuilder};
pub use hooks::{
    MessageFilter, PostDispatchHandler, PreTranslateHandler, TargetRegistration, WindowProc,
};
pub use layout::{
    Completion, FormId, FormLayout, ItemId, LayoutItem, LayoutPerformer, LayoutPhase,
    LayoutRequest, LayoutResult, LayoutSink, LayoutSnapshot, LayoutStats, Placement,
};
pub use modal::{Modal, default_modal_pre_translate};
pub use shutdown::{ShutdownSource, ShutdownToken};
pub use tasks::{TaskGroup, TaskGuard};
