#![forbid(unsafe_code)]

//! weft public facade crate.
//!
//! Re-exports the stable surface of the internal crates and offers a
//! prelude for day-to-day use.

// --- Core re-exports -------------------------------------------------------

pub use weft_core::{
    AbortProcess, Escalate, FaultBoundary, IdAllocator, IdError, Message, MessageCodeAllocator,
    OwnerThread, Rect, RedirectedPanic, Size, TargetId, codes,
};

// --- Backend re-exports ----------------------------------------------------

pub use weft_backend::{MessagePump, PumpError, QueuePump};

// --- Runtime re-exports ----------------------------------------------------

pub use weft_runtime::{
    Application, Completion, ConfigError, FormId, FormLayout, ItemId, LayoutItem, LayoutPhase,
    LayoutResult, LayoutSnapshot, LayoutStats, MessageFilter, Modal, Placement,
    PostDispatchHandler, PreTranslateHandler, Runtime, RuntimeBuilder, RuntimeConfig,
    RuntimeError, ShutdownToken, TargetRegistration, WindowProc, app, append_to_init,
    default_modal_pre_translate, init, try_app,
};

/// Standard result type for weft APIs.
pub type Result<T> = std::result::Result<T, RuntimeError>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Application, FormLayout, LayoutItem, Message, Modal, Result, Runtime, RuntimeConfig,
        RuntimeError, TargetId, TargetRegistration, codes,
    };

    pub use crate::{backend, core, runtime};
}

pub use weft_backend as backend;
pub use weft_core as core;
pub use weft_runtime as runtime;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_runs_a_loop() -> Result<()> {
        let rt = Runtime::new(RuntimeConfig::default())?;
        rt.app().exit(2);
        assert_eq!(rt.run(), 2);
        Ok(())
    }
}
