#![forbid(unsafe_code)]

//! Core: owner-thread primitives shared by every weft crate.
//!
//! # Role in weft
//! `weft-core` is the leaf layer. It knows nothing about event loops or
//! worker threads; it only defines the pieces those layers are built from.
//!
//! # Primary responsibilities
//! - **IdAllocator / MessageCodeAllocator**: bounded identifier issuance for
//!   the owner thread.
//! - **OwnerThread**: the token that pins UI state to a single thread.
//! - **FaultBoundary**: the fire-wall wrapped around every native callback.
//! - **Message / TargetId**: the canonical message model the pump carries.
//! - **Geometry**: pixel sizes and rectangles used by layout snapshots.
//!
//! # How it fits in the system
//! `weft-backend` moves [`message::Message`] values between threads and
//! `weft-runtime` consumes them on the owner thread, asserting ownership with
//! [`owner::OwnerThread`] and dispatching through a [`fault::FaultBoundary`].

pub mod fault;
pub mod geometry;
pub mod ids;
pub mod message;
pub mod owner;

pub use fault::{AbortProcess, Escalate, FaultBoundary, RedirectedPanic};
pub use geometry::{Rect, Size};
pub use ids::{IdAllocator, IdError, MessageCodeAllocator};
pub use message::{Message, TargetId, codes};
pub use owner::OwnerThread;
