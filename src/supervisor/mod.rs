//! Supervision engine.
//!
//! The supervisor owns the watermark store and is the only component that
//! sees raw feed notifications. Everything downstream consumes the
//! `SupervisorEvent`s it emits.

mod engine;
mod watermark;

pub use engine::{StopReason, Supervisor};
pub use watermark::WatermarkStore;
