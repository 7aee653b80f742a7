//! Control-flow trace recording for branch-predictor research.
//!
//! An instrumentation host classifies each control-transfer instruction
//! once at preparation time ([classify]), builds a [CtiEvent] from the
//! values observed when it executes, and hands the event to a
//! [TraceSession], which appends one fixed-width [TraceRecord] to the
//! owning thread's trace file.

pub mod branch;
pub mod classify;
pub mod errors;
pub mod event;
pub mod session;
pub mod sink;
pub mod synth;

pub use branch::*;
pub use classify::*;
pub use errors::*;
pub use event::*;
pub use session::*;
pub use sink::*;
pub use synth::*;
