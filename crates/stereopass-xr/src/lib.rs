//! OpenXR session lifecycle and the Vulkan upload/composite pipeline.
//!
//! The compositor runtime owns timing: the frame scheduler in
//! [`pipeline`] is reactive to `wait_frame`, never self-timed. All GPU
//! work is recorded into one-shot command buffers that are submitted
//! and waited on synchronously; there is no cross-tick pipelining.

pub mod compositor;
pub mod pipeline;
pub mod resources;
pub mod session;
pub mod upload;
pub mod vulkan;

pub use pipeline::PassthroughPipeline;
pub use session::{SessionControl, SessionPhase, SessionTracker};
