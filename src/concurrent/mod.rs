//! Thread-safe building blocks for the outbound message path.

pub mod buffer;
pub mod pool;
pub mod queue;

pub use buffer::{AppendBuffer, ByteBuffer, Frame};
pub use pool::{AppendOutcome, TagBuffers};
pub use queue::BoundedQueue;
