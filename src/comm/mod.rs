//! Transport seam and the asynchronous communication layer.

pub mod layer;
pub mod transport;

pub use layer::{CommLayer, ReceiveCallback};
pub use transport::{Envelope, MemoryComm, Transport};
