// The pool round trip. Record frames go out on one channel and result frames
// come back on another; neither side acknowledges anything, and each stream
// is closed by a one byte sentinel. Frames carry no tag or length prefix, so
// what a message is follows from its size alone.
pub mod error;
pub mod memory;
pub mod receiver;
pub mod sender;
pub mod transport;
pub mod wire;
pub mod zmq;

pub use error::Error;
pub use memory::{link, MemoryTransport};
pub use transport::{FrameSink, FrameSource, Transport};
pub use wire::{classify, Frame, Inbound, RecordFrame, ResultFrame, END_OF_STREAM, SENTINEL};
pub use zmq::ZmqTransport;
