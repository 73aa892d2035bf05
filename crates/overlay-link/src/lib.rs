//! `Link`: checksummed frame codec plus four-priority TX/RX queues over an
//! async stream socket (spec §4.1). No connection-management logic lives
//! here — that is the Hub's and Endpoint's job; this crate only knows how
//! to turn bytes into `Frame`s and back, in priority order.

mod codec;
mod error;
mod frame;
mod link;
mod queue;

pub use codec::FrameCodec;
pub use error::LinkError;
pub use frame::Frame;
pub use link::Link;
pub use queue::PriorityQueues;
