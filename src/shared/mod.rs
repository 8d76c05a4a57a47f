//! Transport plumbing shared by the client and server halves: the newline
//! frame codec and the platform rendezvous (socket / pipe) seam.

pub mod framing;
pub mod net;

pub use framing::{encode, FrameDecoder};
