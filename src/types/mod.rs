//! Wire types shared by both halves of the bridge.

pub mod message;

pub use message::{Event, Message, Request, Response, RpcError};
