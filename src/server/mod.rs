//! The backend half of the bridge: connection server, method router, and the
//! built-in task method service.

pub mod core;
pub mod router;
pub mod tasks;

pub use self::core::{BridgeServer, ServerConfig};
pub use self::router::{MethodHandler, MethodRouter};
pub use self::tasks::TaskService;
