pub mod connection;
pub mod presence;
pub mod registry;
pub mod router;
pub mod typing;

pub use router::{BroadcastRouter, RouterConfig};
