/// Push channel connection management
pub mod manager;
pub mod registry;

pub use manager::{reconnect_delay, ConnectionManager, LinkEvent, LinkState};
pub use registry::ConnectionRegistry;
