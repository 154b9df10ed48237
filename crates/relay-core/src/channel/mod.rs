mod memory;
mod registry;
mod state;

pub use memory::MemoryChannelRegistry;
pub use registry::{ChannelRegistry, RegistryError, RegistryResult};
pub use state::{Channel, ChannelId, ChannelRef, ChannelStatus};
