pub mod channels;
pub mod global_config;

pub use channels::Entity as Channels;
pub use global_config::Entity as GlobalConfig;
