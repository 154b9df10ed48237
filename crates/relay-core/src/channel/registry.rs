use async_trait::async_trait;

use super::state::{Channel, ChannelId, ChannelStatus};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("channel #{0} not found")]
    NotFound(ChannelId),
    #[error("channel #{id} has unknown status code {code}")]
    InvalidStatus { id: ChannelId, code: i32 },
    #[error("registry backend error: {0}")]
    Backend(String),
}

/// Source of truth for channels and their availability.
///
/// The relay never performs read-modify-write on a status itself: it either
/// issues an unconditional `set_channel_status` or a `compare_and_set_status`
/// keyed by the status it observed.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    async fn list_channels(&self, include_disabled: bool) -> RegistryResult<Vec<Channel>>;

    async fn get_channel(&self, id: ChannelId) -> RegistryResult<Option<Channel>>;

    async fn set_channel_status(&self, id: ChannelId, status: ChannelStatus)
    -> RegistryResult<()>;

    /// Writes `next` only if the stored status still equals `expected`.
    /// Returns whether the write happened.
    async fn compare_and_set_status(
        &self,
        id: ChannelId,
        expected: ChannelStatus,
        next: ChannelStatus,
    ) -> RegistryResult<bool>;
}
