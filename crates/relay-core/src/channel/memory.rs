use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::registry::{ChannelRegistry, RegistryError, RegistryResult};
use super::state::{Channel, ChannelId, ChannelStatus};

/// Process-local registry. Listing order is ascending channel id.
#[derive(Default)]
pub struct MemoryChannelRegistry {
    channels: RwLock<BTreeMap<ChannelId, Channel>>,
}

impl MemoryChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels(channels: impl IntoIterator<Item = Channel>) -> Self {
        let channels = channels
            .into_iter()
            .map(|channel| (channel.id, channel))
            .collect();
        Self {
            channels: RwLock::new(channels),
        }
    }

    /// Inserts or replaces a channel.
    pub async fn insert(&self, channel: Channel) {
        self.channels.write().await.insert(channel.id, channel);
    }

    pub async fn status(&self, id: ChannelId) -> Option<ChannelStatus> {
        self.channels.read().await.get(&id).map(|c| c.status)
    }
}

#[async_trait]
impl ChannelRegistry for MemoryChannelRegistry {
    async fn list_channels(&self, include_disabled: bool) -> RegistryResult<Vec<Channel>> {
        let guard = self.channels.read().await;
        Ok(guard
            .values()
            .filter(|channel| include_disabled || channel.status.is_enabled())
            .cloned()
            .collect())
    }

    async fn get_channel(&self, id: ChannelId) -> RegistryResult<Option<Channel>> {
        Ok(self.channels.read().await.get(&id).cloned())
    }

    async fn set_channel_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
    ) -> RegistryResult<()> {
        let mut guard = self.channels.write().await;
        let channel = guard.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        channel.status = status;
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: ChannelId,
        expected: ChannelStatus,
        next: ChannelStatus,
    ) -> RegistryResult<bool> {
        let mut guard = self.channels.write().await;
        let channel = guard.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if channel.status != expected {
            return Ok(false);
        }
        channel.status = next;
        Ok(true)
    }
}
