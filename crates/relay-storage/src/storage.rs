use async_trait::async_trait;
use time::OffsetDateTime;

use relay_common::GlobalConfig;
use relay_core::{Channel, ChannelId, ChannelRegistry};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("invalid stored config field {field}: {message}")]
    InvalidConfig {
        field: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct GlobalConfigRow {
    pub id: i64,
    pub config: GlobalConfig,
    pub updated_at: OffsetDateTime,
}

/// Persistence used at bootstrap and for channel status writes.
///
/// Channel reads and status changes go through [`ChannelRegistry`].
#[async_trait]
pub trait Storage: ChannelRegistry {
    /// Entity-first schema sync. Run once at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>>;
    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()>;

    /// Inserts or replaces a channel by id, status included.
    async fn upsert_channel(&self, channel: &Channel) -> StorageResult<ChannelId>;
    async fn delete_channel(&self, id: ChannelId) -> StorageResult<()>;
}
