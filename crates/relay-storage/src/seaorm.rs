use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Schema,
};
use time::OffsetDateTime;
use tracing::warn;

use relay_common::{GlobalConfig, RetryTransport, SweepMode};
use relay_core::{
    Channel, ChannelId, ChannelRegistry, ChannelStatus, RegistryError, RegistryResult,
};

use crate::entities;
use crate::storage::{GlobalConfigRow, Storage, StorageError, StorageResult};

const GLOBAL_CONFIG_ID: i64 = 1;

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        Ok(Self { db })
    }

    /// Upserts every channel in order. Used to seed from a channels file.
    pub async fn import_channels(&self, channels: &[Channel]) -> StorageResult<usize> {
        for channel in channels {
            self.upsert_channel(channel).await?;
        }
        Ok(channels.len())
    }

    async fn channel_exists(&self, id: ChannelId) -> Result<bool, DbErr> {
        Ok(entities::Channels::find_by_id(id)
            .one(&self.db)
            .await?
            .is_some())
    }
}

fn backend_error(err: DbErr) -> RegistryError {
    RegistryError::Backend(err.to_string())
}

fn channel_from_model(model: entities::channels::Model) -> RegistryResult<Channel> {
    let status = ChannelStatus::from_code(model.status).ok_or(RegistryError::InvalidStatus {
        id: model.id,
        code: model.status,
    })?;
    Ok(Channel {
        id: model.id,
        name: model.name,
        status,
        base_url: model.base_url,
        key: model.api_key,
        test_model: model.test_model,
    })
}

fn invalid(field: &'static str, message: impl ToString) -> StorageError {
    StorageError::InvalidConfig {
        field,
        message: message.to_string(),
    }
}

fn config_from_model(m: entities::global_config::Model) -> StorageResult<GlobalConfig> {
    Ok(GlobalConfig {
        host: m.host,
        port: u16::try_from(m.port).map_err(|err| invalid("port", err))?,
        dsn: m.dsn,
        proxy: m.proxy,
        retry_times: u32::try_from(m.retry_times).map_err(|err| invalid("retry_times", err))?,
        retry_transport: m
            .retry_transport
            .parse::<RetryTransport>()
            .map_err(|err| invalid("retry_transport", err))?,
        sweep_mode: m
            .sweep_mode
            .parse::<SweepMode>()
            .map_err(|err| invalid("sweep_mode", err))?,
        auto_disable_channel: m.auto_disable_channel,
        root_user_email: m.root_user_email,
        notify_webhook: m.notify_webhook,
        sms_template_disabled: m.sms_template_disabled,
        rate_limit_message: m.rate_limit_message,
        event_log: m.event_log,
    })
}

#[async_trait]
impl ChannelRegistry for SeaOrmStorage {
    async fn list_channels(&self, include_disabled: bool) -> RegistryResult<Vec<Channel>> {
        use entities::channels::Column;

        let mut query = entities::Channels::find().order_by_asc(Column::Id);
        if !include_disabled {
            query = query.filter(Column::Status.eq(ChannelStatus::Enabled.code()));
        }
        let rows = query.all(&self.db).await.map_err(backend_error)?;
        // A row that does not decode is left out so the rest stay reachable.
        Ok(rows
            .into_iter()
            .filter_map(|row| match channel_from_model(row) {
                Ok(channel) => Some(channel),
                Err(err) => {
                    warn!(event = "channel_row_invalid", error = %err);
                    None
                }
            })
            .collect())
    }

    async fn get_channel(&self, id: ChannelId) -> RegistryResult<Option<Channel>> {
        entities::Channels::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(backend_error)?
            .map(channel_from_model)
            .transpose()
    }

    async fn set_channel_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
    ) -> RegistryResult<()> {
        use entities::channels::Column;

        let result = entities::Channels::update_many()
            .col_expr(Column::Status, Expr::value(status.code()))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(backend_error)?;
        if result.rows_affected == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: ChannelId,
        expected: ChannelStatus,
        next: ChannelStatus,
    ) -> RegistryResult<bool> {
        use entities::channels::Column;

        let result = entities::Channels::update_many()
            .col_expr(Column::Status, Expr::value(next.code()))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(expected.code()))
            .exec(&self.db)
            .await
            .map_err(backend_error)?;
        if result.rows_affected > 0 {
            return Ok(true);
        }
        if !self.channel_exists(id).await.map_err(backend_error)? {
            return Err(RegistryError::NotFound(id));
        }
        Ok(false)
    }
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::GlobalConfig)
            .register(entities::Channels)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>> {
        let Some(model) = entities::GlobalConfig::find_by_id(GLOBAL_CONFIG_ID)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let id = model.id;
        let updated_at = model.updated_at;
        Ok(Some(GlobalConfigRow {
            id,
            config: config_from_model(model)?,
            updated_at,
        }))
    }

    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()> {
        use entities::global_config::Column;

        let active = entities::global_config::ActiveModel {
            id: ActiveValue::Set(GLOBAL_CONFIG_ID),
            host: ActiveValue::Set(config.host.clone()),
            port: ActiveValue::Set(i32::from(config.port)),
            dsn: ActiveValue::Set(config.dsn.clone()),
            proxy: ActiveValue::Set(config.proxy.clone()),
            retry_times: ActiveValue::Set(
                i32::try_from(config.retry_times).map_err(|err| invalid("retry_times", err))?,
            ),
            retry_transport: ActiveValue::Set(config.retry_transport.to_string()),
            sweep_mode: ActiveValue::Set(config.sweep_mode.to_string()),
            auto_disable_channel: ActiveValue::Set(config.auto_disable_channel),
            root_user_email: ActiveValue::Set(config.root_user_email.clone()),
            notify_webhook: ActiveValue::Set(config.notify_webhook.clone()),
            sms_template_disabled: ActiveValue::Set(config.sms_template_disabled.clone()),
            rate_limit_message: ActiveValue::Set(config.rate_limit_message.clone()),
            event_log: ActiveValue::Set(config.event_log),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::GlobalConfig::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Host,
                        Column::Port,
                        Column::Dsn,
                        Column::Proxy,
                        Column::RetryTimes,
                        Column::RetryTransport,
                        Column::SweepMode,
                        Column::AutoDisableChannel,
                        Column::RootUserEmail,
                        Column::NotifyWebhook,
                        Column::SmsTemplateDisabled,
                        Column::RateLimitMessage,
                        Column::EventLog,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn upsert_channel(&self, channel: &Channel) -> StorageResult<ChannelId> {
        use entities::channels::Column;

        let active = entities::channels::ActiveModel {
            id: ActiveValue::Set(channel.id),
            name: ActiveValue::Set(channel.name.clone()),
            status: ActiveValue::Set(channel.status.code()),
            base_url: ActiveValue::Set(channel.base_url.clone()),
            api_key: ActiveValue::Set(channel.key.clone()),
            test_model: ActiveValue::Set(channel.test_model.clone()),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::Channels::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Name,
                        Column::Status,
                        Column::BaseUrl,
                        Column::ApiKey,
                        Column::TestModel,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(channel.id)
    }

    async fn delete_channel(&self, id: ChannelId) -> StorageResult<()> {
        entities::Channels::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }
}
