use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Single-row table holding the last merged process configuration.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "global_config")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub host: String,
    pub port: i32,
    pub dsn: String,
    pub proxy: Option<String>,
    pub retry_times: i32,
    pub retry_transport: String,
    pub sweep_mode: String,
    pub auto_disable_channel: bool,
    pub root_user_email: Option<String>,
    pub notify_webhook: Option<String>,
    pub sms_template_disabled: String,
    pub rate_limit_message: String,
    pub event_log: bool,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
