use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    /// 1 enabled, 2 manually disabled, 3 auto disabled.
    pub status: i32,
    pub base_url: String,
    pub api_key: String,
    pub test_model: Option<String>,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
