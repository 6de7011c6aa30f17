use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "triggers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub phase_id: String,
    pub title: String,
    pub data_source: String,
    pub statement_json: String,
    pub is_mandatory: bool,
    pub is_triggered: bool,
    pub triggered_at: Option<DateTimeWithTimeZone>,
    pub triggered_by: Option<String>,
    #[sea_orm(unique)]
    pub repeat_key: Option<String>,
    pub transaction_hash: Option<String>,
    pub notes: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
