use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub phase_id: String,
    pub trigger_id: String,
    pub version: i32,
    pub title: String,
    pub data_source: String,
    pub statement_json: String,
    pub is_mandatory: bool,
    pub is_triggered: bool,
    pub triggered_at: Option<DateTimeWithTimeZone>,
    pub triggered_by: Option<String>,
    pub phase_activation_date: Option<DateTimeWithTimeZone>,
    pub reverted_at: DateTimeWithTimeZone,
    pub reverted_by: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
