use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entities::phase;
use crate::entities::trigger::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::TriggerStore;

/// Trigger data row (from the `triggers` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRow {
    pub id: String,
    pub phase_id: String,
    pub title: String,
    pub data_source: String,
    pub statement_json: String,
    pub is_mandatory: bool,
    pub is_triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub triggered_by: Option<String>,
    pub repeat_key: Option<String>,
    pub transaction_hash: Option<String>,
    pub notes: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field updates for an untriggered trigger.
#[derive(Debug, Clone, Default)]
pub struct TriggerUpdate {
    pub title: Option<String>,
    pub statement_json: Option<String>,
    pub notes: Option<String>,
}

pub(crate) fn to_row(m: trigger::Model) -> TriggerRow {
    TriggerRow {
        id: m.id,
        phase_id: m.phase_id,
        title: m.title,
        data_source: m.data_source,
        statement_json: m.statement_json,
        is_mandatory: m.is_mandatory,
        is_triggered: m.is_triggered,
        triggered_at: m.triggered_at.map(|t| t.with_timezone(&Utc)),
        triggered_by: m.triggered_by,
        repeat_key: m.repeat_key,
        transaction_hash: m.transaction_hash,
        notes: m.notes,
        is_deleted: m.is_deleted,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl TriggerStore {
    pub async fn insert_trigger(&self, row: &TriggerRow) -> Result<TriggerRow> {
        let now = Utc::now().fixed_offset();
        let am = trigger::ActiveModel {
            id: Set(row.id.clone()),
            phase_id: Set(row.phase_id.clone()),
            title: Set(row.title.clone()),
            data_source: Set(row.data_source.clone()),
            statement_json: Set(row.statement_json.clone()),
            is_mandatory: Set(row.is_mandatory),
            is_triggered: Set(row.is_triggered),
            triggered_at: Set(row.triggered_at.map(|t| t.fixed_offset())),
            triggered_by: Set(row.triggered_by.clone()),
            repeat_key: Set(row.repeat_key.clone()),
            transaction_hash: Set(row.transaction_hash.clone()),
            notes: Set(row.notes.clone()),
            is_deleted: Set(row.is_deleted),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn get_trigger_by_id(&self, id: &str) -> Result<Option<TriggerRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    pub async fn get_trigger_by_repeat_key(&self, repeat_key: &str) -> Result<Option<TriggerRow>> {
        let model = Entity::find()
            .filter(Column::RepeatKey.eq(repeat_key))
            .one(self.db())
            .await?;
        Ok(model.map(to_row))
    }

    pub async fn list_triggers(
        &self,
        phase_id: Option<&str>,
        include_deleted: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TriggerRow>> {
        let mut q = Entity::find();
        if let Some(pid) = phase_id {
            q = q.filter(Column::PhaseId.eq(pid));
        }
        if !include_deleted {
            q = q.filter(Column::IsDeleted.eq(false));
        }
        let rows = q
            .order_by(Column::CreatedAt, Order::Asc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    /// All live (not soft-deleted) triggers of a phase, no pagination.
    /// Used by revert and archive.
    pub async fn list_live_triggers_of_phase(&self, phase_id: &str) -> Result<Vec<TriggerRow>> {
        let rows = Entity::find()
            .filter(Column::PhaseId.eq(phase_id))
            .filter(Column::IsDeleted.eq(false))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_live_optional_triggers(&self, phase_id: &str) -> Result<u64> {
        let count = Entity::find()
            .filter(Column::PhaseId.eq(phase_id))
            .filter(Column::IsDeleted.eq(false))
            .filter(Column::IsMandatory.eq(false))
            .count(self.db())
            .await?;
        Ok(count)
    }

    /// Consume a trigger and credit its phase counter as one
    /// transaction. The conditional mark with its `is_triggered = 0`
    /// filter is the gate: when the trigger was already triggered (or
    /// deleted) nothing is written and `false` comes back, so an
    /// at-least-once redelivery can never credit the counter twice, and
    /// a failure after the mark rolls the mark back with it.
    pub async fn complete_trigger(
        &self,
        id: &str,
        phase_id: &str,
        is_mandatory: bool,
        at: DateTime<Utc>,
        by: &str,
    ) -> Result<bool> {
        let id = id.to_string();
        let phase_id = phase_id.to_string();
        let by = by.to_string();

        let marked = self
            .db()
            .transaction::<_, bool, sea_orm::DbErr>(move |txn| {
                Box::pin(async move {
                    let res = Entity::update_many()
                        .col_expr(Column::IsTriggered, Expr::value(true))
                        .col_expr(Column::TriggeredAt, Expr::value(Some(at.fixed_offset())))
                        .col_expr(Column::TriggeredBy, Expr::value(Some(by.clone())))
                        .col_expr(Column::UpdatedAt, Expr::value(at.fixed_offset()))
                        .filter(Column::Id.eq(id.as_str()))
                        .filter(Column::IsTriggered.eq(false))
                        .filter(Column::IsDeleted.eq(false))
                        .exec(txn)
                        .await?;
                    if res.rows_affected != 1 {
                        return Ok(false);
                    }

                    let counter = if is_mandatory {
                        phase::Column::ReceivedMandatoryTriggers
                    } else {
                        phase::Column::ReceivedOptionalTriggers
                    };
                    let touched = phase::Entity::update_many()
                        .col_expr(counter, Expr::col(counter).add(1))
                        .col_expr(phase::Column::UpdatedAt, Expr::value(at.fixed_offset()))
                        .filter(phase::Column::Id.eq(phase_id.as_str()))
                        .exec(txn)
                        .await?;
                    if touched.rows_affected == 0 {
                        // Rolls the mark back as well
                        return Err(sea_orm::DbErr::RecordNotFound(format!(
                            "phase {phase_id}"
                        )));
                    }
                    Ok(true)
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(e) => StorageError::Db(e),
                TransactionError::Transaction(e) => StorageError::Db(e),
            })?;

        Ok(marked)
    }

    pub async fn soft_delete_trigger(&self, id: &str) -> Result<bool> {
        let res = Entity::update_many()
            .col_expr(Column::IsDeleted, Expr::value(true))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::IsDeleted.eq(false))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected == 1)
    }

    pub async fn update_trigger_fields(
        &self,
        id: &str,
        update: &TriggerUpdate,
    ) -> Result<Option<TriggerRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let now = Utc::now().fixed_offset();
            let mut am: trigger::ActiveModel = m.into();
            if let Some(title) = &update.title {
                am.title = Set(title.clone());
            }
            if let Some(statement) = &update.statement_json {
                am.statement_json = Set(statement.clone());
            }
            if let Some(notes) = &update.notes {
                am.notes = Set(Some(notes.clone()));
            }
            am.updated_at = Set(now);
            let updated = am.update(self.db()).await?;
            Ok(Some(to_row(updated)))
        } else {
            Ok(None)
        }
    }

    pub async fn set_transaction_hash(&self, id: &str, tx_hash: &str) -> Result<bool> {
        let res = Entity::update_many()
            .col_expr(
                Column::TransactionHash,
                Expr::value(Some(tx_hash.to_string())),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// Untriggered, live, automated triggers that still have a repeat
    /// key. Used on startup to re-register their recurring checks.
    pub async fn list_schedulable_triggers(&self) -> Result<Vec<TriggerRow>> {
        let rows = Entity::find()
            .filter(Column::IsDeleted.eq(false))
            .filter(Column::IsTriggered.eq(false))
            .filter(Column::RepeatKey.is_not_null())
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }
}
