use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entities::{phase, trigger, trigger_history};
use crate::error::{Result, StorageError};
use crate::store::TriggerStore;

/// Immutable per-revert snapshot row (from the `trigger_history` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerHistoryRow {
    pub id: String,
    pub phase_id: String,
    pub trigger_id: String,
    pub version: i32,
    pub title: String,
    pub data_source: String,
    pub statement_json: String,
    pub is_mandatory: bool,
    pub is_triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub triggered_by: Option<String>,
    pub phase_activation_date: Option<DateTime<Utc>>,
    pub reverted_at: DateTime<Utc>,
    pub reverted_by: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful phase revert.
#[derive(Debug, Clone, Serialize)]
pub struct RevertOutcome {
    pub phase_id: String,
    pub version: i32,
    pub reverted_triggers: usize,
    pub reverted_at: DateTime<Utc>,
}

fn to_row(m: trigger_history::Model) -> TriggerHistoryRow {
    TriggerHistoryRow {
        id: m.id,
        phase_id: m.phase_id,
        trigger_id: m.trigger_id,
        version: m.version,
        title: m.title,
        data_source: m.data_source,
        statement_json: m.statement_json,
        is_mandatory: m.is_mandatory,
        is_triggered: m.is_triggered,
        triggered_at: m.triggered_at.map(|t| t.with_timezone(&Utc)),
        triggered_by: m.triggered_by,
        phase_activation_date: m.phase_activation_date.map(|t| t.with_timezone(&Utc)),
        reverted_at: m.reverted_at.with_timezone(&Utc),
        reverted_by: m.reverted_by,
        created_at: m.created_at.with_timezone(&Utc),
    }
}

impl TriggerStore {
    /// Highest snapshot version recorded for a phase, 0 when none.
    pub async fn max_history_version(&self, phase_id: &str) -> Result<i32> {
        let latest = trigger_history::Entity::find()
            .filter(trigger_history::Column::PhaseId.eq(phase_id))
            .order_by(trigger_history::Column::Version, Order::Desc)
            .limit(1)
            .one(self.db())
            .await?;
        Ok(latest.map(|m| m.version).unwrap_or(0))
    }

    pub async fn list_history(
        &self,
        phase_id: &str,
        version: Option<i32>,
    ) -> Result<Vec<TriggerHistoryRow>> {
        let mut q = trigger_history::Entity::find()
            .filter(trigger_history::Column::PhaseId.eq(phase_id));
        if let Some(v) = version {
            q = q.filter(trigger_history::Column::Version.eq(v));
        }
        let rows = q
            .order_by(trigger_history::Column::Version, Order::Desc)
            .order_by(trigger_history::Column::TriggerId, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    /// Revert an activated phase as one all-or-nothing transaction:
    /// snapshot every live trigger into `trigger_history` at
    /// `version = max + 1`, clear each trigger's triggered fields, and
    /// reset the phase (counters to 0, inactive, `activated_at` NULL).
    ///
    /// Preconditions (`is_active && can_revert`) are re-checked inside
    /// the transaction; `Ok(None)` means they no longer held, which the
    /// caller surfaces as a conflict. Nothing is written in that case.
    pub async fn revert_phase(
        &self,
        phase_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RevertOutcome>> {
        let phase_id = phase_id.to_string();
        let actor = actor.to_string();

        let outcome = self
            .db()
            .transaction::<_, Option<RevertOutcome>, sea_orm::DbErr>(move |txn| {
                Box::pin(async move {
                    let Some(phase_model) = phase::Entity::find_by_id(&phase_id).one(txn).await?
                    else {
                        return Ok(None);
                    };
                    if !phase_model.is_active || !phase_model.can_revert {
                        return Ok(None);
                    }

                    let latest = trigger_history::Entity::find()
                        .filter(trigger_history::Column::PhaseId.eq(phase_id.as_str()))
                        .order_by(trigger_history::Column::Version, Order::Desc)
                        .limit(1)
                        .one(txn)
                        .await?;
                    let version = latest.map(|m| m.version).unwrap_or(0) + 1;

                    let triggers = trigger::Entity::find()
                        .filter(trigger::Column::PhaseId.eq(phase_id.as_str()))
                        .filter(trigger::Column::IsDeleted.eq(false))
                        .all(txn)
                        .await?;

                    let activation_date = phase_model.activated_at;
                    let now_fixed = now.fixed_offset();
                    let reverted = triggers.len();

                    for t in triggers {
                        let snapshot = trigger_history::ActiveModel {
                            id: Set(riverwatch_common::id::next_id()),
                            phase_id: Set(t.phase_id.clone()),
                            trigger_id: Set(t.id.clone()),
                            version: Set(version),
                            title: Set(t.title.clone()),
                            data_source: Set(t.data_source.clone()),
                            statement_json: Set(t.statement_json.clone()),
                            is_mandatory: Set(t.is_mandatory),
                            is_triggered: Set(t.is_triggered),
                            triggered_at: Set(t.triggered_at),
                            triggered_by: Set(t.triggered_by.clone()),
                            phase_activation_date: Set(activation_date),
                            reverted_at: Set(now_fixed),
                            reverted_by: Set(actor.clone()),
                            created_at: Set(now_fixed),
                        };
                        snapshot.insert(txn).await?;

                        let mut am: trigger::ActiveModel = t.into();
                        am.is_triggered = Set(false);
                        am.triggered_at = Set(None);
                        am.triggered_by = Set(None);
                        am.updated_at = Set(now_fixed);
                        am.update(txn).await?;
                    }

                    let mut pm: phase::ActiveModel = phase_model.into();
                    pm.received_mandatory_triggers = Set(0);
                    pm.received_optional_triggers = Set(0);
                    pm.is_active = Set(false);
                    pm.activated_at = Set(None);
                    pm.updated_at = Set(now_fixed);
                    pm.update(txn).await?;

                    Ok(Some(RevertOutcome {
                        phase_id,
                        version,
                        reverted_triggers: reverted,
                        reverted_at: now,
                    }))
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(e) => StorageError::Db(e),
                TransactionError::Transaction(e) => StorageError::Db(e),
            })?;

        Ok(outcome)
    }
}
