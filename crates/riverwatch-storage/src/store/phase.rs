use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, Order, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::phase::{self, Column, Entity};
use crate::error::Result;
use crate::store::TriggerStore;

/// Phase data row (from the `phases` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRow {
    pub id: String,
    pub name: String,
    pub river_basin: String,
    pub required_mandatory_triggers: i32,
    pub required_optional_triggers: i32,
    pub received_mandatory_triggers: i32,
    pub received_optional_triggers: i32,
    pub is_active: bool,
    pub can_revert: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhaseRow {
    /// Canonical "has any requirement configured" predicate. Every call
    /// site that needs this condition goes through here.
    pub fn has_any_requirement(&self) -> bool {
        self.required_mandatory_triggers > 0 || self.required_optional_triggers > 0
    }
}

pub(crate) fn to_row(m: phase::Model) -> PhaseRow {
    PhaseRow {
        id: m.id,
        name: m.name,
        river_basin: m.river_basin,
        required_mandatory_triggers: m.required_mandatory_triggers,
        required_optional_triggers: m.required_optional_triggers,
        received_mandatory_triggers: m.received_mandatory_triggers,
        received_optional_triggers: m.received_optional_triggers,
        is_active: m.is_active,
        can_revert: m.can_revert,
        activated_at: m.activated_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl TriggerStore {
    pub async fn insert_phase(&self, row: &PhaseRow) -> Result<PhaseRow> {
        let now = Utc::now().fixed_offset();
        let am = phase::ActiveModel {
            id: Set(row.id.clone()),
            name: Set(row.name.clone()),
            river_basin: Set(row.river_basin.clone()),
            required_mandatory_triggers: Set(row.required_mandatory_triggers),
            required_optional_triggers: Set(row.required_optional_triggers),
            received_mandatory_triggers: Set(row.received_mandatory_triggers),
            received_optional_triggers: Set(row.received_optional_triggers),
            is_active: Set(row.is_active),
            can_revert: Set(row.can_revert),
            activated_at: Set(row.activated_at.map(|t| t.fixed_offset())),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn get_phase_by_id(&self, id: &str) -> Result<Option<PhaseRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    pub async fn list_phases(
        &self,
        river_basin: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PhaseRow>> {
        let mut q = Entity::find();
        if let Some(basin) = river_basin {
            q = q.filter(Column::RiverBasin.eq(basin));
        }
        let rows = q
            .order_by(Column::CreatedAt, Order::Asc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    /// Lower the required-mandatory bar by one when a mandatory trigger
    /// is removed, so the phase stays reachable. No-op at zero.
    pub async fn decrement_required_mandatory(&self, phase_id: &str) -> Result<u64> {
        let res = Entity::update_many()
            .col_expr(
                Column::RequiredMandatoryTriggers,
                Expr::col(Column::RequiredMandatoryTriggers).sub(1),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(phase_id))
            .filter(Column::RequiredMandatoryTriggers.gt(0))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }

    /// The activation edge: one conditional UPDATE that activates the
    /// phase iff it is not already active, at least one requirement is
    /// configured, and every configured requirement is satisfied.
    ///
    /// Returns `true` exactly once per activation, which is the signal
    /// to publish the activation event.
    pub async fn try_activate_phase(
        &self,
        phase_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let res = Entity::update_many()
            .col_expr(Column::IsActive, Expr::value(true))
            .col_expr(Column::ActivatedAt, Expr::value(Some(now.fixed_offset())))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(phase_id))
            .filter(Column::IsActive.eq(false))
            .filter(
                Condition::any()
                    .add(Column::RequiredMandatoryTriggers.gt(0))
                    .add(Column::RequiredOptionalTriggers.gt(0)),
            )
            .filter(
                Condition::any()
                    .add(Column::RequiredMandatoryTriggers.eq(0))
                    .add(
                        Expr::col(Column::ReceivedMandatoryTriggers)
                            .gte(Expr::col(Column::RequiredMandatoryTriggers)),
                    ),
            )
            .filter(
                Condition::any()
                    .add(Column::RequiredOptionalTriggers.eq(0))
                    .add(
                        Expr::col(Column::ReceivedOptionalTriggers)
                            .gte(Expr::col(Column::RequiredOptionalTriggers)),
                    ),
            )
            .exec(self.db())
            .await?;
        Ok(res.rows_affected == 1)
    }
}
