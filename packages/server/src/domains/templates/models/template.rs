//! Stored templates: a minimal writer for fixtures and operators, and the
//! Postgres-backed catalog the engine reads through.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;

use crate::common::{CoreError, CoreResult, TemplateId, TemplateSlotId, UserId};
use crate::domains::templates::models::definition::{
    weekday_from_offset, weekday_offset, SlotDefinition, TemplateDefinition,
};
use crate::kernel::BaseTemplateCatalog;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LessonTemplate {
    pub id: TemplateId,
    pub name: String,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TemplateSlot {
    pub id: TemplateSlotId,
    pub template_id: TemplateId,
    pub position: i32,
    pub weekday: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub teacher_id: UserId,
    pub max_seats: i32,
    pub credit_cost: i64,
}

/// Template contents as supplied by an operator; ids are assigned on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub slots: Vec<SlotDefinition>,
}

impl LessonTemplate {
    /// Stores a template with its slots and student assignments.
    pub async fn save(
        template: NewTemplate,
        created_by: Option<UserId>,
        pool: &PgPool,
    ) -> CoreResult<TemplateDefinition> {
        if template.name.trim().is_empty() {
            return Err(CoreError::validation("template name is required"));
        }
        for slot in &template.slots {
            slot.validate()?;
        }

        let mut tx = pool.begin().await?;

        let stored = sqlx::query_as::<_, LessonTemplate>(
            r#"
            INSERT INTO lesson_templates (id, name, created_by)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(TemplateId::new())
        .bind(template.name.trim())
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        let mut slots = Vec::with_capacity(template.slots.len());
        for (position, slot) in template.slots.into_iter().enumerate() {
            let slot_id = TemplateSlotId::new();
            sqlx::query(
                r#"
                INSERT INTO template_slots (
                    id, template_id, position, weekday, start_time, end_time,
                    teacher_id, max_seats, credit_cost
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(slot_id)
            .bind(stored.id)
            .bind(position as i32)
            .bind(weekday_offset(slot.weekday))
            .bind(slot.start_time)
            .bind(slot.end_time)
            .bind(slot.teacher_id)
            .bind(slot.max_seats)
            .bind(slot.credit_cost)
            .execute(&mut *tx)
            .await?;

            for student_id in &slot.students {
                sqlx::query(
                    "INSERT INTO template_slot_students (slot_id, student_id) VALUES ($1, $2)",
                )
                .bind(slot_id)
                .bind(student_id)
                .execute(&mut *tx)
                .await?;
            }

            slots.push(SlotDefinition {
                slot_id: Some(slot_id),
                ..slot
            });
        }

        tx.commit().await?;

        Ok(TemplateDefinition {
            template_id: stored.id,
            name: stored.name,
            slots,
        })
    }

    pub async fn find_by_id(id: TemplateId, pool: &PgPool) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM lesson_templates WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }
}

impl TemplateSlot {
    pub async fn find_for_template(template_id: TemplateId, pool: &PgPool) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM template_slots WHERE template_id = $1 ORDER BY position",
        )
        .bind(template_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Assigned students per slot, ordered by student id.
    pub async fn students_for_slots(
        slot_ids: &[TemplateSlotId],
        pool: &PgPool,
    ) -> CoreResult<HashMap<TemplateSlotId, Vec<UserId>>> {
        let rows = sqlx::query_as::<_, (TemplateSlotId, UserId)>(
            r#"
            SELECT slot_id, student_id
            FROM template_slot_students
            WHERE slot_id = ANY($1)
            ORDER BY slot_id, student_id
            "#,
        )
        .bind(slot_ids)
        .fetch_all(pool)
        .await?;

        let mut students: HashMap<TemplateSlotId, Vec<UserId>> = HashMap::new();
        for (slot_id, student_id) in rows {
            students.entry(slot_id).or_default().push(student_id);
        }
        Ok(students)
    }
}

/// Reads template definitions from the template tables.
#[derive(Clone)]
pub struct PgTemplateCatalog {
    pool: PgPool,
}

impl PgTemplateCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseTemplateCatalog for PgTemplateCatalog {
    async fn load_template(
        &self,
        template_id: TemplateId,
    ) -> anyhow::Result<Option<TemplateDefinition>> {
        let Some(template) = LessonTemplate::find_by_id(template_id, &self.pool).await? else {
            return Ok(None);
        };

        let slots = TemplateSlot::find_for_template(template_id, &self.pool).await?;
        let slot_ids: Vec<TemplateSlotId> = slots.iter().map(|s| s.id).collect();
        let mut students = TemplateSlot::students_for_slots(&slot_ids, &self.pool).await?;

        let slots = slots
            .into_iter()
            .map(|slot| {
                let weekday = weekday_from_offset(slot.weekday)
                    .with_context(|| format!("slot {} has weekday {}", slot.id, slot.weekday))?;
                Ok(SlotDefinition {
                    slot_id: Some(slot.id),
                    weekday,
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    teacher_id: slot.teacher_id,
                    max_seats: slot.max_seats,
                    credit_cost: slot.credit_cost,
                    students: students.remove(&slot.id).unwrap_or_default(),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Some(TemplateDefinition {
            template_id: template.id,
            name: template.name,
            slots,
        }))
    }
}
