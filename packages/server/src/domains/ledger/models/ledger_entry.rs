use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use std::fmt;
use std::str::FromStr;
use typed_builder::TypedBuilder;

use crate::common::{
    BookingId, CoreError, CoreResult, LedgerEntryId, TemplateApplicationId, UserId, ValidatedPage,
};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_operation_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    BookingDebit,
    BookingRefund,
    TemplateDebit,
    TemplateRefund,
    /// Credits bought through the payment gateway.
    Purchase,
    AdminCredit,
    AdminDebit,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::BookingDebit => "booking_debit",
            OperationType::BookingRefund => "booking_refund",
            OperationType::TemplateDebit => "template_debit",
            OperationType::TemplateRefund => "template_refund",
            OperationType::Purchase => "purchase",
            OperationType::AdminCredit => "admin_credit",
            OperationType::AdminDebit => "admin_debit",
        }
    }

    /// Whether entries of this type add credits.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            OperationType::BookingRefund
                | OperationType::TemplateRefund
                | OperationType::Purchase
                | OperationType::AdminCredit
        )
    }

    /// The refund that reverses a debit of this type.
    pub fn refund(&self) -> Option<OperationType> {
        match self {
            OperationType::BookingDebit => Some(OperationType::BookingRefund),
            OperationType::TemplateDebit => Some(OperationType::TemplateRefund),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking_debit" => Ok(OperationType::BookingDebit),
            "booking_refund" => Ok(OperationType::BookingRefund),
            "template_debit" => Ok(OperationType::TemplateDebit),
            "template_refund" => Ok(OperationType::TemplateRefund),
            "purchase" => Ok(OperationType::Purchase),
            "admin_credit" => Ok(OperationType::AdminCredit),
            "admin_debit" => Ok(OperationType::AdminDebit),
            other => Err(CoreError::validation(format!(
                "unknown ledger operation type: {other}"
            ))),
        }
    }
}

// ============================================================================
// LedgerEntry Model
// ============================================================================

/// Immutable record of one balance change.
///
/// `balance_before`/`balance_after` are the values observed under the
/// balance lock; `seq` orders a user's entries in application order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub seq: i64,
    pub user_id: UserId,
    pub delta: i64,
    pub operation_type: OperationType,
    pub reason: String,
    pub actor_id: Option<UserId>,
    pub booking_id: Option<BookingId>,
    pub template_application_id: Option<TemplateApplicationId>,
    pub idempotency_key: Option<String>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewLedgerEntry {
    pub user_id: UserId,
    pub delta: i64,
    pub operation_type: OperationType,
    pub reason: String,
    #[builder(default)]
    pub actor_id: Option<UserId>,
    #[builder(default)]
    pub booking_id: Option<BookingId>,
    #[builder(default)]
    pub template_application_id: Option<TemplateApplicationId>,
    #[builder(default)]
    pub idempotency_key: Option<String>,
    pub balance_before: i64,
    pub balance_after: i64,
}

impl NewLedgerEntry {
    pub fn validate(&self) -> CoreResult<()> {
        if self.delta == 0 {
            return Err(CoreError::validation("ledger entry delta must be non-zero"));
        }
        if self.balance_before.checked_add(self.delta) != Some(self.balance_after) {
            return Err(CoreError::validation(format!(
                "ledger entry snapshot mismatch: {} + {} != {}",
                self.balance_before, self.delta, self.balance_after
            )));
        }
        if self.operation_type.is_credit() != (self.delta > 0) {
            return Err(CoreError::validation(format!(
                "{} entries cannot have delta {}",
                self.operation_type, self.delta
            )));
        }
        Ok(())
    }
}

impl LedgerEntry {
    /// Appends an entry. The snapshot values must come from the balance lock
    /// held by the same transaction.
    pub async fn append(entry: NewLedgerEntry, tx: &mut PgConnection) -> CoreResult<Self> {
        entry.validate()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO ledger_entries (
                id, user_id, delta, operation_type, reason, actor_id, booking_id,
                template_application_id, idempotency_key, balance_before, balance_after
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(LedgerEntryId::new())
        .bind(entry.user_id)
        .bind(entry.delta)
        .bind(entry.operation_type)
        .bind(&entry.reason)
        .bind(entry.actor_id)
        .bind(entry.booking_id)
        .bind(entry.template_application_id)
        .bind(&entry.idempotency_key)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .fetch_one(&mut *tx)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_idempotency_key(
        key: &str,
        tx: &mut PgConnection,
    ) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM ledger_entries WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Into::into)
    }

    /// Newest-first page of a user's history. The cursor is the id of the
    /// last entry of the previous page and must be one of the user's own
    /// entries.
    pub async fn find_page_for_user(
        user_id: UserId,
        page: &ValidatedPage,
        pool: &PgPool,
    ) -> CoreResult<Vec<Self>> {
        let before_seq = match page.cursor {
            Some(cursor) => {
                let seq = sqlx::query_scalar::<_, i64>(
                    "SELECT seq FROM ledger_entries WHERE id = $1 AND user_id = $2",
                )
                .bind(cursor)
                .bind(user_id)
                .fetch_optional(pool)
                .await?;
                Some(seq.ok_or_else(|| CoreError::validation("unknown cursor"))?)
            }
            None => None,
        };

        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM ledger_entries
            WHERE user_id = $1
              AND ($2::bigint IS NULL OR seq < $2)
            ORDER BY seq DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(before_seq)
        .bind(page.fetch_limit())
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Full history oldest-first, for audits. Read it in the same snapshot as
    /// the stored balance.
    pub async fn find_all_for_user(
        user_id: UserId,
        tx: &mut PgConnection,
    ) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM ledger_entries WHERE user_id = $1 ORDER BY seq ASC",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Into::into)
    }

    pub async fn find_for_booking(booking_id: BookingId, pool: &PgPool) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM ledger_entries WHERE booking_id = $1 ORDER BY seq ASC",
        )
        .bind(booking_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_for_application(
        application_id: TemplateApplicationId,
        pool: &PgPool,
    ) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM ledger_entries WHERE template_application_id = $1 ORDER BY seq ASC",
        )
        .bind(application_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(operation_type: OperationType, before: i64, delta: i64, after: i64) -> NewLedgerEntry {
        NewLedgerEntry::builder()
            .user_id(UserId::new())
            .delta(delta)
            .operation_type(operation_type)
            .reason("test")
            .balance_before(before)
            .balance_after(after)
            .build()
    }

    #[test]
    fn operation_types_parse_from_their_names() {
        for op in [
            OperationType::BookingDebit,
            OperationType::BookingRefund,
            OperationType::TemplateDebit,
            OperationType::TemplateRefund,
            OperationType::Purchase,
            OperationType::AdminCredit,
            OperationType::AdminDebit,
        ] {
            assert_eq!(op.as_str().parse::<OperationType>().unwrap(), op);
        }
        assert!("refund".parse::<OperationType>().is_err());
    }

    #[test]
    fn debits_refund_into_their_counterpart() {
        assert_eq!(
            OperationType::TemplateDebit.refund(),
            Some(OperationType::TemplateRefund)
        );
        assert_eq!(
            OperationType::BookingDebit.refund(),
            Some(OperationType::BookingRefund)
        );
        assert_eq!(OperationType::Purchase.refund(), None);
    }

    #[test]
    fn snapshot_must_add_up() {
        assert!(entry(OperationType::Purchase, 0, 5, 5).validate().is_ok());
        assert!(entry(OperationType::BookingDebit, 5, -2, 3).validate().is_ok());
        assert!(entry(OperationType::BookingDebit, 5, -2, 4).validate().is_err());
    }

    #[test]
    fn sign_must_match_operation_type() {
        assert!(entry(OperationType::BookingDebit, 0, 2, 2).validate().is_err());
        assert!(entry(OperationType::AdminCredit, 3, -1, 2).validate().is_err());
        assert!(entry(OperationType::AdminCredit, 3, 0, 3).validate().is_err());
    }
}
