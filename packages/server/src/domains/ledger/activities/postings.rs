//! Balance mutations inside a caller-owned transaction.

use sqlx::PgConnection;
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::common::{BookingId, CoreError, CoreResult, TemplateApplicationId, UserId};
use crate::domains::ledger::models::{Balance, LedgerEntry, NewLedgerEntry, OperationType};

/// Whether a mutation may take the balance below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancePolicy {
    #[default]
    Strict,
    /// Only administrator adjustments use this.
    AllowNegative,
}

/// Computes the balance after applying `delta`.
pub fn next_balance(
    user_id: UserId,
    current: i64,
    delta: i64,
    policy: BalancePolicy,
) -> CoreResult<i64> {
    let next = current
        .checked_add(delta)
        .ok_or_else(|| CoreError::validation(format!("balance overflow for user {user_id}")))?;

    if next < 0 && delta < 0 && policy == BalancePolicy::Strict {
        return Err(CoreError::insufficient_funds(user_id, -delta, current));
    }
    Ok(next)
}

/// Everything about a ledger mutation except its amount.
#[derive(Debug, Clone, TypedBuilder)]
pub struct LedgerPosting {
    pub user_id: UserId,
    pub operation_type: OperationType,
    #[builder(setter(into))]
    pub reason: String,
    #[builder(default, setter(strip_option))]
    pub actor_id: Option<UserId>,
    #[builder(default, setter(strip_option))]
    pub booking_id: Option<BookingId>,
    #[builder(default, setter(strip_option))]
    pub template_application_id: Option<TemplateApplicationId>,
    #[builder(default, setter(strip_option, into))]
    pub idempotency_key: Option<String>,
    #[builder(default)]
    pub policy: BalancePolicy,
}

/// Lock → read → compute → write → log for one signed delta.
pub async fn apply_delta(
    posting: LedgerPosting,
    delta: i64,
    tx: &mut PgConnection,
) -> CoreResult<LedgerEntry> {
    if delta == 0 {
        return Err(CoreError::validation("ledger delta must be non-zero"));
    }

    let before = Balance::get_for_update(posting.user_id, &mut *tx).await?;
    let after = next_balance(posting.user_id, before, delta, posting.policy)?;
    Balance::set_amount(posting.user_id, after, &mut *tx).await?;

    let entry = LedgerEntry::append(
        NewLedgerEntry {
            user_id: posting.user_id,
            delta,
            operation_type: posting.operation_type,
            reason: posting.reason,
            actor_id: posting.actor_id,
            booking_id: posting.booking_id,
            template_application_id: posting.template_application_id,
            idempotency_key: posting.idempotency_key,
            balance_before: before,
            balance_after: after,
        },
        &mut *tx,
    )
    .await?;

    debug!(
        user_id = %entry.user_id,
        operation = %entry.operation_type,
        delta,
        balance_after = after,
        "Ledger entry appended"
    );
    Ok(entry)
}

/// Removes `amount` credits. Fails with `InsufficientFunds` under the strict
/// policy.
pub async fn debit(
    posting: LedgerPosting,
    amount: i64,
    tx: &mut PgConnection,
) -> CoreResult<LedgerEntry> {
    if amount <= 0 {
        return Err(CoreError::validation("debit amount must be positive"));
    }
    if posting.operation_type.is_credit() {
        return Err(CoreError::validation(format!(
            "{} is not a debit operation",
            posting.operation_type
        )));
    }
    apply_delta(posting, -amount, tx).await
}

pub async fn credit(
    posting: LedgerPosting,
    amount: i64,
    tx: &mut PgConnection,
) -> CoreResult<LedgerEntry> {
    if amount <= 0 {
        return Err(CoreError::validation("credit amount must be positive"));
    }
    if !posting.operation_type.is_credit() {
        return Err(CoreError::validation(format!(
            "{} is not a credit operation",
            posting.operation_type
        )));
    }
    apply_delta(posting, amount, tx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;

    #[test]
    fn strict_policy_refuses_to_go_negative() {
        let user = UserId::new();
        let err = next_balance(user, 2, -3, BalancePolicy::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        let shortfall = &err.shortfalls()[0];
        assert_eq!(shortfall.user_id, user);
        assert_eq!(shortfall.required, 3);
        assert_eq!(shortfall.available, 2);
    }

    #[test]
    fn exact_balance_can_be_spent() {
        assert_eq!(
            next_balance(UserId::new(), 3, -3, BalancePolicy::Strict).unwrap(),
            0
        );
    }

    #[test]
    fn admin_policy_allows_negative() {
        assert_eq!(
            next_balance(UserId::new(), 1, -4, BalancePolicy::AllowNegative).unwrap(),
            -3
        );
    }

    #[test]
    fn credits_into_a_negative_balance_are_allowed() {
        assert_eq!(
            next_balance(UserId::new(), -3, 1, BalancePolicy::Strict).unwrap(),
            -2
        );
    }

    #[test]
    fn overflow_is_rejected() {
        let err = next_balance(UserId::new(), i64::MAX, 1, BalancePolicy::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
