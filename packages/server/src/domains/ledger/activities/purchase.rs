//! Idempotent credit for gateway payments.

use serde::Serialize;
use tracing::info;

use crate::common::{db_errors, ConstraintKind, CoreError, CoreResult, UserId};
use crate::domains::ledger::activities::postings::{credit, LedgerPosting};
use crate::domains::ledger::models::{Balance, LedgerEntry, OperationType};
use crate::kernel::{OpContext, ServerDeps};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "entry", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Applied(LedgerEntry),
    /// The payment was credited by an earlier delivery.
    AlreadyApplied(LedgerEntry),
}

impl PurchaseOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            PurchaseOutcome::Applied(entry) | PurchaseOutcome::AlreadyApplied(entry) => entry,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, PurchaseOutcome::Applied(_))
    }
}

fn payment_key(payment_id: &str) -> String {
    format!("payment:{payment_id}")
}

/// Credits `amount` for a gateway payment at most once per `payment_id`.
///
/// The idempotency lookup runs after the balance lock, so two concurrent
/// deliveries of the same payment for one user serialize and the second one
/// sees the first one's entry.
pub async fn credit_purchase(
    ctx: &OpContext,
    user_id: UserId,
    amount: i64,
    payment_id: &str,
    deps: &ServerDeps,
) -> CoreResult<PurchaseOutcome> {
    let payment_id = payment_id.trim();
    if payment_id.is_empty() {
        return Err(CoreError::validation("payment id must not be empty"));
    }
    if amount <= 0 {
        return Err(CoreError::validation("purchase amount must be positive"));
    }
    let key = payment_key(payment_id);

    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;

        Balance::get_for_update(user_id, &mut tx).await?;

        if let Some(existing) = LedgerEntry::find_by_idempotency_key(&key, &mut tx).await? {
            if existing.user_id != user_id {
                return Err(CoreError::validation(format!(
                    "payment {payment_id} was already credited to another user"
                )));
            }
            info!(user_id = %user_id, payment_id, "Payment already credited");
            return Ok(PurchaseOutcome::AlreadyApplied(existing));
        }

        let posting = LedgerPosting::builder()
            .user_id(user_id)
            .operation_type(OperationType::Purchase)
            .reason(format!("payment {payment_id}"))
            .idempotency_key(key.clone())
            .build();

        let entry = credit(posting, amount, &mut tx).await.map_err(|e| {
            match e.constraint_violation() {
                Some(v) if v.is(ConstraintKind::Unique, db_errors::LEDGER_IDEMPOTENCY_KEY) => {
                    CoreError::validation(format!(
                        "payment {payment_id} was already credited to another user"
                    ))
                }
                _ => e,
            }
        })?;

        tx.commit().await?;

        info!(
            user_id = %user_id,
            payment_id,
            amount,
            balance = entry.balance_after,
            "Payment credited"
        );
        Ok(PurchaseOutcome::Applied(entry))
    })
    .await
}
