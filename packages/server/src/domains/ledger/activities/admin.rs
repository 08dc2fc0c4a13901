use tracing::{info, warn};

use crate::common::{CoreError, CoreResult, UserId};
use crate::domains::ledger::activities::postings::{apply_delta, BalancePolicy, LedgerPosting};
use crate::domains::ledger::models::{LedgerEntry, OperationType};
use crate::kernel::{OpContext, ServerDeps};

/// Manual balance correction by an administrator.
///
/// This is the only path that can leave a balance negative, and only when
/// `allow_negative` is set.
pub async fn admin_adjust(
    ctx: &OpContext,
    user_id: UserId,
    delta: i64,
    reason: &str,
    actor_id: UserId,
    allow_negative: bool,
    deps: &ServerDeps,
) -> CoreResult<LedgerEntry> {
    if delta == 0 {
        return Err(CoreError::validation("adjustment must be non-zero"));
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(CoreError::validation("adjustment reason is required"));
    }

    let operation_type = if delta > 0 {
        OperationType::AdminCredit
    } else {
        OperationType::AdminDebit
    };
    let policy = if allow_negative {
        BalancePolicy::AllowNegative
    } else {
        BalancePolicy::Strict
    };

    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;

        let posting = LedgerPosting::builder()
            .user_id(user_id)
            .operation_type(operation_type)
            .reason(reason)
            .actor_id(actor_id)
            .policy(policy)
            .build();
        let entry = apply_delta(posting, delta, &mut tx).await?;

        tx.commit().await?;

        if entry.balance_after < 0 {
            warn!(
                user_id = %user_id,
                actor_id = %actor_id,
                balance = entry.balance_after,
                "Admin adjustment left a negative balance"
            );
        }
        info!(
            user_id = %user_id,
            actor_id = %actor_id,
            delta,
            balance = entry.balance_after,
            "Admin adjustment applied"
        );
        Ok(entry)
    })
    .await
}
