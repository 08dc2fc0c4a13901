//! Consistency check of one user's ledger against the stored balance.

use serde::Serialize;
use tracing::{info, warn};

use crate::common::{CoreResult, LedgerEntryId, UserId};
use crate::domains::ledger::models::{Balance, LedgerEntry};
use crate::kernel::ServerDeps;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub user_id: UserId,
    pub stored_balance: i64,
    /// Sum of every entry's delta.
    pub recomputed_balance: i64,
    pub entry_count: usize,
    /// First entry whose `balance_before` does not continue the chain.
    pub first_broken_entry: Option<LedgerEntryId>,
    pub consistent: bool,
}

/// Folds `entries` (oldest first) and compares the result to `stored`.
pub fn audit_entries(user_id: UserId, stored: i64, entries: &[LedgerEntry]) -> LedgerAudit {
    let mut running = 0i64;
    let mut first_broken_entry = None;

    for entry in entries {
        let chained = entry.balance_before == running
            && entry.balance_before.checked_add(entry.delta) == Some(entry.balance_after);
        if !chained && first_broken_entry.is_none() {
            first_broken_entry = Some(entry.id);
        }
        running = running.saturating_add(entry.delta);
    }

    LedgerAudit {
        user_id,
        stored_balance: stored,
        recomputed_balance: running,
        entry_count: entries.len(),
        first_broken_entry,
        consistent: first_broken_entry.is_none() && running == stored,
    }
}

pub async fn audit_user(user_id: UserId, deps: &ServerDeps) -> CoreResult<LedgerAudit> {
    // Both reads must see the same snapshot: a posting commits its entry and
    // the balance update together.
    let mut tx = deps.db_pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await?;
    let stored = Balance::get_amount_in(user_id, &mut tx).await?;
    let entries = LedgerEntry::find_all_for_user(user_id, &mut tx).await?;
    tx.commit().await?;
    let audit = audit_entries(user_id, stored, &entries);

    if audit.consistent {
        info!(user_id = %user_id, entries = audit.entry_count, "Ledger audit passed");
    } else {
        warn!(
            user_id = %user_id,
            stored = audit.stored_balance,
            recomputed = audit.recomputed_balance,
            first_broken_entry = ?audit.first_broken_entry,
            "Ledger audit found an inconsistency"
        );
    }
    Ok(audit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::ledger::models::OperationType;
    use chrono::Utc;

    fn entry(user_id: UserId, seq: i64, before: i64, delta: i64) -> LedgerEntry {
        LedgerEntry {
            id: LedgerEntryId::new(),
            seq,
            user_id,
            delta,
            operation_type: if delta > 0 {
                OperationType::Purchase
            } else {
                OperationType::BookingDebit
            },
            reason: "test".into(),
            actor_id: None,
            booking_id: None,
            template_application_id: None,
            idempotency_key: None,
            balance_before: before,
            balance_after: before + delta,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_ledger_matches_zero_balance() {
        let audit = audit_entries(UserId::new(), 0, &[]);
        assert!(audit.consistent);
        assert_eq!(audit.entry_count, 0);
    }

    #[test]
    fn chained_entries_fold_to_the_stored_balance() {
        let user = UserId::new();
        let entries = vec![entry(user, 1, 0, 10), entry(user, 2, 10, -3), entry(user, 3, 7, 2)];
        let audit = audit_entries(user, 9, &entries);
        assert!(audit.consistent);
        assert_eq!(audit.recomputed_balance, 9);
    }

    #[test]
    fn drifted_balance_is_reported() {
        let user = UserId::new();
        let entries = vec![entry(user, 1, 0, 10)];
        let audit = audit_entries(user, 12, &entries);
        assert!(!audit.consistent);
        assert_eq!(audit.first_broken_entry, None);
        assert_eq!(audit.recomputed_balance, 10);
    }

    #[test]
    fn broken_chain_points_at_the_first_gap() {
        let user = UserId::new();
        let gap = entry(user, 2, 8, -3);
        let gap_id = gap.id;
        let entries = vec![entry(user, 1, 0, 10), gap, entry(user, 3, 5, 1)];
        let audit = audit_entries(user, 8, &entries);
        assert!(!audit.consistent);
        assert_eq!(audit.first_broken_entry, Some(gap_id));
    }
}
