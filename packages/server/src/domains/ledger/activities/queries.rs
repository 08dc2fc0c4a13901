use tracing::debug;

use crate::common::{CoreResult, Page, PageRequest, UserId};
use crate::domains::ledger::models::{Balance, LedgerEntry};
use crate::kernel::ServerDeps;

/// Current balance; 0 for users that never had a ledger entry.
pub async fn get_balance(user_id: UserId, deps: &ServerDeps) -> CoreResult<i64> {
    Balance::get_amount(user_id, &deps.db_pool).await
}

/// Newest-first ledger history, capped at the configured page size.
pub async fn get_history(
    user_id: UserId,
    request: PageRequest,
    deps: &ServerDeps,
) -> CoreResult<Page<LedgerEntry>> {
    let page = request.validate(deps.config.ledger_history_max_page)?;
    let rows = LedgerEntry::find_page_for_user(user_id, &page, &deps.db_pool).await?;

    debug!(user_id = %user_id, limit = page.limit, rows = rows.len(), "Loaded ledger history");
    Ok(Page::from_rows(rows, &page, |entry| entry.id.into_uuid()))
}
