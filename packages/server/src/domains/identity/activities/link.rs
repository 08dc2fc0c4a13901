use serde::Serialize;
use tracing::{info, warn};

use crate::common::{CoreError, CoreResult, UserId};
use crate::domains::identity::models::{advisory_xact_lock, ExternalIdentityLink};
use crate::kernel::{OpContext, ServerDeps};

const MAX_EXTERNAL_ID_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LinkOutcome {
    Created,
    /// Same user and external id; metadata refreshed.
    Updated,
    /// The user's previous external id was swapped out.
    Replaced { previous_external_id: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkResult {
    pub link: ExternalIdentityLink,
    pub outcome: LinkOutcome,
}

pub fn normalize_external_id(external_id: &str) -> CoreResult<&str> {
    let external_id = external_id.trim();
    if external_id.is_empty() {
        return Err(CoreError::validation("external id must not be empty"));
    }
    if external_id.chars().count() > MAX_EXTERNAL_ID_LEN {
        return Err(CoreError::validation(format!(
            "external id longer than {MAX_EXTERNAL_ID_LEN} characters"
        )));
    }
    Ok(external_id)
}

fn external_key(external_id: &str) -> String {
    format!("identity:external:{external_id}")
}

fn user_key(user_id: UserId) -> String {
    format!("identity:user:{user_id}")
}

/// Claims `external_id` for `user_id`.
///
/// Advisory locks on the external id and then the user serialize every
/// claim touching either key, so of N concurrent claims on one external id
/// exactly one wins and the rest see `IdentityAlreadyLinked`.
pub async fn link_atomic(
    ctx: &OpContext,
    user_id: UserId,
    external_id: &str,
    metadata: serde_json::Value,
    deps: &ServerDeps,
) -> CoreResult<LinkResult> {
    let external_id = normalize_external_id(external_id)?;

    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;

        advisory_xact_lock(&external_key(external_id), &mut tx).await?;
        advisory_xact_lock(&user_key(user_id), &mut tx).await?;

        let result = match ExternalIdentityLink::lock_by_external_id(external_id, &mut tx).await? {
            Some(existing) if existing.user_id != user_id => {
                warn!(
                    user_id = %user_id,
                    owner_id = %existing.user_id,
                    "External identity already claimed"
                );
                return Err(CoreError::IdentityAlreadyLinked {
                    external_id: external_id.to_string(),
                });
            }
            Some(_) => LinkResult {
                link: ExternalIdentityLink::update(user_id, external_id, &metadata, &mut tx)
                    .await?,
                outcome: LinkOutcome::Updated,
            },
            None => match ExternalIdentityLink::lock_by_user(user_id, &mut tx).await? {
                Some(current) => LinkResult {
                    link: ExternalIdentityLink::update(user_id, external_id, &metadata, &mut tx)
                        .await?,
                    outcome: LinkOutcome::Replaced {
                        previous_external_id: current.external_id,
                    },
                },
                None => LinkResult {
                    link: ExternalIdentityLink::insert(user_id, external_id, &metadata, &mut tx)
                        .await?,
                    outcome: LinkOutcome::Created,
                },
            },
        };

        tx.commit().await?;

        info!(user_id = %user_id, outcome = ?result.outcome, "External identity linked");
        Ok(result)
    })
    .await
}

/// Removes the user's link. Returns whether one existed.
pub async fn unlink(ctx: &OpContext, user_id: UserId, deps: &ServerDeps) -> CoreResult<bool> {
    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        advisory_xact_lock(&user_key(user_id), &mut tx).await?;
        let removed = ExternalIdentityLink::delete_by_user(user_id, &mut tx).await?;
        tx.commit().await?;

        if removed {
            info!(user_id = %user_id, "External identity unlinked");
        }
        Ok(removed)
    })
    .await
}

pub async fn find_by_external_id(
    external_id: &str,
    deps: &ServerDeps,
) -> CoreResult<Option<ExternalIdentityLink>> {
    let external_id = normalize_external_id(external_id)?;
    ExternalIdentityLink::find_by_external_id(external_id, &deps.db_pool).await
}

pub async fn find_by_user(
    user_id: UserId,
    deps: &ServerDeps,
) -> CoreResult<Option<ExternalIdentityLink>> {
    ExternalIdentityLink::find_by_user(user_id, &deps.db_pool).await
}
