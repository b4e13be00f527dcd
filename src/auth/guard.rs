use tracing::{error, warn};

use crate::{
    error::{AppError, StoreError},
    users::{repo::RoleStore, repo_types::User},
};

pub const MODERATOR: &str = "moderator";
pub const ADMIN: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Owners always pass. Everyone else needs a role level at least that of
/// `required_role`. A failed role lookup is an error, never a denial.
pub async fn authorize(
    roles: &dyn RoleStore,
    actor: &User,
    owner_id: i64,
    required_role: &str,
) -> Result<Decision, StoreError> {
    if actor.id == owner_id {
        return Ok(Decision::Allow);
    }

    let required = roles.get_by_name(required_role).await?;
    if actor.role.level >= required.level {
        Ok(Decision::Allow)
    } else {
        Ok(Decision::Deny)
    }
}

/// [`authorize`] mapped onto the HTTP taxonomy: deny is 403, a lookup
/// failure is 500.
pub async fn require_owner_or_role(
    roles: &dyn RoleStore,
    actor: &User,
    owner_id: i64,
    required_role: &str,
) -> Result<(), AppError> {
    match authorize(roles, actor, owner_id, required_role).await {
        Ok(Decision::Allow) => Ok(()),
        Ok(Decision::Deny) => {
            warn!(
                actor_id = actor.id,
                actor_role = %actor.role.name,
                owner_id,
                required_role,
                category = "insufficient_role",
                "authorization denied"
            );
            Err(AppError::Forbidden)
        }
        Err(e) => {
            error!(error = %e, required_role, "role lookup failed during authorization");
            Err(AppError::Internal(anyhow::anyhow!(
                "role lookup for `{required_role}` failed: {e}"
            )))
        }
    }
}
