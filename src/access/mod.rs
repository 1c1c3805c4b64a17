//! Access control resolution

use crate::error::{AppError, Result};
use crate::models::{AccessControl, Requester, Visibility};

/// Decide whether a requester may read a resource
pub fn has_access(
    user_id: &str,
    roles: &[String],
    organization_id: Option<&str>,
    access: &AccessControl,
) -> bool {
    let listed = access.allowed_users.iter().any(|u| u == user_id);
    match access.visibility {
        Visibility::Public => true,
        Visibility::Organization => organization_id
            .map_or(false, |org| access.allowed_organizations.iter().any(|o| o == org)),
        Visibility::Role => {
            listed || roles.iter().any(|r| access.allowed_roles.contains(r))
        }
        Visibility::User => listed,
    }
}

/// `has_access` for a gateway-asserted identity
pub fn requester_has_access(requester: &Requester, access: &AccessControl) -> bool {
    has_access(
        &requester.user_id,
        &requester.roles,
        requester.organization_id.as_deref(),
        access,
    )
}

/// Fail with `AccessDenied` unless the requester may read the resource
pub fn ensure_access(requester: &Requester, access: &AccessControl, resource: &str) -> Result<()> {
    if requester_has_access(requester, access) {
        Ok(())
    } else {
        tracing::warn!(user = %requester.user_id, resource, "Access denied");
        Err(AppError::AccessDenied(format!(
            "{} may not access {}",
            requester.user_id, resource
        )))
    }
}

/// Default access for a new resource.
///
/// Confidential resources are private to the owner; everything else is
/// shared with the owner's organization. Without an organization the
/// resource falls back to owner-only.
pub fn default_for(owner: &str, owner_org: Option<&str>, confidential: bool) -> AccessControl {
    match owner_org {
        Some(org) if !confidential && !org.trim().is_empty() => AccessControl::organization(org),
        _ => AccessControl::user_only(owner),
    }
}

/// Narrow a requested access control to what the acting user may grant.
///
/// `public` becomes `organization` unless the actor can publish, and a
/// `user` visibility always includes the actor.
pub fn restrict(mut access: AccessControl, actor: &Requester) -> AccessControl {
    if access.visibility == Visibility::Public && !actor.can_publish {
        access.visibility = Visibility::Organization;
        if let Some(org) = &actor.organization_id {
            if !access.allowed_organizations.contains(org) {
                access.allowed_organizations.push(org.clone());
            }
        }
        if access.allowed_organizations.is_empty() {
            access.visibility = Visibility::User;
        }
    }

    if access.visibility == Visibility::User && !access.allowed_users.contains(&actor.user_id) {
        access.allowed_users.push(actor.user_id.clone());
    }

    access
}
