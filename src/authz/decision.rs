use super::{Capability, Principal};
use crate::errors::AppError;

/// Outcome of an access decision. Denials are values so call sites must
/// handle every case; conversion to an HTTP status happens at the route
/// layer via [`DenyReason::into_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    InsufficientPermission,
    LastAdminViolation,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Route-layer adapter: Allow passes, Deny becomes the matching error.
    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason.into_error()),
        }
    }
}

impl DenyReason {
    pub fn into_error(self) -> AppError {
        match self {
            DenyReason::Unauthenticated => AppError::unauthenticated("no credential"),
            DenyReason::InsufficientPermission => AppError::forbidden("access denied"),
            DenyReason::LastAdminViolation => {
                AppError::last_admin("at least one administrator must remain")
            }
        }
    }
}

/// The access decision point. Pure function of its inputs; performs no I/O.
///
/// Evaluation order:
/// 1. no principal -> deny unauthenticated
/// 2. admin -> allow (bypasses grants and ownership everywhere)
/// 3. ownership verdict supplied (task-like resources) -> it is
///    authoritative in both directions: owners are admitted without
///    grants, and grants never widen access past what the role and
///    ownership rules allow
/// 4. otherwise allow iff every required capability is held for the
///    section
pub fn decide(
    principal: Option<&Principal>,
    section: &str,
    required: &[Capability],
    ownership: Option<bool>,
) -> Decision {
    let principal = match principal {
        Some(p) => p,
        None => return Decision::Deny(DenyReason::Unauthenticated),
    };

    if principal.is_admin() {
        tracing::debug!(user_id = %principal.user_id, section, "admin bypass");
        return Decision::Allow;
    }

    if let Some(owns) = ownership {
        return if owns {
            Decision::Allow
        } else {
            tracing::debug!(user_id = %principal.user_id, section, "ownership denied");
            Decision::Deny(DenyReason::InsufficientPermission)
        };
    }

    if principal.has_all(section, required) {
        Decision::Allow
    } else {
        tracing::debug!(user_id = %principal.user_id, section, "capability denied");
        Decision::Deny(DenyReason::InsufficientPermission)
    }
}
