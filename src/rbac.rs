use std::collections::HashSet;

use crate::errors::AppError;
use crate::models::Identity;

/// Roles a caller can hold. Admins are listed in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// The authenticated caller of a core operation.
///
/// Built by the transport layer (or CLI) from an identity that has already
/// been verified upstream. The core only makes authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub identity: Identity,
    pub role: Role,
}

impl Caller {
    pub fn user(identity: Identity) -> Self {
        Self {
            identity,
            role: Role::User,
        }
    }

    pub fn admin(identity: Identity) -> Self {
        Self {
            identity,
            role: Role::Admin,
        }
    }

    /// Resolve the role from the configured administrator list.
    pub fn resolve(identity: Identity, admins: &HashSet<Identity>) -> Self {
        if admins.contains(&identity) {
            Self::admin(identity)
        } else {
            Self::user(identity)
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this caller may read or write data owned by `target`.
    pub fn may_act_for(&self, target: &Identity) -> bool {
        &self.identity == target || self.is_admin()
    }

    /// `Forbidden` unless [`Caller::may_act_for`] holds.
    pub fn require_self_or_admin(&self, target: &Identity) -> Result<(), AppError> {
        if self.may_act_for(target) {
            return Ok(());
        }
        tracing::warn!(
            caller = %self.identity,
            target = %target,
            "access denied: caller may only act for itself"
        );
        Err(AppError::Forbidden(format!(
            "{} may not act on behalf of {}",
            self.identity, target
        )))
    }
}

// ── Tests ───────────────────────────────────────────────────────
