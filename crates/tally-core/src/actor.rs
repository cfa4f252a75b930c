//! # Actor
//!
//! The authenticated caller handed in by the transport/auth layer.
//!
//! The core trusts identity and role as given; it only decides whether that
//! role may perform a sensitive action (void, refund, manual price override,
//! purchase order creation).
//!
//! ```text
//!   Cashier  <  Supervisor  <  Manager  <  Admin
//!      │            │
//!      │            └── elevated: may void / refund / override pricing
//!      │
//!      └── needs a ManagerOverride (PIN checked upstream) for the same
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Cashier,
    Supervisor,
    Manager,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Cashier => "cashier",
            Role::Supervisor => "supervisor",
            Role::Manager => "manager",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// A manager approval attached to a lower-privileged request.
///
/// The PIN behind it has already been verified upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerOverride {
    pub approved_by: String,
}

/// Pre-validated `(cashier_id, role, store_id)` plus an optional override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub cashier_id: String,
    pub role: Role,
    pub store_id: String,
    #[serde(default)]
    pub manager_override: Option<ManagerOverride>,
}

impl Actor {
    pub fn new(cashier_id: impl Into<String>, role: Role, store_id: impl Into<String>) -> Self {
        Actor {
            cashier_id: cashier_id.into(),
            role,
            store_id: store_id.into(),
            manager_override: None,
        }
    }

    /// Attaches a manager override approved by `approved_by`.
    pub fn with_override(mut self, approved_by: impl Into<String>) -> Self {
        self.manager_override = Some(ManagerOverride {
            approved_by: approved_by.into(),
        });
        self
    }

    /// Supervisor and above, or any role carrying a manager override.
    pub fn is_elevated(&self) -> bool {
        self.role >= Role::Supervisor || self.manager_override.is_some()
    }

    /// Fails with `Forbidden` unless the actor is elevated.
    pub fn require_elevated(&self, action: &str) -> CoreResult<()> {
        if self.is_elevated() {
            Ok(())
        } else {
            Err(CoreError::Forbidden {
                action: action.to_string(),
                role: self.role.to_string(),
            })
        }
    }

    /// Who approved an elevated action: the override's approver, else self.
    pub fn approver(&self) -> &str {
        self.manager_override
            .as_ref()
            .map(|o| o.approved_by.as_str())
            .unwrap_or(&self.cashier_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_role_gate() {
        let cashier = Actor::new("c-1", Role::Cashier, "s-1");
        let err = cashier.require_elevated("void").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.to_string(), "Role cashier may not void");

        let supervisor = Actor::new("c-2", Role::Supervisor, "s-1");
        assert!(supervisor.require_elevated("void").is_ok());
        assert_eq!(supervisor.approver(), "c-2");
    }

    #[test]
    fn test_override_elevates_cashier() {
        let actor = Actor::new("c-1", Role::Cashier, "s-1").with_override("mgr-9");
        assert!(actor.is_elevated());
        assert_eq!(actor.approver(), "mgr-9");
    }
}
