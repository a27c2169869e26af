//! Access gate
//!
//! Role-level authorization. Every principal carries a `RoleLevel`; targets are
//! either crew members (with their own level and nip) or resources such as
//! flights and the catalog, whose "level" is the configured threshold for the
//! operation being attempted.
//!
//! Rules:
//! - level 20 may read any crew member and modify only itself
//! - resource reads honor the configured threshold: with the seeded
//!   thresholds level 20 reads everything, but raising e.g. `flights.list`
//!   above 20 locks level 20 out of that listing
//! - level 40 and above may create/modify/delete targets at or below their own level
//! - level 100 bypasses the target-level check; the decision is still audited
//! - `admin` operations are reserved to level 100

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::models::RoleLevel;
use crate::{Error, Result};

/// Operation kinds checked by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Create,
    Modify,
    Delete,
    Admin,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Modify => "modify",
            Operation::Delete => "delete",
            Operation::Admin => "admin",
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub nip: i64,
    pub level: RoleLevel,
}

/// Target of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    /// Set when the target is a crew member
    pub nip: Option<i64>,
    pub level: RoleLevel,
}

impl Subject {
    /// A crew member target
    pub fn crew(nip: i64, level: RoleLevel) -> Self {
        Self { nip: Some(nip), level }
    }

    /// A non-person target guarded by an operation threshold
    pub fn resource(threshold: RoleLevel) -> Self {
        Self { nip: None, level: threshold }
    }
}

/// Decide whether `actor` may perform `op` on `target`
pub fn may_act_on(actor: &Principal, target: &Subject, op: Operation) -> bool {
    if actor.level == RoleLevel::Admin {
        info!(
            target: "audit",
            actor = actor.nip,
            target_nip = ?target.nip,
            target_level = target.level.value(),
            op = op.as_str(),
            "admin bypass"
        );
        return true;
    }

    match op {
        Operation::Read => actor.level >= target.level || target.nip.is_some(),
        Operation::Admin => false,
        Operation::Modify if actor.level == RoleLevel::Viewer => target.nip == Some(actor.nip),
        Operation::Create | Operation::Delete if actor.level == RoleLevel::Viewer => false,
        Operation::Create | Operation::Modify | Operation::Delete => target.level <= actor.level,
    }
}

/// Whether `actor` may give someone the role level `assigned`
pub fn may_assign_level(actor: &Principal, assigned: RoleLevel) -> bool {
    assigned <= actor.level
}

/// `may_act_on` as a `Result`, producing `Forbidden` on denial
pub fn authorize(actor: &Principal, target: &Subject, op: Operation) -> Result<()> {
    if may_act_on(actor, target, op) {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "level {} may not {} this target (level {})",
            actor.level,
            op.as_str(),
            target.level
        )))
    }
}

// ========================================
// Operation thresholds
// ========================================

/// Named permissions guarding non-person targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    FlightsList,
    FlightsCreate,
    FlightsUpdate,
    FlightsDelete,
    FlightsReprocess,
    FlightsExport,
    QualificationsWrite,
    DashboardRead,
}

impl Permission {
    pub const ALL: [Permission; 8] = [
        Permission::FlightsList,
        Permission::FlightsCreate,
        Permission::FlightsUpdate,
        Permission::FlightsDelete,
        Permission::FlightsReprocess,
        Permission::FlightsExport,
        Permission::QualificationsWrite,
        Permission::DashboardRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::FlightsList => "flights.list",
            Permission::FlightsCreate => "flights.create",
            Permission::FlightsUpdate => "flights.update",
            Permission::FlightsDelete => "flights.delete",
            Permission::FlightsReprocess => "flights.reprocess",
            Permission::FlightsExport => "flights.export",
            Permission::QualificationsWrite => "qualifications.write",
            Permission::DashboardRead => "dashboard.read",
        }
    }

    pub fn default_threshold(&self) -> RoleLevel {
        match self {
            Permission::FlightsList | Permission::DashboardRead => RoleLevel::Viewer,
            Permission::FlightsCreate => RoleLevel::Operator,
            Permission::FlightsUpdate | Permission::FlightsDelete => RoleLevel::Supervisor,
            Permission::FlightsExport | Permission::QualificationsWrite => RoleLevel::Manager,
            Permission::FlightsReprocess => RoleLevel::Admin,
        }
    }

    /// Gate operation the permission is checked as
    pub fn operation(&self) -> Operation {
        match self {
            Permission::FlightsList | Permission::DashboardRead => Operation::Read,
            Permission::FlightsCreate => Operation::Create,
            Permission::FlightsUpdate | Permission::QualificationsWrite => Operation::Modify,
            Permission::FlightsDelete => Operation::Delete,
            Permission::FlightsReprocess | Permission::FlightsExport => Operation::Modify,
        }
    }

    pub fn from_name(name: &str) -> Option<Permission> {
        Permission::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

/// Thresholds per permission, loaded from the `permissions` table
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    thresholds: HashMap<Permission, RoleLevel>,
}

impl AccessPolicy {
    pub fn new(thresholds: HashMap<Permission, RoleLevel>) -> Self {
        Self { thresholds }
    }

    pub fn threshold(&self, permission: Permission) -> RoleLevel {
        self.thresholds
            .get(&permission)
            .copied()
            .unwrap_or_else(|| permission.default_threshold())
    }

    /// Check `actor` against a permission-guarded resource
    pub fn require(&self, actor: &Principal, permission: Permission) -> Result<()> {
        let target = Subject::resource(self.threshold(permission));
        authorize(actor, &target, permission.operation()).map_err(|_| {
            Error::Forbidden(format!(
                "{} requires level {} (caller has {})",
                permission.as_str(),
                self.threshold(permission),
                actor.level
            ))
        })
    }
}
