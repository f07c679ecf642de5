//! Cash desks: the isolation boundary for lots, matches and balances.

use crate::domain::{CashDeskId, TimeMs};
use serde::{Deserialize, Serialize};

/// An operational unit (e.g. a branch) with its own balances, lots and transactions.
///
/// Desks are never purged; deactivation keeps the audit trail intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashDesk {
    pub id: CashDeskId,
    pub tenant_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: TimeMs,
    pub deleted_at: Option<TimeMs>,
}

/// Which desks a read covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeskScope {
    Desk(CashDeskId),
    /// Aggregate view: every active desk of the tenant.
    Tenant(String),
}

impl DeskScope {
    /// SQL predicate on `cash_desk_id`, with one bind parameter ([`DeskScope::key`]).
    pub fn sql_predicate(&self) -> &'static str {
        match self {
            DeskScope::Desk(_) => "cash_desk_id = ?",
            DeskScope::Tenant(_) => {
                "cash_desk_id IN (SELECT id FROM cash_desks WHERE tenant_id = ? AND is_active = 1)"
            }
        }
    }

    pub fn key(&self) -> &str {
        match self {
            DeskScope::Desk(id) => id.as_str(),
            DeskScope::Tenant(tenant) => tenant.as_str(),
        }
    }
}
