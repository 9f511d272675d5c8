//! desklock engine - role-based UI policy reconciliation.
//!
//! Resolves the active [`Rule`] for a host session, guards the host route,
//! filters navigable UI items and keeps both converged while the host
//! re-renders its UI. The host itself is reached only through the traits in
//! [`host`].

pub mod errors;
pub mod filter;
pub mod guard;
pub mod host;
pub mod loader;
pub mod policy;
pub mod reconcile;
pub mod resolver;
pub mod suppression;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use errors::{PolicyError, TreeError};
pub use types::{LoopTimings, NeutralizeMode, RoleRule, Rule, Session, Suppression};

/// Fully compiled policy table, loaded from KDL policy files.
/// Immutable after construction; rule order is priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TableRepr")]
pub struct PolicyTable {
    rules: Vec<RoleRule>,
    privileged_roles: BTreeSet<String>,
    detail_view_kinds: BTreeSet<String>,
    suppressions: Vec<Suppression>,
}

#[derive(Deserialize)]
struct TableRepr {
    rules: Vec<RoleRule>,
    #[serde(default)]
    privileged_roles: BTreeSet<String>,
    #[serde(default)]
    detail_view_kinds: BTreeSet<String>,
    #[serde(default)]
    suppressions: Vec<Suppression>,
}

impl From<TableRepr> for PolicyTable {
    fn from(raw: TableRepr) -> Self {
        let rules = raw
            .rules
            .into_iter()
            .map(|r| RoleRule {
                role: r.role.trim().to_string(),
                rule: r.rule,
            })
            .collect();
        let privileged = raw
            .privileged_roles
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        let mut detail_views: BTreeSet<String> = raw
            .detail_view_kinds
            .iter()
            .map(|v| types::normalize_label(v))
            .filter(|v| !v.is_empty())
            .collect();
        if detail_views.is_empty() {
            detail_views.extend(loader::DEFAULT_DETAIL_VIEWS.iter().map(|v| v.to_string()));
        }
        Self::from_parts(rules, privileged, detail_views, raw.suppressions)
    }
}

impl PolicyTable {
    pub(crate) fn from_parts(
        rules: Vec<RoleRule>,
        privileged_roles: BTreeSet<String>,
        detail_view_kinds: BTreeSet<String>,
        suppressions: Vec<Suppression>,
    ) -> Self {
        Self {
            rules,
            privileged_roles,
            detail_view_kinds,
            suppressions,
        }
    }

    /// Role rules in priority order.
    pub fn rules(&self) -> &[RoleRule] {
        &self.rules
    }

    pub fn rule_for(&self, role: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.role == role).map(|r| &r.rule)
    }

    /// Roles that bypass every rule.
    pub fn privileged_roles(&self) -> &BTreeSet<String> {
        &self.privileged_roles
    }

    /// First route segments that address an entity detail view, e.g. "form".
    pub fn detail_view_kinds(&self) -> &BTreeSet<String> {
        &self.detail_view_kinds
    }

    pub fn suppressions(&self) -> &[Suppression] {
        &self.suppressions
    }

    /// Build a session for the given roles, deriving privilege from this
    /// table's bypass roles.
    pub fn session_for<I, S>(&self, roles: I) -> Session
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Session::from_roles(roles, &self.privileged_roles)
    }
}

/// Compiled policy table plus loop timings, as shipped to the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBundle {
    pub table: PolicyTable,
    #[serde(default)]
    pub timings: LoopTimings,
}

impl PolicyBundle {
    pub fn to_json_pretty(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode a bundle and re-validate its table.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let bundle: PolicyBundle = serde_json::from_str(json)?;
        loader::validate_table(&bundle.table)?;
        Ok(bundle)
    }
}
