//! Offline evaluation of a policy table, backing the `check`, `eval` and
//! `bundle` commands.

use desklock_engine::guard::{self, entity_type_of, Decision};
use desklock_engine::resolver::{self, Bypass, Resolution};
use desklock_engine::types::{normalize_label, ItemKind};
use desklock_engine::{LoopTimings, PolicyBundle, PolicyTable};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Privileged,
    NoMatchingRole,
    Restricted,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteVerdict {
    pub route: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    /// Entity type if the route is a detail view
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LabelVerdict {
    pub label: String,
    pub dropdown: bool,
    pub neutralized: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Evaluation {
    pub roles: Vec<String>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteVerdict>,
    pub labels: Vec<LabelVerdict>,
}

/// Resolve the rule for `roles` and report what the engine would do for the
/// given route and rendered labels.
pub fn evaluate(
    table: &PolicyTable,
    roles: &[String],
    route: Option<&str>,
    labels: &[String],
    dropdown_labels: &[String],
) -> Evaluation {
    let session = table.session_for(roles.iter().cloned());
    let resolution = resolver::resolve(table, Some(&session));

    let (outcome, active_role, rule) = match resolution {
        Resolution::Restricted { role, rule } => {
            (Outcome::Restricted, Some(role.to_string()), Some(rule))
        }
        Resolution::Unrestricted(Bypass::Privileged) => (Outcome::Privileged, None, None),
        Resolution::Unrestricted(Bypass::NoMatchingRole) | Resolution::Unknown => {
            (Outcome::NoMatchingRole, None, None)
        }
    };

    let route = match (route, rule) {
        (Some(route), Some(rule)) => {
            let decision = guard::guard(route, rule, table.detail_view_kinds());
            Some(RouteVerdict {
                route: route.to_string(),
                allowed: decision.is_allow(),
                redirect_to: match decision {
                    Decision::RedirectTo(target) => Some(target),
                    Decision::Allow => None,
                },
                entity_type: entity_type_of(route, table.detail_view_kinds()),
            })
        }
        (Some(route), None) => Some(RouteVerdict {
            route: route.to_string(),
            allowed: true,
            redirect_to: None,
            entity_type: entity_type_of(route, table.detail_view_kinds()),
        }),
        (None, _) => None,
    };

    let items = labels
        .iter()
        .map(|l| (l, ItemKind::Navigation))
        .chain(dropdown_labels.iter().map(|l| (l, ItemKind::Dropdown)));
    let labels = items
        .map(|(label, kind)| LabelVerdict {
            label: label.clone(),
            dropdown: kind == ItemKind::Dropdown,
            neutralized: rule
                .map(|r| r.blocks_label(&normalize_label(label), kind))
                .unwrap_or(false),
        })
        .collect();

    Evaluation {
        roles: roles.to_vec(),
        outcome,
        active_role,
        route,
        labels,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoleSummary {
    pub role: String,
    pub landing: String,
    pub paths: usize,
    pub entities: usize,
    pub blocked_labels: usize,
    pub dropdown_allow: Option<usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PolicySummary {
    /// Roles in priority order
    pub roles: Vec<RoleSummary>,
    pub privileged: Vec<String>,
    pub detail_views: Vec<String>,
    pub suppressions: Vec<String>,
}

pub fn summarize(table: &PolicyTable) -> PolicySummary {
    PolicySummary {
        roles: table
            .rules()
            .iter()
            .map(|r| RoleSummary {
                role: r.role.clone(),
                landing: r.rule.landing_route().to_string(),
                paths: r.rule.allowed_path_prefixes().len(),
                entities: r.rule.allowed_entity_types().len(),
                blocked_labels: r.rule.blocked_menu_labels().len(),
                dropdown_allow: r.rule.dropdown_allow().map(|a| a.len()),
            })
            .collect(),
        privileged: table.privileged_roles().iter().cloned().collect(),
        detail_views: table.detail_view_kinds().iter().cloned().collect(),
        suppressions: table.suppressions().iter().map(|s| s.label.clone()).collect(),
    }
}

pub fn bundle(table: PolicyTable, timings: LoopTimings) -> PolicyBundle {
    PolicyBundle { table, timings }
}
