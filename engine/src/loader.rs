use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::errors::PolicyError;
use crate::guard::{guard, Decision};
use crate::policy::parse_kdl_document;
use crate::types::*;
use crate::PolicyTable;

pub(crate) const DEFAULT_DETAIL_VIEWS: &[&str] = &["form"];

/// Load all `.kdl` policy files from the given directory and compile them
/// into a single immutable `PolicyTable`. Files are merged in path order.
pub fn load_policies(dir: &Path) -> Result<PolicyTable, PolicyError> {
    if !dir.is_dir() {
        return Err(PolicyError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in &entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| PolicyError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        all_parsed.push(parse_kdl_document(&contents)?);
    }

    let table = compile_policies(all_parsed)?;

    tracing::info!(
        files = entries.len(),
        roles = table.rules().len(),
        privileged = table.privileged_roles().len(),
        suppressions = table.suppressions().len(),
        "Loaded UI policies"
    );

    Ok(table)
}

/// Parse and compile a single KDL source.
pub fn load_policy_str(source: &str) -> Result<PolicyTable, PolicyError> {
    compile_policies(vec![parse_kdl_document(source)?])
}

/// Merge and compile all parsed policies into a single `PolicyTable`.
pub fn compile_policies(parsed: Vec<ParsedPolicy>) -> Result<PolicyTable, PolicyError> {
    let mut rules: Vec<RoleRule> = Vec::new();
    let mut privileged: BTreeSet<String> = BTreeSet::new();
    let mut detail_views: BTreeSet<String> = BTreeSet::new();
    let mut suppressions: Vec<Suppression> = Vec::new();
    let mut seen_roles: HashSet<String> = HashSet::new();

    for p in parsed {
        privileged.extend(
            p.privileged
                .into_iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
        );
        detail_views.extend(
            p.detail_views
                .iter()
                .map(|v| normalize_label(v))
                .filter(|v| !v.is_empty()),
        );
        for role in p.roles {
            let name = role.name.trim().to_string();
            if !seen_roles.insert(name.clone()) {
                return Err(PolicyError::DuplicateRole(name));
            }
            rules.push(RoleRule {
                role: name,
                rule: compile_rule(role),
            });
        }
        for s in p.suppressions {
            if !suppressions.contains(&s) {
                suppressions.push(s);
            }
        }
    }

    if detail_views.is_empty() {
        detail_views.extend(DEFAULT_DETAIL_VIEWS.iter().map(|v| v.to_string()));
    }

    let table = PolicyTable::from_parts(rules, privileged, detail_views, suppressions);
    validate_table(&table)?;
    Ok(table)
}

fn compile_rule(role: RoleDef) -> Rule {
    let rule = Rule::new(role.landing)
        .with_paths(role.paths)
        .with_entities(role.entities)
        .with_blocked_labels(role.blocked_labels);
    match role.dropdown_allow {
        Some(allow) => rule.with_dropdown_allow(allow),
        None => rule,
    }
}

/// Configuration invariants the runtime relies on: every landing route
/// passes its own rule, so a redirect can never target a denied route.
pub fn validate_table(table: &PolicyTable) -> Result<(), PolicyError> {
    for RoleRule { role, rule } in table.rules() {
        if rule.landing_route().is_empty() {
            return Err(PolicyError::InvalidPolicy(format!(
                "role `{role}` requires a non-empty `landing` route"
            )));
        }
        if let Decision::RedirectTo(_) = guard(rule.landing_route(), rule, table.detail_view_kinds())
        {
            return Err(PolicyError::LandingNotAllowed {
                role: role.clone(),
                landing: rule.landing_route().to_string(),
            });
        }
    }

    for s in table.suppressions() {
        if s.label.trim().is_empty() {
            return Err(PolicyError::InvalidSuppression(
                "suppress label must not be empty".into(),
            ));
        }
    }

    Ok(())
}
