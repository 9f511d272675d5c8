use crate::errors::PolicyError;
use crate::types::*;
use kdl::KdlDocument;

/// Parse a KDL document string into typed policy structs.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, PolicyError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| PolicyError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "privileged" => {
                policy.privileged.extend(dash_list(node));
            }
            "detail-views" => {
                policy.detail_views.extend(dash_list(node));
            }
            "role" => {
                policy.roles.push(parse_role(node)?);
            }
            "suppress" => {
                let label = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidSuppression(
                        "suppress node requires a label argument (e.g. suppress \"User Settings\")"
                            .into(),
                    )
                })?;
                if label.trim().is_empty() {
                    return Err(PolicyError::InvalidSuppression(
                        "suppress label must not be empty".into(),
                    ));
                }

                let route_slug = node
                    .get("slug")
                    .and_then(|v| v.as_string())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());

                let mode = match node.get("mode").and_then(|v| v.as_string()) {
                    Some(raw) => NeutralizeMode::parse(raw).ok_or_else(|| {
                        PolicyError::InvalidSuppression(format!(
                            "unknown mode `{raw}` for `{label}` (expected `hide` or `disable`)"
                        ))
                    })?,
                    None => NeutralizeMode::default(),
                };

                policy.suppressions.push(Suppression {
                    label: label.trim().to_string(),
                    route_slug,
                    mode,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

fn parse_role(node: &kdl::KdlNode) -> Result<RoleDef, PolicyError> {
    let name = first_string_arg(node).ok_or_else(|| {
        PolicyError::InvalidPolicy(
            "role node requires a string argument (e.g. role \"Sales User\")".into(),
        )
    })?;

    let mut role = RoleDef {
        name,
        ..RoleDef::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "landing" => {
                    role.landing = first_string_arg(child).ok_or_else(|| {
                        PolicyError::InvalidPolicy(format!(
                            "`landing` in role `{}` requires a route argument (e.g. landing \"selling\")",
                            role.name
                        ))
                    })?;
                }
                "paths" => {
                    role.paths = dash_list(child);
                }
                "entities" => {
                    role.entities = dash_list(child);
                }
                "blocked-labels" => {
                    role.blocked_labels = dash_list(child);
                }
                "dropdown-allow" => {
                    role.dropdown_allow = Some(dash_list(child));
                }
                other => {
                    return Err(PolicyError::InvalidPolicy(format!(
                        "unexpected child `{other}` in role `{}` (expected `landing`, `paths`, `entities`, `blocked-labels` or `dropdown-allow`)",
                        role.name
                    )));
                }
            }
        }
    }

    if role.landing.trim().is_empty() {
        return Err(PolicyError::InvalidPolicy(format!(
            "role `{}` requires a non-empty `landing` route",
            role.name
        )));
    }

    Ok(role)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// paths {
///     - "selling"
///     - "sales"
/// }
/// ```
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
