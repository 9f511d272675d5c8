use std::collections::BTreeSet;

use crate::host::Router;
use crate::types::{normalize_entity_type, normalize_route, Rule};

/// Outcome of checking a route against a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectTo(String),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Extract the normalized entity type from a detail-view route such as
/// `form/sales-order/SO-0001`. Returns `None` when the first segment is not
/// one of `detail_views` or the entity segment is empty.
pub fn entity_type_of(route: &str, detail_views: &BTreeSet<String>) -> Option<String> {
    let route = normalize_route(route);
    let mut segments = route.split('/');
    let kind = segments.next()?;
    if !detail_views.contains(kind) {
        return None;
    }
    let entity = normalize_entity_type(segments.next()?);
    if entity.is_empty() {
        return None;
    }
    Some(entity)
}

/// Check `route` against `rule`.
///
/// Empty routes are denied. Detail views of an allowed entity type are
/// allowed regardless of path prefixes; otherwise the route must contain one
/// of the allowed path prefixes as a substring.
pub fn guard(route: &str, rule: &Rule, detail_views: &BTreeSet<String>) -> Decision {
    let normalized = normalize_route(route);
    if normalized.is_empty() {
        return Decision::RedirectTo(rule.landing_route().to_string());
    }

    if let Some(entity) = entity_type_of(&normalized, detail_views) {
        if rule.allowed_entity_types().contains(&entity) {
            return Decision::Allow;
        }
    }

    if rule
        .allowed_path_prefixes()
        .iter()
        .any(|prefix| normalized.contains(prefix.as_str()))
    {
        Decision::Allow
    } else {
        Decision::RedirectTo(rule.landing_route().to_string())
    }
}

/// Run [`guard`] and, on deny, issue a single navigation command.
pub fn enforce<R: Router + ?Sized>(
    router: &R,
    route: &str,
    rule: &Rule,
    detail_views: &BTreeSet<String>,
) -> Decision {
    let decision = guard(route, rule, detail_views);
    if let Decision::RedirectTo(target) = &decision {
        tracing::info!(route = %route, landing = %target, "route not allowed, redirecting");
        router.navigate_to(target);
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRouter;

    fn forms() -> BTreeSet<String> {
        ["form".to_string()].into()
    }

    fn sales_rule() -> Rule {
        Rule::new("selling")
            .with_paths(["selling", "sales", "quotation"])
            .with_entities(["Customer", "Sales Order"])
    }

    #[test]
    fn test_landing_route_allowed() {
        let rule = sales_rule();
        assert_eq!(guard(rule.landing_route(), &rule, &forms()), Decision::Allow);
    }

    #[test]
    fn test_disallowed_route_redirects_to_landing() {
        let rule = sales_rule();
        assert_eq!(
            guard("accounts-receivable", &rule, &forms()),
            Decision::RedirectTo("selling".into())
        );
    }

    #[test]
    fn test_empty_route_redirects() {
        let rule = sales_rule();
        assert_eq!(
            guard("", &rule, &forms()),
            Decision::RedirectTo("selling".into())
        );
        assert_eq!(
            guard(" / ", &rule, &forms()),
            Decision::RedirectTo("selling".into())
        );
    }

    #[test]
    fn test_prefix_match_is_substring_and_case_insensitive() {
        let rule = sales_rule();
        assert!(guard("List/Sales Invoice/List", &rule, &forms()).is_allow());
        assert!(guard("/app/Selling", &rule, &forms()).is_allow());
        assert!(guard("quotation/new", &rule, &forms()).is_allow());
    }

    #[test]
    fn test_entity_detail_view_exception() {
        let rule = sales_rule();
        assert!(guard("form/customer/ABC-123", &rule, &forms()).is_allow());
        assert!(guard("Form/Sales-Order/SO-0001", &rule, &forms()).is_allow());
        assert!(guard("form/sales_order/new", &rule, &forms()).is_allow());
        // entity type not listed and no prefix matches
        assert!(!guard("form/supplier/SUP-1", &rule, &forms()).is_allow());
    }

    #[test]
    fn test_entity_exception_requires_detail_view_kind() {
        let rule = Rule::new("selling")
            .with_paths(["selling"])
            .with_entities(["customer"]);
        assert!(!guard("list/customer/abc", &rule, &forms()).is_allow());
    }

    #[test]
    fn test_entity_type_of() {
        assert_eq!(
            entity_type_of("Form/Sales-Order/SO-1", &forms()),
            Some("sales order".into())
        );
        assert_eq!(entity_type_of("form", &forms()), None);
        assert_eq!(entity_type_of("form//x", &forms()), None);
        assert_eq!(entity_type_of("selling", &forms()), None);
    }

    #[test]
    fn test_enforce_navigates_only_on_deny() {
        let rule = sales_rule();
        let router = FakeRouter::new("selling");

        enforce(&router, "selling", &rule, &forms());
        assert!(router.navigations().is_empty());

        enforce(&router, "accounts-receivable", &rule, &forms());
        assert_eq!(router.navigations(), vec!["selling".to_string()]);
    }
}
