use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Lower-case and trim a visible label or route fragment.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Normalize an entity type name: lower case, `-`/`_` become spaces,
/// runs of whitespace collapse to one space.
/// "Sales-Order", "sales_order" and " Sales  Order " all become "sales order".
pub fn normalize_entity_type(name: &str) -> String {
    name.to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a host route string: trimmed, lower case, without leading or
/// trailing slashes.
pub fn normalize_route(route: &str) -> String {
    route.trim().trim_matches('/').to_lowercase()
}

fn normalized_set<I, S>(values: I, normalize: fn(&str) -> String) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| normalize(v.as_ref()))
        .filter(|v| !v.is_empty())
        .collect()
}

/// Enforcement policy bound to one role. Values are normalized on
/// construction and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RuleRepr")]
pub struct Rule {
    landing_route: String,
    allowed_path_prefixes: BTreeSet<String>,
    allowed_entity_types: BTreeSet<String>,
    blocked_menu_labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dropdown_allow: Option<BTreeSet<String>>,
}

/// Wire form of a [`Rule`]. Decoded bundles go through the same
/// normalizing constructors as compiled policy files.
#[derive(Deserialize)]
struct RuleRepr {
    landing_route: String,
    #[serde(default)]
    allowed_path_prefixes: Vec<String>,
    #[serde(default)]
    allowed_entity_types: Vec<String>,
    #[serde(default)]
    blocked_menu_labels: Vec<String>,
    #[serde(default)]
    dropdown_allow: Option<Vec<String>>,
}

impl From<RuleRepr> for Rule {
    fn from(raw: RuleRepr) -> Self {
        let rule = Rule::new(raw.landing_route)
            .with_paths(raw.allowed_path_prefixes)
            .with_entities(raw.allowed_entity_types)
            .with_blocked_labels(raw.blocked_menu_labels);
        match raw.dropdown_allow {
            Some(allow) => rule.with_dropdown_allow(allow),
            None => rule,
        }
    }
}

impl Rule {
    pub fn new(landing_route: impl Into<String>) -> Self {
        Self {
            landing_route: landing_route.into().trim().to_string(),
            allowed_path_prefixes: BTreeSet::new(),
            allowed_entity_types: BTreeSet::new(),
            blocked_menu_labels: BTreeSet::new(),
            dropdown_allow: None,
        }
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_path_prefixes
            .extend(normalized_set(paths, normalize_label));
        self
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_entity_types
            .extend(normalized_set(entities, normalize_entity_type));
        self
    }

    pub fn with_blocked_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked_menu_labels
            .extend(normalized_set(labels, normalize_label));
        self
    }

    /// Restrict dropdown/context menu entries to the given labels.
    pub fn with_dropdown_allow<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.dropdown_allow
            .get_or_insert_with(BTreeSet::new)
            .extend(normalized_set(labels, normalize_label));
        self
    }

    pub fn landing_route(&self) -> &str {
        &self.landing_route
    }

    pub fn allowed_path_prefixes(&self) -> &BTreeSet<String> {
        &self.allowed_path_prefixes
    }

    pub fn allowed_entity_types(&self) -> &BTreeSet<String> {
        &self.allowed_entity_types
    }

    pub fn blocked_menu_labels(&self) -> &BTreeSet<String> {
        &self.blocked_menu_labels
    }

    pub fn dropdown_allow(&self) -> Option<&BTreeSet<String>> {
        self.dropdown_allow.as_ref()
    }

    /// Whether an item with this (already normalized) label must be
    /// neutralized. Blocked labels apply everywhere; the dropdown allow-list
    /// only to items rendered inside a dropdown.
    pub fn blocks_label(&self, label: &str, kind: ItemKind) -> bool {
        if self.blocked_menu_labels.contains(label) {
            return true;
        }
        match (kind, &self.dropdown_allow) {
            (ItemKind::Dropdown, Some(allow)) => !allow.contains(label),
            _ => false,
        }
    }
}

/// A Rule together with the role it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    pub role: String,
    pub rule: Rule,
}

/// The signed-in user's role membership as supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    roles: BTreeSet<String>,
    privileged: bool,
}

impl Session {
    pub fn new<I, S>(roles: I, privileged: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            privileged,
        }
    }

    /// Build a session whose privilege is derived from the bypass roles.
    pub fn from_roles<I, S>(roles: I, bypass_roles: &BTreeSet<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: BTreeSet<String> = roles.into_iter().map(Into::into).collect();
        let privileged = roles.iter().any(|r| bypass_roles.contains(r));
        Self { roles, privileged }
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }
}

/// How an element is neutralized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeutralizeMode {
    /// No layout presence and no interactive effect.
    #[default]
    Hide,
    /// Rendered, but activating it has no effect.
    Disable,
}

impl NeutralizeMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "hide" => Some(Self::Hide),
            "disable" => Some(Self::Disable),
            _ => None,
        }
    }
}

/// Role-independent UI override applied once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    /// Visible label as rendered by the host, e.g. "User Settings"
    pub label: String,
    /// Route slug the entry links to, e.g. "user-settings"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_slug: Option<String>,
    #[serde(default)]
    pub mode: NeutralizeMode,
}

/// Where a navigable item is rendered. Dropdown items are additionally
/// subject to a rule's dropdown allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Navigation,
    Dropdown,
}

/// Stable identity of a host element, assigned by the UI tree adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

/// Delays and intervals driving the reconciliation loop, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopTimings {
    /// Retry interval while the session is not yet available
    pub session_retry_ms: u64,
    /// Give up waiting for the session after this many retries (None = never)
    pub session_retry_limit: Option<u32>,
    /// Staggered passes after activation, to catch late initial rendering
    pub initial_passes_ms: Vec<u64>,
    /// Delay between a route change and its pass
    pub route_settle_ms: u64,
    /// Quiet interval that coalesces UI tree mutation bursts
    pub mutation_debounce_ms: u64,
    /// Safety-net interval
    pub periodic_ms: u64,
    /// Staggered passes after the host opens a user menu
    pub menu_open_passes_ms: Vec<u64>,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            session_retry_ms: 100,
            session_retry_limit: None,
            initial_passes_ms: vec![50, 300, 1000],
            route_settle_ms: 300,
            mutation_debounce_ms: 150,
            periodic_ms: 2000,
            menu_open_passes_ms: vec![1, 100],
        }
    }
}

impl LoopTimings {
    pub fn session_retry(&self) -> Duration {
        Duration::from_millis(self.session_retry_ms)
    }

    pub fn route_settle(&self) -> Duration {
        Duration::from_millis(self.route_settle_ms)
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(self.mutation_debounce_ms)
    }

    pub fn periodic(&self) -> Duration {
        Duration::from_millis(self.periodic_ms)
    }
}

// ---------- Parsed (uncompiled) policy types ----------

#[derive(Debug, Clone, Default)]
pub struct RoleDef {
    pub name: String,
    pub landing: String,
    pub paths: Vec<String>,
    pub entities: Vec<String>,
    pub blocked_labels: Vec<String>,
    pub dropdown_allow: Option<Vec<String>>,
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub privileged: Vec<String>,
    pub detail_views: Vec<String>,
    pub roles: Vec<RoleDef>,
    pub suppressions: Vec<Suppression>,
}
