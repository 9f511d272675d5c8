use crate::host::SessionSource;
use crate::types::{Rule, Session};
use crate::PolicyTable;

/// Why no rule applies to a known session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bypass {
    Privileged,
    NoMatchingRole,
}

/// Result of resolving the active rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Session not available yet: do not act, retry later.
    Unknown,
    /// Session known, nothing to enforce.
    Unrestricted(Bypass),
    /// Exactly one rule is active.
    Restricted { role: &'a str, rule: &'a Rule },
}

impl<'a> Resolution<'a> {
    pub fn rule(&self) -> Option<&'a Rule> {
        match self {
            Resolution::Restricted { rule, .. } => Some(rule),
            _ => None,
        }
    }
}

/// Pick the active rule for `session`.
///
/// Privilege is checked before any rule lookup. Otherwise the first role in
/// table order that the session holds wins.
pub fn resolve<'a>(table: &'a PolicyTable, session: Option<&Session>) -> Resolution<'a> {
    let Some(session) = session else {
        return Resolution::Unknown;
    };

    if session.is_privileged() {
        return Resolution::Unrestricted(Bypass::Privileged);
    }

    table
        .rules()
        .iter()
        .find(|r| session.has_role(&r.role))
        .map(|r| Resolution::Restricted {
            role: &r.role,
            rule: &r.rule,
        })
        .unwrap_or(Resolution::Unrestricted(Bypass::NoMatchingRole))
}

/// Read the current session from the host. The host's privilege verdict
/// takes precedence over the table's bypass roles when it offers one.
pub fn session_from_host<S: SessionSource + ?Sized>(
    source: &S,
    table: &PolicyTable,
) -> Option<Session> {
    let roles = source.current_roles()?;
    let session = match source.is_privileged() {
        Some(privileged) => Session::new(roles, privileged),
        None => table.session_for(roles),
    };
    Some(session)
}
