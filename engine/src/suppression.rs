use std::cell::Cell;

use crate::host::UiTree;
use crate::types::Suppression;

/// Role-independent overrides, installed once per page session.
///
/// Safe to call before the session is known and for privileged users; the
/// single `applied` marker makes every call after the first successful one
/// a no-op.
#[derive(Debug, Default)]
pub struct GlobalSuppression {
    applied: Cell<bool>,
}

impl GlobalSuppression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_applied(&self) -> bool {
        self.applied.get()
    }

    /// Returns `true` when this call installed the override.
    pub fn apply_once<T: UiTree + ?Sized>(&self, tree: &T, suppressions: &[Suppression]) -> bool {
        if self.applied.get() {
            return false;
        }
        if suppressions.is_empty() {
            self.applied.set(true);
            return false;
        }

        match tree.install_suppression(suppressions) {
            Ok(()) => {
                self.applied.set(true);
                tracing::info!(count = suppressions.len(), "installed global suppression");
                true
            }
            Err(e) => {
                // e.g. document head not rendered yet
                tracing::debug!(error = %e, "global suppression not installed yet");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTree;
    use crate::types::NeutralizeMode;

    fn user_settings() -> Vec<Suppression> {
        vec![Suppression {
            label: "User Settings".into(),
            route_slug: Some("user-settings".into()),
            mode: NeutralizeMode::Hide,
        }]
    }

    #[test]
    fn test_apply_once_is_idempotent() {
        let tree = FakeTree::new();
        let suppression = GlobalSuppression::new();

        assert!(suppression.apply_once(&tree, &user_settings()));
        assert!(!suppression.apply_once(&tree, &user_settings()));
        assert!(suppression.is_applied());
        assert_eq!(tree.suppression_installs(), vec![user_settings()]);
    }

    #[test]
    fn test_failed_install_is_retried() {
        let tree = FakeTree::new();
        tree.reject_suppression(true);
        let suppression = GlobalSuppression::new();

        assert!(!suppression.apply_once(&tree, &user_settings()));
        assert!(!suppression.is_applied());

        tree.reject_suppression(false);
        assert!(suppression.apply_once(&tree, &user_settings()));
        assert_eq!(tree.suppression_installs().len(), 1);
    }

    #[test]
    fn test_nothing_to_suppress() {
        let tree = FakeTree::new();
        let suppression = GlobalSuppression::new();
        assert!(!suppression.apply_once(&tree, &[]));
        assert!(suppression.is_applied());
        assert!(tree.suppression_installs().is_empty());
    }
}
