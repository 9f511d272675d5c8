use std::collections::{BTreeMap, HashSet};

use crate::errors::TreeError;
use crate::host::UiTree;
use crate::types::{normalize_label, ElementId, NeutralizeMode, Rule, Suppression};

/// Counts from one sweep, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Items seen for the first time and evaluated
    pub evaluated: usize,
    /// Evaluated items that were neutralized
    pub neutralized: usize,
    /// Items skipped because they were already processed
    pub already_processed: usize,
    /// Items skipped because the tree did not have the expected shape
    pub skipped: usize,
}

/// Neutralizes navigable items whose label a rule blocks.
///
/// Every evaluated element is recorded in a side table keyed by its
/// [`ElementId`] and never evaluated again. Entries for elements that left
/// the tree are pruned on the next sweep.
///
/// Global suppressions are matched by visible label too, which catches
/// items the host renders without the attributes the suppression sheet
/// targets.
#[derive(Debug, Default)]
pub struct MenuFilter {
    processed: HashSet<ElementId>,
    suppressed: BTreeMap<String, NeutralizeMode>,
}

impl MenuFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suppressions(suppressions: &[Suppression]) -> Self {
        let suppressed = suppressions
            .iter()
            .map(|s| (normalize_label(&s.label), s.mode))
            .filter(|(label, _)| !label.is_empty())
            .collect();
        Self {
            processed: HashSet::new(),
            suppressed,
        }
    }

    pub fn is_processed(&self, id: ElementId) -> bool {
        self.processed.contains(&id)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn sweep<T: UiTree + ?Sized>(&mut self, tree: &T, rule: &Rule) -> SweepReport {
        let mut report = SweepReport::default();
        let items = tree.navigable_items();
        let mut seen = HashSet::with_capacity(items.len());

        for item in &items {
            let Some(id) = tree.element_id(item) else {
                report.skipped += 1;
                continue;
            };
            seen.insert(id);

            if self.processed.contains(&id) {
                report.already_processed += 1;
                continue;
            }

            // Label may still be rendering; evaluate on a later pass.
            let label = match tree.visible_label(item).map(|l| normalize_label(&l)) {
                Some(label) if !label.is_empty() => label,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };

            report.evaluated += 1;
            let mode = if rule.blocks_label(&label, tree.item_kind(item)) {
                Some(NeutralizeMode::Hide)
            } else {
                self.suppressed.get(&label).copied()
            };
            if let Some(mode) = mode {
                if let Err(e) = neutralize(tree, item, mode) {
                    tracing::debug!(label = %label, error = %e, "could not neutralize item, retrying later");
                    report.skipped += 1;
                    continue;
                }
                tracing::debug!(label = %label, "neutralized menu item");
                report.neutralized += 1;
            }
            self.processed.insert(id);
        }

        self.processed.retain(|id| seen.contains(id));
        report
    }
}

/// Disable and hide an item, then hide its list container so no empty
/// slot remains. `Disable` leaves the item visible.
fn neutralize<T: UiTree + ?Sized>(
    tree: &T,
    item: &T::Item,
    mode: NeutralizeMode,
) -> Result<(), TreeError> {
    tree.disable(item)?;
    if mode == NeutralizeMode::Disable {
        return Ok(());
    }
    tree.hide(item)?;
    if let Some(container) = tree.enclosing_container(item) {
        match tree.hide(&container) {
            Ok(()) | Err(TreeError::Detached) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
