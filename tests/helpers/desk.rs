use desklock_engine::reconcile::Reconciler;
use desklock_engine::testing::{FakeRouter, FakeSession, FakeTree, ManualScheduler};
use desklock_engine::{LoopTimings, PolicyTable};

/// A simulated desk page with the engine wired in.
pub struct Desk {
    pub session: FakeSession,
    pub router: FakeRouter,
    pub tree: FakeTree,
    pub clock: ManualScheduler,
    pub engine: Reconciler<FakeSession, FakeRouter, FakeTree, ManualScheduler>,
}

impl Desk {
    pub fn new(table: PolicyTable, session: FakeSession, route: &str) -> Self {
        Self::with_timings(table, session, route, LoopTimings::default())
    }

    pub fn with_timings(
        table: PolicyTable,
        session: FakeSession,
        route: &str,
        timings: LoopTimings,
    ) -> Self {
        let router = FakeRouter::new(route);
        let tree = FakeTree::new();
        let clock = ManualScheduler::new();
        let engine = Reconciler::new(
            table,
            timings,
            session.clone(),
            router.clone(),
            tree.clone(),
            clock.clone(),
        );
        Self {
            session,
            router,
            tree,
            clock,
            engine,
        }
    }

    /// Ids of every element currently hidden.
    pub fn hidden(&self) -> Vec<desklock_engine::types::ElementId> {
        self.tree
            .snapshot()
            .into_iter()
            .filter(|(_, n)| n.hidden)
            .map(|(id, _)| id)
            .collect()
    }

    /// True if the engine never touched an element.
    pub fn untouched(&self) -> bool {
        self.tree
            .snapshot()
            .iter()
            .all(|(_, n)| !n.hidden && !n.disabled && n.hide_calls == 0)
    }
}
