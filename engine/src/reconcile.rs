//! The reconciliation loop.
//!
//! Several independent triggers (activation, staggered follow-ups, route
//! changes, debounced tree mutations, menu opens and a periodic safety net)
//! fan in to one idempotent pass: guard the route, then sweep the menu.
//! Everything runs on the host's single thread; timers are never cancelled
//! except to reschedule the mutation debounce.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::filter::MenuFilter;
use crate::guard;
use crate::host::{Router, Scheduler, SessionSource, TimerHandle, UiTree};
use crate::resolver::{self, Bypass, Resolution};
use crate::suppression::GlobalSuppression;
use crate::types::{normalize_route, LoopTimings};
use crate::PolicyTable;

/// What caused a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Initial,
    Staggered,
    RouteChange,
    Mutation,
    MenuOpen,
    Periodic,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::Initial => "initial",
            Trigger::Staggered => "staggered",
            Trigger::RouteChange => "route_change",
            Trigger::Mutation => "mutation",
            Trigger::MenuOpen => "menu_open",
            Trigger::Periodic => "periodic",
            Trigger::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Session not loaded yet; retrying.
    WaitingForSession { attempts: u32 },
    /// Session known and nothing to enforce. No triggers installed.
    Idle(Bypass),
    /// A rule is active and all triggers are installed.
    Enforcing,
    /// The session never became available within the retry limit.
    GaveUp,
}

struct Inner<S, R, T, C> {
    table: PolicyTable,
    timings: LoopTimings,
    session: S,
    router: R,
    tree: T,
    scheduler: C,
    phase: Cell<Phase>,
    filter: RefCell<MenuFilter>,
    suppression: GlobalSuppression,
    last_route: RefCell<Option<String>>,
    debounce: Cell<Option<TimerHandle>>,
    running: Cell<bool>,
    rerun: Cell<bool>,
    passes: Cell<u64>,
    redirects: Cell<u64>,
}

/// Drives the resolver, guard and filter against a live host.
///
/// Cloning yields another handle to the same loop.
pub struct Reconciler<S, R, T, C> {
    inner: Rc<Inner<S, R, T, C>>,
}

impl<S, R, T, C> Clone for Reconciler<S, R, T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S, R, T, C> Reconciler<S, R, T, C>
where
    S: SessionSource + 'static,
    R: Router + 'static,
    T: UiTree + 'static,
    C: Scheduler + 'static,
{
    pub fn new(
        table: PolicyTable,
        timings: LoopTimings,
        session: S,
        router: R,
        tree: T,
        scheduler: C,
    ) -> Self {
        let filter = MenuFilter::with_suppressions(table.suppressions());
        Self {
            inner: Rc::new(Inner {
                table,
                timings,
                session,
                router,
                tree,
                scheduler,
                phase: Cell::new(Phase::WaitingForSession { attempts: 0 }),
                filter: RefCell::new(filter),
                suppression: GlobalSuppression::new(),
                last_route: RefCell::new(None),
                debounce: Cell::new(None),
                running: Cell::new(false),
                rerun: Cell::new(false),
                passes: Cell::new(0),
                redirects: Cell::new(0),
            }),
        }
    }

    /// Apply global suppression and begin resolving the session.
    pub fn start(&self) {
        Inner::ensure_suppression(&self.inner, 0);
        Inner::try_activate(&self.inner);
    }

    /// Run a pass now. Safe to call from any trigger, including from inside
    /// a running pass, in which case one more pass follows it.
    pub fn request_pass(&self) {
        self.inner.run_pass(Trigger::Manual);
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    /// Passes that found an active rule and ran guard and filter.
    pub fn pass_count(&self) -> u64 {
        self.inner.passes.get()
    }

    pub fn redirect_count(&self) -> u64 {
        self.inner.redirects.get()
    }

    pub fn table(&self) -> &PolicyTable {
        &self.inner.table
    }
}

impl<S, R, T, C> Inner<S, R, T, C>
where
    S: SessionSource + 'static,
    R: Router + 'static,
    T: UiTree + 'static,
    C: Scheduler + 'static,
{
    fn resolve(&self) -> Resolution<'_> {
        let session = resolver::session_from_host(&self.session, &self.table);
        resolver::resolve(&self.table, session.as_ref())
    }

    /// Install global suppression, retrying on the session retry interval
    /// until it sticks. Runs independently of the phase, so privileged and
    /// restricted sessions get it alike.
    fn ensure_suppression(this: &Rc<Self>, attempts: u32) {
        this.suppression
            .apply_once(&this.tree, this.table.suppressions());
        if this.suppression.is_applied() {
            return;
        }
        if let Some(limit) = this.timings.session_retry_limit {
            if attempts >= limit {
                tracing::warn!(attempts, "global suppression could not be installed");
                return;
            }
        }
        let rc = Rc::clone(this);
        this.scheduler.set_timeout(
            this.timings.session_retry(),
            Box::new(move || Inner::ensure_suppression(&rc, attempts + 1)),
        );
    }

    fn try_activate(this: &Rc<Self>) {
        let Phase::WaitingForSession { attempts } = this.phase.get() else {
            return;
        };

        match this.resolve() {
            Resolution::Unknown => {
                if let Some(limit) = this.timings.session_retry_limit {
                    if attempts >= limit {
                        tracing::warn!(attempts, "session never became available, policy not enforced");
                        this.phase.set(Phase::GaveUp);
                        return;
                    }
                }
                this.phase.set(Phase::WaitingForSession {
                    attempts: attempts + 1,
                });
                let rc = Rc::clone(this);
                this.scheduler.set_timeout(
                    this.timings.session_retry(),
                    Box::new(move || Inner::try_activate(&rc)),
                );
            }
            Resolution::Unrestricted(bypass) => {
                tracing::info!(reason = ?bypass, "no UI policy applies to this session");
                this.phase.set(Phase::Idle(bypass));
            }
            Resolution::Restricted { role, .. } => {
                tracing::info!(role = %role, "enforcing UI policy");
                this.phase.set(Phase::Enforcing);
                Inner::install_triggers(this);
            }
        }
    }

    fn install_triggers(this: &Rc<Self>) {
        this.run_pass(Trigger::Initial);

        for &ms in &this.timings.initial_passes_ms {
            Inner::schedule_pass(this, Duration::from_millis(ms), Trigger::Staggered);
        }

        let rc = Rc::clone(this);
        this.router.on_route_change(Box::new(move || {
            Inner::schedule_pass(&rc, rc.timings.route_settle(), Trigger::RouteChange);
        }));

        let rc = Rc::clone(this);
        this.tree
            .observe_mutations(Box::new(move || Inner::debounce_pass(&rc)));

        let rc = Rc::clone(this);
        this.tree.on_menu_open(Box::new(move || {
            for &ms in &rc.timings.menu_open_passes_ms {
                Inner::schedule_pass(&rc, Duration::from_millis(ms), Trigger::MenuOpen);
            }
        }));

        let rc = Rc::clone(this);
        this.scheduler.set_interval(
            this.timings.periodic(),
            Box::new(move || rc.run_pass(Trigger::Periodic)),
        );
    }

    fn schedule_pass(this: &Rc<Self>, delay: Duration, trigger: Trigger) {
        let rc = Rc::clone(this);
        this.scheduler
            .set_timeout(delay, Box::new(move || rc.run_pass(trigger)));
    }

    /// Cancel-and-reschedule: a burst of notifications yields one pass after
    /// the tree has been quiet for the debounce interval.
    fn debounce_pass(this: &Rc<Self>) {
        if let Some(pending) = this.debounce.take() {
            this.scheduler.clear_timeout(pending);
        }
        let rc = Rc::clone(this);
        let handle = this.scheduler.set_timeout(
            this.timings.mutation_debounce(),
            Box::new(move || {
                rc.debounce.set(None);
                rc.run_pass(Trigger::Mutation);
            }),
        );
        this.debounce.set(Some(handle));
    }

    fn run_pass(&self, trigger: Trigger) {
        if self.running.replace(true) {
            self.rerun.set(true);
            return;
        }
        loop {
            self.reconcile_once(trigger);
            if !self.rerun.replace(false) {
                break;
            }
        }
        self.running.set(false);
    }

    fn reconcile_once(&self, trigger: Trigger) {
        // Rule is recomputed on every pass, never cached.
        let Resolution::Restricted { role, rule } = self.resolve() else {
            return;
        };
        self.passes.set(self.passes.get() + 1);

        let route = self.router.current_route();
        let normalized = normalize_route(&route);
        let route_changed = self.last_route.borrow().as_deref() != Some(normalized.as_str());
        if route_changed {
            *self.last_route.borrow_mut() = Some(normalized);
            let decision =
                guard::enforce(&self.router, &route, rule, self.table.detail_view_kinds());
            if !decision.is_allow() {
                self.redirects.set(self.redirects.get() + 1);
            }
        }

        let report = self.filter.borrow_mut().sweep(&self.tree, rule);
        tracing::debug!(
            trigger = %trigger,
            role = %role,
            route = %route,
            evaluated = report.evaluated,
            neutralized = report.neutralized,
            skipped = report.skipped,
            "reconciliation pass"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRouter, FakeSession, FakeTree, ManualScheduler};
    use crate::types::{ItemKind, NeutralizeMode, RoleRule, Rule, Suppression};

    type TestLoop = Reconciler<FakeSession, FakeRouter, FakeTree, ManualScheduler>;

    fn make_table() -> PolicyTable {
        PolicyTable::from_parts(
            vec![RoleRule {
                role: "Sales User".into(),
                rule: Rule::new("selling")
                    .with_paths(["selling", "sales"])
                    .with_entities(["Customer"])
                    .with_blocked_labels(["Help"]),
            }],
            ["System Manager".to_string()].into(),
            ["form".to_string()].into(),
            vec![Suppression {
                label: "User Settings".into(),
                route_slug: Some("user-settings".into()),
                mode: NeutralizeMode::Hide,
            }],
        )
    }

    struct Harness {
        session: FakeSession,
        router: FakeRouter,
        tree: FakeTree,
        clock: ManualScheduler,
        engine: TestLoop,
    }

    fn harness(session: FakeSession, route: &str, timings: LoopTimings) -> Harness {
        let router = FakeRouter::new(route);
        let tree = FakeTree::new();
        let clock = ManualScheduler::new();
        let engine = Reconciler::new(
            make_table(),
            timings,
            session.clone(),
            router.clone(),
            tree.clone(),
            clock.clone(),
        );
        Harness {
            session,
            router,
            tree,
            clock,
            engine,
        }
    }

    #[test]
    fn test_restricted_user_is_redirected_and_filtered() {
        let h = harness(
            FakeSession::with_roles(["Sales User"]),
            "accounts-receivable",
            LoopTimings::default(),
        );
        let help = h.tree.add_item("Help", ItemKind::Navigation);

        h.engine.start();

        assert_eq!(h.engine.phase(), Phase::Enforcing);
        assert_eq!(h.router.navigations(), vec!["selling".to_string()]);
        assert!(h.tree.node(help).unwrap().hidden);
        assert_eq!(h.tree.suppression_installs().len(), 1);
    }

    #[test]
    fn test_waits_for_session_then_activates() {
        let h = harness(FakeSession::pending(), "selling", LoopTimings::default());
        let help = h.tree.add_item("Help", ItemKind::Navigation);

        h.engine.start();
        assert_eq!(h.engine.phase(), Phase::WaitingForSession { attempts: 1 });
        // suppression is safe before the session is known
        assert_eq!(h.tree.suppression_installs().len(), 1);

        h.clock.advance(Duration::from_millis(350));
        assert!(matches!(h.engine.phase(), Phase::WaitingForSession { .. }));
        assert!(!h.tree.node(help).unwrap().hidden);

        h.session.load(["Sales User"]);
        h.clock.advance(Duration::from_millis(100));
        assert_eq!(h.engine.phase(), Phase::Enforcing);
        assert!(h.tree.node(help).unwrap().hidden);
        assert_eq!(h.tree.suppression_installs().len(), 1);
    }

    #[test]
    fn test_retry_limit_gives_up() {
        let timings = LoopTimings {
            session_retry_limit: Some(3),
            ..LoopTimings::default()
        };
        let h = harness(FakeSession::pending(), "selling", timings);
        h.engine.start();
        h.clock.advance(Duration::from_secs(2));
        assert_eq!(h.engine.phase(), Phase::GaveUp);
        assert_eq!(h.clock.pending_timers(), 0);
    }

    #[test]
    fn test_privileged_user_installs_only_suppression() {
        let h = harness(
            FakeSession::with_roles(["Sales User", "System Manager"]),
            "accounts-receivable",
            LoopTimings::default(),
        );
        let help = h.tree.add_item("Help", ItemKind::Navigation);

        h.engine.start();
        h.clock.advance(Duration::from_secs(10));

        assert_eq!(h.engine.phase(), Phase::Idle(Bypass::Privileged));
        assert!(h.router.navigations().is_empty());
        assert!(!h.tree.node(help).unwrap().hidden);
        assert_eq!(h.tree.suppression_installs().len(), 1);
        assert_eq!(h.tree.mutation_observer_count(), 0);
        assert_eq!(h.router.listener_count(), 0);
        assert_eq!(h.clock.pending_timers(), 0);
        assert_eq!(h.engine.pass_count(), 0);
    }

    #[test]
    fn test_no_roles_changes_nothing() {
        let h = harness(
            FakeSession::with_roles(Vec::<String>::new()),
            "accounts-receivable",
            LoopTimings::default(),
        );
        let help = h.tree.add_item("Help", ItemKind::Navigation);

        h.engine.start();
        h.clock.advance(Duration::from_secs(10));

        assert_eq!(h.engine.phase(), Phase::Idle(Bypass::NoMatchingRole));
        assert!(h.router.navigations().is_empty());
        assert!(!h.tree.node(help).unwrap().hidden);
    }

    #[test]
    fn test_route_change_guarded_after_settle_delay() {
        let h = harness(
            FakeSession::with_roles(["Sales User"]),
            "selling",
            LoopTimings::default(),
        );
        h.engine.start();
        h.clock.advance(Duration::from_secs(2));
        assert!(h.router.navigations().is_empty());

        h.router.set_route("accounts-receivable");
        h.clock.advance(Duration::from_millis(299));
        assert!(h.router.navigations().is_empty());

        h.clock.advance(Duration::from_millis(1));
        assert_eq!(h.router.navigations(), vec!["selling".to_string()]);
        assert_eq!(h.router.current_route(), "selling");
        assert_eq!(h.engine.redirect_count(), 1);
    }

    #[test]
    fn test_entity_detail_route_is_not_redirected() {
        let h = harness(
            FakeSession::with_roles(["Sales User"]),
            "form/customer/ABC-123",
            LoopTimings::default(),
        );
        h.engine.start();
        h.clock.advance(Duration::from_secs(5));
        assert!(h.router.navigations().is_empty());
    }

    #[test]
    fn test_unchanged_route_is_not_guarded_twice() {
        let h = harness(
            FakeSession::with_roles(["Sales User"]),
            "accounts-receivable",
            LoopTimings::default(),
        );
        h.router.ignore_navigation(true);

        h.engine.start();
        h.clock.advance(Duration::from_secs(10));

        // the host ignored the redirect; passes keep running without
        // re-issuing it for the same route
        assert!(h.engine.pass_count() > 3);
        assert_eq!(h.router.navigations().len(), 1);
    }

    #[test]
    fn test_mutation_burst_is_debounced() {
        let timings = LoopTimings {
            initial_passes_ms: vec![],
            periodic_ms: 60_000,
            ..LoopTimings::default()
        };
        let h = harness(FakeSession::with_roles(["Sales User"]), "selling", timings);
        h.engine.start();
        assert_eq!(h.engine.pass_count(), 1);

        for _ in 0..10 {
            h.tree.notify_mutation();
            h.clock.advance(Duration::from_millis(50));
        }
        assert_eq!(h.engine.pass_count(), 1);

        h.clock.advance(Duration::from_millis(150));
        assert_eq!(h.engine.pass_count(), 2);
    }

    #[test]
    fn test_late_rendered_item_caught_by_mutation_watcher() {
        let timings = LoopTimings {
            initial_passes_ms: vec![],
            periodic_ms: 60_000,
            ..LoopTimings::default()
        };
        let h = harness(FakeSession::with_roles(["Sales User"]), "selling", timings);
        h.engine.start();

        let help = h.tree.add_item_in_list("Help", ItemKind::Navigation);
        h.tree.notify_mutation();
        h.clock.advance(Duration::from_millis(150));
        assert!(h.tree.node(help).unwrap().hidden);
    }

    #[test]
    fn test_periodic_timer_is_safety_net() {
        let timings = LoopTimings {
            initial_passes_ms: vec![],
            periodic_ms: 1000,
            ..LoopTimings::default()
        };
        let h = harness(FakeSession::with_roles(["Sales User"]), "selling", timings);
        h.engine.start();

        // rendered without any mutation notification
        let help = h.tree.add_item("Help", ItemKind::Navigation);
        h.clock.advance(Duration::from_millis(999));
        assert!(!h.tree.node(help).unwrap().hidden);
        h.clock.advance(Duration::from_millis(1));
        assert!(h.tree.node(help).unwrap().hidden);
    }

    #[test]
    fn test_menu_open_schedules_passes() {
        let timings = LoopTimings {
            initial_passes_ms: vec![],
            periodic_ms: 60_000,
            ..LoopTimings::default()
        };
        let h = harness(FakeSession::with_roles(["Sales User"]), "selling", timings);
        h.engine.start();

        let help = h.tree.add_item("Help", ItemKind::Dropdown);
        h.tree.open_menu();
        h.clock.advance(Duration::from_millis(1));
        assert!(h.tree.node(help).unwrap().hidden);
        h.clock.advance(Duration::from_millis(100));
        assert_eq!(h.engine.pass_count(), 3);
    }

    #[test]
    fn test_staggered_initial_passes() {
        let timings = LoopTimings {
            periodic_ms: 60_000,
            ..LoopTimings::default()
        };
        let h = harness(FakeSession::with_roles(["Sales User"]), "selling", timings);
        h.engine.start();
        assert_eq!(h.engine.pass_count(), 1);
        h.clock.advance(Duration::from_millis(1000));
        assert_eq!(h.engine.pass_count(), 4);
    }

    #[test]
    fn test_request_pass_from_inside_pass_runs_again() {
        let h = harness(
            FakeSession::with_roles(["Sales User"]),
            "selling",
            LoopTimings::default(),
        );
        h.engine.start();
        let before = h.engine.pass_count();

        let engine = h.engine.clone();
        h.tree.on_next_hide(move || engine.request_pass());
        h.tree.add_item("Help", ItemKind::Navigation);
        h.engine.request_pass();

        assert_eq!(h.engine.pass_count(), before + 2);
    }

    #[test]
    fn test_failed_suppression_retried_for_every_session_kind() {
        for roles in [vec!["Sales User"], vec!["System Manager"], vec![]] {
            let h = harness(
                FakeSession::with_roles(roles.clone()),
                "selling",
                LoopTimings::default(),
            );
            h.tree.reject_suppression(true);

            h.engine.start();
            h.clock.advance(Duration::from_millis(500));
            assert!(h.tree.suppression_installs().is_empty(), "{roles:?}");

            h.tree.reject_suppression(false);
            h.clock.advance(Duration::from_millis(100));
            assert_eq!(h.tree.suppression_installs().len(), 1, "{roles:?}");

            h.clock.advance(Duration::from_secs(10));
            assert_eq!(h.tree.suppression_installs().len(), 1, "{roles:?}");
        }
    }

    #[test]
    fn test_suppression_retry_respects_limit() {
        let timings = LoopTimings {
            session_retry_limit: Some(3),
            ..LoopTimings::default()
        };
        let h = harness(FakeSession::with_roles(["System Manager"]), "selling", timings);
        h.tree.reject_suppression(true);
        h.engine.start();
        h.clock.advance(Duration::from_secs(2));

        assert_eq!(h.engine.phase(), Phase::Idle(Bypass::Privileged));
        assert!(h.tree.suppression_installs().is_empty());
        assert_eq!(h.clock.pending_timers(), 0);
    }
}
