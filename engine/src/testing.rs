//! In-memory host fakes for driving the engine without a browser.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::Rc;
use std::time::Duration;

use crate::errors::TreeError;
use crate::host::{Callback, Router, Scheduler, SessionSource, Task, TimerHandle, UiTree};
use crate::types::{ElementId, ItemKind, Suppression};

/// Take the callbacks out, run them without holding the borrow, put them
/// back. Callbacks registered while running are kept.
fn fire(callbacks: &RefCell<Vec<Callback>>) {
    let mut running = std::mem::take(&mut *callbacks.borrow_mut());
    for cb in running.iter_mut() {
        cb();
    }
    let mut slot = callbacks.borrow_mut();
    running.append(&mut slot);
    *slot = running;
}

// ---------- Session ----------

#[derive(Clone, Default)]
pub struct FakeSession {
    roles: Rc<RefCell<Option<BTreeSet<String>>>>,
    privileged: Rc<RefCell<Option<bool>>>,
}

impl FakeSession {
    /// Roles not loaded yet.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let session = Self::default();
        session.load(roles);
        session
    }

    /// Host reports its own privilege verdict.
    pub fn privileged(self, privileged: bool) -> Self {
        *self.privileged.borrow_mut() = Some(privileged);
        self
    }

    pub fn load<I, S>(&self, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.roles.borrow_mut() = Some(roles.into_iter().map(Into::into).collect());
    }
}

impl SessionSource for FakeSession {
    fn current_roles(&self) -> Option<BTreeSet<String>> {
        self.roles.borrow().clone()
    }

    fn is_privileged(&self) -> Option<bool> {
        *self.privileged.borrow()
    }
}

// ---------- Router ----------

#[derive(Default)]
struct RouterState {
    route: String,
    navigations: Vec<String>,
    ignore_navigation: bool,
}

/// Router whose navigation updates the route and notifies listeners
/// synchronously.
#[derive(Clone, Default)]
pub struct FakeRouter {
    state: Rc<RefCell<RouterState>>,
    listeners: Rc<RefCell<Vec<Callback>>>,
}

impl FakeRouter {
    pub fn new(route: &str) -> Self {
        let router = Self::default();
        router.state.borrow_mut().route = route.to_string();
        router
    }

    /// Simulate the user navigating.
    pub fn set_route(&self, route: &str) {
        self.state.borrow_mut().route = route.to_string();
        fire(&self.listeners);
    }

    /// Record navigation requests without acting on them.
    pub fn ignore_navigation(&self, ignore: bool) {
        self.state.borrow_mut().ignore_navigation = ignore;
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.borrow().navigations.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl Router for FakeRouter {
    fn current_route(&self) -> String {
        self.state.borrow().route.clone()
    }

    fn navigate_to(&self, route: &str) {
        let ignore = {
            let mut state = self.state.borrow_mut();
            state.navigations.push(route.to_string());
            state.ignore_navigation
        };
        if !ignore {
            self.set_route(route);
        }
    }

    fn on_route_change(&self, callback: Callback) {
        self.listeners.borrow_mut().push(callback);
    }
}

// ---------- UI tree ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeNode {
    pub label: Option<String>,
    pub kind: ItemKind,
    /// Navigable item (false for list containers)
    pub navigable: bool,
    pub container: Option<ElementId>,
    pub hidden: bool,
    pub disabled: bool,
    pub hide_calls: u32,
}

#[derive(Default)]
struct TreeState {
    next_id: u64,
    nodes: BTreeMap<ElementId, FakeNode>,
    rejecting: HashSet<ElementId>,
    detach_on_query: HashSet<ElementId>,
    reject_suppression: bool,
    suppression_installs: Vec<Vec<Suppression>>,
}

impl TreeState {
    fn insert(&mut self, node: FakeNode) -> ElementId {
        self.next_id += 1;
        let id = ElementId(self.next_id);
        self.nodes.insert(id, node);
        id
    }
}

#[derive(Clone, Default)]
pub struct FakeTree {
    state: Rc<RefCell<TreeState>>,
    observers: Rc<RefCell<Vec<Callback>>>,
    menu_listeners: Rc<RefCell<Vec<Callback>>>,
    on_next_hide: Rc<RefCell<Option<Task>>>,
}

impl FakeTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn item(label: Option<&str>, kind: ItemKind, container: Option<ElementId>) -> FakeNode {
        FakeNode {
            label: label.map(str::to_string),
            kind,
            navigable: true,
            container,
            hidden: false,
            disabled: false,
            hide_calls: 0,
        }
    }

    pub fn add_item(&self, label: &str, kind: ItemKind) -> ElementId {
        self.state
            .borrow_mut()
            .insert(Self::item(Some(label), kind, None))
    }

    /// Add an item wrapped in its own list entry container.
    pub fn add_item_in_list(&self, label: &str, kind: ItemKind) -> ElementId {
        let mut state = self.state.borrow_mut();
        let container = state.insert(FakeNode {
            navigable: false,
            ..Self::item(None, kind, None)
        });
        state.insert(Self::item(Some(label), kind, Some(container)))
    }

    pub fn add_unlabelled_item(&self, kind: ItemKind) -> ElementId {
        self.state.borrow_mut().insert(Self::item(None, kind, None))
    }

    pub fn set_label(&self, id: ElementId, label: &str) {
        if let Some(node) = self.state.borrow_mut().nodes.get_mut(&id) {
            node.label = Some(label.to_string());
        }
    }

    pub fn remove(&self, id: ElementId) {
        self.state.borrow_mut().nodes.remove(&id);
    }

    /// Host re-render: the element is replaced by a fresh one with the
    /// same label, kind and container.
    pub fn replace(&self, id: ElementId) -> ElementId {
        let mut state = self.state.borrow_mut();
        let Some(old) = state.nodes.remove(&id) else {
            return id;
        };
        state.insert(Self::item(old.label.as_deref(), old.kind, old.container))
    }

    /// Make hide/disable on this element fail with a shape mismatch.
    pub fn reject_mutations(&self, id: ElementId, reject: bool) {
        let mut state = self.state.borrow_mut();
        if reject {
            state.rejecting.insert(id);
        } else {
            state.rejecting.remove(&id);
        }
    }

    /// The element is listed by the next query and removed right after.
    pub fn detach_on_query(&self, id: ElementId) {
        self.state.borrow_mut().detach_on_query.insert(id);
    }

    pub fn reject_suppression(&self, reject: bool) {
        self.state.borrow_mut().reject_suppression = reject;
    }

    /// Run `task` during the next `hide` call.
    pub fn on_next_hide(&self, task: impl FnOnce() + 'static) {
        *self.on_next_hide.borrow_mut() = Some(Box::new(task));
    }

    pub fn node(&self, id: ElementId) -> Option<FakeNode> {
        self.state.borrow().nodes.get(&id).cloned()
    }

    pub fn snapshot(&self) -> Vec<(ElementId, FakeNode)> {
        self.state
            .borrow()
            .nodes
            .iter()
            .map(|(id, n)| (*id, n.clone()))
            .collect()
    }

    pub fn suppression_installs(&self) -> Vec<Vec<Suppression>> {
        self.state.borrow().suppression_installs.clone()
    }

    pub fn mutation_observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    pub fn notify_mutation(&self) {
        fire(&self.observers);
    }

    pub fn open_menu(&self) {
        fire(&self.menu_listeners);
    }

    fn mutate(&self, id: &ElementId, f: impl FnOnce(&mut FakeNode)) -> Result<(), TreeError> {
        let mut state = self.state.borrow_mut();
        if state.rejecting.contains(id) {
            return Err(TreeError::Rejected(format!("element {}", id.0)));
        }
        let node = state.nodes.get_mut(id).ok_or(TreeError::Detached)?;
        f(node);
        Ok(())
    }
}

impl UiTree for FakeTree {
    type Item = ElementId;

    fn navigable_items(&self) -> Vec<ElementId> {
        let mut state = self.state.borrow_mut();
        let items: Vec<ElementId> = state
            .nodes
            .iter()
            .filter(|(_, n)| n.navigable)
            .map(|(id, _)| *id)
            .collect();
        let detached: Vec<ElementId> = state.detach_on_query.drain().collect();
        for id in detached {
            state.nodes.remove(&id);
        }
        items
    }

    fn element_id(&self, item: &ElementId) -> Option<ElementId> {
        self.state
            .borrow()
            .nodes
            .contains_key(item)
            .then_some(*item)
    }

    fn item_kind(&self, item: &ElementId) -> ItemKind {
        self.state
            .borrow()
            .nodes
            .get(item)
            .map(|n| n.kind)
            .unwrap_or(ItemKind::Navigation)
    }

    fn visible_label(&self, item: &ElementId) -> Option<String> {
        self.state.borrow().nodes.get(item)?.label.clone()
    }

    fn enclosing_container(&self, item: &ElementId) -> Option<ElementId> {
        self.state.borrow().nodes.get(item)?.container
    }

    fn hide(&self, item: &ElementId) -> Result<(), TreeError> {
        self.mutate(item, |n| {
            n.hidden = true;
            n.hide_calls += 1;
        })?;
        let hook = self.on_next_hide.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }

    fn disable(&self, item: &ElementId) -> Result<(), TreeError> {
        self.mutate(item, |n| n.disabled = true)
    }

    fn install_suppression(&self, suppressions: &[Suppression]) -> Result<(), TreeError> {
        let mut state = self.state.borrow_mut();
        if state.reject_suppression {
            return Err(TreeError::Missing("document head".into()));
        }
        state.suppression_installs.push(suppressions.to_vec());
        Ok(())
    }

    fn observe_mutations(&self, callback: Callback) {
        self.observers.borrow_mut().push(callback);
    }

    fn on_menu_open(&self, callback: Callback) {
        self.menu_listeners.borrow_mut().push(callback);
    }
}

// ---------- Scheduler ----------

enum TimerKind {
    Once(Task),
    Interval { period: Duration, callback: Callback },
}

struct Timer {
    id: u64,
    due: Duration,
    kind: TimerKind,
}

#[derive(Default)]
struct ClockState {
    now: Duration,
    next_id: u64,
    timers: Vec<Timer>,
}

/// Virtual-time scheduler. Time only moves in [`ManualScheduler::advance`],
/// which runs due timers in deadline order (ties in registration order).
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Rc<RefCell<ClockState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// One-shot timers still waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.state
            .borrow()
            .timers
            .iter()
            .filter(|t| matches!(t.kind, TimerKind::Once(_)))
            .count()
    }

    pub fn advance(&self, by: Duration) {
        let target = self.now() + by;
        loop {
            let timer = {
                let mut state = self.state.borrow_mut();
                let next = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(i, _)| i);
                let Some(index) = next else {
                    break;
                };
                let timer = state.timers.remove(index);
                state.now = timer.due;
                timer
            };

            match timer.kind {
                TimerKind::Once(task) => task(),
                TimerKind::Interval {
                    period,
                    mut callback,
                } => {
                    callback();
                    let mut state = self.state.borrow_mut();
                    state.timers.push(Timer {
                        id: timer.id,
                        due: timer.due + period,
                        kind: TimerKind::Interval { period, callback },
                    });
                }
            }
        }
        self.state.borrow_mut().now = target;
    }

    fn push(&self, delay: Duration, kind: TimerKind) -> TimerHandle {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        let due = state.now + delay;
        state.timers.push(Timer { id, due, kind });
        TimerHandle(id)
    }
}

impl Scheduler for ManualScheduler {
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerHandle {
        self.push(delay, TimerKind::Once(task))
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        self.state.borrow_mut().timers.retain(|t| t.id != handle.0);
    }

    fn set_interval(&self, period: Duration, callback: Callback) {
        let period = period.max(Duration::from_millis(1));
        self.push(period, TimerKind::Interval { period, callback });
    }
}
