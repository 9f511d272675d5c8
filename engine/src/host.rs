//! Boundary to the host application.
//!
//! The engine never owns the session, the router or the UI tree; it reaches
//! them only through these traits. Host-version specific selectors and
//! globals belong in the implementations, never in the engine.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::errors::TreeError;
use crate::types::{ElementId, ItemKind, Suppression};

/// Repeatable callback registered with a host event source.
pub type Callback = Box<dyn FnMut()>;

/// One-shot deferred task.
pub type Task = Box<dyn FnOnce()>;

pub trait SessionSource {
    /// The user's roles, or `None` while the host has not loaded them yet.
    fn current_roles(&self) -> Option<BTreeSet<String>>;

    /// The host's own privilege verdict. `None` lets the engine derive it
    /// from the policy table's bypass roles.
    fn is_privileged(&self) -> Option<bool> {
        None
    }
}

pub trait Router {
    /// Current route, slash-delimited, in host encoding.
    fn current_route(&self) -> String;

    /// Request programmatic navigation.
    fn navigate_to(&self, route: &str);

    /// Fires after the host's route state changes, possibly before the new
    /// route has finished rendering.
    fn on_route_change(&self, callback: Callback);
}

/// Query and mutation surface over the host-rendered UI tree.
///
/// Every operation may observe a tree that changed since the last call; an
/// element that disappeared is reported as [`TreeError::Detached`] or simply
/// yields `None`, never a panic.
pub trait UiTree {
    type Item: Clone;

    /// All currently rendered navigable items that expose a visible label.
    fn navigable_items(&self) -> Vec<Self::Item>;

    /// Stable identity of the element, while it stays attached.
    fn element_id(&self, item: &Self::Item) -> Option<ElementId>;

    fn item_kind(&self, item: &Self::Item) -> ItemKind;

    /// Raw visible label; the engine trims and lower-cases it.
    fn visible_label(&self, item: &Self::Item) -> Option<String>;

    /// Nearest enclosing list entry or row, if any.
    fn enclosing_container(&self, item: &Self::Item) -> Option<Self::Item>;

    /// Remove the element's layout presence.
    fn hide(&self, item: &Self::Item) -> Result<(), TreeError>;

    /// Make activating the element (pointer, keyboard, touch) a no-op.
    fn disable(&self, item: &Self::Item) -> Result<(), TreeError>;

    /// Install a persistent override for the given global suppressions.
    fn install_suppression(&self, suppressions: &[Suppression]) -> Result<(), TreeError>;

    /// Fires after structural changes anywhere under the tree root.
    fn observe_mutations(&self, callback: Callback);

    /// Fires when the user opens the account/user menu. Hosts without such
    /// a signal may ignore the registration.
    fn on_menu_open(&self, callback: Callback) {
        drop(callback);
    }
}

/// Handle of a pending one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

pub trait Scheduler {
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerHandle;

    fn clear_timeout(&self, handle: TimerHandle);

    /// Run `callback` every `period` for the rest of the page session.
    fn set_interval(&self, period: Duration, callback: Callback);
}
