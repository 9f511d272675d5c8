//! UI tree adapter over the live desk DOM.
//!
//! All host markup knowledge lives here. Selectors track Frappe v16 desk
//! markup and need revisiting whenever the host changes its rendering.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use desklock_engine::errors::TreeError;
use desklock_engine::host::{Callback, UiTree};
use desklock_engine::types::{ElementId, ItemKind, NeutralizeMode, Suppression};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, Event, HtmlElement, KeyboardEvent};

/// Navigable items: dropdown/context menu entries and sidebar links.
const NAV_ITEM_SELECTOR: &str = ".dropdown-menu .dropdown-item, \
    .dropdown-menu-item, \
    .frappe-menu [role=\"menuitem\"], \
    .context-menu .menu-item, \
    .sidebar-item, \
    .standard-sidebar-item, \
    .sidebar-menu-item, \
    .desk-sidebar li > a";

const DROPDOWN_SELECTOR: &str = ".dropdown-menu, .frappe-menu, .context-menu";

const LABEL_SELECTOR: &str = ".menu-item-title, .sidebar-item-label";

const CONTAINER_SELECTOR: &str = "li, .sidebar-item-container";

/// Elements whose click opens the user/account menu.
const MENU_TOGGLE_SELECTOR: &str = ".navbar-user, .sidebar-toggle, .user-avatar, .user-image";

const NEUTRALIZED_ATTR: &str = "data-desklock-neutralized";

const SUPPRESSION_STYLE_ID: &str = "desklock-suppression";

/// Quote a value for use inside a CSS attribute selector.
fn css_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Stylesheet implementing the global suppressions.
pub fn suppression_css(suppressions: &[Suppression]) -> String {
    let mut css = String::new();
    for s in suppressions {
        let mut selectors = vec![
            format!("[data-label={}]", css_string(&s.label)),
            format!("[data-label={}]", css_string(&s.label.to_lowercase())),
        ];
        if let Some(slug) = &s.route_slug {
            selectors.push(format!("a[href*={}]", css_string(slug)));
            selectors.push(format!("li:has(a[href*={}])", css_string(slug)));
        }
        let body = match s.mode {
            NeutralizeMode::Hide => "display: none !important;",
            NeutralizeMode::Disable => "pointer-events: none !important; cursor: default !important;",
        };
        css.push_str(&selectors.join(",\n"));
        css.push_str(" {\n  ");
        css.push_str(body);
        css.push_str("\n}\n");
    }
    css
}

/// Selector for elements a `Disable` suppression covers, for the
/// activation guard. Leaves out `:has()` so `closest` never rejects it.
pub fn disabled_suppression_selector(suppressions: &[Suppression]) -> Option<String> {
    let selectors: Vec<String> = suppressions
        .iter()
        .filter(|s| s.mode == NeutralizeMode::Disable)
        .flat_map(|s| {
            let mut sel = vec![
                format!("[data-label={}]", css_string(&s.label)),
                format!("[data-label={}]", css_string(&s.label.to_lowercase())),
            ];
            if let Some(slug) = &s.route_slug {
                sel.push(format!("a[href*={}]", css_string(slug)));
            }
            sel
        })
        .collect();
    (!selectors.is_empty()).then(|| selectors.join(", "))
}

fn set_important(element: &Element, property: &str, value: &str) -> Result<(), TreeError> {
    let html = element
        .dyn_ref::<HtmlElement>()
        .ok_or_else(|| TreeError::Missing("style".into()))?;
    html.style()
        .set_property_with_priority(property, value, "important")
        .map_err(|e| TreeError::Rejected(format!("{e:?}")))
}

#[derive(Clone)]
pub struct DomTree {
    document: Document,
    /// Element -> ElementId, without keeping elements alive
    ids: js_sys::WeakMap,
    next_id: Rc<Cell<u64>>,
    guard_installed: Rc<Cell<bool>>,
    /// Elements whose activation the guard swallows
    guard_selector: Rc<RefCell<String>>,
    /// Keeps permanent listeners reachable from Rust for the page lifetime.
    listeners: Rc<RefCell<Vec<Closure<dyn FnMut(Event)>>>>,
}

impl DomTree {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            ids: js_sys::WeakMap::new(),
            next_id: Rc::new(Cell::new(0)),
            guard_installed: Rc::new(Cell::new(false)),
            guard_selector: Rc::new(RefCell::new(format!("[{NEUTRALIZED_ATTR}]"))),
            listeners: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn attached(&self, element: &Element) -> Result<(), TreeError> {
        if element.is_connected() {
            Ok(())
        } else {
            Err(TreeError::Detached)
        }
    }

    fn listen(&self, event: &str, capture: bool, handler: impl FnMut(Event) + 'static) {
        let closure = Closure::<dyn FnMut(Event)>::new(handler);
        let result = self.document.add_event_listener_with_callback_and_bool(
            event,
            closure.as_ref().unchecked_ref(),
            capture,
        );
        match result {
            Ok(()) => self.listeners.borrow_mut().push(closure),
            Err(e) => tracing::warn!(event, error = ?e, "could not register listener"),
        }
    }

    /// Capture-phase listeners on the document run before any handler the
    /// host attaches to the item itself, so neutralized items stay inert
    /// even after the host re-binds them.
    fn install_activation_guard(&self) {
        if self.guard_installed.replace(true) {
            return;
        }
        for event in ["click", "auxclick", "mousedown", "touchstart", "keydown"] {
            let selector = Rc::clone(&self.guard_selector);
            self.listen(event, true, move |ev: Event| {
                if let Some(key) = ev.dyn_ref::<KeyboardEvent>() {
                    if key.key() != "Enter" && key.key() != " " {
                        return;
                    }
                }
                let hit = ev
                    .target()
                    .and_then(|t| t.dyn_into::<Element>().ok())
                    .and_then(|el| el.closest(&selector.borrow()).ok().flatten());
                if hit.is_some() {
                    ev.prevent_default();
                    ev.stop_immediate_propagation();
                }
            });
        }
    }
}

impl UiTree for DomTree {
    type Item = Element;

    fn navigable_items(&self) -> Vec<Element> {
        let Ok(list) = self.document.query_selector_all(NAV_ITEM_SELECTOR) else {
            return Vec::new();
        };
        (0..list.length())
            .filter_map(|i| list.item(i))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect()
    }

    fn element_id(&self, item: &Element) -> Option<ElementId> {
        if !item.is_connected() {
            return None;
        }
        if let Some(id) = self.ids.get(item).as_f64() {
            return Some(ElementId(id as u64));
        }
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.ids.set(item, &JsValue::from_f64(id as f64));
        Some(ElementId(id))
    }

    fn item_kind(&self, item: &Element) -> ItemKind {
        match item.closest(DROPDOWN_SELECTOR) {
            Ok(Some(_)) => ItemKind::Dropdown,
            _ => ItemKind::Navigation,
        }
    }

    fn visible_label(&self, item: &Element) -> Option<String> {
        let title = item.query_selector(LABEL_SELECTOR).ok().flatten();
        let source = title.as_ref().unwrap_or(item);
        let text = match source.dyn_ref::<HtmlElement>() {
            Some(html) => html.inner_text(),
            None => source.text_content().unwrap_or_default(),
        };
        if !text.trim().is_empty() {
            return Some(text);
        }
        item.get_attribute("data-label")
    }

    fn enclosing_container(&self, item: &Element) -> Option<Element> {
        let container = item
            .parent_element()?
            .closest(CONTAINER_SELECTOR)
            .ok()
            .flatten()?;
        // An `li` around the item's whole menu is the menu's navbar entry,
        // not the item's row.
        if let Ok(Some(menu)) = item.closest(DROPDOWN_SELECTOR) {
            if container.contains(Some(menu.as_ref())) {
                return None;
            }
        }
        Some(container)
    }

    fn hide(&self, item: &Element) -> Result<(), TreeError> {
        self.attached(item)?;
        set_important(item, "display", "none")?;
        item.set_attribute("aria-hidden", "true")
            .map_err(|e| TreeError::Rejected(format!("{e:?}")))
    }

    fn disable(&self, item: &Element) -> Result<(), TreeError> {
        self.attached(item)?;
        self.install_activation_guard();
        let reject = |e: JsValue| TreeError::Rejected(format!("{e:?}"));
        item.set_attribute(NEUTRALIZED_ATTR, "true").map_err(reject)?;
        item.set_attribute("aria-disabled", "true").map_err(reject)?;
        item.set_attribute("tabindex", "-1").map_err(reject)?;
        set_important(item, "pointer-events", "none")
    }

    fn install_suppression(&self, suppressions: &[Suppression]) -> Result<(), TreeError> {
        // CSS alone leaves keyboard activation open for disabled targets.
        if let Some(selector) = disabled_suppression_selector(suppressions) {
            let mut guard = self.guard_selector.borrow_mut();
            if !guard.contains(&selector) {
                guard.push_str(", ");
                guard.push_str(&selector);
            }
            drop(guard);
            self.install_activation_guard();
        }
        // A second client instance on the same page finds the first one's sheet.
        if self.document.get_element_by_id(SUPPRESSION_STYLE_ID).is_some() {
            return Ok(());
        }
        let head = self
            .document
            .head()
            .ok_or_else(|| TreeError::Missing("document head".into()))?;
        let style = self
            .document
            .create_element("style")
            .map_err(|e| TreeError::Rejected(format!("{e:?}")))?;
        style.set_id(SUPPRESSION_STYLE_ID);
        style.set_text_content(Some(&suppression_css(suppressions)));
        head.append_child(&style)
            .map_err(|e| TreeError::Rejected(format!("{e:?}")))?;
        Ok(())
    }

    fn observe_mutations(&self, mut callback: Callback) {
        let Some(body) = self.document.body() else {
            tracing::warn!("document body missing, mutation watcher not installed");
            return;
        };
        let closure = Closure::<dyn FnMut(js_sys::Array, web_sys::MutationObserver)>::new(
            move |_records: js_sys::Array, _observer: web_sys::MutationObserver| callback(),
        );
        let observer = match web_sys::MutationObserver::new(closure.as_ref().unchecked_ref()) {
            Ok(observer) => observer,
            Err(e) => {
                tracing::warn!(error = ?e, "could not create mutation observer");
                return;
            }
        };
        let init = web_sys::MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        if let Err(e) = observer.observe_with_options(&body, &init) {
            tracing::warn!(error = ?e, "could not observe document body");
            return;
        }
        // Observer and callback live for the rest of the page session.
        closure.forget();
    }

    fn on_menu_open(&self, mut callback: Callback) {
        self.listen("click", true, move |ev: Event| {
            let opened = ev
                .target()
                .and_then(|t| t.dyn_into::<Element>().ok())
                .and_then(|el| el.closest(MENU_TOGGLE_SELECTOR).ok().flatten())
                .is_some();
            if opened {
                callback();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppression_css_hide_with_slug() {
        let css = suppression_css(&[Suppression {
            label: "User Settings".into(),
            route_slug: Some("user-settings".into()),
            mode: NeutralizeMode::Hide,
        }]);
        assert!(css.contains("[data-label=\"User Settings\"]"));
        assert!(css.contains("[data-label=\"user settings\"]"));
        assert!(css.contains("a[href*=\"user-settings\"]"));
        assert!(css.contains("li:has(a[href*=\"user-settings\"])"));
        assert!(css.contains("display: none !important;"));
    }

    #[test]
    fn test_disabled_suppression_selector() {
        let suppressions = [
            Suppression {
                label: "User Settings".into(),
                route_slug: Some("user-settings".into()),
                mode: NeutralizeMode::Hide,
            },
            Suppression {
                label: "Website".into(),
                route_slug: Some("website".into()),
                mode: NeutralizeMode::Disable,
            },
        ];
        let selector = disabled_suppression_selector(&suppressions).unwrap();
        assert_eq!(
            selector,
            "[data-label=\"Website\"], [data-label=\"website\"], a[href*=\"website\"]"
        );
        assert!(!selector.contains("user-settings"));
        assert!(!selector.contains(":has"));
        assert!(disabled_suppression_selector(&suppressions[..1]).is_none());
    }

    #[wasm_bindgen_test::wasm_bindgen_test]
    fn test_dropdown_item_container_stays_inside_menu() {
        let document = web_sys::window().unwrap().document().unwrap();
        let root = document.create_element("div").unwrap();
        root.set_inner_html(
            r#"<ul class="navbar-nav">
                 <li class="nav-item dropdown" id="nav-entry">
                   <div class="dropdown-menu">
                     <a class="dropdown-item" id="lone">Help</a>
                     <ul><li id="row"><a class="dropdown-item" id="listed">About</a></li></ul>
                   </div>
                 </li>
               </ul>
               <ul>
                 <li class="sidebar-item-container" id="side-row">
                   <a class="sidebar-item" id="side">Selling</a>
                 </li>
               </ul>"#,
        );
        document.body().unwrap().append_child(&root).unwrap();
        let tree = DomTree::new(document.clone());
        let by_id = |id: &str| document.get_element_by_id(id).unwrap();

        assert!(tree.enclosing_container(&by_id("lone")).is_none());
        assert_eq!(
            tree.enclosing_container(&by_id("listed")).map(|e| e.id()),
            Some("row".to_string())
        );
        assert_eq!(
            tree.enclosing_container(&by_id("side")).map(|e| e.id()),
            Some("side-row".to_string())
        );
        root.remove();
    }

    #[test]
    fn test_suppression_css_disable_mode() {
        let css = suppression_css(&[Suppression {
            label: "Say \"Hi\"".into(),
            route_slug: None,
            mode: NeutralizeMode::Disable,
        }]);
        assert!(css.contains("[data-label=\"Say \\\"Hi\\\"\"]"));
        assert!(css.contains("pointer-events: none !important;"));
        assert!(!css.contains("display: none"));
        assert!(!css.contains("href"));
    }
}
