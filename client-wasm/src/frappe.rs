//! Session and router adapters over the `window.frappe` global.

use std::collections::BTreeSet;

use desklock_engine::host::{Callback, Router, SessionSource};
use js_sys::{Array, Function, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::Window;

/// Desk routes live under this path prefix.
const DESK_PATH_PREFIX: &str = "/app/";

fn get(target: &JsValue, key: &str) -> Option<JsValue> {
    let value = Reflect::get(target, &JsValue::from_str(key)).ok()?;
    if value.is_undefined() || value.is_null() {
        None
    } else {
        Some(value)
    }
}

fn frappe(window: &Window) -> Option<JsValue> {
    get(window, "frappe")
}

/// Desk route from a location path: `/app/sales-order/SO-1` -> `sales-order/SO-1`.
pub fn route_from_path(path: &str) -> String {
    path.strip_prefix(DESK_PATH_PREFIX)
        .or_else(|| path.strip_prefix("/app"))
        .unwrap_or(path)
        .trim_matches('/')
        .to_string()
}

/// Reads `frappe.user_roles`, which the host fills in during boot.
#[derive(Clone)]
pub struct FrappeSession {
    window: Window,
}

impl FrappeSession {
    pub fn new(window: Window) -> Self {
        Self { window }
    }
}

impl SessionSource for FrappeSession {
    fn current_roles(&self) -> Option<BTreeSet<String>> {
        let frappe = frappe(&self.window)?;
        let roles = get(&frappe, "user_roles")?;
        if !Array::is_array(&roles) {
            return None;
        }
        Some(
            Array::from(&roles)
                .iter()
                .filter_map(|r| r.as_string())
                .collect(),
        )
    }
}

#[derive(Clone)]
pub struct FrappeRouter {
    window: Window,
}

impl FrappeRouter {
    pub fn new(window: Window) -> Self {
        Self { window }
    }

    fn call_frappe(&self, name: &str, arg: &JsValue) -> Result<JsValue, JsValue> {
        let frappe = frappe(&self.window).ok_or_else(|| JsValue::from_str("frappe not loaded"))?;
        let func: Function = get(&frappe, name)
            .and_then(|f| f.dyn_into::<Function>().ok())
            .ok_or_else(|| JsValue::from_str(&format!("frappe.{name} is not a function")))?;
        if arg.is_undefined() {
            func.call0(&frappe)
        } else {
            func.call1(&frappe, arg)
        }
    }
}

impl Router for FrappeRouter {
    fn current_route(&self) -> String {
        if let Ok(route) = self.call_frappe("get_route_str", &JsValue::UNDEFINED) {
            if let Some(route) = route.as_string() {
                return route;
            }
        }
        self.window
            .location()
            .pathname()
            .map(|p| route_from_path(&p))
            .unwrap_or_default()
    }

    fn navigate_to(&self, route: &str) {
        if let Err(e) = self.call_frappe("set_route", &JsValue::from_str(route)) {
            tracing::warn!(route, error = ?e, "frappe.set_route unavailable, navigation skipped");
        }
    }

    fn on_route_change(&self, mut callback: Callback) {
        let closure = Closure::<dyn FnMut()>::new(move || callback());

        let router = frappe(&self.window).and_then(|f| get(&f, "router"));
        let on = router
            .as_ref()
            .and_then(|r| get(r, "on"))
            .and_then(|f| f.dyn_into::<Function>().ok());

        let subscribed = match (router, on) {
            (Some(router), Some(on)) => on
                .call2(&router, &JsValue::from_str("change"), closure.as_ref())
                .is_ok(),
            _ => false,
        };

        if !subscribed {
            // Older desks: fall back to history navigation.
            tracing::debug!("frappe.router.on unavailable, listening to popstate");
            if let Err(e) = self
                .window
                .add_event_listener_with_callback("popstate", closure.as_ref().unchecked_ref())
            {
                tracing::warn!(error = ?e, "could not subscribe to route changes");
                return;
            }
        }
        // Subscription lasts for the rest of the page session.
        closure.forget();
    }
}
