//! Browser entry point: runs the desklock engine inside the desk page.
//!
//! ```js
//! import init, { start } from "/assets/desklock/desklock_client_wasm.js";
//! await init();
//! start(await (await fetch("/assets/desklock/policy.json")).text());
//! ```

pub mod dom;
pub mod frappe;
pub mod timers;

use std::cell::RefCell;

use desklock_engine::loader::validate_table;
use desklock_engine::reconcile::Reconciler;
use desklock_engine::PolicyBundle;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::dom::DomTree;
use crate::frappe::{FrappeRouter, FrappeSession};
use crate::timers::WindowScheduler;

type DeskReconciler = Reconciler<FrappeSession, FrappeRouter, DomTree, WindowScheduler>;

thread_local! {
    // One loop per page; it lives until the page unloads.
    static ENGINE: RefCell<Option<DeskReconciler>> = const { RefCell::new(None) };
}

fn init_logging() {
    console_error_panic_hook::set_once();
    // Already installed when the page loads the client twice.
    let _ = tracing_wasm::try_set_as_global_default();
}

/// Start enforcing the policy bundle produced by `desklock bundle`.
#[wasm_bindgen]
pub fn start(bundle_json: &str) -> Result<(), JsValue> {
    init_logging();
    let bundle =
        PolicyBundle::from_json(bundle_json).map_err(|e| JsValue::from_str(&e.to_string()))?;
    launch(bundle)
}

/// Same as [`start`], taking the bundle as an already parsed JS object.
#[wasm_bindgen(js_name = startWithBundle)]
pub fn start_with_bundle(bundle: JsValue) -> Result<(), JsValue> {
    init_logging();
    let bundle: PolicyBundle = serde_wasm_bindgen::from_value(bundle)
        .map_err(|e| JsValue::from_str(&format!("Failed to decode policy bundle: {e}")))?;
    validate_table(&bundle.table).map_err(|e| JsValue::from_str(&e.to_string()))?;
    launch(bundle)
}

/// Whether the loop is installed on this page.
#[wasm_bindgen(js_name = isRunning)]
pub fn is_running() -> bool {
    ENGINE.with(|e| e.borrow().is_some())
}

fn launch(bundle: PolicyBundle) -> Result<(), JsValue> {
    if is_running() {
        tracing::warn!("desklock already running on this page, ignoring second start");
        return Ok(());
    }

    let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window object"))?;
    let document = window
        .document()
        .ok_or_else(|| JsValue::from_str("No document object"))?;

    let engine = Reconciler::new(
        bundle.table,
        bundle.timings,
        FrappeSession::new(window.clone()),
        FrappeRouter::new(window.clone()),
        DomTree::new(document.clone()),
        WindowScheduler::new(window),
    );
    ENGINE.with(|e| *e.borrow_mut() = Some(engine.clone()));

    if document.ready_state() == "loading" {
        let closure = Closure::once(move || engine.start());
        document.add_event_listener_with_callback(
            "DOMContentLoaded",
            closure.as_ref().unchecked_ref(),
        )?;
        closure.forget();
    } else {
        engine.start();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_start_rejects_invalid_bundle() {
        assert!(start("{\"table\": 42}").is_err());
    }
}
