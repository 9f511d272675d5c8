use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use desklock_engine::host::{Callback, Scheduler, Task, TimerHandle};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::Window;

#[derive(Default)]
struct TimerTable {
    live: HashMap<i32, Closure<dyn FnMut()>>,
    /// Timers whose task has completed; their closures are dropped on the
    /// next scheduler call, never while running.
    fired: Vec<i32>,
}

/// `setTimeout`/`setInterval` on the page window.
#[derive(Clone)]
pub struct WindowScheduler {
    window: Window,
    timers: Rc<RefCell<TimerTable>>,
}

fn millis(d: Duration) -> i32 {
    i32::try_from(d.as_millis()).unwrap_or(i32::MAX)
}

impl WindowScheduler {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            timers: Rc::new(RefCell::new(TimerTable::default())),
        }
    }

    fn prune(&self) {
        let mut table = self.timers.borrow_mut();
        let fired = std::mem::take(&mut table.fired);
        for id in fired {
            table.live.remove(&id);
        }
    }
}

impl Scheduler for WindowScheduler {
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerHandle {
        self.prune();

        let timers = Rc::clone(&self.timers);
        let id = Rc::new(Cell::new(0));
        let own_id = Rc::clone(&id);
        let closure = Closure::once(move || {
            task();
            timers.borrow_mut().fired.push(own_id.get());
        });

        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                millis(delay),
            ) {
            Ok(handle) => {
                id.set(handle);
                self.timers.borrow_mut().live.insert(handle, closure);
                TimerHandle(handle as u64)
            }
            Err(e) => {
                tracing::warn!(error = ?e, "setTimeout failed, pass not scheduled");
                TimerHandle(0)
            }
        }
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        let Ok(id) = i32::try_from(handle.0) else {
            return;
        };
        self.window.clear_timeout_with_handle(id);
        self.timers.borrow_mut().live.remove(&id);
        self.prune();
    }

    fn set_interval(&self, period: Duration, mut callback: Callback) {
        let closure = Closure::<dyn FnMut()>::new(move || callback());
        let result = self
            .window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                millis(period).max(1),
            );
        match result {
            // Runs for the rest of the page session.
            Ok(_) => closure.forget(),
            Err(e) => tracing::warn!(error = ?e, "setInterval failed, periodic pass disabled"),
        }
    }
}
