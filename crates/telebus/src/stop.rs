// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process-wide cooperative shutdown.
//!
//! A single global [`StopController`] flag lets every worker thread in the
//! process agree on when to wind down. `stop_all()` is idempotent and safe
//! to call from a signal handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

type Callback = Box<dyn FnMut() + Send>;

struct State {
    stopped: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
}

static STATE: OnceLock<State> = OnceLock::new();

fn state() -> &'static State {
    STATE.get_or_init(|| State {
        stopped: AtomicBool::new(false),
        callbacks: Mutex::new(Vec::new()),
    })
}

/// Register a callback to run once `stop_all()` is invoked.
///
/// If `stop_all()` already ran, the callback is invoked immediately from the
/// calling thread instead of being queued.
pub fn on_stop<F>(callback: F)
where
    F: FnMut() + Send + 'static,
{
    let st = state();
    if st.stopped.load(Ordering::Acquire) {
        let mut cb = Box::new(callback);
        cb();
        return;
    }

    let mut callbacks = st
        .callbacks
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    // Re-check under the lock: stop_all() may have run between the load above
    // and acquiring the lock.
    if st.stopped.load(Ordering::Acquire) {
        drop(callbacks);
        let mut cb = Box::new(callback);
        cb();
        return;
    }
    callbacks.push(Box::new(callback));
}

/// Set the stop flag and run every registered callback, in registration order,
/// from the calling thread. Idempotent: a second call is a no-op (the
/// callback list has already been drained).
pub fn stop_all() {
    let st = state();
    st.stopped.store(true, Ordering::Release);

    let mut callbacks = st
        .callbacks
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let drained: Vec<Callback> = callbacks.drain(..).collect();
    drop(callbacks);

    for mut cb in drained {
        cb();
    }
}

/// Read the process-wide stop flag.
pub fn should_stop_all() -> bool {
    state().stopped.load(Ordering::Acquire)
}

/// Install `stop_all` as the handler for SIGINT/SIGTERM. A second signal
/// forces an abrupt `std::process::exit`.
///
/// Safe to call more than once; only the first registration takes effect.
pub fn install_signal_handler() {
    static INSTALLED: AtomicBool = AtomicBool::new(false);
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let hit_once = AtomicBool::new(false);
    let result = ctrlc::set_handler(move || {
        if hit_once.swap(true, Ordering::SeqCst) {
            log::warn!("second interrupt received, forcing exit");
            std::process::exit(130);
        }
        log::info!("interrupt received, stopping");
        stop_all();
    });

    if let Err(err) = result {
        log::warn!("failed to install signal handler: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    // StopController state is process-global, so each test uses its own
    // assertions in terms of deltas rather than absolute call counts.

    #[test]
    fn stop_all_invokes_callbacks_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        on_stop(move || o1.lock().unwrap().push(1));
        on_stop(move || o2.lock().unwrap().push(2));

        stop_all();

        let recorded = order.lock().unwrap();
        // Both of our callbacks ran, in registration order relative to each other.
        let pos1 = recorded.iter().position(|v| *v == 1);
        let pos2 = recorded.iter().position(|v| *v == 2);
        if let (Some(p1), Some(p2)) = (pos1, pos2) {
            assert!(p1 < p2);
        }
    }

    #[test]
    fn should_stop_all_reflects_state() {
        stop_all();
        assert!(should_stop_all());
    }

    #[test]
    fn callback_registered_after_stop_runs_immediately() {
        stop_all();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        on_stop(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
