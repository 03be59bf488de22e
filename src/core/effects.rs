//! Timed repeats and awaitable effects.
//!
//! Both kinds of effect run as local tasks (`tokio::task::spawn_local`),
//! so a [`LocalSet`] must be running for designs that use them. Their
//! handler chains evaluate detached: local flags, local transition budget,
//! and direct subscriber notification, never touching the in-flight
//! drain's counters.
//!
//! A repeat is cancelled (aborted) when its owning state exits. An async
//! effect is *not* cancelled; a completion that arrives after the owning
//! state exited is ignored.
//!
//! [`LocalSet`]: tokio::task::LocalSet

use std::time::Duration;

use crate::core::machine::Core;
use crate::core::node::NodeId;
use crate::timer::{Timer, TimerService, FRAME_SECS};

/// Start the repeat effect of a freshly-entered state.
///
/// The delay function is evaluated once, here, against the current data,
/// payload and result; the resulting period is clamped to the frame floor.
/// Without a delay the repeat ticks at the frame rate.
pub(crate) fn start_repeat<D: Clone + 'static>(core: &Core<D>, id: NodeId) {
    let (delay, chain) = {
        let tree = core.tree.borrow();
        let Some(repeat) = tree.node(id).repeat.as_ref() else {
            return;
        };
        (repeat.delay.clone(), repeat.on_repeat.clone())
    };
    let period = match delay {
        Some(delay_fn) => {
            let snapshot = core.data.borrow().clone();
            let payload = core.payload.borrow().clone();
            let result = core.result.borrow().clone();
            delay_fn(&snapshot, &payload, &result).max(FRAME_SECS)
        }
        None => FRAME_SECS,
    };

    let weak = core.weak_self.clone();
    let handle = tokio::task::spawn_local(async move {
        let started = tokio::time::Instant::now();
        let mut last = started;
        loop {
            Timer::sleep(Duration::from_secs_f64(period)).await;
            let Some(core) = weak.upgrade() else { return };
            if !core.tree.borrow().node(id).active {
                return;
            }
            let now = tokio::time::Instant::now();
            let tick = serde_json::json!({
                "interval": (now - last).as_secs_f64() * 1000.0,
                "elapsed": (now - started).as_secs_f64() * 1000.0,
            });
            last = now;
            *core.result.borrow_mut() = tick;
            core.run_detached(chain.clone()).await;
        }
    });
    core.tree.borrow_mut().node_mut(id).repeat_handle = Some(handle.abort_handle());
}

/// Launch the async effect of a freshly-entered state.
///
/// The effect function runs immediately (so it sees the entering event's
/// payload); its future is awaited on a local task and routed to the
/// resolve or reject chain when it completes.
pub(crate) fn start_task<D: Clone + 'static>(core: &Core<D>, id: NodeId) {
    let (run, on_resolve, on_reject) = {
        let tree = core.tree.borrow();
        let Some(task) = tree.node(id).task.as_ref() else {
            return;
        };
        (
            task.run.clone(),
            task.on_resolve.clone(),
            task.on_reject.clone(),
        )
    };
    let future = {
        let data = core.data.borrow().clone();
        let payload = core.payload.borrow().clone();
        let result = core.result.borrow().clone();
        run(&data, &payload, &result)
    };

    let weak = core.weak_self.clone();
    tokio::task::spawn_local(async move {
        let outcome = future.await;
        let Some(core) = weak.upgrade() else { return };
        if !core.tree.borrow().node(id).active {
            tracing::trace!("async effect completed after its state exited; ignored");
            return;
        }
        match outcome {
            Ok(value) => {
                *core.result.borrow_mut() = value;
                core.run_detached(on_resolve).await;
            }
            Err(value) => match on_reject {
                Some(chain) => {
                    *core.result.borrow_mut() = value;
                    core.run_detached(chain).await;
                }
                None => {
                    let path = core.tree.borrow().node(id).path.clone();
                    tracing::warn!(state = %path, "async effect rejected with no reject handler");
                }
            },
        }
    });
}
