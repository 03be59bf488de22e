//! Handler-chain evaluation and transition execution.
//!
//! Chains evaluate against a draft of the committed data: actions mutate
//! the draft, and the draft commits once per chain evaluation, before any
//! transition cascade, so exit/enter chains observe post-action data. The
//! scratch `result` flows item to item and across the chains of a single
//! dispatch, resetting at each event.
//!
//! A [`Scope`] carries the dispatch-local observation flags and the
//! transition budget. Detached evaluations (repeat ticks, async
//! completions) get a scope of their own, so their activity notifies
//! subscribers directly without counting against the in-flight drain.

use std::cell::Cell;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::core::design::Event;
use crate::core::effects;
use crate::core::handler::Chain;
use crate::core::machine::{Core, MachineError};
use crate::core::node::{NodeId, ROOT};
use crate::core::MAX_TRANSITIONS;
use crate::timer::{Timer, TimerService};

/// Dispatch-local observation flags; they decide whether subscribers are
/// notified when the dispatch completes.
#[derive(Default)]
pub(crate) struct Flags {
    pub did_action: Cell<bool>,
    pub did_transition: Cell<bool>,
}

/// Transitions performed so far under one scope.
#[derive(Default)]
pub(crate) struct Budget {
    pub transitions: Cell<usize>,
}

/// Borrowed evaluation context threaded through a dispatch (or one
/// detached evaluation).
#[derive(Clone, Copy)]
pub(crate) struct Scope<'s> {
    pub flags: &'s Flags,
    pub budget: &'s Budget,
}

impl<D: Clone + 'static> Core<D> {
    /// Process one event: propagate it down the active tree, then notify
    /// subscribers if anything observable happened.
    pub(crate) async fn dispatch(&self, event: Event) -> Result<(), MachineError> {
        tracing::debug!(event = %event.name, "dispatching event");
        *self.payload.borrow_mut() = event.payload.clone();
        *self.result.borrow_mut() = Value::Null;
        let flags = Flags::default();
        let budget = Budget::default();
        let scope = Scope {
            flags: &flags,
            budget: &budget,
        };
        let outcome = self.propagate(ROOT, &event.name, scope).await;
        *self.payload.borrow_mut() = Value::Null;
        if flags.did_action.get() || flags.did_transition.get() {
            self.notify();
        }
        outcome
    }

    /// Recursive event propagation: the state's `on` chain, then its
    /// `onEvent` chain, then each active child in declaration order, each
    /// step short-circuiting once a transition has been observed.
    fn propagate<'a>(
        &'a self,
        id: NodeId,
        event: &'a str,
        scope: Scope<'a>,
    ) -> LocalBoxFuture<'a, Result<(), MachineError>> {
        Box::pin(async move {
            let (active, on_chain, on_event_chain, children) = {
                let tree = self.tree.borrow();
                let node = tree.node(id);
                (
                    node.active,
                    node.on.get(event).cloned(),
                    node.on_event.clone(),
                    node.children.clone(),
                )
            };
            if !active {
                return Ok(());
            }
            if let Some(chain) = on_chain {
                self.run_chain(chain, scope).await?;
                if scope.flags.did_transition.get() {
                    return Ok(());
                }
            }
            if let Some(chain) = on_event_chain {
                self.run_chain(chain, scope).await?;
                if scope.flags.did_transition.get() {
                    return Ok(());
                }
            }
            for child in children {
                self.propagate(child, event, scope).await?;
                if scope.flags.did_transition.get() {
                    return Ok(());
                }
            }
            Ok(())
        })
    }

    /// Evaluate one handler chain. Runs the transactional draft, performs
    /// internal sends, and executes a recorded transition after commit.
    pub(crate) fn run_chain<'a>(
        &'a self,
        chain: Chain<D>,
        scope: Scope<'a>,
    ) -> LocalBoxFuture<'a, Result<(), MachineError>> {
        Box::pin(async move {
            let snapshot = self.data.borrow().clone();
            let payload = self.payload.borrow().clone();
            let mut draft: Option<D> = None;
            let mut pending: Option<(crate::core::design::TargetFn<D>, bool)> = None;

            for item in &chain.items {
                for get in &item.get {
                    let result = self.result.borrow().clone();
                    let next = get(draft.as_ref().unwrap_or(&*snapshot), &payload, &result);
                    *self.result.borrow_mut() = next;
                }

                let passed = {
                    let result = self.result.borrow().clone();
                    let data = draft.as_ref().unwrap_or(&*snapshot);
                    item.if_all.iter().all(|cond| cond(data, &payload, &result))
                        && (item.if_any.is_empty()
                            || item.if_any.iter().any(|cond| cond(data, &payload, &result)))
                        && item.unless.iter().all(|cond| !cond(data, &payload, &result))
                };

                // The wait runs after the guards and before either branch.
                if let Some(wait) = &item.wait {
                    let secs = {
                        let result = self.result.borrow().clone();
                        wait(draft.as_ref().unwrap_or(&*snapshot), &payload, &result)
                    };
                    if secs > 0.0 {
                        Timer::sleep(Duration::from_secs_f64(secs)).await;
                    }
                }

                if passed {
                    if !item.actions.is_empty() {
                        let result = self.result.borrow().clone();
                        let data = draft.get_or_insert_with(|| (*snapshot).clone());
                        for act in &item.actions {
                            act(data, &payload, &result);
                        }
                        scope.flags.did_action.set(true);
                    }
                    if !item.secret_actions.is_empty() {
                        let result = self.result.borrow().clone();
                        let data = draft.get_or_insert_with(|| (*snapshot).clone());
                        for act in &item.secret_actions {
                            act(data, &payload, &result);
                        }
                    }
                    if let Some(send) = &item.send {
                        let result = self.result.borrow().clone();
                        let event = send(draft.as_ref().unwrap_or(&*snapshot), &payload, &result);
                        self.queue.borrow_mut().push_back(event);
                    }
                    if let Some(to) = &item.to {
                        pending = Some((to.clone(), false));
                        break;
                    }
                    if let Some(to) = &item.secret_to {
                        pending = Some((to.clone(), true));
                        break;
                    }
                } else {
                    if !item.else_actions.is_empty() {
                        let result = self.result.borrow().clone();
                        let data = draft.get_or_insert_with(|| (*snapshot).clone());
                        for act in &item.else_actions {
                            act(data, &payload, &result);
                        }
                        scope.flags.did_action.set(true);
                    }
                    if let Some(send) = &item.else_send {
                        let result = self.result.borrow().clone();
                        let event = send(draft.as_ref().unwrap_or(&*snapshot), &payload, &result);
                        self.queue.borrow_mut().push_back(event);
                    }
                    if let Some(to) = &item.else_to {
                        pending = Some((to.clone(), false));
                        break;
                    }
                }
            }

            if let Some(data) = draft.take() {
                *self.data.borrow_mut() = std::rc::Rc::new(data);
            }

            if let Some((target, secret)) = pending {
                let path = {
                    let data = self.data.borrow().clone();
                    let result = self.result.borrow().clone();
                    target(&data, &payload, &result)
                };
                if !secret {
                    scope.flags.did_transition.set(true);
                }
                self.run_transition(&path, scope).await?;
            }
            Ok(())
        })
    }

    /// Perform a transition to the deepest state matching `raw_path`.
    ///
    /// The whole tree is deactivated (recording history) and reactivated
    /// along the target path; the exit/enter cascade runs over the diff,
    /// outermost-first. A nested transition raised by an exit or enter
    /// chain aborts the remainder of this one.
    pub(crate) fn run_transition<'a>(
        &'a self,
        raw_path: &'a str,
        scope: Scope<'a>,
    ) -> LocalBoxFuture<'a, Result<(), MachineError>> {
        Box::pin(async move {
            let performed = scope.budget.transitions.get();
            if performed >= MAX_TRANSITIONS {
                tracing::warn!(
                    path = raw_path,
                    transitions = performed,
                    "transition loop detected; terminating drain"
                );
                return Err(MachineError::LoopDetected {
                    transitions: performed,
                });
            }
            scope.budget.transitions.set(performed + 1);

            let (query, is_previous, is_restore) =
                if let Some(stripped) = raw_path.strip_suffix(".previous") {
                    (stripped, true, false)
                } else if let Some(stripped) = raw_path.strip_suffix(".restore") {
                    (stripped, false, true)
                } else {
                    (raw_path, false, false)
                };

            let target = self.tree.borrow().find_transition_targets(query).pop();
            let Some(target) = target else {
                tracing::warn!(path = query, "no such state; transition skipped");
                return Ok(());
            };

            let (exited, entered) = {
                let mut tree = self.tree.borrow_mut();
                let target_path = tree.node(target).path.clone();
                let prefix = format!("{}.root", self.id);
                let below = target_path.strip_prefix(prefix.as_str()).unwrap_or("");
                let path_down: Vec<String> = below
                    .split('.')
                    .filter(|segment| !segment.is_empty())
                    .map(String::from)
                    .collect();

                let before = tree.active_ids();
                tree.deactivate(ROOT);
                tree.activate(ROOT, &path_down, is_previous, is_restore);
                let after = tree.active_ids();

                let exited: Vec<NodeId> = before
                    .iter()
                    .copied()
                    .filter(|id| !after.contains(id))
                    .collect();
                let entered: Vec<NodeId> = after
                    .iter()
                    .copied()
                    .filter(|id| !before.contains(id))
                    .collect();
                tracing::trace!(
                    path = %target_path,
                    exited = exited.len(),
                    entered = entered.len(),
                    "transition"
                );
                (exited, entered)
            };

            // Exit phase: stop effects on every exited state up front, then
            // run the exit chains outermost-first.
            {
                let mut tree = self.tree.borrow_mut();
                for &id in &exited {
                    if let Some(handle) = tree.node_mut(id).repeat_handle.take() {
                        handle.abort();
                    }
                }
            }
            let mark = scope.budget.transitions.get();
            for &id in &exited {
                let chain = self.tree.borrow().node(id).on_exit.clone();
                if let Some(chain) = chain {
                    self.run_chain(chain, scope).await?;
                    if scope.budget.transitions.get() != mark {
                        return Ok(());
                    }
                }
            }

            // Enter phase, outermost-first: start the repeat, run the
            // entry chain, launch the async effect.
            for &id in &entered {
                if self.tree.borrow().node(id).repeat.is_some() {
                    effects::start_repeat(self, id);
                }
                let chain = self.tree.borrow().node(id).on_enter.clone();
                if let Some(chain) = chain {
                    self.run_chain(chain, scope).await?;
                    if scope.budget.transitions.get() != mark {
                        return Ok(());
                    }
                }
                if self.tree.borrow().node(id).task.is_some() {
                    effects::start_task(self, id);
                }
            }
            Ok(())
        })
    }

    /// Evaluate a chain outside the drain, with local flags and budget.
    /// Used by repeat ticks and async completions; notifies subscribers
    /// directly and drives any events the chain enqueued.
    pub(crate) async fn run_detached(&self, chain: Chain<D>) {
        let flags = Flags::default();
        let budget = Budget::default();
        let scope = Scope {
            flags: &flags,
            budget: &budget,
        };
        if let Err(err) = self.run_chain(chain, scope).await {
            tracing::warn!(error = %err, "detached handler chain aborted");
        }
        if flags.did_action.get() || flags.did_transition.get() {
            self.notify();
        }
        if !self.queue.borrow().is_empty() && !self.draining.get() {
            self.draining.set(true);
            if let Err(err) = self.drive().await {
                tracing::warn!(error = %err, "drain started by detached handler failed");
            }
        }
    }
}
