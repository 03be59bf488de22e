//! The live state machine instance.
//!
//! A [`Machine`] is built from a [`Design`] and processes events strictly
//! one at a time: `send` enqueues onto a FIFO queue, and a single drain
//! works the queue until it is empty, running handler chains against the
//! active tree. Subscribers are notified after every event that produced a
//! visible action or transition.
//!
//! The instance is single-threaded-cooperative: it is not `Send`, and all
//! mutation happens on the calling task. Designs that use repeat or async
//! effects spawn local tasks and therefore need a
//! [`tokio::task::LocalSet`] to be running.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::Notify;

use crate::core::design::{Design, DesignError, Event};
use crate::core::exec::{Budget, Flags, Scope};
use crate::core::node::{path_matches, Tree};

/// Monotonic counter for anonymous instance ids (`#state_<n>`).
static INSTANCE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Runtime error surfaced by `send` / `init`.
///
/// Handler functions themselves are infallible by signature; an action that
/// panics unwinds out of `send` and the in-progress draft is discarded
/// (never committed). The machine should not be reused after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    /// More transitions were performed during one event dispatch than the
    /// loop budget allows; the drain was terminated early.
    LoopDetected {
        /// Transitions performed before the guard tripped.
        transitions: usize,
    },
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::LoopDetected { transitions } => write!(
                f,
                "transition loop detected: {transitions} transitions within one event dispatch"
            ),
        }
    }
}

impl std::error::Error for MachineError {}

/// Handle returned by [`Machine::on_update`]; call [`cancel`] to stop
/// receiving updates. Dropping the handle does *not* unsubscribe.
///
/// [`cancel`]: Subscription::cancel
pub struct Subscription {
    pub(crate) cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Remove the subscriber.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// A `when_in` entry value: either a plain value or a function invoked
/// only when the entry's path is active.
pub enum WhenValue {
    /// Included as-is.
    Value(Value),
    /// Invoked at inclusion time.
    Get(Rc<dyn Fn() -> Value>),
}

impl WhenValue {
    /// A plain value entry.
    pub fn of(value: impl Into<Value>) -> Self {
        WhenValue::Value(value.into())
    }

    /// A callable entry, evaluated only if included.
    pub fn with(f: impl Fn() -> Value + 'static) -> Self {
        WhenValue::Get(Rc::new(f))
    }
}

impl From<Value> for WhenValue {
    fn from(value: Value) -> Self {
        WhenValue::Value(value)
    }
}

/// Shared interior of a machine; handles ([`Machine`]) are cheap clones of
/// an `Rc` around this.
pub(crate) struct Core<D> {
    pub(crate) weak_self: Weak<Core<D>>,
    pub(crate) design: Design<D>,
    pub(crate) id: String,
    pub(crate) tree: RefCell<Tree<D>>,
    pub(crate) data: RefCell<Rc<D>>,
    pub(crate) payload: RefCell<Value>,
    pub(crate) result: RefCell<Value>,
    pub(crate) values: RefCell<HashMap<String, Value>>,
    pub(crate) queue: RefCell<VecDeque<Event>>,
    pub(crate) draining: Cell<bool>,
    pub(crate) drained: Notify,
    pub(crate) subscribers: RefCell<Vec<(usize, Rc<dyn Fn(&Machine<D>)>)>>,
    pub(crate) next_subscriber: Cell<usize>,
    pub(crate) initialized: Cell<bool>,
}

impl<D: Clone + 'static> Core<D> {
    /// Drain the queue one event at a time. The caller must have set the
    /// `draining` flag; this clears it and wakes joined senders when the
    /// queue empties (or the drain dies on a loop guard).
    pub(crate) async fn drive(&self) -> Result<(), MachineError> {
        debug_assert!(self.draining.get(), "drive() without the draining flag set");
        let mut outcome = Ok(());
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(event) = next else { break };
            if let Err(err) = self.dispatch(event).await {
                outcome = Err(err);
                break;
            }
        }
        self.draining.set(false);
        self.drained.notify_waiters();
        outcome
    }

    /// Recompute values, then hand the live instance to every subscriber.
    pub(crate) fn notify(&self) {
        self.refresh_values();
        let subscribers: Vec<Rc<dyn Fn(&Machine<D>)>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        if subscribers.is_empty() {
            return;
        }
        let Some(core) = self.weak_self.upgrade() else { return };
        let machine = Machine { core };
        for callback in subscribers {
            callback(&machine);
        }
    }

    pub(crate) fn refresh_values(&self) {
        let data = self.data.borrow().clone();
        let mut values = HashMap::with_capacity(self.design.values.len());
        for (name, compute) in &self.design.values {
            values.insert(name.clone(), compute(&data));
        }
        *self.values.borrow_mut() = values;
    }
}

/// A live statechart instance.
///
/// Cloning a `Machine` clones the *handle*: both handles drive the same
/// instance. Use [`Machine::duplicate`] for a fresh instance built from the
/// same design.
pub struct Machine<D> {
    pub(crate) core: Rc<Core<D>>,
}

impl<D> Clone for Machine<D> {
    fn clone(&self) -> Self {
        Machine {
            core: self.core.clone(),
        }
    }
}

impl<D> fmt::Debug for Machine<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.core.id)
            .field("active", &self.core.tree.borrow().active_paths())
            .finish_non_exhaustive()
    }
}

impl<D: Clone + 'static> Machine<D> {
    /// Compile a design into a fully-deactivated instance.
    ///
    /// The tree is built and every handler reference is resolved here;
    /// call [`Machine::init`] to run the initial activation.
    ///
    /// # Errors
    /// Returns [`DesignError`] for unknown library references, an `initial`
    /// that names no child, or duplicate sibling names.
    pub fn new(design: Design<D>) -> Result<Self, DesignError> {
        let id = match &design.id {
            Some(id) => format!("#{id}"),
            None => format!("#state_{}", INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1),
        };
        let tree = Tree::build(&design, &id)?;
        let data = Rc::new(design.data.clone());
        let core = Rc::new_cyclic(|weak_self| Core {
            weak_self: weak_self.clone(),
            design,
            id,
            tree: RefCell::new(tree),
            data: RefCell::new(data),
            payload: RefCell::new(Value::Null),
            result: RefCell::new(Value::Null),
            values: RefCell::new(HashMap::new()),
            queue: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            drained: Notify::new(),
            subscribers: RefCell::new(Vec::new()),
            next_subscriber: Cell::new(0),
            initialized: Cell::new(false),
        });
        core.refresh_values();
        Ok(Machine { core })
    }

    /// Run the initial activation: a transition to the root, so initial
    /// paths activate and root-level entry handlers and effects fire
    /// through the normal transition machinery. Idempotent.
    ///
    /// # Errors
    /// Returns [`MachineError::LoopDetected`] if entry handlers transition
    /// in a cycle.
    pub async fn init(&self) -> Result<&Self, MachineError> {
        if self.core.initialized.replace(true) {
            return Ok(self);
        }
        self.core.draining.set(true);
        let flags = Flags::default();
        let budget = Budget::default();
        let scope = Scope {
            flags: &flags,
            budget: &budget,
        };
        let root_path = self.core.id.clone() + ".root";
        let outcome = self.core.run_transition(&root_path, scope).await;
        flags.did_transition.set(true);
        if let Err(err) = outcome {
            self.core.draining.set(false);
            self.core.drained.notify_waiters();
            return Err(err);
        }
        self.core.notify();
        self.core.drive().await?;
        Ok(self)
    }

    /// Enqueue an event with no payload and drive the queue.
    ///
    /// If a drain is already in flight the event queues behind it and this
    /// call resolves when that drain finishes.
    ///
    /// # Errors
    /// Returns [`MachineError::LoopDetected`] if this call's drain tripped
    /// the transition loop guard.
    pub async fn send(&self, event: impl Into<String>) -> Result<&Self, MachineError> {
        self.send_with(event, Value::Null).await
    }

    /// Enqueue an event carrying a payload and drive the queue.
    ///
    /// # Errors
    /// See [`Machine::send`].
    pub async fn send_with(
        &self,
        event: impl Into<String>,
        payload: Value,
    ) -> Result<&Self, MachineError> {
        self.core
            .queue
            .borrow_mut()
            .push_back(Event::with_payload(event, payload));
        if self.core.draining.get() {
            self.core.drained.notified().await;
            return Ok(self);
        }
        self.core.draining.set(true);
        self.core.drive().await?;
        Ok(self)
    }

    /// The instance id, e.g. `#light` or `#state_3`.
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Snapshot of the committed data. The returned `Rc` stays valid (and
    /// unchanged) across later updates.
    pub fn data(&self) -> Rc<D> {
        self.core.data.borrow().clone()
    }

    /// Computed values as of the most recent notification.
    pub fn values(&self) -> HashMap<String, Value> {
        self.core.values.borrow().clone()
    }

    /// Depth-first paths of the currently-active states.
    pub fn active(&self) -> Vec<String> {
        self.core.tree.borrow().active_paths()
    }

    /// Inspect the state tree without exposing the interior borrow.
    pub fn with_tree<R>(&self, f: impl FnOnce(&Tree<D>) -> R) -> R {
        f(&self.core.tree.borrow())
    }

    /// True iff some active state matches the path (suffix rule; a leading
    /// `.` is implied when missing).
    pub fn is_in(&self, path: &str) -> bool {
        self.core
            .tree
            .borrow()
            .nodes
            .iter()
            .any(|node| node.active && path_matches(&node.path, path))
    }

    /// True iff *every* supplied path matches some active state.
    pub fn is_in_all(&self, paths: &[&str]) -> bool {
        paths.iter().all(|path| self.is_in(path))
    }

    /// True iff *any* supplied path matches some active state.
    pub fn is_in_any(&self, paths: &[&str]) -> bool {
        paths.iter().any(|path| self.is_in(path))
    }

    /// True iff some active state has a handler for `event` whose guards
    /// would pass right now. Pure: nothing is mutated.
    pub fn can(&self, event: &str) -> bool {
        self.can_with(event, Value::Null)
    }

    /// Payload-carrying variant of [`Machine::can`].
    pub fn can_with(&self, event: &str, payload: Value) -> bool {
        let tree = self.core.tree.borrow();
        let snapshot = self.core.data.borrow().clone();
        let data: &D = &snapshot;
        for id in tree.active_ids() {
            let Some(chain) = tree.node(id).on.get(event) else {
                continue;
            };
            let mut result = Value::Null;
            for item in &chain.items {
                for get in &item.get {
                    result = get(data, &payload, &result);
                }
                let passed = item.if_all.iter().all(|cond| cond(data, &payload, &result))
                    && (item.if_any.is_empty()
                        || item.if_any.iter().any(|cond| cond(data, &payload, &result)))
                    && item.unless.iter().all(|cond| !cond(data, &payload, &result));
                if passed {
                    return true;
                }
            }
        }
        false
    }

    /// Collect the values of entries whose key is `"root"` or matches an
    /// active path, in declaration order.
    pub fn when_in(&self, entries: Vec<(&str, WhenValue)>) -> Vec<Value> {
        self.when_in_fold(entries, Vec::new(), |mut acc, (_, value)| {
            acc.push(value);
            acc
        })
    }

    /// Fold included `when_in` entries with a custom reducer.
    pub fn when_in_fold<T>(
        &self,
        entries: Vec<(&str, WhenValue)>,
        initial: T,
        mut reducer: impl FnMut(T, (&str, Value)) -> T,
    ) -> T {
        let mut acc = initial;
        for (key, value) in entries {
            if key == "root" || self.is_in(key) {
                let value = match value {
                    WhenValue::Value(value) => value,
                    WhenValue::Get(get) => get(),
                };
                acc = reducer(acc, (key, value));
            }
        }
        acc
    }

    /// The design this instance was built from.
    pub fn config(&self) -> &Design<D> {
        &self.core.design
    }

    /// A fresh, uninitialized instance built from the same design.
    ///
    /// # Errors
    /// Construction re-validates the design; see [`Machine::new`].
    pub fn duplicate(&self) -> Result<Machine<D>, DesignError> {
        Machine::new(self.core.design.clone())
    }

    /// Subscribe to updates. The callback runs after every event (or
    /// detached repeat/async completion) that produced a non-secret action
    /// or transition.
    pub fn on_update(&self, callback: impl Fn(&Machine<D>) + 'static) -> Subscription {
        let id = self.core.next_subscriber.get();
        self.core.next_subscriber.set(id + 1);
        self.core
            .subscribers
            .borrow_mut()
            .push((id, Rc::new(callback)));
        let weak = Rc::downgrade(&self.core);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.subscribers
                        .borrow_mut()
                        .retain(|(subscriber, _)| *subscriber != id);
                }
            })),
        }
    }

    /// Invoke `callback` once, synchronously, with the current snapshot.
    pub fn get_update(&self, callback: impl FnOnce(&Machine<D>)) {
        callback(self);
    }
}
