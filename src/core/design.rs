//! Declarative design schema.
//!
//! A [`Design`] is the value a caller hands to [`Machine::new`]: a tree of
//! [`StateConfig`] entries plus libraries of named results, conditions,
//! actions, asyncs and times. Every handler slot accepts shorthand (a bare
//! action function, a named library reference, a single [`Item`], or a list
//! of any of these), which the builder normalizes into handler chains at
//! construction time.
//!
//! [`Machine::new`]: crate::core::machine::Machine::new

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::Value;

/// Result-producer: `(data, payload, result) -> result`.
pub type ResultFn<D> = Rc<dyn Fn(&D, &Value, &Value) -> Value>;
/// Guard predicate: `(data, payload, result) -> bool`.
pub type CondFn<D> = Rc<dyn Fn(&D, &Value, &Value) -> bool>;
/// Action: mutates the data draft.
pub type ActionFn<D> = Rc<dyn Fn(&mut D, &Value, &Value)>;
/// Delay function returning seconds (fractional allowed).
pub type TimeFn<D> = Rc<dyn Fn(&D, &Value, &Value) -> f64>;
/// Event producer for `send` slots.
pub type SendFn<D> = Rc<dyn Fn(&D, &Value, &Value) -> Event>;
/// Transition-target function returning a state path.
pub type TargetFn<D> = Rc<dyn Fn(&D, &Value, &Value) -> String>;
/// Awaitable effect: resolves to `Ok(value)` or rejects with `Err(value)`.
pub type AsyncFn<D> =
    Rc<dyn Fn(&D, &Value, &Value) -> LocalBoxFuture<'static, Result<Value, Value>>>;
/// Computed-value function over the committed data.
pub type ValueFn<D> = Rc<dyn Fn(&D) -> Value>;

/// A named event with an optional payload, as produced by `send` slots and
/// accepted by the machine's send queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name, matched against each state's `on` map.
    pub name: String,
    /// Payload carried to every handler function while the event is
    /// processed. [`Value::Null`] stands in for "no payload".
    pub payload: Value,
}

impl Event {
    /// An event with no payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Value::Null,
        }
    }

    /// An event carrying a payload.
    pub fn with_payload(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Error reported when a design cannot be compiled into a state tree.
///
/// Construction is the only place these can surface; a [`Machine`] that was
/// built successfully never reports them again.
///
/// [`Machine`]: crate::core::machine::Machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesignError {
    /// A bare string handler matched no library entry.
    UnknownReference(String),
    /// A named `do`-slot entry was missing from the actions library.
    UnknownAction(String),
    /// A named guard was missing from the conditions library.
    UnknownCondition(String),
    /// A named `get` entry was missing from the results library.
    UnknownResult(String),
    /// A named delay was missing from the times library.
    UnknownTime(String),
    /// A named async effect was missing from the asyncs library.
    UnknownAsync(String),
    /// A branch state's `initial` does not name one of its children.
    UnknownInitial {
        /// Path of the offending state.
        state: String,
        /// The `initial` name that matched no child.
        initial: String,
    },
    /// Two sibling states share a name.
    DuplicateState {
        /// Path of the parent state.
        parent: String,
        /// The repeated child name.
        name: String,
    },
}

impl fmt::Display for DesignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesignError::UnknownReference(name) => {
                write!(f, "'{name}' is not defined in any design library")
            }
            DesignError::UnknownAction(name) => {
                write!(f, "unknown action '{name}'")
            }
            DesignError::UnknownCondition(name) => {
                write!(f, "unknown condition '{name}'")
            }
            DesignError::UnknownResult(name) => {
                write!(f, "unknown result '{name}'")
            }
            DesignError::UnknownTime(name) => {
                write!(f, "unknown time '{name}'")
            }
            DesignError::UnknownAsync(name) => {
                write!(f, "unknown async '{name}'")
            }
            DesignError::UnknownInitial { state, initial } => {
                write!(f, "state '{state}' declares initial '{initial}' but has no such child")
            }
            DesignError::DuplicateState { parent, name } => {
                write!(f, "state '{parent}' declares child '{name}' more than once")
            }
        }
    }
}

impl std::error::Error for DesignError {}

/// A slot value that is either a function or a reference into one of the
/// design's named libraries, resolved when the tree is built.
#[derive(Clone)]
pub(crate) enum Slot<F> {
    Fn(F),
    Named(String),
}

/// Shorthand accepted by every handler slot.
///
/// Expansion rules (applied at construction):
/// - a bare function becomes an item with that function in its `do` slot;
/// - a string names a library entry and lands in the slot matching its
///   library (actions, then conditions, then results, then times);
/// - an [`Item`] is used as-is;
/// - a list contributes one item per element.
#[derive(Clone)]
pub enum Handler<D> {
    /// Bare action function.
    Action(ActionFn<D>),
    /// Named library reference.
    Named(String),
    /// A single fully-specified handler item.
    Item(Item<D>),
    /// One item per element.
    Chain(Vec<Handler<D>>),
}

impl<D> Handler<D> {
    /// Shorthand for an item whose `do` slot holds `f`.
    pub fn action(f: impl Fn(&mut D, &Value, &Value) + 'static) -> Self {
        Handler::Action(Rc::new(f))
    }

    /// Reference to a named library entry.
    pub fn named(name: impl Into<String>) -> Self {
        Handler::Named(name.into())
    }

    /// One item per element, evaluated in order.
    pub fn chain(items: Vec<Handler<D>>) -> Self {
        Handler::Chain(items)
    }
}

impl<D> From<Item<D>> for Handler<D> {
    fn from(item: Item<D>) -> Self {
        Handler::Item(item)
    }
}

impl<D> From<Vec<Handler<D>>> for Handler<D> {
    fn from(items: Vec<Handler<D>>) -> Self {
        Handler::Chain(items)
    }
}

impl<D> From<&str> for Handler<D> {
    fn from(name: &str) -> Self {
        Handler::Named(name.to_owned())
    }
}

/// Shorthand for [`Handler::action`].
pub fn action<D>(f: impl Fn(&mut D, &Value, &Value) + 'static) -> Handler<D> {
    Handler::action(f)
}

/// An item that transitions to a fixed path.
pub fn to<D>(path: impl Into<String>) -> Item<D> {
    Item::new().to(path)
}

/// An item that sends a fixed event.
pub fn send<D>(event: impl Into<String>) -> Item<D> {
    Item::new().send_event(event)
}

/// One unit of a handler chain: result-getters, guards, an optional wait,
/// actions, sends and transition targets.
///
/// Built fluently; every method appends to (or fills) the corresponding
/// slot. The `*_named` variants reference the design's libraries instead of
/// supplying a function inline.
#[derive(Clone)]
pub struct Item<D> {
    pub(crate) get: Vec<Slot<ResultFn<D>>>,
    pub(crate) if_all: Vec<Slot<CondFn<D>>>,
    pub(crate) if_any: Vec<Slot<CondFn<D>>>,
    pub(crate) unless: Vec<Slot<CondFn<D>>>,
    pub(crate) wait: Option<Slot<TimeFn<D>>>,
    pub(crate) actions: Vec<Slot<ActionFn<D>>>,
    pub(crate) else_actions: Vec<Slot<ActionFn<D>>>,
    pub(crate) secret_actions: Vec<Slot<ActionFn<D>>>,
    pub(crate) send: Option<SendFn<D>>,
    pub(crate) else_send: Option<SendFn<D>>,
    pub(crate) to: Option<TargetFn<D>>,
    pub(crate) else_to: Option<TargetFn<D>>,
    pub(crate) secret_to: Option<TargetFn<D>>,
}

impl<D> Default for Item<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Item<D> {
    /// An item with every slot empty.
    pub fn new() -> Self {
        Self {
            get: Vec::new(),
            if_all: Vec::new(),
            if_any: Vec::new(),
            unless: Vec::new(),
            wait: None,
            actions: Vec::new(),
            else_actions: Vec::new(),
            secret_actions: Vec::new(),
            send: None,
            else_send: None,
            to: None,
            else_to: None,
            secret_to: None,
        }
    }

    /// Append a result-producer. Getters run first, in order, each feeding
    /// the next through the scratch `result`.
    pub fn get(mut self, f: impl Fn(&D, &Value, &Value) -> Value + 'static) -> Self {
        self.get.push(Slot::Fn(Rc::new(f)));
        self
    }

    /// Append a named result-producer from the results library.
    pub fn get_named(mut self, name: impl Into<String>) -> Self {
        self.get.push(Slot::Named(name.into()));
        self
    }

    /// Append a guard; all guards must pass.
    pub fn guard(mut self, f: impl Fn(&D, &Value, &Value) -> bool + 'static) -> Self {
        self.if_all.push(Slot::Fn(Rc::new(f)));
        self
    }

    /// Append a named guard from the conditions library.
    pub fn guard_named(mut self, name: impl Into<String>) -> Self {
        self.if_all.push(Slot::Named(name.into()));
        self
    }

    /// Append an any-of guard; at least one must pass.
    pub fn guard_any(mut self, f: impl Fn(&D, &Value, &Value) -> bool + 'static) -> Self {
        self.if_any.push(Slot::Fn(Rc::new(f)));
        self
    }

    /// Append a named any-of guard.
    pub fn guard_any_named(mut self, name: impl Into<String>) -> Self {
        self.if_any.push(Slot::Named(name.into()));
        self
    }

    /// Append an inverted guard; all must fail.
    pub fn unless(mut self, f: impl Fn(&D, &Value, &Value) -> bool + 'static) -> Self {
        self.unless.push(Slot::Fn(Rc::new(f)));
        self
    }

    /// Append a named inverted guard.
    pub fn unless_named(mut self, name: impl Into<String>) -> Self {
        self.unless.push(Slot::Named(name.into()));
        self
    }

    /// Suspend the chain for the returned number of seconds. The wait runs
    /// after the item's guards are evaluated and before its actions.
    pub fn wait(mut self, f: impl Fn(&D, &Value, &Value) -> f64 + 'static) -> Self {
        self.wait = Some(Slot::Fn(Rc::new(f)));
        self
    }

    /// Suspend for a fixed number of seconds.
    pub fn wait_secs(mut self, secs: f64) -> Self {
        self.wait = Some(Slot::Fn(Rc::new(move |_: &D, _: &Value, _: &Value| secs)));
        self
    }

    /// Suspend using a named delay from the times library.
    pub fn wait_named(mut self, name: impl Into<String>) -> Self {
        self.wait = Some(Slot::Named(name.into()));
        self
    }

    /// Append an action, run when the item's guards pass.
    pub fn action(mut self, f: impl Fn(&mut D, &Value, &Value) + 'static) -> Self {
        self.actions.push(Slot::Fn(Rc::new(f)));
        self
    }

    /// Append a named action from the actions library.
    pub fn action_named(mut self, name: impl Into<String>) -> Self {
        self.actions.push(Slot::Named(name.into()));
        self
    }

    /// Append an action run when the item's guards fail.
    pub fn else_action(mut self, f: impl Fn(&mut D, &Value, &Value) + 'static) -> Self {
        self.else_actions.push(Slot::Fn(Rc::new(f)));
        self
    }

    /// Append a named else-action.
    pub fn else_action_named(mut self, name: impl Into<String>) -> Self {
        self.else_actions.push(Slot::Named(name.into()));
        self
    }

    /// Append an action that runs without marking the update as observable:
    /// subscribers are not notified on its account.
    pub fn secret_action(mut self, f: impl Fn(&mut D, &Value, &Value) + 'static) -> Self {
        self.secret_actions.push(Slot::Fn(Rc::new(f)));
        self
    }

    /// Append a named secret action.
    pub fn secret_action_named(mut self, name: impl Into<String>) -> Self {
        self.secret_actions.push(Slot::Named(name.into()));
        self
    }

    /// Produce an event to enqueue when the guards pass. The event is
    /// processed after the current event finishes draining.
    pub fn send(mut self, f: impl Fn(&D, &Value, &Value) -> Event + 'static) -> Self {
        self.send = Some(Rc::new(f));
        self
    }

    /// Enqueue a fixed event when the guards pass.
    pub fn send_event(mut self, event: impl Into<String>) -> Self {
        let event = event.into();
        self.send = Some(Rc::new(move |_: &D, _: &Value, _: &Value| {
            Event::new(event.clone())
        }));
        self
    }

    /// Produce an event to enqueue when the guards fail.
    pub fn else_send(mut self, f: impl Fn(&D, &Value, &Value) -> Event + 'static) -> Self {
        self.else_send = Some(Rc::new(f));
        self
    }

    /// Enqueue a fixed event when the guards fail.
    pub fn else_send_event(mut self, event: impl Into<String>) -> Self {
        let event = event.into();
        self.else_send = Some(Rc::new(move |_: &D, _: &Value, _: &Value| {
            Event::new(event.clone())
        }));
        self
    }

    /// Transition to a fixed path when the guards pass. A transition
    /// terminates the chain.
    pub fn to(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.to = Some(Rc::new(move |_: &D, _: &Value, _: &Value| path.clone()));
        self
    }

    /// Transition to a computed path when the guards pass.
    pub fn to_fn(mut self, f: impl Fn(&D, &Value, &Value) -> String + 'static) -> Self {
        self.to = Some(Rc::new(f));
        self
    }

    /// Transition to a fixed path when the guards fail.
    pub fn else_to(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.else_to = Some(Rc::new(move |_: &D, _: &Value, _: &Value| path.clone()));
        self
    }

    /// Transition to a computed path when the guards fail.
    pub fn else_to_fn(mut self, f: impl Fn(&D, &Value, &Value) -> String + 'static) -> Self {
        self.else_to = Some(Rc::new(f));
        self
    }

    /// Transition without marking the update as observable.
    pub fn secret_to(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.secret_to = Some(Rc::new(move |_: &D, _: &Value, _: &Value| path.clone()));
        self
    }

    /// Computed-path variant of [`Item::secret_to`].
    pub fn secret_to_fn(mut self, f: impl Fn(&D, &Value, &Value) -> String + 'static) -> Self {
        self.secret_to = Some(Rc::new(f));
        self
    }
}

/// Timed repeat attached to a state: while the state is active, the
/// `on_repeat` chain runs on every tick.
#[derive(Clone)]
pub struct Repeat<D> {
    pub(crate) delay: Option<Slot<TimeFn<D>>>,
    pub(crate) on_repeat: Handler<D>,
}

impl<D> Repeat<D> {
    /// Tick every `delay(data, payload, result)` seconds. The delay is
    /// evaluated once when the owning state is entered and clamped to the
    /// frame floor ([`FRAME_SECS`]).
    ///
    /// [`FRAME_SECS`]: crate::timer::FRAME_SECS
    pub fn every(
        delay: impl Fn(&D, &Value, &Value) -> f64 + 'static,
        on_repeat: impl Into<Handler<D>>,
    ) -> Self {
        Self {
            delay: Some(Slot::Fn(Rc::new(delay))),
            on_repeat: on_repeat.into(),
        }
    }

    /// Tick every `delay` seconds.
    pub fn every_secs(delay: f64, on_repeat: impl Into<Handler<D>>) -> Self {
        Self::every(move |_, _, _| delay, on_repeat)
    }

    /// Tick using a named delay from the times library.
    pub fn every_named(name: impl Into<String>, on_repeat: impl Into<Handler<D>>) -> Self {
        Self {
            delay: Some(Slot::Named(name.into())),
            on_repeat: on_repeat.into(),
        }
    }

    /// Tick once per frame (60 Hz).
    pub fn each_frame(on_repeat: impl Into<Handler<D>>) -> Self {
        Self {
            delay: None,
            on_repeat: on_repeat.into(),
        }
    }
}

/// Awaitable effect attached to a state: launched on entry, routed to
/// `on_resolve` or `on_reject` on completion.
///
/// Completions are not cancelled when the owning state exits; a completion
/// that arrives after exit is ignored.
#[derive(Clone)]
pub struct Task<D> {
    pub(crate) run: Slot<AsyncFn<D>>,
    pub(crate) on_resolve: Handler<D>,
    pub(crate) on_reject: Option<Handler<D>>,
}

impl<D> Task<D> {
    /// Launch `run(data, payload, result)` on entry; the resolved value
    /// becomes the scratch `result` for the `on_resolve` chain.
    pub fn new(
        run: impl Fn(&D, &Value, &Value) -> LocalBoxFuture<'static, Result<Value, Value>> + 'static,
        on_resolve: impl Into<Handler<D>>,
    ) -> Self {
        Self {
            run: Slot::Fn(Rc::new(run)),
            on_resolve: on_resolve.into(),
            on_reject: None,
        }
    }

    /// Launch a named effect from the asyncs library.
    pub fn named(name: impl Into<String>, on_resolve: impl Into<Handler<D>>) -> Self {
        Self {
            run: Slot::Named(name.into()),
            on_resolve: on_resolve.into(),
            on_reject: None,
        }
    }

    /// Chain to run if the effect rejects. Without one, rejections are
    /// dropped.
    pub fn on_reject(mut self, handler: impl Into<Handler<D>>) -> Self {
        self.on_reject = Some(handler.into());
        self
    }
}

/// Configuration for one state in the design tree.
///
/// A state with an `initial` child is a *branch* (one child active at a
/// time); a state with children but no `initial` is *parallel* (all
/// children active together); a state without children is a *leaf*.
#[derive(Clone)]
pub struct StateConfig<D> {
    pub(crate) initial: Option<String>,
    pub(crate) states: Vec<(String, StateConfig<D>)>,
    pub(crate) on: Vec<(String, Handler<D>)>,
    pub(crate) on_event: Option<Handler<D>>,
    pub(crate) on_enter: Option<Handler<D>>,
    pub(crate) on_exit: Option<Handler<D>>,
    pub(crate) repeat: Option<Repeat<D>>,
    pub(crate) task: Option<Task<D>>,
}

impl<D> Default for StateConfig<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> StateConfig<D> {
    /// An empty leaf state.
    pub fn new() -> Self {
        Self {
            initial: None,
            states: Vec::new(),
            on: Vec::new(),
            on_event: None,
            on_enter: None,
            on_exit: None,
            repeat: None,
            task: None,
        }
    }

    /// Name the initially-active child, making this state a branch.
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.initial = Some(name.into());
        self
    }

    /// Add a child state. Declaration order is preserved and observable.
    pub fn state(mut self, name: impl Into<String>, config: StateConfig<D>) -> Self {
        self.states.push((name.into(), config));
        self
    }

    /// Attach a handler for a named event. Repeated calls for the same
    /// event append items to the same chain.
    pub fn on(mut self, event: impl Into<String>, handler: impl Into<Handler<D>>) -> Self {
        self.on.push((event.into(), handler.into()));
        self
    }

    /// Handler chain run for every event that reaches this state, after
    /// its `on` chain.
    pub fn on_event(mut self, handler: impl Into<Handler<D>>) -> Self {
        self.on_event = Some(handler.into());
        self
    }

    /// Handler chain run when this state is entered.
    pub fn on_enter(mut self, handler: impl Into<Handler<D>>) -> Self {
        self.on_enter = Some(handler.into());
        self
    }

    /// Handler chain run when this state exits.
    pub fn on_exit(mut self, handler: impl Into<Handler<D>>) -> Self {
        self.on_exit = Some(handler.into());
        self
    }

    /// Attach a timed repeat.
    pub fn repeat(mut self, repeat: Repeat<D>) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Attach an awaitable effect.
    pub fn task(mut self, task: Task<D>) -> Self {
        self.task = Some(task);
        self
    }
}

/// The declarative description a [`Machine`] is built from.
///
/// [`Machine`]: crate::core::machine::Machine
#[derive(Clone)]
pub struct Design<D> {
    pub(crate) id: Option<String>,
    pub(crate) data: D,
    pub(crate) root: StateConfig<D>,
    pub(crate) values: Vec<(String, ValueFn<D>)>,
    pub(crate) results: HashMap<String, ResultFn<D>>,
    pub(crate) conditions: HashMap<String, CondFn<D>>,
    pub(crate) actions: HashMap<String, ActionFn<D>>,
    pub(crate) asyncs: HashMap<String, AsyncFn<D>>,
    pub(crate) times: HashMap<String, TimeFn<D>>,
}

impl<D> Design<D> {
    /// A design around the given domain data.
    pub fn new(data: D) -> Self {
        Self {
            id: None,
            data,
            root: StateConfig::new(),
            values: Vec::new(),
            results: HashMap::new(),
            conditions: HashMap::new(),
            actions: HashMap::new(),
            asyncs: HashMap::new(),
            times: HashMap::new(),
        }
    }

    /// Identifier for instances of this design; instance ids become
    /// `#<id>`. Without one, instances get `#state_<n>`.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Name the initially-active root child, making the root a branch.
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.root = self.root.initial(name);
        self
    }

    /// Add a root-level state.
    pub fn state(mut self, name: impl Into<String>, config: StateConfig<D>) -> Self {
        self.root = self.root.state(name, config);
        self
    }

    /// Attach a root-level event handler.
    pub fn on(mut self, event: impl Into<String>, handler: impl Into<Handler<D>>) -> Self {
        self.root = self.root.on(event, handler);
        self
    }

    /// Root-level any-event handler.
    pub fn on_event(mut self, handler: impl Into<Handler<D>>) -> Self {
        self.root = self.root.on_event(handler);
        self
    }

    /// Root-level entry handler, run during initial activation.
    pub fn on_enter(mut self, handler: impl Into<Handler<D>>) -> Self {
        self.root = self.root.on_enter(handler);
        self
    }

    /// Root-level exit handler.
    pub fn on_exit(mut self, handler: impl Into<Handler<D>>) -> Self {
        self.root = self.root.on_exit(handler);
        self
    }

    /// Root-level timed repeat.
    pub fn repeat(mut self, repeat: Repeat<D>) -> Self {
        self.root = self.root.repeat(repeat);
        self
    }

    /// Root-level awaitable effect, launched during initial activation.
    pub fn task(mut self, task: Task<D>) -> Self {
        self.root = self.root.task(task);
        self
    }

    /// Register a computed value, re-derived from data at every
    /// notification.
    pub fn value(mut self, name: impl Into<String>, f: impl Fn(&D) -> Value + 'static) -> Self {
        self.values.push((name.into(), Rc::new(f)));
        self
    }

    /// Define a named result-producer.
    pub fn define_result(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&D, &Value, &Value) -> Value + 'static,
    ) -> Self {
        self.results.insert(name.into(), Rc::new(f));
        self
    }

    /// Define a named guard.
    pub fn define_condition(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&D, &Value, &Value) -> bool + 'static,
    ) -> Self {
        self.conditions.insert(name.into(), Rc::new(f));
        self
    }

    /// Define a named action.
    pub fn define_action(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut D, &Value, &Value) + 'static,
    ) -> Self {
        self.actions.insert(name.into(), Rc::new(f));
        self
    }

    /// Define a named async effect.
    pub fn define_async(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&D, &Value, &Value) -> LocalBoxFuture<'static, Result<Value, Value>> + 'static,
    ) -> Self {
        self.asyncs.insert(name.into(), Rc::new(f));
        self
    }

    /// Define a named delay.
    pub fn define_time(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&D, &Value, &Value) -> f64 + 'static,
    ) -> Self {
        self.times.insert(name.into(), Rc::new(f));
        self
    }
}
