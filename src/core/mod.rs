//! Statechart interpreter: design schema, tree builder, active-state
//! tracking, handler evaluation, event engine and effect runner.

pub mod design;
pub mod machine;
pub mod node;

pub(crate) mod activity;
pub(crate) mod effects;
pub(crate) mod exec;
pub(crate) mod handler;

/// Transition budget for one event dispatch. Performing more transitions
/// than this within a single dispatch is treated as an infinite loop and
/// terminates the drain.
pub const MAX_TRANSITIONS: usize = 200;

pub use design::{
    action, send, to, ActionFn, AsyncFn, CondFn, Design, DesignError, Event, Handler, Item,
    Repeat, ResultFn, SendFn, StateConfig, TargetFn, Task, TimeFn, ValueFn,
};
pub use machine::{Machine, MachineError, Subscription, WhenValue};
pub use node::{NodeKind, StateNode, Tree};
