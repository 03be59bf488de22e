//! Handler-chain normalization.
//!
//! Design-side handler slots accept shorthand ([`Handler`]); the tree
//! builder runs them through [`normalize`] exactly once, resolving library
//! references and producing [`Chain`]s of fully-populated [`ChainItem`]s
//! for the evaluator. Unknown references fail construction.

use crate::core::design::{
    ActionFn, AsyncFn, CondFn, Design, DesignError, Handler, Item, ResultFn, SendFn, Slot,
    TargetFn, TimeFn,
};

/// A normalized, ordered sequence of handler items.
#[derive(Clone)]
pub(crate) struct Chain<D> {
    pub items: Vec<ChainItem<D>>,
}

impl<D> std::fmt::Debug for Chain<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("items", &self.items.len()).finish()
    }
}

/// One normalized handler item; every slot is present, possibly empty.
#[derive(Clone)]
pub(crate) struct ChainItem<D> {
    pub get: Vec<ResultFn<D>>,
    pub if_all: Vec<CondFn<D>>,
    pub if_any: Vec<CondFn<D>>,
    pub unless: Vec<CondFn<D>>,
    pub wait: Option<TimeFn<D>>,
    pub actions: Vec<ActionFn<D>>,
    pub else_actions: Vec<ActionFn<D>>,
    pub secret_actions: Vec<ActionFn<D>>,
    pub send: Option<SendFn<D>>,
    pub else_send: Option<SendFn<D>>,
    pub to: Option<TargetFn<D>>,
    pub else_to: Option<TargetFn<D>>,
    pub secret_to: Option<TargetFn<D>>,
}

impl<D> ChainItem<D> {
    fn empty() -> Self {
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
}

/// Expand a handler shorthand into a chain, resolving named references
/// against the design's libraries.
pub(crate) fn normalize<D>(design: &Design<D>, handler: &Handler<D>) -> Result<Chain<D>, DesignError> {
    let mut items = Vec::new();
    collect(design, handler, &mut items)?;
    Ok(Chain { items })
}

fn collect<D>(
    design: &Design<D>,
    handler: &Handler<D>,
    items: &mut Vec<ChainItem<D>>,
) -> Result<(), DesignError> {
    match handler {
        Handler::Action(f) => {
            let mut item = ChainItem::empty();
            item.actions.push(f.clone());
            items.push(item);
        }
        Handler::Named(name) => {
            // A bare string lands in the slot matching its library.
            let mut item = ChainItem::empty();
            if let Some(f) = design.actions.get(name) {
                item.actions.push(f.clone());
            } else if let Some(f) = design.conditions.get(name) {
                item.if_all.push(f.clone());
            } else if let Some(f) = design.results.get(name) {
                item.get.push(f.clone());
            } else if let Some(f) = design.times.get(name) {
                item.wait = Some(f.clone());
            } else {
                return Err(DesignError::UnknownReference(name.clone()));
            }
            items.push(item);
        }
        Handler::Item(item) => items.push(resolve_item(design, item)?),
        Handler::Chain(handlers) => {
            for h in handlers {
                collect(design, h, items)?;
            }
        }
    }
    Ok(())
}

fn resolve_item<D>(design: &Design<D>, item: &Item<D>) -> Result<ChainItem<D>, DesignError> {
    let mut out = ChainItem::empty();
    for slot in &item.get {
        out.get.push(resolve(slot, &design.results, DesignError::UnknownResult)?);
    }
    for slot in &item.if_all {
        out.if_all
            .push(resolve(slot, &design.conditions, DesignError::UnknownCondition)?);
    }
    for slot in &item.if_any {
        out.if_any
            .push(resolve(slot, &design.conditions, DesignError::UnknownCondition)?);
    }
    for slot in &item.unless {
        out.unless
            .push(resolve(slot, &design.conditions, DesignError::UnknownCondition)?);
    }
    if let Some(slot) = &item.wait {
        out.wait = Some(resolve(slot, &design.times, DesignError::UnknownTime)?);
    }
    for slot in &item.actions {
        out.actions
            .push(resolve(slot, &design.actions, DesignError::UnknownAction)?);
    }
    for slot in &item.else_actions {
        out.else_actions
            .push(resolve(slot, &design.actions, DesignError::UnknownAction)?);
    }
    for slot in &item.secret_actions {
        out.secret_actions
            .push(resolve(slot, &design.actions, DesignError::UnknownAction)?);
    }
    out.send = item.send.clone();
    out.else_send = item.else_send.clone();
    out.to = item.to.clone();
    out.else_to = item.else_to.clone();
    out.secret_to = item.secret_to.clone();
    Ok(out)
}

pub(crate) fn resolve_async<D>(
    design: &Design<D>,
    slot: &Slot<AsyncFn<D>>,
) -> Result<AsyncFn<D>, DesignError> {
    resolve(slot, &design.asyncs, DesignError::UnknownAsync)
}

pub(crate) fn resolve_time<D>(
    design: &Design<D>,
    slot: &Slot<TimeFn<D>>,
) -> Result<TimeFn<D>, DesignError> {
    resolve(slot, &design.times, DesignError::UnknownTime)
}

fn resolve<F: Clone>(
    slot: &Slot<F>,
    library: &std::collections::HashMap<String, F>,
    missing: impl FnOnce(String) -> DesignError,
) -> Result<F, DesignError> {
    match slot {
        Slot::Fn(f) => Ok(f.clone()),
        Slot::Named(name) => library.get(name).cloned().ok_or_else(|| missing(name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::design::{action, Design, Handler, Item};
    use serde_json::Value;

    #[derive(Debug, Clone, Default)]
    struct Data {
        count: i32,
    }

    fn base() -> Design<Data> {
        Design::new(Data::default())
            .define_action("inc", |d, _, _| d.count += 1)
            .define_condition("positive", |d, _, _| d.count > 0)
            .define_result("doubled", |d, _, _| Value::from(d.count * 2))
            .define_time("beat", |_, _, _| 0.25)
    }

    #[test]
    fn bare_function_becomes_do_item() {
        let design = base();
        let chain = normalize(&design, &action(|d: &mut Data, _, _| d.count += 1)).unwrap();
        assert_eq!(chain.items.len(), 1);
        assert_eq!(chain.items[0].actions.len(), 1);
        assert!(chain.items[0].if_all.is_empty());
    }

    #[test]
    fn named_reference_lands_in_matching_slot() {
        let design = base();

        let chain = normalize(&design, &Handler::named("inc")).unwrap();
        assert_eq!(chain.items[0].actions.len(), 1);

        let chain = normalize(&design, &Handler::named("positive")).unwrap();
        assert_eq!(chain.items[0].if_all.len(), 1);

        let chain = normalize(&design, &Handler::named("doubled")).unwrap();
        assert_eq!(chain.items[0].get.len(), 1);

        let chain = normalize(&design, &Handler::named("beat")).unwrap();
        assert!(chain.items[0].wait.is_some());
    }

    #[test]
    fn unknown_reference_is_a_construction_error() {
        let design = base();
        let err = normalize(&design, &Handler::named("missing")).unwrap_err();
        assert_eq!(err, DesignError::UnknownReference("missing".into()));

        let item: Item<Data> = Item::new().action_named("missing");
        let err = normalize(&design, &item.into()).unwrap_err();
        assert_eq!(err, DesignError::UnknownAction("missing".into()));
    }

    #[test]
    fn list_yields_one_item_per_element() {
        let design = base();
        let handler = Handler::chain(vec![
            Handler::named("inc"),
            Item::new().guard_named("positive").action_named("inc").into(),
            action(|d: &mut Data, _, _| d.count -= 1),
        ]);
        let chain = normalize(&design, &handler).unwrap();
        assert_eq!(chain.items.len(), 3);
        assert_eq!(chain.items[1].if_all.len(), 1);
    }

    #[test]
    fn item_slots_resolve_named_entries() {
        let design = base();
        let item: Item<Data> = Item::new()
            .get_named("doubled")
            .guard_named("positive")
            .unless_named("positive")
            .guard_any_named("positive")
            .wait_named("beat")
            .action_named("inc")
            .else_action_named("inc")
            .secret_action_named("inc");
        let chain = normalize(&design, &item.into()).unwrap();
        let item = &chain.items[0];
        assert_eq!(item.get.len(), 1);
        assert_eq!(item.if_all.len(), 1);
        assert_eq!(item.if_any.len(), 1);
        assert_eq!(item.unless.len(), 1);
        assert!(item.wait.is_some());
        assert_eq!(item.actions.len(), 1);
        assert_eq!(item.else_actions.len(), 1);
        assert_eq!(item.secret_actions.len(), 1);
    }
}
