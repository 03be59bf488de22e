//! State tree and builder.
//!
//! The builder walks a [`Design`] once and produces a [`Tree`]: an arena of
//! [`StateNode`]s stored in preorder, so arena order is depth-first order
//! and the active list falls out of a single scan. Nodes keep non-owning
//! parent indices; children are held in declaration order.

use std::collections::HashMap;

use tokio::task::AbortHandle;

use crate::core::design::{AsyncFn, Design, DesignError, StateConfig, TimeFn};
use crate::core::handler::{normalize, resolve_async, resolve_time, Chain};

/// Index of a node within its tree's arena.
pub(crate) type NodeId = usize;

/// The root node's arena index.
pub(crate) const ROOT: NodeId = 0;

/// Structural classification of a state node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// No children.
    Leaf,
    /// Declares an `initial` child; at most one child active at a time.
    Branch,
    /// Children without an `initial`; all children active together.
    Parallel,
}

/// Normalized repeat effect carried by a node.
#[derive(Clone)]
pub(crate) struct RepeatEffect<D> {
    pub delay: Option<TimeFn<D>>,
    pub on_repeat: Chain<D>,
}

/// Normalized async effect carried by a node.
#[derive(Clone)]
pub(crate) struct TaskEffect<D> {
    pub run: AsyncFn<D>,
    pub on_resolve: Chain<D>,
    pub on_reject: Option<Chain<D>>,
}

/// One node of the compiled state tree.
///
/// Structural fields are set once by the builder; `active`, `history` and
/// the effect handle are runtime state maintained by the engine.
pub struct StateNode<D> {
    /// Leaf segment of the path.
    pub name: String,
    /// Dot-joined path from the root, prefixed by the instance id, e.g.
    /// `#light.root.green`.
    pub path: String,
    /// Branch / parallel / leaf classification.
    pub kind: NodeKind,
    /// Whether the node is currently active.
    pub active: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) initial: Option<String>,
    pub(crate) on: HashMap<String, Chain<D>>,
    pub(crate) on_event: Option<Chain<D>>,
    pub(crate) on_enter: Option<Chain<D>>,
    pub(crate) on_exit: Option<Chain<D>>,
    pub(crate) repeat: Option<RepeatEffect<D>>,
    pub(crate) task: Option<TaskEffect<D>>,
    /// Last active child name, for `previous` / `restore` re-entry.
    pub(crate) history: Option<String>,
    /// Abort handle of the running repeat task, if any.
    pub(crate) repeat_handle: Option<AbortHandle>,
}

/// Arena of state nodes in preorder; index 0 is the root.
pub struct Tree<D> {
    pub(crate) nodes: Vec<StateNode<D>>,
}

impl<D> std::fmt::Debug for Tree<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree").field("nodes", &self.nodes.len()).finish()
    }
}

impl<D> Tree<D> {
    /// Compile a design into a fully-deactivated tree.
    pub(crate) fn build(design: &Design<D>, instance_id: &str) -> Result<Self, DesignError> {
        let mut tree = Tree { nodes: Vec::new() };
        tree.build_node(
            design,
            &design.root,
            "root",
            format!("{instance_id}.root"),
            None,
        )?;
        Ok(tree)
    }

    fn build_node(
        &mut self,
        design: &Design<D>,
        config: &StateConfig<D>,
        name: &str,
        path: String,
        parent: Option<NodeId>,
    ) -> Result<NodeId, DesignError> {
        let kind = if config.initial.is_some() {
            NodeKind::Branch
        } else if !config.states.is_empty() {
            NodeKind::Parallel
        } else {
            NodeKind::Leaf
        };

        if let Some(initial) = &config.initial {
            if !config.states.iter().any(|(child, _)| child == initial) {
                return Err(DesignError::UnknownInitial {
                    state: path,
                    initial: initial.clone(),
                });
            }
        }
        for (i, (child, _)) in config.states.iter().enumerate() {
            if config.states[..i].iter().any(|(other, _)| other == child) {
                return Err(DesignError::DuplicateState {
                    parent: path,
                    name: child.clone(),
                });
            }
        }

        // Repeated `on` entries for one event append to the same chain.
        let mut on: HashMap<String, Chain<D>> = HashMap::new();
        for (event, handler) in &config.on {
            let chain = normalize(design, handler)?;
            on.entry(event.clone())
                .or_insert_with(|| Chain { items: Vec::new() })
                .items
                .extend(chain.items);
        }

        let repeat = match &config.repeat {
            Some(repeat) => Some(RepeatEffect {
                delay: match &repeat.delay {
                    Some(slot) => Some(resolve_time(design, slot)?),
                    None => None,
                },
                on_repeat: normalize(design, &repeat.on_repeat)?,
            }),
            None => None,
        };
        let task = match &config.task {
            Some(task) => Some(TaskEffect {
                run: resolve_async(design, &task.run)?,
                on_resolve: normalize(design, &task.on_resolve)?,
                on_reject: match &task.on_reject {
                    Some(handler) => Some(normalize(design, handler)?),
                    None => None,
                },
            }),
            None => None,
        };

        let id = self.nodes.len();
        self.nodes.push(StateNode {
            name: name.to_owned(),
            path: path.clone(),
            kind,
            active: false,
            parent,
            children: Vec::new(),
            initial: config.initial.clone(),
            on,
            on_event: match &config.on_event {
                Some(h) => Some(normalize(design, h)?),
                None => None,
            },
            on_enter: match &config.on_enter {
                Some(h) => Some(normalize(design, h)?),
                None => None,
            },
            on_exit: match &config.on_exit {
                Some(h) => Some(normalize(design, h)?),
                None => None,
            },
            repeat,
            task,
            history: config.initial.clone(),
            repeat_handle: None,
        });

        let mut children = Vec::with_capacity(config.states.len());
        for (child_name, child_config) in &config.states {
            let child_path = format!("{path}.{child_name}");
            let child = self.build_node(design, child_config, child_name, child_path, Some(id))?;
            children.push(child);
        }
        self.nodes[id].children = children;
        Ok(id)
    }

    pub(crate) fn node(&self, id: NodeId) -> &StateNode<D> {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut StateNode<D> {
        &mut self.nodes[id]
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True for a tree with only a root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// The root node.
    pub fn root(&self) -> &StateNode<D> {
        &self.nodes[ROOT]
    }

    /// All nodes in depth-first (preorder) order.
    pub fn nodes(&self) -> impl Iterator<Item = &StateNode<D>> {
        self.nodes.iter()
    }

    /// Depth-first ids of the currently-active nodes. Arena order is
    /// preorder, so a plain scan suffices.
    pub(crate) fn active_ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&id| self.nodes[id].active)
            .collect()
    }

    /// Depth-first paths of the currently-active nodes.
    pub fn active_paths(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| node.active)
            .map(|node| node.path.clone())
            .collect()
    }

    /// Nodes whose path matches the query under the suffix rule, in
    /// depth-first order. Callers take the last match as the deepest one.
    pub(crate) fn find_transition_targets(&self, query: &str) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&id| path_matches(&self.nodes[id].path, query))
            .collect()
    }
}

/// Suffix-match a node path against a query path.
///
/// A query starting with `#` must match the full instance-qualified path;
/// anything else matches as a `.`-anchored suffix (`a.b`, `.a.b` and `b`
/// are all accepted).
pub(crate) fn path_matches(node_path: &str, query: &str) -> bool {
    if query.starts_with('#') {
        return node_path == query;
    }
    if let Some(anchored) = query.strip_prefix('.') {
        let needle = format!(".{anchored}");
        return node_path.ends_with(&needle);
    }
    let needle = format!(".{query}");
    node_path.ends_with(&needle)
}
