//! Activation and deactivation of subtrees.
//!
//! A transition tears the whole active set down and rebuilds it along the
//! target path; the engine diffs the before/after active lists to decide
//! which `onExit`/`onEnter` chains run. Branch nodes record their last
//! active child on the way down so `previous` and `restore` re-entries can
//! find it again.

use crate::core::node::{NodeId, NodeKind, Tree};

impl<D> Tree<D> {
    /// Deactivate `id` and every descendant, recording history for branch
    /// nodes that currently have an active child.
    pub(crate) fn deactivate(&mut self, id: NodeId) {
        let children = self.nodes[id].children.clone();
        if self.nodes[id].kind == NodeKind::Branch {
            if let Some(active_child) = children.iter().copied().find(|&c| self.nodes[c].active) {
                self.nodes[id].history = Some(self.nodes[active_child].name.clone());
            }
        }
        self.nodes[id].active = false;
        for child in children {
            self.deactivate(child);
        }
    }

    /// Activate `id` and descend.
    ///
    /// `path_down` is the remaining explicit path below this node; while it
    /// is non-empty it picks branch children and is threaded into the
    /// matching parallel child. Once exhausted, `is_previous` selects a
    /// branch's recorded history (falling back to `initial`) at that level
    /// only, while `is_restore` keeps selecting history all the way down.
    pub(crate) fn activate(
        &mut self,
        id: NodeId,
        path_down: &[String],
        is_previous: bool,
        is_restore: bool,
    ) {
        self.nodes[id].active = true;
        match self.nodes[id].kind {
            NodeKind::Leaf => {}
            NodeKind::Parallel => {
                let head = path_down.first().cloned();
                for child in self.nodes[id].children.clone() {
                    if head.as_deref() == Some(self.nodes[child].name.as_str()) {
                        self.activate(child, &path_down[1..], is_previous, is_restore);
                    } else {
                        self.activate(child, &[], is_previous, is_restore);
                    }
                }
            }
            NodeKind::Branch => {
                if let Some(head) = path_down.first().cloned() {
                    // Explicit path: the re-entry flags keep travelling
                    // with the tail.
                    self.nodes[id].history = Some(head.clone());
                    if let Some(child) = self.child_named(id, &head) {
                        self.activate(child, &path_down[1..], is_previous, is_restore);
                    } else {
                        debug_assert!(false, "path segment '{head}' is not a child of {}", self.nodes[id].path);
                    }
                } else {
                    let chosen = if is_previous || is_restore {
                        self.nodes[id]
                            .history
                            .clone()
                            .or_else(|| self.nodes[id].initial.clone())
                    } else {
                        self.nodes[id].initial.clone()
                    };
                    let Some(chosen) = chosen else { return };
                    self.nodes[id].history = Some(chosen.clone());
                    if let Some(child) = self.child_named(id, &chosen) {
                        // Below the level that consumed the flag, only
                        // `restore` keeps history re-entry going.
                        self.activate(child, &[], is_restore, is_restore);
                    }
                }
            }
        }
    }

    fn child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::design::{Design, StateConfig};
    use crate::core::node::ROOT;

    fn traffic() -> Tree<()> {
        let design = Design::new(())
            .initial("light")
            .state(
                "light",
                StateConfig::new()
                    .initial("red")
                    .state("red", StateConfig::new())
                    .state("green", StateConfig::new())
                    .state("blue", StateConfig::new()),
            )
            .state("off", StateConfig::new());
        Tree::build(&design, "#t").unwrap()
    }

    fn segments(path: &str) -> Vec<String> {
        path.split('.').map(String::from).collect()
    }

    #[test]
    fn initial_activation_follows_initials() {
        let mut tree = traffic();
        tree.activate(ROOT, &[], false, false);
        assert_eq!(
            tree.active_paths(),
            ["#t.root", "#t.root.light", "#t.root.light.red"]
        );
    }

    #[test]
    fn explicit_path_overrides_initial() {
        let mut tree = traffic();
        tree.activate(ROOT, &segments("light.green"), false, false);
        assert!(tree.active_paths().contains(&"#t.root.light.green".to_owned()));
    }

    #[test]
    fn parent_of_active_node_is_active() {
        let mut tree = traffic();
        tree.activate(ROOT, &segments("light.blue"), false, false);
        for id in tree.active_ids() {
            if let Some(parent) = tree.node(id).parent {
                assert!(tree.node(parent).active);
            }
        }
    }

    #[test]
    fn deactivation_records_history() {
        let mut tree = traffic();
        tree.activate(ROOT, &segments("light.green"), false, false);
        tree.deactivate(ROOT);
        assert!(tree.active_ids().is_empty());

        let light = tree.find_transition_targets("light")[0];
        assert_eq!(tree.node(light).history.as_deref(), Some("green"));
    }

    #[test]
    fn previous_reenters_last_active_child() {
        let mut tree = traffic();
        tree.activate(ROOT, &segments("light.green"), false, false);
        tree.deactivate(ROOT);
        tree.activate(ROOT, &segments("light"), true, false);
        assert!(tree.active_paths().contains(&"#t.root.light.green".to_owned()));
    }

    #[test]
    fn plain_reentry_resets_to_initial() {
        let mut tree = traffic();
        tree.activate(ROOT, &segments("light.green"), false, false);
        tree.deactivate(ROOT);
        tree.activate(ROOT, &segments("light"), false, false);
        assert!(tree.active_paths().contains(&"#t.root.light.red".to_owned()));
    }

    #[test]
    fn restore_descends_through_nested_branches() {
        let design = Design::new(())
            .initial("a")
            .state(
                "a",
                StateConfig::new().initial("inner").state(
                    "inner",
                    StateConfig::new()
                        .initial("x")
                        .state("x", StateConfig::new())
                        .state("y", StateConfig::new()),
                ),
            )
            .state("b", StateConfig::new());
        let mut tree = Tree::build(&design, "#t").unwrap();

        tree.activate(ROOT, &segments("a.inner.y"), false, false);
        tree.deactivate(ROOT);

        // `previous` at one level only: the nested branch resets.
        tree.activate(ROOT, &segments("a"), true, false);
        assert!(tree.active_paths().contains(&"#t.root.a.inner.x".to_owned()));
        tree.deactivate(ROOT);

        // `restore` keeps picking history all the way down.
        tree.activate(ROOT, &segments("a"), false, true);
        assert!(tree.active_paths().contains(&"#t.root.a.inner.y".to_owned()));
    }

    #[test]
    fn parallel_children_all_activate() {
        let design = Design::new(())
            .state(
                "a",
                StateConfig::new()
                    .initial("x")
                    .state("x", StateConfig::new())
                    .state("y", StateConfig::new()),
            )
            .state(
                "b",
                StateConfig::new()
                    .initial("m")
                    .state("m", StateConfig::new())
                    .state("n", StateConfig::new()),
            );
        let mut tree = Tree::build(&design, "#t").unwrap();

        tree.activate(ROOT, &[], false, false);
        let active = tree.active_paths();
        assert!(active.contains(&"#t.root.a.x".to_owned()));
        assert!(active.contains(&"#t.root.b.m".to_owned()));

        // Steering one region leaves the other on its initial.
        tree.deactivate(ROOT);
        tree.activate(ROOT, &segments("a.y"), false, false);
        let active = tree.active_paths();
        assert!(active.contains(&"#t.root.a.y".to_owned()));
        assert!(active.contains(&"#t.root.b.m".to_owned()));
    }
}
