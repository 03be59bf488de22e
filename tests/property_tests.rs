// treestate/tests/property_tests.rs
//
// Property-based checks of the activation invariants: whatever event
// sequence is thrown at a machine, the active set stays a well-formed
// slice of the tree and replays are deterministic.

use proptest::prelude::*;
use serde_json::json;
use treestate::{action, to, Design, Machine, NodeKind, StateConfig};

#[derive(Debug, Clone, Default, PartialEq)]
struct Data {
    count: i64,
}

fn design() -> Design<Data> {
    Design::new(Data::default())
        .initial("mode")
        .state(
            "mode",
            StateConfig::new()
                .initial("manual")
                .state("manual", StateConfig::new().on("AUTO", to("auto")))
                .state(
                    "auto",
                    StateConfig::new()
                        .initial("scan")
                        .state("scan", StateConfig::new().on("LOCK", to("track")))
                        .state("track", StateConfig::new())
                        .on("MANUAL", to("manual")),
                ),
        )
        .state(
            "panel",
            StateConfig::new()
                .state(
                    "audio",
                    StateConfig::new()
                        .initial("muted")
                        .state("muted", StateConfig::new().on("UNMUTE", to("live")))
                        .state("live", StateConfig::new()),
                )
                .state(
                    "video",
                    StateConfig::new()
                        .initial("off")
                        .state("off", StateConfig::new())
                        .state("on", StateConfig::new()),
                ),
        )
        .on("PANEL", to("panel"))
        .on("BACK", to("mode.previous"))
        .on("RESTORE", to("mode.restore"))
        .on("COUNT", action(|d: &mut Data, _, _| d.count += 1))
        .value("count", |d| json!(d.count))
}

fn check_invariants(machine: &Machine<Data>) {
    machine.with_tree(|tree| {
        let nodes: Vec<(String, NodeKind, bool)> = tree
            .nodes()
            .map(|node| (node.path.clone(), node.kind, node.active))
            .collect();

        // A state is active => its parent is active.
        for (path, _, active) in &nodes {
            if !active {
                continue;
            }
            if let Some((parent, _)) = path.rsplit_once('.') {
                if let Some((_, _, parent_active)) =
                    nodes.iter().find(|(other, _, _)| other.as_str() == parent)
                {
                    assert!(parent_active, "active state '{path}' has an inactive parent");
                }
            }
        }

        // Branch: at most one active direct child. Parallel: all or none.
        for (path, kind, active) in &nodes {
            let children: Vec<&(String, NodeKind, bool)> = nodes
                .iter()
                .filter(|(other, _, _)| {
                    other.rsplit_once('.').map(|(parent, _)| parent) == Some(path.as_str())
                })
                .collect();
            match kind {
                NodeKind::Branch => {
                    let active_children = children.iter().filter(|(_, _, a)| *a).count();
                    assert!(
                        active_children <= 1,
                        "branch '{path}' has {active_children} active children"
                    );
                }
                NodeKind::Parallel => {
                    if *active {
                        assert!(
                            children.iter().all(|(_, _, a)| *a),
                            "active parallel '{path}' has inactive children"
                        );
                    }
                }
                NodeKind::Leaf => {}
            }
        }

        // The reported active list is exactly the depth-first flag scan.
        let from_flags: Vec<String> = nodes
            .iter()
            .filter(|(_, _, active)| *active)
            .map(|(path, _, _)| path.clone())
            .collect();
        assert_eq!(machine.active(), from_flags);
    });
}

prop_compose! {
    fn arb_event()(variant in 0..8u8) -> &'static str {
        match variant {
            0 => "AUTO",
            1 => "MANUAL",
            2 => "LOCK",
            3 => "PANEL",
            4 => "BACK",
            5 => "RESTORE",
            6 => "UNMUTE",
            _ => "COUNT",
        }
    }
}

prop_compose! {
    fn arb_event_sequence()(events in prop::collection::vec(arb_event(), 0..40)) -> Vec<&'static str> {
        events
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build test runtime")
}

proptest! {
    #[test]
    fn activation_invariants_hold_for_any_event_sequence(events in arb_event_sequence()) {
        runtime().block_on(async {
            let machine = Machine::new(design()).unwrap();
            machine.init().await.unwrap();
            check_invariants(&machine);
            for event in &events {
                machine.send(*event).await.unwrap();
                check_invariants(&machine);
            }
        });
    }

    #[test]
    fn identical_sequences_replay_identically(events in arb_event_sequence()) {
        runtime().block_on(async {
            let first = Machine::new(design()).unwrap();
            first.init().await.unwrap();
            let second = first.duplicate().unwrap();
            second.init().await.unwrap();

            for event in &events {
                first.send(*event).await.unwrap();
                second.send(*event).await.unwrap();
            }

            prop_assert_eq!(first.data().count, second.data().count);
            prop_assert_eq!(first.values(), second.values());

            let strip = |paths: Vec<String>, id: &str| -> Vec<String> {
                paths.into_iter().map(|p| p.trim_start_matches(id).to_owned()).collect()
            };
            prop_assert_eq!(
                strip(first.active(), first.id()),
                strip(second.active(), second.id())
            );
            Ok(())
        })?;
    }
}
