//! Traffic light driven by timed repeats.
//!
//! The light advances on its own (red → green → yellow → red) and a
//! pedestrian button cuts the green phase short. Run with
//! `RUST_LOG=treestate=debug` to watch the dispatch flow.

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};
use treestate::{action, to, Design, Item, Machine, Repeat, StateConfig};

#[derive(Debug, Clone, Default)]
struct TrafficData {
    cycles: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let design = Design::new(TrafficData::default())
        .id("traffic-light")
        .initial("red")
        .state("red", StateConfig::new().repeat(Repeat::every_secs(3.0, to("green"))))
        .state(
            "green",
            StateConfig::new()
                .repeat(Repeat::every_secs(3.0, to("yellow")))
                .on("REQUEST_CROSSING", to("yellow")),
        )
        .state(
            "yellow",
            StateConfig::new().repeat(Repeat::every_secs(
                1.0,
                Item::new()
                    .action(|d: &mut TrafficData, _, _| d.cycles += 1)
                    .to("red"),
            )),
        )
        .value("cycles", |d| json!(d.cycles));

    let machine = Machine::new(design)?;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            machine.init().await?;
            let _subscription = machine.on_update(|m| {
                let light = ["red", "green", "yellow"]
                    .into_iter()
                    .find(|name| m.is_in(name))
                    .unwrap_or("?");
                println!("light: {:8} cycles: {}", light, m.values()["cycles"]);
            });

            tokio::time::sleep(Duration::from_secs(4)).await;
            println!("-- pedestrian button pressed --");
            machine.send("REQUEST_CROSSING").await?;
            tokio::time::sleep(Duration::from_secs(6)).await;

            println!("done after {} full cycles", machine.data().cycles);
            Ok(())
        })
        .await
}
