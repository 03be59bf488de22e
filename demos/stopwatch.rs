//! Stopwatch built on a frame-rate repeat.
//!
//! The running state accumulates elapsed time from the repeat tick's
//! `interval` result. Accumulation uses a secret action so the 60 Hz ticks
//! don't spam subscribers; only start/stop/reset notify.

use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use tracing_subscriber::{fmt, EnvFilter};
use treestate::{action, to, Design, Item, Machine, Repeat, StateConfig, WhenValue};

#[derive(Debug, Clone, Default)]
struct Stopwatch {
    elapsed_ms: f64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let design = Design::new(Stopwatch::default())
        .id("stopwatch")
        .initial("stopped")
        .state(
            "stopped",
            StateConfig::new()
                .on("START", to("running"))
                .on("RESET", action(|d: &mut Stopwatch, _, _| d.elapsed_ms = 0.0)),
        )
        .state(
            "running",
            StateConfig::new()
                .repeat(Repeat::each_frame(Item::new().secret_action(
                    |d: &mut Stopwatch, _, r: &Value| {
                        d.elapsed_ms += r["interval"].as_f64().unwrap_or(0.0);
                    },
                )))
                .on("STOP", to("stopped")),
        )
        .value("seconds", |d| json!((d.elapsed_ms / 100.0).round() / 10.0));

    let machine = Machine::new(design)?;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            machine.init().await?;

            machine.send("START").await?;
            tokio::time::sleep(Duration::from_secs(2)).await;
            machine.send("STOP").await?;

            let status = machine.when_in(vec![
                ("stopped", WhenValue::of(json!("stopped"))),
                ("running", WhenValue::of(json!("running"))),
            ]);
            println!(
                "{} at {}s (raw {:.1}ms)",
                status[0], machine.values()["seconds"], machine.data().elapsed_ms
            );

            machine.send("RESET").await?;
            println!("after reset: {}s", machine.values()["seconds"]);
            Ok(())
        })
        .await
}
