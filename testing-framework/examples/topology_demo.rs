// Example: Shared Topology Demo
//
// Registers two suites that both need the same lab topology and runs them
// concurrently, showing that the topology is activated once and deactivated
// after the last suite releases it.
//
// Run this example with:
//   RUST_LOG=info cargo run --example topology_demo
//
// Override runner settings from the environment:
//   SWITCHTEST_FILTER=storm SWITCHTEST_REPORT=target/report.xml cargo run --example topology_demo

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use switchtest_framework::prelude::*;

/// Simulated two-switch lab
#[derive(Default)]
struct LabTopology {
    sessions: AtomicU32,
}

impl LabTopology {
    async fn send_broadcast(&self, frames: u32) -> Result<u32> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Storm control caps broadcasts at 100 frames
        Ok(frames.min(100))
    }
}

#[async_trait]
impl Topology for LabTopology {
    async fn activate(&self) -> Result<()> {
        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("Lab: opening device session #{}", session);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        log::info!("Lab: closing device session");
        Ok(())
    }
}

#[derive(Default)]
struct StormControl {
    forwarded: u32,
}

#[derive(Default)]
struct MacLearning;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("========================================");
    println!("Switchtest Framework {}", switchtest_framework::VERSION);
    println!("Shared Topology Demo");
    println!("========================================\n");

    let config = RunnerConfig {
        suite_concurrency: 2,
        ..RunnerConfig::default()
    }
    .apply_env()?;
    let harness = TestHarness::new(config);
    harness
        .catalog()
        .register_shared("lab", Arc::new(LabTopology::default()));

    register_storm_control(harness.registry())?;
    register_mac_learning(harness.registry())?;

    let report = harness.run().await?;
    println!("{}", report.summary());

    let lab = TopoTypeId::new("lab");
    println!(
        "Lab still live after run: {}",
        harness.resolver().is_live(&lab)
    );
    Ok(())
}

fn register_storm_control(registry: &SuiteRegistry) -> Result<()> {
    registry.inject_topo::<StormControl>("lab", "lab")?;
    registry.add_before_each::<StormControl, _, _>("reset counters", |ctx| async move {
        ctx.state().await.forwarded = 0;
        Ok(())
    })?;
    registry.add_test::<StormControl, _, _>("caps broadcast storm", |ctx| async move {
        let lab = ctx.topology::<LabTopology>("lab")?;
        let forwarded = lab.send_broadcast(1_000).await?;
        ctx.state().await.forwarded = forwarded;
        ensure!(forwarded == 100, "expected 100 frames, got {}", forwarded);
        Ok(())
    })?;
    registry.add_test_with_timeout::<StormControl, _, _>(
        "passes small bursts",
        Duration::from_secs(5),
        |ctx| async move {
            let lab = ctx.topology::<LabTopology>("lab")?;
            let forwarded = lab.send_broadcast(10).await?;
            ensure!(forwarded == 10, "expected 10 frames, got {}", forwarded);
            Ok(())
        },
    )?;
    registry.generate::<StormControl>("Storm control")?;
    Ok(())
}

fn register_mac_learning(registry: &SuiteRegistry) -> Result<()> {
    registry.inject_topo::<MacLearning>("lab", "lab")?;
    registry.add_test::<MacLearning, _, _>("learns source mac", |ctx| async move {
        let lab = ctx.topology::<LabTopology>("lab")?;
        lab.send_broadcast(1).await?;
        Ok(())
    })?;
    registry.generate::<MacLearning>("MAC learning")?;
    Ok(())
}
