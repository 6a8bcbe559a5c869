//! # Example: web_pool
//!
//! Runs a small service on the local machine and reconfigures it while it runs.
//!
//! Demonstrates how to:
//! - Register a [`NodePool`] of [`LocalNode`]s and a service with two instances.
//! - Watch transitions with the built-in `LogWriter` subscriber.
//! - Grow the service through [`SupervisorHandle::apply`] without stopping it.
//! - Shut down from code; the same path runs on SIGINT/SIGTERM.
//!
//! ## Flow
//! ```text
//! main()
//!   ├─► spawn Supervisor::run()
//!   │     └─► web.0, web.1: start → up → monitor every 2s
//!   │
//!   └─► controller
//!         ├─► sleep 5s, apply(count = 3)   → web.2 starts on the next node
//!         ├─► sleep 5s, print snapshot
//!         └─► shutdown()                   → kill every instance, wait for down
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example web_pool --features logging
//! ```

use std::{sync::Arc, time::Duration};

use servicevisor::{
    Config, LocalNode, LogWriter, NodePool, ServiceConfig, Subscribe, Supervisor,
};
use tracing_subscriber::EnvFilter;

fn web(count: usize) -> ServiceConfig {
    // The start action must return once the process is running: background it
    // and record its pid where monitor/kill expect it.
    ServiceConfig::new(
        "web",
        "nohup sleep 3600 >/dev/null 2>&1 & echo $! > %(pid_file)s",
        "local",
    )
    .with_count(count)
    .with_pid_file("%(tmp)s/%(id)s.pid")
    .with_monitor_interval(Duration::from_secs(2))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1) Runtime configuration; `tmp` is visible to every template.
    let mut cfg = Config::default();
    cfg.grace = Duration::from_secs(10);
    cfg.context.insert(
        "tmp".into(),
        std::env::temp_dir().to_string_lossy().into_owned(),
    );

    // 2) Two "nodes" that both run on this host.
    let pool = NodePool::new(
        "local",
        vec![LocalNode::arc("node-a"), LocalNode::arc("node-b")],
    );
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];

    let sup = Supervisor::builder(cfg)
        .with_pool(pool)
        .with_subscribers(subs)
        .with_service(web(2))
        .build();
    let handle = sup.handle();
    let runner = tokio::spawn(sup.run());

    // 3) Grow, inspect, stop.
    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.apply(vec![web(3)]).await?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    for svc in handle.snapshot().await? {
        println!("{} is {:?}", svc.name, svc.state);
        for inst in &svc.instances {
            println!("  {}.{} on {}: {:?}", svc.name, inst.number, inst.node, inst.state);
        }
    }

    handle.shutdown()?;
    runner.await??;
    Ok(())
}
