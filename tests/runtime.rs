//! End-to-end behavior of a running supervisor: placement, health monitoring,
//! instance restart and resuming from persisted state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use servicevisor::{
    ActionCommand, ActionKind, Config, MemoryStore, Node, NodePool, OutcomeSink, ServiceConfig,
    ServiceData, ServiceState, StateManager, Supervisor, SupervisorHandle,
};

/// Answers every action immediately. Monitors of instances in `failing` exit 1.
#[derive(Debug, Default)]
struct Script {
    failing: Mutex<HashSet<String>>,
    seen: Mutex<Vec<(String, String)>>,
}

impl Script {
    fn fail(&self, instance: &str) {
        self.failing.lock().unwrap().insert(instance.to_string());
    }

    fn heal(&self, instance: &str) {
        self.failing.lock().unwrap().remove(instance);
    }

    fn count(&self, kind: ActionKind) -> usize {
        let suffix = format!(".{}", kind.as_str());
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, name)| name.ends_with(&suffix))
            .count()
    }

    fn nodes_for(&self, kind: ActionKind) -> Vec<(String, String)> {
        let suffix = format!(".{}", kind.as_str());
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, name)| name.ends_with(&suffix))
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
struct ScriptedNode {
    name: String,
    script: Arc<Script>,
}

impl Node for ScriptedNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, action: ActionCommand, sink: OutcomeSink) {
        self.script
            .seen
            .lock()
            .unwrap()
            .push((self.name.clone(), action.name.clone()));

        let instance = action
            .name
            .rsplit_once('.')
            .map(|(id, _)| id.to_string())
            .unwrap_or_default();
        let status = match action.kind {
            ActionKind::Monitor if self.script.failing.lock().unwrap().contains(&instance) => 1,
            _ => 0,
        };
        sink.complete(status);
    }
}

fn pool(script: &Arc<Script>) -> NodePool {
    let node = |name: &str| -> Arc<dyn Node> {
        Arc::new(ScriptedNode {
            name: name.to_string(),
            script: Arc::clone(script),
        })
    };
    NodePool::new("pool", vec![node("A"), node("B")])
}

fn web(count: usize) -> ServiceConfig {
    ServiceConfig::new("web", "run-web", "pool")
        .with_count(count)
        .with_monitor_interval(Duration::from_secs(1))
}

async fn wait_for<F>(handle: &SupervisorHandle, mut pred: F) -> Vec<ServiceData>
where
    F: FnMut(&[ServiceData]) -> bool,
{
    for _ in 0..500 {
        let snap = handle.snapshot().await.unwrap();
        if pred(&snap) {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached");
}

fn state_of(snap: &[ServiceData], name: &str) -> Option<ServiceState> {
    snap.iter().find(|s| s.name == name).map(|s| s.state)
}

#[tokio::test(start_paused = true)]
async fn instances_are_placed_round_robin() {
    let script = Arc::new(Script::default());
    let sup = Supervisor::builder(Config::default())
        .with_pool(pool(&script))
        .with_service(web(3))
        .build();
    let handle = sup.handle();
    let join = tokio::spawn(sup.run());

    wait_for(&handle, |s| state_of(s, "web") == Some(ServiceState::Up)).await;
    let starts = script.nodes_for(ActionKind::Start);
    assert_eq!(
        starts,
        [
            ("A".to_string(), "web.0.start".to_string()),
            ("B".to_string(), "web.1.start".to_string()),
            ("A".to_string(), "web.2.start".to_string()),
        ]
    );

    handle.shutdown().unwrap();
    join.await.unwrap().unwrap();
    assert_eq!(script.count(ActionKind::Kill), 3);
}

#[tokio::test(start_paused = true)]
async fn failing_monitor_degrades_and_restart_recovers() {
    let script = Arc::new(Script::default());
    let sup = Supervisor::builder(Config::default())
        .with_pool(pool(&script))
        .with_service(web(2))
        .build();
    let handle = sup.handle();
    let health = sup.health();
    let join = tokio::spawn(sup.run());

    wait_for(&handle, |s| state_of(s, "web") == Some(ServiceState::Up)).await;

    script.fail("web.1");
    let snap = wait_for(&handle, |s| state_of(s, "web") == Some(ServiceState::Degraded)).await;
    let states: Vec<_> = snap[0].instances.iter().map(|i| i.state).collect();
    assert_eq!(states[1], servicevisor::InstanceState::Down);

    for _ in 0..50 {
        if health.state_of("web.1").await == Some("down") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(health.state_of("web.1").await, Some("down"));

    script.heal("web.1");
    handle.restart_instance("web", 1).await.unwrap();
    wait_for(&handle, |s| state_of(s, "web") == Some(ServiceState::Up)).await;

    // Only down instances can be restarted.
    let err = handle.restart_instance("web", 0).await.unwrap_err();
    assert_eq!(err.as_label(), "illegal_transition");

    handle.shutdown().unwrap();
    join.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn resumes_from_persisted_state_without_restarting() {
    let script = Arc::new(Script::default());
    let store = MemoryStore::new();

    let first = Supervisor::builder(Config::default())
        .with_pool(pool(&script))
        .with_service(web(2))
        .with_state_manager(StateManager::new(store.clone(), 1))
        .build();
    let handle = first.handle();
    let join = tokio::spawn(first.run());
    wait_for(&handle, |s| state_of(s, "web") == Some(ServiceState::Up)).await;

    // Simulate a crash: no shutdown, instances keep running.
    join.abort();
    let _ = join.await;
    assert!(!store.is_empty());
    let starts_before = script.count(ActionKind::Start);
    let monitors_before = script.count(ActionKind::Monitor);

    let second = Supervisor::builder(Config::default())
        .with_pool(pool(&script))
        .with_service(web(2))
        .with_state_manager(StateManager::new(store.clone(), 1))
        .build();
    let handle = second.handle();
    let join = tokio::spawn(second.run());

    let snap = wait_for(&handle, |_| script.count(ActionKind::Monitor) >= monitors_before + 2).await;
    assert_eq!(script.count(ActionKind::Start), starts_before);
    assert_eq!(snap[0].state, ServiceState::Up);
    let numbers: Vec<u64> = snap[0].instances.iter().map(|i| i.number).collect();
    assert_eq!(numbers, [0, 1]);

    // Numbering continues after the restored instances.
    handle.apply(vec![web(3)]).await.unwrap();
    let snap = handle.snapshot().await.unwrap();
    let numbers: Vec<u64> = snap[0].instances.iter().map(|i| i.number).collect();
    assert_eq!(numbers, [0, 1, 2]);

    handle.shutdown().unwrap();
    join.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn handle_fails_after_runtime_exits() {
    let script = Arc::new(Script::default());
    let sup = Supervisor::builder(Config::default())
        .with_pool(pool(&script))
        .build();
    let handle = sup.handle();
    let join = tokio::spawn(sup.run());

    handle.shutdown().unwrap();
    join.await.unwrap().unwrap();

    let err = handle.snapshot().await.unwrap_err();
    assert_eq!(err.as_label(), "runtime_closed");
}
