//! Health-triggered restarts against the in-memory runtime and store.

use std::sync::Arc;
use std::time::Duration;

use dockyard_core::{InstanceKind, NameLocks};
use dockyard_driver::{ContainerHealth, ContainerRuntime, ContainerSpec, FakeRuntime};
use dockyard_health::{CheckOutcome, HealthChecker};
use dockyard_state::{Instance, InstanceStore, StateStore};

struct Harness {
    runtime: Arc<FakeRuntime>,
    store: Arc<StateStore>,
    locks: NameLocks,
    checker: HealthChecker,
}

fn harness() -> Harness {
    let runtime = Arc::new(FakeRuntime::new());
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let locks = NameLocks::new();
    let checker = HealthChecker::new(
        runtime.clone(),
        store.clone(),
        locks.clone(),
        Duration::from_secs(30),
    );
    Harness {
        runtime,
        store,
        locks,
        checker,
    }
}

impl Harness {
    fn add(&self, name: &str, kind: InstanceKind, health: ContainerHealth) {
        let container = kind.container_name(name);
        self.runtime.seed_container(
            ContainerSpec {
                name: container.clone(),
                image: "img".into(),
                ..Default::default()
            },
            true,
        );
        self.runtime.set_health(&container, health);
        self.store
            .upsert_instance(&Instance {
                name: name.into(),
                kind,
                language: "php".into(),
                image: "img".into(),
                container_id: "cid".into(),
                container_name: container,
                host_ip: "127.0.0.1".into(),
                container_port: 40001,
                work_dir: String::new(),
                store_dir: String::new(),
                owner: "alice@example.com".into(),
                created_at: 1,
                registry_key: name.into(),
                service: "php".into(),
                install_exec_id: None,
                restart_count: 0,
                last_restart_at: None,
            })
            .unwrap();
    }

    fn restart_count(&self, name: &str, kind: InstanceKind) -> u32 {
        self.store
            .get_instance(name, kind)
            .unwrap()
            .unwrap()
            .restart_count
    }
}

#[tokio::test]
async fn unhealthy_instance_restarted_once_per_detection() {
    let h = harness();
    h.add("blog", InstanceKind::Application, ContainerHealth::Unhealthy);

    let restarted = h.checker.check_once().await.unwrap();
    assert_eq!(restarted, vec!["blog".to_string()]);
    assert_eq!(h.runtime.calls("restart"), 1);
    assert_eq!(h.restart_count("blog", InstanceKind::Application), 1);
    assert!(
        h.store
            .get_instance("blog", InstanceKind::Application)
            .unwrap()
            .unwrap()
            .last_restart_at
            .is_some()
    );

    h.runtime.set_health("app-blog", ContainerHealth::Healthy);
    let restarted = h.checker.check_once().await.unwrap();
    assert!(restarted.is_empty());
    assert_eq!(h.runtime.calls("restart"), 1);
}

#[tokio::test]
async fn repeated_detection_restarts_again() {
    let h = harness();
    h.add("blog", InstanceKind::Application, ContainerHealth::Unhealthy);

    h.checker.check_once().await.unwrap();
    h.checker.check_once().await.unwrap();
    assert_eq!(h.runtime.calls("restart"), 2);
    assert_eq!(h.restart_count("blog", InstanceKind::Application), 2);
}

#[tokio::test]
async fn healthy_and_unknown_are_left_alone() {
    let h = harness();
    h.add("a", InstanceKind::Application, ContainerHealth::Healthy);
    h.add("b", InstanceKind::Application, ContainerHealth::Starting);
    h.add("orders", InstanceKind::Database, ContainerHealth::None);

    assert!(h.checker.check_once().await.unwrap().is_empty());
    assert_eq!(h.runtime.calls("restart"), 0);
}

#[tokio::test]
async fn busy_instance_is_skipped() {
    let h = harness();
    h.add("blog", InstanceKind::Application, ContainerHealth::Unhealthy);
    let instance = h
        .store
        .get_instance("blog", InstanceKind::Application)
        .unwrap()
        .unwrap();

    let guard = h.locks.lock("app-blog").await;
    assert_eq!(h.checker.check_instance(&instance).await, CheckOutcome::Busy);
    assert_eq!(h.runtime.calls("restart"), 0);

    drop(guard);
    assert_eq!(
        h.checker.check_instance(&instance).await,
        CheckOutcome::Restarted
    );
}

#[tokio::test]
async fn inspection_failure_is_isolated() {
    let h = harness();
    h.add("broken", InstanceKind::Application, ContainerHealth::Unhealthy);
    h.add("sick", InstanceKind::Application, ContainerHealth::Unhealthy);
    h.runtime.fail_inspect("app-broken", 1);

    let restarted = h.checker.check_once().await.unwrap();
    assert_eq!(restarted, vec!["sick".to_string()]);
}

#[tokio::test]
async fn missing_container_is_reported_not_fatal() {
    let h = harness();
    h.add("blog", InstanceKind::Application, ContainerHealth::Unhealthy);
    h.runtime.remove("app-blog", true).await.unwrap();

    let instance = h
        .store
        .get_instance("blog", InstanceKind::Application)
        .unwrap()
        .unwrap();
    assert!(matches!(
        h.checker.check_instance(&instance).await,
        CheckOutcome::Failed(_)
    ));
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let h = harness();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let checker = Arc::new(h.checker);
    let task = {
        let checker = checker.clone();
        tokio::spawn(async move { checker.run(rx).await })
    };
    tx.send(true).unwrap();
    task.await.unwrap();
}
