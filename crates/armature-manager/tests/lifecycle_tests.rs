//! 批量生命周期测试

use armature_core::{CommandKind, Component, ComponentConfig, ComponentState, ExecutionResult, Requirement};
use armature_manager::{LocalComponentManager, ManagerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

/// drain 过程中 kill：已取出的调用全部执行完后才到达 Finished
#[test]
fn test_kill_during_drain_finishes_after_drain() {
    let manager = LocalComponentManager::new("p");

    let worker = Component::new("Worker", ComponentConfig::periodic(Duration::from_millis(1)));
    let provided = worker.add_provided_interface("Jobs").unwrap();
    let started = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let (s, c) = (started.clone(), completed.clone());
    provided
        .add_command_write::<i64, _>("Work", move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    manager.add_component(worker).unwrap();

    let caller = Component::new("Caller", ComponentConfig::passive());
    let work = caller
        .add_required_interface("Jobs")
        .unwrap()
        .add_function("Work", CommandKind::Write, Requirement::Mandatory)
        .unwrap();
    manager.add_component(caller).unwrap();

    manager.connect("Caller", "Jobs", "p", "Worker", "Jobs").unwrap();
    manager.create_all().unwrap();

    // 启动前入队，第一次 drain 一次取出全部三个调用
    for i in 0..3 {
        assert_eq!(work.call_write(i as i64), ExecutionResult::CommandQueued);
    }
    manager.start_all().unwrap();

    let deadline = Instant::now() + WAIT;
    while started.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(started.load(Ordering::SeqCst), 1);

    manager.kill_all();
    let worker = manager.component("Worker").unwrap();
    assert_eq!(worker.state(), ComponentState::Finishing);

    assert!(manager.wait_for_state_all(ComponentState::Finished, WAIT));
    assert_eq!(completed.load(Ordering::SeqCst), 3);

    // 终止后的邮箱拒绝新调用
    assert_eq!(work.call_write(9i64), ExecutionResult::NoMailbox);
}

#[test]
fn test_wait_for_state_all_times_out() {
    let manager = LocalComponentManager::new("p");
    manager
        .add_component(Component::new("A", ComponentConfig::periodic(Duration::from_millis(5))))
        .unwrap();
    manager.create_all().unwrap();

    // 未启动，不会到达 Active
    let begin = Instant::now();
    assert!(!manager.wait_for_state_all(ComponentState::Active, Duration::from_millis(30)));
    assert!(begin.elapsed() >= Duration::from_millis(30));

    // Ready 已经达到
    assert!(manager.wait_for_state_all(ComponentState::Ready, Duration::ZERO));
    assert!(manager.shutdown());
}

#[test]
fn test_component_defaults_from_config() {
    let mut config = ManagerConfig::new("arm");
    config.component = ComponentConfig::periodic(Duration::from_millis(4)).with_mailbox_capacity(8);

    let network = armature_manager::LoopbackNetwork::new();
    let manager = LocalComponentManager::from_config(&config, Arc::new(network.transport())).unwrap();
    assert_eq!(manager.process_name(), "arm");
    assert!(manager.address().is_none());

    let component = Component::new("Loop", manager.component_config().clone());
    let component = manager.add_component(component).unwrap();
    manager.create_all().unwrap();
    manager.start_all().unwrap();
    assert!(component.wait_for_state(ComponentState::Active, WAIT));
    assert_eq!(component.config().mailbox_capacity, 8);
    assert!(component.mailbox_metrics().is_some());

    assert!(manager.shutdown());
    assert_eq!(component.state(), ComponentState::Finished);
}
