//! UDP 传输上的端到端测试
//!
//! 使用本机回环地址和系统分配的端口；串行执行避免端口和线程争用。

use armature_core::{CommandKind, Component, ComponentConfig, ExecutionResult, Requirement};
use armature_manager::{
    GlobalComponentManager, LocalComponentManager, ManagerConfig, Transport, UdpTransport,
};
use armature_protocol::{PeerAddress, Request, Response};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

fn any_port() -> PeerAddress {
    "udp://127.0.0.1:0".parse().unwrap()
}

#[test]
#[serial]
fn test_udp_cluster_round_trip() {
    let gcm = Arc::new(GlobalComponentManager::new(Arc::new(UdpTransport::new())));
    let gcm_address = gcm.serve(&any_port()).unwrap();

    let a = Arc::new(LocalComponentManager::with_transport("a", Arc::new(UdpTransport::new())));
    let a_address = a.serve(&any_port()).unwrap();
    a.attach_global(gcm_address.clone()).unwrap();

    let x = Component::new("X", ComponentConfig::passive());
    x.add_provided_interface("Ip")
        .unwrap()
        .add_command_qualified_read::<i64, i64, _>("Square", |v| v * v)
        .unwrap();
    a.add_component(x).unwrap();

    let b = Arc::new(LocalComponentManager::with_transport("b", Arc::new(UdpTransport::new())));
    b.serve(&any_port()).unwrap();
    b.attach_global(gcm_address.clone()).unwrap();

    let y = Component::new("Y", ComponentConfig::passive());
    let square = y
        .add_required_interface("Ic")
        .unwrap()
        .add_function("Square", CommandKind::QualifiedRead, Requirement::Mandatory)
        .unwrap();
    b.add_component(y).unwrap();

    let id = b.connect("Y", "Ic", "a", "X", "Ip").unwrap();
    assert_eq!(square.call_qualified::<i64, i64>(12), Ok(144));
    // 参数类型不符被拒绝
    assert_eq!(
        square.execute_blocking(&["twelve".into()]).code,
        ExecutionResult::BadInput
    );

    // 目录中记录的是实际分配的端口
    let registered = gcm.process("a").unwrap();
    assert_eq!(registered.address, a_address);

    // 直接查询全局管理器
    let transport = UdpTransport::new();
    match transport
        .call(&gcm_address, &Request::ListConnections, Duration::from_secs(1))
        .unwrap()
    {
        Response::Connections(list) => {
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].id, id);
        },
        other => panic!("unexpected response: {:?}", other),
    }

    b.disconnect(id).unwrap();
    assert!(gcm.connections().is_empty());
}

#[test]
#[serial]
fn test_udp_call_times_out_without_listener() {
    // 绑定后立即释放，得到一个（大概率）无人监听的端口
    let port = std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let transport = UdpTransport::new();
    let result = transport.call(
        &PeerAddress::Udp(port),
        &Request::ListProcesses,
        Duration::from_millis(100),
    );
    // Linux 上通常是 ICMP 拒绝，其它平台是超时
    let code = result.unwrap_err().code();
    assert!(code == ExecutionResult::NetworkError || code == ExecutionResult::TimedOut);
}

#[test]
#[serial]
fn test_managers_from_config_files() {
    let dir = tempfile::tempdir().unwrap();

    let mut gcm_config = ManagerConfig::new("gcm");
    gcm_config.transport.listen_address = Some("udp://127.0.0.1:0".to_string());
    let gcm_path = dir.path().join("gcm.toml");
    gcm_config.save(&gcm_path).unwrap();

    let gcm = GlobalComponentManager::from_config(
        &ManagerConfig::load(&gcm_path).unwrap(),
        Arc::new(UdpTransport::new()),
    )
    .unwrap();
    let gcm_address = gcm.address().unwrap();

    let text = format!(
        r#"
        [manager]
        process_name = "arm"
        global_address = "{}"
        request_timeout_ms = 500

        [transport]
        listen_address = "udp://127.0.0.1:0"
        service_workers = 2
        "#,
        gcm_address
    );
    let path = dir.path().join("arm.toml");
    std::fs::write(&path, text).unwrap();

    let config = ManagerConfig::load(&path).unwrap();
    let arm = LocalComponentManager::from_config(&config, Arc::new(UdpTransport::new())).unwrap();
    assert_eq!(arm.global_address(), Some(gcm_address));
    assert!(gcm.process("arm").is_some());

    arm.add_component(Component::new("Joint", ComponentConfig::passive()))
        .unwrap();
    let registered = gcm.process("arm").unwrap();
    assert_eq!(registered.components.len(), 1);

    assert!(arm.shutdown());
    assert!(gcm.process("arm").is_none());
}
