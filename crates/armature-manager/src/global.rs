//! 全局组件管理器
//!
//! 集群目录：`process -> component -> interface -> descriptor`，
//! 以及所有连接记录。跨进程连接按以下顺序建立：
//!
//! 1. 查找两端接口，任一不存在返回 `NoInterface`，不创建记录
//! 2. 分配连接 ID，记录为 `Requested`
//! 3. 通知服务端物化需求接口代理，再通知客户端物化提供接口代理
//! 4. 两端都确认后标记为 `Connected`
//!
//! 任一步失败时记录保持 `Requested`，已物化的一半被拆除，不自动重试。
//!
//! 一个需求接口同时只能有一条 `Connected` 或正在建立的记录。

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::transport::{Listener, RequestHandler, Transport};
use armature_protocol::{
    ConnectionId, ConnectionInfo, ConnectionStatus, Endpoint, ExecutionResult, InterfaceDescriptor,
    InterfaceKind, PeerAddress, ProcessDescriptor, Request, Response,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 全局组件管理器
pub struct GlobalComponentManager {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    join_timeout: Duration,
    service_workers: usize,
    processes: RwLock<BTreeMap<String, ProcessDescriptor>>,
    connections: Mutex<BTreeMap<ConnectionId, ConnectionInfo>>,
    /// 正在建立的连接；锁顺序总是先 `connections` 后 `pending`
    pending: Mutex<BTreeSet<ConnectionId>>,
    next_id: AtomicU64,
    listener: Mutex<Option<Listener>>,
}

impl GlobalComponentManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let defaults = ManagerConfig::default();
        Self {
            transport,
            request_timeout: defaults.request_timeout(),
            join_timeout: defaults.join_timeout(),
            service_workers: defaults.transport.service_workers,
            processes: RwLock::new(BTreeMap::new()),
            connections: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(BTreeSet::new()),
            next_id: AtomicU64::new(1),
            listener: Mutex::new(None),
        }
    }

    /// 按配置创建；配置了监听地址时开始服务
    pub fn from_config(
        config: &ManagerConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, ManagerError> {
        let mut manager = Self::new(transport);
        manager.request_timeout = config.request_timeout();
        manager.join_timeout = config.join_timeout();
        manager.service_workers = config.transport.service_workers;
        let manager = Arc::new(manager);

        if let Some(at) = config.listen_address()? {
            manager.serve(&at)?;
        }
        Ok(manager)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 在 `at` 上接受请求，返回实际监听地址
    pub fn serve(self: &Arc<Self>, at: &PeerAddress) -> Result<PeerAddress, ManagerError> {
        let handler: Arc<dyn RequestHandler> = Arc::new(GlobalService {
            manager: Arc::downgrade(self),
        });
        let listener = self
            .transport
            .listen(at, handler, self.service_workers)?
            .with_join_timeout(self.join_timeout);
        let address = listener.address().clone();

        let previous = self.listener.lock().replace(listener);
        if let Some(previous) = previous {
            previous.shutdown();
        }
        info!("Global component manager serving on {}", address);
        Ok(address)
    }

    pub fn address(&self) -> Option<PeerAddress> {
        self.listener.lock().as_ref().map(|l| l.address().clone())
    }

    /// 停止服务
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.shutdown();
        }
    }

    // ========================================================================
    // Directory
    // ========================================================================

    /// 注册或更新进程目录项
    pub fn register(&self, process: ProcessDescriptor) {
        let name = process.name.clone();
        let previous = self.processes.write().insert(name.clone(), process);
        if previous.is_some() {
            debug!("Process '{}' re-registered", name);
        } else {
            info!("Process '{}' registered", name);
        }
    }

    /// 注销进程，并拆除涉及它的所有连接
    ///
    /// 对端进程被通知拆除各自的一半；返回进程是否存在。
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.processes.write().remove(name).is_some();

        let dropped: Vec<ConnectionInfo> = {
            let mut connections = self.connections.lock();
            let ids: Vec<ConnectionId> = connections
                .values()
                .filter(|c| c.client.process == name || c.server.process == name)
                .map(|c| c.id)
                .collect();
            ids.iter().filter_map(|id| connections.remove(id)).collect()
        };

        for info in &dropped {
            for peer in [&info.client.process, &info.server.process] {
                if peer != name {
                    self.notify_teardown(peer, info.id);
                }
            }
        }

        if removed {
            info!(
                "Process '{}' unregistered ({} connection(s) dropped)",
                name,
                dropped.len()
            );
        }
        removed
    }

    pub fn process(&self, name: &str) -> Option<ProcessDescriptor> {
        self.processes.read().get(name).cloned()
    }

    /// 已注册进程（按名称排序）
    pub fn processes(&self) -> Vec<ProcessDescriptor> {
        self.processes.read().values().cloned().collect()
    }

    /// 查找接口描述
    pub fn lookup(&self, endpoint: &Endpoint) -> Result<InterfaceDescriptor, ManagerError> {
        self.processes
            .read()
            .get(&endpoint.process)
            .and_then(|p| p.lookup(&endpoint.component, &endpoint.interface))
            .cloned()
            .ok_or_else(|| ManagerError::NoInterface(endpoint.clone()))
    }

    /// 查找指定类型的接口，返回所在进程地址和描述
    fn resolve(
        &self,
        endpoint: &Endpoint,
        kind: InterfaceKind,
    ) -> Result<(PeerAddress, InterfaceDescriptor), ManagerError> {
        let processes = self.processes.read();
        let process = processes
            .get(&endpoint.process)
            .ok_or_else(|| ManagerError::NoInterface(endpoint.clone()))?;
        match process.lookup(&endpoint.component, &endpoint.interface) {
            Some(descriptor) if descriptor.kind == kind => {
                Ok((process.address.clone(), descriptor.clone()))
            },
            _ => Err(ManagerError::NoInterface(endpoint.clone())),
        }
    }

    /// 所有连接记录（按 ID 排序）
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections.lock().values().cloned().collect()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.lock().get(&id).cloned()
    }

    /// 分配连接 ID 并写入记录
    ///
    /// 需求接口已有 `Connected` 或正在建立的记录时返回 `AlreadyConnected`；
    /// 失败遗留的 `Requested` 记录不阻止重新连接。
    fn allocate(
        &self,
        client: Endpoint,
        server: Endpoint,
        status: ConnectionStatus,
    ) -> Result<ConnectionId, ManagerError> {
        let mut connections = self.connections.lock();
        let mut pending = self.pending.lock();
        let occupied = connections.values().any(|c| {
            c.client == client
                && (c.status == ConnectionStatus::Connected || pending.contains(&c.id))
        });
        if occupied {
            warn!("Refusing second connection of {}", client);
            return Err(ManagerError::AlreadyConnected(client));
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if status == ConnectionStatus::Requested {
            pending.insert(id);
        }
        connections.insert(
            id,
            ConnectionInfo {
                id,
                client,
                server,
                status,
            },
        );
        Ok(id)
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// 建立跨进程连接
    ///
    /// 同进程连接由本地管理器直接绑定，这里只接受跨进程的端点对。
    pub fn connect(&self, client: Endpoint, server: Endpoint) -> Result<ConnectionId, ManagerError> {
        if client.process == server.process {
            warn!("Refusing to broker same-process connection {} -> {}", client, server);
            return Err(ManagerError::Binding(ExecutionResult::BadCommand));
        }
        let (server_address, descriptor) = self.resolve(&server, InterfaceKind::Provided)?;
        let (client_address, _) = self.resolve(&client, InterfaceKind::Required)?;

        let id = self.allocate(client.clone(), server.clone(), ConnectionStatus::Requested)?;
        debug!("Connecting {} -> {} ({})", client, server, id);

        let result =
            self.establish(id, &client, &server, client_address, server_address, descriptor);
        {
            let mut connections = self.connections.lock();
            if result.is_ok()
                && let Some(info) = connections.get_mut(&id)
            {
                info.status = ConnectionStatus::Connected;
            }
            self.pending.lock().remove(&id);
        }
        result?;
        info!("Connected {} -> {} ({})", client, server, id);
        Ok(id)
    }

    /// 依次物化服务端和客户端的代理
    fn establish(
        &self,
        id: ConnectionId,
        client: &Endpoint,
        server: &Endpoint,
        client_address: PeerAddress,
        server_address: PeerAddress,
        descriptor: InterfaceDescriptor,
    ) -> Result<(), ManagerError> {
        let prepare_server = Request::PrepareServer {
            id,
            server: server.clone(),
            client: client.clone(),
            client_address: client_address.clone(),
        };
        if let Err(e) = self.expect_ack(&server_address, &prepare_server) {
            warn!("Server side of {} failed: {}", id, e);
            return Err(e);
        }

        let prepare_client = Request::PrepareClient {
            id,
            client: client.clone(),
            server: server.clone(),
            server_address: server_address.clone(),
            descriptor,
        };
        if let Err(e) = self.expect_ack(&client_address, &prepare_client) {
            warn!("Client side of {} failed: {}", id, e);
            if let Err(e) = self.expect_ack(&server_address, &Request::Teardown { id }) {
                warn!("Failed to tear down server side of {}: {}", id, e);
            }
            return Err(e);
        }
        Ok(())
    }

    /// 登记一个已在本地建立的同进程连接
    pub fn record_local(&self, client: Endpoint, server: Endpoint) -> Result<ConnectionId, ManagerError> {
        self.resolve(&server, InterfaceKind::Provided)?;
        self.resolve(&client, InterfaceKind::Required)?;

        let id = self.allocate(client.clone(), server.clone(), ConnectionStatus::Connected)?;
        debug!("Recorded local connection {} -> {} ({})", client, server, id);
        Ok(id)
    }

    /// 删除连接记录并通知相关进程拆除
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), ManagerError> {
        let info = self
            .connections
            .lock()
            .remove(&id)
            .ok_or(ManagerError::NoConnection(id))?;

        self.notify_teardown(&info.server.process, id);
        if info.is_remote() {
            self.notify_teardown(&info.client.process, id);
        }
        info!("Disconnected {} -> {} ({})", info.client, info.server, id);
        Ok(())
    }

    /// 单向通知进程拆除连接的一半
    ///
    /// 发起断开的进程可能正等待本管理器的响应，这里不能阻塞在它的回复上。
    fn notify_teardown(&self, process: &str, id: ConnectionId) {
        let Some(address) = self.process(process).map(|p| p.address) else {
            return;
        };
        if let Err(e) = self.transport.send(&address, &Request::Teardown { id }) {
            warn!("Failed to notify '{}' to tear down {}: {}", process, id, e);
        }
    }

    fn expect_ack(&self, to: &PeerAddress, request: &Request) -> Result<(), ManagerError> {
        match self.transport.call(to, request, self.request_timeout)? {
            Response::Ack => Ok(()),
            response => Err(ManagerError::from_response(request.name(), response)),
        }
    }

    /// 处理一个请求
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Register { process } => {
                self.register(process);
                Response::Ack
            },
            Request::Unregister { process } => {
                self.unregister(&process);
                Response::Ack
            },
            Request::Connect { client, server } => match self.connect(client, server) {
                Ok(id) => Response::Connected { id },
                Err(e) => e.to_response(),
            },
            Request::RecordLocal { client, server } => match self.record_local(client, server) {
                Ok(id) => Response::Connected { id },
                Err(e) => e.to_response(),
            },
            Request::Disconnect { id } => match self.disconnect(id) {
                Ok(()) => Response::Ack,
                Err(e) => e.to_response(),
            },
            Request::Lookup { endpoint } => match self.lookup(&endpoint) {
                Ok(descriptor) => Response::Descriptor(descriptor),
                Err(e) => e.to_response(),
            },
            Request::ListProcesses => Response::Processes(self.processes()),
            Request::ListConnections => Response::Connections(self.connections()),
            other => Response::error(
                ExecutionResult::BadCommand,
                format!("{} is not served by the global manager", other.name()),
            ),
        }
    }
}

impl Drop for GlobalComponentManager {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.shutdown();
        }
    }
}

impl std::fmt::Debug for GlobalComponentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalComponentManager")
            .field("address", &self.address())
            .field("processes", &self.processes.read().len())
            .field("connections", &self.connections.lock().len())
            .finish()
    }
}

struct GlobalService {
    manager: Weak<GlobalComponentManager>,
}

impl RequestHandler for GlobalService {
    fn handle(&self, request: Request) -> Response {
        match self.manager.upgrade() {
            Some(manager) => manager.handle(request),
            None => Response::error(ExecutionResult::NetworkError, "global manager is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackNetwork;
    use armature_protocol::{ComponentDescriptor, OperationDescriptor};
    use armature_protocol::{CommandHandle, CommandKind, Signature};

    fn interface(name: &str, kind: InterfaceKind) -> InterfaceDescriptor {
        InterfaceDescriptor {
            name: name.to_string(),
            kind,
            operations: vec![OperationDescriptor {
                name: "GetValue".to_string(),
                kind: CommandKind::Read,
                signature: Signature::default(),
                handle: (kind == InterfaceKind::Provided)
                    .then(|| CommandHandle::new(CommandKind::Read, 1)),
            }],
            events: Vec::new(),
        }
    }

    fn process(name: &str, component: &str, iface: InterfaceDescriptor) -> ProcessDescriptor {
        ProcessDescriptor {
            name: name.to_string(),
            address: PeerAddress::loopback(name),
            components: vec![ComponentDescriptor {
                name: component.to_string(),
                interfaces: vec![iface],
            }],
        }
    }

    fn manager() -> GlobalComponentManager {
        let network = LoopbackNetwork::new();
        GlobalComponentManager::new(Arc::new(network.transport()))
            .with_request_timeout(Duration::from_millis(100))
    }

    #[test]
    fn test_register_is_upsert() {
        let gcm = manager();
        gcm.register(process("a", "X", interface("Ip", InterfaceKind::Provided)));
        gcm.register(process("a", "X", interface("Other", InterfaceKind::Provided)));

        assert_eq!(gcm.processes().len(), 1);
        assert!(gcm.lookup(&Endpoint::new("a", "X", "Other")).is_ok());
        assert!(matches!(
            gcm.lookup(&Endpoint::new("a", "X", "Ip")),
            Err(ManagerError::NoInterface(_))
        ));
    }

    #[test]
    fn test_connect_unknown_endpoint_creates_no_record() {
        let gcm = manager();
        gcm.register(process("b", "Y", interface("Ic", InterfaceKind::Required)));

        let result = gcm.connect(Endpoint::new("b", "Y", "Ic"), Endpoint::new("a", "X", "Missing"));
        assert!(matches!(result, Err(ManagerError::NoInterface(_))));
        assert!(gcm.connections().is_empty());
    }

    #[test]
    fn test_connect_rejects_wrong_kind() {
        let gcm = manager();
        gcm.register(process("a", "X", interface("Ip", InterfaceKind::Provided)));
        gcm.register(process("b", "Y", interface("Ic", InterfaceKind::Required)));

        // 两端的接口类型互换
        let result = gcm.connect(Endpoint::new("a", "X", "Ip"), Endpoint::new("b", "Y", "Ic"));
        assert!(matches!(result, Err(ManagerError::NoInterface(_))));
        assert!(gcm.connections().is_empty());
    }

    #[test]
    fn test_failed_prepare_leaves_requested_record() {
        let gcm = manager();
        gcm.register(process("a", "X", interface("Ip", InterfaceKind::Provided)));
        gcm.register(process("b", "Y", interface("Ic", InterfaceKind::Required)));

        // 两个进程都没有监听，PrepareServer 不可达
        let result = gcm.connect(Endpoint::new("b", "Y", "Ic"), Endpoint::new("a", "X", "Ip"));
        assert!(matches!(result, Err(ManagerError::Transport(_))));

        let connections = gcm.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].status, ConnectionStatus::Requested);
        assert_eq!(connections[0].id, ConnectionId(1));

        // 失败遗留的 Requested 记录不阻止重试
        let retry = gcm.connect(Endpoint::new("b", "Y", "Ic"), Endpoint::new("a", "X", "Ip"));
        assert!(matches!(retry, Err(ManagerError::Transport(_))));
        assert_eq!(gcm.connections().len(), 2);
    }

    #[test]
    fn test_second_record_for_required_interface_is_refused() {
        let gcm = manager();
        let mut p = process("a", "X", interface("Ip", InterfaceKind::Provided));
        p.components.push(ComponentDescriptor {
            name: "Y".to_string(),
            interfaces: vec![interface("Ic", InterfaceKind::Required)],
        });
        p.components.push(ComponentDescriptor {
            name: "Z".to_string(),
            interfaces: vec![interface("Ip", InterfaceKind::Provided)],
        });
        gcm.register(p);

        let client = Endpoint::new("a", "Y", "Ic");
        let id = gcm
            .record_local(client.clone(), Endpoint::new("a", "X", "Ip"))
            .unwrap();
        let err = gcm
            .record_local(client.clone(), Endpoint::new("a", "Z", "Ip"))
            .unwrap_err();
        assert!(matches!(err, ManagerError::AlreadyConnected(ref e) if *e == client));
        assert_eq!(err.code(), ExecutionResult::BadCommand);
        assert_eq!(gcm.connections().len(), 1);

        gcm.disconnect(id).unwrap();
        gcm.record_local(client, Endpoint::new("a", "Z", "Ip")).unwrap();
    }

    #[test]
    fn test_record_local_and_disconnect() {
        let gcm = manager();
        let mut p = process("a", "X", interface("Ip", InterfaceKind::Provided));
        p.components.push(ComponentDescriptor {
            name: "Y".to_string(),
            interfaces: vec![interface("Ic", InterfaceKind::Required)],
        });
        gcm.register(p);

        let id = gcm
            .record_local(Endpoint::new("a", "Y", "Ic"), Endpoint::new("a", "X", "Ip"))
            .unwrap();
        assert_eq!(gcm.connection(id).unwrap().status, ConnectionStatus::Connected);

        gcm.disconnect(id).unwrap();
        assert!(gcm.connection(id).is_none());
        assert!(matches!(gcm.disconnect(id), Err(ManagerError::NoConnection(_))));
    }

    #[test]
    fn test_unregister_drops_connections() {
        let gcm = manager();
        let mut p = process("a", "X", interface("Ip", InterfaceKind::Provided));
        p.components.push(ComponentDescriptor {
            name: "Y".to_string(),
            interfaces: vec![interface("Ic", InterfaceKind::Required)],
        });
        gcm.register(p);
        gcm.record_local(Endpoint::new("a", "Y", "Ic"), Endpoint::new("a", "X", "Ip"))
            .unwrap();

        assert!(gcm.unregister("a"));
        assert!(gcm.connections().is_empty());
        assert!(gcm.processes().is_empty());
        assert!(!gcm.unregister("a"));
    }

    #[test]
    fn test_handle_rejects_local_only_requests() {
        let gcm = manager();
        let response = gcm.handle(Request::Teardown { id: ConnectionId(3) });
        assert!(matches!(
            response,
            Response::Error {
                code: ExecutionResult::BadCommand,
                ..
            }
        ));
        assert_eq!(gcm.handle(Request::ListProcesses), Response::Processes(Vec::new()));
    }
}
