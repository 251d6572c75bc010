//! 本地组件管理器
//!
//! 每个进程一个，负责：
//!
//! - 组件注册表与批量生命周期（`create_all` / `start_all` / `kill_all`）
//! - 同进程连接：直接在接口之间绑定
//! - 跨进程连接：经全局管理器协调，在本进程物化代理的一半
//!
//! 目录锁从不跨越传输调用持有；远程请求由传输监听者的工作线程处理。

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::proxy::{ClientHalf, RemoteLink, ServerHalf, replay};
use crate::transport::{Listener, RequestHandler, Transport};
use armature_core::{
    Component, ComponentConfig, ComponentState, InterfaceBinding, ProvidedInterface,
    RequiredInterface, bind_interfaces,
};
use armature_protocol::{
    ConnectionId, ConnectionInfo, ConnectionStatus, Endpoint, ExecutionResult, Outcome,
    PeerAddress, ProcessDescriptor, Request, Response,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 本地分配的连接 ID 的起点（最高位置 1，与全局管理器分配的 ID 不重叠）
const LOCAL_ID_BASE: u64 = 1 << 63;

/// 连接在本进程中的一半
enum Half {
    /// 同进程连接
    Local(InterfaceBinding),
    /// 跨进程连接的客户端
    Client(ClientHalf),
    /// 跨进程连接的服务端
    Server(ServerHalf),
}

impl Half {
    fn release(self) {
        match self {
            Half::Local(binding) => binding.release(),
            Half::Client(half) => half.release(),
            Half::Server(half) => half.release(),
        }
    }
}

struct LocalConnection {
    info: ConnectionInfo,
    half: Half,
}

/// 本地组件管理器
pub struct LocalComponentManager {
    process: String,
    request_timeout: Duration,
    join_timeout: Duration,
    service_workers: usize,
    component_defaults: ComponentConfig,
    transport: Option<Arc<dyn Transport>>,
    address: RwLock<Option<PeerAddress>>,
    global: RwLock<Option<PeerAddress>>,
    components: RwLock<Vec<Arc<Component>>>,
    connections: Mutex<BTreeMap<ConnectionId, LocalConnection>>,
    /// 串行化本进程发起的 connect
    connecting: Mutex<()>,
    next_local_id: AtomicU64,
    listener: Mutex<Option<Listener>>,
}

impl LocalComponentManager {
    /// 创建独立运行的管理器（只支持同进程连接）
    pub fn new(process: impl Into<String>) -> Self {
        Self::build(process.into(), None)
    }

    /// 创建可参与跨进程连接的管理器
    pub fn with_transport(process: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::build(process.into(), Some(transport))
    }

    fn build(process: String, transport: Option<Arc<dyn Transport>>) -> Self {
        let defaults = ManagerConfig::new(process.clone());
        Self {
            process,
            request_timeout: defaults.request_timeout(),
            join_timeout: defaults.join_timeout(),
            service_workers: defaults.transport.service_workers,
            component_defaults: defaults.component,
            transport,
            address: RwLock::new(None),
            global: RwLock::new(None),
            components: RwLock::new(Vec::new()),
            connections: Mutex::new(BTreeMap::new()),
            connecting: Mutex::new(()),
            next_local_id: AtomicU64::new(LOCAL_ID_BASE),
            listener: Mutex::new(None),
        }
    }

    /// 按配置创建管理器
    ///
    /// 配置了监听地址时开始服务；配置了全局管理器地址时随后注册。
    pub fn from_config(
        config: &ManagerConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, ManagerError> {
        let mut manager = Self::with_transport(config.manager.process_name.clone(), transport);
        manager.request_timeout = config.request_timeout();
        manager.join_timeout = config.join_timeout();
        manager.service_workers = config.transport.service_workers;
        manager.component_defaults = config.component.clone();
        let manager = Arc::new(manager);

        if let Some(at) = config.listen_address()? {
            manager.serve(&at)?;
        }
        if let Some(global) = config.global_address()? {
            manager.attach_global(global)?;
        }
        Ok(manager)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_service_workers(mut self, workers: usize) -> Self {
        self.service_workers = workers.max(1);
        self
    }

    pub fn process_name(&self) -> &str {
        &self.process
    }

    /// 新组件的默认配置（来自 `[component]` 段）
    pub fn component_config(&self) -> &ComponentConfig {
        &self.component_defaults
    }

    /// 实际监听地址
    pub fn address(&self) -> Option<PeerAddress> {
        self.address.read().clone()
    }

    pub fn global_address(&self) -> Option<PeerAddress> {
        self.global.read().clone()
    }

    // ========================================================================
    // Network
    // ========================================================================

    /// 在 `at` 上接受跨进程请求，返回实际监听地址
    pub fn serve(self: &Arc<Self>, at: &PeerAddress) -> Result<PeerAddress, ManagerError> {
        let transport = self.transport()?;
        let handler: Arc<dyn RequestHandler> = Arc::new(LocalService {
            manager: Arc::downgrade(self),
        });
        let listener = transport
            .listen(at, handler, self.service_workers)?
            .with_join_timeout(self.join_timeout);
        let address = listener.address().clone();

        let previous = self.listener.lock().replace(listener);
        if let Some(previous) = previous {
            previous.shutdown();
        }
        *self.address.write() = Some(address.clone());
        info!("Process '{}' serving on {}", self.process, address);

        self.refresh_registration();
        Ok(address)
    }

    /// 连接全局管理器并注册本进程
    ///
    /// 需要先 [`serve`](Self::serve)：全局管理器通过监听地址回调本进程。
    pub fn attach_global(&self, global: PeerAddress) -> Result<(), ManagerError> {
        if self.address().is_none() {
            return Err(ManagerError::NotServing(self.process.clone()));
        }
        *self.global.write() = Some(global.clone());

        if let Err(e) = self.register() {
            *self.global.write() = None;
            return Err(e);
        }
        info!("Process '{}' attached to global manager at {}", self.process, global);
        Ok(())
    }

    /// 从全局管理器注销
    pub fn detach_global(&self) -> Result<(), ManagerError> {
        if self.global_address().is_none() {
            return Ok(());
        }
        let result = self.global_call(Request::Unregister {
            process: self.process.clone(),
        });
        *self.global.write() = None;
        result.map(|_| ())
    }

    fn transport(&self) -> Result<&Arc<dyn Transport>, ManagerError> {
        self.transport
            .as_ref()
            .ok_or_else(|| ManagerError::NotServing(self.process.clone()))
    }

    /// 向全局管理器发送请求；错误响应转换为 [`ManagerError::Remote`]
    fn global_call(&self, request: Request) -> Result<Response, ManagerError> {
        let global = self.global_address().ok_or(ManagerError::NoGlobalManager)?;
        let transport = self.transport()?;
        match transport.call(&global, &request, self.request_timeout)? {
            response @ Response::Error { .. } => {
                Err(ManagerError::from_response(request.name(), response))
            },
            response => Ok(response),
        }
    }

    fn register(&self) -> Result<(), ManagerError> {
        match self.global_call(Request::Register {
            process: self.descriptor(),
        })? {
            Response::Ack => Ok(()),
            _ => Err(ManagerError::UnexpectedResponse("Register")),
        }
    }

    /// 组件集合变化后更新全局目录（未连接全局管理器时无操作）
    fn refresh_registration(&self) {
        if self.global_address().is_none() {
            return;
        }
        if let Err(e) = self.register() {
            warn!("Failed to update registration of '{}': {}", self.process, e);
        }
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// 添加组件（名称在进程内唯一）
    pub fn add_component(&self, component: Component) -> Result<Arc<Component>, ManagerError> {
        let component = Arc::new(component);
        {
            let mut components = self.components.write();
            if components.iter().any(|c| c.name() == component.name()) {
                return Err(ManagerError::DuplicateComponent(component.name().to_string()));
            }
            components.push(component.clone());
        }
        debug!("Component '{}' added to '{}'", component.name(), self.process);

        self.refresh_registration();
        Ok(component)
    }

    /// 移除组件：断开其所有连接并 kill
    pub fn remove_component(&self, name: &str) -> Result<Arc<Component>, ManagerError> {
        let component = self
            .component(name)
            .ok_or_else(|| ManagerError::NoComponent(name.to_string()))?;

        let ids: Vec<ConnectionId> = self
            .connections
            .lock()
            .values()
            .filter(|c| self.touches(&c.info, name))
            .map(|c| c.info.id)
            .collect();
        for id in ids {
            if let Err(e) = self.disconnect(id) {
                warn!("Failed to disconnect {} while removing '{}': {}", id, name, e);
            }
        }

        component.kill();
        self.components.write().retain(|c| c.name() != name);
        info!("Component '{}' removed from '{}'", name, self.process);

        self.refresh_registration();
        Ok(component)
    }

    fn touches(&self, info: &ConnectionInfo, component: &str) -> bool {
        let local = |e: &Endpoint| e.process == self.process && e.component == component;
        local(&info.client) || local(&info.server)
    }

    pub fn component(&self, name: &str) -> Option<Arc<Component>> {
        self.components.read().iter().find(|c| c.name() == name).cloned()
    }

    pub fn components(&self) -> Vec<Arc<Component>> {
        self.components.read().clone()
    }

    fn snapshot(&self) -> Vec<Arc<Component>> {
        self.components()
    }

    /// 创建所有尚在 Constructed 状态的组件
    pub fn create_all(&self) -> Result<(), ManagerError> {
        for component in self.snapshot() {
            if component.state() == ComponentState::Constructed {
                component.create()?;
            }
        }
        Ok(())
    }

    /// 启动所有 Ready 状态的组件
    pub fn start_all(&self) -> Result<(), ManagerError> {
        for component in self.snapshot() {
            if component.state() == ComponentState::Ready {
                component.start()?;
            }
        }
        Ok(())
    }

    pub fn kill_all(&self) {
        for component in self.snapshot() {
            component.kill();
        }
    }

    /// 等待所有组件达到（或越过）`state`，`timeout` 为总时限
    pub fn wait_for_state_all(&self, state: ComponentState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.snapshot().iter().all(|component| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reached = component.wait_for_state(state, remaining);
            if !reached {
                debug!(
                    "Component '{}' did not reach {} (now {})",
                    component.name(),
                    state,
                    component.state()
                );
            }
            reached
        })
    }

    fn find_provided(&self, endpoint: &Endpoint) -> Result<Arc<ProvidedInterface>, ManagerError> {
        if endpoint.process != self.process {
            return Err(ManagerError::NoInterface(endpoint.clone()));
        }
        self.component(&endpoint.component)
            .and_then(|c| c.provided_interface(&endpoint.interface))
            .ok_or_else(|| ManagerError::NoInterface(endpoint.clone()))
    }

    fn find_required(&self, endpoint: &Endpoint) -> Result<Arc<RequiredInterface>, ManagerError> {
        if endpoint.process != self.process {
            return Err(ManagerError::NoInterface(endpoint.clone()));
        }
        self.component(&endpoint.component)
            .and_then(|c| c.required_interface(&endpoint.interface))
            .ok_or_else(|| ManagerError::NoInterface(endpoint.clone()))
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// 连接本进程的需求接口到（可能在其他进程的）提供接口
    ///
    /// 一个需求接口同时只能有一个连接，重复连接返回 `AlreadyConnected`。
    pub fn connect(
        &self,
        client_component: &str,
        client_interface: &str,
        server_process: &str,
        server_component: &str,
        server_interface: &str,
    ) -> Result<ConnectionId, ManagerError> {
        let client = Endpoint::new(&self.process, client_component, client_interface);
        let server = Endpoint::new(server_process, server_component, server_interface);
        let required = self.find_required(&client)?;

        let _connecting = self.connecting.lock();
        self.ensure_unconnected(&client)?;
        if server.process == self.process {
            self.connect_local(client, server, &required)
        } else {
            self.connect_remote(client, server)
        }
    }

    /// 需求接口在本进程是否已有连接（同进程或跨进程客户端）
    fn ensure_unconnected(&self, client: &Endpoint) -> Result<(), ManagerError> {
        let connected = self.connections.lock().values().any(|c| {
            !matches!(c.half, Half::Server(_)) && c.info.client == *client
        });
        if connected {
            warn!("Refusing second connection of {}", client);
            return Err(ManagerError::AlreadyConnected(client.clone()));
        }
        Ok(())
    }

    fn connect_local(
        &self,
        client: Endpoint,
        server: Endpoint,
        required: &RequiredInterface,
    ) -> Result<ConnectionId, ManagerError> {
        let provided = self.find_provided(&server)?;
        let binding = bind_interfaces(required, &provided).map_err(ManagerError::Binding)?;

        let id = if self.global_address().is_some() {
            let recorded = self.global_call(Request::RecordLocal {
                client: client.clone(),
                server: server.clone(),
            });
            match recorded {
                Ok(Response::Connected { id }) => id,
                Ok(_) => {
                    binding.release();
                    return Err(ManagerError::UnexpectedResponse("RecordLocal"));
                },
                Err(e) => {
                    binding.release();
                    return Err(e);
                },
            }
        } else {
            ConnectionId(self.next_local_id.fetch_add(1, Ordering::Relaxed))
        };

        info!("Connected {} -> {} ({})", client, server, id);
        self.connections.lock().insert(
            id,
            LocalConnection {
                info: ConnectionInfo {
                    id,
                    client,
                    server,
                    status: ConnectionStatus::Connected,
                },
                half: Half::Local(binding),
            },
        );
        Ok(id)
    }

    fn connect_remote(&self, client: Endpoint, server: Endpoint) -> Result<ConnectionId, ManagerError> {
        let request = Request::Connect {
            client: client.clone(),
            server: server.clone(),
        };
        let id = match self.global_call(request)? {
            Response::Connected { id } => id,
            _ => return Err(ManagerError::UnexpectedResponse("Connect")),
        };

        // 全局管理器在确认前已通过 PrepareClient 在本进程物化客户端代理
        if !self.connections.lock().contains_key(&id) {
            warn!("Connection {} acknowledged without a local client half", id);
        }
        info!("Connected {} -> {} ({})", client, server, id);
        Ok(id)
    }

    /// 断开连接
    ///
    /// 先拆除本进程的一半，再通知全局管理器（由其通知对端）。
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), ManagerError> {
        let entry = self.connections.lock().remove(&id);
        let found = entry.is_some();
        if let Some(entry) = entry {
            entry.half.release();
            info!("Disconnected {} -> {} ({})", entry.info.client, entry.info.server, id);
        }

        if self.global_address().is_none() {
            return if found {
                Ok(())
            } else {
                Err(ManagerError::NoConnection(id))
            };
        }

        match self.global_call(Request::Disconnect { id }) {
            Ok(_) => Ok(()),
            Err(e) if found => {
                warn!("Global manager failed to drop {}: {}", id, e);
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    /// 本进程参与的连接
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .lock()
            .values()
            .map(|c| c.info.clone())
            .collect()
    }

    /// 本进程的目录项
    pub fn descriptor(&self) -> ProcessDescriptor {
        ProcessDescriptor {
            name: self.process.clone(),
            address: self
                .address()
                .unwrap_or_else(|| PeerAddress::loopback(self.process.clone())),
            components: self.snapshot().iter().map(|c| c.descriptor()).collect(),
        }
    }

    // ========================================================================
    // Remote requests
    // ========================================================================

    fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::PrepareServer {
                id,
                server,
                client,
                client_address,
            } => self.prepare_server(id, server, client, client_address),
            Request::PrepareClient {
                id,
                client,
                server,
                server_address,
                descriptor,
            } => {
                let result = self.find_required(&client).and_then(|required| {
                    self.ensure_unconnected(&client)?;
                    let link = self.link(server_address, id)?;
                    ClientHalf::build(&required, &server, &descriptor, link)
                        .map_err(ManagerError::Binding)
                });
                match result {
                    Ok(half) => {
                        self.install(id, client, server, Half::Client(half));
                        Response::Ack
                    },
                    Err(e) => e.to_response(),
                }
            },
            Request::Teardown { id } => {
                let entry = self.connections.lock().remove(&id);
                if let Some(entry) = entry {
                    entry.half.release();
                    info!("Torn down {} ({} -> {})", id, entry.info.client, entry.info.server);
                }
                Response::Ack
            },
            Request::Execute {
                connection,
                handle,
                args,
                blocking,
                timeout_us,
            } => {
                let function = match self.connections.lock().get(&connection) {
                    Some(LocalConnection {
                        half: Half::Server(half),
                        ..
                    }) => half.resolve(handle),
                    _ => Err(ExecutionResult::BadCommand),
                };
                match function {
                    Ok(function) => Response::Outcome(replay(
                        &function,
                        &args,
                        blocking,
                        Duration::from_micros(timeout_us),
                    )),
                    Err(code) => Response::Outcome(Outcome::code(code)),
                }
            },
            Request::Event {
                connection,
                handle,
                args,
            } => {
                let generator = match self.connections.lock().get(&connection) {
                    Some(LocalConnection {
                        half: Half::Client(half),
                        ..
                    }) => half.event(handle),
                    _ => None,
                };
                match generator {
                    Some(generator) => Response::Outcome(generator.execute(&args)),
                    None => Response::Outcome(Outcome::code(ExecutionResult::BadCommand)),
                }
            },
            other => Response::error(
                ExecutionResult::BadCommand,
                format!("{} is not served by a local manager", other.name()),
            ),
        }
    }

    fn prepare_server(
        &self,
        id: ConnectionId,
        server: Endpoint,
        client: Endpoint,
        client_address: PeerAddress,
    ) -> Response {
        let result = self.find_provided(&server).and_then(|provided| {
            let link = self.link(client_address, id)?;
            ServerHalf::build(&provided, &client, link).map_err(ManagerError::Binding)
        });
        match result {
            Ok(half) => {
                self.install(id, client, server, Half::Server(half));
                Response::Ack
            },
            Err(e) => e.to_response(),
        }
    }

    fn link(&self, peer: PeerAddress, id: ConnectionId) -> Result<Arc<RemoteLink>, ManagerError> {
        Ok(Arc::new(RemoteLink::new(
            self.transport()?.clone(),
            peer,
            id,
            self.request_timeout,
        )))
    }

    fn install(&self, id: ConnectionId, client: Endpoint, server: Endpoint, half: Half) {
        debug!("Installed half of {} ({} -> {})", id, client, server);
        let previous = self.connections.lock().insert(
            id,
            LocalConnection {
                info: ConnectionInfo {
                    id,
                    client,
                    server,
                    status: ConnectionStatus::Connected,
                },
                half,
            },
        );
        if let Some(previous) = previous {
            warn!("Replacing existing half of {}", id);
            previous.half.release();
        }
    }

    /// 注销、停止服务并终止所有组件
    ///
    /// 返回所有组件是否在 join 超时内到达 Finished。
    pub fn shutdown(&self) -> bool {
        if let Err(e) = self.detach_global() {
            warn!("Failed to unregister '{}': {}", self.process, e);
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.shutdown();
        }
        *self.address.write() = None;

        self.kill_all();
        let finished = self.wait_for_state_all(ComponentState::Finished, self.join_timeout);

        let halves = std::mem::take(&mut *self.connections.lock());
        for (_, entry) in halves {
            entry.half.release();
        }
        finished
    }
}

impl Drop for LocalComponentManager {
    fn drop(&mut self) {
        // 单向注销，不等待响应
        if let (Some(global), Some(transport)) = (self.global.get_mut().take(), &self.transport) {
            let request = Request::Unregister {
                process: self.process.clone(),
            };
            if let Err(e) = transport.send(&global, &request) {
                debug!("Unregister of '{}' on drop failed: {}", self.process, e);
            }
        }
        if let Some(listener) = self.listener.get_mut().take() {
            listener.shutdown();
        }
        self.kill_all();
        for (_, entry) in std::mem::take(self.connections.get_mut()) {
            entry.half.release();
        }
    }
}

impl std::fmt::Debug for LocalComponentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComponentManager")
            .field("process", &self.process)
            .field("address", &self.address())
            .field("global", &self.global_address())
            .field("components", &self.components.read().len())
            .field("connections", &self.connections.lock().len())
            .finish()
    }
}

/// 监听者回调本进程管理器的入口
///
/// 持有弱引用：管理器被 drop 后，迟到的请求得到错误响应。
struct LocalService {
    manager: Weak<LocalComponentManager>,
}

impl RequestHandler for LocalService {
    fn handle(&self, request: Request) -> Response {
        match self.manager.upgrade() {
            Some(manager) => manager.handle_request(request),
            None => Response::error(ExecutionResult::NoInterface, "process is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armature_core::{CommandKind, Requirement};

    fn server_component() -> Component {
        let component = Component::new("X", ComponentConfig::default());
        let provided = component.add_provided_interface("Ip").unwrap();
        provided.add_command_read::<f64, _>("GetValue", || 42.0).unwrap();
        component
    }

    fn client_component() -> (Component, Arc<armature_core::Function>) {
        let component = Component::new("Y", ComponentConfig::default());
        let required = component.add_required_interface("Ic").unwrap();
        let get = required
            .add_function("GetValue", CommandKind::Read, Requirement::Mandatory)
            .unwrap();
        (component, get)
    }

    #[test]
    fn test_duplicate_component() {
        let manager = LocalComponentManager::new("p");
        manager.add_component(server_component()).unwrap();
        assert!(matches!(
            manager.add_component(server_component()),
            Err(ManagerError::DuplicateComponent(name)) if name == "X"
        ));
        assert_eq!(manager.components().len(), 1);
    }

    #[test]
    fn test_local_connect_and_disconnect() {
        let manager = LocalComponentManager::new("p");
        manager.add_component(server_component()).unwrap();
        let (client, get) = client_component();
        manager.add_component(client).unwrap();

        let id = manager.connect("Y", "Ic", "p", "X", "Ip").unwrap();
        assert!(id.0 >= LOCAL_ID_BASE);
        assert_eq!(get.call_read::<f64>(), Ok(42.0));

        let connections = manager.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].status, ConnectionStatus::Connected);
        assert!(!connections[0].is_remote());

        manager.disconnect(id).unwrap();
        assert!(manager.connections().is_empty());
        assert_eq!(get.call_read::<f64>(), Err(ExecutionResult::FunctionNotBound));
        assert!(matches!(manager.disconnect(id), Err(ManagerError::NoConnection(_))));
    }

    #[test]
    fn test_second_connect_of_required_interface_is_refused() {
        let manager = LocalComponentManager::new("p");
        manager.add_component(server_component()).unwrap();
        let other = Component::new("Z", ComponentConfig::default());
        other
            .add_provided_interface("Ip")
            .unwrap()
            .add_command_read::<f64, _>("GetValue", || 7.0)
            .unwrap();
        manager.add_component(other).unwrap();
        let (client, get) = client_component();
        manager.add_component(client).unwrap();

        let first = manager.connect("Y", "Ic", "p", "X", "Ip").unwrap();
        let err = manager.connect("Y", "Ic", "p", "Z", "Ip").unwrap_err();
        assert!(matches!(err, ManagerError::AlreadyConnected(_)));
        assert_eq!(err.code(), ExecutionResult::BadCommand);

        // 第一条连接不受影响
        assert_eq!(get.call_read::<f64>(), Ok(42.0));
        assert_eq!(manager.connections().len(), 1);

        // 断开后可以重新连接到另一个提供者
        manager.disconnect(first).unwrap();
        manager.connect("Y", "Ic", "p", "Z", "Ip").unwrap();
        assert_eq!(get.call_read::<f64>(), Ok(7.0));
        let connections = manager.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].server.component, "Z");
    }

    #[test]
    fn test_connect_missing_interface() {
        let manager = LocalComponentManager::new("p");
        manager.add_component(server_component()).unwrap();
        let (client, _) = client_component();
        manager.add_component(client).unwrap();

        assert!(matches!(
            manager.connect("Y", "Ic", "p", "X", "Missing"),
            Err(ManagerError::NoInterface(_))
        ));
        assert!(matches!(
            manager.connect("Nobody", "Ic", "p", "X", "Ip"),
            Err(ManagerError::NoInterface(_))
        ));
        assert!(manager.connections().is_empty());
    }

    #[test]
    fn test_remote_connect_without_global() {
        let manager = LocalComponentManager::new("p");
        let (client, _) = client_component();
        manager.add_component(client).unwrap();

        assert!(matches!(
            manager.connect("Y", "Ic", "other", "X", "Ip"),
            Err(ManagerError::NoGlobalManager)
        ));
    }

    #[test]
    fn test_create_all_requires_bindings() {
        let manager = LocalComponentManager::new("p");
        manager.add_component(server_component()).unwrap();
        let (client, _) = client_component();
        manager.add_component(client).unwrap();

        // Y 的必需函数尚未绑定
        assert!(manager.create_all().is_err());

        manager.connect("Y", "Ic", "p", "X", "Ip").unwrap();
        manager.create_all().unwrap();
        manager.start_all().unwrap();
        assert!(manager.wait_for_state_all(ComponentState::Active, Duration::from_secs(1)));

        manager.kill_all();
        assert!(manager.wait_for_state_all(ComponentState::Finished, Duration::from_secs(1)));
    }

    #[test]
    fn test_remove_component_drops_connections() {
        let manager = LocalComponentManager::new("p");
        manager.add_component(server_component()).unwrap();
        let (client, get) = client_component();
        manager.add_component(client).unwrap();
        manager.connect("Y", "Ic", "p", "X", "Ip").unwrap();

        let removed = manager.remove_component("X").unwrap();
        assert_eq!(removed.state(), ComponentState::Finished);
        assert!(manager.connections().is_empty());
        assert!(!get.is_valid());
        assert!(manager.component("X").is_none());
        assert!(matches!(
            manager.remove_component("X"),
            Err(ManagerError::NoComponent(_))
        ));
    }

    #[test]
    fn test_descriptor_lists_components() {
        let manager = LocalComponentManager::new("p");
        manager.add_component(server_component()).unwrap();
        let descriptor = manager.descriptor();
        assert_eq!(descriptor.name, "p");
        assert_eq!(descriptor.address, PeerAddress::loopback("p"));
        let iface = descriptor.lookup("X", "Ip").unwrap();
        assert!(iface.find_operation("GetValue").is_some());
        assert!(descriptor.lookup("X", "Missing").is_none());
    }

    #[test]
    fn test_attach_requires_serving() {
        let network = crate::transport::LoopbackNetwork::new();
        let manager = LocalComponentManager::with_transport("p", Arc::new(network.transport()));
        assert!(matches!(
            manager.attach_global(PeerAddress::loopback("gcm")),
            Err(ManagerError::NotServing(_))
        ));
        assert!(manager.global_address().is_none());
    }
}
