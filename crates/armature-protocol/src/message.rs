//! 目录与代理协议消息
//!
//! - Local → Global：`Register` / `Unregister` / `Connect` / `RecordLocal` /
//!   `Disconnect` / `Lookup` / `ListProcesses` / `ListConnections`
//! - Global → Local：`PrepareServer` / `PrepareClient` / `Teardown`
//! - Local ↔ Local（代理流量）：`Execute` / `Event`
//!
//! 所有消息通过 serde 派生，在帧内以 bincode 编码（见 [`crate::frame`]）。

use crate::error::ProtocolError;
use crate::handle::{CommandHandle, CommandKind};
use crate::result::{ExecutionResult, Outcome};
use crate::value::{Signature, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

// ============================================================================
// Addressing
// ============================================================================

/// 接口端点：(进程, 组件, 接口)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub process: String,
    pub component: String,
    pub interface: String,
}

impl Endpoint {
    pub fn new(
        process: impl Into<String>,
        component: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            process: process.into(),
            component: component.into(),
            interface: interface.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.process, self.component, self.interface)
    }
}

/// 对端地址
///
/// 文本形式：`loopback://name` 或 `udp://ip:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerAddress {
    /// 进程内回环网络中的命名节点
    Loopback(String),
    /// UDP 地址
    Udp(SocketAddr),
}

impl PeerAddress {
    pub fn loopback(name: impl Into<String>) -> Self {
        PeerAddress::Loopback(name.into())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddress::Loopback(name) => write!(f, "loopback://{}", name),
            PeerAddress::Udp(addr) => write!(f, "udp://{}", addr),
        }
    }
}

impl FromStr for PeerAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("loopback://") {
            if name.is_empty() {
                return Err(ProtocolError::InvalidAddress(s.to_string()));
            }
            return Ok(PeerAddress::Loopback(name.to_string()));
        }

        // 无前缀时按 UDP 解析（与 `--udp 127.0.0.1:port` 的习惯一致）
        let rest = s.strip_prefix("udp://").unwrap_or(s);
        rest.parse::<SocketAddr>()
            .map(PeerAddress::Udp)
            .map_err(|_| ProtocolError::InvalidAddress(s.to_string()))
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// 接口类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceKind {
    Provided,
    Required,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Provided => f.write_str("provided"),
            InterfaceKind::Required => f.write_str("required"),
        }
    }
}

/// 单个操作（命令 / 事件 / 函数）的描述
///
/// 提供接口中的命令和事件带有句柄；需求接口中的函数没有句柄。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    pub kind: CommandKind,
    pub signature: Signature,
    pub handle: Option<CommandHandle>,
}

/// 接口描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub kind: InterfaceKind,
    /// 命令（提供接口）或函数（需求接口）
    pub operations: Vec<OperationDescriptor>,
    /// 事件生成器（提供接口）或事件处理器（需求接口）
    pub events: Vec<OperationDescriptor>,
}

impl InterfaceDescriptor {
    pub fn find_operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn find_event(&self, name: &str) -> Option<&OperationDescriptor> {
        self.events.iter().find(|op| op.name == name)
    }
}

/// 组件描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl ComponentDescriptor {
    pub fn find_interface(&self, name: &str) -> Option<&InterfaceDescriptor> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

/// 进程描述（Global Manager 目录中的一项）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub name: String,
    pub address: PeerAddress,
    pub components: Vec<ComponentDescriptor>,
}

impl ProcessDescriptor {
    /// 按 (组件, 接口) 查找接口描述
    pub fn lookup(&self, component: &str, interface: &str) -> Option<&InterfaceDescriptor> {
        self.components
            .iter()
            .find(|c| c.name == component)
            .and_then(|c| c.find_interface(interface))
    }
}

// ============================================================================
// Connections
// ============================================================================

/// 连接 ID（在所属目录内唯一，0 保留为无效 ID）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 连接状态：`Requested → Connected → Disconnected`（终态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Requested,
    Connected,
    Disconnected,
}

/// 连接记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub client: Endpoint,
    pub server: Endpoint,
    pub status: ConnectionStatus,
}

impl ConnectionInfo {
    /// 连接是否跨进程
    pub fn is_remote(&self) -> bool {
        self.client.process != self.server.process
    }
}

// ============================================================================
// Messages
// ============================================================================

/// 请求消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    // === Local → Global ===
    /// 注册或更新（upsert）一个进程的目录项
    Register { process: ProcessDescriptor },
    Unregister { process: String },
    /// 建立跨进程连接
    Connect { client: Endpoint, server: Endpoint },
    /// 登记一个已在本地建立的连接，返回分配的 ID
    RecordLocal { client: Endpoint, server: Endpoint },
    Disconnect { id: ConnectionId },
    Lookup { endpoint: Endpoint },
    ListProcesses,
    ListConnections,

    // === Global → Local ===
    /// 服务端物化需求接口代理
    PrepareServer {
        id: ConnectionId,
        server: Endpoint,
        client: Endpoint,
        client_address: PeerAddress,
    },
    /// 客户端物化提供接口代理并绑定函数
    PrepareClient {
        id: ConnectionId,
        client: Endpoint,
        server: Endpoint,
        server_address: PeerAddress,
        descriptor: InterfaceDescriptor,
    },
    /// 拆除连接的本地一半（幂等）
    Teardown { id: ConnectionId },

    // === Local ↔ Local ===
    /// 在对端执行命令
    Execute {
        connection: ConnectionId,
        handle: CommandHandle,
        args: Vec<Value>,
        blocking: bool,
        timeout_us: u64,
    },
    /// 将服务端事件转发给客户端
    Event {
        connection: ConnectionId,
        handle: CommandHandle,
        args: Vec<Value>,
    },
}

impl Request {
    /// 消息名（用于日志）
    pub fn name(&self) -> &'static str {
        match self {
            Request::Register { .. } => "Register",
            Request::Unregister { .. } => "Unregister",
            Request::Connect { .. } => "Connect",
            Request::RecordLocal { .. } => "RecordLocal",
            Request::Disconnect { .. } => "Disconnect",
            Request::Lookup { .. } => "Lookup",
            Request::ListProcesses => "ListProcesses",
            Request::ListConnections => "ListConnections",
            Request::PrepareServer { .. } => "PrepareServer",
            Request::PrepareClient { .. } => "PrepareClient",
            Request::Teardown { .. } => "Teardown",
            Request::Execute { .. } => "Execute",
            Request::Event { .. } => "Event",
        }
    }
}

/// 响应消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ack,
    Connected { id: ConnectionId },
    Descriptor(InterfaceDescriptor),
    Outcome(Outcome),
    Processes(Vec<ProcessDescriptor>),
    Connections(Vec<ConnectionInfo>),
    Error {
        code: ExecutionResult,
        message: String,
    },
}

impl Response {
    pub fn error(code: ExecutionResult, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}
