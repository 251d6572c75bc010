//! 管理层错误类型定义

use crate::config::ConfigError;
use armature_core::ComponentError;
use armature_protocol::{ConnectionId, Endpoint, ExecutionResult, ProtocolError, Response};
use thiserror::Error;

/// 传输层错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    /// 等待响应超时
    #[error("Request to {0} timed out")]
    Timeout(String),

    /// 对端不存在或已关闭
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// 地址类型不被当前传输支持
    #[error("Unsupported address for this transport: {0}")]
    UnsupportedAddress(String),

    /// 地址已被占用（loopback 网络中同名监听）
    #[error("Address already in use: {0}")]
    AddressInUse(String),

    /// 帧编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// 映射为跨边界结果码
    pub fn code(&self) -> ExecutionResult {
        match self {
            TransportError::Timeout(_) => ExecutionResult::TimedOut,
            _ => ExecutionResult::NetworkError,
        }
    }
}

/// 组件管理器错误类型
#[derive(Error, Debug)]
pub enum ManagerError {
    /// 同名组件已存在
    #[error("Component '{0}' already exists")]
    DuplicateComponent(String),

    /// 组件不存在
    #[error("No such component: {0}")]
    NoComponent(String),

    /// 接口（或其所在进程）不存在
    #[error("No such interface: {0}")]
    NoInterface(Endpoint),

    /// 连接不存在
    #[error("No such connection: {0}")]
    NoConnection(ConnectionId),

    /// 需求接口已有连接
    #[error("Required interface {0} is already connected")]
    AlreadyConnected(Endpoint),

    /// 跨进程操作需要全局管理器
    #[error("No global component manager attached")]
    NoGlobalManager,

    /// 本进程没有监听地址，无法参与跨进程连接
    #[error("Process '{0}' is not serving on any address")]
    NotServing(String),

    /// 接口绑定失败
    #[error("Failed to bind interfaces: {0}")]
    Binding(ExecutionResult),

    /// 组件生命周期错误
    #[error("Component error: {0}")]
    Component(#[from] ComponentError),

    /// 传输错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 对端返回的错误
    #[error("Remote error ({code}): {message}")]
    Remote {
        code: ExecutionResult,
        message: String,
    },

    /// 对端返回了不符合协议的响应
    #[error("Unexpected response to {0}")]
    UnexpectedResponse(&'static str),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ManagerError {
    /// 映射为跨边界结果码
    pub fn code(&self) -> ExecutionResult {
        match self {
            ManagerError::DuplicateComponent(_) => ExecutionResult::BadCommand,
            ManagerError::NoComponent(_) | ManagerError::NoInterface(_) => {
                ExecutionResult::NoInterface
            },
            ManagerError::NoConnection(_) | ManagerError::AlreadyConnected(_) => {
                ExecutionResult::BadCommand
            },
            ManagerError::NoGlobalManager | ManagerError::NotServing(_) => {
                ExecutionResult::NetworkError
            },
            ManagerError::Binding(code) => *code,
            ManagerError::Component(e) => e.code(),
            ManagerError::Transport(e) => e.code(),
            ManagerError::Remote { code, .. } => *code,
            ManagerError::UnexpectedResponse(_) | ManagerError::Config(_) => ExecutionResult::NotOk,
        }
    }

    /// 转换为协议错误响应
    pub fn to_response(&self) -> Response {
        Response::error(self.code(), self.to_string())
    }

    /// 从协议错误响应还原
    pub(crate) fn from_response(request: &'static str, response: Response) -> Self {
        match response {
            Response::Error { code, message } => ManagerError::Remote { code, message },
            _ => ManagerError::UnexpectedResponse(request),
        }
    }
}
