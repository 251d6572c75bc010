//! # Armature Protocol
//!
//! 组件中间件的协议层定义（无线程、无传输依赖）
//!
//! ## 模块
//!
//! - `value`: 参数/结果值模型（带类型标签的变体）
//! - `result`: 跨接口边界的执行结果码
//! - `handle`: 远程命令句柄（固定 10 字节记录）
//! - `message`: 目录与代理协议消息
//! - `frame`: 帧头 + bincode 负载的编解码
//!
//! ## 字节序
//!
//! 命令句柄和帧头中的整数均使用小端字节序。

pub mod frame;
pub mod handle;
pub mod message;
pub mod result;
pub mod value;

mod error;

pub use error::ProtocolError;
pub use frame::{
    FRAME_HEADER_LEN, FrameHeader, MAX_PAYLOAD_LEN, MessageType, PROTOCOL_VERSION, decode_frame,
    encode_frame,
};
pub use handle::{COMMAND_HANDLE_LEN, CommandHandle, CommandKind, HANDLE_SENTINEL};
pub use message::{
    ComponentDescriptor, ConnectionId, ConnectionInfo, ConnectionStatus, Endpoint,
    InterfaceDescriptor, InterfaceKind, OperationDescriptor, PeerAddress, ProcessDescriptor,
    Request, Response,
};
pub use result::{ExecutionResult, Outcome};
pub use value::{Signature, Value, ValueKind, ValueType};
