//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use armature::prelude::*;
//! ```

// 组件与接口
pub use armature_core::{
    Component, ComponentConfig, ComponentState, FnTask, Function, ProvidedInterface,
    RequiredInterface, Requirement, RunMode, Task, TaskContext, TaskResult, bind_interfaces,
};

// 管理器与传输
pub use armature_manager::{
    GlobalComponentManager, LocalComponentManager, LoopbackNetwork, ManagerConfig, Transport,
    UdpTransport,
};

// 值与结果
pub use armature_protocol::{
    CommandKind, ConnectionId, ExecutionResult, Outcome, PeerAddress, Value, ValueKind, ValueType,
};

// 错误类型
pub use armature_core::ComponentError;
pub use armature_manager::ManagerError;
