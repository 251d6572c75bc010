//! 核心层错误类型定义

use crate::component::ComponentState;
use armature_protocol::{ExecutionResult, ProtocolError, ValueType};
use thiserror::Error;

/// 状态表错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTableError {
    /// 列不存在
    #[error("No such column: {0}")]
    NoSuchColumn(String),

    /// 请求的历史行已被覆盖（或超出容量）
    #[error("History index {index} expired (capacity: {capacity})")]
    Expired { index: usize, capacity: usize },

    /// 还没有任何行被发布
    #[error("No row has been published yet")]
    NoData,

    /// 写入值的类型与列原型不一致
    #[error("Type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// 第一次 advance 之后列集合已冻结
    #[error("Column set is frozen")]
    Frozen,
}

/// 接口错误类型
#[derive(Error, Debug)]
pub enum InterfaceError {
    /// 同名操作已存在
    #[error("Duplicate operation '{name}' in interface '{interface}'")]
    Duplicate { interface: String, name: String },

    /// 接口已冻结（组件已进入 Ready）
    #[error("Interface '{0}' is frozen")]
    Frozen(String),

    /// 签名不合法
    #[error("Invalid signature: {0}")]
    Signature(#[from] ProtocolError),

    /// 签名形状与命令类型不符
    #[error("Signature {signature} does not fit command kind '{kind}'")]
    KindMismatch { kind: char, signature: String },
}

/// 组件错误类型
#[derive(Error, Debug)]
pub enum ComponentError {
    /// 非法的生命周期迁移
    #[error("Invalid transition for component '{component}': {from:?} -> {to:?}")]
    InvalidTransition {
        component: String,
        from: ComponentState,
        to: ComponentState,
    },

    /// 必需函数未绑定
    #[error("Mandatory function '{function}' of interface '{interface}' is not bound")]
    UnboundFunction { interface: String, function: String },

    /// 同名接口已存在
    #[error("Duplicate interface '{0}'")]
    DuplicateInterface(String),

    /// 组件已离开 Constructed 状态，接口和状态列不能再添加
    #[error("Component '{component}' is no longer under construction (state: {state:?})")]
    NotConstructed {
        component: String,
        state: ComponentState,
    },

    /// 组件线程创建失败
    #[error("Failed to spawn component thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// 任务 startup 失败
    #[error("Task startup failed: {0}")]
    Startup(String),

    /// 组件线程异常退出
    #[error("Component thread terminated unexpectedly")]
    ThreadExited,
}

impl ComponentError {
    /// 映射为跨边界结果码
    pub fn code(&self) -> ExecutionResult {
        match self {
            ComponentError::UnboundFunction { .. } => ExecutionResult::FunctionNotBound,
            ComponentError::DuplicateInterface(_) => ExecutionResult::BadCommand,
            _ => ExecutionResult::NotOk,
        }
    }
}
