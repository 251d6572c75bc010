//! 核心层模块
//!
//! 本模块提供组件化中间件的进程内部分，包括：
//! - 命令（Command）与事件生成器（MulticastCommand）
//! - 函数（Function）：需求接口中的调用句柄
//! - 邮箱（Mailbox）：把跨线程调用排队到组件线程
//! - 状态表（StateTable）：单写多读的环形历史
//! - 提供/需求接口与接口绑定
//! - 组件生命周期与运行线程
//!
//! # 使用场景
//!
//! 同一进程内的组件直接通过 [`bind_interfaces`] 连接；跨进程连接由
//! `armature-manager` 中的组件管理器负责。
//!
//! ```
//! use armature_core::{Component, ComponentConfig, Requirement, bind_interfaces};
//! use armature_protocol::CommandKind;
//!
//! let server = Component::new("Server", ComponentConfig::passive());
//! let provided = server.add_provided_interface("Ip").unwrap();
//! provided.add_command_read::<f64, _>("GetValue", || 42.0).unwrap();
//!
//! let client = Component::new("Client", ComponentConfig::passive());
//! let required = client.add_required_interface("Ic").unwrap();
//! let get = required
//!     .add_function("GetValue", CommandKind::Read, Requirement::Mandatory)
//!     .unwrap();
//!
//! let _binding = bind_interfaces(&required, &provided).unwrap();
//! assert_eq!(get.call_read::<f64>(), Ok(42.0));
//! ```

pub mod command;
pub mod component;
mod config;
mod connection;
mod error;
pub mod function;
pub mod interface;
mod join;
pub mod mailbox;
pub mod state_table;

pub use command::{Command, Dispatch, ExecContext, Forwarder, MulticastCommand, RemoteTarget};
pub use component::{
    Component, ComponentState, CycleSnapshot, CycleStatistics, FnTask, Task, TaskContext,
    TaskResult,
};
pub use config::{ComponentConfig, RunMode};
pub use connection::{InterfaceBinding, bind_interfaces};
pub use error::{ComponentError, InterfaceError, StateTableError};
pub use function::{Function, Requirement};
pub use interface::{ProvidedInterface, RequiredInterface};
pub use join::join_with_deadline;
pub use mailbox::{
    ArgBuffer, CompletionTicket, Invocation, Mailbox, MailboxMetrics, MailboxMetricsSnapshot,
    MailboxSender, TicketReceiver, ticket,
};
pub use state_table::{Column, Row, StateTableReader, StateTableWriter, state_table};

// 常用协议类型
pub use armature_protocol::{
    CommandHandle, CommandKind, ExecutionResult, Outcome, Signature, Value, ValueKind, ValueType,
};
