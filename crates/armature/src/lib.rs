//! Armature - 机器人控制软件的组件/命令中间件
//!
//! 控制程序被拆分为组件，组件之间只通过接口通信：
//!
//! - **协议层** (`protocol`): 值类型、结果码、10 字节命令句柄和管理器消息帧
//! - **核心层** (`core`): 命令、函数、邮箱、状态表、接口和组件生命周期
//! - **管理层** (`manager`): 本地/全局组件管理器、跨进程代理和传输
//!
//! # 快速开始
//!
//! ```rust
//! use armature::prelude::*;
//! use std::time::Duration;
//!
//! let manager = LocalComponentManager::new("arm");
//!
//! let joint = Component::new("Joint", ComponentConfig::periodic(Duration::from_millis(1)));
//! joint
//!     .add_provided_interface("State")
//!     .unwrap()
//!     .add_command_read::<f64, _>("GetPosition", || 0.5)
//!     .unwrap();
//! manager.add_component(joint).unwrap();
//!
//! let monitor = Component::new("Monitor", ComponentConfig::passive());
//! let position = monitor
//!     .add_required_interface("Joint")
//!     .unwrap()
//!     .add_function("GetPosition", CommandKind::Read, Requirement::Mandatory)
//!     .unwrap();
//! manager.add_component(monitor).unwrap();
//!
//! manager.connect("Monitor", "Joint", "arm", "Joint", "State").unwrap();
//! manager.create_all().unwrap();
//! manager.start_all().unwrap();
//!
//! assert_eq!(position.call_read::<f64>(), Ok(0.5));
//! assert!(manager.shutdown());
//! ```

pub mod logging;
pub mod prelude;

pub use armature_core as core;
pub use armature_manager as manager;
pub use armature_protocol as protocol;

// --- 常用类型 ---

pub use armature_core::{
    Component, ComponentConfig, ComponentState, Function, ProvidedInterface, RequiredInterface,
    Requirement, RunMode, Task, TaskContext,
};
pub use armature_manager::{GlobalComponentManager, LocalComponentManager, ManagerConfig};
pub use armature_protocol::{CommandHandle, CommandKind, ExecutionResult, Outcome, Value};

// 错误类型
pub use armature_core::{ComponentError, InterfaceError, StateTableError};
pub use armature_manager::{ConfigError, ManagerError, TransportError};
pub use armature_protocol::ProtocolError;

pub use logging::init_logger;
