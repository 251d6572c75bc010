//! # Armature Manager
//!
//! 组件管理层：
//!
//! - [`LocalComponentManager`]：每进程一个，管理组件并处理连接请求
//! - [`GlobalComponentManager`]：集群目录，协调跨进程连接
//! - [`transport`]：管理器之间的传输（进程内 loopback 与 UDP）
//!
//! ## 跨进程连接
//!
//! ```
//! use armature_core::{CommandKind, Component, ComponentConfig, Requirement};
//! use armature_manager::{GlobalComponentManager, LocalComponentManager, transport::LoopbackNetwork};
//! use armature_protocol::PeerAddress;
//! use std::sync::Arc;
//!
//! let network = LoopbackNetwork::new();
//! let gcm = Arc::new(GlobalComponentManager::new(Arc::new(network.transport())));
//! let gcm_address = gcm.serve(&PeerAddress::loopback("gcm")).unwrap();
//!
//! // 服务端进程
//! let a = Arc::new(LocalComponentManager::with_transport("a", Arc::new(network.transport())));
//! a.serve(&PeerAddress::loopback("a")).unwrap();
//! a.attach_global(gcm_address.clone()).unwrap();
//! let x = Component::new("X", ComponentConfig::default());
//! x.add_provided_interface("Ip")
//!     .unwrap()
//!     .add_command_read::<f64, _>("GetValue", || 42.0)
//!     .unwrap();
//! a.add_component(x).unwrap();
//!
//! // 客户端进程
//! let b = Arc::new(LocalComponentManager::with_transport("b", Arc::new(network.transport())));
//! b.serve(&PeerAddress::loopback("b")).unwrap();
//! b.attach_global(gcm_address).unwrap();
//! let y = Component::new("Y", ComponentConfig::default());
//! let get = y
//!     .add_required_interface("Ic")
//!     .unwrap()
//!     .add_function("GetValue", CommandKind::Read, Requirement::Mandatory)
//!     .unwrap();
//! b.add_component(y).unwrap();
//!
//! let id = b.connect("Y", "Ic", "a", "X", "Ip").unwrap();
//! assert_eq!(get.call_read::<f64>(), Ok(42.0));
//! b.disconnect(id).unwrap();
//! ```

pub mod config;
pub mod error;
mod global;
mod local;
mod proxy;
pub mod transport;

pub use config::{ConfigError, ManagerConfig, ManagerSection, TransportSection};
pub use error::{ManagerError, TransportError};
pub use global::GlobalComponentManager;
pub use local::LocalComponentManager;
pub use transport::{
    Listener, LoopbackNetwork, LoopbackTransport, RequestHandler, Transport, UdpTransport,
};
