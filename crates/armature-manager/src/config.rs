//! # 管理器配置
//!
//! 进程级配置，由 TOML 文件加载。缺省的字段取默认值。
//!
//! ```toml
//! [manager]
//! process_name = "arm-controller"
//! global_address = "udp://127.0.0.1:18890"
//! request_timeout_ms = 2000
//!
//! [transport]
//! listen_address = "udp://127.0.0.1:0"
//! service_workers = 4
//!
//! [component]
//! mailbox_capacity = 64
//!
//! [component.run_mode]
//! kind = "periodic"
//! period_us = 1000
//! ```

use armature_core::ComponentConfig;
use armature_protocol::PeerAddress;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 读写配置文件失败
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML 序列化失败
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// 地址格式非法
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),
}

/// `[manager]` 段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    /// 进程名（在全局目录中唯一）
    pub process_name: String,
    /// 全局管理器地址；为空时进程独立运行
    pub global_address: Option<String>,
    /// 跨进程请求的超时
    pub request_timeout_ms: u64,
    /// 关闭时等待工作线程退出的最长时间
    pub join_timeout_ms: u64,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            process_name: "process".to_string(),
            global_address: None,
            request_timeout_ms: 2000,
            join_timeout_ms: 2000,
        }
    }
}

/// `[transport]` 段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// 本进程的监听地址；为空时不接受跨进程请求
    pub listen_address: Option<String>,
    /// 处理请求的工作线程数
    pub service_workers: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            listen_address: None,
            service_workers: 4,
        }
    }
}

/// 管理器配置
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub manager: ManagerSection,
    pub transport: TransportSection,
    /// 组件默认配置
    pub component: ComponentConfig,
}

impl ManagerConfig {
    /// 创建指定进程名的默认配置
    pub fn new(process_name: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.manager.process_name = process_name.into();
        config
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// 保存配置到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = self.to_toml_string()?;
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.manager.request_timeout_ms.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.manager.join_timeout_ms)
    }

    pub fn global_address(&self) -> Result<Option<PeerAddress>, ConfigError> {
        parse_address(self.manager.global_address.as_deref())
    }

    pub fn listen_address(&self) -> Result<Option<PeerAddress>, ConfigError> {
        parse_address(self.transport.listen_address.as_deref())
    }
}

fn parse_address(text: Option<&str>) -> Result<Option<PeerAddress>, ConfigError> {
    match text {
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidAddress(text.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armature_core::RunMode;

    #[test]
    fn test_defaults_for_empty_document() {
        let config = ManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_millis(2000));
        assert_eq!(config.transport.service_workers, 4);
        assert_eq!(config.component.mailbox_capacity, 64);
        assert_eq!(config.global_address().unwrap(), None);
    }

    #[test]
    fn test_partial_document() {
        let text = r#"
            [manager]
            process_name = "arm"
            global_address = "loopback://gcm"

            [component.run_mode]
            kind = "periodic"
            period_us = 500
        "#;
        let config = ManagerConfig::from_toml_str(text).unwrap();
        assert_eq!(config.manager.process_name, "arm");
        assert_eq!(config.manager.request_timeout_ms, 2000);
        assert_eq!(
            config.global_address().unwrap(),
            Some(PeerAddress::loopback("gcm"))
        );
        assert_eq!(config.component.run_mode, RunMode::Periodic { period_us: 500 });
        assert_eq!(config.component.state_table_capacity, 256);
    }

    #[test]
    fn test_invalid_address() {
        let mut config = ManagerConfig::new("p");
        config.transport.listen_address = Some("tcp://nowhere".to_string());
        assert!(matches!(
            config.listen_address(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            ManagerConfig::from_toml_str("[manager]\nrequest_timeout_ms = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ManagerConfig::new("vision");
        config.transport.listen_address = Some("udp://127.0.0.1:18891".to_string());
        config.component = ComponentConfig::on_demand(Duration::from_millis(50));

        let text = config.to_toml_string().unwrap();
        assert!(text.contains("process_name = \"vision\""));
        assert_eq!(ManagerConfig::from_toml_str(&text).unwrap(), config);
    }
}
