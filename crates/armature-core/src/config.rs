//! 组件配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 组件运行模式
///
/// 除 `Passive` 外的模式都拥有独立线程、邮箱和状态表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunMode {
    /// 无线程，命令在调用者线程直接执行
    #[default]
    Passive,
    /// 固定周期循环
    Periodic { period_us: u64 },
    /// 连续循环（每周期之间不休眠）
    Continuous,
    /// 按需循环：等待第一个排队调用（或唤醒超时）后执行一个周期
    OnDemand { wake_timeout_ms: u64 },
}

impl RunMode {
    pub fn periodic(period: Duration) -> Self {
        RunMode::Periodic {
            period_us: period.as_micros().max(1) as u64,
        }
    }

    pub fn on_demand(wake_timeout: Duration) -> Self {
        RunMode::OnDemand {
            wake_timeout_ms: wake_timeout.as_millis().max(1) as u64,
        }
    }

    /// 是否拥有独立线程
    pub fn is_active(&self) -> bool {
        !matches!(self, RunMode::Passive)
    }
}

/// 组件配置
///
/// # Example
///
/// ```
/// use armature_core::{ComponentConfig, RunMode};
/// use std::time::Duration;
///
/// let config = ComponentConfig::periodic(Duration::from_millis(5));
/// assert_eq!(config.mailbox_capacity, 64);
/// assert!(config.run_mode.is_active());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    pub run_mode: RunMode,
    /// 邮箱容量（至少为 1）
    pub mailbox_capacity: usize,
    /// 状态表历史行数（至少为 1）
    pub state_table_capacity: usize,
    /// 阻塞调用的默认等待超时（毫秒）
    pub blocking_timeout_ms: u64,
    /// 组件线程是否请求实时优先级（需要 `realtime` feature）
    pub realtime: bool,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Passive,
            mailbox_capacity: 64,
            state_table_capacity: 256,
            blocking_timeout_ms: 1000,
            realtime: false,
        }
    }
}

impl ComponentConfig {
    pub fn passive() -> Self {
        Self::default()
    }

    pub fn periodic(period: Duration) -> Self {
        Self {
            run_mode: RunMode::periodic(period),
            ..Self::default()
        }
    }

    pub fn continuous() -> Self {
        Self {
            run_mode: RunMode::Continuous,
            ..Self::default()
        }
    }

    pub fn on_demand(wake_timeout: Duration) -> Self {
        Self {
            run_mode: RunMode::on_demand(wake_timeout),
            ..Self::default()
        }
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_state_table_capacity(mut self, capacity: usize) -> Self {
        self.state_table_capacity = capacity;
        self
    }

    pub fn with_blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }
}
