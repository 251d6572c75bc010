//! 日志初始化
//!
//! 所有 crate 通过 `tracing` 输出日志。应用在启动时调用一次
//! [`init_logger`]；使用 `log` 门面的依赖经 `tracing-log` 桥接到同一个订阅者。

use tracing_subscriber::EnvFilter;

/// 未设置 `RUST_LOG` 时的默认过滤
pub const DEFAULT_FILTER: &str = "info";

/// 初始化全局日志订阅者
///
/// `RUST_LOG` 优先于 `default_filter`。重复调用时返回 `false`（已有订阅者）。
pub fn init_logger(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }

    // 使用 log 门面的依赖桥接到同一个订阅者
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("log bridge not installed: {}", e);
    }
    true
}

/// 以默认过滤初始化日志
///
/// ```rust
/// armature::init_logger!();
/// armature::init_logger!("armature_manager=debug");
/// ```
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::logging::init_logger($crate::logging::DEFAULT_FILTER)
    };
    ($filter:expr) => {
        $crate::logging::init_logger($filter)
    };
}
