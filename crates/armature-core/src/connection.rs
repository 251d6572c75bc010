//! 接口绑定
//!
//! 把一个需求接口连接到一个提供接口：函数按名称绑定到命令，
//! 事件处理器按名称加入事件生成器。跨进程连接的两端代理也通过这里完成绑定。

use crate::command::{Command, MulticastCommand};
use crate::function::Function;
use crate::interface::{ProvidedInterface, RequiredInterface};
use armature_protocol::ExecutionResult;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// 一次绑定的记录，用于拆除
#[derive(Default)]
pub struct InterfaceBinding {
    functions: Vec<(Arc<Function>, Weak<Command>)>,
    handlers: Vec<(Arc<MulticastCommand>, Arc<Command>)>,
}

impl InterfaceBinding {
    /// 已绑定的函数数
    pub fn bound_functions(&self) -> usize {
        self.functions.len()
    }

    /// 已登记的事件处理器数
    pub fn bound_handlers(&self) -> usize {
        self.handlers.len()
    }

    /// 解除本次绑定的函数并移除事件处理器
    ///
    /// 函数已被重新绑定到其他命令时保持不变。
    pub fn release(self) {
        for (function, command) in &self.functions {
            let still_ours = match command.upgrade() {
                Some(command) => function.is_bound_to(&command),
                None => !function.is_valid(),
            };
            if still_ours {
                function.detach();
            } else {
                debug!("Function '{}' was rebound, keeping its binding", function.name());
            }
        }
        for (event, handler) in &self.handlers {
            event.remove_handler(handler);
        }
    }
}

impl std::fmt::Debug for InterfaceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceBinding")
            .field("functions", &self.functions.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// 绑定需求接口到提供接口
///
/// 必需函数找不到匹配的命令时返回 `BadCommand`，并回滚已完成的绑定。
/// 可选函数和没有对应事件的处理器被跳过。
pub fn bind_interfaces(
    required: &RequiredInterface,
    provided: &ProvidedInterface,
) -> Result<InterfaceBinding, ExecutionResult> {
    let mut binding = InterfaceBinding::default();

    for function in required.functions() {
        let bound = provided
            .find_command(function.name())
            .filter(|command| function.bind(command));

        if let Some(command) = bound {
            binding.functions.push((function, Arc::downgrade(&command)));
        } else if function.is_mandatory() {
            warn!(
                "Mandatory function '{}' of {}/{} has no matching command in {}/{}",
                function.name(),
                required.owner(),
                required.name(),
                provided.owner(),
                provided.name()
            );
            binding.release();
            return Err(ExecutionResult::BadCommand);
        } else {
            debug!(
                "Optional function '{}' left unbound ({}/{})",
                function.name(),
                provided.owner(),
                provided.name()
            );
        }
    }

    for handler in required.event_handlers() {
        match provided.find_event(handler.name()) {
            Some(event) if event.add_handler(handler.clone()) => {
                binding.handlers.push((event, handler));
            },
            Some(_) => {
                debug!(
                    "Event handler '{}' signature does not match event in {}/{}",
                    handler.name(),
                    provided.owner(),
                    provided.name()
                );
            },
            None => {
                debug!(
                    "No event '{}' in {}/{}",
                    handler.name(),
                    provided.owner(),
                    provided.name()
                );
            },
        }
    }

    Ok(binding)
}
