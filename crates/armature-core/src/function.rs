//! 函数（客户端存根）
//!
//! [`Function`] 持有对某个 [`Command`] 的弱引用绑定，为所属组件提供统一的调用契约。
//! 未绑定是合法状态：调用未绑定的函数返回 `FunctionNotBound` 且没有任何副作用。
//! 绑定只由连接（以及代表连接的 crate 内部代码）解除。

use crate::command::Command;
use arc_swap::ArcSwapOption;
use armature_protocol::{CommandKind, ExecutionResult, Outcome, Signature, Value, ValueKind};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// 函数需求级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// 未绑定时组件创建失败
    Mandatory,
    Optional,
}

/// 函数
pub struct Function {
    name: String,
    kind: CommandKind,
    signature: Option<Signature>,
    requirement: Requirement,
    timeout: Duration,
    binding: ArcSwapOption<Weak<Command>>,
}

impl Function {
    /// 默认阻塞超时
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(name: impl Into<String>, kind: CommandKind, requirement: Requirement) -> Self {
        Self {
            name: name.into(),
            kind,
            signature: None,
            requirement,
            timeout: Self::DEFAULT_TIMEOUT,
            binding: ArcSwapOption::empty(),
        }
    }

    /// 指定期望签名（绑定时校验）
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn requirement(&self) -> Requirement {
        self.requirement
    }

    pub fn is_mandatory(&self) -> bool {
        self.requirement == Requirement::Mandatory
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 绑定到命令
    ///
    /// 命令类型或签名与期望不符时返回 `false`，原有绑定保持不变。
    pub fn bind(&self, command: &Arc<Command>) -> bool {
        if command.kind() != self.kind {
            debug!(
                "Function '{}' expects kind '{}', command '{}' is '{}'",
                self.name,
                self.kind,
                command.name(),
                command.kind()
            );
            return false;
        }
        if let Some(expected) = &self.signature
            && expected != command.signature()
        {
            debug!(
                "Function '{}' expects {}, command '{}' has {}",
                self.name,
                expected,
                command.name(),
                command.signature()
            );
            return false;
        }

        self.binding.store(Some(Arc::new(Arc::downgrade(command))));
        true
    }

    /// 解除绑定
    pub(crate) fn detach(&self) {
        self.binding.store(None);
    }

    /// 是否绑定到仍然存活的命令
    pub fn is_valid(&self) -> bool {
        self.command().is_some()
    }

    /// 当前绑定的命令
    pub fn command(&self) -> Option<Arc<Command>> {
        self.binding.load().as_ref().and_then(|weak| weak.upgrade())
    }

    /// 是否绑定到指定命令
    pub fn is_bound_to(&self, command: &Arc<Command>) -> bool {
        self.command().is_some_and(|c| Arc::ptr_eq(&c, command))
    }

    /// 非阻塞执行（可能返回 `CommandQueued`）
    pub fn execute(&self, args: &[Value]) -> Outcome {
        match self.command() {
            Some(command) => command.execute(args),
            None => Outcome::code(ExecutionResult::FunctionNotBound),
        }
    }

    /// 阻塞执行，使用函数自身的超时
    pub fn execute_blocking(&self, args: &[Value]) -> Outcome {
        self.execute_blocking_timeout(args, self.timeout)
    }

    pub fn execute_blocking_timeout(&self, args: &[Value], timeout: Duration) -> Outcome {
        match self.command() {
            Some(command) => command.execute_blocking(args, timeout),
            None => Outcome::code(ExecutionResult::FunctionNotBound),
        }
    }

    // === 类型化调用 ===

    /// 无参数调用（非阻塞）
    pub fn call_void(&self) -> ExecutionResult {
        self.execute(&[]).code
    }

    /// 单参数写入（非阻塞）
    pub fn call_write<A: ValueKind>(&self, arg: A) -> ExecutionResult {
        self.execute(&[arg.into_value()]).code
    }

    /// 双参数写入（非阻塞）
    pub fn call_write2<A: ValueKind, B: ValueKind>(&self, a: A, b: B) -> ExecutionResult {
        self.execute(&[a.into_value(), b.into_value()]).code
    }

    /// 无参数读取（阻塞等待结果）
    pub fn call_read<R: ValueKind>(&self) -> Result<R, ExecutionResult> {
        self.execute_blocking(&[]).into_kind()
    }

    /// 单参数查询（阻塞等待结果）
    pub fn call_qualified<A: ValueKind, R: ValueKind>(&self, arg: A) -> Result<R, ExecutionResult> {
        self.execute_blocking(&[arg.into_value()]).into_kind()
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("requirement", &self.requirement)
            .field("bound", &self.is_valid())
            .finish()
    }
}
