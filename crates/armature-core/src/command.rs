//! 命令与可调用体
//!
//! [`Command`] 是类型擦除的操作描述符：名称、类型、签名、可调用体、
//! 启用标志和进程内唯一的 ID（用于远程句柄）。调用方式由 [`Dispatch`] 决定：
//!
//! - `Direct`：在调用者线程执行（被动组件、代理的内部命令）
//! - `Queued`：压入所属组件的邮箱，由组件线程执行；读取类命令和组件线程
//!   自身的调用走直接执行的快速路径
//! - `Remote`：通过 [`Forwarder`] 发往对端进程
//!
//! [`MulticastCommand`] 用作事件生成器：一次执行按插入顺序扇出给所有处理器。

use crate::mailbox::{Invocation, MailboxSender, ticket};
use arc_swap::{ArcSwap, ArcSwapOption};
use armature_protocol::{CommandHandle, CommandKind, ExecutionResult, Outcome, Signature, Value};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{debug, error, trace};

/// 可调用体：参数已通过签名检查
///
/// 返回 `Err(code)` 表示命令自身报告的失败（如 `NotOk`）。
pub type Callable = dyn Fn(&[Value]) -> Result<Value, ExecutionResult> + Send + Sync;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// 分配进程内唯一的命令 ID（0 保留为无效 ID）
pub(crate) fn next_command_id() -> u64 {
    NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed)
}

/// 远程转发器（由管理层的代理实现）
pub trait Forwarder: Send + Sync {
    /// 转发一次调用
    ///
    /// `blocking` 为 `Some(timeout)` 时对端阻塞等待执行完成。
    fn forward(&self, handle: CommandHandle, args: &[Value], blocking: Option<Duration>)
    -> Outcome;
}

/// 排队执行上下文（组件邮箱发送端 + 所属线程）
#[derive(Clone)]
pub struct ExecContext {
    sender: MailboxSender,
    owner: Arc<ArcSwapOption<ThreadId>>,
}

impl ExecContext {
    pub fn new(sender: MailboxSender) -> Self {
        Self {
            sender,
            owner: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// 将当前线程登记为所属线程
    pub(crate) fn bind_current_thread(&self) {
        self.owner
            .store(Some(Arc::new(std::thread::current().id())));
    }

    pub(crate) fn clear_owner(&self) {
        self.owner.store(None);
    }

    /// 当前线程是否为所属组件线程
    pub fn is_owner_thread(&self) -> bool {
        matches!(
            self.owner.load().as_deref(),
            Some(id) if *id == std::thread::current().id()
        )
    }

    pub fn sender(&self) -> &MailboxSender {
        &self.sender
    }
}

/// 远程目标
#[derive(Clone)]
pub struct RemoteTarget {
    pub forwarder: Arc<dyn Forwarder>,
    pub handle: CommandHandle,
}

/// 调用派发方式
#[derive(Clone)]
pub enum Dispatch {
    Direct,
    Queued(ExecContext),
    Remote(RemoteTarget),
}

/// 命令
pub struct Command {
    name: String,
    kind: CommandKind,
    signature: Signature,
    callable: Box<Callable>,
    enabled: AtomicBool,
    id: u64,
    dispatch: Dispatch,
}

impl Command {
    /// 创建命令
    pub fn new<F>(
        name: impl Into<String>,
        kind: CommandKind,
        signature: Signature,
        dispatch: Dispatch,
        callable: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ExecutionResult> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            signature,
            callable: Box::new(callable),
            enabled: AtomicBool::new(true),
            id: next_command_id(),
            dispatch,
        }
    }

    /// 创建在调用者线程直接执行的命令
    pub fn direct<F>(
        name: impl Into<String>,
        kind: CommandKind,
        signature: Signature,
        callable: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ExecutionResult> + Send + Sync + 'static,
    {
        Self::new(name, kind, signature, Dispatch::Direct, callable)
    }

    /// 创建转发到远程进程的代理命令
    pub fn remote(
        name: impl Into<String>,
        kind: CommandKind,
        signature: Signature,
        forwarder: Arc<dyn Forwarder>,
        handle: CommandHandle,
    ) -> Self {
        let target = RemoteTarget {
            forwarder: forwarder.clone(),
            handle,
        };
        Self::new(
            name,
            kind,
            signature,
            Dispatch::Remote(target),
            move |args: &[Value]| forwarder.forward(handle, args, None).into_value(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 远程句柄（类型标签 + ID）
    pub fn handle(&self) -> CommandHandle {
        CommandHandle::new(self.kind, self.id)
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn enable(&self) {
        self.set_enabled(true);
    }

    pub fn disable(&self) {
        self.set_enabled(false);
    }

    /// 非阻塞执行
    ///
    /// 排队命令返回 `CommandQueued`（或 `MailboxFull` / `NoMailbox`），
    /// 其他情况返回执行结果。
    pub fn execute(self: &Arc<Self>, args: &[Value]) -> Outcome {
        if let Some(rejected) = self.precheck(args) {
            return rejected;
        }

        match &self.dispatch {
            Dispatch::Queued(ctx) if self.needs_queue(ctx) => {
                let code = ctx
                    .sender
                    .try_push(Invocation::new(self.clone(), args, None));
                trace!("Queued call to '{}': {}", self.name, code);
                Outcome::code(code)
            },
            _ => self.invoke(args),
        }
    }

    /// 阻塞执行：排队后等待组件线程执行完成（最长 `timeout`）
    pub fn execute_blocking(self: &Arc<Self>, args: &[Value], timeout: Duration) -> Outcome {
        if let Some(rejected) = self.precheck(args) {
            return rejected;
        }

        match &self.dispatch {
            Dispatch::Queued(ctx) if self.needs_queue(ctx) => {
                let (ticket, receiver) = ticket();
                let code = ctx
                    .sender
                    .try_push(Invocation::new(self.clone(), args, Some(ticket)));
                if code.is_queued() {
                    receiver.wait(timeout)
                } else {
                    Outcome::code(code)
                }
            },
            Dispatch::Remote(target) => {
                target
                    .forwarder
                    .forward(target.handle, args, Some(timeout))
            },
            _ => self.invoke(args),
        }
    }

    /// 启用标志和签名检查
    fn precheck(&self, args: &[Value]) -> Option<Outcome> {
        if !self.is_enabled() {
            return Some(Outcome::code(ExecutionResult::Disabled));
        }
        if !self.signature.accepts(args) {
            debug!(
                "Bad input for '{}': expected {}, got {} argument(s)",
                self.name,
                self.signature,
                args.len()
            );
            return Some(Outcome::code(ExecutionResult::BadInput));
        }
        None
    }

    fn needs_queue(&self, ctx: &ExecContext) -> bool {
        !self.kind.is_read() && !ctx.is_owner_thread()
    }

    /// 在当前线程执行可调用体（panic 映射为 `CommandFailed`）
    pub(crate) fn invoke(&self, args: &[Value]) -> Outcome {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.callable)(args))) {
            Ok(Ok(value)) => {
                if self.kind.has_result() {
                    Outcome::ok_with(value)
                } else {
                    Outcome::ok()
                }
            },
            Ok(Err(code)) => Outcome::code(code),
            Err(payload) => {
                error!(
                    "Command '{}' panicked: {}",
                    self.name,
                    panic_message(payload.as_ref())
                );
                Outcome::code(ExecutionResult::CommandFailed)
            },
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("signature", &self.signature)
            .field("id", &self.id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ============================================================================
// Multicast
// ============================================================================

/// 多播命令（事件生成器）
///
/// 子命令按插入顺序执行；某个子命令失败时继续执行后续子命令，
/// 整体结果总是 `Ok`（失败以 debug 级别记录）。
pub struct MulticastCommand {
    name: String,
    kind: CommandKind,
    signature: Signature,
    id: u64,
    enabled: AtomicBool,
    handlers: ArcSwap<Vec<Arc<Command>>>,
    // 串行化写者，读者无锁
    write_lock: Mutex<()>,
}

impl MulticastCommand {
    /// 创建事件生成器
    ///
    /// 无参数的签名为 void 事件，否则为 write 事件。结果类型被忽略。
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let kind = if signature.arity() == 0 {
            CommandKind::Void
        } else {
            CommandKind::Write
        };
        let signature = Signature::new(signature.args(), None).unwrap_or_default();
        Self {
            name: name.into(),
            kind,
            signature,
            id: next_command_id(),
            enabled: AtomicBool::new(true),
            handlers: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> CommandHandle {
        CommandHandle::new(self.kind, self.id)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// 添加处理器（参数原型必须一致）
    pub fn add_handler(&self, handler: Arc<Command>) -> bool {
        if handler.signature().args() != self.signature.args() {
            debug!(
                "Handler '{}' {} does not match event '{}' {}",
                handler.name(),
                handler.signature(),
                self.name,
                self.signature
            );
            return false;
        }

        let _guard = self.write_lock.lock();
        let mut next = Vec::clone(&self.handlers.load());
        next.push(handler);
        self.handlers.store(Arc::new(next));
        true
    }

    /// 移除处理器（按实例比较）
    pub fn remove_handler(&self, handler: &Arc<Command>) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.handlers.load_full();
        let next: Vec<Arc<Command>> = current
            .iter()
            .filter(|h| !Arc::ptr_eq(h, handler))
            .cloned()
            .collect();
        let removed = next.len() != current.len();
        if removed {
            self.handlers.store(Arc::new(next));
        }
        removed
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.load().len()
    }

    /// 扇出执行
    pub fn execute(&self, args: &[Value]) -> Outcome {
        if !self.is_enabled() {
            return Outcome::code(ExecutionResult::Disabled);
        }
        if !self.signature.accepts(args) {
            return Outcome::code(ExecutionResult::BadInput);
        }

        let handlers = self.handlers.load();
        for handler in handlers.iter() {
            let outcome = handler.execute(args);
            if !outcome.code.is_accepted() {
                debug!(
                    "Event '{}': handler '{}' returned {}",
                    self.name,
                    handler.name(),
                    outcome.code
                );
            }
        }
        Outcome::ok()
    }
}

impl std::fmt::Debug for MulticastCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastCommand")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("id", &self.id)
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;
    use armature_protocol::ValueType;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicUsize;

    fn counting(kind: CommandKind, signature: Signature, hits: Arc<AtomicUsize>) -> Arc<Command> {
        Arc::new(Command::direct("Count", kind, signature, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Void)
        }))
    }

    #[test]
    fn test_disabled_never_invokes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let command = counting(CommandKind::Void, Signature::void(), hits.clone());
        command.disable();

        assert_eq!(command.execute(&[]).code, ExecutionResult::Disabled);
        assert_eq!(
            command.execute_blocking(&[], Duration::from_millis(1)).code,
            ExecutionResult::Disabled
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        command.enable();
        assert!(command.execute(&[]).is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_input() {
        let hits = Arc::new(AtomicUsize::new(0));
        let command = counting(
            CommandKind::Write,
            Signature::write(ValueType::Double),
            hits.clone(),
        );

        assert_eq!(command.execute(&[Value::Int(1)]).code, ExecutionResult::BadInput);
        assert_eq!(command.execute(&[]).code, ExecutionResult::BadInput);
        assert!(command.execute(&[Value::Double(1.0)]).is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_maps_to_command_failed() {
        let command = Arc::new(Command::direct(
            "Explode",
            CommandKind::Void,
            Signature::void(),
            |_| panic!("boom"),
        ));
        assert_eq!(command.execute(&[]).code, ExecutionResult::CommandFailed);
    }

    #[test]
    fn test_callable_reported_failure() {
        let command = Arc::new(Command::direct(
            "Refuse",
            CommandKind::Void,
            Signature::void(),
            |_| Err(ExecutionResult::NotOk),
        ));
        assert_eq!(command.execute(&[]).code, ExecutionResult::NotOk);
    }

    #[test]
    fn test_result_value_returned_for_result_kinds() {
        let command = Arc::new(Command::direct(
            "Double",
            CommandKind::QualifiedRead,
            Signature::qualified(ValueType::Int, ValueType::Int),
            |args| Ok(Value::Int(args[0].as_i64().unwrap_or(0) * 2)),
        ));
        let outcome = command.execute(&[Value::Int(21)]);
        assert_eq!(outcome.into_kind::<i64>(), Ok(42));
    }

    #[test]
    fn test_queued_dispatch() {
        let mailbox = Mailbox::new(4);
        let ctx = ExecContext::new(mailbox.sender());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in = hits.clone();
        let command = Arc::new(Command::new(
            "Step",
            CommandKind::Void,
            Signature::void(),
            Dispatch::Queued(ctx.clone()),
            move |_| {
                hits_in.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Void)
            },
        ));

        assert_eq!(command.execute(&[]).code, ExecutionResult::CommandQueued);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(mailbox.drain(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // 所属线程的调用直接执行
        ctx.bind_current_thread();
        assert!(command.execute(&[]).is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(mailbox.is_empty());
        ctx.clear_owner();
    }

    #[test]
    fn test_read_kind_bypasses_mailbox() {
        let mailbox = Mailbox::new(1);
        let ctx = ExecContext::new(mailbox.sender());
        let command = Arc::new(Command::new(
            "Get",
            CommandKind::Read,
            Signature::read(ValueType::Double),
            Dispatch::Queued(ctx),
            |_| Ok(Value::Double(3.5)),
        ));
        assert_eq!(command.execute(&[]).into_kind::<f64>(), Ok(3.5));
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Command::direct("A", CommandKind::Void, Signature::void(), |_| Ok(Value::Void));
        let b = Command::direct("B", CommandKind::Void, Signature::void(), |_| Ok(Value::Void));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.handle().kind, CommandKind::Void);
        assert_eq!(a.handle().id, a.id());
    }

    struct EchoForwarder {
        calls: PlMutex<Vec<(CommandHandle, Option<Duration>)>>,
    }

    impl Forwarder for EchoForwarder {
        fn forward(
            &self,
            handle: CommandHandle,
            args: &[Value],
            blocking: Option<Duration>,
        ) -> Outcome {
            self.calls.lock().push((handle, blocking));
            match blocking {
                Some(_) => Outcome::ok_with(args.first().cloned().unwrap_or_default()),
                None => Outcome::queued(),
            }
        }
    }

    #[test]
    fn test_remote_dispatch() {
        let forwarder = Arc::new(EchoForwarder {
            calls: PlMutex::new(Vec::new()),
        });
        let handle = CommandHandle::new(CommandKind::WriteReturn, 77);
        let command = Arc::new(Command::remote(
            "Echo",
            CommandKind::WriteReturn,
            Signature::qualified(ValueType::Int, ValueType::Int),
            forwarder.clone(),
            handle,
        ));

        assert_eq!(
            command.execute(&[Value::Int(1)]).code,
            ExecutionResult::CommandQueued
        );
        let outcome = command.execute_blocking(&[Value::Int(9)], Duration::from_millis(50));
        assert_eq!(outcome.into_kind::<i64>(), Ok(9));

        let calls = forwarder.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (handle, None));
        assert_eq!(calls[1], (handle, Some(Duration::from_millis(50))));
    }

    #[test]
    fn test_multicast_order_and_swallow() {
        let order = Arc::new(PlMutex::new(Vec::new()));
        let event = MulticastCommand::new("Moved", Signature::write(ValueType::Int));
        assert_eq!(event.kind(), CommandKind::Write);

        for label in ["first", "second", "third"] {
            let order = order.clone();
            let handler = Arc::new(Command::direct(
                label,
                CommandKind::Write,
                Signature::write(ValueType::Int),
                move |_| {
                    order.lock().push(label);
                    if label == "second" {
                        Err(ExecutionResult::NotOk)
                    } else {
                        Ok(Value::Void)
                    }
                },
            ));
            assert!(event.add_handler(handler));
        }

        assert!(event.execute(&[Value::Int(1)]).is_ok());
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
        assert_eq!(event.execute(&[]).code, ExecutionResult::BadInput);
    }

    #[test]
    fn test_multicast_handler_management() {
        let event = MulticastCommand::new("Tick", Signature::void());
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = counting(CommandKind::Void, Signature::void(), hits.clone());
        let wrong = counting(
            CommandKind::Write,
            Signature::write(ValueType::Int),
            hits.clone(),
        );

        assert!(!event.add_handler(wrong));
        assert!(event.add_handler(handler.clone()));
        assert_eq!(event.handler_count(), 1);

        event.execute(&[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(event.remove_handler(&handler));
        assert!(!event.remove_handler(&handler));
        event.execute(&[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
