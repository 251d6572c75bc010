//! 提供接口与需求接口
//!
//! - [`ProvidedInterface`]：命令和事件生成器的注册表，属于一个组件
//! - [`RequiredInterface`]：函数和事件处理器的注册表，属于一个组件
//!
//! 两者的操作集合在所属组件进入 Ready 之后冻结。注册时通过 [`ValueKind`]
//! 一次性确定参数原型，之后调用时只比较类型标签。

use crate::command::{Command, Dispatch, ExecContext, MulticastCommand};
use crate::error::InterfaceError;
use crate::function::{Function, Requirement};
use crate::state_table::StateTableReader;
use armature_protocol::{
    CommandKind, ExecutionResult, InterfaceDescriptor, InterfaceKind, OperationDescriptor,
    Signature, Value, ValueKind,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 取出第 `index` 个参数（签名已检查，类型不符只可能来自调用方绕过检查）
#[inline]
fn arg<A: ValueKind>(args: &[Value], index: usize) -> Result<A, ExecutionResult> {
    args.get(index)
        .cloned()
        .and_then(A::from_value)
        .ok_or(ExecutionResult::BadInput)
}

fn describe(name: &str, kind: CommandKind, signature: &Signature, handle: bool, id: u64) -> OperationDescriptor {
    OperationDescriptor {
        name: name.to_string(),
        kind,
        signature: signature.clone(),
        handle: handle.then(|| armature_protocol::CommandHandle::new(kind, id)),
    }
}

// ============================================================================
// Provided
// ============================================================================

/// 提供接口
pub struct ProvidedInterface {
    name: String,
    owner: String,
    exec: Option<ExecContext>,
    commands: RwLock<Vec<Arc<Command>>>,
    events: RwLock<Vec<Arc<MulticastCommand>>>,
    frozen: AtomicBool,
}

impl ProvidedInterface {
    /// 创建提供接口
    ///
    /// `exec` 为 `Some` 时，非读取类命令通过所属组件的邮箱排队执行。
    pub fn new(name: impl Into<String>, owner: impl Into<String>, exec: Option<ExecContext>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            exec,
            commands: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub(crate) fn set_frozen(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::Release);
    }

    fn dispatch(&self) -> Dispatch {
        match &self.exec {
            Some(ctx) => Dispatch::Queued(ctx.clone()),
            None => Dispatch::Direct,
        }
    }

    fn check_insert(&self, name: &str) -> Result<(), InterfaceError> {
        if self.is_frozen() {
            return Err(InterfaceError::Frozen(self.name.clone()));
        }
        let taken = self.commands.read().iter().any(|c| c.name() == name)
            || self.events.read().iter().any(|e| e.name() == name);
        if taken {
            return Err(InterfaceError::Duplicate {
                interface: self.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// 加入已构造的命令（代理接口使用）
    pub fn add_command(&self, command: Command) -> Result<Arc<Command>, InterfaceError> {
        self.check_insert(command.name())?;
        let command = Arc::new(command);
        self.commands.write().push(command.clone());
        Ok(command)
    }

    /// 以类型擦除的可调用体注册命令
    pub fn add_command_raw<F>(
        &self,
        name: impl Into<String>,
        kind: CommandKind,
        signature: Signature,
        callable: F,
    ) -> Result<Arc<Command>, InterfaceError>
    where
        F: Fn(&[Value]) -> Result<Value, ExecutionResult> + Send + Sync + 'static,
    {
        if !kind.accepts_signature(&signature) {
            return Err(InterfaceError::KindMismatch {
                kind: kind.tag() as char,
                signature: signature.to_string(),
            });
        }
        self.add_command(Command::new(name, kind, signature, self.dispatch(), callable))
    }

    /// 无参数、无结果
    pub fn add_command_void<F>(&self, name: impl Into<String>, f: F) -> Result<Arc<Command>, InterfaceError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_command_raw(name, CommandKind::Void, Signature::void(), move |_| {
            f();
            Ok(Value::Void)
        })
    }

    /// 单参数写入
    pub fn add_command_write<A, F>(&self, name: impl Into<String>, f: F) -> Result<Arc<Command>, InterfaceError>
    where
        A: ValueKind,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.add_command_raw(name, CommandKind::Write, Signature::write(A::TYPE), move |args| {
            f(arg(args, 0)?);
            Ok(Value::Void)
        })
    }

    /// 双参数写入
    pub fn add_command_write2<A, B, F>(&self, name: impl Into<String>, f: F) -> Result<Arc<Command>, InterfaceError>
    where
        A: ValueKind,
        B: ValueKind,
        F: Fn(A, B) + Send + Sync + 'static,
    {
        let signature = Signature::new(&[A::TYPE, B::TYPE], None)?;
        self.add_command_raw(name, CommandKind::Write, signature, move |args| {
            f(arg(args, 0)?, arg(args, 1)?);
            Ok(Value::Void)
        })
    }

    /// 无参数读取（在调用者线程直接执行，只应读取无锁状态）
    pub fn add_command_read<R, F>(&self, name: impl Into<String>, f: F) -> Result<Arc<Command>, InterfaceError>
    where
        R: ValueKind,
        F: Fn() -> R + Send + Sync + 'static,
    {
        self.add_command_raw(name, CommandKind::Read, Signature::read(R::TYPE), move |_| {
            Ok(f().into_value())
        })
    }

    /// 读取状态表某列的最新值
    pub fn add_command_read_state<R: ValueKind>(
        &self,
        name: impl Into<String>,
        reader: StateTableReader,
        column: impl Into<String>,
    ) -> Result<Arc<Command>, InterfaceError> {
        let column = column.into();
        self.add_command_raw(name, CommandKind::Read, Signature::read(R::TYPE), move |_| {
            let (value, _) = reader
                .read_latest(&column)
                .map_err(|_| ExecutionResult::NotOk)?;
            if value.value_type() != R::TYPE {
                return Err(ExecutionResult::BadInput);
            }
            Ok(value)
        })
    }

    /// 单参数限定读取（在调用者线程直接执行）
    pub fn add_command_qualified_read<A, R, F>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<Arc<Command>, InterfaceError>
    where
        A: ValueKind,
        R: ValueKind,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.add_command_raw(
            name,
            CommandKind::QualifiedRead,
            Signature::qualified(A::TYPE, R::TYPE),
            move |args| Ok(f(arg(args, 0)?).into_value()),
        )
    }

    /// 无参数、有结果（排队执行）
    pub fn add_command_void_return<R, F>(&self, name: impl Into<String>, f: F) -> Result<Arc<Command>, InterfaceError>
    where
        R: ValueKind,
        F: Fn() -> R + Send + Sync + 'static,
    {
        self.add_command_raw(name, CommandKind::VoidReturn, Signature::read(R::TYPE), move |_| {
            Ok(f().into_value())
        })
    }

    /// 单参数、有结果（排队执行）
    pub fn add_command_write_return<A, R, F>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<Arc<Command>, InterfaceError>
    where
        A: ValueKind,
        R: ValueKind,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.add_command_raw(
            name,
            CommandKind::WriteReturn,
            Signature::qualified(A::TYPE, R::TYPE),
            move |args| Ok(f(arg(args, 0)?).into_value()),
        )
    }

    /// 注册事件生成器
    pub fn add_event(
        &self,
        name: impl Into<String>,
        signature: Signature,
    ) -> Result<Arc<MulticastCommand>, InterfaceError> {
        let name = name.into();
        self.check_insert(&name)?;
        let event = Arc::new(MulticastCommand::new(name, signature));
        self.events.write().push(event.clone());
        Ok(event)
    }

    pub fn add_event_void(&self, name: impl Into<String>) -> Result<Arc<MulticastCommand>, InterfaceError> {
        self.add_event(name, Signature::void())
    }

    pub fn add_event_write<A: ValueKind>(
        &self,
        name: impl Into<String>,
    ) -> Result<Arc<MulticastCommand>, InterfaceError> {
        self.add_event(name, Signature::write(A::TYPE))
    }

    pub fn find_command(&self, name: &str) -> Option<Arc<Command>> {
        self.commands.read().iter().find(|c| c.name() == name).cloned()
    }

    pub fn find_event(&self, name: &str) -> Option<Arc<MulticastCommand>> {
        self.events.read().iter().find(|e| e.name() == name).cloned()
    }

    pub fn find_command_by_id(&self, id: u64) -> Option<Arc<Command>> {
        self.commands.read().iter().find(|c| c.id() == id).cloned()
    }

    pub fn find_event_by_id(&self, id: u64) -> Option<Arc<MulticastCommand>> {
        self.events.read().iter().find(|e| e.id() == id).cloned()
    }

    pub fn commands(&self) -> Vec<Arc<Command>> {
        self.commands.read().clone()
    }

    pub fn events(&self) -> Vec<Arc<MulticastCommand>> {
        self.events.read().clone()
    }

    /// 目录描述（带远程句柄）
    pub fn descriptor(&self) -> InterfaceDescriptor {
        InterfaceDescriptor {
            name: self.name.clone(),
            kind: InterfaceKind::Provided,
            operations: self
                .commands
                .read()
                .iter()
                .map(|c| describe(c.name(), c.kind(), c.signature(), true, c.id()))
                .collect(),
            events: self
                .events
                .read()
                .iter()
                .map(|e| describe(e.name(), e.kind(), e.signature(), true, e.id()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for ProvidedInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidedInterface")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("commands", &self.commands.read().len())
            .field("events", &self.events.read().len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

// ============================================================================
// Required
// ============================================================================

/// 需求接口
pub struct RequiredInterface {
    name: String,
    owner: String,
    exec: Option<ExecContext>,
    default_timeout: Duration,
    functions: RwLock<Vec<Arc<Function>>>,
    handlers: RwLock<Vec<Arc<Command>>>,
    frozen: AtomicBool,
}

impl RequiredInterface {
    /// 创建需求接口
    ///
    /// `exec` 为 `Some` 时，事件处理器通过所属组件的邮箱排队执行。
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        exec: Option<ExecContext>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            exec,
            default_timeout,
            functions: RwLock::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub(crate) fn set_frozen(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::Release);
    }

    fn check_insert(&self, name: &str) -> Result<(), InterfaceError> {
        if self.is_frozen() {
            return Err(InterfaceError::Frozen(self.name.clone()));
        }
        let taken = self.functions.read().iter().any(|f| f.name() == name)
            || self.handlers.read().iter().any(|h| h.name() == name);
        if taken {
            return Err(InterfaceError::Duplicate {
                interface: self.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// 注册函数（使用接口默认超时）
    pub fn add_function(
        &self,
        name: impl Into<String>,
        kind: CommandKind,
        requirement: Requirement,
    ) -> Result<Arc<Function>, InterfaceError> {
        let function = Function::new(name, kind, requirement).with_timeout(self.default_timeout);
        self.insert_function(function)
    }

    /// 注册已构造的函数
    pub fn insert_function(&self, function: Function) -> Result<Arc<Function>, InterfaceError> {
        self.check_insert(function.name())?;
        let function = Arc::new(function);
        self.functions.write().push(function.clone());
        Ok(function)
    }

    /// 以类型擦除的可调用体注册事件处理器
    pub fn add_event_handler<F>(
        &self,
        name: impl Into<String>,
        signature: Signature,
        handler: F,
    ) -> Result<Arc<Command>, InterfaceError>
    where
        F: Fn(&[Value]) -> Result<(), ExecutionResult> + Send + Sync + 'static,
    {
        let name = name.into();
        self.check_insert(&name)?;
        let kind = if signature.arity() == 0 {
            CommandKind::Void
        } else {
            CommandKind::Write
        };
        let signature = Signature::new(signature.args(), None)?;
        let dispatch = match &self.exec {
            Some(ctx) => Dispatch::Queued(ctx.clone()),
            None => Dispatch::Direct,
        };
        let command = Arc::new(Command::new(name, kind, signature, dispatch, move |args| {
            handler(args).map(|_| Value::Void)
        }));
        self.handlers.write().push(command.clone());
        Ok(command)
    }

    pub fn add_event_handler_void<F>(&self, name: impl Into<String>, f: F) -> Result<Arc<Command>, InterfaceError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_event_handler(name, Signature::void(), move |_| {
            f();
            Ok(())
        })
    }

    pub fn add_event_handler_write<A, F>(&self, name: impl Into<String>, f: F) -> Result<Arc<Command>, InterfaceError>
    where
        A: ValueKind,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.add_event_handler(name, Signature::write(A::TYPE), move |args| {
            f(arg(args, 0)?);
            Ok(())
        })
    }

    pub fn find_function(&self, name: &str) -> Option<Arc<Function>> {
        self.functions.read().iter().find(|f| f.name() == name).cloned()
    }

    pub fn find_event_handler(&self, name: &str) -> Option<Arc<Command>> {
        self.handlers.read().iter().find(|h| h.name() == name).cloned()
    }

    pub fn functions(&self) -> Vec<Arc<Function>> {
        self.functions.read().clone()
    }

    pub fn event_handlers(&self) -> Vec<Arc<Command>> {
        self.handlers.read().clone()
    }

    /// 第一个未绑定的必需函数
    pub fn unbound_mandatory(&self) -> Option<String> {
        self.functions
            .read()
            .iter()
            .find(|f| f.is_mandatory() && !f.is_valid())
            .map(|f| f.name().to_string())
    }

    /// 目录描述（函数不带句柄；事件处理器带句柄）
    pub fn descriptor(&self) -> InterfaceDescriptor {
        InterfaceDescriptor {
            name: self.name.clone(),
            kind: InterfaceKind::Required,
            operations: self
                .functions
                .read()
                .iter()
                .map(|f| {
                    let signature = f.signature().cloned().unwrap_or_default();
                    describe(f.name(), f.kind(), &signature, false, 0)
                })
                .collect(),
            events: self
                .handlers
                .read()
                .iter()
                .map(|h| describe(h.name(), h.kind(), h.signature(), true, h.id()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for RequiredInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequiredInterface")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("functions", &self.functions.read().len())
            .field("handlers", &self.handlers.read().len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_table::state_table;
    use armature_protocol::ValueType;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn test_typed_registration_prototypes() {
        let iface = ProvidedInterface::new("Robot", "arm", None);
        let set = iface.add_command_write::<f64, _>("SetGain", |_| {}).unwrap();
        assert_eq!(set.kind(), CommandKind::Write);
        assert_eq!(set.signature().args(), &[ValueType::Double]);

        let get = iface.add_command_read::<i64, _>("GetCount", || 3).unwrap();
        assert_eq!(get.signature().result(), Some(ValueType::Int));

        let two = iface
            .add_command_write2::<f64, bool, _>("Move", |_, _| {})
            .unwrap();
        assert_eq!(two.signature().arity(), 2);
    }

    #[test]
    fn test_duplicate_and_frozen() {
        let iface = ProvidedInterface::new("Robot", "arm", None);
        iface.add_command_void("Home", || {}).unwrap();
        assert!(matches!(
            iface.add_command_void("Home", || {}),
            Err(InterfaceError::Duplicate { .. })
        ));
        assert!(matches!(
            iface.add_event_void("Home"),
            Err(InterfaceError::Duplicate { .. })
        ));

        iface.set_frozen(true);
        assert!(matches!(
            iface.add_command_void("Stop", || {}),
            Err(InterfaceError::Frozen(_))
        ));
    }

    #[test]
    fn test_raw_kind_mismatch() {
        let iface = ProvidedInterface::new("Robot", "arm", None);
        let result = iface.add_command_raw(
            "Broken",
            CommandKind::Read,
            Signature::void(),
            |_| Ok(Value::Void),
        );
        assert!(matches!(result, Err(InterfaceError::KindMismatch { .. })));
    }

    #[test]
    fn test_find_and_descriptor() {
        let iface = ProvidedInterface::new("Robot", "arm", None);
        let home = iface.add_command_void("Home", || {}).unwrap();
        let moved = iface.add_event_write::<f64>("Moved").unwrap();

        assert!(Arc::ptr_eq(&iface.find_command("Home").unwrap(), &home));
        assert!(Arc::ptr_eq(&iface.find_command_by_id(home.id()).unwrap(), &home));
        assert!(Arc::ptr_eq(&iface.find_event_by_id(moved.id()).unwrap(), &moved));
        assert!(iface.find_command("Missing").is_none());

        let descriptor = iface.descriptor();
        assert_eq!(descriptor.kind, InterfaceKind::Provided);
        assert_eq!(descriptor.operations.len(), 1);
        assert_eq!(descriptor.operations[0].handle, Some(home.handle()));
        assert_eq!(descriptor.events[0].handle, Some(moved.handle()));
    }

    #[test]
    fn test_typed_callable_executes() {
        let iface = ProvidedInterface::new("Robot", "arm", None);
        let total = Arc::new(AtomicI64::new(0));
        let t = total.clone();
        let add = iface
            .add_command_write::<i64, _>("Add", move |v| {
                t.fetch_add(v, Ordering::SeqCst);
            })
            .unwrap();
        let double = iface
            .add_command_write_return::<i64, i64, _>("Double", |v| v * 2)
            .unwrap();

        assert!(add.execute(&[Value::Int(5)]).is_ok());
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert_eq!(double.execute(&[Value::Int(4)]).into_kind::<i64>(), Ok(8));
    }

    #[test]
    fn test_read_state_command() {
        let mut table = state_table(4);
        table.add_column("position", Value::Double(0.0));
        let iface = ProvidedInterface::new("Robot", "arm", None);
        let get = iface
            .add_command_read_state::<f64>("GetPosition", table.reader(), "position")
            .unwrap();

        assert_eq!(get.execute(&[]).code, ExecutionResult::NotOk);
        table.stage("position", Value::Double(0.25)).unwrap();
        table.advance(10);
        assert_eq!(get.execute(&[]).into_kind::<f64>(), Ok(0.25));
    }

    #[test]
    fn test_required_interface() {
        let iface = RequiredInterface::new("Ic", "client", None, Duration::from_millis(250));
        let get = iface
            .add_function("GetValue", CommandKind::Read, Requirement::Mandatory)
            .unwrap();
        iface
            .add_function("Reset", CommandKind::Void, Requirement::Optional)
            .unwrap();
        assert_eq!(get.timeout(), Duration::from_millis(250));
        assert_eq!(iface.unbound_mandatory().as_deref(), Some("GetValue"));

        let handler = iface.add_event_handler_write::<f64, _>("Moved", |_| {}).unwrap();
        assert_eq!(handler.kind(), CommandKind::Write);
        assert!(matches!(
            iface.add_event_handler_void("Moved", || {}),
            Err(InterfaceError::Duplicate { .. })
        ));

        let descriptor = iface.descriptor();
        assert_eq!(descriptor.kind, InterfaceKind::Required);
        assert_eq!(descriptor.operations.len(), 2);
        assert!(descriptor.operations[0].handle.is_none());
        assert_eq!(descriptor.events.len(), 1);
    }
}
