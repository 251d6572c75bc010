//! 组件：生命周期、接口集合与运行线程
//!
//! 状态机：
//!
//! ```text
//! Constructed --create()--> Initializing --startup ok--> Ready --start()--> Active
//!      |                        |                          |                  |
//!      |                        +--startup failed--> Constructed              |
//!      +-----------------------kill()--------------> Finishing <-------------+
//!                                                        |
//!                                                        v
//!                                                    Finished
//! ```
//!
//! 主动组件（Periodic / Continuous / OnDemand）拥有自己的线程、邮箱与状态表，
//! 每个周期依次执行：drain 邮箱 -> 用户 `run` -> 状态表 advance。
//! 被动组件没有线程，其命令在调用者线程上直接执行。

use crate::command::ExecContext;
use crate::config::{ComponentConfig, RunMode};
use crate::error::{ComponentError, StateTableError};
use crate::interface::{ProvidedInterface, RequiredInterface};
use crate::join::join_with_deadline;
use crate::mailbox::{Mailbox, MailboxMetricsSnapshot};
use crate::state_table::{StateTableReader, StateTableWriter};
use armature_protocol::{ComponentDescriptor, Value};
use parking_lot::{Condvar, Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Drop 时等待组件线程退出的最长时间
const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// State
// ============================================================================

/// 组件生命周期状态（按声明顺序单调推进，启动失败回退到 Constructed 除外）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentState {
    Constructed,
    Initializing,
    Ready,
    Active,
    Finishing,
    Finished,
}

impl ComponentState {
    /// 是否已进入终止阶段
    pub fn is_terminating(self) -> bool {
        matches!(self, ComponentState::Finishing | ComponentState::Finished)
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentState::Constructed => "constructed",
            ComponentState::Initializing => "initializing",
            ComponentState::Ready => "ready",
            ComponentState::Active => "active",
            ComponentState::Finishing => "finishing",
            ComponentState::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// 状态 + 条件变量
struct Lifecycle {
    state: Mutex<ComponentState>,
    changed: Condvar,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: Mutex::new(ComponentState::Constructed),
            changed: Condvar::new(),
        }
    }

    fn get(&self) -> ComponentState {
        *self.state.lock()
    }

    fn set(&self, next: ComponentState) {
        *self.state.lock() = next;
        self.changed.notify_all();
    }

    /// 当前状态属于 `from` 时迁移到 `to`，否则返回当前状态
    fn transition(&self, from: &[ComponentState], to: ComponentState) -> Result<ComponentState, ComponentState> {
        let mut state = self.state.lock();
        let current = *state;
        if !from.contains(&current) {
            return Err(current);
        }
        *state = to;
        drop(state);
        self.changed.notify_all();
        Ok(current)
    }

    /// 阻塞直到状态不再等于 `current`
    fn wait_while(&self, current: ComponentState) -> ComponentState {
        let mut state = self.state.lock();
        while *state == current {
            self.changed.wait(&mut state);
        }
        *state
    }

    /// 等待状态达到（或越过）`target`
    fn wait_for(&self, target: ComponentState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state < target {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return *state >= target;
            }
        }
        true
    }
}

// ============================================================================
// Task
// ============================================================================

/// 用户任务返回的错误类型
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// 组件的用户逻辑
///
/// 所有回调都在组件线程上执行（被动组件则在调用 `create()` / `kill()` 的线程上）。
pub trait Task: Send + 'static {
    /// Initializing 阶段执行一次；返回错误时组件回到 Constructed
    fn startup(&mut self, _ctx: &mut TaskContext<'_>) -> TaskResult {
        Ok(())
    }

    /// Active 阶段每个周期执行一次（在 drain 邮箱之后）
    fn run(&mut self, ctx: &mut TaskContext<'_>);

    /// Finishing 阶段执行一次
    fn cleanup(&mut self, _ctx: &mut TaskContext<'_>) {}
}

/// 闭包任务：只提供 `run`
pub struct FnTask<F>(pub F);

impl<F> Task for FnTask<F>
where
    F: FnMut(&mut TaskContext<'_>) + Send + 'static,
{
    fn run(&mut self, ctx: &mut TaskContext<'_>) {
        (self.0)(ctx)
    }
}

struct IdleTask;

impl Task for IdleTask {
    fn run(&mut self, _ctx: &mut TaskContext<'_>) {}
}

/// 任务回调的上下文
pub struct TaskContext<'a> {
    component: &'a str,
    cycle: u64,
    started: Instant,
    state: Option<&'a mut StateTableWriter>,
}

impl<'a> TaskContext<'a> {
    pub fn component_name(&self) -> &str {
        self.component
    }

    /// 当前周期序号（第一个 `run` 为 0）
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// 自线程启动以来的微秒数，也是状态表行的时间戳来源
    pub fn elapsed_us(&self) -> u64 {
        self.started.elapsed().as_micros() as u64
    }

    /// 为本周期暂存一个状态列值，周期结束时随 advance 发布
    pub fn stage(&mut self, column: &str, value: impl Into<Value>) -> Result<(), StateTableError> {
        match self.state.as_deref_mut() {
            Some(writer) => writer.stage(column, value.into()),
            None => Err(StateTableError::NoSuchColumn(column.to_string())),
        }
    }

    /// 直接访问状态表写端（被动组件为 `None`）
    pub fn state_table(&mut self) -> Option<&mut StateTableWriter> {
        self.state.as_deref_mut()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// 周期统计（原子计数器）
#[derive(Debug, Default)]
pub struct CycleStatistics {
    cycles: AtomicU64,
    last_period_us: AtomicU64,
    total_period_us: AtomicU64,
    max_period_us: AtomicU64,
    overruns: AtomicU64,
    executed: AtomicU64,
}

impl CycleStatistics {
    fn record(&self, period_us: u64, overrun: bool, executed: usize) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_period_us.store(period_us, Ordering::Relaxed);
        self.total_period_us.fetch_add(period_us, Ordering::Relaxed);
        self.max_period_us.fetch_max(period_us, Ordering::Relaxed);
        if overrun {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        self.executed.fetch_add(executed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CycleSnapshot {
        let cycles = self.cycles.load(Ordering::Relaxed);
        let total = self.total_period_us.load(Ordering::Relaxed);
        CycleSnapshot {
            cycles,
            last_period_us: self.last_period_us.load(Ordering::Relaxed),
            avg_period_us: if cycles == 0 { 0 } else { total / cycles },
            max_period_us: self.max_period_us.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
        }
    }
}

/// 周期统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleSnapshot {
    /// 已完成的周期数
    pub cycles: u64,
    /// 最近一个周期的实际长度（含睡眠）
    pub last_period_us: u64,
    pub avg_period_us: u64,
    pub max_period_us: u64,
    /// 周期执行时间超过配置周期的次数（仅 Periodic）
    pub overruns: u64,
    /// 从邮箱执行的调用总数
    pub executed: u64,
}

// ============================================================================
// Component
// ============================================================================

/// 移入组件线程的部分
struct ThreadParts {
    task: Box<dyn Task>,
    mailbox: Option<Mailbox>,
    writer: Option<StateTableWriter>,
}

impl ThreadParts {
    fn call<R>(
        &mut self,
        component: &str,
        cycle: u64,
        started: Instant,
        f: impl FnOnce(&mut dyn Task, &mut TaskContext<'_>) -> R,
    ) -> R {
        let mut ctx = TaskContext {
            component,
            cycle,
            started,
            state: self.writer.as_mut(),
        };
        f(self.task.as_mut(), &mut ctx)
    }
}

struct Inner {
    name: String,
    config: ComponentConfig,
    lifecycle: Lifecycle,
    exec: Option<ExecContext>,
    provided: RwLock<Vec<Arc<ProvidedInterface>>>,
    required: RwLock<Vec<Arc<RequiredInterface>>>,
    parts: Mutex<Option<ThreadParts>>,
    state_reader: Option<StateTableReader>,
    stats: CycleStatistics,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn freeze(&self, frozen: bool) {
        for iface in self.provided.read().iter() {
            iface.set_frozen(frozen);
        }
        for iface in self.required.read().iter() {
            iface.set_frozen(frozen);
        }
    }

    fn clear_owner(&self) {
        if let Some(exec) = &self.exec {
            exec.clear_owner();
        }
    }
}

/// 组件
///
/// 以 `Arc<Component>` 形式交给组件管理器；最后一个引用被释放时，
/// 组件被 kill 并等待线程退出。
pub struct Component {
    inner: Arc<Inner>,
}

impl Component {
    /// 创建不带用户逻辑的组件（只暴露接口）
    pub fn new(name: impl Into<String>, config: ComponentConfig) -> Self {
        Self::with_task(name, config, IdleTask)
    }

    /// 创建带用户任务的组件
    pub fn with_task(name: impl Into<String>, config: ComponentConfig, task: impl Task) -> Self {
        let name = name.into();
        let active = config.run_mode.is_active();

        let (mailbox, exec, writer, state_reader) = if active {
            let mailbox = Mailbox::new(config.mailbox_capacity);
            let exec = ExecContext::new(mailbox.sender());
            let writer = StateTableWriter::new(config.state_table_capacity);
            let reader = writer.reader();
            (Some(mailbox), Some(exec), Some(writer), Some(reader))
        } else {
            (None, None, None, None)
        };

        debug!("Component '{}' constructed ({:?})", name, config.run_mode);

        Self {
            inner: Arc::new(Inner {
                name,
                config,
                lifecycle: Lifecycle::new(),
                exec,
                provided: RwLock::new(Vec::new()),
                required: RwLock::new(Vec::new()),
                parts: Mutex::new(Some(ThreadParts {
                    task: Box::new(task),
                    mailbox,
                    writer,
                })),
                state_reader,
                stats: CycleStatistics::default(),
                thread: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ComponentConfig {
        &self.inner.config
    }

    pub fn run_mode(&self) -> RunMode {
        self.inner.config.run_mode
    }

    pub fn state(&self) -> ComponentState {
        self.inner.lifecycle.get()
    }

    fn ensure_constructed(&self) -> Result<(), ComponentError> {
        let state = self.state();
        if state != ComponentState::Constructed {
            return Err(ComponentError::NotConstructed {
                component: self.inner.name.clone(),
                state,
            });
        }
        Ok(())
    }

    fn interface_taken(&self, name: &str) -> bool {
        self.inner.provided.read().iter().any(|i| i.name() == name)
            || self.inner.required.read().iter().any(|i| i.name() == name)
    }

    // ========================================================================
    // Interfaces
    // ========================================================================

    /// 添加提供接口（仅 Constructed 状态）
    ///
    /// 主动组件的提供接口中，写类命令通过组件邮箱排队执行。
    pub fn add_provided_interface(
        &self,
        name: impl Into<String>,
    ) -> Result<Arc<ProvidedInterface>, ComponentError> {
        self.ensure_constructed()?;
        let name = name.into();
        if self.interface_taken(&name) {
            return Err(ComponentError::DuplicateInterface(name));
        }
        let iface = Arc::new(ProvidedInterface::new(
            name,
            self.inner.name.clone(),
            self.inner.exec.clone(),
        ));
        self.inner.provided.write().push(iface.clone());
        Ok(iface)
    }

    /// 添加需求接口（仅 Constructed 状态）
    pub fn add_required_interface(
        &self,
        name: impl Into<String>,
    ) -> Result<Arc<RequiredInterface>, ComponentError> {
        self.ensure_constructed()?;
        let name = name.into();
        if self.interface_taken(&name) {
            return Err(ComponentError::DuplicateInterface(name));
        }
        let iface = Arc::new(RequiredInterface::new(
            name,
            self.inner.name.clone(),
            self.inner.exec.clone(),
            self.inner.config.blocking_timeout(),
        ));
        self.inner.required.write().push(iface.clone());
        Ok(iface)
    }

    pub fn provided_interface(&self, name: &str) -> Option<Arc<ProvidedInterface>> {
        self.inner.provided.read().iter().find(|i| i.name() == name).cloned()
    }

    pub fn required_interface(&self, name: &str) -> Option<Arc<RequiredInterface>> {
        self.inner.required.read().iter().find(|i| i.name() == name).cloned()
    }

    pub fn provided_interfaces(&self) -> Vec<Arc<ProvidedInterface>> {
        self.inner.provided.read().clone()
    }

    pub fn required_interfaces(&self) -> Vec<Arc<RequiredInterface>> {
        self.inner.required.read().clone()
    }

    // ========================================================================
    // State table
    // ========================================================================

    /// 添加状态列（仅主动组件、Constructed 状态）
    ///
    /// 被动组件没有状态表，返回 `false`。
    pub fn add_state_column(&self, name: impl Into<String>, exemplar: impl Into<Value>) -> bool {
        if self.state() != ComponentState::Constructed {
            return false;
        }
        let mut parts = self.inner.parts.lock();
        match parts.as_mut().and_then(|p| p.writer.as_mut()) {
            Some(writer) => writer.add_column(name, exemplar.into()),
            None => false,
        }
    }

    /// 状态表读端（被动组件为 `None`）
    pub fn state_table(&self) -> Option<StateTableReader> {
        self.inner.state_reader.clone()
    }

    pub fn statistics(&self) -> CycleSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn mailbox_metrics(&self) -> Option<MailboxMetricsSnapshot> {
        self.inner.exec.as_ref().map(|exec| exec.sender().metrics().snapshot())
    }

    /// 目录描述
    pub fn descriptor(&self) -> ComponentDescriptor {
        let mut interfaces: Vec<_> = self.inner.provided.read().iter().map(|i| i.descriptor()).collect();
        interfaces.extend(self.inner.required.read().iter().map(|i| i.descriptor()));
        ComponentDescriptor {
            name: self.inner.name.clone(),
            interfaces,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Constructed -> Initializing -> Ready
    ///
    /// 所有必需函数都已绑定才能创建。主动组件在新线程上执行 `startup`，
    /// 本调用阻塞到 startup 结束；失败时组件回到 Constructed。
    pub fn create(&self) -> Result<(), ComponentError> {
        let inner = &self.inner;

        let state = inner.lifecycle.get();
        if state != ComponentState::Constructed {
            return Err(ComponentError::InvalidTransition {
                component: inner.name.clone(),
                from: state,
                to: ComponentState::Initializing,
            });
        }

        for iface in inner.required.read().iter() {
            if let Some(function) = iface.unbound_mandatory() {
                warn!(
                    "Cannot create '{}': mandatory function '{}' of '{}' is not bound",
                    inner.name,
                    function,
                    iface.name()
                );
                return Err(ComponentError::UnboundFunction {
                    interface: iface.name().to_string(),
                    function,
                });
            }
        }

        if let Err(current) = inner
            .lifecycle
            .transition(&[ComponentState::Constructed], ComponentState::Initializing)
        {
            return Err(ComponentError::InvalidTransition {
                component: inner.name.clone(),
                from: current,
                to: ComponentState::Initializing,
            });
        }
        inner.freeze(true);

        if inner.config.run_mode.is_active() {
            self.create_active()
        } else {
            self.create_passive()
        }
    }

    fn startup_failed(&self, parts: ThreadParts, reason: String) -> ComponentError {
        let inner = &self.inner;
        *inner.parts.lock() = Some(parts);
        inner.freeze(false);
        inner.lifecycle.set(ComponentState::Constructed);
        ComponentError::Startup(reason)
    }

    fn create_passive(&self) -> Result<(), ComponentError> {
        let inner = &self.inner;
        let Some(mut parts) = inner.parts.lock().take() else {
            inner.lifecycle.set(ComponentState::Constructed);
            return Err(ComponentError::ThreadExited);
        };

        let started = Instant::now();
        if let Err(e) = parts.call(&inner.name, 0, started, |task, ctx| task.startup(ctx)) {
            error!("Startup of '{}' failed: {}", inner.name, e);
            return Err(self.startup_failed(parts, e.to_string()));
        }

        match inner
            .lifecycle
            .transition(&[ComponentState::Initializing], ComponentState::Ready)
        {
            Ok(_) => {
                *inner.parts.lock() = Some(parts);
                info!("Component '{}' ready (passive)", inner.name);
                Ok(())
            },
            Err(current) => {
                // 初始化期间被 kill
                finish(inner, &mut parts, started);
                Err(ComponentError::InvalidTransition {
                    component: inner.name.clone(),
                    from: current,
                    to: ComponentState::Ready,
                })
            },
        }
    }

    fn create_active(&self) -> Result<(), ComponentError> {
        let inner = &self.inner;
        let (result_tx, result_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let thread_inner = inner.clone();

        let spawned = thread::Builder::new()
            .name(format!("armature-{}", inner.name))
            .spawn(move || component_thread(thread_inner, result_tx));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn thread for '{}': {}", inner.name, e);
                inner.freeze(false);
                inner.lifecycle.set(ComponentState::Constructed);
                return Err(ComponentError::Spawn(e));
            },
        };

        match result_rx.recv() {
            Ok(Ok(())) => {
                *inner.thread.lock() = Some(handle);
                Ok(())
            },
            Ok(Err(reason)) => {
                let _ = handle.join();
                let current = inner.lifecycle.get();
                if current.is_terminating() {
                    // 初始化期间被 kill，线程已执行 cleanup
                    return Err(ComponentError::InvalidTransition {
                        component: inner.name.clone(),
                        from: current,
                        to: ComponentState::Ready,
                    });
                }
                Err(ComponentError::Startup(reason))
            },
            Err(_) => {
                // 线程未报告 startup 结果就退出（startup 内 panic）
                let _ = handle.join();
                if inner.lifecycle.get() == ComponentState::Initializing {
                    inner.lifecycle.set(ComponentState::Finished);
                }
                Err(ComponentError::ThreadExited)
            },
        }
    }

    /// Ready -> Active
    pub fn start(&self) -> Result<(), ComponentError> {
        match self
            .inner
            .lifecycle
            .transition(&[ComponentState::Ready], ComponentState::Active)
        {
            Ok(_) => {
                info!("Component '{}' started", self.inner.name);
                Ok(())
            },
            Err(current) => Err(ComponentError::InvalidTransition {
                component: self.inner.name.clone(),
                from: current,
                to: ComponentState::Active,
            }),
        }
    }

    /// 请求终止
    ///
    /// 主动组件在当前周期结束后关闭邮箱、执行 `cleanup` 并进入 Finished；
    /// 本调用不等待，配合 [`wait_for_state`](Self::wait_for_state) 使用。
    /// 对已终止的组件无效果。
    pub fn kill(&self) {
        let inner = &self.inner;
        let previous = {
            let mut state = inner.lifecycle.state.lock();
            let previous = *state;
            if previous.is_terminating() {
                return;
            }
            *state = ComponentState::Finishing;
            previous
        };
        inner.lifecycle.changed.notify_all();
        info!("Killing component '{}' (was {})", inner.name, previous);

        match previous {
            ComponentState::Constructed => {
                inner.lifecycle.set(ComponentState::Finished);
            },
            ComponentState::Ready | ComponentState::Active if !inner.config.run_mode.is_active() => {
                let parts = inner.parts.lock().take();
                match parts {
                    Some(mut parts) => finish(inner, &mut parts, Instant::now()),
                    None => inner.lifecycle.set(ComponentState::Finished),
                }
            },
            // 主动组件由自己的线程完成终止；被动组件初始化中由 create 完成
            _ => {},
        }
    }

    /// 阻塞直到组件达到（或越过）`target` 状态
    pub fn wait_for_state(&self, target: ComponentState, timeout: Duration) -> bool {
        self.inner.lifecycle.wait_for(target, timeout)
    }

    /// kill 并等待线程退出
    ///
    /// 返回线程是否在 `timeout` 内正常退出（被动组件总是 `true`）。
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.kill();
        let handle = self.inner.thread.lock().take();
        match handle {
            Some(handle) => {
                let clean = join_with_deadline(handle, timeout);
                if !clean {
                    error!(
                        "Thread of '{}' panicked or failed to shut down within {:?}",
                        self.inner.name, timeout
                    );
                }
                clean
            },
            None => true,
        }
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        self.shutdown(DROP_JOIN_TIMEOUT);
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("run_mode", &self.inner.config.run_mode)
            .finish()
    }
}

// ============================================================================
// Thread body
// ============================================================================

fn component_thread(inner: Arc<Inner>, startup_tx: crossbeam_channel::Sender<Result<(), String>>) {
    if inner.config.realtime {
        #[cfg(feature = "realtime")]
        {
            use thread_priority::*;

            match set_current_thread_priority(ThreadPriority::Max) {
                Ok(_) => {
                    info!("Thread of '{}' set to MAX priority (realtime)", inner.name);
                },
                Err(e) => {
                    warn!(
                        "Failed to set thread priority of '{}': {}. \
                        On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                        inner.name, e
                    );
                },
            }
        }
        #[cfg(not(feature = "realtime"))]
        warn!(
            "Component '{}' requests realtime priority but the 'realtime' feature is disabled",
            inner.name
        );
    }

    let Some(mut parts) = inner.parts.lock().take() else {
        let _ = startup_tx.send(Err("component parts already taken".to_string()));
        return;
    };

    if let Some(exec) = &inner.exec {
        exec.bind_current_thread();
    }

    let started = Instant::now();
    let startup = panic::catch_unwind(AssertUnwindSafe(|| {
        parts.call(&inner.name, 0, started, |task, ctx| task.startup(ctx))
    }));

    let failure = match startup {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some("startup panicked".to_string()),
    };
    if let Some(reason) = failure {
        error!("Startup of '{}' failed: {}", inner.name, reason);
        inner.clear_owner();
        *inner.parts.lock() = Some(parts);
        inner.freeze(false);
        inner.lifecycle.set(ComponentState::Constructed);
        let _ = startup_tx.send(Err(reason));
        return;
    }

    let ready = inner
        .lifecycle
        .transition(&[ComponentState::Initializing], ComponentState::Ready);
    if let Err(current) = ready {
        let _ = startup_tx.send(Err(format!("killed during initialization (now {})", current)));
    } else {
        let _ = startup_tx.send(Ok(()));
        info!("Component '{}' ready ({:?})", inner.name, inner.config.run_mode);
        if inner.lifecycle.wait_while(ComponentState::Ready) == ComponentState::Active {
            run_loop(&inner, &mut parts, started);
        }
    }

    finish(&inner, &mut parts, started);
}

fn run_loop(inner: &Inner, parts: &mut ThreadParts, started: Instant) {
    let run_mode = inner.config.run_mode;
    let period = match run_mode {
        RunMode::Periodic { period_us } => Some(Duration::from_micros(period_us.max(1))),
        _ => None,
    };
    let mut cycle = 0u64;
    let mut deadline = Instant::now();
    let mut cycle_start = Instant::now();

    debug!("Run loop of '{}' entered", inner.name);

    while inner.lifecycle.get() == ComponentState::Active {
        let executed = match (&parts.mailbox, run_mode) {
            (Some(mailbox), RunMode::OnDemand { wake_timeout_ms }) => {
                mailbox.wait_and_drain(Duration::from_millis(wake_timeout_ms))
            },
            (Some(mailbox), _) => mailbox.drain(),
            (None, _) => 0,
        };

        let ran = panic::catch_unwind(AssertUnwindSafe(|| {
            parts.call(&inner.name, cycle, started, |task, ctx| task.run(ctx))
        }));
        if ran.is_err() {
            error!("Task of '{}' panicked in cycle {}, finishing", inner.name, cycle);
            let _ = inner
                .lifecycle
                .transition(&[ComponentState::Active], ComponentState::Finishing);
            break;
        }

        if let Some(writer) = parts.writer.as_mut() {
            writer.advance(started.elapsed().as_micros() as u64);
        }

        let mut overrun = false;
        if let Some(period) = period {
            deadline += period;
            let now = Instant::now();
            if now < deadline {
                spin_sleep::sleep(deadline - now);
            } else {
                overrun = true;
                trace!("Cycle {} of '{}' overran its period", cycle, inner.name);
                deadline = now;
            }
        }

        let now = Instant::now();
        inner
            .stats
            .record(now.duration_since(cycle_start).as_micros() as u64, overrun, executed);
        cycle_start = now;
        cycle += 1;
    }

    debug!("Run loop of '{}' left after {} cycle(s)", inner.name, cycle);
}

/// Finishing -> Finished：关闭邮箱并执行 cleanup
fn finish(inner: &Inner, parts: &mut ThreadParts, started: Instant) {
    let _ = inner.lifecycle.transition(
        &[
            ComponentState::Initializing,
            ComponentState::Ready,
            ComponentState::Active,
        ],
        ComponentState::Finishing,
    );

    if let Some(mailbox) = &parts.mailbox {
        mailbox.close();
    }

    let cycle = inner.stats.cycles.load(Ordering::Relaxed);
    let cleaned = panic::catch_unwind(AssertUnwindSafe(|| {
        parts.call(&inner.name, cycle, started, |task, ctx| task.cleanup(ctx))
    }));
    if cleaned.is_err() {
        error!("Cleanup of '{}' panicked", inner.name);
    }

    inner.clear_owner();
    inner.lifecycle.set(ComponentState::Finished);
    info!("Component '{}' finished", inner.name);
}
