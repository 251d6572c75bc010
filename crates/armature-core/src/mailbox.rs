//! 邮箱：跨线程命令派发
//!
//! 调用者线程把调用快照（命令 + 参数 + 可选完成票据）压入有界队列，
//! 命令所属组件的线程在每个周期内同步地按 FIFO 顺序取出并执行。
//!
//! - 压入从不阻塞：队列满返回 `MailboxFull`，邮箱关闭返回 `NoMailbox`
//! - `drain()` 只处理调用时已在队列中的调用
//! - 每个阻塞调用持有一次性票据（容量 1 的通道），执行完成后由组件线程完成

use crate::command::Command;
use armature_protocol::{ExecutionResult, Outcome, Value};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 参数快照缓冲区（最多 2 个参数，栈上存储）
pub type ArgBuffer = SmallVec<[Value; 2]>;

// ============================================================================
// Completion ticket
// ============================================================================

/// 一次性完成票据（发送端，随调用进入邮箱）
#[derive(Debug)]
pub struct CompletionTicket {
    tx: Sender<Outcome>,
}

/// 一次性完成票据（接收端，由阻塞调用者持有）
#[derive(Debug)]
pub struct TicketReceiver {
    rx: Receiver<Outcome>,
}

/// 创建一对票据
pub fn ticket() -> (CompletionTicket, TicketReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (CompletionTicket { tx }, TicketReceiver { rx })
}

impl CompletionTicket {
    /// 完成票据
    ///
    /// 返回 `false` 表示等待者已放弃（超时后丢弃了接收端），结果被丢弃。
    pub fn complete(self, outcome: Outcome) -> bool {
        self.tx.try_send(outcome).is_ok()
    }
}

impl TicketReceiver {
    /// 等待完成
    ///
    /// - 超时：`TimedOut`（调用可能仍会在稍后执行，结果被丢弃）
    /// - 票据在完成前被丢弃（邮箱关闭）：`NoMailbox`
    pub fn wait(self, timeout: Duration) -> Outcome {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Blocking call timed out after {:?}", timeout);
                Outcome::code(ExecutionResult::TimedOut)
            },
            Err(RecvTimeoutError::Disconnected) => Outcome::code(ExecutionResult::NoMailbox),
        }
    }
}

// ============================================================================
// Invocation
// ============================================================================

/// 排队的调用记录
pub struct Invocation {
    pub(crate) command: Arc<Command>,
    pub(crate) args: ArgBuffer,
    pub(crate) ticket: Option<CompletionTicket>,
}

impl Invocation {
    pub(crate) fn new(command: Arc<Command>, args: &[Value], ticket: Option<CompletionTicket>) -> Self {
        Self {
            command,
            args: args.iter().cloned().collect(),
            ticket,
        }
    }

    /// 在当前线程执行并完成票据
    ///
    /// 返回票据是否被等待者接收（无票据时为 `true`）。
    fn run(self) -> bool {
        let outcome = self.command.invoke(&self.args);
        trace!(
            "Executed queued command '{}': {}",
            self.command.name(),
            outcome.code
        );
        match self.ticket {
            Some(ticket) => ticket.complete(outcome),
            None => true,
        }
    }

    /// 拒绝执行（邮箱关闭时）
    fn reject(self) {
        if let Some(ticket) = self.ticket {
            let _ = ticket.complete(Outcome::code(ExecutionResult::NoMailbox));
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.command.name())
            .field("args", &self.args)
            .field("has_ticket", &self.ticket.is_some())
            .finish()
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// 邮箱指标（原子计数器，任何线程可读）
#[derive(Debug, Default)]
pub struct MailboxMetrics {
    /// 成功入队的调用数
    pub pushed: AtomicU64,
    /// 因队列满被拒绝的调用数
    pub full: AtomicU64,
    /// 组件线程执行的调用数
    pub executed: AtomicU64,
    /// 完成时等待者已放弃的票据数
    pub tickets_dropped: AtomicU64,
}

impl MailboxMetrics {
    pub fn snapshot(&self) -> MailboxMetricsSnapshot {
        MailboxMetricsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            full: self.full.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            tickets_dropped: self.tickets_dropped.load(Ordering::Relaxed),
        }
    }
}

/// 邮箱指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxMetricsSnapshot {
    pub pushed: u64,
    pub full: u64,
    pub executed: u64,
    pub tickets_dropped: u64,
}

// ============================================================================
// Mailbox
// ============================================================================

struct MailboxShared {
    tx: Sender<Invocation>,
    /// 关闭闸门：`true` 表示可以入队
    open: RwLock<bool>,
    capacity: usize,
    metrics: MailboxMetrics,
}

/// 邮箱（接收端，由组件线程独占）
pub struct Mailbox {
    shared: Arc<MailboxShared>,
    rx: Receiver<Invocation>,
}

/// 邮箱发送端（由排队命令持有）
#[derive(Clone)]
pub struct MailboxSender {
    shared: Arc<MailboxShared>,
}

impl Mailbox {
    /// 创建邮箱，容量至少为 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            shared: Arc::new(MailboxShared {
                tx,
                open: RwLock::new(true),
                capacity,
                metrics: MailboxMetrics::default(),
            }),
            rx,
        }
    }

    pub fn sender(&self) -> MailboxSender {
        MailboxSender {
            shared: self.shared.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn metrics(&self) -> &MailboxMetrics {
        &self.shared.metrics
    }

    /// 执行当前已排队的所有调用（FIFO，非阻塞）
    ///
    /// 返回执行的调用数。执行期间新到的调用留给下一次 drain。
    pub fn drain(&self) -> usize {
        let pending = self.rx.len();
        let mut executed = 0;
        for _ in 0..pending {
            match self.rx.try_recv() {
                Ok(invocation) => {
                    self.execute(invocation);
                    executed += 1;
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if executed > 0 {
            debug!("Mailbox drained {} invocation(s)", executed);
        }
        executed
    }

    /// 等待第一个调用（最长 `timeout`），然后 drain
    ///
    /// 用于按需（on-demand）组件。超时返回 0。
    pub fn wait_and_drain(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(invocation) => {
                self.execute(invocation);
                1 + self.drain()
            },
            Err(_) => 0,
        }
    }

    /// 关闭邮箱
    ///
    /// 之后的入队返回 `NoMailbox`；仍在队列中的调用不再执行，
    /// 其票据以 `NoMailbox` 完成。返回被拒绝的调用数。
    pub fn close(&self) -> usize {
        *self.shared.open.write() = false;

        let mut rejected = 0;
        while let Ok(invocation) = self.rx.try_recv() {
            invocation.reject();
            rejected += 1;
        }
        if rejected > 0 {
            warn!("Mailbox closed with {} pending invocation(s)", rejected);
        }
        rejected
    }

    fn execute(&self, invocation: Invocation) {
        let delivered = invocation.run();
        self.shared.metrics.executed.fetch_add(1, Ordering::Relaxed);
        if !delivered {
            self.shared
                .metrics
                .tickets_dropped
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl MailboxSender {
    /// 压入调用（从不阻塞）
    ///
    /// - 成功：`CommandQueued`
    /// - 队列满：`MailboxFull`（调用被丢弃）
    /// - 邮箱已关闭：`NoMailbox`
    pub fn try_push(&self, invocation: Invocation) -> ExecutionResult {
        let open = self.shared.open.read();
        if !*open {
            return ExecutionResult::NoMailbox;
        }

        match self.shared.tx.try_send(invocation) {
            Ok(()) => {
                self.shared.metrics.pushed.fetch_add(1, Ordering::Relaxed);
                ExecutionResult::CommandQueued
            },
            Err(TrySendError::Full(invocation)) => {
                self.shared.metrics.full.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Mailbox full (capacity: {}), dropping call to '{}'",
                    self.shared.capacity,
                    invocation.command.name()
                );
                ExecutionResult::MailboxFull
            },
            Err(TrySendError::Disconnected(_)) => ExecutionResult::NoMailbox,
        }
    }

    pub fn is_open(&self) -> bool {
        *self.shared.open.read()
    }

    pub fn metrics(&self) -> &MailboxMetrics {
        &self.shared.metrics
    }
}
