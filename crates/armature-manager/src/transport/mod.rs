//! 传输层
//!
//! 管理器之间只交换 [`Request`] / [`Response`]，由帧编解码器
//! （`armature_protocol::encode_frame`）打包。传输只负责把帧送到对端：
//!
//! - [`LoopbackNetwork`]：进程内的隔离网络，测试和单进程集群使用
//! - [`UdpTransport`]：UDP 数据报，一个请求对应一个响应
//!
//! 接收端统一由 [`Listener`] 的工作线程池解码并调用 [`RequestHandler`]。

mod loopback;
mod udp;

pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use udp::UdpTransport;

use crate::error::TransportError;
use armature_core::join_with_deadline;
use armature_protocol::{
    FrameHeader, MessageType, PeerAddress, Request, Response, decode_frame, encode_frame,
};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// 工作线程检查停止标志的间隔
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 请求处理器
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> Response;
}

impl<F> RequestHandler for F
where
    F: Fn(Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: Request) -> Response {
        self(request)
    }
}

/// 传输抽象
pub trait Transport: Send + Sync {
    /// 发送请求并等待响应
    fn call(
        &self,
        to: &PeerAddress,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, TransportError>;

    /// 发送单向请求（不等待响应）
    fn send(&self, to: &PeerAddress, request: &Request) -> Result<(), TransportError>;

    /// 在 `at` 上监听
    ///
    /// 返回的 [`Listener`] 被 drop 时停止监听。
    fn listen(
        &self,
        at: &PeerAddress,
        handler: Arc<dyn RequestHandler>,
        workers: usize,
    ) -> Result<Listener, TransportError>;
}

/// 收到的一帧及其回复通道
pub(crate) struct Incoming {
    pub frame: Vec<u8>,
    pub reply: Box<dyn FnOnce(Vec<u8>) + Send>,
}

// ============================================================================
// Listener
// ============================================================================

/// 监听句柄：工作线程池 + 可选的接收线程
pub struct Listener {
    address: PeerAddress,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
    join_timeout: Duration,
}

impl Listener {
    /// 启动工作线程池
    ///
    /// `running` 与传输自己的接收线程共享；`threads` 是这些接收线程，
    /// 停止时一起 join。`on_stop` 在停止标志清除后执行（如从 loopback 网络注销）。
    pub(crate) fn spawn(
        address: PeerAddress,
        jobs: Receiver<Incoming>,
        handler: Arc<dyn RequestHandler>,
        workers: usize,
        running: Arc<AtomicBool>,
        mut threads: Vec<JoinHandle<()>>,
        on_stop: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Self, TransportError> {
        for index in 0..workers.max(1) {
            let jobs = jobs.clone();
            let handler = handler.clone();
            let running = running.clone();
            let handle = thread::Builder::new()
                .name(format!("armature-svc-{}", index))
                .spawn(move || worker_loop(jobs, handler, running))?;
            threads.push(handle);
        }

        debug!("Listening on {} ({} worker(s))", address, workers.max(1));

        Ok(Self {
            address,
            running,
            threads,
            on_stop,
            join_timeout: Duration::from_secs(2),
        })
    }

    /// 实际监听地址（UDP 端口 0 时为分配后的端口）
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 停止所有线程并等待退出
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(on_stop) = self.on_stop.take() {
            on_stop();
        }

        let deadline = std::time::Instant::now() + self.join_timeout;
        for handle in self.threads.drain(..) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if !join_with_deadline(handle, remaining) {
                error!(
                    "Listener thread on {} failed to shut down within {:?}",
                    self.address, self.join_timeout
                );
            }
        }
        debug!("Listener on {} stopped", self.address);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("address", &self.address)
            .field("threads", &self.threads.len())
            .field("running", &self.is_running())
            .finish()
    }
}

fn worker_loop(jobs: Receiver<Incoming>, handler: Arc<dyn RequestHandler>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        match jobs.recv_timeout(POLL_INTERVAL) {
            Ok(incoming) => serve(incoming, handler.as_ref()),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// 解码、处理并回复一帧
fn serve(incoming: Incoming, handler: &dyn RequestHandler) {
    let (header, request): (FrameHeader, Request) = match decode_frame(&incoming.frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Dropping malformed frame ({} bytes): {}", incoming.frame.len(), e);
            return;
        },
    };

    trace!("Serving {} (seq {})", request.name(), header.sequence);
    let name = request.name();
    let response = handler.handle(request);

    if !header.message_type.expects_reply() {
        return;
    }
    match encode_frame(MessageType::Response, header.sequence, &response) {
        Ok(frame) => (incoming.reply)(frame),
        Err(e) => error!("Failed to encode response to {}: {}", name, e),
    }
}

/// 编码请求帧
pub(crate) fn request_frame(
    request: &Request,
    sequence: u32,
    expects_reply: bool,
) -> Result<Vec<u8>, TransportError> {
    let message_type = if expects_reply {
        MessageType::Request
    } else {
        MessageType::Notify
    };
    Ok(encode_frame(message_type, sequence, request)?)
}

/// 解码响应帧，返回序列号和响应
pub(crate) fn response_frame(frame: &[u8]) -> Result<(u32, Response), TransportError> {
    let (header, response): (FrameHeader, Response) = decode_frame(frame)?;
    Ok((header.sequence, response))
}
