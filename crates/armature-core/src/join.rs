//! 带超时的线程 join

use crossbeam_channel::RecvTimeoutError;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 在 `timeout` 内 join 线程
///
/// 看门狗线程负责阻塞 join；返回线程是否在时限内正常退出
/// （线程 panic 或超时都返回 `false`，超时时看门狗线程继续等待）。
pub fn join_with_deadline<T: Send + 'static>(handle: JoinHandle<T>, timeout: Duration) -> bool {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let _ = tx.send(handle.join().is_ok());
    });
    match rx.recv_timeout(timeout) {
        Ok(clean) => clean,
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
    }
}
