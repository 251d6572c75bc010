//! UDP 传输
//!
//! 每个请求是一个数据报，响应回显请求帧头中的序列号。
//! 调用方为每次调用绑定一个临时套接字，只接受序列号匹配的响应。

use super::{
    Incoming, Listener, POLL_INTERVAL, RequestHandler, Transport, request_frame, response_frame,
};
use crate::error::TransportError;
use armature_protocol::{FRAME_HEADER_LEN, MAX_PAYLOAD_LEN, PeerAddress, Request, Response};
use crossbeam_channel::TrySendError;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// 接收线程到工作线程池的队列容量
const JOB_QUEUE: usize = 256;

/// UDP 传输
#[derive(Debug)]
pub struct UdpTransport {
    sequence: AtomicU32,
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UdpTransport {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU32::new(1),
        }
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

fn udp_addr(address: &PeerAddress) -> Result<SocketAddr, TransportError> {
    match address {
        PeerAddress::Udp(addr) => Ok(*addr),
        other => Err(TransportError::UnsupportedAddress(other.to_string())),
    }
}

/// 绑定与目标同族的临时套接字
fn ephemeral_socket(to: SocketAddr) -> Result<UdpSocket, TransportError> {
    let local: SocketAddr = if to.is_ipv4() {
        ([0u8; 4], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    Ok(UdpSocket::bind(local)?)
}

impl Transport for UdpTransport {
    fn call(
        &self,
        to: &PeerAddress,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let addr = udp_addr(to)?;
        let sequence = self.next_sequence();
        let frame = request_frame(request, sequence, true)?;

        let socket = ephemeral_socket(addr)?;
        socket.send_to(&frame, addr)?;
        trace!("{} -> {} (seq {})", request.name(), to, sequence);

        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; FRAME_HEADER_LEN + MAX_PAYLOAD_LEN];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(to.to_string()));
            }
            socket.set_read_timeout(Some(remaining))?;

            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    match response_frame(&buf[..len]) {
                        Ok((seq, response)) if seq == sequence => return Ok(response),
                        Ok((seq, _)) => {
                            debug!("Ignoring stale response (seq {}, expected {})", seq, sequence);
                        },
                        Err(e) => warn!("Malformed response from {}: {}", from, e),
                    }
                },
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Err(TransportError::Timeout(to.to_string()));
                },
                // Linux 上对端端口关闭时 recv 返回 ConnectionRefused
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    return Err(TransportError::Unreachable(to.to_string()));
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn send(&self, to: &PeerAddress, request: &Request) -> Result<(), TransportError> {
        let addr = udp_addr(to)?;
        let frame = request_frame(request, self.next_sequence(), false)?;
        let socket = ephemeral_socket(addr)?;
        socket.send_to(&frame, addr)?;
        Ok(())
    }

    fn listen(
        &self,
        at: &PeerAddress,
        handler: Arc<dyn RequestHandler>,
        workers: usize,
    ) -> Result<Listener, TransportError> {
        let addr = udp_addr(at)?;
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local = PeerAddress::Udp(socket.local_addr()?);
        let socket = Arc::new(socket);

        let (tx, rx) = crossbeam_channel::bounded(JOB_QUEUE);
        let running = Arc::new(AtomicBool::new(true));
        let receiver = {
            let running = running.clone();
            let socket = socket.clone();
            thread::Builder::new()
                .name("armature-udp-rx".to_string())
                .spawn(move || receive_loop(socket, tx, running))?
        };

        Listener::spawn(local, rx, handler, workers, running, vec![receiver], None)
    }
}

fn receive_loop(
    socket: Arc<UdpSocket>,
    jobs: crossbeam_channel::Sender<Incoming>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; FRAME_HEADER_LEN + MAX_PAYLOAD_LEN];

    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let reply_socket = socket.clone();
                let incoming = Incoming {
                    frame: buf[..len].to_vec(),
                    reply: Box::new(move |bytes| {
                        if let Err(e) = reply_socket.send_to(&bytes, from) {
                            warn!("Failed to reply to {}: {}", from, e);
                        }
                    }),
                };
                match jobs.try_send(incoming) {
                    Ok(()) => {},
                    Err(TrySendError::Full(_)) => {
                        warn!("UDP service queue full, dropping datagram from {}", from);
                    },
                    Err(TrySendError::Disconnected(_)) => break,
                }
            },
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            },
            // 上一次回复的目标端口已关闭（ICMP port unreachable）
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                error!("UDP receive error: {}", e);
                thread::sleep(Duration::from_millis(100));
            },
        }
    }
}
