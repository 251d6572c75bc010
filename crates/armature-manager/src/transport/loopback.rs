//! 进程内 loopback 网络
//!
//! 每个 [`LoopbackNetwork`] 是一个独立的命名空间：监听者以名称注册，
//! 帧通过 crossbeam 通道投递。测试为每个用例创建自己的网络。

use super::{Incoming, Listener, RequestHandler, Transport, request_frame, response_frame};
use crate::error::TransportError;
use armature_protocol::{PeerAddress, Request, Response};
use crossbeam_channel::{RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{trace, warn};

/// 每个监听者的待处理帧队列容量
const ENDPOINT_QUEUE: usize = 1024;

/// 隔离的进程内网络
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    endpoints: Arc<RwLock<HashMap<String, Sender<Incoming>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建接入本网络的传输
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            network: self.clone(),
            sequence: AtomicU32::new(1),
        }
    }

    pub fn is_listening(&self, name: &str) -> bool {
        self.endpoints.read().contains_key(name)
    }

    /// 当前监听的名称（排序）
    pub fn endpoints(&self) -> Vec<String> {
        let mut names: Vec<_> = self.endpoints.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn deliver(&self, name: &str, incoming: Incoming) -> Result<(), TransportError> {
        let sender = self.endpoints.read().get(name).cloned();
        let Some(sender) = sender else {
            return Err(TransportError::Unreachable(format!("loopback://{}", name)));
        };
        match sender.try_send(incoming) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Loopback endpoint '{}' queue full, frame dropped", name);
                Err(TransportError::Unreachable(format!("loopback://{} (queue full)", name)))
            },
            Err(TrySendError::Disconnected(_)) => {
                Err(TransportError::Unreachable(format!("loopback://{}", name)))
            },
        }
    }
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("endpoints", &self.endpoints())
            .finish()
    }
}

/// loopback 网络上的传输
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    sequence: AtomicU32,
}

impl LoopbackTransport {
    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

fn loopback_name(address: &PeerAddress) -> Result<&str, TransportError> {
    match address {
        PeerAddress::Loopback(name) => Ok(name),
        other => Err(TransportError::UnsupportedAddress(other.to_string())),
    }
}

impl Transport for LoopbackTransport {
    fn call(
        &self,
        to: &PeerAddress,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let name = loopback_name(to)?;
        let sequence = self.next_sequence();
        let frame = request_frame(request, sequence, true)?;

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.network.deliver(
            name,
            Incoming {
                frame,
                reply: Box::new(move |bytes| {
                    let _ = tx.send(bytes);
                }),
            },
        )?;
        trace!("{} -> {} (seq {})", request.name(), to, sequence);

        let bytes = match rx.recv_timeout(timeout) {
            Ok(bytes) => bytes,
            Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout(to.to_string())),
            // 监听者在回复前停止
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TransportError::Unreachable(to.to_string()));
            },
        };
        let (_, response) = response_frame(&bytes)?;
        Ok(response)
    }

    fn send(&self, to: &PeerAddress, request: &Request) -> Result<(), TransportError> {
        let name = loopback_name(to)?;
        let frame = request_frame(request, self.next_sequence(), false)?;
        self.network.deliver(
            name,
            Incoming {
                frame,
                reply: Box::new(|_| {}),
            },
        )
    }

    fn listen(
        &self,
        at: &PeerAddress,
        handler: Arc<dyn RequestHandler>,
        workers: usize,
    ) -> Result<Listener, TransportError> {
        let name = loopback_name(at)?.to_string();
        let (tx, rx) = crossbeam_channel::bounded(ENDPOINT_QUEUE);

        {
            let mut endpoints = self.network.endpoints.write();
            if endpoints.contains_key(&name) {
                return Err(TransportError::AddressInUse(at.to_string()));
            }
            endpoints.insert(name.clone(), tx.clone());
        }

        let endpoints = self.network.endpoints.clone();
        let on_stop = Box::new(move || {
            let mut endpoints = endpoints.write();
            if endpoints.get(&name).is_some_and(|current| current.same_channel(&tx)) {
                endpoints.remove(&name);
            }
        });

        Listener::spawn(
            at.clone(),
            rx,
            handler,
            workers,
            Arc::new(AtomicBool::new(true)),
            Vec::new(),
            Some(on_stop),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armature_protocol::{ConnectionId, ExecutionResult};
    use std::sync::atomic::AtomicUsize;

    fn echo_handler() -> Arc<dyn RequestHandler> {
        Arc::new(|request: Request| match request {
            Request::Disconnect { id } => Response::Connected { id },
            _ => Response::error(ExecutionResult::BadCommand, "unsupported"),
        })
    }

    #[test]
    fn test_call_round_trip() {
        let network = LoopbackNetwork::new();
        let transport = network.transport();
        let at = PeerAddress::loopback("gcm");
        let _listener = transport.listen(&at, echo_handler(), 2).unwrap();

        let response = transport
            .call(
                &at,
                &Request::Disconnect { id: ConnectionId(4) },
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(response, Response::Connected { id: ConnectionId(4) });
        assert!(
            transport
                .call(&at, &Request::ListProcesses, Duration::from_secs(1))
                .unwrap()
                .is_error()
        );
    }

    #[test]
    fn test_unreachable_and_unsupported() {
        let network = LoopbackNetwork::new();
        let transport = network.transport();
        assert!(matches!(
            transport.call(
                &PeerAddress::loopback("nobody"),
                &Request::ListProcesses,
                Duration::from_millis(50)
            ),
            Err(TransportError::Unreachable(_))
        ));
        assert!(matches!(
            transport.send(&PeerAddress::Udp("127.0.0.1:9".parse().unwrap()), &Request::ListProcesses),
            Err(TransportError::UnsupportedAddress(_))
        ));
    }

    #[test]
    fn test_duplicate_listen_and_unregister_on_drop() {
        let network = LoopbackNetwork::new();
        let transport = network.transport();
        let at = PeerAddress::loopback("p1");

        let listener = transport.listen(&at, echo_handler(), 1).unwrap();
        assert!(matches!(
            transport.listen(&at, echo_handler(), 1),
            Err(TransportError::AddressInUse(_))
        ));
        assert_eq!(network.endpoints(), vec!["p1".to_string()]);

        drop(listener);
        assert!(!network.is_listening("p1"));
        assert!(transport.listen(&at, echo_handler(), 1).is_ok());
    }

    #[test]
    fn test_send_is_one_way() {
        let network = LoopbackNetwork::new();
        let transport = network.transport();
        let at = PeerAddress::loopback("sink");
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let _listener = transport
            .listen(
                &at,
                Arc::new(move |_request: Request| {
                    s.fetch_add(1, Ordering::SeqCst);
                    Response::Ack
                }),
                1,
            )
            .unwrap();

        transport.send(&at, &Request::ListConnections).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while seen.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_networks_are_isolated() {
        let a = LoopbackNetwork::new();
        let b = LoopbackNetwork::new();
        let at = PeerAddress::loopback("shared-name");
        let _la = a.transport().listen(&at, echo_handler(), 1).unwrap();
        let _lb = b.transport().listen(&at, echo_handler(), 1).unwrap();
        assert!(a.is_listening("shared-name") && b.is_listening("shared-name"));
    }
}
