//! 跨进程连接的两端代理
//!
//! - 客户端：按服务端接口描述构造一个提供接口代理，其命令经传输转发，
//!   然后把本地需求接口绑定到代理上
//! - 服务端：构造一个需求接口代理并绑定到真实的提供接口，
//!   远端调用通过代理的函数执行，事件经传输回送给客户端

use crate::transport::Transport;
use armature_core::{
    Command, Forwarder, Function, InterfaceBinding, MulticastCommand, ProvidedInterface,
    RequiredInterface, Requirement, bind_interfaces,
};
use armature_protocol::{
    CommandHandle, ConnectionId, Endpoint, ExecutionResult, InterfaceDescriptor, Outcome,
    PeerAddress, Request, Response, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 到对端进程的一条连接通道
pub(crate) struct RemoteLink {
    transport: Arc<dyn Transport>,
    peer: PeerAddress,
    connection: ConnectionId,
    request_timeout: Duration,
}

impl RemoteLink {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        peer: PeerAddress,
        connection: ConnectionId,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            peer,
            connection,
            request_timeout,
        }
    }

    /// 单向发送事件
    fn emit(&self, handle: CommandHandle, args: &[Value]) {
        let request = Request::Event {
            connection: self.connection,
            handle,
            args: args.to_vec(),
        };
        if let Err(e) = self.transport.send(&self.peer, &request) {
            warn!(
                "Failed to forward event {} on {} to {}: {}",
                handle, self.connection, self.peer, e
            );
        }
    }
}

impl Forwarder for RemoteLink {
    fn forward(&self, handle: CommandHandle, args: &[Value], blocking: Option<Duration>) -> Outcome {
        let wait = blocking.unwrap_or(Duration::ZERO);
        let request = Request::Execute {
            connection: self.connection,
            handle,
            args: args.to_vec(),
            blocking: blocking.is_some(),
            timeout_us: wait.as_micros() as u64,
        };
        trace!("Forwarding {} on {} to {}", handle, self.connection, self.peer);

        match self
            .transport
            .call(&self.peer, &request, self.request_timeout + wait)
        {
            Ok(Response::Outcome(outcome)) => outcome,
            Ok(Response::Error { code, message }) => {
                debug!("Remote execute {} failed: {}", handle, message);
                Outcome::code(code)
            },
            Ok(other) => {
                warn!("Unexpected response to Execute: {:?}", other);
                Outcome::code(ExecutionResult::NotOk)
            },
            Err(e) => {
                warn!("Execute {} on {} failed: {}", handle, self.connection, e);
                Outcome::code(e.code())
            },
        }
    }
}

// ============================================================================
// Client half
// ============================================================================

/// 客户端代理：远程提供接口的本地替身
pub(crate) struct ClientHalf {
    proxy: Arc<ProvidedInterface>,
    binding: InterfaceBinding,
    /// 服务端事件生成器 id -> 代理事件生成器
    events: HashMap<u64, Arc<MulticastCommand>>,
}

impl ClientHalf {
    pub(crate) fn build(
        required: &RequiredInterface,
        server: &Endpoint,
        descriptor: &InterfaceDescriptor,
        link: Arc<RemoteLink>,
    ) -> Result<Self, ExecutionResult> {
        let proxy = Arc::new(ProvidedInterface::new(
            descriptor.name.clone(),
            server.component.clone(),
            None,
        ));
        let forwarder: Arc<dyn Forwarder> = link;

        for op in &descriptor.operations {
            let Some(handle) = op.handle else {
                warn!("Operation '{}' of {} has no handle", op.name, server);
                return Err(ExecutionResult::BadCommand);
            };
            let command = Command::remote(
                op.name.clone(),
                op.kind,
                op.signature.clone(),
                forwarder.clone(),
                handle,
            );
            proxy
                .add_command(command)
                .map_err(|_| ExecutionResult::BadCommand)?;
        }

        let mut events = HashMap::new();
        for ev in &descriptor.events {
            let generator = proxy
                .add_event(ev.name.clone(), ev.signature.clone())
                .map_err(|_| ExecutionResult::BadCommand)?;
            if let Some(handle) = ev.handle {
                events.insert(handle.id, generator);
            }
        }

        let binding = bind_interfaces(required, &proxy)?;
        debug!(
            "Client proxy for {} built: {} function(s), {} handler(s)",
            server,
            binding.bound_functions(),
            binding.bound_handlers()
        );

        Ok(Self {
            proxy,
            binding,
            events,
        })
    }

    /// 服务端事件句柄对应的本地代理生成器
    pub(crate) fn event(&self, handle: CommandHandle) -> Option<Arc<MulticastCommand>> {
        let generator = self.events.get(&handle.id).cloned();
        if generator.is_none() {
            debug!("Unknown event handle {} for proxy '{}'", handle, self.proxy.name());
        }
        generator
    }

    pub(crate) fn release(self) {
        self.binding.release();
    }
}

// ============================================================================
// Server half
// ============================================================================

/// 服务端代理：远程需求接口的本地替身
pub(crate) struct ServerHalf {
    _proxy: RequiredInterface,
    binding: InterfaceBinding,
    /// 服务端命令 id -> 代理函数
    functions: HashMap<u64, Arc<Function>>,
}

impl ServerHalf {
    pub(crate) fn build(
        provided: &ProvidedInterface,
        client: &Endpoint,
        link: Arc<RemoteLink>,
    ) -> Result<Self, ExecutionResult> {
        let proxy = RequiredInterface::new(
            client.interface.clone(),
            client.component.clone(),
            None,
            link.request_timeout,
        );

        let mut by_name = Vec::new();
        for command in provided.commands() {
            let function = Function::new(command.name(), command.kind(), Requirement::Optional)
                .with_signature(command.signature().clone());
            let function = proxy
                .insert_function(function)
                .map_err(|_| ExecutionResult::BadCommand)?;
            by_name.push((command.id(), function));
        }

        for event in provided.events() {
            let handle = event.handle();
            let link = link.clone();
            proxy
                .add_event_handler(event.name(), event.signature().clone(), move |args| {
                    link.emit(handle, args);
                    Ok(())
                })
                .map_err(|_| ExecutionResult::BadCommand)?;
        }

        let binding = bind_interfaces(&proxy, provided)?;
        let functions = by_name
            .into_iter()
            .filter(|(_, function)| function.is_valid())
            .collect();

        debug!(
            "Server proxy for {}/{} built: {} function(s), {} handler(s)",
            client.component,
            client.interface,
            binding.bound_functions(),
            binding.bound_handlers()
        );

        Ok(Self {
            _proxy: proxy,
            binding,
            functions,
        })
    }

    /// 远程句柄对应的代理函数
    pub(crate) fn resolve(&self, handle: CommandHandle) -> Result<Arc<Function>, ExecutionResult> {
        let Some(function) = self.functions.get(&handle.id) else {
            debug!("Unknown command handle {}", handle);
            return Err(ExecutionResult::BadCommand);
        };
        if function.kind() != handle.kind {
            debug!("Handle {} does not match kind of '{}'", handle, function.name());
            return Err(ExecutionResult::BadCommand);
        }
        Ok(function.clone())
    }

    pub(crate) fn release(self) {
        self.binding.release();
    }
}

/// 在真实命令上重放一次远程调用
pub(crate) fn replay(function: &Function, args: &[Value], blocking: bool, timeout: Duration) -> Outcome {
    if blocking {
        function.execute_blocking_timeout(args, timeout)
    } else {
        function.execute(args)
    }
}
