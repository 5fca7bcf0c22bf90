//! Network connections: bus processes bridging the local bus to one peer.
//!
//! The connection's worker owns the transport. It performs the hello
//! handshake, then multiplexes reading frames with writing whatever the
//! request and response queues hold. Inbound requests become commands on the
//! local bus and their completion travels back as a response; inbound
//! responses complete the local request they reference.
//!
//! Locking: `outbound` guards the pending table together with its `closed`
//! flag, so a request registered concurrently with teardown is either drained
//! by teardown or rejected. No lock is held across an await.

use bytes::BytesMut;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::codec::timed_write;
use super::frame::{session_of, Frame, Hello, WireError, WireEvent, WireRequest};
use super::protocol::NetworkProtocol;
use super::queue::FrameQueue;
use crate::address::BusPath;
use crate::message::{
    Command, Event, Letter, Outcome, Request, Resolver, Response, ResponseCode, Session, Voucher,
};
use crate::node::{AppContext, BusProcess, Node, ProcessContext, WeakNode};
use crate::types::{Error, InformationId, NetworkConfig, Result, SessionId};

const READ_BUFFER: usize = 8 * 1024;

/// Byte streams a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

struct Pending {
    request: Request,
    resolver: Resolver,
}

#[derive(Default)]
struct Outbound {
    pending: HashMap<InformationId, Pending>,
    closed: bool,
}

/// Taken by the worker when it starts.
struct Io {
    stream: Box<dyn Transport>,
    requests: mpsc::Receiver<Vec<u8>>,
    responses: mpsc::Receiver<Vec<u8>>,
}

struct Shared {
    app: AppContext,
    protocol: Arc<dyn NetworkProtocol>,
    config: NetworkConfig,
    label: String,
    runtime: Handle,
    requests: FrameQueue,
    responses: FrameQueue,
    io: Mutex<Option<Io>>,
    outbound: Mutex<Outbound>,
    inbound: Mutex<HashMap<InformationId, Request>>,
    stale: Mutex<Option<Error>>,
    halt: CancellationToken,
    remote: Mutex<Option<Hello>>,
    node: OnceLock<WeakNode>,
}

/// A bus process speaking the wire protocol with one peer.
#[derive(Clone)]
pub struct NetworkConnection {
    process: BusProcess,
    shared: Arc<Shared>,
}

impl NetworkConnection {
    /// Wrap `stream`. The connection starts talking once its process is
    /// started, i.e. once it joins a hub.
    pub fn new<T: Transport>(
        app: &AppContext,
        stream: T,
        protocol: Arc<dyn NetworkProtocol>,
        label: impl Into<String>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::internal(format!("connection outside a runtime: {}", e)))?;
        let config = app.config().network.clone();
        let (requests, request_rx) = FrameQueue::bounded(
            "request",
            config.request_queue_capacity,
            config.max_queue_wait,
        );
        let (responses, response_rx) = FrameQueue::bounded(
            "response",
            config.response_queue_capacity,
            config.max_queue_wait,
        );
        let shared = Arc::new(Shared {
            app: app.clone(),
            protocol,
            config,
            label: label.into(),
            runtime,
            requests,
            responses,
            io: Mutex::new(Some(Io {
                stream: Box::new(stream),
                requests: request_rx,
                responses: response_rx,
            })),
            outbound: Mutex::new(Outbound::default()),
            inbound: Mutex::new(HashMap::new()),
            stale: Mutex::new(None),
            halt: CancellationToken::new(),
            remote: Mutex::new(None),
            node: OnceLock::new(),
        });

        let worker_shared = shared.clone();
        let process = BusProcess::new(app, move |ctx| {
            let shared = worker_shared.clone();
            async move { shared.run(ctx).await }
        });
        let _ = shared.node.set(process.node().downgrade());
        Ok(Self { process, shared })
    }

    /// Open a TCP connection to `addr`.
    pub async fn connect<A: ToSocketAddrs + fmt::Display>(
        app: &AppContext,
        addr: A,
        protocol: Arc<dyn NetworkProtocol>,
    ) -> Result<Self> {
        let label = addr.to_string();
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::new(app, stream, protocol, label)
    }

    pub fn process(&self) -> &BusProcess {
        &self.process
    }

    pub fn node(&self) -> &Node {
        self.process.node()
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn scheme(&self) -> &str {
        self.shared.protocol.scheme()
    }

    /// The peer's hello, once the handshake completed.
    pub fn remote(&self) -> Option<Hello> {
        self.shared.remote.lock().clone()
    }

    /// Why the connection went stale, if it did.
    pub fn stale_cause(&self) -> Option<Error> {
        self.shared.stale.lock().clone()
    }

    pub fn is_stale(&self) -> bool {
        self.shared.stale.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Outbound requests awaiting a response.
    pub fn outbound_pending(&self) -> usize {
        self.shared.outbound.lock().pending.len()
    }

    /// Inbound requests whose local completion is outstanding.
    pub fn inbound_pending(&self) -> usize {
        self.shared.inbound.lock().len()
    }

    /// Send a request for `name` to the node at `path` on the peer. The
    /// voucher carries the decoded response body.
    pub async fn request(
        &self,
        path: &BusPath,
        name: impl Into<String>,
        args: Value,
        session: &Session,
    ) -> Voucher<Value> {
        let voucher: Voucher<Value> = Voucher::new();
        if let Err(err) = self.send_request(&voucher, path, name.into(), args, session).await {
            voucher.request().try_complete(Outcome::Failed(err));
        }
        voucher
    }

    async fn send_request(
        &self,
        voucher: &Voucher<Value>,
        path: &BusPath,
        name: String,
        args: Value,
        session: &Session,
    ) -> Result<()> {
        let shared = &self.shared;
        let id = voucher.request().id().clone();
        let frame = Frame::Request(WireRequest {
            id: id.clone(),
            path: path.clone(),
            name,
            properties: session.to_properties(),
            body: Some(shared.protocol.encode(&args)?),
        });
        let bytes = shared.protocol.serialize(&frame)?;
        {
            let mut outbound = shared.outbound.lock();
            if outbound.closed {
                return Err(shared.closed_cause());
            }
            outbound.pending.insert(
                id.clone(),
                Pending {
                    request: voucher.request().clone(),
                    resolver: voucher.resolver(),
                },
            );
        }
        tracing::debug!(connection = %shared.label, %id, %path, "request queued");
        if let Err(err) = shared.requests.push(bytes).await {
            shared.outbound.lock().pending.remove(&id);
            shared.mark_stale(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Send an event for the node at `path` on the peer.
    pub async fn publish(
        &self,
        path: &BusPath,
        name: impl Into<String>,
        data: Value,
        session: &Session,
    ) -> Result<()> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(shared.closed_cause());
        }
        let frame = Frame::Event(WireEvent {
            path: path.clone(),
            name: name.into(),
            properties: session.to_properties(),
            body: Some(shared.protocol.encode(&data)?),
        });
        let bytes = shared.protocol.serialize(&frame)?;
        if let Err(err) = shared.requests.push(bytes).await {
            shared.mark_stale(err.clone());
            return Err(err);
        }
        Ok(())
    }
}

impl fmt::Debug for NetworkConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConnection")
            .field("label", &self.shared.label)
            .field("scheme", &self.shared.protocol.scheme())
            .field("state", &self.process.state())
            .field("stale", &self.is_stale())
            .finish()
    }
}

// =============================================================================
// Worker
// =============================================================================

impl Shared {
    fn node(&self) -> Option<Node> {
        self.node.get().and_then(WeakNode::upgrade)
    }

    fn local_uri(&self) -> String {
        self.node()
            .map(|node| node.path().to_uri())
            .unwrap_or_default()
    }

    fn is_closed(&self) -> bool {
        self.outbound.lock().closed
    }

    fn closed_cause(&self) -> Error {
        self.stale
            .lock()
            .clone()
            .unwrap_or_else(|| Error::cancelled(format!("connection {} closed", self.label)))
    }

    fn mark_stale(&self, cause: Error) {
        {
            let mut stale = self.stale.lock();
            if stale.is_none() {
                tracing::warn!(connection = %self.label, "connection stale: {}", cause);
                *stale = Some(cause);
            }
        }
        self.halt.cancel();
    }

    async fn run(self: Arc<Self>, ctx: ProcessContext) -> Result<()> {
        let Io {
            stream,
            mut requests,
            mut responses,
        } = self
            .io
            .lock()
            .take()
            .ok_or_else(|| Error::state_violation(format!("connection {} already ran", self.label)))?;
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buf = BytesMut::with_capacity(READ_BUFFER);

        let result = self
            .pump(&ctx, &mut reader, &mut writer, &mut buf, &mut requests, &mut responses)
            .await;
        self.teardown(&result);

        if !ctx.is_interrupted() {
            if let Some(node) = self.node() {
                let label = self.label.clone();
                node.shutdown().on_completion(move |outcome| {
                    if let Outcome::Failed(err) = outcome {
                        tracing::warn!(connection = %label, "shutdown after close failed: {}", err);
                    }
                });
            }
        }
        result
    }

    async fn pump<R, W>(
        self: &Arc<Self>,
        ctx: &ProcessContext,
        reader: &mut R,
        writer: &mut W,
        buf: &mut BytesMut,
        requests: &mut mpsc::Receiver<Vec<u8>>,
        responses: &mut mpsc::Receiver<Vec<u8>>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let write_timeout = self.config.write_timeout;
        self.handshake(reader, writer, buf).await?;
        self.drain(buf, writer).await?;

        loop {
            tokio::select! {
                _ = ctx.interrupted() => {
                    tracing::debug!(connection = %self.label, "interrupted");
                    return Ok(());
                }
                _ = self.halt.cancelled() => {
                    return Err(self.closed_cause());
                }
                Some(frame) = responses.recv() => {
                    timed_write(writer, &frame, write_timeout).await?;
                }
                Some(frame) = requests.recv() => {
                    timed_write(writer, &frame, write_timeout).await?;
                }
                read = reader.read_buf(buf) => {
                    if read? == 0 {
                        tracing::info!(connection = %self.label, "peer closed the connection");
                        return Ok(());
                    }
                    self.drain(buf, writer).await?;
                }
            }
        }
    }

    async fn handshake<R, W>(&self, reader: &mut R, writer: &mut W, buf: &mut BytesMut) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let hello = Frame::Hello(Hello {
            scheme: self.protocol.scheme().to_string(),
            peer: self.local_uri(),
        });
        timed_write(writer, &self.protocol.serialize(&hello)?, self.config.write_timeout).await?;

        let deadline = self.config.handshake_timeout;
        let first = match tokio::time::timeout(deadline, self.next_frame(reader, buf)).await {
            Ok(frame) => frame?,
            Err(_) => {
                return Err(Error::timeout(format!(
                    "connection {}: no hello within {:?}",
                    self.label, deadline
                )))
            }
        };
        match first {
            Some(Frame::Hello(hello)) if hello.scheme == self.protocol.scheme() => {
                tracing::info!(connection = %self.label, peer = %hello.peer, "handshake complete");
                *self.remote.lock() = Some(hello);
                Ok(())
            }
            Some(Frame::Hello(hello)) => Err(Error::protocol(format!(
                "peer speaks {}, expected {}",
                hello.scheme,
                self.protocol.scheme()
            ))),
            Some(other) => Err(Error::protocol(format!(
                "expected hello, got {}",
                other.kind()
            ))),
            None => Err(Error::protocol("peer closed during handshake")),
        }
    }

    async fn next_frame<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        buf: &mut BytesMut,
    ) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.protocol.read(buf)? {
                return Ok(Some(frame));
            }
            if reader.read_buf(buf).await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Dispatch every complete frame in `buf`. Undecodable frames are
    /// reported to the peer and skipped.
    async fn drain<W: AsyncWrite + Unpin>(self: &Arc<Self>, buf: &mut BytesMut, writer: &mut W) -> Result<()> {
        loop {
            match self.protocol.read(buf) {
                Ok(Some(frame)) => self.dispatch(frame),
                Ok(None) => return Ok(()),
                Err(Error::Serialization(reason)) => {
                    tracing::warn!(connection = %self.label, "dropping undecodable frame: {}", reason);
                    let report = Frame::Error(WireError::from(&Error::Serialization(reason)));
                    timed_write(writer, &self.protocol.serialize(&report)?, self.config.write_timeout)
                        .await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) {
        match frame {
            Frame::Request(request) => self.on_request(request),
            Frame::Response(response) => self.on_response(response),
            Frame::Event(event) => self.on_event(event),
            Frame::Hello(hello) => {
                tracing::warn!(connection = %self.label, peer = %hello.peer, "duplicate hello ignored")
            }
            Frame::Error(error) => tracing::warn!(
                connection = %self.label,
                code = %error.code,
                "peer reported: {}",
                error.message
            ),
        }
    }

    fn decode_body(&self, body: Option<&[u8]>) -> Result<Option<Value>> {
        body.map(|bytes| self.protocol.decode(bytes)).transpose()
    }

    fn on_request(self: &Arc<Self>, request: WireRequest) {
        let WireRequest {
            id: reference,
            path,
            name,
            properties,
            body,
        } = request;
        let session = session_of(&properties);
        let session_id = session.id().clone();
        tracing::debug!(connection = %self.label, %reference, %path, %name, "inbound request");

        let args = match self.decode_body(body.as_deref()) {
            Ok(args) => args.unwrap_or(Value::Null),
            Err(err) => return self.respond(session_id, reference, &Outcome::Failed(err), None),
        };
        let Some(target) = self.app.resolve(&path) else {
            let err = Error::not_found(format!("no node at {}", path));
            return self.respond(session_id, reference, &Outcome::Failed(err), None);
        };
        let Some(node) = self.node() else {
            let err = Error::internal("connection node dropped");
            return self.respond(session_id, reference, &Outcome::Failed(err), None);
        };

        let command = Command::new(session, name, args);
        let voucher = command.voucher.clone();
        self.inbound
            .lock()
            .insert(reference.clone(), voucher.request().clone());

        let shared = self.clone();
        let completed = voucher.clone();
        voucher.request().on_completion(move |outcome| {
            shared.inbound.lock().remove(&reference);
            let encoded = match outcome {
                Outcome::Successful => completed
                    .value()
                    .and_then(|value| shared.protocol.encode(&value))
                    .map(Some),
                _ => Ok(None),
            };
            match encoded {
                Ok(body) => shared.respond(session_id, reference, outcome, body),
                Err(err) => shared.respond(session_id, reference, &Outcome::Failed(err), None),
            }
        });
        if let Err(err) = node.send(&[target], Letter::Command(command)) {
            voucher.request().try_complete(Outcome::Failed(err));
        }
    }

    /// Queue a response frame; a push that cannot complete in time marks the
    /// connection stale.
    fn respond(
        self: &Arc<Self>,
        session: SessionId,
        reference: InformationId,
        outcome: &Outcome,
        body: Option<Vec<u8>>,
    ) {
        if self.is_closed() {
            tracing::debug!(connection = %self.label, %reference, "closed, response dropped");
            return;
        }
        let frame = Frame::Response(Response::from_outcome(session, reference, outcome, body));
        let bytes = match self.protocol.serialize(&frame) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(connection = %self.label, "response encoding failed: {}", err);
                return;
            }
        };
        let shared = self.clone();
        self.runtime.spawn(async move {
            if let Err(err) = shared.responses.push(bytes).await {
                shared.mark_stale(err);
            }
        });
    }

    fn on_response(&self, response: Response) {
        let pending = self.outbound.lock().pending.remove(&response.reference);
        let Some(Pending { request, resolver }) = pending else {
            tracing::warn!(
                connection = %self.label,
                reference = %response.reference,
                "response for unknown request"
            );
            return;
        };
        tracing::debug!(connection = %self.label, reference = %response.reference, code = ?response.code, "response");
        match response.code {
            ResponseCode::Ok => match self.decode_body(response.body.as_deref()) {
                Ok(body) => {
                    if let Err(err) = resolver(body) {
                        tracing::debug!(connection = %self.label, "response body rejected: {}", err);
                    }
                }
                Err(err) => {
                    request.try_complete(Outcome::Failed(err));
                }
            },
            ResponseCode::Ko | ResponseCode::Cn => {
                request.try_complete(response.outcome());
            }
        }
    }

    fn on_event(&self, event: WireEvent) {
        let Some(target) = self.app.resolve(&event.path) else {
            tracing::debug!(connection = %self.label, path = %event.path, "event for unknown path dropped");
            return;
        };
        let data = match self.decode_body(event.body.as_deref()) {
            Ok(data) => data.unwrap_or(Value::Null),
            Err(err) => {
                tracing::warn!(connection = %self.label, "event body undecodable: {}", err);
                return;
            }
        };
        let Some(node) = self.node() else {
            return;
        };
        let letter = Letter::Event(Event::new(session_of(&event.properties), event.name, data));
        if let Err(err) = node.send(&[target], letter) {
            tracing::warn!(connection = %self.label, "event injection failed: {}", err);
        }
    }

    /// Fail or cancel whatever is still pending and refuse new work.
    fn teardown(&self, result: &Result<()>) {
        self.halt.cancel();
        let cause = self
            .stale
            .lock()
            .clone()
            .or_else(|| result.as_ref().err().cloned());
        let outbound: Vec<Pending> = {
            let mut outbound = self.outbound.lock();
            outbound.closed = true;
            outbound.pending.drain().map(|(_, pending)| pending).collect()
        };
        let inbound: Vec<Request> = self
            .inbound
            .lock()
            .drain()
            .map(|(_, request)| request)
            .collect();

        for pending in &outbound {
            let outcome = match &cause {
                Some(cause) => Outcome::Failed(cause.clone()),
                None => Outcome::Cancelled,
            };
            pending.request.try_complete(outcome);
        }
        for request in &inbound {
            request.try_complete(Outcome::Cancelled);
        }
        match &cause {
            Some(cause) => tracing::warn!(
                connection = %self.label,
                outbound = outbound.len(),
                inbound = inbound.len(),
                "connection closed: {}",
                cause
            ),
            None => tracing::info!(
                connection = %self.label,
                outbound = outbound.len(),
                inbound = inbound.len(),
                "connection closed"
            ),
        }
    }
}
