//! The engine task.
//!
//! One task owns all exchange state. Commands from [`TransportEngine`]
//! handles, replies from spawned service handlers and the earliest pending
//! deadline are multiplexed in a single `select!` loop, so no state is ever
//! shared between threads. The loop never waits on the network: outgoing
//! frames are queued per peer and written by a separate task for each peer.
//!
//! [`TransportEngine`]: super::TransportEngine

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use super::config::{EngineConfig, PeerConfig};
use super::correlator::{Completer, RequestError, RequestId, RequestResult};
use super::handler::{ServiceContext, ServiceHandler};
use super::invoke::InvokeIdAllocator;
use super::{NetworkLink, PeerAddress};
use crate::app::{
    split_segments, AbortPdu, Apdu, ApplicationError, ComplexAck, ConfirmedRequest, ErrorPdu,
    RejectPdu, SegmentAck, SegmentReassembly, SegmentVerdict, SegmentWindow, SimpleAck,
    UnconfirmedRequest, WindowAdvance, COMPLEX_ACK_HEADER, CONFIRMED_REQUEST_HEADER, MAX_SEGMENTS,
    SEGMENTED_COMPLEX_ACK_HEADER, SEGMENTED_REQUEST_HEADER,
};
use crate::service::{
    self, AbortReason, ConfirmedServiceAck, ConfirmedServiceChoice, RejectReason, ServiceError,
    ServiceRegistry,
};
use crate::util::hex_preview;

/// A peer and one of its invoke IDs. Identifies an exchange in either
/// direction.
type ExchangeKey = (PeerAddress, u8);

pub(crate) enum Command {
    Send {
        id: RequestId,
        peer: PeerAddress,
        service_choice: ConfirmedServiceChoice,
        service_data: Bytes,
        completer: Completer,
    },
    Cancel(RequestId),
    Receive {
        peer: PeerAddress,
        apdu: Bytes,
    },
    SetPeerConfig {
        peer: PeerAddress,
        config: PeerConfig,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Outcome of a spawned confirmed service handler.
pub(crate) struct HandlerReply {
    key: ExchangeKey,
    /// Tells a reply to a superseded request apart from the current one.
    exchange: u64,
    outcome: service::Result<Option<ConfirmedServiceAck>>,
}

/// Per-peer send queues.
///
/// Each peer has its own writer task, so a link that stalls on one peer
/// only holds up that peer's frames. Frames to one peer keep their order.
struct Outbox {
    link: Arc<dyn NetworkLink>,
    queues: HashMap<PeerAddress, mpsc::UnboundedSender<Bytes>>,
}

impl Outbox {
    fn new(link: Arc<dyn NetworkLink>) -> Self {
        Self {
            link,
            queues: HashMap::new(),
        }
    }

    fn send(&mut self, peer: &PeerAddress, frame: Bytes) {
        log::trace!("-> {peer} [{}]", hex_preview(&frame));
        let link = &self.link;
        let queue = self
            .queues
            .entry(peer.clone())
            .or_insert_with(|| write_loop(Arc::clone(link), peer.clone()));
        if let Err(mpsc::error::SendError(frame)) = queue.send(frame) {
            // the writer went away; start over with a fresh one
            let queue = write_loop(Arc::clone(&self.link), peer.clone());
            let _ = queue.send(frame);
            self.queues.insert(peer.clone(), queue);
        }
    }

    fn send_all(&mut self, peer: &PeerAddress, frames: Vec<Bytes>) {
        for frame in frames {
            self.send(peer, frame);
        }
    }

    /// Writers finish once their queued frames are written.
    fn close(&mut self) {
        self.queues.clear();
    }
}

fn write_loop(link: Arc<dyn NetworkLink>, peer: PeerAddress) -> mpsc::UnboundedSender<Bytes> {
    let (queue, mut frames) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(error) = link.send(&peer, frame).await {
                log::warn!("failed to send APDU to {peer}: {error}");
            }
        }
        log::trace!("writer for {peer} stopped");
    });
    queue
}

enum Outbound {
    Frame(Bytes),
    Segments(SegmentWindow),
}

enum ClientPhase {
    AwaitingAck,
    AwaitingSegmentAck,
    ReceivingAck(SegmentReassembly),
}

struct PendingRequest {
    id: RequestId,
    /// Request header; the service data lives in `outbound`.
    template: ConfirmedRequest,
    peer_config: PeerConfig,
    outbound: Outbound,
    phase: ClientPhase,
    retries_left: u8,
    deadline: Instant,
    completer: Completer,
}

impl PendingRequest {
    /// Frames of the current transmission.
    fn frames(&self) -> Vec<Bytes> {
        match &self.outbound {
            Outbound::Frame(frame) => vec![frame.clone()],
            Outbound::Segments(window) => request_window(&self.template, window),
        }
    }
}

/// A segmented confirmed request being received.
struct InboundSegments {
    template: ConfirmedRequest,
    reassembly: SegmentReassembly,
    deadline: Instant,
}

enum ResponseState {
    /// The handler has not answered yet.
    Processing,
    Sent(Bytes),
    Segmented {
        ack: ComplexAck,
        window: SegmentWindow,
        finished: bool,
    },
}

/// A request served by the local device, kept to answer duplicates.
struct CachedResponse {
    exchange: u64,
    request: ConfirmedRequest,
    state: ResponseState,
    retries_left: u8,
    /// `None` while the handler is still working.
    deadline: Option<Instant>,
}

enum SegmentOutcome {
    Continue,
    Overflow,
    Complete(Bytes),
}

fn request_window(template: &ConfirmedRequest, window: &SegmentWindow) -> Vec<Bytes> {
    window
        .current()
        .filter_map(|index| window.segment(index))
        .map(|(segment, service_data)| {
            Apdu::ConfirmedRequest(ConfirmedRequest {
                segment: Some(segment),
                service_data,
                ..template.clone()
            })
            .to_bytes()
        })
        .collect()
}

fn ack_window(template: &ComplexAck, window: &SegmentWindow) -> Vec<Bytes> {
    window
        .current()
        .filter_map(|index| window.segment(index))
        .map(|(segment, service_data)| {
            Apdu::ComplexAck(ComplexAck {
                segment: Some(segment),
                service_data,
                ..template.clone()
            })
            .to_bytes()
        })
        .collect()
}

fn abort_frame(server: bool, invoke_id: u8, reason: AbortReason) -> Bytes {
    Apdu::Abort(AbortPdu {
        server,
        invoke_id,
        reason,
    })
    .to_bytes()
}

fn segment_ack_frame(
    key: &ExchangeKey,
    server: bool,
    sequence_number: u8,
    negative: bool,
    window: u8,
) -> Bytes {
    Apdu::SegmentAck(SegmentAck {
        negative,
        server,
        invoke_id: key.1,
        sequence_number,
        actual_window_size: window,
    })
    .to_bytes()
}

pub(crate) struct Engine {
    config: EngineConfig,
    registry: Arc<ServiceRegistry>,
    outbox: Outbox,
    handler: Arc<dyn ServiceHandler>,
    replies: mpsc::UnboundedSender<HandlerReply>,
    peers: HashMap<PeerAddress, PeerConfig>,
    invoke_ids: HashMap<PeerAddress, InvokeIdAllocator>,
    pending: HashMap<ExchangeKey, PendingRequest>,
    by_request: HashMap<RequestId, ExchangeKey>,
    inbound: HashMap<ExchangeKey, InboundSegments>,
    responses: HashMap<ExchangeKey, CachedResponse>,
    next_exchange: u64,
}

impl Engine {
    pub(crate) fn new(
        config: EngineConfig,
        registry: Arc<ServiceRegistry>,
        link: Arc<dyn NetworkLink>,
        handler: Arc<dyn ServiceHandler>,
        replies: mpsc::UnboundedSender<HandlerReply>,
    ) -> Self {
        Self {
            config,
            registry,
            outbox: Outbox::new(link),
            handler,
            replies,
            peers: HashMap::new(),
            invoke_ids: HashMap::new(),
            pending: HashMap::new(),
            by_request: HashMap::new(),
            inbound: HashMap::new(),
            responses: HashMap::new(),
            next_exchange: 0,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut replies: mpsc::UnboundedReceiver<HandlerReply>,
    ) {
        log::debug!("transport engine started");
        loop {
            let deadline = self.next_deadline();
            let timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.stop();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.stop();
                        break;
                    }
                },
                Some(reply) = replies.recv() => self.on_handler_reply(reply),
                () = timer => self.on_timer(),
            }
        }
        log::debug!("transport engine stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send {
                id,
                peer,
                service_choice,
                service_data,
                completer,
            } => self.start_request(id, peer, service_choice, service_data, completer),
            Command::Cancel(id) => self.cancel(id),
            Command::Receive { peer, apdu } => self.on_frame(peer, apdu),
            Command::SetPeerConfig { peer, config } => {
                log::debug!("peer {peer} configured: {config:?}");
                self.peers.insert(peer, config);
            }
            Command::Shutdown(_) => {}
        }
    }

    /// Drop all state. Outstanding requests resolve as cancelled.
    fn stop(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.completer.complete(Err(RequestError::Cancelled));
        }
        self.by_request.clear();
        self.inbound.clear();
        self.responses.clear();
        self.outbox.close();
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|pending| pending.deadline)
            .chain(self.inbound.values().map(|inbound| inbound.deadline))
            .chain(self.responses.values().filter_map(|cached| cached.deadline))
            .min()
    }

    fn peer_config(&self, peer: &PeerAddress) -> PeerConfig {
        self.peers
            .get(peer)
            .copied()
            .unwrap_or(self.config.default_peer)
    }

    fn local_max_apdu(&self, remote_max: usize) -> usize {
        remote_max.min(self.config.max_apdu_length_accepted.size())
    }

    // Client side

    fn start_request(
        &mut self,
        id: RequestId,
        peer: PeerAddress,
        service_choice: ConfirmedServiceChoice,
        data: Bytes,
        completer: Completer,
    ) {
        let peer_config = self.peer_config(&peer);
        let pending = &self.pending;
        let allocator = self.invoke_ids.entry(peer.clone()).or_default();
        let Some(invoke_id) =
            allocator.allocate(|invoke_id| pending.contains_key(&(peer.clone(), invoke_id)))
        else {
            log::warn!("no free invoke ID for {peer}, failing request {id}");
            completer.complete(Err(RequestError::Abort {
                reason: AbortReason::OutOfResources,
                from_server: false,
            }));
            return;
        };

        let template = ConfirmedRequest {
            segment: None,
            segmented_response_accepted: self.config.segmentation_supported.can_receive(),
            max_segments: self.config.max_segments_accepted,
            max_apdu: self.config.max_apdu_length_accepted,
            invoke_id,
            service_choice,
            service_data: Bytes::new(),
        };
        let max_apdu = self.local_max_apdu(peer_config.max_apdu_length_accepted.size());

        let (outbound, phase, timeout) = if data.len() + CONFIRMED_REQUEST_HEADER <= max_apdu {
            let frame = Apdu::ConfirmedRequest(ConfirmedRequest {
                service_data: data,
                ..template.clone()
            })
            .to_bytes();
            (
                Outbound::Frame(frame),
                ClientPhase::AwaitingAck,
                peer_config.apdu_timeout,
            )
        } else {
            match self.segment_request(&peer_config, &data, max_apdu) {
                Ok(window) => (
                    Outbound::Segments(window),
                    ClientPhase::AwaitingSegmentAck,
                    self.config.segment_timeout,
                ),
                Err(reason) => {
                    log::debug!("cannot send {service_choice} to {peer}: {reason}");
                    completer.complete(Err(RequestError::Abort {
                        reason,
                        from_server: false,
                    }));
                    return;
                }
            }
        };

        let pending = PendingRequest {
            id,
            template,
            peer_config,
            outbound,
            phase,
            retries_left: peer_config.number_of_apdu_retries,
            deadline: Instant::now() + timeout,
            completer,
        };
        let frames = pending.frames();
        log::debug!("request {id}: {service_choice} to {peer} with invoke ID {invoke_id}");

        let key = (peer.clone(), invoke_id);
        self.by_request.insert(id, key.clone());
        self.pending.insert(key, pending);
        self.outbox.send_all(&peer, frames);
    }

    fn segment_request(
        &self,
        peer_config: &PeerConfig,
        data: &Bytes,
        max_apdu: usize,
    ) -> Result<SegmentWindow, AbortReason> {
        if !self.config.segmentation_supported.can_transmit()
            || !peer_config.segmentation_supported.can_receive()
        {
            return Err(AbortReason::SegmentationNotSupported);
        }
        let segments = split_segments(data, max_apdu.saturating_sub(SEGMENTED_REQUEST_HEADER));
        if segments.len() > peer_config.max_segments_accepted.limit().min(MAX_SEGMENTS) {
            return Err(AbortReason::ApduTooLong);
        }
        Ok(SegmentWindow::new(segments, peer_config.window_size))
    }

    fn cancel(&mut self, id: RequestId) {
        let Some(key) = self.by_request.remove(&id) else {
            return;
        };
        let Some(pending) = self.pending.remove(&key) else {
            return;
        };
        let partial = matches!(
            pending.phase,
            ClientPhase::AwaitingSegmentAck | ClientPhase::ReceivingAck(_)
        );
        pending.completer.complete(Err(RequestError::Cancelled));
        log::debug!("request {id} to {} cancelled", key.0);
        if partial {
            self.outbox
                .send(&key.0, abort_frame(false, key.1, AbortReason::Other));
        }
    }

    fn finish(&mut self, key: &ExchangeKey, outcome: RequestResult) {
        let Some(pending) = self.pending.remove(key) else {
            log::debug!("dropping response from {} for unknown invoke ID {}", key.0, key.1);
            return;
        };
        self.by_request.remove(&pending.id);
        match &outcome {
            Ok(_) => log::debug!("request {} to {} completed", pending.id, key.0),
            Err(error) => log::debug!("request {} to {} failed: {error}", pending.id, key.0),
        }
        pending.completer.complete(outcome);
    }

    /// Abort our own request and tell the peer.
    fn abort_request(&mut self, key: &ExchangeKey, reason: AbortReason) {
        self.outbox.send(&key.0, abort_frame(false, key.1, reason));
        self.finish(
            key,
            Err(RequestError::Abort {
                reason,
                from_server: false,
            }),
        );
    }

    fn on_frame(&mut self, peer: PeerAddress, frame: Bytes) {
        log::trace!("<- {peer} [{}]", hex_preview(&frame));
        let apdu = match Apdu::parse(&frame, &self.registry) {
            Ok(apdu) => apdu,
            Err(ApplicationError::Rejected { invoke_id, reason }) => {
                log::debug!("rejecting invoke ID {invoke_id} from {peer}: {reason}");
                let reject = Apdu::Reject(RejectPdu { invoke_id, reason });
                self.outbox.send(&peer, reject.to_bytes());
                return;
            }
            Err(error) => {
                log::debug!("dropping APDU from {peer}: {error} [{}]", hex_preview(&frame));
                return;
            }
        };

        match apdu {
            Apdu::ConfirmedRequest(request) => self.on_confirmed_request(peer, request),
            Apdu::UnconfirmedRequest(request) => self.on_unconfirmed_request(peer, request),
            Apdu::SimpleAck(ack) => self.on_simple_ack(peer, ack),
            Apdu::ComplexAck(ack) => self.on_complex_ack(peer, ack),
            Apdu::SegmentAck(ack) if ack.server => self.on_request_segment_ack(peer, ack),
            Apdu::SegmentAck(ack) => self.on_response_segment_ack(peer, ack),
            Apdu::Error(error) => self.finish(
                &(peer, error.invoke_id),
                Err(RequestError::Error {
                    class: error.error_class,
                    code: error.error_code,
                }),
            ),
            Apdu::Reject(reject) => self.finish(
                &(peer, reject.invoke_id),
                Err(RequestError::Reject(reject.reason)),
            ),
            Apdu::Abort(abort) if abort.server => self.finish(
                &(peer, abort.invoke_id),
                Err(RequestError::Abort {
                    reason: abort.reason,
                    from_server: true,
                }),
            ),
            Apdu::Abort(abort) => {
                let key = (peer, abort.invoke_id);
                let known =
                    self.inbound.remove(&key).is_some() | self.responses.remove(&key).is_some();
                if known {
                    log::debug!("{} aborted invoke ID {}: {}", key.0, key.1, abort.reason);
                }
            }
        }
    }

    fn on_simple_ack(&mut self, peer: PeerAddress, ack: SimpleAck) {
        let key = (peer, ack.invoke_id);
        let matches = self
            .pending
            .get(&key)
            .map(|pending| pending.template.service_choice == ack.service_choice);
        match matches {
            Some(false) => log::warn!(
                "SimpleACK from {} for invoke ID {} names the wrong service {}",
                key.0,
                key.1,
                ack.service_choice
            ),
            _ => self.finish(&key, Ok(None)),
        }
    }

    fn on_complex_ack(&mut self, peer: PeerAddress, ack: ComplexAck) {
        let key = (peer, ack.invoke_id);
        let can_receive = self.config.segmentation_supported.can_receive();
        let local_window = self.config.window_size;
        let segment_timeout = self.config.segment_timeout;

        let Some(pending) = self.pending.get_mut(&key) else {
            log::debug!("dropping ComplexACK from {} for unknown invoke ID {}", key.0, key.1);
            return;
        };
        if pending.template.service_choice != ack.service_choice {
            log::warn!(
                "ComplexACK from {} for invoke ID {} names the wrong service {}",
                key.0,
                key.1,
                ack.service_choice
            );
            return;
        }

        let Some(segment) = ack.segment else {
            match self.registry.decode_ack(ack.service_choice, &ack.service_data) {
                Ok(decoded) => self.finish(&key, Ok(Some(decoded))),
                Err(error) => log::warn!(
                    "undecodable {} ComplexACK from {}: {error} [{}]",
                    ack.service_choice,
                    key.0,
                    hex_preview(&ack.service_data)
                ),
            }
            return;
        };

        if !can_receive {
            self.abort_request(&key, AbortReason::SegmentationNotSupported);
            return;
        }
        if !matches!(pending.phase, ClientPhase::ReceivingAck(_)) {
            if segment.sequence_number != 0 {
                log::debug!(
                    "dropping segment {} from {} before segment 0",
                    segment.sequence_number,
                    key.0
                );
                return;
            }
            pending.phase = ClientPhase::ReceivingAck(SegmentReassembly::new(
                segment.proposed_window_size,
                local_window,
            ));
        }
        let ClientPhase::ReceivingAck(reassembly) = &mut pending.phase else {
            return;
        };
        let verdict = reassembly.accept(
            segment.sequence_number,
            segment.more_follows,
            ack.service_data,
        );
        let window = reassembly.actual_window_size();
        pending.deadline = Instant::now() + segment_timeout;

        match self.answer_segment(&key, false, verdict, window) {
            SegmentOutcome::Continue => {}
            SegmentOutcome::Overflow => self.abort_request(&key, AbortReason::BufferOverflow),
            SegmentOutcome::Complete(data) => {
                match self.registry.decode_ack(ack.service_choice, &data) {
                    Ok(decoded) => self.finish(&key, Ok(Some(decoded))),
                    Err(error) => {
                        log::warn!(
                            "undecodable segmented {} ComplexACK from {}: {error}",
                            ack.service_choice,
                            key.0
                        );
                        if let Some(pending) = self.pending.get_mut(&key) {
                            pending.phase = ClientPhase::AwaitingAck;
                            pending.deadline = Instant::now() + pending.peer_config.apdu_timeout;
                        }
                    }
                }
            }
        }
    }

    /// Segment-ACK from a server receiving our segmented request.
    fn on_request_segment_ack(&mut self, peer: PeerAddress, ack: SegmentAck) {
        let key = (peer, ack.invoke_id);
        let segment_timeout = self.config.segment_timeout;
        let Some(pending) = self.pending.get_mut(&key) else {
            log::debug!("dropping Segment-ACK from {} for unknown invoke ID {}", key.0, key.1);
            return;
        };
        if !matches!(pending.phase, ClientPhase::AwaitingSegmentAck) {
            return;
        }
        let Outbound::Segments(window) = &mut pending.outbound else {
            return;
        };

        let now = Instant::now();
        let frames = match window.acknowledge(ack.sequence_number, ack.actual_window_size) {
            WindowAdvance::Advanced => {
                pending.deadline = now + segment_timeout;
                pending.frames()
            }
            WindowAdvance::Finished => {
                pending.phase = ClientPhase::AwaitingAck;
                pending.deadline = now + pending.peer_config.apdu_timeout;
                Vec::new()
            }
            WindowAdvance::Ignored => return,
        };
        pending.retries_left = pending.peer_config.number_of_apdu_retries;
        self.outbox.send_all(&key.0, frames);
    }

    // Server side

    fn on_unconfirmed_request(&self, peer: PeerAddress, request: UnconfirmedRequest) {
        let decoded = match self
            .registry
            .decode_unconfirmed(request.service_choice, &request.service_data)
        {
            Ok(decoded) => decoded,
            Err(error) => {
                log::debug!("dropping {} from {peer}: {error}", request.service_choice);
                return;
            }
        };
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            handler
                .handle_unconfirmed(&ServiceContext::unconfirmed(), &peer, decoded)
                .await;
        });
    }

    fn on_confirmed_request(&mut self, peer: PeerAddress, request: ConfirmedRequest) {
        match request.segment {
            None => {
                self.inbound.remove(&(peer.clone(), request.invoke_id));
                self.accept_request(peer, request);
            }
            Some(_) => self.on_request_segment(peer, request),
        }
    }

    fn on_request_segment(&mut self, peer: PeerAddress, mut request: ConfirmedRequest) {
        let Some(segment) = request.segment.take() else {
            return;
        };
        let key = (peer.clone(), request.invoke_id);
        if !self.config.segmentation_supported.can_receive() {
            log::debug!("segmented request from {peer} refused");
            self.outbox.send(
                &peer,
                abort_frame(true, key.1, AbortReason::SegmentationNotSupported),
            );
            return;
        }

        let local_window = self.config.window_size;
        let deadline = Instant::now() + self.config.segment_timeout;
        let data = std::mem::take(&mut request.service_data);
        let inbound = match self.inbound.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if segment.sequence_number != 0 {
                    log::debug!(
                        "dropping segment {} of unknown request {} from {peer}",
                        segment.sequence_number,
                        key.1
                    );
                    return;
                }
                entry.insert(InboundSegments {
                    template: request,
                    reassembly: SegmentReassembly::new(segment.proposed_window_size, local_window),
                    deadline,
                })
            }
        };
        inbound.deadline = deadline;
        let verdict = inbound
            .reassembly
            .accept(segment.sequence_number, segment.more_follows, data);
        let window = inbound.reassembly.actual_window_size();

        match self.answer_segment(&key, true, verdict, window) {
            SegmentOutcome::Continue => {}
            SegmentOutcome::Overflow => {
                self.inbound.remove(&key);
                self.outbox
                    .send(&peer, abort_frame(true, key.1, AbortReason::BufferOverflow));
            }
            SegmentOutcome::Complete(data) => {
                if let Some(inbound) = self.inbound.remove(&key) {
                    let request = ConfirmedRequest {
                        service_data: data,
                        ..inbound.template
                    };
                    self.accept_request(peer, request);
                }
            }
        }
    }

    /// Acknowledge a received segment as `verdict` demands.
    fn answer_segment(
        &mut self,
        key: &ExchangeKey,
        server: bool,
        verdict: SegmentVerdict,
        window: u8,
    ) -> SegmentOutcome {
        match verdict {
            SegmentVerdict::Pending => SegmentOutcome::Continue,
            SegmentVerdict::WindowComplete { sequence_number }
            | SegmentVerdict::Duplicate { sequence_number } => {
                let frame = segment_ack_frame(key, server, sequence_number, false, window);
                self.outbox.send(&key.0, frame);
                SegmentOutcome::Continue
            }
            SegmentVerdict::OutOfWindow { last_in_order } => {
                if let Some(sequence_number) = last_in_order {
                    let frame = segment_ack_frame(key, server, sequence_number, true, window);
                    self.outbox.send(&key.0, frame);
                }
                SegmentOutcome::Continue
            }
            SegmentVerdict::TooManySegments => SegmentOutcome::Overflow,
            SegmentVerdict::Complete {
                sequence_number,
                data,
            } => {
                let frame = segment_ack_frame(key, server, sequence_number, false, window);
                self.outbox.send(&key.0, frame);
                SegmentOutcome::Complete(data)
            }
        }
    }

    /// Serve a complete confirmed request, or answer it from the cache when
    /// it repeats one already seen.
    fn accept_request(&mut self, peer: PeerAddress, request: ConfirmedRequest) {
        let key = (peer.clone(), request.invoke_id);
        if let Some(cached) = self.responses.get(&key) {
            if cached.request.service_choice == request.service_choice
                && cached.request.service_data == request.service_data
            {
                self.answer_duplicate(&key);
                return;
            }
            log::debug!("invoke ID {} from {peer} reused for a new request", key.1);
            self.responses.remove(&key);
        }

        let decoded = match self
            .registry
            .decode_confirmed(request.service_choice, &request.service_data)
        {
            Ok(decoded) => decoded,
            Err(error) => {
                let reason = RejectReason::from(&error);
                log::debug!("rejecting {} from {peer}: {error}", request.service_choice);
                let reject = Apdu::Reject(RejectPdu {
                    invoke_id: key.1,
                    reason,
                });
                self.outbox.send(&peer, reject.to_bytes());
                return;
            }
        };

        let peer_config = self.peer_config(&peer);
        let exchange = self.next_exchange;
        self.next_exchange += 1;
        let ctx = ServiceContext {
            invoke_id: Some(key.1),
            max_response_length: Some(self.max_response_length(&request)),
        };
        log::debug!("serving {} from {peer}, invoke ID {}", request.service_choice, key.1);
        self.responses.insert(
            key.clone(),
            CachedResponse {
                exchange,
                request,
                state: ResponseState::Processing,
                retries_left: peer_config.number_of_apdu_retries,
                deadline: None,
            },
        );

        let handler = Arc::clone(&self.handler);
        let replies = self.replies.clone();
        tokio::spawn(async move {
            let served = tokio::spawn({
                let peer = key.0.clone();
                async move { handler.handle_confirmed(&ctx, &peer, decoded).await }
            })
            .await;
            let outcome = served.unwrap_or_else(|error| {
                log::error!(
                    "service handler for invoke ID {} from {} failed: {error}",
                    key.1,
                    key.0
                );
                Err(ServiceError::Abort(AbortReason::Other))
            });
            let _ = replies.send(HandlerReply {
                key,
                exchange,
                outcome,
            });
        });
    }

    fn max_response_length(&self, request: &ConfirmedRequest) -> usize {
        let max_apdu = self.local_max_apdu(request.max_apdu.size());
        if request.segmented_response_accepted && self.config.segmentation_supported.can_transmit()
        {
            let segments = request.max_segments.limit().min(MAX_SEGMENTS);
            max_apdu.saturating_sub(SEGMENTED_COMPLEX_ACK_HEADER) * segments
        } else {
            max_apdu.saturating_sub(COMPLEX_ACK_HEADER)
        }
    }

    fn answer_duplicate(&mut self, key: &ExchangeKey) {
        let retries = self.peer_config(&key.0).number_of_apdu_retries;
        let segment_timeout = self.config.segment_timeout;
        let Some(cached) = self.responses.get_mut(key) else {
            return;
        };
        let frames = match &mut cached.state {
            ResponseState::Processing => {
                log::debug!("duplicate request {} from {} is still being served", key.1, key.0);
                return;
            }
            ResponseState::Sent(frame) => vec![frame.clone()],
            ResponseState::Segmented {
                ack,
                window,
                finished,
            } => {
                if *finished {
                    window.rewind();
                    *finished = false;
                }
                cached.retries_left = retries;
                cached.deadline = Some(Instant::now() + segment_timeout);
                ack_window(ack, window)
            }
        };
        log::debug!("duplicate request {} from {}, resending response", key.1, key.0);
        self.outbox.send_all(&key.0, frames);
    }

    fn on_handler_reply(&mut self, reply: HandlerReply) {
        let HandlerReply {
            key,
            exchange,
            outcome,
        } = reply;
        let request = match self.responses.get(&key) {
            Some(cached)
                if cached.exchange == exchange
                    && matches!(cached.state, ResponseState::Processing) =>
            {
                cached.request.clone()
            }
            _ => {
                log::debug!("dropping stale response for invoke ID {} from {}", key.1, key.0);
                return;
            }
        };

        let invoke_id = key.1;
        let service_choice = request.service_choice;
        let peer_config = self.peer_config(&key.0);
        let state = match outcome {
            Ok(None) => ResponseState::Sent(
                Apdu::SimpleAck(SimpleAck {
                    invoke_id,
                    service_choice,
                })
                .to_bytes(),
            ),
            Ok(Some(ack)) => match ack.to_bytes() {
                Ok(data) => self.complex_ack_state(&peer_config, &request, data),
                Err(error) => {
                    log::error!(
                        "failed to encode {service_choice} response for {}: {error}",
                        key.0
                    );
                    ResponseState::Sent(abort_frame(true, invoke_id, AbortReason::Other))
                }
            },
            Err(ServiceError::Error { class, code }) => ResponseState::Sent(
                Apdu::Error(ErrorPdu {
                    invoke_id,
                    service_choice,
                    error_class: class,
                    error_code: code,
                })
                .to_bytes(),
            ),
            Err(ServiceError::Reject(reason)) => {
                ResponseState::Sent(Apdu::Reject(RejectPdu { invoke_id, reason }).to_bytes())
            }
            Err(ServiceError::Abort(reason)) => {
                ResponseState::Sent(abort_frame(true, invoke_id, reason))
            }
        };

        // the cache lifetime starts once the response is on its way
        let now = Instant::now();
        let (frames, deadline) = match &state {
            ResponseState::Sent(frame) => (
                vec![frame.clone()],
                Some(now + self.config.cache_ttl(&peer_config)),
            ),
            ResponseState::Segmented { ack, window, .. } => (
                ack_window(ack, window),
                Some(now + self.config.segment_timeout),
            ),
            ResponseState::Processing => (Vec::new(), None),
        };
        if let Some(cached) = self.responses.get_mut(&key) {
            cached.state = state;
            cached.deadline = deadline;
            cached.retries_left = peer_config.number_of_apdu_retries;
        }
        self.outbox.send_all(&key.0, frames);
    }

    /// Frame a ComplexACK, segmenting it when the requester allows.
    fn complex_ack_state(
        &self,
        peer_config: &PeerConfig,
        request: &ConfirmedRequest,
        data: Bytes,
    ) -> ResponseState {
        let invoke_id = request.invoke_id;
        let max_apdu = self.local_max_apdu(request.max_apdu.size());
        let template = ComplexAck {
            segment: None,
            invoke_id,
            service_choice: request.service_choice,
            service_data: Bytes::new(),
        };
        if data.len() + COMPLEX_ACK_HEADER <= max_apdu {
            return ResponseState::Sent(
                Apdu::ComplexAck(ComplexAck {
                    service_data: data,
                    ..template
                })
                .to_bytes(),
            );
        }
        if !request.segmented_response_accepted
            || !self.config.segmentation_supported.can_transmit()
        {
            log::debug!(
                "{} response of {} bytes needs segmentation",
                request.service_choice,
                data.len()
            );
            return ResponseState::Sent(abort_frame(
                true,
                invoke_id,
                AbortReason::SegmentationNotSupported,
            ));
        }
        let segments = split_segments(&data, max_apdu.saturating_sub(SEGMENTED_COMPLEX_ACK_HEADER));
        if segments.len() > request.max_segments.limit().min(MAX_SEGMENTS) {
            log::debug!(
                "{} response needs {} segments",
                request.service_choice,
                segments.len()
            );
            return ResponseState::Sent(abort_frame(true, invoke_id, AbortReason::BufferOverflow));
        }
        ResponseState::Segmented {
            ack: template,
            window: SegmentWindow::new(segments, peer_config.window_size),
            finished: false,
        }
    }

    /// Segment-ACK from a client receiving our segmented response.
    fn on_response_segment_ack(&mut self, peer: PeerAddress, ack: SegmentAck) {
        let key = (peer, ack.invoke_id);
        let peer_config = self.peer_config(&key.0);
        let retries = peer_config.number_of_apdu_retries;
        let segment_timeout = self.config.segment_timeout;
        let ttl = self.config.cache_ttl(&peer_config);
        let Some(cached) = self.responses.get_mut(&key) else {
            log::debug!("dropping Segment-ACK from {} for unknown invoke ID {}", key.0, key.1);
            return;
        };
        let ResponseState::Segmented {
            ack: template,
            window,
            finished,
        } = &mut cached.state
        else {
            return;
        };
        if *finished {
            return;
        }

        let now = Instant::now();
        let frames = match window.acknowledge(ack.sequence_number, ack.actual_window_size) {
            WindowAdvance::Advanced => {
                cached.deadline = Some(now + segment_timeout);
                cached.retries_left = retries;
                ack_window(template, window)
            }
            WindowAdvance::Finished => {
                *finished = true;
                cached.deadline = Some(now + ttl);
                Vec::new()
            }
            WindowAdvance::Ignored => return,
        };
        self.outbox.send_all(&key.0, frames);
    }

    // Timers

    fn on_timer(&mut self) {
        let now = Instant::now();

        let expired: Vec<ExchangeKey> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.on_request_timeout(key, now);
        }

        self.inbound.retain(|key, inbound| {
            let live = inbound.deadline > now;
            if !live {
                log::debug!("segmented request {} from {} timed out", key.1, key.0);
            }
            live
        });

        let expired: Vec<ExchangeKey> = self
            .responses
            .iter()
            .filter(|(_, cached)| cached.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.on_response_timeout(key, now);
        }
    }

    fn on_request_timeout(&mut self, key: ExchangeKey, now: Instant) {
        let segment_timeout = self.config.segment_timeout;
        let Some(pending) = self.pending.get_mut(&key) else {
            return;
        };
        if matches!(pending.phase, ClientPhase::ReceivingAck(_)) || pending.retries_left == 0 {
            self.finish(&key, Err(RequestError::Timeout));
            return;
        }

        pending.retries_left -= 1;
        let frames = match &mut pending.outbound {
            Outbound::Frame(frame) => {
                pending.deadline = now + pending.peer_config.apdu_timeout;
                vec![frame.clone()]
            }
            Outbound::Segments(window) => {
                if matches!(pending.phase, ClientPhase::AwaitingAck) {
                    window.rewind();
                    pending.phase = ClientPhase::AwaitingSegmentAck;
                }
                pending.deadline = now + segment_timeout;
                request_window(&pending.template, window)
            }
        };
        log::debug!(
            "retrying request {} to {} ({} retries left)",
            pending.id,
            key.0,
            pending.retries_left
        );
        self.outbox.send_all(&key.0, frames);
    }

    fn on_response_timeout(&mut self, key: ExchangeKey, now: Instant) {
        let segment_timeout = self.config.segment_timeout;
        let Some(cached) = self.responses.get_mut(&key) else {
            return;
        };
        let retry = matches!(
            cached.state,
            ResponseState::Segmented {
                finished: false,
                ..
            }
        ) && cached.retries_left > 0;
        if !retry {
            log::trace!("forgetting response to invoke ID {} from {}", key.1, key.0);
            self.responses.remove(&key);
            return;
        }

        cached.retries_left -= 1;
        cached.deadline = Some(now + segment_timeout);
        let ResponseState::Segmented { ack, window, .. } = &cached.state else {
            return;
        };
        let frames = ack_window(ack, window);
        log::debug!("resending response window for invoke ID {} to {}", key.1, key.0);
        self.outbox.send_all(&key.0, frames);
    }
}
