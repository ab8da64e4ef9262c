//! SMPP session state machine.
//!
//! Drives one accepted connection: bind authentication, keepalive,
//! request dispatch and the generic_nack recovery path for malformed
//! frames.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::auth::ClientManager;
use crate::gateway::Forwarder;
use crate::pdu::query::message_state;
use crate::pdu::{
    BindFields, BindRespFields, CommandId, FrameError, Pdu, PduEvent, PduFrame, QuerySmResp,
    SmFields, SmppCodec, SmRespFields, Status,
};

use super::connection::{SessionConn, SessionState};

/// Session-terminating failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("connection closed by peer")]
    Closed,
}

/// Which bind operation a request asked for.
#[derive(Debug, Clone, Copy)]
enum BindKind {
    Transmitter,
    Receiver,
    Transceiver,
}

impl BindKind {
    fn bound_state(self) -> SessionState {
        match self {
            BindKind::Transmitter => SessionState::BoundTx,
            BindKind::Receiver => SessionState::BoundRx,
            BindKind::Transceiver => SessionState::BoundTrx,
        }
    }

    fn resp(self, fields: BindRespFields) -> Pdu {
        match self {
            BindKind::Transmitter => Pdu::BindTransmitterResp(fields),
            BindKind::Receiver => Pdu::BindReceiverResp(fields),
            BindKind::Transceiver => Pdu::BindTransceiverResp(fields),
        }
    }

    fn label(self) -> &'static str {
        match self {
            BindKind::Transmitter => "transmitter",
            BindKind::Receiver => "receiver",
            BindKind::Transceiver => "transceiver",
        }
    }
}

struct PendingRequest {
    command: CommandId,
    sent_at: Instant,
}

/// One running session.
pub struct SmppSession {
    conn: Arc<SessionConn>,
    auth: Arc<ClientManager>,
    forwarder: Arc<Forwarder>,
    /// system_id this server announces in bind responses.
    local_system_id: String,
    read_timeout: Duration,
    write_timeout: Duration,
    response_timeout: Duration,
    pending: HashMap<u32, PendingRequest>,
    enquire_sent_at: Option<Instant>,
    deliver_rx: mpsc::Receiver<SmFields>,
    bind_registered: bool,
}

impl SmppSession {
    pub fn new(
        conn: Arc<SessionConn>,
        auth: Arc<ClientManager>,
        forwarder: Arc<Forwarder>,
        local_system_id: String,
        read_timeout: Duration,
        write_timeout: Duration,
        response_timeout: Duration,
        deliver_rx: mpsc::Receiver<SmFields>,
    ) -> Self {
        Self {
            conn,
            auth,
            forwarder,
            local_system_id,
            read_timeout,
            write_timeout,
            response_timeout,
            pending: HashMap::new(),
            enquire_sent_at: None,
            deliver_rx,
            bind_registered: false,
        }
    }

    /// Run the session until the peer disconnects, unbinds, times out or a
    /// fatal framing error occurs.
    pub async fn run<T>(&mut self, framed: &mut Framed<T, SmppCodec>) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.run_loop(framed).await;

        self.conn.set_state(SessionState::Closed);
        if self.bind_registered {
            if let Some(system_id) = self.conn.system_id() {
                self.auth.release_bind(&system_id);
            }
        }

        result
    }

    async fn run_loop<T>(&mut self, framed: &mut Framed<T, SmppCodec>) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            if self.conn.is_closing() {
                debug!(session = %self.conn.id(), "session closing");
                return Ok(());
            }

            tokio::select! {
                result = timeout(self.read_timeout, framed.next()) => match result {
                    Ok(Some(Ok(PduEvent::Frame(frame)))) => {
                        self.conn.touch();
                        trace!(
                            session = %self.conn.id(),
                            command = %frame.command(),
                            sequence = frame.sequence(),
                            "pdu received"
                        );
                        self.handle_pdu(framed, frame).await?;
                    }
                    Ok(Some(Ok(PduEvent::Malformed(err)))) => {
                        self.conn.touch();
                        warn!(session = %self.conn.id(), error = %err, "malformed frame");
                        self.send_nack(framed, err.sequence(), err.nack_status()).await?;
                    }
                    Ok(Some(Err(err))) => {
                        warn!(session = %self.conn.id(), error = %err, "unrecoverable framing error");
                        return Err(err.into());
                    }
                    Ok(None) => {
                        debug!(session = %self.conn.id(), "peer closed connection");
                        return Ok(());
                    }
                    Err(_) => {
                        if !self.handle_idle(framed).await? {
                            return Ok(());
                        }
                    }
                },

                Some(message) = self.deliver_rx.recv() => {
                    self.send_deliver(framed, message).await?;
                }
            }

            self.expire_pending();
        }
    }

    /// Idle deadline hit. Returns false when the session should close.
    async fn handle_idle<T>(&mut self, framed: &mut Framed<T, SmppCodec>) -> Result<bool, SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(sent_at) = self.enquire_sent_at {
            if sent_at.elapsed() >= self.response_timeout {
                warn!(session = %self.conn.id(), "enquire_link unanswered, closing");
                return Ok(false);
            }
        }

        if !self.conn.is_bound() {
            debug!(session = %self.conn.id(), "idle before bind, closing");
            return Ok(false);
        }

        let sequence = self.conn.next_sequence();
        self.pending.insert(
            sequence,
            PendingRequest {
                command: CommandId::EnquireLink,
                sent_at: Instant::now(),
            },
        );
        self.send(framed, PduFrame::request(sequence, Pdu::EnquireLink)).await?;
        self.enquire_sent_at = Some(Instant::now());
        trace!(session = %self.conn.id(), sequence, "enquire_link sent");
        Ok(true)
    }

    async fn handle_pdu<T>(
        &mut self,
        framed: &mut Framed<T, SmppCodec>,
        frame: PduFrame,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        if frame.is_response() {
            return self.handle_response(frame);
        }

        let sequence = frame.sequence();
        let state = self.conn.state();

        match frame.pdu {
            Pdu::BindTransmitter(bind) => {
                self.handle_bind(framed, sequence, state, bind, BindKind::Transmitter).await
            }
            Pdu::BindReceiver(bind) => {
                self.handle_bind(framed, sequence, state, bind, BindKind::Receiver).await
            }
            Pdu::BindTransceiver(bind) => {
                self.handle_bind(framed, sequence, state, bind, BindKind::Transceiver).await
            }

            Pdu::Unbind => {
                if !state.is_bound() {
                    return self.reject(framed, sequence, Pdu::UnbindResp).await;
                }
                info!(session = %self.conn.id(), "unbind");
                self.send(framed, PduFrame::response(sequence, Status::Ok, Pdu::UnbindResp)).await?;
                self.conn.initiate_close();
                Ok(())
            }

            Pdu::EnquireLink => {
                if !state.is_bound() {
                    return self.reject(framed, sequence, Pdu::EnquireLinkResp).await;
                }
                self.send(framed, PduFrame::response(sequence, Status::Ok, Pdu::EnquireLinkResp))
                    .await
            }

            Pdu::SubmitSm(submit) => {
                if !state.can_send() {
                    return self
                        .reject(framed, sequence, Pdu::SubmitSmResp(SmRespFields::default()))
                        .await;
                }
                self.handle_submit(framed, sequence, *submit).await
            }

            Pdu::DataSm(data) => {
                if !state.can_send() {
                    return self
                        .reject(framed, sequence, Pdu::DataSmResp(SmRespFields::default()))
                        .await;
                }
                let submit = SmFields {
                    service_type: data.service_type.clone(),
                    source_addr_ton: data.source_addr_ton,
                    source_addr_npi: data.source_addr_npi,
                    source_addr: data.source_addr.clone(),
                    dest_addr_ton: data.dest_addr_ton,
                    dest_addr_npi: data.dest_addr_npi,
                    dest_addr: data.dest_addr.clone(),
                    esm_class: data.esm_class,
                    registered_delivery: data.registered_delivery,
                    data_coding: data.data_coding,
                    tlvs: data.tlvs.clone(),
                    ..Default::default()
                };
                match self.forwarder.submit(&submit).await {
                    Ok(message_id) => {
                        self.send(
                            framed,
                            PduFrame::response(
                                sequence,
                                Status::Ok,
                                Pdu::DataSmResp(SmRespFields::new(message_id)),
                            ),
                        )
                        .await
                    }
                    Err(err) => {
                        warn!(session = %self.conn.id(), error = %err, "data_sm forwarding failed");
                        self.send(
                            framed,
                            PduFrame::response(
                                sequence,
                                err.status(),
                                Pdu::DataSmResp(SmRespFields::default()),
                            ),
                        )
                        .await
                    }
                }
            }

            Pdu::QuerySm(query) => {
                if !state.is_bound() {
                    return self
                        .reject(framed, sequence, Pdu::QuerySmResp(QuerySmResp::default()))
                        .await;
                }
                // No message store behind this gateway; the message is in
                // an unknown final state as far as we can tell.
                let resp = QuerySmResp {
                    message_id: query.message_id,
                    final_date: String::new(),
                    message_state: message_state::UNKNOWN,
                    error_code: 0,
                    tlvs: Default::default(),
                };
                self.send(framed, PduFrame::response(sequence, Status::Ok, Pdu::QuerySmResp(resp)))
                    .await
            }

            Pdu::CancelSm(_) => {
                if !state.is_bound() {
                    return self.reject(framed, sequence, Pdu::CancelSmResp).await;
                }
                self.send(framed, PduFrame::response(sequence, Status::Ok, Pdu::CancelSmResp)).await
            }

            Pdu::ReplaceSm(_) => {
                if !state.is_bound() {
                    return self.reject(framed, sequence, Pdu::ReplaceSmResp).await;
                }
                self.send(framed, PduFrame::response(sequence, Status::Ok, Pdu::ReplaceSmResp)).await
            }

            Pdu::BroadcastSm(broadcast) => {
                if !state.can_send() {
                    return self
                        .reject(framed, sequence, Pdu::BroadcastSmResp(SmRespFields::default()))
                        .await;
                }
                let message_id = if broadcast.message_id.is_empty() {
                    self.forwarder.next_message_id()
                } else {
                    broadcast.message_id.clone()
                };
                self.send(
                    framed,
                    PduFrame::response(
                        sequence,
                        Status::Ok,
                        Pdu::BroadcastSmResp(SmRespFields::new(message_id)),
                    ),
                )
                .await
            }

            Pdu::QueryBroadcastSm(query) => {
                if !state.is_bound() {
                    return self
                        .reject(
                            framed,
                            sequence,
                            Pdu::QueryBroadcastSmResp(SmRespFields::default()),
                        )
                        .await;
                }
                self.send(
                    framed,
                    PduFrame::response(
                        sequence,
                        Status::Ok,
                        Pdu::QueryBroadcastSmResp(SmRespFields::new(query.message_id)),
                    ),
                )
                .await
            }

            Pdu::CancelBroadcastSm(_) => {
                if !state.is_bound() {
                    return self.reject(framed, sequence, Pdu::CancelBroadcastSmResp).await;
                }
                self.send(framed, PduFrame::response(sequence, Status::Ok, Pdu::CancelBroadcastSmResp)).await
            }

            Pdu::GenericNack => {
                warn!(session = %self.conn.id(), "received generic_nack");
                Ok(())
            }

            // Server-originated operations arriving from a client.
            Pdu::DeliverSm(_) | Pdu::AlertNotification(_) | Pdu::Outbind(_) => {
                warn!(
                    session = %self.conn.id(),
                    command = %frame.header.command_id,
                    "command not valid in this direction"
                );
                self.send_nack(framed, sequence, Status::InvalidCommandId).await
            }

            // Responses are matched above; requests are all covered.
            _ => self.send_nack(framed, sequence, Status::InvalidCommandId).await,
        }
    }

    async fn handle_bind<T>(
        &mut self,
        framed: &mut Framed<T, SmppCodec>,
        sequence: u32,
        state: SessionState,
        bind: BindFields,
        kind: BindKind,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        info!(
            session = %self.conn.id(),
            system_id = %bind.system_id,
            interface_version = format_args!("{:#04x}", bind.interface_version),
            kind = kind.label(),
            "bind request"
        );

        if state != SessionState::Open {
            warn!(session = %self.conn.id(), state = %state, "bind on already bound session");
            return self
                .send(
                    framed,
                    PduFrame::response(
                        sequence,
                        Status::AlreadyBound,
                        kind.resp(BindRespFields::default()),
                    ),
                )
                .await;
        }

        let peer_ip = self.conn.peer_addr().ip();
        let secure = self.conn.is_secure();
        match self.auth.validate(&bind.system_id, &bind.password, peer_ip, secure) {
            Ok(()) => {
                self.auth.register_bind(&bind.system_id);
                self.bind_registered = true;
                self.conn.set_system_id(bind.system_id.clone());
                self.conn.set_state(kind.bound_state());

                let resp = kind.resp(BindRespFields::new(self.local_system_id.clone()));
                self.send(framed, PduFrame::response(sequence, Status::Ok, resp)).await?;

                info!(
                    session = %self.conn.id(),
                    system_id = %bind.system_id,
                    kind = kind.label(),
                    "bound"
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    session = %self.conn.id(),
                    system_id = %bind.system_id,
                    error = %err,
                    "bind rejected"
                );
                self.send(
                    framed,
                    PduFrame::response(sequence, err.status(), kind.resp(BindRespFields::default())),
                )
                .await?;
                // Authentication failures terminate the connection.
                self.conn.initiate_close();
                Ok(())
            }
        }
    }

    async fn handle_submit<T>(
        &mut self,
        framed: &mut Framed<T, SmppCodec>,
        sequence: u32,
        submit: SmFields,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(
            session = %self.conn.id(),
            source = %submit.source_addr,
            dest = %submit.dest_addr,
            sm_length = submit.short_message.len(),
            "submit_sm"
        );

        self.conn.set_busy(true);
        let outcome = self.forwarder.submit(&submit).await;
        self.conn.set_busy(false);

        match outcome {
            Ok(message_id) => {
                debug!(session = %self.conn.id(), message_id = %message_id, "submit accepted");
                self.send(
                    framed,
                    PduFrame::response(
                        sequence,
                        Status::Ok,
                        Pdu::SubmitSmResp(SmRespFields::new(message_id)),
                    ),
                )
                .await
            }
            Err(err) => {
                warn!(session = %self.conn.id(), error = %err, "submit forwarding failed");
                self.send(
                    framed,
                    PduFrame::response(
                        sequence,
                        err.status(),
                        Pdu::SubmitSmResp(SmRespFields::default()),
                    ),
                )
                .await
            }
        }
    }

    fn handle_response(&mut self, frame: PduFrame) -> Result<(), SessionError> {
        let sequence = frame.sequence();
        match self.pending.remove(&sequence) {
            Some(pending) => {
                trace!(
                    session = %self.conn.id(),
                    sequence,
                    command = %pending.command,
                    latency_ms = pending.sent_at.elapsed().as_millis(),
                    "response received"
                );

                if frame.command() == CommandId::EnquireLinkResp {
                    self.enquire_sent_at = None;
                    if let Some(system_id) = self.conn.system_id() {
                        self.auth.record_ping(&system_id);
                    }
                } else if !frame.status().is_ok() {
                    warn!(
                        session = %self.conn.id(),
                        sequence,
                        status = %frame.status(),
                        "peer reported error"
                    );
                }
                Ok(())
            }
            None => {
                warn!(session = %self.conn.id(), sequence, "unexpected response");
                Ok(())
            }
        }
    }

    /// Push a mobile-terminated message to the client.
    async fn send_deliver<T>(
        &mut self,
        framed: &mut Framed<T, SmppCodec>,
        message: SmFields,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.conn.state().can_receive() {
            warn!(session = %self.conn.id(), "dropping delivery, session cannot receive");
            return Ok(());
        }

        let sequence = self.conn.next_sequence();
        self.pending.insert(
            sequence,
            PendingRequest {
                command: CommandId::DeliverSm,
                sent_at: Instant::now(),
            },
        );
        self.send(framed, PduFrame::request(sequence, Pdu::DeliverSm(Box::new(message)))).await
    }

    /// Answer a request issued in the wrong bind state.
    async fn reject<T>(
        &mut self,
        framed: &mut Framed<T, SmppCodec>,
        sequence: u32,
        resp: Pdu,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.send(framed, PduFrame::response(sequence, Status::InvalidBindStatus, resp)).await
    }

    async fn send_nack<T>(
        &mut self,
        framed: &mut Framed<T, SmppCodec>,
        sequence: u32,
        status: Status,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.send(framed, PduFrame::response(sequence, status, Pdu::GenericNack)).await
    }

    async fn send<T>(
        &mut self,
        framed: &mut Framed<T, SmppCodec>,
        frame: PduFrame,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        trace!(
            session = %self.conn.id(),
            command = %frame.command(),
            sequence = frame.sequence(),
            status = %frame.status(),
            "pdu sent"
        );
        match timeout(self.write_timeout, framed.send(frame)).await {
            Ok(result) => result.map_err(SessionError::Frame),
            Err(_) => Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline exceeded",
            ))),
        }
    }

    /// Drop pending requests that outlived the response timeout.
    fn expire_pending(&mut self) {
        let deadline = self.response_timeout;
        self.pending.retain(|sequence, pending| {
            let keep = pending.sent_at.elapsed() < deadline * 4;
            if !keep {
                warn!(sequence, command = %pending.command, "pending request expired");
            }
            keep
        });
    }
}
