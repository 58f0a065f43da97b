//! Signaling Relay
//!
//! Applies control messages to sessions and forwards them to the other
//! participant. Payloads (SDP, ICE) are never inspected.
//!
//! Every room operation locks that room's session for the read-check-write of
//! its phase. Outbound delivery uses non-blocking queue sends, so no lock is
//! held across network I/O.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sb_common::protocol::{ClientEvent, OnlineEntry, ServerEvent};
use sb_common::{Identity, IdentityKey, IceCandidate, Role, RoomId};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::directory::{ReserveError, SessionDirectory, SharedSession};
use super::error::{SignalingError, SignalingResult};
use super::record::CallRecordSink;
use super::session::Session;
use super::state::{CallPhase, Party, PhaseEvent, Transition};
use crate::config::Config;
use crate::presence::{ConnectionHandle, PresenceRegistry};

/// End reason sent when a participant's transport goes away.
pub const PEER_DISCONNECTED: &str = "peer disconnected";

/// Timing knobs for the relay.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// How long a callee may ring before the call is missed.
    pub ring_timeout: Duration,
    /// How long a terminal room is kept to absorb late duplicates.
    pub session_retention: Duration,
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        Self {
            ring_timeout: config.ring_timeout,
            session_retention: config.session_retention,
        }
    }
}

/// The message hub between participants' control channels.
#[derive(Clone)]
pub struct SignalingRelay {
    registry: PresenceRegistry,
    directory: Arc<SessionDirectory>,
    sink: Arc<dyn CallRecordSink>,
    settings: RelaySettings,
}

impl SignalingRelay {
    #[must_use]
    pub fn new(
        registry: PresenceRegistry,
        sink: Arc<dyn CallRecordSink>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            registry,
            directory: Arc::new(SessionDirectory::new()),
            sink,
            settings,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    /// Route one decoded client message.
    ///
    /// Returns a direct reply for the sender, if the message has one. Errors
    /// are for the sender only.
    pub async fn dispatch(
        &self,
        sender: &Identity,
        event: ClientEvent,
    ) -> SignalingResult<Option<ServerEvent>> {
        event.validate()?;

        match event {
            ClientEvent::Ping => return Ok(Some(ServerEvent::Pong)),
            ClientEvent::ListOnline { role } => {
                let entries = self.online_entries(sender, role);
                return Ok(Some(ServerEvent::OnlineList { entries }));
            }
            ClientEvent::CallRequest { target } => {
                self.on_call_request(sender, target).await?;
            }
            ClientEvent::Accept { room_id } => self.on_accept(sender, room_id).await?,
            ClientEvent::Reject { room_id, reason } => {
                self.on_reject(sender, room_id, reason).await?;
            }
            ClientEvent::End { room_id, reason } => self.on_end(sender, room_id, reason).await?,
            ClientEvent::Offer { room_id, sdp } => self.on_offer(sender, room_id, sdp).await?,
            ClientEvent::Answer { room_id, sdp } => self.on_answer(sender, room_id, sdp).await?,
            ClientEvent::IceCandidate { room_id, candidate } => {
                self.on_ice_candidate(sender, room_id, candidate).await?;
            }
            ClientEvent::Connected { room_id } => self.on_connected(sender, room_id).await?,
        }

        Ok(None)
    }

    /// Register a freshly authenticated connection.
    ///
    /// A reconnect during a live call keeps the identity marked busy.
    pub fn on_connect(&self, identity: Identity, handle: ConnectionHandle) {
        let key = identity.key();
        self.registry.register(identity, handle);
        if self.directory.room_of(&key).is_some() {
            self.registry.set_busy(&key);
        }
    }

    /// Who `sender` can call: its tenant's reachable identities, minus itself.
    #[must_use]
    pub fn online_entries(&self, sender: &Identity, role: Option<Role>) -> Vec<OnlineEntry> {
        self.online_listing(sender, role).0
    }

    /// Same as [`Self::online_entries`], plus when the listing was taken.
    #[must_use]
    pub fn online_listing(
        &self,
        sender: &Identity,
        role: Option<Role>,
    ) -> (Vec<OnlineEntry>, DateTime<Utc>) {
        let me = sender.key();
        let snapshot = self.registry.list_online(sender.tenant_id, role);
        let entries = snapshot
            .to_online_entries()
            .into_iter()
            .filter(|e| e.identity.key() != me)
            .collect();
        (entries, snapshot.taken_at())
    }

    /// Start a call from `caller` to `target`.
    pub async fn on_call_request(
        &self,
        caller: &Identity,
        target: IdentityKey,
    ) -> SignalingResult<RoomId> {
        let caller_key = caller.key();
        if target == caller_key {
            return Err(SignalingError::SelfCall);
        }
        if target.tenant_id != caller.tenant_id {
            return Err(SignalingError::CrossTenant);
        }
        let callee = self
            .registry
            .lookup(&target)
            .ok_or(SignalingError::Unavailable)?
            .identity;

        let room_id = RoomId::generate();
        if let Err(e) = self.directory.reserve(caller_key, target, room_id) {
            let side = match e {
                ReserveError::CallerBusy => "caller",
                ReserveError::CalleeBusy => "callee",
            };
            debug!(caller = %caller_key, callee = %target, side, "Call request refused: busy");
            return Err(SignalingError::Busy);
        }

        let mut session = self
            .directory
            .insert(Session::new(room_id, caller.clone(), callee.clone()))
            .await;
        let rang = Self::advance(&mut session, PhaseEvent::Ring)?;
        if rang != Transition::Advance(CallPhase::Ringing) {
            warn!(room_id = %room_id, phase = ?session.phase(), "New session did not start ringing");
            return Err(SignalingError::Unavailable);
        }

        self.registry.set_busy(&caller_key);
        self.registry.set_busy(&target);

        if !self.registry.send(
            &target,
            ServerEvent::IncomingCall {
                room_id,
                caller: caller.clone(),
            },
        ) {
            // Callee dropped between lookup and ring
            Self::advance(&mut session, PhaseEvent::Disconnect)?;
            self.conclude(&session, Some(Party::Callee), None);
            return Err(SignalingError::Unavailable);
        }
        self.registry.send(
            &caller_key,
            ServerEvent::CallRinging {
                room_id,
                callee: callee.clone(),
            },
        );

        let relay = self.clone();
        let ring_timeout = self.settings.ring_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ring_timeout).await;
            relay.on_ring_timeout(room_id).await;
        });
        session.set_ring_timer(timer.abort_handle());

        info!(room_id = %room_id, caller = %caller_key, callee = %target, "Call ringing");
        Ok(room_id)
    }

    /// Callee picks up.
    pub async fn on_accept(&self, sender: &Identity, room_id: RoomId) -> SignalingResult<()> {
        let shared = self.locate(room_id)?;
        let mut session = shared.lock().await;
        let party = Self::party(&session, sender)?;

        if Self::advance(&mut session, PhaseEvent::Accept(party))?
            == Transition::Advance(CallPhase::Accepted)
        {
            self.registry
                .send(&session.caller.key(), ServerEvent::Accepted { room_id });
            info!(room_id = %room_id, "Call accepted");
        }
        Ok(())
    }

    /// Callee declines, or caller withdraws while ringing.
    pub async fn on_reject(
        &self,
        sender: &Identity,
        room_id: RoomId,
        reason: Option<String>,
    ) -> SignalingResult<()> {
        let shared = self.locate(room_id)?;
        let mut session = shared.lock().await;
        let party = Self::party(&session, sender)?;

        if let Transition::Advance(_) = Self::advance(&mut session, PhaseEvent::Reject(party))? {
            self.conclude(&session, Some(party), reason);
        }
        Ok(())
    }

    /// Either side hangs up.
    pub async fn on_end(
        &self,
        sender: &Identity,
        room_id: RoomId,
        reason: Option<String>,
    ) -> SignalingResult<()> {
        let shared = self.locate(room_id)?;
        let mut session = shared.lock().await;
        let party = Self::party(&session, sender)?;

        if let Transition::Advance(_) = Self::advance(&mut session, PhaseEvent::End(party))? {
            self.conclude(&session, Some(party), reason);
        }
        Ok(())
    }

    pub async fn on_offer(
        &self,
        sender: &Identity,
        room_id: RoomId,
        sdp: String,
    ) -> SignalingResult<()> {
        self.forward(sender, room_id, PhaseEvent::Offer, ServerEvent::Offer { room_id, sdp })
            .await
    }

    pub async fn on_answer(
        &self,
        sender: &Identity,
        room_id: RoomId,
        sdp: String,
    ) -> SignalingResult<()> {
        self.forward(sender, room_id, PhaseEvent::Answer, ServerEvent::Answer { room_id, sdp })
            .await
    }

    pub async fn on_ice_candidate(
        &self,
        sender: &Identity,
        room_id: RoomId,
        candidate: IceCandidate,
    ) -> SignalingResult<()> {
        self.forward(
            sender,
            room_id,
            PhaseEvent::IceCandidate,
            ServerEvent::IceCandidate { room_id, candidate },
        )
        .await
    }

    /// Client-reported media connectivity. Bookkeeping only.
    pub async fn on_connected(&self, sender: &Identity, room_id: RoomId) -> SignalingResult<()> {
        let shared = self.locate(room_id)?;
        let mut session = shared.lock().await;
        Self::party(&session, sender)?;

        if Self::advance(&mut session, PhaseEvent::Connected)?
            == Transition::Advance(CallPhase::Active)
        {
            info!(room_id = %room_id, "Call active");
        }
        Ok(())
    }

    /// Tear down after a connection closes.
    ///
    /// Does nothing if the identity has already reconnected on a newer
    /// connection.
    pub async fn on_disconnect(&self, identity: &Identity, connection_id: Uuid) {
        let key = identity.key();
        if !self.registry.unregister_connection(&key, connection_id) {
            debug!(identity = %key, connection_id = %connection_id, "Superseded connection closed");
            return;
        }

        let Some(room_id) = self.directory.room_of(&key) else {
            return;
        };
        let Some(shared) = self.directory.get(&room_id) else {
            return;
        };

        let mut session = shared.lock().await;
        let Some(party) = session.party_of(&key) else {
            return;
        };
        match session.apply(PhaseEvent::Disconnect) {
            Ok(Transition::Advance(_)) => {
                warn!(room_id = %room_id, identity = %key, "Call failed: peer disconnected");
                self.conclude(&session, Some(party), None);
            }
            Ok(_) => {}
            Err(e) => warn!(room_id = %room_id, error = %e, "Disconnect transition refused"),
        }
    }

    /// Ring window elapsed without an answer.
    async fn on_ring_timeout(&self, room_id: RoomId) {
        let Some(shared) = self.directory.get(&room_id) else {
            return;
        };
        let mut session = shared.lock().await;

        if let Ok(Transition::Advance(CallPhase::Missed)) = session.apply(PhaseEvent::Timeout) {
            info!(room_id = %room_id, "Call missed");
            self.conclude(&session, None, None);
        }
    }

    /// Phase-checked verbatim relay to the other participant.
    async fn forward(
        &self,
        sender: &Identity,
        room_id: RoomId,
        event: PhaseEvent,
        message: ServerEvent,
    ) -> SignalingResult<()> {
        let shared = self.locate(room_id)?;
        let mut session = shared.lock().await;
        let party = Self::party(&session, sender)?;

        match Self::advance(&mut session, event)? {
            Transition::Advance(_) | Transition::Stay => {
                let to = session.participant(party.other()).key();
                self.registry.send(&to, message);
            }
            Transition::Ignore => {
                debug!(room_id = %room_id, event = ?event, "Dropping message for finished call");
            }
        }
        Ok(())
    }

    fn locate(&self, room_id: RoomId) -> SignalingResult<SharedSession> {
        self.directory
            .get(&room_id)
            .ok_or(SignalingError::RoomNotFound(room_id))
    }

    fn party(session: &Session, sender: &Identity) -> SignalingResult<Party> {
        session
            .party_of(&sender.key())
            .ok_or(SignalingError::NotAParticipant(session.room_id))
    }

    fn advance(session: &mut Session, event: PhaseEvent) -> SignalingResult<Transition> {
        let room_id = session.room_id;
        let transition = session
            .apply(event)
            .map_err(|source| SignalingError::IllegalTransition { room_id, source })?;
        if transition == Transition::Ignore {
            debug!(room_id = %room_id, event = ?event, phase = ?session.phase(), "Duplicate or late message ignored");
        }
        Ok(transition)
    }

    /// Notify participants of a terminal phase and retire the session.
    ///
    /// `by` is the party whose message or disconnect ended the call.
    fn conclude(&self, session: &Session, by: Option<Party>, reason: Option<String>) {
        let room_id = session.room_id;
        let caller = session.caller.key();
        let callee = session.callee.key();

        match session.phase() {
            CallPhase::Rejected => {
                self.registry
                    .send(&caller, ServerEvent::Rejected { room_id, reason });
            }
            CallPhase::Missed => {
                self.registry.send(&caller, ServerEvent::Missed { room_id });
                self.registry.send(&callee, ServerEvent::Missed { room_id });
            }
            CallPhase::Cancelled => {
                let reason = reason.unwrap_or_else(|| "cancelled".to_string());
                self.registry
                    .send(&callee, ServerEvent::Ended { room_id, reason });
            }
            CallPhase::Ended | CallPhase::Failed => {
                let reason = if session.phase() == CallPhase::Failed {
                    PEER_DISCONNECTED.to_string()
                } else {
                    reason.unwrap_or_else(|| "ended".to_string())
                };
                let recipients = match by {
                    Some(Party::Caller) => vec![callee],
                    Some(Party::Callee) => vec![caller],
                    None => vec![caller, callee],
                };
                for key in &recipients {
                    self.registry.send(
                        key,
                        ServerEvent::Ended {
                            room_id,
                            reason: reason.clone(),
                        },
                    );
                }
            }
            CallPhase::Requested
            | CallPhase::Ringing
            | CallPhase::Accepted
            | CallPhase::Connecting
            | CallPhase::Active => return,
        }

        self.directory.release(session);
        self.registry.set_idle(&caller);
        self.registry.set_idle(&callee);

        if let Some(record) = session.to_record() {
            info!(
                room_id = %room_id,
                outcome = ?record.outcome,
                duration_seconds = record.duration_seconds,
                phases = ?session.history(),
                "Call finished"
            );
            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move { sink.record(record) });
        }

        self.directory.retire(room_id, self.settings.session_retention);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::record::{CallRecord, ChannelSink};
    use sb_common::protocol::ErrorCode;
    use sb_common::{CallOutcome, PresenceStatus};
    use tokio::sync::mpsc;

    struct Peer {
        identity: Identity,
        connection_id: Uuid,
        rx: mpsc::Receiver<ServerEvent>,
    }

    impl Peer {
        /// Next non-presence event.
        fn next(&mut self) -> Option<ServerEvent> {
            loop {
                match self.rx.try_recv().ok()? {
                    ServerEvent::PresenceUpdate { .. } => continue,
                    other => return Some(other),
                }
            }
        }
    }

    fn relay(ring_timeout: Duration) -> (SignalingRelay, mpsc::UnboundedReceiver<CallRecord>) {
        let (sink, records) = ChannelSink::new();
        let relay = SignalingRelay::new(
            PresenceRegistry::in_memory(),
            Arc::new(sink),
            RelaySettings {
                ring_timeout,
                session_retention: Duration::from_millis(200),
            },
        );
        (relay, records)
    }

    fn connect(relay: &SignalingRelay, tenant_id: Uuid, role: Role, name: &str) -> Peer {
        let identity = Identity {
            id: Uuid::new_v4(),
            tenant_id,
            role,
            display_name: name.to_string(),
        };
        let (tx, rx) = mpsc::channel(64);
        let handle = ConnectionHandle::new(tx);
        let connection_id = handle.connection_id;
        relay.on_connect(identity.clone(), handle);
        Peer {
            identity,
            connection_id,
            rx,
        }
    }

    fn pair(relay: &SignalingRelay) -> (Peer, Peer) {
        let tenant = Uuid::new_v4();
        (
            connect(relay, tenant, Role::InternalAgent, "Caller"),
            connect(relay, tenant, Role::PortalCustomer, "Callee"),
        )
    }

    fn status(relay: &SignalingRelay, peer: &Peer) -> Option<PresenceStatus> {
        relay
            .registry()
            .lookup(&peer.identity.key())
            .map(|e| e.status)
    }

    async fn ringing(relay: &SignalingRelay, c: &mut Peer, d: &mut Peer) -> RoomId {
        let room_id = relay
            .on_call_request(&c.identity, d.identity.key())
            .await
            .unwrap();
        assert_eq!(
            d.next(),
            Some(ServerEvent::IncomingCall {
                room_id,
                caller: c.identity.clone(),
            })
        );
        assert!(matches!(c.next(), Some(ServerEvent::CallRinging { .. })));
        room_id
    }

    #[tokio::test]
    async fn test_full_call_relays_verbatim_and_records_duration() {
        let (relay, mut records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);

        let room_id = ringing(&relay, &mut c, &mut d).await;
        assert_eq!(status(&relay, &c), Some(PresenceStatus::Busy));
        assert_eq!(status(&relay, &d), Some(PresenceStatus::Busy));

        relay.on_accept(&d.identity, room_id).await.unwrap();
        assert_eq!(c.next(), Some(ServerEvent::Accepted { room_id }));

        relay
            .on_offer(&c.identity, room_id, "sdp-1".into())
            .await
            .unwrap();
        assert_eq!(
            d.next(),
            Some(ServerEvent::Offer {
                room_id,
                sdp: "sdp-1".into()
            })
        );

        relay
            .on_answer(&d.identity, room_id, "sdp-2".into())
            .await
            .unwrap();
        assert_eq!(
            c.next(),
            Some(ServerEvent::Answer {
                room_id,
                sdp: "sdp-2".into()
            })
        );

        relay.on_connected(&c.identity, room_id).await.unwrap();
        relay.on_end(&c.identity, room_id, None).await.unwrap();
        assert_eq!(
            d.next(),
            Some(ServerEvent::Ended {
                room_id,
                reason: "ended".into()
            })
        );
        assert_eq!(c.next(), None);

        assert_eq!(status(&relay, &c), Some(PresenceStatus::Online));
        assert_eq!(status(&relay, &d), Some(PresenceStatus::Online));

        let record = records.recv().await.unwrap();
        assert_eq!(record.room_id, room_id);
        assert_eq!(record.outcome, CallOutcome::Ended);
        let answered_at = record.answered_at.unwrap();
        assert_eq!(
            i64::try_from(record.duration_seconds).unwrap(),
            (record.ended_at - answered_at).num_seconds()
        );

        let session = relay.directory().get(&room_id).unwrap();
        assert_eq!(
            session.lock().await.history(),
            &[
                CallPhase::Requested,
                CallPhase::Ringing,
                CallPhase::Accepted,
                CallPhase::Connecting,
                CallPhase::Active,
                CallPhase::Ended,
            ]
        );
    }

    #[tokio::test]
    async fn test_call_request_errors() {
        let (relay, _records) = relay(Duration::from_secs(30));
        let (c, _d) = pair(&relay);

        let err = relay
            .on_call_request(&c.identity, c.identity.key())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SelfCall);

        let offline = IdentityKey::new(c.identity.tenant_id, Uuid::new_v4());
        let err = relay
            .on_call_request(&c.identity, offline)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);

        let outsider = connect(&relay, Uuid::new_v4(), Role::PortalCustomer, "Out");
        let err = relay
            .on_call_request(&c.identity, outsider.identity.key())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CrossTenant);

        assert!(relay.directory().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_then_online_succeeds() {
        let (relay, _records) = relay(Duration::from_secs(30));
        let tenant = Uuid::new_v4();
        let mut c = connect(&relay, tenant, Role::InternalAgent, "Caller");
        let later = Identity {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            role: Role::PortalCustomer,
            display_name: "Later".into(),
        };

        let err = relay
            .on_call_request(&c.identity, later.key())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);

        let (tx, _rx) = mpsc::channel(8);
        relay.on_connect(later.clone(), ConnectionHandle::new(tx));
        relay
            .on_call_request(&c.identity, later.key())
            .await
            .unwrap();
        assert!(matches!(c.next(), Some(ServerEvent::CallRinging { .. })));
    }

    #[tokio::test]
    async fn test_busy_callee_is_refused_and_untouched() {
        let (relay, _records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;

        let e = connect(&relay, c.identity.tenant_id, Role::InternalAgent, "Other");
        let err = relay
            .on_call_request(&e.identity, d.identity.key())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Busy);
        assert_eq!(relay.directory().len(), 1);

        // Caller is busy too
        let err = relay
            .on_call_request(&e.identity, c.identity.key())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Busy);

        relay.on_accept(&d.identity, room_id).await.unwrap();
        assert_eq!(c.next(), Some(ServerEvent::Accepted { room_id }));
    }

    #[tokio::test]
    async fn test_duplicate_accept_is_silent() {
        let (relay, _records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;

        relay.on_accept(&d.identity, room_id).await.unwrap();
        relay.on_accept(&d.identity, room_id).await.unwrap();
        relay.on_reject(&d.identity, room_id, None).await.unwrap();

        assert_eq!(c.next(), Some(ServerEvent::Accepted { room_id }));
        assert_eq!(c.next(), None);
    }

    #[tokio::test]
    async fn test_concurrent_accept_and_reject_first_wins() {
        let (relay, mut records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;

        let (accept, reject) = tokio::join!(
            relay.on_accept(&d.identity, room_id),
            relay.on_reject(&d.identity, room_id, None)
        );
        accept.unwrap();
        reject.unwrap();

        let phase = relay.directory().get(&room_id).unwrap().lock().await.phase();
        match c.next() {
            Some(ServerEvent::Accepted { .. }) => assert_eq!(phase, CallPhase::Accepted),
            Some(ServerEvent::Rejected { .. }) => {
                assert_eq!(phase, CallPhase::Rejected);
                assert_eq!(records.recv().await.unwrap().outcome, CallOutcome::Rejected);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(c.next(), None);
    }

    #[tokio::test]
    async fn test_reject_notifies_caller() {
        let (relay, mut records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;

        relay
            .on_reject(&d.identity, room_id, Some("in a meeting".into()))
            .await
            .unwrap();

        assert_eq!(
            c.next(),
            Some(ServerEvent::Rejected {
                room_id,
                reason: Some("in a meeting".into())
            })
        );
        assert_eq!(status(&relay, &d), Some(PresenceStatus::Online));
        let record = records.recv().await.unwrap();
        assert_eq!(record.outcome, CallOutcome::Rejected);
        assert_eq!(record.duration_seconds, 0);
    }

    #[tokio::test]
    async fn test_caller_cancel_while_ringing() {
        let (relay, mut records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;

        relay.on_end(&c.identity, room_id, None).await.unwrap();

        assert_eq!(
            d.next(),
            Some(ServerEvent::Ended {
                room_id,
                reason: "cancelled".into()
            })
        );
        assert_eq!(
            records.recv().await.unwrap().outcome,
            CallOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn test_ring_timeout_misses_call() {
        let (relay, mut records) = relay(Duration::from_millis(50));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;

        let record = records.recv().await.unwrap();
        assert_eq!(record.outcome, CallOutcome::Missed);

        assert_eq!(c.next(), Some(ServerEvent::Missed { room_id }));
        assert_eq!(d.next(), Some(ServerEvent::Missed { room_id }));
        assert_eq!(status(&relay, &c), Some(PresenceStatus::Online));
        assert_eq!(status(&relay, &d), Some(PresenceStatus::Online));

        // Late accept after timeout is a no-op
        relay.on_accept(&d.identity, room_id).await.unwrap();
        assert_eq!(c.next(), None);
    }

    #[tokio::test]
    async fn test_accept_cancels_ring_timer() {
        let (relay, mut records) = relay(Duration::from_millis(50));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;
        relay.on_accept(&d.identity, room_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(records.try_recv().is_err());
        let phase = relay.directory().get(&room_id).unwrap().lock().await.phase();
        assert_eq!(phase, CallPhase::Accepted);
    }

    #[tokio::test]
    async fn test_outsider_is_not_a_participant() {
        let (relay, _records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;
        let outsider = connect(&relay, c.identity.tenant_id, Role::InternalAgent, "Eve");

        let err = relay
            .on_accept(&outsider.identity, room_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAParticipant);

        let err = relay
            .on_offer(&outsider.identity, room_id, "sdp".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAParticipant);

        let phase = relay.directory().get(&room_id).unwrap().lock().await.phase();
        assert_eq!(phase, CallPhase::Ringing);
    }

    #[tokio::test]
    async fn test_offer_before_accept_is_illegal() {
        let (relay, _records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;

        let err = relay
            .on_offer(&c.identity, room_id, "sdp".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IllegalTransition);
        assert_eq!(d.next(), None);
    }

    #[tokio::test]
    async fn test_unknown_room() {
        let (relay, _records) = relay(Duration::from_secs(30));
        let (c, _d) = pair(&relay);
        let err = relay
            .on_end(&c.identity, RoomId::generate(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoomNotFound);
    }

    #[tokio::test]
    async fn test_disconnect_mid_call_fails_session() {
        let (relay, mut records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;
        relay.on_accept(&d.identity, room_id).await.unwrap();
        relay
            .on_offer(&c.identity, room_id, "sdp-1".into())
            .await
            .unwrap();
        relay.on_connected(&d.identity, room_id).await.unwrap();
        c.next();

        relay.on_disconnect(&d.identity, d.connection_id).await;

        assert_eq!(
            c.next(),
            Some(ServerEvent::Ended {
                room_id,
                reason: PEER_DISCONNECTED.into()
            })
        );
        assert!(relay.registry().lookup(&d.identity.key()).is_none());
        assert_eq!(status(&relay, &c), Some(PresenceStatus::Online));
        assert_eq!(records.recv().await.unwrap().outcome, CallOutcome::Failed);
    }

    #[tokio::test]
    async fn test_superseded_connection_does_not_fail_call() {
        let (relay, mut records) = relay(Duration::from_secs(30));
        let (mut c, mut d) = pair(&relay);
        let room_id = ringing(&relay, &mut c, &mut d).await;
        relay.on_accept(&d.identity, room_id).await.unwrap();
        c.next();

        // d reconnects, then the old socket closes
        let (tx, _rx) = mpsc::channel(8);
        relay.on_connect(d.identity.clone(), ConnectionHandle::new(tx));
        relay.on_disconnect(&d.identity, d.connection_id).await;

        assert_eq!(c.next(), None);
        assert_eq!(status(&relay, &d), Some(PresenceStatus::Busy));
        assert!(records.try_recv().is_err());
        let phase = relay.directory().get(&room_id).unwrap().lock().await.phase();
        assert_eq!(phase, CallPhase::Accepted);
    }

    #[tokio::test]
    async fn test_dispatch_validates_and_replies() {
        let (relay, _records) = relay(Duration::from_secs(30));
        let (c, d) = pair(&relay);

        assert_eq!(
            relay.dispatch(&c.identity, ClientEvent::Ping).await.unwrap(),
            Some(ServerEvent::Pong)
        );

        let err = relay
            .dispatch(
                &c.identity,
                ClientEvent::Offer {
                    room_id: RoomId::generate(),
                    sdp: "  ".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Malformed);

        match relay
            .dispatch(&c.identity, ClientEvent::ListOnline { role: None })
            .await
            .unwrap()
        {
            Some(ServerEvent::OnlineList { entries }) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].identity, d.identity);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_callee_leaving_during_request_records_once() {
        let (relay, mut records) = relay(Duration::from_secs(30));
        let mut callers = Vec::new();
        let mut tasks = Vec::new();

        for _ in 0..200 {
            let (c, d) = pair(&relay);
            let request = {
                let relay = relay.clone();
                let caller = c.identity.clone();
                let target = d.identity.key();
                tokio::spawn(async move { relay.on_call_request(&caller, target).await })
            };
            let leave = {
                let relay = relay.clone();
                let callee = d.identity.clone();
                let connection_id = d.connection_id;
                tokio::spawn(async move { relay.on_disconnect(&callee, connection_id).await })
            };
            tasks.push((request, leave));
            callers.push(c);
        }

        for (request, leave) in tasks {
            leave.await.unwrap();
            if let Err(e) = request.await.unwrap() {
                assert!(matches!(e, SignalingError::Unavailable), "unexpected error: {e}");
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut seen = std::collections::HashSet::new();
        while let Ok(record) = records.try_recv() {
            assert!(seen.insert(record.room_id), "second record for {}", record.room_id);
            assert_eq!(record.outcome, CallOutcome::Failed);
        }

        for mut c in callers {
            assert_eq!(status(&relay, &c), Some(PresenceStatus::Online));
            assert!(relay.directory().room_of(&c.identity.key()).is_none());

            let mut ended = 0;
            while let Some(event) = c.next() {
                if matches!(event, ServerEvent::Ended { .. }) {
                    ended += 1;
                }
            }
            assert!(ended <= 1);
        }
    }
}
