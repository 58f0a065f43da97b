//! Media Negotiation Coordinator
//!
//! Drives one call's offer/answer/ICE cycle against a [`MediaEngine`], using
//! the control channel purely as a pipe.

use sb_common::protocol::{ClientEvent, ServerEvent};
use sb_common::{IceCandidate, RoomId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ice_queue::PendingIceQueue;
use crate::media::{EngineEvent, MediaConnectionState, MediaEngine, MediaError};

/// `end` reason sent when local negotiation gives up.
pub const MEDIA_FAILURE_REASON: &str = "media negotiation failed";

/// Coordinator errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("Signaling channel closed")]
    ChannelClosed,
    #[error("Answer received with no offer outstanding")]
    UnexpectedAnswer,
    #[error("Offer received while our own offer is outstanding")]
    UnexpectedOffer,
}

/// Which side creates the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// The caller, once the callee has accepted.
    Initiator,
    Responder,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    StateChanged(MediaConnectionState),
    /// Local media negotiation failed.
    Failed(String),
    /// The peer connection was torn down.
    Ended,
}

/// Local controls from the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorCommand {
    SetMuted(bool),
    SetSpeaker(bool),
    HangUp,
}

pub struct NegotiationCoordinator<E: MediaEngine> {
    room_id: RoomId,
    role: NegotiationRole,
    engine: E,
    signals: mpsc::Sender<ClientEvent>,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    ice: PendingIceQueue,
    state: Option<MediaConnectionState>,
    awaiting_answer: bool,
    reported_connected: bool,
    end_on_failure: bool,
    muted: bool,
    speaker_on: bool,
    closed: bool,
}

impl<E: MediaEngine> NegotiationCoordinator<E> {
    /// Coordinator for `room_id`. Outbound messages go to `signals`.
    pub fn new(
        room_id: RoomId,
        role: NegotiationRole,
        engine: E,
        signals: mpsc::Sender<ClientEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                room_id,
                role,
                engine,
                signals,
                events,
                ice: PendingIceQueue::new(),
                state: None,
                awaiting_answer: false,
                reported_connected: false,
                end_on_failure: true,
                muted: false,
                speaker_on: true,
                closed: false,
            },
            events_rx,
        )
    }

    /// Whether a local failure also sends `end` for the session.
    #[must_use]
    pub fn with_end_on_failure(mut self, enabled: bool) -> Self {
        self.end_on_failure = enabled;
        self
    }

    pub const fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub const fn state(&self) -> Option<MediaConnectionState> {
        self.state
    }

    pub const fn is_muted(&self) -> bool {
        self.muted
    }

    pub const fn speaker_on(&self) -> bool {
        self.speaker_on
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Remote candidates held for the remote description.
    pub fn pending_candidates(&self) -> usize {
        self.ice.len()
    }

    /// Begin negotiation. The initiator sends its offer; the responder waits.
    pub async fn start(&mut self) -> Result<(), CoordinatorError> {
        if self.role == NegotiationRole::Initiator {
            let sdp = self.engine.create_offer().await?;
            self.awaiting_answer = true;
            info!(room_id = %self.room_id, "Sending offer");
            self.signal(ClientEvent::Offer {
                room_id: self.room_id,
                sdp,
            })
            .await?;
        }
        Ok(())
    }

    /// Apply a relayed message. Messages for other rooms are ignored.
    pub async fn handle_server_event(&mut self, event: ServerEvent) -> Result<(), CoordinatorError> {
        if self.closed {
            return Ok(());
        }

        match event {
            ServerEvent::Offer { room_id, sdp } if room_id == self.room_id => {
                self.on_remote_offer(&sdp).await
            }
            ServerEvent::Answer { room_id, sdp } if room_id == self.room_id => {
                self.on_remote_answer(&sdp).await
            }
            ServerEvent::IceCandidate { room_id, candidate } if room_id == self.room_id => {
                self.on_remote_candidate(candidate).await;
                Ok(())
            }
            ServerEvent::Ended { room_id, .. }
            | ServerEvent::Rejected { room_id, .. }
            | ServerEvent::Missed { room_id }
                if room_id == self.room_id =>
            {
                self.shutdown().await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Apply a signal from the media engine.
    pub async fn handle_engine_event(&mut self, event: EngineEvent) -> Result<(), CoordinatorError> {
        if self.closed {
            return Ok(());
        }

        match event {
            EngineEvent::LocalCandidate(candidate) => {
                self.signal(ClientEvent::IceCandidate {
                    room_id: self.room_id,
                    candidate,
                })
                .await
            }
            EngineEvent::StateChanged(state) => {
                if self.state == Some(state) {
                    return Ok(());
                }
                debug!(room_id = %self.room_id, ?state, "Media state changed");
                self.state = Some(state);
                let _ = self.events.send(CoordinatorEvent::StateChanged(state));

                match state {
                    MediaConnectionState::Connected if !self.reported_connected => {
                        self.reported_connected = true;
                        self.signal(ClientEvent::Connected {
                            room_id: self.room_id,
                        })
                        .await
                    }
                    MediaConnectionState::Failed => {
                        self.fail("media connection failed".to_string()).await;
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    /// Apply a local control. Mute and speaker never touch the channel.
    pub async fn handle_command(&mut self, command: CoordinatorCommand) -> Result<(), CoordinatorError> {
        match command {
            CoordinatorCommand::SetMuted(muted) => self.set_muted(muted),
            CoordinatorCommand::SetSpeaker(on) => self.set_speaker(on),
            CoordinatorCommand::HangUp => return self.hang_up().await,
        }
        Ok(())
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.engine.set_muted(muted);
    }

    /// Returns the new mute state.
    pub fn toggle_mute(&mut self) -> bool {
        self.set_muted(!self.muted);
        self.muted
    }

    pub fn set_speaker(&mut self, on: bool) {
        self.speaker_on = on;
    }

    /// Returns the new speaker state.
    pub fn toggle_speaker(&mut self) -> bool {
        self.speaker_on = !self.speaker_on;
        self.speaker_on
    }

    /// Send `end` and tear down.
    pub async fn hang_up(&mut self) -> Result<(), CoordinatorError> {
        if self.closed {
            return Ok(());
        }
        let sent = self
            .signal(ClientEvent::End {
                room_id: self.room_id,
                reason: None,
            })
            .await;
        self.shutdown().await;
        sent
    }

    /// Drive the coordinator until the call ends or every input closes.
    pub async fn run(
        mut self,
        mut server_events: mpsc::Receiver<ServerEvent>,
        mut engine_events: mpsc::UnboundedReceiver<EngineEvent>,
        mut commands: mpsc::Receiver<CoordinatorCommand>,
    ) {
        if let Err(e) = self.start().await {
            self.on_error(e).await;
        }

        while !self.closed {
            let result = tokio::select! {
                Some(event) = server_events.recv() => self.handle_server_event(event).await,
                Some(event) = engine_events.recv() => self.handle_engine_event(event).await,
                Some(command) = commands.recv() => self.handle_command(command).await,
                else => break,
            };
            if let Err(e) = result {
                self.on_error(e).await;
            }
        }

        debug!(room_id = %self.room_id, "Coordinator stopped");
    }

    async fn on_remote_offer(&mut self, sdp: &str) -> Result<(), CoordinatorError> {
        if self.awaiting_answer {
            return Err(CoordinatorError::UnexpectedOffer);
        }
        self.engine.apply_remote_offer(sdp).await?;
        self.drain_pending().await;

        let answer = self.engine.create_answer().await?;
        info!(room_id = %self.room_id, "Sending answer");
        self.signal(ClientEvent::Answer {
            room_id: self.room_id,
            sdp: answer,
        })
        .await
    }

    async fn on_remote_answer(&mut self, sdp: &str) -> Result<(), CoordinatorError> {
        if !self.awaiting_answer {
            return Err(CoordinatorError::UnexpectedAnswer);
        }
        self.engine.apply_remote_answer(sdp).await?;
        self.awaiting_answer = false;
        self.drain_pending().await;
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        match self.ice.offer(candidate) {
            Some(candidate) => self.apply_candidate(candidate).await,
            None => debug!(
                room_id = %self.room_id,
                pending = self.ice.len(),
                "Queued remote candidate"
            ),
        }
    }

    async fn drain_pending(&mut self) {
        let pending = self.ice.release();
        if !pending.is_empty() {
            debug!(room_id = %self.room_id, count = pending.len(), "Applying queued candidates");
        }
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        // A single bad candidate does not sink the connection
        if let Err(e) = self.engine.add_ice_candidate(candidate).await {
            warn!(room_id = %self.room_id, error = %e, "Failed to add remote candidate");
        }
    }

    async fn on_error(&mut self, error: CoordinatorError) {
        match error {
            CoordinatorError::Media(e) => self.fail(e.to_string()).await,
            CoordinatorError::ChannelClosed => {
                warn!(room_id = %self.room_id, "Signaling channel closed");
                self.shutdown().await;
            }
            other => warn!(room_id = %self.room_id, error = %other, "Dropping negotiation message"),
        }
    }

    async fn fail(&mut self, reason: String) {
        warn!(room_id = %self.room_id, %reason, "Media negotiation failed");
        let _ = self.events.send(CoordinatorEvent::Failed(reason));

        if self.end_on_failure {
            let _ = self
                .signal(ClientEvent::End {
                    room_id: self.room_id,
                    reason: Some(MEDIA_FAILURE_REASON.to_string()),
                })
                .await;
        }
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.ice.clear();
        if let Err(e) = self.engine.close().await {
            warn!(room_id = %self.room_id, error = %e, "Failed to close peer connection");
        }
        let _ = self.events.send(CoordinatorEvent::Ended);
    }

    async fn signal(&self, event: ClientEvent) -> Result<(), CoordinatorError> {
        self.signals
            .send(event)
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }
}
