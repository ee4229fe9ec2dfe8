//! Session Manager
//!
//! Single owner of the player identity, both channels, and the current
//! lobby/match views. All mutation funnels through one place: caller-driven
//! operations run directly on `&mut Session`, and server-pushed broadcasts
//! are enqueued by the background receive loop and applied only inside
//! [`Session::pump_events`], called from the caller's tick. No state is
//! touched from two tasks at once.
//!
//! ```text
//!     caller                     Session                  receive loop
//!       |                          |                           |
//!       |-- login/join/leave ----->|-- control call ---------->|
//!       |-- pump_events ---------->|<== event queue (mpsc) ====|
//!       |<- notifications ---------|                           |
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::game::state::{
    CharacterSnapshot, Lobby, LobbyId, MatchId, MatchState, ParticipantState, PlayerId, Winner,
};
use crate::network::codec::{self, CodecError};
use crate::network::control::{ChannelError, ControlChannel};
use crate::network::protocol::{
    ConnectGameRequest, ConnectGameResponse, ConnectLobbyRequest, ConnectLobbyResponse, ControlOp,
    CreateLobbyRequest, CreateLobbyResponse, GameBroadcast, GameEvent, JoinLobbyRequest,
    JoinLobbyResponse, LeaveLobbyRequest, LeaveLobbyResponse, LobbyBroadcast, LobbyEvent,
    LobbyListResponse, LoginResponse, LogoutRequest, RealtimeOp, StartGameRequest,
    StartGameResponse, UpdatePlayerRequest,
};
use crate::network::realtime::{RealtimeChannel, RecvOutcome};

/// Queued broadcasts between receive loop and tick.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server hostname or address.
    pub host: String,
    /// Control channel port.
    pub tcp_port: u16,
    /// Realtime channel port.
    pub udp_port: u16,
    /// Deadline for control calls and realtime handshakes.
    pub call_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: crate::DEFAULT_TCP_PORT,
            udp_port: crate::DEFAULT_UDP_PORT,
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No identity yet.
    Disconnected,
    /// Logged in, browsing lobbies.
    Authenticated,
    /// Member of a lobby, receiving roster broadcasts.
    InLobby,
    /// Participating in a running match.
    InMatch,
}

/// One decoded broadcast, queued by the receive loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Broadcast received while bound to a lobby.
    Lobby(LobbyBroadcast),
    /// Broadcast received while bound to a match.
    Game(GameBroadcast),
}

/// State change surfaced to the presentation layer by `pump_events`.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The lobby roster changed; carries the full updated lobby.
    RosterChanged(Lobby),
    /// The lobby was destroyed by the server.
    LobbyClosed,
    /// The match began and the realtime channel is bound to it.
    MatchStarted(MatchId),
    /// The match ended with this outcome.
    MatchEnded(Winner),
    /// A remote participant's snapshot was replaced.
    EntityUpdated(PlayerId, CharacterSnapshot),
}

/// Failures surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A channel failed; see [`ChannelError`] for retryability.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// A payload did not match its schema.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The operation is not valid in the current phase.
    #[error("{operation} is not valid while {phase:?}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// Phase at the time of the call.
        phase: SessionPhase,
    },
    /// The server refused a realtime binding handshake.
    #[error("realtime handshake rejected: {0}")]
    HandshakeFailed(&'static str),
    /// A successful response was missing a field it promises on success.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
}

/// Which schema inbound datagrams are decoded against.
#[derive(Debug, Clone, Copy)]
enum BindingContext {
    Lobby,
    Match,
}

/// The client's connection to one server, from login to logout.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    control: ControlChannel,
    realtime: Option<RealtimeChannel>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
    receive_task: Option<JoinHandle<()>>,
    identity: Option<PlayerId>,
    lobby: Option<Lobby>,
    match_state: Option<MatchState>,
}

impl Session {
    /// Create a disconnected session. No sockets are opened yet.
    pub fn new(config: SessionConfig) -> Self {
        let control = ControlChannel::new(&config.host, config.tcp_port, config.call_timeout);
        Self {
            config,
            control,
            realtime: None,
            events_rx: None,
            receive_task: None,
            identity: None,
            lobby: None,
            match_state: None,
        }
    }

    /// Current phase, derived from what the session holds.
    pub fn phase(&self) -> SessionPhase {
        if self.match_state.is_some() {
            SessionPhase::InMatch
        } else if self.lobby.is_some() {
            SessionPhase::InLobby
        } else if self.identity.is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Disconnected
        }
    }

    /// The server-assigned identity, once logged in.
    pub fn identity(&self) -> Option<PlayerId> {
        self.identity
    }

    /// The lobby this session is a member of, if any.
    pub fn lobby(&self) -> Option<&Lobby> {
        self.lobby.as_ref()
    }

    /// The running match, if any.
    pub fn match_state(&self) -> Option<&MatchState> {
        self.match_state.as_ref()
    }

    // -------------------------------------------------------------------------
    // Control operations
    // -------------------------------------------------------------------------

    /// Authenticate and obtain an identity.
    pub async fn login(&mut self) -> Result<PlayerId, SessionError> {
        if self.identity.is_some() {
            return Err(self.invalid("login"));
        }
        let response = self.control.call(ControlOp::Login, &[]).await?;
        let response: LoginResponse = codec::decode(&response)?;
        self.identity = Some(response.id);
        info!(player = %response.id, "logged in");
        Ok(response.id)
    }

    /// Fetch the open lobbies. An empty map is a normal answer.
    pub async fn lobbies(&mut self) -> Result<BTreeMap<LobbyId, Lobby>, SessionError> {
        self.require_identity("lobbies")?;
        let response = self.control.call(ControlOp::GetLobbies, &[]).await?;
        let response: LobbyListResponse = codec::decode(&response)?;
        Ok(response.lobbies)
    }

    /// Create a lobby with this player as lead and bind the realtime channel
    /// to it.
    ///
    /// Returns `Ok(None)` if the server refused. If the lobby was created
    /// but the realtime binding failed, the membership is rolled back with a
    /// best-effort leave so server and client agree.
    pub async fn create_lobby(&mut self) -> Result<Option<Lobby>, SessionError> {
        let player = self.require_identity("create_lobby")?;
        if self.lobby.is_some() || self.match_state.is_some() {
            return Err(self.invalid("create_lobby"));
        }

        let request = codec::encode(&CreateLobbyRequest { lead: player })?;
        let response = self.control.call(ControlOp::CreateLobby, &request).await?;
        let response: CreateLobbyResponse = codec::decode(&response)?;
        if !response.success {
            return Ok(None);
        }
        let lobby = response
            .lobby
            .ok_or(SessionError::MalformedResponse("created lobby is missing"))?;

        self.enter_lobby(player, lobby).await.map(Some)
    }

    /// Join an existing lobby and bind the realtime channel to it.
    ///
    /// A full or vanished lobby yields `Ok(None)`, not an error.
    pub async fn join_lobby(&mut self, id: LobbyId) -> Result<Option<Lobby>, SessionError> {
        let player = self.require_identity("join_lobby")?;
        if self.lobby.is_some() || self.match_state.is_some() {
            return Err(self.invalid("join_lobby"));
        }

        let request = codec::encode(&JoinLobbyRequest { player, lobby: id })?;
        let response = self.control.call(ControlOp::JoinLobby, &request).await?;
        let response: JoinLobbyResponse = codec::decode(&response)?;
        if !response.success {
            debug!(lobby = id, "join rejected");
            return Ok(None);
        }
        let lobby = response
            .lobby
            .ok_or(SessionError::MalformedResponse("joined lobby is missing"))?;

        self.enter_lobby(player, lobby).await.map(Some)
    }

    /// Leave the current lobby.
    ///
    /// Exactly one leave call reaches the server per membership: the lobby
    /// view is cleared on completion, so calling again (after the lobby is
    /// gone, or after a destroy broadcast beat us to it) is a no-op
    /// returning `Ok(false)`. On a channel error the membership is kept and
    /// the call may be retried.
    pub async fn leave_lobby(&mut self) -> Result<bool, SessionError> {
        if self.match_state.is_some() {
            return Err(self.invalid("leave_lobby"));
        }
        let player = self.require_identity("leave_lobby")?;
        let Some(lobby_id) = self.lobby.as_ref().map(|l| l.id) else {
            return Ok(false);
        };

        let request = codec::encode(&LeaveLobbyRequest {
            player,
            lobby: lobby_id,
        })?;
        let response = self.control.call(ControlOp::LeaveLobby, &request).await?;
        let response: LeaveLobbyResponse = codec::decode(&response)?;

        self.teardown_realtime();
        self.lobby = None;
        info!(lobby = lobby_id, "left lobby");
        Ok(response.success)
    }

    /// Ask the server to start the match. Lead only; a refusal (not lead,
    /// already started) is `Ok(false)`. The actual transition into the match
    /// happens when the start broadcast arrives.
    pub async fn start_game(&mut self) -> Result<bool, SessionError> {
        let player = self.require_identity("start_game")?;
        let Some(lobby_id) = self.lobby.as_ref().map(|l| l.id) else {
            return Err(self.invalid("start_game"));
        };

        let request = codec::encode(&StartGameRequest {
            player,
            lobby: lobby_id,
        })?;
        let response = self.control.call(ControlOp::StartGame, &request).await?;
        let response: StartGameResponse = codec::decode(&response)?;
        Ok(response.success)
    }

    /// End the session. Best effort: local state is reset even when the
    /// server is unreachable.
    pub async fn logout(&mut self) {
        self.teardown_realtime();
        if let Some(player) = self.identity {
            match codec::encode(&LogoutRequest { player }) {
                Ok(request) => {
                    if let Err(err) = self
                        .control
                        .call_no_response(ControlOp::Logout, &request)
                        .await
                    {
                        warn!(error = %err, "logout call failed, resetting locally");
                    }
                }
                Err(err) => warn!(error = %err, "logout encode failed"),
            }
        }
        self.control.disconnect();
        self.identity = None;
        self.lobby = None;
        self.match_state = None;
        info!("logged out");
    }

    // -------------------------------------------------------------------------
    // Realtime operations
    // -------------------------------------------------------------------------

    /// Publish the local entity's snapshot for this tick. Fire-and-forget;
    /// the local match mirror is updated in the same step.
    pub async fn publish_local_state(
        &mut self,
        snapshot: CharacterSnapshot,
    ) -> Result<(), SessionError> {
        let player = self.require_identity("publish_local_state")?;
        let (game, realtime) = match (self.match_state.as_mut(), self.realtime.as_ref()) {
            (Some(state), Some(realtime)) => (state.id, realtime.clone()),
            _ => return Err(self.invalid("publish_local_state")),
        };

        let request = codec::encode(&UpdatePlayerRequest {
            game,
            player,
            character: snapshot,
        })?;
        realtime.publish(RealtimeOp::UpdatePlayer, &request).await?;

        if let Some(state) = self.match_state.as_mut() {
            state.apply_update(ParticipantState {
                id: player,
                character: snapshot,
            });
        }
        Ok(())
    }

    /// Apply every queued broadcast and return the resulting notifications.
    ///
    /// This is the only place server-pushed events mutate session state;
    /// call it once per tick from the same task that drives the other
    /// operations.
    pub async fn pump_events(&mut self) -> Result<Vec<Notification>, SessionError> {
        let mut notifications = Vec::new();
        loop {
            let event = match self.events_rx.as_mut().map(|rx| rx.try_recv()) {
                Some(Ok(event)) => event,
                _ => break,
            };
            match event {
                SessionEvent::Lobby(broadcast) => {
                    self.apply_lobby_broadcast(broadcast, &mut notifications)
                        .await?;
                }
                SessionEvent::Game(broadcast) => {
                    self.apply_game_broadcast(broadcast, &mut notifications);
                }
            }
        }
        Ok(notifications)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Bind a fresh realtime socket to the lobby and adopt the membership.
    /// On binding failure the membership is rolled back server-side.
    async fn enter_lobby(
        &mut self,
        player: PlayerId,
        lobby: Lobby,
    ) -> Result<Lobby, SessionError> {
        match self.bind_realtime(player, BindingContext::Lobby).await {
            Ok(()) => {
                info!(lobby = lobby.id, members = lobby.cur_people, "entered lobby");
                self.lobby = Some(lobby.clone());
                Ok(lobby)
            }
            Err(err) => {
                warn!(lobby = lobby.id, error = %err, "realtime binding failed, leaving lobby");
                let leave = codec::encode(&LeaveLobbyRequest {
                    player,
                    lobby: lobby.id,
                })?;
                if let Err(leave_err) = self.control.call(ControlOp::LeaveLobby, &leave).await {
                    warn!(error = %leave_err, "rollback leave failed");
                }
                Err(err)
            }
        }
    }

    /// Bind a fresh socket and perform the matching handshake.
    ///
    /// A fresh socket per binding means the server cannot have our address
    /// yet, so the handshake response is necessarily the first datagram this
    /// socket receives; no correlation with later broadcasts is needed.
    async fn bind_realtime(
        &mut self,
        player: PlayerId,
        context: BindingContext,
    ) -> Result<(), SessionError> {
        self.teardown_realtime();
        let channel = RealtimeChannel::bind(
            &self.config.host,
            self.config.udp_port,
            self.config.call_timeout,
        )
        .await?;

        let accepted = match context {
            BindingContext::Lobby => {
                let request = codec::encode(&ConnectLobbyRequest { player })?;
                let response = channel.request(RealtimeOp::ConnectLobby, &request).await?;
                codec::decode::<ConnectLobbyResponse>(&response)?.success
            }
            BindingContext::Match => {
                let request = codec::encode(&ConnectGameRequest { player })?;
                let response = channel.request(RealtimeOp::ConnectGame, &request).await?;
                codec::decode::<ConnectGameResponse>(&response)?.success
            }
        };
        if !accepted {
            return Err(SessionError::HandshakeFailed(match context {
                BindingContext::Lobby => "lobby binding refused",
                BindingContext::Match => "match binding refused",
            }));
        }

        self.realtime = Some(channel);
        self.spawn_receive_loop(context);
        Ok(())
    }

    /// Spawn the background receive loop for the current realtime channel.
    /// The loop only decodes and enqueues; state mutation stays in
    /// `pump_events`.
    fn spawn_receive_loop(&mut self, context: BindingContext) {
        let Some(channel) = self.realtime.clone() else {
            return;
        };
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        self.events_rx = Some(rx);
        let mut shutdown = channel.subscribe_shutdown();

        self.receive_task = Some(tokio::spawn(async move {
            loop {
                match channel.next_datagram(&mut shutdown).await {
                    Ok(RecvOutcome::Datagram(bytes)) => {
                        let decoded = match context {
                            BindingContext::Lobby => {
                                codec::decode::<LobbyBroadcast>(&bytes).map(SessionEvent::Lobby)
                            }
                            BindingContext::Match => {
                                codec::decode::<GameBroadcast>(&bytes).map(SessionEvent::Game)
                            }
                        };
                        match decoded {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            // One bad datagram is not fatal here.
                            Err(err) => warn!(error = %err, "dropping undecodable broadcast"),
                        }
                    }
                    Ok(RecvOutcome::Closed) => break,
                    Err(err) => {
                        warn!(error = %err, "realtime receive failed, ending loop");
                        break;
                    }
                }
            }
            debug!("receive loop ended");
        }));
    }

    /// Close the realtime channel; the receive loop sees the close and ends.
    fn teardown_realtime(&mut self) {
        if let Some(channel) = self.realtime.take() {
            channel.close();
        }
        self.events_rx = None;
        // Detach the loop; it ends on its own once it sees the close.
        drop(self.receive_task.take());
    }

    async fn apply_lobby_broadcast(
        &mut self,
        broadcast: LobbyBroadcast,
        out: &mut Vec<Notification>,
    ) -> Result<(), SessionError> {
        match broadcast.event {
            LobbyEvent::Join | LobbyEvent::Leave => {
                let Some(updated) = broadcast.lobby else {
                    warn!("roster broadcast without lobby payload");
                    return Ok(());
                };
                if !updated.is_consistent() {
                    warn!(lobby = updated.id, "dropping inconsistent roster broadcast");
                    return Ok(());
                }
                if self.lobby.as_ref().map(|l| l.id) != Some(updated.id) {
                    warn!(lobby = updated.id, "roster broadcast for a different lobby");
                    return Ok(());
                }
                // A lobby whose lead is gone is as good as destroyed.
                if broadcast.event == LobbyEvent::Leave && !updated.contains(updated.lead) {
                    info!(lobby = updated.id, "lead left, closing lobby");
                    self.teardown_realtime();
                    self.lobby = None;
                    out.push(Notification::LobbyClosed);
                    return Ok(());
                }
                self.lobby = Some(updated.clone());
                out.push(Notification::RosterChanged(updated));
            }
            LobbyEvent::Destroy => {
                info!("lobby destroyed by server");
                self.teardown_realtime();
                self.lobby = None;
                out.push(Notification::LobbyClosed);
            }
            LobbyEvent::Start => {
                let Some(game) = broadcast.game else {
                    warn!("start broadcast without match id");
                    return Ok(());
                };
                self.enter_match(game, out).await?;
            }
        }
        Ok(())
    }

    /// Rebind the realtime channel to the new match and build the local
    /// match mirror from the lobby roster. On handshake failure the session
    /// drops back to Authenticated.
    async fn enter_match(
        &mut self,
        game: MatchId,
        out: &mut Vec<Notification>,
    ) -> Result<(), SessionError> {
        let player = self.require_identity("enter_match")?;
        let Some(lobby) = self.lobby.take() else {
            warn!(game, "start broadcast without a lobby");
            return Ok(());
        };

        match self.bind_realtime(player, BindingContext::Match).await {
            Ok(()) => {
                self.match_state = Some(MatchState::new(game, lobby.players.iter().copied()));
                info!(game, participants = lobby.players.len(), "match started");
                out.push(Notification::MatchStarted(game));
                Ok(())
            }
            Err(err) => {
                warn!(game, error = %err, "match binding failed");
                Err(err)
            }
        }
    }

    fn apply_game_broadcast(&mut self, broadcast: GameBroadcast, out: &mut Vec<Notification>) {
        match broadcast.event {
            GameEvent::UpdatePlayer => {
                let Some(update) = broadcast.player else {
                    warn!("update broadcast without participant payload");
                    return;
                };
                // The local entity is authored by local physics only; an
                // echo of our own publish must not overwrite it.
                if Some(update.id) == self.identity {
                    return;
                }
                let Some(state) = self.match_state.as_mut() else {
                    return;
                };
                // Updates never grow the fixed roster.
                if state.apply_update(update.clone()) {
                    out.push(Notification::EntityUpdated(update.id, update.character));
                } else {
                    warn!(player = %update.id, "update for unknown participant");
                }
            }
            GameEvent::GameOver => {
                let Some(winner) = broadcast.winner else {
                    warn!("game-over broadcast without outcome");
                    return;
                };
                if let Some(state) = self.match_state.as_mut() {
                    state.finish(winner);
                }
                info!(?winner, "match ended");
                self.teardown_realtime();
                self.match_state = None;
                out.push(Notification::MatchEnded(winner));
            }
        }
    }

    fn require_identity(&self, operation: &'static str) -> Result<PlayerId, SessionError> {
        self.identity.ok_or(SessionError::InvalidState {
            operation,
            phase: self.phase(),
        })
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            phase: self.phase(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(channel) = self.realtime.take() {
            channel.close();
        }
    }
}
