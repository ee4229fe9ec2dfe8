//! Protocol Messages
//!
//! Wire schemas for client-server communication. Every call is framed as
//! `[opcode u8][length u32 LE][payload]`; payloads are bincode-encoded
//! structs defined here, selected per `(channel, opcode)`. Broadcast
//! datagrams carry no opcode prefix and are decoded against the schema
//! implied by the current realtime binding (lobby vs. match).

use serde::{Deserialize, Serialize};

use crate::game::state::{
    CharacterSnapshot, Lobby, LobbyId, MatchId, ParticipantState, PlayerId, Winner,
};

// =============================================================================
// OPCODES
// =============================================================================

/// Operations on the reliable control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlOp {
    /// Authenticate and receive a player id.
    Login = 0,
    /// Fetch the current lobby collection.
    GetLobbies = 1,
    /// Create a lobby with the caller as lead.
    CreateLobby = 2,
    /// Join an existing lobby.
    JoinLobby = 3,
    /// Leave the current lobby.
    LeaveLobby = 4,
    /// End the session. Fire-and-forget: the response carries no payload.
    Logout = 5,
    /// Ask the server to start the match (lead only).
    StartGame = 6,
}

/// Operations on the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RealtimeOp {
    /// Bind this datagram socket for lobby-broadcast delivery.
    ConnectLobby = 0,
    /// Bind this datagram socket for match-broadcast delivery.
    ConnectGame = 1,
    /// Publish the local entity's snapshot. No response expected.
    UpdatePlayer = 2,
}

// =============================================================================
// CONTROL CHANNEL PAYLOADS
// =============================================================================

/// Response to [`ControlOp::Login`]: the server-assigned identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Assigned player id.
    pub id: PlayerId,
}

/// Response to [`ControlOp::GetLobbies`]. Legitimately empty when no lobby
/// is open.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LobbyListResponse {
    /// All open lobbies, keyed by lobby id.
    pub lobbies: std::collections::BTreeMap<LobbyId, Lobby>,
}

/// Request for [`ControlOp::CreateLobby`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateLobbyRequest {
    /// The caller, who becomes the lobby lead.
    pub lead: PlayerId,
}

/// Response to [`ControlOp::CreateLobby`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateLobbyResponse {
    /// Whether the lobby was created.
    pub success: bool,
    /// The new lobby, present on success.
    pub lobby: Option<Lobby>,
}

/// Request for [`ControlOp::JoinLobby`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinLobbyRequest {
    /// The joining player.
    pub player: PlayerId,
    /// Target lobby.
    pub lobby: LobbyId,
}

/// Response to [`ControlOp::JoinLobby`]. A `success: false` answer (full or
/// vanished lobby) is a normal rejection, not a protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinLobbyResponse {
    /// Whether the join was accepted.
    pub success: bool,
    /// The lobby including the caller, present on success.
    pub lobby: Option<Lobby>,
}

/// Request for [`ControlOp::LeaveLobby`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveLobbyRequest {
    /// The leaving player.
    pub player: PlayerId,
    /// The lobby being left.
    pub lobby: LobbyId,
}

/// Response to [`ControlOp::LeaveLobby`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveLobbyResponse {
    /// Whether the membership was removed.
    pub success: bool,
}

/// Request for [`ControlOp::Logout`]. The response has a zero-length payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoutRequest {
    /// The player logging out.
    pub player: PlayerId,
}

/// Request for [`ControlOp::StartGame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartGameRequest {
    /// The caller; must be the lobby lead.
    pub player: PlayerId,
    /// The lobby to start.
    pub lobby: LobbyId,
}

/// Response to [`ControlOp::StartGame`]. Rejected for non-leads and for
/// lobbies whose match already started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartGameResponse {
    /// Whether the match will start.
    pub success: bool,
}

// =============================================================================
// REALTIME CHANNEL PAYLOADS
// =============================================================================

/// Request for [`RealtimeOp::ConnectLobby`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectLobbyRequest {
    /// The player binding this socket.
    pub player: PlayerId,
}

/// Response to [`RealtimeOp::ConnectLobby`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectLobbyResponse {
    /// Whether the socket is now registered for lobby broadcasts.
    pub success: bool,
}

/// Request for [`RealtimeOp::ConnectGame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectGameRequest {
    /// The player binding this socket.
    pub player: PlayerId,
}

/// Response to [`RealtimeOp::ConnectGame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectGameResponse {
    /// Whether the socket is now registered for match broadcasts.
    pub success: bool,
}

/// Request for [`RealtimeOp::UpdatePlayer`]: the steady-state per-tick
/// publish for the locally owned entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlayerRequest {
    /// Match the update belongs to.
    pub game: MatchId,
    /// The publishing player.
    pub player: PlayerId,
    /// The local entity's current snapshot.
    pub character: CharacterSnapshot,
}

// =============================================================================
// BROADCASTS
// =============================================================================

/// Sub-event of a [`LobbyBroadcast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LobbyEvent {
    /// A player joined; `lobby` carries the updated roster.
    Join,
    /// A player left; `lobby` carries the updated roster.
    Leave,
    /// The lobby was destroyed (lead left or lobby emptied).
    Destroy,
    /// The lead started the match; `game` carries the match id.
    Start,
}

/// Server-pushed lobby event, decoded while bound to a lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyBroadcast {
    /// What happened.
    pub event: LobbyEvent,
    /// Updated lobby for Join/Leave.
    pub lobby: Option<Lobby>,
    /// Match id for Start.
    pub game: Option<MatchId>,
}

/// Sub-event of a [`GameBroadcast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    /// A participant's snapshot changed; `player` carries the new state.
    UpdatePlayer,
    /// The match ended; `winner` carries the outcome.
    GameOver,
}

/// Server-pushed match event, decoded while bound to a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameBroadcast {
    /// What happened.
    pub event: GameEvent,
    /// Updated participant for UpdatePlayer.
    pub player: Option<ParticipantState>,
    /// Outcome for GameOver.
    pub winner: Option<Winner>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec3::Vec3;
    use crate::network::codec;

    #[test]
    fn test_control_opcodes_are_stable() {
        assert_eq!(ControlOp::Login as u8, 0);
        assert_eq!(ControlOp::GetLobbies as u8, 1);
        assert_eq!(ControlOp::CreateLobby as u8, 2);
        assert_eq!(ControlOp::JoinLobby as u8, 3);
        assert_eq!(ControlOp::LeaveLobby as u8, 4);
        assert_eq!(ControlOp::Logout as u8, 5);
        assert_eq!(ControlOp::StartGame as u8, 6);
    }

    #[test]
    fn test_realtime_opcodes_are_stable() {
        assert_eq!(RealtimeOp::ConnectLobby as u8, 0);
        assert_eq!(RealtimeOp::ConnectGame as u8, 1);
        assert_eq!(RealtimeOp::UpdatePlayer as u8, 2);
    }

    #[test]
    fn test_join_response_roundtrip() {
        let msg = JoinLobbyResponse {
            success: true,
            lobby: Some(Lobby {
                id: 3,
                lead: PlayerId::new(7),
                players: vec![PlayerId::new(7), PlayerId::new(9)],
                cur_people: 2,
                max_people: 4,
            }),
        };
        let bytes = codec::encode(&msg).unwrap();
        let parsed: JoinLobbyResponse = codec::decode(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_lobby_broadcast_roundtrip() {
        let msg = LobbyBroadcast {
            event: LobbyEvent::Start,
            lobby: None,
            game: Some(12),
        };
        let bytes = codec::encode(&msg).unwrap();
        let parsed: LobbyBroadcast = codec::decode(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_game_broadcast_roundtrip() {
        let msg = GameBroadcast {
            event: GameEvent::UpdatePlayer,
            player: Some(ParticipantState {
                id: PlayerId::new(4),
                character: CharacterSnapshot {
                    position: Vec3::new(1.0, 2.0, 3.0),
                    rotation: Vec3::new(0.0, 90.0, 0.0),
                    velocity: Vec3::new(-0.5, 0.0, 1.5),
                    dead: false,
                },
            }),
            winner: None,
        };
        let bytes = codec::encode(&msg).unwrap();
        let parsed: GameBroadcast = codec::decode(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_game_over_roundtrip() {
        let msg = GameBroadcast {
            event: GameEvent::GameOver,
            player: None,
            winner: Some(Winner::Seekers),
        };
        let bytes = codec::encode(&msg).unwrap();
        let parsed: GameBroadcast = codec::decode(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }
}
