//! Game model: lobby and match state plus per-entity replication.

pub mod replication;
pub mod state;

// Re-export game types
pub use replication::{EntityBody, ReplicaUnit, TickOutcome};
pub use state::{
    CharacterSnapshot, Lobby, LobbyId, MatchId, MatchState, ParticipantState, PlayerId, Winner,
};
