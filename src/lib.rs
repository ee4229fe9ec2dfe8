//! # Manhunt Client
//!
//! Network client layer for Manhunt multiplayer sessions: a reliable TCP
//! control channel for session management, a UDP realtime channel for
//! per-tick entity replication, and a session manager that owns both.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Presentation layer                    │
//! │        (UI, character bodies, per-frame tick)           │
//! └───────────────┬─────────────────────────┬───────────────┘
//!                 │ operations              │ ReplicaUnit::tick
//! ┌───────────────▼─────────────────────────▼───────────────┐
//! │                        Session                          │
//! │   identity · lobby/match views · pump_events (single    │
//! │   writer: broadcasts apply here, nowhere else)          │
//! └───────┬─────────────────────────────────────────┬───────┘
//!         │ request/response                        │ handshake,
//!         │                                         │ publish, receive
//! ┌───────▼───────────────┐             ┌───────────▼───────┐
//! │    ControlChannel     │             │  RealtimeChannel  │
//! │  TCP, framed, serial, │             │  UDP, lossy, one  │
//! │  poisons on bad frame │             │  socket / binding │
//! └───────────────────────┘             └───────────────────┘
//! ```
//!
//! Wire framing on both channels is `[opcode u8][length u32 LE][payload]`
//! for outbound calls; payloads are bincode. Broadcast datagrams are bare
//! payloads decoded per the current binding (lobby vs. match).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::Vec3;
pub use game::{
    CharacterSnapshot, EntityBody, Lobby, LobbyId, MatchId, MatchState, ParticipantState,
    PlayerId, ReplicaUnit, TickOutcome, Winner,
};
pub use network::{
    ChannelError, Notification, Session, SessionConfig, SessionError, SessionPhase,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default control channel port.
pub const DEFAULT_TCP_PORT: u16 = 23455;

/// Default realtime channel port.
pub const DEFAULT_UDP_PORT: u16 = 23456;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config_uses_default_ports() {
        let config = SessionConfig::default();
        assert_eq!(config.tcp_port, DEFAULT_TCP_PORT);
        assert_eq!(config.udp_port, DEFAULT_UDP_PORT);
    }
}
