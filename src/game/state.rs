//! Game State Definitions
//!
//! Local mirror of the server-side session model: lobbies awaiting a match,
//! and the match itself with one replicated participant state per player.
//! Uses BTreeMap for stable iteration order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::vec3::Vec3;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique player identifier, assigned by the server on login.
///
/// Implements Ord for BTreeMap keying.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// Create from the raw server-assigned value.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw numeric value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lobby identifier.
pub type LobbyId = u32;

/// Match identifier.
pub type MatchId = u32;

// =============================================================================
// CHARACTER SNAPSHOT
// =============================================================================

/// Replicated physical state of one character for one tick.
///
/// Pure value type: snapshots are copied wholesale on every update, never
/// merged field-by-field.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    /// World position.
    pub position: Vec3,
    /// Orientation as Euler angles (degrees).
    pub rotation: Vec3,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Whether the character has been caught/eliminated.
    pub dead: bool,
}

impl CharacterSnapshot {
    /// Snapshot at the origin, alive and at rest.
    pub fn at_rest(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

// =============================================================================
// PARTICIPANT STATE
// =============================================================================

/// One participant's identifier plus its latest replicated snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    /// The participant's player id.
    pub id: PlayerId,
    /// Latest replicated character state.
    pub character: CharacterSnapshot,
}

impl ParticipantState {
    /// Create a participant with a default (alive, at-origin) snapshot.
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            character: CharacterSnapshot::default(),
        }
    }
}

// =============================================================================
// LOBBY
// =============================================================================

/// A pre-match grouping of players awaiting the lead to start a match.
///
/// Created by a successful create-lobby call, mutated only by join/leave
/// broadcasts, and discarded on a destroy broadcast or a local leave.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lobby {
    /// Lobby identifier.
    pub id: LobbyId,
    /// The lead player, allowed to start the match.
    pub lead: PlayerId,
    /// Current members, lead included.
    pub players: Vec<PlayerId>,
    /// Current member count.
    pub cur_people: u32,
    /// Maximum member count.
    pub max_people: u32,
}

impl Lobby {
    /// Whether the lobby has reached capacity.
    pub fn is_full(&self) -> bool {
        self.cur_people >= self.max_people
    }

    /// Whether `player` is a member.
    pub fn contains(&self, player: PlayerId) -> bool {
        self.players.iter().any(|p| *p == player)
    }

    /// Whether the member list agrees with the counters and stays within
    /// capacity. Inconsistent roster broadcasts are dropped by the session.
    pub fn is_consistent(&self) -> bool {
        self.players.len() as u32 == self.cur_people && self.cur_people <= self.max_people
    }
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Which side won a finished match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    /// The seeker caught everyone before the timer expired.
    Seekers,
    /// At least one hider survived the full match duration.
    Hiders,
}

/// The local mirror of one in-progress match.
///
/// The participant mapping is fixed at creation; only snapshots and liveness
/// change afterwards, driven by broadcasts and local publishes.
#[derive(Clone, Debug)]
pub struct MatchState {
    /// Match identifier.
    pub id: MatchId,
    /// All participants, keyed by player id.
    pub players: BTreeMap<PlayerId, ParticipantState>,
    /// False once a game-over broadcast has been applied.
    pub in_progress: bool,
    /// End-of-match outcome, set together with `in_progress = false`.
    pub outcome: Option<Winner>,
}

impl MatchState {
    /// Create a match from the lobby roster at start time.
    pub fn new(id: MatchId, roster: impl IntoIterator<Item = PlayerId>) -> Self {
        let players = roster
            .into_iter()
            .map(|p| (p, ParticipantState::new(p)))
            .collect();
        Self {
            id,
            players,
            in_progress: true,
            outcome: None,
        }
    }

    /// Latest snapshot for `player`, if they are part of this match.
    pub fn participant(&self, player: PlayerId) -> Option<&ParticipantState> {
        self.players.get(&player)
    }

    /// Replace one participant's snapshot wholesale.
    ///
    /// Updates for ids outside the fixed roster are ignored and reported as
    /// `false`.
    pub fn apply_update(&mut self, update: ParticipantState) -> bool {
        match self.players.get_mut(&update.id) {
            Some(existing) => {
                existing.character = update.character;
                true
            }
            None => false,
        }
    }

    /// Record the end of the match.
    pub fn finish(&mut self, winner: Winner) {
        self.in_progress = false;
        self.outcome = Some(winner);
    }

    /// Number of participants still alive.
    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| !p.character.dead).count()
    }
}
