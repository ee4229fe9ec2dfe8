//! Entity Replication
//!
//! Per-entity glue between the presentation layer's character bodies and the
//! network session. Each participant in a match owns one [`ReplicaUnit`];
//! exactly one of them (the local player) is the publishing authority, all
//! others mirror server broadcasts.

use tracing::debug;

use crate::game::state::{CharacterSnapshot, PlayerId};
use crate::network::session::{Session, SessionError};

/// A character body the replication layer can read from and write to.
///
/// Implemented by whatever the presentation layer uses for characters; tests
/// use a plain struct holding a snapshot.
pub trait EntityBody {
    /// Capture the body's current replicated state.
    fn snapshot(&self) -> CharacterSnapshot;

    /// Overwrite the body's state with a received snapshot.
    fn apply(&mut self, snapshot: &CharacterSnapshot);
}

/// What the owner of a [`ReplicaUnit`] should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking this unit.
    Keep,
    /// Remove the unit (and its body) from the scene.
    Despawn,
}

/// Replication driver for one participant's entity.
#[derive(Debug)]
pub struct ReplicaUnit {
    player_id: PlayerId,
    locally_owned: bool,
}

impl ReplicaUnit {
    /// Unit for the locally controlled character. Publishes on every tick.
    pub fn owned(player_id: PlayerId) -> Self {
        Self {
            player_id,
            locally_owned: true,
        }
    }

    /// Unit mirroring a remote participant. Never publishes.
    pub fn remote(player_id: PlayerId) -> Self {
        Self {
            player_id,
            locally_owned: false,
        }
    }

    /// The participant this unit replicates.
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Whether this unit is the publishing authority for its entity.
    pub fn is_locally_owned(&self) -> bool {
        self.locally_owned
    }

    /// Advance replication by one tick.
    ///
    /// Owned units publish the body's snapshot; a dead snapshot is still
    /// published so the server learns of the elimination, and once that
    /// publish completes the unit removes itself. Remote units copy the
    /// latest broadcast snapshot into the body and request despawn once it
    /// reports dead. Any unit asks to despawn when the match itself is gone.
    pub async fn tick(
        &mut self,
        session: &mut Session,
        body: &mut dyn EntityBody,
    ) -> Result<TickOutcome, SessionError> {
        if session.match_state().is_none() {
            return Ok(TickOutcome::Despawn);
        }

        if self.locally_owned {
            let snapshot = body.snapshot();
            session.publish_local_state(snapshot).await?;
            if snapshot.dead {
                debug!(player = %self.player_id, "local entity eliminated after final publish");
                return Ok(TickOutcome::Despawn);
            }
            Ok(TickOutcome::Keep)
        } else {
            let Some(state) = session
                .match_state()
                .and_then(|m| m.participant(self.player_id))
            else {
                return Ok(TickOutcome::Despawn);
            };
            let snapshot = state.character;
            body.apply(&snapshot);
            if snapshot.dead {
                debug!(player = %self.player_id, "remote entity eliminated");
                return Ok(TickOutcome::Despawn);
            }
            Ok(TickOutcome::Keep)
        }
    }
}
