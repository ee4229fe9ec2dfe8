//! Networking: wire schemas, both transport channels, and the session
//! manager that owns them.

pub mod codec;
pub mod control;
pub mod protocol;
pub mod realtime;
pub mod session;

// Re-export network types
pub use codec::CodecError;
pub use control::{ChannelError, ControlChannel};
pub use protocol::{ControlOp, GameBroadcast, LobbyBroadcast, RealtimeOp};
pub use realtime::{RealtimeChannel, RecvOutcome};
pub use session::{
    Notification, Session, SessionConfig, SessionError, SessionEvent, SessionPhase,
};
