//! Core value primitives.
//!
//! Shared plain-data types used by both the game model and the wire protocol.

pub mod vec3;

// Re-export core types
pub use vec3::Vec3;
