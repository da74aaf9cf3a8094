//! `realm_server`
//!
//! Server-side systems:
//! - Fixed-step tick scheduler and the realm driver running the phases
//! - Event dispatcher turning world events into packets and hook calls
//! - Per-connection sessions (cheat score, lights, dialogue, pets)
//! - TCP server and console
//!
//! Networking model:
//! - TCP with length-prefixed JSON frames
//! - Connection tasks only enqueue commands; the tick owns all state

pub mod handler;
pub mod realm;
pub mod scheduler;
pub mod server;
pub mod session;

pub use realm::Realm;
pub use server::GameServer;
