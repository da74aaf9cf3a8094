//! `realm_shared`
//!
//! The world simulation of a tile-based multiplayer realm, independent of
//! any transport.
//!
//! Design goals:
//! - One owner of all state (`World`), mutated only from the tick.
//! - Spatial partitioning into regions so visibility work stays local.
//! - Typed events out, abstract packets to a sink; no sockets in the core.
//! - Traits at the seams (damage model, aggro policy, game hooks, packet sink).
//! - No `unsafe`.

pub mod combat;
pub mod config;
pub mod entity;
pub mod event;
pub mod grid;
pub mod hooks;
pub mod intent;
pub mod map;
pub mod net;
pub mod packet;
pub mod position;
pub mod region;
pub mod world;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::combat::{AggroPolicy, AttackError, DamageModel, Initiator};
    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::event::*;
    pub use crate::hooks::*;
    pub use crate::intent::*;
    pub use crate::map::*;
    pub use crate::packet::*;
    pub use crate::position::*;
    pub use crate::world::{MoveError, World};
}
