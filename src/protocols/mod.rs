//! # Built-in Protocols
//!
//! Protocols shipped with the crate. They double as reference
//! implementations of the [`Protocol`](crate::protocol::Protocol) trait.

pub mod game_events;

pub use game_events::{GameEvent, GameEventsProtocol, ItemPicked, ITEM_PICKED};
