//! In-game event relay.
//!
//! Tells every peer when a player collects an item, and turns the same
//! notifications coming from other peers into [`GameEvent`]s for the
//! embedding game.
//!
//! ## Message Format
//! ```text
//! [Marker(1)] [Token BE(4)] [Type = 0x01 (1)] [ItemId BE(4)] [Powerup(1)] [PlayerId(1)]
//! ```

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::{EventKind, InboundEvent, Protocol, ProtocolCategory, ProtocolContext};
use crate::transport::PeerId;
use bytes::{Buf, BufMut, BytesMut};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Message type: an item was picked up
pub const ITEM_PICKED: u8 = 0x01;

/// Payload of an [`ITEM_PICKED`] message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemPicked {
    pub item_id: u32,
    /// Game-defined encoding of what the kart received
    pub powerup: u8,
    pub player_id: u8,
}

impl ItemPicked {
    pub const ENCODED_LEN: usize = 6;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        buf.put_u32(self.item_id);
        buf.put_u8(self.powerup);
        buf.put_u8(self.player_id);
        buf
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::ENCODED_LEN {
            return Err(ProtocolError::Undersized {
                len: payload.len(),
                min: Self::ENCODED_LEN,
            });
        }
        Ok(Self {
            item_id: payload.get_u32(),
            powerup: payload.get_u8(),
            player_id: payload.get_u8(),
        })
    }
}

/// Something that happened in another peer's game
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    ItemPicked { peer: PeerId, item: ItemPicked },
}

/// Relays game events between peers.
pub struct GameEventsProtocol {
    sink: mpsc::UnboundedSender<GameEvent>,
}

impl GameEventsProtocol {
    /// Create the protocol together with the receiver its decoded events
    /// are forwarded to.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GameEvent>) {
        let (sink, events) = mpsc::unbounded_channel();
        (Self { sink }, events)
    }

    /// Notify every peer that a local player collected an item.
    ///
    /// Each peer gets its own copy framed with its session token; peers
    /// without a token are skipped. Returns how many peers were reached.
    pub fn collected_item(ctx: &ProtocolContext, item: ItemPicked) -> Result<usize> {
        let reached = ctx.send_to_peers_with_token(ITEM_PICKED, &item.encode())?;
        info!(
            item_id = item.item_id,
            powerup = item.powerup,
            peers = reached,
            "Notified peers that an item was collected"
        );
        Ok(reached)
    }

    fn handle_message(&self, event: &InboundEvent) -> Result<()> {
        let message = event.message()?;
        match message.message_type {
            ITEM_PICKED => {
                let item = ItemPicked::decode(&message.payload)?;
                info!(
                    peer = %event.peer_id(),
                    item_id = item.item_id,
                    powerup = item.powerup,
                    "Item picked by a player"
                );
                // The receiver going away only means nobody listens any more
                let _ = self.sink.send(GameEvent::ItemPicked {
                    peer: event.peer_id(),
                    item,
                });
                Ok(())
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl Protocol for GameEventsProtocol {
    fn category(&self) -> ProtocolCategory {
        ProtocolCategory::GameEvents
    }

    fn update(&mut self, _ctx: &ProtocolContext, _delta: Duration) {}

    fn on_event(&mut self, _ctx: &ProtocolContext, event: &InboundEvent) -> bool {
        if event.kind() != EventKind::Message {
            return true;
        }
        if let Err(e) = self.handle_message(event) {
            match e {
                ProtocolError::UnknownMessageType(kind) => {
                    warn!(peer = %event.peer_id(), kind, "{}", constants::ERR_UNKNOWN_TYPE)
                }
                e => warn!(peer = %event.peer_id(), error = %e, "Too short game event message"),
            }
        }
        true
    }
}
