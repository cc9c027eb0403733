//! Inbound event validation and routing.
//!
//! An event is validated and its set of interested protocols resolved once,
//! when it is handed to the manager. Delivery happens later, on the
//! asynchronous cycle, against that fixed set: a protocol started in between
//! never sees the event, one that has terminated in between is skipped.

use crate::core::message::{read_token, split_category};
use crate::error::{ProtocolError, Result};
use crate::manager::record::ProtocolRecord;
use crate::protocol::{
    EventKind, InboundEvent, ProtocolCategory, ProtocolContext, ProtocolId, ProtocolState,
    RawEvent,
};

/// An accepted event waiting for delivery
pub(crate) struct PendingEvent {
    pub(crate) event: InboundEvent,
    pub(crate) remaining: Vec<ProtocolId>,
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered { consumed: bool },
    /// Target is paused; try again on a later cycle
    Deferred,
    /// Target terminated after the event was queued
    Gone,
}

/// Turn a transport event into a routed event, applying the frame and token
/// checks to messages.
pub(crate) fn validate(raw: RawEvent) -> Result<InboundEvent> {
    match raw.kind {
        EventKind::Message => {
            let (category, frame) = split_category(&raw.data)?;
            let token = read_token(&frame)?;
            let peer = raw
                .peer
                .upgrade()
                .ok_or(ProtocolError::PeerDisconnected(raw.peer.id()))?;
            peer.verify_token(token)?;
            Ok(InboundEvent::new(
                EventKind::Message,
                raw.peer,
                Some(category),
                frame,
            ))
        }
        kind => Ok(InboundEvent::new(kind, raw.peer, None, raw.data)),
    }
}

/// Ids of the active protocols an event is addressed to.
///
/// Messages go to protocols of the message's category; connect and
/// disconnect notifications go to everybody. `Silent` protocols get nothing.
pub(crate) fn interested<'a>(
    records: impl IntoIterator<Item = &'a ProtocolRecord>,
    kind: EventKind,
    category: Option<ProtocolCategory>,
) -> Vec<ProtocolId> {
    records
        .into_iter()
        .filter(|record| record.category.receives_events())
        .filter(|record| record.state().is_active())
        .filter(|record| kind != EventKind::Message || Some(record.category) == category)
        .map(|record| record.id)
        .collect()
}

/// Hand an event to one protocol if it is running.
pub(crate) fn deliver(
    record: &ProtocolRecord,
    ctx: &ProtocolContext,
    event: &InboundEvent,
) -> Delivery {
    let mut protocol = record.slot.lock();
    match record.slot.state() {
        ProtocolState::Running => Delivery::Delivered {
            consumed: protocol.on_event(ctx, event),
        },
        ProtocolState::Initializing | ProtocolState::Paused => Delivery::Deferred,
        ProtocolState::Terminated => Delivery::Gone,
    }
}
