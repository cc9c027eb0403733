//! Datagram transport over a Tokio UDP socket.
//!
//! A background task reads datagrams through `UdpFramed` and hands them to
//! [`UdpTransport::poll_inbound_events`] via an unbounded channel, so polling
//! never blocks. Sends use `try_send_to` and report a full socket buffer as a
//! transport error instead of waiting.
//!
//! Datagrams from an unknown address register a new peer and produce a
//! `Connected` event ahead of the message itself. Peers start without a
//! session token; the connection protocol negotiates one. Once
//! `max_peers` peers are known, datagrams from further addresses are dropped
//! until a peer disconnects.

use crate::config::TransportConfig;
use crate::core::codec::DatagramCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::RawEvent;
use crate::transport::{Peer, PeerHandle, PeerId, Transport};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default)]
struct PeerTable {
    by_id: HashMap<PeerId, Arc<Peer>>,
    by_addr: HashMap<SocketAddr, PeerId>,
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    peers: RwLock<PeerTable>,
    next_peer: AtomicU64,
    pending: Mutex<VecDeque<RawEvent>>,
    datagrams: Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
    receiver: JoinHandle<()>,
    max_packet_size: usize,
    max_peers: usize,
}

impl UdpTransport {
    /// Bind the socket and start the receive task. Must run inside a Tokio runtime.
    #[instrument(skip(config), fields(bind = %config.bind_address))]
    pub async fn bind(config: &TransportConfig) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_address).await?);
        let local_addr = socket.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(receive_loop(
            socket.clone(),
            DatagramCodec::new(config.max_packet_size),
            tx,
        ));
        info!(%local_addr, "UDP transport listening");

        Ok(Self {
            socket,
            local_addr,
            peers: RwLock::new(PeerTable::default()),
            next_peer: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            datagrams: Mutex::new(rx),
            receiver,
            max_packet_size: config.max_packet_size,
            max_peers: config.max_peers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a remote endpoint we want to talk to.
    pub fn add_peer(&self, address: SocketAddr) -> Result<PeerHandle> {
        let mut table = self.peers.write().map_err(|_| ProtocolError::LockPoisoned)?;
        if let Some(peer) = table.by_addr.get(&address).and_then(|id| table.by_id.get(id)) {
            return Ok(peer.handle());
        }
        if table.by_id.len() >= self.max_peers {
            return Err(ProtocolError::TransportError(
                constants::ERR_PEER_TABLE_FULL.to_string(),
            ));
        }
        let handle = self.register(&mut table, address);
        drop(table);
        self.push_pending(RawEvent::connected(handle.clone()));
        Ok(handle)
    }

    /// Forget a peer and queue its `Disconnected` event.
    pub fn disconnect(&self, id: PeerId) -> Result<()> {
        let peer = {
            let mut table = self.peers.write().map_err(|_| ProtocolError::LockPoisoned)?;
            let peer = table.by_id.remove(&id).ok_or(ProtocolError::UnknownPeer(id))?;
            table.by_addr.remove(&peer.address());
            peer
        };
        peer.mark_disconnected();
        self.push_pending(RawEvent::disconnected(peer.handle()));
        info!(peer = %id, address = %peer.address(), "Peer disconnected");
        Ok(())
    }

    fn register(&self, table: &mut PeerTable, address: SocketAddr) -> PeerHandle {
        let id = PeerId::new(self.next_peer.fetch_add(1, Ordering::Relaxed) + 1);
        let peer = Arc::new(Peer::new(id, address));
        let handle = peer.handle();
        table.by_addr.insert(address, id);
        table.by_id.insert(id, peer);
        info!(peer = %id, %address, "Peer registered");
        handle
    }

    fn push_pending(&self, event: RawEvent) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    fn address_of(&self, id: PeerId) -> Result<SocketAddr> {
        let table = self.peers.read().map_err(|_| ProtocolError::LockPoisoned)?;
        match table.by_id.get(&id) {
            Some(peer) if peer.is_connected() => Ok(peer.address()),
            Some(_) => Err(ProtocolError::PeerDisconnected(id)),
            None => Err(ProtocolError::UnknownPeer(id)),
        }
    }
}

impl Transport for UdpTransport {
    fn send(&self, peer: PeerId, data: &[u8], _reliable: bool) -> Result<()> {
        if data.len() > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket(data.len()));
        }
        let address = self.address_of(peer)?;
        match self.socket.try_send_to(data, address) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(
                ProtocolError::TransportError(constants::ERR_SEND_WOULD_BLOCK.to_string()),
            ),
            Err(e) => Err(ProtocolError::Io(e)),
        }
    }

    fn poll_inbound_events(&self) -> Vec<RawEvent> {
        let mut events: Vec<RawEvent> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let mut datagrams = self.datagrams.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        while let Ok((packet, from)) = datagrams.try_recv() {
            let known = table
                .by_addr
                .get(&from)
                .and_then(|id| table.by_id.get(id))
                .map(|peer| peer.handle());
            let handle = match known {
                Some(handle) => handle,
                None if table.by_id.len() >= self.max_peers => {
                    warn!(%from, max_peers = self.max_peers, "Peer table full, datagram dropped");
                    continue;
                }
                None => {
                    let handle = self.register(&mut table, from);
                    events.push(RawEvent::connected(handle.clone()));
                    handle
                }
            };
            events.push(RawEvent::message(handle, packet));
        }
        events
    }

    fn peers(&self) -> Vec<PeerHandle> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .values()
            .map(Peer::handle)
            .collect()
    }

    fn peer(&self, id: PeerId) -> Option<PeerHandle> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&id)
            .map(Peer::handle)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    codec: DatagramCodec,
    tx: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
) {
    let mut framed = UdpFramed::new(socket, codec);
    while let Some(item) = framed.next().await {
        match item {
            Ok((packet, from)) => {
                debug!(bytes = packet.len(), %from, "Datagram received");
                if tx.send((packet, from)).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Datagram rejected"),
        }
    }
    debug!("UDP receive loop finished");
}
