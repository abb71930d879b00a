//! Mesh gossip protocol: per-device packet ingestion, announce scheduling,
//! the peer table, and the confirmed-edge mesh graph used for route
//! queries.
//!
//! Duplicate suppression uses the same bounded-FIFO-plus-lookup-set shape
//! as everything else in this codebase that needs a "recently seen"
//! window (the link's packet queue, the connection manager's eviction
//! order): a `VecDeque` for ordering and a `HashSet` mirroring its
//! contents for O(1) membership tests.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::codec::{self, fingerprint, to_hex, MessageType, Packet, PEER_ID_LEN};

/// How many distinct packet fingerprints each device remembers before the
/// oldest is evicted.
pub const SEEN_SET_CAPACITY: usize = 1000;
/// Interval between a device's own `ANNOUNCE` broadcasts.
pub const ANNOUNCE_INTERVAL_MS: u64 = 5000;

/// What happened to a packet as it passed through [`MeshApp::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Already seen; dropped without further processing.
    Duplicate,
    /// Originated by this device somehow looping back; dropped.
    SelfLoop,
    /// Processed. `deliver` holds an application payload addressed to this
    /// device or broadcast; `relay` holds a TTL-decremented copy to
    /// forward to every link other than the one it arrived on, if its TTL
    /// hadn't already reached zero. `graph_update` carries a decoded
    /// announce's (sender, announced neighbors) pair, for the caller to
    /// fold into a global [`MeshGraph`].
    Processed { deliver: Option<Packet>, relay: Option<Packet>, graph_update: Option<([u8; PEER_ID_LEN], Vec<[u8; PEER_ID_LEN]>)> },
}

/// What a remote device told us about itself, last time it announced.
///
/// `is_direct` holds iff the link-layer neighbor that physically handed us
/// the announce *is* its sender (no relay in between); `hops` is
/// `MAX_TTL - ttl` at the moment the announce arrived here.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: [u8; PEER_ID_LEN],
    pub nickname: String,
    pub last_seen_ms: u64,
    pub is_direct: bool,
    pub hops: u8,
}

/// Peer table keyed by hex-encoded peer id.
#[derive(Debug, Clone, Default)]
pub struct PeerManager {
    peers: HashMap<String, PeerInfo>,
}

impl PeerManager {
    pub fn new() -> PeerManager {
        PeerManager::default()
    }

    /// Replace (not merge) what we know about a peer with its latest
    /// announcement — an announce is a full snapshot of the sender's
    /// state, not an incremental update.
    pub fn upsert(&mut self, id: [u8; PEER_ID_LEN], nickname: String, now_ms: u64, is_direct: bool, hops: u8) {
        let key = to_hex(&id);
        self.peers.insert(
            key,
            PeerInfo {
                id,
                nickname,
                last_seen_ms: now_ms,
                is_direct,
                hops,
            },
        );
    }

    pub fn remove(&mut self, id: &[u8; PEER_ID_LEN]) {
        self.peers.remove(&to_hex(id));
    }

    pub fn get(&self, id: &[u8; PEER_ID_LEN]) -> Option<&PeerInfo> {
        self.peers.get(&to_hex(id))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.values()
    }
}

/// Graph of who-announced-whom-as-a-neighbor, and the derived subgraph of
/// symmetrically-confirmed edges.
///
/// An edge `(A, B)` is "confirmed" only when both A announced B as a
/// direct neighbor *and* B announced A — one-sided claims (A can hear B
/// but B never heard back) never appear in `confirmed_edges`.
#[derive(Debug, Clone, Default)]
pub struct MeshGraph {
    /// Each node's most recently announced neighbor set, replaced (not
    /// merged) on every new announce.
    announced: HashMap<String, HashSet<String>>,
}

impl MeshGraph {
    pub fn new() -> MeshGraph {
        MeshGraph::default()
    }

    /// Record `sender`'s latest announced neighbor list, replacing
    /// whatever was previously recorded for it.
    pub fn update_neighbors(&mut self, sender: [u8; PEER_ID_LEN], neighbors: &[[u8; PEER_ID_LEN]]) {
        let key = to_hex(&sender);
        let set: HashSet<String> = neighbors.iter().map(|n| to_hex(n)).collect();
        self.announced.insert(key, set);
    }

    pub fn remove_node(&mut self, id: &[u8; PEER_ID_LEN]) {
        let key = to_hex(id);
        self.announced.remove(&key);
        for neighbors in self.announced.values_mut() {
            neighbors.remove(&key);
        }
    }

    /// Canonical sorted-id edges where both endpoints announced the other.
    pub fn confirmed_edges(&self) -> Vec<(String, String)> {
        let mut edges = HashSet::new();
        for (a, neighbors) in &self.announced {
            for b in neighbors {
                if self.announced.get(b).is_some_and(|back| back.contains(a)) {
                    let edge = if a < b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
                    edges.insert(edge);
                }
            }
        }
        let mut edges: Vec<_> = edges.into_iter().collect();
        edges.sort();
        edges
    }

    fn confirmed_adjacency(&self) -> HashMap<String, Vec<String>> {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for (a, b) in self.confirmed_edges() {
            adjacency.entry(a.clone()).or_default().push(b.clone());
            adjacency.entry(b).or_default().push(a);
        }
        adjacency
    }

    /// Shortest hop-count path between two hex-encoded peer ids over
    /// confirmed edges only, via breadth-first search.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let adjacency = self.confirmed_adjacency();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut came_from: HashMap<String, String> = HashMap::new();

        visited.insert(from.to_string());
        queue.push_back(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.clone()];
                let mut cursor = current;
                while let Some(prev) = came_from.get(&cursor) {
                    path.push(prev.clone());
                    cursor = prev.clone();
                }
                path.reverse();
                return Some(path);
            }
            if let Some(neighbors) = adjacency.get(&current) {
                for next in neighbors {
                    if visited.insert(next.clone()) {
                        came_from.insert(next.clone(), current.clone());
                        queue.push_back(next.clone());
                    }
                }
            }
        }
        None
    }
}

/// Per-device mesh application state: dedup window, peer table, announce
/// scheduling.
pub struct MeshApp {
    pub device_id: [u8; PEER_ID_LEN],
    pub nickname: String,
    seen_order: VecDeque<String>,
    seen_set: HashSet<String>,
    pub peers: PeerManager,
    pub next_announce_due_ms: u64,
}

impl MeshApp {
    pub fn new(device_id: [u8; PEER_ID_LEN], nickname: String) -> MeshApp {
        MeshApp {
            device_id,
            nickname,
            seen_order: VecDeque::new(),
            seen_set: HashSet::new(),
            peers: PeerManager::new(),
            next_announce_due_ms: 0,
        }
    }

    fn remember(&mut self, fp: String) {
        if self.seen_order.len() >= SEEN_SET_CAPACITY {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen_set.remove(&oldest);
            }
        }
        self.seen_set.insert(fp.clone());
        self.seen_order.push_back(fp);
    }

    fn has_seen(&self, fp: &str) -> bool {
        self.seen_set.contains(fp)
    }

    /// Whether it's time to emit another `ANNOUNCE`; if so, reschedules
    /// the next one [`ANNOUNCE_INTERVAL_MS`] later.
    pub fn due_for_announce(&mut self, now_ms: u64) -> bool {
        if now_ms < self.next_announce_due_ms {
            return false;
        }
        self.next_announce_due_ms = now_ms + ANNOUNCE_INTERVAL_MS;
        true
    }

    /// Build this device's own `ANNOUNCE` packet, advertising its nickname
    /// and direct neighbor list.
    pub fn build_announce(&self, timestamp_ms: u64, direct_neighbors: &[[u8; PEER_ID_LEN]]) -> Packet {
        let payload = codec::encode_announce_payload(&self.nickname, direct_neighbors);
        Packet {
            version: 2,
            message_type: MessageType::Announce,
            ttl: codec::MAX_TTL,
            timestamp: timestamp_ms,
            sender_id: self.device_id,
            recipient_id: None,
            payload,
            signature: None,
            route: None,
        }
    }

    /// Mark a just-built, self-originated packet as already seen, so it is
    /// dropped as a duplicate if it ever loops back through the mesh.
    pub fn mark_self_seen(&mut self, packet: &Packet) {
        self.remember(fingerprint(packet));
    }

    /// Process an incoming packet that physically arrived from
    /// `from_peer`'s radio, mirroring the duplicate → self-loop →
    /// interpret → decrement-and-relay pipeline. `from_peer` is whichever
    /// neighbor handed us the packet on this hop — it equals
    /// `packet.sender_id` only when the packet has not been relayed, which
    /// is what makes a peer's `is_direct` flag meaningful.
    pub fn ingest(&mut self, packet: &Packet, from_peer: &[u8; PEER_ID_LEN], now_ms: u64) -> IngestOutcome {
        let fp = fingerprint(packet);
        if self.has_seen(&fp) {
            return IngestOutcome::Duplicate;
        }
        self.remember(fp);

        if packet.sender_id == self.device_id {
            return IngestOutcome::SelfLoop;
        }

        let mut deliver = None;
        let mut graph_update = None;

        match packet.message_type {
            MessageType::Announce => {
                let nickname = codec::decode_nickname(&packet.payload).unwrap_or_default();
                let neighbors = codec::decode_neighbors(&packet.payload);
                let is_direct = from_peer == &packet.sender_id;
                let hops = codec::MAX_TTL.saturating_sub(packet.ttl);
                self.peers.upsert(packet.sender_id, nickname, now_ms, is_direct, hops);
                let filtered: Vec<_> = neighbors.into_iter().filter(|n| *n != packet.sender_id).collect();
                graph_update = Some((packet.sender_id, filtered));
            }
            MessageType::Message => {
                let addressed_to_me = packet.recipient_id.map(|r| r == self.device_id).unwrap_or(false);
                if packet.is_broadcast() || addressed_to_me {
                    deliver = Some(packet.clone());
                }
            }
            _ => {}
        }

        // A packet explicitly addressed to us is consumed here, not passed
        // on; broadcasts and traffic for others keep flowing.
        let explicit_unicast_to_me = packet.recipient_id == Some(self.device_id) && !packet.is_broadcast();
        let relay = if packet.ttl <= 1 || explicit_unicast_to_me {
            None
        } else {
            let mut forwarded = packet.clone();
            forwarded.ttl -= 1;
            Some(forwarded)
        };

        IngestOutcome::Processed { deliver, relay, graph_update }
    }
}
