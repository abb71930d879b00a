//! The simulation engine: owns every agent, link, and device, and drives
//! them forward one tick at a time on a single cooperative thread.
//!
//! `Engine::step` is plain synchronous code — no `async`, no task
//! scheduler, no suspension points; a single-threaded, fully
//! deterministic tick is required, so everything runs inline on the
//! caller's thread. Event bus, structured logging, and bounded
//! collections still follow the idioms used everywhere else in this
//! codebase.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::agent::Agent;
use crate::codec::{Packet, PEER_ID_LEN};
use crate::config::SimulatorConfig;
use crate::device::{Device, PowerMode};
use crate::environment::Environment;
use crate::event_bus::{Event, EventBus};
use crate::geometry::Point;
use crate::link::Link;
use crate::log_manager::{LogCategory, LogLevel, LogManager};
use crate::mesh::{IngestOutcome, MeshApp, MeshGraph};
use crate::pathfinder::PathFinder;
use crate::spatial_index::SpatialIndex;

/// Distance at which two agents form a new link.
pub const CONNECT_RADIUS_M: f64 = 100.0;
/// Distance beyond which an existing link is torn down, distinct from
/// `CONNECT_RADIUS_M` to give the connection hysteresis (agents
/// oscillating right at 100m don't flap the link on and off every tick).
pub const BREAK_RADIUS_M: f64 = 110.0;

/// Deterministically derive an 8-byte peer id from an agent id string.
/// `DefaultHasher::new()` uses fixed SipHash keys (unlike `HashMap`'s
/// per-process `RandomState`), so this is stable across runs — it is a
/// naming convenience, not a source of simulated randomness.
fn derive_peer_id(agent_id: &str) -> [u8; PEER_ID_LEN] {
    let mut hasher = DefaultHasher::new();
    agent_id.hash(&mut hasher);
    hasher.finish().to_be_bytes()
}

struct ManagedLink {
    link: Link,
    marked_for_teardown: bool,
}

/// Owns the whole simulation state and advances it tick by tick.
pub struct Engine {
    pub agents: Vec<Agent>,
    pub devices: Vec<Device>,
    pub mesh_apps: Vec<MeshApp>,
    pub mesh_graph: MeshGraph,
    links: Vec<ManagedLink>,
    pub environment: Environment,
    spatial_index: SpatialIndex,
    pathfinder: PathFinder,
    pub event_bus: EventBus,
    pub log_manager: LogManager,
    pub rng: StdRng,
    pub config: SimulatorConfig,
    pub tick: u64,
    pub sim_time_ms: u64,
}

impl Engine {
    pub fn new(config: SimulatorConfig, environment: Environment) -> Engine {
        let rng = StdRng::seed_from_u64(config.seed);
        Engine {
            agents: Vec::new(),
            devices: Vec::new(),
            mesh_apps: Vec::new(),
            mesh_graph: MeshGraph::new(),
            links: Vec::new(),
            environment,
            spatial_index: SpatialIndex::new(),
            pathfinder: PathFinder::new(),
            event_bus: EventBus::new(),
            log_manager: LogManager::new(),
            rng,
            config,
            tick: 0,
            sim_time_ms: 0,
        }
    }

    /// Add a new agent with its associated device and mesh app, and emit
    /// `person_added`.
    pub fn add_agent(&mut self, id: String, position: Point, nickname: String, power_mode: PowerMode) {
        let peer_id = derive_peer_id(&id);
        let mut agent = Agent::new(id.clone(), position);
        agent.randomize_max_speed(&mut self.rng);
        self.agents.push(agent);
        self.devices.push(Device::new(peer_id, nickname.clone(), power_mode, &mut self.rng));
        self.mesh_apps.push(MeshApp::new(peer_id, nickname));
        self.event_bus.publish(Event::PersonAdded { agent_id: id });
    }

    pub fn remove_agent(&mut self, id: &str) {
        let Some(idx) = self.agents.iter().position(|a| a.id == id) else { return };
        let peer_id = self.devices[idx].id;

        // Drop this agent's links first: the surviving endpoint's
        // `ConnectionManager` must release the link id too, or it keeps
        // counting against that device's connection caps forever.
        let mut removed_links = Vec::new();
        self.links.retain(|l| {
            let touches = l.link.endpoint_a == id || l.link.endpoint_b == id;
            if touches {
                removed_links.push((l.link.id.clone(), l.link.endpoint_a.clone(), l.link.endpoint_b.clone()));
            }
            !touches
        });
        for (link_id, a, b) in &removed_links {
            if let Some(other_idx) = self.agents.iter().position(|agent| &agent.id == if a == id { b } else { a }) {
                self.devices[other_idx].connections.remove(link_id);
            }
            self.event_bus.publish(Event::ConnectionBroken { link_id: link_id.clone(), a: a.clone(), b: b.clone() });
        }

        self.agents.remove(idx);
        self.devices.remove(idx);
        self.mesh_apps.remove(idx);
        self.mesh_graph.remove_node(&peer_id);
        self.event_bus.publish(Event::PersonRemoved { agent_id: id.to_string() });
    }

    pub fn reset(&mut self) {
        self.agents.clear();
        self.devices.clear();
        self.mesh_apps.clear();
        self.mesh_graph = MeshGraph::new();
        self.links.clear();
        self.spatial_index = SpatialIndex::new();
        self.pathfinder = PathFinder::new();
        self.tick = 0;
        self.sim_time_ms = 0;
        self.event_bus.publish(Event::Reset);
    }

    pub fn load_environment(&mut self, environment: Environment) {
        let count = environment.buildings.len();
        self.environment = environment;
        self.event_bus.publish(Event::EnvironmentLoaded { building_count: count });
    }

    fn agent_index(&self, id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.id == id)
    }

    /// Compute a shortest path for an agent to `destination`, via the
    /// pathfinder's visibility graph over the current environment, and
    /// install it as the agent's movement target. Even when no route
    /// exists, the agent is still pointed straight at `destination` so it
    /// keeps making local progress rather than stopping outright; the
    /// return value tells the caller whether a real route was found.
    pub fn route_agent_to(&mut self, agent_id: &str, destination: Point) -> bool {
        let Some(idx) = self.agent_index(agent_id) else { return false };
        let start = self.agents[idx].position;
        let result = self.pathfinder.find_path(&self.environment, start, destination);
        let mut waypoints = result.waypoints;
        waypoints.remove(0); // first element is `start` itself
        let last = waypoints.pop().unwrap_or(destination);
        self.agents[idx].set_target(last, waypoints);
        result.found
    }

    /// Advance the whole simulation by `dt_s` seconds, in the exact order
    /// required: agent+device tick, RSSI recompute, link
    /// teardown, connectivity hysteresis, tick event.
    pub fn step(&mut self, dt_s: f64) {
        let dt_ms = (dt_s * 1000.0).round() as u64;
        self.sim_time_ms += dt_ms;
        self.tick += 1;

        self.tick_agents_and_devices(dt_s);
        self.update_connections_rssi(dt_ms);
        self.break_marked_links();
        self.update_connectivity();

        self.event_bus.publish(Event::Tick { tick: self.tick, sim_time_ms: self.sim_time_ms });
    }

    fn tick_agents_and_devices(&mut self, dt_s: f64) {
        for agent in &mut self.agents {
            agent.step(dt_s, self.sim_time_ms, &self.environment, self.config.features.stuck_recovery, &mut self.rng);
        }

        let positions: Vec<Point> = self.agents.iter().map(|a| a.position).collect();
        self.spatial_index.update_all(&positions);

        for (idx, device) in self.devices.iter_mut().enumerate() {
            device.tick_scan_schedule(self.sim_time_ms, &mut self.rng);

            let due = self.mesh_apps[idx].due_for_announce(self.sim_time_ms);
            if !due {
                continue;
            }
            let agent_id = self.agents[idx].id.clone();
            let link_ids: Vec<usize> = (0..self.links.len())
                .filter(|&li| {
                    let l = &self.links[li].link;
                    l.is_active && (l.endpoint_a == agent_id || l.endpoint_b == agent_id)
                })
                .collect();
            let direct_neighbors: Vec<[u8; PEER_ID_LEN]> = link_ids
                .iter()
                .filter_map(|&li| self.links[li].link.other_end(&agent_id))
                .filter_map(|other_id| self.agent_index(other_id))
                .map(|other_idx| self.devices[other_idx].id)
                .collect();
            let announce = self.mesh_apps[idx].build_announce(self.sim_time_ms, &direct_neighbors);
            self.mesh_apps[idx].mark_self_seen(&announce);
            for li in link_ids {
                self.links[li].link.send(announce.clone(), agent_id.clone(), self.sim_time_ms);
                let link_id = self.links[li].link.id.clone();
                let to = self.links[li].link.other_end(&agent_id).unwrap_or_default().to_string();
                self.event_bus.publish(Event::PacketTransmitted {
                    link_id,
                    from: agent_id.clone(),
                    to,
                    packet: announce.clone(),
                });
            }
        }
    }

    fn update_connections_rssi(&mut self, dt_ms: u64) {
        let dt_s = dt_ms as f64 / 1000.0;

        for managed in &mut self.links {
            let Some(a_idx) = self.agents.iter().position(|a| a.id == managed.link.endpoint_a) else { continue };
            let Some(b_idx) = self.agents.iter().position(|a| a.id == managed.link.endpoint_b) else { continue };
            let pos_a = self.agents[a_idx].position;
            let pos_b = self.agents[b_idx].position;
            let gain_a = self.devices[a_idx].antenna_gain_db();
            let gain_b = self.devices[b_idx].antenna_gain_db();

            let should_teardown =
                managed.link.update_rssi(dt_s, &self.environment, &pos_a, &pos_b, gain_a, gain_b, self.config.features.wall_attenuation, &mut self.rng);
            if should_teardown {
                managed.marked_for_teardown = true;
            }
        }

        // Drain delivered packets after RSSI updates, so a link that just
        // got torn down this tick still delivers whatever had already
        // arrived.
        let mut relays: Vec<(usize, Packet, String)> = Vec::new();
        let mut deliveries: Vec<(usize, Packet, String)> = Vec::new();

        for managed in &mut self.links {
            for (packet, sender_id) in managed.link.drain_ready(self.sim_time_ms) {
                let Some(receiver_id) = managed.link.other_end(&sender_id) else { continue };
                if let Some(dev_idx) = self.agents.iter().position(|a| a.id == receiver_id) {
                    deliveries.push((dev_idx, packet, sender_id));
                }
            }
        }

        for (dev_idx, packet, came_from_peer) in deliveries {
            let from_peer_id = self
                .agents
                .iter()
                .position(|a| a.id == came_from_peer)
                .map(|idx| self.devices[idx].id)
                .unwrap_or(packet.sender_id);
            let outcome = self.mesh_apps[dev_idx].ingest(&packet, &from_peer_id, self.sim_time_ms);
            match outcome {
                IngestOutcome::Processed { deliver, relay, graph_update } => {
                    if deliver.is_some() {
                        self.log_manager.log(
                            self.sim_time_ms,
                            LogLevel::Info,
                            LogCategory::Packet,
                            Some(self.agents[dev_idx].id.clone()),
                            "message delivered",
                            None,
                        );
                    }
                    if let Some((sender, neighbors)) = graph_update {
                        self.mesh_graph.update_neighbors(sender, &neighbors);
                    }
                    if let Some(relay_packet) = relay {
                        relays.push((dev_idx, relay_packet, came_from_peer));
                    }
                }
                IngestOutcome::Duplicate | IngestOutcome::SelfLoop => {}
            }
        }

        for (dev_idx, relay_packet, came_from_peer) in relays {
            let agent_id = self.agents[dev_idx].id.clone();
            let mut transmitted = Vec::new();
            for managed in &mut self.links {
                if !managed.link.is_active {
                    continue;
                }
                let touches_self = managed.link.endpoint_a == agent_id || managed.link.endpoint_b == agent_id;
                if !touches_self {
                    continue;
                }
                let Some(other) = managed.link.other_end(&agent_id) else { continue };
                // Split horizon: never relay back toward the peer we just
                // received this packet from.
                if other == came_from_peer.as_str() {
                    continue;
                }
                let other = other.to_string();
                managed.link.send(relay_packet.clone(), agent_id.clone(), self.sim_time_ms);
                transmitted.push((managed.link.id.clone(), other));
            }
            for (link_id, to) in transmitted {
                self.event_bus.publish(Event::PacketTransmitted {
                    link_id,
                    from: agent_id.clone(),
                    to,
                    packet: relay_packet.clone(),
                });
            }
        }
    }

    fn break_marked_links(&mut self) {
        let mut i = 0;
        while i < self.links.len() {
            if self.links[i].marked_for_teardown {
                let managed = self.links.remove(i);
                for (dev_idx, device) in self.devices.iter_mut().enumerate() {
                    if self.agents[dev_idx].id == managed.link.endpoint_a || self.agents[dev_idx].id == managed.link.endpoint_b {
                        device.connections.remove(&managed.link.id);
                    }
                }
                self.event_bus.publish(Event::ConnectionBroken {
                    link_id: managed.link.id,
                    a: managed.link.endpoint_a,
                    b: managed.link.endpoint_b,
                });
            } else {
                i += 1;
            }
        }
    }

    /// Check every existing link for the break radius, then use the
    /// spatial index to find only the candidate pairs within connect
    /// range for new-link formation — O(active links + N + k) rather than
    /// a full O(N^2) pairwise scan.
    fn update_connectivity(&mut self) {
        for idx in 0..self.links.len() {
            let Some(a_idx) = self.agent_index(&self.links[idx].link.endpoint_a) else { continue };
            let Some(b_idx) = self.agent_index(&self.links[idx].link.endpoint_b) else { continue };
            let distance = self.agents[a_idx].position.distance(&self.agents[b_idx].position);
            if distance > BREAK_RADIUS_M || !self.links[idx].link.is_active {
                self.links[idx].marked_for_teardown = true;
            }
        }

        let positions: Vec<Point> = self.agents.iter().map(|a| a.position).collect();
        let n = self.agents.len();
        for i in 0..n {
            let neighbor_candidates = self.spatial_index.neighbors(&positions[i], &positions, CONNECT_RADIUS_M);
            for j in neighbor_candidates {
                if j <= i {
                    continue;
                }
                let id_a = &self.agents[i].id;
                let id_b = &self.agents[j].id;
                let already_linked = self.links.iter().any(|l| (l.link.endpoint_a == *id_a && l.link.endpoint_b == *id_b) || (l.link.endpoint_a == *id_b && l.link.endpoint_b == *id_a));
                if already_linked {
                    continue;
                }
                self.try_form_link(i, j);
            }
        }
        self.break_marked_links();
    }

    /// Prefer the scanning side as initiator: (a) `i` scanning
    /// and can accept a client while `j` can accept a server; else (b) the
    /// symmetric case with `j` scanning. No link forms if neither side is
    /// scanning, or the preferred pairing can't fit under connection caps.
    fn try_form_link(&mut self, i: usize, j: usize) {
        let (initiator, responder) = if self.devices[i].is_scanning && self.devices[i].connections.can_accept(true) && self.devices[j].connections.can_accept(false) {
            (i, j)
        } else if self.devices[j].is_scanning && self.devices[j].connections.can_accept(true) && self.devices[i].connections.can_accept(false) {
            (j, i)
        } else {
            return;
        };
        self.form_link(initiator, responder);
    }

    fn form_link(&mut self, initiator: usize, responder: usize) {
        let id_a = self.agents[initiator].id.clone();
        let id_b = self.agents[responder].id.clone();
        let link_id = format!("{id_a}-{id_b}-{}", self.tick);

        let evicted_a = self.devices[initiator].connections.add_as_initiator(link_id.clone());
        let evicted_b = self.devices[responder].connections.add_as_responder(link_id.clone());
        for evicted_id in evicted_a.into_iter().chain(evicted_b) {
            self.links.iter_mut().filter(|l| l.link.id == evicted_id).for_each(|l| l.marked_for_teardown = true);
        }

        self.links.push(ManagedLink {
            link: Link::new(link_id.clone(), id_a.clone(), id_b.clone(), id_a.clone(), 50),
            marked_for_teardown: false,
        });
        self.event_bus.publish(Event::ConnectionFormed { link_id, a: id_a, b: id_b });
    }

    pub fn active_link_count(&self) -> usize {
        self.links.iter().filter(|l| l.link.is_active).count()
    }

    pub fn mesh_graph_edges(&self) -> usize {
        self.mesh_graph.confirmed_edges().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> Engine {
        Engine::new(SimulatorConfig::default(), Environment::new(vec![]))
    }

    #[test]
    fn agents_form_a_link_once_within_connect_radius() {
        let mut engine = test_engine();
        engine.add_agent("a".into(), Point::new(0.0, 0.0), "alice".into(), PowerMode::Normal);
        engine.add_agent("b".into(), Point::new(50.0, 0.0), "bob".into(), PowerMode::Normal);
        engine.step(1.0);
        assert_eq!(engine.active_link_count(), 1);
    }

    #[test]
    fn distant_agents_never_connect() {
        let mut engine = test_engine();
        engine.add_agent("a".into(), Point::new(0.0, 0.0), "alice".into(), PowerMode::Normal);
        engine.add_agent("b".into(), Point::new(10_000.0, 0.0), "bob".into(), PowerMode::Normal);
        engine.step(1.0);
        assert_eq!(engine.active_link_count(), 0);
    }

    #[test]
    fn link_breaks_once_agents_drift_past_break_radius() {
        let mut engine = test_engine();
        engine.add_agent("a".into(), Point::new(0.0, 0.0), "alice".into(), PowerMode::Normal);
        engine.add_agent("b".into(), Point::new(50.0, 0.0), "bob".into(), PowerMode::Normal);
        engine.step(1.0);
        assert_eq!(engine.active_link_count(), 1);

        if let Some(idx) = engine.agent_index("b") {
            engine.agents[idx].position = Point::new(500.0, 0.0);
        }
        engine.step(1.0);
        assert_eq!(engine.active_link_count(), 0);
    }

    #[test]
    fn removing_an_agent_releases_the_surviving_endpoints_connection_slot() {
        let mut engine = test_engine();
        engine.add_agent("a".into(), Point::new(0.0, 0.0), "alice".into(), PowerMode::Normal);
        engine.add_agent("b".into(), Point::new(50.0, 0.0), "bob".into(), PowerMode::Normal);
        engine.step(1.0);
        assert_eq!(engine.active_link_count(), 1);

        engine.remove_agent("a");
        assert_eq!(engine.active_link_count(), 0);

        let b_idx = engine.agent_index("b").unwrap();
        assert!(engine.devices[b_idx].connections.is_empty(), "b's connection manager should have released the link to the removed agent");

        // b should now be free to form a fresh link with a newly added agent
        // rather than being stuck thinking its slot is still occupied.
        engine.add_agent("c".into(), Point::new(50.0, 0.0), "carol".into(), PowerMode::Normal);
        engine.step(1.0);
        assert_eq!(engine.active_link_count(), 1);
    }

    #[test]
    fn reset_clears_all_state() {
        let mut engine = test_engine();
        engine.add_agent("a".into(), Point::new(0.0, 0.0), "alice".into(), PowerMode::Normal);
        engine.reset();
        assert!(engine.agents.is_empty());
        assert_eq!(engine.tick, 0);
    }

    #[test]
    fn announce_propagates_across_a_two_hop_chain() {
        let mut engine = test_engine();
        engine.add_agent("a".into(), Point::new(0.0, 0.0), "alice".into(), PowerMode::Normal);
        engine.add_agent("b".into(), Point::new(50.0, 0.0), "bob".into(), PowerMode::Normal);
        // a-c are 101m apart, past CONNECT_RADIUS_M, so the only path
        // between them is the two-hop chain through b.
        engine.add_agent("c".into(), Point::new(101.0, 0.0), "carol".into(), PowerMode::Normal);

        // Form links a-b and b-c, then run long enough for an announce
        // cycle (5000ms) plus link latency to propagate a hears from c via b.
        for _ in 0..8 {
            engine.step(1.0);
        }
        assert!(engine.active_link_count() >= 2);

        let c_peer_id = engine.devices[engine.agent_index("c").unwrap()].id;
        let a_idx = engine.agent_index("a").unwrap();
        let peer = engine.mesh_apps[a_idx].peers.get(&c_peer_id).expect("a should have learned about c via b");
        assert!(!peer.is_direct, "c should only be reachable from a through a relay");
        assert!(peer.hops >= 1);
    }
}
