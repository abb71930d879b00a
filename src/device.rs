//! Device identity, power-mode scan scheduling, and per-device connection
//! bookkeeping.
//!
//! `ConnectionManager` enforces a bounded number of simultaneous links per
//! device, evicting the oldest connection when a new one would exceed the
//! cap — the same bounded-collection-with-eviction idiom this codebase
//! uses for the mesh seen-set and a link's packet queue.

use rand::Rng;
use std::collections::VecDeque;

/// Radio power modes and their base scan interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Eco,
    Normal,
    Performance,
}

impl PowerMode {
    pub fn base_scan_interval_ms(self) -> u64 {
        match self {
            PowerMode::Eco => 60_000,
            PowerMode::Normal => 30_000,
            PowerMode::Performance => 10_000,
        }
    }

    /// Scan interval with ±20% jitter applied, drawn from `rng` — never
    /// `rand::thread_rng()`, so a seeded engine run is reproducible.
    pub fn jittered_scan_interval_ms(self, rng: &mut impl Rng) -> u64 {
        let base = self.base_scan_interval_ms() as f64;
        let jitter = rng.gen_range(-0.2..=0.2);
        (base * (1.0 + jitter)).round() as u64
    }
}

/// Caps on simultaneous connections, enforced by [`ConnectionManager`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_total: usize,
    pub max_as_initiator: usize,
    pub max_as_responder: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        ConnectionLimits {
            max_total: 8,
            max_as_initiator: 8,
            max_as_responder: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone)]
struct TrackedConnection {
    link_id: String,
    role: Role,
}

/// Tracks which links a device currently holds open, in insertion order,
/// and evicts the oldest when a role or total cap would be exceeded.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    limits: ConnectionLimits,
    connections: VecDeque<TrackedConnection>,
}

impl ConnectionManager {
    pub fn new(limits: ConnectionLimits) -> ConnectionManager {
        ConnectionManager { limits, connections: VecDeque::new() }
    }

    fn count(&self, role: Role) -> usize {
        self.connections.iter().filter(|c| c.role == role).count()
    }

    /// Whether a new connection in this role would fit under both the
    /// per-role and total caps.
    pub fn can_accept(&self, role_is_initiator: bool) -> bool {
        if self.connections.len() >= self.limits.max_total {
            return false;
        }
        let role = if role_is_initiator { Role::Initiator } else { Role::Responder };
        let cap = if role_is_initiator { self.limits.max_as_initiator } else { self.limits.max_as_responder };
        self.count(role) < cap
    }

    /// Record a new outgoing (initiator) connection, evicting the oldest
    /// connections first if this would exceed the total or per-role cap.
    /// Returns the ids of any connections evicted to make room.
    pub fn add_as_initiator(&mut self, link_id: String) -> Vec<String> {
        self.add(link_id, Role::Initiator)
    }

    /// Record a new incoming (responder) connection, with the same
    /// eviction behavior as [`ConnectionManager::add_as_initiator`].
    pub fn add_as_responder(&mut self, link_id: String) -> Vec<String> {
        self.add(link_id, Role::Responder)
    }

    fn add(&mut self, link_id: String, role: Role) -> Vec<String> {
        self.connections.push_back(TrackedConnection { link_id, role });
        self.enforce_limits()
    }

    pub fn remove(&mut self, link_id: &str) {
        self.connections.retain(|c| c.link_id != link_id);
    }

    /// Evict oldest-first connections until every cap is satisfied.
    /// Returns the evicted link ids.
    fn enforce_limits(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();

        while self.count(Role::Initiator) > self.limits.max_as_initiator {
            if let Some(pos) = self.connections.iter().position(|c| c.role == Role::Initiator) {
                evicted.push(self.connections.remove(pos).unwrap().link_id);
            } else {
                break;
            }
        }
        while self.count(Role::Responder) > self.limits.max_as_responder {
            if let Some(pos) = self.connections.iter().position(|c| c.role == Role::Responder) {
                evicted.push(self.connections.remove(pos).unwrap().link_id);
            } else {
                break;
            }
        }
        while self.connections.len() > self.limits.max_total {
            if let Some(front) = self.connections.pop_front() {
                evicted.push(front.link_id);
            } else {
                break;
            }
        }

        evicted
    }

    pub fn active_link_ids(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.link_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Baseline antenna strength every device starts at; the RSSI link model's
/// gain term is zero when both endpoints are at this value.
pub const BASELINE_ANTENNA_STRENGTH: u32 = 50;

/// A mesh device's identity and radio scheduling state.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: [u8; crate::codec::PEER_ID_LEN],
    pub nickname: String,
    pub power_mode: PowerMode,
    pub connections: ConnectionManager,
    pub next_scan_due_ms: u64,
    /// Whether this device scanned on the current tick. Connection
    /// formation prefers the scanning side as initiator.
    pub is_scanning: bool,
    /// Antenna strength, feeding the link RSSI model's `10*log10(strength/50)`
    /// gain term. Baseline is [`BASELINE_ANTENNA_STRENGTH`].
    pub antenna_strength: u32,
}

impl Device {
    /// Builds a device with its first scan due at a random offset within
    /// one base scan interval, so devices spun up together don't all scan
    /// on the same tick (a synchronized "thundering herd" of scans).
    pub fn new(id: [u8; crate::codec::PEER_ID_LEN], nickname: String, power_mode: PowerMode, rng: &mut impl Rng) -> Device {
        let next_scan_due_ms = rng.gen_range(0..=power_mode.base_scan_interval_ms());
        Device {
            id,
            nickname,
            power_mode,
            connections: ConnectionManager::new(ConnectionLimits::default()),
            next_scan_due_ms,
            is_scanning: false,
            antenna_strength: BASELINE_ANTENNA_STRENGTH,
        }
    }

    pub fn with_antenna_strength(mut self, strength: u32) -> Device {
        self.antenna_strength = strength;
        self
    }

    /// Antenna gain in dB: `10*log10(max(1, strength)/50)`. Zero
    /// at the baseline strength, positive above it, negative below.
    pub fn antenna_gain_db(&self) -> f64 {
        let strength = self.antenna_strength.max(1) as f64;
        10.0 * (strength / BASELINE_ANTENNA_STRENGTH as f64).log10()
    }

    /// Whether a scan is due at `now_ms`; if so, marks `is_scanning` and
    /// reschedules the next scan with fresh jitter drawn from `rng`.
    pub fn tick_scan_schedule(&mut self, now_ms: u64, rng: &mut impl Rng) -> bool {
        if now_ms < self.next_scan_due_ms {
            self.is_scanning = false;
            return false;
        }
        self.next_scan_due_ms = now_ms + self.power_mode.jittered_scan_interval_ms(rng);
        self.is_scanning = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn power_mode_base_intervals_are_correct() {
        assert_eq!(PowerMode::Eco.base_scan_interval_ms(), 60_000);
        assert_eq!(PowerMode::Normal.base_scan_interval_ms(), 30_000);
        assert_eq!(PowerMode::Performance.base_scan_interval_ms(), 10_000);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let interval = PowerMode::Normal.jittered_scan_interval_ms(&mut rng);
            assert!((24_000..=36_000).contains(&interval), "interval {interval} out of jitter band");
        }
    }

    #[test]
    fn connection_manager_evicts_oldest_on_role_cap_overflow() {
        let limits = ConnectionLimits { max_total: 10, max_as_initiator: 2, max_as_responder: 10 };
        let mut mgr = ConnectionManager::new(limits);
        mgr.add_as_initiator("l1".into());
        mgr.add_as_initiator("l2".into());
        let evicted = mgr.add_as_initiator("l3".into());
        assert_eq!(evicted, vec!["l1".to_string()]);
        assert_eq!(mgr.active_link_ids(), vec!["l2", "l3"]);
    }

    #[test]
    fn can_accept_respects_role_and_total_caps() {
        let limits = ConnectionLimits { max_total: 2, max_as_initiator: 1, max_as_responder: 10 };
        let mut mgr = ConnectionManager::new(limits);
        assert!(mgr.can_accept(true));
        mgr.add_as_initiator("l1".into());
        assert!(!mgr.can_accept(true));
        assert!(mgr.can_accept(false));
        mgr.add_as_responder("l2".into());
        assert!(!mgr.can_accept(false));
    }

    #[test]
    fn connection_manager_evicts_oldest_on_total_cap_overflow() {
        let limits = ConnectionLimits { max_total: 2, max_as_initiator: 10, max_as_responder: 10 };
        let mut mgr = ConnectionManager::new(limits);
        mgr.add_as_initiator("l1".into());
        mgr.add_as_responder("l2".into());
        let evicted = mgr.add_as_initiator("l3".into());
        assert_eq!(evicted, vec!["l1".to_string()]);
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn antenna_gain_is_zero_at_baseline_strength() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let device = Device::new([0; 8], "d1".into(), PowerMode::Normal, &mut rng);
        assert!(device.antenna_gain_db().abs() < 1e-9);
    }

    #[test]
    fn antenna_gain_doubles_and_halves_as_expected() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        let strong = Device::new([0; 8], "d1".into(), PowerMode::Normal, &mut rng).with_antenna_strength(100);
        let weak = Device::new([0; 8], "d2".into(), PowerMode::Normal, &mut rng).with_antenna_strength(25);
        assert!((strong.antenna_gain_db() - 6.02).abs() < 0.1);
        assert!((weak.antenna_gain_db() - (-6.02)).abs() < 0.1);
    }

    #[test]
    fn scan_schedule_fires_once_then_waits_for_the_next_interval() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let mut device = Device::new([0; 8], "d1".into(), PowerMode::Performance, &mut rng);
        device.next_scan_due_ms = 0;
        assert!(device.tick_scan_schedule(0, &mut rng));
        assert!(!device.tick_scan_schedule(1, &mut rng));
        assert!(device.tick_scan_schedule(20_000, &mut rng));
    }

    #[test]
    fn new_device_scan_offset_is_randomized_within_base_interval() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let device = Device::new([0; 8], "d1".into(), PowerMode::Eco, &mut rng);
        assert!(device.next_scan_due_ms <= PowerMode::Eco.base_scan_interval_ms());

        let mut rng_a = rand::rngs::StdRng::seed_from_u64(6);
        let mut rng_b = rand::rngs::StdRng::seed_from_u64(7);
        let first = Device::new([1; 8], "d1".into(), PowerMode::Normal, &mut rng_a);
        let second = Device::new([2; 8], "d2".into(), PowerMode::Normal, &mut rng_b);
        assert_ne!(first.next_scan_due_ms, second.next_scan_due_ms, "different seeds should scatter initial offsets");
    }
}
