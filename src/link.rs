//! Point-to-point radio link between two devices: RSSI modeling, latency
//! queueing, and the connect/disconnect hysteresis signal.
//!
//! RSSI constants are fixed at compile time rather than scene-configurable
//! (recorded as an open-question resolution in DESIGN.md). The model
//! itself is log-distance path loss plus a smoothed noise term and a hard
//! disconnect floor.

use std::collections::VecDeque;

use crate::codec::Packet;
use crate::environment::Environment;
use crate::geometry::Point;

/// Reference RSSI at 1 meter, in dBm.
pub const RSSI_AT_1M_DBM: f64 = -40.0;
/// Path-loss exponent for the log-distance model.
pub const PATH_LOSS_EXPONENT: f64 = 2.5;
/// RSSI below which a link is torn down.
pub const DISCONNECT_THRESHOLD_DBM: f64 = -85.0;
/// Peak-to-peak amplitude of the sinusoidal noise term, in dB.
pub const NOISE_AMPLITUDE_DB: f64 = 3.0;
/// Period of the sinusoidal noise term, in seconds.
pub const NOISE_PERIOD_S: f64 = 15.0;
/// Exponential smoothing factor applied to the RSSI target each tick.
pub const RSSI_SMOOTHING_ALPHA: f64 = 0.3;
/// Flat loss applied per building wall crossed, in dB.
pub const WALL_LOSS_DB: f64 = 15.0;
/// Additional attenuation per meter of interior traversal, in dB/m.
pub const MATERIAL_ATTENUATION_DB_PER_M: f64 = 12.0;

/// A packet in flight, waiting out its simulated transmission latency.
#[derive(Debug, Clone)]
struct QueuedPacket {
    packet: Packet,
    /// Endpoint id that sent this packet onto the link, so the drain step
    /// knows which side to deliver to without guessing.
    from: String,
    deliver_at_ms: u64,
}

/// A bidirectional radio link between two devices.
#[derive(Debug, Clone)]
pub struct Link {
    pub id: String,
    pub endpoint_a: String,
    pub endpoint_b: String,
    /// Which endpoint initiated the connection (informational only).
    pub initiator: String,
    pub is_active: bool,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub rssi: f64,
    pub rssi_target: f64,
    noise_phase_s: f64,
    pub latency_ms: u64,
    queue: VecDeque<QueuedPacket>,
}

impl Link {
    pub fn new(id: String, endpoint_a: String, endpoint_b: String, initiator: String, latency_ms: u64) -> Link {
        Link {
            id,
            endpoint_a,
            endpoint_b,
            initiator,
            is_active: true,
            packets_sent: 0,
            packets_received: 0,
            rssi: RSSI_AT_1M_DBM,
            rssi_target: RSSI_AT_1M_DBM,
            noise_phase_s: 0.0,
            latency_ms,
            queue: VecDeque::new(),
        }
    }

    pub fn other_end(&self, id: &str) -> Option<&str> {
        if self.endpoint_a == id {
            Some(&self.endpoint_b)
        } else if self.endpoint_b == id {
            Some(&self.endpoint_a)
        } else {
            None
        }
    }

    /// Total flat + material attenuation (dB) incurred by a straight line
    /// between `from` and `to` crossing the given environment's buildings.
    fn wall_attenuation_db(environment: &Environment, from: &Point, to: &Point) -> f64 {
        let mut total = 0.0;
        for building in environment.buildings_in_path(from, to) {
            if let Some(traversal) = crate::geometry::line_through_polygon(from, to, &building.polygon) {
                total += WALL_LOSS_DB + MATERIAL_ATTENUATION_DB_PER_M * traversal.distance;
            }
        }
        total
    }

    /// Recompute the RSSI target from free-space path loss plus wall
    /// attenuation and antenna gain, a periodic sinusoidal component, and a
    /// small Gaussian jitter term, then advance the link's internal noise
    /// phase by `dt_s` seconds.
    ///
    /// `gain_a_db`/`gain_b_db` are each endpoint's antenna gain
    /// ([`crate::device::Device::antenna_gain_db`]); at baseline strength
    /// (50) these are both zero and the target reduces to the plain
    /// path-loss model.
    ///
    /// The jitter is drawn from `rng` — the engine's single seeded
    /// `StdRng`, never `rand::thread_rng()` — so a run reproduces
    /// bit-for-bit from its seed.
    ///
    /// Returns `true` if the smoothed RSSI has dropped below
    /// [`DISCONNECT_THRESHOLD_DBM`], signaling the caller should tear the
    /// link down.
    pub fn update_rssi(&mut self, dt_s: f64, environment: &Environment, from: &Point, to: &Point, gain_a_db: f64, gain_b_db: f64, wall_attenuation_enabled: bool, rng: &mut impl rand::Rng) -> bool {
        let distance = from.distance(to).max(0.1);
        let path_loss = 10.0 * PATH_LOSS_EXPONENT * distance.log10();
        let wall_loss = if wall_attenuation_enabled { Self::wall_attenuation_db(environment, from, to) } else { 0.0 };

        self.noise_phase_s += dt_s;
        let periodic = (NOISE_AMPLITUDE_DB / 2.0) * (2.0 * std::f64::consts::PI * self.noise_phase_s / NOISE_PERIOD_S).sin();
        let jitter_dist = rand_distr::Normal::new(0.0, NOISE_AMPLITUDE_DB / 6.0).expect("fixed noise amplitude is always a valid std-dev");
        let jitter: f64 = rand_distr::Distribution::sample(&jitter_dist, rng);

        self.rssi_target = RSSI_AT_1M_DBM - path_loss - wall_loss + gain_a_db + gain_b_db + periodic + jitter;
        self.rssi = RSSI_SMOOTHING_ALPHA * self.rssi_target + (1.0 - RSSI_SMOOTHING_ALPHA) * self.rssi;

        self.rssi < DISCONNECT_THRESHOLD_DBM
    }

    /// Queue `packet` for delivery to the far end from `from`, accounting
    /// for the link's latency.
    pub fn send(&mut self, packet: Packet, from: String, now_ms: u64) {
        self.packets_sent += 1;
        self.queue.push_back(QueuedPacket {
            packet,
            from,
            deliver_at_ms: now_ms + self.latency_ms,
        });
    }

    /// Drain every queued packet whose simulated arrival time has passed,
    /// in the order they were sent, as `(packet, sender_id)` pairs — the
    /// receiver is whichever endpoint is not `sender_id`.
    pub fn drain_ready(&mut self, now_ms: u64) -> Vec<(Packet, String)> {
        let mut delivered = Vec::new();
        while let Some(front) = self.queue.front() {
            if front.deliver_at_ms > now_ms {
                break;
            }
            let queued = self.queue.pop_front().unwrap();
            self.packets_received += 1;
            delivered.push((queued.packet, queued.from));
        }
        delivered
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Packet;
    use rand::SeedableRng;

    #[test]
    fn rssi_at_one_meter_is_near_the_reference_constant_before_noise_settles() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut link = Link::new("l1".into(), "a".into(), "b".into(), "a".into(), 50);
        let from = Point::new(0.0, 0.0);
        let to = Point::new(1.0, 0.0);
        link.update_rssi(0.0, &env, &from, &to, 0.0, 0.0, true, &mut rng);
        // At dt=0 the periodic term is zero and path loss at 1m is zero,
        // so only the small Gaussian jitter separates the target from the
        // 1m reference constant.
        assert!((link.rssi_target - RSSI_AT_1M_DBM).abs() < 3.0);
    }

    #[test]
    fn rssi_degrades_with_distance() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let mut near = Link::new("l1".into(), "a".into(), "b".into(), "a".into(), 50);
        let mut far = Link::new("l2".into(), "a".into(), "b".into(), "a".into(), 50);
        near.update_rssi(0.0, &env, &Point::new(0.0, 0.0), &Point::new(1.0, 0.0), 0.0, 0.0, true, &mut rng);
        far.update_rssi(0.0, &env, &Point::new(0.0, 0.0), &Point::new(100.0, 0.0), 0.0, 0.0, true, &mut rng);
        assert!(far.rssi_target < near.rssi_target);
    }

    #[test]
    fn disconnect_threshold_trips_at_long_range() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut link = Link::new("l1".into(), "a".into(), "b".into(), "a".into(), 50);
        let should_teardown = link.update_rssi(0.0, &env, &Point::new(0.0, 0.0), &Point::new(5000.0, 0.0), 0.0, 0.0, true, &mut rng);
        assert!(should_teardown);
    }

    #[test]
    fn ten_meter_baseline_rssi_matches_the_log_distance_model() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let mut link = Link::new("l1".into(), "a".into(), "b".into(), "a".into(), 50);
        link.update_rssi(0.0, &env, &Point::new(0.0, 0.0), &Point::new(10.0, 0.0), 0.0, 0.0, true, &mut rng);
        let expected = RSSI_AT_1M_DBM - 10.0 * PATH_LOSS_EXPONENT * 10f64.log10();
        assert!((link.rssi_target - expected).abs() < 3.0);
    }

    #[test]
    fn matched_antenna_strength_pairs_shift_rssi_by_the_combined_gain() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(6);
        let mut baseline = Link::new("l1".into(), "a".into(), "b".into(), "a".into(), 50);
        let mut strong = Link::new("l2".into(), "a".into(), "b".into(), "a".into(), 50);
        let mut weak = Link::new("l3".into(), "a".into(), "b".into(), "a".into(), 50);
        let from = Point::new(0.0, 0.0);
        let to = Point::new(10.0, 0.0);

        baseline.update_rssi(0.0, &env, &from, &to, 0.0, 0.0, true, &mut rng);
        strong.update_rssi(0.0, &env, &from, &to, 6.02, 6.02, true, &mut rng);
        weak.update_rssi(0.0, &env, &from, &to, -6.02, -6.02, true, &mut rng);

        assert!((strong.rssi_target - baseline.rssi_target - 12.04).abs() < 1.0);
        assert!((weak.rssi_target - baseline.rssi_target + 12.04).abs() < 1.0);
    }

    #[test]
    fn asymmetric_antenna_strengths_cancel_out() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut baseline = Link::new("l1".into(), "a".into(), "b".into(), "a".into(), 50);
        let mut mixed = Link::new("l2".into(), "a".into(), "b".into(), "a".into(), 50);
        let from = Point::new(0.0, 0.0);
        let to = Point::new(10.0, 0.0);

        baseline.update_rssi(0.0, &env, &from, &to, 0.0, 0.0, true, &mut rng);
        mixed.update_rssi(0.0, &env, &from, &to, 6.02, -6.02, true, &mut rng);

        assert!((mixed.rssi_target - baseline.rssi_target).abs() < 1.0);
    }

    #[test]
    fn a_wall_crossing_reduces_rssi_by_the_linear_attenuation_sum() {
        use crate::environment::{Building, Material};
        use crate::geometry::Polygon;
        use std::collections::HashMap;

        let env = Environment::new(vec![]);
        let wall_polygon = Polygon::new(vec![Point::new(4.0, -10.0), Point::new(6.0, -10.0), Point::new(6.0, 10.0), Point::new(4.0, 10.0)]).unwrap();
        let env_with_wall = Environment::new(vec![Building {
            id: "w".into(),
            material: Material::Concrete,
            polygon: wall_polygon,
            properties: HashMap::new(),
        }]);

        let mut rng = rand::rngs::StdRng::seed_from_u64(8);
        let from = Point::new(0.0, 0.0);
        let to = Point::new(10.0, 0.0);

        let mut clear = Link::new("l1".into(), "a".into(), "b".into(), "a".into(), 50);
        let mut through_wall = Link::new("l2".into(), "a".into(), "b".into(), "a".into(), 50);
        clear.update_rssi(0.0, &env, &from, &to, 0.0, 0.0, true, &mut rng);
        through_wall.update_rssi(0.0, &env_with_wall, &from, &to, 0.0, 0.0, true, &mut rng);

        // The wall is 2m thick: 2*12 (material) + 15 (wall entry) = 39dB.
        let expected_drop = 2.0 * MATERIAL_ATTENUATION_DB_PER_M + WALL_LOSS_DB;
        assert!((clear.rssi_target - through_wall.rssi_target - expected_drop).abs() < 1.0);
    }

    #[test]
    fn queued_packets_are_delivered_only_after_latency_elapses() {
        let mut link = Link::new("l1".into(), "a".into(), "b".into(), "a".into(), 100);
        let packet = Packet::new_message(1, [1; 8], None, vec![1, 2, 3], 0);
        link.send(packet, "a".into(), 1000);
        assert!(link.drain_ready(1050).is_empty());
        let delivered = link.drain_ready(1100);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1, "a");
        assert_eq!(link.packets_sent, 1);
        assert_eq!(link.packets_received, 1);
    }

    #[test]
    fn other_end_resolves_correctly() {
        let link = Link::new("l1".into(), "a".into(), "b".into(), "a".into(), 10);
        assert_eq!(link.other_end("a"), Some("b"));
        assert_eq!(link.other_end("b"), Some("a"));
        assert_eq!(link.other_end("c"), None);
    }
}
