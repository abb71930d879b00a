//! Agent locomotion: movement modes, wall-sliding integration, the
//! stuck-recovery sub-state machine, and busy-mode zone-respecting
//! wandering.

use rand::Rng;

use crate::environment::Environment;
use crate::geometry::{Point, Vec2};

/// Minimum per-agent max speed, drawn uniformly at creation.
pub const MIN_MAX_SPEED_MPS: f64 = 1.0;
/// Maximum per-agent max speed, drawn uniformly at creation.
pub const MAX_MAX_SPEED_MPS: f64 = 3.0;

/// Half-extent of the world's soft boundary; a `RandomWalk` heading that
/// would carry an agent past `|x|` or `|y| = WORLD_HALF_EXTENT_M` is
/// reflected back inward instead.
pub const WORLD_HALF_EXTENT_M: f64 = 500.0;

/// Distance within which an intermediate path waypoint counts as reached.
pub const WAYPOINT_THRESHOLD_M: f64 = 2.0;
/// Distance within which a final target counts as reached.
pub const FINAL_ARRIVAL_THRESHOLD_M: f64 = 1.0;

/// How long a speed below [`STUCK_SPEED_THRESHOLD_MPS`] must persist before
/// an agent in `TARGET` mode is judged stuck.
const STUCK_TRIGGER_MS: u64 = 500;
/// Speed below which an agent is considered stalled.
const STUCK_SPEED_THRESHOLD_MPS: f64 = 0.5;
/// Speed above which sustained movement counts as stuck-recovery success.
const RECOVERY_SUCCESS_SPEED_MPS: f64 = 1.0;
/// How long that higher speed must be sustained before recovery is judged
/// successful.
const RECOVERY_SUCCESS_TRIGGER_MS: u64 = 1000;

/// Duration of the first stuck-recovery attempt.
const STUCK_RECOVERY_BASE_MS: u64 = 1000;
/// Ceiling on how long a stuck-recovery attempt can grow to.
const STUCK_RECOVERY_MAX_MS: u64 = 10_000;

/// Number of candidate points tried before a busy-mode target pick or a
/// recovery detour gives up and falls back to standing still.
const MAX_PICK_ATTEMPTS: u32 = 50;
/// Minimum progress a busy-mode sub-target pursuit must make...
const BUSY_MIN_PROGRESS_M: f64 = 1.0;
/// ...within this long, or the sub-target is abandoned and re-picked.
const BUSY_STUCK_TIME_MS: u64 = 1500;

/// What an agent is currently doing.
#[derive(Debug, Clone)]
pub enum LocomotionMode {
    /// Not moving.
    Still,
    /// Wandering: `heading` drifts by a small random amount every step
    /// rather than being re-picked from scratch.
    RandomWalk { heading_rad: f64 },
    /// Walking toward a fixed destination, optionally via intermediate
    /// waypoints supplied by a path query.
    Target { destination: Point, waypoints: Vec<Point> },
    /// Wandering within the zone (indoors in a specific building, or
    /// outdoors) the agent was in when it entered this mode, picking a new
    /// random sub-target each time the current one is reached or stalls.
    Busy(BusyState),
    /// Externally driven; the engine does not move this agent itself.
    Manual,
}

/// Busy-mode bookkeeping: which zone the agent is wandering within, and
/// progress tracking for its current sub-target.
#[derive(Debug, Clone)]
pub struct BusyState {
    /// `Some(building_id)` if the agent entered Busy indoors; `None` if
    /// outdoors. Every subsequent sub-target is drawn from this same zone.
    zone_building_id: Option<String>,
    sub_target: Point,
    progress_origin: Point,
    progress_deadline_ms: u64,
}

/// Sub-state machine entered when an agent's forward speed has dropped too
/// low for too long while pursuing a `Target`. Recovery duration doubles
/// on each consecutive failure, capped at [`STUCK_RECOVERY_MAX_MS`].
#[derive(Debug, Clone)]
pub struct StuckRecovery {
    pub recovering_until_ms: u64,
    pub attempt_duration_ms: u64,
    saved_target: Point,
    high_speed_since_ms: Option<u64>,
}

impl StuckRecovery {
    fn begin(now_ms: u64, saved_target: Point, duration_ms: u64) -> StuckRecovery {
        StuckRecovery {
            recovering_until_ms: now_ms + duration_ms,
            attempt_duration_ms: duration_ms,
            saved_target,
            high_speed_since_ms: None,
        }
    }
}

/// A single simulated person moving through the environment.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub position: Point,
    pub velocity: Vec2,
    /// This agent's personal speed ceiling, randomized at creation.
    pub max_speed_mps: f64,
    pub mode: LocomotionMode,
    pub stuck: Option<StuckRecovery>,
    low_speed_since_ms: Option<u64>,
    /// Duration the *next* stuck-recovery attempt will run for. Doubles
    /// every time an attempt times out without success, reset to
    /// [`STUCK_RECOVERY_BASE_MS`] the moment one succeeds.
    next_recovery_duration_ms: u64,
}

impl Agent {
    pub fn new(id: String, position: Point) -> Agent {
        Agent {
            id,
            position,
            velocity: Vec2::new(0.0, 0.0),
            max_speed_mps: (MIN_MAX_SPEED_MPS + MAX_MAX_SPEED_MPS) / 2.0,
            mode: LocomotionMode::Still,
            stuck: None,
            low_speed_since_ms: None,
            next_recovery_duration_ms: STUCK_RECOVERY_BASE_MS,
        }
    }

    /// Draw this agent's max speed uniformly from
    /// `[MIN_MAX_SPEED_MPS, MAX_MAX_SPEED_MPS]`.
    pub fn randomize_max_speed(&mut self, rng: &mut impl Rng) {
        self.max_speed_mps = rng.gen_range(MIN_MAX_SPEED_MPS..=MAX_MAX_SPEED_MPS);
    }

    /// Advance this agent by `dt_s` seconds, resolving collisions against
    /// `environment`. Randomness (wander drift, busy-target sampling) is
    /// drawn from `rng`, which must be the engine's single seeded
    /// `StdRng` — never `rand::thread_rng()` — so a run is reproducible
    /// from its seed.
    pub fn step(&mut self, dt_s: f64, now_ms: u64, environment: &Environment, stuck_recovery_enabled: bool, rng: &mut impl Rng) {
        // Recovery runs as an ordinary RandomWalk below; here we only watch
        // for its two exit conditions: sustained recovery (success, re-path
        // to the saved target with the duration reset) or a timeout
        // (re-path anyway, but keep the escalated duration for next time).
        if let Some(recovery) = &mut self.stuck {
            let sustained_recovery_speed = self.velocity.length() >= RECOVERY_SUCCESS_SPEED_MPS;
            if sustained_recovery_speed {
                recovery.high_speed_since_ms.get_or_insert(now_ms);
            } else {
                recovery.high_speed_since_ms = None;
            }

            let succeeded = recovery
                .high_speed_since_ms
                .is_some_and(|since| now_ms - since >= RECOVERY_SUCCESS_TRIGGER_MS);

            if succeeded {
                let saved_target = recovery.saved_target;
                self.next_recovery_duration_ms = STUCK_RECOVERY_BASE_MS;
                self.stuck = None;
                self.mode = LocomotionMode::Target { destination: saved_target, waypoints: Vec::new() };
                self.low_speed_since_ms = None;
            } else if now_ms >= recovery.recovering_until_ms {
                let saved_target = recovery.saved_target;
                self.next_recovery_duration_ms = (recovery.attempt_duration_ms * 2).min(STUCK_RECOVERY_MAX_MS);
                self.stuck = None;
                self.mode = LocomotionMode::Target { destination: saved_target, waypoints: Vec::new() };
                self.low_speed_since_ms = None;
            }
        }

        let desired_velocity = match &mut self.mode {
            LocomotionMode::Still | LocomotionMode::Manual => None,
            LocomotionMode::RandomWalk { heading_rad } => {
                *heading_rad += rng.gen_range(-0.25..=0.25);
                let desired = Vec2::new(heading_rad.cos(), heading_rad.sin()).scale(self.max_speed_mps * 0.5);
                Some(lerp_vec2(&self.velocity, &desired, 0.1))
            }
            LocomotionMode::Target { destination, waypoints } => {
                target_mode_velocity(&self.position, *destination, waypoints, self.max_speed_mps)
            }
            LocomotionMode::Busy(busy) => {
                busy_mode_velocity(&self.position, busy, now_ms, self.max_speed_mps, environment, rng)
            }
        };

        let Some(mut velocity) = desired_velocity else {
            self.velocity = Vec2::new(0.0, 0.0);
            return;
        };

        if matches!(self.mode, LocomotionMode::RandomWalk { .. }) {
            velocity = soft_bounce(&self.position, velocity);
        }

        self.velocity = velocity;
        let target_pos = self.position.add(&velocity.scale(dt_s));
        let result = environment.resolve_movement(&self.position, &target_pos, 3);
        let realized = result.position.sub(&self.position).length() / dt_s.max(1e-9);

        if result.blocked {
            if let LocomotionMode::RandomWalk { heading_rad } = &mut self.mode {
                let turn = rng.gen_range(std::f64::consts::FRAC_PI_2..std::f64::consts::PI + std::f64::consts::FRAC_PI_2);
                *heading_rad += turn;
            }
        }

        self.position = result.position;
        self.track_waypoint_progress();
        self.track_busy_progress(now_ms);
        if stuck_recovery_enabled {
            self.track_stuck_state(now_ms, realized);
        }
    }

    /// Advance past a reached intermediate waypoint, or arrive at the
    /// final target (clearing the mode to `Still`).
    fn track_waypoint_progress(&mut self) {
        let LocomotionMode::Target { destination, waypoints } = &mut self.mode else { return };
        if let Some(next) = waypoints.first() {
            if self.position.distance(next) < WAYPOINT_THRESHOLD_M {
                waypoints.remove(0);
            }
        }
        if waypoints.is_empty() && self.position.distance(destination) < FINAL_ARRIVAL_THRESHOLD_M {
            self.mode = LocomotionMode::Still;
        }
    }

    fn track_busy_progress(&mut self, now_ms: u64) {
        let LocomotionMode::Busy(busy) = &mut self.mode else { return };
        if self.position.distance(&busy.sub_target) < FINAL_ARRIVAL_THRESHOLD_M {
            busy.sub_target = self.position;
            busy.progress_origin = self.position;
            busy.progress_deadline_ms = now_ms + BUSY_STUCK_TIME_MS;
            // Mark for re-pick on the next tick's `busy_mode_velocity` call
            // by collapsing the sub-target onto the current position; a
            // sub-target equal to position always re-picks immediately.
        } else if now_ms >= busy.progress_deadline_ms {
            if self.position.distance(&busy.progress_origin) < BUSY_MIN_PROGRESS_M {
                busy.sub_target = self.position;
            }
            busy.progress_origin = self.position;
            busy.progress_deadline_ms = now_ms + BUSY_STUCK_TIME_MS;
        }
    }

    /// Only `Target` mode enters stuck recovery: a sustained low speed
    /// while trying to reach a fixed destination means the direct line (or
    /// remaining waypoints) is blocked.
    fn track_stuck_state(&mut self, now_ms: u64, realized_speed: f64) {
        if self.stuck.is_some() {
            return;
        }
        let LocomotionMode::Target { destination, .. } = &self.mode else {
            self.low_speed_since_ms = None;
            return;
        };
        if realized_speed < STUCK_SPEED_THRESHOLD_MPS {
            let since = *self.low_speed_since_ms.get_or_insert(now_ms);
            if now_ms - since >= STUCK_TRIGGER_MS {
                let saved_target = *destination;
                self.stuck = Some(StuckRecovery::begin(now_ms, saved_target, self.next_recovery_duration_ms));
                self.mode = LocomotionMode::RandomWalk { heading_rad: 0.0 };
                self.low_speed_since_ms = None;
            }
        } else {
            self.low_speed_since_ms = None;
        }
    }

    pub fn set_target(&mut self, destination: Point, waypoints: Vec<Point>) {
        self.stuck = None;
        self.low_speed_since_ms = None;
        self.mode = LocomotionMode::Target { destination, waypoints };
    }

    pub fn set_random_walk(&mut self, rng: &mut impl Rng) {
        self.mode = LocomotionMode::RandomWalk { heading_rad: rng.gen_range(0.0..std::f64::consts::TAU) };
    }

    /// Enter `BUSY`: record whether the agent is currently indoors (and in
    /// which building), then pick a first sub-target within that zone.
    pub fn set_busy(&mut self, now_ms: u64, environment: &Environment, rng: &mut impl Rng) {
        let zone_building_id = environment.inside_building(&self.position).map(|b| b.id.clone());
        let sub_target = pick_zone_target(&self.position, zone_building_id.as_deref(), environment, rng).unwrap_or(self.position);
        self.mode = LocomotionMode::Busy(BusyState {
            zone_building_id,
            sub_target,
            progress_origin: self.position,
            progress_deadline_ms: now_ms + BUSY_STUCK_TIME_MS,
        });
    }
}

fn lerp_vec2(from: &Vec2, to: &Vec2, t: f64) -> Vec2 {
    Vec2::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t)
}

/// Reflect a `RandomWalk` velocity back inward if it would carry the agent
/// past the world's soft boundary.
fn soft_bounce(position: &Point, velocity: Vec2) -> Vec2 {
    let mut v = velocity;
    if (position.x >= WORLD_HALF_EXTENT_M && v.x > 0.0) || (position.x <= -WORLD_HALF_EXTENT_M && v.x < 0.0) {
        v.x = -v.x;
    }
    if (position.y >= WORLD_HALF_EXTENT_M && v.y > 0.0) || (position.y <= -WORLD_HALF_EXTENT_M && v.y < 0.0) {
        v.y = -v.y;
    }
    v
}

/// Desired velocity for `TARGET` mode: aim at the next waypoint (or the
/// final destination if none remain), with arrival slowdown scaled by
/// distance to the *final* destination.
fn target_mode_velocity(position: &Point, destination: Point, waypoints: &[Point], max_speed: f64) -> Option<Vec2> {
    let nav_target = waypoints.first().copied().unwrap_or(destination);
    let to_nav = nav_target.sub(position);
    let dist_to_final = position.distance(&destination);
    let speed = max_speed.min(dist_to_final * 2.0);
    if to_nav.length() < 1e-9 {
        return Some(Vec2::new(0.0, 0.0));
    }
    Some(to_nav.normalized().scale(speed))
}

/// Desired velocity for `BUSY` mode: walk toward the current sub-target
/// (same arrival-slowdown shape as `TARGET`), re-picking within the same
/// zone whenever the sub-target has collapsed onto the current position
/// (arrival) by [`Agent::track_busy_progress`].
fn busy_mode_velocity(position: &Point, busy: &mut BusyState, now_ms: u64, max_speed: f64, environment: &Environment, rng: &mut impl Rng) -> Option<Vec2> {
    if position.distance(&busy.sub_target) < 1e-6 {
        busy.sub_target = pick_zone_target(position, busy.zone_building_id.as_deref(), environment, rng).unwrap_or(*position);
        busy.progress_origin = *position;
        busy.progress_deadline_ms = now_ms + BUSY_STUCK_TIME_MS;
    }
    target_mode_velocity(position, busy.sub_target, &[], max_speed)
}

/// Sample a random point within the same zone as `zone_building_id` (a
/// specific building if `Some`, the open world if `None`), rejecting
/// candidates that cross zone boundaries, up to [`MAX_PICK_ATTEMPTS`]
/// tries. Returns `None` if no valid candidate turns up (the caller should
/// fall back to standing in place rather than picking an out-of-zone
/// point).
fn pick_zone_target(origin: &Point, zone_building_id: Option<&str>, environment: &Environment, rng: &mut impl Rng) -> Option<Point> {
    match zone_building_id {
        Some(building_id) => {
            let building = environment.buildings.iter().find(|b| b.id == building_id)?;
            let bounds = building.bounds();
            for _ in 0..MAX_PICK_ATTEMPTS {
                let x = rng.gen_range(bounds.min.x..=bounds.max.x);
                let y = rng.gen_range(bounds.min.y..=bounds.max.y);
                let candidate = Point::new(x, y);
                if building.polygon.contains_point(&candidate) {
                    return Some(candidate);
                }
            }
            None
        }
        None => {
            for _ in 0..MAX_PICK_ATTEMPTS {
                let x = rng.gen_range(-WORLD_HALF_EXTENT_M..=WORLD_HALF_EXTENT_M);
                let y = rng.gen_range(-WORLD_HALF_EXTENT_M..=WORLD_HALF_EXTENT_M);
                let candidate = Point::new(x, y);
                if environment.inside_building(&candidate).is_none() {
                    return Some(candidate);
                }
            }
            let _ = origin;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn still_agent_does_not_move() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut agent = Agent::new("a1".into(), Point::new(0.0, 0.0));
        agent.step(1.0, 0, &env, true, &mut rng);
        assert_eq!(agent.position, Point::new(0.0, 0.0));
    }

    #[test]
    fn target_mode_moves_toward_destination_and_stops_on_arrival() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let mut agent = Agent::new("a1".into(), Point::new(0.0, 0.0));
        agent.max_speed_mps = 3.0;
        let destination = Point::new(20.0, 0.0);
        agent.set_target(destination, vec![]);
        let mut reached = false;
        for ms in 0..20_000u64 {
            agent.step(0.1, ms * 100, &env, true, &mut rng);
            if matches!(agent.mode, LocomotionMode::Still) {
                reached = true;
                break;
            }
        }
        assert!(reached, "agent should settle into Still after arriving");
        assert!(agent.position.x > 0.0, "agent should have moved toward the destination");
        assert!(agent.position.distance(&destination) < FINAL_ARRIVAL_THRESHOLD_M);
    }

    #[test]
    fn target_mode_slows_down_on_final_approach() {
        let env = Environment::new(vec![]);
        let mut agent = Agent::new("a1".into(), Point::new(0.0, 0.0));
        agent.max_speed_mps = 3.0;
        let velocity = target_mode_velocity(&agent.position, Point::new(0.2, 0.0), &[], agent.max_speed_mps).unwrap();
        // distToFinal=0.2 -> speed = min(3.0, 0.4) = 0.4, well under maxSpeed.
        assert!((velocity.length() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn waypoint_threshold_differs_from_final_arrival_threshold() {
        assert!(WAYPOINT_THRESHOLD_M > FINAL_ARRIVAL_THRESHOLD_M);
    }

    #[test]
    fn manual_mode_is_never_moved_by_step() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut agent = Agent::new("a1".into(), Point::new(5.0, 5.0));
        agent.mode = LocomotionMode::Manual;
        agent.step(1.0, 0, &env, true, &mut rng);
        assert_eq!(agent.position, Point::new(5.0, 5.0));
    }

    #[test]
    fn repeated_blocking_escalates_into_stuck_recovery() {
        use crate::environment::{Building, Material};
        use crate::geometry::Polygon;
        use std::collections::HashMap;

        let wall = Polygon::new(vec![Point::new(1.0, -10.0), Point::new(1.1, -10.0), Point::new(1.1, 10.0), Point::new(1.0, 10.0)]).unwrap();
        let env = Environment::new(vec![Building {
            id: "wall".into(),
            material: Material::Concrete,
            polygon: wall,
            properties: HashMap::new(),
        }]);

        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        let mut agent = Agent::new("a1".into(), Point::new(0.5, 0.0));
        agent.max_speed_mps = 3.0;
        agent.set_target(Point::new(50.0, 0.0), vec![]);

        let mut entered_recovery = false;
        for tick in 0..1000u64 {
            agent.step(1.0, tick * 1000, &env, true, &mut rng);
            if agent.stuck.is_some() {
                entered_recovery = true;
                break;
            }
        }
        assert!(entered_recovery, "agent repeatedly blocked by a wall should enter stuck recovery");
    }

    #[test]
    fn stuck_recovery_switches_to_random_walk_while_active() {
        use crate::environment::{Building, Material};
        use crate::geometry::Polygon;
        use std::collections::HashMap;

        let wall = Polygon::new(vec![Point::new(1.0, -10.0), Point::new(1.1, -10.0), Point::new(1.1, 10.0), Point::new(1.0, 10.0)]).unwrap();
        let env = Environment::new(vec![Building {
            id: "wall".into(),
            material: Material::Concrete,
            polygon: wall,
            properties: HashMap::new(),
        }]);

        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let mut agent = Agent::new("a1".into(), Point::new(0.5, 0.0));
        agent.max_speed_mps = 3.0;
        agent.set_target(Point::new(50.0, 0.0), vec![]);

        for tick in 0..20u64 {
            agent.step(1.0, tick * 1000, &env, true, &mut rng);
            if agent.stuck.is_some() {
                assert!(matches!(agent.mode, LocomotionMode::RandomWalk { .. }));
                return;
            }
        }
        panic!("expected agent to enter stuck recovery within 20 ticks of being walled off");
    }

    #[test]
    fn busy_mode_picks_an_outdoor_sub_target_when_starting_outdoors() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(6);
        let mut agent = Agent::new("a1".into(), Point::new(0.0, 0.0));
        agent.set_busy(0, &env, &mut rng);
        let LocomotionMode::Busy(busy) = &agent.mode else { panic!("expected Busy mode") };
        assert!(busy.zone_building_id.is_none());
    }

    #[test]
    fn busy_mode_stays_within_the_same_building_when_starting_indoors() {
        use crate::environment::{Building, Material};
        use crate::geometry::Polygon;
        use std::collections::HashMap;

        let room = Polygon::new(vec![Point::new(-5.0, -5.0), Point::new(5.0, -5.0), Point::new(5.0, 5.0), Point::new(-5.0, 5.0)]).unwrap();
        let env = Environment::new(vec![Building {
            id: "room".into(),
            material: Material::Wood,
            polygon: room,
            properties: HashMap::new(),
        }]);

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut agent = Agent::new("a1".into(), Point::new(0.0, 0.0));
        agent.set_busy(0, &env, &mut rng);
        let LocomotionMode::Busy(busy) = &agent.mode else { panic!("expected Busy mode") };
        assert_eq!(busy.zone_building_id.as_deref(), Some("room"));
        assert!(env.inside_building(&busy.sub_target).is_some(), "sub-target should stay inside the same room");
    }

    #[test]
    fn random_walk_heading_drifts_rather_than_jumping() {
        let env = Environment::new(vec![]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(8);
        let mut agent = Agent::new("a1".into(), Point::new(0.0, 0.0));
        agent.set_random_walk(&mut rng);
        let LocomotionMode::RandomWalk { heading_rad: initial } = agent.mode else { unreachable!() };
        agent.step(0.1, 0, &env, true, &mut rng);
        let LocomotionMode::RandomWalk { heading_rad: after } = agent.mode else { unreachable!() };
        assert!((after - initial).abs() <= 0.25 + 1e-9);
    }

    #[test]
    fn random_walk_soft_bounces_at_world_boundary() {
        let velocity = Vec2::new(1.0, 0.0);
        let bounced = soft_bounce(&Point::new(WORLD_HALF_EXTENT_M, 0.0), velocity);
        assert!(bounced.x < 0.0);
    }
}
