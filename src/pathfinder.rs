//! Visibility-graph pathfinding over inflated building polygons.
//!
//! The base graph (nodes = inflated-polygon corners, edges = mutually
//! visible corner pairs) is rebuilt lazily: [`PathFinder`] remembers the
//! [`Environment`] generation it was built against and only recomputes
//! when that generation has moved on, mirroring the
//! cached-result-plus-generation-counter pattern this codebase already
//! uses for connection-distance caching.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::environment::Environment;
use crate::geometry::{first_collision, inflate_polygon, Point, Polygon};

/// Padding applied around each building when inflating its polygon for
/// the visibility graph — keeps the path from hugging walls exactly.
pub const CLEARANCE_PADDING_M: f64 = 1.5;

/// Minimum usable gap width between two obstacles; half of this is the
/// clearance radius checked at a candidate edge's midpoint.
pub const MIN_GAP_WIDTH_M: f64 = 2.0;

/// Distance by which a line-of-sight segment's endpoints are shrunk
/// toward each other before testing, so that two points sharing a vertex
/// (a polygon corner) don't spuriously "collide" with their own edge.
const ENDPOINT_SHRINK_M: f64 = 0.01;

/// Outcome of [`PathFinder::find_path`]. On failure `waypoints` is still
/// `[start, goal]` and `distance` is their direct Euclidean distance, so a
/// caller that just wants *somewhere to walk toward* can fall back to that
/// straight line and let the collision resolver make local progress,
/// instead of getting stuck on a hard `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub found: bool,
    pub waypoints: Vec<Point>,
    pub distance: f64,
}

/// Visibility-graph pathfinder.
#[derive(Debug, Default)]
pub struct PathFinder {
    cached_generation: Option<u64>,
    inflated: Vec<Polygon>,
    nodes: Vec<Point>,
    edges: HashMap<usize, Vec<(usize, f64)>>,
}

impl PathFinder {
    pub fn new() -> PathFinder {
        PathFinder::default()
    }

    /// Rebuild the base visibility graph if `environment`'s generation has
    /// changed since the last build.
    fn ensure_built(&mut self, environment: &Environment) {
        if self.cached_generation == Some(environment.generation()) {
            return;
        }

        self.inflated = environment.buildings.iter().filter_map(|b| Polygon::new(inflate_polygon(&b.polygon, CLEARANCE_PADDING_M))).collect();

        self.nodes = self.inflated.iter().flat_map(|p| p.vertices.iter().copied()).collect();

        self.edges = HashMap::new();
        for i in 0..self.nodes.len() {
            for j in (i + 1)..self.nodes.len() {
                if self.has_line_of_sight(&self.nodes[i], &self.nodes[j]) {
                    let dist = self.nodes[i].distance(&self.nodes[j]);
                    self.edges.entry(i).or_default().push((j, dist));
                    self.edges.entry(j).or_default().push((i, dist));
                }
            }
        }

        self.cached_generation = Some(environment.generation());
    }

    /// Whether a straight segment between `a` and `b` clears every
    /// inflated polygon: no crossing, and the segment's midpoint keeps at
    /// least `MIN_GAP_WIDTH_M / 2` clearance from any polygon edge.
    /// Endpoints are shrunk toward each other first so two points sharing
    /// a polygon corner don't collide with their own incident edges.
    fn has_line_of_sight(&self, a: &Point, b: &Point) -> bool {
        let dir = b.sub(a);
        let len = dir.length();
        if len < 1e-9 {
            return true;
        }
        let shrink = dir.normalized().scale(ENDPOINT_SHRINK_M.min(len / 2.0));
        let a_shrunk = a.add(&shrink);
        let b_shrunk = b.add(&shrink.scale(-1.0));

        let refs: Vec<&Polygon> = self.inflated.iter().collect();
        if first_collision(&a_shrunk, &b_shrunk, &refs).is_some() {
            return false;
        }

        let midpoint = Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0);
        for polygon in &self.inflated {
            if polygon.contains_point(&midpoint) {
                return false;
            }
            for (p, q) in polygon.edges() {
                if distance_point_to_segment(&midpoint, p, q) < MIN_GAP_WIDTH_M / 2.0 {
                    return false;
                }
            }
        }
        true
    }

    /// Find a path from `start` to `goal`. A direct line of sight
    /// short-circuits the graph search; otherwise `start` and `goal` are
    /// spliced into the cached visibility graph as temporary nodes and an
    /// A* search runs over Euclidean edge weights. When no route exists,
    /// the result still carries `[start, goal]` as its waypoints with
    /// `found = false`, rather than a bare failure the caller cannot act on.
    pub fn find_path(&mut self, environment: &Environment, start: Point, goal: Point) -> PathResult {
        self.ensure_built(environment);
        let direct_distance = start.distance(&goal);

        if self.has_line_of_sight(&start, &goal) {
            return PathResult { found: true, waypoints: vec![start, goal], distance: direct_distance };
        }

        if self.nodes.is_empty() {
            return PathResult { found: false, waypoints: vec![start, goal], distance: direct_distance };
        }

        let start_idx = self.nodes.len();
        let goal_idx = self.nodes.len() + 1;
        let mut nodes = self.nodes.clone();
        nodes.push(start);
        nodes.push(goal);

        let mut edges = self.edges.clone();
        for (i, node) in self.nodes.iter().enumerate() {
            if self.has_line_of_sight(&start, node) {
                let d = start.distance(node);
                edges.entry(start_idx).or_default().push((i, d));
                edges.entry(i).or_default().push((start_idx, d));
            }
            if self.has_line_of_sight(&goal, node) {
                let d = goal.distance(node);
                edges.entry(goal_idx).or_default().push((i, d));
                edges.entry(i).or_default().push((goal_idx, d));
            }
        }
        if self.has_line_of_sight(&start, &goal) {
            let d = start.distance(&goal);
            edges.entry(start_idx).or_default().push((goal_idx, d));
            edges.entry(goal_idx).or_default().push((start_idx, d));
        }

        match astar(&nodes, &edges, start_idx, goal_idx) {
            Some(path_indices) => {
                let waypoints: Vec<Point> = path_indices.into_iter().map(|i| nodes[i]).collect();
                let distance = waypoints.windows(2).map(|w| w[0].distance(&w[1])).sum();
                PathResult { found: true, waypoints, distance }
            }
            None => PathResult { found: false, waypoints: vec![start, goal], distance: direct_distance },
        }
    }
}

fn distance_point_to_segment(p: &Point, a: &Point, b: &Point) -> f64 {
    let ab = b.sub(a);
    let len2 = ab.dot(&ab);
    if len2 < 1e-12 {
        return p.distance(a);
    }
    let t = p.sub(a).dot(&ab) / len2;
    let t_clamped = t.clamp(0.0, 1.0);
    let closest = a.add(&ab.scale(t_clamped));
    p.distance(&closest)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HeapEntry {
    cost: f64,
    node: usize,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap via `BinaryHeap` (which is a max-heap).
        other.cost.partial_cmp(&self.cost).unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A* search over an explicit node/edge list, using Euclidean distance to
/// `goal` as the heuristic.
fn astar(nodes: &[Point], edges: &HashMap<usize, Vec<(usize, f64)>>, start: usize, goal: usize) -> Option<Vec<usize>> {
    let mut open = BinaryHeap::new();
    let mut g_score: HashMap<usize, f64> = HashMap::new();
    let mut came_from: HashMap<usize, usize> = HashMap::new();

    g_score.insert(start, 0.0);
    open.push(HeapEntry { cost: nodes[start].distance(&nodes[goal]), node: start });

    while let Some(HeapEntry { node: current, .. }) = open.pop() {
        if current == goal {
            let mut path = vec![current];
            let mut cursor = current;
            while let Some(&prev) = came_from.get(&cursor) {
                path.push(prev);
                cursor = prev;
            }
            path.reverse();
            return Some(path);
        }

        let current_g = *g_score.get(&current).unwrap_or(&f64::INFINITY);
        let Some(neighbors) = edges.get(&current) else { continue };
        for &(next, weight) in neighbors {
            let tentative = current_g + weight;
            if tentative < *g_score.get(&next).unwrap_or(&f64::INFINITY) {
                g_score.insert(next, tentative);
                came_from.insert(next, current);
                let f = tentative + nodes[next].distance(&nodes[goal]);
                open.push(HeapEntry { cost: f, node: next });
            }
        }
    }

    None
}
