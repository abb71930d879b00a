//! Geometric primitives the rest of the engine depends on.
//!
//! Contains:
//! - Point-in-polygon (even-odd ray cast)
//! - Parametric segment-segment intersection
//! - Line-through-polygon (entry/exit/traversal distance)
//! - First-collision across a candidate set of polygons
//! - Velocity projection onto a surface normal (for wall sliding)
//! - Polygon inflation (bisector offset, clamped at sharp corners)
//! - Equirectangular lat/lon ↔ local-meter projection
//!
//! Degenerate inputs (zero-length segments, polygons with < 3 vertices) are
//! skipped at the source rather than propagated as errors, per the engine's
//! error-handling policy: geometry invariant violations are silently
//! skipped, never fatal.

/// Earth radius in meters, used by the equirectangular projection.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Tolerance below which a segment-intersection parameter is treated as
/// "at the start point" rather than a genuine forward hit. Prevents
/// re-detecting the edge an agent is sliding away from as a new collision.
pub const COLLISION_T_EPSILON: f64 = 1e-6;

/// A point in a local 2D coordinate system (meters, unless otherwise noted).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn sub(&self, other: &Point) -> Vec2 {
        Vec2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn add(&self, v: &Vec2) -> Point {
        Point {
            x: self.x + v.x,
            y: self.y + v.y,
        }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        self.sub(other).length()
    }

    pub fn distance2(&self, other: &Point) -> f64 {
        let d = self.sub(other);
        d.x * d.x + d.y * d.y
    }
}

/// A free vector (displacement or velocity) in the same coordinate system
/// as [`Point`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn dot(&self, other: &Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn scale(&self, s: f64) -> Vec2 {
        Vec2::new(self.x * s, self.y * s)
    }

    pub fn normalized(&self) -> Vec2 {
        let len = self.length();
        if len < 1e-12 {
            Vec2::new(0.0, 0.0)
        } else {
            Vec2::new(self.x / len, self.y / len)
        }
    }

    /// Perpendicular vector, rotated 90° counter-clockwise.
    pub fn perp(&self) -> Vec2 {
        Vec2::new(-self.y, self.x)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point,
    pub max: Point,
}

impl Aabb {
    pub fn from_points(points: &[Point]) -> Option<Aabb> {
        let mut iter = points.iter();
        let first = iter.next()?;
        let mut min = *first;
        let mut max = *first;
        for p in iter {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some(Aabb { min, max })
    }

    pub fn from_segment(a: &Point, b: &Point) -> Aabb {
        Aabb {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x && self.min.y <= other.max.y && self.max.y >= other.min.y
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// A simple polygon: an ordered (either winding) list of ≥ 3 vertices, not
/// explicitly closed (the last vertex implicitly connects back to the
/// first). Degenerate polygons (< 3 vertices) cannot be constructed via
/// [`Polygon::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub vertices: Vec<Point>,
    pub bounds: Aabb,
}

impl Polygon {
    /// Build a polygon from its vertices. Returns `None` if fewer than 3
    /// vertices are given — callers at the boundary (GeoJSON loading) must
    /// reject the feature; internal callers treat `None` as "skip".
    pub fn new(vertices: Vec<Point>) -> Option<Polygon> {
        if vertices.len() < 3 {
            return None;
        }
        let bounds = Aabb::from_points(&vertices)?;
        Some(Polygon { vertices, bounds })
    }

    pub fn edges(&self) -> impl Iterator<Item = (&Point, &Point)> {
        let n = self.vertices.len();
        (0..n).map(move |i| (&self.vertices[i], &self.vertices[(i + 1) % n]))
    }

    /// Even-odd ray cast point-in-polygon test. A point exactly on an edge
    /// is treated as outside (the edge-hit convention).
    pub fn contains_point(&self, p: &Point) -> bool {
        point_in_polygon(p, &self.vertices)
    }

    /// Outward normal of the edge starting at vertex index `i`, assuming
    /// the polygon's winding is such that interior lies to one consistent
    /// side; orientation is resolved by picking the normal pointing away
    /// from the polygon centroid.
    pub fn outward_normal_of_edge(&self, i: usize) -> Vec2 {
        let n = self.vertices.len();
        let a = self.vertices[i];
        let b = self.vertices[(i + 1) % n];
        let edge = b.sub(&a);
        let candidate = edge.perp().normalized();
        let centroid = self.centroid();
        let mid = Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0);
        let to_centroid = centroid.sub(&mid);
        if candidate.dot(&to_centroid) > 0.0 {
            // candidate points toward the interior; flip it.
            Vec2::new(-candidate.x, -candidate.y)
        } else {
            candidate
        }
    }

    pub fn centroid(&self) -> Point {
        let n = self.vertices.len() as f64;
        let (sx, sy) = self.vertices.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / n, sy / n)
    }
}

/// Even-odd ray cast: cast a ray in +x direction from `p` and count edge
/// crossings. An edge that the point lies exactly on is not counted as a
/// crossing, so boundary points test as outside.
pub fn point_in_polygon(p: &Point, vertices: &[Point]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = vertices[i];
        let vj = vertices[j];
        let on_edge = is_on_segment(p, &vi, &vj);
        if on_edge {
            return false;
        }
        let crosses = (vi.y > p.y) != (vj.y > p.y);
        if crosses {
            let x_at_y = vj.x + (p.y - vj.y) / (vi.y - vj.y) * (vi.x - vj.x);
            if p.x < x_at_y {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn is_on_segment(p: &Point, a: &Point, b: &Point) -> bool {
    let cross = (p.x - a.x) * (b.y - a.y) - (p.y - a.y) * (b.x - a.x);
    if cross.abs() > 1e-9 {
        return false;
    }
    let dot = (p.x - a.x) * (b.x - a.x) + (p.y - a.y) * (b.y - a.y);
    if dot < 0.0 {
        return false;
    }
    let len2 = (b.x - a.x).powi(2) + (b.y - a.y).powi(2);
    dot <= len2
}

/// Result of a parametric segment-segment intersection test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentIntersection {
    /// Parameter along segment A→B, in [0, 1].
    pub t: f64,
    /// Parameter along segment C→D, in [0, 1].
    pub u: f64,
    pub point: Point,
}

/// Parametric intersection of segment `a`→`b` with segment `c`→`d`.
///
/// Parallel segments (`|denominator| < 1e-10`) report no intersection, even
/// if collinear and overlapping — this is a simplification the engine
/// accepts. Endpoints lying exactly on the other segment count as
/// intersections (`0 ≤ t, u ≤ 1`, inclusive).
pub fn segment_intersection(a: &Point, b: &Point, c: &Point, d: &Point) -> Option<SegmentIntersection> {
    let r = b.sub(a);
    let s = d.sub(c);
    let denom = r.x * s.y - r.y * s.x;
    if denom.abs() < 1e-10 {
        return None;
    }
    let ac = c.sub(a);
    let t = (ac.x * s.y - ac.y * s.x) / denom;
    let u = (ac.x * r.y - ac.y * r.x) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(SegmentIntersection {
            t,
            u,
            point: a.add(&r.scale(t)),
        })
    } else {
        None
    }
}

/// Result of [`line_through_polygon`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Traversal {
    pub entry: Point,
    pub exit: Point,
    pub distance: f64,
}

/// How far (and through which two points) a straight line from `a` to `b`
/// traverses the interior of `polygon`.
///
/// If the segment crosses ≥ 2 edges, `entry`/`exit` are the first and last
/// crossings sorted by parameter `t` along `a`→`b`. If fewer than two
/// crossings exist but both endpoints are inside the polygon, the whole
/// segment (`a`, `b`) is treated as the traversal. Otherwise returns `None`
/// (the line does not meaningfully cross the polygon's interior).
pub fn line_through_polygon(a: &Point, b: &Point, polygon: &Polygon) -> Option<Traversal> {
    let mut hits: Vec<(f64, Point)> = polygon.edges().filter_map(|(c, d)| segment_intersection(a, b, c, d).map(|hit| (hit.t, hit.point))).collect();
    hits.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap());

    if hits.len() >= 2 {
        let entry = hits.first().unwrap().1;
        let exit = hits.last().unwrap().1;
        Some(Traversal {
            entry,
            exit,
            distance: entry.distance(&exit),
        })
    } else if polygon.contains_point(a) && polygon.contains_point(b) {
        Some(Traversal {
            entry: *a,
            exit: *b,
            distance: a.distance(b),
        })
    } else {
        None
    }
}

/// Result of [`first_collision`].
#[derive(Debug, Clone)]
pub struct Collision<'a> {
    pub point: Point,
    pub normal: Vec2,
    pub polygon: &'a Polygon,
    pub t: f64,
}

/// Find the earliest point along segment `from`→`to` at which any polygon
/// in `candidates` is hit, together with the outward normal of the hit edge
/// and the polygon itself.
///
/// Intersections with `t < `[`COLLISION_T_EPSILON`] are ignored: this
/// prevents an agent sliding along a wall from immediately re-detecting the
/// edge it is leaving as a fresh collision.
pub fn first_collision<'a>(from: &Point, to: &Point, candidates: &'a [&'a Polygon]) -> Option<Collision<'a>> {
    let mut best: Option<Collision<'a>> = None;
    for polygon in candidates {
        for (i, (c, d)) in polygon.edges().enumerate() {
            if let Some(hit) = segment_intersection(from, to, c, d) {
                if hit.t < COLLISION_T_EPSILON {
                    continue;
                }
                let better = match &best {
                    Some(b) => hit.t < b.t,
                    None => true,
                };
                if better {
                    best = Some(Collision {
                        point: hit.point,
                        normal: polygon.outward_normal_of_edge(i),
                        polygon,
                        t: hit.t,
                    });
                }
            }
        }
    }
    best
}

/// Project a velocity vector onto a surface with outward unit normal `n`,
/// removing the component driving into the surface. Used to make an agent
/// slide along a wall instead of stopping dead.
pub fn project_onto_surface(v: &Vec2, n: &Vec2) -> Vec2 {
    let into_surface = v.dot(n);
    Vec2::new(v.x - into_surface * n.x, v.y - into_surface * n.y)
}

/// Offset every vertex of `polygon` outward by `padding` meters, forming a
/// clearance polygon used by the pathfinder's visibility graph.
///
/// Each vertex is displaced along the unit bisector of its two adjacent
/// outward edge normals, scaled by `padding / cos(theta)` where `theta` is
/// the half-angle between the normals; the offset is clamped to `3 *
/// padding` to bound how far sharp corners get pushed out.
pub fn inflate_polygon(polygon: &Polygon, padding: f64) -> Vec<Point> {
    let n = polygon.vertices.len();
    let mut inflated = Vec::with_capacity(n);
    for i in 0..n {
        let prev = (i + n - 1) % n;
        let normal_prev = polygon.outward_normal_of_edge(prev);
        let normal_here = polygon.outward_normal_of_edge(i);
        let bisector = Vec2::new(normal_prev.x + normal_here.x, normal_prev.y + normal_here.y).normalized();
        let bisector = if bisector.length() < 1e-9 { normal_here } else { bisector };

        let cos_theta = bisector.dot(&normal_here).max(1e-3);
        let offset = (padding / cos_theta).min(3.0 * padding);

        let v = polygon.vertices[i];
        inflated.push(v.add(&bisector.scale(offset)));
    }
    inflated
}

/// Project a lat/lon coordinate onto a local equirectangular plane, in
/// meters, about a reference latitude/longitude (typically the dataset
/// centroid or a caller-supplied anchor).
pub fn project_latlon(lat: f64, lon: f64, ref_lat: f64, ref_lon: f64) -> Point {
    let x = (lon - ref_lon).to_radians() * EARTH_RADIUS_M * ref_lat.to_radians().cos();
    let y = (lat - ref_lat).to_radians() * EARTH_RADIUS_M;
    Point::new(x, y)
}
