//! Building environment: containment queries, path queries, and sliding
//! collision resolution.
//!
//! Buildings are loaded from a GeoJSON `FeatureCollection` of `Polygon`
//! features, following the same read → parse → validate → convert
//! pipeline this codebase already uses for scene loading, just aimed at
//! GeoJSON instead of an ad-hoc scene JSON format.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::geometry::{first_collision, project_latlon, project_onto_surface, Aabb, Point, Polygon, Vec2};

/// Coarse building material, used by the link RSSI model to select an
/// attenuation constant. Currently a single constant applies regardless of
/// material (see DESIGN.md's resolution of the internal-vs-dense open
/// question); the enum exists so that distinction can be wired up without
/// changing the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Material {
    Concrete,
    Glass,
    Wood,
    Metal,
    #[serde(other)]
    Unknown,
}

impl Default for Material {
    fn default() -> Self {
        Material::Unknown
    }
}

/// A single building: a polygon footprint plus metadata.
#[derive(Debug, Clone)]
pub struct Building {
    pub id: String,
    pub material: Material,
    pub polygon: Polygon,
    pub properties: HashMap<String, serde_json::Value>,
}

impl Building {
    pub fn vertices(&self) -> &[Point] {
        &self.polygon.vertices
    }

    pub fn bounds(&self) -> &Aabb {
        &self.polygon.bounds
    }
}

/// Result of [`Environment::resolve_movement`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementResult {
    pub position: Point,
    pub blocked: bool,
}

/// Small offset pushed along a collision normal after a hit, and the
/// minimum slide magnitude below which the resolver stops iterating.
const RESOLVE_EPSILON: f64 = 1e-3;

/// Holds the building polygons and answers path/containment queries.
///
/// `generation` increments every time the building set changes via
/// [`Environment::set_buildings`]; [`crate::pathfinder::PathFinder`] uses
/// it to decide whether its cached visibility graph is stale, rather than
/// rebuilding it on every query.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub buildings: Vec<Building>,
    generation: u64,
}

impl Environment {
    pub fn new(buildings: Vec<Building>) -> Environment {
        Environment { buildings, generation: 0 }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace the building set, bumping the generation counter so any
    /// cached visibility graph is invalidated.
    pub fn set_buildings(&mut self, buildings: Vec<Building>) {
        self.buildings = buildings;
        self.generation += 1;
    }

    /// AABB-cull buildings against the segment's own bounding box before
    /// any precise polygon test — mirrors the cheap-bound-then-precise-test
    /// ordering already used for radio reachability checks in this
    /// codebase.
    pub fn buildings_in_path(&self, a: &Point, b: &Point) -> Vec<&Building> {
        let segment_bounds = Aabb::from_segment(a, b);
        self.buildings.iter().filter(|building| building.bounds().intersects(&segment_bounds)).collect()
    }

    /// Return the building containing `p`, if any.
    pub fn inside_building(&self, p: &Point) -> Option<&Building> {
        self.buildings.iter().find(|b| b.polygon.contains_point(p))
    }

    /// Resolve a proposed move from `from` to `to`, sliding along any wall
    /// encountered instead of stopping dead.
    ///
    /// Iteratively: find the first intersection against buildings whose
    /// AABB overlaps the segment; if none, the move is unobstructed.
    /// Otherwise step to `hit + ε·normal`, project the residual
    /// displacement `(to − hit)` onto the wall, and recurse with the
    /// projected target. Stops when the slide's magnitude drops below
    /// [`RESOLVE_EPSILON`] or `max_iter` is reached.
    pub fn resolve_movement(&self, from: &Point, to: &Point, max_iter: usize) -> MovementResult {
        let mut current = *from;
        let mut target = *to;
        let mut blocked = false;

        for _ in 0..max_iter {
            let candidates = self.buildings_in_path(&current, &target);
            let polygons: Vec<&Polygon> = candidates.iter().map(|b| &b.polygon).collect();

            let Some(hit) = first_collision(&current, &target, &polygons) else {
                return MovementResult { position: target, blocked };
            };

            blocked = true;
            let nudged = hit.point.add(&hit.normal.scale(RESOLVE_EPSILON));
            let residual = Vec2::new(target.x - hit.point.x, target.y - hit.point.y);
            let slid = project_onto_surface(&residual, &hit.normal);

            if slid.length() < RESOLVE_EPSILON {
                return MovementResult { position: nudged, blocked };
            }

            current = nudged;
            target = nudged.add(&slid);
        }

        MovementResult { position: current, blocked }
    }
}

// ---------------------------------------------------------------------
// GeoJSON loading
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GeoJsonFeatureCollection {
    features: Vec<GeoJsonFeature>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonFeature {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    properties: Option<HashMap<String, serde_json::Value>>,
    geometry: GeoJsonGeometry,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJsonGeometry {
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
    #[serde(other)]
    Other,
}

/// Load a building environment from a GeoJSON `FeatureCollection` of
/// `Polygon` features.
///
/// Only the outer ring (`coordinates[0]`) of each polygon is read. The
/// last vertex is dropped if it duplicates the first within 0.01 m after
/// projection (GeoJSON polygons are explicitly closed; our internal
/// [`Polygon`] is not). Features with fewer than 3 unique vertices after
/// that step are rejected (skipped, not fatal). Coordinates are projected
/// about `(ref_lat, ref_lon)`; pass `None` to use the centroid of all
/// coordinates in the file instead.
pub fn load_geojson(path: &str, reference: Option<(f64, f64)>) -> Result<Environment> {
    let data = std::fs::read_to_string(path).with_context(|| format!("Failed to read environment file: {path}"))?;
    parse_geojson(&data, reference)
}

fn parse_geojson(data: &str, reference: Option<(f64, f64)>) -> Result<Environment> {
    let collection: GeoJsonFeatureCollection = serde_json::from_str(data).context("Invalid GeoJSON FeatureCollection")?;

    let (ref_lat, ref_lon) = match reference {
        Some(r) => r,
        None => centroid_of(&collection),
    };

    let mut buildings = Vec::new();
    for (idx, feature) in collection.features.into_iter().enumerate() {
        let GeoJsonGeometry::Polygon { coordinates } = feature.geometry else {
            continue;
        };
        let Some(outer_ring) = coordinates.first() else {
            continue;
        };

        let mut vertices: Vec<Point> = outer_ring.iter().map(|[lon, lat]| project_latlon(*lat, *lon, ref_lat, ref_lon)).collect();

        if vertices.len() >= 2 {
            let first = vertices[0];
            let last = *vertices.last().unwrap();
            if first.distance(&last) < 0.01 {
                vertices.pop();
            }
        }

        dedup_consecutive(&mut vertices);

        let Some(polygon) = Polygon::new(vertices) else {
            continue;
        };

        let properties = feature.properties.unwrap_or_default();
        let material = properties
            .get("material")
            .and_then(|v| v.as_str())
            .map(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).unwrap_or_default())
            .unwrap_or_default();
        let id = feature.id.as_ref().and_then(|v| v.as_str().map(|s| s.to_string())).unwrap_or_else(|| idx.to_string());

        buildings.push(Building { id, material, polygon, properties });
    }

    Ok(Environment::new(buildings))
}

fn centroid_of(collection: &GeoJsonFeatureCollection) -> (f64, f64) {
    let mut sum_lat = 0.0;
    let mut sum_lon = 0.0;
    let mut n = 0.0;
    for feature in &collection.features {
        if let GeoJsonGeometry::Polygon { coordinates } = &feature.geometry {
            if let Some(ring) = coordinates.first() {
                for [lon, lat] in ring {
                    sum_lat += lat;
                    sum_lon += lon;
                    n += 1.0;
                }
            }
        }
    }
    if n == 0.0 {
        (0.0, 0.0)
    } else {
        (sum_lat / n, sum_lon / n)
    }
}

fn dedup_consecutive(vertices: &mut Vec<Point>) {
    let mut i = 1;
    while i < vertices.len() {
        if vertices[i].distance(&vertices[i - 1]) < 0.01 {
            vertices.remove(i);
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_building(id: &str, side: f64) -> Building {
        let polygon = Polygon::new(vec![Point::new(0.0, 0.0), Point::new(side, 0.0), Point::new(side, side), Point::new(0.0, side)]).unwrap();
        Building {
            id: id.to_string(),
            material: Material::Concrete,
            polygon,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn resolve_movement_passes_through_clear_space() {
        let env = Environment::new(vec![]);
        let from = Point::new(0.0, 0.0);
        let to = Point::new(10.0, 0.0);
        let result = env.resolve_movement(&from, &to, 3);
        assert_eq!(result.position, to);
        assert!(!result.blocked);
    }

    #[test]
    fn resolve_movement_never_lands_inside_a_building() {
        let env = Environment::new(vec![square_building("b1", 10.0)]);
        let from = Point::new(-5.0, 5.0);
        let to = Point::new(20.0, 5.0);
        let result = env.resolve_movement(&from, &to, 3);
        assert!(env.inside_building(&result.position).is_none());
        assert!(result.blocked);
    }

    #[test]
    fn inside_building_reports_containing_building() {
        let env = Environment::new(vec![square_building("b1", 10.0)]);
        assert_eq!(env.inside_building(&Point::new(5.0, 5.0)).map(|b| b.id.as_str()), Some("b1"));
        assert!(env.inside_building(&Point::new(50.0, 50.0)).is_none());
    }

    #[test]
    fn buildings_in_path_culls_by_aabb() {
        let env = Environment::new(vec![square_building("near", 10.0)]);
        let far = env.buildings_in_path(&Point::new(1000.0, 1000.0), &Point::new(1001.0, 1001.0));
        assert!(far.is_empty());
        let near = env.buildings_in_path(&Point::new(-1.0, 5.0), &Point::new(11.0, 5.0));
        assert_eq!(near.len(), 1);
    }

    #[test]
    fn geojson_loads_polygon_and_drops_closing_vertex() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "id": "b1",
                "properties": {"material": "concrete"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [0.0, 0.001], [0.001, 0.001], [0.001, 0.0], [0.0, 0.0]]]
                }
            }]
        }"#;
        let env = parse_geojson(json, Some((0.0, 0.0))).unwrap();
        assert_eq!(env.buildings.len(), 1);
        assert_eq!(env.buildings[0].polygon.vertices.len(), 4);
        assert_eq!(env.buildings[0].material, Material::Concrete);
    }

    #[test]
    fn geojson_rejects_degenerate_polygon() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [0.0, 0.0], [0.0, 0.0]]]
                }
            }]
        }"#;
        let env = parse_geojson(json, Some((0.0, 0.0))).unwrap();
        assert!(env.buildings.is_empty());
    }
}
