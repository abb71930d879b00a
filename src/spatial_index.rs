//! Uniform-grid spatial index for neighbor queries.
//!
//! Rebuilt wholesale once per tick (`update_all`), rather than maintained
//! incrementally — at the agent counts this simulator targets, a full
//! rebuild is cheap and avoids an entire class of stale-bucket bugs a
//! mutation-tracking index would need to guard against.

use std::collections::HashMap;

use crate::geometry::Point;

/// Grid cell size in meters. Chosen to match the connectivity radius
/// so that any two agents within range are never more than one
/// cell apart in either axis.
pub const CELL_SIZE_M: f64 = 100.0;

type CellKey = (i32, i32);

fn cell_of(p: &Point) -> CellKey {
    ((p.x / CELL_SIZE_M).floor() as i32, (p.y / CELL_SIZE_M).floor() as i32)
}

/// Uniform grid mapping cells to the entity ids whose position falls in
/// them.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    cells: HashMap<CellKey, Vec<usize>>,
}

impl SpatialIndex {
    pub fn new() -> SpatialIndex {
        SpatialIndex { cells: HashMap::new() }
    }

    /// Rebuild the index from scratch given the current position of every
    /// entity, keyed by its index into the caller's entity list.
    pub fn update_all(&mut self, positions: &[Point]) {
        self.cells.clear();
        for (idx, p) in positions.iter().enumerate() {
            self.cells.entry(cell_of(p)).or_default().push(idx);
        }
    }

    /// All entity indices within `radius` meters of `center`, scanning the
    /// 3×3 block of cells centered on `center`'s cell and filtering by
    /// exact Euclidean distance. Correct as long as `radius <= CELL_SIZE_M`.
    pub fn neighbors(&self, center: &Point, positions: &[Point], radius: f64) -> Vec<usize> {
        let (cx, cy) = cell_of(center);
        let mut result = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(indices) = self.cells.get(&(cx + dx, cy + dy)) {
                    for &idx in indices {
                        if positions[idx].distance(center) <= radius {
                            result.push(idx);
                        }
                    }
                }
            }
        }
        result
    }
}
