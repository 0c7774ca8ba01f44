//! Grid Coordinates & Windows
//!
//! Value types shared by every other module:
//! - `Coordinate`: absolute 3D tile position, usable as a map key
//! - `ChunkWindow`: rectangular tile-aligned region on one z level, used both
//!   for storage chunking and for network sync windows (different sizes)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Absolute tile position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Origin of the `size`-aligned chunk containing this coordinate.
    /// Floor division, so negative coordinates land in the chunk below zero.
    pub fn chunk_origin(&self, size: i32) -> Self {
        Self::new(
            self.x.div_euclid(size) * size,
            self.y.div_euclid(size) * size,
            self.z,
        )
    }

    /// Row-major index of this coordinate inside its `size`-aligned chunk
    pub fn local_index(&self, size: i32) -> usize {
        let lx = self.x.rem_euclid(size);
        let ly = self.y.rem_euclid(size);
        (lx + ly * size) as usize
    }

    /// Chebyshev distance on the horizontal plane
    pub fn horizontal_distance(&self, other: &Coordinate) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl From<(i32, i32, i32)> for Coordinate {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self::new(x, y, z)
    }
}

/// Rectangular region on a single z level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkWindow {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub width: i32,
    pub height: i32,
}

impl ChunkWindow {
    pub const fn new(x: i32, y: i32, z: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            z,
            width,
            height,
        }
    }

    /// The `size`×`size` window containing `coordinate`
    pub fn aligned(coordinate: Coordinate, size: i32) -> Self {
        let origin = coordinate.chunk_origin(size);
        Self::new(origin.x, origin.y, origin.z, size, size)
    }

    /// Every aligned window within `range` windows horizontally and
    /// `vertical_range` levels vertically of `center`.
    ///
    /// Produces `(2r+1)² · (2vr+1)` windows ordered by z, then y, then x.
    pub fn around(center: Coordinate, range: i32, vertical_range: i32, size: i32) -> Vec<Self> {
        let origin = center.chunk_origin(size);
        let side = (2 * range + 1).max(0) as usize;
        let levels = (2 * vertical_range + 1).max(0) as usize;
        let mut windows = Vec::with_capacity(side * side * levels);

        for z in (center.z - vertical_range)..=(center.z + vertical_range) {
            for dy in -range..=range {
                for dx in -range..=range {
                    windows.push(Self::new(
                        origin.x + dx * size,
                        origin.y + dy * size,
                        z,
                        size,
                        size,
                    ));
                }
            }
        }
        windows
    }

    /// In-range predicate matching `around`: true when this window is one of
    /// the windows `around(center, range, vertical_range, size)` would produce.
    pub fn is_within_range(&self, center: Coordinate, range: i32, vertical_range: i32, size: i32) -> bool {
        if self.width != size || self.height != size {
            return false;
        }
        if self.x.rem_euclid(size) != 0 || self.y.rem_euclid(size) != 0 {
            return false;
        }
        let origin = center.chunk_origin(size);
        let dx = (self.x - origin.x) / size;
        let dy = (self.y - origin.y) / size;
        dx.abs() <= range && dy.abs() <= range && (self.z - center.z).abs() <= vertical_range
    }

    pub fn contains(&self, coordinate: Coordinate) -> bool {
        coordinate.z == self.z
            && coordinate.x >= self.x
            && coordinate.x < self.x + self.width
            && coordinate.y >= self.y
            && coordinate.y < self.y + self.height
    }

    /// True when `coordinate` lies in this window grown by `padding` on every side
    pub fn contains_padded(&self, coordinate: Coordinate, padding: i32) -> bool {
        coordinate.z == self.z
            && coordinate.x >= self.x - padding
            && coordinate.x < self.x + self.width + padding
            && coordinate.y >= self.y - padding
            && coordinate.y < self.y + self.height + padding
    }

    pub fn padded_width(&self, padding: i32) -> i32 {
        self.width + 2 * padding
    }

    pub fn padded_height(&self, padding: i32) -> i32 {
        self.height + 2 * padding
    }

    pub fn origin(&self) -> Coordinate {
        Coordinate::new(self.x, self.y, self.z)
    }

    /// Origins of every `size`-aligned storage chunk overlapping this window
    /// grown by `padding`
    pub fn overlapping_chunks(&self, padding: i32, size: i32) -> Vec<Coordinate> {
        let min = Coordinate::new(self.x - padding, self.y - padding, self.z).chunk_origin(size);
        let max_x = self.x + self.width + padding - 1;
        let max_y = self.y + self.height + padding - 1;
        let mut origins = Vec::new();
        let mut cy = min.y;
        while cy <= max_y {
            let mut cx = min.x;
            while cx <= max_x {
                origins.push(Coordinate::new(cx, cy, self.z));
                cx += size;
            }
            cy += size;
        }
        origins
    }

    /// Aligned windows touching the 3×3 neighbourhood of `coordinate`.
    ///
    /// A tile change can alter the transitions of its neighbours, and a
    /// neighbour may sit in the adjacent window's padding ring.
    pub fn neighborhood_windows(coordinate: Coordinate, size: i32) -> Vec<Self> {
        let mut windows = BTreeSet::new();
        for dy in -1..=1 {
            for dx in -1..=1 {
                windows.insert(Self::aligned(coordinate.offset(dx, dy, 0), size));
            }
        }
        windows.into_iter().collect()
    }
}

impl fmt::Display for ChunkWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {} {}x{}]",
            self.x, self.y, self.z, self.width, self.height
        )
    }
}

/// Serde adapter for `HashMap<Coordinate, V>`: JSON object keys must be
/// strings, so the map is written as a sorted list of `[coordinate, value]`.
pub(crate) mod coordinate_map {
    use super::Coordinate;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S, V>(map: &HashMap<Coordinate, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut entries: Vec<(&Coordinate, &V)> = map.iter().collect();
        entries.sort_by_key(|(coordinate, _)| **coordinate);
        serializer.collect_seq(entries)
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<HashMap<Coordinate, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let entries: Vec<(Coordinate, V)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_chunk_origin_negative() {
        let c = Coordinate::new(-1, -65, 3);
        assert_eq!(c.chunk_origin(64), Coordinate::new(-64, -128, 3));
        assert_eq!(Coordinate::new(63, 64, 0).chunk_origin(64), Coordinate::new(0, 64, 0));
    }

    #[test]
    fn test_local_index() {
        assert_eq!(Coordinate::new(0, 0, 0).local_index(64), 0);
        assert_eq!(Coordinate::new(65, 1, 0).local_index(64), 65);
        assert_eq!(Coordinate::new(-1, 0, 0).local_index(64), 63);
    }

    #[test]
    fn test_coordinate_hash_equality() {
        let mut set = HashSet::new();
        set.insert(Coordinate::new(1, 2, 3));
        assert!(set.contains(&Coordinate::new(1, 2, 3)));
        assert!(!set.contains(&Coordinate::new(3, 2, 1)));
    }

    #[test]
    fn test_window_around_count_and_uniqueness() {
        let windows = ChunkWindow::around(Coordinate::new(5, 5, 0), 2, 1, 16);
        assert_eq!(windows.len(), 5 * 5 * 3);
        let unique: HashSet<_> = windows.iter().copied().collect();
        assert_eq!(unique.len(), windows.len());
        assert!(windows.iter().all(|w| w.width == 16 && w.height == 16));
    }

    #[test]
    fn test_window_around_matches_in_range_predicate() {
        let center = Coordinate::new(-20, 37, 2);
        for window in ChunkWindow::around(center, 1, 0, 16) {
            assert!(window.is_within_range(center, 1, 0, 16));
        }
        let far = ChunkWindow::new(64, 64, 2, 16, 16);
        assert!(!far.is_within_range(center, 1, 0, 16));
        let wrong_level = ChunkWindow::aligned(center, 16);
        assert!(!ChunkWindow { z: 4, ..wrong_level }.is_within_range(center, 1, 1, 16));
    }

    #[test]
    fn test_window_equality() {
        let a = ChunkWindow::aligned(Coordinate::new(3, 3, 0), 16);
        let b = ChunkWindow::new(0, 0, 0, 16, 16);
        assert_eq!(a, b);
    }

    #[test]
    fn test_contains_and_padded() {
        let w = ChunkWindow::new(16, 16, 0, 16, 16);
        assert!(w.contains(Coordinate::new(16, 31, 0)));
        assert!(!w.contains(Coordinate::new(32, 16, 0)));
        assert!(!w.contains(Coordinate::new(16, 16, 1)));
        assert!(w.contains_padded(Coordinate::new(15, 32, 0), 1));
        assert!(!w.contains_padded(Coordinate::new(14, 32, 0), 1));
    }

    #[test]
    fn test_overlapping_chunks_crosses_negative_boundary() {
        let window = ChunkWindow::new(0, 0, 0, 16, 16);
        let chunks = window.overlapping_chunks(1, 64);
        assert_eq!(
            chunks,
            vec![
                Coordinate::new(-64, -64, 0),
                Coordinate::new(0, -64, 0),
                Coordinate::new(-64, 0, 0),
                Coordinate::new(0, 0, 0),
            ]
        );
        let inner = ChunkWindow::new(16, 16, 0, 16, 16);
        assert_eq!(inner.overlapping_chunks(1, 64), vec![Coordinate::new(0, 0, 0)]);
    }

    #[test]
    fn test_neighborhood_windows_at_corner() {
        let windows = ChunkWindow::neighborhood_windows(Coordinate::new(16, 16, 0), 16);
        assert_eq!(windows.len(), 4);
        let interior = ChunkWindow::neighborhood_windows(Coordinate::new(20, 20, 0), 16);
        assert_eq!(interior, vec![ChunkWindow::new(16, 16, 0, 16, 16)]);
    }
}
