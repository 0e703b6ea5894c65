//! Simple polygon type with validity checks
//!
//! Only the outer ring of a village boundary is kept. Validation mirrors the
//! checks a geospatial library applies before sending a region to the
//! platform: enough distinct vertices, finite coordinates, non-zero area and
//! no self-intersection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance used for orientation and area tests (coordinates are degrees)
const EPSILON: f64 = 1e-12;

/// A vertex in lon/lat (x/y) order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Longitude / easting
    pub x: f64,
    /// Latitude / northing
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Reasons a boundary cannot be used for extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryIssue {
    /// No boundary was supplied
    Missing,
    /// Fewer than three distinct vertices
    TooFewVertices,
    /// A coordinate is NaN or infinite
    NonFinite,
    /// The ring encloses no area
    ZeroArea,
    /// Two edges of the ring cross or touch
    SelfIntersection,
}

impl fmt::Display for GeometryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Missing => "missing geometry",
            Self::TooFewVertices => "fewer than three distinct vertices",
            Self::NonFinite => "non-finite coordinate",
            Self::ZeroArea => "zero-area polygon",
            Self::SelfIntersection => "self-intersecting polygon",
        };
        f.write_str(text)
    }
}

/// Polygon described by its outer ring
///
/// The ring is stored open: a closing vertex equal to the first one is
/// dropped on construction, as are consecutive duplicate vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    exterior: Vec<Point>,
}

impl Polygon {
    /// Build a polygon from a ring of vertices (closed or open)
    #[must_use]
    pub fn new(ring: Vec<Point>) -> Self {
        let mut exterior: Vec<Point> = Vec::with_capacity(ring.len());
        for point in ring {
            if exterior.last() != Some(&point) {
                exterior.push(point);
            }
        }
        if exterior.len() > 1 && exterior.first() == exterior.last() {
            exterior.pop();
        }
        Self { exterior }
    }

    /// Build a polygon from `(x, y)` tuples
    #[must_use]
    pub fn from_coords(coords: &[(f64, f64)]) -> Self {
        Self::new(coords.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    /// Vertices of the open outer ring
    #[must_use]
    pub fn exterior(&self) -> &[Point] {
        &self.exterior
    }

    /// Signed shoelace area (positive for counter-clockwise rings)
    #[must_use]
    pub fn signed_area(&self) -> f64 {
        let n = self.exterior.len();
        if n < 3 {
            return 0.0;
        }
        let twice: f64 = (0..n)
            .map(|i| {
                let a = self.exterior[i];
                let b = self.exterior[(i + 1) % n];
                a.x.mul_add(b.y, -(b.x * a.y))
            })
            .sum();
        twice / 2.0
    }

    /// Absolute area in squared coordinate units
    #[must_use]
    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Area-weighted centroid, falling back to the vertex mean for degenerate rings
    #[must_use]
    pub fn centroid(&self) -> Option<Point> {
        let n = self.exterior.len();
        if n == 0 {
            return None;
        }
        let area = self.signed_area();
        if area.abs() < EPSILON {
            let (sx, sy) = self
                .exterior
                .iter()
                .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
            return Some(Point::new(sx / n as f64, sy / n as f64));
        }
        let (mut cx, mut cy) = (0.0, 0.0);
        for i in 0..n {
            let a = self.exterior[i];
            let b = self.exterior[(i + 1) % n];
            let cross = a.x.mul_add(b.y, -(b.x * a.y));
            cx += (a.x + b.x) * cross;
            cy += (a.y + b.y) * cross;
        }
        Some(Point::new(cx / (6.0 * area), cy / (6.0 * area)))
    }

    /// Bounding box of the ring
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.exterior.first()?;
        let init = BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(self.exterior.iter().fold(init, |b, p| BoundingBox {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    /// Check the polygon is usable for extraction
    pub fn validate(&self) -> Result<(), GeometryIssue> {
        if self
            .exterior
            .iter()
            .any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(GeometryIssue::NonFinite);
        }
        if self.exterior.len() < 3 {
            return Err(GeometryIssue::TooFewVertices);
        }
        if self.area() < EPSILON {
            return Err(GeometryIssue::ZeroArea);
        }
        if self.has_self_intersection() {
            return Err(GeometryIssue::SelfIntersection);
        }
        Ok(())
    }

    /// Whether any two edges of the ring cross, touch or fold back on each other
    #[must_use]
    pub fn has_self_intersection(&self) -> bool {
        let n = self.exterior.len();
        if n < 3 {
            return false;
        }
        let edge = |i: usize| (self.exterior[i], self.exterior[(i + 1) % n]);

        for i in 0..n {
            let (p, q) = edge(i);
            let r = self.exterior[(i + 2) % n];
            // Adjacent edges only share `q`; a collinear fold-back is still invalid
            if orientation(p, q, r) == 0 {
                let dot = (p.x - q.x).mul_add(r.x - q.x, (p.y - q.y) * (r.y - q.y));
                if dot > 0.0 {
                    return true;
                }
            }

            for j in (i + 2)..n {
                if i == 0 && j == n - 1 {
                    continue;
                }
                let (a, b) = edge(j);
                if segments_intersect(p, q, a, b) {
                    return true;
                }
            }
        }
        false
    }
}

/// Orientation of the triplet: 1 counter-clockwise, -1 clockwise, 0 collinear
fn orientation(p: Point, q: Point, r: Point) -> i8 {
    let value = (q.x - p.x).mul_add(r.y - p.y, -((q.y - p.y) * (r.x - p.x)));
    if value.abs() < EPSILON {
        0
    } else if value > 0.0 {
        1
    } else {
        -1
    }
}

/// Whether `q` lies on segment `pr`, given the three points are collinear
fn on_segment(p: Point, q: Point, r: Point) -> bool {
    q.x <= p.x.max(r.x) + EPSILON
        && q.x >= p.x.min(r.x) - EPSILON
        && q.y <= p.y.max(r.y) + EPSILON
        && q.y >= p.y.min(r.y) - EPSILON
}

fn segments_intersect(p1: Point, q1: Point, p2: Point, q2: Point) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == 0 && on_segment(p1, p2, q1))
        || (o2 == 0 && on_segment(p1, q2, q1))
        || (o3 == 0 && on_segment(p2, p1, q2))
        || (o4 == 0 && on_segment(p2, q1, q2))
}
