use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};

/// Closed polygon in (total integral, PSD y) space.
///
/// Points on an edge or vertex count as inside; everything else is decided by
/// the even-odd crossing rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct PsdFilterPolygon {
    vertices: Vec<(f64, f64)>,
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

fn on_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> bool {
    cross(a, b, p) == 0.0
        && p.0 >= a.0.min(b.0)
        && p.0 <= a.0.max(b.0)
        && p.1 >= a.1.min(b.1)
        && p.1 <= a.1.max(b.1)
}

fn segments_intersect(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0)) && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0)) {
        return true;
    }
    on_segment(a, c, d) || on_segment(b, c, d) || on_segment(c, a, b) || on_segment(d, a, b)
}

impl PsdFilterPolygon {
    /// Validates and stores the vertices (implicitly closed, last joins first).
    ///
    /// # Example
    ///
    /// ```rust
    /// # use pulsecore::psd::polygon::PsdFilterPolygon;
    /// let square = PsdFilterPolygon::new(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]).unwrap();
    /// assert!(square.contains(5.0, 5.0));
    /// assert!(!square.contains(15.0, 5.0));
    /// assert!(square.contains(10.0, 5.0));
    /// ```
    pub fn new(vertices: Vec<(f64, f64)>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(PulseError::InvalidPolygon(format!(
                "at least 3 vertices are required, got {}",
                vertices.len()
            )));
        }
        if vertices.iter().any(|v| !v.0.is_finite() || !v.1.is_finite()) {
            return Err(PulseError::InvalidPolygon("vertices must be finite".to_string()));
        }

        let polygon = PsdFilterPolygon { vertices };
        if polygon.signed_area() == 0.0 {
            return Err(PulseError::InvalidPolygon("polygon has zero area".to_string()));
        }
        polygon.check_simple()?;
        Ok(polygon)
    }

    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    fn edges(&self) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
        self.vertices.iter().cloned().circular_tuple_windows()
    }

    pub fn signed_area(&self) -> f64 {
        0.5 * self.edges().map(|(a, b)| a.0 * b.1 - b.0 * a.1).sum::<f64>()
    }

    fn check_simple(&self) -> Result<()> {
        let edges: Vec<_> = self.edges().collect();
        let n = edges.len();
        for i in 0..n {
            for j in i + 1..n {
                // neighbours share a vertex by construction
                if j == i + 1 || (i == 0 && j == n - 1) {
                    continue;
                }
                let (a, b) = edges[i];
                let (c, d) = edges[j];
                if segments_intersect(a, b, c, d) {
                    return Err(PulseError::InvalidPolygon(format!(
                        "edges {} and {} intersect, polygon is not simple",
                        i, j
                    )));
                }
            }
        }
        Ok(())
    }

    /// Point-in-polygon test with the boundary counted as inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let p = (x, y);
        if self.edges().any(|(a, b)| on_segment(p, a, b)) {
            return true;
        }
        let mut inside = false;
        for (pi, pj) in self.edges() {
            if (pi.1 > y) != (pj.1 > y) && x < (pj.0 - pi.0) * (y - pi.1) / (pj.1 - pi.1) + pi.0 {
                inside = !inside;
            }
        }
        inside
    }
}

impl TryFrom<Vec<(f64, f64)>> for PsdFilterPolygon {
    type Error = PulseError;

    fn try_from(vertices: Vec<(f64, f64)>) -> Result<Self> {
        PsdFilterPolygon::new(vertices)
    }
}

impl From<PsdFilterPolygon> for Vec<(f64, f64)> {
    fn from(polygon: PsdFilterPolygon) -> Self {
        polygon.vertices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> PsdFilterPolygon {
        PsdFilterPolygon::new(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]).unwrap()
    }

    #[test]
    fn test_square_containment() {
        let s = square();
        assert!(s.contains(5.0, 5.0));
        assert!(!s.contains(15.0, 5.0));
        assert!(!s.contains(-0.001, 5.0));
    }

    #[test]
    fn test_boundary_is_inside() {
        let s = square();
        assert!(s.contains(10.0, 5.0));
        assert!(s.contains(0.0, 5.0));
        assert!(s.contains(5.0, 0.0));
        assert!(s.contains(5.0, 10.0));
        assert!(s.contains(10.0, 10.0));
        assert!(s.contains(0.0, 0.0));
    }

    #[test]
    fn test_concave_polygon() {
        // U shape open to the top
        let u = PsdFilterPolygon::new(vec![
            (0.0, 0.0),
            (9.0, 0.0),
            (9.0, 9.0),
            (6.0, 9.0),
            (6.0, 3.0),
            (3.0, 3.0),
            (3.0, 9.0),
            (0.0, 9.0),
        ])
        .unwrap();
        assert!(u.contains(1.5, 6.0));
        assert!(u.contains(7.5, 6.0));
        assert!(!u.contains(4.5, 6.0));
        assert!(u.contains(4.5, 1.5));
    }

    #[test]
    fn test_rejects_malformed_polygons() {
        assert!(PsdFilterPolygon::new(vec![(0.0, 0.0), (1.0, 1.0)]).is_err());
        assert!(PsdFilterPolygon::new(vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]).is_err());
        assert!(PsdFilterPolygon::new(vec![(0.0, 0.0), (f64::NAN, 1.0), (2.0, 0.0)]).is_err());
        // bow tie
        let bow_tie = PsdFilterPolygon::new(vec![(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0)]);
        assert!(matches!(bow_tie, Err(PulseError::InvalidPolygon(_))));
    }

    #[test]
    fn test_serde_validates() {
        let ok: PsdFilterPolygon = serde_json::from_str("[[0,0],[4,0],[4,4]]").unwrap();
        assert_eq!(ok.vertices().len(), 3);
        assert!(serde_json::from_str::<PsdFilterPolygon>("[[0,0],[4,0]]").is_err());
    }
}
