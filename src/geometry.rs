//! Planar geometry over axis-aligned bounding boxes.
//!
//! Everything the trigger predicates need: point and rectangle distance,
//! rectangle overlap, segment intersection, and point-in-polygon tests.
//! Coordinates are pixel units in the source frame's coordinate space.

use serde::{Deserialize, Serialize};

/// One of the nine canonical points of a bounding rectangle, or `Any`.
///
/// `Any` selects the whole rectangle rather than a single point; distance
/// tests fall back to rectangle-to-rectangle distance in that case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BboxTestPoint {
    Center,
    NorthWest,
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    Any,
}

/// A point in frame coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding rectangle, as delivered in object metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rectangle {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    /// Resolve a test point to frame coordinates.
    ///
    /// Returns `None` for [`BboxTestPoint::Any`], which names the whole
    /// rectangle rather than a coordinate.
    pub fn test_point(&self, point: BboxTestPoint) -> Option<Point> {
        let (left, top) = (self.left as f64, self.top as f64);
        let (w, h) = (self.width as f64, self.height as f64);
        let coord = match point {
            BboxTestPoint::Center => Point::new(left + w / 2.0, top + h / 2.0),
            BboxTestPoint::NorthWest => Point::new(left, top),
            BboxTestPoint::North => Point::new(left + w / 2.0, top),
            BboxTestPoint::NorthEast => Point::new(left + w, top),
            BboxTestPoint::East => Point::new(left + w, top + h / 2.0),
            BboxTestPoint::SouthEast => Point::new(left + w, top + h),
            BboxTestPoint::South => Point::new(left + w / 2.0, top + h),
            BboxTestPoint::SouthWest => Point::new(left, top + h),
            BboxTestPoint::West => Point::new(left, top + h / 2.0),
            BboxTestPoint::Any => return None,
        };
        Some(Point::new(coord.x.round(), coord.y.round()))
    }
}

/// Euclidean distance between two points.
pub fn point_distance(a: Point, b: Point) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Minimum Euclidean distance between two rectangles.
///
/// Zero when the rectangles touch or overlap.
pub fn rectangle_distance(a: &Rectangle, b: &Rectangle) -> f64 {
    let dx = if a.right() < b.left {
        (b.left - a.right()) as f64
    } else if b.right() < a.left {
        (a.left - b.right()) as f64
    } else {
        0.0
    };
    let dy = if a.bottom() < b.top {
        (b.top - a.bottom()) as f64
    } else if b.bottom() < a.top {
        (a.top - b.bottom()) as f64
    } else {
        0.0
    };
    (dx * dx + dy * dy).sqrt()
}

/// True when two rectangles share at least one point.
///
/// Touching edges count as overlap.
pub fn rectangles_overlap(a: &Rectangle, b: &Rectangle) -> bool {
    a.left <= b.right() && b.left <= a.right() && a.top <= b.bottom() && b.top <= a.bottom()
}

fn orientation(p: Point, q: Point, r: Point) -> f64 {
    (q.y - p.y) * (r.x - q.x) - (q.x - p.x) * (r.y - q.y)
}

fn on_segment(p: Point, q: Point, r: Point) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

/// True when segment `p1p2` intersects segment `p3p4`, endpoints included.
pub fn segments_intersect(p1: Point, p2: Point, p3: Point, p4: Point) -> bool {
    let o1 = orientation(p1, p2, p3);
    let o2 = orientation(p1, p2, p4);
    let o3 = orientation(p3, p4, p1);
    let o4 = orientation(p3, p4, p2);

    if (o1 > 0.0) != (o2 > 0.0) && (o3 > 0.0) != (o4 > 0.0) && o1 != 0.0 && o2 != 0.0 {
        return true;
    }

    // collinear touching cases
    (o1 == 0.0 && on_segment(p1, p3, p2))
        || (o2 == 0.0 && on_segment(p1, p4, p2))
        || (o3 == 0.0 && on_segment(p3, p1, p4))
        || (o4 == 0.0 && on_segment(p3, p2, p4))
}

/// Ray-casting point-in-polygon test. Points on the boundary may resolve
/// either way; callers that care use [`segments_intersect`] directly.
pub fn polygon_contains(polygon: &[Point], p: Point) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y)
            && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_distance_to_self_is_zero() {
        let r = Rectangle::new(10.0, 10.0, 20.0, 20.0);
        assert_eq!(rectangle_distance(&r, &r), 0.0);
    }

    #[test]
    fn rectangle_distance_horizontal_gap() {
        let a = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let b = Rectangle::new(40.0, 0.0, 10.0, 10.0);
        assert_eq!(rectangle_distance(&a, &b), 30.0);
        assert_eq!(rectangle_distance(&b, &a), 30.0);
    }

    #[test]
    fn rectangle_distance_diagonal_gap() {
        let a = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let b = Rectangle::new(13.0, 14.0, 10.0, 10.0);
        assert_eq!(rectangle_distance(&a, &b), 5.0);
    }

    #[test]
    fn overlap_is_commutative_and_touching_counts() {
        let a = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let b = Rectangle::new(10.0, 0.0, 10.0, 10.0);
        let c = Rectangle::new(25.0, 0.0, 10.0, 10.0);
        assert!(rectangles_overlap(&a, &b));
        assert!(rectangles_overlap(&b, &a));
        assert!(!rectangles_overlap(&a, &c));
        assert!(!rectangles_overlap(&c, &a));
    }

    #[test]
    fn point_distance_triangle_inequality() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        let c = Point::new(-7.0, 2.5);
        assert!(point_distance(a, c) <= point_distance(a, b) + point_distance(b, c) + 1e-9);
    }

    #[test]
    fn test_point_selection() {
        let r = Rectangle::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(
            r.test_point(BboxTestPoint::Center),
            Some(Point::new(25.0, 40.0))
        );
        assert_eq!(
            r.test_point(BboxTestPoint::SouthEast),
            Some(Point::new(40.0, 60.0))
        );
        assert_eq!(r.test_point(BboxTestPoint::Any), None);
    }

    #[test]
    fn segments_crossing_and_parallel() {
        let cross = segments_intersect(
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 0.0),
        );
        assert!(cross);

        let parallel = segments_intersect(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 5.0),
            Point::new(10.0, 5.0),
        );
        assert!(!parallel);
    }

    #[test]
    fn polygon_contains_square() {
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ];
        assert!(polygon_contains(&square, Point::new(50.0, 50.0)));
        assert!(!polygon_contains(&square, Point::new(150.0, 50.0)));
    }
}
