//! Spatial areas evaluated by triggers.
//!
//! An area is a named region with a bounding-box test-point convention.
//! Inclusion and exclusion areas are polygons tested with
//! [`OdeArea::check_for_within`]; line areas detect trajectory crossings
//! with [`OdeArea::check_for_cross`]. Areas optionally render themselves
//! into the frame's display meta each frame.

use anyhow::{anyhow, Result};

use crate::display::{DisplayMeta, PolylineDisplay, RgbaColor};
use crate::geometry::{polygon_contains, segments_intersect, BboxTestPoint, Point, Rectangle};

const ALL_TEST_POINTS: [BboxTestPoint; 9] = [
    BboxTestPoint::Center,
    BboxTestPoint::NorthWest,
    BboxTestPoint::North,
    BboxTestPoint::NorthEast,
    BboxTestPoint::East,
    BboxTestPoint::SouthEast,
    BboxTestPoint::South,
    BboxTestPoint::SouthWest,
    BboxTestPoint::West,
];

/// How an area participates in the within-gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AreaKind {
    /// Objects inside the polygon pass the gate.
    Inclusion,
    /// Objects inside the polygon are rejected.
    Exclusion,
    /// A line segment; meaningful for cross tests only.
    Line,
}

#[derive(Clone, Debug)]
enum AreaGeometry {
    Polygon(Vec<Point>),
    Line([Point; 2]),
}

/// Named spatial region with a test-point convention and display attributes.
#[derive(Clone, Debug)]
pub struct OdeArea {
    name: String,
    kind: AreaKind,
    geometry: AreaGeometry,
    bbox_test_point: BboxTestPoint,
    show: bool,
    color: RgbaColor,
    line_width: u32,
}

impl OdeArea {
    fn new(
        name: &str,
        kind: AreaKind,
        geometry: AreaGeometry,
        bbox_test_point: BboxTestPoint,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            geometry,
            bbox_test_point,
            show: false,
            color: RgbaColor::new(1.0, 1.0, 1.0, 1.0),
            line_width: 2,
        }
    }

    /// New inclusion area from a polygon of at least three vertices.
    pub fn inclusion(name: &str, polygon: Vec<Point>, test_point: BboxTestPoint) -> Result<Self> {
        if polygon.len() < 3 {
            return Err(anyhow!(
                "inclusion area '{}' requires at least 3 vertices",
                name
            ));
        }
        Ok(Self::new(
            name,
            AreaKind::Inclusion,
            AreaGeometry::Polygon(polygon),
            test_point,
        ))
    }

    /// New exclusion area from a polygon of at least three vertices.
    pub fn exclusion(name: &str, polygon: Vec<Point>, test_point: BboxTestPoint) -> Result<Self> {
        if polygon.len() < 3 {
            return Err(anyhow!(
                "exclusion area '{}' requires at least 3 vertices",
                name
            ));
        }
        Ok(Self::new(
            name,
            AreaKind::Exclusion,
            AreaGeometry::Polygon(polygon),
            test_point,
        ))
    }

    /// New line area for trajectory-cross detection.
    pub fn line(name: &str, a: Point, b: Point, test_point: BboxTestPoint) -> Result<Self> {
        if a == b {
            return Err(anyhow!("line area '{}' requires two distinct points", name));
        }
        Ok(Self::new(
            name,
            AreaKind::Line,
            AreaGeometry::Line([a, b]),
            test_point,
        ))
    }

    /// Convenience: an axis-aligned rectangular inclusion or exclusion area.
    pub fn from_rectangle(
        name: &str,
        kind: AreaKind,
        rect: Rectangle,
        test_point: BboxTestPoint,
    ) -> Result<Self> {
        let polygon = vec![
            Point::new(rect.left as f64, rect.top as f64),
            Point::new(rect.right() as f64, rect.top as f64),
            Point::new(rect.right() as f64, rect.bottom() as f64),
            Point::new(rect.left as f64, rect.bottom() as f64),
        ];
        match kind {
            AreaKind::Inclusion => Self::inclusion(name, polygon, test_point),
            AreaKind::Exclusion => Self::exclusion(name, polygon, test_point),
            AreaKind::Line => Err(anyhow!("line area '{}' cannot be a rectangle", name)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AreaKind {
        self.kind
    }

    pub fn bbox_test_point(&self) -> BboxTestPoint {
        self.bbox_test_point
    }

    /// Enable rendering of the area outline into display meta.
    pub fn with_display(mut self, color: RgbaColor, line_width: u32) -> Self {
        self.show = true;
        self.color = color;
        self.line_width = line_width;
        self
    }

    /// True when the object's test point lies within the area.
    ///
    /// With [`BboxTestPoint::Any`], any of the nine canonical points inside
    /// counts. For line areas the test degrades to segment-vs-rectangle
    /// overlap, since a line has no interior.
    pub fn check_for_within(&self, rect: &Rectangle) -> bool {
        match &self.geometry {
            AreaGeometry::Polygon(polygon) => self
                .test_points_of(rect)
                .any(|p| polygon_contains(polygon, p)),
            AreaGeometry::Line([a, b]) => segment_overlaps_rect(*a, *b, rect),
        }
    }

    /// True when the trace crosses the area boundary.
    ///
    /// For line areas, any consecutive pair of trace points intersecting
    /// the line counts. For polygons, a cross means the trace starts and
    /// ends on opposite sides of the boundary.
    pub fn check_for_cross(&self, trace: &[Point]) -> bool {
        if trace.len() < 2 {
            return false;
        }
        match &self.geometry {
            AreaGeometry::Line([a, b]) => trace
                .windows(2)
                .any(|w| segments_intersect(w[0], w[1], *a, *b)),
            AreaGeometry::Polygon(polygon) => {
                let first = polygon_contains(polygon, trace[0]);
                let last = polygon_contains(polygon, trace[trace.len() - 1]);
                first != last
            }
        }
    }

    /// Append the area outline to the frame's display meta, when enabled.
    pub fn add_display_meta(&self, display: &mut DisplayMeta) {
        if !self.show {
            return;
        }
        let coordinates = match &self.geometry {
            AreaGeometry::Polygon(polygon) => {
                let mut coords = polygon.clone();
                if let Some(first) = polygon.first() {
                    coords.push(*first);
                }
                coords
            }
            AreaGeometry::Line([a, b]) => vec![*a, *b],
        };
        display.add_polyline(PolylineDisplay {
            coordinates,
            line_width: self.line_width,
            color: self.color,
        });
    }

    fn test_points_of<'a>(&self, rect: &'a Rectangle) -> impl Iterator<Item = Point> + 'a {
        let selected = self.bbox_test_point;
        ALL_TEST_POINTS
            .iter()
            .filter(move |tp| selected == BboxTestPoint::Any || **tp == selected)
            .filter_map(|tp| rect.test_point(*tp))
    }
}

fn segment_overlaps_rect(a: Point, b: Point, rect: &Rectangle) -> bool {
    let corners = [
        Point::new(rect.left as f64, rect.top as f64),
        Point::new(rect.right() as f64, rect.top as f64),
        Point::new(rect.right() as f64, rect.bottom() as f64),
        Point::new(rect.left as f64, rect.bottom() as f64),
    ];
    let inside = |p: Point| {
        p.x >= rect.left as f64
            && p.x <= rect.right() as f64
            && p.y >= rect.top as f64
            && p.y <= rect.bottom() as f64
    };
    if inside(a) || inside(b) {
        return true;
    }
    (0..4).any(|i| segments_intersect(a, b, corners[i], corners[(i + 1) % 4]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(left: f64, top: f64, size: f64) -> Vec<Point> {
        vec![
            Point::new(left, top),
            Point::new(left + size, top),
            Point::new(left + size, top + size),
            Point::new(left, top + size),
        ]
    }

    #[test]
    fn inclusion_area_contains_object_center() {
        let area = OdeArea::inclusion("yard", square(0.0, 0.0, 100.0), BboxTestPoint::Center)
            .unwrap();
        let inside = Rectangle::new(40.0, 40.0, 10.0, 10.0);
        let outside = Rectangle::new(200.0, 200.0, 10.0, 10.0);
        assert!(area.check_for_within(&inside));
        assert!(!area.check_for_within(&outside));
    }

    #[test]
    fn any_test_point_matches_on_any_corner() {
        let area = OdeArea::inclusion("yard", square(0.0, 0.0, 100.0), BboxTestPoint::Any).unwrap();
        // only the north-west corner pokes into the polygon
        let rect = Rectangle::new(95.0, 95.0, 50.0, 50.0);
        assert!(area.check_for_within(&rect));
    }

    #[test]
    fn line_area_detects_trace_cross() {
        let area = OdeArea::line(
            "gate",
            Point::new(50.0, 0.0),
            Point::new(50.0, 100.0),
            BboxTestPoint::South,
        )
        .unwrap();
        let crossing = [Point::new(10.0, 50.0), Point::new(90.0, 50.0)];
        let short = [Point::new(10.0, 50.0), Point::new(40.0, 50.0)];
        assert!(area.check_for_cross(&crossing));
        assert!(!area.check_for_cross(&short));
        assert!(!area.check_for_cross(&crossing[..1]));
    }

    #[test]
    fn polygon_cross_requires_side_change() {
        let area = OdeArea::inclusion("yard", square(0.0, 0.0, 100.0), BboxTestPoint::Center)
            .unwrap();
        let entering = [Point::new(150.0, 50.0), Point::new(50.0, 50.0)];
        let staying = [Point::new(20.0, 50.0), Point::new(60.0, 50.0)];
        assert!(area.check_for_cross(&entering));
        assert!(!area.check_for_cross(&staying));
    }

    #[test]
    fn display_meta_emitted_only_when_shown() {
        let hidden =
            OdeArea::inclusion("yard", square(0.0, 0.0, 100.0), BboxTestPoint::Center).unwrap();
        let shown = hidden
            .clone()
            .with_display(RgbaColor::new(1.0, 0.0, 0.0, 1.0), 3);

        let mut display = DisplayMeta::new();
        hidden.add_display_meta(&mut display);
        assert!(display.polylines.is_empty());

        shown.add_display_meta(&mut display);
        assert_eq!(display.polylines.len(), 1);
        // closed outline repeats the first vertex
        assert_eq!(display.polylines[0].coordinates.len(), 5);
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        assert!(OdeArea::inclusion("a", square(0.0, 0.0, 1.0)[..2].to_vec(), BboxTestPoint::Center)
            .is_err());
        assert!(OdeArea::line("b", Point::new(1.0, 1.0), Point::new(1.0, 1.0), BboxTestPoint::Any)
            .is_err());
    }
}
