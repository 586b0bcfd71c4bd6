use std::fmt;
use std::str::FromStr;

use geo::{Coord, Intersects, LineString, Polygon as GeoPolygon};
use serde::{Deserialize, Serialize};

use crate::error::StackError;

/// Coordinate domain of a point: design data lives on the integer database
/// grid, technology data in real microns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoordKind {
    #[default]
    Real,
    Integer,
}

/// One elementary coordinate transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transform {
    MirrorX,
    MirrorY,
    Rotate90,
    Rotate180,
    Rotate270,
    Move(f64, f64),
}

/// Shared operations of every geometric value.
pub trait Transformable {
    fn transform(&mut self, t: Transform);
    /// Multiply by `factor`, then snap onto a grid of `snap` if given.
    fn scale(&mut self, factor: f64, snap: Option<f64>);
    fn to_integer(&mut self);
    fn to_real(&mut self);

    fn transform_all(&mut self, steps: &[Transform]) {
        for t in steps {
            self.transform(*t);
        }
    }

    fn translate(&mut self, dx: f64, dy: f64) {
        self.transform(Transform::Move(dx, dy));
    }
}

/// Python-compatible rounding (half to even).
pub fn round_half_even(v: f64) -> f64 {
    v.round_ties_even()
}

// ── Point ────────────────────────────────────────────────────────────

/// A 2D point in microns or database units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub kind: CoordKind,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            kind: CoordKind::Real,
        }
    }

    pub fn int(x: f64, y: f64) -> Self {
        let mut p = Self {
            x,
            y,
            kind: CoordKind::Integer,
        };
        p.normalize();
        p
    }

    fn normalize(&mut self) {
        if self.kind == CoordKind::Integer {
            self.x = round_half_even(self.x);
            self.y = round_half_even(self.y);
        }
    }
}

impl Transformable for Point {
    /// Rotations use closed forms so integer points never accumulate error.
    fn transform(&mut self, t: Transform) {
        let (x, y) = (self.x, self.y);
        match t {
            Transform::MirrorX => self.y = -y,
            Transform::MirrorY => self.x = -x,
            Transform::Rotate90 => {
                self.x = -y;
                self.y = x;
            }
            Transform::Rotate180 => {
                self.x = -x;
                self.y = -y;
            }
            Transform::Rotate270 => {
                self.x = y;
                self.y = -x;
            }
            Transform::Move(dx, dy) => {
                self.x = x + dx;
                self.y = y + dy;
            }
        }
        self.normalize();
    }

    fn scale(&mut self, factor: f64, snap: Option<f64>) {
        self.x *= factor;
        self.y *= factor;
        if let Some(grid) = snap.filter(|g| *g > 0.0) {
            self.x = round_half_even(self.x / grid) * grid;
            self.y = round_half_even(self.y / grid) * grid;
        }
        self.normalize();
    }

    fn to_integer(&mut self) {
        self.kind = CoordKind::Integer;
        self.normalize();
    }

    fn to_real(&mut self) {
        self.kind = CoordKind::Real;
    }
}

// ── Bounding box ─────────────────────────────────────────────────────

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl BBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[Point]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            min: Point::new(min_x, min_y),
            max: Point::new(max_x, max_y),
        })
    }

    /// Closed-interval overlap; touching boxes intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn union(&self, other: &BBox) -> Self {
        Self {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }
}

// ── Rect ─────────────────────────────────────────────────────────────

/// A rectangle kept normalized so that `ll <= ur` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub ll: Point,
    pub ur: Point,
}

impl Rect {
    pub fn new(llx: f64, lly: f64, urx: f64, ury: f64) -> Self {
        let mut r = Self {
            ll: Point::new(llx, lly),
            ur: Point::new(urx, ury),
        };
        r.normalize();
        r
    }

    pub fn int(llx: f64, lly: f64, urx: f64, ury: f64) -> Self {
        let mut r = Self {
            ll: Point::int(llx, lly),
            ur: Point::int(urx, ury),
        };
        r.normalize();
        r
    }

    pub fn kind(&self) -> CoordKind {
        self.ll.kind
    }

    pub fn width(&self) -> f64 {
        self.ur.x - self.ll.x
    }

    pub fn height(&self) -> f64 {
        self.ur.y - self.ll.y
    }

    pub fn bbox(&self) -> BBox {
        BBox::new(self.ll, self.ur)
    }

    fn normalize(&mut self) {
        if self.ll.x > self.ur.x {
            std::mem::swap(&mut self.ll.x, &mut self.ur.x);
        }
        if self.ll.y > self.ur.y {
            std::mem::swap(&mut self.ll.y, &mut self.ur.y);
        }
    }

    /// Overlap of two rectangles, `None` when they only touch or are apart.
    pub fn get_intersection(&self, other: &Rect) -> Option<Rect> {
        let llx = self.ll.x.max(other.ll.x);
        let lly = self.ll.y.max(other.ll.y);
        let urx = self.ur.x.min(other.ur.x);
        let ury = self.ur.y.min(other.ur.y);
        if llx >= urx || lly >= ury {
            return None;
        }
        Some(match self.kind() {
            CoordKind::Integer => Rect::int(llx, lly, urx, ury),
            CoordKind::Real => Rect::new(llx, lly, urx, ury),
        })
    }

    /// Inclusive containment of `self` in `other`.
    pub fn is_in(&self, other: &Rect) -> bool {
        other.ll.x <= self.ll.x
            && self.ur.x <= other.ur.x
            && other.ll.y <= self.ll.y
            && self.ur.y <= other.ur.y
    }

    pub fn vertices(&self) -> Vec<Point> {
        vec![
            self.ll,
            Point { x: self.ur.x, y: self.ll.y, kind: self.ll.kind },
            self.ur,
            Point { x: self.ll.x, y: self.ur.y, kind: self.ll.kind },
        ]
    }
}

impl Transformable for Rect {
    fn transform(&mut self, t: Transform) {
        self.ll.transform(t);
        self.ur.transform(t);
        self.normalize();
    }

    fn scale(&mut self, factor: f64, snap: Option<f64>) {
        self.ll.scale(factor, snap);
        self.ur.scale(factor, snap);
        self.normalize();
    }

    fn to_integer(&mut self) {
        self.ll.to_integer();
        self.ur.to_integer();
    }

    fn to_real(&mut self) {
        self.ll.to_real();
        self.ur.to_real();
    }
}

// ── Shape ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Rect(Rect),
    Polygon(Vec<Point>),
}

/// A rectangle or polygon, optionally bound to a technology layer by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub layer: Option<String>,
    pub geometry: Geometry,
}

impl Shape {
    pub fn rect(layer: Option<&str>, rect: Rect) -> Self {
        Self {
            layer: layer.map(str::to_string),
            geometry: Geometry::Rect(rect),
        }
    }

    pub fn polygon(layer: Option<&str>, points: Vec<Point>) -> Self {
        Self {
            layer: layer.map(str::to_string),
            geometry: Geometry::Polygon(points),
        }
    }

    pub fn as_rect(&self) -> Option<&Rect> {
        match &self.geometry {
            Geometry::Rect(r) => Some(r),
            Geometry::Polygon(_) => None,
        }
    }

    /// Vertex ring of the shape; a rectangle becomes its four corners.
    pub fn vertices(&self) -> Vec<Point> {
        match &self.geometry {
            Geometry::Rect(r) => r.vertices(),
            Geometry::Polygon(pts) => pts.clone(),
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        match &self.geometry {
            Geometry::Rect(r) => Some(r.bbox()),
            Geometry::Polygon(pts) => BBox::from_points(pts),
        }
    }

    pub fn same_layer(&self, other: &Shape) -> bool {
        self.layer == other.layer
    }

    /// True polygon intersection of two shapes on the same layer (or both
    /// layerless). Shared boundary points count as intersecting.
    pub fn is_intersected(&self, other: &Shape) -> bool {
        if !self.same_layer(other) {
            return false;
        }
        polygons_intersect(&self.vertices(), &other.vertices())
    }

    fn points_mut(&mut self) -> Vec<&mut Point> {
        match &mut self.geometry {
            Geometry::Rect(r) => vec![&mut r.ll, &mut r.ur],
            Geometry::Polygon(pts) => pts.iter_mut().collect(),
        }
    }
}

impl Transformable for Shape {
    fn transform(&mut self, t: Transform) {
        match &mut self.geometry {
            Geometry::Rect(r) => r.transform(t),
            Geometry::Polygon(pts) => pts.iter_mut().for_each(|p| p.transform(t)),
        }
    }

    fn scale(&mut self, factor: f64, snap: Option<f64>) {
        match &mut self.geometry {
            Geometry::Rect(r) => r.scale(factor, snap),
            Geometry::Polygon(pts) => pts.iter_mut().for_each(|p| p.scale(factor, snap)),
        }
    }

    fn to_integer(&mut self) {
        self.points_mut().into_iter().for_each(|p| p.to_integer());
    }

    fn to_real(&mut self) {
        self.points_mut().into_iter().for_each(|p| p.to_real());
    }
}

// ── Polygon predicates ───────────────────────────────────────────────

fn to_geo(ring: &[Point]) -> GeoPolygon<f64> {
    let coords: Vec<Coord<f64>> = ring.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
    GeoPolygon::new(LineString::from(coords), vec![])
}

/// Closed-set intersection of two simple polygons given as vertex rings.
pub fn polygons_intersect(a: &[Point], b: &[Point]) -> bool {
    let (Some(ba), Some(bb)) = (BBox::from_points(a), BBox::from_points(b)) else {
        return false;
    };
    if !ba.intersects(&bb) {
        return false;
    }
    to_geo(a).intersects(&to_geo(b))
}

// ── Orientation ──────────────────────────────────────────────────────

/// Placement orientation of a component, row or pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    N,
    W,
    S,
    E,
    FN,
    FW,
    FS,
    FE,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::N => "N",
            Orientation::W => "W",
            Orientation::S => "S",
            Orientation::E => "E",
            Orientation::FN => "FN",
            Orientation::FW => "FW",
            Orientation::FS => "FS",
            Orientation::FE => "FE",
        }
    }

    /// Steps that bring a design pin's local geometry into its placed frame
    /// (before moving by the pin location).
    pub fn design_pin_transforms(&self) -> Vec<Transform> {
        use Transform::*;
        match self {
            Orientation::N => vec![],
            Orientation::W => vec![Rotate90],
            Orientation::S => vec![Rotate180],
            Orientation::E => vec![Rotate270],
            Orientation::FN => vec![MirrorY],
            Orientation::FW => vec![MirrorX, Rotate90],
            Orientation::FS => vec![MirrorX],
            Orientation::FE => vec![MirrorY, Rotate90],
        }
    }

    /// Steps that bring macro-local pin geometry into the oriented cell frame,
    /// keeping the cell's lower-left corner at the origin. `w` and `h` are the
    /// macro extents measured from its origin.
    pub fn macro_transforms(&self, w: f64, h: f64) -> Vec<Transform> {
        use Transform::*;
        match self {
            Orientation::N => vec![],
            Orientation::W => vec![Rotate90, Move(h, 0.0)],
            Orientation::S => vec![Rotate180, Move(w, h)],
            Orientation::E => vec![Rotate270, Move(0.0, w)],
            Orientation::FN => vec![MirrorY, Move(w, 0.0)],
            Orientation::FW => vec![MirrorX, Move(0.0, h), Rotate90, Move(h, 0.0)],
            Orientation::FS => vec![MirrorX, Move(0.0, h)],
            Orientation::FE => vec![MirrorY, Move(w, 0.0), Rotate90, Move(h, 0.0)],
        }
    }

    /// Whether a cell in this orientation sits in the upper half of a split
    /// row on the given tier.
    pub fn is_shifted_by_row_splitting(&self, tier: usize) -> bool {
        if tier % 2 == 0 {
            matches!(self, Orientation::S | Orientation::FS)
        } else {
            matches!(self, Orientation::N | Orientation::FN)
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orientation {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N" => Ok(Orientation::N),
            "W" => Ok(Orientation::W),
            "S" => Ok(Orientation::S),
            "E" => Ok(Orientation::E),
            "FN" => Ok(Orientation::FN),
            "FW" => Ok(Orientation::FW),
            "FS" => Ok(Orientation::FS),
            "FE" => Ok(Orientation::FE),
            other => Err(StackError::config(format!("unknown orientation '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_group() {
        let start = Rect::int(10.0, 20.0, 40.0, 35.0);
        let mut r = start;
        for _ in 0..4 {
            r.transform(Transform::Rotate90);
        }
        assert_eq!(r, start);

        let mut r = start;
        r.transform_all(&[Transform::MirrorX, Transform::MirrorX]);
        assert_eq!(r, start);
        r.transform_all(&[Transform::MirrorY, Transform::MirrorY]);
        assert_eq!(r, start);

        let mut a = Point::new(3.0, 5.0);
        a.transform_all(&[Transform::Rotate90, Transform::Rotate270]);
        assert_eq!(a, Point::new(3.0, 5.0));
        a.transform_all(&[Transform::Rotate180, Transform::Rotate180]);
        assert_eq!(a, Point::new(3.0, 5.0));
    }

    #[test]
    fn test_rect_stays_normalized() {
        let mut r = Rect::new(0.0, 0.0, 2.0, 1.0);
        r.transform(Transform::Rotate90);
        assert_eq!(r, Rect::new(-1.0, 0.0, 0.0, 2.0));
        assert!(r.ll.x <= r.ur.x && r.ll.y <= r.ur.y);
    }

    #[test]
    fn test_intersection_symmetric() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 15.0, 15.0);
        let c = Rect::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(a.get_intersection(&b), b.get_intersection(&a));
        assert_eq!(a.get_intersection(&b), Some(Rect::new(5.0, 5.0, 10.0, 10.0)));
        // Touching along an edge is not an overlap.
        assert_eq!(a.get_intersection(&c), None);
        assert_eq!(c.get_intersection(&a), None);
    }

    #[test]
    fn test_is_in() {
        let outer = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(Rect::new(0.0, 0.0, 10.0, 5.0).is_in(&outer));
        assert!(!Rect::new(-1.0, 0.0, 5.0, 5.0).is_in(&outer));
    }

    #[test]
    fn test_scale_snap_and_integer_rounding() {
        let mut p = Point::new(0.1234, 0.5);
        p.scale(2.0, Some(0.005));
        assert!((p.x - 0.245).abs() < 1e-9);
        assert!((p.y - 1.0).abs() < 1e-9);

        // Ties go to the even neighbour.
        let mut q = Point::int(0.0, 0.0);
        q.translate(2.5, 3.5);
        assert_eq!((q.x, q.y), (2.0, 4.0));
    }

    #[test]
    fn test_shape_intersection_rules() {
        let a = Shape::rect(Some("M1"), Rect::int(0.0, 0.0, 10.0, 10.0));
        let b = Shape::rect(Some("M1"), Rect::int(10.0, 0.0, 20.0, 10.0));
        let c = Shape::rect(Some("M2"), Rect::int(0.0, 0.0, 10.0, 10.0));
        let far = Shape::rect(Some("M1"), Rect::int(30.0, 30.0, 40.0, 40.0));
        assert!(a.is_intersected(&b), "shared edge counts");
        assert!(!a.is_intersected(&c), "different layers never connect");
        assert!(!a.is_intersected(&far));

        let inner = Shape::rect(None, Rect::int(2.0, 2.0, 3.0, 3.0));
        let outer = Shape::rect(None, Rect::int(0.0, 0.0, 10.0, 10.0));
        assert!(inner.is_intersected(&outer), "containment counts");

        let tri = Shape::polygon(
            Some("M1"),
            vec![Point::new(11.0, 11.0), Point::new(20.0, 11.0), Point::new(11.0, 20.0)],
        );
        assert!(!a.is_intersected(&tri));

        let corner = Shape::rect(Some("M1"), Rect::int(10.0, 10.0, 20.0, 20.0));
        assert!(a.is_intersected(&corner), "a shared corner counts");
        let crossing = Shape::polygon(
            Some("M1"),
            vec![Point::new(5.0, -5.0), Point::new(6.0, -5.0), Point::new(6.0, 15.0), Point::new(5.0, 15.0)],
        );
        assert!(a.is_intersected(&crossing), "edges crossing without contained vertices");
    }

    #[test]
    fn test_macro_transforms_keep_cell_in_first_quadrant() {
        let (w, h) = (4.0, 2.0);
        for orient in [
            Orientation::N,
            Orientation::W,
            Orientation::S,
            Orientation::E,
            Orientation::FN,
            Orientation::FW,
            Orientation::FS,
            Orientation::FE,
        ] {
            let mut outline = Rect::new(0.0, 0.0, w, h);
            outline.transform_all(&orient.macro_transforms(w, h));
            assert!((outline.ll.x).abs() < 1e-9 && (outline.ll.y).abs() < 1e-9, "{orient}");
        }

        let mut pin = Rect::new(0.0, 0.0, 1.0, 1.0);
        pin.transform_all(&Orientation::S.macro_transforms(w, h));
        assert_eq!(pin, Rect::new(3.0, 1.0, 4.0, 2.0));
    }

    #[test]
    fn test_row_splitting_shift() {
        assert!(Orientation::S.is_shifted_by_row_splitting(0));
        assert!(!Orientation::N.is_shifted_by_row_splitting(0));
        assert!(Orientation::FN.is_shifted_by_row_splitting(1));
        assert!(!Orientation::FS.is_shifted_by_row_splitting(1));
    }

    #[test]
    fn test_orientation_parse() {
        assert_eq!("fw".parse::<Orientation>(), Ok(Orientation::FW));
        assert!("NE".parse::<Orientation>().is_err());
    }
}
