//! Pure geometry helpers shared by the engine, the layout pass and the canvas.
//!
//! Nothing here holds state. Degenerate inputs (zero-size rectangles,
//! coincident endpoints) always produce a finite result.

use serde::{Deserialize, Serialize};

use crate::Direction;

/// Ports sit this far out along the vertical axis for UP/DOWN, as a
/// multiple of the half-height, so "vertical" links read as pseudo-3D.
pub const VERTICAL_PORT_SCALE: f64 = 1.8;

/// Endpoints closer than this on both axes are drawn as a direct line.
pub const DEGENERATE_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned rectangle; `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Rectangle spanning two arbitrary corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self::new(x, y, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Standard AABB overlap: neither rectangle lies fully to one side of the other.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.right() < other.x
            || other.right() < self.x
            || self.bottom() < other.y
            || other.bottom() < self.y)
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.w, self.h)
    }

    /// Depth of overlap along each axis; zero when the rectangles are apart.
    pub fn overlap(&self, other: &Rect) -> (f64, f64) {
        let ox = self.right().min(other.right()) - self.x.max(other.x);
        let oy = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if ox <= 0.0 || oy <= 0.0 {
            (0.0, 0.0)
        } else {
            (ox, oy)
        }
    }
}

/// Absolute coordinate of a named port on an item centered at `(cx, cy)`.
///
/// The eight planar ports scale to the half extents; UP/DOWN sit at
/// [`VERTICAL_PORT_SCALE`] times the half-height. `Unknown` is the center.
pub fn port_position(cx: f64, cy: f64, width: f64, height: f64, port: Direction) -> Point {
    let hw = width / 2.0;
    let hh = height / 2.0;
    let (dx, dy) = match port {
        Direction::N => (0.0, -hh),
        Direction::S => (0.0, hh),
        Direction::E => (hw, 0.0),
        Direction::W => (-hw, 0.0),
        Direction::NE => (hw, -hh),
        Direction::NW => (-hw, -hh),
        Direction::SE => (hw, hh),
        Direction::SW => (-hw, hh),
        Direction::Up => (0.0, -hh * VERTICAL_PORT_SCALE),
        Direction::Down => (0.0, hh * VERTICAL_PORT_SCALE),
        Direction::Unknown => (0.0, 0.0),
    };
    Point::new(cx + dx, cy + dy)
}

/// Port of `rect` for `port`, using the rectangle's center and size.
pub fn rect_port(rect: &Rect, port: Direction) -> Point {
    let c = rect.center();
    port_position(c.x, c.y, rect.w, rect.h, port)
}

/// A routed connector between two ports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathShape {
    Direct { from: Point, to: Point },
    Manhattan { from: Point, bend: Point, to: Point },
}

impl PathShape {
    pub fn points(&self) -> Vec<Point> {
        match *self {
            PathShape::Direct { from, to } => vec![from, to],
            PathShape::Manhattan { from, bend, to } => vec![from, bend, to],
        }
    }

    /// SVG path data, e.g. `M 0 0 L 10 0 L 10 5`.
    pub fn svg_d(&self) -> String {
        let mut out = String::new();
        for (i, p) in self.points().iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(if i == 0 { "M " } else { "L " });
            out.push_str(&format!("{} {}", p.x, p.y));
        }
        out
    }
}

/// Single-bend orthogonal route from `(x1, y1)` to `(x2, y2)`.
///
/// UP/DOWN ports connect with a straight segment. E/W sources bend
/// horizontal-first, N/S vertical-first; anything else follows the axis
/// with the larger displacement.
pub fn orthogonal_path(x1: f64, y1: f64, x2: f64, y2: f64, source_port: Direction) -> PathShape {
    let from = Point::new(x1, y1);
    let to = Point::new(x2, y2);
    let dx = x2 - x1;
    let dy = y2 - y1;

    if source_port.is_vertical()
        || (dx.abs() < DEGENERATE_TOLERANCE && dy.abs() < DEGENERATE_TOLERANCE)
    {
        return PathShape::Direct { from, to };
    }

    let horizontal_first = match source_port {
        Direction::E | Direction::W => true,
        Direction::N | Direction::S => false,
        _ => dx.abs() >= dy.abs(),
    };
    let bend = if horizontal_first {
        Point::new(x2, y1)
    } else {
        Point::new(x1, y2)
    };
    PathShape::Manhattan { from, bend, to }
}

/// Outline of an octagon inscribed in `rect` with corners cut by `cut`
/// (clamped to half the shorter side). Landmarks are drawn with it.
pub fn octagon_points(rect: &Rect, cut: f64) -> [Point; 8] {
    let c = cut.max(0.0).min(rect.w.min(rect.h) / 2.0);
    let (l, t, r, b) = (rect.x, rect.y, rect.right(), rect.bottom());
    [
        Point::new(l + c, t),
        Point::new(r - c, t),
        Point::new(r, t + c),
        Point::new(r, b - c),
        Point::new(r - c, b),
        Point::new(l + c, b),
        Point::new(l, b - c),
        Point::new(l, t + c),
    ]
}
