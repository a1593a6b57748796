//! Output model shared by the Gerber and Excellon interpreters.
//!
//! Everything here is a value type: interpreters append primitives to a
//! [`CamFile`] and hand the whole thing to the caller at end-of-stream. No
//! back-references into interpreter state survive the parse.

use std::collections::BTreeMap;

use serde::Serialize;

/// Measurement units declared by a file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    /// Imperial inches (`MOIN`, `INCH`).
    Inches,
    /// Metric millimeters (`MOMM`, `METRIC`).
    Millimeters,
}

/// 2D point in board coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Point {
    /// Creates a point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns this point offset by `(dx, dy)`.
    pub fn translated(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    /// Minimum X coordinate.
    pub min_x: f64,
    /// Minimum Y coordinate.
    pub min_y: f64,
    /// Maximum X coordinate.
    pub max_x: f64,
    /// Maximum Y coordinate.
    pub max_y: f64,
}

impl BoundingBox {
    /// Creates an empty bounding box that will expand with the first `update` call.
    pub const fn new() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    /// Expands the bounding box to include the given point.
    pub fn update(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Expands the bounding box to include another box.
    pub fn merge(&mut self, other: &Self) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Grows the box outward by `(dx, dy)` on each side.
    pub fn expanded(self, dx: f64, dy: f64) -> Self {
        Self {
            min_x: self.min_x - dx,
            min_y: self.min_y - dy,
            max_x: self.max_x + dx,
            max_y: self.max_y + dy,
        }
    }

    /// Returns this box offset by `(dx, dy)`.
    pub fn translated(self, dx: f64, dy: f64) -> Self {
        Self {
            min_x: self.min_x + dx,
            min_y: self.min_y + dy,
            max_x: self.max_x + dx,
            max_y: self.max_y + dy,
        }
    }

    /// True when no point has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new()
    }
}

/// Level polarity state (`LP` parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Polarity {
    /// Dark polarity — adds image.
    Dark,
    /// Clear polarity — erases image.
    Clear,
}

/// Whole-image polarity (`IP` parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImagePolarity {
    /// Positive image (default).
    Positive,
    /// Negative image.
    Negative,
}

/// Arc sweep direction for circular interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArcDirection {
    /// Clockwise interpolation (G02).
    Clockwise,
    /// Counter-clockwise interpolation (G03).
    CounterClockwise,
}

/// Arc quadrant mode (G74/G75).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuadrantMode {
    /// Single-quadrant mode: I/J are unsigned, sweeps are at most 90 degrees.
    Single,
    /// Multi-quadrant mode: I/J are signed, sweeps up to a full circle.
    Multi,
}

/// Optional hole drilled through a standard aperture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Hole {
    /// Round hole.
    Round {
        /// Hole diameter.
        diameter: f64,
    },
    /// Rectangular hole (legacy).
    Rect {
        /// Hole width.
        width: f64,
        /// Hole height.
        height: f64,
    },
}

/// Exposure flag of a macro primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Exposure {
    /// Exposure on — dark relative to the current polarity.
    Add,
    /// Exposure off — erases earlier primitives of the same macro.
    Subtract,
}

/// A macro primitive with all expressions resolved to concrete values.
///
/// Coordinates are relative to the flash point; `rotation` is in degrees
/// about the macro origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MacroPrimitive {
    /// Primitive code 1.
    Circle {
        /// Exposure flag.
        exposure: Exposure,
        /// Circle diameter.
        diameter: f64,
        /// Center relative to the macro origin.
        center: Point,
        /// Rotation in degrees.
        rotation: f64,
    },
    /// Primitive codes 2 and 20.
    VectorLine {
        /// Exposure flag.
        exposure: Exposure,
        /// Line width.
        width: f64,
        /// Start point.
        start: Point,
        /// End point.
        end: Point,
        /// Rotation in degrees.
        rotation: f64,
    },
    /// Primitive code 21.
    CenterLine {
        /// Exposure flag.
        exposure: Exposure,
        /// Rectangle width.
        width: f64,
        /// Rectangle height.
        height: f64,
        /// Rectangle center.
        center: Point,
        /// Rotation in degrees.
        rotation: f64,
    },
    /// Primitive code 4.
    Outline {
        /// Exposure flag.
        exposure: Exposure,
        /// Closed contour vertices (first equals last).
        points: Vec<Point>,
        /// Rotation in degrees.
        rotation: f64,
    },
    /// Primitive code 5.
    Polygon {
        /// Exposure flag.
        exposure: Exposure,
        /// Number of vertices.
        vertices: u32,
        /// Polygon center.
        center: Point,
        /// Circumscribed circle diameter.
        diameter: f64,
        /// Rotation in degrees.
        rotation: f64,
    },
    /// Primitive code 6. Always dark.
    Moire {
        /// Pattern center.
        center: Point,
        /// Outer ring diameter.
        outer_diameter: f64,
        /// Ring thickness.
        ring_thickness: f64,
        /// Gap between rings.
        ring_gap: f64,
        /// Maximum number of rings.
        max_rings: u32,
        /// Crosshair stroke thickness.
        crosshair_thickness: f64,
        /// Crosshair length.
        crosshair_length: f64,
        /// Rotation in degrees.
        rotation: f64,
    },
    /// Primitive code 7. Always dark.
    Thermal {
        /// Pad center.
        center: Point,
        /// Outer circle diameter.
        outer_diameter: f64,
        /// Inner circle diameter.
        inner_diameter: f64,
        /// Gap thickness between the four segments.
        gap: f64,
        /// Rotation in degrees.
        rotation: f64,
    },
}

fn rotate_deg(p: Point, degrees: f64) -> Point {
    let rad = degrees.to_radians();
    let (sin, cos) = rad.sin_cos();
    Point {
        x: p.x.mul_add(cos, -(p.y * sin)),
        y: p.x.mul_add(sin, p.y * cos),
    }
}

impl MacroPrimitive {
    /// Bounding box relative to the macro origin.
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bounds = BoundingBox::new();
        match self {
            Self::Circle {
                diameter,
                center,
                rotation,
                ..
            } => {
                let c = rotate_deg(*center, *rotation);
                let r = diameter / 2.0;
                bounds.update(c.x - r, c.y - r);
                bounds.update(c.x + r, c.y + r);
            }
            Self::VectorLine {
                width,
                start,
                end,
                rotation,
                ..
            } => {
                let half = width / 2.0;
                for p in [rotate_deg(*start, *rotation), rotate_deg(*end, *rotation)] {
                    bounds.update(p.x - half, p.y - half);
                    bounds.update(p.x + half, p.y + half);
                }
            }
            Self::CenterLine {
                width,
                height,
                center,
                rotation,
                ..
            } => {
                let half_w = width / 2.0;
                let half_h = height / 2.0;
                for (dx, dy) in [
                    (-half_w, -half_h),
                    (half_w, -half_h),
                    (half_w, half_h),
                    (-half_w, half_h),
                ] {
                    let corner = rotate_deg(
                        Point::new(center.x + dx, center.y + dy),
                        *rotation,
                    );
                    bounds.update(corner.x, corner.y);
                }
            }
            Self::Outline {
                points, rotation, ..
            } => {
                for p in points {
                    let r = rotate_deg(*p, *rotation);
                    bounds.update(r.x, r.y);
                }
            }
            Self::Polygon {
                center,
                diameter,
                rotation,
                ..
            }
            | Self::Moire {
                center,
                outer_diameter: diameter,
                rotation,
                ..
            }
            | Self::Thermal {
                center,
                outer_diameter: diameter,
                rotation,
                ..
            } => {
                let c = rotate_deg(*center, *rotation);
                let r = diameter / 2.0;
                bounds.update(c.x - r, c.y - r);
                bounds.update(c.x + r, c.y + r);
            }
        }
        bounds
    }
}

/// An aperture resolvable through the file dictionary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Aperture {
    /// Standard circle (`C`).
    Circle {
        /// Diameter.
        diameter: f64,
        /// Optional hole.
        hole: Option<Hole>,
    },
    /// Standard rectangle (`R`).
    Rectangle {
        /// Width.
        width: f64,
        /// Height.
        height: f64,
        /// Optional hole.
        hole: Option<Hole>,
    },
    /// Standard obround (`O`).
    Obround {
        /// Width.
        width: f64,
        /// Height.
        height: f64,
        /// Optional hole.
        hole: Option<Hole>,
    },
    /// Standard regular polygon (`P`).
    Polygon {
        /// Circumscribed circle diameter.
        diameter: f64,
        /// Number of vertices (3..=12).
        vertices: u32,
        /// Rotation in degrees.
        rotation: f64,
        /// Optional hole.
        hole: Option<Hole>,
    },
    /// Aperture-macro instance, expanded at definition time.
    Macro {
        /// Macro name as given in the `AM` parameter.
        name: String,
        /// Call-site arguments bound to `$1..$k`.
        args: Vec<f64>,
        /// Resolved primitives in definition order.
        primitives: Vec<MacroPrimitive>,
    },
    /// Block aperture (`AB`): a sub-image in a local coordinate frame.
    Block {
        /// Body primitives relative to the block origin.
        body: Vec<Primitive>,
    },
    /// Aperture-shaped view of an Excellon tool.
    ToolHole {
        /// Drill diameter.
        diameter: f64,
    },
}

impl Aperture {
    /// Half-extents used when expanding stroked segments to a bounding box.
    ///
    /// For macro apertures the extent is the symmetric hull of the resolved
    /// primitives; block apertures have no stroke extent (they cannot draw).
    pub fn stroke_extent(&self) -> (f64, f64) {
        match self {
            Self::Circle { diameter, .. } | Self::ToolHole { diameter } => {
                let r = diameter / 2.0;
                (r, r)
            }
            Self::Rectangle { width, height, .. } | Self::Obround { width, height, .. } => {
                (width / 2.0, height / 2.0)
            }
            Self::Polygon { diameter, .. } => {
                let r = diameter / 2.0;
                (r, r)
            }
            Self::Macro { primitives, .. } => {
                let mut bounds = BoundingBox::new();
                for primitive in primitives {
                    bounds.merge(&primitive.bounding_box());
                }
                if bounds.is_empty() {
                    (0.0, 0.0)
                } else {
                    (
                        bounds.min_x.abs().max(bounds.max_x.abs()),
                        bounds.min_y.abs().max(bounds.max_y.abs()),
                    )
                }
            }
            Self::Block { .. } => (0.0, 0.0),
        }
    }

    /// Bounding box of this aperture flashed at `at`.
    pub fn flash_bounds(&self, at: Point) -> BoundingBox {
        if let Self::Macro { primitives, .. } = self {
            let mut bounds = BoundingBox::new();
            for primitive in primitives {
                bounds.merge(&primitive.bounding_box());
            }
            if bounds.is_empty() {
                bounds.update(at.x, at.y);
                return bounds;
            }
            return bounds.translated(at.x, at.y);
        }

        let (half_w, half_h) = self.stroke_extent();
        let mut bounds = BoundingBox::new();
        bounds.update(at.x - half_w, at.y - half_h);
        bounds.update(at.x + half_w, at.y + half_h);
        bounds
    }
}

/// A straight stroked segment (D01 with linear interpolation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    /// Segment start.
    pub start: Point,
    /// Segment end.
    pub end: Point,
    /// D-code of the stroking aperture.
    pub aperture: i32,
    /// Level index (increments on every `LP`).
    pub level: u32,
    /// Level polarity at emission.
    pub polarity: Polarity,
}

/// A circular stroked segment (D01 with circular interpolation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Arc {
    /// Arc start.
    pub start: Point,
    /// Arc end.
    pub end: Point,
    /// Absolute arc center.
    pub center: Point,
    /// Sweep direction.
    pub direction: ArcDirection,
    /// Quadrant mode active at emission.
    pub quadrant_mode: QuadrantMode,
    /// D-code of the stroking aperture.
    pub aperture: i32,
    /// Level index.
    pub level: u32,
    /// Level polarity at emission.
    pub polarity: Polarity,
}

impl Arc {
    /// Bounding box of the bare arc path (no aperture expansion).
    ///
    /// Includes the start and end points plus every axis crossing inside the
    /// sweep, so wide arcs are not under-reported.
    pub fn path_bounds(&self) -> BoundingBox {
        let mut bounds = BoundingBox::new();
        bounds.update(self.start.x, self.start.y);
        bounds.update(self.end.x, self.end.y);

        let radius = {
            let dx = self.start.x - self.center.x;
            let dy = self.start.y - self.center.y;
            dx.hypot(dy)
        };
        let start_angle = (self.start.y - self.center.y).atan2(self.start.x - self.center.x);
        let end_angle = (self.end.y - self.center.y).atan2(self.end.x - self.center.x);
        let coincident = (self.start.x - self.end.x).abs() <= 1e-9
            && (self.start.y - self.end.y).abs() <= 1e-9;
        // Multi-quadrant arcs with coincident endpoints are full circles.
        let sweep = if coincident && radius > f64::EPSILON {
            match self.direction {
                ArcDirection::Clockwise => -std::f64::consts::TAU,
                ArcDirection::CounterClockwise => std::f64::consts::TAU,
            }
        } else {
            sweep_between(start_angle, end_angle, self.direction)
        };

        // Walk the axis-crossing angles covered by the sweep.
        let step = std::f64::consts::FRAC_PI_2;
        let (from, to) = if sweep >= 0.0 {
            (start_angle, start_angle + sweep)
        } else {
            (start_angle + sweep, start_angle)
        };
        let mut k = (from / step).ceil();
        while k * step <= to {
            let angle = k * step;
            bounds.update(
                radius.mul_add(angle.cos(), self.center.x),
                radius.mul_add(angle.sin(), self.center.y),
            );
            k += 1.0;
        }
        bounds
    }
}

/// Signed sweep from `start_angle` to `end_angle` in the given direction.
///
/// Coincident angles produce a zero sweep (not a full circle); full-circle
/// arcs are resolved by the interpreter before primitives are built.
pub fn sweep_between(start_angle: f64, end_angle: f64, direction: ArcDirection) -> f64 {
    let delta = end_angle - start_angle;
    match direction {
        ArcDirection::Clockwise => {
            if delta > 0.0 {
                delta - std::f64::consts::TAU
            } else {
                delta
            }
        }
        ArcDirection::CounterClockwise => {
            if delta < 0.0 {
                delta + std::f64::consts::TAU
            } else {
                delta
            }
        }
    }
}

/// An aperture stamp (D03).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flash {
    /// Flash position.
    pub position: Point,
    /// D-code of the flashed aperture.
    pub aperture: i32,
    /// Level index.
    pub level: u32,
    /// Level polarity at emission.
    pub polarity: Polarity,
}

/// One segment of a region contour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ContourSegment {
    /// Straight segment.
    Line {
        /// Segment start.
        start: Point,
        /// Segment end.
        end: Point,
    },
    /// Circular segment.
    Arc {
        /// Segment start.
        start: Point,
        /// Segment end.
        end: Point,
        /// Absolute arc center.
        center: Point,
        /// Sweep direction.
        direction: ArcDirection,
    },
}

impl ContourSegment {
    /// Start point of the segment.
    pub const fn start(&self) -> Point {
        match self {
            Self::Line { start, .. } | Self::Arc { start, .. } => *start,
        }
    }

    /// End point of the segment.
    pub const fn end(&self) -> Point {
        match self {
            Self::Line { end, .. } | Self::Arc { end, .. } => *end,
        }
    }

    /// Rewrites the end point (used to snap a contour exactly closed).
    pub fn set_end(&mut self, p: Point) {
        match self {
            Self::Line { end, .. } | Self::Arc { end, .. } => *end = p,
        }
    }
}

/// A filled region bounded by a closed contour (G36/G37).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    /// Ordered closed contour; the last segment ends where the first starts.
    pub segments: Vec<ContourSegment>,
    /// Level index.
    pub level: u32,
    /// Level polarity at emission.
    pub polarity: Polarity,
}

/// A single drill hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drill {
    /// Hole center.
    pub position: Point,
    /// Tool number.
    pub tool: u32,
}

/// A routed slot between two points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    /// Slot start.
    pub start: Point,
    /// Slot end.
    pub end: Point,
    /// Tool number.
    pub tool: u32,
}

/// A normalized graphic operation in canonical draw order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Primitive {
    /// Straight stroked segment.
    Line(Line),
    /// Circular stroked segment.
    Arc(Arc),
    /// Aperture stamp.
    Flash(Flash),
    /// Filled contour.
    Region(Region),
    /// Drill hit.
    Drill(Drill),
    /// Routed slot.
    Slot(Slot),
}

impl Primitive {
    /// Returns a copy offset by `(dx, dy)` — used by step-and-repeat and
    /// block-aperture expansion.
    #[must_use]
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        match self {
            Self::Line(line) => Self::Line(Line {
                start: line.start.translated(dx, dy),
                end: line.end.translated(dx, dy),
                ..line.clone()
            }),
            Self::Arc(arc) => Self::Arc(Arc {
                start: arc.start.translated(dx, dy),
                end: arc.end.translated(dx, dy),
                center: arc.center.translated(dx, dy),
                ..arc.clone()
            }),
            Self::Flash(flash) => Self::Flash(Flash {
                position: flash.position.translated(dx, dy),
                ..flash.clone()
            }),
            Self::Region(region) => Self::Region(Region {
                segments: region
                    .segments
                    .iter()
                    .map(|segment| match segment {
                        ContourSegment::Line { start, end } => ContourSegment::Line {
                            start: start.translated(dx, dy),
                            end: end.translated(dx, dy),
                        },
                        ContourSegment::Arc {
                            start,
                            end,
                            center,
                            direction,
                        } => ContourSegment::Arc {
                            start: start.translated(dx, dy),
                            end: end.translated(dx, dy),
                            center: center.translated(dx, dy),
                            direction: *direction,
                        },
                    })
                    .collect(),
                ..region.clone()
            }),
            Self::Drill(drill) => Self::Drill(Drill {
                position: drill.position.translated(dx, dy),
                ..drill.clone()
            }),
            Self::Slot(slot) => Self::Slot(Slot {
                start: slot.start.translated(dx, dy),
                end: slot.end.translated(dx, dy),
                ..slot.clone()
            }),
        }
    }

    /// Bounding box of the primitive including aperture/tool expansion.
    ///
    /// Returns `None` when the referenced aperture or tool is not present in
    /// the dictionaries (interpreters never emit such primitives).
    pub fn bounding_box(
        &self,
        apertures: &BTreeMap<i32, Aperture>,
        tools: &BTreeMap<u32, Tool>,
    ) -> Option<BoundingBox> {
        match self {
            Self::Line(line) => {
                let aperture = apertures.get(&line.aperture)?;
                let (half_w, half_h) = aperture.stroke_extent();
                let mut bounds = BoundingBox::new();
                bounds.update(line.start.x, line.start.y);
                bounds.update(line.end.x, line.end.y);
                Some(bounds.expanded(half_w, half_h))
            }
            Self::Arc(arc) => {
                let aperture = apertures.get(&arc.aperture)?;
                let (half_w, half_h) = aperture.stroke_extent();
                Some(arc.path_bounds().expanded(half_w, half_h))
            }
            Self::Flash(flash) => {
                let aperture = apertures.get(&flash.aperture)?;
                Some(aperture.flash_bounds(flash.position))
            }
            Self::Region(region) => {
                let mut bounds = BoundingBox::new();
                for segment in &region.segments {
                    match segment {
                        ContourSegment::Line { start, end } => {
                            bounds.update(start.x, start.y);
                            bounds.update(end.x, end.y);
                        }
                        ContourSegment::Arc {
                            start,
                            end,
                            center,
                            direction,
                        } => {
                            let arc = Arc {
                                start: *start,
                                end: *end,
                                center: *center,
                                direction: *direction,
                                quadrant_mode: QuadrantMode::Multi,
                                aperture: 0,
                                level: region.level,
                                polarity: region.polarity,
                            };
                            bounds.merge(&arc.path_bounds());
                        }
                    }
                }
                Some(bounds)
            }
            Self::Drill(drill) => {
                let tool = tools.get(&drill.tool)?;
                let r = tool.diameter / 2.0;
                let mut bounds = BoundingBox::new();
                bounds.update(drill.position.x - r, drill.position.y - r);
                bounds.update(drill.position.x + r, drill.position.y + r);
                Some(bounds)
            }
            Self::Slot(slot) => {
                let tool = tools.get(&slot.tool)?;
                let r = tool.diameter / 2.0;
                let mut bounds = BoundingBox::new();
                bounds.update(slot.start.x, slot.start.y);
                bounds.update(slot.end.x, slot.end.y);
                Some(bounds.expanded(r, r))
            }
        }
    }
}

/// An Excellon tool definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    /// Tool number (T1, T2, ...).
    pub number: u32,
    /// Drill diameter.
    pub diameter: f64,
    /// Whether the hole is plated, when the header says.
    pub plated: Option<bool>,
    /// Infeed rate (`F` field), when present.
    pub feed_rate: Option<f64>,
    /// Spindle speed (`S` field), when present.
    pub spindle_speed: Option<f64>,
    /// Number of hits and slots made with this tool.
    pub hit_count: u32,
}

/// Category of a recoverable parse problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoteKind {
    /// D01/D03 referenced an aperture missing from the dictionary.
    UndefinedAperture,
    /// A hit or slot referenced an undefined tool.
    UndefinedTool,
    /// D03 occurred inside region mode.
    FlashInRegion,
    /// No single-quadrant center candidate produced a valid arc.
    AmbiguousArc,
    /// A region contour did not close within tolerance.
    UnclosedRegion,
    /// An unrecognized command was skipped.
    UnknownCommand,
    /// A coordinate string did not fit the declared format.
    NumberOverflow,
    /// An aperture D-code or tool number was defined twice.
    Redefinition,
    /// The drill coordinate format was inferred rather than declared.
    InferredDialect,
    /// A deprecated construct was tolerated.
    Deprecated,
    /// Data followed the end-of-program marker.
    TrailingData,
}

/// A recoverable problem recorded during parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    /// 1-based source line.
    pub line: usize,
    /// Problem category.
    pub kind: NoteKind,
    /// Human-readable detail.
    pub detail: String,
}

/// Scope of a `TF`/`TA`/`TO` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttributeScope {
    /// File attribute (`TF`).
    File,
    /// Aperture attribute (`TA`).
    Aperture,
    /// Object attribute (`TO`).
    Object,
}

/// A standard or user attribute carried through from the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    /// Attribute scope.
    pub scope: AttributeScope,
    /// Attribute name (e.g. `.FileFunction`).
    pub name: String,
    /// Comma-separated values, split.
    pub values: Vec<String>,
    /// 1-based source line of the declaration.
    pub line: usize,
    /// Index of the primitive an object attribute attached to.
    pub primitive: Option<usize>,
}

/// Source file format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileFormat {
    /// RS-274X Gerber.
    Gerber,
    /// Excellon NC-drill.
    Excellon,
}

/// Summary statistics accumulated over a parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStats {
    /// Units declared by the file, when any.
    pub units: Option<Unit>,
    /// Bounding box over all emitted primitives.
    pub bounds: BoundingBox,
    /// Number of command blocks processed.
    pub command_count: u32,
    /// Recoverable problems in encounter order.
    pub notes: Vec<Note>,
}

impl FileStats {
    /// Creates empty stats.
    pub const fn new() -> Self {
        Self {
            units: None,
            bounds: BoundingBox::new(),
            command_count: 0,
            notes: Vec::new(),
        }
    }

    /// Records a note.
    pub fn note(&mut self, line: usize, kind: NoteKind, detail: impl Into<String>) {
        self.notes.push(Note {
            line,
            kind,
            detail: detail.into(),
        });
    }
}

impl Default for FileStats {
    fn default() -> Self {
        Self::new()
    }
}

/// The complete decoded content of one CAM file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CamFile {
    /// Source format.
    pub format: FileFormat,
    /// Parse statistics and notes.
    pub stats: FileStats,
    /// Whole-image polarity.
    pub image_polarity: ImagePolarity,
    /// Primitives in canonical draw order.
    pub primitives: Vec<Primitive>,
    /// Aperture dictionary keyed by D-code (tools appear as `ToolHole`).
    pub apertures: BTreeMap<i32, Aperture>,
    /// Excellon tool table keyed by tool number.
    pub tools: BTreeMap<u32, Tool>,
    /// File, aperture, and object attributes.
    pub attributes: Vec<Attribute>,
    /// G04 / `;` comments in source order.
    pub comments: Vec<String>,
}

impl CamFile {
    /// Creates an empty file of the given format.
    pub const fn new(format: FileFormat) -> Self {
        Self {
            format,
            stats: FileStats::new(),
            image_polarity: ImagePolarity::Positive,
            primitives: Vec::new(),
            apertures: BTreeMap::new(),
            tools: BTreeMap::new(),
            attributes: Vec::new(),
            comments: Vec::new(),
        }
    }
}
