//! Conversions between document point space, normalized page space and
//! rotated display space.
//!
//! Normalized rectangles are relative to the unrotated page with a top-left
//! origin. Everything persisted (highlights) lives in that space; rotation is
//! applied only on the way to the screen and undone on the way back.

use serde::{Deserialize, Serialize};

/// A run of text as reported by the document reader.
///
/// `x` is the left edge and `y` the bottom edge of the run, both in points,
/// with `y` measured downwards from the top of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl NormalizedRect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_ltwh(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self::new(left, top, left + width, top + height)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Clamps every edge into `[0, 1]` and puts the edges back in order.
    pub fn clamp(self) -> Self {
        let left = self.left.clamp(0.0, 1.0);
        let right = self.right.clamp(0.0, 1.0);
        let top = self.top.clamp(0.0, 1.0);
        let bottom = self.bottom.clamp(0.0, 1.0);
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.left)
            && (0.0..=1.0).contains(&self.right)
            && (0.0..=1.0).contains(&self.top)
            && (0.0..=1.0).contains(&self.bottom)
            && self.left <= self.right
            && self.top <= self.bottom
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f32) -> bool {
        (self.left - other.left).abs() <= tolerance
            && (self.top - other.top).abs() <= tolerance
            && (self.right - other.right).abs() <= tolerance
            && (self.bottom - other.bottom).abs() <= tolerance
    }

    /// Scales into absolute PDF user space inside `media_box`
    /// (bottom-left origin).
    pub fn to_points(&self, media_box: &PointRect) -> PointRect {
        let width = media_box.width();
        let height = media_box.height();
        PointRect {
            x0: media_box.x0 + self.left * width,
            y0: media_box.y1 - self.bottom * height,
            x1: media_box.x0 + self.right * width,
            y1: media_box.y1 - self.top * height,
        }
    }

    /// Inverse of [`NormalizedRect::to_points`].
    pub fn from_points(points: &PointRect, media_box: &PointRect) -> Option<Self> {
        let width = media_box.width();
        let height = media_box.height();
        if width <= 0.0 || height <= 0.0 {
            return None;
        }
        let rect = Self {
            left: (points.x0 - media_box.x0) / width,
            top: (media_box.y1 - points.y1) / height,
            right: (points.x1 - media_box.x0) / width,
            bottom: (media_box.y1 - points.y0) / height,
        };
        Some(rect.clamp())
    }
}

/// A rectangle in PDF user space: `x0 <= x1`, `y0 <= y1`, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PointRect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// Clockwise page rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RotationAngle {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl RotationAngle {
    /// Snaps an arbitrary angle to the nearest quadrant. Boundaries at
    /// 45/135/225/315 belong to the following quadrant.
    pub fn snap(degrees: f32) -> Self {
        if !degrees.is_finite() {
            return Self::Deg0;
        }
        let degrees = degrees.rem_euclid(360.0);
        if !(45.0..315.0).contains(&degrees) {
            Self::Deg0
        } else if degrees < 135.0 {
            Self::Deg90
        } else if degrees < 225.0 {
            Self::Deg180
        } else {
            Self::Deg270
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// The rotation that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Self::Deg0 => Self::Deg0,
            Self::Deg90 => Self::Deg270,
            Self::Deg180 => Self::Deg180,
            Self::Deg270 => Self::Deg90,
        }
    }

    pub const ALL: [RotationAngle; 4] = [Self::Deg0, Self::Deg90, Self::Deg180, Self::Deg270];
}

/// Converts a point-space run to a normalized rect on its page. Runs that
/// overflow the media box are clamped to it.
pub fn to_normalized(run: &TextRun, page: PageSize) -> NormalizedRect {
    if !page.is_valid() {
        return NormalizedRect::default();
    }
    let left = run.x / page.width;
    let width = run.width / page.width;
    let top = (run.y - run.height) / page.height;
    let height = run.height / page.height;
    NormalizedRect {
        left: left.max(0.0),
        top: top.max(0.0),
        right: (left + width).min(1.0),
        bottom: (top + height).min(1.0),
    }
    .clamp()
}

/// Maps an unrotated rect to where it is drawn on a page shown rotated
/// clockwise by `angle`.
pub fn rotate_forward(rect: NormalizedRect, angle: RotationAngle) -> NormalizedRect {
    let (l, t, w, h) = (rect.left, rect.top, rect.width(), rect.height());
    match angle {
        RotationAngle::Deg0 => rect,
        RotationAngle::Deg90 => NormalizedRect::from_ltwh(1.0 - (t + h), l, h, w),
        RotationAngle::Deg180 => NormalizedRect::from_ltwh(1.0 - (l + w), 1.0 - (t + h), w, h),
        RotationAngle::Deg270 => NormalizedRect::from_ltwh(t, 1.0 - (l + w), h, w),
    }
}

/// Maps a rect captured on a page displayed at `angle` back to unrotated
/// storage space.
pub fn rotate_inverse(rect: NormalizedRect, angle: RotationAngle) -> NormalizedRect {
    rotate_forward(rect, angle.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1e-5;

    fn sample_rects() -> Vec<NormalizedRect> {
        let mut rects = vec![
            NormalizedRect::new(0.0, 0.0, 1.0, 1.0),
            NormalizedRect::new(0.0, 0.0, 0.0, 0.0),
            NormalizedRect::new(0.5, 0.5, 0.5, 0.5),
            NormalizedRect::new(1.0, 1.0, 1.0, 1.0),
        ];
        for i in 0..6 {
            for j in 0..6 {
                let left = i as f32 * 0.13;
                let top = j as f32 * 0.11;
                let width = (1.0 - left) * 0.37;
                let height = (1.0 - top) * 0.61;
                rects.push(NormalizedRect::from_ltwh(left, top, width, height));
            }
        }
        rects
    }

    #[test]
    fn rotation_round_trip_for_all_angles() {
        for rect in sample_rects() {
            assert!(rect.is_valid(), "{rect:?}");
            for angle in RotationAngle::ALL {
                let rotated = rotate_forward(rect, angle);
                assert!(
                    rotated.approx_eq(&rotated.clamp(), TOLERANCE),
                    "{angle:?} left the page: {rotated:?}"
                );
                let back = rotate_inverse(rotated, angle);
                assert!(
                    back.approx_eq(&rect, TOLERANCE),
                    "{angle:?}: {rect:?} -> {rotated:?} -> {back:?}"
                );
            }
        }
    }

    #[test]
    fn quarter_turn_moves_top_left_corner_to_top_right() {
        let rect = NormalizedRect::from_ltwh(0.0, 0.0, 0.2, 0.1);
        let rotated = rotate_forward(rect, RotationAngle::Deg90);
        assert!(rotated.approx_eq(&NormalizedRect::new(0.9, 0.0, 1.0, 0.2), TOLERANCE));

        let rotated = rotate_forward(rect, RotationAngle::Deg180);
        assert!(rotated.approx_eq(&NormalizedRect::new(0.8, 0.9, 1.0, 1.0), TOLERANCE));

        let rotated = rotate_forward(rect, RotationAngle::Deg270);
        assert!(rotated.approx_eq(&NormalizedRect::new(0.0, 0.8, 0.1, 1.0), TOLERANCE));
    }

    #[test]
    fn snap_uses_quadrant_boundaries() {
        assert_eq!(RotationAngle::snap(0.0), RotationAngle::Deg0);
        assert_eq!(RotationAngle::snap(44.9), RotationAngle::Deg0);
        assert_eq!(RotationAngle::snap(45.0), RotationAngle::Deg90);
        assert_eq!(RotationAngle::snap(134.0), RotationAngle::Deg90);
        assert_eq!(RotationAngle::snap(135.0), RotationAngle::Deg180);
        assert_eq!(RotationAngle::snap(225.0), RotationAngle::Deg270);
        assert_eq!(RotationAngle::snap(315.0), RotationAngle::Deg0);
        assert_eq!(RotationAngle::snap(-90.0), RotationAngle::Deg270);
        assert_eq!(RotationAngle::snap(450.0), RotationAngle::Deg90);
        assert_eq!(RotationAngle::snap(f32::NAN), RotationAngle::Deg0);
    }

    #[test]
    fn to_normalized_scales_and_clamps() {
        let page = PageSize::new(200.0, 100.0);
        let run = TextRun {
            text: "abc".into(),
            x: 20.0,
            y: 30.0,
            width: 40.0,
            height: 10.0,
        };
        let rect = to_normalized(&run, page);
        assert!(rect.approx_eq(&NormalizedRect::new(0.1, 0.2, 0.3, 0.3), TOLERANCE));

        let overflowing = TextRun {
            text: "x".into(),
            x: -5.0,
            y: 105.0,
            width: 210.0,
            height: 10.0,
        };
        let rect = to_normalized(&overflowing, page);
        assert!(rect.is_valid());
        assert_eq!(rect.left, 0.0);
        assert_eq!(rect.right, 1.0);
        assert_eq!(rect.bottom, 1.0);
    }

    #[test]
    fn to_normalized_on_degenerate_page_is_empty() {
        let run = TextRun {
            text: "x".into(),
            x: 1.0,
            y: 1.0,
            width: 1.0,
            height: 1.0,
        };
        assert_eq!(
            to_normalized(&run, PageSize::new(0.0, 10.0)),
            NormalizedRect::default()
        );
    }

    #[test]
    fn point_conversion_round_trips_with_offset_media_box() {
        let media_box = PointRect::new(10.0, 20.0, 610.0, 820.0);
        let rect = NormalizedRect::new(0.25, 0.1, 0.5, 0.2);
        let points = rect.to_points(&media_box);
        assert!((points.x0 - 160.0).abs() < 1e-3);
        assert!((points.y1 - 740.0).abs() < 1e-3);
        let back = NormalizedRect::from_points(&points, &media_box).unwrap();
        assert!(back.approx_eq(&rect, 1e-4));
    }
}
