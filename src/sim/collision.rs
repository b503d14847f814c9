//! Slice detection
//!
//! A slice is the pointer's path during one tick: the segment from the previous
//! trail point to the current pointer position. An object is cut when that
//! segment touches its circular interactive bounds. On the first frame of a
//! drag there is no previous point and the test degenerates to point-in-circle.

use glam::Vec2;

/// Result of a slice check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceHit {
    /// Closest point on the slice path to the object's center
    pub point: Vec2,
    /// Distance from that point to the center
    pub distance: f32,
}

/// Closest point on segment `a..b` to `p`
#[inline]
pub fn closest_point_on_segment(a: Vec2, b: Vec2, p: Vec2) -> Vec2 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Check a slice path against a circle
pub fn slice_circle(from: Option<Vec2>, to: Vec2, center: Vec2, radius: f32) -> Option<SliceHit> {
    let point = match from {
        Some(from) => closest_point_on_segment(from, to, center),
        None => to,
    };
    let distance = point.distance(center);
    (distance <= radius).then_some(SliceHit { point, distance })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_inside_and_outside() {
        let center = Vec2::new(100.0, 100.0);
        assert!(slice_circle(None, Vec2::new(110.0, 100.0), center, 20.0).is_some());
        assert!(slice_circle(None, Vec2::new(130.0, 100.0), center, 20.0).is_none());
    }

    #[test]
    fn test_fast_swipe_through_object() {
        // Both endpoints are outside the circle but the path crosses it
        let center = Vec2::new(100.0, 100.0);
        let hit = slice_circle(
            Some(Vec2::new(0.0, 100.0)),
            Vec2::new(200.0, 100.0),
            center,
            20.0,
        );
        let hit = hit.expect("swipe should cut the object");
        assert_eq!(hit.point, center);
        assert_eq!(hit.distance, 0.0);
    }

    #[test]
    fn test_swipe_passing_beside_object() {
        let center = Vec2::new(100.0, 100.0);
        let hit = slice_circle(
            Some(Vec2::new(0.0, 150.0)),
            Vec2::new(200.0, 150.0),
            center,
            20.0,
        );
        assert!(hit.is_none());
    }

    #[test]
    fn test_segment_endpoint_clamp() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(10.0, 0.0);
        assert_eq!(closest_point_on_segment(a, b, Vec2::new(-5.0, 3.0)), a);
        assert_eq!(closest_point_on_segment(a, b, Vec2::new(15.0, 3.0)), b);
        assert_eq!(closest_point_on_segment(a, a, Vec2::new(15.0, 3.0)), a);
    }
}
